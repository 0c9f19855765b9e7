pub mod bus;
pub mod opcode;
mod address_mode;
mod instruction;

pub use address_mode::AddressMode;
pub use instruction::Instruction;

use crate::cpu::bus::Bus;

use log::{debug, trace};

/// Interpreter health. `Jammed` means one of the twelve KIL encodings was
/// fetched; the CPU refuses to run further and the harness can inspect why.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ExecutorStatus {
    Running,
    Jammed,
}

pub struct Status {
    pub carry: bool,
    pub zero: bool,
    pub interrupt: bool,
    pub decimal: bool,
    pub overflow: bool,
    pub negative: bool,
}

impl Default for Status {
    fn default() -> Status {
        // 0x24: interrupts masked, the always-set bit 5 on.
        Status {
            carry: false,
            zero: false,
            interrupt: true,
            decimal: false,
            overflow: false,
            negative: false,
        }
    }
}

impl Status {
    /// Bit 5 reads as 1 on every push; bit 4 is only set for pushes caused
    /// by BRK/PHP, never for interrupts.
    pub fn as_byte(&self, break_flag: bool) -> u8 {
        let mut result: u8 = self.negative as u8;
        result = (result << 1) | self.overflow as u8;
        result = (result << 1) | 1;
        result = (result << 1) | break_flag as u8;
        result = (result << 1) | self.decimal as u8;
        result = (result << 1) | self.interrupt as u8;
        result = (result << 1) | self.zero as u8;
        result = (result << 1) | self.carry as u8;
        result
    }

    /// PLP/RTI ignore bits 4 and 5.
    pub fn set_from_byte(&mut self, byte: u8) {
        self.carry = byte & 0x01 != 0;
        self.zero = byte & 0x02 != 0;
        self.interrupt = byte & 0x04 != 0;
        self.decimal = byte & 0x08 != 0;
        self.overflow = byte & 0x40 != 0;
        self.negative = byte & 0x80 != 0;
    }
}

pub struct Cpu {
    pub accumulator: u8,
    pub x_index: u8,
    pub y_index: u8,
    pub status: Status,
    pub program_counter: u16,
    pub stack_pointer: u8,
    pub bus: Bus,
    pub cycle: u64,
    pub executor_status: ExecutorStatus,
    pending_nmi: bool,
    page_crossed: bool,
    cycle_budget: u8,
}

impl Cpu {
    pub fn new(bus: Bus) -> Cpu {
        let mut cpu = Cpu {
            accumulator: 0,
            x_index: 0,
            y_index: 0,
            status: Status::default(),
            program_counter: 0,
            stack_pointer: 0xFD,
            bus,
            cycle: 0,
            executor_status: ExecutorStatus::Running,
            pending_nmi: false,
            page_crossed: false,
            cycle_budget: 0,
        };
        cpu.reset();
        cpu
    }

    pub fn reset(&mut self) {
        self.accumulator = 0;
        self.x_index = 0;
        self.y_index = 0;
        self.status = Status::default();
        self.stack_pointer = 0xFD;
        self.pending_nmi = false;
        self.executor_status = ExecutorStatus::Running;
        self.program_counter = self.read_16(0xFFFC);
        self.bus.advance_cycles(7);
        self.cycle = 7;
        debug!("reset: PC={:#06x}", self.program_counter);
    }

    fn read_8(&mut self, address: u16) -> u8 {
        self.bus.read(address)
    }

    fn read_16(&mut self, address: u16) -> u16 {
        let lower_byte = self.bus.read(address) as u16;
        let higher_byte = self.bus.read(address.wrapping_add(1)) as u16;
        lower_byte | (higher_byte << 8)
    }

    fn write_8(&mut self, address: u16, value: u8) {
        self.bus.write(address, value);
    }

    fn stack_push_8(&mut self, value: u8) {
        self.write_8(0x0100 + self.stack_pointer as u16, value);
        self.stack_pointer = self.stack_pointer.wrapping_sub(1);
    }

    fn stack_push_16(&mut self, value: u16) {
        self.stack_push_8((value >> 8) as u8);
        self.stack_push_8((value & 0xFF) as u8);
    }

    fn stack_pop_8(&mut self) -> u8 {
        self.stack_pointer = self.stack_pointer.wrapping_add(1);
        self.read_8(0x0100 + self.stack_pointer as u16)
    }

    fn stack_pop_16(&mut self) -> u16 {
        (self.stack_pop_8() as u16) | ((self.stack_pop_8() as u16) << 8)
    }

    fn crossing_page(&self, address_1: u16, address_2: u16) -> bool {
        address_1 & 0xFF00 != address_2 & 0xFF00
    }

    /// Runs one instruction (or services one interrupt) and paces the rest
    /// of the machine by the cycles it consumed. Returns that cycle count;
    /// zero once the interpreter has jammed.
    pub fn step(&mut self) -> u32 {
        if self.executor_status == ExecutorStatus::Jammed {
            return 0;
        }

        let mut cycles = if self.pending_nmi {
            self.pending_nmi = false;
            self.service_interrupt(0xFFFA);
            7
        } else if self.bus.irq_asserted() && !self.status.interrupt {
            self.service_interrupt(0xFFFE);
            7
        } else {
            self.execute_next_opcode() as u32
        };

        self.bus.advance_cycles(cycles);

        // A $4014 write latched during the instruction stalls the CPU now;
        // the OAM transfer itself is paced across those stall cycles, and
        // their count depends on the parity the instruction ended on.
        let stall = self.bus.take_dma_stall();
        if stall > 0 {
            self.bus.advance_cycles(stall);
            cycles += stall;
        }
        self.cycle += cycles as u64;

        // The edge latched by the PPU during this instruction becomes
        // serviceable at the next boundary.
        if self.bus.poll_nmi() {
            self.pending_nmi = true;
        }
        cycles
    }

    fn service_interrupt(&mut self, vector: u16) {
        self.stack_push_16(self.program_counter);
        let status = self.status.as_byte(false);
        self.stack_push_8(status);
        self.status.interrupt = true;
        self.program_counter = self.read_16(vector);
    }

    pub fn get_next_opcode(&mut self) -> u8 {
        self.read_8(self.program_counter)
    }

    fn execute_next_opcode(&mut self) -> u8 {
        let opcode_byte = self.get_next_opcode();
        trace!(
            "{:04X}  {:02X}  A:{:02X} X:{:02X} Y:{:02X} P:{:02X} SP:{:02X} CYC:{}",
            self.program_counter,
            opcode_byte,
            self.accumulator,
            self.x_index,
            self.y_index,
            self.status.as_byte(false),
            self.stack_pointer,
            self.cycle
        );

        let op = opcode::opcode_mapper(opcode_byte);
        self.program_counter = self.program_counter.wrapping_add(1);
        self.cycle_budget = op.cycles;
        self.page_crossed = false;

        let address = self.execute_address_mode(op.address_mode);
        self.execute_instruction(&op, address, opcode_byte);
        self.cycle_budget
    }

    fn execute_address_mode(&mut self, address_mode: address_mode::AddressMode) -> u16 {
        use address_mode::AddressMode::*;
        match address_mode {
            Abs => self.abs(),
            AbsX => self.abs_x(),
            AbsY => self.abs_y(),
            Ind => self.ind(),
            IndX => self.ind_x(),
            IndY => self.ind_y(),
            Zpg => self.zpg(),
            ZpgX => self.zpg_x(),
            ZpgY => self.zpg_y(),
            Imp => self.imp(),
            Rel => self.rel(),
            Acc => self.acc(),
            Imm => self.imm(),
        }
    }

    fn execute_instruction(&mut self, opcode: &opcode::Opcode, address: u16, opcode_byte: u8) {
        use address_mode::AddressMode::Acc;
        use Instruction::*;
        match (opcode.instruction, opcode.address_mode) {
            (ADC, _) => self.adc(address),
            (AND, _) => self.and(address),
            (ASL, Acc) => self.asl_acc(),
            (ASL, _) => self.asl(address),
            (BCC, _) => self.bcc(address),
            (BCS, _) => self.bcs(address),
            (BEQ, _) => self.beq(address),
            (BIT, _) => self.bit(address),
            (BMI, _) => self.bmi(address),
            (BNE, _) => self.bne(address),
            (BPL, _) => self.bpl(address),
            (BRK, _) => self.brk(),
            (BVC, _) => self.bvc(address),
            (BVS, _) => self.bvs(address),
            (CLC, _) => self.clc(),
            (CLD, _) => self.cld(),
            (CLI, _) => self.cli(),
            (CLV, _) => self.clv(),
            (CMP, _) => self.cmp(address),
            (CPX, _) => self.cpx(address),
            (CPY, _) => self.cpy(address),
            (DEC, _) => self.dec(address),
            (DEX, _) => self.dex(),
            (DEY, _) => self.dey(),
            (EOR, _) => self.eor(address),
            (INC, _) => self.inc(address),
            (INX, _) => self.inx(),
            (INY, _) => self.iny(),
            (JMP, _) => self.jmp(address),
            (JSR, _) => self.jsr(address),
            (LDA, _) => self.lda(address),
            (LDX, _) => self.ldx(address),
            (LDY, _) => self.ldy(address),
            (LSR, Acc) => self.lsr_acc(),
            (LSR, _) => self.lsr(address),
            (NOP, _) => self.nop(),
            (ORA, _) => self.ora(address),
            (PHA, _) => self.pha(),
            (PHP, _) => self.php(),
            (PLA, _) => self.pla(),
            (PLP, _) => self.plp(),
            (ROL, Acc) => self.rol_acc(),
            (ROL, _) => self.rol(address),
            (ROR, Acc) => self.ror_acc(),
            (ROR, _) => self.ror(address),
            (RTI, _) => self.rti(),
            (RTS, _) => self.rts(),
            (SBC, _) => self.sbc(address),
            (SEC, _) => self.sec(),
            (SED, _) => self.sed(),
            (SEI, _) => self.sei(),
            (STA, _) => self.sta(address),
            (STX, _) => self.stx(address),
            (STY, _) => self.sty(address),
            (TAX, _) => self.tax(),
            (TAY, _) => self.tay(),
            (TSX, _) => self.tsx(),
            (TXA, _) => self.txa(),
            (TXS, _) => self.txs(),
            (TYA, _) => self.tya(),
            (LAX, _) => self.lax(address),
            (SAX, _) => self.sax(address),
            (DCP, _) => self.dcp(address),
            (ISC, _) => self.isc(address),
            (SLO, _) => self.slo(address),
            (RLA, _) => self.rla(address),
            (SRE, _) => self.sre(address),
            (RRA, _) => self.rra(address),
            (KIL, _) => self.kil(opcode_byte),
        }
    }
}
