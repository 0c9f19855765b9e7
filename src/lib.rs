//! Core NES emulation engine: a cycle-counted 6502 interpreter, a
//! dot-pipelined PPU and the bus gluing them together. Everything that
//! touches the outside world (window, audio device, ROM files, input
//! polling) stays behind the [`Cartridge`], [`VideoSink`], [`AudioSink`]
//! and [`Controller`] seams.

pub mod apu;
pub mod cartridge;
pub mod controller;
pub mod cpu;
pub mod ppu;

pub use apu::{AudioSink, NullAudio};
pub use cartridge::{BasicCartridge, Cartridge, Mirroring};
pub use controller::{Button, Controller};
pub use cpu::{Cpu, ExecutorStatus};
pub use ppu::display::{Frame, NullVideo, VideoSink, DISPLAY_HEIGHT, DISPLAY_WIDTH};
pub use ppu::Ppu;

use std::cell::RefCell;
use std::rc::Rc;

/// The assembled machine. Owns the CPU (which owns the bus, which owns the
/// PPU, APU and controllers) and forwards completed frames and audio
/// samples to the harness-provided sinks.
pub struct Nes {
    pub cpu: Cpu,
    video: Box<dyn VideoSink>,
    audio: Box<dyn AudioSink>,
    stop_requested: bool,
}

impl Nes {
    pub fn new(cartridge: Rc<RefCell<dyn Cartridge>>) -> Nes {
        Nes::with_sinks(cartridge, Box::new(NullVideo), Box::new(NullAudio))
    }

    pub fn with_sinks(
        cartridge: Rc<RefCell<dyn Cartridge>>,
        video: Box<dyn VideoSink>,
        audio: Box<dyn AudioSink>,
    ) -> Nes {
        let ppu = Ppu::new(ppu::bus::Bus::new(cartridge.clone()));
        let bus = cpu::bus::Bus::new(cartridge, ppu);
        Nes {
            cpu: Cpu::new(bus),
            video,
            audio,
            stop_requested: false,
        }
    }

    pub fn reset(&mut self) {
        self.cpu.bus.ppu.reset();
        self.cpu.bus.apu.reset();
        self.cpu.reset();
        self.stop_requested = false;
    }

    /// Runs a single CPU instruction (or interrupt entry) and pumps the
    /// sinks. Returns the cycles consumed; 0 once the interpreter jammed.
    pub fn step_instruction(&mut self) -> u32 {
        let cycles = self.cpu.step();
        self.forward_outputs();
        cycles
    }

    /// Runs instructions until the PPU hands over a finished frame. Returns
    /// false when stopped externally or jammed on an illegal opcode before
    /// the frame completed.
    pub fn step_frame(&mut self) -> bool {
        loop {
            if self.stop_requested {
                self.stop_requested = false;
                return false;
            }
            if self.cpu.executor_status == ExecutorStatus::Jammed {
                return false;
            }
            self.cpu.step();
            if self.forward_outputs() {
                return true;
            }
        }
    }

    /// Requests termination; honored at the next instruction boundary,
    /// never mid-instruction.
    pub fn stop(&mut self) {
        self.stop_requested = true;
    }

    pub fn set_button(&mut self, player: usize, button: Button, down: bool) {
        debug_assert!(player < 2);
        self.cpu.bus.controllers[player & 1].set_button(button, down);
    }

    pub fn pull_nmi(&mut self) {
        self.cpu.bus.pull_nmi();
    }

    pub fn pull_irq(&mut self) {
        self.cpu.bus.pull_irq();
    }

    pub fn reset_irq(&mut self) {
        self.cpu.bus.reset_irq();
    }

    // Hands the frame to the sink by borrow; the sink must copy what it
    // wants to keep. True when a frame was delivered.
    fn forward_outputs(&mut self) -> bool {
        self.cpu.bus.apu.drain_samples(self.audio.as_mut());
        if self.cpu.bus.ppu.take_frame_ready() {
            self.video.present(self.cpu.bus.ppu.frame_buffer());
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nes_with_program(org: u16, program: &[u8]) -> Nes {
        let cartridge: Rc<RefCell<dyn Cartridge>> =
            Rc::new(RefCell::new(BasicCartridge::with_program(org, program)));
        Nes::new(cartridge)
    }

    #[test]
    fn reset_loads_the_vector_and_initial_registers() {
        let mut cartridge = BasicCartridge::new(vec![0; 0x8000], Vec::new(), Mirroring::Vertical);
        cartridge.patch_prg(0xFFFC, 0x34);
        cartridge.patch_prg(0xFFFD, 0x12);
        let nes = Nes::new(Rc::new(RefCell::new(cartridge)));

        assert_eq!(nes.cpu.program_counter, 0x1234);
        assert_eq!(nes.cpu.stack_pointer, 0xFD);
        assert_eq!(nes.cpu.status.as_byte(false), 0x24);
        assert_eq!(nes.cpu.cycle, 7);
    }

    #[test]
    fn lda_immediate_loads_and_costs_two_cycles() {
        let mut nes = nes_with_program(0x8000, &[0xA9, 0x42]);
        let cycles = nes.step_instruction();

        assert_eq!(nes.cpu.accumulator, 0x42);
        assert!(!nes.cpu.status.zero);
        assert!(!nes.cpu.status.negative);
        assert_eq!(cycles, 2);
    }

    #[test]
    fn taken_branch_across_a_page_costs_four_cycles() {
        let mut nes = nes_with_program(0x80FE, &[0xF0, 0x7F]); // BEQ +127
        nes.cpu.status.zero = true;
        let cycles = nes.step_instruction();

        assert_eq!(nes.cpu.program_counter, 0x817F);
        assert_eq!(cycles, 4, "2 base + 1 taken + 1 page cross");
    }

    #[test]
    fn taken_branch_within_a_page_costs_three_cycles() {
        let mut nes = nes_with_program(0x8000, &[0xF0, 0x10]);
        nes.cpu.status.zero = true;
        let cycles = nes.step_instruction();

        assert_eq!(nes.cpu.program_counter, 0x8012);
        assert_eq!(cycles, 3);
    }

    #[test]
    fn untaken_branch_costs_the_base_two_cycles() {
        let mut nes = nes_with_program(0x8000, &[0xF0, 0x10]);
        nes.cpu.status.zero = false;
        assert_eq!(nes.step_instruction(), 2);
        assert_eq!(nes.cpu.program_counter, 0x8002);
    }

    #[test]
    fn indexed_read_pays_the_page_cross_penalty_stores_do_not() {
        // LDX #$01; LDA $80FF,X; STA $80FF,X
        let mut nes = nes_with_program(0x8000, &[0xA2, 0x01, 0xBD, 0xFF, 0x80, 0x9D, 0xFF, 0x80]);
        assert_eq!(nes.step_instruction(), 2);
        assert_eq!(nes.step_instruction(), 5, "LDA abs,X crossing into $8100");
        assert_eq!(nes.step_instruction(), 5, "STA abs,X is flat regardless");
    }

    #[test]
    fn jmp_indirect_wraps_inside_the_pointer_page() {
        let mut nes = nes_with_program(0x8000, &[0x6C, 0xFF, 0x02]);
        nes.cpu.bus.write(0x02FF, 0x40);
        nes.cpu.bus.write(0x0200, 0x80);
        nes.cpu.bus.write(0x0300, 0xEE); // must not be consulted

        nes.step_instruction();
        assert_eq!(nes.cpu.program_counter, 0x8040);
    }

    #[test]
    fn oam_dma_copies_work_ram_and_stalls_the_cpu() {
        // LDA #$07; STA $4014
        let mut nes = nes_with_program(0x8000, &[0xA9, 0x07, 0x8D, 0x14, 0x40]);
        for i in 0..256u16 {
            nes.cpu.bus.write(0x0700 + i, i as u8);
        }
        nes.cpu.bus.write(0x2003, 0);

        nes.step_instruction();
        let before = nes.cpu.cycle;
        let cycles = nes.step_instruction();
        assert!(cycles == 4 + 513 || cycles == 4 + 514, "store plus DMA stall, got {}", cycles);
        assert_eq!(nes.cpu.cycle - before, cycles as u64);

        for i in 0..=255u8 {
            nes.cpu.bus.write(0x2003, i);
            assert_eq!(nes.cpu.bus.read(0x2004), i);
        }
    }

    #[test]
    fn vblank_nmi_reaches_the_cpu_at_an_instruction_boundary() {
        // LDA #$80; STA $2000; then spin. NMI handler parks at $9000.
        let cartridge: Rc<RefCell<dyn Cartridge>> = {
            let mut c = BasicCartridge::with_program(
                0x8000,
                &[0xA9, 0x80, 0x8D, 0x00, 0x20, 0x4C, 0x05, 0x80],
            );
            c.patch_prg(0xFFFA, 0x00);
            c.patch_prg(0xFFFB, 0x90);
            c.patch_prg(0x9000, 0x4C); // JMP $9000
            c.patch_prg(0x9001, 0x00);
            c.patch_prg(0x9002, 0x90);
            Rc::new(RefCell::new(c))
        };
        let mut nes = Nes::new(cartridge);

        let mut serviced = false;
        for _ in 0..40_000 {
            nes.step_instruction();
            if nes.cpu.program_counter == 0x9000 {
                serviced = true;
                break;
            }
        }
        assert!(serviced, "NMI handler was never entered");
        assert!(nes.cpu.status.interrupt, "I is set on interrupt entry");
        // Return address and status were pushed.
        assert_eq!(nes.cpu.stack_pointer, 0xFD - 3);
    }

    #[test]
    fn irq_line_is_level_sensitive() {
        // CLI; then spin on NOPs. The handler is a bare RTI.
        let cartridge: Rc<RefCell<dyn Cartridge>> = {
            let mut c = BasicCartridge::with_program(0x8000, &[0x58, 0xEA, 0xEA, 0xEA, 0xEA]);
            c.patch_prg(0xFFFE, 0x00);
            c.patch_prg(0xFFFF, 0xA0);
            c.patch_prg(0xA000, 0x40); // RTI
            Rc::new(RefCell::new(c))
        };
        let mut nes = Nes::new(cartridge);

        nes.pull_irq();
        nes.step_instruction(); // CLI
        nes.step_instruction(); // IRQ entry
        assert_eq!(nes.cpu.program_counter, 0xA000);
        assert!(nes.cpu.status.interrupt);

        nes.step_instruction(); // RTI restores I = 0
        nes.step_instruction(); // line still held: straight back in
        assert_eq!(nes.cpu.program_counter, 0xA000);

        nes.reset_irq();
        nes.step_instruction(); // RTI
        nes.step_instruction(); // NOP runs undisturbed
        assert_ne!(nes.cpu.program_counter, 0xA000, "line released, no re-entry");
    }

    #[test]
    fn step_frame_runs_one_full_frame() {
        let mut nes = nes_with_program(0x8000, &[0x4C, 0x00, 0x80]);
        assert!(nes.step_frame());
        assert_eq!(nes.cpu.bus.ppu.frame(), 1);

        // 341 * 262 dots at three per CPU cycle, give or take the final
        // instruction overshoot.
        let per_frame: u64 = 341 * 262 / 3;
        assert!(nes.cpu.cycle >= per_frame && nes.cpu.cycle < per_frame + 16);
    }

    #[test]
    fn stop_is_sampled_between_instructions() {
        let mut nes = nes_with_program(0x8000, &[0x4C, 0x00, 0x80]);
        nes.stop();
        assert!(!nes.step_frame());
        assert!(nes.step_frame(), "stop request is one-shot");
    }

    #[test]
    fn jam_opcode_halts_and_is_observable() {
        let mut nes = nes_with_program(0x8000, &[0x02]);
        nes.step_instruction();
        assert_eq!(nes.cpu.executor_status, ExecutorStatus::Jammed);
        assert!(!nes.step_frame());
        assert_eq!(nes.step_instruction(), 0);
    }

    #[test]
    fn controller_round_trip_through_the_bus() {
        let mut nes = nes_with_program(0x8000, &[0x4C, 0x00, 0x80]);
        nes.set_button(0, Button::B, true);
        nes.set_button(0, Button::Start, true);

        nes.cpu.bus.write(0x4016, 1);
        nes.cpu.bus.write(0x4016, 0);
        let bits: Vec<u8> = (0..8).map(|_| nes.cpu.bus.read(0x4016)).collect();
        assert_eq!(bits, vec![0, 1, 0, 1, 0, 0, 0, 0]);
    }

    #[test]
    fn ppudata_round_trip_through_cpu_space() {
        let mut nes = nes_with_program(0x8000, &[0x4C, 0x00, 0x80]);
        nes.cpu.bus.write(0x2006, 0x23);
        nes.cpu.bus.write(0x2006, 0x45);
        nes.cpu.bus.write(0x2007, 0x77);
        assert_eq!(nes.cpu.bus.ppu.vram_address(), 0x2346);

        nes.cpu.bus.write(0x2006, 0x23);
        nes.cpu.bus.write(0x2006, 0x45);
        let _ = nes.cpu.bus.read(0x2007); // buffered
        assert_eq!(nes.cpu.bus.read(0x2007), 0x77);
    }

    #[test]
    fn unofficial_lax_loads_both_registers() {
        let mut nes = nes_with_program(0x8000, &[0xA7, 0x10]);
        nes.cpu.bus.write(0x0010, 0x5A);
        assert_eq!(nes.step_instruction(), 3);
        assert_eq!(nes.cpu.accumulator, 0x5A);
        assert_eq!(nes.cpu.x_index, 0x5A);
    }

    #[test]
    fn unofficial_dcp_decrements_then_compares() {
        let mut nes = nes_with_program(0x8000, &[0xC7, 0x10]);
        nes.cpu.bus.write(0x0010, 0x41);
        nes.cpu.accumulator = 0x40;
        assert_eq!(nes.step_instruction(), 5);
        assert_eq!(nes.cpu.bus.read(0x0010), 0x40);
        assert!(nes.cpu.status.zero, "A == M after decrement");
        assert!(nes.cpu.status.carry);
    }

    #[test]
    fn unofficial_slo_shifts_and_ors() {
        let mut nes = nes_with_program(0x8000, &[0x07, 0x10]);
        nes.cpu.bus.write(0x0010, 0b1100_0001);
        nes.cpu.accumulator = 0x01;
        assert_eq!(nes.step_instruction(), 5);
        assert_eq!(nes.cpu.bus.read(0x0010), 0b1000_0010);
        assert_eq!(nes.cpu.accumulator, 0b1000_0011);
        assert!(nes.cpu.status.carry);
    }

    #[test]
    fn brk_pushes_the_break_flag_and_vectors_through_fffe() {
        let cartridge: Rc<RefCell<dyn Cartridge>> = {
            let mut c = BasicCartridge::with_program(0x8000, &[0x00, 0xFF]);
            c.patch_prg(0xFFFE, 0x00);
            c.patch_prg(0xFFFF, 0xB0);
            Rc::new(RefCell::new(c))
        };
        let mut nes = Nes::new(cartridge);

        assert_eq!(nes.step_instruction(), 7);
        assert_eq!(nes.cpu.program_counter, 0xB000);
        assert!(nes.cpu.status.interrupt);

        // Pushed return address is BRK+2, pushed status has bits 4 and 5 set.
        let status = nes.cpu.bus.read(0x0100 + nes.cpu.stack_pointer as u16 + 1);
        assert_eq!(status & 0x30, 0x30);
        let low = nes.cpu.bus.read(0x0100 + nes.cpu.stack_pointer as u16 + 2) as u16;
        let high = nes.cpu.bus.read(0x0100 + nes.cpu.stack_pointer as u16 + 3) as u16;
        assert_eq!((high << 8) | low, 0x8002);
    }
}
