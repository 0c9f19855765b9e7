use crate::cpu::address_mode::AddressMode;
use crate::cpu::instruction::Instruction;

/// Base cycle chart for all 256 opcodes. The entries with cost 0 are the
/// twelve JAM encodings; everything else, official or not, has its documented
/// cost here and takes page-cross or branch penalties on top.
#[rustfmt::skip]
pub const CYCLES: [u8; 256] = [
    //       0 1 2 3 4 5 6 7 8 9 A B C D E F
    /*0x00*/ 7,6,0,8,3,3,5,5,3,2,2,2,4,4,6,6,
    /*0x10*/ 2,5,0,8,4,4,6,6,2,4,2,7,4,4,7,7,
    /*0x20*/ 6,6,0,8,3,3,5,5,4,2,2,2,4,4,6,6,
    /*0x30*/ 2,5,0,8,4,4,6,6,2,4,2,7,4,4,7,7,
    /*0x40*/ 6,6,0,8,3,3,5,5,3,2,2,2,3,4,6,6,
    /*0x50*/ 2,5,0,8,4,4,6,6,2,4,2,7,4,4,7,7,
    /*0x60*/ 6,6,0,8,3,3,5,5,4,2,2,2,5,4,6,6,
    /*0x70*/ 2,5,0,8,4,4,6,6,2,4,2,7,4,4,7,7,
    /*0x80*/ 2,6,2,6,3,3,3,3,2,2,2,2,4,4,4,4,
    /*0x90*/ 2,6,0,6,4,4,4,4,2,5,2,5,5,5,5,5,
    /*0xA0*/ 2,6,2,6,3,3,3,3,2,2,2,2,4,4,4,4,
    /*0xB0*/ 2,5,0,5,4,4,4,4,2,4,2,4,4,4,4,4,
    /*0xC0*/ 2,6,2,8,3,3,5,5,2,2,2,2,4,4,6,6,
    /*0xD0*/ 2,5,0,8,4,4,6,6,2,4,2,7,4,4,7,7,
    /*0xE0*/ 2,6,2,8,3,3,5,5,2,2,2,2,4,4,6,6,
    /*0xF0*/ 2,5,0,8,4,4,6,6,2,4,2,7,4,4,7,7,
];

pub struct Opcode {
    pub instruction: Instruction,
    pub address_mode: AddressMode,
    pub cycles: u8,
}

/// Decodes an opcode byte into operation, addressing mode and base cost.
/// Every byte decodes to something: the leftover unstable encodings (ANC,
/// ALR, ARR, XAA, AHX, TAS, SHX, SHY, LAS, AXS) are treated as NOPs of the
/// matching width, and the JAM slots halt the interpreter.
pub fn opcode_mapper(opcode: u8) -> Opcode {
    use AddressMode::*;
    use Instruction::*;

    let (instruction, address_mode) = match opcode {
        0x00 => (BRK, Imp),
        0x01 => (ORA, IndX),
        0x03 => (SLO, IndX),
        0x04 | 0x44 | 0x64 => (NOP, Zpg),
        0x05 => (ORA, Zpg),
        0x06 => (ASL, Zpg),
        0x07 => (SLO, Zpg),
        0x08 => (PHP, Imp),
        0x09 => (ORA, Imm),
        0x0A => (ASL, Acc),
        0x0C => (NOP, Abs),
        0x0D => (ORA, Abs),
        0x0E => (ASL, Abs),
        0x0F => (SLO, Abs),

        0x10 => (BPL, Rel),
        0x11 => (ORA, IndY),
        0x13 => (SLO, IndY),
        0x14 | 0x34 | 0x54 | 0x74 | 0xD4 | 0xF4 => (NOP, ZpgX),
        0x15 => (ORA, ZpgX),
        0x16 => (ASL, ZpgX),
        0x17 => (SLO, ZpgX),
        0x18 => (CLC, Imp),
        0x19 => (ORA, AbsY),
        0x1A | 0x3A | 0x5A | 0x7A | 0xDA | 0xFA | 0xEA => (NOP, Imp),
        0x1B => (SLO, AbsY),
        0x1C | 0x3C | 0x5C | 0x7C | 0xDC | 0xFC => (NOP, AbsX),
        0x1D => (ORA, AbsX),
        0x1E => (ASL, AbsX),
        0x1F => (SLO, AbsX),

        0x20 => (JSR, Abs),
        0x21 => (AND, IndX),
        0x23 => (RLA, IndX),
        0x24 => (BIT, Zpg),
        0x25 => (AND, Zpg),
        0x26 => (ROL, Zpg),
        0x27 => (RLA, Zpg),
        0x28 => (PLP, Imp),
        0x29 => (AND, Imm),
        0x2A => (ROL, Acc),
        0x2C => (BIT, Abs),
        0x2D => (AND, Abs),
        0x2E => (ROL, Abs),
        0x2F => (RLA, Abs),

        0x30 => (BMI, Rel),
        0x31 => (AND, IndY),
        0x33 => (RLA, IndY),
        0x35 => (AND, ZpgX),
        0x36 => (ROL, ZpgX),
        0x37 => (RLA, ZpgX),
        0x38 => (SEC, Imp),
        0x39 => (AND, AbsY),
        0x3B => (RLA, AbsY),
        0x3D => (AND, AbsX),
        0x3E => (ROL, AbsX),
        0x3F => (RLA, AbsX),

        0x40 => (RTI, Imp),
        0x41 => (EOR, IndX),
        0x43 => (SRE, IndX),
        0x45 => (EOR, Zpg),
        0x46 => (LSR, Zpg),
        0x47 => (SRE, Zpg),
        0x48 => (PHA, Imp),
        0x49 => (EOR, Imm),
        0x4A => (LSR, Acc),
        0x4C => (JMP, Abs),
        0x4D => (EOR, Abs),
        0x4E => (LSR, Abs),
        0x4F => (SRE, Abs),

        0x50 => (BVC, Rel),
        0x51 => (EOR, IndY),
        0x53 => (SRE, IndY),
        0x55 => (EOR, ZpgX),
        0x56 => (LSR, ZpgX),
        0x57 => (SRE, ZpgX),
        0x58 => (CLI, Imp),
        0x59 => (EOR, AbsY),
        0x5B => (SRE, AbsY),
        0x5D => (EOR, AbsX),
        0x5E => (LSR, AbsX),
        0x5F => (SRE, AbsX),

        0x60 => (RTS, Imp),
        0x61 => (ADC, IndX),
        0x63 => (RRA, IndX),
        0x65 => (ADC, Zpg),
        0x66 => (ROR, Zpg),
        0x67 => (RRA, Zpg),
        0x68 => (PLA, Imp),
        0x69 => (ADC, Imm),
        0x6A => (ROR, Acc),
        0x6C => (JMP, Ind),
        0x6D => (ADC, Abs),
        0x6E => (ROR, Abs),
        0x6F => (RRA, Abs),

        0x70 => (BVS, Rel),
        0x71 => (ADC, IndY),
        0x73 => (RRA, IndY),
        0x75 => (ADC, ZpgX),
        0x76 => (ROR, ZpgX),
        0x77 => (RRA, ZpgX),
        0x78 => (SEI, Imp),
        0x79 => (ADC, AbsY),
        0x7B => (RRA, AbsY),
        0x7D => (ADC, AbsX),
        0x7E => (ROR, AbsX),
        0x7F => (RRA, AbsX),

        0x80 | 0x82 | 0x89 | 0xC2 | 0xE2 | 0x0B | 0x2B | 0x4B | 0x6B | 0x8B | 0xCB => (NOP, Imm),
        0x81 => (STA, IndX),
        0x83 => (SAX, IndX),
        0x84 => (STY, Zpg),
        0x85 => (STA, Zpg),
        0x86 => (STX, Zpg),
        0x87 => (SAX, Zpg),
        0x88 => (DEY, Imp),
        0x8A => (TXA, Imp),
        0x8C => (STY, Abs),
        0x8D => (STA, Abs),
        0x8E => (STX, Abs),
        0x8F => (SAX, Abs),

        0x90 => (BCC, Rel),
        0x91 => (STA, IndY),
        0x93 => (NOP, IndY),
        0x94 => (STY, ZpgX),
        0x95 => (STA, ZpgX),
        0x96 => (STX, ZpgY),
        0x97 => (SAX, ZpgY),
        0x98 => (TYA, Imp),
        0x99 => (STA, AbsY),
        0x9A => (TXS, Imp),
        0x9B | 0x9E | 0x9F | 0xBB => (NOP, AbsY),
        0x9C => (NOP, AbsX),
        0x9D => (STA, AbsX),

        0xA0 => (LDY, Imm),
        0xA1 => (LDA, IndX),
        0xA2 => (LDX, Imm),
        0xA3 => (LAX, IndX),
        0xA4 => (LDY, Zpg),
        0xA5 => (LDA, Zpg),
        0xA6 => (LDX, Zpg),
        0xA7 => (LAX, Zpg),
        0xA8 => (TAY, Imp),
        0xA9 => (LDA, Imm),
        0xAA => (TAX, Imp),
        0xAB => (LAX, Imm),
        0xAC => (LDY, Abs),
        0xAD => (LDA, Abs),
        0xAE => (LDX, Abs),
        0xAF => (LAX, Abs),

        0xB0 => (BCS, Rel),
        0xB1 => (LDA, IndY),
        0xB3 => (LAX, IndY),
        0xB4 => (LDY, ZpgX),
        0xB5 => (LDA, ZpgX),
        0xB6 => (LDX, ZpgY),
        0xB7 => (LAX, ZpgY),
        0xB8 => (CLV, Imp),
        0xB9 => (LDA, AbsY),
        0xBA => (TSX, Imp),
        0xBC => (LDY, AbsX),
        0xBD => (LDA, AbsX),
        0xBE => (LDX, AbsY),
        0xBF => (LAX, AbsY),

        0xC0 => (CPY, Imm),
        0xC1 => (CMP, IndX),
        0xC3 => (DCP, IndX),
        0xC4 => (CPY, Zpg),
        0xC5 => (CMP, Zpg),
        0xC6 => (DEC, Zpg),
        0xC7 => (DCP, Zpg),
        0xC8 => (INY, Imp),
        0xC9 => (CMP, Imm),
        0xCA => (DEX, Imp),
        0xCC => (CPY, Abs),
        0xCD => (CMP, Abs),
        0xCE => (DEC, Abs),
        0xCF => (DCP, Abs),

        0xD0 => (BNE, Rel),
        0xD1 => (CMP, IndY),
        0xD3 => (DCP, IndY),
        0xD5 => (CMP, ZpgX),
        0xD6 => (DEC, ZpgX),
        0xD7 => (DCP, ZpgX),
        0xD8 => (CLD, Imp),
        0xD9 => (CMP, AbsY),
        0xDB => (DCP, AbsY),
        0xDD => (CMP, AbsX),
        0xDE => (DEC, AbsX),
        0xDF => (DCP, AbsX),

        0xE0 => (CPX, Imm),
        0xE1 => (SBC, IndX),
        0xE3 => (ISC, IndX),
        0xE4 => (CPX, Zpg),
        0xE5 => (SBC, Zpg),
        0xE6 => (INC, Zpg),
        0xE7 => (ISC, Zpg),
        0xE8 => (INX, Imp),
        0xE9 | 0xEB => (SBC, Imm),
        0xEC => (CPX, Abs),
        0xED => (SBC, Abs),
        0xEE => (INC, Abs),
        0xEF => (ISC, Abs),

        0xF0 => (BEQ, Rel),
        0xF1 => (SBC, IndY),
        0xF3 => (ISC, IndY),
        0xF5 => (SBC, ZpgX),
        0xF6 => (INC, ZpgX),
        0xF7 => (ISC, ZpgX),
        0xF8 => (SED, Imp),
        0xF9 => (SBC, AbsY),
        0xFB => (ISC, AbsY),
        0xFD => (SBC, AbsX),
        0xFE => (INC, AbsX),
        0xFF => (ISC, AbsX),

        0x02 | 0x12 | 0x22 | 0x32 | 0x42 | 0x52 | 0x62 | 0x72 | 0x92 | 0xB2 | 0xD2 | 0xF2 => {
            (KIL, Imp)
        }
    };

    Opcode {
        instruction,
        address_mode,
        cycles: CYCLES[opcode as usize],
    }
}
