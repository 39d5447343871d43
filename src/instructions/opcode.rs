use strum::Display;

use super::encoding;

/// The LS-8 opcode set.
///
/// Byte layout is `AABCDDDD`: `AA` is the operand count, `B` marks ALU
/// instructions, `C` marks instructions that assign the program counter
/// themselves, and `DDDD` identifies the instruction within its class.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Display)]
#[strum(serialize_all = "UPPERCASE")]
#[rustfmt::skip]
#[repr(u8)]
pub enum Opcode {
    Hlt  = 0b0000_0001,
    Ret  = 0b0001_0001,
    Push = 0b0100_0101,
    Pop  = 0b0100_0110,
    Prn  = 0b0100_0111,
    Call = 0b0101_0000,
    Jmp  = 0b0101_0100,
    Jeq  = 0b0101_0101,
    Jne  = 0b0101_0110,
    Not  = 0b0110_1001,
    Ldi  = 0b1000_0010,
    Add  = 0b1010_0000,
    Mul  = 0b1010_0010,
    Cmp  = 0b1010_0111,
    And  = 0b1010_1000,
    Or   = 0b1010_1010,
    Xor  = 0b1010_1011,
}

pub const BYTE_TO_OPCODE: phf::Map<u8, Opcode> = phf::phf_map! {
    0b0000_0001u8 => Opcode::Hlt,
    0b0001_0001u8 => Opcode::Ret,
    0b0100_0101u8 => Opcode::Push,
    0b0100_0110u8 => Opcode::Pop,
    0b0100_0111u8 => Opcode::Prn,
    0b0101_0000u8 => Opcode::Call,
    0b0101_0100u8 => Opcode::Jmp,
    0b0101_0101u8 => Opcode::Jeq,
    0b0101_0110u8 => Opcode::Jne,
    0b0110_1001u8 => Opcode::Not,
    0b1000_0010u8 => Opcode::Ldi,
    0b1010_0000u8 => Opcode::Add,
    0b1010_0010u8 => Opcode::Mul,
    0b1010_0111u8 => Opcode::Cmp,
    0b1010_1000u8 => Opcode::And,
    0b1010_1010u8 => Opcode::Or,
    0b1010_1011u8 => Opcode::Xor,
};

impl Opcode {
    pub const ALL: [Opcode; 17] = [
        Opcode::Hlt,
        Opcode::Ret,
        Opcode::Push,
        Opcode::Pop,
        Opcode::Prn,
        Opcode::Call,
        Opcode::Jmp,
        Opcode::Jeq,
        Opcode::Jne,
        Opcode::Not,
        Opcode::Ldi,
        Opcode::Add,
        Opcode::Mul,
        Opcode::Cmp,
        Opcode::And,
        Opcode::Or,
        Opcode::Xor,
    ];

    /// Number of operand bytes following the opcode byte.
    pub fn operand_count(self) -> u8 {
        encoding::operand_count(self as u8)
    }

    /// Whether this instruction is executed by the ALU.
    pub fn is_alu(self) -> bool {
        encoding::is_alu(self as u8)
    }

    /// Whether this instruction assigns the program counter itself. The
    /// dispatch loop does not auto-advance the PC for these.
    pub fn sets_pc(self) -> bool {
        encoding::sets_pc(self as u8)
    }
}

impl TryFrom<u8> for Opcode {
    type Error = ();

    fn try_from(input: u8) -> Result<Opcode, ()> {
        BYTE_TO_OPCODE.get(&input).ok_or(()).copied()
    }
}
