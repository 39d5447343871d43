use rand::Rng;

use crate::cpu::ExecError;
use crate::registers::RegIdx;

pub mod encoding;
pub mod opcode;

pub use opcode::Opcode;

/// A decoded instruction. Register operands are validated at decode time,
/// so execution never indexes the register file out of range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instr {
    /// Load an immediate into a register.
    Ldi { dst: RegIdx, imm: u8 },
    /// Record a register's value on the output stream.
    Prn { src: RegIdx },
    Add { dst: RegIdx, src: RegIdx },
    Mul { dst: RegIdx, src: RegIdx },
    And { dst: RegIdx, src: RegIdx },
    Or { dst: RegIdx, src: RegIdx },
    Xor { dst: RegIdx, src: RegIdx },
    /// Single encoded operand; the ALU's second input is the byte that
    /// follows it in memory. See `Cpu::step`.
    Not { dst: RegIdx },
    /// Compare two registers and set the condition flag.
    Cmp { lhs: RegIdx, rhs: RegIdx },
    Push { src: RegIdx },
    Pop { dst: RegIdx },
    /// Push the return address and jump to the address held in `target`.
    Call { target: RegIdx },
    Ret,
    Jmp { target: RegIdx },
    Jeq { target: RegIdx },
    Jne { target: RegIdx },
    Hlt,
}

impl Instr {
    /// Decodes an opcode and its two speculatively fetched operand bytes.
    /// Operand bytes beyond the instruction's operand count are ignored.
    pub fn decode(opcode: Opcode, a: u8, b: u8) -> Result<Self, ExecError> {
        let reg = |byte: u8| RegIdx::try_from(byte).map_err(|()| ExecError::InvalidRegister(byte));

        Ok(match opcode {
            Opcode::Ldi => Instr::Ldi { dst: reg(a)?, imm: b },
            Opcode::Prn => Instr::Prn { src: reg(a)? },
            Opcode::Add => Instr::Add { dst: reg(a)?, src: reg(b)? },
            Opcode::Mul => Instr::Mul { dst: reg(a)?, src: reg(b)? },
            Opcode::And => Instr::And { dst: reg(a)?, src: reg(b)? },
            Opcode::Or => Instr::Or { dst: reg(a)?, src: reg(b)? },
            Opcode::Xor => Instr::Xor { dst: reg(a)?, src: reg(b)? },
            Opcode::Not => Instr::Not { dst: reg(a)? },
            Opcode::Cmp => Instr::Cmp { lhs: reg(a)?, rhs: reg(b)? },
            Opcode::Push => Instr::Push { src: reg(a)? },
            Opcode::Pop => Instr::Pop { dst: reg(a)? },
            Opcode::Call => Instr::Call { target: reg(a)? },
            Opcode::Ret => Instr::Ret,
            Opcode::Jmp => Instr::Jmp { target: reg(a)? },
            Opcode::Jeq => Instr::Jeq { target: reg(a)? },
            Opcode::Jne => Instr::Jne { target: reg(a)? },
            Opcode::Hlt => Instr::Hlt,
        })
    }

    pub fn opcode(&self) -> Opcode {
        use Instr::*;
        match self {
            Ldi { .. } => Opcode::Ldi,
            Prn { .. } => Opcode::Prn,
            Add { .. } => Opcode::Add,
            Mul { .. } => Opcode::Mul,
            And { .. } => Opcode::And,
            Or { .. } => Opcode::Or,
            Xor { .. } => Opcode::Xor,
            Not { .. } => Opcode::Not,
            Cmp { .. } => Opcode::Cmp,
            Push { .. } => Opcode::Push,
            Pop { .. } => Opcode::Pop,
            Call { .. } => Opcode::Call,
            Ret => Opcode::Ret,
            Jmp { .. } => Opcode::Jmp,
            Jeq { .. } => Opcode::Jeq,
            Jne { .. } => Opcode::Jne,
            Hlt => Opcode::Hlt,
        }
    }

    /// Serializes the instruction: the opcode byte followed by its encoded
    /// operands.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![self.opcode() as u8];
        match *self {
            Instr::Ldi { dst, imm } => {
                bytes.push(dst.as_u8());
                bytes.push(imm);
            },
            Instr::Add { dst, src }
            | Instr::Mul { dst, src }
            | Instr::And { dst, src }
            | Instr::Or { dst, src }
            | Instr::Xor { dst, src } => {
                bytes.push(dst.as_u8());
                bytes.push(src.as_u8());
            },
            Instr::Cmp { lhs, rhs } => {
                bytes.push(lhs.as_u8());
                bytes.push(rhs.as_u8());
            },
            Instr::Prn { src } | Instr::Push { src } => bytes.push(src.as_u8()),
            Instr::Pop { dst } | Instr::Not { dst } => bytes.push(dst.as_u8()),
            Instr::Call { target }
            | Instr::Jmp { target }
            | Instr::Jeq { target }
            | Instr::Jne { target } => bytes.push(target.as_u8()),
            Instr::Ret | Instr::Hlt => {},
        }
        bytes
    }

    /// Returns a random, valid instruction. Useful for testing.
    pub fn rand(mut rng: impl Rng) -> Self {
        let opcode = Opcode::ALL[rng.gen_range(0..Opcode::ALL.len())];
        match opcode {
            Opcode::Ldi => Instr::Ldi {
                dst: RegIdx::rand(&mut rng),
                imm: rng.gen(),
            },
            Opcode::Prn => Instr::Prn {
                src: RegIdx::rand(&mut rng),
            },
            Opcode::Add => Instr::Add {
                dst: RegIdx::rand(&mut rng),
                src: RegIdx::rand(&mut rng),
            },
            Opcode::Mul => Instr::Mul {
                dst: RegIdx::rand(&mut rng),
                src: RegIdx::rand(&mut rng),
            },
            Opcode::And => Instr::And {
                dst: RegIdx::rand(&mut rng),
                src: RegIdx::rand(&mut rng),
            },
            Opcode::Or => Instr::Or {
                dst: RegIdx::rand(&mut rng),
                src: RegIdx::rand(&mut rng),
            },
            Opcode::Xor => Instr::Xor {
                dst: RegIdx::rand(&mut rng),
                src: RegIdx::rand(&mut rng),
            },
            Opcode::Not => Instr::Not {
                dst: RegIdx::rand(&mut rng),
            },
            Opcode::Cmp => Instr::Cmp {
                lhs: RegIdx::rand(&mut rng),
                rhs: RegIdx::rand(&mut rng),
            },
            Opcode::Push => Instr::Push {
                src: RegIdx::rand(&mut rng),
            },
            Opcode::Pop => Instr::Pop {
                dst: RegIdx::rand(&mut rng),
            },
            Opcode::Call => Instr::Call {
                target: RegIdx::rand(&mut rng),
            },
            Opcode::Ret => Instr::Ret,
            Opcode::Jmp => Instr::Jmp {
                target: RegIdx::rand(&mut rng),
            },
            Opcode::Jeq => Instr::Jeq {
                target: RegIdx::rand(&mut rng),
            },
            Opcode::Jne => Instr::Jne {
                target: RegIdx::rand(&mut rng),
            },
            Opcode::Hlt => Instr::Hlt,
        }
    }
}
