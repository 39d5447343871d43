use thiserror::Error;
use tracing::trace;

use crate::instructions::{Instr, Opcode};
use crate::loader::LoadError;
use crate::memory::{Memory, MEM_SIZE};
use crate::registers::RegIdx;

pub mod state;

pub use state::{CpuState, Flag, Status};

pub type Result<T> = std::result::Result<T, ExecError>;

/// A fatal execution error. No error is retried; the run either reaches
/// HLT or aborts with one of these.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExecError {
    #[error("illegal instruction 0b{opcode:08b} at address {addr:#04x}")]
    IllegalInstruction { opcode: u8, addr: u8 },
    #[error("operand names register {0}, but the register file has 8")]
    InvalidRegister(u8),
    #[error("stack overflow: cannot push with SP at {sp:#04x}")]
    StackOverflow { sp: u8 },
    #[error("stack underflow: cannot pop with SP at {sp:#04x}")]
    StackUnderflow { sp: u8 },
    #[error("{0} is not an ALU operation")]
    UnsupportedOperation(Opcode),
}

/// The LS-8 virtual machine: the execution state, the memory it owns, and
/// the stream of values produced by PRN.
#[derive(Debug, Clone, Default)]
pub struct Cpu {
    pub state: CpuState,
    pub mem: Memory,
    output: Vec<u8>,
}

impl Cpu {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fills memory with a program image, starting at address 0. The rest
    /// of memory is left as is.
    pub fn load(&mut self, program: &[u8]) -> std::result::Result<(), LoadError> {
        if program.len() > MEM_SIZE {
            return Err(LoadError::TooLong { len: program.len() });
        }
        for (addr, &byte) in program.iter().enumerate() {
            self.mem.write(addr as u8, byte);
        }
        Ok(())
    }

    /// Values recorded by PRN, in execution order.
    pub fn output(&self) -> &[u8] {
        &self.output
    }

    /// Runs the fetch-decode-execute loop until HLT or a fatal error.
    pub fn run(&mut self) -> Result<()> {
        while self.step()? == Status::Running {}
        Ok(())
    }

    /// Executes a single instruction. Embedders wanting a step budget or a
    /// deadline can loop over this instead of calling `run`.
    pub fn step(&mut self) -> Result<Status> {
        let pc = self.state.program_counter;
        let raw = self.mem.read(pc);
        // The two bytes after the opcode are always fetched; instructions
        // with fewer operands simply never look at them.
        let a = self.mem.read(pc.wrapping_add(1));
        let b = self.mem.read(pc.wrapping_add(2));

        let opcode = Opcode::try_from(raw).map_err(|()| ExecError::IllegalInstruction {
            opcode: raw,
            addr: pc,
        })?;
        let instr = Instr::decode(opcode, a, b)?;
        trace!(pc, %opcode, "execute");

        match instr {
            Instr::Ldi { dst, imm } => self.state.registers[dst] = imm,
            Instr::Prn { src } => {
                let value = self.state.registers[src];
                self.output.push(value);
            },
            Instr::Add { dst, src } => self.alu(Opcode::Add, dst, src)?,
            Instr::Mul { dst, src } => self.alu(Opcode::Mul, dst, src)?,
            Instr::And { dst, src } => self.alu(Opcode::And, dst, src)?,
            Instr::Or { dst, src } => self.alu(Opcode::Or, dst, src)?,
            Instr::Xor { dst, src } => self.alu(Opcode::Xor, dst, src)?,
            Instr::Not { dst } => {
                // NOT encodes one operand; its second ALU input is the
                // speculatively fetched byte after it, read as a register
                // index.
                let src = RegIdx::try_from(b).map_err(|()| ExecError::InvalidRegister(b))?;
                self.alu(Opcode::Not, dst, src)?;
            },
            Instr::Cmp { lhs, rhs } => self.alu(Opcode::Cmp, lhs, rhs)?,
            Instr::Push { src } => {
                let value = self.state.registers[src];
                self.push(value)?;
            },
            Instr::Pop { dst } => {
                let value = self.pop()?;
                self.state.registers[dst] = value;
            },
            Instr::Call { target } => {
                // The return address is the instruction after CALL.
                self.push(pc.wrapping_add(2))?;
                self.state.program_counter = self.state.registers[target];
            },
            Instr::Ret => {
                self.state.program_counter = self.pop()?;
            },
            Instr::Jmp { target } => {
                self.state.program_counter = self.state.registers[target];
            },
            Instr::Jeq { target } => {
                if self.state.flag == Some(Flag::Equal) {
                    self.state.program_counter = self.state.registers[target];
                } else {
                    self.state.advance_pc(2);
                }
            },
            Instr::Jne { target } => {
                if self.state.flag != Some(Flag::Equal) {
                    self.state.program_counter = self.state.registers[target];
                } else {
                    self.state.advance_pc(2);
                }
            },
            Instr::Hlt => self.state.status = Status::Halted,
        }

        // Direct-PC instructions have already assigned the PC; everything
        // else moves past the opcode and its operands. A halted CPU keeps
        // its PC on the HLT byte.
        if self.state.status == Status::Running && !opcode.sets_pc() {
            self.state.advance_pc(opcode.operand_count() + 1);
        }

        Ok(self.state.status)
    }

    /// Executes an ALU operation on two registers. Every operation except
    /// CMP writes its result to the first register; CMP writes the
    /// condition flag instead.
    fn alu(&mut self, op: Opcode, a: RegIdx, b: RegIdx) -> Result<()> {
        let va = self.state.registers[a];
        let vb = self.state.registers[b];
        match op {
            Opcode::Add => self.state.registers[a] = va.wrapping_add(vb),
            Opcode::Mul => self.state.registers[a] = va.wrapping_mul(vb),
            Opcode::And => self.state.registers[a] = va & vb,
            Opcode::Or => self.state.registers[a] = va | vb,
            Opcode::Xor => self.state.registers[a] = va ^ vb,
            // NOT is a two-input comparison, not a one's-complement: the
            // result is 1 when the inputs differ and 0 when they match.
            Opcode::Not => self.state.registers[a] = u8::from(va != vb),
            Opcode::Cmp => self.state.flag = Some(Flag::from(va.cmp(&vb))),
            op => return Err(ExecError::UnsupportedOperation(op)),
        }
        Ok(())
    }

    /// Decrements SP, then writes `value` at the new stack top.
    fn push(&mut self, value: u8) -> Result<()> {
        let sp = self.state.registers.sp();
        let new_sp = sp.checked_sub(1).ok_or(ExecError::StackOverflow { sp })?;
        self.state.registers.set_sp(new_sp);
        self.mem.write(new_sp, value);
        Ok(())
    }

    /// Reads the stack top, then increments SP.
    fn pop(&mut self) -> Result<u8> {
        let sp = self.state.registers.sp();
        let value = self.mem.read(sp);
        let new_sp = sp.checked_add(1).ok_or(ExecError::StackUnderflow { sp })?;
        self.state.registers.set_sp(new_sp);
        Ok(value)
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::loader;
    use crate::registers::SP_INIT;

    fn reg(idx: u8) -> RegIdx {
        RegIdx::try_from(idx).unwrap()
    }

    fn assemble(program: &[Instr]) -> Vec<u8> {
        program.iter().flat_map(Instr::to_bytes).collect()
    }

    // Helper for running a program to completion
    fn run(program: &[Instr]) -> Cpu {
        let mut cpu = Cpu::new();
        cpu.load(&assemble(program)).unwrap();
        cpu.run().unwrap();
        cpu
    }

    #[test]
    fn ldi_then_prn_reproduces_the_immediate() {
        let cpu = run(&[
            Instr::Ldi { dst: reg(0), imm: 8 },
            Instr::Prn { src: reg(0) },
            Instr::Hlt,
        ]);
        assert_eq!(cpu.output(), &[8]);
        assert_eq!(cpu.state.register(reg(0)), 8);
        assert_eq!(cpu.state.status(), Status::Halted);
        // The PC rests on the HLT byte.
        assert_eq!(cpu.state.program_counter(), 5);
    }

    // Whole pipeline, from program text to output: multiply 8 by 9 and
    // print the product.
    #[test]
    fn multiply_program_from_source_text() {
        let source = "\
            # mult.ls8: print 8 * 9\n\
            10000010 # LDI r0,8\n\
            00000000\n\
            00001000\n\
            10000010 # LDI r1,9\n\
            00000001\n\
            00001001\n\
            10100010 # MUL r0,r1\n\
            00000000\n\
            00000001\n\
            01000111 # PRN r0\n\
            00000000\n\
            \n\
            00000001 # HLT\n";
        let image = loader::load_str(source).unwrap();

        let mut cpu = Cpu::new();
        cpu.load(&image).unwrap();
        cpu.run().unwrap();

        assert_eq!(cpu.output(), &[72]);
        assert_eq!(cpu.state.register(reg(0)), 72);
        assert_eq!(cpu.state.status(), Status::Halted);
    }

    #[test]
    fn add_and_mul_wrap_to_eight_bits() {
        let cpu = run(&[
            Instr::Ldi {
                dst: reg(0),
                imm: 200,
            },
            Instr::Ldi {
                dst: reg(1),
                imm: 100,
            },
            Instr::Add {
                dst: reg(0),
                src: reg(1),
            },
            Instr::Hlt,
        ]);
        assert_eq!(cpu.state.register(reg(0)), 44);

        let cpu = run(&[
            Instr::Ldi { dst: reg(0), imm: 16 },
            Instr::Ldi { dst: reg(1), imm: 16 },
            Instr::Mul {
                dst: reg(0),
                src: reg(1),
            },
            Instr::Hlt,
        ]);
        assert_eq!(cpu.state.register(reg(0)), 0);
    }

    #[test]
    fn bitwise_ops() {
        let cpu = run(&[
            Instr::Ldi {
                dst: reg(0),
                imm: 0b1100,
            },
            Instr::Ldi {
                dst: reg(1),
                imm: 0b1010,
            },
            Instr::Ldi {
                dst: reg(2),
                imm: 0b1100,
            },
            Instr::Ldi {
                dst: reg(3),
                imm: 0b1100,
            },
            Instr::And {
                dst: reg(0),
                src: reg(1),
            },
            Instr::Or {
                dst: reg(2),
                src: reg(1),
            },
            Instr::Xor {
                dst: reg(3),
                src: reg(1),
            },
            Instr::Hlt,
        ]);
        assert_eq!(cpu.state.register(reg(0)), 0b1000);
        assert_eq!(cpu.state.register(reg(2)), 0b1110);
        assert_eq!(cpu.state.register(reg(3)), 0b0110);
    }

    // NOT reads its second input from the byte after its operand; here that
    // byte is the HLT opcode (0b00000001), which names r1.
    #[test]
    fn not_compares_instead_of_inverting() {
        let cpu = run(&[
            Instr::Ldi { dst: reg(0), imm: 5 },
            Instr::Ldi { dst: reg(1), imm: 5 },
            Instr::Not { dst: reg(0) },
            Instr::Hlt,
        ]);
        assert_eq!(cpu.state.register(reg(0)), 0);

        let cpu = run(&[
            Instr::Ldi { dst: reg(0), imm: 5 },
            Instr::Ldi { dst: reg(1), imm: 9 },
            Instr::Not { dst: reg(0) },
            Instr::Hlt,
        ]);
        assert_eq!(cpu.state.register(reg(0)), 1);
    }

    #[test]
    fn push_then_pop_restores_register_and_sp() {
        let cpu = run(&[
            Instr::Ldi { dst: reg(0), imm: 42 },
            Instr::Push { src: reg(0) },
            Instr::Ldi { dst: reg(0), imm: 0 },
            Instr::Pop { dst: reg(0) },
            Instr::Hlt,
        ]);
        assert_eq!(cpu.state.register(reg(0)), 42);
        assert_eq!(cpu.state.registers().sp(), SP_INIT);
    }

    #[test]
    fn call_and_ret_resume_after_the_call() {
        // 0: LDI r1,6   3: CALL r1   5: HLT   6: LDI r0,99   9: RET
        let cpu = run(&[
            Instr::Ldi { dst: reg(1), imm: 6 },
            Instr::Call { target: reg(1) },
            Instr::Hlt,
            Instr::Ldi { dst: reg(0), imm: 99 },
            Instr::Ret,
        ]);
        assert_eq!(cpu.state.register(reg(0)), 99);
        assert_eq!(cpu.state.registers().sp(), SP_INIT);
        assert_eq!(cpu.state.status(), Status::Halted);
        assert_eq!(cpu.state.program_counter(), 5);
        // The popped return address is still visible below the stack top.
        assert_eq!(cpu.mem.as_slice()[SP_INIT as usize - 1], 5);
    }

    #[test]
    fn cmp_then_jeq_jumps_on_equality() {
        // 0: LDI r0,5   3: LDI r1,5   6: LDI r2,17   9: CMP r0,r1
        // 12: JEQ r2   14: LDI r3,1   17: HLT
        let program = |second: u8| {
            [
                Instr::Ldi { dst: reg(0), imm: 5 },
                Instr::Ldi {
                    dst: reg(1),
                    imm: second,
                },
                Instr::Ldi { dst: reg(2), imm: 17 },
                Instr::Cmp {
                    lhs: reg(0),
                    rhs: reg(1),
                },
                Instr::Jeq { target: reg(2) },
                Instr::Ldi { dst: reg(3), imm: 1 },
                Instr::Hlt,
            ]
        };

        let cpu = run(&program(5));
        assert_eq!(cpu.state.flag(), Some(Flag::Equal));
        assert_eq!(cpu.state.register(reg(3)), 0, "taken jump skips the LDI");

        let cpu = run(&program(6));
        assert_eq!(cpu.state.flag(), Some(Flag::Less));
        assert_eq!(cpu.state.register(reg(3)), 1, "fall-through runs the LDI");
    }

    #[test]
    fn cmp_then_jne_jumps_on_inequality() {
        let program = |second: u8| {
            [
                Instr::Ldi { dst: reg(0), imm: 5 },
                Instr::Ldi {
                    dst: reg(1),
                    imm: second,
                },
                Instr::Ldi { dst: reg(2), imm: 17 },
                Instr::Cmp {
                    lhs: reg(0),
                    rhs: reg(1),
                },
                Instr::Jne { target: reg(2) },
                Instr::Ldi { dst: reg(3), imm: 1 },
                Instr::Hlt,
            ]
        };

        let cpu = run(&program(3));
        assert_eq!(cpu.state.flag(), Some(Flag::Greater));
        assert_eq!(cpu.state.register(reg(3)), 0);

        let cpu = run(&program(5));
        assert_eq!(cpu.state.register(reg(3)), 1);
    }

    // The flag starts unset, which JNE treats as "not equal".
    #[test]
    fn jne_jumps_when_nothing_was_compared() {
        let cpu = run(&[
            Instr::Ldi { dst: reg(0), imm: 8 },
            Instr::Jne { target: reg(0) },
            Instr::Ldi { dst: reg(1), imm: 1 },
            Instr::Hlt,
        ]);
        assert_eq!(cpu.state.flag(), None);
        assert_eq!(cpu.state.register(reg(1)), 0);
    }

    #[test]
    fn jeq_falls_through_when_nothing_was_compared() {
        let cpu = run(&[
            Instr::Ldi { dst: reg(0), imm: 8 },
            Instr::Jeq { target: reg(0) },
            Instr::Ldi { dst: reg(1), imm: 1 },
            Instr::Hlt,
        ]);
        assert_eq!(cpu.state.register(reg(1)), 1);
    }

    #[test]
    fn unrecognized_opcode_is_fatal() {
        let mut cpu = Cpu::new();
        cpu.load(&[0b1111_1111]).unwrap();
        assert_eq!(
            cpu.run(),
            Err(ExecError::IllegalInstruction {
                opcode: 0b1111_1111,
                addr: 0,
            })
        );
    }

    #[test]
    fn operand_naming_a_bad_register_is_fatal() {
        // PRN 9
        let mut cpu = Cpu::new();
        cpu.load(&[Opcode::Prn as u8, 9, Opcode::Hlt as u8]).unwrap();
        assert_eq!(cpu.run(), Err(ExecError::InvalidRegister(9)));
    }

    #[test]
    fn push_below_address_zero_overflows() {
        let mut cpu = Cpu::new();
        cpu.load(&assemble(&[
            Instr::Ldi { dst: reg(7), imm: 0 },
            Instr::Push { src: reg(0) },
        ]))
        .unwrap();
        assert_eq!(cpu.run(), Err(ExecError::StackOverflow { sp: 0 }));
    }

    #[test]
    fn pop_above_top_of_memory_underflows() {
        let mut cpu = Cpu::new();
        cpu.load(&assemble(&[
            Instr::Ldi {
                dst: reg(7),
                imm: 0xFF,
            },
            Instr::Pop { dst: reg(0) },
        ]))
        .unwrap();
        assert_eq!(cpu.run(), Err(ExecError::StackUnderflow { sp: 0xFF }));
    }

    #[test]
    fn alu_rejects_non_alu_opcodes() {
        let mut cpu = Cpu::new();
        assert_eq!(
            cpu.alu(Opcode::Push, reg(0), reg(1)),
            Err(ExecError::UnsupportedOperation(Opcode::Push))
        );
    }

    #[test]
    fn oversized_image_is_rejected() {
        let mut cpu = Cpu::new();
        assert!(matches!(
            cpu.load(&[0; MEM_SIZE + 1]),
            Err(LoadError::TooLong { len }) if len == MEM_SIZE + 1
        ));
    }
}
