//! Emulator for the LS-8, an 8-bit von-Neumann teaching CPU: 256 bytes of
//! flat memory, eight general-purpose registers, a downward-growing stack,
//! and a 17-instruction ISA loaded from a binary-text program source.

pub mod cpu;
pub mod instructions;
pub mod loader;
pub mod memory;
pub mod registers;

pub use cpu::{Cpu, CpuState, ExecError, Flag, Status};
pub use instructions::{Instr, Opcode};
pub use loader::LoadError;
