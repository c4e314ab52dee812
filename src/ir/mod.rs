//! Target-independent intermediate representation
//!
//! The IR is an abstract instruction graph: no machine opcodes, no physical
//! registers, no frame layout. Instructions live in a per-attempt arena
//! ([`IrBody`]) and reference each other by [`InstrId`]; operands reference
//! symbols by [`SymId`](crate::sym::SymId). Later phases (global opt,
//! lowering, register allocation) consume this form.

pub mod body;
pub mod instr;

pub use body::{InstrId, IrBody};
pub use instr::{BailoutInfo, BailoutKind, Instr, InstrKind, OpCode, Opnd};
