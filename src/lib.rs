//! Quill JIT backend front end
//!
//! Translates interpreter bytecode into the backend's linear IR and drives
//! the per-function compile pipeline. This crate covers the stages up to
//! and including IR construction; the optimizing phases behind the
//! [`func::Phase`] trait (global opt, lowering, register allocation) are
//! separate collaborators.
//!
//! # Architecture
//!
//! The pipeline for one unit of work:
//!
//! 1. **Bytecode model** ([`bytecode`]) - the immutable
//!    [`FunctionBody`](bytecode::FunctionBody): encoded instruction stream,
//!    constant pool, register file layout, loop headers, statement map.
//! 2. **Translation** ([`builder`]) - a single forward pass producing the
//!    arena-backed IR list: temp-register reuse, two-pass branch
//!    resolution, loop-body isolation, call-chain linking and bailout
//!    placement.
//! 3. **Compile context** ([`func`]) - the per-attempt
//!    [`FuncRecord`](func::FuncRecord) and the
//!    [`RejitController`](func::RejitController), which retries the whole
//!    pipeline with an optimization disabled whenever a later phase proves
//!    an optimistic assumption unsound. Retries are bounded by the fixed
//!    [`RejitReason`](profile::RejitReason) set.
//!
//! Work comes in three shapes ([`func::WorkItem`]): whole functions,
//! extracted loop bodies running against the live interpreter frame, and
//! inlined call fragments nested in a parent record.
//!
//! # Example
//!
//! ```rust
//! use quill_jit::bytecode::{FunctionBodyBuilder, Opcode};
//! use quill_jit::func::{CompileConfig, RejitController, WorkItem};
//! use quill_jit::profile::ProfileSnapshot;
//!
//! let mut b = FunctionBodyBuilder::new("add").params(2).temps(1);
//! let x = b.param_reg(0);
//! let y = b.param_reg(1);
//! let t = b.temp_reg(0);
//! b.emit_bin(Opcode::Add, t, x, y);
//! b.emit_ret(t);
//! let body = b.build();
//!
//! let profile = ProfileSnapshot::warm(0, 0);
//! let unit = RejitController::new(
//!     &body,
//!     &profile,
//!     WorkItem::Function,
//!     CompileConfig::default(),
//! )
//! .compile()
//! .unwrap();
//! assert!(unit.summary.is_leaf);
//! ```

pub mod builder;
pub mod bytecode;
pub mod func;
pub mod ir;
pub mod profile;
pub mod sym;

pub use builder::IrBuilder;
pub use func::{
    CancelToken, CompileConfig, CompileError, CompileResult, CompiledUnit, FuncRecord,
    RejitController, WorkItem,
};
pub use profile::{ProfileSnapshot, RejitReason};
