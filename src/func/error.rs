//! Failure taxonomy for a compile attempt
//!
//! Three surfaces, kept strictly apart:
//!
//! - [`PhaseExit`] — internal non-local exit from one phase: a rejit demand
//!   or an abandonment. Unwinds exactly one attempt and is caught at the
//!   controller boundary; rejit never escapes it.
//! - [`FatalError`] — violated internal invariants (producer or translator
//!   bugs). Never recovered from; continuing would silently miscompile.
//! - [`CompileError`] — the public failure surface of a whole compile:
//!   aborted (teardown race, silently discarded by callers) or fatal.
//!
//! Nothing here is ever observable by the language being executed.

use crate::bytecode::{DecodeError, RegSlot};
use crate::profile::RejitReason;

/// Internal-consistency violation; terminates the compile unconditionally
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FatalError {
    /// The bytecode stream could not be decoded
    MalformedBytecode(DecodeError),
    /// A call's linked argument chain disagrees with its marker's declared
    /// count
    ArgCountMismatch {
        declared: u16,
        linked: u16,
        offset: u32,
    },
    /// Call or construct opcode with no open argument chain
    CallWithoutStartCall { offset: u32 },
    /// An argument chain was opened but never consumed by a call
    UnterminatedArgChain { offset: u32 },
    /// TryEnd with no open exception region
    UnmatchedTryEnd { offset: u32 },
    /// One or more exception regions left open at the unit's end
    UnclosedTryRegion { open: u32 },
    /// Scope-slot index past the allocated storage
    ScopeSlotOutOfRange { slot: u16, count: u16, offset: u32 },
    /// A temp register was read before any definition outside a loop body
    UseBeforeDef { reg: RegSlot, offset: u32 },
    /// A branch targets an offset with no instruction at or after it
    BranchTargetOutOfRange { target: u32 },
    /// Scope-slot access in a function with no closure storage register
    NoClosureStorage { offset: u32 },
    /// Branch or loop metadata references a loop number not in the header
    /// table
    UnknownLoop { loop_num: u16 },
    /// A rejit reason fired again after its optimization was already
    /// disabled
    RejitReasonRepeated(RejitReason),
}

impl std::fmt::Display for FatalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MalformedBytecode(err) => write!(f, "malformed bytecode: {}", err),
            Self::ArgCountMismatch {
                declared,
                linked,
                offset,
            } => write!(
                f,
                "call at offset {} linked {} args but its marker declared {}",
                offset, linked, declared
            ),
            Self::CallWithoutStartCall { offset } => {
                write!(f, "call at offset {} with no open argument chain", offset)
            }
            Self::UnterminatedArgChain { offset } => write!(
                f,
                "argument chain opened at offset {} never reached a call",
                offset
            ),
            Self::UnmatchedTryEnd { offset } => {
                write!(f, "tryend at offset {} with no open exception region", offset)
            }
            Self::UnclosedTryRegion { open } => {
                write!(f, "{} exception regions left open at the unit's end", open)
            }
            Self::ScopeSlotOutOfRange {
                slot,
                count,
                offset,
            } => write!(
                f,
                "scope slot {} out of range (allocated {}) at offset {}",
                slot, count, offset
            ),
            Self::UseBeforeDef { reg, offset } => {
                write!(f, "temp register r{} used before def at offset {}", reg, offset)
            }
            Self::BranchTargetOutOfRange { target } => {
                write!(f, "branch target offset {} is past the unit's end", target)
            }
            Self::NoClosureStorage { offset } => {
                write!(f, "scope-slot access at offset {} without closure storage", offset)
            }
            Self::UnknownLoop { loop_num } => write!(f, "unknown loop number {}", loop_num),
            Self::RejitReasonRepeated(reason) => {
                write!(f, "rejit reason fired twice: {}", reason)
            }
        }
    }
}

impl std::error::Error for FatalError {}

impl From<DecodeError> for FatalError {
    fn from(err: DecodeError) -> Self {
        FatalError::MalformedBytecode(err)
    }
}

/// Non-local exit of one phase within one attempt
///
/// Modeled as a tagged result rather than unwinding, so the controller's
/// bounded-retry behavior is directly unit-testable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseExit {
    /// Restart compilation with this reason's optimization disabled
    Rejit(RejitReason),
    /// The owning execution context is being torn down; discard everything
    Aborted,
    /// Invariant violation; propagates out unconditionally
    Fatal(FatalError),
}

impl From<FatalError> for PhaseExit {
    fn from(err: FatalError) -> Self {
        PhaseExit::Fatal(err)
    }
}

impl From<DecodeError> for PhaseExit {
    fn from(err: DecodeError) -> Self {
        PhaseExit::Fatal(FatalError::MalformedBytecode(err))
    }
}

/// Public failure surface of a whole compile
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// The attempt was abandoned mid-compile; no output was installed.
    /// Not an error condition for callers: discard and move on.
    Aborted,
    /// Producer or translator bug; must never occur for well-formed input
    Fatal(FatalError),
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Aborted => write!(f, "compile attempt aborted"),
            Self::Fatal(err) => write!(f, "fatal compile error: {}", err),
        }
    }
}

impl std::error::Error for CompileError {}

/// Result of a whole compile
pub type CompileResult<T> = Result<T, CompileError>;
