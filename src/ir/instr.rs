//! IR instructions, operands and bailout descriptors

use smallvec::SmallVec;

use crate::bytecode::RegSlot;
use crate::sym::SymId;

use super::body::InstrId;

/// IR opcode enumeration
///
/// Grouped by category. Unlike bytecode opcodes these carry no encoding;
/// they exist only inside the per-attempt arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    // === Sentinels ===
    FunctionEntry,
    FunctionExit,
    Label,

    // === Moves ===
    /// Register move
    Ld,
    /// Load from the constant pool (src1 = pool index)
    LdConst,
    /// Load an immediate integer (resume offsets, loop counters)
    LdImm,
    /// Implicit parameter load (src1 = parameter index)
    ArgIn,
    /// Load the generator's resume index at entry
    LdResumePoint,

    // === Arithmetic and comparison ===
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Neg,
    Not,
    CmpEq,
    CmpLt,
    CmpGt,

    // === Property and element access ===
    LdProp,
    StProp,
    LdElem,
    StElem,

    // === Closure environment ===
    /// Load the enclosing environment
    LdEnv,
    /// Function-expression pseudo-scope
    NewPseudoScope,
    /// Allocate flat scope-slot storage (src1 = slot count)
    NewScopeSlots,
    /// Allocate a scope object (src1 = slot count)
    NewScopeObject,
    /// Build the frame-display chain (src1 = scope, src2 = parent display)
    LdFrameDisplay,
    /// Load a closure scope slot
    LdSlot,
    /// Store a closure scope slot
    StSlot,

    // === Loop-body frame bridging ===
    /// Load a live-in local from the interpreter frame
    LdFrameSlot,
    /// Store a live-out local back to the interpreter frame
    StFrameSlot,

    // === Call protocol ===
    /// Argument-chain marker (src1 = declared count)
    StartCall,
    /// Argument pseudo-instruction
    ArgOut,
    Call,
    NewScObject,
    Ret,

    // === Control flow ===
    Br,
    BrTrue,
    BrFalse,
    /// Branch if src1 == src2 (generator resume dispatch)
    BrEq,
    MultiBr,
    Throw,
    /// Exception-region open; branch-shaped, target = handler label
    TryBegin,
    TryEnd,
    Yield,

    // === Deoptimization ===
    /// Unconditional or guarded bailout to the interpreter
    BailOut,
    /// Guard before the first use of an unprofiled construct
    BailOnNoProfile,

    // === Loop-body instrumentation ===
    InitLoopCounter,
    IncrLoopCounter,
    StLoopCount,

    // === Attribution ===
    /// Statement-boundary pragma for debugger/profiler attribution
    StatementBoundary,
}

impl OpCode {
    /// True for opcodes that invoke user code (calls and constructs)
    pub fn is_call(self) -> bool {
        matches!(self, OpCode::Call | OpCode::NewScObject)
    }

    /// True for opcodes that may run user code indirectly (getters,
    /// setters, valueOf) and therefore need a post-op debugger bailout
    pub fn can_run_user_code(self) -> bool {
        self.is_call()
            || matches!(
                self,
                OpCode::LdProp | OpCode::StProp | OpCode::LdElem | OpCode::StElem
            )
    }
}

/// Instruction operand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opnd {
    /// Symbol reference
    Reg(SymId),
    /// Immediate integer
    Int(i64),
    /// Constant-pool index
    Const(u32),
    /// Field access: base symbol + property id or scope-slot index
    Field { base: SymId, index: u16 },
    /// Computed element access: base symbol + index symbol
    Elem { base: SymId, index: SymId },
    /// Interpreter frame slot: frame pointer symbol + register index
    FrameSlot { base: SymId, slot: RegSlot },
}

/// Reasons a bailout point exists, combinable as flags
///
/// A bailout instruction may serve several policies at once (e.g. a loop
/// back-edge in debug mode is both a breakpoint check and a forced pause
/// point), so kinds form a small flag set rather than an enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BailoutKind(u16);

impl BailoutKind {
    pub const NONE: BailoutKind = BailoutKind(0);
    /// Forced by a debugger flag (pause-all)
    pub const FORCE_BY_FLAG: BailoutKind = BailoutKind(1 << 0);
    /// Breakpoint may exist in this function
    pub const BREAKPOINT: BailoutKind = BailoutKind(1 << 1);
    /// Single-step fidelity
    pub const STEP: BailoutKind = BailoutKind(1 << 2);
    /// Resume after a call/helper that ran user code
    pub const RETURN_FROM_CALL: BailoutKind = BailoutKind(1 << 3);
    /// Insufficient profile data for speculation
    pub const NO_PROFILE: BailoutKind = BailoutKind(1 << 4);
    /// Self-test fault injection
    pub const FAULT_INJECTED: BailoutKind = BailoutKind(1 << 5);

    pub fn contains(self, other: BailoutKind) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for BailoutKind {
    type Output = BailoutKind;
    fn bitor(self, rhs: BailoutKind) -> BailoutKind {
        BailoutKind(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for BailoutKind {
    fn bitor_assign(&mut self, rhs: BailoutKind) {
        self.0 |= rhs.0;
    }
}

/// Bailout descriptor attached to a deoptimization point
///
/// The interpreter resumes at exactly `resume_offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BailoutInfo {
    pub resume_offset: u32,
    pub kind: BailoutKind,
}

/// Structural shape of an instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstrKind {
    /// Plain instruction
    Norm,
    /// Entry sentinel
    Entry,
    /// Exit sentinel
    Exit,
    /// Branch target; `is_loop_top` set during branch resolution
    Label { is_loop_top: bool },
    /// Single-target branch; `None` until resolution
    Branch { target: Option<InstrId> },
    /// Multi-way branch; per-case targets, `None` until resolution
    MultiBranch { targets: SmallVec<[Option<InstrId>; 4]> },
    /// Statement-boundary pragma
    Pragma { statement: u32 },
}

/// One IR instruction: a doubly linked arena node with at most one
/// destination and two source operands
#[derive(Debug, Clone)]
pub struct Instr {
    pub opcode: OpCode,
    pub kind: InstrKind,
    pub dst: Option<Opnd>,
    pub src1: Option<Opnd>,
    pub src2: Option<Opnd>,
    /// Originating bytecode offset, or none for synthesized instructions
    pub offset: Option<u32>,
    /// Deoptimization descriptor, if this is a bailout point
    pub bailout: Option<BailoutInfo>,
    /// Profile site id for profiled operations
    pub site: Option<u16>,
    pub(super) prev: Option<InstrId>,
    pub(super) next: Option<InstrId>,
}

impl Instr {
    /// Plain instruction with up to two sources and one destination
    pub fn new(opcode: OpCode, dst: Option<Opnd>, src1: Option<Opnd>, src2: Option<Opnd>) -> Self {
        Instr {
            opcode,
            kind: InstrKind::Norm,
            dst,
            src1,
            src2,
            offset: None,
            bailout: None,
            site: None,
            prev: None,
            next: None,
        }
    }

    /// Label instruction
    pub fn label() -> Self {
        Instr {
            kind: InstrKind::Label { is_loop_top: false },
            ..Instr::new(OpCode::Label, None, None, None)
        }
    }

    /// Branch with an unresolved target
    pub fn branch(opcode: OpCode, src1: Option<Opnd>, src2: Option<Opnd>) -> Self {
        Instr {
            kind: InstrKind::Branch { target: None },
            ..Instr::new(opcode, None, src1, src2)
        }
    }

    /// Multi-way branch with `cases` unresolved targets
    pub fn multi_branch(src1: Opnd, cases: usize) -> Self {
        Instr {
            kind: InstrKind::MultiBranch {
                targets: smallvec::smallvec![None; cases],
            },
            ..Instr::new(OpCode::MultiBr, None, Some(src1), None)
        }
    }

    /// Statement-boundary pragma
    pub fn pragma(statement: u32) -> Self {
        Instr {
            kind: InstrKind::Pragma { statement },
            ..Instr::new(OpCode::StatementBoundary, None, None, None)
        }
    }

    pub fn with_site(mut self, site: u16) -> Self {
        self.site = Some(site);
        self
    }

    pub fn is_label(&self) -> bool {
        matches!(self.kind, InstrKind::Label { .. })
    }

    pub fn is_branch(&self) -> bool {
        matches!(
            self.kind,
            InstrKind::Branch { .. } | InstrKind::MultiBranch { .. }
        )
    }

    /// Pragma instructions carry no semantics; resolution skips over them
    pub fn is_real(&self) -> bool {
        !matches!(self.kind, InstrKind::Pragma { .. })
    }

    pub fn is_loop_top_label(&self) -> bool {
        matches!(self.kind, InstrKind::Label { is_loop_top: true })
    }

    /// Resolved branch target, if any
    pub fn branch_target(&self) -> Option<InstrId> {
        match &self.kind {
            InstrKind::Branch { target } => *target,
            _ => None,
        }
    }

    /// The symbol this instruction defines, if any
    pub fn dst_sym(&self) -> Option<SymId> {
        match self.dst {
            Some(Opnd::Reg(id)) => Some(id),
            _ => None,
        }
    }
}
