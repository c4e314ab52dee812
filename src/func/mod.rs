//! Per-compile context: the Function Record and rejit controller
//!
//! A [`FuncRecord`] owns everything one compile attempt mutates: the symbol
//! table, the IR arena, the summary flags and the stack-offset accumulator
//! for the few pre-reserved slots this core assigns directly. It is created
//! fresh per attempt (including every rejit retry) and is confined to its
//! compiling thread; the only state shared across attempts is the read-only
//! [`ProfileSnapshot`](crate::profile::ProfileSnapshot) and its sticky
//! disabled-optimization flags.

pub mod error;
pub mod rejit;

pub use error::{CompileError, CompileResult, FatalError, PhaseExit};
pub use rejit::{Phase, RejitController};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::bytecode::{FunctionBody, LoopHeader, RegSlot};
use crate::ir::IrBody;
use crate::profile::{ProfileGapPolicy, ProfileSnapshot};
use crate::sym::{SymId, SymType, SymbolTable};

/// The slice of a program compiled by one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkItem {
    /// A whole function
    Function,
    /// One extracted loop, compiled in isolation from its function
    LoopBody { loop_num: u16 },
    /// An inlined call fragment nested inside a parent record
    InlinedCall {
        /// Inline nesting depth below the top-level record
        depth: u16,
        /// Bytecode offset in the caller execution resumes at
        resume_offset: u32,
        /// Caller register receiving the call result, if used
        result_reg: Option<RegSlot>,
        /// First symbol id this record may mint; keeps ids disjoint from
        /// every ancestor
        sym_id_floor: u32,
    },
}

impl WorkItem {
    pub fn is_loop_body(&self) -> bool {
        matches!(self, WorkItem::LoopBody { .. })
    }

    pub fn is_inlined(&self) -> bool {
        matches!(self, WorkItem::InlinedCall { .. })
    }
}

/// Fault-injection configuration for self-test builds
#[cfg(feature = "fault-injection")]
#[derive(Debug, Clone, Copy)]
pub struct FaultInjection {
    /// First instruction ordinal to inject at
    pub start: u32,
    /// Inject at every `stride`-th instruction after `start`
    pub stride: u32,
}

/// Immutable per-compile configuration, fixed before the attempt starts
#[derive(Debug, Clone, Default)]
pub struct CompileConfig {
    /// Compile with full debugger fidelity (bailouts at every observable
    /// point)
    pub debug_mode: bool,
    /// Attempt runs on a background worker rather than the foreground
    /// thread
    pub background: bool,
    /// Which construct kinds receive profile-gap guards
    pub gap_policy: ProfileGapPolicy,
    #[cfg(feature = "fault-injection")]
    pub fault_injection: Option<FaultInjection>,
}

/// Cooperative cancellation flag for background attempts
///
/// Set when the owning execution context is torn down; checked at bounded
/// checkpoints (between opcode groups, at phase boundaries). Foreground
/// compiles hold a token nobody cancels, so they can never observe it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request abandonment of the attempt
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Boolean summary consumed by every later phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnitSummary {
    /// No calls anywhere in the unit
    pub is_leaf: bool,
    pub has_calls: bool,
    pub has_bailouts: bool,
    pub has_exception_regions: bool,
}

/// Finished output of a successful compile
///
/// A well-formed instruction list bounded by the Entry/Exit sentinels, all
/// branch targets resolved to physically present labels, all symbols
/// id-assigned.
#[derive(Debug)]
pub struct CompiledUnit {
    pub name: String,
    pub ir: IrBody,
    pub syms: SymbolTable,
    pub summary: UnitSummary,
}

/// Byte size reserved per pre-assigned stack slot
const STACK_SLOT_SIZE: i32 = 8;

/// The mutable context of one compile attempt
///
/// Owns the arena, symbol table and instruction list exclusively; never
/// shared across attempts or threads.
#[derive(Debug)]
pub struct FuncRecord<'a> {
    body: &'a FunctionBody,
    profile: &'a ProfileSnapshot,
    work_item: WorkItem,
    config: CompileConfig,
    /// Loop header range for loop-body units
    loop_header: Option<LoopHeader>,
    pub syms: SymbolTable,
    pub ir: IrBody,
    /// Until proven otherwise
    is_leaf: bool,
    has_calls: bool,
    has_bailouts: bool,
    has_exception_regions: bool,
    /// Running offset for the pre-reserved slots this core assigns directly
    stack_offset: i32,
    /// Interpreter frame pointer parameter, loop-body units only
    loop_param_sym: Option<SymId>,
}

impl<'a> FuncRecord<'a> {
    /// Create a fresh record for one attempt
    ///
    /// Fails only for metadata bugs (a loop-body work item naming a loop
    /// the header table does not contain).
    pub fn new(
        body: &'a FunctionBody,
        profile: &'a ProfileSnapshot,
        work_item: WorkItem,
        config: CompileConfig,
    ) -> Result<Self, FatalError> {
        let loop_header = match work_item {
            WorkItem::LoopBody { loop_num } => Some(
                body.loop_header(loop_num)
                    .ok_or(FatalError::UnknownLoop { loop_num })?,
            ),
            _ => None,
        };
        let syms = match work_item {
            WorkItem::InlinedCall { sym_id_floor, .. } => {
                SymbolTable::with_floor(body.reg_count(), sym_id_floor)
            }
            _ => SymbolTable::new(body.reg_count()),
        };
        Ok(FuncRecord {
            body,
            profile,
            work_item,
            config,
            loop_header,
            syms,
            ir: IrBody::new(),
            is_leaf: true,
            has_calls: false,
            has_bailouts: false,
            has_exception_regions: false,
            stack_offset: 0,
            loop_param_sym: None,
        })
    }

    pub fn body(&self) -> &'a FunctionBody {
        self.body
    }

    pub fn profile(&self) -> &'a ProfileSnapshot {
        self.profile
    }

    pub fn work_item(&self) -> WorkItem {
        self.work_item
    }

    pub fn config(&self) -> &CompileConfig {
        &self.config
    }

    pub fn is_loop_body(&self) -> bool {
        self.work_item.is_loop_body()
    }

    pub fn is_top_level(&self) -> bool {
        !self.work_item.is_inlined()
    }

    pub fn debug_mode(&self) -> bool {
        self.config.debug_mode
    }

    /// Loop header range, loop-body units only
    pub fn loop_header(&self) -> Option<LoopHeader> {
        self.loop_header
    }

    /// The interpreter frame pointer parameter for loop-body units
    pub fn ensure_loop_param_sym(&mut self) -> SymId {
        debug_assert!(self.is_loop_body());
        match self.loop_param_sym {
            Some(sym) => sym,
            None => {
                let sym = self.syms.mint(SymType::MachPtr);
                self.loop_param_sym = Some(sym);
                sym
            }
        }
    }

    pub fn loop_param_sym(&self) -> Option<SymId> {
        self.loop_param_sym
    }

    /// Reserve one stack slot and assign it to `sym` directly
    ///
    /// Only the closure spill slots go through here; everything else waits
    /// for the register allocator.
    pub fn reserve_stack_slot(&mut self, sym: SymId) -> i32 {
        self.stack_offset -= STACK_SLOT_SIZE;
        let offset = self.stack_offset;
        self.syms.assign_stack_offset(sym, offset);
        offset
    }

    /// Bytes of pre-reserved stack space
    pub fn reserved_stack_bytes(&self) -> i32 {
        -self.stack_offset
    }

    pub fn mark_has_calls(&mut self) {
        self.has_calls = true;
        self.is_leaf = false;
    }

    pub fn mark_has_bailouts(&mut self) {
        self.has_bailouts = true;
    }

    pub fn mark_has_exception_regions(&mut self) {
        self.has_exception_regions = true;
    }

    pub fn summary(&self) -> UnitSummary {
        UnitSummary {
            is_leaf: self.is_leaf,
            has_calls: self.has_calls,
            has_bailouts: self.has_bailouts,
            has_exception_regions: self.has_exception_regions,
        }
    }

    /// Consume the record into its output
    pub fn finish(self) -> CompiledUnit {
        let summary = self.summary();
        CompiledUnit {
            name: self.body.name().to_string(),
            ir: self.ir,
            syms: self.syms,
            summary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::FunctionBodyBuilder;

    #[test]
    fn loop_body_work_item_validates_loop_num() {
        let body = FunctionBodyBuilder::new("f").temps(1).build();
        let profile = ProfileSnapshot::empty(0, 0);
        let result = FuncRecord::new(
            &body,
            &profile,
            WorkItem::LoopBody { loop_num: 3 },
            CompileConfig::default(),
        );
        assert_eq!(result.err(), Some(FatalError::UnknownLoop { loop_num: 3 }));
    }

    #[test]
    fn reserved_slots_grow_downward() {
        let body = FunctionBodyBuilder::new("f").temps(1).build();
        let profile = ProfileSnapshot::empty(0, 0);
        let mut func = FuncRecord::new(
            &body,
            &profile,
            WorkItem::Function,
            CompileConfig::default(),
        )
        .unwrap();
        let a = func.syms.mint(SymType::MachPtr);
        let b = func.syms.mint(SymType::MachPtr);
        assert_eq!(func.reserve_stack_slot(a), -8);
        assert_eq!(func.reserve_stack_slot(b), -16);
        assert_eq!(func.reserved_stack_bytes(), 16);
    }

    #[test]
    fn cancel_token_is_sticky() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
