//! Bailout point insertion policies
//!
//! Three independent policies place deoptimization points during
//! translation:
//!
//! - Debug fidelity: unconditional bailouts at unit entry, after the
//!   closure prologue, after every operation that can run user code, and
//!   before every loop back edge (the last inserted during branch
//!   resolution).
//! - Profile gaps: a guard before the first use of a construct the
//!   interpreter never gathered observations for, at most one per site.
//! - Fault injection: self-test bailouts at configured instruction
//!   ordinals, never between a call's marker and the call itself.
//!
//! Every bailout records the exact bytecode offset the interpreter
//! resumes at.

use crate::ir::{BailoutInfo, BailoutKind, Instr, OpCode};

use super::IrBuilder;

/// Construct kinds the profile-gap policy can guard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum GuardedConstruct {
    PropAccess,
    ElemAccess,
    CallSite,
}

impl IrBuilder<'_, '_> {
    fn append_bailout(&mut self, resume_offset: u32, kind: BailoutKind) {
        let mut instr = Instr::new(OpCode::BailOut, None, None, None);
        instr.bailout = Some(BailoutInfo {
            resume_offset,
            kind,
        });
        self.add_instr(instr, Some(resume_offset));
    }

    /// Unconditional pause point before any of the unit's effects
    pub(super) fn insert_entry_debug_bailout(&mut self) {
        self.append_bailout(
            self.start_offset,
            BailoutKind::FORCE_BY_FLAG | BailoutKind::BREAKPOINT | BailoutKind::STEP,
        );
    }

    /// Pause point once locals and closure storage are initialized
    pub(super) fn insert_post_prologue_debug_bailout(&mut self) {
        self.append_bailout(
            self.start_offset,
            BailoutKind::BREAKPOINT | BailoutKind::STEP,
        );
    }

    /// Pause point after an operation that may have run user code
    ///
    /// [`OpCode::can_run_user_code`] is the single policy deciding which
    /// operations qualify; everything else gets no post-op pause.
    pub(super) fn debug_post_op(&mut self, op: OpCode, next_offset: u32) {
        if !self.func.debug_mode() || !op.can_run_user_code() {
            return;
        }
        self.append_bailout(
            next_offset,
            BailoutKind::RETURN_FROM_CALL | BailoutKind::BREAKPOINT | BailoutKind::STEP,
        );
    }

    /// Guard an unprofiled site before its first optimized use
    pub(super) fn maybe_profile_guard(
        &mut self,
        site: u16,
        construct: GuardedConstruct,
        offset: u32,
    ) {
        if self.func.debug_mode() {
            // Debug compiles never speculate, so there is nothing to guard.
            return;
        }
        let policy = self.func.config().gap_policy;
        let enabled = match construct {
            GuardedConstruct::PropAccess => policy.guard_prop_access,
            GuardedConstruct::ElemAccess => policy.guard_elem_access,
            GuardedConstruct::CallSite => policy.guard_call_sites,
        };
        if !enabled || self.func.profile().has_site_data(site) {
            return;
        }
        let idx = site as usize;
        if idx < self.site_guarded.len() {
            if self.site_guarded[idx] {
                return;
            }
            self.site_guarded[idx] = true;
        }
        let mut instr = Instr::new(OpCode::BailOnNoProfile, None, None, None);
        instr.bailout = Some(BailoutInfo {
            resume_offset: offset,
            kind: BailoutKind::NO_PROFILE,
        });
        instr.site = Some(site);
        self.add_instr(instr, Some(offset));
    }

    /// Guard a loop the interpreter never profiled an iteration of
    pub(super) fn maybe_loop_guard(&mut self, loop_num: u16, offset: u32) {
        if self.func.debug_mode() {
            return;
        }
        if self.func.profile().loop_ever_profiled(loop_num) {
            return;
        }
        let idx = loop_num as usize;
        if self.loop_guarded[idx] {
            return;
        }
        self.loop_guarded[idx] = true;
        let mut instr = Instr::new(OpCode::BailOnNoProfile, None, None, None);
        instr.bailout = Some(BailoutInfo {
            resume_offset: offset,
            kind: BailoutKind::NO_PROFILE,
        });
        self.add_instr(instr, Some(offset));
    }

    /// Self-test bailout at configured instruction ordinals
    ///
    /// Suppressed while an argument chain is open: a bailout between a
    /// call's marker and the call would leave the chain half-materialized.
    #[cfg(feature = "fault-injection")]
    pub(super) fn maybe_inject_fault(&mut self, next_offset: u32) {
        let ordinal = self.instr_ordinal;
        self.instr_ordinal += 1;
        let Some(fi) = self.func.config().fault_injection else {
            return;
        };
        if fi.stride == 0 || ordinal < fi.start || (ordinal - fi.start) % fi.stride != 0 {
            return;
        }
        if !self.arg_stack.is_empty() {
            return;
        }
        self.append_bailout(next_offset, BailoutKind::FAULT_INJECTED);
    }

    #[cfg(not(feature = "fault-injection"))]
    pub(super) fn maybe_inject_fault(&mut self, _next_offset: u32) {}
}
