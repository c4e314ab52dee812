//! Two-pass branch resolution
//!
//! Branches are emitted with unresolved targets; each records a
//! [`BranchReloc`] keyed by absolute bytecode offsets. After the body pass,
//! [`IrBuilder::resolve_branches`] drains the reloc list once, binding every
//! edge to a physically present label.
//!
//! Label placement advances past offsets that generated no instruction and
//! reuses an immediately preceding label rather than stacking a second one,
//! so two branches to one offset share a single label. A branch whose
//! target is at or before its source is a back edge unless the reloc says
//! otherwise; its label is marked as a loop top.

use smallvec::SmallVec;
use tracing::trace;

use crate::func::FatalError;
use crate::ir::{BailoutInfo, BailoutKind, Instr, InstrId, InstrKind, OpCode, Opnd};
use crate::sym::SymId;

use super::IrBuilder;

/// One unresolved branch edge
#[derive(Debug, Clone, Copy)]
pub(crate) struct BranchReloc {
    /// The branch (or multi-branch) instruction to patch
    branch: InstrId,
    /// Case index for multi-branch edges
    case_index: Option<usize>,
    /// Offset of the branch itself
    source: u32,
    /// Absolute target offset
    target: u32,
    /// Suppresses back-edge classification for branches that point
    /// backward without closing a loop (resume dispatch, handler entries)
    not_back_edge: bool,
}

impl IrBuilder<'_, '_> {
    /// Append a branch and record its pending edge
    ///
    /// In loop-body units an edge leaving the unit's range is redirected
    /// through the shared exit, preceded by a store of the interpreter
    /// offset the branch meant to reach.
    pub(super) fn add_branch(
        &mut self,
        instr: Instr,
        offset: u32,
        target: u32,
        not_back_edge: bool,
    ) -> Result<InstrId, FatalError> {
        let mut target = target;
        if self.func.is_loop_body() && self.is_outer_offset(target) {
            if !self.last_is_ret_ip_store() {
                self.insert_ret_ip_store(target, offset);
            }
            target = self.exit_offset();
        }
        if target as usize >= self.offset_to_instr.len() {
            return Err(FatalError::BranchTargetOutOfRange { target });
        }
        let id = self.add_instr(instr, Some(offset));
        self.relocs.push(BranchReloc {
            branch: id,
            case_index: None,
            source: offset,
            target,
            not_back_edge,
        });
        Ok(id)
    }

    /// Append a multi-way branch with one edge per case plus the default
    pub(super) fn add_multi_branch(
        &mut self,
        src: SymId,
        offset: u32,
        cases: &[u32],
        default: u32,
    ) -> Result<(), FatalError> {
        let edge_count = cases.len() + 1;
        let id = self.add_instr(Instr::multi_branch(Opnd::Reg(src), edge_count), Some(offset));
        let mut trampolines: SmallVec<[(u32, InstrId); 4]> = SmallVec::new();
        let targets: SmallVec<[u32; 8]> =
            cases.iter().copied().chain(std::iter::once(default)).collect();
        for (i, target) in targets.into_iter().enumerate() {
            if self.func.is_loop_body() && self.is_outer_offset(target) {
                let label = self.outer_case_trampoline(target, offset, &mut trampolines);
                if let InstrKind::MultiBranch { targets } = &mut self.func.ir.get_mut(id).kind {
                    targets[i] = Some(label);
                }
            } else {
                if target as usize >= self.offset_to_instr.len() {
                    return Err(FatalError::BranchTargetOutOfRange { target });
                }
                self.relocs.push(BranchReloc {
                    branch: id,
                    case_index: Some(i),
                    source: offset,
                    target,
                    not_back_edge: false,
                });
            }
        }
        Ok(())
    }

    /// Landing pad bridging one multi-branch case out of the loop body,
    /// shared between cases with the same target
    fn outer_case_trampoline(
        &mut self,
        target: u32,
        offset: u32,
        existing: &mut SmallVec<[(u32, InstrId); 4]>,
    ) -> InstrId {
        if let Some(&(_, label)) = existing.iter().find(|(t, _)| *t == target) {
            return label;
        }
        let label = self.add_instr(Instr::label(), Some(offset));
        self.insert_ret_ip_store(target, offset);
        let br = self.add_instr(Instr::branch(OpCode::Br, None, None), Some(offset));
        self.relocs.push(BranchReloc {
            branch: br,
            case_index: None,
            source: offset,
            target: self.exit_offset(),
            not_back_edge: true,
        });
        existing.push((target, label));
        label
    }

    /// Drain the reloc list, binding every edge to a label
    pub(super) fn resolve_branches(&mut self) -> Result<(), FatalError> {
        let relocs = std::mem::take(&mut self.relocs);
        let edges = relocs.len();
        let mut back_edges = 0usize;
        for reloc in relocs {
            let is_back_edge = !reloc.not_back_edge && reloc.target <= reloc.source;
            let label = self.create_label(reloc.target)?;
            if is_back_edge {
                back_edges += 1;
                self.mark_loop_top(label, &reloc);
            }
            match reloc.case_index {
                None => {
                    if let InstrKind::Branch { target } =
                        &mut self.func.ir.get_mut(reloc.branch).kind
                    {
                        *target = Some(label);
                    }
                }
                Some(i) => {
                    if let InstrKind::MultiBranch { targets } =
                        &mut self.func.ir.get_mut(reloc.branch).kind
                    {
                        targets[i] = Some(label);
                    }
                }
            }
        }
        trace!(edges, back_edges, "resolved branch edges");
        Ok(())
    }

    /// Label for a branch to `target`
    ///
    /// Advances past offsets that generated no instruction, reuses the
    /// instruction itself or its immediately preceding label, and only
    /// then inserts a fresh one.
    fn create_label(&mut self, target: u32) -> Result<InstrId, FatalError> {
        let limit = self.offset_to_instr.len();
        let mut offset = target as usize;
        let target_instr = loop {
            if offset >= limit {
                return Err(FatalError::BranchTargetOutOfRange { target });
            }
            if let Some(id) = self.offset_to_instr[offset] {
                break id;
            }
            offset += 1;
        };
        if self.func.ir.get(target_instr).is_label() {
            return Ok(target_instr);
        }
        if let Some(prev) = self.func.ir.prev_real(target_instr) {
            if self.func.ir.get(prev).is_label() {
                return Ok(prev);
            }
        }
        let mut label = Instr::label();
        label.offset = Some(offset as u32);
        Ok(self.func.ir.insert_before(target_instr, label))
    }

    /// First back edge to a label turns it into a loop top
    fn mark_loop_top(&mut self, label: InstrId, reloc: &BranchReloc) {
        let newly_loop_top = !self.func.ir.get(label).is_loop_top_label();
        if let InstrKind::Label { is_loop_top } = &mut self.func.ir.get_mut(label).kind {
            *is_loop_top = true;
        }
        if self.func.debug_mode() {
            // Pause point on every iteration boundary.
            let mut bail = Instr::new(OpCode::BailOut, None, None, None);
            bail.bailout = Some(BailoutInfo {
                resume_offset: reloc.source,
                kind: BailoutKind::FORCE_BY_FLAG | BailoutKind::BREAKPOINT,
            });
            bail.offset = Some(reloc.source);
            self.func.ir.insert_before(reloc.branch, bail);
            self.func.mark_has_bailouts();
        }
        if newly_loop_top {
            if let Some(counter) = self.loop_counter_sym {
                let incr = Instr::new(
                    OpCode::IncrLoopCounter,
                    Some(Opnd::Reg(counter)),
                    Some(Opnd::Reg(counter)),
                    None,
                );
                self.func.ir.insert_after(label, incr);
                self.func.syms.record_def(counter);
            }
        }
    }
}
