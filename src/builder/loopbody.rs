//! Loop-body unit isolation
//!
//! An extracted loop executes against its function's live interpreter
//! frame. Values defined before the loop are bridged in with frame loads
//! after the entry sentinel; values the loop defines are stored back in a
//! single close sequence at the shared exit, followed by the iteration
//! count flush and a return of the interpreter offset execution resumes
//! at. Every edge leaving the loop's range funnels through that one exit.

use crate::bytecode::RegSlot;
use crate::ir::{Instr, OpCode, Opnd};
use crate::sym::{SymId, SymType};

use super::IrBuilder;

impl IrBuilder<'_, '_> {
    /// Offset the shared exit sequence lives at, one past the unit's range
    pub(super) fn exit_offset(&self) -> u32 {
        self.end_offset + 1
    }

    /// True for offsets outside the loop's bytecode range
    pub(super) fn is_outer_offset(&self, offset: u32) -> bool {
        offset < self.start_offset || offset >= self.end_offset
    }

    /// Bridge a value defined before the loop in from the frame, once
    ///
    /// Constant registers reload from the pool in the preamble instead.
    /// Loads sit directly after the entry sentinel, before any use.
    pub(super) fn ensure_frame_load(&mut self, sym: SymId) {
        debug_assert!(self.func.is_loop_body());
        let idx = sym.0 as usize;
        if idx >= self.ld_slots.len() || self.ld_slots[idx] {
            return;
        }
        if self.body.reg_is_const(sym.0 as RegSlot) {
            return;
        }
        self.ld_slots[idx] = true;
        let base = self.func.ensure_loop_param_sym();
        let load = Instr::new(
            OpCode::LdFrameSlot,
            Some(Opnd::Reg(sym)),
            Some(Opnd::FrameSlot {
                base,
                slot: sym.0 as RegSlot,
            }),
            None,
        );
        let entry = self.func.ir.entry();
        self.func.ir.insert_after(entry, load);
        self.func.syms.record_def(sym);
    }

    /// Record that `sym`'s register must be visible to the interpreter on
    /// exit
    pub(super) fn mark_frame_store(&mut self, sym: SymId) {
        let idx = sym.0 as usize;
        if idx < self.st_slots.len() {
            self.st_slots[idx] = true;
        }
    }

    /// The symbol carrying the interpreter resume offset out of the unit
    fn ret_ip_sym(&mut self) -> SymId {
        match self.ret_ip_sym {
            Some(sym) => sym,
            None => {
                let sym = self.func.syms.mint(SymType::Int32);
                self.ret_ip_sym = Some(sym);
                sym
            }
        }
    }

    /// Store the offset the interpreter resumes at when the unit exits
    pub(super) fn insert_ret_ip_store(&mut self, target: u32, offset: u32) {
        let sym = self.ret_ip_sym();
        let store = Instr::new(
            OpCode::LdImm,
            Some(Opnd::Reg(sym)),
            Some(Opnd::Int(target as i64)),
            None,
        );
        self.add_instr(store, Some(offset));
        self.func.syms.record_def(sym);
    }

    /// True if the instruction just emitted already stores the resume
    /// offset, so an exit edge need not store it again
    pub(super) fn last_is_ret_ip_store(&self) -> bool {
        let Some(ret) = self.ret_ip_sym else {
            return false;
        };
        let last = self.func.ir.get(self.last_instr());
        last.opcode == OpCode::LdImm && last.dst_sym() == Some(ret)
    }

    /// Zero the per-iteration counter in the preamble
    pub(super) fn init_loop_counter(&mut self) {
        debug_assert!(self.func.is_loop_body());
        let counter = self.func.syms.mint(SymType::Int32);
        self.func.syms.record_def(counter);
        self.loop_counter_sym = Some(counter);
        self.add_instr(
            Instr::new(OpCode::InitLoopCounter, Some(Opnd::Reg(counter)), None, None),
            None,
        );
    }

    /// Emit the shared exit sequence
    ///
    /// Falling off the unit's last instruction resumes right after the
    /// loop; redirected edges already stored their own resume offset and
    /// branch past this store to the restores.
    pub(super) fn build_loop_close(&mut self) {
        let end = self.end_offset;
        let exit = self.exit_offset();
        self.insert_ret_ip_store(end, end);

        let base = self.func.ensure_loop_param_sym();
        for idx in 0..self.st_slots.len() {
            if !self.st_slots[idx] {
                continue;
            }
            let sym = SymId(idx as u32);
            self.add_instr(
                Instr::new(
                    OpCode::StFrameSlot,
                    Some(Opnd::FrameSlot {
                        base,
                        slot: idx as RegSlot,
                    }),
                    Some(Opnd::Reg(sym)),
                    None,
                ),
                Some(exit),
            );
        }
        if let Some(counter) = self.loop_counter_sym {
            self.add_instr(
                Instr::new(OpCode::StLoopCount, None, Some(Opnd::Reg(counter)), None),
                Some(exit),
            );
        }
        if let Some(ret) = self.ret_ip_sym {
            self.add_instr(
                Instr::new(OpCode::Ret, None, Some(Opnd::Reg(ret)), None),
                Some(exit),
            );
        }
    }
}
