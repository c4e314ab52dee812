//! Closure environment prologue and scope-slot addressing
//!
//! Whole-function units materialize their closure environment at entry:
//! the enclosing environment load, scope-slot storage (flat array or
//! scope object), the frame-display chain, and optional spills of the
//! scope and display pointers into pre-reserved stack slots when stack
//! allocation of closures is on. Loop-body units skip all of this; the
//! closure pointer is a named register and bridges in through the frame
//! like any other live-in value.

use crate::func::FatalError;
use crate::ir::{Instr, OpCode, Opnd};
use crate::sym::{SymId, SymType};

use super::IrBuilder;

impl IrBuilder<'_, '_> {
    /// Emit the closure environment setup at unit entry
    pub(super) fn build_closure_prologue(&mut self) -> Result<(), FatalError> {
        debug_assert!(!self.func.is_loop_body());

        let mut env_sym = None;
        if let Some(env_reg) = self.body.env_reg() {
            let sym = self.build_dst(env_reg);
            self.add_instr(
                Instr::new(OpCode::LdEnv, Some(Opnd::Reg(sym)), None, None),
                None,
            );
            env_sym = Some(sym);
        }

        if self.body.has_func_expr_scope() {
            let sym = self.func.syms.mint(SymType::Var);
            self.func.syms.record_def(sym);
            self.add_instr(
                Instr::new(OpCode::NewPseudoScope, Some(Opnd::Reg(sym)), None, None),
                None,
            );
        }

        let mut closure_sym = None;
        let slot_count = self.body.scope_slot_count();
        if slot_count > 0 {
            let reg = self
                .body
                .closure_reg()
                .ok_or(FatalError::NoClosureStorage {
                    offset: self.start_offset,
                })?;
            let sym = self.build_dst(reg);
            let op = if self.body.uses_scope_object() {
                OpCode::NewScopeObject
            } else {
                OpCode::NewScopeSlots
            };
            self.add_instr(
                Instr::new(
                    op,
                    Some(Opnd::Reg(sym)),
                    Some(Opnd::Int(slot_count as i64)),
                    None,
                ),
                None,
            );
            closure_sym = Some(sym);
        }

        if closure_sym.is_some() || env_sym.is_some() {
            let display = self.func.syms.mint(SymType::MachPtr);
            self.func.syms.record_def(display);
            self.add_instr(
                Instr::new(
                    OpCode::LdFrameDisplay,
                    Some(Opnd::Reg(display)),
                    closure_sym.map(Opnd::Reg),
                    env_sym.map(Opnd::Reg),
                ),
                None,
            );
            if self.body.stack_closures() {
                if let Some(scope) = closure_sym {
                    self.spill_closure_pointer(scope);
                }
                self.spill_closure_pointer(display);
            }
        }
        Ok(())
    }

    /// Persist a closure pointer into a pre-reserved stack slot so bailout
    /// restoration can find it without the register allocator's help
    fn spill_closure_pointer(&mut self, from: SymId) {
        let spill = self.func.syms.mint(SymType::MachPtr);
        self.func.syms.record_def(spill);
        self.func.reserve_stack_slot(spill);
        self.add_instr(
            Instr::new(OpCode::Ld, Some(Opnd::Reg(spill)), Some(Opnd::Reg(from)), None),
            None,
        );
    }

    /// Base symbol for a scope-slot access, validating the slot index
    pub(super) fn scope_slot_base(&mut self, slot: u16, offset: u32) -> Result<SymId, FatalError> {
        let count = self.body.scope_slot_count();
        if slot >= count {
            return Err(FatalError::ScopeSlotOutOfRange {
                slot,
                count,
                offset,
            });
        }
        let reg = self
            .body
            .closure_reg()
            .ok_or(FatalError::NoClosureStorage { offset })?;
        self.build_src(reg, offset)
    }
}
