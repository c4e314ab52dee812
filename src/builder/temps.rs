//! Register-to-symbol mapping and temp reuse
//!
//! Named registers map to the symbol whose id equals their register index.
//! Temp registers are generational: a def reuses the current generation's
//! symbol only if it has not been used since its last def, otherwise a
//! fresh symbol is minted. Sources must be processed before the
//! destination of the same instruction, or a def would clobber the
//! generation its own sources read.
//!
//! Loop-body units relax use-before-def for temps: a temp read before any
//! def in the unit was defined in an earlier iteration, so it is pinned to
//! its frame symbol and bridged through the interpreter frame.

use crate::bytecode::RegSlot;
use crate::func::FatalError;
use crate::sym::{SymId, SymType};

use super::IrBuilder;

impl IrBuilder<'_, '_> {
    /// Symbol for a register read at `offset`
    pub(super) fn build_src(&mut self, reg: RegSlot, offset: u32) -> Result<SymId, FatalError> {
        if self.body.reg_is_temp(reg) {
            let t = (reg - self.first_temp) as usize;
            let sym = match self.temp_map[t] {
                Some(sym) => sym,
                None => {
                    if !self.func.is_loop_body() {
                        return Err(FatalError::UseBeforeDef { reg, offset });
                    }
                    // Defined in an earlier iteration; pin to the frame
                    // symbol and bridge the value in.
                    let sym = SymId(reg as u32);
                    self.func.syms.find_or_create(sym, Some(reg), SymType::Var);
                    self.temp_map[t] = Some(sym);
                    self.ensure_frame_load(sym);
                    sym
                }
            };
            self.temp_used[t] = true;
            Ok(sym)
        } else {
            let sym = SymId(reg as u32);
            self.func.syms.find_or_create(sym, Some(reg), SymType::Var);
            if self.func.is_loop_body() {
                self.ensure_frame_load(sym);
            }
            Ok(sym)
        }
    }

    /// Symbol for a register defined by the current instruction
    pub(super) fn build_dst(&mut self, reg: RegSlot) -> SymId {
        let sym = if self.body.reg_is_temp(reg) {
            let t = (reg - self.first_temp) as usize;
            let frame_sym = SymId(reg as u32);
            if self.func.is_loop_body() && self.ld_slots[frame_sym.0 as usize] {
                // Once bridged, every def targets the frame symbol so the
                // interpreter sees the final value on exit.
                self.func
                    .syms
                    .find_or_create(frame_sym, Some(reg), SymType::Var);
                self.temp_map[t] = Some(frame_sym);
                self.temp_used[t] = false;
                self.mark_frame_store(frame_sym);
                frame_sym
            } else {
                let sym = match self.temp_map[t] {
                    Some(sym) if !self.temp_used[t] => sym,
                    _ => {
                        let sym = self.func.syms.mint_with_reg(Some(reg), SymType::Var);
                        self.temp_map[t] = Some(sym);
                        sym
                    }
                };
                self.temp_used[t] = false;
                sym
            }
        } else {
            let sym = SymId(reg as u32);
            self.func.syms.find_or_create(sym, Some(reg), SymType::Var);
            if self.func.is_loop_body() && !self.body.reg_is_const(reg) {
                self.mark_frame_store(sym);
            }
            sym
        };
        self.func.syms.record_def(sym);
        sym
    }
}
