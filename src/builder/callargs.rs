//! Call sequence linking
//!
//! The bytecode call protocol is a flat sequence: a start marker declaring
//! the argument count, one ArgOut per argument, then the call. The
//! translator keeps the pending argument instructions on a stack; when the
//! call arrives it pops them into a chain threaded through each
//! instruction's second source, innermost argument first, terminating at
//! the marker. Nested sequences work by plain stack discipline: an inner
//! call consumes exactly its own arguments down to its own marker.
//!
//! A chain whose linked count disagrees with the declared count is a
//! producer bug and kills the compile.

use crate::bytecode::RegSlot;
use crate::func::FatalError;
use crate::ir::{Instr, InstrId, OpCode, Opnd};
use crate::sym::SymType;

use super::IrBuilder;

impl IrBuilder<'_, '_> {
    /// Open an argument chain declaring `count` arguments
    pub(super) fn build_start_call(&mut self, count: u16, offset: u32) {
        let marker = self.func.syms.mint(SymType::MachPtr);
        self.func.syms.record_def(marker);
        let id = self.add_instr(
            Instr::new(
                OpCode::StartCall,
                Some(Opnd::Reg(marker)),
                Some(Opnd::Int(count as i64)),
                None,
            ),
            Some(offset),
        );
        self.arg_stack.push(id);
    }

    /// Push one outgoing argument onto the open chain
    pub(super) fn build_arg_out(&mut self, src: RegSlot, offset: u32) -> Result<(), FatalError> {
        let value = self.build_src(src, offset)?;
        let slot = self.func.syms.mint(SymType::Var);
        self.func.syms.record_def(slot);
        let id = self.add_instr(
            Instr::new(
                OpCode::ArgOut,
                Some(Opnd::Reg(slot)),
                Some(Opnd::Reg(value)),
                None,
            ),
            Some(offset),
        );
        self.arg_stack.push(id);
        Ok(())
    }

    /// Pop the open chain into `call`, threading src2 links down to the
    /// marker
    pub(super) fn link_call_args(
        &mut self,
        call: InstrId,
        argc: u16,
        offset: u32,
    ) -> Result<(), FatalError> {
        let mut linked: u16 = 0;
        let mut prev = call;
        loop {
            let Some(arg) = self.arg_stack.pop() else {
                return Err(FatalError::CallWithoutStartCall { offset });
            };
            let arg_sym = self.func.ir.get(arg).dst_sym();
            self.func.ir.get_mut(prev).src2 = arg_sym.map(Opnd::Reg);
            let (opcode, src1) = {
                let instr = self.func.ir.get(arg);
                (instr.opcode, instr.src1)
            };
            if opcode == OpCode::StartCall {
                let declared = match src1 {
                    Some(Opnd::Int(n)) => n as u16,
                    _ => 0,
                };
                if declared != argc || linked != argc {
                    return Err(FatalError::ArgCountMismatch {
                        declared,
                        linked,
                        offset,
                    });
                }
                return Ok(());
            }
            linked += 1;
            prev = arg;
        }
    }
}
