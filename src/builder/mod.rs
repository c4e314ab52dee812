//! Bytecode-to-IR translation
//!
//! [`IrBuilder`] is the single forward pass that turns one bytecode unit
//! (whole function, extracted loop or inlined fragment) into the IR list
//! owned by its [`FuncRecord`]. The pass runs in phases:
//!
//! 1. Preamble: constant loads, generator resume dispatch, implicit
//!    parameter loads, entry bailouts, closure prologue
//! 2. Body: per-opcode dispatch, recording the first instruction generated
//!    at each bytecode offset
//! 3. Loop close (loop-body units only): resume-offset store, live-out
//!    restores, counter flush, return
//! 4. Branch resolution: bind every pending reloc to a label
//!
//! Sub-components live in sibling modules: temp-register reuse
//! ([`temps`]), the branch fixup engine ([`branch`]), loop-body isolation
//! ([`loopbody`]), the call sequence linker ([`callargs`]), the
//! closure/scope builder ([`closure`]) and the bailout inserter
//! ([`bailout`]).

mod bailout;
mod branch;
mod callargs;
mod closure;
mod loopbody;
mod temps;


use branch::BranchReloc;
use tracing::trace;

use crate::bytecode::{
    BytecodeReader, DecodedInstr, FunctionBody, Opcode, Operands, RegSlot,
    StatementReader,
};
use crate::func::{CancelToken, FatalError, FuncRecord, PhaseExit};
use crate::ir::{Instr, InstrId, OpCode, Opnd};
use crate::sym::{SymId, SymType};

/// Opcode-loop stride between cancellation checkpoints
const CANCEL_CHECK_STRIDE: u32 = 64;

/// The Bytecode→IR translator for one compile attempt
pub struct IrBuilder<'b, 'a> {
    func: &'b mut FuncRecord<'a>,
    body: &'a FunctionBody,
    cancel: CancelToken,

    /// First bytecode offset of this unit
    start_offset: u32,
    /// Final offset of this unit, exclusive
    end_offset: u32,
    /// Insertion point; new instructions append after it
    last_instr: InstrId,
    /// First instruction generated at each bytecode offset; anchors branch
    /// targets and out-of-band insertion
    offset_to_instr: Vec<Option<InstrId>>,

    // Temp-register reuse tracker
    first_temp: RegSlot,
    temp_map: Box<[Option<SymId>]>,
    temp_used: Box<[bool]>,

    // Branch fixup engine
    relocs: Vec<BranchReloc>,

    // Loop-body isolation
    /// Registers to load from the interpreter frame at entry
    ld_slots: Vec<bool>,
    /// Registers to store back to the frame at unit exit
    st_slots: Vec<bool>,
    /// Holds the interpreter resume offset on unit exit
    ret_ip_sym: Option<SymId>,
    /// Per-iteration counter, loop-body units only
    loop_counter_sym: Option<SymId>,

    // Call sequence linker
    arg_stack: Vec<InstrId>,

    // Bailout point inserter
    site_guarded: Vec<bool>,
    loop_guarded: Vec<bool>,
    #[cfg(feature = "fault-injection")]
    instr_ordinal: u32,

    try_depth: u32,
}

impl<'b, 'a> IrBuilder<'b, 'a> {
    pub fn new(func: &'b mut FuncRecord<'a>, cancel: CancelToken) -> Self {
        let body = func.body();
        let (start_offset, end_offset) = match func.loop_header() {
            Some(header) => (header.start, header.end),
            None => (0, body.code_len()),
        };
        let temp_count = body.temp_count();
        let last_instr = func.ir.entry();
        IrBuilder {
            body,
            cancel,
            start_offset,
            end_offset,
            last_instr,
            // +2: the loop-body close sequence lives at end_offset + 1
            offset_to_instr: vec![None; end_offset as usize + 2],
            first_temp: body.first_temp_reg(),
            temp_map: vec![None; temp_count].into_boxed_slice(),
            temp_used: vec![false; temp_count].into_boxed_slice(),
            relocs: Vec::new(),
            ld_slots: vec![false; body.reg_count() as usize],
            st_slots: vec![false; body.reg_count() as usize],
            ret_ip_sym: None,
            loop_counter_sym: None,
            arg_stack: Vec::new(),
            site_guarded: vec![false; body.site_count() as usize],
            loop_guarded: vec![false; body.loops().len()],
            #[cfg(feature = "fault-injection")]
            instr_ordinal: 0,
            try_depth: 0,
            func,
        }
    }

    /// Run the whole pass
    pub fn build(mut self) -> Result<(), PhaseExit> {
        trace!(
            function = self.body.name(),
            loop_body = self.func.is_loop_body(),
            start = self.start_offset,
            end = self.end_offset,
            "translating bytecode unit"
        );

        self.build_preamble()?;
        self.build_body()?;
        if self.func.is_loop_body() {
            self.build_loop_close();
        }
        if self.cancel.is_cancelled() {
            return Err(PhaseExit::Aborted);
        }
        self.resolve_branches()?;
        Ok(())
    }

    fn build_preamble(&mut self) -> Result<(), PhaseExit> {
        self.build_constant_loads();

        if self.func.is_loop_body() {
            self.init_loop_counter();
        } else {
            if self.body.is_generator() {
                self.build_generator_preamble()?;
            }
            self.build_implicit_arg_ins();
        }

        if self.func.debug_mode() {
            // First bailout in the unit; resumes at the unit's first offset.
            self.insert_entry_debug_bailout();
        }

        if !self.func.is_loop_body() {
            self.build_closure_prologue()?;
            if self.func.debug_mode() {
                self.insert_post_prologue_debug_bailout();
            }
        }
        Ok(())
    }

    fn build_body(&mut self) -> Result<(), PhaseExit> {
        let mut reader = if self.func.is_loop_body() {
            BytecodeReader::for_range(self.body, self.start_offset, self.end_offset)
        } else {
            BytecodeReader::new(self.body)
        };
        let mut statements = StatementReader::new(self.body);
        statements.seek(self.start_offset);

        let mut dispatched: u32 = 0;
        while !reader.at_end() {
            if dispatched % CANCEL_CHECK_STRIDE == 0 && self.cancel.is_cancelled() {
                return Err(PhaseExit::Aborted);
            }
            dispatched += 1;

            let offset = reader.current_offset();
            while let Some(statement) = statements.boundary_at(offset) {
                self.add_instr(Instr::pragma(statement), Some(offset));
            }

            let decoded = reader.read_instr().map_err(FatalError::from)?;
            let next_offset = reader.current_offset();
            self.dispatch(&decoded, next_offset)?;
            self.maybe_inject_fault(next_offset);
        }
        // A chain or region still open here can never be closed; accepting
        // the stream would miscompile it.
        if let Some(&open) = self.arg_stack.first() {
            let offset = self.func.ir.get(open).offset.unwrap_or(self.end_offset);
            return Err(FatalError::UnterminatedArgChain { offset }.into());
        }
        if self.try_depth > 0 {
            return Err(FatalError::UnclosedTryRegion {
                open: self.try_depth,
            }
            .into());
        }
        Ok(())
    }

    /// Translate one decoded instruction
    ///
    /// `next_offset` is the offset of the following instruction; post-op
    /// bailouts resume there.
    fn dispatch(&mut self, decoded: &DecodedInstr, next_offset: u32) -> Result<(), FatalError> {
        let offset = decoded.offset;
        match (decoded.opcode, &decoded.operands) {
            (Opcode::Nop, _) => {}

            (Opcode::Mov, Operands::DstSrc { dst, src }) => {
                let s = self.build_src(*src, offset)?;
                let d = self.build_dst(*dst);
                self.add_instr(
                    Instr::new(OpCode::Ld, Some(Opnd::Reg(d)), Some(Opnd::Reg(s)), None),
                    Some(offset),
                );
            }

            (op, Operands::DstSrc { dst, src }) if matches!(op, Opcode::Neg | Opcode::Not) => {
                let s = self.build_src(*src, offset)?;
                let d = self.build_dst(*dst);
                let ir_op = if op == Opcode::Neg {
                    OpCode::Neg
                } else {
                    OpCode::Not
                };
                self.add_instr(
                    Instr::new(ir_op, Some(Opnd::Reg(d)), Some(Opnd::Reg(s)), None),
                    Some(offset),
                );
            }

            (op, Operands::DstSrcSrc { dst, src1, src2 }) => {
                let s1 = self.build_src(*src1, offset)?;
                let s2 = self.build_src(*src2, offset)?;
                let d = self.build_dst(*dst);
                self.add_instr(
                    Instr::new(
                        binary_ir_op(op),
                        Some(Opnd::Reg(d)),
                        Some(Opnd::Reg(s1)),
                        Some(Opnd::Reg(s2)),
                    ),
                    Some(offset),
                );
            }

            (
                Opcode::LdProp,
                Operands::PropLoad {
                    dst,
                    obj,
                    prop,
                    site,
                },
            ) => {
                self.maybe_profile_guard(*site, bailout::GuardedConstruct::PropAccess, offset);
                let base = self.build_src(*obj, offset)?;
                let d = self.build_dst(*dst);
                self.add_instr(
                    Instr::new(
                        OpCode::LdProp,
                        Some(Opnd::Reg(d)),
                        Some(Opnd::Field {
                            base,
                            index: *prop,
                        }),
                        None,
                    )
                    .with_site(*site),
                    Some(offset),
                );
                self.debug_post_op(OpCode::LdProp, next_offset);
            }

            (
                Opcode::StProp,
                Operands::PropStore {
                    obj,
                    prop,
                    src,
                    site,
                },
            ) => {
                self.maybe_profile_guard(*site, bailout::GuardedConstruct::PropAccess, offset);
                let value = self.build_src(*src, offset)?;
                let base = self.build_src(*obj, offset)?;
                self.add_instr(
                    Instr::new(
                        OpCode::StProp,
                        Some(Opnd::Field {
                            base,
                            index: *prop,
                        }),
                        Some(Opnd::Reg(value)),
                        None,
                    )
                    .with_site(*site),
                    Some(offset),
                );
                self.debug_post_op(OpCode::StProp, next_offset);
            }

            (
                Opcode::LdElem,
                Operands::ElemLoad {
                    dst,
                    obj,
                    index,
                    site,
                },
            ) => {
                self.maybe_profile_guard(*site, bailout::GuardedConstruct::ElemAccess, offset);
                let base = self.build_src(*obj, offset)?;
                let idx = self.build_src(*index, offset)?;
                let d = self.build_dst(*dst);
                self.add_instr(
                    Instr::new(
                        OpCode::LdElem,
                        Some(Opnd::Reg(d)),
                        Some(Opnd::Elem { base, index: idx }),
                        None,
                    )
                    .with_site(*site),
                    Some(offset),
                );
                self.debug_post_op(OpCode::LdElem, next_offset);
            }

            (
                Opcode::StElem,
                Operands::ElemStore {
                    obj,
                    index,
                    src,
                    site,
                },
            ) => {
                self.maybe_profile_guard(*site, bailout::GuardedConstruct::ElemAccess, offset);
                let value = self.build_src(*src, offset)?;
                let base = self.build_src(*obj, offset)?;
                let idx = self.build_src(*index, offset)?;
                self.add_instr(
                    Instr::new(
                        OpCode::StElem,
                        Some(Opnd::Elem { base, index: idx }),
                        Some(Opnd::Reg(value)),
                        None,
                    )
                    .with_site(*site),
                    Some(offset),
                );
                self.debug_post_op(OpCode::StElem, next_offset);
            }

            (Opcode::LdSlot, Operands::SlotLoad { dst, slot }) => {
                let base = self.scope_slot_base(*slot, offset)?;
                let d = self.build_dst(*dst);
                self.add_instr(
                    Instr::new(
                        OpCode::LdSlot,
                        Some(Opnd::Reg(d)),
                        Some(Opnd::Field {
                            base,
                            index: *slot,
                        }),
                        None,
                    ),
                    Some(offset),
                );
            }

            (Opcode::StSlot, Operands::SlotStore { slot, src }) => {
                let value = self.build_src(*src, offset)?;
                let base = self.scope_slot_base(*slot, offset)?;
                self.add_instr(
                    Instr::new(
                        OpCode::StSlot,
                        Some(Opnd::Field {
                            base,
                            index: *slot,
                        }),
                        Some(Opnd::Reg(value)),
                        None,
                    ),
                    Some(offset),
                );
            }

            (Opcode::StartCall, Operands::Count { count }) => {
                self.build_start_call(*count, offset);
            }

            (Opcode::ArgOut, Operands::ArgOut { src, .. }) => {
                self.build_arg_out(*src, offset)?;
            }

            (
                op,
                Operands::CallLike {
                    dst,
                    callee,
                    argc,
                    site,
                },
            ) if matches!(op, Opcode::Call | Opcode::New) => {
                self.maybe_profile_guard(*site, bailout::GuardedConstruct::CallSite, offset);
                let callee_sym = self.build_src(*callee, offset)?;
                let d = self.build_dst(*dst);
                let ir_op = if op == Opcode::Call {
                    OpCode::Call
                } else {
                    OpCode::NewScObject
                };
                let call_id = self.add_instr(
                    Instr::new(
                        ir_op,
                        Some(Opnd::Reg(d)),
                        Some(Opnd::Reg(callee_sym)),
                        None,
                    )
                    .with_site(*site),
                    Some(offset),
                );
                self.link_call_args(call_id, *argc, offset)?;
                self.func.mark_has_calls();
                self.debug_post_op(ir_op, next_offset);
            }

            (Opcode::Ret, Operands::Src { src }) => {
                if self.func.is_loop_body() {
                    // Re-execute the return in the interpreter: bridge out
                    // through the shared exit.
                    let s = self.build_src(*src, offset)?;
                    self.mark_frame_store(s);
                    self.insert_ret_ip_store(offset, offset);
                    let br = Instr::branch(OpCode::Br, None, None);
                    self.add_branch(br, offset, self.exit_offset(), true)?;
                } else {
                    let s = self.build_src(*src, offset)?;
                    self.add_instr(
                        Instr::new(OpCode::Ret, None, Some(Opnd::Reg(s)), None),
                        Some(offset),
                    );
                }
            }

            (Opcode::Br, Operands::Target { target }) => {
                let br = Instr::branch(OpCode::Br, None, None);
                self.add_branch(br, offset, *target, false)?;
            }

            (op, Operands::SrcTarget { src, target })
                if matches!(op, Opcode::BrTrue | Opcode::BrFalse) =>
            {
                let s = self.build_src(*src, offset)?;
                let ir_op = if op == Opcode::BrTrue {
                    OpCode::BrTrue
                } else {
                    OpCode::BrFalse
                };
                let br = Instr::branch(ir_op, Some(Opnd::Reg(s)), None);
                self.add_branch(br, offset, *target, false)?;
            }

            (
                Opcode::Switch,
                Operands::Switch {
                    src,
                    cases,
                    default,
                },
            ) => {
                let s = self.build_src(*src, offset)?;
                self.add_multi_branch(s, offset, cases, *default)?;
            }

            (Opcode::Throw, Operands::Src { src }) => {
                let s = self.build_src(*src, offset)?;
                self.add_instr(
                    Instr::new(OpCode::Throw, None, Some(Opnd::Reg(s)), None),
                    Some(offset),
                );
            }

            (Opcode::TryBegin, Operands::Target { target }) => {
                self.func.mark_has_exception_regions();
                self.try_depth += 1;
                let br = Instr::branch(OpCode::TryBegin, None, None);
                // Handler entries are forward targets, never loop headers.
                self.add_branch(br, offset, *target, true)?;
            }

            (Opcode::TryEnd, _) => {
                if self.try_depth == 0 {
                    return Err(FatalError::UnmatchedTryEnd { offset });
                }
                self.try_depth -= 1;
                self.add_instr(Instr::new(OpCode::TryEnd, None, None, None), Some(offset));
            }

            (Opcode::Yield, Operands::Src { src }) => {
                let s = self.build_src(*src, offset)?;
                self.add_instr(
                    Instr::new(OpCode::Yield, None, Some(Opnd::Reg(s)), None),
                    Some(offset),
                );
            }

            (Opcode::LoopStart, Operands::Count { count }) => {
                let loop_num = *count;
                if self.body.loop_header(loop_num).is_none() {
                    return Err(FatalError::UnknownLoop { loop_num });
                }
                if !self.func.is_loop_body() {
                    self.maybe_loop_guard(loop_num, offset);
                }
            }

            (Opcode::LoopEnd, Operands::Count { count }) => {
                if self.body.loop_header(*count).is_none() {
                    return Err(FatalError::UnknownLoop { loop_num: *count });
                }
            }

            // The reader produces exactly one operand layout per opcode, so
            // any other pairing is a decoder bug.
            (opcode, operands) => {
                unreachable!("opcode {:?} with operand layout {:?}", opcode, operands)
            }
        }
        Ok(())
    }

    // === Preamble pieces ===

    /// Preload every constant register from the pool
    ///
    /// Runs for every unit kind: loop bodies reload constants rather than
    /// bridging them through the frame.
    fn build_constant_loads(&mut self) {
        for index in 0..self.body.const_count() {
            let sym_id = SymId(index as u32);
            let not_int = !self.body.consts()[index as usize].is_int();
            let sym = self
                .func
                .syms
                .find_or_create(sym_id, Some(index), SymType::Var);
            sym.is_const = true;
            sym.is_not_int = not_int;
            self.func.syms.record_def(sym_id);
            self.add_instr(
                Instr::new(
                    OpCode::LdConst,
                    Some(Opnd::Reg(sym_id)),
                    Some(Opnd::Const(index as u32)),
                    None,
                ),
                None,
            );
        }
    }

    /// Load declared parameters into their named registers
    fn build_implicit_arg_ins(&mut self) {
        for i in 0..self.body.in_param_count() {
            let reg = self.body.first_param_reg() + i;
            let d = self.build_dst(reg);
            self.add_instr(
                Instr::new(
                    OpCode::ArgIn,
                    Some(Opnd::Reg(d)),
                    Some(Opnd::Int(i as i64)),
                    None,
                ),
                None,
            );
        }
    }

    /// Dispatch on the generator's resume index at entry
    ///
    /// One compare-branch per yield point; the targets go through the
    /// normal reloc machinery and resolve to labels like any other branch.
    fn build_generator_preamble(&mut self) -> Result<(), FatalError> {
        if self.body.yield_resume_offsets().is_empty() {
            return Ok(());
        }
        let resume = self.func.syms.mint(SymType::Int32);
        self.func.syms.record_def(resume);
        self.add_instr(
            Instr::new(OpCode::LdResumePoint, Some(Opnd::Reg(resume)), None, None),
            None,
        );
        let targets: Vec<u32> = self.body.yield_resume_offsets().to_vec();
        for (i, target) in targets.into_iter().enumerate() {
            let br = Instr::branch(
                OpCode::BrEq,
                Some(Opnd::Reg(resume)),
                Some(Opnd::Int(i as i64)),
            );
            // Resume targets are always forward.
            self.add_branch(br, self.start_offset, target, true)?;
        }
        Ok(())
    }

    // === Shared helpers ===

    /// Append `instr` after the current insertion point
    ///
    /// Records the first instruction generated at each offset; branch
    /// resolution and out-of-band insertion anchor on that map.
    pub(crate) fn add_instr(&mut self, mut instr: Instr, offset: Option<u32>) -> InstrId {
        instr.offset = offset;
        if instr.bailout.is_some() {
            self.func.mark_has_bailouts();
        }
        let id = self.func.ir.insert_after(self.last_instr, instr);
        self.last_instr = id;
        if let Some(offset) = offset {
            let slot = &mut self.offset_to_instr[offset as usize];
            if slot.is_none() {
                *slot = Some(id);
            }
        }
        id
    }

    pub(crate) fn last_instr(&self) -> InstrId {
        self.last_instr
    }
}

/// Map a binary bytecode opcode to its IR opcode
fn binary_ir_op(op: Opcode) -> OpCode {
    match op {
        Opcode::Add => OpCode::Add,
        Opcode::Sub => OpCode::Sub,
        Opcode::Mul => OpCode::Mul,
        Opcode::Div => OpCode::Div,
        Opcode::Mod => OpCode::Mod,
        Opcode::CmpEq => OpCode::CmpEq,
        Opcode::CmpLt => OpCode::CmpLt,
        Opcode::CmpGt => OpCode::CmpGt,
        other => unreachable!("not a binary opcode: {:?}", other),
    }
}
