//! Function body encoder
//!
//! [`FunctionBodyBuilder`] is the producer-side counterpart of
//! [`BytecodeReader`](super::reader::BytecodeReader): it assembles an encoded
//! instruction stream plus the metadata tables of a [`FunctionBody`]. The
//! front end uses it when lowering an AST; the backend's tests use it to
//! assemble exact opcode sequences.
//!
//! Branch targets are absolute offsets, so forward branches are emitted with
//! a placeholder and patched once the target offset is known.

use super::{ConstValue, FunctionBody, LoopHeader, Opcode, RegSlot, StatementBoundary};

/// A forward-branch placeholder returned by the `emit_br*` methods
///
/// Must be passed to [`FunctionBodyBuilder::patch`] before `build`.
#[derive(Debug)]
pub struct PatchSite(u32);

/// Builder for encoded function bodies
///
/// Register file layout (constant, parameter/local and temp counts) must be
/// declared before the first emit; the `*_reg` helpers compute absolute
/// register indices from it.
#[derive(Debug, Default)]
pub struct FunctionBodyBuilder {
    name: String,
    code: Vec<u8>,
    consts: Vec<ConstValue>,
    param_count: u16,
    local_count: u16,
    temp_count: u16,
    env_reg: Option<RegSlot>,
    closure_reg: Option<RegSlot>,
    scope_slot_count: u16,
    uses_scope_object: bool,
    has_func_expr_scope: bool,
    stack_closures: bool,
    is_generator: bool,
    yield_resume_offsets: Vec<u32>,
    loops: Vec<LoopHeader>,
    open_loops: Vec<u16>,
    statements: Vec<StatementBoundary>,
    next_site: u16,
    unpatched: u32,
}

impl FunctionBodyBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        FunctionBodyBuilder {
            name: name.into(),
            ..Default::default()
        }
    }

    // === Layout ===

    /// Set the constant pool; constant register `i` holds `consts[i]`
    pub fn consts(mut self, consts: Vec<ConstValue>) -> Self {
        self.consts = consts;
        self
    }

    /// Declare the parameter count (parameters occupy the first named regs)
    pub fn params(mut self, count: u16) -> Self {
        self.param_count = count;
        self
    }

    /// Declare additional named local registers beyond the parameters
    pub fn locals(mut self, count: u16) -> Self {
        self.local_count = count;
        self
    }

    /// Declare the temporary register count
    pub fn temps(mut self, count: u16) -> Self {
        self.temp_count = count;
        self
    }

    /// Request an environment register (allocated among the named locals)
    pub fn env_reg(mut self, reg: RegSlot) -> Self {
        self.env_reg = Some(reg);
        self
    }

    /// Allocate `count` closure scope slots at entry, storing the scope
    /// pointer in `reg`
    pub fn scope_slots(mut self, count: u16, reg: RegSlot) -> Self {
        self.scope_slot_count = count;
        self.closure_reg = Some(reg);
        self
    }

    /// Use a scope object instead of a flat slot array
    pub fn scope_object(mut self) -> Self {
        self.uses_scope_object = true;
        self
    }

    /// Function expression with a named self-reference
    pub fn func_expr_scope(mut self) -> Self {
        self.has_func_expr_scope = true;
        self
    }

    /// Enable stack allocation of closures
    pub fn stack_closures(mut self) -> Self {
        self.stack_closures = true;
        self
    }

    /// Mark the function as a generator
    pub fn generator(mut self) -> Self {
        self.is_generator = true;
        self
    }

    // === Register helpers ===

    /// Absolute register of constant `i`
    pub fn const_reg(&self, i: u16) -> RegSlot {
        debug_assert!((i as usize) < self.consts.len());
        i
    }

    /// Absolute register of parameter `i`
    pub fn param_reg(&self, i: u16) -> RegSlot {
        debug_assert!(i < self.param_count);
        self.consts.len() as u16 + i
    }

    /// Absolute register of named local `i`
    pub fn local_reg(&self, i: u16) -> RegSlot {
        debug_assert!(i < self.local_count);
        self.consts.len() as u16 + self.param_count + i
    }

    /// Absolute register of temporary `i`
    pub fn temp_reg(&self, i: u16) -> RegSlot {
        debug_assert!(i < self.temp_count);
        self.consts.len() as u16 + self.param_count + self.local_count + i
    }

    /// Mint a fresh profiled-site id
    pub fn site(&mut self) -> u16 {
        let site = self.next_site;
        self.next_site += 1;
        site
    }

    /// Current stream offset: the offset of the next emitted instruction
    pub fn offset(&self) -> u32 {
        self.code.len() as u32
    }

    /// Record a statement boundary at the current offset
    pub fn statement(&mut self, statement: u32) {
        self.statements.push(StatementBoundary {
            offset: self.offset(),
            statement,
        });
    }

    // === Emission ===

    fn op(&mut self, op: Opcode) {
        self.code.push(op as u8);
    }

    fn u16(&mut self, v: u16) {
        self.code.extend_from_slice(&v.to_le_bytes());
    }

    fn u32(&mut self, v: u32) {
        self.code.extend_from_slice(&v.to_le_bytes());
    }

    /// Reserve a u32 target slot and return its patch site
    fn target_slot(&mut self) -> PatchSite {
        let at = self.code.len() as u32;
        self.u32(u32::MAX);
        self.unpatched += 1;
        PatchSite(at)
    }

    pub fn emit_nop(&mut self) {
        self.op(Opcode::Nop);
    }

    pub fn emit_mov(&mut self, dst: RegSlot, src: RegSlot) {
        self.op(Opcode::Mov);
        self.u16(dst);
        self.u16(src);
    }

    /// Emit a three-register arithmetic or comparison instruction
    pub fn emit_bin(&mut self, op: Opcode, dst: RegSlot, src1: RegSlot, src2: RegSlot) {
        debug_assert!(matches!(
            op,
            Opcode::Add
                | Opcode::Sub
                | Opcode::Mul
                | Opcode::Div
                | Opcode::Mod
                | Opcode::CmpEq
                | Opcode::CmpLt
                | Opcode::CmpGt
        ));
        self.op(op);
        self.u16(dst);
        self.u16(src1);
        self.u16(src2);
    }

    /// Emit a two-register unary instruction
    pub fn emit_un(&mut self, op: Opcode, dst: RegSlot, src: RegSlot) {
        debug_assert!(matches!(op, Opcode::Neg | Opcode::Not));
        self.op(op);
        self.u16(dst);
        self.u16(src);
    }

    pub fn emit_ld_prop(&mut self, dst: RegSlot, obj: RegSlot, prop: u16, site: u16) {
        self.op(Opcode::LdProp);
        self.u16(dst);
        self.u16(obj);
        self.u16(prop);
        self.u16(site);
    }

    pub fn emit_st_prop(&mut self, obj: RegSlot, prop: u16, src: RegSlot, site: u16) {
        self.op(Opcode::StProp);
        self.u16(obj);
        self.u16(prop);
        self.u16(src);
        self.u16(site);
    }

    pub fn emit_ld_elem(&mut self, dst: RegSlot, obj: RegSlot, index: RegSlot, site: u16) {
        self.op(Opcode::LdElem);
        self.u16(dst);
        self.u16(obj);
        self.u16(index);
        self.u16(site);
    }

    pub fn emit_st_elem(&mut self, obj: RegSlot, index: RegSlot, src: RegSlot, site: u16) {
        self.op(Opcode::StElem);
        self.u16(obj);
        self.u16(index);
        self.u16(src);
        self.u16(site);
    }

    pub fn emit_ld_slot(&mut self, dst: RegSlot, slot: u16) {
        self.op(Opcode::LdSlot);
        self.u16(dst);
        self.u16(slot);
    }

    pub fn emit_st_slot(&mut self, slot: u16, src: RegSlot) {
        self.op(Opcode::StSlot);
        self.u16(slot);
        self.u16(src);
    }

    pub fn emit_start_call(&mut self, argc: u16) {
        self.op(Opcode::StartCall);
        self.u16(argc);
    }

    pub fn emit_arg_out(&mut self, arg: u16, src: RegSlot) {
        self.op(Opcode::ArgOut);
        self.u16(arg);
        self.u16(src);
    }

    pub fn emit_call(&mut self, dst: RegSlot, callee: RegSlot, argc: u16, site: u16) {
        self.op(Opcode::Call);
        self.u16(dst);
        self.u16(callee);
        self.u16(argc);
        self.u16(site);
    }

    pub fn emit_new(&mut self, dst: RegSlot, ctor: RegSlot, argc: u16, site: u16) {
        self.op(Opcode::New);
        self.u16(dst);
        self.u16(ctor);
        self.u16(argc);
        self.u16(site);
    }

    pub fn emit_ret(&mut self, src: RegSlot) {
        self.op(Opcode::Ret);
        self.u16(src);
    }

    /// Emit an unconditional branch with an unresolved forward target
    pub fn emit_br(&mut self) -> PatchSite {
        self.op(Opcode::Br);
        self.target_slot()
    }

    /// Emit an unconditional branch to a known (usually backward) target
    pub fn emit_br_to(&mut self, target: u32) {
        self.op(Opcode::Br);
        self.u32(target);
    }

    pub fn emit_br_true(&mut self, src: RegSlot) -> PatchSite {
        self.op(Opcode::BrTrue);
        self.u16(src);
        self.target_slot()
    }

    pub fn emit_br_true_to(&mut self, src: RegSlot, target: u32) {
        self.op(Opcode::BrTrue);
        self.u16(src);
        self.u32(target);
    }

    pub fn emit_br_false(&mut self, src: RegSlot) -> PatchSite {
        self.op(Opcode::BrFalse);
        self.u16(src);
        self.target_slot()
    }

    pub fn emit_br_false_to(&mut self, src: RegSlot, target: u32) {
        self.op(Opcode::BrFalse);
        self.u16(src);
        self.u32(target);
    }

    /// Emit a multi-way branch with `cases` unresolved case targets plus an
    /// unresolved default target (returned last)
    pub fn emit_switch(&mut self, src: RegSlot, cases: u16) -> Vec<PatchSite> {
        self.op(Opcode::Switch);
        self.u16(src);
        self.u16(cases);
        let mut sites = Vec::with_capacity(cases as usize + 1);
        for _ in 0..cases {
            sites.push(self.target_slot());
        }
        sites.push(self.target_slot());
        sites
    }

    pub fn emit_throw(&mut self, src: RegSlot) {
        self.op(Opcode::Throw);
        self.u16(src);
    }

    /// Open an exception region; the handler target must be patched
    pub fn emit_try_begin(&mut self) -> PatchSite {
        self.op(Opcode::TryBegin);
        self.target_slot()
    }

    pub fn emit_try_end(&mut self) {
        self.op(Opcode::TryEnd);
    }

    /// Emit a yield point, recording the resume offset after it
    pub fn emit_yield(&mut self, src: RegSlot) {
        self.op(Opcode::Yield);
        self.u16(src);
        let resume = self.offset();
        self.yield_resume_offsets.push(resume);
    }

    /// Open a loop region; returns the loop number
    pub fn begin_loop(&mut self) -> u16 {
        let loop_num = self.loops.len() as u16;
        self.op(Opcode::LoopStart);
        self.u16(loop_num);
        self.loops.push(LoopHeader {
            start: self.offset(),
            end: u32::MAX,
        });
        self.open_loops.push(loop_num);
        loop_num
    }

    /// Close the innermost open loop region
    pub fn end_loop(&mut self) {
        let loop_num = self.open_loops.pop().expect("end_loop without begin_loop");
        self.op(Opcode::LoopEnd);
        self.u16(loop_num);
        self.loops[loop_num as usize].end = self.offset();
    }

    /// Resolve a forward-branch placeholder to `target`
    pub fn patch(&mut self, site: PatchSite, target: u32) {
        let at = site.0 as usize;
        self.code[at..at + 4].copy_from_slice(&target.to_le_bytes());
        self.unpatched -= 1;
    }

    /// Resolve a forward-branch placeholder to the current offset
    pub fn patch_here(&mut self, site: PatchSite) {
        let target = self.offset();
        self.patch(site, target);
    }

    /// Finish the body
    ///
    /// Panics if a branch placeholder or loop region was left open; an
    /// unfinished stream is a producer bug, not an input condition the
    /// backend should ever see.
    pub fn build(self) -> FunctionBody {
        assert_eq!(self.unpatched, 0, "unpatched branch target");
        assert!(self.open_loops.is_empty(), "unclosed loop region");
        let const_count = self.consts.len() as u16;
        let first_temp = const_count + self.param_count + self.local_count;
        let reg_count = first_temp + self.temp_count;
        FunctionBody::new(
            self.name,
            self.code,
            self.consts,
            self.param_count,
            first_temp,
            reg_count,
            self.env_reg,
            self.closure_reg,
            self.scope_slot_count,
            self.uses_scope_object,
            self.has_func_expr_scope,
            self.stack_closures,
            self.is_generator,
            self.yield_resume_offsets,
            self.loops,
            self.statements,
            self.next_site,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_forward_branch() {
        let mut b = FunctionBodyBuilder::new("f").temps(1);
        let t0 = b.temp_reg(0);
        let site = b.emit_br_true(t0);
        b.emit_nop();
        b.patch_here(site);
        b.emit_ret(t0);
        let body = b.build();
        // brtrue = 1 + 2 + 4 bytes, nop = 1 byte; target must be offset 8
        assert_eq!(&body.code()[3..7], &8u32.to_le_bytes());
    }

    #[test]
    #[should_panic(expected = "unpatched branch target")]
    fn unpatched_branch_panics() {
        let mut b = FunctionBodyBuilder::new("f").temps(1);
        let t0 = b.temp_reg(0);
        let _site = b.emit_br_true(t0);
        b.build();
    }

    #[test]
    fn loop_region_records_header() {
        let mut b = FunctionBodyBuilder::new("f").locals(1).temps(1);
        let x = b.local_reg(0);
        b.emit_nop();
        let loop_num = b.begin_loop();
        let top = b.offset();
        b.emit_mov(x, x);
        b.emit_br_to(top);
        b.end_loop();
        b.emit_ret(x);
        let body = b.build();
        let header = body.loop_header(loop_num).unwrap();
        assert_eq!(header.start, top);
        assert!(header.end > header.start);
    }

    #[test]
    fn yield_records_resume_offset() {
        let mut b = FunctionBodyBuilder::new("g").temps(1).generator();
        let t0 = b.temp_reg(0);
        b.emit_yield(t0);
        let resume = b.offset();
        b.emit_ret(t0);
        let body = b.build();
        assert_eq!(body.yield_resume_offsets(), &[resume]);
    }
}
