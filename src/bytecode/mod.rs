//! Bytecode input model
//!
//! A [`FunctionBody`] is the immutable unit of work handed to the backend:
//! the encoded instruction stream plus the metadata the IR builder needs
//! (register file layout, constant pool, loop header table, statement
//! boundaries, closure attributes). Bodies are immutable after construction
//! and can be shared across compile attempts and threads.
//!
//! The register file is split into three contiguous ranges:
//!
//! ```text
//! [0, const_count)            constant registers, preloaded in the preamble
//! [const_count, first_temp)   named locals and parameters
//! [first_temp, reg_count)     expression temporaries, reused between defs
//! ```

pub mod opcodes;
pub mod reader;
pub mod writer;

pub use opcodes::Opcode;
pub use reader::{BytecodeReader, DecodeError, DecodedInstr, Operands, StatementReader};
pub use writer::{FunctionBodyBuilder, PatchSite};

/// Interpreter virtual register index
pub type RegSlot = u16;

/// Constant pool value
///
/// The backend treats constants opaquely; it only needs enough structure to
/// preload constant registers and feed advisory bits to later passes.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    Num(f64),
    Str(String),
}

impl ConstValue {
    /// True when later passes may treat the value as a tagged integer
    pub fn is_int(&self) -> bool {
        matches!(self, ConstValue::Int(_))
    }
}

/// Byte offset range of one interpreter loop, inclusive start, exclusive end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopHeader {
    pub start: u32,
    pub end: u32,
}

impl LoopHeader {
    /// True if `offset` falls inside this loop's bytecode range
    pub fn contains(&self, offset: u32) -> bool {
        offset >= self.start && offset < self.end
    }
}

/// One entry of the parallel statement-boundary stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatementBoundary {
    /// Bytecode offset the statement starts at
    pub offset: u32,
    /// Source statement index for debugger/profiler attribution
    pub statement: u32,
}

/// An immutable compiled function body
///
/// Produced by the front end (or [`FunctionBodyBuilder`] in tests) and
/// consumed read-only by every compile attempt.
#[derive(Debug, Clone)]
pub struct FunctionBody {
    /// Function name, for diagnostics only
    name: String,
    /// Encoded instruction stream
    code: Vec<u8>,
    /// Constant pool; constant register `r` holds `consts[r]`
    consts: Vec<ConstValue>,
    /// Number of declared parameters, stored in the first named registers
    in_param_count: u16,
    /// First temporary register index
    first_temp_reg: RegSlot,
    /// Total register count
    reg_count: RegSlot,
    /// Register receiving the enclosing environment, if the function closes
    /// over one
    env_reg: Option<RegSlot>,
    /// Register holding the closure scope storage pointer, defined by the
    /// entry prologue and bridged through the frame for loop-body units
    closure_reg: Option<RegSlot>,
    /// Number of closure scope slots to allocate at entry (0 = none)
    scope_slot_count: u16,
    /// Allocate a scope object instead of a flat slot array
    uses_scope_object: bool,
    /// Function expressions with a named self-reference get a pseudo-scope
    has_func_expr_scope: bool,
    /// Persist closure pointers into reserved stack slots at entry
    stack_closures: bool,
    /// Generator function: the preamble emits a resume dispatch
    is_generator: bool,
    /// Bytecode offsets execution resumes at, one per yield point
    yield_resume_offsets: Vec<u32>,
    /// Loop header table, indexed by loop number
    loops: Vec<LoopHeader>,
    /// Statement boundaries, sorted by offset
    statements: Vec<StatementBoundary>,
    /// Number of profiled sites (property/element accesses and call sites)
    site_count: u16,
}

impl FunctionBody {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: String,
        code: Vec<u8>,
        consts: Vec<ConstValue>,
        in_param_count: u16,
        first_temp_reg: RegSlot,
        reg_count: RegSlot,
        env_reg: Option<RegSlot>,
        closure_reg: Option<RegSlot>,
        scope_slot_count: u16,
        uses_scope_object: bool,
        has_func_expr_scope: bool,
        stack_closures: bool,
        is_generator: bool,
        yield_resume_offsets: Vec<u32>,
        loops: Vec<LoopHeader>,
        statements: Vec<StatementBoundary>,
        site_count: u16,
    ) -> Self {
        debug_assert!(consts.len() <= first_temp_reg as usize);
        debug_assert!(first_temp_reg <= reg_count);
        FunctionBody {
            name,
            code,
            consts,
            in_param_count,
            first_temp_reg,
            reg_count,
            env_reg,
            closure_reg,
            scope_slot_count,
            uses_scope_object,
            has_func_expr_scope,
            stack_closures,
            is_generator,
            yield_resume_offsets,
            loops,
            statements,
            site_count,
        }
    }

    /// Function name for diagnostics
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The encoded instruction stream
    #[inline]
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// Total stream length in bytes
    #[inline]
    pub fn code_len(&self) -> u32 {
        self.code.len() as u32
    }

    /// Constant pool
    pub fn consts(&self) -> &[ConstValue] {
        &self.consts
    }

    /// Number of constant registers
    #[inline]
    pub fn const_count(&self) -> RegSlot {
        self.consts.len() as RegSlot
    }

    /// Number of declared parameters
    pub fn in_param_count(&self) -> u16 {
        self.in_param_count
    }

    /// First register a parameter lands in
    pub fn first_param_reg(&self) -> RegSlot {
        self.const_count()
    }

    /// First temporary register index
    #[inline]
    pub fn first_temp_reg(&self) -> RegSlot {
        self.first_temp_reg
    }

    /// Total register count
    #[inline]
    pub fn reg_count(&self) -> RegSlot {
        self.reg_count
    }

    /// Number of temporary registers
    #[inline]
    pub fn temp_count(&self) -> usize {
        (self.reg_count - self.first_temp_reg) as usize
    }

    /// True if `reg` is a reusable expression temporary
    #[inline]
    pub fn reg_is_temp(&self, reg: RegSlot) -> bool {
        reg >= self.first_temp_reg
    }

    /// True if `reg` is a preloaded constant register
    #[inline]
    pub fn reg_is_const(&self, reg: RegSlot) -> bool {
        reg < self.const_count()
    }

    /// Environment register, if any
    pub fn env_reg(&self) -> Option<RegSlot> {
        self.env_reg
    }

    /// Closure scope storage register, if the function has one
    pub fn closure_reg(&self) -> Option<RegSlot> {
        self.closure_reg
    }

    /// Closure scope slot count (0 = no scope storage)
    pub fn scope_slot_count(&self) -> u16 {
        self.scope_slot_count
    }

    /// Scope object instead of a flat slot array
    pub fn uses_scope_object(&self) -> bool {
        self.uses_scope_object
    }

    /// Function-expression pseudo-scope required
    pub fn has_func_expr_scope(&self) -> bool {
        self.has_func_expr_scope
    }

    /// Stack allocation of closures enabled for this function
    pub fn stack_closures(&self) -> bool {
        self.stack_closures
    }

    /// Generator function
    pub fn is_generator(&self) -> bool {
        self.is_generator
    }

    /// Resume offsets, one per yield point, in source order
    pub fn yield_resume_offsets(&self) -> &[u32] {
        &self.yield_resume_offsets
    }

    /// Loop header table, indexed by loop number
    pub fn loops(&self) -> &[LoopHeader] {
        &self.loops
    }

    /// Loop header for `loop_num`, if in range
    pub fn loop_header(&self, loop_num: u16) -> Option<LoopHeader> {
        self.loops.get(loop_num as usize).copied()
    }

    /// Statement-boundary table, sorted by offset
    pub fn statements(&self) -> &[StatementBoundary] {
        &self.statements
    }

    /// Number of profiled sites in this body
    pub fn site_count(&self) -> u16 {
        self.site_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_ranges() {
        let body = FunctionBodyBuilder::new("f")
            .consts(vec![ConstValue::Undefined, ConstValue::Int(1)])
            .params(1)
            .locals(2)
            .temps(3)
            .build();
        // consts = [0,1], params/locals = [2,4], temps = [5,7]
        assert_eq!(body.const_count(), 2);
        assert_eq!(body.first_temp_reg(), 5);
        assert_eq!(body.reg_count(), 8);
        assert!(body.reg_is_const(1));
        assert!(!body.reg_is_const(2));
        assert!(body.reg_is_temp(5));
        assert!(!body.reg_is_temp(4));
        assert_eq!(body.temp_count(), 3);
    }

    #[test]
    fn loop_header_contains() {
        let header = LoopHeader { start: 10, end: 30 };
        assert!(header.contains(10));
        assert!(header.contains(29));
        assert!(!header.contains(30));
        assert!(!header.contains(9));
    }
}
