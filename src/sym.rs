//! IR symbols and the per-compile symbol table
//!
//! A [`Symbol`] is an IR-level named value. Named interpreter registers map
//! to the symbol whose id equals their register index; temporaries and
//! compiler-introduced values take fresh ids above the register range, so a
//! single reused temp register can fan out into many symbols over one
//! compile.
//!
//! The table is owned exclusively by one compile attempt. Inlined records
//! mint their fresh ids above a floor handed down from the parent, which
//! keeps symbol ids disjoint across the record tree and makes the
//! created-here-or-in-an-ancestor invariant checkable by id range alone.

use crate::bytecode::RegSlot;

/// Symbol identifier, unique within one compile attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymId(pub u32);

impl std::fmt::Display for SymId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Value type tag carried for later passes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SymType {
    /// Boxed dynamic value
    #[default]
    Var,
    /// Raw 32-bit integer (loop counters, resume offsets)
    Int32,
    /// Machine pointer (frame displays, scope storage)
    MachPtr,
}

/// Stack allocation state
///
/// The register allocator assigns offsets later; this core only assigns the
/// few pre-reserved slots (closure spills) directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllocState {
    #[default]
    Unallocated,
    /// Byte offset into the frame's spill area
    Stack(i32),
}

/// One IR-level named value
#[derive(Debug, Clone)]
pub struct Symbol {
    id: SymId,
    /// Source virtual register, absent for compiler-introduced temporaries
    byte_code_reg: Option<RegSlot>,
    ty: SymType,
    alloc: AllocState,
    def_count: u32,
    /// Advisory: holds a constant-register value
    pub is_const: bool,
    /// Advisory: later passes must not int-specialize this symbol
    pub is_not_int: bool,
    /// Advisory: known to hold a valid `this` binding
    pub is_safe_this: bool,
}

impl Symbol {
    pub fn id(&self) -> SymId {
        self.id
    }

    pub fn byte_code_reg(&self) -> Option<RegSlot> {
        self.byte_code_reg
    }

    pub fn ty(&self) -> SymType {
        self.ty
    }

    pub fn alloc(&self) -> AllocState {
        self.alloc
    }

    /// Defined at most once so far
    pub fn is_single_def(&self) -> bool {
        self.def_count <= 1
    }

    pub fn def_count(&self) -> u32 {
        self.def_count
    }
}

/// Per-compile symbol table
///
/// Mints and looks up symbols by id. Ids below the register count are
/// reserved for named registers; fresh ids start at the table's floor.
#[derive(Debug)]
pub struct SymbolTable {
    /// Indexed by symbol id; named-register slots stay `None` until first
    /// touched
    syms: Vec<Option<Symbol>>,
    /// First id available for fresh symbols
    next_id: u32,
    /// Ids at or above this were minted by this table (below: named
    /// registers, owned here too for top-level records)
    id_floor: u32,
    reg_count: u32,
}

impl SymbolTable {
    /// Table for a top-level or loop-body record
    pub fn new(reg_count: RegSlot) -> Self {
        Self::with_floor(reg_count, reg_count as u32)
    }

    /// Table for an inlined record, minting fresh ids at or above `floor`
    pub fn with_floor(reg_count: RegSlot, floor: u32) -> Self {
        let floor = floor.max(reg_count as u32);
        SymbolTable {
            syms: Vec::new(),
            next_id: floor,
            id_floor: floor,
            reg_count: reg_count as u32,
        }
    }

    fn slot_mut(&mut self, id: SymId) -> &mut Option<Symbol> {
        let index = id.0 as usize;
        if index >= self.syms.len() {
            self.syms.resize(index + 1, None);
        }
        &mut self.syms[index]
    }

    /// Look up a symbol by id
    pub fn find(&self, id: SymId) -> Option<&Symbol> {
        self.syms.get(id.0 as usize).and_then(|s| s.as_ref())
    }

    /// Look up a symbol by id, mutable
    pub fn find_mut(&mut self, id: SymId) -> Option<&mut Symbol> {
        self.syms.get_mut(id.0 as usize).and_then(|s| s.as_mut())
    }

    /// Find the symbol with this exact id, creating it if absent
    ///
    /// Used for named registers (id == register index) and for temp
    /// generations whose id was minted earlier.
    pub fn find_or_create(&mut self, id: SymId, reg: Option<RegSlot>, ty: SymType) -> &mut Symbol {
        let slot = self.slot_mut(id);
        slot.get_or_insert_with(|| Symbol {
            id,
            byte_code_reg: reg,
            ty,
            alloc: AllocState::Unallocated,
            def_count: 0,
            is_const: false,
            is_not_int: false,
            is_safe_this: false,
        })
    }

    /// Mint a fresh compiler-introduced symbol with no source register
    pub fn mint(&mut self, ty: SymType) -> SymId {
        self.mint_with_reg(None, ty)
    }

    /// Mint a fresh symbol remembering its source register (temp
    /// generations)
    pub fn mint_with_reg(&mut self, reg: Option<RegSlot>, ty: SymType) -> SymId {
        let id = SymId(self.next_id);
        self.next_id += 1;
        *self.slot_mut(id) = Some(Symbol {
            id,
            byte_code_reg: reg,
            ty,
            alloc: AllocState::Unallocated,
            def_count: 0,
            is_const: false,
            is_not_int: false,
            is_safe_this: false,
        });
        id
    }

    /// Record a definition of `id`; resets the safe-this advisory on
    /// multi-def
    pub fn record_def(&mut self, id: SymId) {
        if let Some(sym) = self.find_mut(id) {
            sym.def_count += 1;
            if sym.def_count > 1 {
                sym.is_safe_this = false;
            }
        }
    }

    /// Assign a pre-reserved stack offset directly
    pub fn assign_stack_offset(&mut self, id: SymId, offset: i32) {
        if let Some(sym) = self.find_mut(id) {
            sym.alloc = AllocState::Stack(offset);
        }
    }

    /// True if `id` was minted by this table (or is one of its own named
    /// registers)
    pub fn owns(&self, id: SymId) -> bool {
        id.0 >= self.id_floor || id.0 < self.reg_count
    }

    /// One past the highest id this table has handed out
    pub fn next_fresh_id(&self) -> u32 {
        self.next_id
    }

    /// Number of symbols materialized so far
    pub fn len(&self) -> usize {
        self.syms.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate all materialized symbols
    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.syms.iter().filter_map(|s| s.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_and_fresh_ids_are_disjoint() {
        let mut table = SymbolTable::new(8);
        let named = table.find_or_create(SymId(3), Some(3), SymType::Var).id();
        let fresh = table.mint(SymType::Var);
        assert_eq!(named, SymId(3));
        assert!(fresh.0 >= 8);
        assert!(table.owns(named));
        assert!(table.owns(fresh));
    }

    #[test]
    fn floor_partitions_inlined_records() {
        let parent = SymbolTable::new(4);
        let mut child = SymbolTable::with_floor(2, parent.next_fresh_id() + 16);
        let fresh = child.mint(SymType::Var);
        assert!(fresh.0 >= 20);
        assert!(!child.owns(SymId(10)));
    }

    #[test]
    fn multi_def_clears_safe_this() {
        let mut table = SymbolTable::new(4);
        let id = table.mint(SymType::Var);
        table.find_mut(id).unwrap().is_safe_this = true;
        table.record_def(id);
        assert!(table.find(id).unwrap().is_single_def());
        assert!(table.find(id).unwrap().is_safe_this);
        table.record_def(id);
        assert!(!table.find(id).unwrap().is_single_def());
        assert!(!table.find(id).unwrap().is_safe_this);
    }
}
