//! Arena-backed instruction list
//!
//! All IR nodes of one compile attempt live in a single arena and are
//! addressed by [`InstrId`]; prev/next links give doubly-linked-list
//! splicing without shared ownership. The list is always bounded by the
//! Entry and Exit sentinels, created up front and never removed.

use super::instr::{Instr, InstrKind, OpCode};

/// Arena index of one instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstrId(u32);

impl InstrId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// The instruction arena and list of one compile attempt
#[derive(Debug)]
pub struct IrBody {
    arena: Vec<Instr>,
    head: InstrId,
    tail: InstrId,
}

impl IrBody {
    /// Create a list holding only the Entry and Exit sentinels
    pub fn new() -> Self {
        let mut body = IrBody {
            arena: Vec::with_capacity(64),
            head: InstrId(0),
            tail: InstrId(1),
        };
        let entry = Instr {
            kind: InstrKind::Entry,
            ..Instr::new(OpCode::FunctionEntry, None, None, None)
        };
        let exit = Instr {
            kind: InstrKind::Exit,
            ..Instr::new(OpCode::FunctionExit, None, None, None)
        };
        let entry_id = body.alloc(entry);
        let exit_id = body.alloc(exit);
        body.arena[entry_id.index()].next = Some(exit_id);
        body.arena[exit_id.index()].prev = Some(entry_id);
        body.head = entry_id;
        body.tail = exit_id;
        body
    }

    fn alloc(&mut self, instr: Instr) -> InstrId {
        let id = InstrId(self.arena.len() as u32);
        self.arena.push(instr);
        id
    }

    /// Entry sentinel
    pub fn entry(&self) -> InstrId {
        self.head
    }

    /// Exit sentinel
    pub fn exit(&self) -> InstrId {
        self.tail
    }

    pub fn get(&self, id: InstrId) -> &Instr {
        &self.arena[id.index()]
    }

    pub fn get_mut(&mut self, id: InstrId) -> &mut Instr {
        &mut self.arena[id.index()]
    }

    pub fn next(&self, id: InstrId) -> Option<InstrId> {
        self.get(id).next
    }

    pub fn prev(&self, id: InstrId) -> Option<InstrId> {
        self.get(id).prev
    }

    /// Insert `instr` immediately after `at`
    pub fn insert_after(&mut self, at: InstrId, instr: Instr) -> InstrId {
        let id = self.alloc(instr);
        let after = self.arena[at.index()].next;
        self.arena[id.index()].prev = Some(at);
        self.arena[id.index()].next = after;
        self.arena[at.index()].next = Some(id);
        if let Some(after) = after {
            self.arena[after.index()].prev = Some(id);
        }
        id
    }

    /// Insert `instr` immediately before `at`
    pub fn insert_before(&mut self, at: InstrId, instr: Instr) -> InstrId {
        let before = self.arena[at.index()].prev.expect("insert before entry sentinel");
        self.insert_after(before, instr)
    }

    /// Previous instruction skipping pragmas, the shape label reuse checks
    pub fn prev_real(&self, id: InstrId) -> Option<InstrId> {
        let mut cur = self.prev(id);
        while let Some(at) = cur {
            if self.get(at).is_real() {
                return Some(at);
            }
            cur = self.prev(at);
        }
        None
    }

    /// Iterate instruction ids from Entry to Exit
    pub fn iter_ids(&self) -> impl Iterator<Item = InstrId> + '_ {
        let mut cur = Some(self.head);
        std::iter::from_fn(move || {
            let id = cur?;
            cur = self.next(id);
            Some(id)
        })
    }

    /// Iterate instructions from Entry to Exit
    pub fn iter(&self) -> impl Iterator<Item = &Instr> {
        self.iter_ids().map(move |id| self.get(id))
    }

    /// Number of instructions in the list, sentinels included
    pub fn len(&self) -> usize {
        self.iter_ids().count()
    }

    pub fn is_empty(&self) -> bool {
        false // sentinels are always present
    }
}

impl Default for IrBody {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::instr::Opnd;
    use crate::sym::SymId;

    #[test]
    fn sentinels_bound_the_list() {
        let body = IrBody::new();
        let ids: Vec<_> = body.iter_ids().collect();
        assert_eq!(ids, vec![body.entry(), body.exit()]);
        assert_eq!(body.get(body.entry()).opcode, OpCode::FunctionEntry);
        assert_eq!(body.get(body.exit()).opcode, OpCode::FunctionExit);
    }

    #[test]
    fn insert_after_links_both_ways() {
        let mut body = IrBody::new();
        let a = body.insert_after(
            body.entry(),
            Instr::new(OpCode::Ld, Some(Opnd::Reg(SymId(1))), None, None),
        );
        let b = body.insert_after(a, Instr::new(OpCode::Ret, None, None, None));
        assert_eq!(body.next(body.entry()), Some(a));
        assert_eq!(body.prev(b), Some(a));
        assert_eq!(body.next(b), Some(body.exit()));
        assert_eq!(body.len(), 4);
    }

    #[test]
    fn prev_real_skips_pragmas() {
        let mut body = IrBody::new();
        let label = body.insert_after(body.entry(), Instr::label());
        let pragma = body.insert_after(label, Instr::pragma(0));
        let after = body.insert_after(pragma, Instr::new(OpCode::Ret, None, None, None));
        assert_eq!(body.prev_real(after), Some(label));
    }
}
