//! Sequential bytecode decoding
//!
//! [`BytecodeReader`] walks an encoded instruction stream with an explicit
//! cursor, producing one [`DecodedInstr`] per step. The final offset differs
//! by unit kind: a whole-function unit reads to the end of the stream, a
//! loop-body unit reads only the loop header's range.
//!
//! Decode failures (unknown opcode byte, truncated operands) indicate a
//! malformed stream from the producer. They are surfaced as [`DecodeError`]
//! and treated as fatal by the caller; the backend never attempts recovery.

use smallvec::SmallVec;

use super::{FunctionBody, Opcode, RegSlot, StatementBoundary};

/// Decode failure for a malformed instruction stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Byte at `offset` is not a valid opcode
    UnknownOpcode { byte: u8, offset: u32 },
    /// Stream ended inside an instruction starting at `offset`
    Truncated { offset: u32 },
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownOpcode { byte, offset } => {
                write!(f, "unknown opcode byte {:#04x} at offset {}", byte, offset)
            }
            Self::Truncated { offset } => {
                write!(f, "truncated instruction at offset {}", offset)
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// One decoded instruction with its source offset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedInstr {
    pub opcode: Opcode,
    /// Offset of the opcode byte
    pub offset: u32,
    pub operands: Operands,
}

/// Operand payload, one variant per operand layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operands {
    None,
    /// Ret, Throw, Yield
    Src { src: RegSlot },
    /// StartCall, LoopStart, LoopEnd
    Count { count: u16 },
    /// Mov, Neg, Not
    DstSrc { dst: RegSlot, src: RegSlot },
    /// Binary arithmetic and comparisons
    DstSrcSrc {
        dst: RegSlot,
        src1: RegSlot,
        src2: RegSlot,
    },
    /// LdProp
    PropLoad {
        dst: RegSlot,
        obj: RegSlot,
        prop: u16,
        site: u16,
    },
    /// StProp
    PropStore {
        obj: RegSlot,
        prop: u16,
        src: RegSlot,
        site: u16,
    },
    /// LdElem
    ElemLoad {
        dst: RegSlot,
        obj: RegSlot,
        index: RegSlot,
        site: u16,
    },
    /// StElem
    ElemStore {
        obj: RegSlot,
        index: RegSlot,
        src: RegSlot,
        site: u16,
    },
    /// LdSlot
    SlotLoad { dst: RegSlot, slot: u16 },
    /// StSlot
    SlotStore { slot: u16, src: RegSlot },
    /// ArgOut
    ArgOut { arg: u16, src: RegSlot },
    /// Call, New
    CallLike {
        dst: RegSlot,
        callee: RegSlot,
        argc: u16,
        site: u16,
    },
    /// Br, TryBegin
    Target { target: u32 },
    /// BrTrue, BrFalse
    SrcTarget { src: RegSlot, target: u32 },
    /// Switch
    Switch {
        src: RegSlot,
        cases: SmallVec<[u32; 4]>,
        default: u32,
    },
}

/// Explicit-cursor reader over one bytecode unit
#[derive(Debug)]
pub struct BytecodeReader<'a> {
    code: &'a [u8],
    cursor: u32,
    end: u32,
}

impl<'a> BytecodeReader<'a> {
    /// Reader over a whole function body
    pub fn new(body: &'a FunctionBody) -> Self {
        BytecodeReader {
            code: body.code(),
            cursor: 0,
            end: body.code_len(),
        }
    }

    /// Reader over a sub-range, used for loop-body units
    pub fn for_range(body: &'a FunctionBody, start: u32, end: u32) -> Self {
        debug_assert!(start <= end && end <= body.code_len());
        BytecodeReader {
            code: body.code(),
            cursor: start,
            end,
        }
    }

    /// Current cursor position
    #[inline]
    pub fn current_offset(&self) -> u32 {
        self.cursor
    }

    /// Final offset of this unit, exclusive
    #[inline]
    pub fn end_offset(&self) -> u32 {
        self.end
    }

    /// True once the cursor reached the unit's final offset
    #[inline]
    pub fn at_end(&self) -> bool {
        self.cursor >= self.end
    }

    fn read_u8(&mut self, start: u32) -> Result<u8, DecodeError> {
        let at = self.cursor as usize;
        if at >= self.end as usize {
            return Err(DecodeError::Truncated { offset: start });
        }
        self.cursor += 1;
        Ok(self.code[at])
    }

    fn read_u16(&mut self, start: u32) -> Result<u16, DecodeError> {
        let at = self.cursor as usize;
        if at + 2 > self.end as usize {
            return Err(DecodeError::Truncated { offset: start });
        }
        self.cursor += 2;
        Ok(u16::from_le_bytes([self.code[at], self.code[at + 1]]))
    }

    fn read_u32(&mut self, start: u32) -> Result<u32, DecodeError> {
        let at = self.cursor as usize;
        if at + 4 > self.end as usize {
            return Err(DecodeError::Truncated { offset: start });
        }
        self.cursor += 4;
        Ok(u32::from_le_bytes([
            self.code[at],
            self.code[at + 1],
            self.code[at + 2],
            self.code[at + 3],
        ]))
    }

    /// Decode the instruction at the cursor and advance past it
    pub fn read_instr(&mut self) -> Result<DecodedInstr, DecodeError> {
        let offset = self.cursor;
        let byte = self.read_u8(offset)?;
        let opcode =
            Opcode::from_byte(byte).ok_or(DecodeError::UnknownOpcode { byte, offset })?;

        use Opcode::*;
        let operands = match opcode {
            Nop | TryEnd => Operands::None,
            Ret | Throw | Yield => Operands::Src {
                src: self.read_u16(offset)?,
            },
            StartCall | LoopStart | LoopEnd => Operands::Count {
                count: self.read_u16(offset)?,
            },
            Mov | Neg | Not => Operands::DstSrc {
                dst: self.read_u16(offset)?,
                src: self.read_u16(offset)?,
            },
            Add | Sub | Mul | Div | Mod | CmpEq | CmpLt | CmpGt => Operands::DstSrcSrc {
                dst: self.read_u16(offset)?,
                src1: self.read_u16(offset)?,
                src2: self.read_u16(offset)?,
            },
            LdProp => Operands::PropLoad {
                dst: self.read_u16(offset)?,
                obj: self.read_u16(offset)?,
                prop: self.read_u16(offset)?,
                site: self.read_u16(offset)?,
            },
            StProp => Operands::PropStore {
                obj: self.read_u16(offset)?,
                prop: self.read_u16(offset)?,
                src: self.read_u16(offset)?,
                site: self.read_u16(offset)?,
            },
            LdElem => Operands::ElemLoad {
                dst: self.read_u16(offset)?,
                obj: self.read_u16(offset)?,
                index: self.read_u16(offset)?,
                site: self.read_u16(offset)?,
            },
            StElem => Operands::ElemStore {
                obj: self.read_u16(offset)?,
                index: self.read_u16(offset)?,
                src: self.read_u16(offset)?,
                site: self.read_u16(offset)?,
            },
            LdSlot => Operands::SlotLoad {
                dst: self.read_u16(offset)?,
                slot: self.read_u16(offset)?,
            },
            StSlot => Operands::SlotStore {
                slot: self.read_u16(offset)?,
                src: self.read_u16(offset)?,
            },
            ArgOut => Operands::ArgOut {
                arg: self.read_u16(offset)?,
                src: self.read_u16(offset)?,
            },
            Call | New => Operands::CallLike {
                dst: self.read_u16(offset)?,
                callee: self.read_u16(offset)?,
                argc: self.read_u16(offset)?,
                site: self.read_u16(offset)?,
            },
            Br | TryBegin => Operands::Target {
                target: self.read_u32(offset)?,
            },
            BrTrue | BrFalse => Operands::SrcTarget {
                src: self.read_u16(offset)?,
                target: self.read_u32(offset)?,
            },
            Switch => {
                let src = self.read_u16(offset)?;
                let count = self.read_u16(offset)?;
                let mut cases = SmallVec::with_capacity(count as usize);
                for _ in 0..count {
                    cases.push(self.read_u32(offset)?);
                }
                let default = self.read_u32(offset)?;
                Operands::Switch {
                    src,
                    cases,
                    default,
                }
            }
        };

        Ok(DecodedInstr {
            opcode,
            offset,
            operands,
        })
    }
}

/// Cursor over the parallel statement-boundary stream
///
/// Boundaries are consumed in order; each is reported exactly once, at the
/// first instruction offset at or past it.
#[derive(Debug)]
pub struct StatementReader<'a> {
    boundaries: &'a [StatementBoundary],
    index: usize,
}

impl<'a> StatementReader<'a> {
    pub fn new(body: &'a FunctionBody) -> Self {
        StatementReader {
            boundaries: body.statements(),
            index: 0,
        }
    }

    /// Skip boundaries before `offset`; used when starting mid-stream for a
    /// loop-body unit
    pub fn seek(&mut self, offset: u32) {
        while self
            .boundaries
            .get(self.index)
            .is_some_and(|b| b.offset < offset)
        {
            self.index += 1;
        }
    }

    /// Consume and return the next boundary if it starts at or before
    /// `offset`
    pub fn boundary_at(&mut self, offset: u32) -> Option<u32> {
        let next = self.boundaries.get(self.index)?;
        if next.offset <= offset {
            self.index += 1;
            Some(next.statement)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::FunctionBodyBuilder;

    #[test]
    fn decode_simple_stream() {
        let mut b = FunctionBodyBuilder::new("f").locals(2).temps(1);
        let x = b.local_reg(0);
        let y = b.local_reg(1);
        let t = b.temp_reg(0);
        b.emit_bin(Opcode::Add, t, x, y);
        b.emit_ret(t);
        let body = b.build();

        let mut reader = BytecodeReader::new(&body);
        let add = reader.read_instr().unwrap();
        assert_eq!(add.opcode, Opcode::Add);
        assert_eq!(
            add.operands,
            Operands::DstSrcSrc {
                dst: t,
                src1: x,
                src2: y
            }
        );
        let ret = reader.read_instr().unwrap();
        assert_eq!(ret.opcode, Opcode::Ret);
        assert!(reader.at_end());
    }

    #[test]
    fn decode_switch_targets() {
        let mut b = FunctionBodyBuilder::new("f").temps(1);
        let t = b.temp_reg(0);
        let sites = b.emit_switch(t, 2);
        for site in sites {
            b.patch_here(site);
        }
        b.emit_ret(t);
        let body = b.build();

        let mut reader = BytecodeReader::new(&body);
        let instr = reader.read_instr().unwrap();
        match instr.operands {
            Operands::Switch { cases, default, .. } => {
                assert_eq!(cases.len(), 2);
                assert_eq!(cases[0], cases[1]);
                assert_eq!(default, cases[0]);
            }
            other => panic!("expected switch operands, got {:?}", other),
        }
    }

    #[test]
    fn truncated_stream_is_an_error() {
        let mut b = FunctionBodyBuilder::new("f").temps(1);
        let t = b.temp_reg(0);
        b.emit_ret(t);
        let body = b.build();

        // Cut the reader off mid-instruction.
        let mut reader = BytecodeReader::for_range(&body, 0, 2);
        assert_eq!(
            reader.read_instr(),
            Err(DecodeError::Truncated { offset: 0 })
        );
    }

    #[test]
    fn statement_reader_consumes_in_order() {
        let mut b = FunctionBodyBuilder::new("f").temps(1);
        let t = b.temp_reg(0);
        b.statement(0);
        b.emit_nop();
        b.statement(1);
        b.emit_ret(t);
        let body = b.build();

        let mut statements = StatementReader::new(&body);
        assert_eq!(statements.boundary_at(0), Some(0));
        assert_eq!(statements.boundary_at(0), None);
        assert_eq!(statements.boundary_at(1), Some(1));
        assert_eq!(statements.boundary_at(1), None);
    }
}
