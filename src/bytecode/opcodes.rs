//! Bytecode opcodes for the Quill VM
//!
//! This module defines the interpreter's instruction set as consumed by the
//! IR builder. Opcodes are grouped by category and assigned contiguous
//! ranges to leave room for future expansion.
//!
//! Operand encoding is little-endian: registers are `u16`, branch targets
//! are absolute `u32` byte offsets, and property/slot/site indices are
//! `u16`. The `Switch` opcode is the only variable-length instruction; its
//! case-target table follows the fixed header.

use std::fmt;

/// Bytecode opcode enumeration
///
/// Each opcode is assigned a unique u8 value. Opcodes are organized into
/// logical groups with reserved ranges for future expansion.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // === Miscellaneous (0x00-0x0F) ===
    /// No operation
    Nop = 0x00,

    // === Moves and Arithmetic (0x10-0x1F) ===
    /// Copy register: dst, src
    Mov = 0x10,
    /// Add: dst, src1, src2
    Add = 0x11,
    /// Subtract: dst, src1, src2
    Sub = 0x12,
    /// Multiply: dst, src1, src2
    Mul = 0x13,
    /// Divide: dst, src1, src2
    Div = 0x14,
    /// Modulus: dst, src1, src2
    Mod = 0x15,
    /// Arithmetic negate: dst, src
    Neg = 0x16,
    /// Logical not: dst, src
    Not = 0x17,
    /// Compare equal: dst, src1, src2
    CmpEq = 0x18,
    /// Compare less-than: dst, src1, src2
    CmpLt = 0x19,
    /// Compare greater-than: dst, src1, src2
    CmpGt = 0x1A,

    // === Property and Element Access (0x20-0x2F) ===
    /// Load property: dst, obj, property id, profile site id
    LdProp = 0x20,
    /// Store property: obj, property id, src, profile site id
    StProp = 0x21,
    /// Load indexed element: dst, obj, index reg, profile site id
    LdElem = 0x22,
    /// Store indexed element: obj, index reg, src, profile site id
    StElem = 0x23,

    // === Scope Slots (0x30-0x3F) ===
    /// Load closure scope slot: dst, slot index
    LdSlot = 0x30,
    /// Store closure scope slot: slot index, src
    StSlot = 0x31,

    // === Call Protocol (0x40-0x4F) ===
    /// Open an argument chain, declaring the outgoing arg count
    StartCall = 0x40,
    /// Stage one outgoing argument: arg index, src
    ArgOut = 0x41,
    /// Invoke: dst, callee, arg count, profile site id
    Call = 0x42,
    /// Construct: dst, ctor, arg count, profile site id
    New = 0x43,
    /// Return: src
    Ret = 0x44,

    // === Control Flow (0x50-0x5F) ===
    /// Unconditional branch: absolute target offset
    Br = 0x50,
    /// Branch if truthy: src, target offset
    BrTrue = 0x51,
    /// Branch if falsy: src, target offset
    BrFalse = 0x52,
    /// Multi-way branch: src, case count, case targets..., default target
    Switch = 0x53,
    /// Raise an exception: src
    Throw = 0x54,
    /// Open an exception region: handler target offset
    TryBegin = 0x55,
    /// Close the innermost exception region
    TryEnd = 0x56,
    /// Suspend a generator: src
    Yield = 0x57,
    /// Loop header marker: loop number
    LoopStart = 0x58,
    /// Loop footer marker: loop number
    LoopEnd = 0x59,
}

impl Opcode {
    /// Decode an opcode from its byte value
    pub fn from_byte(byte: u8) -> Option<Opcode> {
        use Opcode::*;
        Some(match byte {
            0x00 => Nop,
            0x10 => Mov,
            0x11 => Add,
            0x12 => Sub,
            0x13 => Mul,
            0x14 => Div,
            0x15 => Mod,
            0x16 => Neg,
            0x17 => Not,
            0x18 => CmpEq,
            0x19 => CmpLt,
            0x1A => CmpGt,
            0x20 => LdProp,
            0x21 => StProp,
            0x22 => LdElem,
            0x23 => StElem,
            0x30 => LdSlot,
            0x31 => StSlot,
            0x40 => StartCall,
            0x41 => ArgOut,
            0x42 => Call,
            0x43 => New,
            0x44 => Ret,
            0x50 => Br,
            0x51 => BrTrue,
            0x52 => BrFalse,
            0x53 => Switch,
            0x54 => Throw,
            0x55 => TryBegin,
            0x56 => TryEnd,
            0x57 => Yield,
            0x58 => LoopStart,
            0x59 => LoopEnd,
            _ => return None,
        })
    }

    /// Fixed operand byte length, or `None` for variable-length opcodes
    ///
    /// `Switch` reports `None`: its length depends on the case count in its
    /// header, which the reader decodes before sizing the target table.
    pub fn operand_len(self) -> Option<usize> {
        use Opcode::*;
        Some(match self {
            Nop | TryEnd => 0,
            Ret | Throw | Yield | StartCall | LoopStart | LoopEnd => 2,
            Mov | Neg | Not | LdSlot | StSlot | ArgOut | Br | TryBegin => 4,
            Add | Sub | Mul | Div | Mod | CmpEq | CmpLt | CmpGt | BrTrue | BrFalse => 6,
            LdProp | StProp | LdElem | StElem | Call | New => 8,
            Switch => return None,
        })
    }

    /// True for opcodes that transfer control to another offset
    pub fn is_branch(self) -> bool {
        matches!(
            self,
            Opcode::Br | Opcode::BrTrue | Opcode::BrFalse | Opcode::Switch
        )
    }

    /// Mnemonic for disassembly and trace output
    pub fn mnemonic(self) -> &'static str {
        use Opcode::*;
        match self {
            Nop => "nop",
            Mov => "mov",
            Add => "add",
            Sub => "sub",
            Mul => "mul",
            Div => "div",
            Mod => "mod",
            Neg => "neg",
            Not => "not",
            CmpEq => "cmpeq",
            CmpLt => "cmplt",
            CmpGt => "cmpgt",
            LdProp => "ldprop",
            StProp => "stprop",
            LdElem => "ldelem",
            StElem => "stelem",
            LdSlot => "ldslot",
            StSlot => "stslot",
            StartCall => "startcall",
            ArgOut => "argout",
            Call => "call",
            New => "new",
            Ret => "ret",
            Br => "br",
            BrTrue => "brtrue",
            BrFalse => "brfalse",
            Switch => "switch",
            Throw => "throw",
            TryBegin => "trybegin",
            TryEnd => "tryend",
            Yield => "yield",
            LoopStart => "loopstart",
            LoopEnd => "loopend",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_all_opcodes() {
        let all = [
            Opcode::Nop,
            Opcode::Mov,
            Opcode::Add,
            Opcode::Sub,
            Opcode::Mul,
            Opcode::Div,
            Opcode::Mod,
            Opcode::Neg,
            Opcode::Not,
            Opcode::CmpEq,
            Opcode::CmpLt,
            Opcode::CmpGt,
            Opcode::LdProp,
            Opcode::StProp,
            Opcode::LdElem,
            Opcode::StElem,
            Opcode::LdSlot,
            Opcode::StSlot,
            Opcode::StartCall,
            Opcode::ArgOut,
            Opcode::Call,
            Opcode::New,
            Opcode::Ret,
            Opcode::Br,
            Opcode::BrTrue,
            Opcode::BrFalse,
            Opcode::Switch,
            Opcode::Throw,
            Opcode::TryBegin,
            Opcode::TryEnd,
            Opcode::Yield,
            Opcode::LoopStart,
            Opcode::LoopEnd,
        ];
        for op in all {
            assert_eq!(Opcode::from_byte(op as u8), Some(op));
        }
    }

    #[test]
    fn unknown_byte_is_rejected() {
        assert_eq!(Opcode::from_byte(0xFF), None);
        assert_eq!(Opcode::from_byte(0x0F), None);
    }

    #[test]
    fn switch_is_variable_length() {
        assert_eq!(Opcode::Switch.operand_len(), None);
        assert_eq!(Opcode::Call.operand_len(), Some(8));
    }
}
