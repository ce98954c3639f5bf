//! Raw NWScript opcode bytes and their auxiliary type bytes.
//!
//! Grounded on the BioWare NWScript bytecode layout documented and
//! preserved in `NWScriptCodeGenerator.cpp`/`NWScriptAnalyzer.cpp`: every
//! instruction is a one-byte opcode optionally followed by a one-byte type
//! qualifier (e.g. `ADD` has integer, float, string and vector/vector-float
//! variants, selected by the type byte) and then zero or more operand
//! bytes whose shape depends on both.

/// The primary opcode byte. Named the way the original mnemonic table
/// names them, not reworded — a reader cross-checking against a
/// disassembly needs the names to match exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    Cpdownsp = 0x01,
    Rsadd = 0x02,
    Cptopsp = 0x03,
    Const = 0x04,
    Action = 0x05,
    Logand = 0x06,
    Logor = 0x07,
    Incor = 0x08,
    Excor = 0x09,
    Booland = 0x0A,
    Equal = 0x0B,
    Nequal = 0x0C,
    Geq = 0x0D,
    Gt = 0x0E,
    Lt = 0x0F,
    Leq = 0x10,
    Shleft = 0x11,
    Shright = 0x12,
    Mod = 0x13,
    Add = 0x14,
    Sub = 0x15,
    Mul = 0x16,
    Div = 0x17,
    Neg = 0x18,
    Comp = 0x19,
    Movsp = 0x1A,
    StoreState = 0x1B,
    Jmp = 0x1C,
    Jsr = 0x1D,
    Jz = 0x1E,
    Retn = 0x1F,
    Destruct = 0x20,
    Not = 0x21,
    Decsp = 0x22,
    Incsp = 0x23,
    Jnz = 0x24,
    Cpdownbp = 0x25,
    Cptopbp = 0x26,
    Decbp = 0x27,
    Incbp = 0x28,
    Savebp = 0x29,
    Restorebp = 0x2A,
    StoreStateAll = 0x2B,
    Nop = 0x2C,
    /// Deliberately-signed shift despite the name (preserved compatibility
    /// bug, see GLOSSARY "USHRIGHT").
    Ushright = 0x2D,
}

impl OpCode {
    pub fn from_byte(b: u8) -> Option<Self> {
        use OpCode::*;
        Some(match b {
            0x01 => Cpdownsp,
            0x02 => Rsadd,
            0x03 => Cptopsp,
            0x04 => Const,
            0x05 => Action,
            0x06 => Logand,
            0x07 => Logor,
            0x08 => Incor,
            0x09 => Excor,
            0x0A => Booland,
            0x0B => Equal,
            0x0C => Nequal,
            0x0D => Geq,
            0x0E => Gt,
            0x0F => Lt,
            0x10 => Leq,
            0x11 => Shleft,
            0x12 => Shright,
            0x13 => Mod,
            0x14 => Add,
            0x15 => Sub,
            0x16 => Mul,
            0x17 => Div,
            0x18 => Neg,
            0x19 => Comp,
            0x1A => Movsp,
            0x1B => StoreState,
            0x1C => Jmp,
            0x1D => Jsr,
            0x1E => Jz,
            0x1F => Retn,
            0x20 => Destruct,
            0x21 => Not,
            0x22 => Decsp,
            0x23 => Incsp,
            0x24 => Jnz,
            0x25 => Cpdownbp,
            0x26 => Cptopbp,
            0x27 => Decbp,
            0x28 => Incbp,
            0x29 => Savebp,
            0x2A => Restorebp,
            0x2B => StoreStateAll,
            0x2C => Nop,
            0x2D => Ushright,
            _ => return None,
        })
    }

    /// Whether this opcode is followed by a type-qualifier byte at all
    /// (stack-shape-only opcodes like `JMP`/`RETN`/`NOP` are not).
    pub fn has_type_byte(self) -> bool {
        !matches!(
            self,
            OpCode::Jmp
                | OpCode::Jsr
                | OpCode::Jz
                | OpCode::Jnz
                | OpCode::Retn
                | OpCode::Nop
                | OpCode::Action
                | OpCode::Movsp
                | OpCode::Decsp
                | OpCode::Incsp
                | OpCode::Cpdownsp
                | OpCode::Cptopsp
                | OpCode::Cpdownbp
                | OpCode::Cptopbp
                | OpCode::Decbp
                | OpCode::Incbp
                | OpCode::Savebp
                | OpCode::Restorebp
                | OpCode::StoreState
                | OpCode::StoreStateAll
                | OpCode::Destruct
        )
    }
}

/// The auxiliary type byte following opcodes like `ADD`/`SUB`/`EQUAL` that
/// select the operand type(s). Not every combination is legal for every
/// opcode; the analyzer validates that (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TypeByte {
    Int = 0x03,
    Float = 0x04,
    String = 0x05,
    Object = 0x06,
    IntInt = 0x20,
    FloatFloat = 0x21,
    ObjectObject = 0x22,
    StringString = 0x23,
    StructStruct = 0x24,
    IntFloat = 0x25,
    FloatInt = 0x26,
    EngineStructEngineStruct = 0x27,
    VectorVector = 0x3A,
    VectorFloat = 0x3B,
    FloatVector = 0x3C,
}

impl TypeByte {
    pub fn from_byte(b: u8) -> Option<Self> {
        use TypeByte::*;
        Some(match b {
            0x03 => Int,
            0x04 => Float,
            0x05 => String,
            0x06 => Object,
            0x20 => IntInt,
            0x21 => FloatFloat,
            0x22 => ObjectObject,
            0x23 => StringString,
            0x24 => StructStruct,
            0x25 => IntFloat,
            0x26 => FloatInt,
            0x27 => EngineStructEngineStruct,
            0x3A => VectorVector,
            0x3B => VectorFloat,
            0x3C => FloatVector,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_round_trips() {
        for raw in 0x01u8..=0x2D {
            if let Some(op) = OpCode::from_byte(raw) {
                assert_eq!(op as u8, raw);
            }
        }
    }

    #[test]
    fn unknown_byte_is_none() {
        assert!(OpCode::from_byte(0xFF).is_none());
    }
}
