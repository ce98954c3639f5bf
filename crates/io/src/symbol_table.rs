//! Optional debug-symbol table: a sequence of records mapping PC ranges to
//! subroutine names and parameter/return types (§6 "Symbol table (optional)").
//!
//! Absence is not an error; a present-but-corrupt table is demoted to
//! absence by the reader rather than propagated (§4.2).

use crate::error::{IoError, IoResult};

/// Value type tag, shared between the symbol table's declared
/// parameter/return types and `nwscript-vm`'s richer `Type` (which adds the
/// engine-struct slot index). Kept here, in the lowest layer, so the reader
/// does not depend on the VM crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeTag {
    Int,
    Float,
    String,
    Object,
    Vector,
    /// `i in 0..10`, selecting one of the ten engine-structure slots (C8).
    EngineStruct(u8),
}

impl TypeTag {
    fn from_byte(b: u8) -> IoResult<Self> {
        match b {
            0 => Ok(TypeTag::Int),
            1 => Ok(TypeTag::Float),
            2 => Ok(TypeTag::String),
            3 => Ok(TypeTag::Object),
            4 => Ok(TypeTag::Vector),
            5..=14 => Ok(TypeTag::EngineStruct(b - 5)),
            other => Err(IoError::malformed_symbol_table(format!(
                "unknown type tag byte {other}"
            ))),
        }
    }
}

/// One subroutine's debug metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubroutineSymbol {
    pub name: String,
    pub start_pc: u32,
    pub end_pc: u32,
    pub parameter_types: Vec<TypeTag>,
    pub return_type: Option<TypeTag>,
}

/// The full debug-symbol table for one script image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolTable {
    subroutines: Vec<SubroutineSymbol>,
}

impl SymbolTable {
    /// Wire format (big-endian, matching `ScriptReader`):
    /// `record_count: u16`, then per record:
    /// `name_len: u8, name: [u8; name_len], start_pc: u32, end_pc: u32,
    ///  param_count: u8, param_types: [u8; param_count], has_return: u8,
    ///  return_type: u8 (present only if has_return != 0)`.
    pub fn parse(bytes: &[u8]) -> IoResult<Self> {
        let mut cursor = Cursor::new(bytes);
        let count = cursor.read_u16()?;
        let mut subroutines = Vec::with_capacity(count as usize);

        for _ in 0..count {
            let name_len = cursor.read_u8()? as usize;
            let name_bytes = cursor.read_bytes(name_len)?;
            let name = String::from_utf8(name_bytes.to_vec())
                .map_err(|_| IoError::invalid_utf8("subroutine name"))?;
            let start_pc = cursor.read_u32()?;
            let end_pc = cursor.read_u32()?;
            let param_count = cursor.read_u8()? as usize;
            let mut parameter_types = Vec::with_capacity(param_count);
            for _ in 0..param_count {
                parameter_types.push(TypeTag::from_byte(cursor.read_u8()?)?);
            }
            let has_return = cursor.read_u8()?;
            let return_type = if has_return != 0 {
                Some(TypeTag::from_byte(cursor.read_u8()?)?)
            } else {
                None
            };

            subroutines.push(SubroutineSymbol {
                name,
                start_pc,
                end_pc,
                parameter_types,
                return_type,
            });
        }

        Ok(Self { subroutines })
    }

    pub fn subroutines(&self) -> &[SubroutineSymbol] {
        &self.subroutines
    }

    /// Looks up the subroutine whose `[start_pc, end_pc)` range contains
    /// `pc`, used by the analyzer to recover names/types for generated IR.
    pub fn find_by_pc(&self, pc: u32) -> Option<&SubroutineSymbol> {
        self.subroutines
            .iter()
            .find(|s| pc >= s.start_pc && pc < s.end_pc)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&SubroutineSymbol> {
        self.subroutines.iter().find(|s| s.name == name)
    }
}

/// Minimal forward-only byte cursor used only while parsing the symbol
/// table (kept private and separate from `ScriptReader`, which is for
/// bytecode: the two streams are never mixed).
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn ensure(&self, n: usize) -> IoResult<()> {
        if self.pos + n > self.bytes.len() {
            return Err(IoError::end_of_stream(n, self.pos, "symbol table"));
        }
        Ok(())
    }

    fn read_u8(&mut self) -> IoResult<u8> {
        self.ensure(1)?;
        let b = self.bytes[self.pos];
        self.pos += 1;
        Ok(b)
    }

    fn read_u16(&mut self) -> IoResult<u16> {
        self.ensure(2)?;
        let v = u16::from_be_bytes(self.bytes[self.pos..self.pos + 2].try_into().unwrap());
        self.pos += 2;
        Ok(v)
    }

    fn read_u32(&mut self) -> IoResult<u32> {
        self.ensure(4)?;
        let v = u32::from_be_bytes(self.bytes[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        Ok(v)
    }

    fn read_bytes(&mut self, n: usize) -> IoResult<&'a [u8]> {
        self.ensure(n)?;
        let s = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_one(name: &str, start: u32, end: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&1u16.to_be_bytes());
        buf.push(name.len() as u8);
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(&start.to_be_bytes());
        buf.extend_from_slice(&end.to_be_bytes());
        buf.push(1); // one parameter
        buf.push(0); // Int
        buf.push(1); // has_return
        buf.push(1); // Float
        buf
    }

    #[test]
    fn parses_one_subroutine() {
        let bytes = encode_one("StartingConditional", 0, 64);
        let table = SymbolTable::parse(&bytes).unwrap();
        let sym = table.find_by_name("StartingConditional").unwrap();
        assert_eq!(sym.parameter_types, vec![TypeTag::Int]);
        assert_eq!(sym.return_type, Some(TypeTag::Float));
        assert!(table.find_by_pc(10).is_some());
        assert!(table.find_by_pc(100).is_none());
    }

    #[test]
    fn truncated_table_is_an_error_not_a_panic() {
        let bytes = vec![0x00, 0x01, 0x05]; // count=1, name_len=5, then nothing
        assert!(SymbolTable::parse(&bytes).is_err());
    }
}
