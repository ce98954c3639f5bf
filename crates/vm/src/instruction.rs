//! A single decoded instruction: an [`OpCode`], its optional [`TypeByte`],
//! and whatever operand payload that combination requires.
//!
//! The analyzer (`analyzer.rs`) decodes a stream of these while building
//! IR; the interpreter (`interpreter.rs`) re-decodes them one at a time
//! off the `ScriptReader` (no separate "compiled instruction cache" is
//! kept — decoding a single instruction is cheap and the interpreter is
//! not the hot path the JIT exists to replace).

use crate::opcode::{OpCode, TypeByte};
use crate::value::Value;
use nwscript_io::ScriptReader;

/// The operand payload carried by a decoded instruction, shaped per
/// opcode (§4.3 "Decode").
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    None,
    Immediate(Value),
    /// `CPDOWNSP`/`CPTOPSP`/`CPDOWNBP`/`CPTOPBP`: a signed stack offset and
    /// a byte count (size of the value being copied, as multiples of 4).
    StackOffsetSize { offset: i32, size: u16 },
    /// `MOVSP`/`DECSP`/`INCSP`/`DESTRUCT`: a signed stack adjustment.
    StackAdjust(i32),
    /// Control-flow opcodes: a PC-relative branch target, already resolved
    /// to an absolute program counter.
    Jump(u32),
    /// `ACTION`: the action table index and declared argument count.
    Action { index: u16, arg_count: u8 },
    /// `EQUAL`/`NEQUAL` on structs, and `DESTRUCT`: an element count/offset
    /// triple used for element-wise struct comparison/destructuring.
    StructShape {
        element_count: u16,
        offset: i32,
        size: u16,
    },
}

/// One decoded instruction plus the program counter it started at and the
/// program counter immediately following it (needed by the analyzer to
/// thread fallthrough edges and by `SAVE_STATE` to know the resume point).
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub pc: u32,
    pub next_pc: u32,
    pub opcode: OpCode,
    pub type_byte: Option<TypeByte>,
    pub operand: Operand,
}

/// Decodes the instruction starting at the reader's current position,
/// advancing it past the instruction. Grounded on the original
/// `NWScriptAnalyzer::DecodeInstruction` pattern: opcode byte, optional
/// type byte, then an operand shape that depends on both.
pub fn decode(reader: &mut ScriptReader) -> Result<Instruction, crate::error::AnalyzeError> {
    let pc = reader.position() as u32;
    let raw_op = reader.read_u8()?;
    let opcode = OpCode::from_byte(raw_op).ok_or(crate::error::AnalyzeError::UnknownOpcode {
        pc,
        opcode: raw_op,
    })?;

    let type_byte = if opcode.has_type_byte() {
        let raw = reader.read_u8()?;
        Some(
            TypeByte::from_byte(raw).ok_or_else(|| crate::error::AnalyzeError::Malformed {
                pc,
                reason: format!("unrecognized type byte {raw:#04x}"),
            })?,
        )
    } else {
        None
    };

    let operand = decode_operand(reader, opcode, type_byte, pc)?;
    let next_pc = reader.position() as u32;

    Ok(Instruction {
        pc,
        next_pc,
        opcode,
        type_byte,
        operand,
    })
}

fn decode_operand(
    reader: &mut ScriptReader,
    opcode: OpCode,
    type_byte: Option<TypeByte>,
    pc: u32,
) -> Result<Operand, crate::error::AnalyzeError> {
    use OpCode::*;

    match opcode {
        Const => Ok(Operand::Immediate(decode_const(reader, type_byte, pc)?)),

        Cpdownsp | Cptopsp | Cpdownbp | Cptopbp => {
            let offset = reader.read_i32()?;
            let size = reader.read_u16()?;
            Ok(Operand::StackOffsetSize { offset, size })
        }

        Movsp | Decsp | Incsp => Ok(Operand::StackAdjust(reader.read_i32()?)),

        Destruct => {
            let element_count = reader.read_u16()?;
            let offset = reader.read_i32()?;
            let size = reader.read_u16()?;
            Ok(Operand::StructShape {
                element_count,
                offset,
                size,
            })
        }

        Equal | Nequal if type_byte == Some(TypeByte::StructStruct) => {
            let element_count = reader.read_u16()?;
            Ok(Operand::StructShape {
                element_count,
                offset: 0,
                size: 0,
            })
        }

        Jmp | Jsr | Jz | Jnz => {
            let rel = reader.read_i32()?;
            let target = (pc as i64 + rel as i64) as u32;
            Ok(Operand::Jump(target))
        }

        Action => {
            let index = reader.read_u16()?;
            let arg_count = reader.read_u8()?;
            Ok(Operand::Action { index, arg_count })
        }

        StoreState => {
            // Two operand counts: size of locals block, size of globals
            // block, both in bytes - consumed by the analyzer/interpreter
            // when materializing a continuation, not needed at decode time
            // beyond skipping past them correctly.
            let locals_size = reader.read_i32()?;
            let globals_size = reader.read_i32()?;
            Ok(Operand::StackOffsetSize {
                offset: locals_size,
                size: globals_size as u16,
            })
        }

        Incbp | Decbp | Savebp | Restorebp | Retn | Nop | StoreStateAll => Ok(Operand::None),

        _ => Ok(Operand::None),
    }
}

fn decode_const(
    reader: &mut ScriptReader,
    type_byte: Option<TypeByte>,
    pc: u32,
) -> Result<Value, crate::error::AnalyzeError> {
    match type_byte {
        Some(TypeByte::Int) => Ok(Value::Int(reader.read_i32()?)),
        Some(TypeByte::Float) => Ok(Value::Float(reader.read_f32()?)),
        Some(TypeByte::String) => {
            let len = reader.read_u16()? as usize;
            let bytes = reader.read_bytes(len)?.to_vec();
            Ok(Value::String(bytes))
        }
        Some(TypeByte::Object) => Ok(Value::Object(reader.read_i32()?)),
        other => Err(crate::error::AnalyzeError::Malformed {
            pc,
            reason: format!("CONST with unsupported type byte {other:?}"),
        }),
    }
}
