//! The bytecode reader (spec component C2): a random-access, read-only view
//! over an immutable instruction stream, with optional symbol-table bytes
//! attached at construction.
//!
//! Grounded on `neo-io::memory_reader::MemoryReader` — a position-tracking
//! cursor over an owned byte buffer with `ensure_position`-style bounds
//! checks before every multi-byte read.

use crate::error::{IoError, IoResult};
use crate::symbol_table::SymbolTable;
use std::convert::TryInto;

/// Whether the reader's underlying stream has had its loader-stub return
/// value patched by the host before analysis. Some compiled images carry a
/// `#loader` stub whose return value a host rewrites in place (e.g. to
/// select a save-game format); the analyzer needs to know this happened
/// since it changes which prologue pattern to expect (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PatchState {
    #[default]
    None,
    LoaderReturnValuePatched,
}

/// A random-access view over a script's compiled bytecode.
///
/// `seek`/`read_*` operate on an internal cursor; `len`/`script_name` are
/// queries that don't move it. Construction never fails on the bytecode
/// itself — bytecode is only checked lazily, byte-range by byte-range, as
/// the analyzer or interpreter actually reads it (so a reader can be handed
/// to code that never walks past the prologue without penalty).
#[derive(Clone)]
pub struct ScriptReader {
    script_name: String,
    code: Vec<u8>,
    pos: usize,
    patch_state: PatchState,
    symbols: Option<SymbolTable>,
}

impl ScriptReader {
    /// Builds a reader over `code`, with no symbol table.
    pub fn new(script_name: impl Into<String>, code: Vec<u8>) -> Self {
        Self {
            script_name: script_name.into(),
            code,
            pos: 0,
            patch_state: PatchState::None,
            symbols: None,
        }
    }

    /// Builds a reader and attempts to parse `debug_symbol_bytes` as a
    /// symbol table. Per §4.2, failure here is best-effort: it is never
    /// surfaced as an error, only silently demoted to "no symbols" (the
    /// caller is expected to `log::warn!` before discarding it).
    pub fn with_debug_symbols(
        script_name: impl Into<String>,
        code: Vec<u8>,
        debug_symbol_bytes: &[u8],
    ) -> Self {
        let symbols = SymbolTable::parse(debug_symbol_bytes).ok();
        Self {
            script_name: script_name.into(),
            code,
            pos: 0,
            patch_state: PatchState::None,
            symbols,
        }
    }

    pub fn script_name(&self) -> &str {
        &self.script_name
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn patch_state(&self) -> PatchState {
        self.patch_state
    }

    pub fn set_patch_state(&mut self, state: PatchState) {
        self.patch_state = state;
    }

    pub fn symbols(&self) -> Option<&SymbolTable> {
        self.symbols.as_ref()
    }

    /// Moves the read cursor to an absolute program-counter position.
    pub fn seek(&mut self, pc: usize) -> IoResult<()> {
        if pc > self.code.len() {
            return Err(IoError::seek_out_of_bounds(pc, self.code.len()));
        }
        self.pos = pc;
        Ok(())
    }

    fn ensure_remaining(&self, n: usize, context: &str) -> IoResult<()> {
        if self.pos + n > self.code.len() {
            return Err(IoError::end_of_stream(n, self.pos, context));
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> IoResult<u8> {
        self.ensure_remaining(1, "read_u8")?;
        let b = self.code[self.pos];
        self.pos += 1;
        Ok(b)
    }

    pub fn read_u16(&mut self) -> IoResult<u16> {
        self.ensure_remaining(2, "read_u16")?;
        let bytes: [u8; 2] = self.code[self.pos..self.pos + 2].try_into().unwrap();
        self.pos += 2;
        Ok(u16::from_be_bytes(bytes))
    }

    pub fn read_u32(&mut self) -> IoResult<u32> {
        self.ensure_remaining(4, "read_u32")?;
        let bytes: [u8; 4] = self.code[self.pos..self.pos + 4].try_into().unwrap();
        self.pos += 4;
        Ok(u32::from_be_bytes(bytes))
    }

    pub fn read_i32(&mut self) -> IoResult<i32> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_f32(&mut self) -> IoResult<f32> {
        self.ensure_remaining(4, "read_f32")?;
        let bytes: [u8; 4] = self.code[self.pos..self.pos + 4].try_into().unwrap();
        self.pos += 4;
        Ok(f32::from_be_bytes(bytes))
    }

    /// Reads `n` raw bytes (used for string literal operands, which are
    /// byte sequences rather than code-point sequences — §9 "Strings are
    /// bytes").
    pub fn read_bytes(&mut self, n: usize) -> IoResult<&[u8]> {
        self.ensure_remaining(n, "read_bytes")?;
        let slice = &self.code[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Peeks the next byte without advancing the cursor (used by the
    /// analyzer to look ahead for opcode-specific operand shapes).
    pub fn peek_u8(&self) -> IoResult<u8> {
        self.ensure_remaining(1, "peek_u8")?;
        Ok(self.code[self.pos])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_big_endian_operands() {
        let mut r = ScriptReader::new("test", vec![0x00, 0x01, 0xFF, 0xFF, 0xFF, 0xFE]);
        assert_eq!(r.read_u16().unwrap(), 1);
        assert_eq!(r.read_i32().unwrap(), -2);
    }

    #[test]
    fn seek_out_of_bounds_is_reported() {
        let mut r = ScriptReader::new("test", vec![0x00]);
        assert!(r.seek(5).is_err());
    }

    #[test]
    fn end_of_stream_does_not_panic() {
        let mut r = ScriptReader::new("test", vec![0x01]);
        assert!(r.read_u32().is_err());
    }

    #[test]
    fn missing_debug_symbols_demote_silently() {
        let r = ScriptReader::with_debug_symbols("test", vec![0x00], b"not a symbol table \xFF\xFF");
        assert!(r.symbols().is_none());
    }
}
