//! The JIT contract (C6): the interface a native code generator backend
//! implements to replace the interpreter for hot scripts.
//!
//! No concrete JIT backend ships here — only the trait a real one (e.g. a
//! Cranelift or CIL-emitting backend) would implement, mirroring the way
//! `NWNScriptJIT` is itself a pluggable code generator behind a fixed ABI
//! in the original host. `nwscript-vm::host` falls back to the
//! interpreter whenever no [`JitEngine`] is configured or a script fails
//! [`JitEngine::supports`].

use crate::continuation::SavedState;
use crate::error::VmError;
use crate::ir::Program as IrProgram;
use crate::stack::OperandStack;
use crate::value::Value;

/// The ABI version a [`JitEngine`] implementation declares support for.
/// The host refuses to hand a script to a JIT whose version does not
/// match its own compiled expectation (§4.6 "Version checks") rather than
/// risk a silently-mismatched calling convention.
pub const JIT_ABI_VERSION: u32 = 1;

/// One of the wire structs a dynamically-loaded backend cross-checks
/// before trusting the host's memory layout (§4.6 "Version checks compare
/// the sizes of the wire structs... to guard against ABI drift"). Sizes
/// are reported in the host's own terms (`size_of` the corresponding Rust
/// type, or the `{ptr, len}` pair for the neutral string) rather than a
/// byte-exact match against a C ABI this crate never had to begin with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireStruct {
    ReaderState,
    StackCell,
    ActionDefinition,
    NeutralString,
}

impl WireStruct {
    /// This host's expected size, in bytes, for the given wire struct.
    pub fn expected_size(self) -> usize {
        match self {
            WireStruct::ReaderState => std::mem::size_of::<nwscript_io::ScriptReader>(),
            WireStruct::StackCell => std::mem::size_of::<Value>(),
            WireStruct::ActionDefinition => std::mem::size_of::<crate::action::ActionDescriptor>(),
            // {raw_ptr, byte_length} (GLOSSARY "Neutral string").
            WireStruct::NeutralString => std::mem::size_of::<usize>() * 2,
        }
    }
}

/// A compiled, directly-callable form of one script. Opaque to the host;
/// only the [`JitEngine`] that produced it knows how to run it.
pub trait JitProgram: Send {
    /// Runs the compiled script from its entry point, returning whatever
    /// value (if any) it leaves on the logical return slot.
    fn execute(&mut self, current_self: i32, args: &[Value]) -> Result<Option<Value>, VmError>;

    /// Resumes execution from a previously captured continuation inside
    /// this same compiled program (§4.6 "execute_script_situation").
    fn resume(&mut self, state: &SavedState) -> Result<Option<Value>, VmError>;

    /// Captures the program's current execution point as a continuation,
    /// valid only for a `SAVE_STATE` opcode actually being executed right
    /// now (the JIT, like the interpreter, can only snapshot itself while
    /// it is the one running).
    fn save_state(&self) -> Result<SavedState, VmError>;

    /// Sets this program's own abort latch (§4.6 "abort_script"),
    /// independent of whatever other compiled programs the same engine
    /// has running — a nested re-entrant call aborts only the program it
    /// was raised against.
    fn abort_script(&mut self) {}

    /// Whether [`JitProgram::abort_script`] has been called on this
    /// program since it started running (§4.6 "is_script_aborted").
    fn is_script_aborted(&self) -> bool {
        false
    }

    /// Serializes a captured continuation onto a raw operand stack in the
    /// wire order §6 defines: globals deepest-first, a zero placeholder BP
    /// cell, then locals (§6 "Continuation wire format"). The default
    /// implementation is the wire format itself, not backend-specific —
    /// only a backend whose compiled frame layout needs a different
    /// placeholder should override it.
    fn push_script_situation(&self, state: &SavedState, stack: &mut OperandStack) {
        for g in &state.program_state {
            stack.push(g.clone());
        }
        stack.push(Value::Int(0));
        for l in &state.resume_locals {
            stack.push(l.clone());
        }
    }

    /// The inverse of [`JitProgram::push_script_situation`]: pops
    /// `local_count` locals, the placeholder BP cell, then `global_count`
    /// globals off `stack`, and reassembles them into a [`SavedState`]
    /// alongside the out-of-band fields §6 lists separately (resref,
    /// resume method id/pc, current self).
    fn pop_script_situation(
        &self,
        stack: &mut OperandStack,
        resref: String,
        resume_method_id: u32,
        resume_method_pc: u32,
        global_count: usize,
        local_count: usize,
        current_self: i32,
    ) -> Result<SavedState, VmError> {
        let mut locals = Vec::with_capacity(local_count);
        for _ in 0..local_count {
            locals.push(stack.pop()?);
        }
        locals.reverse();
        stack.pop()?; // placeholder BP cell
        let mut globals = Vec::with_capacity(global_count);
        for _ in 0..global_count {
            globals.push(stack.pop()?);
        }
        globals.reverse();
        Ok(SavedState {
            resref,
            current_self,
            program_state: globals,
            resume_method_pc,
            resume_method_id,
            resume_locals: locals,
        })
    }
}

/// A backend capable of turning analyzed IR into a [`JitProgram`].
pub trait JitEngine {
    type Program: JitProgram;

    /// The ABI version this engine was built against; the host compares
    /// this against [`JIT_ABI_VERSION`] before ever calling
    /// [`JitEngine::generate_code`].
    fn abi_version(&self) -> u32;

    /// A short identifying name for diagnostics (§4.6 "engine_name").
    fn engine_name(&self) -> &str {
        "unknown"
    }

    /// Confirms this engine's notion of `wire`'s size agrees with the
    /// host's (§4.6 "check_version"). The default compares against
    /// [`WireStruct::expected_size`]; a backend loaded out-of-process
    /// (e.g. dynamically, across an FFI boundary with its own struct
    /// layout) overrides this with its own reported size instead.
    fn check_version(&self, wire: WireStruct, reported_size: usize) -> bool {
        reported_size == wire.expected_size()
    }

    /// Whether this engine is willing to compile `program` at all — a
    /// backend may decline scripts using opcodes or engine-structure
    /// slots it does not support, falling back to the interpreter.
    fn supports(&self, program: &IrProgram) -> bool;

    fn generate_code(&self, program: &IrProgram) -> Result<Self::Program, VmError>;

    /// Releases a compiled program (§4.6 "delete_program"). Rust's own
    /// ownership already runs `Self::Program`'s `Drop` on scope exit, so
    /// the default just takes ownership and lets that happen; a backend
    /// whose program handle wraps a foreign allocation overrides this to
    /// call its own deallocator instead.
    fn delete_program(&self, program: Self::Program) {
        drop(program);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Program as IrProgram;

    struct RejectsEverything;

    impl JitEngine for RejectsEverything {
        type Program = NeverRuns;

        fn abi_version(&self) -> u32 {
            JIT_ABI_VERSION
        }

        fn supports(&self, _program: &IrProgram) -> bool {
            false
        }

        fn generate_code(&self, _program: &IrProgram) -> Result<Self::Program, VmError> {
            unreachable!("host must check supports() first")
        }
    }

    struct NeverRuns;

    impl JitProgram for NeverRuns {
        fn execute(&mut self, _current_self: i32, _args: &[Value]) -> Result<Option<Value>, VmError> {
            unreachable!()
        }
        fn resume(&mut self, _state: &SavedState) -> Result<Option<Value>, VmError> {
            unreachable!()
        }
        fn save_state(&self) -> Result<SavedState, VmError> {
            unreachable!()
        }
    }

    #[test]
    fn a_declining_engine_is_never_asked_to_generate_code() {
        let engine = RejectsEverything;
        let program = IrProgram::default();
        assert!(!engine.supports(&program));
    }
}
