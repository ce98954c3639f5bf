//! # NWScript VM
//!
//! A stack-based virtual machine for the NWScript bytecode format: the
//! operand stack, the analyzer that turns bytecode into a control-flow
//! graph, the interpreter, the action-service dispatch ABI, a JIT
//! contract for pluggable native code generation, the script host driver
//! (caching, continuations, deferred actions), an opaque
//! engine-structure registry, and a millisecond-resolution deferred
//! action queue.
//!
//! ## Architecture
//!
//! - [`stack`] — the operand stack (C1)
//! - [`ir`] / [`analyzer`] — control-flow graph construction (C3)
//! - [`interpreter`] / [`opcode`] / [`instruction`] — the execution loop (C4)
//! - [`action`] — the action-service calling conventions (C5)
//! - [`jit`] — the pluggable native-code-generator contract (C6)
//! - [`host`] — the script host driver: caching, continuations, re-entrancy (C7)
//! - [`engine_struct`] — the ten opaque engine-structure slots (C8)
//! - [`timer`] — the deferred action queue (C9)
//! - [`continuation`] — the `SAVE_STATE` wire format
//!
//! Bytecode reading itself (`nwscript_io::ScriptReader`) lives one layer
//! down, in the `nwscript-io` crate, since it has no notion of opcodes.

#![warn(rustdoc::missing_crate_level_docs)]

pub mod action;
pub mod analyzer;
pub mod continuation;
pub mod engine_struct;
pub mod error;
pub mod host;
pub mod instruction;
pub mod interpreter;
pub mod ir;
pub mod jit;
pub mod opcode;
pub mod stack;
pub mod timer;
pub mod value;

pub use action::{ActionDescriptor, ActionHandler, ActionTable, FastCommand};
pub use analyzer::analyze;
pub use continuation::SavedState;
pub use engine_struct::{EngineStructRegistry, ENGINE_STRUCT_SLOT_COUNT};
pub use error::{AnalyzeError, AnalyzeResult, HostError, HostResult, TimerError, TimerResult, VmError, VmResult};
pub use host::{HostConfig, ScriptHost, ScriptLoader};
pub use instruction::{decode, Instruction, Operand};
pub use interpreter::{EngineLimits, Interpreter, StepOutcome};
pub use ir::{
    AnalysisFlags, BasicBlock, BinOp, IrInstr, Program, Subroutine, Terminator, UnOp, VarId,
    Variable, VariableClass,
};
pub use jit::{JitEngine, JitProgram, JIT_ABI_VERSION};
pub use opcode::{OpCode, TypeByte};
pub use stack::OperandStack;
pub use timer::{DeferredAction, DeferredQueue};
pub use value::{Type, Value, Vector, OBJECT_INVALID};

pub use nwscript_io as io;
