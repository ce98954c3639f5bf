//! Error types for the NWScript VM crate.
//!
//! One `thiserror`-derived enum per concern, the way the teacher keeps a
//! single flat `VmError` — except here the flatness would hide which layer
//! (analyzer, interpreter, action dispatch, host) raised the error, so each
//! layer gets its own enum and `VmError` wraps them.

use thiserror::Error;

/// Errors raised while building IR from a bytecode image (C3).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalyzeError {
    #[error("malformed bytecode at pc {pc}: {reason}")]
    Malformed { pc: u32, reason: String },

    #[error("opcode {opcode:#04x} at pc {pc} has no known operand shape")]
    UnknownOpcode { pc: u32, opcode: u8 },

    #[error("jump at pc {pc} targets {target}, which is not a valid instruction boundary")]
    UnknownTarget { pc: u32, target: u32 },

    #[error("type mismatch building ir at pc {pc}: expected {expected}, found {found}")]
    TypeMismatch {
        pc: u32,
        expected: String,
        found: String,
    },

    #[error(transparent)]
    Io(#[from] nwscript_io::IoError),
}

pub type AnalyzeResult<T> = Result<T, AnalyzeError>;

/// Errors raised by the interpreter while a script is actually running (C4).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VmError {
    #[error("stack underflow: requested {requested} item(s), {available} available")]
    StackUnderflow { requested: usize, available: usize },

    #[error("stack overflow: depth {depth} exceeds limit {limit}")]
    StackOverflow { depth: usize, limit: usize },

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("arithmetic error in {operation}: {reason}")]
    ArithmeticError { operation: String, reason: String },

    #[error("division by zero in {operation}")]
    DivisionByZero { operation: String },

    #[error("call depth {depth} exceeds limit {limit}")]
    CallDepthExceeded { depth: usize, limit: usize },

    #[error("loop iteration count {count} exceeds limit {limit}")]
    LoopIterationExceeded { count: u64, limit: u64 },

    #[error("program counter {pc} is out of bounds (program length {length})")]
    ProgramCounterOutOfBounds { pc: u32, length: u32 },

    #[error("object id {id} is not valid in this context")]
    InvalidObjectId { id: i32 },

    #[error("engine structure slot {slot} is out of range (0..10)")]
    InvalidEngineStructSlot { slot: u8 },

    #[error("engine structure handle {handle} in slot {slot} does not exist")]
    UnknownEngineStructHandle { slot: u8, handle: u32 },

    #[error("action {index} is not registered")]
    UnknownAction { index: u16 },

    #[error("action {name} expected {expected} argument(s), got {actual}")]
    ActionArity {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("host requested script exit: {reason}")]
    HostExit { reason: String },

    /// A handler reported failure, or the fast convention returned `false`
    /// (§4.5 "A `false` return from the fast form is reported to the
    /// interpreter as `ActionFailed`").
    #[error("action {name} failed")]
    ActionFailed { name: String },

    /// The script was explicitly aborted via `abort_script`, observed at
    /// the next instruction boundary (§4.4 "abort_script() sets a latch
    /// observed at the next action return").
    #[error("script aborted: {reason}")]
    Aborted { reason: String },

    #[error(transparent)]
    Analyze(#[from] AnalyzeError),

    #[error(transparent)]
    Io(#[from] nwscript_io::IoError),
}

pub type VmResult<T> = Result<T, VmError>;

impl VmError {
    pub fn stack_underflow(requested: usize, available: usize) -> Self {
        Self::StackUnderflow {
            requested,
            available,
        }
    }

    pub fn type_mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }

    pub fn action_failed(name: impl Into<String>) -> Self {
        Self::ActionFailed { name: name.into() }
    }
}

/// Errors raised by the timer / deferred-action queue (C9).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimerError {
    #[error("timer id {id} is not known to this queue")]
    UnknownTimer { id: u32 },

    #[error("timer period {period_ms}ms is not representable (must be > 0)")]
    InvalidPeriod { period_ms: i64 },
}

pub type TimerResult<T> = Result<T, TimerError>;

/// Errors raised by the script host driver (C7).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error(transparent)]
    Vm(#[from] VmError),

    #[error(transparent)]
    Analyze(#[from] AnalyzeError),

    #[error(transparent)]
    Io(#[from] nwscript_io::IoError),

    #[error(transparent)]
    Timer(#[from] TimerError),

    #[error("script {resref} is not present in the cache and no loader was supplied")]
    ScriptNotCached { resref: String },

    #[error("continuation references resref {resref}, which does not match the resumed script")]
    ContinuationMismatch { resref: String },
}

pub type HostResult<T> = Result<T, HostError>;
