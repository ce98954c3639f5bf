//! Script continuations (`SAVE_STATE` / `ACTION_DELAYCOMMAND` resume data).
//!
//! Modeled 1:1 on `NWNScriptJIT/NWScriptSavedState.h`: a continuation is
//! everything a deferred call needs to resume a subroutine later, in a
//! possibly different process — the current object, the global variable
//! snapshot at capture time, the resume program counter, the captured
//! locals, and (because an action call can itself run inside the resumed
//! code before it returns) a scratch operand stack for that.

use crate::stack::OperandStack;
use crate::value::Value;

#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct SavedState {
    /// Resref of the program this continuation resumes into — a resumed
    /// continuation is only valid against the exact script it was saved
    /// from (§4.7 "ContinuationMismatch").
    pub resref: String,
    /// Object id considered `OBJECT_SELF` for the resumed call.
    pub current_self: i32,
    /// Snapshot of every global variable at capture time, in declaration
    /// order.
    pub program_state: Vec<Value>,
    /// Program counter `SAVE_STATE` should resume at.
    pub resume_method_pc: u32,
    /// The id identifying which compiled "resume method" this is, for
    /// hosts whose JIT back-end compiles each `SAVE_STATE` site as its own
    /// callable method rather than resuming mid-function.
    pub resume_method_id: u32,
    /// Captured locals at the point of capture, restored onto the operand
    /// stack above the resumed frame's base pointer.
    pub resume_locals: Vec<Value>,
}

impl SavedState {
    /// Rehydrates an operand stack suitable for resuming execution: the
    /// locals are pushed above a base pointer set at their start.
    pub fn resume_stack(&self) -> OperandStack {
        let bp = self.resume_locals.len();
        OperandStack::from_snapshot(self.resume_locals.clone(), bp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resume_stack_places_bp_after_locals() {
        let state = SavedState {
            resref: "nw_s0_test".into(),
            current_self: 1,
            program_state: vec![],
            resume_method_pc: 10,
            resume_method_id: 0,
            resume_locals: vec![Value::Int(1), Value::Int(2)],
        };
        let stack = state.resume_stack();
        assert_eq!(stack.base_pointer(), 2);
        assert_eq!(stack.len(), 2);
    }
}
