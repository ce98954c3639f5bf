//! The operand stack (C1): a single `Vec<Value>` shared by globals,
//! locals and scratch values within one subroutine invocation, with a
//! movable base pointer delimiting the active frame.
//!
//! Grounded on the teacher's `evaluation_stack::EvaluationStack` — push,
//! pop, indexed peek from the top — generalized from `StackItem` (a
//! reference-counted polymorphic cell) down to the much smaller [`Value`]
//! enum, since NWScript has no heap-allocated compound types to track.

use crate::error::{VmError, VmResult};
use crate::value::{Type, Value, Vector};

/// The VM operand stack. `bp` ("base pointer") marks the start of the
/// current subroutine's locals; globals always occupy `0..globals_len`
/// beneath it (§4.1 "Operand stack").
#[derive(Clone, Default)]
pub struct OperandStack {
    items: Vec<Value>,
    bp: usize,
}

impl OperandStack {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            bp: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn push(&mut self, value: Value) {
        self.items.push(value);
    }

    pub fn pop(&mut self) -> VmResult<Value> {
        self.items
            .pop()
            .ok_or_else(|| VmError::stack_underflow(1, 0))
    }

    pub fn pop_int(&mut self) -> VmResult<i32> {
        self.pop_typed(Type::Int, Value::as_int)
    }

    pub fn pop_float(&mut self) -> VmResult<f32> {
        self.pop_typed(Type::Float, Value::as_float)
    }

    pub fn pop_string(&mut self) -> VmResult<Vec<u8>> {
        let v = self.pop()?;
        match v {
            Value::String(s) => Ok(s),
            other => Err(VmError::type_mismatch("string", other.type_tag().to_string())),
        }
    }

    pub fn pop_object(&mut self) -> VmResult<i32> {
        self.pop_typed(Type::Object, Value::as_object)
    }

    fn pop_typed<T>(&mut self, expected: Type, project: fn(&Value) -> Option<T>) -> VmResult<T> {
        let v = self.pop()?;
        project(&v).ok_or_else(|| VmError::type_mismatch(expected.to_string(), v.type_tag().to_string()))
    }

    /// Peeks the item `n` slots from the top (`n == 0` is the top itself),
    /// mirroring the teacher's `EvaluationStack::peek` indexing.
    pub fn peek(&self, n: usize) -> VmResult<&Value> {
        if n >= self.items.len() {
            return Err(VmError::stack_underflow(n + 1, self.items.len()));
        }
        Ok(&self.items[self.items.len() - 1 - n])
    }

    pub fn peek_mut(&mut self, n: usize) -> VmResult<&mut Value> {
        if n >= self.items.len() {
            return Err(VmError::stack_underflow(n + 1, self.items.len()));
        }
        let idx = self.items.len() - 1 - n;
        Ok(&mut self.items[idx])
    }

    /// Removes and returns the item `n` slots from the top, shifting
    /// everything above it down by one (used by `CPDOWNSP`/`CPTOPSP`-style
    /// stack-relocation opcodes).
    pub fn remove(&mut self, n: usize) -> VmResult<Value> {
        if n >= self.items.len() {
            return Err(VmError::stack_underflow(n + 1, self.items.len()));
        }
        let idx = self.items.len() - 1 - n;
        Ok(self.items.remove(idx))
    }

    pub fn truncate(&mut self, len: usize) {
        self.items.truncate(len);
    }

    /// Current depth, an alias for [`OperandStack::len`] matching the
    /// spec's own naming for the contract (§4.1 "depth()").
    pub fn depth(&self) -> usize {
        self.items.len()
    }

    /// Discards every cell and resets the frame boundary (§4.1 "clear()").
    pub fn clear(&mut self) {
        self.items.clear();
        self.bp = 0;
    }

    /// The type tag of the top cell without popping it (§4.1 "top_type()").
    pub fn top_type(&self) -> VmResult<Type> {
        self.peek(0).map(Value::type_tag)
    }

    /// Pushes a vector as three adjacent float cells so the stack's own
    /// invariant ("a vector occupies three adjacent float cells", §3 DATA
    /// MODEL) holds at the action-ABI boundary even though [`Value`]
    /// itself carries a vector as one bundled cell for arithmetic
    /// convenience. Layout is x on top, y below it, z deepest — popping
    /// with [`OperandStack::pop_vector`] reverses that back into
    /// `(x, y, z)` (§4.1 "push_vector / pop_vector").
    pub fn push_vector(&mut self, v: Vector) {
        self.push(Value::Float(v.z));
        self.push(Value::Float(v.y));
        self.push(Value::Float(v.x));
    }

    /// Pops three float cells laid out by [`OperandStack::push_vector`],
    /// reassembling them as `(x, y, z)`.
    pub fn pop_vector(&mut self) -> VmResult<Vector> {
        let x = self.pop_float()?;
        let y = self.pop_float()?;
        let z = self.pop_float()?;
        Ok(Vector { x, y, z })
    }

    /// Pushes a string for the fast-call FFI boundary (§4.1
    /// "push_string_neutral / pop_string_neutral"). The "neutral"
    /// distinction in the spec is about the `{ptr, len}` representation a
    /// native caller sees crossing the ABI, not about the stack cell
    /// itself — on this side of the boundary it is the same owned
    /// `Value::String` cell the slow convention uses, since Rust has no
    /// need for an unchecked raw-pointer view to stay zero-copy.
    pub fn push_string_neutral(&mut self, bytes: Vec<u8>) {
        self.push(Value::String(bytes));
    }

    pub fn pop_string_neutral(&mut self) -> VmResult<Vec<u8>> {
        self.pop_string()
    }

    /// Returns the base pointer marking the start of the active frame's
    /// locals.
    pub fn base_pointer(&self) -> usize {
        self.bp
    }

    /// Saves the current base pointer and sets a new one at the stack's
    /// current depth, for entering a subroutine call (§4.1 "save_bp").
    pub fn save_bp(&mut self) -> usize {
        let saved = self.bp;
        self.bp = self.items.len();
        saved
    }

    /// Restores a previously saved base pointer, for returning from a
    /// subroutine call.
    pub fn restore_bp(&mut self, saved: usize) {
        self.bp = saved;
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.items
    }

    /// Rebuilds the stack from a flat snapshot, used when resuming a
    /// continuation (C3 saved state).
    pub fn from_snapshot(items: Vec<Value>, bp: usize) -> Self {
        Self { items, bp }
    }

    pub fn snapshot(&self) -> (Vec<Value>, usize) {
        (self.items.clone(), self.bp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_round_trip() {
        let mut s = OperandStack::new();
        s.push(Value::Int(1));
        s.push(Value::Int(2));
        assert_eq!(s.pop_int().unwrap(), 2);
        assert_eq!(s.pop_int().unwrap(), 1);
    }

    #[test]
    fn pop_on_empty_stack_is_underflow_not_panic() {
        let mut s = OperandStack::new();
        assert!(s.pop().is_err());
    }

    #[test]
    fn type_mismatch_on_pop_int_of_a_string() {
        let mut s = OperandStack::new();
        s.push(Value::String(b"x".to_vec()));
        assert!(matches!(s.pop_int(), Err(VmError::TypeMismatch { .. })));
    }

    #[test]
    fn save_restore_bp_tracks_frame_boundary() {
        let mut s = OperandStack::new();
        s.push(Value::Int(1));
        let saved = s.save_bp();
        assert_eq!(s.base_pointer(), 1);
        s.push(Value::Int(2));
        s.restore_bp(saved);
        assert_eq!(s.base_pointer(), 0);
    }

    #[test]
    fn peek_indexes_from_the_top() {
        let mut s = OperandStack::new();
        s.push(Value::Int(10));
        s.push(Value::Int(20));
        assert_eq!(s.peek(0).unwrap(), &Value::Int(20));
        assert_eq!(s.peek(1).unwrap(), &Value::Int(10));
        assert!(s.peek(2).is_err());
    }

    #[test]
    fn push_vector_then_pop_vector_round_trips() {
        let mut s = OperandStack::new();
        s.push_vector(Vector { x: 1.0, y: 2.0, z: 3.0 });
        assert_eq!(s.depth(), 3);
        assert_eq!(s.top_type().unwrap(), Type::Float);
        let v = s.pop_vector().unwrap();
        assert_eq!(v, Vector { x: 1.0, y: 2.0, z: 3.0 });
        assert_eq!(s.depth(), 0);
    }

    #[test]
    fn clear_drops_every_cell_and_resets_bp() {
        let mut s = OperandStack::new();
        s.push(Value::Int(1));
        s.save_bp();
        s.push(Value::Int(2));
        s.clear();
        assert_eq!(s.depth(), 0);
        assert_eq!(s.base_pointer(), 0);
    }

    #[test]
    fn neutral_string_round_trips_byte_for_byte() {
        let mut s = OperandStack::new();
        s.push_string_neutral(b"hello".to_vec());
        assert_eq!(s.pop_string_neutral().unwrap(), b"hello".to_vec());
    }
}
