//! The action-service dispatch ABI (C5): the boundary between script
//! bytecode and host-native "actions" (the standard library of engine
//! calls — `GetFirstObjectInArea`, `AssignCommand`, `SetFacing`, ...).
//!
//! Two calling conventions, grounded on `NWNScriptConsole/NWScriptSimpleActions.cpp`:
//! a slow convention that pops one argument at a time off the operand
//! stack (used by the interpreter) and a fast convention that batches a
//! whole call into a command array plus a neutral-string FFI payload
//! (used by a JIT-compiled caller that wants to cross the host boundary
//! once per call instead of once per argument).

use crate::error::{VmError, VmResult};
use crate::stack::OperandStack;
use crate::value::{Type, Value};
use hashbrown::HashMap;

/// One registered action's call shape.
#[derive(Debug, Clone)]
pub struct ActionDescriptor {
    pub name: &'static str,
    pub parameter_types: Vec<Type>,
    /// Parameters from this index onward have script-side defaults; the
    /// caller may omit them, in which case the VM does not pop them at
    /// all (§4.5 "Optional trailing arguments") — the action handler sees
    /// `args.len() < parameter_types.len()` and supplies its own default.
    pub required_count: usize,
    pub return_type: Type,
}

impl ActionDescriptor {
    /// Given the total stack-cell count the `ACTION` opcode declares
    /// (§6 "an 8-bit argument count"), works backward from the last
    /// declared parameter to find how many trailing parameters were
    /// actually supplied — a vector parameter costs three cells, every
    /// other type costs one. Returns `None` when no suffix of the
    /// declared parameters matches `cell_count` exactly or the match
    /// falls short of `required_count`.
    fn supplied_params_for_cells(&self, cell_count: usize) -> Option<usize> {
        let n = self.parameter_types.len();
        for omitted in 0..=n {
            let supplied = n - omitted;
            let width: usize = self.parameter_types[..supplied]
                .iter()
                .map(|t| cell_width(*t))
                .sum();
            if width == cell_count {
                return if supplied >= self.required_count {
                    Some(supplied)
                } else {
                    None
                };
            }
            if width < cell_count {
                break;
            }
        }
        None
    }
}

/// Stack cells a value of this type occupies (§3 DATA MODEL "a vector
/// occupies three adjacent float cells"; every other type is one cell).
fn cell_width(ty: Type) -> usize {
    match ty {
        Type::Vector => 3,
        _ => 1,
    }
}

/// A host-provided implementation of one action.
pub trait ActionHandler: Send + Sync {
    fn call(&self, args: &[Value]) -> VmResult<Value>;
}

impl<F> ActionHandler for F
where
    F: Fn(&[Value]) -> VmResult<Value> + Send + Sync,
{
    fn call(&self, args: &[Value]) -> VmResult<Value> {
        self(args)
    }
}

/// The action table: action index -> descriptor + handler. Populated by
/// the embedding host at startup; the VM itself registers nothing beyond
/// the intrinsic promotion table (below).
#[derive(Default)]
pub struct ActionTable {
    descriptors: HashMap<u16, ActionDescriptor>,
    handlers: HashMap<u16, Box<dyn ActionHandler>>,
}

impl ActionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        index: u16,
        descriptor: ActionDescriptor,
        handler: impl ActionHandler + 'static,
    ) {
        self.descriptors.insert(index, descriptor);
        self.handlers.insert(index, Box::new(handler));
    }

    pub fn descriptor(&self, index: u16) -> VmResult<&ActionDescriptor> {
        self.descriptors
            .get(&index)
            .ok_or(VmError::UnknownAction { index })
    }

    /// The slow, per-argument calling convention (§4.5 "Slow calling
    /// convention"): pops `cell_count` stack cells in last-declared-first
    /// order (mirroring how they were pushed), reverses them back to
    /// declaration order, calls the handler, and pushes its return value —
    /// unless the declared return type is `Void`, in which case nothing is
    /// pushed. A vector parameter or return value occupies three adjacent
    /// float cells (§3 DATA MODEL "a vector occupies three adjacent float
    /// cells"), so `cell_count` is a cell count, not a logical-parameter
    /// count, and can exceed `parameter_types.len()` whenever a vector is
    /// present.
    pub fn call_slow(
        &self,
        index: u16,
        cell_count: u8,
        stack: &mut OperandStack,
    ) -> VmResult<()> {
        let descriptor = self.descriptor(index)?;
        let cell_count = cell_count as usize;
        let supplied = descriptor.supplied_params_for_cells(cell_count).ok_or_else(|| {
            VmError::ActionArity {
                name: descriptor.name.to_string(),
                expected: descriptor.parameter_types.len(),
                actual: cell_count,
            }
        })?;

        let mut args = Vec::with_capacity(supplied);
        for ty in descriptor.parameter_types[..supplied].iter().rev() {
            let value = if *ty == Type::Vector {
                Value::Vector(stack.pop_vector()?)
            } else {
                stack.pop()?
            };
            args.push(value);
        }
        args.reverse();

        let handler = self
            .handlers
            .get(&index)
            .expect("descriptor and handler are always registered together");
        let result = handler.call(&args)?;

        if descriptor.return_type != Type::Void {
            match (&descriptor.return_type, &result) {
                (Type::Vector, Value::Vector(v)) => stack.push_vector(*v),
                _ => stack.push(result),
            }
        }
        Ok(())
    }

    /// The fast, batched calling convention (§4.5 "Fast calling
    /// convention"): the caller has already materialized every argument
    /// into a flat [`FastCommand`] list instead of the operand stack, and
    /// gets its result back directly rather than through a push.
    pub fn call_fast(&self, index: u16, commands: &[FastCommand]) -> VmResult<Value> {
        let descriptor = self.descriptor(index)?;
        let args: Vec<Value> = commands
            .iter()
            .filter_map(|c| match c {
                FastCommand::Push(v) => Some(v.clone()),
                FastCommand::Pop => None,
            })
            .collect();

        if args.len() < descriptor.required_count || args.len() > descriptor.parameter_types.len() {
            return Err(VmError::ActionArity {
                name: descriptor.name.to_string(),
                expected: descriptor.parameter_types.len(),
                actual: args.len(),
            });
        }

        let handler = self
            .handlers
            .get(&index)
            .expect("descriptor and handler are always registered together");
        handler.call(&args)
    }
}

/// One element of a fast-convention call's command array. `Pop` exists so
/// a command array can discard a value produced by a prior command
/// without it ever reaching `args` (e.g. a neutral-string structure
/// passed by reference that the native side reads in place).
#[derive(Debug, Clone, PartialEq)]
pub enum FastCommand {
    Push(Value),
    Pop,
}

/// Intrinsic promotions (§4.5): a handful of pure string/int actions the
/// analyzer is allowed to fold into native Rust calls at analysis time
/// rather than dispatching through [`ActionTable`], because they have no
/// side effects and no dependency on host/world state. Grounded on the
/// string helpers in `NWScriptSimpleActions.cpp`
/// (`GetStringLength`/`GetSubString`/`IntToString`).
pub mod intrinsics {
    use crate::error::{VmError, VmResult};
    use crate::value::Value;

    pub fn get_string_length(s: &[u8]) -> i32 {
        s.len() as i32
    }

    /// `GetSubString(str, start, count)`: a negative `start` returns `""`;
    /// a negative `count` takes everything from `start` to the end of the
    /// string rather than nothing. Matches the original's byte-slice
    /// behavior rather than erroring on out-of-range input.
    pub fn get_sub_string(s: &[u8], start: i32, count: i32) -> Vec<u8> {
        if s.is_empty() || start < 0 {
            return Vec::new();
        }
        let start = start as usize;
        if start >= s.len() {
            return Vec::new();
        }
        let available = s.len() - start;
        let take = if count < 0 {
            available
        } else {
            (count as usize).min(available)
        };
        s[start..start + take].to_vec()
    }

    /// `GetStringLeft(str, count)`, implemented as `GetSubString(str, 0, count)`.
    pub fn get_string_left(s: &[u8], count: i32) -> Vec<u8> {
        get_sub_string(s, 0, count)
    }

    /// `GetStringRight(str, count)`: the last `count` bytes.
    pub fn get_string_right(s: &[u8], count: i32) -> Vec<u8> {
        if count <= 0 {
            return Vec::new();
        }
        let count = (count as usize).min(s.len());
        s[s.len() - count..].to_vec()
    }

    pub fn int_to_string(v: i32) -> Vec<u8> {
        v.to_string().into_bytes()
    }

    /// The inverse, used by `StringToInt` — returns `0` for an
    /// unparseable string rather than erroring, matching the original
    /// action's behavior of never failing a script over bad input.
    pub fn string_to_int(s: &[u8]) -> VmResult<i32> {
        let text = std::str::from_utf8(s).map_err(|_| {
            VmError::type_mismatch("ascii digits", "non-utf8 bytes")
        })?;
        Ok(text.trim().parse().unwrap_or(0))
    }

    pub fn value_is_string(v: &Value) -> Option<&[u8]> {
        v.as_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn double_it(args: &[Value]) -> VmResult<Value> {
        let v = args[0].as_int().ok_or_else(|| VmError::type_mismatch("int", "?"))?;
        Ok(Value::Int(v * 2))
    }

    #[test]
    fn slow_call_pops_in_declared_order_and_pushes_result() {
        let mut table = ActionTable::new();
        table.register(
            1,
            ActionDescriptor {
                name: "Double",
                parameter_types: vec![Type::Int],
                required_count: 1,
                return_type: Type::Int,
            },
            double_it,
        );
        let mut stack = OperandStack::new();
        stack.push(Value::Int(21));
        table.call_slow(1, 1, &mut stack).unwrap();
        assert_eq!(stack.pop_int().unwrap(), 42);
    }

    #[test]
    fn arity_below_minimum_is_an_error() {
        let mut table = ActionTable::new();
        table.register(
            1,
            ActionDescriptor {
                name: "Double",
                parameter_types: vec![Type::Int],
                required_count: 1,
                return_type: Type::Int,
            },
            double_it,
        );
        let mut stack = OperandStack::new();
        assert!(table.call_slow(1, 0, &mut stack).is_err());
    }

    fn negate_vector(args: &[Value]) -> VmResult<Value> {
        let v = args[0]
            .as_vector()
            .ok_or_else(|| VmError::type_mismatch("vector", "?"))?;
        Ok(Value::Vector(crate::value::Vector {
            x: -v.x,
            y: -v.y,
            z: -v.z,
        }))
    }

    #[test]
    fn vector_parameter_and_return_use_three_cells_each() {
        let mut table = ActionTable::new();
        table.register(
            2,
            ActionDescriptor {
                name: "NegateVector",
                parameter_types: vec![Type::Vector],
                required_count: 1,
                return_type: Type::Vector,
            },
            negate_vector,
        );
        let mut stack = OperandStack::new();
        stack.push_vector(crate::value::Vector {
            x: 1.0,
            y: 2.0,
            z: 3.0,
        });
        assert_eq!(stack.depth(), 3);
        table.call_slow(2, 3, &mut stack).unwrap();
        assert_eq!(stack.depth(), 3);
        let result = stack.pop_vector().unwrap();
        assert_eq!(
            result,
            crate::value::Vector {
                x: -1.0,
                y: -2.0,
                z: -3.0
            }
        );
    }

    #[test]
    fn vector_cell_count_mismatch_is_an_arity_error() {
        let mut table = ActionTable::new();
        table.register(
            2,
            ActionDescriptor {
                name: "NegateVector",
                parameter_types: vec![Type::Vector],
                required_count: 1,
                return_type: Type::Vector,
            },
            negate_vector,
        );
        let mut stack = OperandStack::new();
        stack.push(Value::Int(1));
        assert!(table.call_slow(2, 1, &mut stack).is_err());
    }

    #[test]
    fn fast_call_skips_pop_commands() {
        let mut table = ActionTable::new();
        table.register(
            1,
            ActionDescriptor {
                name: "Double",
                parameter_types: vec![Type::Int],
                required_count: 1,
                return_type: Type::Int,
            },
            double_it,
        );
        let result = table
            .call_fast(1, &[FastCommand::Push(Value::Int(10)), FastCommand::Pop])
            .unwrap();
        assert_eq!(result, Value::Int(20));
    }

    #[test]
    fn get_sub_string_clamps_out_of_range() {
        assert_eq!(intrinsics::get_sub_string(b"hello", -5, 100), b"");
        assert_eq!(intrinsics::get_sub_string(b"hello", 10, 2), b"");
        assert_eq!(intrinsics::get_string_right(b"hello", 3), b"llo");
    }

    #[test]
    fn get_sub_string_negative_count_takes_the_remainder() {
        assert_eq!(intrinsics::get_sub_string(b"hello", 1, -1), b"ello");
        assert_eq!(intrinsics::get_sub_string(b"hello", 0, -1), b"hello");
    }

    #[test]
    fn string_to_int_defaults_to_zero_on_garbage() {
        assert_eq!(intrinsics::string_to_int(b"not a number").unwrap(), 0);
        assert_eq!(intrinsics::string_to_int(b"42").unwrap(), 42);
    }
}
