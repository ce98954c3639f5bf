//! Builds [`crate::ir`] from raw bytecode (C3).
//!
//! Two passes build the control-flow graph, as the GLOSSARY's "two-pass
//! jump-target discovery" entry describes: the first walks every
//! reachable instruction (following `JMP`/`JZ`/`JNZ` and queuing `JSR`
//! call targets as separate subroutines) to learn the full set of branch
//! targets; the second re-walks the same instructions and cuts
//! basic-block boundaries at every target, because a one-pass walk
//! cannot know a forward jump lands mid-block until it has already
//! emitted past that point.
//!
//! A third pass — [`raise_block`] — replays each block's raw decoded
//! instructions through a typed forward abstract interpretation of the
//! operand stack, emitting the closed [`crate::ir::IrInstr`] set in place
//! of the raw bytecode and raising [`AnalyzeError::TypeMismatch`] the
//! moment a persistent local/global slot is assigned a type incompatible
//! with one it already carries.

use crate::action::ActionTable;
use crate::error::{AnalyzeError, AnalyzeResult};
use crate::instruction::{decode, Instruction, Operand};
use crate::ir::{
    AnalysisFlags, BasicBlock, BinOp, IrInstr, Program, Subroutine, Terminator, UnOp, VarId,
    Variable, VariableClass,
};
use crate::opcode::{OpCode, TypeByte};
use crate::value::Type;
use nwscript_io::{ScriptReader, SymbolTable};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Analyzes every subroutine reachable from `entry_points`, producing a
/// full [`Program`]. `symbols`, if present, supplies subroutine names and
/// declared parameter/return types (§4.3 "uses the symbol table when
/// present"). `actions`, if present, lets `ACTION` instructions learn
/// whether the call they dispatch pushes a return value; with no table a
/// called action is conservatively assumed to return nothing.
pub fn analyze(
    reader: &ScriptReader,
    entry_points: &[u32],
    symbols: Option<&SymbolTable>,
    actions: Option<&ActionTable>,
    flags: AnalysisFlags,
) -> AnalyzeResult<Program> {
    let mut program = Program::default();
    let mut pending: VecDeque<u32> = entry_points.iter().copied().collect();
    let mut seen_entries: BTreeSet<u32> = BTreeSet::new();

    while let Some(entry_pc) = pending.pop_front() {
        if !seen_entries.insert(entry_pc) {
            continue;
        }
        let (subroutine, called) = analyze_subroutine(reader, entry_pc, symbols, actions, flags)?;
        program.subroutines.insert(entry_pc, subroutine);
        for target in called {
            pending.push_back(target);
        }
    }

    Ok(program)
}

fn analyze_subroutine(
    reader: &ScriptReader,
    entry_pc: u32,
    symbols: Option<&SymbolTable>,
    actions: Option<&ActionTable>,
    flags: AnalysisFlags,
) -> AnalyzeResult<(Subroutine, Vec<u32>)> {
    let mut reader = reader.clone();
    let mut instructions: BTreeMap<u32, Instruction> = BTreeMap::new();
    let mut boundaries: BTreeSet<u32> = BTreeSet::new();
    let mut called_subroutines: Vec<u32> = Vec::new();
    boundaries.insert(entry_pc);

    // Pass 1: walk every reachable instruction, recording jump targets
    // (which become block boundaries) and JSR call targets (which become
    // separate subroutines, never inlined into this one).
    let mut run_starts: VecDeque<u32> = VecDeque::new();
    run_starts.push_back(entry_pc);

    while let Some(mut pc) = run_starts.pop_front() {
        loop {
            if instructions.contains_key(&pc) {
                break;
            }
            reader.seek(pc as usize)?;
            let instr = decode(&mut reader)?;
            let next_pc = instr.next_pc;

            match instr.opcode {
                OpCode::Jmp => {
                    if let Operand::Jump(target) = instr.operand {
                        boundaries.insert(target);
                        run_starts.push_back(target);
                    }
                    instructions.insert(pc, instr);
                    break;
                }
                OpCode::Jz | OpCode::Jnz => {
                    if let Operand::Jump(target) = instr.operand {
                        boundaries.insert(target);
                        boundaries.insert(next_pc);
                        run_starts.push_back(target);
                        run_starts.push_back(next_pc);
                    }
                    instructions.insert(pc, instr);
                    break;
                }
                OpCode::Retn => {
                    instructions.insert(pc, instr);
                    break;
                }
                OpCode::Jsr => {
                    if let Operand::Jump(target) = instr.operand {
                        called_subroutines.push(target);
                    }
                    instructions.insert(pc, instr);
                    pc = next_pc;
                }
                _ => {
                    instructions.insert(pc, instr);
                    pc = next_pc;
                }
            }
        }
    }

    // Pass 2: cut blocks at every recorded boundary.
    let pcs: Vec<u32> = instructions.keys().copied().collect();
    let mut raw_blocks: BTreeMap<u32, (Vec<Instruction>, Terminator)> = BTreeMap::new();
    let mut predecessors: BTreeMap<u32, BTreeSet<u32>> = BTreeMap::new();

    let mut i = 0;
    while i < pcs.len() {
        let start_pc = pcs[i];
        let mut body = Vec::new();
        let terminator;
        loop {
            let instr = instructions.get(&pcs[i]).expect("decoded in pass 1");
            match instr.opcode {
                OpCode::Jmp => {
                    let target = match instr.operand {
                        Operand::Jump(t) => t,
                        _ => unreachable!("JMP always decodes a Jump operand"),
                    };
                    predecessors.entry(target).or_default().insert(start_pc);
                    terminator = Terminator::Transfer { target };
                    body.push(instr.clone());
                    i += 1;
                    break;
                }
                OpCode::Jz | OpCode::Jnz => {
                    let taken = match instr.operand {
                        Operand::Jump(t) => t,
                        _ => unreachable!("JZ/JNZ always decodes a Jump operand"),
                    };
                    let not_taken = instr.next_pc;
                    predecessors.entry(taken).or_default().insert(start_pc);
                    predecessors
                        .entry(not_taken)
                        .or_default()
                        .insert(start_pc);
                    terminator = Terminator::Split { taken, not_taken };
                    body.push(instr.clone());
                    i += 1;
                    break;
                }
                OpCode::Retn => {
                    terminator = Terminator::Return;
                    body.push(instr.clone());
                    i += 1;
                    break;
                }
                _ => {
                    body.push(instr.clone());
                    i += 1;
                    if i >= pcs.len() {
                        terminator = Terminator::Halt;
                        break;
                    }
                    if boundaries.contains(&pcs[i]) {
                        let target = pcs[i];
                        predecessors.entry(target).or_default().insert(start_pc);
                        terminator = Terminator::Transfer { target };
                        break;
                    }
                }
            }
        }

        raw_blocks.insert(start_pc, (body, terminator));
    }

    let mut is_merge_point: BTreeMap<u32, bool> = BTreeMap::new();
    for pc in raw_blocks.keys() {
        let merge = predecessors.get(pc).map(|p| p.len()).unwrap_or(0) > 1;
        is_merge_point.insert(*pc, merge);
    }

    let name = symbols.and_then(|s| s.find_by_pc(entry_pc)).map(|s| s.name.clone());
    let symbol = symbols.and_then(|s| s.find_by_pc(entry_pc));
    let parameters: Vec<Type> = symbol
        .map(|s| s.parameter_types.iter().map(|t| Type::from(*t)).collect())
        .unwrap_or_default();
    let return_types: Vec<Type> = symbol
        .and_then(|s| s.return_type)
        .map(|t| vec![Type::from(t)])
        .unwrap_or_default();

    let (blocks, variables) = if flags.structure_only {
        let blocks = raw_blocks
            .into_iter()
            .map(|(start_pc, (_body, terminator))| {
                let merge = is_merge_point[&start_pc];
                (
                    start_pc,
                    BasicBlock {
                        start_pc,
                        instructions: Vec::new(),
                        terminator,
                        is_merge_point: merge,
                    },
                )
            })
            .collect();
        (blocks, Vec::new())
    } else {
        raise_subroutine(raw_blocks, &is_merge_point, &parameters, actions)?
    };

    Ok((
        Subroutine {
            name,
            entry_pc,
            blocks,
            variables,
            parameters,
            return_types,
        },
        called_subroutines,
    ))
}

/// Tracks every [`crate::ir::Variable`] discovered so far and the
/// persistent local/global identity bound to each base-pointer offset,
/// shared across every block of one subroutine.
struct SubroutineBuilder<'a> {
    variables: Vec<Variable>,
    /// `bp offset -> variable id`, populated lazily on first reference
    /// (§4.1 BP-offset sign convention: negative is `Global`, non-negative
    /// is `Local`/`Parameter`).
    persistent: BTreeMap<i32, VarId>,
    parameters: &'a [Type],
}

impl<'a> SubroutineBuilder<'a> {
    fn new(parameters: &'a [Type]) -> Self {
        Self {
            variables: Vec::new(),
            persistent: BTreeMap::new(),
            parameters,
        }
    }

    fn new_var(&mut self, ty: Type, class: VariableClass) -> VarId {
        let id = self.variables.len();
        self.variables.push(Variable {
            slot: id as i32,
            ty,
            class,
            multiply_created: false,
        });
        id
    }

    fn ty(&self, id: VarId) -> Type {
        self.variables[id].ty
    }

    /// Resolves the persistent variable a `CPTOPBP`/`CPTOPSP`-style load
    /// from `offset` reads. A never-before-seen offset that falls within
    /// the symbol table's declared parameter range is classified
    /// `Parameter` with its declared type (the caller populates it before
    /// this subroutine's first instruction runs, so a load can be the
    /// very first reference); any other never-before-seen offset is
    /// classified by the BP-offset sign convention and given a
    /// placeholder `Int` type until a later store teaches us its real one.
    /// Reading an already-bound slot from a merge-point block marks it
    /// `multiply_created` — a join can be reached from more than one
    /// definition of this slot, so the JIT cannot assume a single
    /// register holds it across the join (§4.3 "MultiplyCreated").
    fn load_persistent(&mut self, offset: i32, at_merge_point: bool) -> VarId {
        if let Some(&id) = self.persistent.get(&offset) {
            if at_merge_point {
                self.variables[id].multiply_created = true;
            }
            return id;
        }
        let (class, ty) = if offset >= 0 && (offset as usize) < self.parameters.len() {
            (VariableClass::Parameter, self.parameters[offset as usize])
        } else if offset < 0 {
            (VariableClass::Global, Type::Int)
        } else {
            (VariableClass::Local, Type::Int)
        };
        let id = self.new_var(ty, class);
        self.persistent.insert(offset, id);
        id
    }

    /// Records a store of `value` to the persistent slot at `offset`,
    /// raising `TypeMismatch` when that slot already carries an
    /// incompatible type and marking it `multiply_created` when a store
    /// at a CFG join point (`at_merge_point`) overwrites an existing
    /// binding with a different variable (§4.3 "MultiplyCreated").
    fn store_persistent(
        &mut self,
        offset: i32,
        value: VarId,
        at_merge_point: bool,
        pc: u32,
    ) -> AnalyzeResult<VarId> {
        let value_ty = self.ty(value);
        if let Some(&existing) = self.persistent.get(&offset) {
            let existing_ty = self.ty(existing);
            if existing_ty != value_ty {
                return Err(AnalyzeError::TypeMismatch {
                    pc,
                    expected: existing_ty.to_string(),
                    found: value_ty.to_string(),
                });
            }
            if at_merge_point {
                self.variables[existing].multiply_created = true;
            }
            Ok(existing)
        } else {
            let class = if offset < 0 {
                VariableClass::Global
            } else {
                VariableClass::Local
            };
            let id = self.new_var(value_ty, class);
            self.persistent.insert(offset, id);
            Ok(id)
        }
    }
}

fn raise_subroutine(
    raw_blocks: BTreeMap<u32, (Vec<Instruction>, Terminator)>,
    is_merge_point: &BTreeMap<u32, bool>,
    parameters: &[Type],
    actions: Option<&ActionTable>,
) -> AnalyzeResult<(BTreeMap<u32, BasicBlock>, Vec<Variable>)> {
    let mut builder = SubroutineBuilder::new(parameters);
    let mut blocks = BTreeMap::new();

    for (start_pc, (body, terminator)) in raw_blocks {
        let merge = is_merge_point.get(&start_pc).copied().unwrap_or(false);
        let instructions = raise_block(&body, &mut builder, merge, actions)?;
        blocks.insert(
            start_pc,
            BasicBlock {
                start_pc,
                instructions,
                terminator,
                is_merge_point: merge,
            },
        );
    }

    Ok((blocks, builder.variables))
}

fn binop_kind(opcode: OpCode) -> Option<BinOp> {
    use OpCode::*;
    Some(match opcode {
        Add => BinOp::Add,
        Sub => BinOp::Sub,
        Mul => BinOp::Mul,
        Div => BinOp::Div,
        Mod => BinOp::Mod,
        Incor => BinOp::Incor,
        Excor => BinOp::Excor,
        Booland => BinOp::Booland,
        Logand => BinOp::Logand,
        Logor => BinOp::Logor,
        Shleft => BinOp::Shleft,
        Shright => BinOp::Shright,
        Ushright => BinOp::Ushright,
        Equal => BinOp::Equal,
        Nequal => BinOp::Nequal,
        Lt => BinOp::Lt,
        Leq => BinOp::Leq,
        Gt => BinOp::Gt,
        Geq => BinOp::Geq,
        _ => return None,
    })
}

fn unop_kind(opcode: OpCode) -> Option<UnOp> {
    match opcode {
        OpCode::Neg => Some(UnOp::Neg),
        OpCode::Not => Some(UnOp::Not),
        OpCode::Comp => Some(UnOp::Comp),
        _ => None,
    }
}

/// Mirrors the interpreter's own runtime typing rules for binary
/// operators (`add_values`/`sub_values`/... in `interpreter.rs`), at the
/// type level instead of the value level, raising `TypeMismatch` for any
/// combination the interpreter itself would reject.
fn infer_binop_type(op: BinOp, lhs: Type, rhs: Type, pc: u32) -> AnalyzeResult<Type> {
    let mismatch = |expected: &str| AnalyzeError::TypeMismatch {
        pc,
        expected: expected.to_string(),
        found: format!("{lhs} and {rhs}"),
    };
    match op {
        BinOp::Add => match (lhs, rhs) {
            (Type::Int, Type::Int) => Ok(Type::Int),
            (Type::Float, Type::Float) | (Type::Int, Type::Float) | (Type::Float, Type::Int) => Ok(Type::Float),
            (Type::String, Type::String) => Ok(Type::String),
            (Type::Vector, Type::Vector) => Ok(Type::Vector),
            _ => Err(mismatch("two ints, two floats, a mixed int/float pair, two strings, or two vectors")),
        },
        BinOp::Sub => match (lhs, rhs) {
            (Type::Int, Type::Int) => Ok(Type::Int),
            (Type::Float, Type::Float) | (Type::Int, Type::Float) | (Type::Float, Type::Int) => Ok(Type::Float),
            (Type::Vector, Type::Vector) => Ok(Type::Vector),
            _ => Err(mismatch("two ints, two floats, a mixed int/float pair, or two vectors")),
        },
        BinOp::Mul => match (lhs, rhs) {
            (Type::Int, Type::Int) => Ok(Type::Int),
            (Type::Float, Type::Float) | (Type::Int, Type::Float) | (Type::Float, Type::Int) => Ok(Type::Float),
            (Type::Vector, Type::Float) | (Type::Float, Type::Vector) => Ok(Type::Vector),
            _ => Err(mismatch("two ints, two floats, a mixed int/float pair, or a vector/float pair")),
        },
        BinOp::Div => match (lhs, rhs) {
            (Type::Int, Type::Int) => Ok(Type::Int),
            (Type::Float, Type::Float) | (Type::Int, Type::Float) | (Type::Float, Type::Int) => Ok(Type::Float),
            _ => Err(mismatch("two ints, two floats, or a mixed int/float pair")),
        },
        BinOp::Mod => match (lhs, rhs) {
            (Type::Int, Type::Int) => Ok(Type::Int),
            _ => Err(mismatch("two ints")),
        },
        BinOp::Incor | BinOp::Excor | BinOp::Booland | BinOp::Logand | BinOp::Logor
        | BinOp::Shleft | BinOp::Shright | BinOp::Ushright => match (lhs, rhs) {
            (Type::Int, Type::Int) => Ok(Type::Int),
            _ => Err(mismatch("two ints")),
        },
        BinOp::Equal | BinOp::Nequal => {
            if lhs == rhs {
                Ok(Type::Int)
            } else {
                Err(mismatch("operands of the same type"))
            }
        }
        BinOp::Lt | BinOp::Leq | BinOp::Gt | BinOp::Geq => match (lhs, rhs) {
            (Type::Int, Type::Int) | (Type::Float, Type::Float) => Ok(Type::Int),
            _ => Err(mismatch("two ints or two floats")),
        },
    }
}

fn infer_unop_type(op: UnOp, src: Type, pc: u32) -> AnalyzeResult<Type> {
    match (op, src) {
        (UnOp::Neg, Type::Int) | (UnOp::Comp, Type::Int) => Ok(Type::Int),
        (UnOp::Neg, Type::Float) => Ok(Type::Float),
        (UnOp::Not, Type::Int) => Ok(Type::Int),
        (UnOp::Inc, _) | (UnOp::Dec, _) => Ok(src),
        _ => Err(AnalyzeError::TypeMismatch {
            pc,
            expected: "an operand matching this unary operator".to_string(),
            found: src.to_string(),
        }),
    }
}

/// Replays one block's raw decoded instructions as a typed forward
/// abstract interpretation of the operand stack, emitting the closed
/// `IrInstr` set. The block's own transient stack always starts and ends
/// empty (Invariant I4, "the operand stack is empty at subroutine entry
/// ... and at subroutine return", extended pragmatically to every block
/// boundary since compiled NWScript never leaves a partial expression
/// live across a jump); persistent local/global identity instead lives
/// in `builder`, shared across the whole subroutine.
fn raise_block(
    body: &[Instruction],
    builder: &mut SubroutineBuilder,
    is_merge_point: bool,
    actions: Option<&ActionTable>,
) -> AnalyzeResult<Vec<IrInstr>> {
    let mut ir = Vec::new();
    let mut stack: Vec<VarId> = Vec::new();

    let underflow = |pc: u32| AnalyzeError::Malformed {
        pc,
        reason: "operand stack underflow while building ir".to_string(),
    };

    for instr in body {
        match instr.opcode {
            OpCode::Const => {
                if let Operand::Immediate(v) = &instr.operand {
                    let id = builder.new_var(v.type_tag(), VariableClass::Constant);
                    ir.push(IrInstr::Create(id));
                    ir.push(IrInstr::Initialize(id));
                    stack.push(id);
                }
            }

            OpCode::Rsadd => {
                let ty = match instr.type_byte {
                    Some(TypeByte::Int) => Type::Int,
                    Some(TypeByte::Float) => Type::Float,
                    Some(TypeByte::String) => Type::String,
                    Some(TypeByte::Object) => Type::Object,
                    _ => Type::Int,
                };
                let id = builder.new_var(ty, VariableClass::Local);
                ir.push(IrInstr::Create(id));
                ir.push(IrInstr::Initialize(id));
                stack.push(id);
            }

            OpCode::Cpdownbp => {
                if let Operand::StackOffsetSize { offset, .. } = instr.operand {
                    // Copies the top value down to `offset` without
                    // popping it (this crate's interpreter peeks, never
                    // pops, the source cell).
                    let src = *stack.last().ok_or_else(|| underflow(instr.pc))?;
                    let dst = builder.store_persistent(offset, src, is_merge_point, instr.pc)?;
                    ir.push(IrInstr::Assign { src, dst });
                }
            }

            OpCode::Cptopbp => {
                if let Operand::StackOffsetSize { offset, .. } = instr.operand {
                    let src = builder.load_persistent(offset, is_merge_point);
                    let dst = builder.new_var(builder.ty(src), VariableClass::Local);
                    ir.push(IrInstr::Assign { src, dst });
                    stack.push(dst);
                }
            }

            OpCode::Cpdownsp => {
                if let Operand::StackOffsetSize { offset, .. } = instr.operand {
                    let idx = sp_relative_index(stack.len(), offset, instr.pc)?;
                    let src = *stack.last().ok_or_else(|| underflow(instr.pc))?;
                    let dst = stack[idx];
                    ir.push(IrInstr::Assign { src, dst });
                    stack[idx] = src;
                }
            }

            OpCode::Cptopsp => {
                if let Operand::StackOffsetSize { offset, .. } = instr.operand {
                    let idx = sp_relative_index(stack.len(), offset, instr.pc)?;
                    let src = stack[idx];
                    let dst = builder.new_var(builder.ty(src), VariableClass::Local);
                    ir.push(IrInstr::Assign { src, dst });
                    stack.push(dst);
                }
            }

            OpCode::Movsp => {
                if let Operand::StackAdjust(delta) = instr.operand {
                    if delta > 0 {
                        let count = (delta / 4) as usize;
                        for _ in 0..count {
                            let id = stack.pop().ok_or_else(|| underflow(instr.pc))?;
                            ir.push(IrInstr::Delete(id));
                        }
                    } else if delta < 0 {
                        let count = ((-delta) / 4) as usize;
                        for _ in 0..count {
                            let id = builder.new_var(Type::Int, VariableClass::Local);
                            ir.push(IrInstr::Create(id));
                            ir.push(IrInstr::Initialize(id));
                            stack.push(id);
                        }
                    }
                }
            }

            OpCode::Decsp => {
                // Always reserves, regardless of the operand's sign (the
                // interpreter's `adjust_stack` is called with the
                // magnitude).
                if let Operand::StackAdjust(delta) = instr.operand {
                    let count = (delta.unsigned_abs() / 4) as usize;
                    for _ in 0..count {
                        let id = builder.new_var(Type::Int, VariableClass::Local);
                        ir.push(IrInstr::Create(id));
                        ir.push(IrInstr::Initialize(id));
                        stack.push(id);
                    }
                }
            }

            OpCode::Incsp => {
                // Always releases, regardless of the operand's sign.
                if let Operand::StackAdjust(delta) = instr.operand {
                    let count = (delta.unsigned_abs() / 4) as usize;
                    for _ in 0..count {
                        let id = stack.pop().ok_or_else(|| underflow(instr.pc))?;
                        ir.push(IrInstr::Delete(id));
                    }
                }
            }

            OpCode::Destruct => {
                if let Operand::StructShape { element_count, .. } = instr.operand {
                    let kept = stack.pop().ok_or_else(|| underflow(instr.pc))?;
                    for _ in 0..element_count {
                        let id = stack.pop().ok_or_else(|| underflow(instr.pc))?;
                        ir.push(IrInstr::Delete(id));
                    }
                    stack.push(kept);
                }
            }

            op if binop_kind(op).is_some() => {
                let kind = binop_kind(op).unwrap();
                if instr.type_byte == Some(TypeByte::StructStruct) {
                    // Struct-wise EQUAL/NEQUAL: pops `2 * element_count`
                    // cells and pushes one int result.
                    if let Operand::StructShape { element_count, .. } = instr.operand {
                        for _ in 0..(element_count as usize * 2) {
                            stack.pop().ok_or_else(|| underflow(instr.pc))?;
                        }
                    }
                    let dst = builder.new_var(Type::Int, VariableClass::Local);
                    ir.push(IrInstr::Create(dst));
                    ir.push(IrInstr::Initialize(dst));
                    stack.push(dst);
                } else {
                    let rhs = stack.pop().ok_or_else(|| underflow(instr.pc))?;
                    let lhs = stack.pop().ok_or_else(|| underflow(instr.pc))?;
                    let result_ty = infer_binop_type(kind, builder.ty(lhs), builder.ty(rhs), instr.pc)?;
                    let dst = builder.new_var(result_ty, VariableClass::Local);
                    ir.push(IrInstr::BinaryOp {
                        op: kind,
                        lhs,
                        rhs,
                        dst,
                    });
                    stack.push(dst);
                }
            }

            op if unop_kind(op).is_some() => {
                let kind = unop_kind(op).unwrap();
                let src = stack.pop().ok_or_else(|| underflow(instr.pc))?;
                let result_ty = infer_unop_type(kind, builder.ty(src), instr.pc)?;
                let dst = builder.new_var(result_ty, VariableClass::Local);
                ir.push(IrInstr::UnaryOp { op: kind, src, dst });
                stack.push(dst);
            }

            OpCode::Action => {
                if let Operand::Action { index, arg_count } = instr.operand {
                    let mut args = Vec::with_capacity(arg_count as usize);
                    for _ in 0..arg_count {
                        args.push(stack.pop().ok_or_else(|| underflow(instr.pc))?);
                    }
                    args.reverse();
                    for &a in &args {
                        builder.variables[a].class = VariableClass::CallParameter;
                    }
                    let returns_value = actions
                        .and_then(|t| t.descriptor(index).ok())
                        .map(|d| d.return_type != Type::Void)
                        .unwrap_or(false);
                    let mut rets = Vec::new();
                    if returns_value {
                        let id = builder.new_var(Type::Int, VariableClass::CallReturnValue);
                        rets.push(id);
                        stack.push(id);
                    }
                    ir.push(IrInstr::Action {
                        id: index,
                        args,
                        rets,
                    });
                }
            }

            OpCode::Jsr => {
                if let Operand::Jump(target) = instr.operand {
                    ir.push(IrInstr::Call {
                        target,
                        args: Vec::new(),
                        rets: Vec::new(),
                    });
                }
            }

            OpCode::Jz | OpCode::Jnz => {
                let value = stack.pop().ok_or_else(|| underflow(instr.pc))?;
                ir.push(IrInstr::Test { value });
            }

            OpCode::Retn => {
                ir.push(IrInstr::Retn);
            }

            OpCode::StoreState | OpCode::StoreStateAll => {
                ir.push(IrInstr::SaveState {
                    target: instr.next_pc,
                    globals: Vec::new(),
                    locals: Vec::new(),
                });
            }

            OpCode::Jmp
            | OpCode::Savebp
            | OpCode::Restorebp
            | OpCode::Incbp
            | OpCode::Decbp
            | OpCode::Nop => {
                // No operand-stack effect.
            }

            _ => {}
        }
    }

    Ok(ir)
}

/// Converts an `SP`-relative `offset` (as carried by `CPDOWNSP`/`CPTOPSP`)
/// into an index into this block's transient abstract stack, mirroring
/// the interpreter's `index_from_top` formula.
fn sp_relative_index(stack_len: usize, offset: i32, pc: u32) -> AnalyzeResult<usize> {
    let absolute = stack_len as i64 + offset as i64;
    if absolute < 0 || absolute as usize >= stack_len {
        return Err(AnalyzeError::Malformed {
            pc,
            reason: format!("sp-relative offset {offset} is out of range for a stack of depth {stack_len}"),
        });
    }
    Ok(absolute as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::VariableClass;
    use crate::opcode::{OpCode, TypeByte};
    use nwscript_io::SymbolTable;

    /// Hand-encodes a one-subroutine symbol table in the wire format
    /// `SymbolTable::parse` expects (see `nwscript_io::symbol_table`):
    /// `count:u16`, then per record `name_len:u8, name, start:u32, end:u32,
    /// param_count:u8, param type tags, has_return:u8, [return type tag]`.
    /// `TypeTag` byte values: `Int=0, Float=1, String=2`.
    fn encode_symbol_table(name: &str, start: u32, end: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&1u16.to_be_bytes());
        buf.push(name.len() as u8);
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(&start.to_be_bytes());
        buf.extend_from_slice(&end.to_be_bytes());
        buf.push(2); // two parameters
        buf.push(0); // Int
        buf.push(2); // String
        buf.push(1); // has_return
        buf.push(1); // Float
        buf
    }

    fn push_const_int(buf: &mut Vec<u8>, v: i32) {
        buf.push(OpCode::Const as u8);
        buf.push(TypeByte::Int as u8);
        buf.extend_from_slice(&v.to_be_bytes());
    }

    #[test]
    fn straight_line_subroutine_has_one_block_ending_in_return() {
        let mut bytes = Vec::new();
        push_const_int(&mut bytes, 1);
        bytes.push(OpCode::Retn as u8);
        let reader = ScriptReader::new("test", bytes);

        let program = analyze(&reader, &[0], None, None, AnalysisFlags::default()).unwrap();
        let sub = program.subroutine_at(0).unwrap();
        assert_eq!(sub.blocks.len(), 1);
        assert_eq!(sub.block_at(0).unwrap().terminator, Terminator::Return);
        // CONST emits Create+Initialize, RETN emits Retn.
        assert_eq!(
            sub.block_at(0).unwrap().instructions,
            vec![
                IrInstr::Create(0),
                IrInstr::Initialize(0),
                IrInstr::Retn,
            ]
        );
    }

    #[test]
    fn conditional_branch_splits_into_three_blocks() {
        // CONST 1 ; JZ +X ; CONST 2 ; RETN ; <target> CONST 3 ; RETN
        let mut bytes = Vec::new();
        push_const_int(&mut bytes, 1);
        let jz_pc = bytes.len() as i32;
        bytes.push(OpCode::Jz as u8);
        let branch_operand_pos = bytes.len();
        bytes.extend_from_slice(&0i32.to_be_bytes()); // patched below
        push_const_int(&mut bytes, 2);
        bytes.push(OpCode::Retn as u8);
        let target_pc = bytes.len() as i32;
        push_const_int(&mut bytes, 3);
        bytes.push(OpCode::Retn as u8);

        let rel = target_pc - jz_pc;
        bytes[branch_operand_pos..branch_operand_pos + 4].copy_from_slice(&rel.to_be_bytes());

        let reader = ScriptReader::new("test", bytes);
        let program = analyze(&reader, &[0], None, None, AnalysisFlags::default()).unwrap();
        let sub = program.subroutine_at(0).unwrap();
        assert_eq!(sub.blocks.len(), 3);
        // The entry block's CONST+JZ lowers to Create/Initialize/Test.
        let entry = sub.block_at(0).unwrap();
        assert!(matches!(entry.instructions.last(), Some(IrInstr::Test { .. })));
    }

    #[test]
    fn jsr_queues_a_separate_subroutine_without_inlining_it() {
        let mut bytes = Vec::new();
        let jsr_pc = bytes.len() as i32;
        bytes.push(OpCode::Jsr as u8);
        let operand_pos = bytes.len();
        bytes.extend_from_slice(&0i32.to_be_bytes());
        bytes.push(OpCode::Retn as u8);
        let callee_pc = bytes.len() as i32;
        push_const_int(&mut bytes, 9);
        bytes.push(OpCode::Retn as u8);

        let rel = callee_pc - jsr_pc;
        bytes[operand_pos..operand_pos + 4].copy_from_slice(&rel.to_be_bytes());

        let reader = ScriptReader::new("test", bytes);
        let program = analyze(&reader, &[0], None, None, AnalysisFlags::default()).unwrap();
        assert_eq!(program.subroutines.len(), 2);
        assert!(program.subroutine_at(callee_pc as u32).is_some());

        let entry = program.subroutine_at(0).unwrap();
        assert_eq!(
            entry.block_at(0).unwrap().instructions[0],
            IrInstr::Call {
                target: callee_pc as u32,
                args: Vec::new(),
                rets: Vec::new(),
            }
        );
    }

    #[test]
    fn incompatible_merge_assignment_is_a_type_mismatch() {
        // Two predecessors store different types into the same BP-relative
        // local before falling into a shared block that reads it back.
        //
        //   CONST 1 ; JZ else
        //   CONST 2 int ; CPDOWNBP 0 ; JMP join
        // else:
        //   CONST 1.0 float ; CPDOWNBP 0 ; JMP join   (falls through)
        // join:
        //   CPTOPBP 0 ; RETN
        let mut bytes = Vec::new();
        push_const_int(&mut bytes, 1);
        let jz_pc = bytes.len() as i32;
        bytes.push(OpCode::Jz as u8);
        let jz_operand_pos = bytes.len();
        bytes.extend_from_slice(&0i32.to_be_bytes());

        push_const_int(&mut bytes, 2);
        bytes.push(OpCode::Cpdownbp as u8);
        bytes.extend_from_slice(&0i32.to_be_bytes());
        bytes.extend_from_slice(&4u16.to_be_bytes());
        let jmp_pc = bytes.len() as i32;
        bytes.push(OpCode::Jmp as u8);
        let jmp_operand_pos = bytes.len();
        bytes.extend_from_slice(&0i32.to_be_bytes());

        let else_pc = bytes.len() as i32;
        bytes.push(OpCode::Const as u8);
        bytes.push(TypeByte::Float as u8);
        bytes.extend_from_slice(&1.0f32.to_be_bytes());
        bytes.push(OpCode::Cpdownbp as u8);
        bytes.extend_from_slice(&0i32.to_be_bytes());
        bytes.extend_from_slice(&4u16.to_be_bytes());

        let join_pc = bytes.len() as i32;
        bytes.push(OpCode::Cptopbp as u8);
        bytes.extend_from_slice(&0i32.to_be_bytes());
        bytes.extend_from_slice(&4u16.to_be_bytes());
        bytes.push(OpCode::Retn as u8);

        let jz_rel = else_pc - jz_pc;
        bytes[jz_operand_pos..jz_operand_pos + 4].copy_from_slice(&jz_rel.to_be_bytes());
        let jmp_rel = join_pc - jmp_pc;
        bytes[jmp_operand_pos..jmp_operand_pos + 4].copy_from_slice(&jmp_rel.to_be_bytes());

        let reader = ScriptReader::new("test", bytes);
        let err = analyze(&reader, &[0], None, None, AnalysisFlags::default()).unwrap_err();
        assert!(matches!(err, AnalyzeError::TypeMismatch { .. }));
    }

    #[test]
    fn subroutine_picks_up_parameter_and_return_types_from_the_symbol_table() {
        let mut bytes = Vec::new();
        push_const_int(&mut bytes, 1);
        bytes.push(OpCode::Retn as u8);
        let reader = ScriptReader::new("test", bytes);

        let symbols = SymbolTable::parse(&encode_symbol_table("DoThing", 0, 10)).unwrap();

        let program = analyze(&reader, &[0], Some(&symbols), None, AnalysisFlags::default()).unwrap();
        let sub = program.subroutine_at(0).unwrap();
        assert_eq!(sub.name.as_deref(), Some("DoThing"));
        assert_eq!(sub.parameters, vec![Type::Int, Type::String]);
        assert_eq!(sub.return_types, vec![Type::Float]);
    }

    #[test]
    fn structure_only_flag_skips_ir_emission_but_keeps_the_cfg() {
        let mut bytes = Vec::new();
        push_const_int(&mut bytes, 1);
        bytes.push(OpCode::Retn as u8);
        let reader = ScriptReader::new("test", bytes);

        let program = analyze(
            &reader,
            &[0],
            None,
            None,
            AnalysisFlags {
                structure_only: true,
                ..AnalysisFlags::default()
            },
        )
        .unwrap();
        let sub = program.subroutine_at(0).unwrap();
        assert!(sub.block_at(0).unwrap().instructions.is_empty());
        assert!(sub.variables.is_empty());
    }

    #[test]
    fn multiply_created_is_set_when_a_merge_point_rebinds_a_local() {
        // Same shape as the type-mismatch test, but both branches store the
        // *same* type so no error is raised; the join should still mark the
        // local `multiply_created`.
        let mut bytes = Vec::new();
        push_const_int(&mut bytes, 1);
        let jz_pc = bytes.len() as i32;
        bytes.push(OpCode::Jz as u8);
        let jz_operand_pos = bytes.len();
        bytes.extend_from_slice(&0i32.to_be_bytes());

        push_const_int(&mut bytes, 2);
        bytes.push(OpCode::Cpdownbp as u8);
        bytes.extend_from_slice(&0i32.to_be_bytes());
        bytes.extend_from_slice(&4u16.to_be_bytes());
        let jmp_pc = bytes.len() as i32;
        bytes.push(OpCode::Jmp as u8);
        let jmp_operand_pos = bytes.len();
        bytes.extend_from_slice(&0i32.to_be_bytes());

        let else_pc = bytes.len() as i32;
        push_const_int(&mut bytes, 3);
        bytes.push(OpCode::Cpdownbp as u8);
        bytes.extend_from_slice(&0i32.to_be_bytes());
        bytes.extend_from_slice(&4u16.to_be_bytes());

        let join_pc = bytes.len() as i32;
        bytes.push(OpCode::Cptopbp as u8);
        bytes.extend_from_slice(&0i32.to_be_bytes());
        bytes.extend_from_slice(&4u16.to_be_bytes());
        bytes.push(OpCode::Retn as u8);

        let jz_rel = else_pc - jz_pc;
        bytes[jz_operand_pos..jz_operand_pos + 4].copy_from_slice(&jz_rel.to_be_bytes());
        let jmp_rel = join_pc - jmp_pc;
        bytes[jmp_operand_pos..jmp_operand_pos + 4].copy_from_slice(&jmp_rel.to_be_bytes());

        let reader = ScriptReader::new("test", bytes);
        let program = analyze(&reader, &[0], None, None, AnalysisFlags::default()).unwrap();
        let sub = program.subroutine_at(0).unwrap();
        assert!(sub
            .variables
            .iter()
            .any(|v| v.class == VariableClass::Local && v.multiply_created));
    }
}
