//! The intermediate representation produced by [`crate::analyzer`] (C3):
//! a per-subroutine control-flow graph of basic blocks, each ending in a
//! [`Terminator`] that names how control leaves it, with bodies made of a
//! closed set of typed [`IrInstr`]s rather than raw bytecode.
//!
//! Grounded on the two-pass jump-target discovery pattern used by
//! decompiler-style CFG builders in the example pack (collect every
//! branch/call target first, then split the instruction stream at those
//! boundaries) rather than a naive one-pass walk, which cannot know a
//! later forward jump lands mid-block until it has already emitted past
//! that point.

use crate::value::Type;
use std::collections::BTreeMap;

/// How a basic block hands control to its successor(s).
#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
    /// Falls through or unconditionally jumps to exactly one block.
    Transfer { target: u32 },
    /// Conditional branch (`JZ`/`JNZ`): two successors. The body's last
    /// [`IrInstr::Test`] names the value this reads; `JZ`/`JNZ` themselves
    /// never get a dedicated IR op since this terminator already carries
    /// both edges losslessly (§4.4 "`OP_JZ`/`OP_JNZ` decode to an `I_TEST`
    /// followed by `I_JZ`/`I_JNZ`").
    Split { taken: u32, not_taken: u32 },
    /// `RETN`: leaves the subroutine.
    Return,
    /// Falls off the end of the program with no `RETN` — legal for the
    /// top-level `main`/`StartingConditional` entry point only; the
    /// analyzer flags it elsewhere as a malformed subroutine otherwise.
    Halt,
}

/// Index into a [`Subroutine`]'s `variables` table. Every abstract-stack
/// cell and every persistent local/global slot the analyzer discovers
/// gets one of these.
pub type VarId = usize;

/// Binary operators the closed IR instruction set carries (GLOSSARY "IR
/// instruction set"). Named after the opcode they come from, not a
/// generic arithmetic vocabulary, so a reader cross-checking against a
/// disassembly recognizes them immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Incor,
    Excor,
    Booland,
    Logand,
    Logor,
    Shleft,
    Shright,
    Ushright,
    Equal,
    Nequal,
    Lt,
    Leq,
    Gt,
    Geq,
}

/// Unary operators the closed IR instruction set carries. `Inc`/`Dec` are
/// named in the GLOSSARY's instruction list but no opcode in this
/// bytecode decodes to them directly (NWScript has no standalone
/// increment/decrement opcode; `i++` compiles to `ADD`); they stay part
/// of the enum for completeness and are simply never constructed today.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
    Comp,
    Inc,
    Dec,
}

/// The closed IR instruction set a basic block's body is made of (§3/§4.3
/// "CREATE/DELETE/ASSIGN/TEST/CALL/ACTION/SAVE_STATE/binary/unary ops/
/// INITIALIZE"). Replaces raw [`crate::instruction::Instruction`]s once
/// the analyzer has typed the operand stack.
#[derive(Debug, Clone, PartialEq)]
pub enum IrInstr {
    /// Reserves a new variable's storage without giving it a value yet.
    Create(VarId),
    /// Releases a variable's storage (`DECSP`/`INCSP`/`MOVSP` popping,
    /// `DESTRUCT`'s discarded elements).
    Delete(VarId),
    /// Copies `src`'s value into `dst` (`CPDOWNSP`/`CPDOWNBP`/`CPTOPSP`/
    /// `CPTOPBP`).
    Assign { src: VarId, dst: VarId },
    /// Consumes the boolean `JZ`/`JNZ` branches on; the branch itself is
    /// the block's [`Terminator::Split`].
    Test { value: VarId },
    /// `JSR`: a direct call to another subroutine's entry point. `args`/
    /// `rets` are left empty — this bytecode's calling convention moves
    /// arguments and return values via surrounding `CPDOWNSP`/`CPTOPSP`
    /// (i.e. `Assign`) instructions rather than through `JSR` itself, so
    /// there is nothing for this instruction to name without re-deriving
    /// it from context a caller already has (documented in `DESIGN.md`).
    Call {
        target: u32,
        args: Vec<VarId>,
        rets: Vec<VarId>,
    },
    /// `RETN`: leaves the subroutine. Carries no operand; whatever value
    /// it returns was already assigned to the caller-visible slot by a
    /// preceding `Assign`.
    Retn,
    /// `ACTION`: a host action-service call. `rets` holds at most one
    /// variable, present only when the action's declared return type is
    /// not `Void`.
    Action {
        id: u16,
        args: Vec<VarId>,
        rets: Vec<VarId>,
    },
    /// `STORE_STATE`/`STORE_STATE_ALL`: captures a continuation resuming
    /// at `target` (the instruction after the `STORE_STATE`, per this
    /// crate's interpreter). `globals`/`locals` are left empty: this
    /// crate captures whatever is actually above the base pointer at
    /// interpretation time rather than a statically-known variable set
    /// (documented in `DESIGN.md`).
    SaveState {
        target: u32,
        globals: Vec<VarId>,
        locals: Vec<VarId>,
    },
    BinaryOp {
        op: BinOp,
        lhs: VarId,
        rhs: VarId,
        dst: VarId,
    },
    UnaryOp {
        op: UnOp,
        src: VarId,
        dst: VarId,
    },
    /// Assigns a variable's default/immediate value (`CONST`, `RSADD`'s
    /// zero-initialized reservation, `DECSP`'s reserved zero words).
    Initialize(VarId),
}

/// A straight-line run of IR instructions with a single entry and a
/// single terminator.
#[derive(Debug, Clone, Default)]
pub struct BasicBlock {
    pub start_pc: u32,
    pub instructions: Vec<IrInstr>,
    pub terminator: Terminator,
    /// Set when two or more distinct blocks can transfer/split control
    /// into this one (a CFG join point) — the block itself is the
    /// "Merge" the analyzer distinguishes from a plain `Transfer`/`Split`
    /// target, used to mark variables read here `multiply_created`.
    pub is_merge_point: bool,
}

impl Default for Terminator {
    fn default() -> Self {
        Terminator::Halt
    }
}

/// What role a variable plays in its subroutine (GLOSSARY "IR
/// subroutine").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableClass {
    /// A slot at a negative base-pointer offset — lives below the
    /// subroutine's own frame, shared with every other subroutine in the
    /// script (§4.1 "globals occupy `0..globals_len` beneath `bp`").
    Global,
    /// A slot at a non-negative base-pointer offset, private to this
    /// subroutine's activation.
    Local,
    /// A `Local` the symbol table's declared parameter types identify as
    /// one of the subroutine's formal parameters rather than an ordinary
    /// local.
    Parameter,
    /// The slot RETN's caller-side `Assign` writes before leaving.
    ReturnValue,
    /// An argument variable popped for a `JSR`/`ACTION` call.
    CallParameter,
    /// A return-value variable pushed after a `JSR`/`ACTION` call.
    CallReturnValue,
    /// A `CONST`-produced literal with no persistent storage.
    Constant,
}

/// A local/global/parameter slot tracked through the CFG.
/// `multiply_created` is set when the analyzer proves two distinct
/// predecessors can reach this variable's use with different
/// definitions (a join point per [`BasicBlock::is_merge_point`]) — the
/// interpreter does not need this, but a JIT back-end uses it to decide
/// whether a slot can live in a machine register across the join or must
/// be materialized to memory first.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub slot: i32,
    pub ty: Type,
    pub class: VariableClass,
    pub multiply_created: bool,
}

/// Per-subroutine flags controlling how much the analyzer commits to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnalysisFlags {
    /// Only the CFG shape is needed (block boundaries, terminators); skip
    /// variable typing and IR emission. Used when a caller just wants
    /// reachability, e.g. validating a jump target before a debugger
    /// sets a breakpoint.
    pub structure_only: bool,
    /// Disables the dead-store / unreachable-block pruning the analyzer
    /// otherwise performs, so the IR mirrors the bytecode 1:1 — used by
    /// tooling that re-emits bytecode from IR and must round-trip exactly.
    pub no_optimizations: bool,
}

/// One analyzed subroutine: its entry point, its basic blocks keyed by
/// start PC, the variables discovered while walking it, and its
/// declared call shape when a symbol table was available.
#[derive(Debug, Clone)]
pub struct Subroutine {
    pub name: Option<String>,
    pub entry_pc: u32,
    pub blocks: BTreeMap<u32, BasicBlock>,
    pub variables: Vec<Variable>,
    /// Declared parameter types, from the symbol table's
    /// `SubroutineSymbol::parameter_types` when one covers this entry
    /// point; empty otherwise.
    pub parameters: Vec<Type>,
    /// The declared return type, from the symbol table, as a
    /// single-element list (empty for a `void` subroutine) to mirror
    /// `parameters`'s shape rather than introducing a separate
    /// `Option<Type>` the caller has to handle differently.
    pub return_types: Vec<Type>,
}

impl Subroutine {
    pub fn block_at(&self, pc: u32) -> Option<&BasicBlock> {
        self.blocks.get(&pc)
    }
}

/// The full analyzed program: every subroutine reachable from the entry
/// point(s) the analyzer was asked to discover (§4.3 "Subroutine
/// discovery").
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub subroutines: BTreeMap<u32, Subroutine>,
}

impl Program {
    pub fn subroutine_at(&self, entry_pc: u32) -> Option<&Subroutine> {
        self.subroutines.get(&entry_pc)
    }
}
