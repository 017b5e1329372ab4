//! MIR entity references (spec §3.5, §3.6): basic blocks, virtual
//! registers, and instructions, each a dense index into a table owned
//! by the enclosing `MirFunction`.

use minzc_entity::entity_impl;

/// A basic block in a MIR function's control-flow graph.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Block(u32);
entity_impl!(Block, "block");

/// A typed virtual register — the MIR's SSA-adjacent value reference
/// (spec §3.6's invariant: each is assigned exactly once per control
/// path before use).
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reg(u32);
entity_impl!(Reg, "v");

/// One instruction's position within its block's instruction list.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Inst(u32);
entity_impl!(Inst, "inst");

/// A reference to a function, used by `Call`/`TailCall`/`LoadLabel`
/// before or after the call graph has been fully linked.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FuncId(u32);
entity_impl!(FuncId, "fn");
