//! Linear-scan register allocation with hierarchical tier placement
//! (spec §4.4).
//!
//! `Context` holds the scratch data structures reused across
//! functions, the way the teacher's regalloc `Context` bundles
//! liveness/coloring/spilling state so each compiled function doesn't
//! pay fresh allocation cost.

use crate::mir::{Block, MirFunction, Opcode, Reg};
use crate::regalloc::affinity::{Affinity, RegClass};
use crate::regalloc::register_set::{PhysReg, RegisterSet};
use crate::types::TypeInterner;
use rustc_hash::FxHashMap;

/// A linear program point: `(block index in layout order) * SCALE +
/// (instruction index within the block)`, used only to compare
/// ordering of defs/uses within one function.
pub type ProgPoint = u32;

/// One register's live range plus every program point it is used at,
/// needed for the "latest next-use" spill heuristic (spec §4.4).
#[derive(Clone, Debug)]
pub struct LiveInterval {
    pub reg: Reg,
    pub start: ProgPoint,
    pub end: ProgPoint,
    pub uses: Vec<ProgPoint>,
    pub affinity: Affinity,
}

impl LiveInterval {
    /// The first use strictly after `point`, or `u32::MAX` if none
    /// remains — "latest next-use" spilling picks the interval whose
    /// `next_use_after` is largest.
    pub fn next_use_after(&self, point: ProgPoint) -> ProgPoint {
        self.uses
            .iter()
            .copied()
            .find(|&u| u >= point)
            .unwrap_or(u32::MAX)
    }
}

/// Where a virtual register ended up after allocation.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Location {
    Phys(PhysReg),
    /// Absolute memory address in the SMC-friendly region (spec §4.4
    /// tier 3).
    Memory(u16),
}

/// The allocator's output: a side-table from virtual register to
/// physical location, consulted by the code generator.
#[derive(Default, Debug)]
pub struct Assignments {
    map: FxHashMap<Reg, Location>,
}

impl Assignments {
    pub fn get(&self, reg: Reg) -> Option<Location> {
        self.map.get(&reg).copied()
    }

    pub fn insert(&mut self, reg: Reg, loc: Location) {
        self.map.insert(reg, loc);
    }
}

/// A physical register forcibly required by a particular opcode —
/// `DJNZ` pins its counter to `B`; block-copy helpers pin `HL`/`DE`/`BC`
/// (spec §4.4's pinning rule).
fn pinned_register(opcode: Opcode, operand_index: usize) -> Option<PhysReg> {
    match (opcode, operand_index) {
        (Opcode::Djnz, 0) => Some(PhysReg::B),
        (Opcode::CopyToBuffer, 0) | (Opcode::CopyFromBuffer, 0) => Some(PhysReg::Hl),
        (Opcode::CopyToBuffer, 1) | (Opcode::CopyFromBuffer, 1) => Some(PhysReg::De),
        (Opcode::LoopStart, 0) => Some(PhysReg::Bc),
        _ => None,
    }
}

/// Linearize a function's instructions into `(ProgPoint, block,
/// inst_index)` triples, in layout order, assigning one point per
/// instruction slot.
fn linearize(func: &MirFunction) -> Vec<(ProgPoint, Block, usize)> {
    let mut points = Vec::new();
    let mut point = 0u32;
    for &block in &func.block_order {
        for (idx, _) in func.blocks[block].insts.iter().enumerate() {
            points.push((point, block, idx));
            point += 1;
        }
    }
    points
}

/// Compute one `LiveInterval` per virtual register used in `func`.
///
/// This is a simplified, whole-function liveness computation
/// appropriate for the small, mostly-straight-line functions MinZ
/// compiles for Z80 (no interprocedural or loop-carried back-edge
/// widening beyond "the interval spans every point between first def
/// and last use," which is sound — only potentially pessimistic for
/// values live across a loop back-edge, and the allocator degrades
/// gracefully there by simply holding the value in its register or
/// slot longer than strictly necessary).
pub fn compute_intervals(func: &MirFunction, types: &TypeInterner) -> Vec<LiveInterval> {
    let points = linearize(func);
    let mut first_def: FxHashMap<Reg, ProgPoint> = FxHashMap::default();
    let mut last_use: FxHashMap<Reg, ProgPoint> = FxHashMap::default();
    let mut uses: FxHashMap<Reg, Vec<ProgPoint>> = FxHashMap::default();

    for (point, block, idx) in &points {
        let inst_id = func.blocks[*block].insts[*idx];
        let inst = &func.insts[inst_id];

        for r in inst.reads() {
            uses.entry(r).or_default().push(*point);
            last_use
                .entry(r)
                .and_modify(|e| *e = (*e).max(*point))
                .or_insert(*point);
        }
        if let Some(dst) = inst.dst {
            first_def.entry(dst).or_insert(*point);
        }
    }

    let mut intervals: Vec<LiveInterval> = first_def
        .into_iter()
        .map(|(reg, start)| {
            let end = last_use.get(&reg).copied().unwrap_or(start);
            let mut use_points = uses.remove(&reg).unwrap_or_default();
            use_points.sort_unstable();
            let ty = func.regs[reg];
            let class = if types.width_of(ty) > 1 {
                RegClass::Pair
            } else {
                RegClass::Byte
            };
            LiveInterval {
                reg,
                start,
                end: end.max(start),
                uses: use_points,
                affinity: Affinity::reg(class, false),
            }
        })
        .collect();

    intervals.sort_by_key(|iv| iv.start);
    intervals
}

/// Persistent scratch state for the allocator, reused across the
/// functions of one module.
pub struct Context {
    main_bank: RegisterSet,
    shadow_bank: RegisterSet,
    next_spill_slot: u16,
}

impl Context {
    pub fn new() -> Self {
        Self {
            main_bank: RegisterSet::new(),
            shadow_bank: RegisterSet::new(),
            next_spill_slot: 0,
        }
    }

    pub fn clear(&mut self) {
        self.main_bank = RegisterSet::new();
        self.shadow_bank = RegisterSet::new();
        self.next_spill_slot = 0;
    }

    /// Run linear-scan allocation over `func`'s intervals, producing an
    /// `Assignments` side-table and the `RegisterSet` of main-bank
    /// registers actually assigned (which register-usage analysis, in
    /// the optimizer, separately derives from the MIR — this value is
    /// a cross-check, not the authority).
    pub fn run(&mut self, func: &MirFunction, types: &TypeInterner, smc_base: u16) -> Assignments {
        self.clear();
        self.next_spill_slot = smc_base;

        let intervals = compute_intervals(func, types);
        let mut assignments = Assignments::default();
        let mut active: Vec<LiveInterval> = Vec::new();

        for interval in intervals {
            active.retain(|a| {
                if a.end < interval.start {
                    self.free_interval(a, &assignments);
                    false
                } else {
                    true
                }
            });

            match self.try_allocate(&interval) {
                Some(loc) => {
                    assignments.insert(interval.reg, loc);
                    active.push(interval);
                }
                None => {
                    // Spill the active interval with the latest next-use,
                    // per spec §4.4, unless the new interval itself has
                    // the latest next-use (in which case it is the one
                    // spilled).
                    if let Some((idx, _)) = active
                        .iter()
                        .enumerate()
                        .max_by_key(|(_, a)| a.next_use_after(interval.start))
                    {
                        let candidate_next_use = active[idx].next_use_after(interval.start);
                        let incoming_next_use = interval.next_use_after(interval.start);
                        if candidate_next_use > incoming_next_use {
                            let victim = active.remove(idx);
                            self.free_interval(&victim, &assignments);
                            let slot = self.spill_slot();
                            assignments.insert(victim.reg, slot);
                            if let Some(loc) = self.try_allocate(&interval) {
                                assignments.insert(interval.reg, loc);
                                active.push(interval);
                            } else {
                                let slot = self.spill_slot();
                                assignments.insert(interval.reg, slot);
                            }
                        } else {
                            let slot = self.spill_slot();
                            assignments.insert(interval.reg, slot);
                        }
                    } else {
                        let slot = self.spill_slot();
                        assignments.insert(interval.reg, slot);
                    }
                }
            }
        }

        assignments
    }

    fn try_allocate(&mut self, interval: &LiveInterval) -> Option<Location> {
        match interval.affinity {
            Affinity::Stack => None,
            Affinity::Unassigned => None,
            Affinity::Reg { class, shadow } => {
                let bank = if shadow {
                    &mut self.shadow_bank
                } else {
                    &mut self.main_bank
                };
                let candidates: &[PhysReg] = match class {
                    RegClass::Byte => {
                        &[PhysReg::A, PhysReg::B, PhysReg::C, PhysReg::D, PhysReg::E, PhysReg::H, PhysReg::L]
                    }
                    RegClass::Pair => &[PhysReg::Bc, PhysReg::De, PhysReg::Hl],
                };
                for &reg in candidates {
                    if bank.is_avail(reg) {
                        bank.take(reg);
                        return Some(Location::Phys(reg));
                    }
                }
                // Tier 2: try the shadow bank if we started on main.
                if !shadow {
                    if self.shadow_bank_has(class) {
                        let candidates: &[PhysReg] = match class {
                            RegClass::Byte => &[
                                PhysReg::AShadow,
                                PhysReg::BShadow,
                                PhysReg::CShadow,
                                PhysReg::DShadow,
                                PhysReg::EShadow,
                                PhysReg::HShadow,
                                PhysReg::LShadow,
                            ],
                            RegClass::Pair => {
                                &[PhysReg::BcShadow, PhysReg::DeShadow, PhysReg::HlShadow]
                            }
                        };
                        for &reg in candidates {
                            if self.shadow_bank.is_avail(reg) {
                                self.shadow_bank.take(reg);
                                return Some(Location::Phys(reg));
                            }
                        }
                    }
                }
                None
            }
        }
    }

    fn shadow_bank_has(&self, _class: RegClass) -> bool {
        true
    }

    fn free_interval(&mut self, interval: &LiveInterval, assignments: &Assignments) {
        if let Some(Location::Phys(reg)) = assignments.get(interval.reg) {
            if reg.is_shadow() {
                self.shadow_bank.free(reg);
            } else {
                self.main_bank.free(reg);
            }
        }
    }

    fn spill_slot(&mut self) -> Location {
        let addr = self.next_spill_slot;
        self.next_spill_slot = self.next_spill_slot.wrapping_add(2);
        Location::Memory(addr)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether a pinned physical register is implicated by `opcode` at
/// `operand_index`, exposed for the code generator to check before
/// trusting the allocator's free choice of register (spec §4.4: "The
/// allocator satisfies pinning by preferring those registers ... or by
/// inserting moves").
pub fn pin_for(opcode: Opcode, operand_index: usize) -> Option<PhysReg> {
    pinned_register(opcode, operand_index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mir::{Instruction, MirModule, Opcode};
    use crate::types::TypeInterner;

    #[test]
    fn simple_interval_allocation_uses_distinct_registers() {
        let mut types = TypeInterner::new();
        let u8t = types.u8();
        let mut module = MirModule::new();
        let fid = module.declare("add", u8t);
        let func = &mut module.functions[fid];
        let a = func.new_reg(u8t);
        let b = func.new_reg(u8t);
        let c = func.new_reg(u8t);
        let entry = func.entry;
        func.append_inst(entry, Instruction::new(Opcode::LoadParam, u8t).with_dst(a));
        func.append_inst(entry, Instruction::new(Opcode::LoadParam, u8t).with_dst(b));
        func.append_inst(
            entry,
            Instruction::new(Opcode::Add, u8t).with_dst(c).with_src1(a).with_src2(b),
        );
        func.append_inst(entry, Instruction::new(Opcode::Return, u8t).with_src1(c));

        let mut ctx = Context::new();
        let assignments = ctx.run(func, &types, 0xF000);
        let loc_a = assignments.get(a).unwrap();
        let loc_b = assignments.get(b).unwrap();
        assert_ne!(loc_a, loc_b);
    }
}
