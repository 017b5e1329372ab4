//! Hierarchical register allocation for Z80 targets (spec §4.4):
//! main registers, then shadow registers, then memory.

pub mod affinity;
pub mod context;
pub mod register_set;

pub use affinity::{Affinity, RegClass};
pub use context::{compute_intervals, Assignments, Context, LiveInterval, Location, ProgPoint};
pub use register_set::{PhysReg, RegUnit, RegisterSet};
