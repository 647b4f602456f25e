//! Application layer: per-hopper actuation, multi-hopper orchestration,
//! and the change feasibility engine.

pub mod dispenser;
pub mod feasibility;
pub mod hopper;
