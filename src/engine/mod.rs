//! Core engine: the budget-aware monitor → select → analyse loop.

pub mod budget;
pub mod control;
pub mod monitor;
pub mod selector;
pub mod trigger;

pub use control::{ControlLoop, LoopView, TickOutcome, TickReport};
