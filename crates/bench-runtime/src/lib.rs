#![doc = "Periodic execution engine for the testbench."]

pub mod control_loop;
pub mod rig;
pub mod scheduler;

pub use control_loop::*;
pub use rig::*;
pub use scheduler::*;
