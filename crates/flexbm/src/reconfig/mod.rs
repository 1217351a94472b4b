//! Runtime reconfiguration: plan grammar and the engine that applies a plan
//! to a candidate generation.

pub mod command;
pub mod engine;

pub use command::{Command, EdgeRef, ObjRef, RehashCommand};
pub use engine::ReconfigEngine;
