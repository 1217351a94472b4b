//! FlexBM - P4 behavioral model runtime with live reconfiguration
//!
//! FlexBM loads a compiled P4 configuration document into a generation of
//! objects (pipelines, actions, register arrays, calculations), runs packets
//! through it, and edits it at runtime from a line-oriented command plan
//! without stopping packet processing.
//!
//! # Architecture
//!
//! ```text
//! [config JSON] ──> [P4Objects] ──> [Generation] ──ArcSwap──> [Dataplane workers]
//!                                        ↑
//! [new JSON] + [plan] ──> [ReconfigEngine] (candidate, published on SUCCESS)
//! ```
//!
//! # Key Components
//!
//! - [`p4objects::P4Objects`]: object registry of one generation
//! - [`pipeline`]: control-flow graph of conditionals, flex nodes and tables
//! - [`reconfig`]: plan grammar and the engine that applies it
//! - [`switch::Switch`]: contexts, generation publishing, control operations
//! - [`switch::Dataplane`]: tokio worker pool feeding packets to a context

pub mod calculation;
pub mod config;
pub mod error;
pub mod hash;
pub mod logging;
pub mod p4objects;
pub mod packet;
pub mod pipeline;
pub mod reconfig;
pub mod register;
pub mod switch;

pub use config::RuntimeConfig;
pub use error::{LoadError, ReconfigError, ReconfigResultExt};
pub use flexbm_common::{ObjectKind, ReconfigResult};
pub use logging::init_tracing;
pub use p4objects::P4Objects;
pub use packet::Packet;
pub use reconfig::ReconfigEngine;
pub use switch::{Dataplane, Generation, Switch, SwitchError};
