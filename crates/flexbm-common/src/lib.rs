//! Common object identity types for the FlexBM runtime.
//!
//! This crate provides the identity layer shared by every reconfigurable
//! object in a FlexBM configuration generation:
//!
//! - [`NamedObject`]: name, compiler-assigned id and optional source location
//! - [`ObjectKind`]: the namespaces objects live in
//! - [`IdAllocator`]: per-kind `next_free_id` counter that never reuses ids
//! - [`ObjectMap`]: name-indexed map that never creates entries implicitly
//! - [`ReconfigResult`]: result codes returned at the control boundary
//!
//! # Example
//!
//! ```
//! use flexbm_common::{IdAllocator, NamedObject};
//!
//! let mut ids = IdAllocator::new();
//! ids.observe(3);
//!
//! let obj = NamedObject::new("MyIngress.counter", ids.allocate());
//! assert_eq!(obj.id(), 4);
//! ```

mod named;
mod object_map;
mod result_code;

pub use named::{IdAllocator, NamedObject, ObjectId, ObjectKind, SourceInfo};
pub use object_map::{HasNamedObject, ObjectMap, ObjectMapError};
pub use result_code::ReconfigResult;
