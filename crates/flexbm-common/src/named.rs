//! Object identity: names, ids and source locations.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Compiler-assigned object id.
pub type ObjectId = i32;

/// Location of the P4 source construct an object was compiled from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub line: u32,
    #[serde(default)]
    pub column: u32,
    #[serde(default)]
    pub source_fragment: String,
}

/// Identity record carried by every reconfigurable object.
///
/// The name and id are fixed for the lifetime of the object; there are no
/// setters. Renaming an object means deleting it and inserting a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedObject {
    name: String,
    id: ObjectId,
    source_info: Option<SourceInfo>,
}

impl NamedObject {
    pub fn new(name: impl Into<String>, id: ObjectId) -> Self {
        Self {
            name: name.into(),
            id,
            source_info: None,
        }
    }

    pub fn with_source_info(mut self, source_info: Option<SourceInfo>) -> Self {
        self.source_info = source_info;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn source_info(&self) -> Option<&SourceInfo> {
        self.source_info.as_ref()
    }
}

/// Namespaces of reconfigurable objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKind {
    Pipeline,
    /// Any node of a pipeline graph, used when an edge target is resolved.
    Node,
    Conditional,
    Flex,
    Table,
    Action,
    RegisterArray,
    Calculation,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pipeline => "pipeline",
            Self::Node => "node",
            Self::Conditional => "conditional",
            Self::Flex => "flex",
            Self::Table => "table",
            Self::Action => "action",
            Self::RegisterArray => "register_array",
            Self::Calculation => "calculation",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Monotonic `next_free_id` counter for one object kind.
///
/// Loaded objects are reported through [`observe`](Self::observe) so that
/// runtime inserts continue after the highest compiler-assigned id. Ids are
/// never handed out twice, even after the object holding one is deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdAllocator {
    next: ObjectId,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an id taken from a configuration document.
    pub fn observe(&mut self, id: ObjectId) {
        if id >= self.next {
            self.next = id + 1;
        }
    }

    /// Returns the id the next call to [`allocate`](Self::allocate) hands out.
    pub fn peek(&self) -> ObjectId {
        self.next
    }

    pub fn allocate(&mut self) -> ObjectId {
        let id = self.next;
        self.next += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_allocator_continues_after_observed_ids() {
        let mut ids = IdAllocator::new();
        assert_eq!(ids.peek(), 0);

        ids.observe(0);
        ids.observe(5);
        ids.observe(2);
        assert_eq!(ids.allocate(), 6);
        assert_eq!(ids.allocate(), 7);
        assert_eq!(ids.peek(), 8);
    }

    #[test]
    fn test_named_object_source_info() {
        let info = SourceInfo {
            filename: "syn.p4".to_string(),
            line: 42,
            column: 8,
            source_fragment: "register<bit<32>>(1024) r".to_string(),
        };
        let obj = NamedObject::new("r", 1).with_source_info(Some(info.clone()));

        assert_eq!(obj.name(), "r");
        assert_eq!(obj.id(), 1);
        assert_eq!(obj.source_info(), Some(&info));
    }

    #[test]
    fn test_object_kind_display() {
        assert_eq!(ObjectKind::RegisterArray.to_string(), "register_array");
        assert_eq!(ObjectKind::Conditional.to_string(), "conditional");
    }
}
