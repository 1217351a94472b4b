//! Control-flow graphs of conditionals and tables.
//!
//! Nodes live in a per-pipeline arena and refer to each other through
//! [`NodeHandle`]s. Deleting a node bumps its slot's generation, so every
//! edge still pointing at it stops resolving instead of reaching whatever
//! node reuses the slot later. Such an edge reads as "no next node" when
//! the graph is written out and as [`PipelineError::DanglingEdge`] when a
//! packet tries to follow it.

pub mod action;
pub mod conditional;
pub mod exec;
pub mod expr;
pub mod table;

pub use action::{ActionFn, ActionRegistry, Primitive, RuntimeParam};
pub use conditional::{Branch, Condition, Conditional};
pub use exec::{Step, MAX_STEPS};
pub use expr::{BinaryOp, EvalContext, Expr, UnaryOp};
pub use table::{
    DefaultEntry, EntryError, ExactMatch, MatchActionTable, MatchLookup, TableEdge, TableEntry,
};

use crate::p4objects::json::CfgPipeline;
use crate::register::RegisterError;
use flexbm_common::{HasNamedObject, NamedObject, ObjectId, ObjectKind, ObjectMapError};
use serde_json::{Map, Value};
use std::collections::HashMap;
use thiserror::Error;

/// Errors raised while a packet traverses a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("Pipeline '{pipeline}': edge from '{from}' points at a deleted node")]
    DanglingEdge { pipeline: String, from: String },

    #[error("Pipeline '{pipeline}' exceeded {limit} steps")]
    TooManySteps { pipeline: String, limit: usize },

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Missing action data at index {index}")]
    MissingActionData { index: usize },

    #[error("Unknown register array '{0}'")]
    UnknownRegister(String),

    #[error("Unknown calculation '{0}'")]
    UnknownCalculation(String),

    #[error("Unknown action id {0}")]
    UnknownAction(ObjectId),

    #[error(transparent)]
    Register(#[from] RegisterError),
}

/// Generation-checked reference to a node slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle {
    index: usize,
    generation: u32,
}

/// A control-flow edge. `None` ends the pipeline.
pub type Edge = Option<NodeHandle>;

#[derive(Debug, Clone)]
pub enum Node {
    Conditional(Conditional),
    Table(MatchActionTable),
}

impl Node {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Node::Conditional(c) if c.is_flex() => ObjectKind::Flex,
            Node::Conditional(_) => ObjectKind::Conditional,
            Node::Table(_) => ObjectKind::Table,
        }
    }

    pub fn as_conditional(&self) -> Option<&Conditional> {
        match self {
            Node::Conditional(c) => Some(c),
            Node::Table(_) => None,
        }
    }

    pub fn as_conditional_mut(&mut self) -> Option<&mut Conditional> {
        match self {
            Node::Conditional(c) => Some(c),
            Node::Table(_) => None,
        }
    }

    pub fn as_table(&self) -> Option<&MatchActionTable> {
        match self {
            Node::Table(t) => Some(t),
            Node::Conditional(_) => None,
        }
    }

    pub fn as_table_mut(&mut self) -> Option<&mut MatchActionTable> {
        match self {
            Node::Table(t) => Some(t),
            Node::Conditional(_) => None,
        }
    }
}

impl HasNamedObject for Node {
    fn named(&self) -> &NamedObject {
        match self {
            Node::Conditional(c) => c.named(),
            Node::Table(t) => t.named(),
        }
    }
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    named: NamedObject,
    init: Edge,
    slots: Vec<Slot>,
    free: Vec<usize>,
    by_name: HashMap<String, NodeHandle>,
    extra: Map<String, Value>,
}

impl Pipeline {
    pub fn new(named: NamedObject) -> Self {
        Self {
            named,
            init: None,
            slots: Vec::new(),
            free: Vec::new(),
            by_name: HashMap::new(),
            extra: Map::new(),
        }
    }

    pub(crate) fn with_extra(mut self, extra: Map<String, Value>) -> Self {
        self.extra = extra;
        self
    }

    pub fn init(&self) -> Edge {
        self.init
    }

    pub fn set_init(&mut self, edge: Edge) {
        self.init = edge;
    }

    /// Adds a node. Conditionals and tables share one name space.
    pub fn insert_node(&mut self, node: Node) -> Result<NodeHandle, ObjectMapError> {
        if self.by_name.contains_key(node.name()) {
            return Err(ObjectMapError::DuplicateName(node.name().to_string()));
        }
        let name = node.name().to_string();
        let handle = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index];
                slot.node = Some(node);
                NodeHandle {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                NodeHandle {
                    index: self.slots.len() - 1,
                    generation: 0,
                }
            }
        };
        self.by_name.insert(name, handle);
        Ok(handle)
    }

    /// Removes a node. Edges that pointed at it no longer resolve.
    pub fn remove_node(&mut self, name: &str) -> Option<Node> {
        let handle = self.by_name.remove(name)?;
        let slot = self.slots.get_mut(handle.index)?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        slot.node.take()
    }

    pub fn find(&self, name: &str) -> Option<NodeHandle> {
        self.by_name.get(name).copied()
    }

    pub fn resolve(&self, handle: NodeHandle) -> Option<&Node> {
        self.slots
            .get(handle.index)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    fn resolve_mut(&mut self, handle: NodeHandle) -> Option<&mut Node> {
        self.slots
            .get_mut(handle.index)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.node.as_mut())
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.resolve(self.find(name)?)
    }

    pub fn node_mut(&mut self, name: &str) -> Option<&mut Node> {
        let handle = self.find(name)?;
        self.resolve_mut(handle)
    }

    pub fn conditional(&self, name: &str) -> Option<&Conditional> {
        self.node(name)?.as_conditional()
    }

    pub fn conditional_mut(&mut self, name: &str) -> Option<&mut Conditional> {
        self.node_mut(name)?.as_conditional_mut()
    }

    pub fn table(&self, name: &str) -> Option<&MatchActionTable> {
        self.node(name)?.as_table()
    }

    pub fn table_mut(&mut self, name: &str) -> Option<&mut MatchActionTable> {
        self.node_mut(name)?.as_table_mut()
    }

    /// Name of the node an edge points at; `None` for null or stale edges.
    pub fn node_name(&self, edge: Edge) -> Option<&str> {
        edge.and_then(|h| self.resolve(h)).map(|n| n.name())
    }

    pub fn node_count(&self) -> usize {
        self.by_name.len()
    }

    /// Live nodes in slot order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.slots.iter().filter_map(|slot| slot.node.as_ref())
    }

    /// Conditionals (flex nodes included) in id order.
    pub fn conditionals(&self) -> Vec<&Conditional> {
        let mut out: Vec<_> = self.nodes().filter_map(Node::as_conditional).collect();
        out.sort_by_key(|c| c.id());
        out
    }

    /// Tables in id order.
    pub fn tables(&self) -> Vec<&MatchActionTable> {
        let mut out: Vec<_> = self.nodes().filter_map(Node::as_table).collect();
        out.sort_by_key(|t| t.id());
        out
    }

    pub(crate) fn to_cfg(&self, actions: &ActionRegistry) -> CfgPipeline {
        CfgPipeline {
            name: self.name().to_string(),
            id: self.id(),
            source_info: self.named.source_info().cloned(),
            init_table: self.node_name(self.init).map(str::to_string),
            tables: self
                .tables()
                .into_iter()
                .map(|t| t.to_cfg(self, actions))
                .collect(),
            conditionals: self
                .conditionals()
                .into_iter()
                .map(|c| c.to_cfg(self))
                .collect(),
            extra: self.extra.clone(),
        }
    }
}

impl HasNamedObject for Pipeline {
    fn named(&self) -> &NamedObject {
        &self.named
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cond(name: &str, id: ObjectId) -> Node {
        Node::Conditional(Conditional::new(
            NamedObject::new(name, id),
            Condition::always_true(),
        ))
    }

    #[test]
    fn test_insert_and_find() {
        let mut p = Pipeline::new(NamedObject::new("ingress", 0));
        let a = p.insert_node(cond("node_2", 0)).unwrap();
        assert_eq!(p.find("node_2"), Some(a));
        assert_eq!(p.node_name(Some(a)), Some("node_2"));
        assert_eq!(p.node("node_2").map(Node::kind), Some(ObjectKind::Conditional));
        assert!(p.table("node_2").is_none());
        assert_eq!(
            p.insert_node(cond("node_2", 1)),
            Err(ObjectMapError::DuplicateName("node_2".to_string()))
        );
    }

    #[test]
    fn test_removed_node_edges_go_stale() {
        let mut p = Pipeline::new(NamedObject::new("ingress", 0));
        let a = p.insert_node(cond("node_2", 0)).unwrap();
        assert!(p.remove_node("node_2").is_some());
        assert!(p.resolve(a).is_none());
        assert_eq!(p.node_name(Some(a)), None);

        // The freed slot is reused under a new generation.
        let b = p.insert_node(cond("node_3", 1)).unwrap();
        assert_ne!(a, b);
        assert!(p.resolve(a).is_none());
        assert_eq!(p.node_name(Some(b)), Some("node_3"));
        assert_eq!(p.node_count(), 1);
    }

    #[test]
    fn test_conditionals_in_id_order() {
        let mut p = Pipeline::new(NamedObject::new("ingress", 0));
        p.insert_node(cond("node_9", 9)).unwrap();
        p.insert_node(cond("node_2", 2)).unwrap();
        let ids: Vec<_> = p.conditionals().iter().map(|c| c.id()).collect();
        assert_eq!(ids, [2, 9]);
    }
}
