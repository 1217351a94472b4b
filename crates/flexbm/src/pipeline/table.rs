//! Match-action tables.
//!
//! A table looks its key up through a [`MatchLookup`] implementation, runs
//! the matched (or default) action and then picks its next node:
//!
//! - on a hit, the `__HIT__` edge if the table declares one, otherwise the
//!   edge of the matched action if the table maps it, otherwise
//!   `base_default_next`;
//! - on a miss, the `__MISS__` edge if declared, otherwise
//!   `base_default_next`.

use super::expr::{field_name, parse_hexstr, to_hexstr};
use super::{Edge, Pipeline, PipelineError};
use crate::error::LoadError;
use crate::p4objects::json::{CfgDefaultEntry, CfgTable};
use crate::p4objects::P4Objects;
use crate::packet::Packet;
use crate::pipeline::action::ActionRegistry;
use flexbm_common::{HasNamedObject, NamedObject, ObjectId};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use thiserror::Error;

/// Reserved `next_tables` key for the hit edge.
pub const HIT_KEY: &str = "__HIT__";
/// Reserved `next_tables` key for the miss edge.
pub const MISS_KEY: &str = "__MISS__";

/// Which next-node slot of a table to edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableEdge {
    BaseDefault,
    Hit,
    Miss,
    Action(String),
}

impl TableEdge {
    /// Parses the edge-selector token of a `change tabl` command.
    pub fn parse(token: &str) -> Self {
        match token {
            "base_default_next" => TableEdge::BaseDefault,
            HIT_KEY => TableEdge::Hit,
            MISS_KEY => TableEdge::Miss,
            action => TableEdge::Action(action.to_string()),
        }
    }
}

impl fmt::Display for TableEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableEdge::BaseDefault => f.write_str("base_default_next"),
            TableEdge::Hit => f.write_str(HIT_KEY),
            TableEdge::Miss => f.write_str(MISS_KEY),
            TableEdge::Action(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableEntry {
    pub action_id: ObjectId,
    pub action_data: Vec<u64>,
}

/// Control-plane errors on table entries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntryError {
    #[error("Table '{table}' expects a key of {expected} fields, got {got}")]
    KeyArity {
        table: String,
        expected: usize,
        got: usize,
    },

    #[error("Action {action_id} is not an action of table '{table}'")]
    ActionNotInTable { table: String, action_id: ObjectId },

    #[error("Table '{table}' has no entry for key {key:?}")]
    NoSuchEntry { table: String, key: Vec<u64> },
}

/// Entry storage of a table.
pub trait MatchLookup: fmt::Debug + Send + Sync {
    fn lookup(&self, key: &[u64]) -> Option<&TableEntry>;

    /// Inserts or replaces the entry for `key`, returning the old one.
    fn insert(&mut self, key: Vec<u64>, entry: TableEntry) -> Option<TableEntry>;

    fn remove(&mut self, key: &[u64]) -> Option<TableEntry>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clone_box(&self) -> Box<dyn MatchLookup>;
}

impl Clone for Box<dyn MatchLookup> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Exact match on the full key.
#[derive(Debug, Clone, Default)]
pub struct ExactMatch {
    entries: HashMap<Vec<u64>, TableEntry>,
}

impl MatchLookup for ExactMatch {
    fn lookup(&self, key: &[u64]) -> Option<&TableEntry> {
        self.entries.get(key)
    }

    fn insert(&mut self, key: Vec<u64>, entry: TableEntry) -> Option<TableEntry> {
        self.entries.insert(key, entry)
    }

    fn remove(&mut self, key: &[u64]) -> Option<TableEntry> {
        self.entries.remove(key)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn clone_box(&self) -> Box<dyn MatchLookup> {
        Box::new(self.clone())
    }
}

/// Lookup structure for a declared match type. Every match type is served
/// by exact matching on the full key.
fn lookup_for(_match_type: &str) -> Box<dyn MatchLookup> {
    Box::new(ExactMatch::default())
}

#[derive(Debug, Clone)]
pub struct DefaultEntry {
    pub action_id: ObjectId,
    pub action_data: Vec<u64>,
    extra: Map<String, Value>,
}

impl DefaultEntry {
    pub fn new(action_id: ObjectId, action_data: Vec<u64>) -> Self {
        Self {
            action_id,
            action_data,
            extra: Map::new(),
        }
    }

    fn from_cfg(table: &str, cfg: &CfgDefaultEntry) -> Result<Self, LoadError> {
        let action_data = cfg
            .action_data
            .iter()
            .map(|s| {
                parse_hexstr(s).ok_or_else(|| {
                    LoadError::malformed(
                        "pipelines",
                        format!("table '{table}' default entry has bad action data '{s}'"),
                    )
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            action_id: cfg.action_id,
            action_data,
            extra: cfg.extra.clone(),
        })
    }

    fn to_cfg(&self) -> CfgDefaultEntry {
        CfgDefaultEntry {
            action_id: self.action_id,
            action_data: self.action_data.iter().map(|v| to_hexstr(*v)).collect(),
            extra: self.extra.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MatchActionTable {
    named: NamedObject,
    match_type: String,
    key_fields: Vec<String>,
    key_json: Vec<Value>,
    action_ids: Vec<ObjectId>,
    next_nodes: BTreeMap<ObjectId, Edge>,
    /// `Some` once the table is hit/miss selective.
    next_node_hit: Option<Edge>,
    next_node_miss: Option<Edge>,
    base_default_next: Edge,
    default_entry: Option<DefaultEntry>,
    entries: Box<dyn MatchLookup>,
    extra: Map<String, Value>,
}

impl MatchActionTable {
    /// Table with the given key and actions, no entries and no edges.
    pub fn new(named: NamedObject, key_fields: Vec<String>, action_ids: Vec<ObjectId>) -> Self {
        let key_json = key_fields
            .iter()
            .map(|f| {
                let target: Vec<&str> = f.splitn(2, '.').collect();
                serde_json::json!({"match_type": "exact", "name": f, "target": target})
            })
            .collect();
        let next_nodes = action_ids.iter().map(|id| (*id, None)).collect();
        Self {
            named,
            match_type: "exact".to_string(),
            key_fields,
            key_json,
            action_ids,
            next_nodes,
            next_node_hit: None,
            next_node_miss: None,
            base_default_next: None,
            default_entry: None,
            entries: lookup_for("exact"),
            extra: Map::new(),
        }
    }

    /// Builds the table without edges. Edges are wired by the loader once
    /// every node of the pipeline exists.
    pub(crate) fn unlinked_from_cfg(cfg: &CfgTable) -> Result<Self, LoadError> {
        let name = &cfg.name;
        let key_fields = cfg
            .key
            .iter()
            .map(|k| {
                k.get("target").map(field_name).unwrap_or_else(|| {
                    Err(LoadError::malformed(
                        "pipelines",
                        format!("table '{name}' key without target: {k}"),
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let default_entry = cfg
            .default_entry
            .as_ref()
            .map(|d| DefaultEntry::from_cfg(name, d))
            .transpose()?;

        Ok(Self {
            named: NamedObject::new(name.clone(), cfg.id).with_source_info(cfg.source_info.clone()),
            match_type: cfg.match_type.clone(),
            key_fields,
            key_json: cfg.key.clone(),
            action_ids: cfg.action_ids.clone(),
            next_nodes: BTreeMap::new(),
            next_node_hit: None,
            next_node_miss: None,
            base_default_next: None,
            default_entry,
            entries: lookup_for(&cfg.match_type),
            extra: cfg.extra.clone(),
        })
    }

    /// Copy of this table's definition under a new name and id, with its
    /// actions replaced by `action_ids` (same order as the original's).
    ///
    /// Every new action gets an unset edge; hit and miss edges stay declared
    /// (but unset) if the original declares them.
    pub(crate) fn instantiate(&self, name: &str, id: ObjectId, action_ids: Vec<ObjectId>) -> Self {
        let remap: HashMap<ObjectId, ObjectId> = self
            .action_ids
            .iter()
            .copied()
            .zip(action_ids.iter().copied())
            .collect();
        let default_entry = self.default_entry.as_ref().map(|d| DefaultEntry {
            action_id: remap.get(&d.action_id).copied().unwrap_or(d.action_id),
            action_data: d.action_data.clone(),
            extra: d.extra.clone(),
        });
        let next_nodes = action_ids.iter().map(|id| (*id, None)).collect();

        Self {
            named: NamedObject::new(name, id).with_source_info(self.named.source_info().cloned()),
            match_type: self.match_type.clone(),
            key_fields: self.key_fields.clone(),
            key_json: self.key_json.clone(),
            action_ids,
            next_nodes,
            next_node_hit: self.next_node_hit.map(|_| None),
            next_node_miss: self.next_node_miss.map(|_| None),
            base_default_next: None,
            default_entry,
            entries: lookup_for(&self.match_type),
            extra: self.extra.clone(),
        }
    }

    pub(crate) fn to_cfg(&self, pipeline: &Pipeline, actions: &ActionRegistry) -> CfgTable {
        let edge_json = |edge: Edge| -> Value {
            pipeline
                .node_name(edge)
                .map(|n| Value::String(n.to_string()))
                .unwrap_or(Value::Null)
        };

        let mut next_tables = Map::new();
        for (action_id, edge) in &self.next_nodes {
            if let Some(action) = actions.get(*action_id) {
                next_tables.insert(action.name().to_string(), edge_json(*edge));
            }
        }
        if let Some(edge) = self.next_node_hit {
            next_tables.insert(HIT_KEY.to_string(), edge_json(edge));
        }
        if let Some(edge) = self.next_node_miss {
            next_tables.insert(MISS_KEY.to_string(), edge_json(edge));
        }

        CfgTable {
            name: self.name().to_string(),
            id: self.id(),
            source_info: self.named.source_info().cloned(),
            key: self.key_json.clone(),
            match_type: self.match_type.clone(),
            action_ids: self.action_ids.clone(),
            actions: self
                .action_ids
                .iter()
                .map(|id| {
                    actions
                        .get(*id)
                        .map(|a| a.name().to_string())
                        .unwrap_or_default()
                })
                .collect(),
            base_default_next: pipeline.node_name(self.base_default_next).map(str::to_string),
            next_tables,
            default_entry: self.default_entry.as_ref().map(DefaultEntry::to_cfg),
            extra: self.extra.clone(),
        }
    }

    pub fn match_type(&self) -> &str {
        &self.match_type
    }

    pub fn key_fields(&self) -> &[String] {
        &self.key_fields
    }

    pub fn action_ids(&self) -> &[ObjectId] {
        &self.action_ids
    }

    pub fn has_action(&self, action_id: ObjectId) -> bool {
        self.action_ids.contains(&action_id)
    }

    /// First action of this table whose name is `name`.
    pub fn action_id_by_name(&self, name: &str, actions: &ActionRegistry) -> Option<ObjectId> {
        self.action_ids
            .iter()
            .copied()
            .find(|id| actions.get(*id).is_some_and(|a| a.name() == name))
    }

    pub fn is_hit_miss_selective(&self) -> bool {
        self.next_node_hit.is_some() || self.next_node_miss.is_some()
    }

    pub fn base_default_next(&self) -> Edge {
        self.base_default_next
    }

    pub fn next_node_hit(&self) -> Option<Edge> {
        self.next_node_hit
    }

    pub fn next_node_miss(&self) -> Option<Edge> {
        self.next_node_miss
    }

    pub fn next_node(&self, action_id: ObjectId) -> Option<Edge> {
        self.next_nodes.get(&action_id).copied()
    }

    pub fn next_nodes(&self) -> &BTreeMap<ObjectId, Edge> {
        &self.next_nodes
    }

    pub fn set_base_default_next(&mut self, edge: Edge) {
        self.base_default_next = edge;
    }

    pub fn set_next_node_hit(&mut self, edge: Edge) {
        self.next_node_hit = Some(edge);
    }

    pub fn set_next_node_miss(&mut self, edge: Edge) {
        self.next_node_miss = Some(edge);
    }

    pub fn set_next_node(&mut self, action_id: ObjectId, edge: Edge) {
        self.next_nodes.insert(action_id, edge);
    }

    /// Edges this table can take, for reachability checks.
    pub fn edges(&self) -> impl Iterator<Item = Edge> + '_ {
        self.next_nodes
            .values()
            .copied()
            .chain(self.next_node_hit)
            .chain(self.next_node_miss)
            .chain(std::iter::once(self.base_default_next))
    }

    pub fn default_entry(&self) -> Option<&DefaultEntry> {
        self.default_entry.as_ref()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn add_entry(
        &mut self,
        key: Vec<u64>,
        action_id: ObjectId,
        action_data: Vec<u64>,
    ) -> Result<Option<TableEntry>, EntryError> {
        self.check_key(&key)?;
        self.check_action(action_id)?;
        Ok(self.entries.insert(
            key,
            TableEntry {
                action_id,
                action_data,
            },
        ))
    }

    pub fn delete_entry(&mut self, key: &[u64]) -> Result<TableEntry, EntryError> {
        self.check_key(key)?;
        self.entries
            .remove(key)
            .ok_or_else(|| EntryError::NoSuchEntry {
                table: self.name().to_string(),
                key: key.to_vec(),
            })
    }

    pub fn set_default_entry(
        &mut self,
        action_id: ObjectId,
        action_data: Vec<u64>,
    ) -> Result<(), EntryError> {
        self.check_action(action_id)?;
        let extra = self
            .default_entry
            .take()
            .map(|d| d.extra)
            .unwrap_or_default();
        self.default_entry = Some(DefaultEntry {
            action_id,
            action_data,
            extra,
        });
        Ok(())
    }

    fn check_key(&self, key: &[u64]) -> Result<(), EntryError> {
        if key.len() != self.key_fields.len() {
            return Err(EntryError::KeyArity {
                table: self.name().to_string(),
                expected: self.key_fields.len(),
                got: key.len(),
            });
        }
        Ok(())
    }

    fn check_action(&self, action_id: ObjectId) -> Result<(), EntryError> {
        if !self.has_action(action_id) {
            return Err(EntryError::ActionNotInTable {
                table: self.name().to_string(),
                action_id,
            });
        }
        Ok(())
    }

    /// Looks the packet up, runs the resulting action and returns whether
    /// the lookup hit together with the edge to follow.
    pub fn apply(
        &self,
        packet: &mut Packet,
        objects: &P4Objects,
    ) -> Result<(bool, Edge), PipelineError> {
        let key: Vec<u64> = self.key_fields.iter().map(|f| packet.field(f)).collect();

        if let Some(entry) = self.entries.lookup(&key) {
            run_action(entry.action_id, &entry.action_data, packet, objects)?;
            let next = match self.next_node_hit {
                Some(edge) => edge,
                None => self
                    .next_nodes
                    .get(&entry.action_id)
                    .copied()
                    .unwrap_or(self.base_default_next),
            };
            return Ok((true, next));
        }

        if let Some(default) = &self.default_entry {
            run_action(default.action_id, &default.action_data, packet, objects)?;
        }
        Ok((false, self.next_node_miss.unwrap_or(self.base_default_next)))
    }
}

fn run_action(
    action_id: ObjectId,
    action_data: &[u64],
    packet: &mut Packet,
    objects: &P4Objects,
) -> Result<(), PipelineError> {
    objects
        .action(action_id)
        .ok_or(PipelineError::UnknownAction(action_id))?
        .execute(packet, action_data, objects)
}

impl HasNamedObject for MatchActionTable {
    fn named(&self) -> &NamedObject {
        &self.named
    }
}
