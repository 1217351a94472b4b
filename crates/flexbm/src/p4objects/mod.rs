//! The object registry of one generation.
//!
//! [`P4Objects`] owns every pipeline, action, register array and
//! calculation loaded from a configuration document, plus the per-kind id
//! counters used for runtime inserts. It is built by [`P4Objects::from_value`]
//! (see `load.rs`), edited only through the primitives in `mutate.rs`, and
//! rendered back to a document by [`P4Objects::cfg`].

pub(crate) mod json;
mod load;
mod mutate;

pub use mutate::RehashSpec;

use crate::calculation::Calculation;
use crate::packet::{HeaderLayout, Packet};
use crate::pipeline::{
    ActionFn, ActionRegistry, MatchActionTable, Node, Pipeline, PipelineError, Step,
};
use crate::register::RegisterArray;
use flexbm_common::{HasNamedObject, IdAllocator, ObjectId, ObjectKind, ObjectMap};
use json::CfgRegisterArray;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct P4Objects {
    pipelines: ObjectMap<Pipeline>,
    actions: ActionRegistry,
    register_arrays: ObjectMap<Arc<RegisterArray>>,
    calculations: ObjectMap<Calculation>,
    layout: HeaderLayout,
    conditional_ids: IdAllocator,
    table_ids: IdAllocator,
    /// Top-level sections this registry does not model, re-emitted as is.
    extra: Map<String, Value>,
}

impl P4Objects {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn pipelines(&self) -> impl Iterator<Item = &Pipeline> {
        self.pipelines.iter()
    }

    pub fn pipeline(&self, name: &str) -> Option<&Pipeline> {
        self.pipelines.get(name)
    }

    pub(crate) fn pipeline_mut(&mut self, name: &str) -> Option<&mut Pipeline> {
        self.pipelines.get_mut(name)
    }

    /// A table together with the action registry, for edits that resolve
    /// action names while holding the table mutably.
    pub(crate) fn table_and_actions_mut(
        &mut self,
        pipeline: &str,
        table: &str,
    ) -> Option<(&mut MatchActionTable, &ActionRegistry)> {
        let table = self.pipelines.get_mut(pipeline)?.table_mut(table)?;
        Some((table, &self.actions))
    }

    pub fn find_node(&self, pipeline: &str, name: &str) -> Option<&Node> {
        self.pipeline(pipeline)?.node(name)
    }

    pub fn actions(&self) -> &ActionRegistry {
        &self.actions
    }

    pub fn action(&self, id: ObjectId) -> Option<&ActionFn> {
        self.actions.get(id)
    }

    pub fn find_action_by_name(&self, name: &str) -> Option<&ActionFn> {
        self.actions
            .find_by_name(name)
            .and_then(|id| self.actions.get(id))
    }

    pub fn register_array(&self, name: &str) -> Option<&Arc<RegisterArray>> {
        self.register_arrays.get(name)
    }

    pub fn register_arrays(&self) -> impl Iterator<Item = &Arc<RegisterArray>> {
        self.register_arrays.iter()
    }

    pub fn calculation(&self, name: &str) -> Option<&Calculation> {
        self.calculations.get(name)
    }

    pub fn header_layout(&self) -> &HeaderLayout {
        &self.layout
    }

    /// Number of live objects of `kind`. Node kinds count across pipelines.
    pub fn object_count(&self, kind: ObjectKind) -> usize {
        let nodes = |pred: fn(&Node) -> bool| -> usize {
            self.pipelines
                .iter()
                .map(|p| p.nodes().filter(|n| pred(n)).count())
                .sum()
        };
        match kind {
            ObjectKind::Pipeline => self.pipelines.len(),
            ObjectKind::Node => nodes(|_| true),
            ObjectKind::Conditional => nodes(|n| n.as_conditional().is_some()),
            ObjectKind::Flex => nodes(|n| n.kind() == ObjectKind::Flex),
            ObjectKind::Table => nodes(|n| n.as_table().is_some()),
            ObjectKind::Action => self.actions.len(),
            ObjectKind::RegisterArray => self.register_arrays.len(),
            ObjectKind::Calculation => self.calculations.len(),
        }
    }

    /// Id the next runtime insert of `kind` will receive.
    pub fn next_free_id(&self, kind: ObjectKind) -> ObjectId {
        match kind {
            ObjectKind::Pipeline => self.pipelines.next_free_id(),
            ObjectKind::Node | ObjectKind::Conditional | ObjectKind::Flex => {
                self.conditional_ids.peek()
            }
            ObjectKind::Table => self.table_ids.peek(),
            ObjectKind::Action => self.actions.next_free_id(),
            ObjectKind::RegisterArray => self.register_arrays.next_free_id(),
            ObjectKind::Calculation => self.calculations.next_free_id(),
        }
    }

    /// Runs `packet` through every pipeline in id order.
    pub fn process(&self, packet: &mut Packet) -> Result<Vec<Step>, PipelineError> {
        let mut steps = Vec::new();
        for pipeline in self.pipelines.iter() {
            steps.extend(pipeline.run(packet, self)?);
        }
        Ok(steps)
    }

    /// Renders the whole configuration document.
    pub fn cfg(&self) -> Value {
        let mut root = self.extra.clone();
        root.insert(
            "register_arrays".to_string(),
            Value::Array(
                self.register_arrays
                    .iter()
                    .filter_map(|r| to_json(&register_cfg(r)))
                    .collect(),
            ),
        );
        root.insert(
            "calculations".to_string(),
            Value::Array(
                self.calculations
                    .iter()
                    .filter_map(|c| to_json(&c.to_cfg()))
                    .collect(),
            ),
        );
        root.insert(
            "actions".to_string(),
            Value::Array(
                self.actions
                    .iter()
                    .filter_map(|a| to_json(&a.to_cfg()))
                    .collect(),
            ),
        );
        root.insert(
            "pipelines".to_string(),
            Value::Array(
                self.pipelines
                    .iter()
                    .filter_map(|p| to_json(&p.to_cfg(&self.actions)))
                    .collect(),
            ),
        );
        Value::Object(root)
    }

    /// Renders one entry of the document, or `None` when it does not exist.
    ///
    /// `pipeline` is required for node kinds and ignored otherwise. Actions
    /// are looked up by name, lowest id first.
    pub fn json_value(
        &self,
        kind: ObjectKind,
        pipeline: Option<&str>,
        name: &str,
    ) -> Option<Value> {
        match kind {
            ObjectKind::Pipeline => to_json(&self.pipeline(name)?.to_cfg(&self.actions)),
            ObjectKind::Node | ObjectKind::Conditional | ObjectKind::Flex | ObjectKind::Table => {
                let p = self.pipeline(pipeline?)?;
                match p.node(name)? {
                    Node::Conditional(c) if kind != ObjectKind::Table => {
                        if kind == ObjectKind::Flex && !c.is_flex() {
                            return None;
                        }
                        to_json(&c.to_cfg(p))
                    }
                    Node::Table(t) if matches!(kind, ObjectKind::Node | ObjectKind::Table) => {
                        to_json(&t.to_cfg(p, &self.actions))
                    }
                    _ => None,
                }
            }
            ObjectKind::Action => to_json(&self.find_action_by_name(name)?.to_cfg()),
            ObjectKind::RegisterArray => to_json(&register_cfg(self.register_array(name)?)),
            ObjectKind::Calculation => to_json(&self.calculation(name)?.to_cfg()),
        }
    }
}

fn register_cfg(r: &RegisterArray) -> CfgRegisterArray {
    CfgRegisterArray {
        name: r.name().to_string(),
        id: r.id(),
        source_info: r.named().source_info().cloned(),
        size: r.size(),
        bitwidth: r.bitwidth(),
        extra: r.extra().clone(),
    }
}

fn to_json<T: Serialize>(value: &T) -> Option<Value> {
    serde_json::to_value(value).ok()
}
