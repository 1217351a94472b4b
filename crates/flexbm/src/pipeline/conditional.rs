//! Conditional and flex nodes.

use super::expr::{EvalContext, Expr};
use super::{Edge, Pipeline, PipelineError};
use crate::error::LoadError;
use crate::p4objects::json::CfgConditional;
use crate::packet::Packet;
use flexbm_common::{HasNamedObject, NamedObject, ObjectId};
use serde_json::{json, Map, Value};

/// Which edge of a conditional to follow or edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    True,
    False,
}

impl Branch {
    pub fn field_name(&self) -> &'static str {
        match self {
            Branch::True => "true_next",
            Branch::False => "false_next",
        }
    }
}

/// A parsed condition together with the JSON it was parsed from.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    json: Value,
    expr: Expr,
}

impl Condition {
    pub fn from_json(json: Value) -> Result<Self, LoadError> {
        let expr = Expr::from_json(&json)?;
        Ok(Self { json, expr })
    }

    pub fn always_true() -> Self {
        Self {
            json: json!({"type": "bool", "value": true}),
            expr: Expr::always_true(),
        }
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    pub fn json(&self) -> &Value {
        &self.json
    }
}

#[derive(Debug, Clone)]
pub struct Conditional {
    named: NamedObject,
    condition: Option<Condition>,
    true_next: Edge,
    false_next: Edge,
    flex: bool,
    extra: Map<String, Value>,
}

impl Conditional {
    pub fn new(named: NamedObject, condition: Condition) -> Self {
        Self {
            named,
            condition: Some(condition),
            true_next: None,
            false_next: None,
            flex: false,
            extra: Map::new(),
        }
    }

    /// An editable insertion point. Without a condition it always takes
    /// `true_next`.
    pub fn flex(named: NamedObject, false_next: Edge, true_next: Edge) -> Self {
        Self {
            named,
            condition: None,
            true_next,
            false_next,
            flex: true,
            extra: Map::new(),
        }
    }

    /// Builds the node without edges. Edges are wired by the loader once
    /// every node of the pipeline exists.
    pub(crate) fn unlinked_from_cfg(cfg: &CfgConditional) -> Result<Self, LoadError> {
        let condition = cfg
            .expression
            .clone()
            .map(Condition::from_json)
            .transpose()?;
        if condition.is_none() && !cfg.flex {
            return Err(LoadError::malformed(
                "pipelines",
                format!("conditional '{}' has no expression", cfg.name),
            ));
        }
        Ok(Self {
            named: NamedObject::new(cfg.name.clone(), cfg.id)
                .with_source_info(cfg.source_info.clone()),
            condition,
            true_next: None,
            false_next: None,
            flex: cfg.flex,
            extra: cfg.extra.clone(),
        })
    }

    pub(crate) fn to_cfg(&self, pipeline: &Pipeline) -> CfgConditional {
        CfgConditional {
            name: self.name().to_string(),
            id: self.id(),
            source_info: self.named.source_info().cloned(),
            expression: self.condition.as_ref().map(|c| c.json.clone()),
            true_next: pipeline.node_name(self.true_next).map(str::to_string),
            false_next: pipeline.node_name(self.false_next).map(str::to_string),
            flex: self.flex,
            extra: self.extra.clone(),
        }
    }

    /// Copy of this node's definition under a new name and id, unlinked.
    pub(crate) fn instantiate(&self, name: &str, id: ObjectId) -> Self {
        Self {
            named: NamedObject::new(name, id).with_source_info(self.named.source_info().cloned()),
            condition: self.condition.clone(),
            true_next: None,
            false_next: None,
            flex: false,
            extra: self.extra.clone(),
        }
    }

    pub fn is_flex(&self) -> bool {
        self.flex
    }

    pub fn condition(&self) -> Option<&Condition> {
        self.condition.as_ref()
    }

    pub fn next(&self, branch: Branch) -> Edge {
        match branch {
            Branch::True => self.true_next,
            Branch::False => self.false_next,
        }
    }

    pub fn set_next(&mut self, branch: Branch, edge: Edge) {
        match branch {
            Branch::True => self.true_next = edge,
            Branch::False => self.false_next = edge,
        }
    }

    pub fn evaluate(&self, packet: &Packet) -> Result<Branch, PipelineError> {
        let taken = match &self.condition {
            Some(condition) => condition.expr().test(&EvalContext {
                packet,
                action_data: &[],
            })?,
            None => true,
        };
        Ok(if taken { Branch::True } else { Branch::False })
    }
}

impl HasNamedObject for Conditional {
    fn named(&self) -> &NamedObject {
        &self.named
    }
}
