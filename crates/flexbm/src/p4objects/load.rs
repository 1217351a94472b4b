//! Building a generation from a configuration document.

use super::json::{
    CfgAction, CfgCalculation, CfgConditional, CfgPipeline, CfgRegisterArray, CfgTable,
};
use super::P4Objects;
use crate::calculation::Calculation;
use crate::error::{LoadError, LoadResult};
use crate::packet::HeaderLayout;
use crate::pipeline::table::{HIT_KEY, MISS_KEY};
use crate::pipeline::{ActionFn, Branch, Conditional, Edge, MatchActionTable, Node, Pipeline};
use crate::register::{RegisterArray, MAX_BITWIDTH, MAX_REGISTER_SIZE};
use flexbm_common::{HasNamedObject, NamedObject, ObjectKind, ObjectMapError};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashSet;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

impl P4Objects {
    pub fn from_path(path: impl AsRef<Path>) -> LoadResult<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    pub fn from_reader<R: Read>(reader: R) -> LoadResult<Self> {
        Self::from_value(serde_json::from_reader(reader)?)
    }

    pub fn from_json_str(text: &str) -> LoadResult<Self> {
        Self::from_value(serde_json::from_str(text)?)
    }

    /// Validates and loads a configuration document.
    pub fn from_value(root: Value) -> LoadResult<Self> {
        let Value::Object(mut root) = root else {
            return Err(LoadError::NotAnObject);
        };

        let mut objects = P4Objects::empty();
        objects.layout = HeaderLayout::from_json(root.get("header_types"), root.get("headers"))?;

        for cfg in section::<CfgRegisterArray>(&mut root, "register_arrays")? {
            objects.load_register_array(cfg)?;
        }
        for cfg in section::<CfgCalculation>(&mut root, "calculations")? {
            let calc = Calculation::from_cfg(cfg, &objects.layout)?;
            objects
                .calculations
                .insert(calc)
                .map_err(duplicate(ObjectKind::Calculation))?;
        }
        for cfg in section::<CfgAction>(&mut root, "actions")? {
            objects.actions.insert(ActionFn::from_cfg(cfg)?)?;
        }

        let mut conditional_ids = HashSet::new();
        let mut table_ids = HashSet::new();
        for cfg in section::<CfgPipeline>(&mut root, "pipelines")? {
            let pipeline = objects.load_pipeline(&cfg, &mut conditional_ids, &mut table_ids)?;
            objects
                .pipelines
                .insert(pipeline)
                .map_err(duplicate(ObjectKind::Pipeline))?;
        }

        objects.extra = root;
        Ok(objects)
    }

    fn load_register_array(&mut self, cfg: CfgRegisterArray) -> LoadResult<()> {
        if cfg.size == 0 || cfg.size > MAX_REGISTER_SIZE {
            return Err(LoadError::InvalidRegisterArray {
                name: cfg.name,
                message: format!("size {} outside 1..={MAX_REGISTER_SIZE}", cfg.size),
            });
        }
        if cfg.bitwidth == 0 || cfg.bitwidth > MAX_BITWIDTH {
            return Err(LoadError::InvalidRegisterArray {
                name: cfg.name,
                message: format!("bitwidth {} outside 1..={MAX_BITWIDTH}", cfg.bitwidth),
            });
        }
        let named = NamedObject::new(cfg.name, cfg.id).with_source_info(cfg.source_info);
        let array = RegisterArray::new(named, cfg.size, cfg.bitwidth).with_extra(cfg.extra);
        self.register_arrays
            .insert(Arc::new(array))
            .map_err(duplicate(ObjectKind::RegisterArray))?;
        Ok(())
    }

    fn load_pipeline(
        &mut self,
        cfg: &CfgPipeline,
        conditional_ids: &mut HashSet<i32>,
        table_ids: &mut HashSet<i32>,
    ) -> LoadResult<Pipeline> {
        let named =
            NamedObject::new(cfg.name.clone(), cfg.id).with_source_info(cfg.source_info.clone());
        let mut pipeline = Pipeline::new(named).with_extra(cfg.extra.clone());

        for t in &cfg.tables {
            if !table_ids.insert(t.id) {
                return Err(LoadError::DuplicateId {
                    kind: ObjectKind::Table,
                    id: t.id,
                });
            }
            for action_id in &t.action_ids {
                if self.actions.get(*action_id).is_none() {
                    return Err(LoadError::unknown_reference(
                        ObjectKind::Action,
                        action_id.to_string(),
                        format!("table '{}'", t.name),
                    ));
                }
            }
            self.table_ids.observe(t.id);
            let table = MatchActionTable::unlinked_from_cfg(t)?;
            pipeline
                .insert_node(Node::Table(table))
                .map_err(duplicate(ObjectKind::Node))?;
        }
        for c in &cfg.conditionals {
            if !conditional_ids.insert(c.id) {
                return Err(LoadError::DuplicateId {
                    kind: ObjectKind::Conditional,
                    id: c.id,
                });
            }
            self.conditional_ids.observe(c.id);
            let conditional = Conditional::unlinked_from_cfg(c)?;
            pipeline
                .insert_node(Node::Conditional(conditional))
                .map_err(duplicate(ObjectKind::Node))?;
        }

        for t in &cfg.tables {
            self.link_table(&mut pipeline, t)?;
        }
        for c in &cfg.conditionals {
            link_conditional(&mut pipeline, c)?;
        }
        let init = resolve(&pipeline, cfg.init_table.as_deref(), || {
            format!("pipeline '{}'", cfg.name)
        })?;
        pipeline.set_init(init);
        Ok(pipeline)
    }

    fn link_table(&self, pipeline: &mut Pipeline, cfg: &CfgTable) -> LoadResult<()> {
        let referrer = || format!("table '{}'", cfg.name);
        let base_default_next = resolve(pipeline, cfg.base_default_next.as_deref(), referrer)?;

        let mut hit = None;
        let mut miss = None;
        let mut by_action = Vec::new();
        for (key, target) in &cfg.next_tables {
            let edge = resolve(pipeline, target.as_str(), referrer)?;
            match key.as_str() {
                HIT_KEY => hit = Some(edge),
                MISS_KEY => miss = Some(edge),
                action => {
                    let action_id = cfg
                        .action_ids
                        .iter()
                        .copied()
                        .find(|id| self.actions.get(*id).is_some_and(|a| a.name() == action))
                        .ok_or_else(|| {
                            LoadError::unknown_reference(ObjectKind::Action, action, referrer())
                        })?;
                    by_action.push((action_id, edge));
                }
            }
        }

        let table = pipeline.table_mut(&cfg.name).ok_or_else(|| {
            LoadError::unknown_reference(ObjectKind::Table, &cfg.name, referrer())
        })?;
        table.set_base_default_next(base_default_next);
        if let Some(edge) = hit {
            table.set_next_node_hit(edge);
        }
        if let Some(edge) = miss {
            table.set_next_node_miss(edge);
        }
        for (action_id, edge) in by_action {
            table.set_next_node(action_id, edge);
        }
        Ok(())
    }
}

fn link_conditional(pipeline: &mut Pipeline, cfg: &CfgConditional) -> LoadResult<()> {
    let referrer = || format!("conditional '{}'", cfg.name);
    let true_next = resolve(pipeline, cfg.true_next.as_deref(), referrer)?;
    let false_next = resolve(pipeline, cfg.false_next.as_deref(), referrer)?;
    let conditional = pipeline.conditional_mut(&cfg.name).ok_or_else(|| {
        LoadError::unknown_reference(ObjectKind::Conditional, &cfg.name, referrer())
    })?;
    conditional.set_next(Branch::True, true_next);
    conditional.set_next(Branch::False, false_next);
    Ok(())
}

/// Resolves a node name to an edge; `None` is the null edge.
fn resolve(
    pipeline: &Pipeline,
    target: Option<&str>,
    referrer: impl Fn() -> String,
) -> LoadResult<Edge> {
    match target {
        None => Ok(None),
        Some(name) => pipeline
            .find(name)
            .map(Some)
            .ok_or_else(|| LoadError::unknown_reference(ObjectKind::Node, name, referrer())),
    }
}

/// Removes and parses one top-level array. A missing section is empty.
fn section<T: DeserializeOwned>(
    root: &mut serde_json::Map<String, Value>,
    key: &str,
) -> LoadResult<Vec<T>> {
    match root.remove(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(value) => {
            serde_json::from_value(value).map_err(|e| LoadError::malformed(key, e.to_string()))
        }
    }
}

fn duplicate(kind: ObjectKind) -> impl Fn(ObjectMapError) -> LoadError {
    move |e| match e {
        ObjectMapError::DuplicateName(name) => LoadError::DuplicateName { kind, name },
        ObjectMapError::DuplicateId(id) => LoadError::DuplicateId { kind, id },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::TableEdge;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn document() -> Value {
        json!({
            "header_types": [
                {"name": "ipv4_t", "fields": [["srcAddr", 32, false], ["dstAddr", 32, false]]}
            ],
            "headers": [{"name": "ipv4", "id": 0, "header_type": "ipv4_t"}],
            "parsers": [{"name": "parser", "id": 0, "init_state": "start"}],
            "register_arrays": [
                {"name": "bloom", "id": 0, "size": 16, "bitwidth": 1}
            ],
            "calculations": [
                {"name": "calc", "id": 0, "algo": "crc32",
                 "input": [{"type": "field", "value": ["ipv4", "srcAddr"]}]}
            ],
            "actions": [
                {"name": "NoAction", "id": 0, "runtime_data": [], "primitives": []},
                {"name": "forward", "id": 1, "runtime_data": [], "primitives": []}
            ],
            "pipelines": [{
                "name": "ingress", "id": 0, "init_table": "node_2",
                "tables": [{
                    "name": "t", "id": 0,
                    "key": [{"match_type": "exact", "target": ["ipv4", "dstAddr"]}],
                    "action_ids": [0, 1], "actions": ["NoAction", "forward"],
                    "base_default_next": null,
                    "next_tables": {"NoAction": null, "forward": null}
                }],
                "conditionals": [{
                    "name": "node_2", "id": 0,
                    "expression": {"type": "bool", "value": true},
                    "true_next": "t", "false_next": null
                }]
            }]
        })
    }

    #[test]
    fn test_load_document() {
        let objects = P4Objects::from_value(document()).unwrap();
        assert_eq!(objects.object_count(ObjectKind::Pipeline), 1);
        assert_eq!(objects.object_count(ObjectKind::Table), 1);
        assert_eq!(objects.object_count(ObjectKind::Conditional), 1);
        assert_eq!(objects.object_count(ObjectKind::Action), 2);
        assert_eq!(objects.next_free_id(ObjectKind::Conditional), 1);
        assert_eq!(objects.next_free_id(ObjectKind::Table), 1);
        assert_eq!(objects.next_free_id(ObjectKind::RegisterArray), 1);

        let ingress = objects.pipeline("ingress").unwrap();
        assert_eq!(ingress.node_name(ingress.init()), Some("node_2"));
        let cond = ingress.conditional("node_2").unwrap();
        assert_eq!(ingress.node_name(cond.next(Branch::True)), Some("t"));
        assert_eq!(TableEdge::parse("forward"), TableEdge::Action("forward".to_string()));
    }

    #[test]
    fn test_round_trip_preserves_document() {
        let objects = P4Objects::from_value(document()).unwrap();
        let reloaded = P4Objects::from_value(objects.cfg()).unwrap();
        assert_eq!(objects.cfg(), reloaded.cfg());
        assert_eq!(objects.cfg()["parsers"], document()["parsers"]);
        assert_eq!(
            objects.json_value(ObjectKind::Table, Some("ingress"), "t"),
            Some(document()["pipelines"][0]["tables"][0].clone())
                .map(|mut t| {
                    t["match_type"] = json!("exact");
                    t
                })
        );
    }

    #[test]
    fn test_empty_document() {
        let objects = P4Objects::from_json_str("{}").unwrap();
        assert_eq!(objects.object_count(ObjectKind::Pipeline), 0);
        assert_eq!(objects.next_free_id(ObjectKind::Table), 0);
    }

    #[test]
    fn test_load_failures() {
        assert!(matches!(
            P4Objects::from_json_str("[1, 2]"),
            Err(LoadError::NotAnObject)
        ));
        assert!(matches!(
            P4Objects::from_json_str("{"),
            Err(LoadError::Json(_))
        ));

        let mut doc = document();
        doc["calculations"][0]["algo"] = json!("md5");
        assert!(matches!(
            P4Objects::from_value(doc),
            Err(LoadError::UnknownHashAlgorithm(_))
        ));

        let mut doc = document();
        doc["pipelines"][0]["conditionals"][0]["true_next"] = json!("missing");
        assert!(matches!(
            P4Objects::from_value(doc),
            Err(LoadError::UnknownReference {
                kind: ObjectKind::Node,
                ..
            })
        ));

        let mut doc = document();
        doc["pipelines"][0]["tables"][0]["action_ids"] = json!([0, 7]);
        assert!(matches!(
            P4Objects::from_value(doc),
            Err(LoadError::UnknownReference {
                kind: ObjectKind::Action,
                ..
            })
        ));

        let mut doc = document();
        doc["register_arrays"]
            .as_array_mut()
            .unwrap()
            .push(json!({"name": "bloom", "id": 1, "size": 4, "bitwidth": 8}));
        assert!(matches!(
            P4Objects::from_value(doc),
            Err(LoadError::DuplicateName {
                kind: ObjectKind::RegisterArray,
                ..
            })
        ));

        let mut doc = document();
        doc["register_arrays"][0]["bitwidth"] = json!(65);
        assert!(matches!(
            P4Objects::from_value(doc),
            Err(LoadError::InvalidRegisterArray { .. })
        ));

        let mut doc = document();
        doc["register_arrays"][0]["size"] = json!(u64::MAX);
        assert!(matches!(
            P4Objects::from_value(doc),
            Err(LoadError::InvalidRegisterArray { .. })
        ));
    }
}
