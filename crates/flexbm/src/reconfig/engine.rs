//! Applies a command plan to a candidate generation.

use super::command::{Command, EdgeRef, ObjRef, RehashCommand};
use crate::error::{ReconfigError, ReconfigResultT};
use crate::p4objects::{P4Objects, RehashSpec};
use crate::{debug_log, warn_log};
use flexbm_common::ObjectKind;
use std::collections::HashSet;
use std::io::BufRead;

/// Plan-scoped state over one candidate generation.
///
/// The engine owns the candidate until [`ReconfigEngine::into_candidate`].
/// `donor` is the new configuration document; inserted tables and
/// conditionals take their definitions from it.
pub struct ReconfigEngine<'a> {
    candidate: P4Objects,
    donor: &'a P4Objects,
    /// `(pipeline, node)` names inserted by this plan.
    inserted_nodes: HashSet<(String, String)>,
    inserted_registers: HashSet<String>,
    applied: usize,
}

impl<'a> ReconfigEngine<'a> {
    pub fn new(candidate: P4Objects, donor: &'a P4Objects) -> Self {
        Self {
            candidate,
            donor,
            inserted_nodes: HashSet::new(),
            inserted_registers: HashSet::new(),
            applied: 0,
        }
    }

    pub fn candidate(&self) -> &P4Objects {
        &self.candidate
    }

    pub fn into_candidate(self) -> P4Objects {
        self.candidate
    }

    /// Number of commands applied so far.
    pub fn applied(&self) -> usize {
        self.applied
    }

    /// Applies every command of `plan` in order, stopping at the first
    /// failing line. Blank lines and `#` comments are skipped.
    pub fn apply_plan<R: BufRead>(&mut self, plan: R) -> ReconfigResultT<usize> {
        for (index, line) in plan.lines().enumerate() {
            let line = line.map_err(ReconfigError::ReadPlan)?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Err(e) = self.apply_line(line) {
                warn_log!(
                    "ReconfigEngine",
                    line = index + 1,
                    command = line,
                    code = %e.code(),
                    error = %e,
                    "Plan aborted"
                );
                return Err(e);
            }
        }
        Ok(self.applied)
    }

    pub fn apply_line(&mut self, line: &str) -> ReconfigResultT<()> {
        let command = Command::parse(line)?;
        self.apply_command(&command)?;
        debug_log!("ReconfigEngine", command = line, "Applied command");
        Ok(())
    }

    pub fn apply_command(&mut self, command: &Command) -> ReconfigResultT<()> {
        match command {
            Command::InsertConditional { pipeline, name } => {
                let donor: &'a P4Objects = self.donor;
                let donor = donor.pipeline(pipeline).and_then(|p| p.conditional(name));
                self.candidate.insert_conditional(pipeline, name, donor)?;
                self.inserted_nodes.insert((pipeline.clone(), name.clone()));
            }
            Command::InsertFlex {
                pipeline,
                name,
                false_next,
                true_next,
            } => {
                let false_next = self.edge(pipeline, false_next)?;
                let true_next = self.edge(pipeline, true_next)?;
                self.candidate.insert_flex(pipeline, name, false_next, true_next)?;
                self.inserted_nodes.insert((pipeline.clone(), name.clone()));
            }
            Command::ChangeConditional {
                pipeline,
                node,
                branch,
                target,
            } => {
                let name = self.node(pipeline, node)?;
                let target = self.edge(pipeline, target)?;
                self.candidate.set_conditional_next(pipeline, name, *branch, target)?;
            }
            Command::DeleteConditional { pipeline, node } => {
                let name = self.node(pipeline, node)?;
                self.candidate.delete_conditional(pipeline, name)?;
                self.inserted_nodes.remove(&(pipeline.clone(), name.to_string()));
            }
            Command::InsertTable { pipeline, name } => {
                self.candidate.insert_table(pipeline, name, self.donor)?;
                self.inserted_nodes.insert((pipeline.clone(), name.clone()));
            }
            Command::ChangeTable {
                pipeline,
                node,
                slot,
                target,
            } => {
                let name = self.node(pipeline, node)?;
                let target = self.edge(pipeline, target)?;
                self.candidate.set_table_next(pipeline, name, slot, target)?;
            }
            Command::DeleteTable { pipeline, node } => {
                let name = self.node(pipeline, node)?;
                self.candidate.delete_table(pipeline, name)?;
                self.inserted_nodes.remove(&(pipeline.clone(), name.to_string()));
            }
            Command::InsertRegisterArray {
                name,
                size,
                bitwidth,
            } => {
                self.candidate.insert_register_array(name, *size, *bitwidth)?;
                self.inserted_registers.insert(name.clone());
            }
            Command::ResizeRegisterArray { array, size } => {
                let name = self.register(array)?;
                self.candidate.resize_register_array(name, *size)?;
            }
            Command::RewidenRegisterArray { array, bitwidth } => {
                let name = self.register(array)?;
                self.candidate.rewiden_register_array(name, *bitwidth)?;
            }
            Command::DeleteRegisterArray { array } => {
                let name = self.register(array)?;
                self.candidate.delete_register_array(name)?;
                self.inserted_registers.remove(name);
            }
            Command::Rehash(rehash) => self.rehash(rehash)?,
        }
        self.applied += 1;
        Ok(())
    }

    fn rehash(&mut self, r: &RehashCommand) -> ReconfigResultT<()> {
        let spec = RehashSpec {
            target: self.register(&r.target)?,
            recording: self.register(&r.recording)?,
            last_pos: self.register(&r.last_pos)?,
            counting: self.register(&r.counting)?,
            counting_hash: r.counting_hash,
            target_hashes: r.target_hashes,
            reset: self.register(&r.reset)?,
        };
        self.candidate.rehash_register_array(&spec)
    }

    /// Checks that a node reference's prefix matches its origin.
    fn node<'r>(&self, pipeline: &str, node: &'r ObjRef) -> ReconfigResultT<&'r str> {
        let key = (pipeline.to_string(), node.name().to_string());
        check_origin(node, self.inserted_nodes.contains(&key), ObjectKind::Node)
    }

    fn edge<'r>(&self, pipeline: &str, edge: &'r EdgeRef) -> ReconfigResultT<Option<&'r str>> {
        match edge {
            EdgeRef::Null => Ok(None),
            EdgeRef::Node(node) => self.node(pipeline, node).map(Some),
        }
    }

    fn register<'r>(&self, array: &'r ObjRef) -> ReconfigResultT<&'r str> {
        let inserted = self.inserted_registers.contains(array.name());
        check_origin(array, inserted, ObjectKind::RegisterArray)
    }
}

/// `old_` names objects that predate the plan, `new_` names objects this
/// plan inserted. A mismatch means the referenced object does not exist
/// under that reading.
fn check_origin(r: &ObjRef, inserted: bool, kind: ObjectKind) -> ReconfigResultT<&str> {
    match (r, inserted) {
        (ObjRef::Old(name), false) | (ObjRef::New(name), true) => Ok(name),
        (ObjRef::Old(name), true) | (ObjRef::New(name), false) => {
            Err(ReconfigError::not_found(kind, name.as_str()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReconfigResultExt;
    use crate::pipeline::Branch;
    use flexbm_common::{HasNamedObject, ReconfigResult};
    use serde_json::json;

    fn active() -> P4Objects {
        P4Objects::from_value(json!({
            "register_arrays": [{"name": "bloom", "id": 0, "size": 4, "bitwidth": 1}],
            "actions": [{"name": "NoAction", "id": 0}],
            "pipelines": [{
                "name": "ingress", "id": 0, "init_table": "node_2",
                "tables": [{
                    "name": "t", "id": 0, "key": [],
                    "action_ids": [0], "actions": ["NoAction"],
                    "base_default_next": null, "next_tables": {"NoAction": null}
                }],
                "conditionals": [{
                    "name": "node_2", "id": 0,
                    "expression": {"type": "bool", "value": true},
                    "true_next": "t", "false_next": null
                }]
            }]
        }))
        .unwrap()
    }

    fn donor() -> P4Objects {
        P4Objects::from_value(json!({
            "pipelines": [{
                "name": "ingress", "id": 0, "init_table": "node_6",
                "conditionals": [{
                    "name": "node_6", "id": 0,
                    "expression": {"type": "bool", "value": false},
                    "true_next": null, "false_next": null
                }]
            }]
        }))
        .unwrap()
    }

    fn run(plan: &str) -> (ReconfigResult, P4Objects) {
        let donor = donor();
        let mut engine = ReconfigEngine::new(active(), &donor);
        let result = engine.apply_plan(plan.as_bytes());
        (result.to_code(), engine.into_candidate())
    }

    #[test]
    fn test_insert_then_reference_with_new_prefix() {
        let (code, objects) = run("insert cond ingress new_node_6\n\
             change cond ingress new_node_6 true_next old_t\n\
             change cond ingress old_node_2 false_next new_node_6\n");
        assert_eq!(code, ReconfigResult::Success);
        let p = objects.pipeline("ingress").unwrap();
        let node_6 = p.conditional("node_6").unwrap();
        assert_eq!(node_6.id(), 1);
        assert_eq!(p.node_name(node_6.next(Branch::True)), Some("t"));
        assert_eq!(
            p.node_name(p.conditional("node_2").unwrap().next(Branch::False)),
            Some("node_6")
        );
    }

    #[test]
    fn test_prefix_must_match_origin() {
        let (code, _) = run("insert cond ingress new_node_6\n\
             change cond ingress old_node_6 true_next null\n");
        assert_eq!(code, ReconfigResult::UnfoundIdError);

        let (code, _) = run("delete tabl ingress new_t\n");
        assert_eq!(code, ReconfigResult::UnfoundIdError);
    }

    #[test]
    fn test_duplicate_insert() {
        let (code, _) = run("insert register_array new_R 8 8\ninsert register_array new_R 8 8\n");
        assert_eq!(code, ReconfigResult::DupCheckError);

        let (code, _) = run("insert cond ingress new_node_2\n");
        assert_eq!(code, ReconfigResult::DupCheckError);
    }

    #[test]
    fn test_first_failure_stops_the_plan() {
        let donor = P4Objects::empty();
        let mut engine = ReconfigEngine::new(active(), &donor);
        let plan = "# grow\n\n  insert register_array new_R 8 8  \nbogus line\n\
                    insert register_array new_S 8 8\n";
        assert_eq!(
            engine.apply_plan(plan.as_bytes()).to_code(),
            ReconfigResult::InvalidCommandError
        );
        assert_eq!(engine.applied(), 1);
        assert!(engine.candidate().register_array("R").is_some());
        assert!(engine.candidate().register_array("S").is_none());
    }

    #[test]
    fn test_insert_needs_donor_definition() {
        let (code, _) = run("insert tabl ingress new_missing\n");
        assert_eq!(code, ReconfigResult::UnfoundIdError);

        let (code, objects) = run("insert cond ingress new_missing\n");
        assert_eq!(code, ReconfigResult::UnfoundIdError);
        assert!(objects.pipeline("ingress").unwrap().find("missing").is_none());
        assert_eq!(objects.next_free_id(ObjectKind::Conditional), 1);
    }
}
