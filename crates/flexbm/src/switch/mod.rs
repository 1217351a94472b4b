//! Switch facade: execution contexts and generation publishing.
//!
//! Each context holds its active generation behind an [`ArcSwap`]. Packet
//! workers load it once per packet; writers build a replacement off to the
//! side under the context's writer lock and publish it with a single store,
//! so a worker sees either the old or the new generation in full.

pub mod dataplane;

pub use dataplane::{Dataplane, DataplaneError, DataplaneStats, PacketOutcome};

use crate::config::RuntimeConfig;
use crate::error::{LoadError, ReconfigError, ReconfigResultExt, ReconfigResultT};
use crate::p4objects::P4Objects;
use crate::packet::Packet;
use crate::pipeline::{ActionRegistry, EntryError, MatchActionTable};
use crate::reconfig::ReconfigEngine;
use crate::register::{RegisterArray, RegisterError};
use crate::{debug_log, info_log, warn_log};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use flexbm_common::{ObjectId, ObjectKind, ReconfigResult};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SwitchError>;

#[derive(Debug, Error)]
pub enum SwitchError {
    #[error("Unknown context {0}")]
    UnknownContext(usize),

    #[error("Failed to load configuration: {0}")]
    Load(#[from] LoadError),

    #[error("{kind} '{name}' not found")]
    NotFound { kind: ObjectKind, name: String },

    #[error(transparent)]
    Register(#[from] RegisterError),

    #[error(transparent)]
    Entry(#[from] EntryError),
}

impl SwitchError {
    fn not_found(kind: ObjectKind, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }
}

/// One published registry. `number` counts loads and successful plans on
/// the context.
#[derive(Debug)]
pub struct Generation {
    number: u64,
    objects: P4Objects,
}

impl Generation {
    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn objects(&self) -> &P4Objects {
        &self.objects
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReconfigStats {
    pub plans_applied: u64,
    pub plans_failed: u64,
    pub commands_applied: u64,
    pub last_result: Option<ReconfigResult>,
    pub last_run: Option<DateTime<Utc>>,
}

struct Context {
    active: ArcSwap<Generation>,
    /// Serializes every writer of `active`.
    writer: Mutex<()>,
    stats: Mutex<ReconfigStats>,
}

impl Context {
    fn new() -> Self {
        Self {
            active: ArcSwap::from_pointee(Generation {
                number: 0,
                objects: P4Objects::empty(),
            }),
            writer: Mutex::new(()),
            stats: Mutex::new(ReconfigStats::default()),
        }
    }
}

pub struct Switch {
    contexts: Vec<Context>,
}

impl Switch {
    /// Switch with `contexts` contexts, each holding an empty generation 0.
    pub fn new(contexts: usize) -> Self {
        Self {
            contexts: (0..contexts).map(|_| Context::new()).collect(),
        }
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(config.switch.contexts)
    }

    pub fn context_count(&self) -> usize {
        self.contexts.len()
    }

    fn context(&self, cxt: usize) -> Result<&Context> {
        self.contexts
            .get(cxt)
            .ok_or(SwitchError::UnknownContext(cxt))
    }

    /// Loads a configuration document as the next generation of `cxt`.
    pub fn init_objects(&self, cxt: usize, path: impl AsRef<Path>) -> Result<u64> {
        let objects = P4Objects::from_path(path)?;
        self.publish_objects(cxt, objects)
    }

    pub fn init_objects_from_reader<R: Read>(&self, cxt: usize, reader: R) -> Result<u64> {
        let objects = P4Objects::from_reader(reader)?;
        self.publish_objects(cxt, objects)
    }

    fn publish_objects(&self, cxt: usize, objects: P4Objects) -> Result<u64> {
        let context = self.context(cxt)?;
        let _writer = context.writer.lock();
        let number = context.active.load().number + 1;
        context.active.store(Arc::new(Generation { number, objects }));
        info_log!("Switch", context = cxt, generation = number, "Loaded configuration");
        Ok(number)
    }

    /// The generation packets of `cxt` currently run against.
    pub fn active(&self, cxt: usize) -> Result<Arc<Generation>> {
        Ok(self.context(cxt)?.active.load_full())
    }

    pub fn generation(&self, cxt: usize) -> Result<u64> {
        Ok(self.context(cxt)?.active.load().number)
    }

    pub fn stats(&self, cxt: usize) -> Result<ReconfigStats> {
        Ok(self.context(cxt)?.stats.lock().clone())
    }

    /// Applies a plan from files. Both files are opened before either is
    /// parsed.
    pub fn apply_reconfig(
        &self,
        cxt: usize,
        json_path: impl AsRef<Path>,
        plan_path: impl AsRef<Path>,
    ) -> ReconfigResult {
        let result = open_inputs(json_path.as_ref(), plan_path.as_ref())
            .and_then(|(json, plan)| self.reconfigure(cxt, json, plan));
        self.finish(cxt, result)
    }

    pub fn apply_reconfig_with_readers<J: Read, P: BufRead>(
        &self,
        cxt: usize,
        json: J,
        plan: P,
    ) -> ReconfigResult {
        let result = self.reconfigure(cxt, json, plan);
        self.finish(cxt, result)
    }

    /// Builds a candidate from the active generation, applies the plan to it
    /// and publishes it. Returns the new generation number and the number of
    /// commands applied.
    fn reconfigure<J: Read, P: BufRead>(
        &self,
        cxt: usize,
        json: J,
        plan: P,
    ) -> ReconfigResultT<(u64, usize)> {
        let context = self
            .context(cxt)
            .map_err(|_| ReconfigError::UnknownContext(cxt))?;
        let donor = P4Objects::from_reader(json)?;

        let _writer = context.writer.lock();
        let current = context.active.load_full();
        let mut engine = ReconfigEngine::new(current.objects.clone(), &donor);
        let applied = engine.apply_plan(plan)?;

        let mut objects = engine.into_candidate();
        objects.commit_register_layouts();
        let number = current.number + 1;
        context.active.store(Arc::new(Generation { number, objects }));
        Ok((number, applied))
    }

    fn finish(&self, cxt: usize, result: ReconfigResultT<(u64, usize)>) -> ReconfigResult {
        let code = result.to_code();
        match &result {
            Ok((number, applied)) => info_log!(
                "Switch",
                context = cxt,
                generation = number,
                commands = applied,
                "Published reconfigured generation"
            ),
            Err(e) => warn_log!(
                "Switch",
                context = cxt,
                code = %code,
                error = %e,
                "Reconfiguration rejected, active generation kept"
            ),
        }

        if let Ok(context) = self.context(cxt) {
            let mut stats = context.stats.lock();
            match &result {
                Ok((_, applied)) => {
                    stats.plans_applied += 1;
                    stats.commands_applied += *applied as u64;
                }
                Err(_) => stats.plans_failed += 1,
            }
            stats.last_result = Some(code);
            stats.last_run = Some(Utc::now());
        }
        code
    }

    /// Runs one packet against the active generation of `cxt`.
    pub fn process_packet(&self, cxt: usize, packet: Packet) -> Result<PacketOutcome> {
        let generation = self.active(cxt)?;
        Ok(PacketOutcome::run(&generation, packet))
    }

    fn register(&self, cxt: usize, name: &str) -> Result<Arc<RegisterArray>> {
        self.active(cxt)?
            .objects
            .register_array(name)
            .cloned()
            .ok_or_else(|| SwitchError::not_found(ObjectKind::RegisterArray, name))
    }

    pub fn register_read(&self, cxt: usize, name: &str, index: usize) -> Result<u64> {
        Ok(self.register(cxt, name)?.read(index)?)
    }

    pub fn register_write(&self, cxt: usize, name: &str, index: usize, value: u64) -> Result<()> {
        Ok(self.register(cxt, name)?.write(index, value)?)
    }

    pub fn register_reset(&self, cxt: usize, name: &str) -> Result<()> {
        self.register(cxt, name)?.reset();
        Ok(())
    }

    /// Copy of every cell of a register array.
    pub fn register_snapshot(&self, cxt: usize, name: &str) -> Result<Vec<u64>> {
        Ok(self.register(cxt, name)?.snapshot())
    }

    pub fn table_add_entry(
        &self,
        cxt: usize,
        pipeline: &str,
        table: &str,
        key: Vec<u64>,
        action: &str,
        action_data: Vec<u64>,
    ) -> Result<()> {
        self.edit_table(cxt, pipeline, table, |t, actions| {
            let action_id = table_action(t, actions, action)?;
            t.add_entry(key, action_id, action_data)?;
            Ok(())
        })
    }

    pub fn table_delete_entry(
        &self,
        cxt: usize,
        pipeline: &str,
        table: &str,
        key: &[u64],
    ) -> Result<()> {
        self.edit_table(cxt, pipeline, table, |t, _| {
            t.delete_entry(key)?;
            Ok(())
        })
    }

    pub fn table_set_default(
        &self,
        cxt: usize,
        pipeline: &str,
        table: &str,
        action: &str,
        action_data: Vec<u64>,
    ) -> Result<()> {
        self.edit_table(cxt, pipeline, table, |t, actions| {
            let action_id = table_action(t, actions, action)?;
            Ok(t.set_default_entry(action_id, action_data)?)
        })
    }

    /// Copy-and-swap edit of one table under the writer lock.
    fn edit_table<T, F>(&self, cxt: usize, pipeline: &str, table: &str, edit: F) -> Result<T>
    where
        F: FnOnce(&mut MatchActionTable, &ActionRegistry) -> Result<T>,
    {
        let context = self.context(cxt)?;
        let _writer = context.writer.lock();
        let current = context.active.load_full();
        let mut objects = current.objects.clone();

        if objects.pipeline(pipeline).is_none() {
            return Err(SwitchError::not_found(ObjectKind::Pipeline, pipeline));
        }
        let (t, actions) = objects
            .table_and_actions_mut(pipeline, table)
            .ok_or_else(|| SwitchError::not_found(ObjectKind::Table, table))?;
        let out = edit(t, actions)?;

        context.active.store(Arc::new(Generation {
            number: current.number,
            objects,
        }));
        debug_log!("Switch", context = cxt, pipeline = pipeline, table = table, "Table updated");
        Ok(out)
    }
}

/// Resolves an action name among the table's own actions.
fn table_action(
    table: &MatchActionTable,
    actions: &ActionRegistry,
    name: &str,
) -> Result<ObjectId> {
    table
        .action_id_by_name(name, actions)
        .ok_or_else(|| SwitchError::not_found(ObjectKind::Action, name))
}

type PlanInputs = (BufReader<File>, BufReader<File>);

fn open_inputs(json_path: &Path, plan_path: &Path) -> ReconfigResultT<PlanInputs> {
    let json = File::open(json_path).map_err(|source| ReconfigError::OpenJson {
        path: json_path.to_path_buf(),
        source,
    })?;
    let plan = File::open(plan_path).map_err(|source| ReconfigError::OpenPlan {
        path: plan_path.to_path_buf(),
        source,
    })?;
    Ok((BufReader::new(json), BufReader::new(plan)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Branch;
    use serde_json::json;
    use tempfile::TempDir;

    fn document() -> String {
        json!({
            "header_types": [{"name": "ipv4_t", "fields": [["dstAddr", 32, false]]}],
            "headers": [{"name": "ipv4", "id": 0, "header_type": "ipv4_t"}],
            "register_arrays": [{"name": "hits", "id": 0, "size": 4, "bitwidth": 8}],
            "actions": [
                {"name": "NoAction", "id": 0},
                {"name": "count", "id": 1, "primitives": [{"op": "register_write", "parameters": [
                    {"type": "register_array", "value": "hits"},
                    {"type": "hexstr", "value": "0x1"},
                    {"type": "hexstr", "value": "0xff"}
                ]}]}
            ],
            "pipelines": [{
                "name": "ingress", "id": 0, "init_table": "node_2",
                "tables": [{
                    "name": "t", "id": 0,
                    "key": [{"match_type": "exact", "target": ["ipv4", "dstAddr"]}],
                    "action_ids": [0, 1], "actions": ["NoAction", "count"],
                    "base_default_next": null,
                    "next_tables": {"NoAction": null, "count": null}
                }],
                "conditionals": [{
                    "name": "node_2", "id": 0,
                    "expression": {"type": "bool", "value": true},
                    "true_next": "t", "false_next": null
                }]
            }]
        })
        .to_string()
    }

    fn switch() -> Switch {
        let switch = Switch::new(1);
        switch
            .init_objects_from_reader(0, document().as_bytes())
            .unwrap();
        switch
    }

    #[test]
    fn test_apply_reconfig_publishes_new_generation() {
        let switch = switch();
        assert_eq!(switch.generation(0).unwrap(), 1);
        let before = switch.active(0).unwrap();

        let code = switch.apply_reconfig_with_readers(
            0,
            "{}".as_bytes(),
            "insert register_array new_R 128 32\n".as_bytes(),
        );
        assert_eq!(code, ReconfigResult::Success);
        assert_eq!(switch.generation(0).unwrap(), 2);
        assert_eq!(switch.register_snapshot(0, "R").unwrap(), vec![0; 128]);
        // Readers holding the old generation keep seeing it.
        assert!(before.objects().register_array("R").is_none());

        let stats = switch.stats(0).unwrap();
        assert_eq!(stats.plans_applied, 1);
        assert_eq!(stats.commands_applied, 1);
        assert_eq!(stats.last_result, Some(ReconfigResult::Success));
        assert!(stats.last_run.is_some());
    }

    #[test]
    fn test_failed_plan_keeps_active_generation() {
        let switch = switch();
        let code = switch.apply_reconfig_with_readers(
            0,
            "{}".as_bytes(),
            "insert register_array new_R 8 8\ndelete register_array R\n".as_bytes(),
        );
        assert_eq!(code, ReconfigResult::PrefixError);
        assert_eq!(switch.generation(0).unwrap(), 1);
        assert!(matches!(
            switch.register_read(0, "R", 0),
            Err(SwitchError::NotFound { .. })
        ));
        assert_eq!(switch.stats(0).unwrap().plans_failed, 1);

        let code = switch.apply_reconfig_with_readers(0, "{".as_bytes(), "".as_bytes());
        assert_eq!(code, ReconfigResult::P4ObjectsInitFail);

        let code = switch.apply_reconfig_with_readers(3, "{}".as_bytes(), "".as_bytes());
        assert_eq!(code, ReconfigResult::UnfoundIdError);
    }

    #[test]
    fn test_apply_reconfig_missing_files() {
        let dir = TempDir::new().unwrap();
        let json = dir.path().join("new.json");
        let plan = dir.path().join("plan.txt");

        assert_eq!(
            switch().apply_reconfig(0, &json, &plan),
            ReconfigResult::OpenJsonFileFail
        );
        std::fs::write(&json, "{}").unwrap();
        assert_eq!(
            switch().apply_reconfig(0, &json, &plan),
            ReconfigResult::OpenPlanFileFail
        );
        std::fs::write(&plan, "insert cond ingress new_node_6\n").unwrap();
        let switch = switch();
        // An empty document defines no node_6
        assert_eq!(switch.apply_reconfig(0, &json, &plan), ReconfigResult::UnfoundIdError);

        let donor = json!({"pipelines": [{
            "name": "ingress", "id": 0, "init_table": "node_6",
            "conditionals": [{
                "name": "node_6", "id": 0,
                "expression": {"type": "bool", "value": true},
                "true_next": null, "false_next": null
            }]
        }]});
        std::fs::write(&json, donor.to_string()).unwrap();
        assert_eq!(switch.apply_reconfig(0, &json, &plan), ReconfigResult::Success);
        let active = switch.active(0).unwrap();
        let p = active.objects().pipeline("ingress").unwrap();
        let node = p.conditional("node_6").unwrap();
        assert_eq!(node.next(Branch::True), None);
        assert_eq!(node.next(Branch::False), None);
    }

    #[test]
    fn test_register_operations_in_place() {
        let switch = switch();
        let held = switch.active(0).unwrap();
        switch.register_write(0, "hits", 2, 0x1ff).unwrap();
        assert_eq!(switch.register_read(0, "hits", 2).unwrap(), 0xff);
        assert_eq!(held.objects().register_array("hits").unwrap().read(2).unwrap(), 0xff);
        assert!(matches!(
            switch.register_read(0, "hits", 4),
            Err(SwitchError::Register(RegisterError::IndexOutOfRange { .. }))
        ));
        switch.register_reset(0, "hits").unwrap();
        assert_eq!(switch.register_snapshot(0, "hits").unwrap(), vec![0; 4]);
    }

    #[test]
    fn test_table_entries_drive_packets() {
        let switch = switch();
        switch
            .table_add_entry(0, "ingress", "t", vec![0x0a000001], "count", vec![])
            .unwrap();

        let hit = switch
            .process_packet(0, Packet::new(1).with_field("ipv4.dstAddr", 0x0a000001))
            .unwrap();
        assert!(hit.error.is_none());
        assert_eq!(hit.steps.len(), 2);
        assert_eq!(switch.register_read(0, "hits", 1).unwrap(), 0xff);

        assert!(matches!(
            switch.table_add_entry(0, "ingress", "t", vec![1], "drop", vec![]),
            Err(SwitchError::NotFound {
                kind: ObjectKind::Action,
                ..
            })
        ));
        assert!(matches!(
            switch.table_add_entry(0, "egress", "t", vec![1], "count", vec![]),
            Err(SwitchError::NotFound {
                kind: ObjectKind::Pipeline,
                ..
            })
        ));
        switch.table_delete_entry(0, "ingress", "t", &[0x0a000001]).unwrap();
        assert!(matches!(
            switch.table_delete_entry(0, "ingress", "t", &[0x0a000001]),
            Err(SwitchError::Entry(EntryError::NoSuchEntry { .. }))
        ));
        switch.table_set_default(0, "ingress", "t", "NoAction", vec![]).unwrap();
        assert_eq!(switch.generation(0).unwrap(), 1);
    }
}
