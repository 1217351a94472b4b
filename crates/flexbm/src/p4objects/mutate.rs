//! Structural edits applied to a candidate generation.
//!
//! Each primitive checks its own lookups and duplicate names and either
//! applies completely or leaves the registry untouched. Reference prefixes
//! and plan bookkeeping belong to the reconfiguration engine; names reach
//! this layer already stripped.

use super::P4Objects;
use crate::error::{ReconfigError, ReconfigResultT};
use crate::hash::HashAlgorithm;
use crate::pipeline::{Branch, Conditional, Edge, Node, Pipeline, TableEdge};
use crate::register::{RegisterArray, RehashInputs};
use flexbm_common::{HasNamedObject, NamedObject, ObjectKind};
use std::sync::Arc;

/// Sources of a rehash, by register array name.
#[derive(Debug, Clone, Copy)]
pub struct RehashSpec<'a> {
    pub target: &'a str,
    pub recording: &'a str,
    pub last_pos: &'a str,
    pub counting: &'a str,
    pub counting_hash: HashAlgorithm,
    pub target_hashes: [HashAlgorithm; 3],
    pub reset: &'a str,
}

impl P4Objects {
    fn pipeline_for_edit(&mut self, pipeline: &str) -> ReconfigResultT<&mut Pipeline> {
        self.pipelines
            .get_mut(pipeline)
            .ok_or_else(|| ReconfigError::not_found(ObjectKind::Pipeline, pipeline))
    }

    fn existing_register(&self, name: &str) -> ReconfigResultT<&Arc<RegisterArray>> {
        self.register_arrays
            .get(name)
            .ok_or_else(|| ReconfigError::not_found(ObjectKind::RegisterArray, name))
    }

    /// Adds a conditional built from `donor`'s definition. Without a
    /// definition the conditional is not found.
    pub fn insert_conditional(
        &mut self,
        pipeline: &str,
        name: &str,
        donor: Option<&Conditional>,
    ) -> ReconfigResultT<()> {
        let id = self.conditional_ids.peek();
        let p = self.pipeline_for_edit(pipeline)?;
        if p.find(name).is_some() {
            return Err(ReconfigError::duplicate(ObjectKind::Conditional, name));
        }
        let conditional = donor
            .map(|def| def.instantiate(name, id))
            .ok_or_else(|| ReconfigError::not_found(ObjectKind::Conditional, name))?;
        p.insert_node(Node::Conditional(conditional))
            .map_err(|_| ReconfigError::duplicate(ObjectKind::Conditional, name))?;
        self.conditional_ids.allocate();
        Ok(())
    }

    /// Adds a flex node wired to `false_next` and `true_next`.
    pub fn insert_flex(
        &mut self,
        pipeline: &str,
        name: &str,
        false_next: Option<&str>,
        true_next: Option<&str>,
    ) -> ReconfigResultT<()> {
        let id = self.conditional_ids.peek();
        let p = self.pipeline_for_edit(pipeline)?;
        if p.find(name).is_some() {
            return Err(ReconfigError::duplicate(ObjectKind::Flex, name));
        }
        let false_next = edge_to(p, false_next)?;
        let true_next = edge_to(p, true_next)?;
        let flex = Conditional::flex(NamedObject::new(name, id), false_next, true_next);
        p.insert_node(Node::Conditional(flex))
            .map_err(|_| ReconfigError::duplicate(ObjectKind::Flex, name))?;
        self.conditional_ids.allocate();
        Ok(())
    }

    /// Rewires one edge of a conditional or flex node.
    pub fn set_conditional_next(
        &mut self,
        pipeline: &str,
        name: &str,
        branch: Branch,
        target: Option<&str>,
    ) -> ReconfigResultT<()> {
        let p = self.pipeline_for_edit(pipeline)?;
        let edge = edge_to(p, target)?;
        p.conditional_mut(name)
            .ok_or_else(|| ReconfigError::not_found(ObjectKind::Conditional, name))?
            .set_next(branch, edge);
        Ok(())
    }

    pub fn delete_conditional(&mut self, pipeline: &str, name: &str) -> ReconfigResultT<()> {
        let p = self.pipeline_for_edit(pipeline)?;
        if p.conditional(name).is_none() {
            return Err(ReconfigError::not_found(ObjectKind::Conditional, name));
        }
        p.remove_node(name);
        Ok(())
    }

    /// Adds a table built from the definition of the same-named table in
    /// `donor`'s pipeline of the same name.
    ///
    /// The donor's actions are copied into this registry under fresh ids,
    /// and any calculation those actions use that this registry lacks is
    /// copied along.
    pub fn insert_table(
        &mut self,
        pipeline: &str,
        name: &str,
        donor: &P4Objects,
    ) -> ReconfigResultT<()> {
        {
            let p = self.pipeline_for_edit(pipeline)?;
            if p.find(name).is_some() {
                return Err(ReconfigError::duplicate(ObjectKind::Table, name));
            }
        }
        let def = donor
            .pipeline(pipeline)
            .and_then(|p| p.table(name))
            .ok_or_else(|| ReconfigError::not_found(ObjectKind::Table, name))?;
        let mut donor_actions = Vec::with_capacity(def.action_ids().len());
        for action_id in def.action_ids() {
            let action = donor.action(*action_id).ok_or_else(|| {
                ReconfigError::not_found(ObjectKind::Action, action_id.to_string())
            })?;
            donor_actions.push(action);
        }

        let mut action_ids = Vec::with_capacity(donor_actions.len());
        for action in donor_actions {
            for calc_name in action.primitives().iter().filter_map(|p| p.calculation()) {
                if self.calculations.contains_name(calc_name) {
                    continue;
                }
                if let Some(calc) = donor.calculation(calc_name) {
                    let copy = calc.with_id(self.calculations.next_free_id());
                    self.calculations
                        .insert(copy)
                        .map_err(|_| ReconfigError::duplicate(ObjectKind::Calculation, calc_name))?;
                }
            }
            action_ids.push(self.actions.insert_copy(action));
        }

        let id = self.table_ids.allocate();
        let table = def.instantiate(name, id, action_ids);
        self.pipeline_for_edit(pipeline)?
            .insert_node(Node::Table(table))
            .map_err(|_| ReconfigError::duplicate(ObjectKind::Table, name))?;
        Ok(())
    }

    /// Rewires one next-node slot of a table. Setting `__HIT__` or
    /// `__MISS__` makes the table hit/miss selective.
    pub fn set_table_next(
        &mut self,
        pipeline: &str,
        name: &str,
        slot: &TableEdge,
        target: Option<&str>,
    ) -> ReconfigResultT<()> {
        let Self {
            pipelines, actions, ..
        } = self;
        let p = pipelines
            .get_mut(pipeline)
            .ok_or_else(|| ReconfigError::not_found(ObjectKind::Pipeline, pipeline))?;
        let edge = edge_to(p, target)?;
        let table = p
            .table_mut(name)
            .ok_or_else(|| ReconfigError::not_found(ObjectKind::Table, name))?;
        match slot {
            TableEdge::BaseDefault => table.set_base_default_next(edge),
            TableEdge::Hit => table.set_next_node_hit(edge),
            TableEdge::Miss => table.set_next_node_miss(edge),
            TableEdge::Action(action) => {
                let action_id = table
                    .action_id_by_name(action, actions)
                    .ok_or_else(|| ReconfigError::not_found(ObjectKind::Action, action))?;
                table.set_next_node(action_id, edge);
            }
        }
        Ok(())
    }

    pub fn delete_table(&mut self, pipeline: &str, name: &str) -> ReconfigResultT<()> {
        let p = self.pipeline_for_edit(pipeline)?;
        if p.table(name).is_none() {
            return Err(ReconfigError::not_found(ObjectKind::Table, name));
        }
        p.remove_node(name);
        Ok(())
    }

    pub fn insert_register_array(
        &mut self,
        name: &str,
        size: usize,
        bitwidth: u32,
    ) -> ReconfigResultT<()> {
        if self.register_arrays.contains_name(name) {
            return Err(ReconfigError::duplicate(ObjectKind::RegisterArray, name));
        }
        self.register_arrays
            .insert_with(name, |id| {
                Arc::new(RegisterArray::new(NamedObject::new(name, id), size, bitwidth))
            })
            .map_err(|_| ReconfigError::duplicate(ObjectKind::RegisterArray, name))?;
        Ok(())
    }

    pub fn resize_register_array(&mut self, name: &str, size: usize) -> ReconfigResultT<()> {
        let resized = self.existing_register(name)?.resized(size);
        self.replace_register(name, resized)
    }

    pub fn rewiden_register_array(&mut self, name: &str, bitwidth: u32) -> ReconfigResultT<()> {
        let rewidened = self.existing_register(name)?.rewidened(bitwidth);
        self.replace_register(name, rewidened)
    }

    pub fn delete_register_array(&mut self, name: &str) -> ReconfigResultT<()> {
        self.register_arrays
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ReconfigError::not_found(ObjectKind::RegisterArray, name))
    }

    /// Rebuilds `spec.target` from the recorded values and clears
    /// `spec.reset`. Both get fresh storage; the sources are only read.
    pub fn rehash_register_array(&mut self, spec: &RehashSpec<'_>) -> ReconfigResultT<()> {
        let target = self.existing_register(spec.target)?;
        let recording = self.existing_register(spec.recording)?;
        let last_pos = self.existing_register(spec.last_pos)?;
        let counting = self.existing_register(spec.counting)?;
        let reset = self.existing_register(spec.reset)?;

        let rehashed = target.rehashed(&RehashInputs {
            recording,
            last_pos,
            counting,
            counting_hash: spec.counting_hash,
            target_hashes: spec.target_hashes,
        });
        let cleared = reset.cleared();

        self.replace_register(spec.target, rehashed)?;
        self.replace_register(spec.reset, cleared)
    }

    /// Migrates the storage of every register array resized or rewidened
    /// since the last commit. Runs right before the candidate is published.
    pub fn commit_register_layouts(&mut self) {
        for slot in self.register_arrays.iter_mut() {
            if slot.has_pending_layout() {
                *slot = Arc::new(slot.committed());
            }
        }
    }

    fn replace_register(&mut self, name: &str, array: RegisterArray) -> ReconfigResultT<()> {
        let slot = self
            .register_arrays
            .get_mut(name)
            .ok_or_else(|| ReconfigError::not_found(ObjectKind::RegisterArray, name))?;
        *slot = Arc::new(array);
        Ok(())
    }
}

/// Resolves a node name within `pipeline`; `None` is the null edge.
fn edge_to(pipeline: &Pipeline, target: Option<&str>) -> ReconfigResultT<Edge> {
    match target {
        None => Ok(None),
        Some(name) => pipeline
            .find(name)
            .map(Some)
            .ok_or_else(|| ReconfigError::not_found(ObjectKind::Node, name)),
    }
}
