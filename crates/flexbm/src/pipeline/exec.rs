//! Packet traversal of a pipeline.

use super::{Branch, Node, Pipeline, PipelineError};
use crate::p4objects::P4Objects;
use crate::packet::Packet;
use flexbm_common::HasNamedObject;

/// Upper bound on nodes visited per traversal. Plans may wire cycles.
pub const MAX_STEPS: usize = 4096;

/// One visited node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Conditional { name: String, branch: Branch },
    Table { name: String, hit: bool },
}

impl Step {
    pub fn name(&self) -> &str {
        match self {
            Step::Conditional { name, .. } | Step::Table { name, .. } => name,
        }
    }
}

impl Pipeline {
    /// Walks the pipeline from its init node and returns the nodes visited.
    pub fn run(
        &self,
        packet: &mut Packet,
        objects: &P4Objects,
    ) -> Result<Vec<Step>, PipelineError> {
        let mut steps = Vec::new();
        let mut current = self.init();
        let mut from = "init_table";

        while let Some(handle) = current {
            let node = self
                .resolve(handle)
                .ok_or_else(|| PipelineError::DanglingEdge {
                    pipeline: self.name().to_string(),
                    from: from.to_string(),
                })?;
            if steps.len() >= MAX_STEPS {
                return Err(PipelineError::TooManySteps {
                    pipeline: self.name().to_string(),
                    limit: MAX_STEPS,
                });
            }

            current = match node {
                Node::Conditional(c) => {
                    let branch = c.evaluate(packet)?;
                    steps.push(Step::Conditional {
                        name: c.name().to_string(),
                        branch,
                    });
                    c.next(branch)
                }
                Node::Table(t) => {
                    let (hit, next) = t.apply(packet, objects)?;
                    steps.push(Step::Table {
                        name: t.name().to_string(),
                        hit,
                    });
                    next
                }
            };
            from = node.name();
        }
        Ok(steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Condition, Conditional};
    use flexbm_common::NamedObject;
    use serde_json::json;

    fn pipeline() -> Pipeline {
        let mut p = Pipeline::new(NamedObject::new("ingress", 0));
        let check = Condition::from_json(json!({
            "type": "expression",
            "value": {
                "op": "==",
                "left": {"type": "field", "value": ["ipv4", "ttl"]},
                "right": {"type": "hexstr", "value": "0x00"}
            }
        }))
        .unwrap();
        let tail = p
            .insert_node(Node::Conditional(Conditional::new(
                NamedObject::new("node_3", 1),
                Condition::always_true(),
            )))
            .unwrap();
        let mut head = Conditional::new(NamedObject::new("node_2", 0), check);
        head.set_next(Branch::False, Some(tail));
        let head = p.insert_node(Node::Conditional(head)).unwrap();
        p.set_init(Some(head));
        p
    }

    #[test]
    fn test_run_follows_branches() {
        let p = pipeline();
        let objects = P4Objects::empty();

        let mut alive = Packet::new(0).with_field("ipv4.ttl", 3);
        let steps = p.run(&mut alive, &objects).unwrap();
        let names: Vec<_> = steps.iter().map(Step::name).collect();
        assert_eq!(names, ["node_2", "node_3"]);

        let mut expired = Packet::new(0).with_field("ipv4.ttl", 0);
        let steps = p.run(&mut expired, &objects).unwrap();
        assert_eq!(
            steps,
            [Step::Conditional {
                name: "node_2".to_string(),
                branch: Branch::True
            }]
        );
    }

    #[test]
    fn test_dangling_edge_is_reported() {
        let mut p = pipeline();
        p.remove_node("node_3");
        let mut packet = Packet::new(0).with_field("ipv4.ttl", 3);
        assert_eq!(
            p.run(&mut packet, &P4Objects::empty()),
            Err(PipelineError::DanglingEdge {
                pipeline: "ingress".to_string(),
                from: "node_2".to_string()
            })
        );
    }

    #[test]
    fn test_cycle_hits_step_limit() {
        let mut p = pipeline();
        let head = p.find("node_2");
        if let Some(c) = p.conditional_mut("node_3") {
            c.set_next(Branch::True, head);
        }
        let mut packet = Packet::new(0).with_field("ipv4.ttl", 3);
        assert!(matches!(
            p.run(&mut packet, &P4Objects::empty()),
            Err(PipelineError::TooManySteps { limit: MAX_STEPS, .. })
        ));
    }
}
