//! Actions and the primitives they execute.

use super::expr::{field_name, EvalContext, Expr};
use super::PipelineError;
use crate::error::LoadError;
use crate::p4objects::json::{CfgAction, CfgRuntimeParam};
use crate::p4objects::P4Objects;
use crate::packet::Packet;
use flexbm_common::{HasNamedObject, IdAllocator, NamedObject, ObjectId, ObjectKind};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeParam {
    pub name: String,
    pub bitwidth: u32,
}

/// One primitive call inside an action body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Primitive {
    Assign {
        dst: String,
        src: Expr,
    },
    AddToField {
        dst: String,
        value: Expr,
    },
    SubtractFromField {
        dst: String,
        value: Expr,
    },
    RegisterRead {
        dst: String,
        register: String,
        index: Expr,
    },
    RegisterWrite {
        register: String,
        index: Expr,
        value: Expr,
    },
    /// `dst = base + (calculation(packet) % size)`
    HashBasedOffset {
        dst: String,
        base: Expr,
        calculation: String,
        size: Expr,
    },
    MarkToDrop,
    NoOp,
}

impl Primitive {
    fn from_json(action: &str, value: &Value) -> Result<Self, LoadError> {
        let op = value.get("op").and_then(Value::as_str).unwrap_or_default();
        let p = Params {
            action,
            op,
            values: value
                .get("parameters")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default(),
        };

        Ok(match op {
            "assign" | "modify_field" => Primitive::Assign {
                dst: p.field(0)?,
                src: p.expr(1)?,
            },
            "add_to_field" => Primitive::AddToField {
                dst: p.field(0)?,
                value: p.expr(1)?,
            },
            "subtract_from_field" => Primitive::SubtractFromField {
                dst: p.field(0)?,
                value: p.expr(1)?,
            },
            "register_read" => Primitive::RegisterRead {
                dst: p.field(0)?,
                register: p.named(1, "register_array")?,
                index: p.expr(2)?,
            },
            "register_write" => Primitive::RegisterWrite {
                register: p.named(0, "register_array")?,
                index: p.expr(1)?,
                value: p.expr(2)?,
            },
            "modify_field_with_hash_based_offset" => Primitive::HashBasedOffset {
                dst: p.field(0)?,
                base: p.expr(1)?,
                calculation: p.named(2, "calculation")?,
                size: p.expr(3)?,
            },
            "mark_to_drop" | "drop" => Primitive::MarkToDrop,
            "no_op" => Primitive::NoOp,
            _ => {
                return Err(LoadError::UnsupportedPrimitive {
                    action: action.to_string(),
                    op: op.to_string(),
                })
            }
        })
    }

    pub fn register(&self) -> Option<&str> {
        match self {
            Primitive::RegisterRead { register, .. } | Primitive::RegisterWrite { register, .. } => {
                Some(register)
            }
            _ => None,
        }
    }

    pub fn calculation(&self) -> Option<&str> {
        match self {
            Primitive::HashBasedOffset { calculation, .. } => Some(calculation),
            _ => None,
        }
    }
}

/// Positional parameters of one primitive call.
struct Params<'a> {
    action: &'a str,
    op: &'a str,
    values: &'a [Value],
}

impl<'a> Params<'a> {
    fn get(&self, i: usize) -> Result<&'a Value, LoadError> {
        self.values.get(i).ok_or_else(|| {
            LoadError::malformed(
                "actions",
                format!(
                    "primitive '{}' in action '{}' is missing parameter {i}",
                    self.op, self.action
                ),
            )
        })
    }

    fn field(&self, i: usize) -> Result<String, LoadError> {
        field_name(self.get(i)?.get("value").unwrap_or(&Value::Null))
    }

    fn expr(&self, i: usize) -> Result<Expr, LoadError> {
        Expr::from_json(self.get(i)?)
    }

    /// A `{"type": kind, "value": "<name>"}` reference.
    fn named(&self, i: usize, kind: &str) -> Result<String, LoadError> {
        let value = self.get(i)?;
        match (
            value.get("type").and_then(Value::as_str),
            value.get("value").and_then(Value::as_str),
        ) {
            (Some(t), Some(name)) if t == kind => Ok(name.to_string()),
            _ => Err(LoadError::malformed(
                "actions",
                format!("expected {kind} parameter, found {value}"),
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ActionFn {
    named: NamedObject,
    runtime_data: Vec<RuntimeParam>,
    primitives: Vec<Primitive>,
    primitives_json: Vec<Value>,
    extra: Map<String, Value>,
}

impl ActionFn {
    pub(crate) fn from_cfg(cfg: CfgAction) -> Result<Self, LoadError> {
        let primitives = cfg
            .primitives
            .iter()
            .map(|p| Primitive::from_json(&cfg.name, p))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            named: NamedObject::new(cfg.name, cfg.id).with_source_info(cfg.source_info),
            runtime_data: cfg
                .runtime_data
                .into_iter()
                .map(|p| RuntimeParam {
                    name: p.name,
                    bitwidth: p.bitwidth,
                })
                .collect(),
            primitives,
            primitives_json: cfg.primitives,
            extra: cfg.extra,
        })
    }

    pub(crate) fn to_cfg(&self) -> CfgAction {
        CfgAction {
            name: self.name().to_string(),
            id: self.id(),
            source_info: self.named.source_info().cloned(),
            runtime_data: self
                .runtime_data
                .iter()
                .map(|p| CfgRuntimeParam {
                    name: p.name.clone(),
                    bitwidth: p.bitwidth,
                })
                .collect(),
            primitives: self.primitives_json.clone(),
            extra: self.extra.clone(),
        }
    }

    pub fn runtime_data(&self) -> &[RuntimeParam] {
        &self.runtime_data
    }

    pub fn primitives(&self) -> &[Primitive] {
        &self.primitives
    }

    /// Runs every primitive against `packet`.
    pub fn execute(
        &self,
        packet: &mut Packet,
        action_data: &[u64],
        objects: &P4Objects,
    ) -> Result<(), PipelineError> {
        for primitive in &self.primitives {
            match primitive {
                Primitive::Assign { dst, src } => {
                    let v = eval(src, packet, action_data)?;
                    write_field(packet, objects, dst, v);
                }
                Primitive::AddToField { dst, value } => {
                    let v = packet.field(dst).wrapping_add(eval(value, packet, action_data)?);
                    write_field(packet, objects, dst, v);
                }
                Primitive::SubtractFromField { dst, value } => {
                    let v = packet.field(dst).wrapping_sub(eval(value, packet, action_data)?);
                    write_field(packet, objects, dst, v);
                }
                Primitive::RegisterRead {
                    dst,
                    register,
                    index,
                } => {
                    let reg = objects
                        .register_array(register)
                        .ok_or_else(|| PipelineError::UnknownRegister(register.clone()))?;
                    let v = reg.read(to_index(eval(index, packet, action_data)?))?;
                    write_field(packet, objects, dst, v);
                }
                Primitive::RegisterWrite {
                    register,
                    index,
                    value,
                } => {
                    let reg = objects
                        .register_array(register)
                        .ok_or_else(|| PipelineError::UnknownRegister(register.clone()))?;
                    let i = to_index(eval(index, packet, action_data)?);
                    reg.write(i, eval(value, packet, action_data)?)?;
                }
                Primitive::HashBasedOffset {
                    dst,
                    base,
                    calculation,
                    size,
                } => {
                    let calc = objects
                        .calculation(calculation)
                        .ok_or_else(|| PipelineError::UnknownCalculation(calculation.clone()))?;
                    let base = eval(base, packet, action_data)?;
                    let size = eval(size, packet, action_data)?;
                    let offset = calc
                        .compute(packet)
                        .checked_rem(size)
                        .ok_or(PipelineError::DivisionByZero)?;
                    write_field(packet, objects, dst, base.wrapping_add(offset));
                }
                Primitive::MarkToDrop => packet.mark_to_drop(),
                Primitive::NoOp => {}
            }
        }
        Ok(())
    }
}

impl HasNamedObject for ActionFn {
    fn named(&self) -> &NamedObject {
        &self.named
    }
}

fn eval(expr: &Expr, packet: &Packet, action_data: &[u64]) -> Result<u64, PipelineError> {
    expr.eval(&EvalContext {
        packet,
        action_data,
    })
}

fn write_field(packet: &mut Packet, objects: &P4Objects, field: &str, value: u64) {
    let mask = objects.header_layout().mask_for(field);
    packet.set_field(field, value & mask);
}

fn to_index(v: u64) -> usize {
    usize::try_from(v).unwrap_or(usize::MAX)
}

/// All actions of a generation, keyed by id.
///
/// Action names are not unique: the same action may be instantiated once
/// per table that uses it.
#[derive(Debug, Clone, Default)]
pub struct ActionRegistry {
    by_id: BTreeMap<ObjectId, ActionFn>,
    ids: IdAllocator,
}

impl ActionRegistry {
    pub(crate) fn insert(&mut self, action: ActionFn) -> Result<(), LoadError> {
        let id = action.id();
        if self.by_id.contains_key(&id) {
            return Err(LoadError::DuplicateId {
                kind: ObjectKind::Action,
                id,
            });
        }
        self.ids.observe(id);
        self.by_id.insert(id, action);
        Ok(())
    }

    /// Appends a copy of `action` at the next free id.
    pub(crate) fn insert_copy(&mut self, action: &ActionFn) -> ObjectId {
        let id = self.ids.allocate();
        let mut copy = action.clone();
        let source_info = action.named.source_info().cloned();
        copy.named = NamedObject::new(action.name(), id).with_source_info(source_info);
        self.by_id.insert(id, copy);
        id
    }

    pub fn get(&self, id: ObjectId) -> Option<&ActionFn> {
        self.by_id.get(&id)
    }

    /// Lowest-id action with the given name.
    pub fn find_by_name(&self, name: &str) -> Option<ObjectId> {
        self.by_id
            .values()
            .find(|a| a.name() == name)
            .map(|a| a.id())
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn next_free_id(&self) -> ObjectId {
        self.ids.peek()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActionFn> {
        self.by_id.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn action(value: Value) -> ActionFn {
        ActionFn::from_cfg(serde_json::from_value(value).unwrap()).unwrap()
    }

    #[test]
    fn test_parse_primitives() {
        let a = action(json!({
            "name": "MyIngress.record", "id": 3,
            "runtime_data": [{"name": "port", "bitwidth": 9}],
            "primitives": [
                {"op": "register_read", "parameters": [
                    {"type": "field", "value": ["meta", "pos"]},
                    {"type": "register_array", "value": "last_pos"},
                    {"type": "hexstr", "value": "0x0"}
                ]},
                {"op": "mark_to_drop", "parameters": [{"type": "header", "value": "standard_metadata"}]}
            ]
        }));

        assert_eq!(a.id(), 3);
        assert_eq!(a.runtime_data().len(), 1);
        assert_eq!(
            a.primitives()[0],
            Primitive::RegisterRead {
                dst: "meta.pos".to_string(),
                register: "last_pos".to_string(),
                index: Expr::Const(0),
            }
        );
        assert_eq!(a.primitives()[0].register(), Some("last_pos"));
        assert_eq!(a.primitives()[1], Primitive::MarkToDrop);
    }

    #[test]
    fn test_unsupported_primitive() {
        let err = ActionFn::from_cfg(
            serde_json::from_value(json!({
                "name": "a", "id": 0,
                "primitives": [{"op": "clone_ingress_pkt_to_egress", "parameters": []}]
            }))
            .unwrap(),
        )
        .unwrap_err();
        assert!(matches!(err, LoadError::UnsupportedPrimitive { .. }));
    }

    #[test]
    fn test_missing_parameter() {
        let err = ActionFn::from_cfg(
            serde_json::from_value(json!({
                "name": "a", "id": 0,
                "primitives": [{"op": "assign", "parameters": [{"type": "field", "value": ["m", "x"]}]}]
            }))
            .unwrap(),
        )
        .unwrap_err();
        assert!(matches!(err, LoadError::Malformed { .. }));
    }

    #[test]
    fn test_registry_copies_get_fresh_ids() {
        let mut registry = ActionRegistry::default();
        registry.insert(action(json!({"name": "NoAction", "id": 0}))).unwrap();
        registry.insert(action(json!({"name": "drop", "id": 4}))).unwrap();
        assert!(registry.insert(action(json!({"name": "x", "id": 4}))).is_err());

        let source = registry.get(0).cloned().unwrap();
        let id = registry.insert_copy(&source);
        assert_eq!(id, 5);
        assert_eq!(registry.get(5).map(|a| a.name()), Some("NoAction"));
        assert_eq!(registry.find_by_name("NoAction"), Some(0));
        assert_eq!(registry.find_by_name("missing"), None);
        assert_eq!(registry.len(), 3);
    }
}
