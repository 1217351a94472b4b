//! Named hash calculations over packet fields.

use crate::error::LoadError;
use crate::hash::{pack_fields, HashAlgorithm};
use crate::p4objects::json::CfgCalculation;
use crate::packet::{HeaderLayout, Packet};
use crate::pipeline::expr::field_name;
use flexbm_common::{HasNamedObject, NamedObject, ObjectId};
use serde_json::{Map, Value};

#[derive(Debug, Clone)]
pub struct Calculation {
    named: NamedObject,
    algorithm: HashAlgorithm,
    /// Input fields with their widths, in hashing order.
    inputs: Vec<(String, u32)>,
    input_json: Vec<Value>,
    extra: Map<String, Value>,
}

impl Calculation {
    pub(crate) fn from_cfg(cfg: CfgCalculation, layout: &HeaderLayout) -> Result<Self, LoadError> {
        let algorithm: HashAlgorithm = cfg.algo.parse()?;

        let mut inputs = Vec::with_capacity(cfg.input.len());
        for input in &cfg.input {
            if input.get("type").and_then(Value::as_str) != Some("field") {
                return Err(LoadError::malformed(
                    "calculations",
                    format!("calculation '{}' has unsupported input {input}", cfg.name),
                ));
            }
            let field = field_name(input.get("value").unwrap_or(&Value::Null))?;
            let width = layout
                .field_width(&field)
                .ok_or_else(|| LoadError::UnknownField {
                    field: field.clone(),
                    referrer: format!("calculation '{}'", cfg.name),
                })?;
            inputs.push((field, width));
        }

        Ok(Self {
            named: NamedObject::new(cfg.name, cfg.id).with_source_info(cfg.source_info),
            algorithm,
            inputs,
            input_json: cfg.input,
            extra: cfg.extra,
        })
    }

    pub(crate) fn to_cfg(&self) -> CfgCalculation {
        CfgCalculation {
            name: self.name().to_string(),
            id: self.id(),
            source_info: self.named.source_info().cloned(),
            input: self.input_json.clone(),
            algo: self.algorithm.name().to_string(),
            extra: self.extra.clone(),
        }
    }

    /// Copy of this calculation under a new id.
    pub(crate) fn with_id(&self, id: ObjectId) -> Self {
        let mut copy = self.clone();
        copy.named =
            NamedObject::new(self.name(), id).with_source_info(self.named.source_info().cloned());
        copy
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn compute(&self, packet: &Packet) -> u64 {
        let fields: Vec<(u64, u32)> = self
            .inputs
            .iter()
            .map(|(field, width)| (packet.field(field), *width))
            .collect();
        self.algorithm.compute(&pack_fields(&fields))
    }
}

impl HasNamedObject for Calculation {
    fn named(&self) -> &NamedObject {
        &self.named
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn layout() -> HeaderLayout {
        HeaderLayout::from_json(
            Some(&json!([{"name": "ipv4_t", "fields": [["srcAddr", 32, false]]}])),
            Some(&json!([{"name": "ipv4", "header_type": "ipv4_t"}])),
        )
        .unwrap()
    }

    fn cfg(value: serde_json::Value) -> CfgCalculation {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_compute_hashes_packed_fields() {
        let calc = Calculation::from_cfg(
            cfg(json!({
                "name": "calc_identity", "id": 0,
                "input": [{"type": "field", "value": ["ipv4", "srcAddr"]}],
                "algo": "identity"
            })),
            &layout(),
        )
        .unwrap();

        let pkt = Packet::new(0).with_field("ipv4.srcAddr", 0xc0a8_0702);
        assert_eq!(calc.compute(&pkt), 0xc0a8_0702);
        assert_eq!(calc.algorithm(), HashAlgorithm::Identity);
    }

    #[test]
    fn test_unknown_algorithm_fails() {
        let err = Calculation::from_cfg(
            cfg(json!({"name": "calc", "id": 0, "input": [], "algo": "bad_hash_1"})),
            &layout(),
        )
        .unwrap_err();
        assert!(matches!(err, LoadError::UnknownHashAlgorithm(_)));
    }

    #[test]
    fn test_undeclared_input_field_fails() {
        let err = Calculation::from_cfg(
            cfg(json!({
                "name": "calc", "id": 0,
                "input": [{"type": "field", "value": ["tcp", "srcPort"]}],
                "algo": "crc16"
            })),
            &layout(),
        )
        .unwrap_err();
        assert!(matches!(err, LoadError::UnknownField { .. }));
    }
}
