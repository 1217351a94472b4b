//! Packet header vector and header layout.
//!
//! Parsing and deparsing happen outside this crate. The pipeline only sees
//! a [`Packet`]: a set of named field values plus the set of headers the
//! parser marked valid. Field widths come from the configuration's
//! `header_types` and `headers` through [`HeaderLayout`].

use crate::error::LoadError;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Header vector of one packet in flight.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Packet {
    fields: BTreeMap<String, u64>,
    valid_headers: BTreeSet<String>,
    ingress_port: u16,
    dropped: bool,
}

impl Packet {
    pub fn new(ingress_port: u16) -> Self {
        Self {
            ingress_port,
            ..Default::default()
        }
    }

    /// Sets a field and marks its header valid.
    pub fn with_field(mut self, field: &str, value: u64) -> Self {
        if let Some((header, _)) = field.split_once('.') {
            self.valid_headers.insert(header.to_string());
        }
        self.fields.insert(field.to_string(), value);
        self
    }

    pub fn with_header(mut self, header: &str) -> Self {
        self.valid_headers.insert(header.to_string());
        self
    }

    /// Reads a field; unset fields read as zero.
    pub fn field(&self, field: &str) -> u64 {
        self.fields.get(field).copied().unwrap_or(0)
    }

    pub fn set_field(&mut self, field: &str, value: u64) {
        self.fields.insert(field.to_string(), value);
    }

    pub fn is_valid(&self, header: &str) -> bool {
        self.valid_headers.contains(header)
    }

    pub fn ingress_port(&self) -> u16 {
        self.ingress_port
    }

    pub fn mark_to_drop(&mut self) {
        self.dropped = true;
    }

    pub fn is_dropped(&self) -> bool {
        self.dropped
    }
}

#[derive(Debug, Deserialize)]
struct CfgHeaderType {
    name: String,
    #[serde(default)]
    fields: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct CfgHeader {
    name: String,
    header_type: String,
}

/// Field widths of every declared header instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderLayout {
    field_widths: HashMap<String, u32>,
}

impl HeaderLayout {
    /// Builds the layout from the `header_types` and `headers` arrays of a
    /// configuration document. Either may be absent.
    pub fn from_json(
        header_types: Option<&Value>,
        headers: Option<&Value>,
    ) -> Result<Self, LoadError> {
        let types: Vec<CfgHeaderType> = match header_types {
            Some(v) => serde_json::from_value(v.clone())
                .map_err(|e| LoadError::malformed("header_types", e.to_string()))?,
            None => Vec::new(),
        };
        let instances: Vec<CfgHeader> = match headers {
            Some(v) => serde_json::from_value(v.clone())
                .map_err(|e| LoadError::malformed("headers", e.to_string()))?,
            None => Vec::new(),
        };

        let mut type_fields: HashMap<&str, Vec<(String, u32)>> = HashMap::new();
        for ht in &types {
            let mut fields = Vec::with_capacity(ht.fields.len());
            for field in &ht.fields {
                fields.push(parse_field_decl(&ht.name, field)?);
            }
            type_fields.insert(ht.name.as_str(), fields);
        }

        let mut field_widths = HashMap::new();
        for header in &instances {
            let fields = type_fields
                .get(header.header_type.as_str())
                .ok_or_else(|| LoadError::UnknownHeaderType {
                    header: header.name.clone(),
                    header_type: header.header_type.clone(),
                })?;
            for (field, width) in fields {
                field_widths.insert(format!("{}.{}", header.name, field), *width);
            }
        }

        Ok(Self { field_widths })
    }

    pub fn field_width(&self, field: &str) -> Option<u32> {
        self.field_widths.get(field).copied()
    }

    /// Mask applied to values written into `field`. Undeclared fields are
    /// treated as 64 bits wide.
    pub fn mask_for(&self, field: &str) -> u64 {
        self.field_width(field).map(width_mask).unwrap_or(u64::MAX)
    }
}

/// All-ones mask of `width` bits, saturating at 64.
pub fn width_mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

// Field declarations are `[name, width]` or `[name, width, signed]`.
fn parse_field_decl(header_type: &str, decl: &Value) -> Result<(String, u32), LoadError> {
    let name = decl.get(0).and_then(Value::as_str);
    let width = decl.get(1).and_then(Value::as_u64);
    match (name, width) {
        (Some(name), Some(width)) if (1..=64).contains(&width) => {
            Ok((name.to_string(), width as u32))
        }
        _ => Err(LoadError::malformed(
            "header_types",
            format!("bad field declaration {decl} in header type {header_type}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_layout_from_json() {
        let header_types = json!([
            {"name": "ipv4_t", "id": 0, "fields": [["version", 4, false], ["srcAddr", 32, false]]},
            {"name": "meta_t", "id": 1, "fields": [["pos", 32]]}
        ]);
        let headers = json!([
            {"name": "ipv4", "id": 0, "header_type": "ipv4_t", "metadata": false},
            {"name": "meta", "id": 1, "header_type": "meta_t", "metadata": true}
        ]);

        let layout = HeaderLayout::from_json(Some(&header_types), Some(&headers)).unwrap();
        assert_eq!(layout.field_width("ipv4.srcAddr"), Some(32));
        assert_eq!(layout.field_width("ipv4.version"), Some(4));
        assert_eq!(layout.field_width("meta.pos"), Some(32));
        assert_eq!(layout.field_width("ipv4.dstAddr"), None);
        assert_eq!(layout.mask_for("ipv4.version"), 0xF);
        assert_eq!(layout.mask_for("undeclared.x"), u64::MAX);
    }

    #[test]
    fn test_unknown_header_type_fails() {
        let headers = json!([{"name": "ipv4", "header_type": "missing_t"}]);
        let err = HeaderLayout::from_json(None, Some(&headers)).unwrap_err();
        assert!(matches!(err, LoadError::UnknownHeaderType { .. }));
    }

    #[test]
    fn test_packet_fields() {
        let mut pkt = Packet::new(3).with_field("ipv4.srcAddr", 0xc0a8_0702);
        assert!(pkt.is_valid("ipv4"));
        assert!(!pkt.is_valid("tcp"));
        assert_eq!(pkt.field("ipv4.srcAddr"), 0xc0a8_0702);
        assert_eq!(pkt.field("meta.pos"), 0);

        pkt.set_field("meta.pos", 7);
        pkt.mark_to_drop();
        assert_eq!(pkt.field("meta.pos"), 7);
        assert!(pkt.is_dropped());
        assert_eq!(pkt.ingress_port(), 3);
    }

    #[test]
    fn test_width_mask() {
        assert_eq!(width_mask(1), 1);
        assert_eq!(width_mask(32), 0xFFFF_FFFF);
        assert_eq!(width_mask(64), u64::MAX);
    }
}
