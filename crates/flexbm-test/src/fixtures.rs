//! Configuration document fixtures
//!
//! Builders for the JSON documents a switch loads, plus the two canned
//! programs the integration tests share: a small forwarding program and a
//! bloom filter that records the source addresses it has seen.

use serde_json::{json, Value};

/// Top-level configuration document under construction
#[derive(Debug, Clone)]
pub struct ConfigDoc {
    root: serde_json::Map<String, Value>,
}

impl Default for ConfigDoc {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigDoc {
    pub fn new() -> Self {
        let mut root = serde_json::Map::new();
        for key in [
            "header_types",
            "headers",
            "register_arrays",
            "calculations",
            "actions",
            "pipelines",
        ] {
            root.insert(key.to_string(), Value::Array(Vec::new()));
        }
        Self { root }
    }

    fn push(mut self, section: &str, entry: Value) -> Self {
        if let Some(Value::Array(items)) = self.root.get_mut(section) {
            items.push(entry);
        }
        self
    }

    /// Declare a header type with `(field, bitwidth)` pairs
    pub fn header_type(self, name: &str, fields: &[(&str, u32)]) -> Self {
        let fields: Vec<Value> = fields
            .iter()
            .map(|(field, width)| json!([field, width, false]))
            .collect();
        self.push("header_types", json!({"name": name, "fields": fields}))
    }

    pub fn header(self, name: &str, id: i32, header_type: &str) -> Self {
        self.push(
            "headers",
            json!({"name": name, "id": id, "header_type": header_type}),
        )
    }

    pub fn register_array(self, name: &str, id: i32, size: usize, bitwidth: u32) -> Self {
        self.push(
            "register_arrays",
            json!({"name": name, "id": id, "size": size, "bitwidth": bitwidth}),
        )
    }

    /// Calculation hashing a single `header.field`
    pub fn calculation(self, name: &str, id: i32, algo: &str, field: (&str, &str)) -> Self {
        self.push(
            "calculations",
            json!({
                "name": name, "id": id, "algo": algo,
                "input": [{"type": "field", "value": [field.0, field.1]}]
            }),
        )
    }

    pub fn action(self, name: &str, id: i32, primitives: Vec<Value>) -> Self {
        self.action_with_params(name, id, &[], primitives)
    }

    /// Action taking runtime parameters as `(name, bitwidth)` pairs
    pub fn action_with_params(
        self,
        name: &str,
        id: i32,
        params: &[(&str, u32)],
        primitives: Vec<Value>,
    ) -> Self {
        let runtime_data: Vec<Value> = params
            .iter()
            .map(|(p, width)| json!({"name": p, "bitwidth": width}))
            .collect();
        self.push(
            "actions",
            json!({
                "name": name, "id": id,
                "runtime_data": runtime_data,
                "primitives": primitives
            }),
        )
    }

    pub fn pipeline(self, pipeline: PipelineDoc) -> Self {
        self.push("pipelines", pipeline.into_value())
    }

    /// Set an arbitrary top-level key
    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.root.insert(key.to_string(), value);
        self
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.root)
    }
}

/// One pipeline of a configuration document
#[derive(Debug, Clone)]
pub struct PipelineDoc {
    name: String,
    id: i32,
    init_table: Option<String>,
    tables: Vec<Value>,
    conditionals: Vec<Value>,
}

impl PipelineDoc {
    pub fn new(name: &str, id: i32) -> Self {
        Self {
            name: name.to_string(),
            id,
            init_table: None,
            tables: Vec::new(),
            conditionals: Vec::new(),
        }
    }

    pub fn init(mut self, node: &str) -> Self {
        self.init_table = Some(node.to_string());
        self
    }

    pub fn table(mut self, table: Value) -> Self {
        self.tables.push(table);
        self
    }

    pub fn conditional(mut self, conditional: Value) -> Self {
        self.conditionals.push(conditional);
        self
    }

    pub fn into_value(self) -> Value {
        json!({
            "name": self.name,
            "id": self.id,
            "init_table": self.init_table,
            "tables": self.tables,
            "conditionals": self.conditionals
        })
    }
}

/// Conditional node entry
pub fn conditional(
    name: &str,
    id: i32,
    expression: Value,
    true_next: Option<&str>,
    false_next: Option<&str>,
) -> Value {
    json!({
        "name": name,
        "id": id,
        "expression": expression,
        "true_next": true_next,
        "false_next": false_next
    })
}

/// Table entry. `actions` are `(name, id)` pairs; `next` maps action names
/// (or `__HIT__`/`__MISS__`) to next nodes.
pub fn table(
    name: &str,
    id: i32,
    key: &[(&str, &str)],
    actions: &[(&str, i32)],
    next: &[(&str, Option<&str>)],
    base_default_next: Option<&str>,
    default_action: Option<i32>,
) -> Value {
    let key: Vec<Value> = key
        .iter()
        .map(|(h, f)| json!({"match_type": "exact", "target": [h, f]}))
        .collect();
    let next_tables: serde_json::Map<String, Value> = next
        .iter()
        .map(|(k, v)| (k.to_string(), json!(v)))
        .collect();
    let mut table = json!({
        "name": name,
        "id": id,
        "match_type": "exact",
        "key": key,
        "action_ids": actions.iter().map(|(_, id)| *id).collect::<Vec<_>>(),
        "actions": actions.iter().map(|(n, _)| *n).collect::<Vec<_>>(),
        "base_default_next": base_default_next,
        "next_tables": next_tables
    });
    if let Some(action_id) = default_action {
        table["default_entry"] = json!({
            "action_id": action_id,
            "action_const": false,
            "action_data": [],
            "action_entry_const": false
        });
    }
    table
}

pub fn field(header: &str, name: &str) -> Value {
    json!({"type": "field", "value": [header, name]})
}

pub fn hexstr(value: u64) -> Value {
    json!({"type": "hexstr", "value": format!("0x{value:x}")})
}

pub fn runtime_data(index: usize) -> Value {
    json!({"type": "runtime_data", "value": index})
}

pub fn expression(op: &str, left: Value, right: Value) -> Value {
    json!({"type": "expression", "value": {"op": op, "left": left, "right": right}})
}

/// `valid(header)` condition
pub fn valid(header: &str) -> Value {
    expression(
        "valid",
        Value::Null,
        json!({"type": "header", "value": header}),
    )
}

/// `header.field == value` condition
pub fn field_equals(header: &str, name: &str, value: u64) -> Value {
    expression("==", field(header, name), hexstr(value))
}

pub fn primitive(op: &str, parameters: Vec<Value>) -> Value {
    json!({"op": op, "parameters": parameters})
}

pub fn register_ref(name: &str) -> Value {
    json!({"type": "register_array", "value": name})
}

pub fn calculation_ref(name: &str) -> Value {
    json!({"type": "calculation", "value": name})
}

/// Names used by [`forwarding_program`].
pub mod forwarding {
    pub const INGRESS: &str = "ingress";
    pub const EGRESS: &str = "egress";
    pub const IPV4_LPM: &str = "MyIngress.ipv4_lpm";
    pub const MARK_TOS: &str = "MyIngress.mark_tos";
    pub const EGRESS_NOOP: &str = "MyEgress.noop";
    pub const FORWARD: &str = "MyIngress.forward";
    pub const DROP: &str = "MyIngress.drop";
    pub const SET_TOS: &str = "MyIngress.set_tos";
    pub const FLOW_COUNTER: &str = "flow_counter";
    /// Diffserv value written by `MyIngress.set_tos`
    pub const TOS: u64 = 0x10;
    pub const TCP: u64 = 0x06;
    pub const UDP: u64 = 0x11;
}

/// Small forwarding program.
///
/// Ingress: `node_2` checks `valid(ipv4)` and leads to `ipv4_lpm`, which
/// forwards on an exact `dstAddr` hit and drops on a miss. `node_3` sends
/// TCP to `mark_tos`, everything else to `node_4`. `node_4` checks for UDP
/// but leads nowhere on either branch. Egress holds a single no-op table.
///
/// Three conditionals (ids 0..=2), three tables (ids 0..=2) across two
/// pipelines, four actions and one register array.
pub fn forwarding_program() -> Value {
    use forwarding::*;

    ConfigDoc::new()
        .header_type(
            "ipv4_t",
            &[
                ("srcAddr", 32),
                ("dstAddr", 32),
                ("protocol", 8),
                ("diffserv", 8),
            ],
        )
        .header_type("meta_t", &[("egress_spec", 9)])
        .header("ipv4", 0, "ipv4_t")
        .header("meta", 1, "meta_t")
        .register_array(FLOW_COUNTER, 0, 16, 32)
        .action("NoAction", 0, vec![])
        .action(DROP, 1, vec![primitive("mark_to_drop", vec![])])
        .action_with_params(
            FORWARD,
            2,
            &[("port", 9)],
            vec![primitive(
                "assign",
                vec![field("meta", "egress_spec"), runtime_data(0)],
            )],
        )
        .action(
            SET_TOS,
            3,
            vec![primitive(
                "assign",
                vec![field("ipv4", "diffserv"), hexstr(TOS)],
            )],
        )
        .pipeline(
            PipelineDoc::new(INGRESS, 0)
                .init("node_2")
                .table(table(
                    IPV4_LPM,
                    0,
                    &[("ipv4", "dstAddr")],
                    &[(FORWARD, 2), (DROP, 1), ("NoAction", 0)],
                    &[
                        (FORWARD, Some("node_3")),
                        (DROP, None),
                        ("NoAction", Some("node_3")),
                    ],
                    Some("node_3"),
                    Some(1),
                ))
                .table(table(
                    MARK_TOS,
                    1,
                    &[],
                    &[(SET_TOS, 3)],
                    &[(SET_TOS, None)],
                    None,
                    Some(3),
                ))
                .conditional(conditional(
                    "node_2",
                    0,
                    valid("ipv4"),
                    Some(IPV4_LPM),
                    None,
                ))
                .conditional(conditional(
                    "node_3",
                    1,
                    field_equals("ipv4", "protocol", TCP),
                    Some(MARK_TOS),
                    Some("node_4"),
                ))
                .conditional(conditional(
                    "node_4",
                    2,
                    field_equals("ipv4", "protocol", UDP),
                    None,
                    None,
                )),
        )
        .pipeline(
            PipelineDoc::new(EGRESS, 1).init(EGRESS_NOOP).table(table(
                EGRESS_NOOP,
                2,
                &[],
                &[("NoAction", 0)],
                &[("NoAction", None)],
                None,
                Some(0),
            )),
        )
        .with(
            "parsers",
            json!([{"name": "parser", "id": 0, "init_state": "start", "parse_states": []}]),
        )
        .with("deparsers", json!([{"name": "deparser", "id": 0, "order": ["ipv4"]}]))
        .into_value()
}

/// Names used by [`bloom_filter_program`].
pub mod bloom {
    pub const BLOOM_FILTER: &str = "defence_bloom_filter_for_ip_src";
    pub const RECORDING: &str = "ip_src_recording";
    pub const LAST_POS: &str = "ip_src_recording_last_pos";
    pub const COUNTING: &str = "ip_src_counting";
    pub const LAST_UPDATE: &str = "last_update_time_for_defence_bloom_filter";
    pub const TRACK: &str = "MyIngress.track_ip_src";
    pub const TRACK_TABLE: &str = "MyIngress.track";
    pub const RECORDING_SIZE: usize = 256;
    pub const COUNTING_SIZE: usize = 32;
    pub const COUNTING_HASH: &str = "crc32";
    pub const TARGET_HASHES: [&str; 3] = ["crc16", "identity", "csum16"];
}

/// Bloom filter over `ipv4.srcAddr` with a `bloom_size`-cell filter.
///
/// Every packet appends its source address to the recording log, bumps the
/// log cursor, increments its counting slot (`crc32`), sets three filter
/// bits (`crc16`, `identity`, `csum16`) and stamps the last-update register.
pub fn bloom_filter_program(bloom_size: usize) -> Value {
    use bloom::*;

    let mut track = vec![
        primitive(
            "register_read",
            vec![field("meta", "pos"), register_ref(LAST_POS), hexstr(0)],
        ),
        primitive(
            "register_write",
            vec![
                register_ref(RECORDING),
                field("meta", "pos"),
                field("ipv4", "srcAddr"),
            ],
        ),
        primitive("add_to_field", vec![field("meta", "pos"), hexstr(1)]),
        primitive(
            "register_write",
            vec![register_ref(LAST_POS), hexstr(0), field("meta", "pos")],
        ),
        primitive(
            "modify_field_with_hash_based_offset",
            vec![
                field("meta", "cidx"),
                hexstr(0),
                calculation_ref("counting_hash"),
                hexstr(COUNTING_SIZE as u64),
            ],
        ),
        primitive(
            "register_read",
            vec![
                field("meta", "cnt"),
                register_ref(COUNTING),
                field("meta", "cidx"),
            ],
        ),
        primitive("add_to_field", vec![field("meta", "cnt"), hexstr(1)]),
        primitive(
            "register_write",
            vec![
                register_ref(COUNTING),
                field("meta", "cidx"),
                field("meta", "cnt"),
            ],
        ),
    ];
    for k in 0..TARGET_HASHES.len() {
        track.push(primitive(
            "modify_field_with_hash_based_offset",
            vec![
                field("meta", "bit"),
                hexstr(0),
                calculation_ref(&format!("bloom_hash_{k}")),
                hexstr(bloom_size as u64),
            ],
        ));
        track.push(primitive(
            "register_write",
            vec![register_ref(BLOOM_FILTER), field("meta", "bit"), hexstr(1)],
        ));
    }
    track.push(primitive(
        "register_write",
        vec![register_ref(LAST_UPDATE), hexstr(0), field("ipv4", "srcAddr")],
    ));

    let mut doc = ConfigDoc::new()
        .header_type("ipv4_t", &[("srcAddr", 32), ("dstAddr", 32)])
        .header_type("meta_t", &[("pos", 32), ("cidx", 32), ("cnt", 32), ("bit", 32)])
        .header("ipv4", 0, "ipv4_t")
        .header("meta", 1, "meta_t")
        .register_array(BLOOM_FILTER, 0, bloom_size, 1)
        .register_array(RECORDING, 1, RECORDING_SIZE, 32)
        .register_array(LAST_POS, 2, 1, 32)
        .register_array(COUNTING, 3, COUNTING_SIZE, 32)
        .register_array(LAST_UPDATE, 4, 1, 48)
        .calculation("counting_hash", 0, COUNTING_HASH, ("ipv4", "srcAddr"));
    for (k, algo) in TARGET_HASHES.iter().enumerate() {
        doc = doc.calculation(
            &format!("bloom_hash_{k}"),
            k as i32 + 1,
            algo,
            ("ipv4", "srcAddr"),
        );
    }

    doc.action("NoAction", 0, vec![])
        .action(TRACK, 1, track)
        .pipeline(
            PipelineDoc::new("ingress", 0).init(TRACK_TABLE).table(table(
                TRACK_TABLE,
                0,
                &[],
                &[(TRACK, 1), ("NoAction", 0)],
                &[(TRACK, None), ("NoAction", None)],
                None,
                Some(1),
            )),
        )
        .into_value()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_doc_sections() {
        let doc = ConfigDoc::new()
            .register_array("r", 0, 8, 16)
            .with("meta", json!({"version": [2, 23]}))
            .into_value();
        assert_eq!(doc["register_arrays"][0]["size"], json!(8));
        assert_eq!(doc["pipelines"], json!([]));
        assert_eq!(doc["meta"]["version"], json!([2, 23]));
    }

    #[test]
    fn test_table_default_entry() {
        let t = table("t", 4, &[], &[("a", 1)], &[("a", None)], None, Some(1));
        assert_eq!(t["default_entry"]["action_id"], json!(1));
        assert_eq!(t["next_tables"]["a"], Value::Null);

        let t = table("t", 4, &[], &[("a", 1)], &[], None, None);
        assert!(t.get("default_entry").is_none());
    }

    #[test]
    fn test_forwarding_program_shape() {
        let doc = forwarding_program();
        assert_eq!(doc["pipelines"].as_array().map(Vec::len), Some(2));
        assert_eq!(
            doc["pipelines"][0]["conditionals"].as_array().map(Vec::len),
            Some(3)
        );
    }

    #[test]
    fn test_bloom_filter_program_sizes() {
        let doc = bloom_filter_program(64);
        assert_eq!(doc["register_arrays"][0]["name"], json!(bloom::BLOOM_FILTER));
        assert_eq!(doc["register_arrays"][0]["size"], json!(64));
        assert_eq!(doc["calculations"].as_array().map(Vec::len), Some(4));
    }
}
