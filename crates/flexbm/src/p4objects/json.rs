//! Wire form of configuration document entries.
//!
//! Each entry keeps the keys the runtime does not model in a flattened
//! `extra` map, so a document survives a load and re-emit unchanged apart
//! from the edits a plan made.

use flexbm_common::{ObjectId, SourceInfo};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct CfgRegisterArray {
    pub name: String,
    pub id: ObjectId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_info: Option<SourceInfo>,
    pub size: usize,
    pub bitwidth: u32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct CfgCalculation {
    pub name: String,
    pub id: ObjectId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_info: Option<SourceInfo>,
    #[serde(default)]
    pub input: Vec<Value>,
    pub algo: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct CfgRuntimeParam {
    pub name: String,
    pub bitwidth: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct CfgAction {
    pub name: String,
    pub id: ObjectId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_info: Option<SourceInfo>,
    #[serde(default)]
    pub runtime_data: Vec<CfgRuntimeParam>,
    #[serde(default)]
    pub primitives: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct CfgDefaultEntry {
    pub action_id: ObjectId,
    #[serde(default)]
    pub action_data: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct CfgTable {
    pub name: String,
    pub id: ObjectId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_info: Option<SourceInfo>,
    #[serde(default)]
    pub key: Vec<Value>,
    #[serde(default = "default_match_type")]
    pub match_type: String,
    #[serde(default)]
    pub action_ids: Vec<ObjectId>,
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub base_default_next: Option<String>,
    #[serde(default)]
    pub next_tables: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_entry: Option<CfgDefaultEntry>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct CfgConditional {
    pub name: String,
    pub id: ObjectId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_info: Option<SourceInfo>,
    #[serde(default)]
    pub expression: Option<Value>,
    #[serde(default)]
    pub true_next: Option<String>,
    #[serde(default)]
    pub false_next: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub flex: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct CfgPipeline {
    pub name: String,
    pub id: ObjectId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_info: Option<SourceInfo>,
    #[serde(default)]
    pub init_table: Option<String>,
    #[serde(default)]
    pub tables: Vec<CfgTable>,
    #[serde(default)]
    pub conditionals: Vec<CfgConditional>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_match_type() -> String {
    "exact".to_string()
}

fn is_false(b: &bool) -> bool {
    !*b
}
