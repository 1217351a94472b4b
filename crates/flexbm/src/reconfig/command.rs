//! Plan line grammar.
//!
//! A plan is one command per line, tokens separated by whitespace. Token
//! shape (verb, kind, arity, flags, numbers) is checked before reference
//! prefixes, and prefixes before hash function names. Name lookups happen
//! later, in the engine.

use crate::error::{ReconfigError, ReconfigResultT};
use crate::hash::HashAlgorithm;
use crate::pipeline::{Branch, TableEdge};
use crate::register::{MAX_BITWIDTH, MAX_REGISTER_SIZE};
use flexbm_common::ObjectKind;

pub const OLD_PREFIX: &str = "old_";
pub const NEW_PREFIX: &str = "new_";
pub const NULL_TOKEN: &str = "null";

const ACCORDING_TO: &str = "--according-to";
const HASH_FOR_COUNTING: &str = "--hash-function-for-counting";
const HASH_FOR_TARGET: &str = "--hash-function-for-target";
const RESET: &str = "--reset";

/// Reference to an existing object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjRef {
    /// Present before the plan started.
    Old(String),
    /// Inserted earlier in the same plan.
    New(String),
}

impl ObjRef {
    fn parse(token: &str) -> ReconfigResultT<Self> {
        if let Some(name) = token.strip_prefix(OLD_PREFIX) {
            Ok(ObjRef::Old(name.to_string()))
        } else if let Some(name) = token.strip_prefix(NEW_PREFIX) {
            Ok(ObjRef::New(name.to_string()))
        } else {
            Err(ReconfigError::prefix(token, "old_ or new_"))
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ObjRef::Old(name) | ObjRef::New(name) => name,
        }
    }
}

/// Target of an edge; `null` ends the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeRef {
    Null,
    Node(ObjRef),
}

impl EdgeRef {
    fn parse(token: &str) -> ReconfigResultT<Self> {
        if token == NULL_TOKEN {
            return Ok(EdgeRef::Null);
        }
        ObjRef::parse(token).map(EdgeRef::Node)
    }
}

/// Name for a brand-new object; must carry `new_`.
fn new_name(token: &str) -> ReconfigResultT<String> {
    token
        .strip_prefix(NEW_PREFIX)
        .map(str::to_string)
        .ok_or_else(|| ReconfigError::prefix(token, "new_"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RehashCommand {
    pub target: ObjRef,
    pub recording: ObjRef,
    pub last_pos: ObjRef,
    pub counting: ObjRef,
    pub counting_hash: HashAlgorithm,
    pub target_hashes: [HashAlgorithm; 3],
    pub reset: ObjRef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    InsertConditional {
        pipeline: String,
        name: String,
    },
    InsertFlex {
        pipeline: String,
        name: String,
        false_next: EdgeRef,
        true_next: EdgeRef,
    },
    ChangeConditional {
        pipeline: String,
        node: ObjRef,
        branch: Branch,
        target: EdgeRef,
    },
    DeleteConditional {
        pipeline: String,
        node: ObjRef,
    },
    InsertTable {
        pipeline: String,
        name: String,
    },
    ChangeTable {
        pipeline: String,
        node: ObjRef,
        slot: TableEdge,
        target: EdgeRef,
    },
    DeleteTable {
        pipeline: String,
        node: ObjRef,
    },
    InsertRegisterArray {
        name: String,
        size: usize,
        bitwidth: u32,
    },
    ResizeRegisterArray {
        array: ObjRef,
        size: usize,
    },
    RewidenRegisterArray {
        array: ObjRef,
        bitwidth: u32,
    },
    DeleteRegisterArray {
        array: ObjRef,
    },
    Rehash(RehashCommand),
}

impl Command {
    /// Parses one trimmed, non-empty, non-comment plan line.
    pub fn parse(line: &str) -> ReconfigResultT<Self> {
        let t: Vec<&str> = line.split_whitespace().collect();
        let invalid = |reason: &str| ReconfigError::invalid_command(line, reason);

        let (verb, kind) = match t.as_slice() {
            [verb, kind, ..] => (*verb, *kind),
            _ => return Err(invalid("expected a verb and an object kind")),
        };

        match (verb, kind) {
            ("insert", "cond") => {
                arity(&t, 4, line)?;
                Ok(Command::InsertConditional {
                    pipeline: t[2].to_string(),
                    name: new_name(t[3])?,
                })
            }
            ("insert", "flex") => {
                arity(&t, 6, line)?;
                Ok(Command::InsertFlex {
                    pipeline: t[2].to_string(),
                    name: new_name(t[3])?,
                    false_next: EdgeRef::parse(t[4])?,
                    true_next: EdgeRef::parse(t[5])?,
                })
            }
            ("change", "cond" | "flex") => {
                arity(&t, 6, line)?;
                let branch = match t[4] {
                    "true_next" => Branch::True,
                    "false_next" => Branch::False,
                    other => return Err(invalid(&format!("unknown edge '{other}'"))),
                };
                Ok(Command::ChangeConditional {
                    pipeline: t[2].to_string(),
                    node: ObjRef::parse(t[3])?,
                    branch,
                    target: EdgeRef::parse(t[5])?,
                })
            }
            ("delete", "cond" | "flex") => {
                arity(&t, 4, line)?;
                Ok(Command::DeleteConditional {
                    pipeline: t[2].to_string(),
                    node: ObjRef::parse(t[3])?,
                })
            }
            ("insert", "tabl") => {
                arity(&t, 4, line)?;
                Ok(Command::InsertTable {
                    pipeline: t[2].to_string(),
                    name: new_name(t[3])?,
                })
            }
            ("change", "tabl") => {
                arity(&t, 6, line)?;
                Ok(Command::ChangeTable {
                    pipeline: t[2].to_string(),
                    node: ObjRef::parse(t[3])?,
                    slot: TableEdge::parse(t[4]),
                    target: EdgeRef::parse(t[5])?,
                })
            }
            ("delete", "tabl") => {
                arity(&t, 4, line)?;
                Ok(Command::DeleteTable {
                    pipeline: t[2].to_string(),
                    node: ObjRef::parse(t[3])?,
                })
            }
            ("insert", "register_array") => {
                arity(&t, 5, line)?;
                let size = parse_size(t[3], line)?;
                let bitwidth = parse_bitwidth(t[4], line)?;
                Ok(Command::InsertRegisterArray {
                    name: new_name(t[2])?,
                    size,
                    bitwidth,
                })
            }
            ("change", "register_array_size") => {
                arity(&t, 4, line)?;
                let size = parse_size(t[3], line)?;
                Ok(Command::ResizeRegisterArray {
                    array: ObjRef::parse(t[2])?,
                    size,
                })
            }
            ("change", "register_array_bitwidth") => {
                arity(&t, 4, line)?;
                let bitwidth = parse_bitwidth(t[3], line)?;
                Ok(Command::RewidenRegisterArray {
                    array: ObjRef::parse(t[2])?,
                    bitwidth,
                })
            }
            ("delete", "register_array") => {
                arity(&t, 3, line)?;
                Ok(Command::DeleteRegisterArray {
                    array: ObjRef::parse(t[2])?,
                })
            }
            ("rehash", "register_array") => parse_rehash(&t, line).map(Command::Rehash),
            ("rehash", other) => Err(ReconfigError::UnsupportedTarget(other.to_string())),
            _ => Err(invalid("unknown verb or object kind")),
        }
    }

    /// Kind of object the command edits.
    pub fn kind(&self) -> ObjectKind {
        match self {
            Command::InsertConditional { .. }
            | Command::ChangeConditional { .. }
            | Command::DeleteConditional { .. } => ObjectKind::Conditional,
            Command::InsertFlex { .. } => ObjectKind::Flex,
            Command::InsertTable { .. }
            | Command::ChangeTable { .. }
            | Command::DeleteTable { .. } => ObjectKind::Table,
            Command::InsertRegisterArray { .. }
            | Command::ResizeRegisterArray { .. }
            | Command::RewidenRegisterArray { .. }
            | Command::DeleteRegisterArray { .. }
            | Command::Rehash(_) => ObjectKind::RegisterArray,
        }
    }
}

fn parse_rehash(t: &[&str], line: &str) -> ReconfigResultT<RehashCommand> {
    arity(t, 15, line)?;
    for (pos, flag) in [
        (3, ACCORDING_TO),
        (7, HASH_FOR_COUNTING),
        (9, HASH_FOR_TARGET),
        (13, RESET),
    ] {
        if t[pos] != flag {
            return Err(ReconfigError::invalid_command(
                line,
                format!("expected '{flag}' at position {pos}, found '{}'", t[pos]),
            ));
        }
    }

    let target = ObjRef::parse(t[2])?;
    let recording = ObjRef::parse(t[4])?;
    let last_pos = ObjRef::parse(t[5])?;
    let counting = ObjRef::parse(t[6])?;
    let reset = ObjRef::parse(t[14])?;

    Ok(RehashCommand {
        target,
        recording,
        last_pos,
        counting,
        counting_hash: hash_name(t[8])?,
        target_hashes: [hash_name(t[10])?, hash_name(t[11])?, hash_name(t[12])?],
        reset,
    })
}

fn arity(t: &[&str], expected: usize, line: &str) -> ReconfigResultT<()> {
    if t.len() != expected {
        return Err(ReconfigError::invalid_command(
            line,
            format!("expected {expected} tokens, found {}", t.len()),
        ));
    }
    Ok(())
}

fn parse_size(token: &str, line: &str) -> ReconfigResultT<usize> {
    match token.parse::<usize>() {
        Ok(size) if (1..=MAX_REGISTER_SIZE).contains(&size) => Ok(size),
        _ => Err(ReconfigError::invalid_command(
            line,
            format!("size '{token}' outside 1..={MAX_REGISTER_SIZE}"),
        )),
    }
}

fn parse_bitwidth(token: &str, line: &str) -> ReconfigResultT<u32> {
    match token.parse::<u32>() {
        Ok(width) if (1..=MAX_BITWIDTH).contains(&width) => Ok(width),
        _ => Err(ReconfigError::invalid_command(
            line,
            format!("bitwidth '{token}' outside 1..={MAX_BITWIDTH}"),
        )),
    }
}

fn hash_name(token: &str) -> ReconfigResultT<HashAlgorithm> {
    token
        .parse()
        .map_err(|_| ReconfigError::InvalidHashFunction(token.to_string()))
}
