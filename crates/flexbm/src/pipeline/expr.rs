//! Expressions evaluated by conditionals and action primitives.
//!
//! All values are `u64`; booleans are 0 or 1. Arithmetic wraps. Results
//! are truncated to field width only when written into a field.

use super::PipelineError;
use crate::error::LoadError;
use crate::packet::Packet;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    BitNot,
    Valid,
    /// `d2b` / `b2d` conversions, value-preserving here.
    Convert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    fn from_op(op: &str) -> Option<Self> {
        Some(match op {
            "+" => Self::Add,
            "-" => Self::Sub,
            "*" => Self::Mul,
            "%" => Self::Mod,
            "&" => Self::BitAnd,
            "|" => Self::BitOr,
            "^" => Self::BitXor,
            "<<" => Self::Shl,
            ">>" => Self::Shr,
            "==" => Self::Eq,
            "!=" => Self::Ne,
            "<" => Self::Lt,
            "<=" => Self::Le,
            ">" => Self::Gt,
            ">=" => Self::Ge,
            "and" => Self::And,
            "or" => Self::Or,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    /// Qualified field name, `header.field`.
    Field(String),
    Const(u64),
    RuntimeData(usize),
    Header(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

/// Inputs an expression reads from.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    pub packet: &'a Packet,
    pub action_data: &'a [u64],
}

impl Expr {
    pub fn always_true() -> Self {
        Expr::Const(1)
    }

    /// Parses a typed JSON operand such as
    /// `{"type": "field", "value": ["ipv4", "srcAddr"]}`.
    pub fn from_json(value: &Value) -> Result<Self, LoadError> {
        let kind = value.get("type").and_then(Value::as_str);
        let inner = value.get("value").unwrap_or(&Value::Null);

        match kind {
            Some("field") => field_name(inner).map(Expr::Field),
            Some("hexstr") => inner
                .as_str()
                .and_then(parse_hexstr)
                .map(Expr::Const)
                .ok_or_else(|| LoadError::UnsupportedExpression(format!("bad hexstr {inner}"))),
            Some("bool") => inner
                .as_bool()
                .map(|b| Expr::Const(u64::from(b)))
                .ok_or_else(|| LoadError::UnsupportedExpression(format!("bad bool {inner}"))),
            Some("runtime_data") => inner
                .as_u64()
                .map(|i| Expr::RuntimeData(i as usize))
                .ok_or_else(|| {
                    LoadError::UnsupportedExpression(format!("bad runtime_data {inner}"))
                }),
            Some("header") => inner
                .as_str()
                .map(|h| Expr::Header(h.to_string()))
                .ok_or_else(|| LoadError::UnsupportedExpression(format!("bad header {inner}"))),
            Some("expression") => Self::from_op_json(inner),
            _ => Err(LoadError::UnsupportedExpression(value.to_string())),
        }
    }

    fn from_op_json(value: &Value) -> Result<Self, LoadError> {
        let op = value
            .get("op")
            .and_then(Value::as_str)
            .ok_or_else(|| LoadError::UnsupportedExpression(value.to_string()))?;
        let right = value.get("right").unwrap_or(&Value::Null);
        let left = value.get("left").unwrap_or(&Value::Null);

        let unary = match op {
            "not" => Some(UnaryOp::Not),
            "~" => Some(UnaryOp::BitNot),
            "valid" => Some(UnaryOp::Valid),
            "d2b" | "b2d" => Some(UnaryOp::Convert),
            _ => None,
        };
        if let Some(op) = unary {
            return Ok(Expr::Unary {
                op,
                operand: Box::new(Expr::from_json(right)?),
            });
        }

        let op = BinaryOp::from_op(op)
            .ok_or_else(|| LoadError::UnsupportedExpression(format!("operator '{op}'")))?;
        Ok(Expr::Binary {
            op,
            left: Box::new(Expr::from_json(left)?),
            right: Box::new(Expr::from_json(right)?),
        })
    }

    /// Fields this expression reads, used to validate references at load.
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Field(f) => out.push(f),
            Expr::Unary { operand, .. } => operand.collect_fields(out),
            Expr::Binary { left, right, .. } => {
                left.collect_fields(out);
                right.collect_fields(out);
            }
            Expr::Const(_) | Expr::RuntimeData(_) | Expr::Header(_) => {}
        }
    }

    pub fn eval(&self, ctx: &EvalContext<'_>) -> Result<u64, PipelineError> {
        match self {
            Expr::Field(f) => Ok(ctx.packet.field(f)),
            Expr::Const(v) => Ok(*v),
            Expr::RuntimeData(i) => ctx
                .action_data
                .get(*i)
                .copied()
                .ok_or(PipelineError::MissingActionData { index: *i }),
            Expr::Header(h) => Ok(u64::from(ctx.packet.is_valid(h))),
            Expr::Unary { op, operand } => {
                // Header operands already evaluate to their validity bit
                let v = operand.eval(ctx)?;
                Ok(match op {
                    UnaryOp::Not => u64::from(v == 0),
                    UnaryOp::BitNot => !v,
                    UnaryOp::Valid => u64::from(v != 0),
                    UnaryOp::Convert => v,
                })
            }
            Expr::Binary { op, left, right } => {
                let l = left.eval(ctx)?;
                let r = right.eval(ctx)?;
                Ok(match op {
                    BinaryOp::Add => l.wrapping_add(r),
                    BinaryOp::Sub => l.wrapping_sub(r),
                    BinaryOp::Mul => l.wrapping_mul(r),
                    BinaryOp::Mod => l.checked_rem(r).ok_or(PipelineError::DivisionByZero)?,
                    BinaryOp::BitAnd => l & r,
                    BinaryOp::BitOr => l | r,
                    BinaryOp::BitXor => l ^ r,
                    BinaryOp::Shl => l.checked_shl(shift(r)).unwrap_or(0),
                    BinaryOp::Shr => l.checked_shr(shift(r)).unwrap_or(0),
                    BinaryOp::Eq => u64::from(l == r),
                    BinaryOp::Ne => u64::from(l != r),
                    BinaryOp::Lt => u64::from(l < r),
                    BinaryOp::Le => u64::from(l <= r),
                    BinaryOp::Gt => u64::from(l > r),
                    BinaryOp::Ge => u64::from(l >= r),
                    BinaryOp::And => u64::from(l != 0 && r != 0),
                    BinaryOp::Or => u64::from(l != 0 || r != 0),
                })
            }
        }
    }

    /// Evaluates as a boolean.
    pub fn test(&self, ctx: &EvalContext<'_>) -> Result<bool, PipelineError> {
        Ok(self.eval(ctx)? != 0)
    }
}

fn shift(r: u64) -> u32 {
    u32::try_from(r).unwrap_or(u32::MAX)
}

/// Parses `["ipv4", "srcAddr"]` into `ipv4.srcAddr`.
pub(crate) fn field_name(value: &Value) -> Result<String, LoadError> {
    match value.as_array().map(Vec::as_slice) {
        Some([Value::String(header), Value::String(field)]) => Ok(format!("{header}.{field}")),
        _ => Err(LoadError::UnsupportedExpression(format!(
            "bad field reference {value}"
        ))),
    }
}

/// Parses `0x..` hex strings, also accepting plain decimal.
pub(crate) fn parse_hexstr(s: &str) -> Option<u64> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

pub(crate) fn to_hexstr(v: u64) -> String {
    format!("0x{v:x}")
}
