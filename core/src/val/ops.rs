//! Operator dispatch for `Val`.
//!
//! Promotion rules: integral operands compute in `i64` and the result is
//! reduced to the narrowest exact integral variant; any `Double` operand
//! forces a `Double` result. Division of two integral operands goes
//! through `f64` and is reduced back when it divides evenly.

use std::fmt::Display;
use std::ops::{Add, Div, Mul, Rem, Sub};
use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::collection::Collection;

use super::Val;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
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

impl Display for BinOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BinOp::Add => "addition",
            BinOp::Sub => "subtraction",
            BinOp::Mul => "multiplication",
            BinOp::Div => "division",
            BinOp::Rem => "remainder",
            BinOp::BitAnd => "bitwise and",
            BinOp::BitOr => "bitwise or",
            BinOp::Shl => "left shift",
            BinOp::Shr => "right shift",
            BinOp::Eq => "equality",
            BinOp::Ne => "equality",
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => "comparison",
            BinOp::And => "logical and",
            BinOp::Or => "logical or",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Numeric negation.
    Neg,
    /// Logical not on booleans, bitwise complement on integrals.
    Not,
}

impl Display for UnaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnaryOp::Neg => write!(f, "negation"),
            UnaryOp::Not => write!(f, "bitwise not"),
        }
    }
}

pub(crate) fn err_op<T: Display, R>(op: T) -> Result<R> {
    Err(anyhow!("Invalid values for {op}"))
}

/// Narrow an `i64` to `Int` when it fits.
#[inline]
pub(crate) fn reduce_i64(v: i64) -> Val {
    if let Ok(narrow) = i32::try_from(v) {
        Val::Int(narrow)
    } else {
        Val::Long(v)
    }
}

/// Narrow an integral-valued `f64` to the narrowest integral variant.
#[inline]
pub(crate) fn reduce_f64(v: f64) -> Val {
    if v.fract() == 0.0 && v >= i64::MIN as f64 && v <= i64::MAX as f64 {
        reduce_i64(v as i64)
    } else {
        Val::Double(v)
    }
}

pub fn binary(op: BinOp, l: &Val, r: &Val) -> Result<Val> {
    match op {
        BinOp::Add => l + r,
        BinOp::Sub => l - r,
        BinOp::Mul => l * r,
        BinOp::Div => l / r,
        BinOp::Rem => l % r,
        BinOp::BitAnd => bit_op(op, l, r, |a, b| a & b),
        BinOp::BitOr => bit_op(op, l, r, |a, b| a | b),
        BinOp::Shl => shift_op(op, l, r, |a, b| a.wrapping_shl(b)),
        BinOp::Shr => shift_op(op, l, r, |a, b| a.wrapping_shr(b)),
        BinOp::Eq => Ok(Val::Bool(l == r)),
        BinOp::Ne => Ok(Val::Bool(l != r)),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ord = match l.partial_cmp(r) {
                Some(ord) => ord,
                None => return err_op(op),
            };
            let out = match op {
                BinOp::Lt => ord.is_lt(),
                BinOp::Le => ord.is_le(),
                BinOp::Gt => ord.is_gt(),
                _ => ord.is_ge(),
            };
            Ok(Val::Bool(out))
        }
        BinOp::And => match (l, r) {
            (Val::Bool(a), Val::Bool(b)) => Ok(Val::Bool(*a && *b)),
            _ => err_op(op),
        },
        BinOp::Or => match (l, r) {
            (Val::Bool(a), Val::Bool(b)) => Ok(Val::Bool(*a || *b)),
            _ => err_op(op),
        },
    }
}

pub fn unary(op: UnaryOp, v: &Val) -> Result<Val> {
    match (op, v) {
        (UnaryOp::Neg, Val::Int(a)) => Ok(reduce_i64(-(*a as i64))),
        (UnaryOp::Neg, Val::Long(a)) => Ok(reduce_i64(a.wrapping_neg())),
        (UnaryOp::Neg, Val::Double(a)) => Ok(Val::Double(-a)),
        (UnaryOp::Not, Val::Bool(b)) => Ok(Val::Bool(!b)),
        (UnaryOp::Not, Val::Int(a)) => Ok(Val::Int(!a)),
        (UnaryOp::Not, Val::Long(a)) => Ok(reduce_i64(!a)),
        _ => err_op(op),
    }
}

fn bit_op(op: BinOp, l: &Val, r: &Val, f: impl Fn(i64, i64) -> i64) -> Result<Val> {
    match (l.as_i64(), r.as_i64()) {
        (Some(a), Some(b)) => Ok(reduce_i64(f(a, b))),
        _ => err_op(op),
    }
}

fn shift_op(op: BinOp, l: &Val, r: &Val, f: impl Fn(i64, u32) -> i64) -> Result<Val> {
    match (l.as_i64(), r.as_i64()) {
        (Some(a), Some(b)) if (0..64).contains(&b) => Ok(reduce_i64(f(a, b as u32))),
        _ => err_op(op),
    }
}

fn concat(a: &str, b: &str) -> Val {
    let mut out = String::with_capacity(a.len() + b.len());
    out.push_str(a);
    out.push_str(b);
    Val::Str(Arc::from(out.as_str()))
}

/// Textual form used by string concatenation.
fn coerce_str(v: &Val) -> Option<String> {
    match v {
        Val::Str(s) => Some(s.as_ref().to_string()),
        Val::Int(i) => {
            let mut buf = itoa::Buffer::new();
            Some(buf.format(*i).to_string())
        }
        Val::Long(i) => {
            let mut buf = itoa::Buffer::new();
            Some(buf.format(*i).to_string())
        }
        Val::Double(d) => {
            let mut buf = ryu::Buffer::new();
            Some(buf.format(*d).to_string())
        }
        Val::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

impl Add for &Val {
    type Output = Result<Val>;

    fn add(self, other: Self) -> Self::Output {
        match (self, other) {
            // Anything + non-map collection prepends the left operand
            // into a new sequential collection.
            (l, Val::Collection(c)) if !c.is_map() => {
                let merged = Collection::sequential();
                merged.push_value(l.clone())?;
                for (_, value) in c.snapshot() {
                    merged.push_value(value)?;
                }
                Ok(Val::Collection(merged))
            }
            (Val::Int(a), Val::Int(b)) => Ok(reduce_i64(*a as i64 + *b as i64)),
            (a, b) if a.is_numeric() && b.is_numeric() => match (a.as_i64(), b.as_i64()) {
                (Some(x), Some(y)) => Ok(reduce_i64(x.wrapping_add(y))),
                _ => Ok(Val::Double(a.as_f64().unwrap() + b.as_f64().unwrap())),
            },
            (Val::Str(a), b) => match coerce_str(b) {
                Some(s) => Ok(concat(a.as_ref(), &s)),
                None => err_op(BinOp::Add),
            },
            (a, Val::Str(b)) => match coerce_str(a) {
                Some(s) => Ok(concat(&s, b.as_ref())),
                None => err_op(BinOp::Add),
            },
            _ => err_op(BinOp::Add),
        }
    }
}

impl Sub for &Val {
    type Output = Result<Val>;

    fn sub(self, other: Self) -> Self::Output {
        match (self, other) {
            (a, b) if a.is_numeric() && b.is_numeric() => match (a.as_i64(), b.as_i64()) {
                (Some(x), Some(y)) => Ok(reduce_i64(x.wrapping_sub(y))),
                _ => Ok(Val::Double(a.as_f64().unwrap() - b.as_f64().unwrap())),
            },
            _ => err_op(BinOp::Sub),
        }
    }
}

impl Mul for &Val {
    type Output = Result<Val>;

    fn mul(self, other: Self) -> Self::Output {
        match (self, other) {
            (a, b) if a.is_numeric() && b.is_numeric() => match (a.as_i64(), b.as_i64()) {
                (Some(x), Some(y)) => Ok(reduce_i64(x.wrapping_mul(y))),
                _ => Ok(Val::Double(a.as_f64().unwrap() * b.as_f64().unwrap())),
            },
            _ => err_op(BinOp::Mul),
        }
    }
}

impl Div for &Val {
    type Output = Result<Val>;

    fn div(self, other: Self) -> Self::Output {
        match (self, other) {
            (a, b) if a.is_numeric() && b.is_numeric() => match (a.as_i64(), b.as_i64()) {
                // Integral division goes through f64 and reduces back
                // when the fraction is zero.
                (Some(x), Some(y)) => Ok(reduce_f64(x as f64 / y as f64)),
                _ => Ok(Val::Double(a.as_f64().unwrap() / b.as_f64().unwrap())),
            },
            _ => err_op(BinOp::Div),
        }
    }
}

impl Rem for &Val {
    type Output = Result<Val>;

    fn rem(self, other: Self) -> Self::Output {
        match (self, other) {
            (a, b) if a.is_numeric() && b.is_numeric() => match (a.as_i64(), b.as_i64()) {
                (Some(_), Some(0)) => Err(anyhow!("Division by zero")),
                (Some(x), Some(y)) => Ok(reduce_i64(x.wrapping_rem(y))),
                _ => Ok(Val::Double(a.as_f64().unwrap() % b.as_f64().unwrap())),
            },
            _ => err_op(BinOp::Rem),
        }
    }
}
