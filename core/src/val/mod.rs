//! Polymorphic runtime value model.
//!
//! `Val` is a closed sum type; every operator dispatches over an
//! exhaustive match so that unsupported combinations fail with a fixed
//! message instead of silently coercing.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

use crate::collection::{Collection, Key};
use crate::group::{ActionValue, Group};
use crate::ptr::{Pointer, PointerRef};

mod ops;
mod provider;

pub use ops::{binary, unary, BinOp, UnaryOp};
pub use provider::{DefaultValueProvider, ValueProvider};


/// A runtime value. Cheap to clone; compound variants share their
/// contents through `Arc`.
#[derive(Debug, Default, Clone)]
pub enum Val {
    #[default]
    Null,
    Int(i32),
    Long(i64),
    Double(f64),
    Str(Arc<str>),
    Bool(bool),
    Collection(Arc<Collection>),
    Action(Arc<ActionValue>),
    Group(Arc<Group>),
}

impl Val {
    #[inline]
    pub fn type_name(&self) -> &'static str {
        match self {
            Val::Null => "Null",
            Val::Int(_) => "Int",
            Val::Long(_) => "Long",
            Val::Double(_) => "Double",
            Val::Str(_) => "String",
            Val::Bool(_) => "Bool",
            Val::Collection(_) => "Collection",
            Val::Action(_) => "Action",
            Val::Group(_) => "Group",
        }
    }

    #[inline]
    pub fn is_numeric(&self) -> bool {
        matches!(self, Val::Int(_) | Val::Long(_) | Val::Double(_))
    }

    /// Numeric view used by cross-type comparison and promotion.
    #[inline]
    pub(crate) fn as_f64(&self) -> Option<f64> {
        match self {
            Val::Int(v) => Some(*v as f64),
            Val::Long(v) => Some(*v as f64),
            Val::Double(v) => Some(*v),
            _ => None,
        }
    }

    #[inline]
    pub(crate) fn as_i64(&self) -> Option<i64> {
        match self {
            Val::Int(v) => Some(*v as i64),
            Val::Long(v) => Some(*v),
            _ => None,
        }
    }

    /// Boolean test backing conditional jumps and the logical operators.
    /// Only booleans are truthy-testable.
    #[inline]
    pub fn truthy(&self) -> Result<bool> {
        match self {
            Val::Bool(b) => Ok(*b),
            _ => Err(anyhow!("Invalid value for condition")),
        }
    }

    /// Keyed access. Supported by collections (entry pointers), groups
    /// (name-indexed slot lookup) and strings (character indexing).
    pub fn get_key(&self, key: &Val, create: bool) -> Result<PointerRef> {
        match self {
            Val::Collection(c) => c.get(key, create),
            Val::Group(g) => {
                let name = match key {
                    Val::Str(s) => s.clone(),
                    other => return Err(anyhow!("Unknown group member: {other}")),
                };
                g.slot_by_name(&name)
            }
            Val::Str(s) => match Key::from_val(key)? {
                Key::Int(i) if i >= 0 => string_char(s, i as usize),
                _ => Err(anyhow!("Index out of range")),
            },
            _ => Err(anyhow!("Value is not keyed")),
        }
    }

    /// Positional access. Supported by collections and strings.
    pub fn get_at(&self, index: usize) -> Result<PointerRef> {
        match self {
            Val::Collection(c) => c.get_at(index),
            Val::Str(s) => string_char(s, index),
            _ => Err(anyhow!("Value is not indexed")),
        }
    }

    /// Entry count for collections, character count for strings.
    pub fn size(&self) -> Result<usize> {
        match self {
            Val::Collection(c) => Ok(c.len()),
            Val::Str(s) => Ok(s.chars().count()),
            _ => Err(anyhow!("Value has no size")),
        }
    }
}

fn string_char(s: &Arc<str>, index: usize) -> Result<PointerRef> {
    let ch = s
        .chars()
        .nth(index)
        .ok_or_else(|| anyhow!("Index out of range"))?;
    Ok(Pointer::plain(Val::Str(Arc::from(ch.to_string().as_str()))))
}

impl PartialEq for Val {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Val::Null, Val::Null) => true,
            (Val::Bool(a), Val::Bool(b)) => a == b,
            (Val::Str(a), Val::Str(b)) => a == b,
            // Numeric cross-type equality compares numeric value, not
            // representation.
            (a, b) if a.is_numeric() && b.is_numeric() => match (a.as_i64(), b.as_i64()) {
                (Some(x), Some(y)) => x == y,
                _ => a.as_f64() == b.as_f64(),
            },
            (Val::Collection(a), Val::Collection(b)) => {
                Arc::ptr_eq(a, b) || a.entries_eq(b)
            }
            (Val::Action(a), Val::Action(b)) => Arc::ptr_eq(a, b),
            (Val::Group(a), Val::Group(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl PartialOrd for Val {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (a, b) if a.is_numeric() && b.is_numeric() => match (a.as_i64(), b.as_i64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y),
                _ => a.as_f64().partial_cmp(&b.as_f64()),
            },
            (Val::Str(a), Val::Str(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

impl Serialize for Val {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Val::Null => serializer.serialize_unit(),
            Val::Int(v) => serializer.serialize_i32(*v),
            Val::Long(v) => serializer.serialize_i64(*v),
            Val::Double(v) => serializer.serialize_f64(*v),
            Val::Str(s) => serializer.serialize_str(s.as_ref()),
            Val::Bool(b) => serializer.serialize_bool(*b),
            Val::Collection(c) => {
                let entries = c.snapshot();
                if c.is_map() {
                    let mut map = serializer.serialize_map(Some(entries.len()))?;
                    for (key, value) in &entries {
                        map.serialize_entry(&key.to_string(), value)?;
                    }
                    map.end()
                } else {
                    let mut seq = serializer.serialize_seq(Some(entries.len()))?;
                    for (_, value) in &entries {
                        seq.serialize_element(value)?;
                    }
                    seq.end()
                }
            }
            Val::Action(action) => serializer.serialize_str(&format!("<{}>", action.display_name())),
            Val::Group(group) => serializer.serialize_str(&format!("<group:{}>", group.name())),
        }
    }
}

impl core::fmt::Display for Val {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Val::Null => write!(f, "null"),
            Val::Int(v) => write!(f, "{v}"),
            Val::Long(v) => write!(f, "{v}"),
            Val::Double(v) => write!(f, "{v}"),
            Val::Str(s) => write!(f, "{}", s.as_ref()),
            Val::Bool(b) => write!(f, "{b}"),
            Val::Collection(_) => match serde_json::to_string(self) {
                Ok(s) => write!(f, "{s}"),
                Err(_) => write!(f, "<collection>"),
            },
            Val::Action(action) => write!(f, "<{}>", action.display_name()),
            Val::Group(group) => write!(f, "<group:{}>", group.name()),
        }
    }
}

impl From<i32> for Val {
    fn from(v: i32) -> Self {
        Val::Int(v)
    }
}

impl From<i64> for Val {
    fn from(v: i64) -> Self {
        Val::Long(v)
    }
}

impl From<f64> for Val {
    fn from(v: f64) -> Self {
        Val::Double(v)
    }
}

impl From<bool> for Val {
    fn from(v: bool) -> Self {
        Val::Bool(v)
    }
}

impl From<&str> for Val {
    fn from(v: &str) -> Self {
        Val::Str(Arc::from(v))
    }
}
