use std::any::Any;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::collection::{Collection, CollectionMode};
use crate::group::{ActionValue, GroupRef};

use super::ops::{reduce_f64, reduce_i64};
use super::Val;

/// Host-supplied factory for every value variant.
///
/// The engine never constructs values directly in handlers; it goes
/// through the provider so an embedding host can intern, wrap or audit
/// the values flowing through its programs.
pub trait ValueProvider: Send + Sync {
    fn null(&self) -> Val {
        Val::Null
    }

    fn boolean(&self, v: bool) -> Val {
        Val::Bool(v)
    }

    /// Integral constructors narrow automatically ("reduce").
    fn int(&self, v: i32) -> Val {
        Val::Int(v)
    }

    fn long(&self, v: i64) -> Val {
        reduce_i64(v)
    }

    fn double(&self, v: f64) -> Val {
        Val::Double(v)
    }

    fn string(&self, s: &str) -> Val {
        Val::Str(Arc::from(s))
    }

    fn group(&self, group: GroupRef) -> Val {
        Val::Group(group)
    }

    fn action(&self, action: Arc<ActionValue>) -> Val {
        Val::Action(action)
    }

    fn collection(&self, mode: CollectionMode) -> Val {
        Val::Collection(Arc::new(Collection::new(mode)))
    }

    /// Narrow a value to its smallest exact integral representation:
    /// integral-valued doubles and in-i32-range longs shrink, everything
    /// else passes through.
    fn reduce(&self, v: Val) -> Val {
        match v {
            Val::Long(x) => reduce_i64(x),
            Val::Double(d) => reduce_f64(d),
            other => other,
        }
    }

    /// Wrap an arbitrary host object. The default provider recognizes the
    /// primitive Rust types; anything else fails.
    fn from_host(&self, value: &dyn Any) -> Result<Val> {
        if let Some(v) = value.downcast_ref::<i32>() {
            Ok(self.int(*v))
        } else if let Some(v) = value.downcast_ref::<i64>() {
            Ok(self.long(*v))
        } else if let Some(v) = value.downcast_ref::<f64>() {
            Ok(self.double(*v))
        } else if let Some(v) = value.downcast_ref::<bool>() {
            Ok(self.boolean(*v))
        } else if let Some(v) = value.downcast_ref::<String>() {
            Ok(self.string(v))
        } else if let Some(v) = value.downcast_ref::<&str>() {
            Ok(self.string(v))
        } else {
            Err(anyhow!("Unsupported host value"))
        }
    }
}

/// Provider constructing the crate's own variants directly.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultValueProvider;

impl ValueProvider for DefaultValueProvider {}
