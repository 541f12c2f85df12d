// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::any::Any;
use core::fmt;
use core::time::Duration;
use std::rc::Rc;

use smallvec::{SmallVec, smallvec};

use crate::error::Error;
use crate::promise::{Promise, Status};

/// The ordered, possibly empty, payload a promise settles with.
pub type Values = SmallVec<[Value; 2]>;

/// A single settlement payload.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<[Value]>),
    Duration(Duration),
    Status(Status),
    Error(Error),
    /// A promise. Resolving with this variant adopts the promise instead of wrapping it.
    Promise(Promise),
    /// Any other host value, compared by identity.
    Opaque(Rc<dyn Any>),
}

/// Conversion into the payload of a settlement.
pub trait IntoValues {
    fn into_values(self) -> Values;
}

/// Conversion of a handler's return value into its outcome.
///
/// `Ok` values resolve the derived promise (adopting a returned [`Promise`]), `Err` values
/// reject it, just like a failure raised from the handler.
pub trait IntoOutcome {
    /// # Errors
    ///
    /// Returns the failure value if the handler failed.
    fn into_outcome(self) -> Result<Values, Value>;
}

// === impl Value ===

impl Value {
    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Value::List(items.into_iter().collect())
    }

    pub fn opaque<T: Any>(value: T) -> Self {
        Value::Opaque(Rc::new(value))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            Value::Duration(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_status(&self) -> Option<Status> {
        match self {
            Value::Status(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<&Error> {
        match self {
            Value::Error(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_promise(&self) -> Option<&Promise> {
        match self {
            Value::Promise(v) => Some(v),
            _ => None,
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Value::Opaque(v) => v.downcast_ref(),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Duration(_) => "duration",
            Value::Status(_) => "status",
            Value::Error(_) => "error",
            Value::Promise(_) => "promise",
            Value::Opaque(_) => "opaque",
        }
    }
}

impl PartialEq for Value {
    #[allow(
        clippy::float_cmp,
        reason = "payloads compare exactly, like the values they were built from"
    )]
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Duration(a), Value::Duration(b)) => a == b,
            (Value::Status(a), Value::Status(b)) => a == b,
            (Value::Error(a), Value::Error(b)) => a == b,
            (Value::Promise(a), Value::Promise(b)) => a == b,
            (Value::Opaque(a), Value::Opaque(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("Nil"),
            Value::Bool(v) => f.debug_tuple("Bool").field(v).finish(),
            Value::Int(v) => f.debug_tuple("Int").field(v).finish(),
            Value::Float(v) => f.debug_tuple("Float").field(v).finish(),
            Value::Str(v) => f.debug_tuple("Str").field(v).finish(),
            Value::List(v) => f.debug_tuple("List").field(v).finish(),
            Value::Duration(v) => f.debug_tuple("Duration").field(v).finish(),
            Value::Status(v) => f.debug_tuple("Status").field(v).finish(),
            Value::Error(v) => f.debug_tuple("Error").field(v).finish(),
            Value::Promise(v) => f.debug_tuple("Promise").field(v).finish(),
            Value::Opaque(_) => f.write_str("Opaque(..)"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("nil"),
            Value::Bool(v) => fmt::Display::fmt(v, f),
            Value::Int(v) => fmt::Display::fmt(v, f),
            Value::Float(v) => fmt::Display::fmt(v, f),
            Value::Str(v) => f.write_str(v),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Duration(v) => write!(f, "{v:?}"),
            Value::Status(v) => fmt::Display::fmt(v, f),
            Value::Error(v) => fmt::Display::fmt(v, f),
            Value::Promise(v) => write!(f, "Promise({}, {})", v.id(), v.status()),
            Value::Opaque(_) => f.write_str("<opaque>"),
        }
    }
}

macro_rules! impl_value_from {
    ($($ty:ty => |$v:ident| $conv:expr),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from($v: $ty) -> Self {
                    $conv
                }
            }

            impl IntoValues for $ty {
                fn into_values(self) -> Values {
                    smallvec![Value::from(self)]
                }
            }
        )*
    };
}

impl_value_from! {
    bool => |v| Value::Bool(v),
    i64 => |v| Value::Int(v),
    i32 => |v| Value::Int(i64::from(v)),
    u32 => |v| Value::Int(i64::from(v)),
    usize => |v| Value::Int(i64::try_from(v).unwrap_or(i64::MAX)),
    f64 => |v| Value::Float(v),
    &str => |v| Value::Str(Rc::from(v)),
    String => |v| Value::Str(Rc::from(v)),
    Rc<str> => |v| Value::Str(v),
    Vec<Value> => |v| Value::List(Rc::from(v)),
    Duration => |v| Value::Duration(v),
    Status => |v| Value::Status(v),
    Error => |v| Value::Error(v),
    Promise => |v| Value::Promise(v),
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Nil, Into::into)
    }
}

// === impl IntoValues ===

impl IntoValues for () {
    fn into_values(self) -> Values {
        Values::new()
    }
}

impl IntoValues for Value {
    fn into_values(self) -> Values {
        smallvec![self]
    }
}

impl IntoValues for Values {
    fn into_values(self) -> Values {
        self
    }
}

impl<T: Into<Value>> IntoValues for Option<T> {
    fn into_values(self) -> Values {
        smallvec![Value::from(self)]
    }
}

impl<A: Into<Value>, B: Into<Value>> IntoValues for (A, B) {
    fn into_values(self) -> Values {
        smallvec![self.0.into(), self.1.into()]
    }
}

impl<A: Into<Value>, B: Into<Value>, C: Into<Value>> IntoValues for (A, B, C) {
    fn into_values(self) -> Values {
        smallvec![self.0.into(), self.1.into(), self.2.into()]
    }
}

// === impl IntoOutcome ===

impl<T: IntoValues> IntoOutcome for T {
    fn into_outcome(self) -> Result<Values, Value> {
        Ok(self.into_values())
    }
}

impl<T: IntoValues, E: Into<Value>> IntoOutcome for Result<T, E> {
    fn into_outcome(self) -> Result<Values, Value> {
        self.map(IntoValues::into_values).map_err(Into::into)
    }
}

/// The first value of a settlement, or [`Value::Nil`] if there is none.
pub(crate) fn first(values: &Values) -> Value {
    values.first().cloned().unwrap_or_default()
}
