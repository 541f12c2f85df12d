// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::any::Any;
use core::fmt;
use core::panic::Location;
use std::borrow::Cow;
use std::rc::Rc;

use crate::value::Value;

/// The kind tag of an [`Error`].
///
/// Combinators and callers use the kind to tell "an executor failed" apart from "a dependency
/// was already cancelled" or "a deadline elapsed"; the message and context are informational.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A failure raised by user code inside an executor or handler.
    ExecutionError,
    /// An operation was attempted on, or through, a cancelled promise.
    AlreadyCancelled,
    /// [`Promise::now`](crate::Promise::now) was called before the promise resolved.
    NotResolvedInTime,
    /// The deadline of a [`Promise::timeout`](crate::Promise::timeout) elapsed.
    TimedOut,
    /// A user-defined kind, carried verbatim.
    Custom(Cow<'static, str>),
}

/// A structured failure value.
///
/// Errors are cheap to clone and immutable once built; [`Error::extend`] derives a new error
/// whose parent is the receiver, forming a chain that [`Error::chain`] walks.
#[derive(Clone)]
pub struct Error {
    inner: Rc<ErrorInner>,
}

#[derive(Clone)]
struct ErrorInner {
    kind: ErrorKind,
    message: Option<String>,
    context: Option<String>,
    parent: Option<Error>,
    created_at: &'static Location<'static>,
}

/// Iterator over an error and its parents, see [`Error::chain`].
#[derive(Debug, Clone)]
pub struct Chain<'a> {
    next: Option<&'a Error>,
}

// === impl ErrorKind ===

impl ErrorKind {
    pub fn custom(name: impl Into<Cow<'static, str>>) -> Self {
        Self::Custom(name.into())
    }

    pub fn as_str(&self) -> &str {
        match self {
            ErrorKind::ExecutionError => "ExecutionError",
            ErrorKind::AlreadyCancelled => "AlreadyCancelled",
            ErrorKind::NotResolvedInTime => "NotResolvedInTime",
            ErrorKind::TimedOut => "TimedOut",
            ErrorKind::Custom(name) => name,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

// === impl Error ===

impl Error {
    #[track_caller]
    pub fn new(kind: ErrorKind) -> Self {
        Self::at(kind, Location::caller())
    }

    pub(crate) fn at(kind: ErrorKind, created_at: &'static Location<'static>) -> Self {
        Self {
            inner: Rc::new(ErrorInner {
                kind,
                message: None,
                context: None,
                parent: None,
                created_at,
            }),
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        Rc::make_mut(&mut self.inner).message = Some(message.into());
        self
    }

    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        Rc::make_mut(&mut self.inner).context = Some(context.into());
        self
    }

    #[must_use]
    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        Rc::make_mut(&mut self.inner).kind = kind;
        self
    }

    /// Derives a new error whose parent is `self`.
    ///
    /// The new error inherits this error's kind (override it with [`Error::with_kind`]) but
    /// starts without a message or context of its own.
    #[must_use]
    #[track_caller]
    pub fn extend(&self) -> Self {
        let mut child = Self::new(self.inner.kind.clone());
        Rc::make_mut(&mut child.inner).parent = Some(self.clone());
        child
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.inner.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.inner.message.as_deref()
    }

    pub fn context(&self) -> Option<&str> {
        self.inner.context.as_deref()
    }

    pub fn parent(&self) -> Option<&Error> {
        self.inner.parent.as_ref()
    }

    /// The source location this error was constructed at.
    pub fn created_at(&self) -> &'static Location<'static> {
        self.inner.created_at
    }

    /// Returns an iterator over this error followed by each of its parents.
    pub fn chain(&self) -> Chain<'_> {
        Chain { next: Some(self) }
    }

    /// Returns `true` if `value` holds an [`Error`].
    pub fn is(value: &Value) -> bool {
        matches!(value, Value::Error(_))
    }

    /// Returns `true` if `value` holds an [`Error`] of the given kind.
    pub fn is_kind(value: &Value, kind: &ErrorKind) -> bool {
        matches!(value, Value::Error(err) if err.kind() == kind)
    }

    /// Turns a failure raised by user code into a rejection value.
    ///
    /// Structured errors pass through unchanged, everything else becomes an
    /// [`ErrorKind::ExecutionError`] carrying the value's textual form.
    pub(crate) fn normalize(failure: Value, location: &'static Location<'static>) -> Value {
        match failure {
            Value::Error(_) => failure,
            other => Self::at(ErrorKind::ExecutionError, location)
                .with_message(other.to_string())
                .with_context(format!("promise created at {location}"))
                .into(),
        }
    }

    pub(crate) fn from_panic(
        payload: &(dyn Any + Send),
        location: &'static Location<'static>,
    ) -> Self {
        let message = if let Some(msg) = payload.downcast_ref::<&'static str>() {
            msg
        } else if let Some(msg) = payload.downcast_ref::<String>() {
            msg.as_str()
        } else {
            "Box<dyn Any>"
        };

        Self::at(ErrorKind::ExecutionError, location)
            .with_message(format!("panicked: {message}"))
            .with_context(format!("promise created at {location}"))
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
            || (self.inner.kind == other.inner.kind
                && self.inner.message == other.inner.message
                && self.inner.context == other.inner.context
                && self.inner.parent == other.inner.parent)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Error")
            .field("kind", &self.inner.kind)
            .field("message", &self.inner.message)
            .field("context", &self.inner.context)
            .field("parent", &self.inner.parent)
            .field("created_at", &self.inner.created_at)
            .finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (depth, err) in self.chain().enumerate() {
            if depth > 0 {
                f.write_str("\ncaused by: ")?;
            }
            write!(f, "{}", err.kind())?;
            if let Some(message) = err.message() {
                write!(f, ": {message}")?;
            }
            if let Some(context) = err.context() {
                write!(f, "\n    {context}")?;
            }
        }
        Ok(())
    }
}

impl core::error::Error for Error {}

// === impl Chain ===

impl<'a> Iterator for Chain<'a> {
    type Item = &'a Error;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.parent();
        Some(current)
    }
}
