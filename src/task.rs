//! Deferred computations stored in the graph.
//!
//! A [`Task`] is an [`Operation`] plus an ordered list of [`Arg`]s. Arguments
//! are either references to other graph nodes, which become dependency
//! edges, or literal values passed through as-is. When the task runs, each
//! reference is replaced by the value computed for it and the operation sees
//! the result through [`Args`].

use std::any::{Any, type_name};
use std::borrow::Cow;
use std::fmt::Debug;
use std::sync::Arc;

use thiserror::Error;

use crate::core::Value;
use crate::graph::Ident;
use crate::key::Key;

/// A callable supplied by the numeric backend.
///
/// Any `Fn(&Args) -> anyhow::Result<Value>` closure or function item is an
/// operation; use [`named`] to give a closure a readable name.
pub trait Operation: Send + Sync {
    fn call(&self, args: &Args<'_>) -> anyhow::Result<Value>;

    /// Name used in error messages and descriptions.
    fn name(&self) -> Cow<'static, str> {
        type_name::<Self>().into()
    }
}

impl<F> Operation for F
where
    F: Fn(&Args<'_>) -> anyhow::Result<Value> + Send + Sync,
{
    fn call(&self, args: &Args<'_>) -> anyhow::Result<Value> {
        self(args)
    }
}

/// An operation with an explicit name.
pub struct Named<F> {
    name: Cow<'static, str>,
    func: F,
}

pub fn named<F>(name: impl Into<Cow<'static, str>>, func: F) -> Named<F>
where
    F: Fn(&Args<'_>) -> anyhow::Result<Value> + Send + Sync,
{
    Named {
        name: name.into(),
        func,
    }
}

impl<F> Operation for Named<F>
where
    F: Fn(&Args<'_>) -> anyhow::Result<Value> + Send + Sync,
{
    fn call(&self, args: &Args<'_>) -> anyhow::Result<Value> {
        (self.func)(args)
    }

    fn name(&self) -> Cow<'static, str> {
        self.name.clone()
    }
}

/// Passes its only argument through; backs [`Computer::add_alias`](crate::Computer::add_alias).
pub(crate) struct Alias;

impl Operation for Alias {
    fn call(&self, args: &Args<'_>) -> anyhow::Result<Value> {
        Ok(args.value(0)?.clone())
    }

    fn name(&self) -> Cow<'static, str> {
        "alias".into()
    }
}

/// Gathers every argument into a `Vec<Value>`.
pub(crate) struct Collect;

impl Operation for Collect {
    fn call(&self, args: &Args<'_>) -> anyhow::Result<Value> {
        Ok(Value::new(args.values().to_vec()))
    }

    fn name(&self) -> Cow<'static, str> {
        "collect".into()
    }
}

#[derive(Debug, Error)]
pub enum ArgumentError {
    #[error("Expected an argument at position {index}, got {len} argument(s)")]
    Missing { index: usize, len: usize },

    #[error("Argument {index} has type {found}, expected {expected}")]
    Type {
        index: usize,
        expected: &'static str,
        found: &'static str,
    },
}

/// The resolved inputs of a running task, in declaration order.
#[derive(Clone, Copy)]
pub struct Args<'a> {
    values: &'a [Value],
}

impl<'a> Args<'a> {
    pub fn new(values: &'a [Value]) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &'a [Value] {
        self.values
    }

    pub fn iter(&self) -> std::slice::Iter<'a, Value> {
        self.values.iter()
    }

    pub fn value(&self, index: usize) -> Result<&'a Value, ArgumentError> {
        self.values.get(index).ok_or(ArgumentError::Missing {
            index,
            len: self.values.len(),
        })
    }

    /// Borrows argument `index` as a `T`.
    pub fn get<T: Any>(&self, index: usize) -> Result<&'a T, ArgumentError> {
        let value = self.value(index)?;

        value.downcast_ref::<T>().ok_or(ArgumentError::Type {
            index,
            expected: type_name::<T>(),
            found: value.type_name(),
        })
    }
}

impl<'a> IntoIterator for Args<'a> {
    type Item = &'a Value;
    type IntoIter = std::slice::Iter<'a, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

/// One argument of a task as declared.
#[derive(Clone, Debug)]
pub enum Arg {
    /// Another node of the graph, computed first.
    Ref(Ident),
    /// A value passed to the operation unchanged.
    Literal(Value),
}

impl Arg {
    pub fn literal<T: Any + Send + Sync>(value: T) -> Self {
        Arg::Literal(Value::new(value))
    }

    pub fn as_ident(&self) -> Option<&Ident> {
        match self {
            Arg::Ref(ident) => Some(ident),
            Arg::Literal(_) => None,
        }
    }
}

impl From<Ident> for Arg {
    fn from(value: Ident) -> Self {
        Arg::Ref(value)
    }
}

impl From<&Ident> for Arg {
    fn from(value: &Ident) -> Self {
        Arg::Ref(value.clone())
    }
}

impl From<Key> for Arg {
    fn from(value: Key) -> Self {
        Arg::Ref(value.into())
    }
}

impl From<&Key> for Arg {
    fn from(value: &Key) -> Self {
        Arg::Ref(value.into())
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg::Ref(value.into())
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Arg::Ref(value.into())
    }
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Arg::Literal(value)
    }
}

/// An operation bound to its arguments.
#[derive(Clone)]
pub struct Task {
    pub(crate) op: Arc<dyn Operation>,
    pub(crate) args: Vec<Arg>,
}

impl Task {
    pub fn new<O, I, A>(op: O, args: I) -> Self
    where
        O: Operation + 'static,
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        Self::from_arc(Arc::new(op), args)
    }

    pub fn from_arc<I, A>(op: Arc<dyn Operation>, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        Self {
            op,
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn op_name(&self) -> Cow<'static, str> {
        self.op.name()
    }

    pub fn args(&self) -> &[Arg] {
        &self.args
    }

    /// The identifiers this task depends on, in argument order.
    pub fn refs(&self) -> impl Iterator<Item = &Ident> + '_ {
        self.args.iter().filter_map(Arg::as_ident)
    }

    pub fn call(&self, inputs: &[Value]) -> anyhow::Result<Value> {
        self.op.call(&Args::new(inputs))
    }
}

impl Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("op", &self.op.name())
            .field("args", &self.args)
            .finish()
    }
}
