#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod cache;
mod computer;
mod config;
mod core;
mod error;
mod executor;
mod graph;
mod key;
#[cfg(feature = "logging")]
pub mod logging;
mod resolve;
mod task;

pub use crate::cache::{Cache, Cached, DEFAULT_DIR, Encoder, EntryMeta, Fingerprint, FnIdentity, SourceStamp};
pub use crate::computer::{AddOptions, Computer};
pub use crate::config::{Fail, Handler, HandlerFn, Handlers, Shape};
pub use crate::core::{Blake3Hasher, Hash32, Value};
pub use crate::error::*;
#[cfg(feature = "parallel")]
pub use crate::executor::Parallel;
pub use crate::executor::{Diagnostics, Executor, Outcome, Sequential, TaskExecution, default_executor};
pub use crate::graph::{Entry, Graph, Ident, Input, Plan, PlanNode};
pub use crate::key::Key;
pub use crate::resolve::{Exact, Resolution, Resolver, Strategy, Subset};
pub use crate::task::{Arg, ArgumentError, Args, Named, Operation, Task, named};
