//! Execution of validated plans.
//!
//! The core never runs anything itself: [`Computer::get`](crate::Computer::get)
//! builds a [`Plan`] and hands it to an [`Executor`]. Any engine that can walk
//! a plan in dependency order and call each task with the values of its
//! inputs satisfies the contract.

mod diagnostics;
#[cfg(feature = "parallel")]
mod parallel;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

pub use diagnostics::{Diagnostics, TaskExecution};
pub(crate) use diagnostics::mermaid_escape;
#[cfg(feature = "parallel")]
pub use parallel::Parallel;

use crate::core::Value;
use crate::error::{ExecutionError, GraphError};
use crate::graph::{Ident, Input, Plan, PlanNode};
use crate::task::{Args, Operation};

/// The value of the target and timing information for the run.
#[derive(Debug)]
pub struct Outcome {
    pub value: Value,
    pub diagnostics: Diagnostics,
}

/// Anything that can evaluate a [`Plan`].
///
/// Implementations must compute every node after all of its dependencies,
/// pass each task its inputs in declaration order, and stop at the first
/// failing node, reporting it through [`ExecutionError`].
pub trait Executor: Send + Sync {
    fn execute(&self, plan: &Plan) -> Result<Outcome, ExecutionError>;
}

impl<E: Executor + ?Sized> Executor for Arc<E> {
    fn execute(&self, plan: &Plan) -> Result<Outcome, ExecutionError> {
        (**self).execute(plan)
    }
}

/// The executor used by a fresh [`Computer`](crate::Computer).
pub fn default_executor() -> Arc<dyn Executor> {
    #[cfg(feature = "parallel")]
    {
        Arc::new(Parallel::new())
    }
    #[cfg(not(feature = "parallel"))]
    {
        Arc::new(Sequential)
    }
}

/// Runs the plan on the calling thread, in topological order.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sequential;

impl Executor for Sequential {
    fn execute(&self, plan: &Plan) -> Result<Outcome, ExecutionError> {
        let mut values: HashMap<Ident, Value> = HashMap::with_capacity(plan.len());
        let mut diagnostics = Diagnostics::default();

        for ident in plan.order() {
            let value = match node(plan, ident)? {
                PlanNode::Data(value) => value.clone(),
                PlanNode::Task { op, inputs } => {
                    let inputs = gather(inputs, &values)?;
                    let start = Instant::now();
                    let value = run_task(ident, op.as_ref(), &inputs)?;
                    diagnostics.execution_times.insert(
                        ident.clone(),
                        TaskExecution {
                            start,
                            duration: start.elapsed(),
                        },
                    );
                    value
                }
            };

            values.insert(ident.clone(), value);
        }

        let value = take_target(plan, values)?;
        Ok(Outcome { value, diagnostics })
    }
}

pub(crate) fn node<'a>(plan: &'a Plan, ident: &Ident) -> Result<&'a PlanNode, ExecutionError> {
    plan.node(ident).ok_or_else(|| {
        GraphError::NotFound {
            ident: ident.clone(),
            needed_by: None,
        }
        .into()
    })
}

/// Looks up the computed values of a task's inputs.
pub(crate) fn gather(
    inputs: &[Input],
    values: &HashMap<Ident, Value>,
) -> Result<Vec<Value>, ExecutionError> {
    inputs
        .iter()
        .map(|input| match input {
            Input::Literal(value) => Ok(value.clone()),
            Input::Node(ident) => values.get(ident).cloned().ok_or_else(|| {
                GraphError::NotFound {
                    ident: ident.clone(),
                    needed_by: None,
                }
                .into()
            }),
        })
        .collect()
}

/// Calls one operation, turning both errors and panics into an
/// [`ExecutionError`] naming the node.
pub(crate) fn run_task(
    ident: &Ident,
    op: &dyn Operation,
    inputs: &[Value],
) -> Result<Value, ExecutionError> {
    // The operation only sees shared, immutable inputs; a panic cannot leave
    // them half-updated.
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        op.call(&Args::new(inputs))
    }));

    match result {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(source)) => Err(ExecutionError::Task {
            ident: ident.clone(),
            op: op.name().into_owned(),
            source,
        }),
        Err(panic) => {
            let message = if let Some(s) = panic.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic.downcast_ref::<String>() {
                s.clone()
            } else {
                String::from("unknown payload")
            };

            Err(ExecutionError::Panic {
                ident: ident.clone(),
                message,
            })
        }
    }
}

pub(crate) fn take_target(
    plan: &Plan,
    mut values: HashMap<Ident, Value>,
) -> Result<Value, ExecutionError> {
    values.remove(plan.target()).ok_or_else(|| {
        GraphError::NotFound {
            ident: plan.target().clone(),
            needed_by: None,
        }
        .into()
    })
}
