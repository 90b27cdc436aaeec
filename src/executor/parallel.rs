use std::collections::HashMap;
use std::sync::mpsc::channel;
use std::time::{Duration, Instant};

use indicatif::ProgressStyle;
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use super::{
    Diagnostics, Executor, Outcome, Sequential, TaskExecution, gather, node, run_task, take_target,
};
use crate::core::Value;
use crate::error::ExecutionError;
use crate::graph::{Ident, Plan, PlanNode};

/// Runs independent branches of the plan concurrently on the rayon pool.
///
/// Tasks are spawned as soon as all of their dependencies have completed:
/// 1. Every node starts with a count of its distinct dependencies.
/// 2. Nodes with a count of zero are spawned; literal data completes at once.
/// 3. The calling thread waits on a channel for finished nodes, stores their
///    values and decrements the counts of their dependents.
/// 4. A dependent whose count reaches zero is spawned in turn.
/// 5. The first failure stops the scheduling of new work; tasks already
///    running are allowed to finish and their results are discarded.
///
/// The calling thread never runs tasks itself. When it is a rayon worker
/// already, the plan is computed with [`Sequential`] instead.
#[derive(Debug, Clone, Copy)]
pub struct Parallel {
    progress: bool,
}

impl Default for Parallel {
    fn default() -> Self {
        Self::new()
    }
}

impl Parallel {
    pub fn new() -> Self {
        Self { progress: true }
    }

    /// Disables the progress bar spans.
    pub fn quiet() -> Self {
        Self { progress: false }
    }
}

type Message = (Ident, Result<Value, ExecutionError>, Instant, Duration);

impl Executor for Parallel {
    fn execute(&self, plan: &Plan) -> Result<Outcome, ExecutionError> {
        // Waiting on the channel from a pool worker can starve the very tasks
        // it waits for, e.g. on a one-thread pool or from inside a task.
        if rayon::current_thread_index().is_some() {
            tracing::debug!("Already on a rayon worker, computing {} sequentially", plan.target());
            return Sequential.execute(plan);
        }

        let mut dependency_counts: HashMap<&Ident, usize> = plan
            .order()
            .iter()
            .map(|ident| (ident, plan.dependencies(ident).count()))
            .collect();

        let total = plan.len();
        let mut completed = 0;
        let mut values: HashMap<Ident, Value> = HashMap::with_capacity(total);
        let mut execution_times = HashMap::new();

        let root_span = tracing::span!(Level::INFO, "computing", target = %plan.target());
        if self.progress {
            root_span.pb_set_length(total as u64);
            root_span.pb_set_style(&bar_style());
            root_span.pb_set_message(&format!("Computing {}", plan.target()));
        }
        let _enter = root_span.enter();

        rayon::in_place_scope(|s| -> Result<(), ExecutionError> {
            let (sender, receiver) = channel::<Message>();

            let spawn = |values: &HashMap<Ident, Value>, ident: &Ident| {
                let sender = sender.clone();

                let (op, inputs) = match node(plan, ident) {
                    Ok(PlanNode::Data(value)) => {
                        let now = Instant::now();
                        let _ = sender.send((ident.clone(), Ok(value.clone()), now, Duration::ZERO));
                        return;
                    }
                    Ok(PlanNode::Task { op, inputs }) => match gather(inputs, values) {
                        Ok(inputs) => (op.clone(), inputs),
                        Err(err) => {
                            let _ = sender.send((ident.clone(), Err(err), Instant::now(), Duration::ZERO));
                            return;
                        }
                    },
                    Err(err) => {
                        let _ = sender.send((ident.clone(), Err(err), Instant::now(), Duration::ZERO));
                        return;
                    }
                };

                let ident = ident.clone();
                let progress = self.progress;

                s.spawn(move |_| {
                    let span = tracing::span!(Level::INFO, "task", key = %ident);
                    if progress {
                        span.pb_set_style(&task_style());
                        span.pb_set_message(&format!("{ident} using {}", op.name()));
                    }
                    let _enter = span.enter();

                    let start = Instant::now();
                    let result = run_task(&ident, op.as_ref(), &inputs);
                    let elapsed = start.elapsed();

                    // the receiver is gone once an earlier task failed
                    let _ = sender.send((ident, result, start, elapsed));
                });
            };

            for ident in plan.order() {
                if dependency_counts[ident] == 0 {
                    spawn(&values, ident);
                }
            }

            while completed < total {
                let Ok((ident, result, start, duration)) = receiver.recv() else {
                    break;
                };

                let is_task = matches!(plan.node(&ident), Some(PlanNode::Task { .. }));
                values.insert(ident.clone(), result?);
                if is_task {
                    execution_times.insert(ident.clone(), TaskExecution { start, duration });
                }
                completed += 1;
                root_span.pb_inc(1);

                for dependent in plan.dependents(&ident) {
                    if let Some(count) = dependency_counts.get_mut(dependent) {
                        *count -= 1;
                        if *count == 0 {
                            spawn(&values, dependent);
                        }
                    }
                }
            }

            Ok(())
        })?;

        tracing::debug!("Computed {} in {} step(s)", plan.target(), completed);

        let value = take_target(plan, values)?;
        Ok(Outcome {
            value,
            diagnostics: Diagnostics { execution_times },
        })
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
        .map(|style| style.progress_chars("=>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

fn task_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.blue} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::graph::{Entry, Graph};
    use crate::resolve::Resolver;
    use crate::task::{Args, Task, named};

    fn sum(args: &Args<'_>) -> anyhow::Result<Value> {
        let mut total = 0i64;
        for value in args.iter() {
            total += value
                .downcast_ref::<i64>()
                .ok_or_else(|| anyhow::anyhow!("not a number"))?;
        }
        Ok(Value::new(total))
    }

    fn diamond() -> Graph {
        let mut graph = Graph::new();
        let data = |v: i64| Entry::Data(Value::new(v));
        let task = |args: &[&str]| Entry::Task(Task::new(sum, args.iter().copied()));

        graph.insert("a".into(), data(1), false).unwrap();
        graph.insert("b".into(), task(&["a"]), false).unwrap();
        graph.insert("c".into(), task(&["a"]), false).unwrap();
        graph.insert("d".into(), task(&["b", "c", "a"]), false).unwrap();
        graph
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let graph = diamond();
        let plan = Plan::build(&graph, &Resolver::new(), &"d".into()).unwrap();

        let seq = Sequential.execute(&plan).unwrap();
        let par = Parallel::quiet().execute(&plan).unwrap();

        assert_eq!(seq.value.downcast::<i64>(), Some(3));
        assert_eq!(par.value.downcast::<i64>(), Some(3));
        assert_eq!(par.diagnostics.len(), 3);
        assert!(par.diagnostics.render_mermaid(&plan).starts_with("graph LR"));
    }

    #[test]
    fn test_shared_dependency_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let counted = named("counted", move |_: &Args<'_>| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Value::new(5i64))
        });

        let mut graph = Graph::new();
        let no_args: [&str; 0] = [];
        graph.insert("base".into(), Entry::Task(Task::new(counted, no_args)), false).unwrap();
        graph.insert("l".into(), Entry::Task(Task::new(sum, ["base"])), false).unwrap();
        graph.insert("r".into(), Entry::Task(Task::new(sum, ["base"])), false).unwrap();
        graph.insert("top".into(), Entry::Task(Task::new(sum, ["l", "r"])), false).unwrap();

        let plan = Plan::build(&graph, &Resolver::new(), &"top".into()).unwrap();
        let out = Parallel::quiet().execute(&plan).unwrap();

        assert_eq!(out.value.downcast::<i64>(), Some(10));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failure_names_failing_node() {
        let fail = named("fail", |_: &Args<'_>| -> anyhow::Result<Value> {
            anyhow::bail!("boom")
        });

        let mut graph = diamond();
        let no_args: [&str; 0] = [];
        graph.insert("bad".into(), Entry::Task(Task::new(fail, no_args)), false).unwrap();
        graph.insert("top".into(), Entry::Task(Task::new(sum, ["d", "bad"])), false).unwrap();

        let plan = Plan::build(&graph, &Resolver::new(), &"top".into()).unwrap();
        let err = Parallel::quiet().execute(&plan).unwrap_err();

        assert_eq!(err.ident(), Some(&Ident::from("bad")));
        let ExecutionError::Task { op, source, .. } = err else {
            panic!("expected a task error");
        };
        assert_eq!(op, "fail");
        assert_eq!(source.to_string(), "boom");
    }

    #[test]
    fn test_panic_is_captured() {
        let explode = named("explode", |_: &Args<'_>| -> anyhow::Result<Value> {
            panic!("kaboom")
        });

        let mut graph = Graph::new();
        let no_args: [&str; 0] = [];
        graph.insert("x".into(), Entry::Task(Task::new(explode, no_args)), false).unwrap();

        let plan = Plan::build(&graph, &Resolver::new(), &"x".into()).unwrap();
        let err = Parallel::quiet().execute(&plan).unwrap_err();

        assert!(matches!(err, ExecutionError::Panic { ref message, .. } if message == "kaboom"));
    }

    #[test]
    fn test_single_thread_pool() {
        let graph = diamond();
        let plan = Plan::build(&graph, &Resolver::new(), &"d".into()).unwrap();

        let pool = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();
        let out = pool.install(|| Parallel::quiet().execute(&plan)).unwrap();

        assert_eq!(out.value.downcast::<i64>(), Some(3));
        assert_eq!(out.diagnostics.len(), 3);
    }
}
