use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt::{Debug, Display, Write};
use std::sync::Arc;

use crate::cache::Cache;
use crate::config::Handlers;
use crate::core::Value;
use crate::error::{ExecutionError, GraphError};
use crate::executor::{Executor, Outcome, default_executor, mermaid_escape};
use crate::graph::{Entry, Graph, Ident, Plan};
use crate::key::Key;
use crate::resolve::{Resolution, Resolver};
use crate::task::{Alias, Arg, Operation, Task};

/// How [`Computer::add_with`] treats references and existing entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddOptions {
    /// Every reference must resolve now; the resolved identifier is stored.
    pub strict: bool,
    /// Replace an existing entry instead of failing with a collision.
    pub overwrite: bool,
}

impl AddOptions {
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }
}

/// A graph of named quantities and the computations that produce them.
///
/// Tasks are registered with [`add`](Self::add) and literal data with
/// [`add_single`](Self::add_single); references between them may point at
/// entries that do not exist yet and are only checked when a value is
/// requested with [`get`](Self::get). Partial keys, naming a quantity by a
/// subset of its dimensions, resolve to the single full key they match.
///
/// ```
/// use reckon::{Args, Computer, Value};
///
/// fn plus(args: &Args<'_>) -> anyhow::Result<Value> {
///     Ok(Value::new(args.get::<i64>(0)? + args.get::<i64>(1)?))
/// }
///
/// let mut c = Computer::new();
/// c.add("c", plus, ["a", "b"]).unwrap();
/// c.add_single("a", 2i64).unwrap();
/// c.add_single("b", 3i64).unwrap();
///
/// assert_eq!(c.get_as::<i64>("c").unwrap(), 5);
/// ```
pub struct Computer {
    graph: Graph,
    resolver: Resolver,
    executor: Arc<dyn Executor>,
    operations: HashMap<String, Arc<dyn Operation>>,
    pub(crate) handlers: Handlers,
    pub(crate) config: serde_json::Map<String, serde_json::Value>,
    default_key: Option<Ident>,
    cache: Arc<Cache>,
}

impl Default for Computer {
    fn default() -> Self {
        Self::new()
    }
}

impl Computer {
    pub fn new() -> Self {
        Self {
            graph: Graph::new(),
            resolver: Resolver::new(),
            executor: default_executor(),
            operations: HashMap::new(),
            handlers: Handlers::new(),
            config: serde_json::Map::new(),
            default_key: None,
            cache: Arc::new(Cache::default()),
        }
    }

    pub fn with_executor(mut self, executor: impl Executor + 'static) -> Self {
        self.executor = Arc::new(executor);
        self
    }

    pub fn set_executor(&mut self, executor: Arc<dyn Executor>) {
        self.executor = executor;
    }

    pub fn with_resolver(mut self, resolver: Resolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    pub fn handlers(&self) -> &Handlers {
        &self.handlers
    }

    pub fn handlers_mut(&mut self) -> &mut Handlers {
        &mut self.handlers
    }

    /// Every configuration section applied so far, as given.
    pub fn config(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.config
    }

    /// Registers a task computing `ident` from `args`.
    ///
    /// References in `args` may name entries that do not exist yet.
    ///
    /// Strings convert to identifiers leniently: one that is not a valid key,
    /// such as `x:a--b`, becomes an opaque name. Pass [`Ident::parse`]
    /// results to reject malformed keys instead.
    pub fn add<I, O, A, R>(&mut self, ident: I, op: O, args: A) -> Result<Ident, GraphError>
    where
        I: Into<Ident>,
        O: Operation + 'static,
        A: IntoIterator<Item = R>,
        R: Into<Arg>,
    {
        self.add_task(ident, Task::new(op, args), AddOptions::default())
    }

    pub fn add_with<I, O, A, R>(
        &mut self,
        ident: I,
        op: O,
        args: A,
        options: AddOptions,
    ) -> Result<Ident, GraphError>
    where
        I: Into<Ident>,
        O: Operation + 'static,
        A: IntoIterator<Item = R>,
        R: Into<Arg>,
    {
        self.add_task(ident, Task::new(op, args), options)
    }

    pub fn add_task(
        &mut self,
        ident: impl Into<Ident>,
        mut task: Task,
        options: AddOptions,
    ) -> Result<Ident, GraphError> {
        let ident = ident.into();

        if !options.overwrite && self.graph.contains(&ident) {
            return Err(GraphError::Collision(ident));
        }

        if options.strict {
            for arg in task.args.iter_mut() {
                if let Arg::Ref(wanted) = arg {
                    *wanted = self
                        .resolve(wanted)
                        .map_err(|err| err.needed_by(&ident))?;
                }
            }
        }

        if let Some(path) = self.find_cycle(&ident, &task) {
            return Err(GraphError::Cycle(path));
        }

        tracing::debug!("Adding '{ident}' using {}", task.op_name());
        self.graph
            .insert(ident.clone(), Entry::Task(task), options.overwrite)?;

        Ok(ident)
    }

    /// Registers a literal value under `ident`.
    pub fn add_single<T>(&mut self, ident: impl Into<Ident>, value: T) -> Result<Ident, GraphError>
    where
        T: Any + Send + Sync,
    {
        self.add_single_with(ident, value, false)
    }

    pub fn add_single_with<T>(
        &mut self,
        ident: impl Into<Ident>,
        value: T,
        overwrite: bool,
    ) -> Result<Ident, GraphError>
    where
        T: Any + Send + Sync,
    {
        let ident = ident.into();

        let any: &dyn Any = &value;
        let value = match any.downcast_ref::<Value>() {
            Some(value) => value.clone(),
            None => Value::new(value),
        };

        if value.is::<Task>() || value.is::<Entry>() {
            return Err(GraphError::TaskAsData(ident));
        }

        tracing::debug!("Adding '{ident}' as {}", value.type_name());
        self.graph
            .insert(ident.clone(), Entry::Data(value), overwrite)?;

        Ok(ident)
    }

    /// Makes `new` compute to whatever `existing` computes to.
    pub fn add_alias(
        &mut self,
        new: impl Into<Ident>,
        existing: impl Into<Ident>,
    ) -> Result<Ident, GraphError> {
        let task = Task::new(Alias, [existing.into()]);
        self.add_task(new, task, AddOptions::default())
    }

    pub fn remove(&mut self, ident: impl Into<Ident>) -> Option<Entry> {
        self.graph.remove(&ident.into())
    }

    pub fn contains(&self, ident: impl Into<Ident>) -> bool {
        self.graph.contains(&ident.into())
    }

    /// Every identifier in the graph, sorted.
    pub fn keys(&self) -> Vec<Ident> {
        let mut keys: Vec<_> = self.graph.idents().cloned().collect();
        keys.sort();
        keys
    }

    /// Makes `op` available to configuration handlers under `name`.
    pub fn register_op(&mut self, name: impl Into<String>, op: impl Operation + 'static) {
        let name = name.into();
        if self.operations.insert(name.clone(), Arc::new(op)).is_some() {
            tracing::warn!("Override operation '{name}'");
        }
    }

    pub fn operation(&self, name: &str) -> Option<Arc<dyn Operation>> {
        self.operations.get(name).cloned()
    }

    pub fn default_key(&self) -> Option<&Ident> {
        self.default_key.as_ref()
    }

    pub fn set_default_key(&mut self, ident: impl Into<Ident>) {
        self.default_key = Some(ident.into());
    }

    /// Resolves every reference to an identifier present in the graph.
    pub fn check_keys<I, R>(&self, refs: I) -> Result<Vec<Ident>, GraphError>
    where
        I: IntoIterator<Item = R>,
        R: Into<Ident>,
    {
        refs.into_iter()
            .map(|wanted| self.resolve(&wanted.into()))
            .collect()
    }

    /// Like [`check_keys`](Self::check_keys), with `accept` deciding which
    /// identifiers count as present.
    pub fn check_keys_with<I, R, P>(&self, refs: I, accept: P) -> Result<Vec<Ident>, GraphError>
    where
        I: IntoIterator<Item = R>,
        R: Into<Ident>,
        P: Fn(&Ident) -> bool,
    {
        refs.into_iter()
            .map(|wanted| {
                let wanted = wanted.into();
                self.resolver
                    .resolve_with(&self.graph, &wanted, &accept)
                    .into_result(&wanted)
            })
            .collect()
    }

    /// The full key of the quantity `name` that varies over at least `dims`.
    ///
    /// `name` may itself be a partial key such as `x:a` or `x::tag`.
    pub fn infer_keys<D, S>(&self, name: &str, dims: D) -> Result<Key, GraphError>
    where
        D: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let wanted: Ident = Key::parse(name)?.append(dims)?.into();
        let found = self.resolve(&wanted)?;

        found.to_key().ok_or(GraphError::NotFound {
            ident: wanted,
            needed_by: None,
        })
    }

    /// The full key of the single quantity named `name`.
    pub fn full_key(&self, name: &str) -> Result<Key, GraphError> {
        self.infer_keys(name, std::iter::empty::<&str>())
    }

    fn resolve(&self, wanted: &Ident) -> Result<Ident, GraphError> {
        self.resolver
            .resolve(&self.graph, wanted)
            .into_result(wanted)
    }

    /// The validated minimal subgraph needed for `ident`.
    pub fn plan(&self, ident: impl Into<Ident>) -> Result<Plan, GraphError> {
        Plan::build(&self.graph, &self.resolver, &ident.into())
    }

    /// Computes `ident` and everything it depends on.
    pub fn get(&self, ident: impl Into<Ident>) -> Result<Value, ExecutionError> {
        self.get_with_diagnostics(ident).map(|outcome| outcome.value)
    }

    /// Computes `ident` and clones the result out as a `T`.
    pub fn get_as<T: Any + Clone>(&self, ident: impl Into<Ident>) -> Result<T, ExecutionError> {
        let ident = ident.into();
        let value = self.get(ident.clone())?;

        value.downcast::<T>().ok_or(ExecutionError::Type {
            ident,
            expected: std::any::type_name::<T>(),
            found: value.type_name(),
        })
    }

    pub fn get_with_diagnostics(&self, ident: impl Into<Ident>) -> Result<Outcome, ExecutionError> {
        let plan = self.plan(ident)?;
        tracing::debug!("Computing '{}' from {} node(s)", plan.target(), plan.len());
        self.executor.execute(&plan)
    }

    /// Computes the default key.
    pub fn get_default(&self) -> Result<Value, ExecutionError> {
        let ident = self.default_key.clone().ok_or(GraphError::NoDefault)?;
        self.get(ident)
    }

    /// Text tree of the computation behind `ident`.
    ///
    /// Unlike [`get`](Self::get) this never fails on missing references or
    /// cycles; they are shown in place.
    pub fn describe(&self, ident: impl Into<Ident>) -> String {
        let mut out = String::new();
        let mut path = HashSet::new();
        let ident = ident.into();

        match self.resolver.resolve(&self.graph, &ident) {
            Resolution::Exact(found) => self.describe_node(&mut out, &found, 0, &mut path),
            Resolution::Inferred(key) => self.describe_node(&mut out, &key.into(), 0, &mut path),
            Resolution::Ambiguous(candidates) => {
                let _ = writeln!(out, "'{ident}': <ambiguous: {} candidates>", candidates.len());
            }
            Resolution::NotFound => {
                let _ = writeln!(out, "'{ident}': <not found>");
            }
        }

        out
    }

    fn describe_node(&self, out: &mut String, ident: &Ident, depth: usize, path: &mut HashSet<Ident>) {
        let indent = "  ".repeat(depth);
        let bullet = if depth == 0 { "" } else { "- " };
        let prefix = format!("{indent}{bullet}'{ident}'");

        if !path.insert(ident.clone()) {
            let _ = writeln!(out, "{prefix}: <cycle>");
            return;
        }

        match self.graph.get(ident) {
            None => {
                let _ = writeln!(out, "{prefix}: <not found>");
            }
            Some(Entry::Data(value)) => {
                let _ = writeln!(out, "{prefix}: <data: {}>", value.type_name());
            }
            Some(Entry::Task(task)) => {
                let inner = "  ".repeat(depth + 1);
                let _ = writeln!(out, "{prefix}:");
                let _ = writeln!(out, "{inner}- {}", task.op_name());

                for arg in task.args() {
                    match arg {
                        Arg::Literal(value) => {
                            let _ = writeln!(out, "{inner}- <literal: {}>", value.type_name());
                        }
                        Arg::Ref(wanted) => match self.resolve(wanted) {
                            Ok(dep) => self.describe_node(out, &dep, depth + 1, path),
                            Err(_) => {
                                let _ = writeln!(out, "{inner}- '{wanted}': <unresolved>");
                            }
                        },
                    }
                }
            }
        }

        path.remove(ident);
    }

    /// Looks for a path from `task`'s dependencies back to `ident` through
    /// references that already resolve.
    fn find_cycle(&self, ident: &Ident, task: &Task) -> Option<Vec<Ident>> {
        let accept = |candidate: &Ident| candidate == ident || self.graph.contains(candidate);
        let resolve = |wanted: &Ident| {
            self.resolver
                .resolve_with(&self.graph, wanted, &accept)
                .into_result(wanted)
                .ok()
        };

        // dependency → the node that needs it
        let mut parent: HashMap<Ident, Ident> = HashMap::new();
        let mut stack = Vec::new();

        for dep in task.refs().filter_map(resolve) {
            if !parent.contains_key(&dep) {
                parent.insert(dep.clone(), ident.clone());
                stack.push(dep);
            }
        }

        while let Some(current) = stack.pop() {
            if &current == ident {
                let mut path = vec![ident.clone()];
                let mut cursor = &current;
                while let Some(next) = parent.get(cursor) {
                    path.push(next.clone());
                    if next == ident {
                        break;
                    }
                    cursor = next;
                }
                path.reverse();
                return Some(path);
            }

            let Some(Entry::Task(task)) = self.graph.get(&current) else {
                continue;
            };

            for dep in task.refs().filter_map(resolve) {
                if !parent.contains_key(&dep) {
                    parent.insert(dep.clone(), current.clone());
                    stack.push(dep);
                }
            }
        }

        None
    }
}

impl Debug for Computer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Computer")
            .field("graph", &self.graph)
            .field("default_key", &self.default_key)
            .finish_non_exhaustive()
    }
}

/// Mermaid `graph LR` rendering of every entry and every edge that resolves.
impl Display for Computer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "graph LR")?;

        let keys = self.keys();
        let ids: HashMap<&Ident, usize> = keys.iter().zip(0..).collect();

        for (id, ident) in keys.iter().enumerate() {
            let name = mermaid_escape(&ident.to_string());
            match self.graph.get(ident) {
                Some(Entry::Task(task)) => {
                    let op = mermaid_escape(&task.op_name());
                    writeln!(f, "    {id}[\"{name}\\n{op}\"]")?;
                }
                _ => writeln!(f, "    {id}[(\"{name}\")]")?,
            }
        }

        let mut missing = 0;
        for ident in &keys {
            let Some(Entry::Task(task)) = self.graph.get(ident) else {
                continue;
            };

            for wanted in task.refs() {
                let dep = self.resolve(wanted).ok();
                match dep.as_ref().and_then(|dep| ids.get(dep)) {
                    Some(dep) => writeln!(f, "    {dep} --> {}", ids[ident])?,
                    None => {
                        let label = mermaid_escape(&wanted.to_string());
                        writeln!(f, "    missing{missing}[\"{label}?\"] -.-> {}", ids[ident])?;
                        missing += 1;
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Sequential;
    use crate::task::Args;

    fn plus(args: &Args<'_>) -> anyhow::Result<Value> {
        Ok(Value::new(args.get::<i64>(0)? + args.get::<i64>(1)?))
    }

    fn first(args: &Args<'_>) -> anyhow::Result<Value> {
        Ok(args.value(0)?.clone())
    }

    fn computer() -> Computer {
        Computer::new().with_executor(Sequential)
    }

    #[test]
    fn test_deferred_dependencies() {
        let mut c = computer();
        c.add("c", plus, ["a", "b"]).unwrap();
        c.add_single("a", 2i64).unwrap();
        c.add_single("b", 3i64).unwrap();
        assert_eq!(c.get_as::<i64>("c").unwrap(), 5);

        c.add_single_with("a", 10i64, true).unwrap();
        assert_eq!(c.get_as::<i64>("c").unwrap(), 13);
    }

    #[test]
    fn test_collision() {
        let mut c = computer();
        c.add_single("a", 1i64).unwrap();

        let err = c.add_single("a", 2i64).unwrap_err();
        assert_eq!(err, GraphError::Collision("a".into()));

        let err = c.add("a", first, ["b"]).unwrap_err();
        assert_eq!(err, GraphError::Collision("a".into()));

        c.add_with("a", first, ["b"], AddOptions::default().overwrite(true))
            .unwrap();
        c.add_single("b", 7i64).unwrap();
        assert_eq!(c.get_as::<i64>("a").unwrap(), 7);
    }

    #[test]
    fn test_collision_ignores_dimension_order() {
        let mut c = computer();
        c.add_single("x:a-b", 1i64).unwrap();
        let err = c.add_single("x:b-a", 2i64).unwrap_err();
        assert!(matches!(err, GraphError::Collision(_)));
    }

    #[test]
    fn test_strict_requires_existing() {
        let mut c = computer();
        let strict = AddOptions::default().strict(true);

        let err = c.add_with("c", plus, ["a", "b"], strict).unwrap_err();
        assert_eq!(
            err,
            GraphError::NotFound {
                ident: "a".into(),
                needed_by: Some("c".into())
            }
        );
        assert!(!c.contains("c"));

        c.add_single("q:x-y", 1i64).unwrap();
        c.add_single("b", 1i64).unwrap();
        c.add_with("c", plus, ["q:x", "b"], strict).unwrap();

        // the partial reference was stored resolved
        let Some(Entry::Task(task)) = c.graph().get(&"c".into()) else {
            panic!("expected a task");
        };
        let refs: Vec<_> = task.refs().map(ToString::to_string).collect();
        assert_eq!(refs, ["q:x-y", "b"]);
    }

    #[test]
    fn test_check_keys() {
        let mut c = computer();
        c.add_single("quantity:a-b", 1i64).unwrap();

        let found = c.check_keys(["quantity:a"]).unwrap();
        assert_eq!(found, [Ident::from("quantity:a-b")]);

        c.add_single("quantity:a-c", 1i64).unwrap();
        let err = c.check_keys(["quantity:a"]).unwrap_err();
        let GraphError::Ambiguous { candidates, .. } = &err else {
            panic!("expected ambiguity, got {err}");
        };
        assert_eq!(candidates.len(), 2);
        assert!(err.to_string().contains("'quantity:a-b', 'quantity:a-c'"));

        let err = c.check_keys(["missing"]).unwrap_err();
        assert!(err.to_string().contains("'missing'"));
    }

    #[test]
    fn test_check_keys_with_predicate() {
        let mut c = computer();
        c.add_single("a", 1i64).unwrap();

        let planned = |ident: &Ident| ident.base_name() == "later";
        let found = c.check_keys_with(["later"], planned).unwrap();
        assert_eq!(found, [Ident::from("later")]);
        assert!(c.check_keys_with(["a"], planned).is_err());
    }

    #[test]
    fn test_infer_keys() {
        let mut c = computer();
        c.add_single("x:a-b-c", 1i64).unwrap();
        c.add_single("y", 1i64).unwrap();

        assert_eq!(c.infer_keys("x", ["b"]).unwrap().to_string(), "x:a-b-c");
        assert_eq!(c.full_key("x").unwrap().to_string(), "x:a-b-c");
        assert_eq!(c.full_key("y").unwrap().to_string(), "y");
        assert!(c.infer_keys("x", ["d"]).is_err());
    }

    #[test]
    fn test_partial_reference_at_get() {
        let mut c = computer();
        c.add("total", first, ["x:a"]).unwrap();
        c.add_single("x:a-b", 4i64).unwrap();
        assert_eq!(c.get_as::<i64>("total").unwrap(), 4);

        c.add_single("x:a-c", 5i64).unwrap();
        let err = c.get("total").unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::Graph(GraphError::Ambiguous { .. })
        ));
    }

    #[test]
    fn test_eager_cycle() {
        let mut c = computer();
        c.add("a", first, ["b"]).unwrap();

        let err = c.add("b", first, ["a"]).unwrap_err();
        assert_eq!(err, GraphError::Cycle(vec!["b".into(), "a".into(), "b".into()]));
        assert_eq!(err.to_string(), "Cycle in graph: b -> a -> b");

        let err = c.add("s", first, ["s"]).unwrap_err();
        assert_eq!(err, GraphError::Cycle(vec!["s".into(), "s".into()]));
    }

    #[test]
    fn test_lazy_cycle() {
        let mut c = computer();
        // `x:a` resolves only once `x:a-b` exists, after the fact
        c.add("y", first, ["x:a"]).unwrap();
        c.add("x:a-b", first, ["y"]).unwrap();

        let err = c.get("y").unwrap_err();
        let ExecutionError::Graph(GraphError::Cycle(path)) = err else {
            panic!("expected a cycle");
        };
        assert_eq!(path.first(), path.last());
        assert_eq!(path.len(), 3);
    }

    #[test]
    fn test_task_as_data() {
        let mut c = computer();
        let task = Task::new(first, ["a"]);
        let err = c.add_single("t", task).unwrap_err();
        assert_eq!(err, GraphError::TaskAsData("t".into()));
    }

    #[test]
    fn test_value_is_not_double_wrapped() {
        let mut c = computer();
        c.add_single("v", Value::new(3i64)).unwrap();
        assert_eq!(c.get_as::<i64>("v").unwrap(), 3);
    }

    #[test]
    fn test_literal_arguments() {
        let mut c = computer();
        c.add("c", plus, [Arg::from("a"), Arg::literal(10i64)]).unwrap();
        c.add_single("a", 1i64).unwrap();
        assert_eq!(c.get_as::<i64>("c").unwrap(), 11);
    }

    #[test]
    fn test_task_error_is_preserved() {
        #[derive(Debug, thiserror::Error)]
        #[error("negative input")]
        struct Negative;

        let check = crate::task::named("check", |args: &Args<'_>| {
            if *args.get::<i64>(0)? < 0 {
                return Err(Negative.into());
            }
            Ok(args.value(0)?.clone())
        });

        let mut c = computer();
        c.add("checked", check, ["n"]).unwrap();
        c.add_single("n", -1i64).unwrap();

        let err = c.get("checked").unwrap_err();
        assert_eq!(err.ident(), Some(&Ident::from("checked")));
        assert!(err.to_string().contains("using check"));

        let ExecutionError::Task { source, .. } = err else {
            panic!("expected a task error");
        };
        assert!(source.downcast_ref::<Negative>().is_some());
    }

    #[test]
    fn test_get_as_type_mismatch() {
        let mut c = computer();
        c.add_single("a", 1i64).unwrap();
        let err = c.get_as::<String>("a").unwrap_err();
        assert!(matches!(err, ExecutionError::Type { found: "i64", .. }));
    }

    #[test]
    fn test_alias_and_default() {
        let mut c = computer();
        c.add_single("a", 1i64).unwrap();
        c.add_alias("b", "a").unwrap();

        assert!(matches!(c.get_default(), Err(ExecutionError::Graph(GraphError::NoDefault))));

        c.set_default_key("b");
        assert_eq!(c.get_default().unwrap().downcast::<i64>(), Some(1));
    }

    #[test]
    fn test_plan_is_minimal() {
        let mut c = computer();
        c.add_single("a", 1i64).unwrap();
        c.add_single("b", 2i64).unwrap();
        c.add_single("unused", 3i64).unwrap();
        c.add("c", plus, ["a", "b"]).unwrap();

        let plan = c.plan("c").unwrap();
        assert_eq!(plan.len(), 3);
        assert!(!plan.contains(&"unused".into()));
        assert_eq!(plan.order().last(), Some(&Ident::from("c")));
    }

    #[test]
    fn test_describe() {
        let mut c = computer();
        c.add("c", crate::task::named("plus", plus), ["a", "b"]).unwrap();
        c.add_single("a", 1i64).unwrap();

        let text = c.describe("c");
        assert_eq!(
            text,
            "'c':\n  - plus\n  - 'a': <data: i64>\n  - 'b': <unresolved>\n"
        );
        assert_eq!(c.describe("zzz"), "'zzz': <not found>\n");
    }

    #[test]
    fn test_display_mermaid() {
        let mut c = computer();
        c.add("c", crate::task::named("plus", plus), ["a", "b"]).unwrap();
        c.add_single("a", 1i64).unwrap();
        c.add_single("b", 2i64).unwrap();

        let text = c.to_string();
        assert!(text.starts_with("graph LR\n"));
        assert!(text.contains("[\"c\\nplus\"]"));
        assert!(text.contains("0 --> 2"));
        assert!(text.contains("1 --> 2"));
    }

    #[test]
    fn test_remove_and_keys() {
        let mut c = computer();
        c.add_single("b", 1i64).unwrap();
        c.add_single("x:i", 1i64).unwrap();
        c.add_single("a", 1i64).unwrap();

        let keys: Vec<_> = c.keys().iter().map(ToString::to_string).collect();
        assert_eq!(keys, ["x:i", "a", "b"]);

        assert!(c.remove("x:i").is_some());
        assert!(c.full_key("x").is_err());
    }
}
