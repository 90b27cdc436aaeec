//! Graph storage and execution plans.
//!
//! The [`Graph`] maps identifiers to entries: either literal data or a
//! [`Task`] whose references name other entries. References are stored as
//! written and resolved against the graph's contents only when a [`Plan`] is
//! built, so tasks may be declared before their dependencies.
//!
//! A [`Plan`] is the minimal subgraph needed for one target with every
//! reference already resolved. Under the hood it is a petgraph `DiGraph`
//! whose edges run from dependency to dependent; a topological sort both
//! orders the nodes and proves the absence of cycles.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt::{Debug, Display};
use std::sync::Arc;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::core::{ArcStr, Value};
use crate::error::{GraphError, KeyError};
use crate::key::Key;
use crate::resolve::Resolver;
use crate::task::{Arg, Operation, Task};

/// Identifier of a graph node: a [`Key`] or an opaque name.
///
/// A key without dimensions and tag is the same thing as a plain name and is
/// always stored as [`Ident::Name`], so `"a"` and `Key::parse("a")` refer to
/// the same node.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Ident {
    Key(Key),
    Name(ArcStr),
}

impl Ident {
    pub fn name(name: &str) -> Self {
        Ident::Name(name.into())
    }

    /// Strict parsing: anything containing `:` must be a well-formed key.
    pub fn parse(input: &str) -> Result<Self, KeyError> {
        if input.is_empty() {
            return Err(KeyError::malformed(input, "empty name"));
        }

        if input.contains(':') {
            Key::parse(input).map(Ident::from)
        } else {
            Ok(Ident::name(input))
        }
    }

    pub fn as_key(&self) -> Option<&Key> {
        match self {
            Ident::Key(key) => Some(key),
            Ident::Name(_) => None,
        }
    }

    /// The name part: the key's base name, or the whole name.
    pub fn base_name(&self) -> &str {
        match self {
            Ident::Key(key) => key.name(),
            Ident::Name(name) => name,
        }
    }

    /// This identifier seen as a key; names become dimensionless keys.
    ///
    /// Returns `None` for names that could never be a key, such as ones
    /// containing `:`.
    pub fn to_key(&self) -> Option<Key> {
        match self {
            Ident::Key(key) => Some(key.clone()),
            Ident::Name(name) => Key::new(&**name, std::iter::empty::<&str>(), None).ok(),
        }
    }
}

impl From<Key> for Ident {
    fn from(key: Key) -> Self {
        if key.dims().len() == 0 && key.tag().is_none() {
            Ident::Name(key.name().into())
        } else {
            Ident::Key(key)
        }
    }
}

impl From<&Key> for Ident {
    fn from(key: &Key) -> Self {
        key.clone().into()
    }
}

/// Lenient conversion: strings that parse as keys become keys, anything else
/// is kept as an opaque name. Use [`Ident::parse`] to reject malformed keys.
impl From<&str> for Ident {
    fn from(value: &str) -> Self {
        if value.contains(':') {
            match Key::parse(value) {
                Ok(key) => return key.into(),
                Err(err) => tracing::debug!("Treating '{value}' as a plain name: {err}"),
            }
        }

        Ident::name(value)
    }
}

impl From<String> for Ident {
    fn from(value: String) -> Self {
        value.as_str().into()
    }
}

impl From<&Ident> for Ident {
    fn from(value: &Ident) -> Self {
        value.clone()
    }
}

impl Display for Ident {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Ident::Key(key) => Display::fmt(key, f),
            Ident::Name(name) => f.write_str(name),
        }
    }
}

impl Debug for Ident {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Ident::Key(key) => Debug::fmt(key, f),
            Ident::Name(name) => write!(f, "{name:?}"),
        }
    }
}

impl Serialize for Ident {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Ident {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Ident::parse(&text).map_err(serde::de::Error::custom)
    }
}

/// What is stored under an identifier.
#[derive(Clone, Debug)]
pub enum Entry {
    Data(Value),
    Task(Task),
}

#[derive(Clone, Default)]
pub struct Graph {
    entries: HashMap<Ident, Entry>,
    /// Base name → every key identifier with that name.
    index: HashMap<ArcStr, BTreeSet<Key>>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, ident: &Ident) -> bool {
        self.entries.contains_key(ident)
    }

    pub fn get(&self, ident: &Ident) -> Option<&Entry> {
        self.entries.get(ident)
    }

    /// The identifier as stored, which may list dimensions in another order
    /// than the one used for the lookup.
    pub fn stored_ident(&self, ident: &Ident) -> Option<&Ident> {
        self.entries.get_key_value(ident).map(|(stored, _)| stored)
    }

    /// Inserts an entry. Without `overwrite`, an existing entry under the same
    /// identifier is an error; with it, the old entry is returned.
    pub fn insert(
        &mut self,
        ident: Ident,
        entry: Entry,
        overwrite: bool,
    ) -> Result<Option<Entry>, GraphError> {
        if !overwrite && self.entries.contains_key(&ident) {
            return Err(GraphError::Collision(ident));
        }

        // keep the newest spelling of the identifier
        let old = self.remove(&ident);

        if let Ident::Key(key) = &ident {
            self.index
                .entry(key.name().into())
                .or_default()
                .insert(key.clone());
        }

        self.entries.insert(ident, entry);
        Ok(old)
    }

    pub fn remove(&mut self, ident: &Ident) -> Option<Entry> {
        let (_, entry) = self.entries.remove_entry(ident)?;

        if let Ident::Key(key) = ident
            && let Some(keys) = self.index.get_mut(key.name())
        {
            keys.remove(key);
            if keys.is_empty() {
                self.index.remove(key.name());
            }
        }

        Some(entry)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Ident, &Entry)> {
        self.entries.iter()
    }

    pub fn idents(&self) -> impl Iterator<Item = &Ident> {
        self.entries.keys()
    }

    /// Every key identifier with the given base name, in key order.
    pub fn keys_named<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a Key> + 'a {
        self.index.get(name).into_iter().flatten()
    }
}

impl Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut idents: Vec<_> = self.entries.keys().collect();
        idents.sort();
        f.debug_struct("Graph").field("entries", &idents).finish()
    }
}

/// One argument of a planned task.
#[derive(Clone, Debug)]
pub enum Input {
    Node(Ident),
    Literal(Value),
}

/// A node of a [`Plan`].
#[derive(Clone)]
pub enum PlanNode {
    Data(Value),
    Task {
        op: Arc<dyn Operation>,
        inputs: Vec<Input>,
    },
}

impl Debug for PlanNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanNode::Data(value) => f.debug_tuple("Data").field(value).finish(),
            PlanNode::Task { op, inputs } => f
                .debug_struct("Task")
                .field("op", &op.name())
                .field("inputs", inputs)
                .finish(),
        }
    }
}

/// The validated, minimal subgraph for one target.
///
/// This is the whole contract with an [`Executor`](crate::Executor): a
/// mapping from identifier to literal or task with resolved inputs, a
/// dependency order, and the target to return.
#[derive(Debug)]
pub struct Plan {
    target: Ident,
    dag: DiGraph<Ident, ()>,
    index: HashMap<Ident, NodeIndex>,
    nodes: HashMap<Ident, PlanNode>,
    order: Vec<Ident>,
}

impl Plan {
    /// Walks the dependencies of `target`, resolving every reference, and
    /// verifies that the result is acyclic.
    pub fn build(graph: &Graph, resolver: &Resolver, target: &Ident) -> Result<Self, GraphError> {
        let target = resolver.resolve(graph, target).into_result(target)?;

        let mut dag = DiGraph::new();
        let mut index = HashMap::new();
        let mut nodes = HashMap::new();
        let mut queue = VecDeque::from([target.clone()]);

        index.insert(target.clone(), dag.add_node(target.clone()));

        while let Some(ident) = queue.pop_front() {
            let entry = graph.get(&ident).ok_or_else(|| GraphError::NotFound {
                ident: ident.clone(),
                needed_by: None,
            })?;

            let node = match entry {
                Entry::Data(value) => PlanNode::Data(value.clone()),
                Entry::Task(task) => {
                    let mut inputs = Vec::with_capacity(task.args.len());

                    for arg in &task.args {
                        match arg {
                            Arg::Literal(value) => inputs.push(Input::Literal(value.clone())),
                            Arg::Ref(wanted) => {
                                let dep = resolver
                                    .resolve(graph, wanted)
                                    .into_result(wanted)
                                    .map_err(|err| err.needed_by(&ident))?;

                                let dep_index = *index.entry(dep.clone()).or_insert_with(|| {
                                    queue.push_back(dep.clone());
                                    dag.add_node(dep.clone())
                                });

                                dag.update_edge(dep_index, index[&ident], ());
                                inputs.push(Input::Node(dep));
                            }
                        }
                    }

                    PlanNode::Task {
                        op: task.op.clone(),
                        inputs,
                    }
                }
            };

            nodes.insert(ident, node);
        }

        let order = match petgraph::algo::toposort(&dag, None) {
            Ok(order) => order.into_iter().map(|i| dag[i].clone()).collect(),
            Err(cycle) => return Err(GraphError::Cycle(trace_cycle(&dag, cycle.node_id()))),
        };

        Ok(Self {
            target,
            dag,
            index,
            nodes,
            order,
        })
    }

    pub fn target(&self) -> &Ident {
        &self.target
    }

    /// Every node in an order where dependencies come first.
    pub fn order(&self) -> &[Ident] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, ident: &Ident) -> bool {
        self.nodes.contains_key(ident)
    }

    pub fn node(&self, ident: &Ident) -> Option<&PlanNode> {
        self.nodes.get(ident)
    }

    /// The distinct nodes `ident` reads from.
    pub fn dependencies<'a>(&'a self, ident: &Ident) -> impl Iterator<Item = &'a Ident> + 'a {
        self.neighbors(ident, Direction::Incoming)
    }

    /// The distinct nodes reading from `ident`.
    pub fn dependents<'a>(&'a self, ident: &Ident) -> impl Iterator<Item = &'a Ident> + 'a {
        self.neighbors(ident, Direction::Outgoing)
    }

    fn neighbors<'a>(
        &'a self,
        ident: &Ident,
        direction: Direction,
    ) -> impl Iterator<Item = &'a Ident> + 'a {
        self.index
            .get(ident)
            .into_iter()
            .flat_map(move |&i| self.dag.neighbors_directed(i, direction))
            .map(|i| &self.dag[i])
    }
}

/// Finds a path `start -> … -> start` along dependencies, for the error
/// message. `start` is known to sit on a cycle.
fn trace_cycle(dag: &DiGraph<Ident, ()>, start: NodeIndex) -> Vec<Ident> {
    let mut parent: HashMap<NodeIndex, NodeIndex> = HashMap::new();
    let mut queue = VecDeque::from([start]);

    while let Some(node) = queue.pop_front() {
        for dep in dag.neighbors_directed(node, Direction::Incoming) {
            if dep == start {
                let mut path = vec![start];
                let mut cursor = node;
                while cursor != start {
                    path.push(cursor);
                    cursor = parent[&cursor];
                }
                path.push(start);
                path.reverse();
                return path.into_iter().map(|i| dag[i].clone()).collect();
            }

            if !parent.contains_key(&dep) {
                parent.insert(dep, node);
                queue.push_back(dep);
            }
        }
    }

    vec![dag[start].clone()]
}

impl GraphError {
    /// Attaches the node that needed a missing dependency.
    pub(crate) fn needed_by(self, parent: &Ident) -> Self {
        match self {
            GraphError::NotFound {
                ident,
                needed_by: None,
            } => GraphError::NotFound {
                ident,
                needed_by: Some(parent.clone()),
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lenient_and_strict_idents() {
        assert!(matches!(Ident::from("x:a-b"), Ident::Key(_)));
        assert_eq!(Ident::from("a"), Ident::from(Key::parse("a").unwrap()));

        let malformed = Ident::from("x:a--b");
        assert_eq!(malformed, Ident::name("x:a--b"));
        assert!(matches!(Ident::parse("x:a--b"), Err(KeyError::Malformed { .. })));
    }

    #[test]
    fn test_insert_keeps_index_current() {
        let mut graph = Graph::new();
        let entry = || Entry::Data(Value::new(1i64));

        graph.insert("x:a-b".into(), entry(), false).unwrap();
        graph.insert("x:c".into(), entry(), false).unwrap();
        assert_eq!(graph.keys_named("x").count(), 2);

        assert!(matches!(
            graph.insert("x:b-a".into(), entry(), false),
            Err(GraphError::Collision(_))
        ));
        graph.insert("x:b-a".into(), entry(), true).unwrap();
        assert_eq!(graph.stored_ident(&"x:a-b".into()), Some(&Ident::from("x:b-a")));

        graph.remove(&"x:c".into());
        graph.remove(&"x:a-b".into());
        assert_eq!(graph.keys_named("x").count(), 0);
        assert!(graph.is_empty());
    }
}
