//! Reference resolution.
//!
//! A reference names a node either exactly or by a subset of its dimensions.
//! Resolution tries a chain of [`Strategy`] values in order and stops at the
//! first one that finds something; the outcome is a tagged [`Resolution`]
//! rather than an error so that callers can choose how to react.

use std::sync::Arc;

use crate::error::GraphError;
use crate::graph::{Graph, Ident};
use crate::key::Key;

/// Outcome of resolving one reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The reference names an existing node as written.
    Exact(Ident),
    /// The reference was a partial key and exactly one full key matched.
    Inferred(Key),
    /// Several full keys match; all of them, sorted.
    Ambiguous(Vec<Key>),
    NotFound,
}

impl Resolution {
    pub fn is_found(&self) -> bool {
        matches!(self, Resolution::Exact(_) | Resolution::Inferred(_))
    }

    pub fn into_result(self, wanted: &Ident) -> Result<Ident, GraphError> {
        match self {
            Resolution::Exact(ident) => Ok(ident),
            Resolution::Inferred(key) => Ok(key.into()),
            Resolution::Ambiguous(candidates) => Err(GraphError::Ambiguous {
                ident: wanted.clone(),
                candidates,
            }),
            Resolution::NotFound => Err(GraphError::NotFound {
                ident: wanted.clone(),
                needed_by: None,
            }),
        }
    }
}

/// One way of matching a reference against the graph.
///
/// `accept` decides whether a concrete identifier counts as present; by
/// default this is membership in the graph.
pub trait Strategy: Send + Sync {
    fn resolve(&self, graph: &Graph, wanted: &Ident, accept: &dyn Fn(&Ident) -> bool)
    -> Resolution;
}

/// The reference is accepted as written.
#[derive(Debug, Clone, Copy, Default)]
pub struct Exact;

impl Strategy for Exact {
    fn resolve(
        &self,
        graph: &Graph,
        wanted: &Ident,
        accept: &dyn Fn(&Ident) -> bool,
    ) -> Resolution {
        if accept(wanted) {
            let stored = graph.stored_ident(wanted).unwrap_or(wanted);
            Resolution::Exact(stored.clone())
        } else {
            Resolution::NotFound
        }
    }
}

/// The reference's dimensions are a subset of a full key's dimensions.
///
/// Candidates must share the base name and the tag; a tagged reference never
/// matches an untagged key or the other way round.
#[derive(Debug, Clone, Copy, Default)]
pub struct Subset;

impl Strategy for Subset {
    fn resolve(
        &self,
        graph: &Graph,
        wanted: &Ident,
        accept: &dyn Fn(&Ident) -> bool,
    ) -> Resolution {
        let Some(wanted) = wanted.to_key() else {
            return Resolution::NotFound;
        };

        let mut candidates: Vec<Key> = graph
            .keys_named(wanted.name())
            .filter(|key| key.tag() == wanted.tag())
            .filter(|key| key.covers(wanted.dims()))
            .filter(|key| accept(&Ident::Key((*key).clone())))
            .cloned()
            .collect();

        match candidates.len() {
            0 => Resolution::NotFound,
            1 => {
                let key = candidates.remove(0);
                tracing::debug!("Inferred '{key}' for '{wanted}'");
                Resolution::Inferred(key)
            }
            _ => {
                candidates.sort();
                Resolution::Ambiguous(candidates)
            }
        }
    }
}

/// An ordered chain of strategies.
#[derive(Clone)]
pub struct Resolver {
    strategies: Vec<Arc<dyn Strategy>>,
}

impl Default for Resolver {
    fn default() -> Self {
        Self {
            strategies: vec![Arc::new(Exact), Arc::new(Subset)],
        }
    }
}

impl Resolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// A resolver that tries nothing; add strategies with [`push`](Self::push).
    pub fn empty() -> Self {
        Self {
            strategies: Vec::new(),
        }
    }

    pub fn push(&mut self, strategy: impl Strategy + 'static) -> &mut Self {
        self.strategies.push(Arc::new(strategy));
        self
    }

    /// Resolves against the current contents of `graph`.
    pub fn resolve(&self, graph: &Graph, wanted: &Ident) -> Resolution {
        self.resolve_with(graph, wanted, &|ident| graph.contains(ident))
    }

    pub fn resolve_with(
        &self,
        graph: &Graph,
        wanted: &Ident,
        accept: &dyn Fn(&Ident) -> bool,
    ) -> Resolution {
        for strategy in &self.strategies {
            match strategy.resolve(graph, wanted, accept) {
                Resolution::NotFound => continue,
                found => return found,
            }
        }

        Resolution::NotFound
    }
}
