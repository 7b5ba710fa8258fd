//! Node selection strategies.
//!
//! A [`NodePick`] describes *how* to choose among a capability's nodes; its
//! [`picker`](NodePick::picker) method binds that policy to a concrete node
//! snapshot and returns a stateful cursor. Callers interleave `pick()` with
//! network I/O and call it again after a failure to get the next candidate.

use std::fmt;
use std::sync::Arc;

use px_domain::{Error, Result, ServiceNode};
use rand::Rng;

/// One candidate yielded by a [`NodePicker`].
#[derive(Debug, Clone)]
pub struct Picked {
    /// Position of the node in the snapshot the picker was built over.
    pub index: usize,
    pub node: ServiceNode,
    /// Whether another candidate remains after this one.
    pub has_more: bool,
}

/// Stateful cursor over a node snapshot.
pub trait NodePicker: Send {
    /// Next candidate, or `NoNodesAvailable` / `NodeNotFound` once nothing
    /// (more) matches.
    fn pick(&mut self) -> Result<Picked>;
}

type NodeFilter = dyn Fn(&ServiceNode) -> bool + Send + Sync;

/// Node selection policy. Defaults to [`NodePick::Ordered`].
#[derive(Clone, Default)]
pub enum NodePick {
    /// Lookup order.
    #[default]
    Ordered,
    /// Random permutation without replacement.
    Random,
    /// Only these positions, visited in ascending order. Out-of-range
    /// positions are ignored.
    Index(Vec<usize>),
    /// Only nodes whose `nodeName` is listed.
    Name(Vec<String>),
    /// Only nodes satisfying the predicate.
    Predicate(Arc<NodeFilter>),
}

impl NodePick {
    pub fn index(i: usize) -> Self {
        NodePick::Index(vec![i])
    }

    pub fn name(name: impl Into<String>) -> Self {
        NodePick::Name(vec![name.into()])
    }

    pub fn predicate(f: impl Fn(&ServiceNode) -> bool + Send + Sync + 'static) -> Self {
        NodePick::Predicate(Arc::new(f))
    }

    /// Bind this policy to a node snapshot.
    pub fn picker(&self, nodes: Arc<Vec<ServiceNode>>) -> Box<dyn NodePicker> {
        match self {
            NodePick::Ordered => Box::new(FilterPicker::new(nodes, "any node", |_, _| true)),
            NodePick::Random => Box::new(RandomPicker::new(nodes)),
            NodePick::Index(indices) => {
                let indices = indices.clone();
                let what = format!("index {indices:?}");
                Box::new(FilterPicker::new(nodes, what, move |i, _| indices.contains(&i)))
            }
            NodePick::Name(names) => {
                let names = names.clone();
                let what = names.join(", ");
                Box::new(FilterPicker::new(nodes, what, move |_, n| {
                    names.iter().any(|name| *name == n.node_name)
                }))
            }
            NodePick::Predicate(f) => {
                let f = Arc::clone(f);
                Box::new(FilterPicker::new(nodes, "predicate", move |_, n| f(n)))
            }
        }
    }
}

impl fmt::Debug for NodePick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodePick::Ordered => f.write_str("Ordered"),
            NodePick::Random => f.write_str("Random"),
            NodePick::Index(i) => f.debug_tuple("Index").field(i).finish(),
            NodePick::Name(n) => f.debug_tuple("Name").field(n).finish(),
            NodePick::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

// ── filter-based pickers (ordered / index / name / predicate) ───────

struct FilterPicker<F> {
    nodes: Arc<Vec<ServiceNode>>,
    filter: F,
    cursor: usize,
    what: String,
}

impl<F> FilterPicker<F>
where
    F: Fn(usize, &ServiceNode) -> bool + Send,
{
    fn new(nodes: Arc<Vec<ServiceNode>>, what: impl Into<String>, filter: F) -> Self {
        Self {
            nodes,
            filter,
            cursor: 0,
            what: what.into(),
        }
    }

    fn next_match(&self, from: usize) -> Option<usize> {
        (from..self.nodes.len()).find(|&i| (self.filter)(i, &self.nodes[i]))
    }
}

impl<F> NodePicker for FilterPicker<F>
where
    F: Fn(usize, &ServiceNode) -> bool + Send,
{
    fn pick(&mut self) -> Result<Picked> {
        if self.nodes.is_empty() {
            return Err(Error::NoNodesAvailable);
        }
        let index = self
            .next_match(self.cursor)
            .ok_or_else(|| Error::NodeNotFound(self.what.clone()))?;
        self.cursor = index + 1;
        Ok(Picked {
            index,
            node: self.nodes[index].clone(),
            has_more: self.next_match(self.cursor).is_some(),
        })
    }
}

// ── random ──────────────────────────────────────────────────────────

struct RandomPicker {
    nodes: Arc<Vec<ServiceNode>>,
    remaining: Vec<usize>,
}

impl RandomPicker {
    fn new(nodes: Arc<Vec<ServiceNode>>) -> Self {
        let remaining = (0..nodes.len()).collect();
        Self { nodes, remaining }
    }
}

impl NodePicker for RandomPicker {
    fn pick(&mut self) -> Result<Picked> {
        if self.remaining.is_empty() {
            return Err(Error::NoNodesAvailable);
        }
        let slot = rand::thread_rng().gen_range(0..self.remaining.len());
        let index = self.remaining.swap_remove(slot);
        Ok(Picked {
            index,
            node: self.nodes[index].clone(),
            has_more: !self.remaining.is_empty(),
        })
    }
}
