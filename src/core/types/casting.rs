//! Directed graph of registered converters and the composed-path cache.

use petgraph::Direction;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use crate::core::error::TypeError;
use crate::core::value::Value;

/// A single registered converter.
pub type CastFn = Arc<dyn Fn(Value) -> Result<Value, String> + Send + Sync>;

/// The shortest chain of converters between two types, composed into one step.
#[derive(Clone)]
pub struct CastingPath {
    types: Vec<String>,
    steps: Vec<CastFn>,
}

impl CastingPath {
    /// The type ids visited, source first and target last.
    pub fn types(&self) -> &[String] {
        &self.types
    }

    /// Number of converters applied.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_identity(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn apply(&self, value: Value) -> Result<Value, TypeError> {
        let mut value = value;
        for (i, step) in self.steps.iter().enumerate() {
            value = step(value).map_err(|reason| TypeError::CastFailed {
                from: self.types[i].clone(),
                to: self.types[i + 1].clone(),
                reason,
            })?;
        }
        Ok(value)
    }
}

impl fmt::Debug for CastingPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CastingPath({})", self.types.join(" -> "))
    }
}

#[derive(Default)]
pub(crate) struct CastGraph {
    graph: DiGraph<String, CastFn>,
    index: HashMap<String, NodeIndex>,
    cache: HashMap<(String, String), CastingPath>,
}

impl CastGraph {
    pub(crate) fn add_type(&mut self, id: &str) {
        if !self.index.contains_key(id) {
            let idx = self.graph.add_node(id.to_string());
            self.index.insert(id.to_string(), idx);
        }
    }

    pub(crate) fn add_edge(&mut self, from: &str, to: &str, convert: CastFn) -> Result<(), TypeError> {
        let a = self.node(from)?;
        let b = self.node(to)?;
        match self.graph.find_edge(a, b) {
            Some(existing) => {
                log::warn!("Cast from '{}' to '{}' was already registered, replacing it.", from, to);
                self.graph[existing] = convert;
            }
            None => {
                self.graph.add_edge(a, b, convert);
            }
        }
        self.cache.clear();
        Ok(())
    }

    pub(crate) fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub(crate) fn cached(&self, from: &str, to: &str) -> Option<CastingPath> {
        self.cache.get(&(from.to_string(), to.to_string())).cloned()
    }

    #[cfg(test)]
    pub(crate) fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Computes (and caches) the composed path from `from` to `to`.
    pub(crate) fn path(&mut self, from: &str, to: &str) -> Result<CastingPath, TypeError> {
        if let Some(path) = self.cached(from, to) {
            return Ok(path);
        }
        let start = self.node(from)?;
        let goal = self.node(to)?;
        let edges = self.shortest(start, goal).ok_or_else(|| TypeError::NoCastingPath {
            from: from.to_string(),
            to: to.to_string(),
        })?;

        let mut types = vec![self.graph[start].clone()];
        let mut steps = Vec::with_capacity(edges.len());
        for edge in edges {
            if let Some((_, target)) = self.graph.edge_endpoints(edge) {
                types.push(self.graph[target].clone());
                steps.push(self.graph[edge].clone());
            }
        }
        let path = CastingPath { types, steps };
        self.cache
            .insert((from.to_string(), to.to_string()), path.clone());
        Ok(path)
    }

    fn node(&self, id: &str) -> Result<NodeIndex, TypeError> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| TypeError::UnknownType(id.to_string()))
    }

    /// Breadth-first search over outgoing edges, earliest registered edge first.
    fn shortest(&self, start: NodeIndex, goal: NodeIndex) -> Option<Vec<EdgeIndex>> {
        if start == goal {
            return Some(Vec::new());
        }
        let mut visited = HashSet::from([start]);
        let mut via: HashMap<NodeIndex, EdgeIndex> = HashMap::new();
        let mut queue = VecDeque::from([start]);

        while let Some(current) = queue.pop_front() {
            let mut outgoing: Vec<_> = self
                .graph
                .edges_directed(current, Direction::Outgoing)
                .map(|e| (e.id(), e.target()))
                .collect();
            outgoing.sort_by_key(|(id, _)| *id);
            for (edge, target) in outgoing {
                if !visited.insert(target) {
                    continue;
                }
                via.insert(target, edge);
                if target == goal {
                    let mut chain = vec![edge];
                    let mut node = current;
                    while node != start {
                        let prev = via[&node];
                        chain.push(prev);
                        node = self.graph.edge_endpoints(prev)?.0;
                    }
                    chain.reverse();
                    return Some(chain);
                }
                queue.push_back(target);
            }
        }
        None
    }
}
