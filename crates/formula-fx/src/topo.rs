//! Dependency ordering.
//!
//! [`TopologicalSort`] is Kahn's algorithm over an explicit node set. Ready nodes are released in
//! the order they were added, so equal inputs always sort the same way.
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::hash::Hash;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TopoSortError<T: fmt::Debug> {
    /// Nodes still waiting on a predecessor when no node was ready. Nothing is ordered.
    #[error("dependency cycle among {0:?}")]
    Cycle(Vec<T>),
    /// An edge names a node that was never added.
    #[error("edge refers to unknown node {0:?}")]
    UnknownNode(T),
}

#[derive(Clone, Debug)]
pub struct TopologicalSort<T> {
    nodes: Vec<T>,
    index: HashMap<T, usize>,
    edges: Vec<(T, T)>,
}

impl<T> Default for TopologicalSort<T> {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            index: HashMap::new(),
            edges: Vec::new(),
        }
    }
}

impl<T> TopologicalSort<T>
where
    T: Clone + Eq + Hash + fmt::Debug,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node. Adding the same node twice is a no-op.
    pub fn add_node(&mut self, node: T) {
        if !self.index.contains_key(&node) {
            self.index.insert(node.clone(), self.nodes.len());
            self.nodes.push(node);
        }
    }

    /// Require `first` to come before `then`. Unknown endpoints are reported by [`Self::try_sort`].
    pub fn add_edge(&mut self, first: T, then: T) {
        self.edges.push((first, then));
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn try_sort(&self) -> Result<Vec<T>, TopoSortError<T>> {
        let mut successors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); self.nodes.len()];
        for (first, then) in &self.edges {
            let from = self.lookup(first)?;
            let to = self.lookup(then)?;
            successors[from].insert(to);
        }

        let mut in_degree = vec![0usize; self.nodes.len()];
        for targets in &successors {
            for &to in targets {
                in_degree[to] += 1;
            }
        }

        let mut ready: BTreeSet<usize> = (0..self.nodes.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(next) = ready.pop_first() {
            order.push(next);
            for &to in &successors[next] {
                in_degree[to] -= 1;
                if in_degree[to] == 0 {
                    ready.insert(to);
                }
            }
        }

        if order.len() != self.nodes.len() {
            let remaining = (0..self.nodes.len())
                .filter(|&i| in_degree[i] > 0)
                .map(|i| self.nodes[i].clone())
                .collect();
            return Err(TopoSortError::Cycle(remaining));
        }
        Ok(order.into_iter().map(|i| self.nodes[i].clone()).collect())
    }

    fn lookup(&self, node: &T) -> Result<usize, TopoSortError<T>> {
        self.index
            .get(node)
            .copied()
            .ok_or_else(|| TopoSortError::UnknownNode(node.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn ties_keep_insertion_order() {
        let mut sort = TopologicalSort::new();
        for node in ["c", "a", "b"] {
            sort.add_node(node);
        }
        sort.add_edge("b", "c");
        assert_eq!(sort.try_sort(), Ok(vec!["a", "b", "c"]));
    }

    #[test]
    fn cycle_reports_only_blocked_nodes() {
        let mut sort = TopologicalSort::new();
        for node in 1..=4 {
            sort.add_node(node);
        }
        sort.add_edge(1, 2);
        sort.add_edge(2, 3);
        sort.add_edge(3, 2);
        assert_eq!(sort.try_sort(), Err(TopoSortError::Cycle(vec![2, 3])));
    }

    #[test]
    fn unknown_node_is_not_a_cycle() {
        let mut sort = TopologicalSort::new();
        sort.add_node("a");
        sort.add_edge("a", "missing");
        assert_eq!(sort.try_sort(), Err(TopoSortError::UnknownNode("missing")));
    }

    proptest! {
        #[test]
        fn acyclic_inputs_respect_every_edge(
            n in 1usize..24,
            raw in proptest::collection::vec((0usize..24, 0usize..24), 0..64),
        ) {
            let mut sort = TopologicalSort::new();
            for node in 0..n {
                sort.add_node(node);
            }
            // Edges only go from lower to higher numbers, so the graph is acyclic.
            let edges: Vec<(usize, usize)> = raw
                .into_iter()
                .map(|(a, b)| (a % n, b % n))
                .filter(|(a, b)| a < b)
                .collect();
            for &(a, b) in &edges {
                sort.add_edge(a, b);
            }

            let order = sort.try_sort().unwrap();
            prop_assert_eq!(order.len(), n);
            let position: HashMap<usize, usize> =
                order.iter().enumerate().map(|(i, node)| (*node, i)).collect();
            for (a, b) in edges {
                prop_assert!(position[&a] < position[&b]);
            }
        }

        #[test]
        fn a_back_edge_always_fails_without_partial_order(n in 2usize..16) {
            let mut sort = TopologicalSort::new();
            for node in 0..n {
                sort.add_node(node);
            }
            for node in 1..n {
                sort.add_edge(node - 1, node);
            }
            sort.add_edge(n - 1, 0);

            let err = sort.try_sort().unwrap_err();
            prop_assert_eq!(err, TopoSortError::Cycle((0..n).collect()));
        }
    }
}
