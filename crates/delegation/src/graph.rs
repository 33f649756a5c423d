//! Directed graph of active delegation edges.
//!
//! Traversals use explicit stacks; nothing here recurses.

use std::collections::{BTreeMap, BTreeSet};

use polity_core::ActorId;

/// Multigraph over actors: two delegations between the same pair (different
/// scopes) count as two edges for in-degree but one for reachability.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DelegationGraph {
    out: BTreeMap<ActorId, BTreeMap<ActorId, usize>>,
    nodes: BTreeSet<ActorId>,
    edges: usize,
}

impl DelegationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_edges(edges: impl IntoIterator<Item = (ActorId, ActorId)>) -> Self {
        let mut graph = Self::new();
        for (from, to) in edges {
            graph.add_edge(from, to);
        }
        graph
    }

    pub fn add_edge(&mut self, from: ActorId, to: ActorId) {
        *self.out.entry(from).or_default().entry(to).or_insert(0) += 1;
        self.nodes.insert(from);
        self.nodes.insert(to);
        self.edges += 1;
    }

    /// Remove one `from -> to` edge. Returns false if none existed.
    pub fn remove_edge(&mut self, from: ActorId, to: ActorId) -> bool {
        let Some(targets) = self.out.get_mut(&from) else {
            return false;
        };
        let Some(count) = targets.get_mut(&to) else {
            return false;
        };
        *count -= 1;
        if *count == 0 {
            targets.remove(&to);
        }
        if targets.is_empty() {
            self.out.remove(&from);
        }
        self.edges -= 1;
        true
    }

    pub fn edge_count(&self) -> usize {
        self.edges
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ActorId> {
        self.nodes.iter()
    }

    /// Every edge, once per underlying delegation.
    pub fn edges(&self) -> impl Iterator<Item = (ActorId, ActorId)> + '_ {
        self.out.iter().flat_map(|(from, targets)| {
            targets
                .iter()
                .flat_map(move |(to, count)| std::iter::repeat_n((*from, *to), *count))
        })
    }

    pub fn successors(&self, node: ActorId) -> impl Iterator<Item = &ActorId> {
        self.out.get(&node).into_iter().flat_map(|t| t.keys())
    }

    /// Whether `to` is reachable from `from` (a node reaches itself).
    pub fn reaches(&self, from: ActorId, to: ActorId) -> bool {
        if from == to {
            return true;
        }
        let mut visited = BTreeSet::new();
        let mut stack = vec![from];
        while let Some(node) = stack.pop() {
            if !visited.insert(node) {
                continue;
            }
            for next in self.successors(node) {
                if *next == to {
                    return true;
                }
                if !visited.contains(next) {
                    stack.push(*next);
                }
            }
        }
        false
    }

    /// Adding `from -> to` closes a cycle iff `to` already reaches `from`.
    pub fn would_create_cycle(&self, from: ActorId, to: ActorId) -> bool {
        self.reaches(to, from)
    }

    /// Diagnostic: every cycle found by a full DFS, each as the list of nodes
    /// on it. Edges are only ever accepted after [`Self::would_create_cycle`],
    /// so a non-empty result means a defect, not a runtime state.
    pub fn find_cycles(&self) -> Vec<Vec<ActorId>> {
        #[derive(Copy, Clone, PartialEq, Eq)]
        enum Mark {
            OnPath,
            Done,
        }

        let mut marks: BTreeMap<ActorId, Mark> = BTreeMap::new();
        let mut cycles = Vec::new();

        for &root in &self.nodes {
            if marks.contains_key(&root) {
                continue;
            }
            // Frame: node plus its not-yet-explored successors.
            let mut path: Vec<ActorId> = Vec::new();
            let mut stack: Vec<(ActorId, Vec<ActorId>)> = Vec::new();
            marks.insert(root, Mark::OnPath);
            path.push(root);
            stack.push((root, self.successors(root).copied().collect()));

            while let Some((node, pending)) = stack.last_mut() {
                match pending.pop() {
                    Some(next) => match marks.get(&next) {
                        None => {
                            marks.insert(next, Mark::OnPath);
                            path.push(next);
                            let succ = self.successors(next).copied().collect();
                            stack.push((next, succ));
                        }
                        Some(Mark::OnPath) => {
                            if let Some(start) = path.iter().position(|n| *n == next) {
                                cycles.push(path[start..].to_vec());
                            }
                        }
                        Some(Mark::Done) => {}
                    },
                    None => {
                        marks.insert(*node, Mark::Done);
                        path.pop();
                        stack.pop();
                    }
                }
            }
        }

        cycles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn actors(n: usize) -> Vec<ActorId> {
        let mut v: Vec<ActorId> = (0..n).map(|_| ActorId::new()).collect();
        v.sort();
        v
    }

    #[test]
    fn reachability_follows_direction() {
        let a = actors(3);
        let graph = DelegationGraph::from_edges([(a[0], a[1]), (a[1], a[2])]);
        assert!(graph.reaches(a[0], a[2]));
        assert!(!graph.reaches(a[2], a[0]));
        assert!(graph.would_create_cycle(a[2], a[0]));
        assert!(!graph.would_create_cycle(a[0], a[2]));
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let a = actors(1);
        assert!(DelegationGraph::new().would_create_cycle(a[0], a[0]));
    }

    #[test]
    fn parallel_edges_count_separately() {
        let a = actors(2);
        let mut graph = DelegationGraph::from_edges([(a[0], a[1]), (a[0], a[1])]);
        assert_eq!(graph.edge_count(), 2);
        assert_eq!(graph.edges().count(), 2);
        assert!(graph.remove_edge(a[0], a[1]));
        assert!(graph.reaches(a[0], a[1]));
        assert!(graph.remove_edge(a[0], a[1]));
        assert!(!graph.reaches(a[0], a[1]));
        assert!(!graph.remove_edge(a[0], a[1]));
    }

    #[test]
    fn cycle_finder_reports_planted_cycle() {
        let a = actors(4);
        let graph = DelegationGraph::from_edges([(a[0], a[1]), (a[1], a[2]), (a[2], a[0]), (a[2], a[3])]);
        let cycles = graph.find_cycles();
        assert_eq!(cycles.len(), 1);
        let mut members = cycles[0].clone();
        members.sort();
        assert_eq!(members, vec![a[0], a[1], a[2]]);
    }

    #[test]
    fn cycle_finder_handles_long_chains() {
        let a = actors(10_000);
        let graph = DelegationGraph::from_edges(a.windows(2).map(|w| (w[0], w[1])));
        assert!(graph.find_cycles().is_empty());
        assert!(graph.reaches(a[0], a[9_999]));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: accepting only edges that pass `would_create_cycle`
        /// never yields a cycle, whatever the insertion order.
        #[test]
        fn guarded_insertion_stays_acyclic(
            proposals in prop::collection::vec((0usize..8, 0usize..8), 0..60)
        ) {
            let a = actors(8);
            let mut graph = DelegationGraph::new();
            for (from, to) in proposals {
                if !graph.would_create_cycle(a[from], a[to]) {
                    graph.add_edge(a[from], a[to]);
                }
            }
            prop_assert!(graph.find_cycles().is_empty());
        }
    }
}
