//! Wait-for graph used for deadlock detection.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::TxnName;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// `edges[a]` holds every transaction `a` is waiting on.
#[derive(Clone, Debug, Default)]
pub struct WaitForGraph {
    edges: BTreeMap<TxnName, BTreeSet<TxnName>>,
}

impl WaitForGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_edge(&mut self, from: &TxnName, to: &TxnName) {
        if from == to {
            return;
        }
        self.edges
            .entry(from.clone())
            .or_default()
            .insert(to.clone());
    }

    /// Drop `txn` and every edge that points at it.
    pub fn remove_node(&mut self, txn: &TxnName) {
        self.edges.remove(txn);
        for targets in self.edges.values_mut() {
            targets.remove(txn);
        }
        self.edges.retain(|_, targets| !targets.is_empty());
    }

    pub fn waits_for(&self, txn: &TxnName) -> Option<&BTreeSet<TxnName>> {
        self.edges.get(txn)
    }

    pub fn edges(&self) -> &BTreeMap<TxnName, BTreeSet<TxnName>> {
        &self.edges
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn has_edge(&self, from: &TxnName, to: &TxnName) -> bool {
        self.edges.get(from).is_some_and(|targets| targets.contains(to))
    }

    /// Find one cycle, returned in edge order (each member waits on the next,
    /// the last waits on the first). Nodes are explored in ascending name
    /// order so the result is deterministic.
    pub fn find_cycle(&self) -> Option<Vec<TxnName>> {
        let mut nodes = BTreeSet::<&TxnName>::new();
        for (from, targets) in &self.edges {
            nodes.insert(from);
            nodes.extend(targets.iter());
        }
        let nodes: Vec<&TxnName> = nodes.into_iter().collect();
        let n = nodes.len();
        if n == 0 {
            return None;
        }

        let mut index = HashMap::<&TxnName, usize>::with_capacity(n);
        for (i, name) in nodes.iter().enumerate() {
            index.insert(*name, i);
        }
        let mut adj: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (from, targets) in &self.edges {
            let Some(&i) = index.get(from) else {
                continue;
            };
            adj[i].extend(targets.iter().filter_map(|to| index.get(to).copied()));
        }

        let mut color = vec![Color::White; n];
        let mut parent: Vec<Option<usize>> = vec![None; n];

        for root in 0..n {
            if color[root] != Color::White {
                continue;
            }
            color[root] = Color::Gray;
            let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
            while let Some((node, next_idx)) = stack.pop() {
                if next_idx >= adj[node].len() {
                    color[node] = Color::Black;
                    continue;
                }
                let next = adj[node][next_idx];
                stack.push((node, next_idx + 1));
                match color[next] {
                    Color::White => {
                        color[next] = Color::Gray;
                        parent[next] = Some(node);
                        stack.push((next, 0));
                    }
                    Color::Gray => {
                        let members = walk_back(&parent, node, next)?;
                        return Some(members.into_iter().map(|i| nodes[i].clone()).collect());
                    }
                    Color::Black => {}
                }
            }
        }
        None
    }
}

/// Follow parent pointers from `from` up to the gray ancestor `to`; the
/// result starts at `to` and ends at `from`.
fn walk_back(parent: &[Option<usize>], from: usize, to: usize) -> Option<Vec<usize>> {
    let mut path = vec![from];
    let mut cur = from;
    while cur != to {
        cur = parent[cur]?;
        path.push(cur);
    }
    path.reverse();
    Some(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(name: &str) -> TxnName {
        TxnName::from(name)
    }

    fn graph(edges: &[(&str, &str)]) -> WaitForGraph {
        let mut g = WaitForGraph::new();
        for (from, to) in edges {
            g.add_edge(&t(from), &t(to));
        }
        g
    }

    fn assert_true_cycle(g: &WaitForGraph, cycle: &[TxnName]) {
        assert!(!cycle.is_empty());
        let unique: BTreeSet<&TxnName> = cycle.iter().collect();
        assert_eq!(unique.len(), cycle.len(), "cycle repeats a member: {cycle:?}");
        for pair in cycle.windows(2) {
            assert!(g.has_edge(&pair[0], &pair[1]), "missing edge in {cycle:?}");
        }
        let last = cycle.last().expect("non-empty");
        assert!(g.has_edge(last, &cycle[0]), "cycle not closed: {cycle:?}");
    }

    #[test]
    fn two_node_cycle_is_found() {
        let g = graph(&[("T1", "T2"), ("T2", "T1")]);
        let cycle = g.find_cycle().expect("cycle");
        assert_eq!(cycle, vec![t("T1"), t("T2")]);
    }

    #[test]
    fn acyclic_graph_has_no_cycle() {
        let g = graph(&[("T1", "T2"), ("T2", "T3"), ("T1", "T3"), ("T4", "T3")]);
        assert!(g.find_cycle().is_none());
        assert!(WaitForGraph::new().find_cycle().is_none());
    }

    #[test]
    fn self_edges_are_ignored() {
        let g = graph(&[("T1", "T1")]);
        assert!(g.is_empty());
    }

    #[test]
    fn cycle_behind_tail_excludes_tail() {
        let g = graph(&[("T0", "T1"), ("T1", "T2"), ("T2", "T3"), ("T3", "T1")]);
        let cycle = g.find_cycle().expect("cycle");
        assert_true_cycle(&g, &cycle);
        assert!(!cycle.contains(&t("T0")));
        assert_eq!(cycle.len(), 3);
    }

    #[test]
    fn multiple_back_edges_still_yield_a_true_cycle() {
        let g = graph(&[
            ("T1", "T2"),
            ("T2", "T3"),
            ("T3", "T1"),
            ("T3", "T2"),
            ("T2", "T4"),
            ("T4", "T1"),
            ("T5", "T4"),
        ]);
        let cycle = g.find_cycle().expect("cycle");
        assert_true_cycle(&g, &cycle);
    }

    #[test]
    fn removing_a_member_breaks_the_cycle() {
        let mut g = graph(&[("T1", "T2"), ("T2", "T3"), ("T3", "T1"), ("T4", "T3")]);
        g.remove_node(&t("T3"));
        assert!(g.find_cycle().is_none());
        assert!(g.waits_for(&t("T4")).is_none(), "T4 lost its only edge");
        assert!(g.has_edge(&t("T1"), &t("T2")));
    }
}
