//! Waits-for graph for deadlock detection. Rebuilt from the lock queues on
//! every detection pass; edge `u -> v` means transaction `u` is waiting for
//! a lock that `v` holds.

use std::collections::{HashMap, HashSet};

use crate::common::types::TxnId;

#[derive(Default)]
pub struct WaitsForGraph {
    edges: HashMap<TxnId, Vec<TxnId>>,
}

impl WaitsForGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_edge(&mut self, from: TxnId, to: TxnId) {
        let targets = self.edges.entry(from).or_default();
        if !targets.contains(&to) {
            targets.push(to);
        }
    }

    pub fn edge_list(&self) -> Vec<(TxnId, TxnId)> {
        let mut list: Vec<(TxnId, TxnId)> = self
            .edges
            .iter()
            .flat_map(|(&from, targets)| targets.iter().map(move |&to| (from, to)))
            .collect();
        list.sort_unstable();
        list
    }

    /// Search for a cycle, exploring nodes and edges in ascending txn id
    /// order, and return the victim: the highest txn id on the first cycle
    /// found. Returns None when the graph is acyclic.
    pub fn find_victim(&self) -> Option<TxnId> {
        let mut nodes: Vec<TxnId> = self.edges.keys().copied().collect();
        nodes.sort_unstable();

        let mut visited: HashSet<TxnId> = HashSet::new();
        for &start in &nodes {
            if visited.contains(&start) {
                continue;
            }
            let mut path: Vec<TxnId> = Vec::new();
            let mut on_path: HashSet<TxnId> = HashSet::new();
            if let Some(victim) = self.dfs(start, &mut visited, &mut path, &mut on_path) {
                return Some(victim);
            }
        }
        None
    }

    fn dfs(
        &self,
        node: TxnId,
        visited: &mut HashSet<TxnId>,
        path: &mut Vec<TxnId>,
        on_path: &mut HashSet<TxnId>,
    ) -> Option<TxnId> {
        visited.insert(node);
        path.push(node);
        on_path.insert(node);

        let mut targets = self.edges.get(&node).cloned().unwrap_or_default();
        targets.sort_unstable();
        for next in targets {
            if on_path.contains(&next) {
                // The cycle is the path suffix starting at `next`.
                let cycle_start = path.iter().position(|&t| t == next).expect("node on path");
                let victim = path[cycle_start..].iter().copied().max().expect("nonempty cycle");
                return Some(victim);
            }
            if !visited.contains(&next) {
                if let Some(victim) = self.dfs(next, visited, path, on_path) {
                    return Some(victim);
                }
            }
        }

        path.pop();
        on_path.remove(&node);
        None
    }
}
