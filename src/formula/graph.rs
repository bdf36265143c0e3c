//! Formula dependency graph: incremental edges, cycle detection, and
//! topological scheduling (spec §4.7 "Graph construction" /
//! "Cycle detection" / "Topological scheduling").
//!
//! Grounded on `TXFormulaManager` in
//! `examples/original_source/include/TinaXlsx/TXFormulaManager.hpp`
//! (dependency/dependent adjacency maps maintained incrementally on
//! formula set/clear) but reworked as a plain graph over `CellRef` nodes
//! instead of an owning manager, so it composes with this crate's
//! per-worksheet `CellStore` rather than replacing it.

use std::collections::{HashMap, HashSet};

use crate::coord::Coordinate;

/// A cell identified by sheet name and coordinate — the formula graph's
/// node type, since references can cross sheets (spec §4.7 `Sheet!A1`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellRef {
    pub sheet: String,
    pub coord: Coordinate,
}

impl CellRef {
    pub fn new(sheet: impl Into<String>, coord: Coordinate) -> Self {
        Self {
            sheet: sheet.into(),
            coord,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Grey,
    Black,
}

/// Directed dependency graph: an edge `a -> b` means "`a`'s formula reads
/// `b`'s value".
#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// Outgoing edges: formula cell -> cells it reads.
    dependencies: HashMap<CellRef, HashSet<CellRef>>,
    /// Incoming edges: cell -> formula cells that read it.
    dependents: HashMap<CellRef, HashSet<CellRef>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace `cell`'s outgoing edges with `deps`, maintained
    /// incrementally (spec §4.7, "Maintained incrementally on `set_formula`").
    pub fn set_formula(&mut self, cell: CellRef, deps: impl IntoIterator<Item = CellRef>) {
        self.clear_formula(&cell);
        let deps: HashSet<CellRef> = deps.into_iter().collect();
        for dep in &deps {
            self.dependents.entry(dep.clone()).or_default().insert(cell.clone());
        }
        self.dependencies.insert(cell, deps);
    }

    /// Remove `cell`'s formula edges entirely (spec §4.7, "invalidated on
    /// `clear`").
    pub fn clear_formula(&mut self, cell: &CellRef) {
        if let Some(deps) = self.dependencies.remove(cell) {
            for dep in deps {
                if let Some(set) = self.dependents.get_mut(&dep) {
                    set.remove(cell);
                }
            }
        }
    }

    pub fn dependencies_of(&self, cell: &CellRef) -> impl Iterator<Item = &CellRef> {
        self.dependencies.get(cell).into_iter().flatten()
    }

    pub fn dependents_of(&self, cell: &CellRef) -> impl Iterator<Item = &CellRef> {
        self.dependents.get(cell).into_iter().flatten()
    }

    fn all_nodes(&self) -> HashSet<CellRef> {
        let mut nodes: HashSet<CellRef> = self.dependencies.keys().cloned().collect();
        nodes.extend(self.dependents.keys().cloned());
        for deps in self.dependencies.values() {
            nodes.extend(deps.iter().cloned());
        }
        nodes
    }

    /// Three-colour DFS cycle detection from every formula cell. Returns
    /// the cycle path (starting at the discovered grey node) on the first
    /// cycle found, or `None` if the graph is acyclic (spec §4.7).
    pub fn detect_cycle(&self) -> Option<Vec<CellRef>> {
        let mut color: HashMap<CellRef, Color> = HashMap::new();
        let mut stack: Vec<CellRef> = Vec::new();
        let mut nodes: Vec<CellRef> = self.all_nodes().into_iter().collect();
        nodes.sort();
        for node in nodes {
            if color.get(&node).copied().unwrap_or(Color::White) == Color::White {
                if let Some(cycle) = self.dfs_detect(&node, &mut color, &mut stack) {
                    tracing::warn!(cells = cycle.len(), first = ?cycle[0], "circular reference detected");
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn dfs_detect(
        &self,
        node: &CellRef,
        color: &mut HashMap<CellRef, Color>,
        stack: &mut Vec<CellRef>,
    ) -> Option<Vec<CellRef>> {
        color.insert(node.clone(), Color::Grey);
        stack.push(node.clone());
        if let Some(deps) = self.dependencies.get(node) {
            let mut deps: Vec<&CellRef> = deps.iter().collect();
            deps.sort();
            for dep in deps {
                match color.get(dep).copied().unwrap_or(Color::White) {
                    Color::White => {
                        if let Some(cycle) = self.dfs_detect(dep, color, stack) {
                            return Some(cycle);
                        }
                    }
                    Color::Grey => {
                        let start = stack.iter().position(|c| c == dep).unwrap_or(0);
                        let mut cycle: Vec<CellRef> = stack[start..].to_vec();
                        cycle.push(dep.clone());
                        return Some(cycle);
                    }
                    Color::Black => {}
                }
            }
        }
        stack.pop();
        color.insert(node.clone(), Color::Black);
        None
    }

    /// DFS post-order producing a total order consistent with edges (a
    /// topological order): every dependency appears before the formula
    /// that reads it. Errors with the offending cycle if one exists (spec
    /// §4.7 "Topological scheduling").
    pub fn topo_order(&self) -> Result<Vec<CellRef>, Vec<CellRef>> {
        if let Some(cycle) = self.detect_cycle() {
            return Err(cycle);
        }
        let mut visited: HashSet<CellRef> = HashSet::new();
        let mut order: Vec<CellRef> = Vec::new();
        let mut nodes: Vec<CellRef> = self.all_nodes().into_iter().collect();
        nodes.sort();
        for node in nodes {
            if !visited.contains(&node) {
                self.dfs_postorder(&node, &mut visited, &mut order);
            }
        }
        Ok(order)
    }

    fn dfs_postorder(&self, node: &CellRef, visited: &mut HashSet<CellRef>, order: &mut Vec<CellRef>) {
        visited.insert(node.clone());
        if let Some(deps) = self.dependencies.get(node) {
            let mut deps: Vec<&CellRef> = deps.iter().collect();
            deps.sort();
            for dep in deps {
                if !visited.contains(dep) {
                    self.dfs_postorder(dep, visited, order);
                }
            }
        }
        order.push(node.clone());
    }

    /// Every formula cell transitively reachable by walking dependents
    /// from `cell` (inclusive), used for `recalc_dependents` (spec §4.7).
    pub fn reverse_reachable(&self, cell: &CellRef) -> HashSet<CellRef> {
        let mut seen = HashSet::new();
        let mut stack = vec![cell.clone()];
        while let Some(node) = stack.pop() {
            if seen.insert(node.clone()) {
                for dependent in self.dependents_of(&node) {
                    stack.push(dependent.clone());
                }
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(row: u32, col: u32) -> CellRef {
        CellRef::new("Sheet1", Coordinate::new(row, col))
    }

    #[test]
    fn acyclic_graph_has_no_cycle() {
        let mut g = DependencyGraph::new();
        g.set_formula(cell(2, 1), [cell(1, 1)]);
        assert!(g.detect_cycle().is_none());
        let order = g.topo_order().unwrap();
        assert!(order.iter().position(|c| *c == cell(1, 1)) < order.iter().position(|c| *c == cell(2, 1)));
    }

    #[test]
    fn detects_direct_cycle() {
        let mut g = DependencyGraph::new();
        g.set_formula(cell(1, 1), [cell(2, 1)]);
        g.set_formula(cell(2, 1), [cell(1, 1)]);
        assert!(g.detect_cycle().is_some());
        assert!(g.topo_order().is_err());
    }

    #[test]
    fn clear_formula_removes_edges() {
        let mut g = DependencyGraph::new();
        g.set_formula(cell(2, 1), [cell(1, 1)]);
        g.clear_formula(&cell(2, 1));
        assert_eq!(g.dependencies_of(&cell(2, 1)).count(), 0);
        assert_eq!(g.dependents_of(&cell(1, 1)).count(), 0);
    }

    #[test]
    fn reverse_reachable_finds_transitive_dependents() {
        let mut g = DependencyGraph::new();
        g.set_formula(cell(2, 1), [cell(1, 1)]);
        g.set_formula(cell(3, 1), [cell(2, 1)]);
        let reachable = g.reverse_reachable(&cell(1, 1));
        assert!(reachable.contains(&cell(2, 1)));
        assert!(reachable.contains(&cell(3, 1)));
    }
}
