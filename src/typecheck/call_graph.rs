//! Internal call graph: cycle detection, reachability and emission order.

use std::collections::{BTreeMap, BTreeSet};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use tracing::debug;

use super::ContractInfo;
use crate::diagnostic::{Diagnostic, ErrorKind};
use crate::span::Span;

pub struct CallGraph {
    graph: DiGraph<String, ()>,
    nodes: BTreeMap<String, NodeIndex>,
    /// Declaration order, which fixes the DFS order and so the reported cycle.
    order: Vec<String>,
}

impl CallGraph {
    /// Edges go from caller to callee. Calls to names that are not
    /// functions of this contract are left to the body checks.
    pub fn build(contract: &ContractInfo) -> Self {
        let mut graph = DiGraph::with_capacity(contract.functions.len(), 0);
        let mut nodes = BTreeMap::new();
        for name in &contract.function_order {
            nodes.insert(name.clone(), graph.add_node(name.clone()));
        }
        for name in &contract.function_order {
            let Some(func) = contract.functions.get(name) else {
                continue;
            };
            for callee in &func.called_functions {
                if let Some(&to) = nodes.get(callee) {
                    graph.add_edge(nodes[name], to, ());
                }
            }
        }
        debug!(
            functions = graph.node_count(),
            calls = graph.edge_count(),
            "built call graph"
        );
        Self {
            graph,
            nodes,
            order: contract.function_order.clone(),
        }
    }

    fn callees(&self, name: &str) -> Vec<String> {
        let Some(&node) = self.nodes.get(name) else {
            return Vec::new();
        };
        let mut callees: Vec<String> = self
            .graph
            .neighbors(node)
            .map(|n| self.graph[n].clone())
            .collect();
        callees.sort();
        callees.dedup();
        callees
    }

    /// Reject any cycle, reporting the first one found in declaration order.
    pub fn check_acyclic(&self, contract: &ContractInfo) -> Result<(), Diagnostic> {
        let mut visited: BTreeMap<String, u8> = BTreeMap::new();
        for name in &self.order {
            visited.insert(name.clone(), 0);
        }
        for name in &self.order {
            if visited.get(name).copied() != Some(0) {
                continue;
            }
            let mut path = Vec::new();
            if self.dfs_cycle(name, &mut visited, &mut path) {
                // The path ends with the repeated node; report only the loop.
                let last = path.last().cloned().unwrap_or_default();
                let start = path.iter().position(|n| *n == last).unwrap_or(0);
                let cycle = &path[start..];
                let span = contract
                    .functions
                    .get(&cycle[0])
                    .map(|f| f.span)
                    .unwrap_or_else(Span::dummy);
                return Err(Diagnostic::error(
                    ErrorKind::CallViolation,
                    format!("Contract contains cyclic function call: {}", cycle.join(" -> ")),
                    span,
                ));
            }
        }
        Ok(())
    }

    fn dfs_cycle(
        &self,
        node: &str,
        visited: &mut BTreeMap<String, u8>,
        path: &mut Vec<String>,
    ) -> bool {
        visited.insert(node.to_string(), 1); // in-stack
        path.push(node.to_string());
        for callee in self.callees(node) {
            let state = visited.get(&callee).copied().unwrap_or(2);
            if state == 1 {
                path.push(callee);
                return true;
            }
            if state == 0 && self.dfs_cycle(&callee, visited, path) {
                return true;
            }
        }
        path.pop();
        visited.insert(node.to_string(), 2); // done
        false
    }

    /// Every function transitively called from `name`, excluding itself.
    pub fn reachable(&self, name: &str) -> BTreeSet<String> {
        let Some(&start) = self.nodes.get(name) else {
            return BTreeSet::new();
        };
        let mut dfs = Dfs::new(&self.graph, start);
        let mut out = BTreeSet::new();
        while let Some(node) = dfs.next(&self.graph) {
            if node != start {
                out.insert(self.graph[node].clone());
            }
        }
        out
    }

    /// Callees before callers. Only valid once `check_acyclic` passed.
    pub fn codegen_order(&self) -> Vec<String> {
        match toposort(&self.graph, None) {
            Ok(sorted) => sorted
                .into_iter()
                .rev()
                .map(|n| self.graph[n].clone())
                .collect(),
            Err(_) => self.order.clone(),
        }
    }
}
