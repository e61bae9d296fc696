// CPG corpus statistics for `--statistics`.
//
// Counts are exact; averages are for display only.
#![allow(clippy::cast_precision_loss)]

use std::collections::BTreeMap;
use std::fmt;

use petgraph::algo::connected_components;
use petgraph::graph::{DiGraph, UnGraph};
use serde::Serialize;
use tailor_graphs::{Cpg, EdgeKind, FuncDict};
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CpgStatistics {
    pub functions: usize,
    pub degenerate: usize,
    pub nodes: usize,
    pub max_nodes: usize,
    pub edges: BTreeMap<String, usize>,
    pub resolved_calls: usize,
    pub unresolved_calls: usize,
    /// Mean weakly connected components per CPG (1.0 for fully wired graphs).
    pub avg_components: f64,
    /// Weakly connected components of the inter-procedural call graph.
    pub call_graph_components: usize,
}

impl CpgStatistics {
    pub fn compute(func_dict: &FuncDict) -> Self {
        let mut stats = Self {
            functions: func_dict.len(),
            edges: EdgeKind::ALL
                .iter()
                .map(|k| (k.as_str().to_string(), 0))
                .collect(),
            ..Self::default()
        };

        let mut component_total = 0usize;
        for cpg in func_dict.values() {
            stats.nodes += cpg.node_count();
            stats.max_nodes = stats.max_nodes.max(cpg.node_count());
            stats.degenerate += usize::from(cpg.degenerate);
            stats.resolved_calls += cpg.calls.len();
            stats.unresolved_calls += cpg.unresolved.len();
            for edge in &cpg.edges {
                *stats.edges.entry(edge.kind.as_str().to_string()).or_default() += 1;
            }
            component_total += components(cpg);
        }
        if stats.functions > 0 {
            stats.avg_components = component_total as f64 / stats.functions as f64;
        }
        stats.call_graph_components = call_graph_components(func_dict);
        stats
    }

    pub fn avg_nodes(&self) -> f64 {
        if self.functions == 0 {
            0.0
        } else {
            self.nodes as f64 / self.functions as f64
        }
    }

    pub fn log(&self) {
        info!(
            functions = self.functions,
            nodes = self.nodes,
            degenerate = self.degenerate,
            resolved_calls = self.resolved_calls,
            unresolved_calls = self.unresolved_calls,
            "CPG statistics"
        );
    }
}

/// Weakly connected components of one CPG across all edge kinds.
fn components(cpg: &Cpg) -> usize {
    let mut graph = UnGraph::<(), ()>::with_capacity(cpg.node_count(), cpg.edges.len());
    let indices: Vec<_> = (0..cpg.node_count()).map(|_| graph.add_node(())).collect();
    for edge in &cpg.edges {
        if let (Some(&a), Some(&b)) = (indices.get(edge.src.0 as usize), indices.get(edge.dst.0 as usize)) {
            graph.add_edge(a, b, ());
        }
    }
    connected_components(&graph)
}

fn call_graph_components(func_dict: &FuncDict) -> usize {
    let mut graph = DiGraph::<(), ()>::with_capacity(func_dict.len(), 0);
    let index: BTreeMap<_, _> = func_dict.keys().map(|id| (*id, graph.add_node(()))).collect();
    for (caller, cpg) in func_dict {
        for call in &cpg.calls {
            if let (Some(&a), Some(&b)) = (index.get(caller), index.get(&call.callee)) {
                graph.add_edge(a, b, ());
            }
        }
    }
    connected_components(&graph)
}

impl fmt::Display for CpgStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "CPG statistics")?;
        writeln!(f, "  {:<24} {}", "functions", self.functions)?;
        writeln!(f, "  {:<24} {}", "degenerate CPGs", self.degenerate)?;
        writeln!(f, "  {:<24} {}", "nodes", self.nodes)?;
        writeln!(f, "  {:<24} {:.2}", "avg nodes / CPG", self.avg_nodes())?;
        writeln!(f, "  {:<24} {}", "max nodes / CPG", self.max_nodes)?;
        for (kind, count) in &self.edges {
            writeln!(f, "  {:<24} {count}", format!("{kind} edges"))?;
        }
        writeln!(f, "  {:<24} {}", "resolved calls", self.resolved_calls)?;
        writeln!(f, "  {:<24} {}", "unresolved calls", self.unresolved_calls)?;
        writeln!(f, "  {:<24} {:.2}", "avg components / CPG", self.avg_components)?;
        write!(f, "  {:<24} {}", "call graph components", self.call_graph_components)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tailor_graphs::{AstNode, AstRole, CallInfo, CpgBuilder, FunctionId, FunctionRecord, TextRange};

    fn record(id: u32, name: &str, ast_root: Option<AstNode>) -> FunctionRecord {
        FunctionRecord {
            id: FunctionId(id),
            source_file: "s.c".into(),
            name: name.to_string(),
            qualified_name: name.to_string(),
            arity: 0,
            span: TextRange::default(),
            ast_root,
        }
    }

    #[test]
    fn counts_nodes_edges_and_calls() {
        let call = AstNode {
            kind: "call_expression".to_string(),
            token: None,
            span: TextRange::default(),
            role: Some(AstRole::Call(CallInfo {
                callee: "g".to_string(),
                qualifier: None,
                arg_count: 0,
            })),
            children: vec![],
        };
        let records = vec![record(0, "f", Some(call)), record(1, "g", None), record(2, "h", None)];
        let built = CpgBuilder::new().build(&records);
        let stats = CpgStatistics::compute(&built.func_dict);

        assert_eq!(stats.functions, 3);
        assert_eq!(stats.nodes, 3);
        assert_eq!(stats.degenerate, 2);
        assert_eq!(stats.resolved_calls, 1);
        assert_eq!(stats.edges["ast"], 0);
        assert!((stats.avg_components - 1.0).abs() < f64::EPSILON);
        // f -> g joined, h alone
        assert_eq!(stats.call_graph_components, 2);
        assert!(stats.to_string().contains("resolved calls"));
    }

    #[test]
    fn empty_corpus() {
        let stats = CpgStatistics::compute(&FuncDict::new());
        assert_eq!(stats.functions, 0);
        assert!(stats.avg_nodes().abs() < f64::EPSILON);
        assert_eq!(stats.call_graph_components, 0);
    }
}
