// Code property graph for one function: AST edges plus intra-procedural
// control-flow and def-use edges, with inter-procedural calls kept separately
// so every call target can be checked against the function dictionary.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::{AstNode, AstRole, CallInfo, FunctionId, FunctionRecord};

/// Lookup from function id to its CPG (`func_dict`).
pub type FuncDict = BTreeMap<FunctionId, Cpg>;

/// Node index local to one CPG. Node 0 is always the function root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EdgeKind {
    Ast,
    Cfg,
    Dfg,
}

impl EdgeKind {
    pub const ALL: [EdgeKind; 3] = [EdgeKind::Ast, EdgeKind::Cfg, EdgeKind::Dfg];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ast => "ast",
            Self::Cfg => "cfg",
            Self::Dfg => "dfg",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpgNode {
    pub id: NodeId,
    pub kind: String,
    pub token: Option<String>,
    /// Source line (0-based) of the node start.
    pub line: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CpgEdge {
    pub src: NodeId,
    pub dst: NodeId,
    pub kind: EdgeKind,
}

/// Resolved call: a call-site node in this CPG → the entry node of another CPG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallEdge {
    pub site: NodeId,
    pub callee: FunctionId,
    pub entry: NodeId,
}

/// Call site whose callee is not defined anywhere in the corpus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedCall {
    pub site: NodeId,
    pub callee_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cpg {
    pub function: FunctionId,
    pub nodes: Vec<CpgNode>,
    pub edges: Vec<CpgEdge>,
    pub calls: Vec<CallEdge>,
    pub unresolved: Vec<UnresolvedCall>,
    /// True when the function had no usable AST and got a single placeholder node.
    pub degenerate: bool,
}

impl Cpg {
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edges_of(&self, kind: EdgeKind) -> impl Iterator<Item = &CpgEdge> {
        self.edges.iter().filter(move |e| e.kind == kind)
    }

    pub fn contains_node(&self, id: NodeId) -> bool {
        (id.0 as usize) < self.nodes.len()
    }
}

/// Call site awaiting corpus-wide resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCall {
    pub site: NodeId,
    pub info: CallInfo,
}

/// Build the intra-procedural CPG of one function.
///
/// Returns the graph without call edges plus the call sites still to resolve.
pub fn build_local(record: &FunctionRecord) -> (Cpg, Vec<PendingCall>) {
    let Some(root) = &record.ast_root else {
        return (degenerate(record), Vec::new());
    };

    let mut builder = LocalBuilder::default();
    builder.visit(root, None);
    builder.link_data_flow(root);

    let mut edges = builder.edges;
    edges.sort();
    edges.dedup();

    let cpg = Cpg {
        function: record.id,
        nodes: builder.nodes,
        edges,
        calls: Vec::new(),
        unresolved: Vec::new(),
        degenerate: false,
    };
    (cpg, builder.pending)
}

/// Single-node CPG for a function without a usable AST.
pub fn degenerate(record: &FunctionRecord) -> Cpg {
    Cpg {
        function: record.id,
        nodes: vec![CpgNode {
            id: NodeId(0),
            kind: "function".to_string(),
            token: Some(record.name.clone()),
            line: record.span.start_row,
        }],
        edges: Vec::new(),
        calls: Vec::new(),
        unresolved: Vec::new(),
        degenerate: true,
    }
}

#[derive(Default)]
struct LocalBuilder {
    nodes: Vec<CpgNode>,
    edges: Vec<CpgEdge>,
    pending: Vec<PendingCall>,
    /// Node ids in pre-order, parallel to a pre-order walk of the AST.
    order: Vec<NodeId>,
}

impl LocalBuilder {
    /// Pre-order walk: allocate node ids, AST edges, and CFG edges.
    fn visit(&mut self, ast: &AstNode, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(u32::try_from(self.nodes.len()).unwrap_or(u32::MAX));
        self.nodes.push(CpgNode {
            id,
            kind: ast.kind.clone(),
            token: ast.token.clone(),
            line: ast.span.start_row,
        });
        self.order.push(id);
        if let Some(parent) = parent {
            self.edge(parent, id, EdgeKind::Ast);
        }
        if let Some(AstRole::Call(info)) = &ast.role {
            self.pending.push(PendingCall {
                site: id,
                info: info.clone(),
            });
        }

        let children: Vec<NodeId> = ast
            .children
            .iter()
            .map(|child| self.visit(child, Some(id)))
            .collect();

        match ast.role {
            Some(AstRole::Block) => {
                for pair in children.windows(2) {
                    self.edge(pair[0], pair[1], EdgeKind::Cfg);
                }
            }
            Some(AstRole::Branch) => {
                if let Some((cond, branches)) = children.split_first() {
                    for branch in branches {
                        self.edge(*cond, *branch, EdgeKind::Cfg);
                    }
                }
            }
            Some(AstRole::Loop) => {
                for pair in children.windows(2) {
                    self.edge(pair[0], pair[1], EdgeKind::Cfg);
                }
                if let (Some(first), Some(last)) = (children.first(), children.last()) {
                    if first != last {
                        self.edge(*last, *first, EdgeKind::Cfg);
                    }
                }
            }
            _ => {}
        }

        id
    }

    /// Reaching-definition approximation: each use links to the latest def of
    /// the same name seen earlier in pre-order.
    fn link_data_flow(&mut self, root: &AstNode) {
        let mut last_def: HashMap<&str, NodeId> = HashMap::new();
        let mut cursor = 0usize;
        let mut stack = vec![root];
        let mut flow = Vec::new();

        while let Some(node) = stack.pop() {
            let id = self.order[cursor];
            cursor += 1;
            if let Some(token) = node.token.as_deref() {
                match node.role {
                    Some(AstRole::Def) => {
                        last_def.insert(token, id);
                    }
                    Some(AstRole::Use) => {
                        if let Some(def) = last_def.get(token) {
                            flow.push((*def, id));
                        }
                    }
                    _ => {}
                }
            }
            stack.extend(node.children.iter().rev());
        }

        for (def, use_site) in flow {
            self.edge(def, use_site, EdgeKind::Dfg);
        }
    }

    fn edge(&mut self, src: NodeId, dst: NodeId, kind: EdgeKind) {
        self.edges.push(CpgEdge { src, dst, kind });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TextRange;

    fn leaf(kind: &str, token: &str, role: Option<AstRole>) -> AstNode {
        AstNode {
            kind: kind.to_string(),
            token: Some(token.to_string()),
            span: TextRange::default(),
            role,
            children: Vec::new(),
        }
    }

    fn inner(kind: &str, role: Option<AstRole>, children: Vec<AstNode>) -> AstNode {
        AstNode {
            kind: kind.to_string(),
            token: None,
            span: TextRange::default(),
            role,
            children,
        }
    }

    fn record(ast_root: Option<AstNode>) -> FunctionRecord {
        FunctionRecord {
            id: FunctionId(7),
            source_file: "f.c".into(),
            name: "f".to_string(),
            qualified_name: "f".to_string(),
            arity: 0,
            span: TextRange::default(),
            ast_root,
        }
    }

    #[test]
    fn builds_ast_cfg_and_dfg_edges() {
        // f { x = 1; use(x); }
        let body = inner(
            "compound_statement",
            Some(AstRole::Block),
            vec![
                inner("expression_statement", None, vec![leaf("identifier", "x", Some(AstRole::Def))]),
                inner(
                    "call_expression",
                    Some(AstRole::Call(CallInfo {
                        callee: "use".to_string(),
                        qualifier: None,
                        arg_count: 1,
                    })),
                    vec![leaf("identifier", "x", Some(AstRole::Use))],
                ),
            ],
        );
        let root = inner("function_definition", None, vec![body]);
        let (cpg, pending) = build_local(&record(Some(root)));

        assert_eq!(cpg.node_count(), 6);
        assert_eq!(cpg.edges_of(EdgeKind::Ast).count(), 5);
        // statement → call inside the block
        assert!(cpg.edges.contains(&CpgEdge { src: NodeId(2), dst: NodeId(4), kind: EdgeKind::Cfg }));
        // def x → use x
        assert!(cpg.edges.contains(&CpgEdge { src: NodeId(3), dst: NodeId(5), kind: EdgeKind::Dfg }));
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].site, NodeId(4));
        assert!(!cpg.degenerate);
    }

    #[test]
    fn loop_gets_back_edge() {
        let root = inner(
            "while_statement",
            Some(AstRole::Loop),
            vec![leaf("identifier", "c", Some(AstRole::Use)), inner("compound_statement", Some(AstRole::Block), vec![])],
        );
        let (cpg, _) = build_local(&record(Some(root)));
        let cfg: Vec<_> = cpg.edges_of(EdgeKind::Cfg).map(|e| (e.src.0, e.dst.0)).collect();
        assert_eq!(cfg, vec![(1, 2), (2, 1)]);
    }

    #[test]
    fn missing_ast_yields_single_node() {
        let cpg = build_local(&record(None)).0;
        assert!(cpg.degenerate);
        assert_eq!(cpg.node_count(), 1);
        assert_eq!(cpg.nodes[0].token.as_deref(), Some("f"));
        assert!(cpg.edges.is_empty());
    }
}
