pub mod builder;
pub mod call_graph;
pub mod cpg;
pub mod extract;
pub mod languages;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use builder::{BuildOutput, CpgBuilder};
pub use cpg::{CallEdge, Cpg, CpgEdge, CpgNode, EdgeKind, FuncDict, NodeId, UnresolvedCall};
pub use extract::{ExtractOutput, FunctionExtractor};
pub use languages::{LanguageRegistry, LanguageSupport};

/// Error type for the graph engine.
#[derive(thiserror::Error, Debug)]
pub enum GraphError {
    #[error("Parse error in {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("Tree-sitter error: {0}")]
    TreeSitter(String),

    #[error("Invalid glob pattern {pattern}: {message}")]
    Pattern { pattern: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GraphError>;

// ── Language tag ───────────────────────────────────────────────────

/// Source language selecting the extraction front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    C,
    Java,
}

impl Lang {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::C => "c",
            Self::Java => "java",
        }
    }
}

impl fmt::Display for Lang {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Lang {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "c" => Ok(Self::C),
            "java" => Ok(Self::Java),
            other => Err(format!("unknown language: {other} (expected c or java)")),
        }
    }
}

// ── Span type ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TextRange {
    pub start_byte: usize,
    pub end_byte: usize,
    pub start_row: usize,
    pub start_col: usize,
    pub end_row: usize,
    pub end_col: usize,
}

impl From<tree_sitter::Range> for TextRange {
    fn from(r: tree_sitter::Range) -> Self {
        Self {
            start_byte: r.start_byte,
            end_byte: r.end_byte,
            start_row: r.start_point.row,
            start_col: r.start_point.column,
            end_row: r.end_point.row,
            end_col: r.end_point.column,
        }
    }
}

// ── Function records ───────────────────────────────────────────────

/// Dense function identifier, assigned after a stable sort of the corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FunctionId(pub u32);

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FunctionId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// One function found by a front-end. Immutable once the extractor hands it out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionRecord {
    pub id: FunctionId,
    /// Path relative to the source root.
    pub source_file: PathBuf,
    pub name: String,
    /// Name qualified by enclosing types (`Outer.Inner.method` for Java).
    pub qualified_name: String,
    /// Declared parameter count, used to disambiguate overloads.
    pub arity: usize,
    /// Byte/row span of the whole definition in the source file.
    pub span: TextRange,
    /// `None` when the definition could not be parsed cleanly.
    pub ast_root: Option<AstNode>,
}

/// Named syntax node captured from tree-sitter, detached from the parse tree.
///
/// Serialized as a pre-order arena ([`FlatAst`]) so the nesting depth of the
/// stored form stays constant however deep the syntax tree is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "FlatAst", try_from = "FlatAst")]
pub struct AstNode {
    pub kind: String,
    /// Source text for leaves (identifiers, literals, operators).
    pub token: Option<String>,
    pub span: TextRange,
    pub role: Option<AstRole>,
    pub children: Vec<AstNode>,
}

impl AstNode {
    /// Number of nodes in this subtree.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(AstNode::size).sum::<usize>()
    }
}

#[derive(Serialize, Deserialize)]
struct FlatAst {
    nodes: Vec<FlatAstNode>,
}

#[derive(Serialize, Deserialize)]
struct FlatAstNode {
    kind: String,
    token: Option<String>,
    span: TextRange,
    role: Option<AstRole>,
    /// Arena indices of the children, in source order.
    children: Vec<u32>,
}

impl From<AstNode> for FlatAst {
    fn from(root: AstNode) -> Self {
        let mut nodes: Vec<FlatAstNode> = Vec::new();
        let mut stack = vec![(root, None::<usize>)];
        while let Some((node, parent)) = stack.pop() {
            let index = nodes.len();
            let AstNode {
                kind,
                token,
                span,
                role,
                children,
            } = node;
            nodes.push(FlatAstNode {
                kind,
                token,
                span,
                role,
                children: Vec::with_capacity(children.len()),
            });
            if let Some(parent) = parent {
                nodes[parent].children.push(u32::try_from(index).unwrap_or(u32::MAX));
            }
            stack.extend(children.into_iter().rev().map(|child| (child, Some(index))));
        }
        Self { nodes }
    }
}

impl TryFrom<FlatAst> for AstNode {
    type Error = String;

    /// Rebuild bottom-up. Pre-order puts every child after its parent, and
    /// each node must be claimed by exactly one parent.
    fn try_from(flat: FlatAst) -> std::result::Result<Self, Self::Error> {
        let count = flat.nodes.len();
        let mut built: Vec<Option<AstNode>> = std::iter::repeat_with(|| None).take(count).collect();
        for (index, node) in flat.nodes.into_iter().enumerate().rev() {
            let mut children = Vec::with_capacity(node.children.len());
            for child in node.children {
                let child = child as usize;
                if child <= index || child >= count {
                    return Err(format!("AST node {index} has out-of-order child {child}"));
                }
                let subtree = built[child]
                    .take()
                    .ok_or_else(|| format!("AST node {child} has more than one parent"))?;
                children.push(subtree);
            }
            built[index] = Some(AstNode {
                kind: node.kind,
                token: node.token,
                span: node.span,
                role: node.role,
                children,
            });
        }
        let root = built.first_mut().and_then(Option::take).ok_or("empty AST")?;
        if built.iter().any(Option::is_some) {
            return Err("AST arena holds nodes unreachable from the root".to_string());
        }
        Ok(root)
    }
}

/// Language-neutral meaning of a syntax node, used to derive CFG/DFG edges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AstRole {
    /// Statement sequence: consecutive children are control-flow successors.
    Block,
    /// Conditional: first child is the condition, the rest are branches.
    Branch,
    /// Loop: first child is the condition, the last child is the body.
    Loop,
    /// return / break / continue / goto.
    Jump,
    /// Identifier written by a declaration or assignment.
    Def,
    /// Identifier read.
    Use,
    /// Call site.
    Call(CallInfo),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallInfo {
    /// Unqualified callee name.
    pub callee: String,
    /// Receiver or qualifier text (`obj` in `obj.run()`), if any.
    pub qualifier: Option<String>,
    pub arg_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(kind: &str, children: Vec<AstNode>) -> AstNode {
        AstNode {
            kind: kind.to_string(),
            token: None,
            span: TextRange::default(),
            role: None,
            children,
        }
    }

    #[test]
    fn arena_keeps_child_order() {
        let tree = node("block", vec![node("a", vec![node("a1", vec![])]), node("b", vec![]), node("c", vec![])]);
        let flat = FlatAst::from(tree.clone());
        let kinds: Vec<&str> = flat.nodes.iter().map(|n| n.kind.as_str()).collect();
        assert_eq!(kinds, ["block", "a", "a1", "b", "c"]);
        assert_eq!(flat.nodes[0].children, [1, 3, 4]);
        assert_eq!(AstNode::try_from(flat).unwrap(), tree);
    }

    #[test]
    fn arena_rejects_bad_links() {
        let mut bad = FlatAst::from(node("root", vec![node("leaf", vec![])]));
        bad.nodes[1].children.push(0);
        assert!(AstNode::try_from(bad).is_err());

        let mut orphan = FlatAst::from(node("root", vec![]));
        orphan.nodes.push(FlatAst::from(node("stray", vec![])).nodes.remove(0));
        assert!(AstNode::try_from(orphan).unwrap_err().contains("unreachable"));

        assert!(AstNode::try_from(FlatAst { nodes: Vec::new() }).is_err());
    }
}
