use tree_sitter::Node;

use crate::{AstNode, AstRole, TextRange};

/// Longest token text kept on an AST leaf, in characters.
const MAX_TOKEN_CHARS: usize = 64;

/// Extract the source text for a tree-sitter node.
pub fn node_text<'a>(node: Node<'_>, source: &'a str) -> &'a str {
    &source[node.byte_range()]
}

/// Find a child by field name.
pub fn child_by_field<'a>(node: Node<'a>, field: &str) -> Option<Node<'a>> {
    node.child_by_field_name(field)
}

/// Convert a tree-sitter node to a `TextRange`.
pub fn node_range(node: Node<'_>) -> TextRange {
    node.range().into()
}

/// True when `node` is the child stored under `field` of `parent`.
pub fn is_field_child(parent: Node<'_>, field: &str, node: Node<'_>) -> bool {
    parent
        .child_by_field_name(field)
        .is_some_and(|c| c.id() == node.id())
}

pub fn is_comment(node: Node<'_>) -> bool {
    matches!(node.kind(), "comment" | "line_comment" | "block_comment")
}

/// Count named, non-comment children (arguments, parameters).
pub fn count_named_children(node: Node<'_>, kinds: &[&str]) -> usize {
    let mut cursor = node.walk();
    node.named_children(&mut cursor)
        .filter(|c| !is_comment(*c) && (kinds.is_empty() || kinds.contains(&c.kind())))
        .count()
}

/// Copy a syntax subtree into an owned [`AstNode`], annotating roles with `classify`.
///
/// Anonymous nodes (punctuation, keywords) and comments are dropped. Leaves keep
/// their source text as token; interior nodes with an `operator` field keep the
/// operator text instead.
pub fn capture_ast<F>(node: Node<'_>, source: &str, classify: &F) -> AstNode
where
    F: Fn(Node<'_>, &str) -> Option<AstRole>,
{
    let mut children = Vec::new();
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        if is_comment(child) {
            continue;
        }
        children.push(capture_ast(child, source, classify));
    }

    let token = if children.is_empty() {
        Some(truncate_token(node_text(node, source)))
    } else {
        child_by_field(node, "operator").map(|op| truncate_token(node_text(op, source)))
    };

    AstNode {
        kind: node.kind().to_string(),
        token,
        span: node_range(node),
        role: classify(node, source),
        children,
    }
}

fn truncate_token(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= MAX_TOKEN_CHARS {
        trimmed.to_string()
    } else {
        trimmed.chars().take(MAX_TOKEN_CHARS).collect()
    }
}
