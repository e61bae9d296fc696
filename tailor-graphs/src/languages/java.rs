use std::path::Path;

use tracing::{debug, warn};
use tree_sitter::Node;

use crate::{AstRole, CallInfo, Lang, Result};

use super::helpers::{
    capture_ast, child_by_field, count_named_children, is_field_child, node_range, node_text,
};
use super::{LanguageSupport, RawFunction};

#[derive(Debug)]
pub struct JavaSupport;

impl LanguageSupport for JavaSupport {
    fn lang(&self) -> Lang {
        Lang::Java
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["java"]
    }

    fn tree_sitter_language(&self) -> tree_sitter::Language {
        tree_sitter_java::LANGUAGE.into()
    }

    fn extract_functions(
        &self,
        tree: &tree_sitter::Tree,
        source: &str,
        path: &Path,
    ) -> Result<Vec<RawFunction>> {
        let mut functions = Vec::new();
        let mut context: Vec<String> = Vec::new();
        walk_java_node(tree.root_node(), source, path, &mut context, &mut functions);
        Ok(functions)
    }
}

fn walk_java_node(
    node: Node<'_>,
    source: &str,
    path: &Path,
    context: &mut Vec<String>,
    out: &mut Vec<RawFunction>,
) {
    match node.kind() {
        "class_declaration" | "interface_declaration" | "enum_declaration"
        | "record_declaration" => {
            if let Some(name_node) = child_by_field(node, "name") {
                context.push(node_text(name_node, source).to_string());
                walk_java_children(node, source, path, context, out);
                context.pop();
                return;
            }
        }
        "method_declaration" | "constructor_declaration" => {
            if let Some(name_node) = child_by_field(node, "name") {
                let name = node_text(name_node, source).to_string();
                out.push(method_record(node, source, path, context, name));
            }
            return;
        }
        _ => {}
    }

    walk_java_children(node, source, path, context, out);
}

fn walk_java_children(
    node: Node<'_>,
    source: &str,
    path: &Path,
    context: &mut Vec<String>,
    out: &mut Vec<RawFunction>,
) {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        walk_java_node(child, source, path, context, out);
    }
}

fn method_record(
    node: Node<'_>,
    source: &str,
    path: &Path,
    context: &[String],
    name: String,
) -> RawFunction {
    let qualified_name = if context.is_empty() {
        name.clone()
    } else {
        format!("{}.{name}", context.join("."))
    };
    let arity = child_by_field(node, "parameters").map_or(0, |p| {
        count_named_children(p, &["formal_parameter", "spread_parameter"])
    });

    let ast_root = if node.has_error() {
        warn!(
            path = %path.display(),
            method = %qualified_name,
            line = node.start_position().row + 1,
            "Malformed method declaration, keeping a minimal CPG"
        );
        None
    } else if child_by_field(node, "body").is_none() {
        debug!(method = %qualified_name, "Abstract or interface method has no body");
        None
    } else {
        Some(capture_ast(node, source, &classify))
    };

    RawFunction {
        name,
        qualified_name,
        arity,
        span: node_range(node),
        ast_root,
    }
}

fn classify(node: Node<'_>, source: &str) -> Option<AstRole> {
    match node.kind() {
        "block" | "constructor_body" | "switch_block" => Some(AstRole::Block),
        "if_statement" | "switch_expression" | "ternary_expression" => Some(AstRole::Branch),
        "while_statement" | "for_statement" | "enhanced_for_statement" | "do_statement" => {
            Some(AstRole::Loop)
        }
        "return_statement" | "break_statement" | "continue_statement" | "throw_statement" => {
            Some(AstRole::Jump)
        }
        "method_invocation" => {
            let name = child_by_field(node, "name")?;
            Some(AstRole::Call(CallInfo {
                callee: node_text(name, source).to_string(),
                qualifier: child_by_field(node, "object").map(|o| node_text(o, source).to_string()),
                arg_count: argument_count(node),
            }))
        }
        // `new Foo(..)` targets the constructor named after the class
        "object_creation_expression" => {
            let ty = child_by_field(node, "type")?;
            let callee = node_text(ty, source);
            let callee = callee.split('<').next().unwrap_or(callee).trim();
            let callee = callee.rsplit('.').next().unwrap_or(callee);
            Some(AstRole::Call(CallInfo {
                callee: callee.to_string(),
                qualifier: None,
                arg_count: argument_count(node),
            }))
        }
        "identifier" => classify_identifier(node),
        _ => None,
    }
}

fn argument_count(node: Node<'_>) -> usize {
    child_by_field(node, "arguments").map_or(0, |a| count_named_children(a, &[]))
}

fn classify_identifier(node: Node<'_>) -> Option<AstRole> {
    let parent = node.parent()?;
    match parent.kind() {
        "method_invocation" if is_field_child(parent, "name", node) => None,
        "method_declaration" | "constructor_declaration" => None,
        "variable_declarator" | "formal_parameter" | "catch_formal_parameter"
        | "enhanced_for_statement"
            if is_field_child(parent, "name", node) =>
        {
            Some(AstRole::Def)
        }
        "assignment_expression" if is_field_child(parent, "left", node) => Some(AstRole::Def),
        _ => Some(AstRole::Use),
    }
}
