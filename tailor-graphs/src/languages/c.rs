use std::path::Path;

use tracing::warn;
use tree_sitter::Node;

use crate::{AstRole, CallInfo, Lang, Result};

use super::helpers::{
    capture_ast, child_by_field, count_named_children, is_field_child, node_range, node_text,
};
use super::{LanguageSupport, RawFunction};

#[derive(Debug)]
pub struct CSupport;

impl LanguageSupport for CSupport {
    fn lang(&self) -> Lang {
        Lang::C
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["c", "h"]
    }

    fn tree_sitter_language(&self) -> tree_sitter::Language {
        tree_sitter_c::LANGUAGE.into()
    }

    fn extract_functions(
        &self,
        tree: &tree_sitter::Tree,
        source: &str,
        path: &Path,
    ) -> Result<Vec<RawFunction>> {
        let mut functions = Vec::new();
        collect_functions(tree.root_node(), source, path, &mut functions);
        Ok(functions)
    }
}

fn collect_functions(node: Node<'_>, source: &str, path: &Path, out: &mut Vec<RawFunction>) {
    if node.kind() == "function_definition" {
        out.push(function_record(node, source, path));
        return;
    }
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        collect_functions(child, source, path, out);
    }
}

fn function_record(node: Node<'_>, source: &str, path: &Path) -> RawFunction {
    let func_decl = child_by_field(node, "declarator").and_then(find_function_declarator);
    let name = func_decl
        .and_then(|d| child_by_field(d, "declarator"))
        .and_then(innermost_identifier)
        .map_or_else(|| "<anonymous>".to_string(), |n| node_text(n, source).to_string());
    let arity = func_decl
        .and_then(|d| child_by_field(d, "parameters"))
        .map_or(0, |params| count_parameters(params, source));

    let ast_root = if node.has_error() || child_by_field(node, "body").is_none() {
        warn!(
            path = %path.display(),
            function = %name,
            line = node.start_position().row + 1,
            "Malformed function definition, keeping a minimal CPG"
        );
        None
    } else {
        Some(capture_ast(node, source, &classify))
    };

    RawFunction {
        qualified_name: name.clone(),
        name,
        arity,
        span: node_range(node),
        ast_root,
    }
}

/// Walk through pointer/array/parenthesized declarators to the function declarator.
fn find_function_declarator(node: Node<'_>) -> Option<Node<'_>> {
    if node.kind() == "function_declarator" {
        return Some(node);
    }
    child_by_field(node, "declarator")
        .or_else(|| node.named_child(0))
        .and_then(find_function_declarator)
}

fn innermost_identifier(node: Node<'_>) -> Option<Node<'_>> {
    match node.kind() {
        "identifier" | "field_identifier" => Some(node),
        _ => child_by_field(node, "declarator")
            .or_else(|| node.named_child(0))
            .and_then(innermost_identifier),
    }
}

fn count_parameters(params: Node<'_>, source: &str) -> usize {
    let count = count_named_children(params, &["parameter_declaration", "variadic_parameter"]);
    // `f(void)` declares no parameters
    if count == 1 {
        let mut cursor = params.walk();
        let only_void = params
            .named_children(&mut cursor)
            .any(|p| p.kind() == "parameter_declaration" && node_text(p, source).trim() == "void");
        if only_void {
            return 0;
        }
    }
    count
}

fn classify(node: Node<'_>, source: &str) -> Option<AstRole> {
    match node.kind() {
        "compound_statement" => Some(AstRole::Block),
        "if_statement" | "switch_statement" | "conditional_expression" => Some(AstRole::Branch),
        "while_statement" | "for_statement" | "do_statement" => Some(AstRole::Loop),
        "return_statement" | "break_statement" | "continue_statement" | "goto_statement" => {
            Some(AstRole::Jump)
        }
        "call_expression" => call_info(node, source).map(AstRole::Call),
        "identifier" => classify_identifier(node),
        _ => None,
    }
}

fn call_info(node: Node<'_>, source: &str) -> Option<CallInfo> {
    let function = child_by_field(node, "function")?;
    let (callee, qualifier) = match function.kind() {
        "identifier" => (node_text(function, source).to_string(), None),
        // s->op(...) / s.op(...): call through a struct member
        "field_expression" => {
            let field = child_by_field(function, "field")?;
            let base = child_by_field(function, "argument").map(|b| node_text(b, source).to_string());
            (node_text(field, source).to_string(), base)
        }
        _ => return None,
    };
    let arg_count = child_by_field(node, "arguments").map_or(0, |a| count_named_children(a, &[]));
    Some(CallInfo {
        callee,
        qualifier,
        arg_count,
    })
}

fn classify_identifier(node: Node<'_>) -> Option<AstRole> {
    let mut child = node;
    let mut parent = node.parent()?;

    if parent.kind() == "call_expression" && is_field_child(parent, "function", node) {
        return None;
    }
    if parent.kind() == "function_declarator" {
        return None;
    }

    // `int *p`, `int a[4]`: the declared name sits under wrapper declarators
    while matches!(
        parent.kind(),
        "pointer_declarator" | "array_declarator" | "parenthesized_declarator"
    ) {
        child = parent;
        parent = parent.parent()?;
    }

    let is_def = match parent.kind() {
        "init_declarator" | "declaration" | "parameter_declaration" => {
            is_field_child(parent, "declarator", child)
        }
        "assignment_expression" => is_field_child(parent, "left", child),
        _ => false,
    };
    Some(if is_def { AstRole::Def } else { AstRole::Use })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AstNode;

    fn parse(source: &str) -> Vec<RawFunction> {
        let support = CSupport;
        let mut parser = tree_sitter::Parser::new();
        parser.set_language(&support.tree_sitter_language()).unwrap();
        let tree = parser.parse(source, None).unwrap();
        support
            .extract_functions(&tree, source, Path::new("test.c"))
            .unwrap()
    }

    fn find_roles<'a>(node: &'a AstNode, out: &mut Vec<&'a AstNode>) {
        if node.role.is_some() {
            out.push(node);
        }
        for child in &node.children {
            find_roles(child, out);
        }
    }

    #[test]
    fn extracts_functions_with_arity() {
        let funcs = parse(
            "int add(int a, int b) { return a + b; }\n\
             static char *name(void) { return 0; }\n\
             void log_all(const char *fmt, ...) { }\n",
        );
        let summary: Vec<_> = funcs.iter().map(|f| (f.name.as_str(), f.arity)).collect();
        assert_eq!(summary, vec![("add", 2), ("name", 0), ("log_all", 2)]);
        assert!(funcs.iter().all(|f| f.ast_root.is_some()));
    }

    #[test]
    fn marks_calls_defs_and_uses() {
        let funcs = parse("int f(int n) { int x = g(n, 1); x = x + 1; return x; }\n");
        let root = funcs[0].ast_root.as_ref().unwrap();
        let mut roles = Vec::new();
        find_roles(root, &mut roles);

        let call = roles
            .iter()
            .find_map(|n| match &n.role {
                Some(AstRole::Call(info)) => Some(info.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(call.callee, "g");
        assert_eq!(call.arg_count, 2);

        let defs: Vec<_> = roles
            .iter()
            .filter(|n| n.role == Some(AstRole::Def))
            .filter_map(|n| n.token.as_deref())
            .collect();
        assert!(defs.contains(&"x"));
        assert!(defs.contains(&"n"));
        assert!(roles.iter().any(|n| n.role == Some(AstRole::Use)));
        assert!(roles.iter().any(|n| n.role == Some(AstRole::Block)));
        assert!(roles.iter().any(|n| n.role == Some(AstRole::Jump)));
    }

    #[test]
    fn malformed_definition_has_no_ast() {
        let funcs = parse("int broken(int a) { return a + ; }\nint ok(void) { return 1; }\n");
        let broken = funcs.iter().find(|f| f.name == "broken").unwrap();
        assert!(broken.ast_root.is_none());
        let ok = funcs.iter().find(|f| f.name == "ok").unwrap();
        assert!(ok.ast_root.is_some());
    }
}
