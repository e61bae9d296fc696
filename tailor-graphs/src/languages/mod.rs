pub mod c;
mod helpers;
pub mod java;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::{AstNode, Lang, Result, TextRange};

/// A function found in one file, before the corpus-wide id is assigned.
#[derive(Debug, Clone)]
pub struct RawFunction {
    pub name: String,
    pub qualified_name: String,
    pub arity: usize,
    pub span: TextRange,
    pub ast_root: Option<AstNode>,
}

/// Trait implemented by each language's extraction support.
pub trait LanguageSupport: Send + Sync + std::fmt::Debug {
    /// Language tag this implementation serves.
    fn lang(&self) -> Lang;

    /// File extensions this language handles.
    fn extensions(&self) -> &'static [&'static str];

    /// Tree-sitter language for parsing.
    fn tree_sitter_language(&self) -> tree_sitter::Language;

    /// Extract every function definition in a parsed file, in source order.
    fn extract_functions(
        &self,
        tree: &tree_sitter::Tree,
        source: &str,
        path: &Path,
    ) -> Result<Vec<RawFunction>>;
}

/// Registry of the supported front-ends.
#[derive(Debug)]
pub struct LanguageRegistry {
    languages: HashMap<Lang, Arc<dyn LanguageSupport>>,
    extension_map: HashMap<String, Lang>,
}

impl LanguageRegistry {
    pub fn new() -> Self {
        let mut reg = Self {
            languages: HashMap::new(),
            extension_map: HashMap::new(),
        };
        reg.register(Arc::new(c::CSupport));
        reg.register(Arc::new(java::JavaSupport));
        reg
    }

    fn register(&mut self, lang: Arc<dyn LanguageSupport>) {
        for ext in lang.extensions() {
            self.extension_map.insert((*ext).to_string(), lang.lang());
        }
        self.languages.insert(lang.lang(), lang);
    }

    /// Look up the language support for a file by its extension.
    pub fn for_file(&self, path: &Path) -> Option<Arc<dyn LanguageSupport>> {
        let ext = path.extension()?.to_str()?;
        let lang = self.extension_map.get(ext)?;
        self.languages.get(lang).cloned()
    }

    /// Get a language by its tag.
    pub fn get(&self, lang: Lang) -> Option<Arc<dyn LanguageSupport>> {
        self.languages.get(&lang).cloned()
    }
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_maps_extensions() {
        let reg = LanguageRegistry::new();
        assert_eq!(reg.for_file(Path::new("a/b.c")).map(|l| l.lang()), Some(Lang::C));
        assert_eq!(reg.for_file(Path::new("x.h")).map(|l| l.lang()), Some(Lang::C));
        assert_eq!(
            reg.for_file(Path::new("Foo.java")).map(|l| l.lang()),
            Some(Lang::Java)
        );
        assert!(reg.for_file(Path::new("main.rs")).is_none());
        assert!(reg.for_file(Path::new("Makefile")).is_none());
    }

    #[test]
    fn registry_get_by_tag() {
        let reg = LanguageRegistry::new();
        assert_eq!(reg.get(Lang::Java).unwrap().extensions(), &["java"]);
    }
}
