// Function extraction: one parse per source file, fanned out over rayon, then
// reassembled in a stable (path, offset) order before ids are assigned.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, info, instrument, warn};

use crate::languages::{LanguageSupport, RawFunction};
use crate::{FunctionId, FunctionRecord, GraphError, Result};

/// Output of one extraction pass.
#[derive(Debug, Default)]
pub struct ExtractOutput {
    /// Function records sorted by `(source_file, span.start_byte)`, ids dense from 0.
    pub functions: Vec<FunctionRecord>,
    /// Number of source files that were parsed.
    pub files_parsed: usize,
    /// Files that could not be read or parsed at all.
    pub errors: Vec<(String, GraphError)>,
}

impl ExtractOutput {
    /// Functions whose definition could not be captured cleanly.
    pub fn malformed_count(&self) -> usize {
        self.functions.iter().filter(|f| f.ast_root.is_none()).count()
    }
}

/// Walks a source root and produces the ordered function list for one language.
#[derive(Debug)]
pub struct FunctionExtractor {
    lang: Arc<dyn LanguageSupport>,
    include_patterns: Vec<String>,
    exclude_patterns: Vec<String>,
}

impl FunctionExtractor {
    pub fn new(lang: Arc<dyn LanguageSupport>) -> Self {
        Self {
            lang,
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
        }
    }

    /// Only extract files matching one of these globs. Empty means every file.
    #[must_use]
    pub fn with_includes(mut self, patterns: Vec<String>) -> Self {
        self.include_patterns = patterns;
        self
    }

    /// Skip files whose path relative to the source root matches any of these globs.
    #[must_use]
    pub fn with_excludes(mut self, patterns: Vec<String>) -> Self {
        self.exclude_patterns = patterns;
        self
    }

    #[instrument(skip_all, name = "extract_funcs", fields(lang = %self.lang.lang()))]
    pub fn extract(&self, src_root: &Path) -> Result<ExtractOutput> {
        let files = self.source_files(src_root)?;
        info!(file_count = files.len(), root = %src_root.display(), "Function extraction starting");

        let per_file: Vec<(PathBuf, Result<Vec<RawFunction>>)> = files
            .par_iter()
            .map(|path| {
                let relative = path.strip_prefix(src_root).unwrap_or(path).to_path_buf();
                (relative, self.extract_file(path))
            })
            .collect();

        let mut output = ExtractOutput::default();
        let mut drafts: Vec<(PathBuf, RawFunction)> = Vec::new();
        for (relative, result) in per_file {
            match result {
                Ok(functions) => {
                    output.files_parsed += 1;
                    drafts.extend(functions.into_iter().map(|f| (relative.clone(), f)));
                }
                Err(e) => {
                    warn!(path = %relative.display(), error = %e, "Failed to extract functions");
                    output.errors.push((relative.to_string_lossy().to_string(), e));
                }
            }
        }

        drafts.sort_by(|(pa, fa), (pb, fb)| {
            pa.cmp(pb).then(fa.span.start_byte.cmp(&fb.span.start_byte))
        });

        output.functions = drafts
            .into_iter()
            .enumerate()
            .map(|(idx, (source_file, raw))| FunctionRecord {
                id: FunctionId(u32::try_from(idx).unwrap_or(u32::MAX)),
                source_file,
                name: raw.name,
                qualified_name: raw.qualified_name,
                arity: raw.arity,
                span: raw.span,
                ast_root: raw.ast_root,
            })
            .collect();

        info!(
            functions = output.functions.len(),
            malformed = output.malformed_count(),
            errors = output.errors.len(),
            "Function extraction complete"
        );
        Ok(output)
    }

    fn source_files(&self, src_root: &Path) -> Result<Vec<PathBuf>> {
        if !src_root.is_dir() {
            return Err(GraphError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("source root is not a directory: {}", src_root.display()),
            )));
        }

        let includes = compile_patterns(&self.include_patterns)?;
        let excludes = compile_patterns(&self.exclude_patterns)?;

        let mut files = Vec::new();
        for ext in self.lang.extensions() {
            let pattern = src_root.join(format!("**/*.{ext}")).to_string_lossy().to_string();
            let paths = glob::glob(&pattern).map_err(|e| GraphError::Pattern {
                pattern: pattern.clone(),
                message: e.to_string(),
            })?;
            for entry in paths.flatten() {
                let relative = entry.strip_prefix(src_root).unwrap_or(&entry);
                let included = includes.is_empty() || includes.iter().any(|p| p.matches_path(relative));
                if entry.is_file() && included && !excludes.iter().any(|p| p.matches_path(relative)) {
                    files.push(entry);
                }
            }
        }

        files.sort();
        files.dedup();
        Ok(files)
    }

    fn extract_file(&self, path: &Path) -> Result<Vec<RawFunction>> {
        let bytes = std::fs::read(path)?;
        let source = String::from_utf8_lossy(&bytes);

        let mut parser = tree_sitter::Parser::new();
        parser
            .set_language(&self.lang.tree_sitter_language())
            .map_err(|e| GraphError::TreeSitter(format!("Failed to set language: {e}")))?;

        let tree = parser.parse(source.as_ref(), None).ok_or_else(|| GraphError::Parse {
            path: path.to_string_lossy().to_string(),
            message: "tree-sitter parse returned None".to_string(),
        })?;

        let functions = self.lang.extract_functions(&tree, &source, path)?;
        debug!(path = %path.display(), functions = functions.len(), "Parsed file");
        Ok(functions)
    }
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<glob::Pattern>> {
    patterns
        .iter()
        .map(|p| {
            glob::Pattern::new(p).map_err(|e| GraphError::Pattern {
                pattern: p.clone(),
                message: e.to_string(),
            })
        })
        .collect()
}
