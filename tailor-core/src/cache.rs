//! Inter-result cache: persists `(func_list, func_dict)` so a rerun can skip
//! extraction. Writes go through a temp file in the target directory that is
//! renamed into place, so a reader never sees a half-written bundle.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tailor_graphs::{FuncDict, FunctionId, FunctionRecord};
use tracing::{debug, info, instrument};

use crate::error::CacheError;

pub const BUNDLE_FILE: &str = "inter_results.json";
const FORMAT_VERSION: u32 = 2;

/// Extraction output as held in memory between stages.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InterResults {
    pub func_list: Vec<FunctionRecord>,
    pub func_dict: FuncDict,
}

#[derive(Serialize)]
struct BundleRef<'a> {
    format_version: u32,
    func_list: &'a [FunctionRecord],
    func_dict: &'a FuncDict,
}

#[derive(Deserialize)]
struct Bundle {
    format_version: u32,
    func_list: Vec<FunctionRecord>,
    func_dict: FuncDict,
}

/// Cache rooted at an `iresult_path` directory.
#[derive(Debug, Clone)]
pub struct InterResultCache {
    dir: PathBuf,
}

impl InterResultCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn bundle_path(&self) -> PathBuf {
        self.dir.join(BUNDLE_FILE)
    }

    pub fn exists(&self) -> bool {
        self.bundle_path().is_file()
    }

    #[instrument(skip_all, name = "cache_store", fields(functions = func_list.len()))]
    pub fn store(&self, func_list: &[FunctionRecord], func_dict: &FuncDict) -> Result<PathBuf, CacheError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.bundle_path();

        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer(
                &mut writer,
                &BundleRef {
                    format_version: FORMAT_VERSION,
                    func_list,
                    func_dict,
                },
            )?;
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| CacheError::Io(e.error))?;

        info!(path = %path.display(), cpgs = func_dict.len(), "Stored inter-result bundle");
        Ok(path)
    }

    #[instrument(skip_all, name = "cache_load")]
    pub fn load(&self) -> Result<InterResults, CacheError> {
        let path = self.bundle_path();
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CacheError::Missing(path));
            }
            Err(e) => return Err(e.into()),
        };

        let bundle: Bundle =
            serde_json::from_reader(BufReader::new(file)).map_err(|e| CacheError::Corrupt {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        if bundle.format_version != FORMAT_VERSION {
            return Err(CacheError::Corrupt {
                path,
                reason: format!(
                    "format version {} (expected {FORMAT_VERSION})",
                    bundle.format_version
                ),
            });
        }

        let results = InterResults {
            func_list: bundle.func_list,
            func_dict: bundle.func_dict,
        };
        validate(&results).map_err(|reason| CacheError::Corrupt {
            path: path.clone(),
            reason,
        })?;

        info!(path = %path.display(), functions = results.func_list.len(), "Loaded inter-result bundle");
        Ok(results)
    }
}

/// Check the structural invariants a trusted bundle must satisfy.
pub fn validate(results: &InterResults) -> Result<(), String> {
    let mut ids = BTreeSet::new();
    for record in &results.func_list {
        if !ids.insert(record.id) {
            return Err(format!("duplicate function id {}", record.id));
        }
    }
    let keys: BTreeSet<FunctionId> = results.func_dict.keys().copied().collect();
    if keys != ids {
        return Err(format!(
            "func_dict covers {} ids but func_list has {}",
            keys.len(),
            ids.len()
        ));
    }

    for (id, cpg) in &results.func_dict {
        if cpg.function != *id {
            return Err(format!("CPG keyed {id} claims function {}", cpg.function));
        }
        if cpg.nodes.is_empty() {
            return Err(format!("CPG {id} has no nodes"));
        }
        for (index, node) in cpg.nodes.iter().enumerate() {
            if node.id.0 as usize != index {
                return Err(format!("CPG {id}: node {} stored at index {index}", node.id.0));
            }
        }
        if let Some(edge) = cpg
            .edges
            .iter()
            .find(|e| !cpg.contains_node(e.src) || !cpg.contains_node(e.dst))
        {
            return Err(format!(
                "CPG {id}: {} edge {} -> {} leaves the graph",
                edge.kind.as_str(),
                edge.src.0,
                edge.dst.0
            ));
        }
        for call in &cpg.calls {
            let Some(callee) = results.func_dict.get(&call.callee) else {
                return Err(format!("CPG {id}: call into unknown function {}", call.callee));
            };
            if !cpg.contains_node(call.site) || !callee.contains_node(call.entry) {
                return Err(format!("CPG {id}: call edge to {} out of range", call.callee));
            }
        }
        if cpg.unresolved.iter().any(|u| !cpg.contains_node(u.site)) {
            return Err(format!("CPG {id}: unresolved call site out of range"));
        }
    }
    debug!(cpgs = results.func_dict.len(), "Bundle invariants hold");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tailor_graphs::{AstNode, AstRole, CallInfo, CpgBuilder, TextRange};

    fn leaf(kind: &str, token: &str, role: Option<AstRole>) -> AstNode {
        AstNode {
            kind: kind.to_string(),
            token: Some(token.to_string()),
            span: TextRange::default(),
            role,
            children: Vec::new(),
        }
    }

    fn corpus() -> InterResults {
        let call = AstNode {
            kind: "call_expression".to_string(),
            token: None,
            span: TextRange::default(),
            role: Some(AstRole::Call(CallInfo {
                callee: "g".to_string(),
                qualifier: None,
                arg_count: 0,
            })),
            children: vec![leaf("identifier", "g", None)],
        };
        let records: Vec<FunctionRecord> = [("f", Some(call)), ("g", Some(leaf("return_statement", "0", None))), ("h", None)]
            .into_iter()
            .enumerate()
            .map(|(i, (name, ast_root))| FunctionRecord {
                id: FunctionId(i as u32),
                source_file: "a.c".into(),
                name: name.to_string(),
                qualified_name: name.to_string(),
                arity: 0,
                span: TextRange::default(),
                ast_root,
            })
            .collect();
        let built = CpgBuilder::new().build(&records);
        InterResults {
            func_list: records,
            func_dict: built.func_dict,
        }
    }

    #[test]
    fn round_trip_is_exact() {
        let dir = tempfile::tempdir().unwrap();
        let cache = InterResultCache::new(dir.path().join("iresult"));
        let original = corpus();
        cache.store(&original.func_list, &original.func_dict).unwrap();

        let loaded = cache.load().unwrap();
        assert_eq!(loaded, original);
        // only the bundle is left behind, no temp files
        let entries: Vec<_> = fs::read_dir(dir.path().join("iresult")).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn truncated_bundle_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let cache = InterResultCache::new(dir.path());
        let original = corpus();
        let path = cache.store(&original.func_list, &original.func_dict).unwrap();
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

        assert!(matches!(cache.load(), Err(CacheError::Corrupt { .. })));
    }

    #[test]
    fn dangling_call_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let cache = InterResultCache::new(dir.path());
        let mut tampered = corpus();
        tampered.func_dict.remove(&FunctionId(1));
        tampered.func_list.retain(|r| r.id != FunctionId(1));
        cache.store(&tampered.func_list, &tampered.func_dict).unwrap();

        let err = cache.load().unwrap_err();
        assert!(err.to_string().contains("unknown function 1"), "{err}");
    }

    #[test]
    fn missing_bundle_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let cache = InterResultCache::new(dir.path());
        assert!(!cache.exists());
        assert!(matches!(cache.load(), Err(CacheError::Missing(_))));
    }

    #[test]
    fn deeply_nested_ast_round_trips() {
        // a0 + a1 + ... + a299 parses into a left-leaning chain 300 levels deep
        let mut ast = leaf("identifier", "a0", Some(AstRole::Use));
        for i in 1..300 {
            ast = AstNode {
                kind: "binary_expression".to_string(),
                token: None,
                span: TextRange::default(),
                role: None,
                children: vec![ast, leaf("+", "+", None), leaf("identifier", &format!("a{i}"), Some(AstRole::Use))],
            };
        }
        let root = AstNode {
            kind: "return_statement".to_string(),
            token: None,
            span: TextRange::default(),
            role: Some(AstRole::Jump),
            children: vec![ast],
        };
        let records = vec![FunctionRecord {
            id: FunctionId(0),
            source_file: "deep.c".into(),
            name: "deep".to_string(),
            qualified_name: "deep".to_string(),
            arity: 0,
            span: TextRange::default(),
            ast_root: Some(root),
        }];
        let built = CpgBuilder::new().build(&records);

        let dir = tempfile::tempdir().unwrap();
        let cache = InterResultCache::new(dir.path());
        cache.store(&records, &built.func_dict).unwrap();
        let loaded = cache.load().unwrap();
        assert_eq!(loaded.func_list, records);
        assert_eq!(loaded.func_dict, built.func_dict);
        assert_eq!(loaded.func_list[0].ast_root.as_ref().map(AstNode::size), Some(1 + 299 * 3 + 1));
    }
}
