//! Batch encoding: CPGs to fixed-schema graph tensors on disk.
//!
//! Layout of an encoding directory:
//!
//! ```text
//! vocab.json            node-type and token vocabularies (sorted)
//! functions.json        one entry per encoded function, by id
//! graphs/<id>.json      one EncodedGraph per function
//! index.json            task examples after the label join
//! <label file>          copied from the label source
//! ```
//!
//! Every id is derived from sorted inputs, so the same `func_dict` always
//! produces the same bytes.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use rayon::prelude::*;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tailor_graphs::{Cpg, EdgeKind, FuncDict, FunctionId, FunctionRecord};
use tracing::{info, instrument};

use crate::context::RunContext;
use crate::error::{DatasetError, EncodeError, Result};
use crate::labels::{self, JoinSummary};
use crate::types::{Example, Task};

pub const VOCAB_FILE: &str = "vocab.json";
pub const FUNCTIONS_FILE: &str = "functions.json";
pub const INDEX_FILE: &str = "index.json";
pub const GRAPHS_DIR: &str = "graphs";

/// Token used for nodes that carry no source text.
pub const NIL_TOKEN: &str = "<nil>";

// ── Vocabulary ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Vocabulary {
    pub node_types: Vec<String>,
    pub tokens: Vec<String>,
}

impl Vocabulary {
    /// Sorted, de-duplicated vocabularies over every node in the corpus.
    pub fn build<'a>(cpgs: impl IntoIterator<Item = &'a Cpg>) -> Self {
        let mut node_types = BTreeSet::new();
        let mut tokens = BTreeSet::new();
        for cpg in cpgs {
            for node in &cpg.nodes {
                node_types.insert(node.kind.as_str());
                tokens.insert(node.token.as_deref().unwrap_or(NIL_TOKEN));
            }
        }
        Self {
            node_types: node_types.into_iter().map(str::to_string).collect(),
            tokens: tokens.into_iter().map(str::to_string).collect(),
        }
    }

    pub fn type_id(&self, kind: &str) -> Option<u32> {
        lookup(&self.node_types, kind)
    }

    pub fn token_id(&self, token: Option<&str>) -> Option<u32> {
        lookup(&self.tokens, token.unwrap_or(NIL_TOKEN))
    }
}

fn lookup(sorted: &[String], key: &str) -> Option<u32> {
    sorted
        .binary_search_by(|probe| probe.as_str().cmp(key))
        .ok()
        .and_then(|i| u32::try_from(i).ok())
}

// ── Encoded artifacts ──────────────────────────────────────────────

/// Tensor view of one CPG.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedGraph {
    pub function_id: FunctionId,
    /// `[type_id, token_id, position]` per node, in node-id order.
    pub nodes: Vec<[u32; 3]>,
    /// `[src, dst]` pairs per edge kind (`ast`, `cfg`, `dfg`).
    pub edges: BTreeMap<String, Vec<[u32; 2]>>,
    /// Resolved calls as `[site, callee_function_id]`.
    pub calls: Vec<[u32; 2]>,
    /// Graph-level label for per-function tasks, once joined.
    pub label: Option<u8>,
}

impl EncodedGraph {
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Edges of all kinds, for message passing.
    pub fn all_edges(&self) -> impl Iterator<Item = &[u32; 2]> {
        self.edges.values().flatten()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionEntry {
    pub id: FunctionId,
    pub name: String,
    pub qualified_name: String,
    pub source_file: PathBuf,
    pub nodes: usize,
}

/// Examples available to the data generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedIndex {
    pub task: Task,
    pub label_file: Option<String>,
    pub examples: Vec<Example>,
}

#[derive(Debug, Clone, Default)]
pub struct EncodeStats {
    pub graphs: usize,
    pub examples: usize,
    pub node_types: usize,
    pub tokens: usize,
    pub join: Option<JoinSummary>,
    pub duration: Duration,
}

// ── Encoder ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct BatchEncoder {
    task: Task,
}

impl BatchEncoder {
    pub fn new(task: Task) -> Self {
        Self { task }
    }

    /// Encode every CPG and write the encoding directory.
    ///
    /// `label_file` is the task's label file (normally the copy already placed
    /// in `out_dir`); without one the index holds no examples.
    #[instrument(skip_all, name = "batch_encode", fields(task = %self.task, functions = func_list.len()))]
    pub fn encode(
        &self,
        ctx: &RunContext,
        func_list: &[FunctionRecord],
        func_dict: &FuncDict,
        label_file: Option<&Path>,
        out_dir: &Path,
    ) -> Result<EncodeStats> {
        let start = Instant::now();
        let vocab = Vocabulary::build(func_dict.values());

        ctx.progress.start("Encoding graphs", Some(func_dict.len() as u64));
        let mut graphs: Vec<EncodedGraph> = func_dict
            .par_iter()
            .map(|(_, cpg)| {
                let graph = encode_graph(&vocab, cpg);
                ctx.progress.advance(1);
                graph
            })
            .collect();
        graphs.sort_by_key(|g| g.function_id);
        ctx.progress.finish();

        let (examples, join) = match label_file {
            Some(path) => {
                let parsed = labels::read_labels(path, self.task)?;
                let encoded: BTreeSet<FunctionId> = func_dict.keys().copied().collect();
                let (examples, mut join) = labels::join_labels(&parsed.records, &encoded);
                let mut issues = parsed.issues;
                issues.append(&mut join.issues);
                join.issues = issues;
                (examples, Some(join))
            }
            None => (Vec::new(), None),
        };
        if !self.task.is_pairwise() {
            let by_function: BTreeMap<FunctionId, u8> = examples
                .iter()
                .filter_map(|e| e.functions.first().map(|f| (*f, e.label)))
                .collect();
            for graph in &mut graphs {
                graph.label = by_function.get(&graph.function_id).copied();
            }
        }

        let functions: Vec<FunctionEntry> = func_list
            .iter()
            .filter(|r| func_dict.contains_key(&r.id))
            .map(|r| FunctionEntry {
                id: r.id,
                name: r.name.clone(),
                qualified_name: r.qualified_name.clone(),
                source_file: r.source_file.clone(),
                nodes: func_dict.get(&r.id).map_or(0, Cpg::node_count),
            })
            .collect();
        let index = EncodedIndex {
            task: self.task,
            label_file: label_file.map(|_| self.task.label_file_name().to_string()),
            examples,
        };

        write_directory(out_dir, &vocab, &functions, &graphs, &index)?;

        let stats = EncodeStats {
            graphs: graphs.len(),
            examples: index.examples.len(),
            node_types: vocab.node_types.len(),
            tokens: vocab.tokens.len(),
            join,
            duration: start.elapsed(),
        };
        info!(
            graphs = stats.graphs,
            examples = stats.examples,
            node_types = stats.node_types,
            tokens = stats.tokens,
            out = %out_dir.display(),
            "Batch encoding complete"
        );
        Ok(stats)
    }
}

/// Encode one CPG against a corpus vocabulary.
pub fn encode_graph(vocab: &Vocabulary, cpg: &Cpg) -> EncodedGraph {
    let nodes = cpg
        .nodes
        .iter()
        .map(|n| {
            [
                vocab.type_id(&n.kind).unwrap_or(u32::MAX),
                vocab.token_id(n.token.as_deref()).unwrap_or(u32::MAX),
                n.id.0,
            ]
        })
        .collect();
    let edges = EdgeKind::ALL
        .iter()
        .map(|kind| {
            let pairs = cpg.edges_of(*kind).map(|e| [e.src.0, e.dst.0]).collect();
            (kind.as_str().to_string(), pairs)
        })
        .collect();
    let mut calls: Vec<[u32; 2]> = cpg.calls.iter().map(|c| [c.site.0, c.callee.0]).collect();
    calls.sort_unstable();

    EncodedGraph {
        function_id: cpg.function,
        nodes,
        edges,
        calls,
        label: None,
    }
}

fn write_directory(
    out_dir: &Path,
    vocab: &Vocabulary,
    functions: &[FunctionEntry],
    graphs: &[EncodedGraph],
    index: &EncodedIndex,
) -> std::result::Result<(), EncodeError> {
    let graphs_dir = out_dir.join(GRAPHS_DIR);
    if graphs_dir.exists() {
        fs::remove_dir_all(&graphs_dir)?;
    }
    fs::create_dir_all(&graphs_dir)?;

    graphs.par_iter().try_for_each(|graph| {
        let bytes = serde_json::to_vec(graph)?;
        fs::write(graphs_dir.join(format!("{}.json", graph.function_id)), bytes)?;
        Ok::<_, EncodeError>(())
    })?;

    fs::write(out_dir.join(VOCAB_FILE), serde_json::to_vec_pretty(vocab)?)?;
    fs::write(out_dir.join(FUNCTIONS_FILE), serde_json::to_vec_pretty(functions)?)?;
    fs::write(out_dir.join(INDEX_FILE), serde_json::to_vec_pretty(index)?)?;
    Ok(())
}

// ── Reading back ───────────────────────────────────────────────────

fn read_json<T: DeserializeOwned>(path: &Path) -> std::result::Result<T, DatasetError> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(DatasetError::MissingEncoding(path.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };
    Ok(serde_json::from_slice(&bytes)?)
}

pub fn read_vocab(dir: &Path) -> std::result::Result<Vocabulary, DatasetError> {
    read_json(&dir.join(VOCAB_FILE))
}

pub fn read_functions(dir: &Path) -> std::result::Result<Vec<FunctionEntry>, DatasetError> {
    read_json(&dir.join(FUNCTIONS_FILE))
}

pub fn read_index(dir: &Path) -> std::result::Result<EncodedIndex, DatasetError> {
    read_json(&dir.join(INDEX_FILE))
}

pub fn read_graph(dir: &Path, id: FunctionId) -> std::result::Result<EncodedGraph, DatasetError> {
    read_json(&dir.join(GRAPHS_DIR).join(format!("{id}.json")))
}
