//! Node embedding pretraining.
//!
//! Every CPG node is an entity `(node type, token)`. Walking a function's
//! nodes in pre-order gives a sequence; a skip-gram model with negative
//! sampling learns one vector per entity from co-occurrence inside a window.
//! Row 0 of the table is reserved for entities never seen in training.

use std::collections::BTreeSet;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::config::EmbeddingSection;
use crate::context::RunContext;
use crate::error::EmbedError;

pub const EMBEDDING_FILE: &str = "embedding.json";
const FORMAT_VERSION: u32 = 1;

/// Row index reserved for unseen `(type, token)` pairs.
pub const UNKNOWN_ROW: usize = 0;

/// Learned vectors keyed by a sorted `(type, token)` vocabulary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingTable {
    format_version: u32,
    pub dim: usize,
    pub created_at: DateTime<Utc>,
    /// Sorted, unique. Entry `i` owns row `i + 1`.
    pub vocab: Vec<(String, String)>,
    /// `vocab.len() + 1` rows of `dim` floats; row 0 is the unknown vector.
    pub vectors: Vec<Vec<f32>>,
}

impl EmbeddingTable {
    /// Row for an entity, or [`UNKNOWN_ROW`].
    pub fn row_of(&self, node_type: &str, token: &str) -> usize {
        self.vocab
            .binary_search_by(|(t, k)| (t.as_str(), k.as_str()).cmp(&(node_type, token)))
            .map_or(UNKNOWN_ROW, |i| i + 1)
    }

    pub fn rows(&self) -> usize {
        self.vectors.len()
    }

    fn check(&self) -> Result<(), EmbedError> {
        if self.format_version != FORMAT_VERSION {
            return Err(EmbedError::Invalid(format!(
                "format version {} (expected {FORMAT_VERSION})",
                self.format_version
            )));
        }
        if self.vectors.len() != self.vocab.len() + 1 {
            return Err(EmbedError::Invalid(format!(
                "{} rows for {} entities",
                self.vectors.len(),
                self.vocab.len()
            )));
        }
        if self.vectors.iter().any(|v| v.len() != self.dim) {
            return Err(EmbedError::Invalid(format!("row width differs from dim {}", self.dim)));
        }
        if self.vocab.windows(2).any(|w| w[0] >= w[1]) {
            return Err(EmbedError::Invalid("vocabulary is not sorted and unique".to_string()));
        }
        Ok(())
    }
}

/// Skip-gram trainer for the embedding table.
#[derive(Debug, Clone)]
pub struct EmbeddingPretrainer {
    config: EmbeddingSection,
}

impl EmbeddingPretrainer {
    pub fn new(config: EmbeddingSection) -> Self {
        Self { config }
    }

    /// Train a fresh table. `entity_sequences[i]` and `token_sequences[i]`
    /// are the node types and tokens of one function, in traversal order.
    #[instrument(skip_all, name = "init_embedding", fields(sequences = entity_sequences.len()))]
    pub fn init_embedding(
        &self,
        ctx: &RunContext,
        entity_sequences: &[Vec<String>],
        token_sequences: &[Vec<String>],
    ) -> Result<EmbeddingTable, EmbedError> {
        if entity_sequences.len() != token_sequences.len() {
            return Err(EmbedError::Misaligned(format!(
                "{} entity sequences, {} token sequences",
                entity_sequences.len(),
                token_sequences.len()
            )));
        }
        if let Some(i) = entity_sequences
            .iter()
            .zip(token_sequences)
            .position(|(e, t)| e.len() != t.len())
        {
            return Err(EmbedError::Misaligned(format!("sequence {i} lengths differ")));
        }

        let vocab: Vec<(String, String)> = entity_sequences
            .iter()
            .zip(token_sequences)
            .flat_map(|(e, t)| e.iter().cloned().zip(t.iter().cloned()))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if vocab.is_empty() {
            return Err(EmbedError::EmptyCorpus);
        }

        let mut table = EmbeddingTable {
            format_version: FORMAT_VERSION,
            dim: self.config.dim,
            created_at: Utc::now(),
            vocab,
            vectors: Vec::new(),
        };
        let corpus: Vec<Vec<usize>> = entity_sequences
            .iter()
            .zip(token_sequences)
            .map(|(e, t)| e.iter().zip(t).map(|(e, t)| table.row_of(e, t)).collect())
            .collect();

        let rows = table.vocab.len() + 1;
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let bound = 0.5 / self.config.dim as f32;
        let mut input: Vec<Vec<f32>> = (0..rows)
            .map(|row| {
                if row == UNKNOWN_ROW {
                    vec![0.0; self.config.dim]
                } else {
                    (0..self.config.dim).map(|_| rng.gen_range(-bound..bound)).collect()
                }
            })
            .collect();
        let mut output = vec![vec![0.0f32; self.config.dim]; rows];

        ctx.progress.start("Pretraining embedding", Some(self.config.epochs as u64));
        for epoch in 0..self.config.epochs {
            let mut loss = 0.0f64;
            let mut pairs = 0usize;
            for sequence in &corpus {
                for (i, &center) in sequence.iter().enumerate() {
                    let lo = i.saturating_sub(self.config.window);
                    let hi = (i + self.config.window + 1).min(sequence.len());
                    for (j, &context) in sequence.iter().enumerate().take(hi).skip(lo) {
                        if j == i {
                            continue;
                        }
                        loss += self.train_pair(&mut input, &mut output, center, context, &mut rng);
                        pairs += 1;
                    }
                }
            }
            debug!(epoch, pairs, mean_loss = loss / pairs.max(1) as f64, "Embedding epoch");
            ctx.progress.advance(1);
        }
        ctx.progress.finish();

        table.vectors = input;
        info!(entities = table.vocab.len(), dim = table.dim, "Embedding pretrained");
        Ok(table)
    }

    /// One positive pair plus `negatives` sampled rows; returns the pair's loss.
    fn train_pair(
        &self,
        input: &mut [Vec<f32>],
        output: &mut [Vec<f32>],
        center: usize,
        context: usize,
        rng: &mut StdRng,
    ) -> f64 {
        let lr = self.config.learning_rate;
        let rows = input.len();
        let mut grad = vec![0.0f32; self.config.dim];
        let mut loss = 0.0f64;

        let targets = std::iter::once((context, 1.0f32)).chain(
            (0..self.config.negatives)
                .map(|_| (rng.gen_range(1..rows), 0.0f32))
                .filter(|(row, _)| *row != context)
                .collect::<Vec<_>>(),
        );
        for (target, label) in targets {
            let score = sigmoid(dot(&input[center], &output[target]));
            let p = if label > 0.5 { score } else { 1.0 - score };
            loss -= f64::from(p.max(1e-7).ln());
            let g = lr * (label - score);
            for (k, slot) in grad.iter_mut().enumerate() {
                *slot += g * output[target][k];
            }
            for (k, slot) in output[target].iter_mut().enumerate() {
                *slot += g * input[center][k];
            }
        }
        for (slot, delta) in input[center].iter_mut().zip(&grad) {
            *slot += delta;
        }
        loss
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub(crate) fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

pub fn embedding_path(dir: &Path) -> PathBuf {
    dir.join(EMBEDDING_FILE)
}

/// Persist the table under `dir`. Written to a temp file first, so a crash
/// leaves either the old table or the new one.
pub fn store_embedding(table: &EmbeddingTable, dir: &Path) -> Result<PathBuf, EmbedError> {
    fs::create_dir_all(dir)?;
    let path = embedding_path(dir);
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        serde_json::to_writer(&mut writer, table)?;
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(&path).map_err(|e| EmbedError::Io(e.error))?;
    info!(path = %path.display(), entities = table.vocab.len(), "Stored embedding table");
    Ok(path)
}

/// Load a table written by [`store_embedding`].
pub fn load_embedding(dir: &Path) -> Result<EmbeddingTable, EmbedError> {
    let path = embedding_path(dir);
    let bytes = match fs::read(&path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(EmbedError::NotFound(path));
        }
        Err(e) => return Err(e.into()),
    };
    let table: EmbeddingTable = serde_json::from_slice(&bytes)?;
    table.check()?;
    info!(path = %path.display(), entities = table.vocab.len(), "Loaded embedding table");
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seqs(raw: &[&[(&str, &str)]]) -> (Vec<Vec<String>>, Vec<Vec<String>>) {
        raw.iter()
            .map(|s| {
                let pair: (Vec<String>, Vec<String>) = s
                    .iter()
                    .map(|(e, t)| ((*e).to_string(), (*t).to_string()))
                    .unzip();
                pair
            })
            .unzip()
    }

    fn config() -> EmbeddingSection {
        EmbeddingSection {
            dim: 8,
            epochs: 2,
            ..EmbeddingSection::default()
        }
    }

    #[test]
    fn one_row_per_entity_plus_unknown() {
        let (entities, tokens) = seqs(&[
            &[("block", "<nil>"), ("identifier", "x"), ("identifier", "y")],
            &[("block", "<nil>"), ("identifier", "x")],
        ]);
        let table = EmbeddingPretrainer::new(config())
            .init_embedding(&RunContext::quiet(), &entities, &tokens)
            .unwrap();
        assert_eq!(table.vocab.len(), 3);
        assert_eq!(table.rows(), 4);
        assert_eq!(table.row_of("block", "<nil>"), 1);
        assert_eq!(table.row_of("identifier", "z"), UNKNOWN_ROW);
        assert!(table.vectors[UNKNOWN_ROW].iter().all(|v| *v == 0.0));
        assert!(table.vectors.iter().flatten().all(|v| v.is_finite()));
    }

    #[test]
    fn seeded_training_is_reproducible() {
        let (entities, tokens) = seqs(&[&[("a", "1"), ("b", "2"), ("c", "3"), ("a", "1")]]);
        let trainer = EmbeddingPretrainer::new(config());
        let first = trainer.init_embedding(&RunContext::quiet(), &entities, &tokens).unwrap();
        let second = trainer.init_embedding(&RunContext::quiet(), &entities, &tokens).unwrap();
        assert_eq!(first.vectors, second.vectors);
    }

    #[test]
    fn rejects_misaligned_and_empty_input() {
        let trainer = EmbeddingPretrainer::new(config());
        let ctx = RunContext::quiet();
        let err = trainer
            .init_embedding(&ctx, &[vec!["a".into()]], &[vec![]])
            .unwrap_err();
        assert!(matches!(err, EmbedError::Misaligned(_)));
        assert!(matches!(trainer.init_embedding(&ctx, &[], &[]), Err(EmbedError::EmptyCorpus)));
    }

    #[test]
    fn store_then_load_keeps_indices() {
        let dir = tempfile::tempdir().unwrap();
        let (entities, tokens) = seqs(&[&[("a", "1"), ("b", "2")]]);
        let table = EmbeddingPretrainer::new(config())
            .init_embedding(&RunContext::quiet(), &entities, &tokens)
            .unwrap();
        store_embedding(&table, dir.path()).unwrap();
        let loaded = load_embedding(dir.path()).unwrap();
        assert_eq!(loaded.vocab, table.vocab);
        assert_eq!(loaded.row_of("b", "2"), table.row_of("b", "2"));
        // rewriting in place leaves exactly the table file behind
        store_embedding(&loaded, dir.path()).unwrap();
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(load_embedding(dir.path()).unwrap().vocab, loaded.vocab);
        assert!(matches!(
            load_embedding(&dir.path().join("nope")),
            Err(EmbedError::NotFound(_))
        ));
    }
}
