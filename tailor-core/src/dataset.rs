//! Data generator: loads an encoding directory, splits the joined examples
//! into train / validation / test, and slices shuffled mini-batches.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rayon::prelude::*;
use serde::Serialize;
use tailor_graphs::FunctionId;
use tracing::{info, instrument, warn};

use crate::config::{LastBatch, SplitSection};
use crate::encode::{self, EncodedGraph, NIL_TOKEN, Vocabulary};
use crate::error::DatasetError;
use crate::types::{Example, Task};

/// Positive ratios outside this band are reported as imbalanced.
pub const BALANCED_RANGE: (f64, f64) = (0.2, 0.8);

/// An encoding directory loaded into memory.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub dir: PathBuf,
    pub task: Task,
    pub vocab: Vocabulary,
    pub graphs: BTreeMap<FunctionId, EncodedGraph>,
    pub examples: Vec<Example>,
}

impl Dataset {
    #[instrument(skip_all, name = "dataset_load", fields(dir = %dir.display()))]
    pub fn load(dir: &Path) -> Result<Self, DatasetError> {
        if !dir.is_dir() {
            return Err(DatasetError::MissingEncoding(dir.to_path_buf()));
        }
        let index = encode::read_index(dir)?;
        let vocab = encode::read_vocab(dir)?;
        let functions = encode::read_functions(dir)?;

        let graphs = functions
            .par_iter()
            .map(|f| encode::read_graph(dir, f.id).map(|g| (f.id, g)))
            .collect::<Result<BTreeMap<_, _>, _>>()?;

        for example in &index.examples {
            if let Some(missing) = example.functions.iter().find(|f| !graphs.contains_key(f)) {
                return Err(DatasetError::DanglingExample {
                    example: example.id.clone(),
                    function: *missing,
                });
            }
        }
        info!(
            task = %index.task,
            graphs = graphs.len(),
            examples = index.examples.len(),
            "Loaded encoded dataset"
        );
        Ok(Self {
            dir: dir.to_path_buf(),
            task: index.task,
            vocab,
            graphs,
            examples: index.examples,
        })
    }

    /// Node-type and token sequences per graph, in node order, for pretraining.
    pub fn sequences(&self) -> (Vec<Vec<String>>, Vec<Vec<String>>) {
        self.graphs
            .values()
            .map(|graph| {
                graph
                    .nodes
                    .iter()
                    .map(|[type_id, token_id, _]| {
                        let kind = self.vocab.node_types.get(*type_id as usize);
                        let token = self.vocab.tokens.get(*token_id as usize);
                        (
                            kind.map_or_else(|| "<unknown>".to_string(), Clone::clone),
                            token.map_or_else(|| NIL_TOKEN.to_string(), Clone::clone),
                        )
                    })
                    .unzip::<String, String, Vec<String>, Vec<String>>()
            })
            .unzip()
    }
}

// ── Splits ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Split {
    pub train: Vec<Example>,
    pub validation: Vec<Example>,
    pub test: Vec<Example>,
}

impl Split {
    pub fn len(&self) -> usize {
        self.train.len() + self.validation.len() + self.test.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Functions referenced by a partition.
pub fn function_ids(examples: &[Example]) -> BTreeSet<FunctionId> {
    examples.iter().flat_map(|e| e.functions.iter().copied()).collect()
}

pub fn positive_ratio(examples: &[Example]) -> f64 {
    if examples.is_empty() {
        return 0.0;
    }
    examples.iter().filter(|e| e.is_positive()).count() as f64 / examples.len() as f64
}

/// Skewed label distribution, surfaced but never fatal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DatasetImbalanceWarning {
    pub positive_ratio: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SplitSummary {
    pub train: usize,
    pub validation: usize,
    pub test: usize,
    pub global_positive_ratio: f64,
    /// Pairs dropped because their functions landed in different partitions.
    pub cross_partition_pairs: usize,
    pub imbalance: Option<DatasetImbalanceWarning>,
    /// Names of partitions that ended up empty.
    pub empty_partitions: Vec<&'static str>,
}

#[derive(Debug, Clone)]
pub struct DataGenerator {
    config: SplitSection,
}

impl DataGenerator {
    pub fn new(config: SplitSection) -> Self {
        Self { config }
    }

    /// Build the task's split over already-joined examples.
    pub fn build_split(&self, task: Task, examples: &[Example]) -> (Split, SplitSummary) {
        let split = if task.is_pairwise() && self.config.generalization {
            self.function_disjoint_split(examples)
        } else {
            self.stratified_split(examples)
        };

        let mut summary = SplitSummary {
            train: split.train.len(),
            validation: split.validation.len(),
            test: split.test.len(),
            global_positive_ratio: positive_ratio(examples),
            cross_partition_pairs: examples.len() - split.len(),
            ..SplitSummary::default()
        };
        let (lo, hi) = BALANCED_RANGE;
        if !examples.is_empty()
            && !(lo..=hi).contains(&summary.global_positive_ratio)
        {
            warn!(
                positive_ratio = summary.global_positive_ratio,
                "Dataset is imbalanced; consider augmentation or class weighting"
            );
            summary.imbalance = Some(DatasetImbalanceWarning {
                positive_ratio: summary.global_positive_ratio,
            });
        }
        for (name, part) in [
            ("train", &split.train),
            ("validation", &split.validation),
            ("test", &split.test),
        ] {
            if part.is_empty() {
                summary.empty_partitions.push(name);
            }
        }
        info!(
            task = %task,
            train = summary.train,
            validation = summary.validation,
            test = summary.test,
            dropped_pairs = summary.cross_partition_pairs,
            "Split built"
        );
        (split, summary)
    }

    /// Per-class proportional slicing. Validation and test counts are
    /// rounded per class and train takes the remainder, so every partition
    /// stays close to the global positive ratio.
    fn stratified_split(&self, examples: &[Example]) -> Split {
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut split = Split::default();
        for label in [0u8, 1] {
            let mut class: Vec<Example> = examples.iter().filter(|e| e.label == label).cloned().collect();
            class.sort_by(|a, b| a.id.cmp(&b.id));
            class.shuffle(&mut rng);

            let (n_val, n_test) = self.holdout_counts(class.len());
            let test = class.split_off(class.len() - n_test);
            let validation = class.split_off(class.len() - n_val);
            split.train.extend(class);
            split.validation.extend(validation);
            split.test.extend(test);
        }
        for part in [&mut split.train, &mut split.validation, &mut split.test] {
            part.sort_by(|a, b| a.id.cmp(&b.id));
        }
        split
    }

    /// Clone pairs with train, validation and test over disjoint function sets.
    fn function_disjoint_split(&self, examples: &[Example]) -> Split {
        let mut functions: Vec<FunctionId> = function_ids(examples).into_iter().collect();
        functions.shuffle(&mut StdRng::seed_from_u64(self.config.seed));

        let (n_val, n_test) = self.holdout_counts(functions.len());
        let n_train = functions.len() - n_val - n_test;
        let group: BTreeMap<FunctionId, usize> = functions
            .iter()
            .enumerate()
            .map(|(i, f)| {
                let g = if i < n_train {
                    0
                } else if i < n_train + n_val {
                    1
                } else {
                    2
                };
                (*f, g)
            })
            .collect();

        let mut split = Split::default();
        for example in examples {
            let groups: BTreeSet<usize> = example
                .functions
                .iter()
                .filter_map(|f| group.get(f).copied())
                .collect();
            let part = match (groups.len(), groups.first().copied()) {
                (1, Some(0)) => &mut split.train,
                (1, Some(1)) => &mut split.validation,
                (1, Some(2)) => &mut split.test,
                _ => continue,
            };
            part.push(example.clone());
        }
        split
    }

    /// Validation and test sizes for `n` items. Train and validation are
    /// rounded from their own ratios; test takes the remainder.
    fn holdout_counts(&self, n: usize) -> (usize, usize) {
        let n_train = (((n as f64) * self.config.train_ratio).round() as usize).min(n);
        let n_val = (((n as f64) * self.config.validation_ratio).round() as usize).min(n - n_train);
        (n_val, n - n_train - n_val)
    }
}

// ── Batching ───────────────────────────────────────────────────────

/// Reordered copy of `examples`; the input is left untouched.
pub fn shuffle(examples: &[Example], seed: u64) -> Vec<Example> {
    let mut shuffled = examples.to_vec();
    shuffled.shuffle(&mut StdRng::seed_from_u64(seed));
    shuffled
}

pub fn batch_count(n: usize, batch_size: usize, policy: LastBatch) -> usize {
    if batch_size == 0 {
        return 0;
    }
    match policy {
        LastBatch::Keep => n.div_ceil(batch_size),
        LastBatch::Drop => n / batch_size,
    }
}

/// Fixed-size windows over `examples` under the last-batch policy.
pub fn batches(
    examples: &[Example],
    batch_size: usize,
    policy: LastBatch,
) -> impl Iterator<Item = &[Example]> {
    let count = batch_count(examples.len(), batch_size, policy);
    examples.chunks(batch_size.max(1)).take(count)
}
