//! Run driver: extraction → cache → encoding → statistics, and the training
//! entry point that consumes an encoding directory.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;
use tailor_graphs::Lang;
use tracing::{info, instrument, warn};

use crate::cache::{InterResultCache, InterResults};
use crate::config::TailorConfig;
use crate::context::RunContext;
use crate::dataset::{DataGenerator, Dataset, SplitSummary};
use crate::encode::EncodeStats;
use crate::error::{CacheError, ConfigError, Result};
use crate::frontend::frontend_for;
use crate::labels::{self, DirectoryLabelSource, LabelSource};
use crate::model::{self, SglModel, sgl::SglConfig};
use crate::stats::CpgStatistics;
use crate::train::{TrainReport, TrainingLoop};
use crate::types::Task;

pub const PRETRAIN_DIR: &str = "pretrain";
pub const MODEL_DIR: &str = "model";

/// What the `extract` driver should do.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub lang: Lang,
    pub task: Task,
    pub src_path: Option<PathBuf>,
    pub encode_path: Option<PathBuf>,
    pub iresult_path: Option<PathBuf>,
    pub encoding: bool,
    pub store_iresult: bool,
    pub load_iresult: bool,
    pub statistics: bool,
}

impl ExtractOptions {
    pub fn new(lang: Lang, task: Task) -> Self {
        Self {
            lang,
            task,
            src_path: None,
            encode_path: None,
            iresult_path: None,
            encoding: false,
            store_iresult: false,
            load_iresult: false,
            statistics: false,
        }
    }

    /// Check that every enabled stage has the directory it needs.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if (self.store_iresult || self.load_iresult) && self.iresult_path.is_none() {
            return Err(ConfigError::Invalid(
                "--store_iresult and --load_iresult need --iresult_path".into(),
            ));
        }
        if self.encoding && self.encode_path.is_none() {
            return Err(ConfigError::Invalid("--encoding needs --encode_path".into()));
        }
        if !self.load_iresult && self.src_path.is_none() {
            return Err(ConfigError::Invalid(
                "extraction needs --src_path (or --load_iresult to reuse a cached bundle)".into(),
            ));
        }
        Ok(())
    }
}

/// Where the functions and CPGs of this run came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Origin {
    Extracted,
    Cache,
    /// The bundle was corrupt and the source tree was re-extracted.
    Reextracted,
}

/// Summary of one `extract` run.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractStats {
    pub origin: Origin,
    pub functions: usize,
    pub files_parsed: usize,
    pub failed_files: usize,
    pub malformed: usize,
    pub degenerate: usize,
    pub resolved_calls: usize,
    pub unresolved_calls: usize,
    pub stored_bundle: Option<PathBuf>,
    pub label_file: Option<PathBuf>,
    #[serde(skip)]
    pub encoding: Option<EncodeStats>,
    pub statistics: Option<CpgStatistics>,
    pub duration: Duration,
}

impl ExtractStats {
    fn new(origin: Origin) -> Self {
        Self {
            origin,
            functions: 0,
            files_parsed: 0,
            failed_files: 0,
            malformed: 0,
            degenerate: 0,
            resolved_calls: 0,
            unresolved_calls: 0,
            stored_bundle: None,
            label_file: None,
            encoding: None,
            statistics: None,
            duration: Duration::ZERO,
        }
    }
}

/// Run the extraction driver.
#[instrument(skip_all, name = "extract_pipeline", fields(lang = %opts.lang, task = %opts.task))]
pub fn run_extract(ctx: &RunContext, config: &TailorConfig, opts: &ExtractOptions) -> Result<(InterResults, ExtractStats)> {
    let start = Instant::now();
    opts.validate()?;
    let frontend = frontend_for(opts.lang);

    let mut loaded = None;
    let mut origin = Origin::Extracted;
    if opts.load_iresult {
        if let Some(dir) = &opts.iresult_path {
            match InterResultCache::new(dir).load() {
                Ok(results) => {
                    info!(functions = results.func_list.len(), path = %dir.display(), "Loaded inter-results");
                    loaded = Some(results);
                    origin = Origin::Cache;
                }
                Err(e @ CacheError::Corrupt { .. }) if config.extraction.allow_reextract && opts.src_path.is_some() => {
                    warn!(error = %e, "Inter-result bundle rejected, re-extracting");
                    origin = Origin::Reextracted;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    let mut stats = ExtractStats::new(origin);
    let results = match loaded {
        Some(results) => results,
        None => {
            let src = opts.src_path.as_deref().ok_or_else(|| {
                ConfigError::Invalid("extraction needs --src_path".into())
            })?;
            let extracted = frontend.extract(ctx, src, &config.extraction)?;
            for (file, err) in &extracted.errors {
                warn!(file = %file, error = %err, "Skipped source file");
            }
            stats.files_parsed = extracted.files_parsed;
            stats.failed_files = extracted.errors.len();
            stats.malformed = extracted.malformed_count();

            let built = frontend.build_cpg(ctx, &extracted.functions);
            stats.degenerate = built.degenerate;
            stats.resolved_calls = built.calls.resolved;
            stats.unresolved_calls = built.calls.unresolved;
            InterResults {
                func_list: extracted.functions,
                func_dict: built.func_dict,
            }
        }
    };
    stats.functions = results.func_list.len();

    if opts.store_iresult && origin != Origin::Cache {
        if let Some(dir) = &opts.iresult_path {
            let path = InterResultCache::new(dir).store(&results.func_list, &results.func_dict)?;
            info!(path = %path.display(), "Stored inter-results");
            stats.stored_bundle = Some(path);
        }
    }

    if opts.encoding {
        if let Some(out_dir) = &opts.encode_path {
            std::fs::create_dir_all(out_dir).map_err(crate::error::EncodeError::from)?;
            let label_file = match &config.encoding.label_dir {
                Some(dir) => labels::copy_labels(&DirectoryLabelSource::new(dir), opts.task, out_dir)?,
                None => missing_label_dir(opts.task, out_dir)?,
            };
            let encoded = frontend.batch_encode(ctx, opts.task, &results, label_file.as_deref(), out_dir)?;
            stats.label_file = label_file;
            stats.encoding = Some(encoded);
        }
    }

    if opts.statistics {
        stats.statistics = Some(frontend.print_statistics(ctx, &results.func_dict));
    }

    stats.duration = start.elapsed();
    info!(functions = stats.functions, origin = ?stats.origin, duration = ?stats.duration, "Extract run finished");
    Ok((results, stats))
}

/// Without a label directory there is nothing to copy: fatal when the task
/// needs labels, a warning otherwise.
fn missing_label_dir(task: Task, out_dir: &Path) -> Result<Option<PathBuf>> {
    let source = MissingLabelSource { out_dir };
    Ok(labels::copy_labels(&source, task, out_dir)?)
}

#[derive(Debug)]
struct MissingLabelSource<'a> {
    out_dir: &'a Path,
}

impl LabelSource for MissingLabelSource<'_> {
    fn locate(&self, task: Task) -> std::result::Result<PathBuf, crate::error::LabelError> {
        // A label file already sitting in the encode directory is reused.
        let existing = self.out_dir.join(task.label_file_name());
        if existing.is_file() {
            return Ok(existing);
        }
        Err(crate::error::LabelError::MissingLabelFile {
            task,
            expected: existing,
            remediation: labels::remediation(task).to_string(),
        })
    }
}

/// Summary of one `train` run.
#[derive(Debug, Clone, Serialize)]
pub struct TrainSummary {
    pub task: Task,
    pub functions: usize,
    pub examples: usize,
    pub split: SplitSummary,
    pub report: TrainReport,
    pub duration: Duration,
}

/// Load an encoding directory, split it, and run the training loop.
#[instrument(skip_all, name = "train_pipeline", fields(dir = %encode_dir.display()))]
pub fn run_training(ctx: &RunContext, config: &TailorConfig, encode_dir: &Path) -> Result<TrainSummary> {
    let start = Instant::now();
    config.validate()?;
    let dataset = Dataset::load(encode_dir)?;
    let task = dataset.task;
    info!(%task, graphs = dataset.graphs.len(), examples = dataset.examples.len(), "Dataset loaded");

    let (split, split_summary) = DataGenerator::new(config.split.clone()).build_split(task, &dataset.examples);

    let mut training = TrainingLoop::new(config.training.clone(), config.split.last_batch);
    let pretrain_dir = encode_dir.join(PRETRAIN_DIR);
    let table = training.prepare_embedding(ctx, &dataset, &config.embedding, &pretrain_dir)?;

    let mut model = SglModel::new(
        task,
        SglConfig {
            hidden: config.training.hidden_dim,
            fine_tune: config.training.fine_tune_embedding,
            seed: config.training.seed,
        },
        &table,
        &dataset,
    );
    let checkpoint = model::checkpoint_path(&encode_dir.join(MODEL_DIR));
    training.resume(&mut model, &checkpoint)?;

    let report = training.run(ctx, &mut model, &split, &checkpoint)?;
    let summary = TrainSummary {
        task,
        functions: dataset.graphs.len(),
        examples: dataset.examples.len(),
        split: split_summary,
        report,
        duration: start.elapsed(),
    };
    info!(duration = ?summary.duration, "Train run finished");
    Ok(summary)
}
