use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, ValueEnum};
use tailor_core::config::PretrainMode;
use tailor_core::{RunContext, TrainSummary, Verbosity, run_training};

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum PretrainArg {
    /// Train a fresh embedding table
    Init,
    /// Load the stored embedding table
    LoadEmbedding,
    /// Load the stored embedding table and model checkpoint
    LoadModel,
}

impl From<PretrainArg> for PretrainMode {
    fn from(arg: PretrainArg) -> Self {
        match arg {
            PretrainArg::Init => Self::Init,
            PretrainArg::LoadEmbedding => Self::LoadEmbedding,
            PretrainArg::LoadModel => Self::LoadModel,
        }
    }
}

#[derive(Args, Debug)]
#[allow(clippy::struct_excessive_bools)]
pub struct TrainArgs {
    /// Encoding directory written by `tailor extract --encoding`
    #[arg(long = "encode_path", visible_alias = "encode-path")]
    pub encode_path: PathBuf,

    /// Number of training epochs
    #[arg(long)]
    pub epochs: Option<usize>,

    /// Mini-batch size
    #[arg(long = "batch_size", visible_alias = "batch-size")]
    pub batch_size: Option<usize>,

    /// Base learning rate
    #[arg(long = "learning_rate", visible_alias = "learning-rate")]
    pub learning_rate: Option<f32>,

    /// Decision threshold (score >= threshold is positive)
    #[arg(long)]
    pub threshold: Option<f32>,

    /// Embedding source
    #[arg(long, value_enum)]
    pub pretrain: Option<PretrainArg>,

    /// Save the embedding table and a model checkpoint
    #[arg(long)]
    pub save: bool,

    /// Update embedding rows during supervised training
    #[arg(long = "fine_tune", visible_alias = "fine-tune")]
    pub fine_tune: bool,

    /// Skip supervised training and testing (pretrain and save only)
    #[arg(long = "no_supervised", visible_alias = "no-supervised")]
    pub no_supervised: bool,

    /// Seed for splits, shuffles and initialization
    #[arg(long)]
    pub seed: Option<u64>,

    /// Config file (default: ./tailor.toml when present)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

pub fn run(ctx: &RunContext, args: TrainArgs) -> anyhow::Result<()> {
    let mut config = super::load_config(args.config.as_deref())?;
    let training = &mut config.training;
    if let Some(epochs) = args.epochs {
        training.epochs = epochs;
    }
    if let Some(size) = args.batch_size {
        training.batch_size = size;
    }
    if let Some(lr) = args.learning_rate {
        training.learning_rate = lr;
    }
    if let Some(threshold) = args.threshold {
        training.threshold = threshold;
    }
    if let Some(mode) = args.pretrain {
        training.pretrain = mode.into();
    }
    if let Some(seed) = args.seed {
        training.seed = seed;
        config.split.seed = seed;
        config.embedding.seed = seed;
    }
    let training = &mut config.training;
    training.save_model |= args.save;
    training.fine_tune_embedding |= args.fine_tune;
    if args.no_supervised {
        training.supervised = false;
    }

    let summary = run_training(ctx, &config, &args.encode_path)
        .with_context(|| format!("Training on {} failed", args.encode_path.display()))?;

    if ctx.verbosity > Verbosity::Quiet {
        print_summary(&summary);
    }
    Ok(())
}

fn print_summary(summary: &TrainSummary) {
    println!("Task: {}", summary.task);
    println!("  {:<20} {:>8}", "functions", summary.functions);
    println!("  {:<20} {:>8}", "examples", summary.examples);
    println!("  {:<20} {:>8}", "train", summary.split.train);
    println!("  {:<20} {:>8}", "validation", summary.split.validation);
    println!("  {:<20} {:>8}", "test", summary.split.test);
    if summary.split.cross_partition_pairs > 0 {
        println!("  {:<20} {:>8}", "cross-split pairs", summary.split.cross_partition_pairs);
    }
    println!("  {:<20} {:>8.3}", "positive ratio", summary.split.global_positive_ratio);
    if summary.split.imbalance.is_some() {
        println!("  warning: labels are imbalanced; consider augmentation or weighting");
    }

    for record in &summary.report.epochs {
        let validation = record
            .validation
            .map(|m| format!("  f1={:.4} acc={:.4}", m.f1(), m.accuracy()))
            .unwrap_or_default();
        println!(
            "Epoch {:>3}  lr={:<8} loss={:.5}  batches={}{}",
            record.epoch + 1,
            record.learning_rate,
            record.loss,
            record.batches,
            validation
        );
    }
    if let Some(test) = &summary.report.test {
        println!("Test: {test}");
    }
    if let Some(path) = &summary.report.checkpoint {
        println!("Checkpoint: {}", path.display());
    }
    println!("Done in {:.2}s", summary.duration.as_secs_f64());
}
