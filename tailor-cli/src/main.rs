use clap::Parser;
use tailor_core::error::{CacheError, DatasetError, EmbedError, LabelError, TailorError, TrainError};
use tailor_core::Verbosity;

mod commands;

#[derive(Parser, Debug)]
#[command(
    name = "tailor",
    version,
    about = "Build code property graphs from C/Java and train clone and code-smell classifiers"
)]
struct Cli {
    #[command(subcommand)]
    command: commands::Command,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    quiet: bool,
}

/// Classify an error into an exit code.
///
///   0 — success
///   1 — general/unknown error
///   2 — configuration error
///   3 — missing input artifact (label file, encoding directory)
///   4 — corrupt inter-result bundle with re-extraction disallowed
///   5 — divergent loss
///   6 — model or checkpoint I/O
fn classify_exit_code(err: &anyhow::Error) -> i32 {
    let Some(tailor) = err.chain().find_map(|e| e.downcast_ref::<TailorError>()) else {
        return if format!("{err:#}").to_lowercase().contains("config") { 2 } else { 1 };
    };
    match tailor {
        TailorError::Config(_) => 2,
        TailorError::Label(LabelError::MissingLabelFile { .. })
        | TailorError::Dataset(DatasetError::MissingEncoding(_))
        | TailorError::Embed(EmbedError::NotFound(_))
        | TailorError::Cache(CacheError::Missing(_)) => 3,
        TailorError::Cache(CacheError::Corrupt { .. }) => 4,
        TailorError::Train(TrainError::DivergentLoss { .. }) => 5,
        TailorError::Model(_) => 6,
        _ => 1,
    }
}

fn main() {
    let cli = Cli::parse();

    let verbosity = Verbosity::from_flags(cli.quiet, cli.verbose);
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(verbosity.filter_directive())),
        )
        .init();

    match commands::run(cli.command, verbosity) {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(classify_exit_code(&e));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use anyhow::Context;
    use tailor_core::Task;
    use tailor_core::error::{ConfigError, ModelError};

    use super::*;

    fn wrap(err: TailorError) -> anyhow::Error {
        Err::<(), _>(err).context("Stage failed").unwrap_err()
    }

    #[test]
    fn exit_code_missing_labels() {
        let err = wrap(TailorError::Label(LabelError::MissingLabelFile {
            task: Task::Clone,
            expected: PathBuf::from("labels/clone_labels.txt"),
            remediation: String::new(),
        }));
        assert_eq!(classify_exit_code(&err), 3);
    }

    #[test]
    fn exit_code_missing_encoding() {
        let err = wrap(DatasetError::MissingEncoding(PathBuf::from("enc")).into());
        assert_eq!(classify_exit_code(&err), 3);
    }

    #[test]
    fn exit_code_config() {
        let err = wrap(ConfigError::Invalid("batch_size must be > 0".into()).into());
        assert_eq!(classify_exit_code(&err), 2);
        let plain = anyhow::anyhow!("Cannot read config file tailor.toml");
        assert_eq!(classify_exit_code(&plain), 2);
    }

    #[test]
    fn exit_code_corrupt_cache() {
        let err = wrap(
            CacheError::Corrupt {
                path: PathBuf::from("ir/inter_results.json"),
                reason: "truncated".into(),
            }
            .into(),
        );
        assert_eq!(classify_exit_code(&err), 4);
    }

    #[test]
    fn exit_code_divergent_loss() {
        let err = wrap(
            TrainError::DivergentLoss {
                epoch: 2,
                batch: 3,
                loss: f64::NAN,
            }
            .into(),
        );
        assert_eq!(classify_exit_code(&err), 5);
    }

    #[test]
    fn exit_code_checkpoint_io() {
        let err = wrap(ModelError::CheckpointNotFound(PathBuf::from("model/checkpoint.json")).into());
        assert_eq!(classify_exit_code(&err), 6);
    }

    #[test]
    fn exit_code_general() {
        let err = anyhow::anyhow!("Something unexpected happened");
        assert_eq!(classify_exit_code(&err), 1);
    }
}
