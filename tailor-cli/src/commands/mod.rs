pub mod extract;
pub mod train;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Subcommand;
use tailor_core::progress::IndicatifReporter;
use tailor_core::{RunContext, TailorConfig, TailorError, Verbosity};

/// Config file picked up from the working directory when `--config` is absent.
pub const DEFAULT_CONFIG: &str = "tailor.toml";

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Extract CPGs from source (or a cached bundle), then encode and report
    Extract(extract::ExtractArgs),
    /// Pretrain embeddings and train a classifier on an encoding directory
    Train(train::TrainArgs),
}

pub fn run(cmd: Command, verbosity: Verbosity) -> anyhow::Result<()> {
    let ctx = RunContext::new(
        verbosity,
        Arc::new(IndicatifReporter::new(verbosity > Verbosity::Quiet)),
    );
    match cmd {
        Command::Extract(args) => extract::run(&ctx, args),
        Command::Train(args) => train::run(&ctx, args),
    }
}

/// Load `explicit`, or `tailor.toml` in the working directory, or defaults.
pub fn load_config(explicit: Option<&Path>) -> anyhow::Result<TailorConfig> {
    let path = match explicit {
        Some(p) => Some(p.to_path_buf()),
        None => discover_config(Path::new(".")),
    };
    match path {
        Some(p) => TailorConfig::load(&p)
            .map_err(TailorError::from)
            .with_context(|| format!("Cannot load config {}", p.display())),
        None => Ok(TailorConfig::default()),
    }
}

fn discover_config(dir: &Path) -> Option<PathBuf> {
    let pattern = dir.join(DEFAULT_CONFIG);
    glob::glob(&pattern.to_string_lossy())
        .ok()?
        .filter_map(Result::ok)
        .find(|p| p.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovers_config_in_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover_config(dir.path()).is_none());
        std::fs::write(dir.path().join(DEFAULT_CONFIG), "[training]\nepochs = 3\n").unwrap();
        let found = discover_config(dir.path()).unwrap();
        let config = load_config(Some(&found)).unwrap();
        assert_eq!(config.training.epochs, 3);
    }

    #[test]
    fn missing_explicit_config_is_an_error() {
        let err = load_config(Some(Path::new("/nonexistent/tailor.toml"))).unwrap_err();
        assert!(format!("{err:#}").contains("config"));
    }
}
