use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::info;

use crate::progress::{NoopReporter, ProgressReporter};

/// How chatty the run should be on the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Verbosity {
    Quiet,
    #[default]
    Normal,
    Verbose,
    Debug,
}

impl Verbosity {
    /// Map `-q` / `-v` counts from the command line.
    pub fn from_flags(quiet: bool, verbose: u8) -> Self {
        if quiet {
            return Self::Quiet;
        }
        match verbose {
            0 => Self::Normal,
            1 => Self::Verbose,
            _ => Self::Debug,
        }
    }

    /// Default tracing filter directive for this level.
    pub fn filter_directive(self) -> &'static str {
        match self {
            Self::Quiet => "error",
            Self::Normal => "warn,tailor_core=info,tailor_graphs=info",
            Self::Verbose => "info",
            Self::Debug => "debug",
        }
    }
}

/// State shared by every stage of one run, passed explicitly.
#[derive(Clone)]
pub struct RunContext {
    pub verbosity: Verbosity,
    pub progress: Arc<dyn ProgressReporter>,
    started: Instant,
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("verbosity", &self.verbosity)
            .finish_non_exhaustive()
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new(Verbosity::Normal, Arc::new(NoopReporter))
    }
}

impl RunContext {
    pub fn new(verbosity: Verbosity, progress: Arc<dyn ProgressReporter>) -> Self {
        Self {
            verbosity,
            progress,
            started: Instant::now(),
        }
    }

    /// Silent context for tests and embedding in other tools.
    pub fn quiet() -> Self {
        Self::new(Verbosity::Quiet, Arc::new(NoopReporter))
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Start timing a named stage; the duration is logged when the guard drops.
    pub fn stage(&self, name: &'static str) -> StageTimer {
        StageTimer {
            name,
            started: Instant::now(),
        }
    }
}

#[derive(Debug)]
pub struct StageTimer {
    name: &'static str,
    started: Instant,
}

impl Drop for StageTimer {
    fn drop(&mut self) {
        info!(stage = self.name, duration = ?self.started.elapsed(), "Stage finished");
    }
}
