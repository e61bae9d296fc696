//! Graph encoder models.
//!
//! The training loop only sees [`GraphEncoderModel`]: a structural encoder
//! with a task head, trained one batch at a time inside an open session.

pub mod sgl;

use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};

use crate::error::{ModelError, StepError};
use crate::types::{Example, Task};

pub use sgl::SglModel;

pub const CHECKPOINT_FILE: &str = "checkpoint.json";

pub fn checkpoint_path(dir: &Path) -> PathBuf {
    dir.join(CHECKPOINT_FILE)
}

/// A trainable graph classifier.
pub trait GraphEncoderModel: Send {
    fn task(&self) -> Task;

    /// Acquire training resources. Exactly one session may be open.
    fn open_session(&mut self) -> Result<(), ModelError>;

    /// Release training resources. Must be safe to call when already closed.
    fn close_session(&mut self);

    fn session_open(&self) -> bool;

    /// One optimisation step; returns the mean loss over `batch`.
    fn train_step(&mut self, batch: &[Example], learning_rate: f32) -> Result<f32, StepError>;

    /// Probability that `example` is positive.
    fn predict(&self, example: &Example) -> Result<f32, StepError>;

    /// Write a checkpoint tagged with `epoch`.
    fn save(&self, path: &Path, epoch: usize) -> Result<(), ModelError>;

    /// Restore parameters from a checkpoint; returns its epoch.
    fn load(&mut self, path: &Path) -> Result<usize, ModelError>;
}

/// Open session on a model, closed again when dropped.
pub struct Session<'a> {
    model: &'a mut (dyn GraphEncoderModel + 'a),
}

impl std::fmt::Debug for Session<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("task", &self.model.task())
            .finish_non_exhaustive()
    }
}

impl<'a> Session<'a> {
    pub fn open(model: &'a mut (dyn GraphEncoderModel + 'a)) -> Result<Self, ModelError> {
        model.open_session()?;
        Ok(Self { model })
    }
}

impl<'a> Deref for Session<'a> {
    type Target = dyn GraphEncoderModel + 'a;

    fn deref(&self) -> &Self::Target {
        self.model
    }
}

impl DerefMut for Session<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.model
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        self.model.close_session();
    }
}
