//! Epoch-driven training loop.
//!
//! ```text
//! Init ─► Pretraining ─► Training ⇄ Validating ─► Testing ─► Saving ─► Done
//!   └──────(loaded)──────►┘                          any fatal error ─► Failed
//! ```
//!
//! Step-level problems (single-class batch, missing graph, empty partition)
//! are logged and the step skipped. A non-finite accumulated loss aborts the run before any
//! checkpoint is written.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::config::{EmbeddingSection, LastBatch, PretrainMode, TrainingSection};
use crate::context::RunContext;
use crate::dataset::{self, Dataset, Split};
use crate::embed::{self, EmbeddingPretrainer, EmbeddingTable};
use crate::error::{Result, StepError, TrainError};
use crate::eval::{Evaluator, Metrics};
use crate::model::{GraphEncoderModel, Session};
use crate::types::Example;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrainState {
    Init,
    Pretraining,
    Training,
    Validating,
    Testing,
    Saving,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub learning_rate: f32,
    /// Mean per-example loss over the batches that ran.
    pub loss: f64,
    pub batches: usize,
    pub skipped_batches: usize,
    pub validation: Option<Metrics>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TrainReport {
    pub epochs: Vec<EpochRecord>,
    pub test: Option<Metrics>,
    pub checkpoint: Option<PathBuf>,
    pub history: Vec<TrainState>,
}

#[derive(Debug)]
pub struct TrainingLoop {
    config: TrainingSection,
    last_batch: LastBatch,
    shuffle_seed: u64,
    evaluator: Evaluator,
    state: TrainState,
    history: Vec<TrainState>,
}

impl TrainingLoop {
    pub fn new(config: TrainingSection, last_batch: LastBatch) -> Self {
        Self {
            evaluator: Evaluator::new(config.threshold),
            shuffle_seed: config.seed,
            config,
            last_batch,
            state: TrainState::Init,
            history: vec![TrainState::Init],
        }
    }

    pub fn state(&self) -> TrainState {
        self.state
    }

    pub fn history(&self) -> &[TrainState] {
        &self.history
    }

    fn transition(&mut self, to: TrainState) {
        if self.state != to {
            debug!(from = ?self.state, to = ?to, "Training state");
            self.state = to;
            self.history.push(to);
        }
    }

    fn fail<T>(&mut self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            self.transition(TrainState::Failed);
        }
        result
    }

    /// Produce the embedding table the model will read: trained fresh in
    /// `init` mode, loaded from `pretrain_dir` otherwise.
    #[instrument(skip_all, name = "prepare_embedding", fields(mode = ?self.config.pretrain))]
    pub fn prepare_embedding(
        &mut self,
        ctx: &RunContext,
        dataset: &Dataset,
        embedding: &EmbeddingSection,
        pretrain_dir: &Path,
    ) -> Result<EmbeddingTable> {
        let result: Result<EmbeddingTable> = match self.config.pretrain {
            PretrainMode::Init => {
                self.transition(TrainState::Pretraining);
                let (entities, tokens) = dataset.sequences();
                EmbeddingPretrainer::new(embedding.clone())
                    .init_embedding(ctx, &entities, &tokens)
                    .and_then(|table| {
                        if self.config.save_model {
                            embed::store_embedding(&table, pretrain_dir)?;
                        }
                        Ok(table)
                    })
                    .map_err(Into::into)
            }
            PretrainMode::LoadEmbedding | PretrainMode::LoadModel => {
                embed::load_embedding(pretrain_dir).map_err(Into::into)
            }
        };
        self.fail(result)
    }

    /// Restore `model` from `checkpoint` when continuing a run in
    /// `load_model` mode. Returns the epoch the checkpoint was written at.
    pub fn resume(&mut self, model: &mut dyn GraphEncoderModel, checkpoint: &Path) -> Result<Option<usize>> {
        if self.config.pretrain != PretrainMode::LoadModel {
            return Ok(None);
        }
        let result: Result<usize> = model.load(checkpoint).map_err(Into::into);
        let epoch = self.fail(result)?;
        info!(epoch, path = %checkpoint.display(), "Resumed from checkpoint");
        Ok(Some(epoch))
    }

    /// Train, validate, test and checkpoint `model` over `split`.
    #[instrument(skip_all, name = "training_loop", fields(task = %model.task()))]
    pub fn run(
        &mut self,
        ctx: &RunContext,
        model: &mut dyn GraphEncoderModel,
        split: &Split,
        checkpoint: &Path,
    ) -> Result<TrainReport> {
        let result = self.drive(ctx, model, split, checkpoint);
        let result = self.fail(result);
        if let Err(e) = &result {
            warn!(error = %e, "Training failed");
        }
        result
    }

    fn drive(
        &mut self,
        ctx: &RunContext,
        model: &mut dyn GraphEncoderModel,
        split: &Split,
        checkpoint: &Path,
    ) -> Result<TrainReport> {
        let mut report = TrainReport::default();
        let mut session = Session::open(model)?;
        let task = session.task();

        if self.config.supervised {
            let epochs = if split.train.is_empty() {
                let e = StepError::DegenerateSplit("train partition is empty".to_string());
                warn!(%task, error = %e, "Skipping training epochs");
                0
            } else {
                self.config.epochs
            };
            for epoch in 0..epochs {
                self.transition(TrainState::Training);
                let mut record = self.train_epoch(ctx, &mut *session, &split.train, epoch)?;

                let last = epoch + 1 == epochs;
                if (epoch + 1) % self.config.validate_every == 0 || last {
                    self.transition(TrainState::Validating);
                    record.validation = self.measure(&*session, &split.validation, "validation");
                    if let Some(metrics) = &record.validation {
                        info!(epoch, loss = record.loss, %metrics, "Validation");
                    }
                }
                report.epochs.push(record);
            }

            self.transition(TrainState::Testing);
            report.test = self.measure(&*session, &split.test, "test");
            if let Some(metrics) = &report.test {
                info!(%metrics, "Test");
            }
        }

        if self.config.save_model {
            self.transition(TrainState::Saving);
            session.save(checkpoint, report.epochs.len())?;
            report.checkpoint = Some(checkpoint.to_path_buf());
        }
        drop(session);

        self.transition(TrainState::Done);
        report.history.clone_from(&self.history);
        Ok(report)
    }

    fn train_epoch(
        &self,
        ctx: &RunContext,
        model: &mut dyn GraphEncoderModel,
        train: &[Example],
        epoch: usize,
    ) -> Result<EpochRecord> {
        let learning_rate = self.config.learning_rate_for(epoch);
        let order = dataset::shuffle(train, self.shuffle_seed.wrapping_add(epoch as u64));
        let total = dataset::batch_count(order.len(), self.config.batch_size, self.last_batch);

        ctx.progress.start(&format!("Epoch {}", epoch + 1), Some(total as u64));
        let mut accumulated = 0.0f64;
        let mut seen = 0usize;
        let mut record = EpochRecord {
            epoch,
            learning_rate,
            loss: 0.0,
            batches: 0,
            skipped_batches: 0,
            validation: None,
        };

        for (index, batch) in dataset::batches(&order, self.config.batch_size, self.last_batch).enumerate() {
            ctx.progress.advance(1);
            let step = if self.config.skip_single_class_batches && single_class(batch) {
                Err(StepError::SingleClassBatch)
            } else {
                model.train_step(batch, learning_rate)
            };
            match step {
                Ok(loss) => {
                    accumulated += f64::from(loss) * batch.len() as f64;
                    seen += batch.len();
                    record.batches += 1;
                }
                Err(e) => {
                    warn!(epoch, batch = index, error = %e, "Skipping training step");
                    record.skipped_batches += 1;
                    continue;
                }
            }
            if !accumulated.is_finite() {
                ctx.progress.finish();
                return Err(TrainError::DivergentLoss {
                    epoch,
                    batch: index,
                    loss: accumulated,
                }
                .into());
            }
        }
        ctx.progress.finish();

        record.loss = if seen == 0 { 0.0 } else { accumulated / seen as f64 };
        info!(
            epoch,
            learning_rate,
            loss = record.loss,
            batches = record.batches,
            skipped = record.skipped_batches,
            "Epoch finished"
        );
        Ok(record)
    }

    fn measure(&self, model: &dyn GraphEncoderModel, examples: &[Example], name: &str) -> Option<Metrics> {
        if examples.is_empty() {
            let e = StepError::DegenerateSplit(format!("{name} partition is empty"));
            warn!(error = %e, "Skipping evaluation");
            return None;
        }
        Some(self.evaluator.evaluate(model, examples))
    }
}

fn single_class(batch: &[Example]) -> bool {
    batch.len() > 1 && batch.iter().all(|e| e.label == batch[0].label)
}
