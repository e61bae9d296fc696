//! Tailor core library: inter-result caching, batch encoding, embedding
//! pretraining, and supervised GNN training over code property graphs.
//!
//! The entry points are [`pipeline::run_extract`], which turns a source tree
//! (or a cached bundle) into an encoding directory, and
//! [`pipeline::run_training`], which trains and evaluates a model on one.

pub mod cache;
pub mod config;
pub mod context;
pub mod dataset;
pub mod embed;
pub mod encode;
pub mod error;
pub mod eval;
pub mod frontend;
pub mod labels;
pub mod model;
pub mod pipeline;
pub mod progress;
pub mod stats;
pub mod train;
pub mod types;

pub use config::TailorConfig;
pub use context::{RunContext, Verbosity};
pub use error::{Result, TailorError};
pub use pipeline::{ExtractOptions, ExtractStats, TrainSummary, run_extract, run_training};
pub use types::{Example, LabelKey, LabelRecord, Task};
