use std::path::PathBuf;

use tailor_graphs::FunctionId;

use crate::types::Task;

/// Top-level Tailor error type.
///
/// All fallible operations in `tailor-core` return [`Result<T, TailorError>`](Result).
/// Each variant wraps a domain-specific error enum, allowing callers to
/// match on the error source without losing type information.
#[derive(thiserror::Error, Debug)]
pub enum TailorError {
    /// Error from the graph engine (tree-sitter parsing, source walking).
    #[error("Graph engine error: {0}")]
    Graph(#[from] tailor_graphs::GraphError),

    /// The inter-result bundle could not be stored or trusted.
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Label file missing or unreadable.
    #[error("Label error: {0}")]
    Label(#[from] LabelError),

    /// Writing the encoding directory failed.
    #[error("Encoding error: {0}")]
    Encode(#[from] EncodeError),

    /// Loading or splitting the encoded dataset failed.
    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),

    /// Embedding pretraining or persistence failed.
    #[error("Embedding error: {0}")]
    Embed(#[from] EmbedError),

    /// Model construction or checkpoint I/O failed.
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    /// The training loop aborted.
    #[error("Training error: {0}")]
    Train(#[from] TrainError),

    /// Error in configuration parsing or validation.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors from the inter-result cache.
#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    /// The bundle exists but violates its structural invariants.
    #[error("Corrupt inter-result bundle at {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("No inter-result bundle at {0}")]
    Missing(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from label sources and label files.
#[derive(thiserror::Error, Debug)]
pub enum LabelError {
    /// No label file is available for the task.
    #[error("Missing {task} label file (expected {expected}). {remediation}")]
    MissingLabelFile {
        task: Task,
        expected: PathBuf,
        remediation: String,
    },

    /// A label file is present but malformed beyond per-line recovery.
    #[error("Malformed label file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors while writing the encoding directory.
#[derive(thiserror::Error, Debug)]
pub enum EncodeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors while loading or splitting an encoded dataset.
#[derive(thiserror::Error, Debug)]
pub enum DatasetError {
    /// The encoding directory or one of its required files is absent.
    #[error("Encoding directory incomplete: {0} not found. Run `tailor extract --encoding` first.")]
    MissingEncoding(PathBuf),

    /// An example references a function without an encoded graph.
    #[error("Example {example} references function {function} with no encoded graph")]
    DanglingExample { example: String, function: FunctionId },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from the embedding pretrainer.
#[derive(thiserror::Error, Debug)]
pub enum EmbedError {
    #[error("Embedding corpus is empty")]
    EmptyCorpus,

    #[error("Entity and token sequences disagree: {0}")]
    Misaligned(String),

    #[error("Embedding table not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid embedding table: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from model construction and checkpoints.
#[derive(thiserror::Error, Debug)]
pub enum ModelError {
    #[error("Checkpoint not found: {0}")]
    CheckpointNotFound(PathBuf),

    /// Checkpoint shape or task does not match the live model.
    #[error("Incompatible checkpoint: {0}")]
    Incompatible(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Recoverable, step-local failures: logged and the step skipped.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StepError {
    #[error("Empty batch")]
    EmptyBatch,

    #[error("Batch holds a single label class")]
    SingleClassBatch,

    #[error("No encoded graph for function {0}")]
    MissingGraph(FunctionId),

    #[error("Degenerate split: {0}")]
    DegenerateSplit(String),

    #[error("Example {0} has no functions")]
    MalformedExample(String),

    #[error("Model session is not open")]
    SessionClosed,
}

/// Fatal training-loop errors.
#[derive(thiserror::Error, Debug)]
pub enum TrainError {
    /// Accumulated loss became NaN or infinite.
    #[error("Loss diverged at epoch {epoch}, batch {batch} (accumulated loss {loss})")]
    DivergentLoss { epoch: usize, batch: usize, loss: f64 },
}

/// Errors in Tailor configuration parsing and validation.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// The configuration file does not exist at the expected path.
    #[error("Config file not found: {0}")]
    NotFound(String),

    /// Configuration values are present but semantically invalid.
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// Configuration file syntax could not be parsed (TOML error).
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Convenience alias for `Result<T, TailorError>`.
pub type Result<T> = std::result::Result<T, TailorError>;
