use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tailor_graphs::FunctionId;

// ── Task selector ──────────────────────────────────────────────────

/// Learning task: selects the label universe and the split strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    /// Pairwise: do two functions implement equivalent logic.
    Clone,
    /// Per-function binary classification from `classification_labels.txt`.
    Classification,
    /// Per-function: does a function exhibit a code smell.
    CodeSmell,
}

impl Task {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Clone => "clone",
            Self::Classification => "classification",
            Self::CodeSmell => "code_smell",
        }
    }

    /// Conventional name of the task's label file.
    pub fn label_file_name(self) -> &'static str {
        match self {
            Self::Clone => "clone_labels.txt",
            Self::Classification => "classification_labels.txt",
            Self::CodeSmell => "code_smell_labels.csv",
        }
    }

    /// Pair examples (two graphs) rather than single-function examples.
    pub fn is_pairwise(self) -> bool {
        matches!(self, Self::Clone)
    }

    /// Without labels there is no supervision signal for the clone task; the
    /// per-function tasks only warn and point at the label-preparation step.
    pub fn requires_labels(self) -> bool {
        matches!(self, Self::Clone)
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Task {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "clone" => Ok(Self::Clone),
            "classification" => Ok(Self::Classification),
            "code_smell" | "smell" => Ok(Self::CodeSmell),
            other => Err(format!(
                "unknown task: {other} (expected clone, classification or code_smell)"
            )),
        }
    }
}

// ── Labels and examples ────────────────────────────────────────────

/// What a label is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LabelKey {
    Function(FunctionId),
    Pair(FunctionId, FunctionId),
}

impl LabelKey {
    pub fn functions(&self) -> Vec<FunctionId> {
        match *self {
            Self::Function(f) => vec![f],
            Self::Pair(a, b) => vec![a, b],
        }
    }

    pub fn example_id(&self) -> String {
        match self {
            Self::Function(f) => format!("f{f}"),
            Self::Pair(a, b) => format!("p{a}-{b}"),
        }
    }
}

/// One externally sourced label, before it is joined against encoded graphs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelRecord {
    pub key: LabelKey,
    /// 0 or 1.
    pub label: u8,
}

/// A label joined against encoded graphs: the unit the splits and batches hold.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Example {
    pub id: String,
    pub functions: Vec<FunctionId>,
    pub label: u8,
}

impl From<LabelRecord> for Example {
    fn from(record: LabelRecord) -> Self {
        Self {
            id: record.key.example_id(),
            functions: record.key.functions(),
            label: record.label,
        }
    }
}

impl Example {
    pub fn is_positive(&self) -> bool {
        self.label == 1
    }
}
