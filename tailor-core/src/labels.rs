//! Label sources, label-file parsing, and the join against encoded functions.
//!
//! Labels live outside the corpus. A [`LabelSource`] says where the file for a
//! task is; [`copy_labels`] puts it next to the encoded graphs; [`read_labels`]
//! parses it; [`join_labels`] keeps only labels whose functions were encoded.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tailor_graphs::FunctionId;
use tracing::{debug, info, warn};

use crate::error::LabelError;
use crate::types::{Example, LabelKey, LabelRecord, Task};

// ── Sources ────────────────────────────────────────────────────────

/// Supplies the label file for a task.
pub trait LabelSource: Send + Sync {
    /// Path of the task's label file, or `MissingLabelFile`.
    fn locate(&self, task: Task) -> Result<PathBuf, LabelError>;
}

/// Looks for the task's conventional file name in one directory.
#[derive(Debug, Clone)]
pub struct DirectoryLabelSource {
    dir: PathBuf,
}

impl DirectoryLabelSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl LabelSource for DirectoryLabelSource {
    fn locate(&self, task: Task) -> Result<PathBuf, LabelError> {
        let expected = self.dir.join(task.label_file_name());
        if expected.is_file() {
            Ok(expected)
        } else {
            Err(LabelError::MissingLabelFile {
                task,
                expected,
                remediation: remediation(task).to_string(),
            })
        }
    }
}

/// What the operator should run to produce the missing file.
pub fn remediation(task: Task) -> &'static str {
    match task {
        Task::Clone => {
            "Provide clone_labels.txt (one `func_a,func_b,label` line per pair) in the label directory."
        }
        Task::Classification => {
            "Provide classification_labels.txt (one `function_id,label` line per function) in the label directory."
        }
        Task::CodeSmell => {
            "Prepare code_smell_labels.csv from the smell/ and non-smell/ folders (columns file_path,file_name,has_smell,function_id)."
        }
    }
}

/// Copy the task's label file into the encoding directory.
///
/// A missing file is fatal only for tasks that require labels; otherwise the
/// remediation is logged and `Ok(None)` returned.
pub fn copy_labels(
    source: &dyn LabelSource,
    task: Task,
    encode_dir: &Path,
) -> Result<Option<PathBuf>, LabelError> {
    match source.locate(task) {
        Ok(found) => {
            fs::create_dir_all(encode_dir)?;
            let dest = encode_dir.join(task.label_file_name());
            if same_file(&found, &dest) {
                debug!(path = %dest.display(), "Label file already in place");
                return Ok(Some(dest));
            }
            fs::copy(&found, &dest)?;
            info!(from = %found.display(), to = %dest.display(), "Copied label file");
            Ok(Some(dest))
        }
        Err(LabelError::MissingLabelFile {
            expected,
            remediation,
            ..
        }) if !task.requires_labels() => {
            warn!(
                task = %task,
                expected = %expected.display(),
                "Label file missing, continuing without labels. {remediation}"
            );
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

// ── Parsing ────────────────────────────────────────────────────────

/// A label line or label that was dropped instead of defaulted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum LabelIssue {
    /// Line could not be parsed.
    Malformed { line: usize, reason: String },
    /// Same example labelled twice; the first label is kept.
    Duplicate { example: String },
    /// Label references a function with no encoded graph.
    UnknownFunction { example: String, function: FunctionId },
}

#[derive(Debug, Clone, Default)]
pub struct ParsedLabels {
    pub records: Vec<LabelRecord>,
    pub issues: Vec<LabelIssue>,
}

/// Read and parse a task's label file.
pub fn read_labels(path: &Path, task: Task) -> Result<ParsedLabels, LabelError> {
    let text = match fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(LabelError::MissingLabelFile {
                task,
                expected: path.to_path_buf(),
                remediation: remediation(task).to_string(),
            });
        }
        Err(e) => return Err(e.into()),
    };
    let parsed = match task {
        Task::Clone => parse_pair_labels(&text),
        Task::Classification => parse_function_labels(&text),
        Task::CodeSmell => parse_smell_csv(&text).map_err(|message| LabelError::Parse {
            path: path.to_path_buf(),
            message,
        })?,
    };
    for issue in &parsed.issues {
        warn!(file = %path.display(), ?issue, "Skipped label");
    }
    Ok(parsed)
}

fn parse_label(field: &str) -> Result<u8, String> {
    match field.trim() {
        "0" => Ok(0),
        "1" => Ok(1),
        other => Err(format!("label must be 0 or 1, got {other:?}")),
    }
}

fn parse_id(field: &str) -> Result<FunctionId, String> {
    field
        .parse()
        .map_err(|_| format!("not a function id: {:?}", field.trim()))
}

fn data_lines(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty() && !l.starts_with('#'))
}

fn split_fields(line: &str) -> Vec<&str> {
    line.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|f| !f.is_empty())
        .collect()
}

/// `func_a,func_b,label` per line; commas or whitespace separate fields.
pub fn parse_pair_labels(text: &str) -> ParsedLabels {
    let mut parsed = ParsedLabels::default();
    for (line, content) in data_lines(text) {
        let fields = split_fields(content);
        let record = match fields.as_slice() {
            [a, b, label] => parse_id(a).and_then(|a| {
                let b = parse_id(b)?;
                Ok(LabelRecord {
                    key: LabelKey::Pair(a, b),
                    label: parse_label(label)?,
                })
            }),
            _ => Err(format!("expected 3 fields, found {}", fields.len())),
        };
        match record {
            Ok(r) => parsed.records.push(r),
            Err(reason) => parsed.issues.push(LabelIssue::Malformed { line, reason }),
        }
    }
    parsed
}

/// `function_id,label` per line.
pub fn parse_function_labels(text: &str) -> ParsedLabels {
    let mut parsed = ParsedLabels::default();
    for (line, content) in data_lines(text) {
        let fields = split_fields(content);
        let record = match fields.as_slice() {
            [id, label] => parse_id(id).and_then(|id| {
                Ok(LabelRecord {
                    key: LabelKey::Function(id),
                    label: parse_label(label)?,
                })
            }),
            _ => Err(format!("expected 2 fields, found {}", fields.len())),
        };
        match record {
            Ok(r) => parsed.records.push(r),
            Err(reason) => parsed.issues.push(LabelIssue::Malformed { line, reason }),
        }
    }
    parsed
}

/// One smell CSV row. Other columns (`file_path`, `file_name`) are ignored.
#[derive(Debug, Deserialize)]
struct SmellRow {
    has_smell: String,
    function_id: String,
}

/// Smell CSV with a required header naming at least `has_smell` and
/// `function_id`. A bad header is fatal; bad rows are skipped.
pub fn parse_smell_csv(text: &str) -> Result<ParsedLabels, String> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());
    let header: csv::StringRecord = reader
        .headers()
        .map_err(|e| format!("unreadable header: {e}"))?
        .iter()
        .map(str::to_ascii_lowercase)
        .collect();
    if header.is_empty() {
        return Err("empty file, header row required".to_string());
    }
    for name in ["has_smell", "function_id"] {
        if !header.iter().any(|h| h == name) {
            return Err(format!("header lacks a {name} column"));
        }
    }

    let mut parsed = ParsedLabels::default();
    for row in reader.records() {
        let (line, record) = match row {
            Ok(row) => (
                row.position().map_or(0, |p| p.line() as usize),
                row.deserialize::<SmellRow>(Some(&header))
                    .map_err(|e| e.to_string())
                    .and_then(|row| {
                        Ok(LabelRecord {
                            key: LabelKey::Function(parse_id(&row.function_id)?),
                            label: parse_label(&row.has_smell)?,
                        })
                    }),
            ),
            Err(e) => (e.position().map_or(0, |p| p.line() as usize), Err(e.to_string())),
        };
        match record {
            Ok(r) => parsed.records.push(r),
            Err(reason) => parsed.issues.push(LabelIssue::Malformed { line, reason }),
        }
    }
    Ok(parsed)
}

// ── Join ───────────────────────────────────────────────────────────

/// Outcome of joining labels against the encoded function ids.
#[derive(Debug, Clone, Default, Serialize)]
pub struct JoinSummary {
    pub read: usize,
    pub joined: usize,
    pub positives: usize,
    pub issues: Vec<LabelIssue>,
}

impl JoinSummary {
    pub fn dropped(&self) -> usize {
        self.read - self.joined
    }
}

/// Keep labels whose functions are all encoded, ordered by key.
///
/// Functions without a label are never given one; they simply don't appear.
pub fn join_labels(
    records: &[LabelRecord],
    encoded: &BTreeSet<FunctionId>,
) -> (Vec<Example>, JoinSummary) {
    let mut summary = JoinSummary {
        read: records.len(),
        ..JoinSummary::default()
    };
    let mut kept: BTreeMap<LabelKey, u8> = BTreeMap::new();

    for record in records {
        let example = record.key.example_id();
        if let Some(missing) = record.key.functions().into_iter().find(|f| !encoded.contains(f)) {
            warn!(example = %example, function = %missing, "Label references unknown function, dropped");
            summary.issues.push(LabelIssue::UnknownFunction {
                example,
                function: missing,
            });
            continue;
        }
        if kept.contains_key(&record.key) {
            warn!(example = %example, "Duplicate label, keeping the first");
            summary.issues.push(LabelIssue::Duplicate { example });
            continue;
        }
        kept.insert(record.key, record.label);
    }

    let examples: Vec<Example> = kept
        .into_iter()
        .map(|(key, label)| LabelRecord { key, label }.into())
        .collect();
    summary.joined = examples.len();
    summary.positives = examples.iter().filter(|e| e.is_positive()).count();
    (examples, summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[u32]) -> BTreeSet<FunctionId> {
        raw.iter().copied().map(FunctionId).collect()
    }

    #[test]
    fn pair_labels_accept_commas_and_whitespace() {
        let parsed = parse_pair_labels("# pairs\n0,1,1\n2 3 0\n\n4,5\n6,7,2\n");
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.records[1].key, LabelKey::Pair(FunctionId(2), FunctionId(3)));
        assert_eq!(parsed.issues.len(), 2);
        assert!(matches!(parsed.issues[0], LabelIssue::Malformed { line: 5, .. }));
    }

    #[test]
    fn smell_csv_handles_quotes_and_column_order() {
        let text = "file_path,file_name,has_smell,function_id\n\
                    \"src/a, b.java\",A.java,1,4\n\
                    src/c.java,\"C \"\"x\"\".java\",0,7\n\
                    src/d.java,D.java,maybe,9\n";
        let parsed = parse_smell_csv(text).unwrap();
        assert_eq!(
            parsed.records,
            vec![
                LabelRecord { key: LabelKey::Function(FunctionId(4)), label: 1 },
                LabelRecord { key: LabelKey::Function(FunctionId(7)), label: 0 },
            ]
        );
        assert_eq!(parsed.issues.len(), 1);
    }

    #[test]
    fn smell_csv_requires_header() {
        assert!(parse_smell_csv("").is_err());
        assert!(parse_smell_csv("1,0\n").unwrap_err().contains("has_smell"));
    }

    #[test]
    fn smell_csv_quoted_field_may_span_lines() {
        let text = "file_path,file_name,has_smell,function_id\n\
                    \"src/odd\nname.c\",odd.c,1,3\n\
                    src/e.c,e.c,0,5\n\
                    src/f.c,f.c,1\n";
        let parsed = parse_smell_csv(text).unwrap();
        assert_eq!(
            parsed.records,
            vec![
                LabelRecord { key: LabelKey::Function(FunctionId(3)), label: 1 },
                LabelRecord { key: LabelKey::Function(FunctionId(5)), label: 0 },
            ]
        );
        // the short row is reported at its own physical line
        assert!(matches!(parsed.issues.as_slice(), [LabelIssue::Malformed { line: 5, .. }]));
    }

    #[test]
    fn join_drops_unknown_and_duplicates() {
        let records = vec![
            LabelRecord { key: LabelKey::Function(FunctionId(2)), label: 0 },
            LabelRecord { key: LabelKey::Function(FunctionId(1)), label: 1 },
            LabelRecord { key: LabelKey::Function(FunctionId(9)), label: 1 },
            LabelRecord { key: LabelKey::Function(FunctionId(1)), label: 0 },
        ];
        let (examples, summary) = join_labels(&records, &ids(&[0, 1, 2]));
        let kept: Vec<_> = examples.iter().map(|e| (e.id.as_str(), e.label)).collect();
        assert_eq!(kept, vec![("f1", 1), ("f2", 0)]);
        assert_eq!(summary.read, 4);
        assert_eq!(summary.dropped(), 2);
        assert_eq!(summary.positives, 1);
    }

    #[test]
    fn missing_clone_labels_are_fatal_smell_labels_advisory() {
        let labels = tempfile::tempdir().unwrap();
        let encode = tempfile::tempdir().unwrap();
        let source = DirectoryLabelSource::new(labels.path());

        let err = copy_labels(&source, Task::Clone, encode.path()).unwrap_err();
        assert!(matches!(err, LabelError::MissingLabelFile { task: Task::Clone, .. }));
        assert_eq!(copy_labels(&source, Task::CodeSmell, encode.path()).unwrap(), None);

        fs::write(labels.path().join("clone_labels.txt"), "0,1,1\n").unwrap();
        let copied = copy_labels(&source, Task::Clone, encode.path()).unwrap().unwrap();
        assert_eq!(fs::read_to_string(copied).unwrap(), "0,1,1\n");
    }
}
