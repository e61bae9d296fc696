// Integration test utilities and fixture corpora for Tailor.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use tailor_core::TailorConfig;

/// A source tree plus a label directory in a temporary directory.
#[derive(Debug)]
pub struct TestCorpus {
    pub dir: tempfile::TempDir,
}

impl TestCorpus {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn src(&self) -> PathBuf {
        self.path().join("src")
    }

    pub fn labels(&self) -> PathBuf {
        self.path().join("labels")
    }

    pub fn encode_dir(&self) -> PathBuf {
        self.path().join("encoded")
    }

    pub fn iresult_dir(&self) -> PathBuf {
        self.path().join("iresult")
    }

    fn empty() -> Self {
        let dir = tempfile::tempdir().expect("create tempdir");
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::create_dir_all(dir.path().join("labels")).unwrap();
        Self { dir }
    }

    fn write(&self, rel: &str, contents: &str) {
        let path = self.path().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, contents).unwrap();
    }

    /// Three C functions across two files. `f1` (id 0) calls `f2` (id 1);
    /// `f2` is smelly, `f3` (id 2) is clean and `f1` has no label.
    pub fn three_functions() -> Self {
        let corpus = Self::empty();
        corpus.write(
            "src/a_main.c",
            "int f1(int y) {\n    int z = f2(y);\n    return z * 2;\n}\n",
        );
        corpus.write(
            "src/b_util.c",
            "int f2(int x) {\n    if (x > 0) { return x + 1; }\n    return 0;\n}\n\nint f3(void) {\n    return 0;\n}\n",
        );
        corpus.write(
            "labels/code_smell_labels.csv",
            "file_path,file_name,has_smell,function_id\n\
             src/b_util.c,b_util.c,1,1\n\
             src/b_util.c,b_util.c,0,2\n",
        );
        corpus
    }

    /// `n` C functions alternating between long branchy bodies (labelled 1)
    /// and one-line bodies (labelled 0), one per file so ids follow `i`.
    /// Also writes clone pairs between functions of the same shape.
    pub fn smell_corpus(n: usize) -> Self {
        let corpus = Self::empty();
        let mut csv = String::from("file_path,file_name,has_smell,function_id\n");
        for i in 0..n {
            let name = format!("fn_{i:03}");
            let file = format!("src/{name}.c");
            let smelly = i % 2 == 0;
            let body = if smelly {
                let mut body = String::new();
                for k in 0..6 {
                    writeln!(body, "    if (a > {k}) {{ b = b + a * {k}; }} else {{ b = b - {k}; }}").unwrap();
                }
                writeln!(body, "    while (b > 100) {{ b = b / 2; }}").unwrap();
                body
            } else {
                "    b = a + 1;\n".to_string()
            };
            corpus.write(
                &file,
                &format!("int {name}(int a) {{\n    int b = 0;\n{body}    return b;\n}}\n"),
            );
            writeln!(csv, "{file},{name}.c,{},{i}", u8::from(smelly)).unwrap();
        }
        corpus.write("labels/code_smell_labels.csv", &csv);

        let mut pairs = String::from("# func_a,func_b,label\n");
        for i in 0..n {
            for j in (i + 1)..n.min(i + 4) {
                let same_shape = i % 2 == j % 2;
                writeln!(pairs, "{i},{j},{}", u8::from(same_shape)).unwrap();
            }
        }
        corpus.write("labels/clone_labels.txt", &pairs);
        corpus
    }
}

/// A configuration small enough for tests to train in well under a second.
pub fn small_config(label_dir: &Path) -> TailorConfig {
    let mut config = TailorConfig::default();
    config.encoding.label_dir = Some(label_dir.to_path_buf());
    config.embedding.dim = 8;
    config.embedding.epochs = 1;
    config.training.hidden_dim = 8;
    config.training.epochs = 3;
    config.training.batch_size = 4;
    config.training.decay_epoch = 1;
    config
}
