//! Encoding the same inter-results twice must produce identical bytes, and a
//! bundle reloaded from the cache must encode exactly like the original.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use tailor_core::cache::InterResultCache;
use tailor_core::config::ExtractionSection;
use tailor_core::context::RunContext;
use tailor_core::encode::{self, BatchEncoder};
use tailor_core::frontend::frontend_for;
use tailor_core::types::Task;
use tailor_graphs::Lang;

fn snapshot(dir: &Path) -> BTreeMap<String, Vec<u8>> {
    let mut files = BTreeMap::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(d) = stack.pop() {
        for entry in fs::read_dir(&d).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path);
            } else {
                let rel = path.strip_prefix(dir).unwrap().to_string_lossy().into_owned();
                files.insert(rel, fs::read(&path).unwrap());
            }
        }
    }
    files
}

fn write_java_corpus(root: &Path) {
    fs::create_dir_all(root.join("a")).unwrap();
    fs::write(
        root.join("a/Util.java"),
        r"class Util {
    static int clamp(int v, int lo, int hi) {
        if (v < lo) { return lo; }
        if (v > hi) { return hi; }
        return v;
    }
}
",
    )
    .unwrap();
    fs::write(
        root.join("Main.java"),
        r"class Main {
    int run(int x) {
        int y = Util.clamp(x, 0, 10);
        for (int i = 0; i < y; i++) { x += i; }
        return x;
    }
}
",
    )
    .unwrap();
    fs::write(
        root.join("labels.txt"),
        "# function_id,label\n0,1\n1,0\n",
    )
    .unwrap();
}

#[test]
fn encoding_is_byte_identical_across_runs_and_cache_reloads() {
    let src = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    write_java_corpus(src.path());
    let ctx = RunContext::quiet();

    let frontend = frontend_for(Lang::Java);
    let extracted = frontend
        .extract(&ctx, src.path(), &ExtractionSection::default())
        .unwrap();
    assert_eq!(extracted.functions.len(), 2);
    let built = frontend.build_cpg(&ctx, &extracted.functions);

    let labels = src.path().join("labels.txt");
    let encoder = BatchEncoder::new(Task::Classification);
    let first = work.path().join("first");
    let second = work.path().join("second");
    encoder
        .encode(&ctx, &extracted.functions, &built.func_dict, Some(&labels), &first)
        .unwrap();
    encoder
        .encode(&ctx, &extracted.functions, &built.func_dict, Some(&labels), &second)
        .unwrap();
    assert_eq!(snapshot(&first), snapshot(&second));

    let cache = InterResultCache::new(work.path().join("cache"));
    cache.store(&extracted.functions, &built.func_dict).unwrap();
    let reloaded = cache.load().unwrap();
    assert_eq!(reloaded.func_list, extracted.functions);
    assert_eq!(reloaded.func_dict, built.func_dict);

    let third = work.path().join("third");
    encoder
        .encode(&ctx, &reloaded.func_list, &reloaded.func_dict, Some(&labels), &third)
        .unwrap();
    assert_eq!(snapshot(&first), snapshot(&third));

    let index = encode::read_index(&first).unwrap();
    assert_eq!(index.examples.len(), 2);
}
