use tailor_core::cache::InterResultCache;
use tailor_core::config::PretrainMode;
use tailor_core::dataset::{DataGenerator, Dataset, function_ids};
use tailor_core::encode;
use tailor_core::pipeline::{ExtractOptions, Origin};
use tailor_core::train::TrainState;
use tailor_core::{RunContext, Task, run_extract, run_training};
use tailor_graphs::{FunctionId, Lang};
use tailor_test::{TestCorpus, small_config};

fn encode_opts(corpus: &TestCorpus, task: Task) -> ExtractOptions {
    let mut opts = ExtractOptions::new(Lang::C, task);
    opts.src_path = Some(corpus.src());
    opts.encode_path = Some(corpus.encode_dir());
    opts.iresult_path = Some(corpus.iresult_dir());
    opts.encoding = true;
    opts.store_iresult = true;
    opts.statistics = true;
    opts
}

// ── Three-function scenario ─────────────────────────────────────

#[test]
fn three_functions_encode_join_and_resolve_calls() {
    let corpus = TestCorpus::three_functions();
    let ctx = RunContext::quiet();
    let config = small_config(&corpus.labels());

    let (results, stats) = run_extract(&ctx, &config, &encode_opts(&corpus, Task::CodeSmell)).unwrap();
    let names: Vec<&str> = results.func_list.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, ["f1", "f2", "f3"]);

    // f1 → f2 resolved into f2's node space.
    let f1 = &results.func_dict[&FunctionId(0)];
    assert_eq!(f1.calls.len(), 1);
    let call = f1.calls[0];
    assert_eq!(call.callee, FunctionId(1));
    assert!(results.func_dict[&FunctionId(1)].contains_node(call.entry));
    assert!(f1.unresolved.is_empty());
    assert_eq!(stats.resolved_calls, 1);

    // All three are encoded; only the two labelled ones become examples.
    let encoding = stats.encoding.unwrap();
    assert_eq!(encoding.graphs, 3);
    assert_eq!(encoding.examples, 2);
    let index = encode::read_index(&corpus.encode_dir()).unwrap();
    let example_functions = function_ids(&index.examples);
    assert_eq!(example_functions.into_iter().collect::<Vec<_>>(), [FunctionId(1), FunctionId(2)]);
    let f2 = index.examples.iter().find(|e| e.functions == [FunctionId(1)]).unwrap();
    assert_eq!(f2.label, 1);

    let f1_graph = encode::read_graph(&corpus.encode_dir(), FunctionId(0)).unwrap();
    assert_eq!(f1_graph.label, None);
    assert_eq!(f1_graph.calls.len(), 1);
    assert!(corpus.encode_dir().join("code_smell_labels.csv").is_file());

    let statistics = stats.statistics.unwrap();
    assert_eq!(statistics.functions, 3);
    assert_eq!(statistics.resolved_calls, 1);
}

#[test]
fn cached_bundle_replaces_extraction() {
    let corpus = TestCorpus::three_functions();
    let ctx = RunContext::quiet();
    let config = small_config(&corpus.labels());
    let (extracted, _) = run_extract(&ctx, &config, &encode_opts(&corpus, Task::CodeSmell)).unwrap();
    let first_index = std::fs::read(corpus.encode_dir().join(encode::INDEX_FILE)).unwrap();

    // Source tree gone: only the bundle can supply the functions.
    std::fs::remove_dir_all(corpus.src()).unwrap();
    let mut opts = ExtractOptions::new(Lang::C, Task::CodeSmell);
    opts.iresult_path = Some(corpus.iresult_dir());
    opts.load_iresult = true;
    opts.encode_path = Some(corpus.encode_dir());
    opts.encoding = true;
    let (loaded, stats) = run_extract(&ctx, &config, &opts).unwrap();

    assert_eq!(stats.origin, Origin::Cache);
    assert_eq!(loaded, extracted);
    assert_eq!(InterResultCache::new(corpus.iresult_dir()).load().unwrap(), extracted);
    let second_index = std::fs::read(corpus.encode_dir().join(encode::INDEX_FILE)).unwrap();
    assert_eq!(first_index, second_index);
}

// ── Training ────────────────────────────────────────────────────

#[test]
fn smell_training_runs_to_done_and_checkpoints() {
    let corpus = TestCorpus::smell_corpus(30);
    let ctx = RunContext::quiet();
    let mut config = small_config(&corpus.labels());
    config.training.save_model = true;
    run_extract(&ctx, &config, &encode_opts(&corpus, Task::CodeSmell)).unwrap();

    let summary = run_training(&ctx, &config, &corpus.encode_dir()).unwrap();
    assert_eq!(summary.task, Task::CodeSmell);
    assert_eq!(summary.examples, 30);
    assert_eq!(summary.split.train + summary.split.validation + summary.split.test, 30);
    assert!(summary.split.imbalance.is_none());

    let report = &summary.report;
    assert_eq!(report.epochs.len(), 3);
    assert!(report.epochs.iter().all(|e| e.loss.is_finite()));
    assert!(report.epochs[2].learning_rate < report.epochs[0].learning_rate);
    assert!(report.test.is_some());
    assert_eq!(
        report.history,
        [
            TrainState::Init,
            TrainState::Pretraining,
            TrainState::Training,
            TrainState::Validating,
            TrainState::Training,
            TrainState::Validating,
            TrainState::Training,
            TrainState::Validating,
            TrainState::Testing,
            TrainState::Saving,
            TrainState::Done,
        ]
    );
    let checkpoint = report.checkpoint.clone().unwrap();
    assert!(checkpoint.is_file());
    assert!(corpus.encode_dir().join("pretrain/embedding.json").is_file());

    // Continue from the stored embedding and checkpoint.
    config.training.pretrain = PretrainMode::LoadModel;
    config.training.epochs = 1;
    let resumed = run_training(&ctx, &config, &corpus.encode_dir()).unwrap();
    assert_eq!(resumed.report.history.first(), Some(&TrainState::Init));
    assert!(!resumed.report.history.contains(&TrainState::Pretraining));
    assert_eq!(resumed.report.history.last(), Some(&TrainState::Done));
}

#[test]
fn clone_training_over_pairs() {
    let corpus = TestCorpus::smell_corpus(24);
    let ctx = RunContext::quiet();
    let mut config = small_config(&corpus.labels());
    config.split.generalization = false;
    run_extract(&ctx, &config, &encode_opts(&corpus, Task::Clone)).unwrap();

    let dataset = Dataset::load(&corpus.encode_dir()).unwrap();
    assert_eq!(dataset.task, Task::Clone);
    assert!(dataset.examples.iter().all(|e| e.functions.len() == 2));
    // Pairs reuse per-function graphs.
    assert_eq!(dataset.graphs.len(), 24);

    let summary = run_training(&ctx, &config, &corpus.encode_dir()).unwrap();
    assert_eq!(summary.report.history.last(), Some(&TrainState::Done));
    assert!(summary.report.checkpoint.is_none());
}

#[test]
fn clone_generalization_split_keeps_functions_apart() {
    let corpus = TestCorpus::smell_corpus(40);
    let ctx = RunContext::quiet();
    let config = small_config(&corpus.labels());
    run_extract(&ctx, &config, &encode_opts(&corpus, Task::Clone)).unwrap();

    let dataset = Dataset::load(&corpus.encode_dir()).unwrap();
    let (split, summary) = DataGenerator::new(config.split.clone()).build_split(Task::Clone, &dataset.examples);
    let train = function_ids(&split.train);
    let test = function_ids(&split.test);
    let validation = function_ids(&split.validation);
    assert!(train.is_disjoint(&test));
    assert!(train.is_disjoint(&validation));
    assert!(summary.cross_partition_pairs > 0);
    assert_eq!(split.len() + summary.cross_partition_pairs, dataset.examples.len());
}
