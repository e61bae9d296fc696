use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use tailor_core::pipeline::{ExtractOptions, ExtractStats, Origin};
use tailor_core::{RunContext, Task, Verbosity, run_extract};
use tailor_graphs::Lang;

#[derive(Args, Debug)]
#[allow(clippy::struct_excessive_bools)]
pub struct ExtractArgs {
    /// Source language: c or java
    #[arg(long)]
    pub lang: Lang,

    /// Task: clone, classification or code_smell
    #[arg(long, default_value = "code_smell")]
    pub task: Task,

    /// Root of the source tree to extract
    #[arg(long = "src_path", visible_alias = "src-path")]
    pub src_path: Option<PathBuf>,

    /// Output directory for encoded graphs and the copied label file
    #[arg(long = "encode_path", visible_alias = "encode-path")]
    pub encode_path: Option<PathBuf>,

    /// Directory holding the cached inter-result bundle
    #[arg(long = "iresult_path", visible_alias = "iresult-path")]
    pub iresult_path: Option<PathBuf>,

    /// Encode CPGs into the encoding directory
    #[arg(long)]
    pub encoding: bool,

    /// Store the extracted functions and CPGs
    #[arg(long = "store_iresult", visible_alias = "store-iresult")]
    pub store_iresult: bool,

    /// Reuse a cached bundle instead of extracting
    #[arg(long = "load_iresult", visible_alias = "load-iresult")]
    pub load_iresult: bool,

    /// Print CPG statistics
    #[arg(long)]
    pub statistics: bool,

    /// Directory holding the task's label file (overrides the config)
    #[arg(long = "label_dir", visible_alias = "label-dir")]
    pub label_dir: Option<PathBuf>,

    /// Disallow re-extraction when the cached bundle is corrupt
    #[arg(long = "no_reextract", visible_alias = "no-reextract")]
    pub no_reextract: bool,

    /// Config file (default: ./tailor.toml when present)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

pub fn run(ctx: &RunContext, args: ExtractArgs) -> anyhow::Result<()> {
    let mut config = super::load_config(args.config.as_deref())?;
    if let Some(dir) = args.label_dir {
        config.encoding.label_dir = Some(dir);
    }
    if args.no_reextract {
        config.extraction.allow_reextract = false;
    }

    let opts = ExtractOptions {
        lang: args.lang,
        task: args.task,
        src_path: args.src_path,
        encode_path: args.encode_path,
        iresult_path: args.iresult_path,
        encoding: args.encoding,
        store_iresult: args.store_iresult,
        load_iresult: args.load_iresult,
        statistics: args.statistics,
    };
    let (_, stats) = run_extract(ctx, &config, &opts)
        .with_context(|| format!("{} extraction for task {} failed", opts.lang, opts.task))?;

    if ctx.verbosity > Verbosity::Quiet {
        print_summary(&stats);
    }
    Ok(())
}

fn print_summary(stats: &ExtractStats) {
    let origin = match stats.origin {
        Origin::Extracted => "extracted",
        Origin::Cache => "loaded from cache",
        Origin::Reextracted => "re-extracted (cache rejected)",
    };
    println!("Functions {origin}");
    println!("  {:<20} {:>8}", "functions", stats.functions);
    if stats.origin != Origin::Cache {
        println!("  {:<20} {:>8}", "files parsed", stats.files_parsed);
        println!("  {:<20} {:>8}", "files failed", stats.failed_files);
        println!("  {:<20} {:>8}", "malformed", stats.malformed);
        println!("  {:<20} {:>8}", "degenerate CPGs", stats.degenerate);
        println!("  {:<20} {:>8}", "resolved calls", stats.resolved_calls);
        println!("  {:<20} {:>8}", "unresolved calls", stats.unresolved_calls);
    }
    if let Some(path) = &stats.stored_bundle {
        println!("Stored inter-results: {}", path.display());
    }
    if let Some(encoding) = &stats.encoding {
        println!("Encoding");
        println!("  {:<20} {:>8}", "graphs", encoding.graphs);
        println!("  {:<20} {:>8}", "examples", encoding.examples);
        println!("  {:<20} {:>8}", "node types", encoding.node_types);
        println!("  {:<20} {:>8}", "tokens", encoding.tokens);
        if let Some(join) = &encoding.join {
            println!("  {:<20} {:>8}", "labels read", join.read);
            println!("  {:<20} {:>8}", "labels dropped", join.dropped());
        }
        match &stats.label_file {
            Some(path) => println!("  label file: {}", path.display()),
            None => println!("  label file: none (no examples written)"),
        }
    }
    println!("Done in {:.2}s", stats.duration.as_secs_f64());
}
