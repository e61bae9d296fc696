//! Per-language entry points.
//!
//! The driver never branches on language itself: it asks [`frontend_for`]
//! for a [`Frontend`] and calls the same four operations on whichever one it
//! gets back.

use std::path::Path;
use std::sync::Arc;

use tailor_graphs::languages::{c::CSupport, java::JavaSupport};
use tailor_graphs::{
    BuildOutput, CpgBuilder, ExtractOutput, FuncDict, FunctionExtractor, FunctionRecord, Lang,
    LanguageSupport,
};
use tracing::info;

use crate::cache::InterResults;
use crate::config::ExtractionSection;
use crate::context::{RunContext, Verbosity};
use crate::encode::{BatchEncoder, EncodeStats};
use crate::error::Result;
use crate::stats::CpgStatistics;
use crate::types::Task;

pub trait Frontend: Send + Sync + std::fmt::Debug {
    fn lang(&self) -> Lang;

    fn support(&self) -> Arc<dyn LanguageSupport>;

    /// Parse every source file under `src_root` into function records.
    fn extract(&self, ctx: &RunContext, src_root: &Path, config: &ExtractionSection) -> Result<ExtractOutput> {
        let _stage = ctx.stage("extract");
        let output = FunctionExtractor::new(self.support())
            .with_includes(config.include_patterns.clone())
            .with_excludes(config.exclude_patterns.clone())
            .extract(src_root)?;
        info!(
            lang = %self.lang(),
            functions = output.functions.len(),
            files = output.files_parsed,
            malformed = output.malformed_count(),
            failed_files = output.errors.len(),
            "Extraction finished"
        );
        Ok(output)
    }

    /// One CPG per record, with cross-file calls resolved.
    fn build_cpg(&self, ctx: &RunContext, func_list: &[FunctionRecord]) -> BuildOutput {
        let _stage = ctx.stage("build_cpg");
        CpgBuilder::new().build(func_list)
    }

    fn batch_encode(
        &self,
        ctx: &RunContext,
        task: Task,
        results: &InterResults,
        label_file: Option<&Path>,
        out_dir: &Path,
    ) -> Result<EncodeStats> {
        let _stage = ctx.stage("batch_encode");
        BatchEncoder::new(task).encode(ctx, &results.func_list, &results.func_dict, label_file, out_dir)
    }

    /// Compute corpus statistics and show them unless the run is quiet.
    fn print_statistics(&self, ctx: &RunContext, func_dict: &FuncDict) -> CpgStatistics {
        let stats = CpgStatistics::compute(func_dict);
        stats.log();
        if ctx.verbosity > Verbosity::Quiet {
            ctx.progress.message(&format!("[{}] {stats}", self.lang()));
        }
        stats
    }
}

#[derive(Debug, Clone)]
pub struct CFrontend {
    support: Arc<CSupport>,
}

impl Default for CFrontend {
    fn default() -> Self {
        Self {
            support: Arc::new(CSupport),
        }
    }
}

impl Frontend for CFrontend {
    fn lang(&self) -> Lang {
        Lang::C
    }

    fn support(&self) -> Arc<dyn LanguageSupport> {
        self.support.clone()
    }
}

#[derive(Debug, Clone)]
pub struct JavaFrontend {
    support: Arc<JavaSupport>,
}

impl Default for JavaFrontend {
    fn default() -> Self {
        Self {
            support: Arc::new(JavaSupport),
        }
    }
}

impl Frontend for JavaFrontend {
    fn lang(&self) -> Lang {
        Lang::Java
    }

    fn support(&self) -> Arc<dyn LanguageSupport> {
        self.support.clone()
    }
}

/// Front-end for a language tag.
pub fn frontend_for(lang: Lang) -> Box<dyn Frontend> {
    match lang {
        Lang::C => Box::new(CFrontend::default()),
        Lang::Java => Box::new(JavaFrontend::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_by_language_tag() {
        assert_eq!(frontend_for(Lang::C).lang(), Lang::C);
        assert_eq!(frontend_for(Lang::Java).lang(), Lang::Java);
        assert_eq!(frontend_for(Lang::Java).support().lang(), Lang::Java);
    }

    #[test]
    fn c_frontend_extracts_and_builds() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("a.c"),
            "int sq(int x) { return x * x; }\nint four(void) { return sq(2); }\n",
        )
        .unwrap();
        let ctx = RunContext::quiet();
        let frontend = frontend_for(Lang::C);
        let extracted = frontend
            .extract(&ctx, dir.path(), &ExtractionSection::default())
            .unwrap();
        assert_eq!(extracted.functions.len(), 2);
        let built = frontend.build_cpg(&ctx, &extracted.functions);
        assert_eq!(built.calls.resolved, 1);
        let stats = frontend.print_statistics(&ctx, &built.func_dict);
        assert_eq!(stats.functions, 2);
    }
}
