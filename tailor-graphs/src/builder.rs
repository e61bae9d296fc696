use std::collections::HashMap;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use tracing::{info, instrument};

use crate::call_graph::{ResolutionStats, resolve_calls};
use crate::cpg::{self, Cpg, FuncDict, PendingCall};
use crate::{FunctionId, FunctionRecord};

/// Result of building CPGs for a whole corpus.
#[derive(Debug, Default)]
pub struct BuildOutput {
    /// One CPG per function record, including degenerate ones.
    pub func_dict: FuncDict,
    pub calls: ResolutionStats,
    pub degenerate: usize,
    pub duration: Duration,
}

/// Builds one CPG per function, then resolves call edges across files.
#[derive(Debug, Default)]
pub struct CpgBuilder;

impl CpgBuilder {
    pub fn new() -> Self {
        Self
    }

    #[instrument(skip_all, name = "cpg_build", fields(functions = records.len()))]
    pub fn build(&self, records: &[FunctionRecord]) -> BuildOutput {
        let start = Instant::now();

        let local: Vec<(FunctionId, Cpg, Vec<PendingCall>)> = records
            .par_iter()
            .map(|record| {
                let (graph, pending) = cpg::build_local(record);
                (record.id, graph, pending)
            })
            .collect();

        let mut func_dict = FuncDict::new();
        let mut pending_calls: HashMap<FunctionId, Vec<PendingCall>> = HashMap::new();
        for (id, graph, pending) in local {
            if !pending.is_empty() {
                pending_calls.insert(id, pending);
            }
            func_dict.insert(id, graph);
        }

        let calls = resolve_calls(records, &pending_calls, &mut func_dict);
        let degenerate = func_dict.values().filter(|c| c.degenerate).count();

        let output = BuildOutput {
            func_dict,
            calls,
            degenerate,
            duration: start.elapsed(),
        };
        info!(
            cpgs = output.func_dict.len(),
            resolved_calls = output.calls.resolved,
            unresolved_calls = output.calls.unresolved,
            degenerate = output.degenerate,
            duration = ?output.duration,
            "CPG construction complete"
        );
        output
    }
}
