// Inter-procedural call resolution over the whole corpus.
//
// A call site in file A may target a function defined in file B, so resolution
// runs after every local CPG exists. Targets are matched by name, narrowed by
// qualifier, arity and file locality; a call with no candidate is recorded as
// unresolved and never pointed at an invented node.

use std::collections::HashMap;

use crate::cpg::{CallEdge, FuncDict, NodeId, PendingCall, UnresolvedCall};
use crate::{FunctionId, FunctionRecord};

/// Counters from one resolution pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionStats {
    pub resolved: usize,
    pub unresolved: usize,
}

/// Name index over the function list.
#[derive(Debug)]
pub struct CallResolver<'a> {
    by_name: HashMap<&'a str, Vec<&'a FunctionRecord>>,
}

impl<'a> CallResolver<'a> {
    pub fn new(records: &'a [FunctionRecord]) -> Self {
        let mut by_name: HashMap<&str, Vec<&FunctionRecord>> = HashMap::new();
        for record in records {
            by_name.entry(record.name.as_str()).or_default().push(record);
        }
        for candidates in by_name.values_mut() {
            candidates.sort_by_key(|r| r.id);
        }
        Self { by_name }
    }

    /// Pick the callee for one call site made from `caller`.
    pub fn resolve(&self, caller: &FunctionRecord, call: &PendingCall) -> Option<FunctionId> {
        let candidates = self.by_name.get(call.info.callee.as_str())?;

        let qualified: Vec<&FunctionRecord> = match call.info.qualifier.as_deref() {
            Some(q) => candidates
                .iter()
                .copied()
                .filter(|r| owner_matches(r, q))
                .collect(),
            None => Vec::new(),
        };
        let pool: &[&FunctionRecord] = if qualified.is_empty() {
            candidates.as_slice()
        } else {
            qualified.as_slice()
        };

        let by_arity: Vec<&FunctionRecord> = pool
            .iter()
            .copied()
            .filter(|r| r.arity == call.info.arg_count)
            .collect();
        let pool = if by_arity.is_empty() {
            pool
        } else {
            by_arity.as_slice()
        };

        pool.iter()
            .find(|r| r.source_file == caller.source_file)
            .or_else(|| pool.first())
            .map(|r| r.id)
    }
}

/// `Type.method` owned by a type whose simple name equals the qualifier.
fn owner_matches(record: &FunctionRecord, qualifier: &str) -> bool {
    let owner = record
        .qualified_name
        .rsplit_once('.')
        .map(|(owner, _)| owner.rsplit('.').next().unwrap_or(owner));
    owner == Some(qualifier)
}

/// Attach resolved call edges and unresolved markers to every CPG in `dict`.
pub fn resolve_calls(
    records: &[FunctionRecord],
    pending: &HashMap<FunctionId, Vec<PendingCall>>,
    dict: &mut FuncDict,
) -> ResolutionStats {
    let resolver = CallResolver::new(records);
    let mut stats = ResolutionStats::default();

    for caller in records {
        let Some(sites) = pending.get(&caller.id) else {
            continue;
        };
        let mut calls = Vec::new();
        let mut unresolved = Vec::new();
        for call in sites {
            match resolver.resolve(caller, call) {
                Some(callee) if dict.contains_key(&callee) => {
                    calls.push(CallEdge {
                        site: call.site,
                        callee,
                        entry: NodeId(0),
                    });
                }
                _ => unresolved.push(UnresolvedCall {
                    site: call.site,
                    callee_name: call.info.callee.clone(),
                }),
            }
        }
        stats.resolved += calls.len();
        stats.unresolved += unresolved.len();
        if let Some(cpg) = dict.get_mut(&caller.id) {
            cpg.calls = calls;
            cpg.unresolved = unresolved;
        }
    }

    stats
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CallInfo, TextRange};

    fn rec(id: u32, file: &str, qualified: &str, arity: usize) -> FunctionRecord {
        FunctionRecord {
            id: FunctionId(id),
            source_file: file.into(),
            name: qualified.rsplit('.').next().unwrap().to_string(),
            qualified_name: qualified.to_string(),
            arity,
            span: TextRange::default(),
            ast_root: None,
        }
    }

    fn call(callee: &str, qualifier: Option<&str>, arg_count: usize) -> PendingCall {
        PendingCall {
            site: NodeId(3),
            info: CallInfo {
                callee: callee.to_string(),
                qualifier: qualifier.map(str::to_string),
                arg_count,
            },
        }
    }

    #[test]
    fn resolves_across_files() {
        let records = vec![rec(0, "a.c", "main", 0), rec(1, "b.c", "helper", 1)];
        let resolver = CallResolver::new(&records);
        assert_eq!(
            resolver.resolve(&records[0], &call("helper", None, 1)),
            Some(FunctionId(1))
        );
        assert_eq!(resolver.resolve(&records[0], &call("printf", None, 2)), None);
    }

    #[test]
    fn prefers_matching_arity_then_same_file() {
        let records = vec![
            rec(0, "a.c", "caller", 0),
            rec(1, "b.c", "dup", 2),
            rec(2, "c.c", "dup", 1),
            rec(3, "a.c", "dup", 1),
        ];
        let resolver = CallResolver::new(&records);
        assert_eq!(
            resolver.resolve(&records[0], &call("dup", None, 1)),
            Some(FunctionId(3))
        );
        assert_eq!(
            resolver.resolve(&records[0], &call("dup", None, 2)),
            Some(FunctionId(1))
        );
        // no arity match: any name match, the caller's own file first
        assert_eq!(
            resolver.resolve(&records[1], &call("dup", None, 5)),
            Some(FunctionId(1))
        );
    }

    #[test]
    fn qualifier_narrows_java_receivers() {
        let records = vec![
            rec(0, "A.java", "A.go", 0),
            rec(1, "Cache.java", "Cache.get", 1),
            rec(2, "Map.java", "Map.get", 1),
        ];
        let resolver = CallResolver::new(&records);
        assert_eq!(
            resolver.resolve(&records[0], &call("get", Some("Map"), 1)),
            Some(FunctionId(2))
        );
        // unknown receiver: any `get` is acceptable, lowest id wins
        assert_eq!(
            resolver.resolve(&records[0], &call("get", Some("cache"), 1)),
            Some(FunctionId(1))
        );
    }

    #[test]
    fn unresolved_calls_are_recorded_not_invented() {
        let records = vec![rec(0, "a.c", "main", 0)];
        let mut dict = FuncDict::new();
        dict.insert(FunctionId(0), crate::cpg::degenerate(&records[0]));
        let pending = HashMap::from([(FunctionId(0), vec![call("missing", None, 0)])]);

        let stats = resolve_calls(&records, &pending, &mut dict);
        assert_eq!(stats, ResolutionStats { resolved: 0, unresolved: 1 });
        let cpg = &dict[&FunctionId(0)];
        assert!(cpg.calls.is_empty());
        assert_eq!(cpg.unresolved[0].callee_name, "missing");
    }
}
