use serde::{Deserialize, Serialize};

/// Aggregate counts surfaced by the CLI/status boundary and by the
/// indexing-state snapshot (C11). Supplements spec.md's per-component
/// contracts with a single typed rollup instead of ad hoc query results,
/// mirroring the shape of the teacher's `DeleteReport`
/// (`chunking-store::orchestrator`) applied to a read-only summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusStats {
    pub documents_total: u64,
    pub documents_deleted: u64,
    pub representations_total: u64,
    pub chunks_total: u64,
    pub chunks_pending: u64,
    pub chunks_embedded: u64,
    pub chunks_failed: u64,
}
