//! Run memory and replay
//!
//! Every completed pipeline execution is recorded exactly once and can be
//! replayed by run id.

use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::context::ContextSnapshot;
use crate::error::OrchestrationError;
use crate::models::{Finding, RunMemory};
use crate::tools::ToolId;
use crate::Result;

/// Write-once run storage
pub struct RunStore {
    runs: Arc<RwLock<HashMap<String, RunMemory>>>,
}

impl RunStore {
    pub fn new() -> Self {
        Self {
            runs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Build and persist a new run, returning its id.
    pub async fn record_run(
        &self,
        snapshot: ContextSnapshot,
        tools_selected: Vec<ToolId>,
        tool_results: Vec<Finding>,
    ) -> Result<String> {
        let memory = RunMemory {
            run_id: new_run_id(),
            context_hash: compute_context_hash(&snapshot),
            context_snapshot: snapshot,
            tools_selected,
            tool_results,
            timestamp: Utc::now(),
        };
        self.record(memory).await
    }

    /// Store a run. An existing id is never overwritten.
    pub async fn record(&self, memory: RunMemory) -> Result<String> {
        let run_id = memory.run_id.clone();
        let mut runs = self.runs.write().await;

        if runs.contains_key(&run_id) {
            return Err(OrchestrationError::StateError(format!(
                "Run {} already recorded",
                run_id
            )));
        }

        debug!(run_id = %run_id, findings = memory.tool_results.len(), "Recorded run");
        runs.insert(run_id.clone(), memory);
        Ok(run_id)
    }

    pub async fn get(&self, run_id: &str) -> Option<RunMemory> {
        let runs = self.runs.read().await;
        runs.get(run_id).cloned()
    }

    /// Like [`get`](Self::get) but absence is an error.
    pub async fn replay(&self, run_id: &str) -> Result<RunMemory> {
        self.get(run_id)
            .await
            .ok_or_else(|| OrchestrationError::RunNotFound(run_id.to_string()))
    }

    /// Run ids ordered by timestamp ascending
    pub async fn list(&self) -> Vec<String> {
        let runs = self.runs.read().await;

        let mut items: Vec<_> = runs
            .values()
            .map(|run| (run.run_id.clone(), run.timestamp))
            .collect();
        items.sort_by_key(|(_, timestamp)| *timestamp);

        items.into_iter().map(|(id, _)| id).collect()
    }

    /// Recompute the snapshot hash and compare with the stored one.
    pub async fn verify_integrity(&self, run_id: &str) -> Result<bool> {
        let runs = self.runs.read().await;

        if let Some(run) = runs.get(run_id) {
            Ok(compute_context_hash(&run.context_snapshot) == run.context_hash)
        } else {
            Ok(false)
        }
    }
}

impl Default for RunStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Compact UUID4 without dashes.
pub fn new_run_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// SHA256 of a context snapshot, streamed straight into the hasher
pub fn compute_context_hash(snapshot: &ContextSnapshot) -> String {
    let mut hasher = Sha256::new();

    if serde_json::to_writer(&mut HashWriter(&mut hasher), snapshot).is_err() {
        return String::new();
    }

    hex::encode(hasher.finalize())
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
