//! Build configuration.
//!
//! Every field has a default, so a JSON config file only needs to name the
//! values it overrides:
//!
//! ```json
//! { "workers": 4, "memory_budget": 268435456, "corrupt_segment_policy": "abort" }
//! ```

use crate::error::{IoContext, LexdexError, Result};
use crate::index::dictionary::DEFAULT_RESTART_INTERVAL;
use crate::index::postings::DEFAULT_SKIP_INTERVAL;
use crate::index::types::CorruptSegmentPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Smallest arena a worker may be given before every document spills
const MIN_WORKER_BUDGET: u64 = 4 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    /// Worker threads; 0 uses one per CPU
    pub workers: usize,
    /// Total arena budget in bytes, divided evenly between workers
    pub memory_budget: u64,
    /// Target size of one shard of input text
    pub shard_bytes: u64,
    /// Upper bound on concurrent merge partitions; 0 uses the worker count
    pub merge_partitions: usize,
    pub skip_interval: usize,
    pub restart_interval: usize,
    pub corrupt_segment_policy: CorruptSegmentPolicy,
    /// Where segments and run files go; defaults to a directory next to the output
    pub temp_dir: Option<PathBuf>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            memory_budget: 512 * 1024 * 1024,
            shard_bytes: 64 * 1024 * 1024,
            merge_partitions: 0,
            skip_interval: DEFAULT_SKIP_INTERVAL,
            restart_interval: DEFAULT_RESTART_INTERVAL,
            corrupt_segment_policy: CorruptSegmentPolicy::Skip,
            temp_dir: None,
        }
    }
}

impl BuildConfig {
    /// Load and validate a JSON config file
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).with_path(path)?;
        let config: BuildConfig = serde_json::from_str(&text)
            .map_err(|e| LexdexError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.shard_bytes == 0 {
            return Err(LexdexError::Config("shard_bytes must be positive".into()));
        }
        if self.skip_interval == 0 {
            return Err(LexdexError::Config("skip_interval must be positive".into()));
        }
        if self.restart_interval == 0 {
            return Err(LexdexError::Config("restart_interval must be positive".into()));
        }
        if self.worker_budget() < MIN_WORKER_BUDGET {
            return Err(LexdexError::Config(format!(
                "memory_budget of {} bytes leaves less than {} bytes per worker",
                self.memory_budget, MIN_WORKER_BUDGET
            )));
        }
        Ok(())
    }

    /// Resolved worker count
    pub fn worker_count(&self) -> usize {
        if self.workers == 0 {
            rayon::current_num_threads().max(1)
        } else {
            self.workers
        }
    }

    /// Arena budget of a single worker
    pub fn worker_budget(&self) -> u64 {
        self.memory_budget / self.worker_count() as u64
    }

    pub fn partition_count(&self) -> usize {
        if self.merge_partitions == 0 {
            self.worker_count()
        } else {
            self.merge_partitions
        }
    }
}
