//! Build pipeline: shard, invert, merge, assemble.

use crate::config::BuildConfig;
use crate::error::{IoContext, LexdexError, Result};
use crate::index::corpus::{Corpus, plan_shards};
use crate::index::docstore::{DocStore, sidecar_path};
use crate::index::merge::Merger;
use crate::index::partial::{AbortHandle, build_shard};
use crate::index::segment::{SegmentInfo, SegmentReader};
use crate::index::types::CorruptSegmentPolicy;
use crate::index::writer::IndexWriter;
use crate::utils::progress::{spinner, work_bar};
use rayon::prelude::*;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

/// A shard, segment or file that could not be processed
#[derive(Debug)]
pub struct UnitFailure {
    pub unit: String,
    pub error: LexdexError,
}

impl UnitFailure {
    pub fn new(unit: impl Into<String>, error: LexdexError) -> Self {
        Self {
            unit: unit.into(),
            error,
        }
    }
}

impl fmt::Display for UnitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.unit, self.error)
    }
}

#[derive(Debug, Clone, Default)]
pub struct BuildStats {
    pub documents: u64,
    pub bytes_tokenized: u64,
    pub tokens: u64,
    pub shards: usize,
    pub segments: usize,
    pub terms: u64,
    pub index_bytes: u64,
    pub invert_time: Duration,
    pub merge_time: Duration,
    pub write_time: Duration,
}

/// Outcome of a build that produced an index file
#[derive(Debug)]
pub struct BuildReport {
    pub index: PathBuf,
    pub stats: BuildStats,
    pub failures: Vec<UnitFailure>,
}

/// Scratch directory removed when dropped, whether the build succeeded or not
struct WorkDir(PathBuf);

impl WorkDir {
    fn create(parent: &Path) -> Result<Self> {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);
        let path = parent.join(format!(".lexdex-build-{}-{}", std::process::id(), nanos));
        fs::create_dir_all(&path).with_path(&path)?;
        Ok(Self(path))
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.0);
    }
}

pub struct IndexBuilder {
    config: BuildConfig,
    abort: AbortHandle,
    progress: bool,
}

impl IndexBuilder {
    pub fn new(config: BuildConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            abort: AbortHandle::new(),
            progress: false,
        })
    }

    /// Show progress bars on stderr
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    /// Handle that cancels a running [`IndexBuilder::build`] from another thread
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Index `corpus` into the file at `output`.
    ///
    /// Failures of single shards or segments are collected in the report and
    /// the build goes on; cancellation, a corrupt segment under
    /// [`CorruptSegmentPolicy::Abort`] and any failure writing the final file
    /// are returned as errors, leaving no index file behind.
    pub fn build(&self, corpus: &Corpus, output: &Path) -> Result<BuildReport> {
        if corpus.len() as u64 > u32::MAX as u64 {
            return Err(LexdexError::Config(format!(
                "{} documents exceed the DocId space",
                corpus.len()
            )));
        }

        let parent = match &self.config.temp_dir {
            Some(dir) => dir.clone(),
            None => output
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        };
        let work = WorkDir::create(&parent)?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.worker_count())
            .build()
            .map_err(|e| LexdexError::Config(format!("cannot start worker pool: {}", e)))?;

        let mut stats = BuildStats {
            documents: corpus.len() as u64,
            ..Default::default()
        };
        let mut failures = Vec::new();

        info!(
            documents = corpus.len(),
            bytes = corpus.total_bytes(),
            workers = self.config.worker_count(),
            "building index"
        );

        // Phase 1: invert shards into segments
        let started = Instant::now();
        let shards = plan_shards(corpus, self.config.shard_bytes);
        stats.shards = shards.len();
        let budget = self.config.worker_budget();
        let bar = work_bar(shards.len() as u64, "inverting shards", self.progress);
        let outputs: Vec<_> = pool.install(|| {
            shards
                .par_iter()
                .map(|shard| {
                    let result = build_shard(corpus, shard, &work.0, budget, &self.abort);
                    bar.inc(1);
                    (shard.id, result)
                })
                .collect()
        });
        bar.finish_and_clear();

        let mut segment_infos: Vec<SegmentInfo> = Vec::new();
        for (shard_id, result) in outputs {
            match result {
                Ok(out) => {
                    stats.tokens += out.tokens;
                    stats.bytes_tokenized += out.bytes;
                    segment_infos.extend(out.segments);
                }
                Err(e) if e.is_fatal_for_build() => return Err(e),
                Err(e) => {
                    warn!(shard = shard_id, error = %e, "shard failed");
                    failures.push(UnitFailure::new(format!("shard {}", shard_id), e));
                }
            }
        }
        self.abort.check()?;
        stats.segments = segment_infos.len();
        stats.invert_time = started.elapsed();
        info!(
            segments = stats.segments,
            tokens = stats.tokens,
            elapsed_ms = stats.invert_time.as_millis() as u64,
            "shards inverted"
        );

        // Phase 2: merge segments into partition runs
        let started = Instant::now();
        let mut segments = Vec::with_capacity(segment_infos.len());
        for info in &segment_infos {
            match SegmentReader::open(&info.path) {
                Ok(reader) => segments.push(reader),
                Err(e) if self.config.corrupt_segment_policy == CorruptSegmentPolicy::Abort => {
                    return Err(e);
                }
                Err(e) => {
                    warn!(segment = %info.path.display(), error = %e, "skipping segment");
                    failures.push(UnitFailure::new(info.path.display().to_string(), e));
                }
            }
        }

        let merge_spinner = spinner("merging segments", self.progress);
        let merger = Merger::new(
            &segments,
            &work.0,
            self.config.corrupt_segment_policy,
            self.config.skip_interval,
            &self.abort,
        );
        let merged = pool.install(|| merger.merge(self.config.partition_count()))?;
        merge_spinner.finish_and_clear();
        drop(segments);
        for info in &segment_infos {
            let _ = fs::remove_file(&info.path);
        }
        failures.extend(merged.failures);
        let runs = merged.runs;
        stats.merge_time = started.elapsed();
        info!(
            partitions = runs.len(),
            elapsed_ms = stats.merge_time.as_millis() as u64,
            "segments merged"
        );
        self.abort.check()?;

        // Phase 3: assemble the index file and the document names
        let started = Instant::now();
        let docs_path = sidecar_path(output);
        let writer = IndexWriter::new(
            output,
            self.config.restart_interval,
            self.config.skip_interval,
        );
        let summary = writer.write_with(
            corpus.len() as u64,
            &runs,
            || DocStore::new(corpus.names()).save(&docs_path),
        )?;
        stats.terms = summary.term_count;
        stats.index_bytes = summary.file_bytes;
        stats.write_time = started.elapsed();
        info!(
            path = %output.display(),
            terms = stats.terms,
            bytes = stats.index_bytes,
            failures = failures.len(),
            "index written"
        );

        Ok(BuildReport {
            index: output.to_path_buf(),
            stats,
            failures,
        })
    }
}
