//! Semantic ingestion pipeline.
//!
//! Each episode runs through five phases in order:
//! 1. **Analyze**: one model call for the conversation structure (cached)
//! 2. **Regroup**: fold segments into meaningful units at the boundaries
//! 3. **Extract**: one model call per unit, fanned out with bounded concurrency
//! 4. **Resolve**: deduplicate entities across units, in unit order
//! 5. **Store**: optionally embed and cluster the units, then write
//!    everything in a single graph transaction
//!
//! Nothing is written before STORE. Cancellation is honoured up to the
//! moment STORE opens its transaction.

pub mod analyzer;
pub mod context;
pub mod extract;
pub mod regroup;
pub mod resolve;
pub mod retry;

use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use analyzer::{Analysis, ConversationAnalyzer};
pub use context::{PipelineContext, RateLimiter, StructureCache};
pub use extract::{ExtractionResult, MeaningfulUnitExtractor};
pub use regroup::SegmentRegrouper;
pub use resolve::{EntityResolver, ResolutionConflict, ResolvedExtraction};

use crate::clustering::{ClusterInput, ClusterSettings, ClusteringEngine, ClusteringOutcome};
use crate::driver::{GraphDriver, GraphTransaction};
use crate::embedder::EmbedderClient;
use crate::errors::{PodknowError, ProviderError, Result};
use crate::llm_client::LlmClient;
use crate::nodes::{ClusterScope, MeaningfulUnit, UnitId};
use crate::transcript::EpisodeInput;
use crate::types::{PipelineConfig, ScopeMode};
use retry::call_with_retry;

/// Phases of the per-episode state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePhase {
    Analyze,
    Regroup,
    Extract,
    Resolve,
    Store,
}

impl fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PipelinePhase::Analyze => "analyze",
            PipelinePhase::Regroup => "regroup",
            PipelinePhase::Extract => "extract",
            PipelinePhase::Resolve => "resolve",
            PipelinePhase::Store => "store",
        })
    }
}

/// Wall-clock time spent in each phase, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PhaseTimings {
    pub analyze_ms: u64,
    pub regroup_ms: u64,
    pub extract_ms: u64,
    pub resolve_ms: u64,
    pub store_ms: u64,
}

impl PhaseTimings {
    fn record(&mut self, phase: PipelinePhase, elapsed: Duration) {
        let ms = elapsed.as_millis() as u64;
        match phase {
            PipelinePhase::Analyze => self.analyze_ms = ms,
            PipelinePhase::Regroup => self.regroup_ms = ms,
            PipelinePhase::Extract => self.extract_ms = ms,
            PipelinePhase::Resolve => self.resolve_ms = ms,
            PipelinePhase::Store => self.store_ms = ms,
        }
    }

    pub fn total_ms(&self) -> u64 {
        self.analyze_ms + self.regroup_ms + self.extract_ms + self.resolve_ms + self.store_ms
    }
}

/// Outcome of a successfully stored episode.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpisodeReport {
    pub episode_id: String,
    /// The structure came from the whole-transcript fallback.
    pub structure_degraded: bool,
    pub structure_cache_hit: bool,
    pub units: usize,
    pub entities: usize,
    pub quotes: usize,
    pub insights: usize,
    pub relationships: usize,
    /// Units whose extraction failed; stored without knowledge.
    pub failed_units: Vec<UnitId>,
    pub dropped_records: usize,
    pub conflicts: Vec<ResolutionConflict>,
    pub clusters: usize,
    pub noise_units: usize,
    pub timings: PhaseTimings,
}

/// Terminal failure of one episode.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("episode {episode_id} failed during {phase}: {reason}")]
pub struct EpisodeFailure {
    pub episode_id: String,
    pub phase: PipelinePhase,
    pub reason: String,
    pub cancelled: bool,
}

impl EpisodeFailure {
    fn new(episode_id: &str, phase: PipelinePhase, error: &PodknowError) -> Self {
        Self {
            episode_id: episode_id.to_string(),
            phase,
            reason: error.to_string(),
            cancelled: matches!(error, PodknowError::Cancelled),
        }
    }
}

/// An episode queued for [`PipelineOrchestrator::process_episodes`].
#[derive(Debug, Clone)]
pub struct EpisodeJob {
    pub input: EpisodeInput,
    pub cancel: CancellationToken,
}

impl EpisodeJob {
    pub fn new(input: EpisodeInput) -> Self {
        Self {
            input,
            cancel: CancellationToken::new(),
        }
    }
}

/// Per-episode outcomes of a batch, in submission order.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub succeeded: Vec<EpisodeReport>,
    pub failed: Vec<EpisodeFailure>,
}

/// Drives episodes through the five phases against the injected
/// collaborators.
pub struct PipelineOrchestrator<L, E, G> {
    llm: L,
    embedder: E,
    driver: G,
    ctx: PipelineContext,
    config: PipelineConfig,
}

impl<L, E, G> PipelineOrchestrator<L, E, G>
where
    L: LlmClient,
    E: EmbedderClient,
    G: GraphDriver,
{
    pub fn new(llm: L, embedder: E, driver: G, ctx: PipelineContext, config: PipelineConfig) -> Self {
        Self {
            llm,
            embedder,
            driver,
            ctx,
            config,
        }
    }

    /// Build with fresh shared resources derived from `config`.
    ///
    /// Fails with [`PodknowError::Config`] when `config` is out of range.
    pub fn with_config(llm: L, embedder: E, driver: G, config: PipelineConfig) -> Result<Self> {
        let ctx = PipelineContext::from_config(&config)?;
        Ok(Self::new(llm, embedder, driver, ctx, config))
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    pub fn driver(&self) -> &G {
        &self.driver
    }

    pub fn llm(&self) -> &L {
        &self.llm
    }

    /// Run every job, up to `max_parallel_episodes` at a time. A failing
    /// episode never affects the others.
    pub async fn process_episodes(&self, jobs: Vec<EpisodeJob>) -> BatchReport {
        let mut outcomes: Vec<(usize, std::result::Result<EpisodeReport, EpisodeFailure>)> =
            stream::iter(jobs.iter().enumerate().map(|(i, job)| async move {
                (i, self.process_episode(&job.input, &job.cancel).await)
            }))
            .buffer_unordered(self.config.max_parallel_episodes.max(1))
            .collect()
            .await;
        outcomes.sort_by_key(|(i, _)| *i);

        let mut report = BatchReport::default();
        for (_, outcome) in outcomes {
            match outcome {
                Ok(r) => report.succeeded.push(r),
                Err(f) => report.failed.push(f),
            }
        }
        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "batch complete"
        );
        report
    }

    /// Run one episode to `Completed` (the report) or `Failed`.
    pub async fn process_episode(
        &self,
        input: &EpisodeInput,
        cancel: &CancellationToken,
    ) -> std::result::Result<EpisodeReport, EpisodeFailure> {
        let episode = input.episode_id.as_str();
        let segments = input.segments.as_slice();
        let mut timings = PhaseTimings::default();

        let analysis = self
            .phase(PipelinePhase::Analyze, episode, cancel, &mut timings, async {
                if segments.is_empty() {
                    return Err(PodknowError::Validation("episode has no segments".to_string()));
                }
                Ok(ConversationAnalyzer::new(&self.llm, &self.ctx).analyze(segments).await)
            })
            .await?;

        let units = self
            .phase(PipelinePhase::Regroup, episode, cancel, &mut timings, async {
                SegmentRegrouper::new(episode).regroup(segments, &analysis.structure)
            })
            .await?;

        let (results, failed_units) = self
            .phase(PipelinePhase::Extract, episode, cancel, &mut timings, async {
                Ok(self.extract_units(&units, input).await)
            })
            .await?;
        let dropped_records = results.iter().map(|r| r.dropped_records).sum();

        let resolved = self
            .phase(PipelinePhase::Resolve, episode, cancel, &mut timings, async {
                Ok(EntityResolver::new(episode, self.config.similarity_threshold).resolve(&results))
            })
            .await?;

        let clustering = self
            .store(episode, cancel, &mut timings, units.clone(), &resolved)
            .await?;

        let report = EpisodeReport {
            episode_id: episode.to_string(),
            structure_degraded: analysis.structure.degraded,
            structure_cache_hit: analysis.cache_hit,
            units: units.len(),
            entities: resolved.entities.len(),
            quotes: resolved.quotes.len(),
            insights: resolved.insights.len(),
            relationships: resolved.relationships.len(),
            failed_units,
            dropped_records,
            conflicts: resolved.conflicts,
            clusters: clustering.as_ref().map_or(0, |c| c.clusters.len()),
            noise_units: clustering.as_ref().map_or(0, |c| c.noise.len()),
            timings,
        };
        info!(
            episode,
            units = report.units,
            entities = report.entities,
            relationships = report.relationships,
            failed_units = report.failed_units.len(),
            degraded = report.structure_degraded,
            elapsed_ms = timings.total_ms(),
            "episode stored"
        );
        Ok(report)
    }

    /// Cluster caller-supplied unit embeddings for a corpus and replace the
    /// corpus scope atomically.
    pub async fn cluster_corpus(&self, corpus: &str, inputs: Vec<ClusterInput>) -> Result<ClusteringOutcome> {
        let engine = ClusteringEngine::new(&self.llm, &self.ctx, ClusterSettings::from_config(&self.config));
        let outcome = engine
            .cluster(ClusterScope::Corpus(corpus.to_string()), &inputs)
            .await?;

        let mut tx = self.driver.begin().await?;
        match write_clusters(&mut tx, &outcome).await {
            Ok(()) => tx.commit().await?,
            Err(e) => {
                rollback(tx, corpus).await;
                return Err(e);
            }
        }
        Ok(outcome)
    }

    /// Time `work`, racing it against cancellation, and map failure to the
    /// phase it happened in.
    async fn phase<T>(
        &self,
        phase: PipelinePhase,
        episode: &str,
        cancel: &CancellationToken,
        timings: &mut PhaseTimings,
        work: impl Future<Output = Result<T>>,
    ) -> std::result::Result<T, EpisodeFailure> {
        let started = Instant::now();
        let outcome = if cancel.is_cancelled() {
            Err(PodknowError::Cancelled)
        } else {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(PodknowError::Cancelled),
                result = work => result,
            }
        };
        let elapsed = started.elapsed();
        timings.record(phase, elapsed);

        match outcome {
            Ok(value) => {
                info!(episode, phase = %phase, elapsed_ms = elapsed.as_millis() as u64, "phase complete");
                Ok(value)
            }
            Err(e) => {
                warn!(episode, phase = %phase, error = %e, "episode failed");
                Err(EpisodeFailure::new(episode, phase, &e))
            }
        }
    }

    /// Fan out one extraction per unit, fan back in by ordinal. A unit
    /// whose request fails yields an empty result and is reported.
    async fn extract_units(
        &self,
        units: &[MeaningfulUnit],
        input: &EpisodeInput,
    ) -> (Vec<ExtractionResult>, Vec<UnitId>) {
        let extractor = MeaningfulUnitExtractor::new(&self.llm, &self.ctx);
        let extractor = &extractor;

        let mut outcomes: Vec<(usize, Result<ExtractionResult>)> =
            stream::iter(units.iter().enumerate().map(|(i, unit)| {
                let previous = i.checked_sub(1).map(|p| units[p].summary.as_str());
                let next = units.get(i + 1).map(|u| u.summary.as_str());
                async move {
                    (
                        i,
                        extractor
                            .extract(unit, &input.segments, previous, next)
                            .await,
                    )
                }
            }))
            .buffer_unordered(self.config.max_parallel_units.max(1))
            .collect()
            .await;
        outcomes.sort_by_key(|(i, _)| *i);

        let mut results = Vec::with_capacity(units.len());
        let mut failed = Vec::new();
        for (i, outcome) in outcomes {
            let unit = &units[i];
            match outcome {
                Ok(r) => results.push(r),
                Err(e) => {
                    warn!(
                        episode = %input.episode_id,
                        unit = unit.ordinal,
                        error = %e,
                        "unit extraction failed"
                    );
                    failed.push(unit.id);
                    results.push(ExtractionResult::empty(unit.id));
                }
            }
        }
        (results, failed)
    }

    /// STORE: cluster (cancellable), then one transaction (not cancellable).
    async fn store(
        &self,
        episode: &str,
        cancel: &CancellationToken,
        timings: &mut PhaseTimings,
        mut units: Vec<MeaningfulUnit>,
        resolved: &ResolvedExtraction,
    ) -> std::result::Result<Option<ClusteringOutcome>, EpisodeFailure> {
        let started = Instant::now();
        let fail = |timings: &mut PhaseTimings, e: PodknowError| {
            timings.record(PipelinePhase::Store, started.elapsed());
            warn!(episode, phase = %PipelinePhase::Store, error = %e, "episode failed");
            EpisodeFailure::new(episode, PipelinePhase::Store, &e)
        };

        let clustering = if self.config.cluster_scope == ScopeMode::Episode {
            let prepared = if cancel.is_cancelled() {
                Err(PodknowError::Cancelled)
            } else {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(PodknowError::Cancelled),
                    outcome = self.cluster_episode(episode, &mut units) => outcome,
                }
            };
            Some(prepared.map_err(|e| fail(timings, e))?)
        } else if cancel.is_cancelled() {
            return Err(fail(timings, PodknowError::Cancelled));
        } else {
            None
        };

        // From here on the episode runs to commit or rollback.
        let mut tx = self.driver.begin().await.map_err(|e| fail(timings, e))?;
        let written = write_episode(&mut tx, episode, &units, resolved, clustering.as_ref()).await;
        let committed = match written {
            Ok(()) => tx.commit().await,
            Err(e) => {
                rollback(tx, episode).await;
                Err(e)
            }
        };
        committed.map_err(|e| fail(timings, e))?;

        let elapsed = started.elapsed();
        timings.record(PipelinePhase::Store, elapsed);
        info!(episode, phase = %PipelinePhase::Store, elapsed_ms = elapsed.as_millis() as u64, "phase complete");
        Ok(clustering)
    }

    /// Embed unit summaries (stored on the units) and cluster them within
    /// the episode scope.
    async fn cluster_episode(&self, episode: &str, units: &mut [MeaningfulUnit]) -> Result<ClusteringOutcome> {
        let texts: Vec<&str> = units.iter().map(|u| u.summary.as_str()).collect();
        let embeddings = call_with_retry(&self.ctx, "embed", || self.embedder.embed_batch(&texts)).await?;
        if embeddings.len() != units.len() {
            return Err(ProviderError::Api {
                status: 0,
                message: format!(
                    "embedder returned {} vectors for {} units",
                    embeddings.len(),
                    units.len()
                ),
            }
            .into());
        }

        let inputs: Vec<ClusterInput> = units
            .iter_mut()
            .zip(embeddings)
            .map(|(unit, embedding)| {
                unit.embedding = Some(embedding.clone());
                ClusterInput {
                    unit_id: unit.id,
                    summary: unit.summary.clone(),
                    embedding,
                }
            })
            .collect();

        ClusteringEngine::new(&self.llm, &self.ctx, ClusterSettings::from_config(&self.config))
            .cluster(ClusterScope::Episode(episode.to_string()), &inputs)
            .await
    }
}

async fn write_episode<T: GraphTransaction>(
    tx: &mut T,
    episode: &str,
    units: &[MeaningfulUnit],
    resolved: &ResolvedExtraction,
    clustering: Option<&ClusteringOutcome>,
) -> Result<()> {
    for unit in units {
        tx.upsert_meaningful_unit(unit).await?;
    }
    for entity in &resolved.entities {
        tx.upsert_entity(episode, entity, &entity.provenance).await?;
    }
    for quote in &resolved.quotes {
        tx.upsert_quote(quote, &[quote.unit_id]).await?;
    }
    for insight in &resolved.insights {
        tx.upsert_insight(insight, &[insight.unit_id]).await?;
    }
    for rel in &resolved.relationships {
        tx.upsert_relationship(rel, &rel.provenance).await?;
    }
    if let Some(outcome) = clustering {
        write_clusters(tx, outcome).await?;
    }
    Ok(())
}

async fn write_clusters<T: GraphTransaction>(tx: &mut T, outcome: &ClusteringOutcome) -> Result<()> {
    tx.replace_cluster_scope(&outcome.scope).await?;
    for cluster in &outcome.clusters {
        tx.upsert_cluster(cluster).await?;
    }
    for membership in &outcome.memberships {
        tx.upsert_membership(&outcome.scope, membership).await?;
    }
    Ok(())
}

async fn rollback<T: GraphTransaction>(tx: T, what: &str) {
    if let Err(e) = tx.rollback().await {
        warn!(target_scope = what, error = %e, "rollback failed");
    }
}
