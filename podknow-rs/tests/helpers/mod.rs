//! Shared fakes for the integration tests: a scripted model, a deterministic
//! embedder and a fault-injecting graph driver.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use podknow_rs::driver::memory::{InMemoryGraph, MemoryTransaction};
use podknow_rs::driver::{GraphDriver, GraphTransaction};
use podknow_rs::edges::{Membership, ResolvedRelationship};
use podknow_rs::embedder::{EmbedderClient, Embedding};
use podknow_rs::errors::{PodknowError, ProviderError, Result};
use podknow_rs::llm_client::{LlmClient, Message};
use podknow_rs::nodes::{CanonicalEntity, Cluster, ClusterScope, Insight, MeaningfulUnit, Quote, UnitId};
use podknow_rs::pipeline::{PipelineContext, PipelineOrchestrator, RateLimiter, StructureCache};
use podknow_rs::transcript::{EpisodeInput, TranscriptSegment};
use podknow_rs::types::{PipelineConfig, ScopeMode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

// ---------------------------------------------------------------------------
// Scripted model
// ---------------------------------------------------------------------------

/// Answers by response type. Extraction answers are chosen by a marker
/// string found in the unit transcript (surrounding-unit context is ignored).
#[derive(Default)]
pub struct ScriptedLlm {
    pub analysis: Mutex<Value>,
    /// Errors returned by the next analysis calls, in order.
    pub analysis_errors: Mutex<VecDeque<ProviderError>>,
    pub extractions: Mutex<Vec<(String, Value)>>,
    /// Units whose transcript contains this marker always fail extraction.
    pub failing_marker: Mutex<Option<String>>,
    /// Extraction of a unit whose transcript contains the marker sleeps first.
    pub delays: Mutex<Vec<(String, Duration)>>,
    /// Unit ordinals in the order their extraction calls returned.
    pub finished_units: Mutex<Vec<usize>>,
    pub in_flight: AtomicUsize,
    pub peak_in_flight: AtomicUsize,
    pub analyze_calls: AtomicUsize,
    pub extract_calls: AtomicUsize,
    pub label_calls: AtomicUsize,
}

impl ScriptedLlm {
    pub fn new(analysis: Value) -> Self {
        Self {
            analysis: Mutex::new(analysis),
            ..Default::default()
        }
    }

    pub fn with_extraction(self, marker: &str, payload: Value) -> Self {
        self.extractions
            .lock()
            .unwrap()
            .push((marker.to_string(), payload));
        self
    }

    pub fn failing_analysis(self, errors: impl IntoIterator<Item = ProviderError>) -> Self {
        self.analysis_errors.lock().unwrap().extend(errors);
        self
    }

    pub fn failing_extraction(self, marker: &str) -> Self {
        *self.failing_marker.lock().unwrap() = Some(marker.to_string());
        self
    }

    pub fn delaying(self, marker: &str, delay: Duration) -> Self {
        self.delays.lock().unwrap().push((marker.to_string(), delay));
        self
    }

    fn delay_for(&self, transcript: &str) -> Option<Duration> {
        self.delays
            .lock()
            .unwrap()
            .iter()
            .find(|(marker, _)| transcript.contains(marker.as_str()))
            .map(|(_, delay)| *delay)
    }

    /// Holds an in-flight slot across a suspension point so overlapping
    /// calls are visible in `peak_in_flight`.
    async fn occupy(&self, prompt: &str) {
        let transcript = prompt
            .split_once("UNIT TRANSCRIPT:")
            .map_or(prompt, |(_, transcript)| transcript);
        let delay = self.delay_for(transcript);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        match delay {
            Some(delay) => tokio::time::sleep(delay).await,
            None => tokio::task::yield_now().await,
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let ordinal = prompt
            .strip_prefix("UNIT ")
            .and_then(|rest| rest.split_once(' '))
            .and_then(|(n, _)| n.parse().ok());
        if let Some(ordinal) = ordinal {
            self.finished_units.lock().unwrap().push(ordinal);
        }
    }

    fn answer_extraction(&self, prompt: &str) -> Result<Value> {
        self.extract_calls.fetch_add(1, Ordering::SeqCst);
        let prompt = prompt
            .split_once("UNIT TRANSCRIPT:")
            .map_or(prompt, |(_, transcript)| transcript);
        if let Some(marker) = self.failing_marker.lock().unwrap().as_deref() {
            if prompt.contains(marker) {
                return Err(ProviderError::Transport("connection reset".into()).into());
            }
        }
        let scripted = self.extractions.lock().unwrap();
        Ok(scripted
            .iter()
            .find(|(marker, _)| prompt.contains(marker.as_str()))
            .map(|(_, payload)| payload.clone())
            .unwrap_or_else(|| json!({})))
    }
}

impl LlmClient for ScriptedLlm {
    async fn generate_structured<T>(&self, messages: &[Message]) -> Result<T>
    where
        T: DeserializeOwned + schemars::JsonSchema,
    {
        let prompt = messages.last().map(|m| m.content.as_str()).unwrap_or_default();
        let kind = std::any::type_name::<T>();

        let value = if kind.ends_with("StructureResponse") {
            self.analyze_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = self.analysis_errors.lock().unwrap().pop_front() {
                return Err(err.into());
            }
            self.analysis.lock().unwrap().clone()
        } else if kind.ends_with("ExtractionPayload") {
            self.occupy(prompt).await;
            self.answer_extraction(prompt)?
        } else if kind.ends_with("ClusterLabelResponse") {
            self.label_calls.fetch_add(1, Ordering::SeqCst);
            // Named after the summary nearest the centroid, so reruns agree.
            let nearest = prompt
                .lines()
                .find_map(|line| line.strip_prefix("1. "))
                .unwrap_or("misc");
            json!({ "label": format!("Topic: {nearest}") })
        } else {
            return Err(PodknowError::Validation(format!("unscripted response type {kind}")));
        };

        Ok(serde_json::from_value(value)?)
    }
}

// ---------------------------------------------------------------------------
// Deterministic embedder
// ---------------------------------------------------------------------------

/// Folds the bytes of the text into a fixed-size vector.
pub struct HashEmbedder {
    pub dim: usize,
    pub calls: AtomicUsize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            calls: AtomicUsize::new(0),
        }
    }

    fn vector(&self, text: &str) -> Embedding {
        let mut v = vec![0.01f32; self.dim];
        for (i, b) in text.bytes().enumerate() {
            v[i % self.dim] += f32::from(b) / 255.0;
        }
        v
    }
}

impl EmbedderClient for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.vector(text))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

/// Places texts mentioning `ALPHA` and `BETA` on two orthogonal axes, each
/// point nudged by its position within its group.
pub struct AxisEmbedder;

impl AxisEmbedder {
    const DIM: usize = 8;
}

impl EmbedderClient for AxisEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        Ok(self.embed_batch(&[text]).await?.remove(0))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        let mut seen = [0usize; 2];
        Ok(texts
            .iter()
            .map(|text| {
                let group = usize::from(text.contains("BETA"));
                let i = seen[group];
                seen[group] += 1;
                let mut v = vec![0.0f32; Self::DIM];
                v[group] = 10.0;
                v[2 + 2 * group] = (i % 3) as f32 * 0.5;
                v[3 + 2 * group] = (i / 3) as f32 * 0.5;
                v
            })
            .collect())
    }

    fn dim(&self) -> usize {
        Self::DIM
    }
}

// ---------------------------------------------------------------------------
// Fault-injecting graph driver
// ---------------------------------------------------------------------------

/// Wraps [`InMemoryGraph`]; the named transaction operation fails.
#[derive(Clone, Default)]
pub struct FaultyGraph {
    pub graph: InMemoryGraph,
    pub fail_on: Option<&'static str>,
    pub rollbacks: Arc<AtomicUsize>,
}

impl FaultyGraph {
    pub fn failing_on(operation: &'static str) -> Self {
        Self {
            fail_on: Some(operation),
            ..Default::default()
        }
    }
}

pub struct FaultyTransaction {
    inner: MemoryTransaction,
    fail_on: Option<&'static str>,
    rollbacks: Arc<AtomicUsize>,
}

impl FaultyTransaction {
    fn check(&self, operation: &str) -> Result<()> {
        if self.fail_on == Some(operation) {
            return Err(PodknowError::Storage(format!("injected failure in {operation}")));
        }
        Ok(())
    }
}

impl GraphDriver for FaultyGraph {
    type Transaction = FaultyTransaction;

    async fn begin(&self) -> Result<FaultyTransaction> {
        Ok(FaultyTransaction {
            inner: self.graph.begin().await?,
            fail_on: self.fail_on,
            rollbacks: self.rollbacks.clone(),
        })
    }
}

impl GraphTransaction for FaultyTransaction {
    async fn upsert_meaningful_unit(&mut self, unit: &MeaningfulUnit) -> Result<()> {
        self.check("upsert_meaningful_unit")?;
        self.inner.upsert_meaningful_unit(unit).await
    }

    async fn upsert_entity(
        &mut self,
        episode_id: &str,
        entity: &CanonicalEntity,
        provenance: &[UnitId],
    ) -> Result<()> {
        self.check("upsert_entity")?;
        self.inner.upsert_entity(episode_id, entity, provenance).await
    }

    async fn upsert_quote(&mut self, quote: &Quote, provenance: &[UnitId]) -> Result<()> {
        self.check("upsert_quote")?;
        self.inner.upsert_quote(quote, provenance).await
    }

    async fn upsert_insight(&mut self, insight: &Insight, provenance: &[UnitId]) -> Result<()> {
        self.check("upsert_insight")?;
        self.inner.upsert_insight(insight, provenance).await
    }

    async fn upsert_relationship(
        &mut self,
        relationship: &ResolvedRelationship,
        provenance: &[UnitId],
    ) -> Result<()> {
        self.check("upsert_relationship")?;
        self.inner.upsert_relationship(relationship, provenance).await
    }

    async fn replace_cluster_scope(&mut self, scope: &ClusterScope) -> Result<()> {
        self.check("replace_cluster_scope")?;
        self.inner.replace_cluster_scope(scope).await
    }

    async fn upsert_cluster(&mut self, cluster: &Cluster) -> Result<()> {
        self.check("upsert_cluster")?;
        self.inner.upsert_cluster(cluster).await
    }

    async fn upsert_membership(&mut self, scope: &ClusterScope, membership: &Membership) -> Result<()> {
        self.check("upsert_membership")?;
        self.inner.upsert_membership(scope, membership).await
    }

    async fn commit(self) -> Result<()> {
        self.check("commit")?;
        self.inner.commit().await
    }

    async fn rollback(self) -> Result<()> {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        self.inner.rollback().await
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Fast, unthrottled settings; per-episode clustering off unless asked for.
pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        retry_backoff_ms: 1,
        cluster_scope: ScopeMode::Corpus,
        ..PipelineConfig::default()
    }
}

pub fn test_context(config: &PipelineConfig) -> PipelineContext {
    PipelineContext::new(
        StructureCache::new(config.cache_capacity, config.cache_ttl()),
        Arc::new(RateLimiter::unlimited()),
        Duration::from_millis(config.retry_backoff_ms),
    )
}

pub fn orchestrator(
    llm: ScriptedLlm,
    driver: FaultyGraph,
    config: PipelineConfig,
) -> PipelineOrchestrator<ScriptedLlm, HashEmbedder, FaultyGraph> {
    let ctx = test_context(&config);
    PipelineOrchestrator::new(llm, HashEmbedder::new(8), driver, ctx, config)
}

/// Ten alternating Host/Guest segments of 10 s each. Segment `i` says
/// `"line {i}"` followed by `extra[i]` when given.
pub fn episode(id: &str, extra: &[(usize, &str)]) -> EpisodeInput {
    let segments = (0..10)
        .map(|i| {
            let speaker = if i % 2 == 0 { "Host" } else { "Guest" };
            let tail = extra
                .iter()
                .find(|(at, _)| *at == i)
                .map(|(_, text)| format!(" {text}"))
                .unwrap_or_default();
            TranscriptSegment::new(
                speaker,
                i as f64 * 10.0,
                i as f64 * 10.0 + 10.0,
                format!("{id} line {i}{tail}"),
            )
        })
        .collect();
    EpisodeInput {
        episode_id: id.to_string(),
        segments,
    }
}

/// Every segment opens its own unit.
pub fn one_unit_per_segment_analysis() -> Value {
    let boundaries: Vec<Value> = (1..10)
        .map(|position| json!({"position": position, "boundary_type": "topic_shift", "confidence": 0.9}))
        .collect();
    json!({
        "boundaries": boundaries,
        "themes": [],
        "unit_hints": [],
        "narrative_flow": "Two alternating threads.",
        "quality_observations": [],
        "opens_mid_thought": false,
        "closes_mid_thought": false
    })
}

/// Structure with topic shifts before segments 3 and 7.
pub fn three_unit_analysis() -> Value {
    json!({
        "boundaries": [
            {"position": 3, "boundary_type": "topic_shift", "confidence": 0.9},
            {"position": 7, "boundary_type": "topic_shift", "confidence": 0.8}
        ],
        "themes": [{"label": "AI labs", "segment_indices": [1, 8]}],
        "unit_hints": [],
        "narrative_flow": "Intro, discussion, wrap-up.",
        "quality_observations": [],
        "opens_mid_thought": false,
        "closes_mid_thought": false
    })
}
