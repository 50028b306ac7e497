//! # podknow-rs
//!
//! Semantic pipeline that turns timestamped conversation transcripts
//! (podcasts, interviews, panels) into a knowledge graph.
//!
//! ## Architecture
//!
//! - **Structure-aware grouping**: a model pass finds where the conversation
//!   changes topic; segments are regrouped into meaningful units there
//! - **Per-unit extraction**: entities, quotes, insights and relationships,
//!   validated record by record
//! - **Deterministic resolution**: mentions fold into canonical entities with
//!   stable ids
//! - **Density-based clustering**: HDBSCAN over unit embeddings with
//!   model-generated topic labels
//! - **Atomic storage**: every episode is written in one graph transaction

pub mod edges;
pub mod errors;
pub mod nodes;
pub mod transcript;
pub mod types;

pub mod driver;
pub mod embedder;
pub mod llm_client;

pub mod clustering;
pub mod prompts;

pub mod pipeline;
pub mod utils;

pub use errors::{PodknowError, ProviderError, Result};
pub use pipeline::{BatchReport, EpisodeFailure, EpisodeJob, EpisodeReport, PipelineOrchestrator};
pub use transcript::{EpisodeInput, TranscriptSegment};
pub use types::{PipelineConfig, ProviderConfig, ScopeMode};
