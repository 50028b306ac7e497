//! Cluster labelling prompt.

use schemars::JsonSchema;
use serde::Deserialize;

use crate::llm_client::Message;

const SYSTEM: &str = "You name topic clusters. Given summaries of conversation \
units that belong to one cluster, answer with a short, specific topic label of \
two to six words. Answer strictly in the requested JSON format.";

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ClusterLabelResponse {
    /// Two to six word topic label.
    pub label: String,
}

/// Build the label request from the summaries of the members nearest the
/// centroid, nearest first.
pub fn messages(summaries: &[&str]) -> Vec<Message> {
    let listing = summaries
        .iter()
        .enumerate()
        .map(|(i, s)| format!("{}. {}", i + 1, s))
        .collect::<Vec<_>>()
        .join("\n");

    vec![
        Message::system(SYSTEM),
        Message::user(format!("UNIT SUMMARIES:\n{listing}\n\nLabel this cluster.")),
    ]
}
