//! MeaningfulUnit: a semantically coherent run of transcript segments.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a [`MeaningfulUnit`], stable within its episode.
pub type UnitId = Uuid;

/// Closed set of unit kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitType {
    #[default]
    TopicDiscussion,
    Introduction,
    Conclusion,
    Story,
    QAndA,
    Debate,
    Explanation,
    Advertisement,
    Tangent,
    Other,
}

impl UnitType {
    /// Map a free-form model label onto the closed set. Unrecognised labels
    /// become [`UnitType::Other`].
    pub fn parse_lenient(raw: &str) -> Self {
        match crate::utils::to_upper_snake(raw).as_str() {
            "TOPIC_DISCUSSION" | "DISCUSSION" | "TOPIC" => UnitType::TopicDiscussion,
            "INTRODUCTION" | "INTRO" | "OPENING" => UnitType::Introduction,
            "CONCLUSION" | "OUTRO" | "CLOSING" | "WRAP_UP" => UnitType::Conclusion,
            "STORY" | "ANECDOTE" | "STORYTELLING" => UnitType::Story,
            "Q_AND_A" | "Q_A" | "QA" | "QUESTION_ANSWER" | "INTERVIEW" => UnitType::QAndA,
            "DEBATE" | "DISAGREEMENT" | "ARGUMENT" => UnitType::Debate,
            "EXPLANATION" | "TUTORIAL" | "DEEP_DIVE" => UnitType::Explanation,
            "ADVERTISEMENT" | "AD" | "SPONSOR" | "SPONSOR_READ" => UnitType::Advertisement,
            "TANGENT" | "DIGRESSION" => UnitType::Tangent,
            _ => UnitType::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UnitType::TopicDiscussion => "topic_discussion",
            UnitType::Introduction => "introduction",
            UnitType::Conclusion => "conclusion",
            UnitType::Story => "story",
            UnitType::QAndA => "q_and_a",
            UnitType::Debate => "debate",
            UnitType::Explanation => "explanation",
            UnitType::Advertisement => "advertisement",
            UnitType::Tangent => "tangent",
            UnitType::Other => "other",
        }
    }
}

/// A group of contiguous transcript segments treated as one unit of meaning.
///
/// Holds indices into the episode's immutable segment list, never the
/// segments themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeaningfulUnit {
    pub id: UnitId,
    pub episode_id: String,
    /// Position of the unit within its episode, starting at 0.
    pub ordinal: usize,
    /// Ascending, contiguous segment indices.
    pub segment_indices: Vec<usize>,
    pub unit_type: UnitType,
    pub summary: String,
    pub themes: Vec<String>,
    /// Seconds.
    pub start: f64,
    /// Seconds.
    pub end: f64,
    /// Speaker → percentage of speaking time; values sum to 100.0.
    pub speaker_distribution: BTreeMap<String, f64>,
    pub is_complete: bool,
    pub embedding: Option<Vec<f32>>,
}

impl MeaningfulUnit {
    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }

    /// Speaker with the largest share, ties broken by name.
    pub fn dominant_speaker(&self) -> Option<&str> {
        self.speaker_distribution
            .iter()
            .fold(None::<(&String, f64)>, |best, (k, v)| match best {
                Some((_, bv)) if bv >= *v => best,
                _ => Some((k, *v)),
            })
            .map(|(k, _)| k.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_type_defaults_to_topic_discussion() {
        assert_eq!(UnitType::default(), UnitType::TopicDiscussion);
        assert_eq!(UnitType::default().as_str(), "topic_discussion");
    }

    #[test]
    fn unit_type_parses_model_labels() {
        assert_eq!(UnitType::parse_lenient("Intro"), UnitType::Introduction);
        assert_eq!(UnitType::parse_lenient("sponsor read"), UnitType::Advertisement);
        assert_eq!(UnitType::parse_lenient("Q&A"), UnitType::QAndA);
        assert_eq!(UnitType::parse_lenient("cooking segment"), UnitType::Other);
    }

    #[test]
    fn unit_type_serializes_snake_case() {
        let json = serde_json::to_string(&UnitType::QAndA).unwrap();
        assert_eq!(json, "\"q_and_a\"");
    }

    #[test]
    fn dominant_speaker_breaks_ties_by_name() {
        let unit = MeaningfulUnit {
            id: Uuid::nil(),
            episode_id: "ep".into(),
            ordinal: 0,
            segment_indices: vec![0, 1],
            unit_type: UnitType::TopicDiscussion,
            summary: String::new(),
            themes: vec![],
            start: 0.0,
            end: 10.0,
            speaker_distribution: BTreeMap::from([
                ("Bea".to_string(), 50.0),
                ("Al".to_string(), 50.0),
            ]),
            is_complete: true,
            embedding: None,
        };
        assert_eq!(unit.dominant_speaker(), Some("Al"));
    }
}
