use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who said it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Ai,
}

/// One entry in the conversation history; never mutated after creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: String,
    pub sender: Speaker,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationMessage {
    pub fn new(sender: Speaker, text: impl Into<String>) -> Self {
        Self {
            id: format!("msg-{}", uuid::Uuid::new_v4()),
            sender,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Speaker::User, text)
    }

    pub fn ai(text: impl Into<String>) -> Self {
        Self::new(Speaker::Ai, text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagSource {
    /// The user named the interest
    Mentioned,
    /// A trait read from how the user describes themselves
    Inferred,
}

/// An interest the companion picked up from conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanionTag {
    pub label: String,
    pub source: TagSource,
}

impl CompanionTag {
    pub fn mentioned(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            source: TagSource::Mentioned,
        }
    }

    pub fn inferred(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            source: TagSource::Inferred,
        }
    }
}

const TAG_KEYWORDS: &[(&[&str], &str, TagSource)] = &[
    (&["garden", "plant"], "Gardening", TagSource::Mentioned),
    (&["quiet", "peaceful"], "Quiet spaces", TagSource::Mentioned),
    (&["walk", "outdoor"], "Walking", TagSource::Mentioned),
    (&["knit", "craft"], "Crafts", TagSource::Mentioned),
    (&["shy", "introvert"], "Introvert", TagSource::Inferred),
];

/// Interest tags mentioned in a user utterance
pub fn detect_tags(text: &str) -> Vec<CompanionTag> {
    let lower = text.to_lowercase();
    TAG_KEYWORDS
        .iter()
        .filter(|(keywords, _, _)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(_, label, source)| CompanionTag {
            label: label.to_string(),
            source: *source,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_multiple_tags_in_order() {
        let tags = detect_tags("I love my Garden and a quiet walk");
        let labels: Vec<_> = tags.iter().map(|t| t.label.as_str()).collect();
        assert_eq!(labels, vec!["Gardening", "Quiet spaces", "Walking"]);
        assert!(tags.iter().all(|t| t.source == TagSource::Mentioned));
    }

    #[test]
    fn personality_tags_are_inferred() {
        let tags = detect_tags("I'm a bit shy but I like crafts");
        assert_eq!(
            tags,
            vec![CompanionTag::mentioned("Crafts"), CompanionTag::inferred("Introvert")]
        );
    }

    #[test]
    fn no_tags_for_small_talk() {
        assert!(detect_tags("hello, how are you").is_empty());
    }

    #[test]
    fn message_ids_are_unique() {
        let a = ConversationMessage::user("hi");
        let b = ConversationMessage::user("hi");
        assert_ne!(a.id, b.id);
        assert_eq!(a.sender, Speaker::User);
    }

    #[test]
    fn speaker_serializes_lowercase() {
        let json = serde_json::to_string(&ConversationMessage::ai("hello")).unwrap();
        assert!(json.contains("\"sender\":\"ai\""));
    }
}
