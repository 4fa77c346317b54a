//! Text companion: the assistant seam and the offline template assistant

use crate::error::{Result, VoiceError};
use crate::session::{detect_tags, CompanionTag, ConversationMessage};
use crate::store::{AppStore, MemoryEntry, MemoryKind, UserProfile};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Shown to the user whenever a reply cannot be produced
pub const FALLBACK_REPLY: &str =
    "I'm having a little trouble right now, but I'm still here with you. Let's try again in a moment.";

/// What the assistant knows about the person it is talking to
#[derive(Debug, Clone, Default)]
pub struct AssistantContext {
    pub user_profile: Option<UserProfile>,
    pub memories: Vec<MemoryEntry>,
}

impl AssistantContext {
    pub fn from_store(store: &AppStore) -> Self {
        Self {
            user_profile: store.profile().cloned(),
            memories: store.memories().to_vec(),
        }
    }

    fn display_name(&self) -> &str {
        self.user_profile
            .as_ref()
            .map(|p| p.display_name())
            .filter(|name| !name.trim().is_empty())
            .unwrap_or("there")
    }
}

#[async_trait::async_trait]
pub trait Assistant: Send + Sync {
    /// Produce a reply; failures surface as `VoiceError::AssistantCall`
    async fn respond(&self, prompt: &str, context: Option<&AssistantContext>) -> Result<String>;
}

/// System prompt describing the person, for model-backed assistants
pub fn build_grounding_prompt(profile: Option<&UserProfile>, memories: &[MemoryEntry]) -> String {
    let mut facts = Vec::new();
    if let Some(profile) = profile {
        if !profile.name.is_empty() {
            facts.push(format!("Their name is {}.", profile.name));
        }
        if let Some(preferred) = &profile.preferred_name {
            facts.push(format!("They like to be called {}.", preferred));
        }
        if let Some(city) = &profile.city {
            facts.push(format!("They live in {}.", city));
        }
        if let Some(country) = &profile.country {
            facts.push(format!("They are in {}.", country));
        }
    }
    let facts = if facts.is_empty() {
        "Not much is known about this person yet.".to_string()
    } else {
        facts.join(" ")
    };

    let people: Vec<String> = memories
        .iter()
        .filter(|m| matches!(m.kind, MemoryKind::Person | MemoryKind::Fact))
        .take(5)
        .map(|m| format!("- {}: {}", m.title, m.description.as_deref().unwrap_or("")))
        .collect();
    let people = if people.is_empty() {
        "No memories have been saved yet.".to_string()
    } else {
        people.join("\n")
    };

    format!(
        "You are a calm and reassuring companion for an older adult.\n\
         \n\
         Speak in short, simple sentences. Help them feel safe and gently \
         orient them in place and time. Use their name when you know it.\n\
         \n\
         Known facts:\n{}\n\
         \n\
         Important people and facts:\n{}\n\
         \n\
         Never make medical claims. Do not talk about technology unless asked. \
         Keep replies brief and warm.",
        facts, people
    )
}

/// Keyword-driven replies that work without any model behind them
#[derive(Debug, Default)]
pub struct TemplateAssistant {
    turn: AtomicUsize,
}

impl TemplateAssistant {
    pub fn new() -> Self {
        Self::default()
    }

    fn reply(&self, prompt: &str, context: &AssistantContext, now: DateTime<Utc>) -> String {
        let text = prompt.to_lowercase();
        let has = |words: &[&str]| words.iter().any(|w| text.contains(w));
        let name = context.display_name();

        if has(&["confused", "where am i", "what day"]) {
            let place = context
                .user_profile
                .as_ref()
                .and_then(|p| p.city.as_deref())
                .unwrap_or("your home");
            return format!(
                "It's alright, {}. You are safe in {}. Today is {}, {}. Let's take a slow breath together. I'm right here.",
                name,
                place,
                now.format("%A"),
                now.format("%B %-d, %Y")
            );
        }

        if has(&["remind", "memory", "remember"]) {
            let people: Vec<&str> = context
                .memories
                .iter()
                .filter(|m| m.kind == MemoryKind::Person)
                .take(2)
                .map(|m| m.title.as_str())
                .collect();
            return match people.len() {
                0 => format!(
                    "I can help you hold on to the things that matter, {}. What would you like me to remember?",
                    name
                ),
                1 => format!(
                    "I'll keep that safe for you, {}. {} matters a lot to you, and I won't forget.",
                    name, people[0]
                ),
                _ => format!(
                    "I'll keep that safe for you, {}. {} matter a lot to you, and I won't forget.",
                    name,
                    people.join(" and ")
                ),
            };
        }

        if has(&["activity", "event", "community"]) {
            return format!(
                "Let's find something nice for you to do today, {}. Would you like something calm and quiet, or something a little more social?",
                name
            );
        }

        if has(&["circle"]) {
            return "I'd be glad to help you find a Circle that suits you. From what you've told me, a gentle and creative group might feel right. Shall I suggest one?".to_string();
        }
        if has(&["garden"]) {
            return "A garden is such a calming place to spend time. Is there a plant or a season you love most?".to_string();
        }
        if has(&["walk"]) {
            return "A morning walk can do a lot of good. Is there a path or a place you especially like?".to_string();
        }
        if has(&["lonely", "alone"]) {
            return "I hear you, and that feeling is okay. You aren't on your own here. I'm listening, and there are friendly groups ready to welcome you whenever you like.".to_string();
        }
        if has(&["story"]) {
            return "I would love to hear it. Take all the time you need. What's on your mind?".to_string();
        }

        let general = [
            format!("I'm listening, {}. Tell me a little more?", name),
            format!("That sounds like it matters to you, {}. How does it make you feel?", name),
            format!("You're not alone, {}. I'm here with you.", name),
            format!("Thank you for telling me, {}. What else is on your mind today?", name),
        ];
        let index = self.turn.fetch_add(1, Ordering::Relaxed) % general.len();
        general[index].clone()
    }
}

#[async_trait::async_trait]
impl Assistant for TemplateAssistant {
    async fn respond(&self, prompt: &str, context: Option<&AssistantContext>) -> Result<String> {
        let empty = AssistantContext::default();
        let context = context.unwrap_or(&empty);
        Ok(self.reply(prompt, context, Utc::now()))
    }
}

/// Outcome of one text companion exchange
#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub user: ConversationMessage,
    pub reply: ConversationMessage,
    /// Tags newly added to the store by this exchange
    pub new_tags: Vec<CompanionTag>,
    /// Set when the assistant failed and the fallback reply was used
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Record the user's message, ask the assistant and record its reply
///
/// An assistant failure still produces a reply (the fallback text); the
/// history keeps both sides of the attempt.
pub async fn chat(
    assistant: &dyn Assistant,
    store: &RwLock<AppStore>,
    text: &str,
) -> Result<ChatReply> {
    let user = ConversationMessage::user(text);
    let tags = detect_tags(text);

    let (context, new_tags) = {
        let mut store = store.write().await;
        store.add_companion_message(user.clone()).await?;
        let added = store.add_companion_tags(&tags).await?;
        let new_tags = if added > 0 { tags } else { Vec::new() };
        (AssistantContext::from_store(&store), new_tags)
    };

    let (reply_text, error) = match assistant.respond(text, Some(&context)).await {
        Ok(reply) => (reply, None),
        Err(e) => {
            warn!("Assistant call failed: {}", e);
            let e = match e {
                VoiceError::AssistantCall(_) => e,
                other => VoiceError::AssistantCall(other.to_string()),
            };
            (FALLBACK_REPLY.to_string(), Some(e.to_string()))
        }
    };

    let reply = ConversationMessage::ai(reply_text);
    store
        .write()
        .await
        .add_companion_message(reply.clone())
        .await?;
    info!("Companion exchange recorded ({} new tags)", new_tags.len());

    Ok(ChatReply {
        user,
        reply,
        new_tags,
        error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn context_with(city: Option<&str>, people: &[&str]) -> AssistantContext {
        AssistantContext {
            user_profile: Some(UserProfile {
                name: "Aino".to_string(),
                city: city.map(str::to_string),
                ..Default::default()
            }),
            memories: people
                .iter()
                .map(|p| MemoryEntry {
                    id: p.to_string(),
                    kind: MemoryKind::Person,
                    title: p.to_string(),
                    description: None,
                    tags: Vec::new(),
                    created_at: Utc::now(),
                })
                .collect(),
        }
    }

    #[test]
    fn grounding_reply_names_place_and_date() {
        let assistant = TemplateAssistant::new();
        let now = Utc.with_ymd_and_hms(2024, 1, 18, 10, 0, 0).unwrap();
        let reply = assistant.reply("I feel confused", &context_with(Some("Espoo"), &[]), now);
        assert!(reply.contains("Aino"));
        assert!(reply.contains("Espoo"));
        assert!(reply.contains("Thursday, January 18, 2024"));
    }

    #[test]
    fn memory_reply_mentions_people() {
        let assistant = TemplateAssistant::new();
        let reply = assistant.reply(
            "Can you remind me?",
            &context_with(None, &["Maria", "Jussi", "Leena"]),
            Utc::now(),
        );
        assert!(reply.contains("Maria and Jussi matter"));
        assert!(!reply.contains("Leena"));
    }

    #[test]
    fn general_replies_rotate() {
        let assistant = TemplateAssistant::new();
        let ctx = AssistantContext::default();
        let first = assistant.reply("hmm", &ctx, Utc::now());
        let second = assistant.reply("hmm", &ctx, Utc::now());
        assert_ne!(first, second);
        assert!(first.contains("there"));
    }

    #[test]
    fn grounding_prompt_limits_memories() {
        let memories: Vec<MemoryEntry> = (0..8)
            .map(|i| MemoryEntry {
                id: i.to_string(),
                kind: if i % 2 == 0 { MemoryKind::Person } else { MemoryKind::Event },
                title: format!("m{}", i),
                description: None,
                tags: Vec::new(),
                created_at: Utc::now(),
            })
            .collect();
        let prompt = build_grounding_prompt(None, &memories);
        assert!(prompt.contains("Not much is known"));
        assert!(prompt.contains("- m0"));
        assert!(!prompt.contains("- m1"));
        assert_eq!(prompt.matches("\n- ").count(), 4);
    }
}
