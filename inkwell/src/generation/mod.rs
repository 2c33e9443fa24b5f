//! Story generation service.
//!
//! [`StoryAssistant`] turns writing requests into chat-completion calls and
//! routes every call through the [`ResilientExecutor`]: retries and timeouts
//! first, then validation, then canned fallback text. Its methods never fail.

mod client;
mod overlap;

use std::sync::Arc;

use shared_types::{ChatCompletionRequest, ChatMessage, FallbackCategory};

use crate::resilience::ResilientExecutor;

pub use client::{ChatBackend, ChatCompletionClient, GenerationError};
pub use overlap::trim_repeated_overlap;

/// Characters of story context sent with continuation and analysis requests.
const MAX_CONTEXT_CHARS: usize = 6_000;

const STORYTELLER_ROLE: &str =
    "You are a creative writing partner for interactive fiction. Reply with story text only.";

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.8,
            max_tokens: 1024,
        }
    }
}

/// Generated text tagged with the category it was requested for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generated {
    pub category: FallbackCategory,
    pub text: String,
}

#[derive(Clone)]
pub struct StoryAssistant {
    backend: Arc<dyn ChatBackend>,
    executor: ResilientExecutor,
    settings: GenerationSettings,
}

impl StoryAssistant {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        executor: ResilientExecutor,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            backend,
            executor,
            settings,
        }
    }

    pub fn executor(&self) -> &ResilientExecutor {
        &self.executor
    }

    pub fn settings(&self) -> &GenerationSettings {
        &self.settings
    }

    /// Opening premise for a new story.
    pub async fn plot_prompt(&self, genre: Option<&str>) -> Generated {
        let ask = match genre.map(str::trim).filter(|g| !g.is_empty()) {
            Some(genre) => format!("Give me one original {genre} story premise in two sentences."),
            None => "Give me one original story premise in two sentences.".to_string(),
        };
        self.generate(
            FallbackCategory::PlotPrompt,
            vec![ChatMessage::system(STORYTELLER_ROLE), ChatMessage::user(ask)],
        )
        .await
    }

    /// Next passage of `story`, with any repeated tail of the story removed.
    pub async fn continue_story(&self, story: &str, direction: Option<&str>) -> Generated {
        let context = tail_chars(story, MAX_CONTEXT_CHARS);
        let mut messages = vec![
            ChatMessage::system(STORYTELLER_ROLE),
            ChatMessage::user(format!(
                "Continue this story from exactly where it stops. Do not repeat it.\n\n{context}"
            )),
        ];
        if let Some(direction) = direction.map(str::trim).filter(|d| !d.is_empty()) {
            messages.push(ChatMessage::user(format!("Direction for the next passage: {direction}")));
        }

        self.generate_shaped(FallbackCategory::StoryContinuation, messages, |text| {
            trim_repeated_overlap(story, &text)
        })
        .await
    }

    pub async fn character_description(&self, name: &str, traits: &[String]) -> Generated {
        let traits = if traits.is_empty() {
            "none given".to_string()
        } else {
            traits.join(", ")
        };
        self.generate(
            FallbackCategory::CharacterDescription,
            vec![
                ChatMessage::system(STORYTELLER_ROLE),
                ChatMessage::user(format!(
                    "Describe the character {name} in one paragraph. Traits: {traits}."
                )),
            ],
        )
        .await
    }

    pub async fn outline(&self, premise: &str, chapters: u32) -> Generated {
        self.generate(
            FallbackCategory::Outline,
            vec![
                ChatMessage::system(STORYTELLER_ROLE),
                ChatMessage::user(format!(
                    "Write a numbered {} chapter outline for this premise:\n\n{premise}",
                    chapters.max(1)
                )),
            ],
        )
        .await
    }

    pub async fn chapter(&self, outline: &str, chapter_title: &str) -> Generated {
        self.generate(
            FallbackCategory::Chapter,
            vec![
                ChatMessage::system(STORYTELLER_ROLE),
                ChatMessage::user(format!(
                    "Outline:\n{}\n\nWrite the chapter titled \"{chapter_title}\".",
                    tail_chars(outline, MAX_CONTEXT_CHARS)
                )),
            ],
        )
        .await
    }

    pub async fn writing_suggestion(&self, passage: &str) -> Generated {
        self.generate(
            FallbackCategory::WritingSuggestion,
            vec![
                ChatMessage::system("You are a concise writing coach."),
                ChatMessage::user(format!(
                    "Suggest one concrete improvement for this passage:\n\n{}",
                    tail_chars(passage, MAX_CONTEXT_CHARS)
                )),
            ],
        )
        .await
    }

    pub async fn feedback(&self, story: &str) -> Generated {
        self.generate(
            FallbackCategory::Feedback,
            vec![
                ChatMessage::system("You are a supportive but honest editor."),
                ChatMessage::user(format!(
                    "Give brief feedback on this story:\n\n{}",
                    tail_chars(story, MAX_CONTEXT_CHARS)
                )),
            ],
        )
        .await
    }

    pub async fn analyze_consistency(&self, story: &str, characters: &[String]) -> Generated {
        let cast = if characters.is_empty() {
            String::new()
        } else {
            format!("\n\nCharacters: {}", characters.join(", "))
        };
        self.generate(
            FallbackCategory::AnalyzeConsistency,
            vec![
                ChatMessage::system("You are a continuity editor."),
                ChatMessage::user(format!(
                    "List continuity problems in this story.{cast}\n\n{}",
                    tail_chars(story, MAX_CONTEXT_CHARS)
                )),
            ],
        )
        .await
    }

    /// Free-form question about the user's writing.
    pub async fn assist(&self, question: &str) -> Generated {
        self.generate(
            FallbackCategory::AiAssistance,
            vec![
                ChatMessage::system("You are a helpful assistant for fiction writers."),
                ChatMessage::user(question.to_string()),
            ],
        )
        .await
    }

    async fn generate(&self, category: FallbackCategory, messages: Vec<ChatMessage>) -> Generated {
        self.generate_shaped(category, messages, |text| text).await
    }

    /// `shape` rewrites each live reply before it is validated.
    async fn generate_shaped<S>(
        &self,
        category: FallbackCategory,
        messages: Vec<ChatMessage>,
        shape: S,
    ) -> Generated
    where
        S: Fn(String) -> String + Sync,
    {
        let request = ChatCompletionRequest::new(
            self.settings.model.clone(),
            messages,
            self.settings.temperature,
            self.settings.max_tokens,
        );
        let backend = &self.backend;
        let request = &request;
        let shape = &shape;

        let raw = self
            .executor
            .execute_with_fallback(category.as_str(), |ctx| async move {
                backend.complete(request, ctx.cancel).await.map(shape)
            })
            .await;
        let text = self
            .executor
            .sanitize_text_or_fallback(raw, category.as_str());

        Generated { category, text }
    }
}

/// Last `max` characters of `text`, on a char boundary.
fn tail_chars(text: &str, max: usize) -> &str {
    let count = text.chars().count();
    if count <= max {
        return text;
    }
    let skip = count - max;
    let start = text
        .char_indices()
        .nth(skip)
        .map(|(index, _)| index)
        .unwrap_or(0);
    &text[start..]
}
