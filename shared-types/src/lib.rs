//! Shared types between the story backend and the browser frontend
//!
//! These types are used by both:
//! - the `inkwell` runtime (native Rust)
//! - the editor frontend (via generated TypeScript bindings)
//!
//! Serializable with serde for JSON in local storage and over HTTP

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ============================================================================
// Local Storage
// ============================================================================

/// Whether a locally stored record has been reconciled with a remote copy.
///
/// Nothing in this workspace moves a record from `Pending` to `Synced` on its
/// own; the status only changes through explicit updates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub enum SyncStatus {
    Synced,
    #[default]
    Pending,
    Conflict,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Synced => "synced",
            Self::Pending => "pending",
            Self::Conflict => "conflict",
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One keyed record in local storage. A write always replaces the whole record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocalStorageItem<T> {
    pub key: String,
    pub data: T,
    /// RFC 3339 timestamp of the last write
    pub timestamp: DateTime<Utc>,
    pub sync_status: SyncStatus,
    /// Timestamp-ordered token, distinct for every write in this process
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Result of probing local storage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS)]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub struct StorageAvailability {
    pub available: bool,
    pub used_bytes: u64,
    pub remaining_bytes: u64,
    pub total_bytes: u64,
}

/// Story text as the editor persists it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default, TS)]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub struct StoryDraft {
    pub story_id: String,
    pub title: String,
    pub content: String,
}

impl StoryDraft {
    pub fn new(story_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            story_id: story_id.into(),
            title: title.into(),
            content: String::new(),
        }
    }

    pub fn word_count(&self) -> usize {
        self.content.split_whitespace().count()
    }
}

// ============================================================================
// Generation
// ============================================================================

/// Content categories with canned fallback text.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, TS)]
#[serde(rename_all = "kebab-case")]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub enum FallbackCategory {
    CharacterDescription,
    Outline,
    Chapter,
    WritingSuggestion,
    AiAssistance,
    Feedback,
    AnalyzeConsistency,
    PlotPrompt,
    StoryContinuation,
}

impl FallbackCategory {
    /// Category used when a requested key has no fallback list.
    pub const DEFAULT: FallbackCategory = FallbackCategory::AiAssistance;

    pub const ALL: [FallbackCategory; 9] = [
        Self::CharacterDescription,
        Self::Outline,
        Self::Chapter,
        Self::WritingSuggestion,
        Self::AiAssistance,
        Self::Feedback,
        Self::AnalyzeConsistency,
        Self::PlotPrompt,
        Self::StoryContinuation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CharacterDescription => "character-description",
            Self::Outline => "outline",
            Self::Chapter => "chapter",
            Self::WritingSuggestion => "writing-suggestion",
            Self::AiAssistance => "ai-assistance",
            Self::Feedback => "feedback",
            Self::AnalyzeConsistency => "analyze-consistency",
            Self::PlotPrompt => "plot-prompt",
            Self::StoryContinuation => "story-continuation",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        let needle = input.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|category| category.as_str() == needle)
    }
}

impl std::fmt::Display for FallbackCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<str> for FallbackCategory {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Body of the outbound chat-completion POST.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub stream: bool,
}

impl ChatCompletionRequest {
    pub fn new(
        model: impl Into<String>,
        messages: Vec<ChatMessage>,
        temperature: f32,
        max_tokens: u32,
    ) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature,
            max_tokens,
            stream: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
}

impl ChatCompletionResponse {
    /// Text of the first choice, if the provider returned any.
    pub fn first_content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|choice| choice.message.content.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ChatChoice {
    #[serde(default)]
    pub message: ChatChoiceMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ChatChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

// ============================================================================
// Auto-Save
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub enum AutoSavePhase {
    #[default]
    Idle,
    PendingDebounce,
    Saving,
}

/// Content-free view of an auto-save scheduler, safe to ship to the UI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default, TS)]
#[ts(export, export_to = "../../bindings/generated.ts")]
pub struct AutoSaveStatus {
    pub phase: AutoSavePhase,
    pub is_saving: bool,
    pub last_saved: Option<DateTime<Utc>>,
    pub save_count: u64,
    pub pending_change_count: u32,
    pub has_unsaved_changes: bool,
}

// ============================================================================
// Key Conventions
// ============================================================================

/// Key prefix marking story drafts in local storage.
pub const DRAFT_KEY_PREFIX: &str = "draft_";

pub fn draft_key(story_id: &str) -> String {
    format!("{DRAFT_KEY_PREFIX}{story_id}")
}

// ============================================================================
// Tests
// ============================================================================
