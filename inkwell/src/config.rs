use std::path::PathBuf;
use std::time::Duration;

use shared_types::StoryDraft;

use crate::actors::AutoSaveOptions;
use crate::generation::GenerationSettings;
use crate::resilience::{load_fallback_library, RetryConfig};

pub const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug, Clone)]
pub struct Config {
    /// Chat-completions endpoint.
    pub api_url: String,
    /// Bearer token. Requests go out unauthenticated when unset.
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Total attempts per generation call.
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub timeout: Duration,
    /// Explicit fallback library path. Otherwise looked up from the working
    /// directory upwards, then the built-in copy.
    pub fallbacks_path: Option<PathBuf>,
    pub autosave_delay: Duration,
    pub autosave_interval: Duration,
    pub autosave_min_changes: u32,
    /// Drafts shorter than this many characters are not auto-saved.
    pub autosave_min_length: usize,
    /// SQLite file for drafts, or `:memory:`.
    pub drafts_db: String,
}

impl Default for Config {
    fn default() -> Self {
        let generation = GenerationSettings::default();
        let retry = RetryConfig::default();
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_key: None,
            model: generation.model,
            temperature: generation.temperature,
            max_tokens: generation.max_tokens,
            max_retries: retry.max_retries,
            retry_delay: retry.retry_delay,
            timeout: retry.timeout,
            fallbacks_path: None,
            autosave_delay: Duration::from_millis(2_000),
            autosave_interval: Duration::from_millis(30_000),
            autosave_min_changes: 1,
            autosave_min_length: 10,
            drafts_db: "./data/drafts.db".to_string(),
        }
    }
}

impl Config {
    /// Build from the process environment. `.env` loading is the binary's job.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset keys take their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();
        let env = Env { lookup: &lookup };

        let temperature: f32 = env.parse("INKWELL_TEMPERATURE", defaults.temperature)?;
        if !(0.0..=2.0).contains(&temperature) {
            anyhow::bail!("INKWELL_TEMPERATURE must be between 0 and 2, got {temperature}");
        }

        Ok(Self {
            api_url: env.str("INKWELL_API_URL", &defaults.api_url),
            api_key: env.optional("INKWELL_API_KEY"),
            model: env.str("INKWELL_MODEL", &defaults.model),
            temperature,
            max_tokens: env.parse("INKWELL_MAX_TOKENS", defaults.max_tokens)?,
            max_retries: env.parse("INKWELL_MAX_RETRIES", defaults.max_retries)?,
            retry_delay: Duration::from_millis(env.parse("INKWELL_RETRY_DELAY_MS", 1_000)?),
            timeout: Duration::from_millis(env.parse("INKWELL_TIMEOUT_MS", 30_000)?),
            fallbacks_path: env.optional("INKWELL_FALLBACKS_PATH").map(PathBuf::from),
            autosave_delay: Duration::from_millis(env.parse("INKWELL_AUTOSAVE_DELAY_MS", 2_000)?),
            autosave_interval: Duration::from_millis(
                env.parse("INKWELL_AUTOSAVE_INTERVAL_MS", 30_000)?,
            ),
            autosave_min_changes: env
                .parse("INKWELL_AUTOSAVE_MIN_CHANGES", defaults.autosave_min_changes)?,
            autosave_min_length: env
                .parse("INKWELL_AUTOSAVE_MIN_LENGTH", defaults.autosave_min_length)?,
            drafts_db: env.str("INKWELL_DRAFTS_DB", &defaults.drafts_db),
        })
    }

    /// Retry settings, with the fallback library loaded from disk.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            retry_delay: self.retry_delay,
            timeout: self.timeout,
            fallback_responses: load_fallback_library(self.fallbacks_path.as_deref()),
            ..RetryConfig::default()
        }
    }

    pub fn generation_settings(&self) -> GenerationSettings {
        GenerationSettings {
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    /// Auto-save options for story drafts, skipping drafts below the minimum length.
    pub fn draft_autosave_options(&self) -> AutoSaveOptions<StoryDraft> {
        let min_length = self.autosave_min_length;
        AutoSaveOptions {
            save_delay: self.autosave_delay,
            interval: self.autosave_interval,
            min_changes: self.autosave_min_changes,
            ..AutoSaveOptions::default()
        }
        .with_predicate(move |draft: &StoryDraft| draft.content.trim().chars().count() >= min_length)
    }
}

struct Env<'a, F: Fn(&str) -> Option<String>> {
    lookup: &'a F,
}

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn str(&self, key: &str, default: &str) -> String {
        (self.lookup)(key).unwrap_or_else(|| default.to_string())
    }

    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|value| !value.trim().is_empty())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> anyhow::Result<T>
    where
        T::Err: std::fmt::Display,
    {
        match (self.lookup)(key) {
            Some(val) => val
                .trim()
                .parse::<T>()
                .map_err(|e| anyhow::anyhow!("Failed to parse env var {key}={val}: {e}")),
            None => Ok(default),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.api_key, None);
        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay, Duration::from_millis(1_000));
        assert_eq!(config.timeout, Duration::from_millis(30_000));
        assert_eq!(config.autosave_delay, Duration::from_millis(2_000));
        assert_eq!(config.autosave_interval, Duration::from_millis(30_000));
        assert_eq!(config.autosave_min_length, 10);
        assert_eq!(config.drafts_db, "./data/drafts.db");
    }

    #[test]
    fn overrides_are_parsed() {
        let config = Config::from_lookup(lookup(&[
            ("INKWELL_API_KEY", "sk-test"),
            ("INKWELL_MAX_RETRIES", "5"),
            ("INKWELL_RETRY_DELAY_MS", "250"),
            ("INKWELL_TEMPERATURE", "0.2"),
            ("INKWELL_DRAFTS_DB", ":memory:"),
        ]))
        .unwrap();
        assert_eq!(config.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.retry_config().retry_delay, Duration::from_millis(250));
        assert!((config.generation_settings().temperature - 0.2).abs() < f32::EPSILON);
        assert_eq!(config.drafts_db, ":memory:");
    }

    #[test]
    fn blank_api_key_counts_as_unset() {
        let config = Config::from_lookup(lookup(&[("INKWELL_API_KEY", "  ")])).unwrap();
        assert!(config.api_key.is_none());
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let err = Config::from_lookup(lookup(&[("INKWELL_MAX_RETRIES", "lots")])).unwrap_err();
        assert!(err.to_string().contains("INKWELL_MAX_RETRIES"));
    }

    #[test]
    fn out_of_range_temperature_is_rejected() {
        assert!(Config::from_lookup(lookup(&[("INKWELL_TEMPERATURE", "3.5")])).is_err());
    }

    #[test]
    fn draft_options_veto_short_drafts() {
        let config = Config::default();
        let options = config.draft_autosave_options();
        let predicate = options.predicate.expect("predicate set");

        let mut draft = StoryDraft::new("s", "t");
        draft.content = "too short".to_string();
        assert!(!predicate(&draft));
        draft.content = "long enough to keep".to_string();
        assert!(predicate(&draft));
    }
}
