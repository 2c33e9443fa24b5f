//! Canned content served when live generation is unavailable.

use serde::{Deserialize, Serialize};
use shared_types::FallbackCategory;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_FALLBACKS_PATH: &str = "inkwell/config/fallbacks.toml";
const BUILTIN_FALLBACKS_TOML: &str = include_str!("../../config/fallbacks.toml");

/// Returned when neither the requested nor the default category has content.
pub const UNAVAILABLE_SENTINEL: &str =
    "Unable to generate content right now. Please try again later.";

/// Source of uniform indices for fallback selection.
pub trait RandomSource: Send + Sync {
    /// Index in `0..len`. Never called with `len == 0`.
    fn pick_index(&self, len: usize) -> usize;
}

/// Thread-local RNG backed source used outside of tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn pick_index(&self, len: usize) -> usize {
        use rand::Rng;
        rand::rng().random_range(0..len)
    }
}

/// Category → ordered canned responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackLibrary {
    #[serde(default)]
    categories: BTreeMap<String, Vec<String>>,
}

impl FallbackLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Library compiled into the binary.
    pub fn builtin() -> Self {
        toml::from_str(BUILTIN_FALLBACKS_TOML).unwrap_or_else(|err| {
            tracing::error!(error = %err, "Failed to parse built-in fallback library");
            Self::default()
        })
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    pub fn with_category(
        mut self,
        category: impl Into<String>,
        responses: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.insert(category, responses);
        self
    }

    pub fn insert(
        &mut self,
        category: impl Into<String>,
        responses: impl IntoIterator<Item = impl Into<String>>,
    ) {
        self.categories.insert(
            category.into(),
            responses.into_iter().map(Into::into).collect(),
        );
    }

    pub fn responses(&self, category: &str) -> Option<&[String]> {
        self.categories.get(category).map(Vec::as_slice)
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.categories.keys().map(String::as_str)
    }

    /// Known categories whose list is empty or missing.
    pub fn missing_categories(&self) -> Vec<FallbackCategory> {
        FallbackCategory::ALL
            .into_iter()
            .filter(|category| {
                self.responses(category.as_str())
                    .map(|list| list.is_empty())
                    .unwrap_or(true)
            })
            .collect()
    }

    /// Pick one canned response for `category`.
    ///
    /// Unknown or empty categories use [`FallbackCategory::DEFAULT`]; an
    /// empty default list yields [`UNAVAILABLE_SENTINEL`].
    pub fn pick(&self, category: &str, rng: &dyn RandomSource) -> String {
        let list = match self.categories.get(category) {
            Some(list) if !list.is_empty() => list.as_slice(),
            _ => {
                tracing::debug!(category, "No fallback list for category; using default");
                self.responses(FallbackCategory::DEFAULT.as_str())
                    .unwrap_or_default()
            }
        };
        if list.is_empty() {
            return UNAVAILABLE_SENTINEL.to_string();
        }
        let index = rng.pick_index(list.len()).min(list.len() - 1);
        list[index].clone()
    }
}

/// Load the fallback library from `INKWELL_FALLBACKS_PATH`, the default
/// config path, or the built-in copy, in that order.
pub fn load_fallback_library(explicit_path: Option<&Path>) -> FallbackLibrary {
    let path = explicit_path
        .map(Path::to_path_buf)
        .or_else(|| find_default_config_path(DEFAULT_FALLBACKS_PATH));
    let Some(path) = path else {
        return FallbackLibrary::builtin();
    };

    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "Failed to load fallback library file; using built-in defaults"
            );
            return FallbackLibrary::builtin();
        }
    };
    let library = FallbackLibrary::from_toml_str(&content).unwrap_or_else(|err| {
        tracing::warn!(
            path = %path.display(),
            error = %err,
            "Failed to parse fallback library TOML; using built-in defaults"
        );
        FallbackLibrary::builtin()
    });

    let missing = library.missing_categories();
    if !missing.is_empty() {
        tracing::warn!(
            path = %path.display(),
            missing = ?missing,
            "Fallback library has empty categories; they will use the default list"
        );
    }
    library
}

fn find_default_config_path(relative_path: &str) -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;
    loop {
        let candidate = current.join(relative_path);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !current.pop() {
            return None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(usize);

    impl RandomSource for Fixed {
        fn pick_index(&self, _len: usize) -> usize {
            self.0
        }
    }

    #[test]
    fn builtin_covers_every_category() {
        let library = FallbackLibrary::builtin();
        assert!(library.missing_categories().is_empty());
    }

    #[test]
    fn picks_by_injected_index() {
        let library = FallbackLibrary::new().with_category("outline", ["first", "second", "third"]);
        assert_eq!(library.pick("outline", &Fixed(1)), "second");
        assert_eq!(library.pick("outline", &Fixed(0)), "first");
    }

    #[test]
    fn unknown_category_uses_default_list() {
        let library = FallbackLibrary::new()
            .with_category("ai-assistance", ["keep writing"])
            .with_category("outline", ["an outline"]);
        assert_eq!(library.pick("limerick", &Fixed(0)), "keep writing");
    }

    #[test]
    fn empty_category_uses_default_list() {
        let library = FallbackLibrary::new()
            .with_category("outline", Vec::<String>::new())
            .with_category("ai-assistance", ["default text"]);
        assert_eq!(library.pick("outline", &Fixed(0)), "default text");
    }

    #[test]
    fn empty_default_yields_sentinel() {
        let library = FallbackLibrary::new().with_category("ai-assistance", Vec::<String>::new());
        assert_eq!(library.pick("limerick", &Fixed(0)), UNAVAILABLE_SENTINEL);
        assert_eq!(FallbackLibrary::new().pick("outline", &Fixed(0)), UNAVAILABLE_SENTINEL);
    }

    #[test]
    fn out_of_range_index_is_clamped() {
        let library = FallbackLibrary::new().with_category("chapter", ["a", "b"]);
        assert_eq!(library.pick("chapter", &Fixed(7)), "b");
    }

    #[test]
    fn thread_random_stays_in_range() {
        let library = FallbackLibrary::builtin();
        let list = library.responses("plot-prompt").unwrap().to_vec();
        for _ in 0..50 {
            let picked = library.pick("plot-prompt", &ThreadRandom);
            assert!(list.contains(&picked));
        }
    }

    #[test]
    fn parses_toml_override() {
        let library = FallbackLibrary::from_toml_str(
            r#"
            [categories]
            feedback = ["Nice pacing."]
            "#,
        )
        .unwrap();
        assert_eq!(library.responses("feedback"), Some(&["Nice pacing.".to_string()][..]));
        assert_eq!(library.missing_categories().len(), FallbackCategory::ALL.len() - 1);
    }

    #[test]
    fn missing_file_falls_back_to_builtin() {
        let library = load_fallback_library(Some(Path::new("/nonexistent/fallbacks.toml")));
        assert_eq!(library, FallbackLibrary::builtin());
    }
}
