//! Where auto-saved content goes.

use std::sync::Arc;

use async_trait::async_trait;
use shared_types::StoryDraft;

use super::messages::PersistenceError;
use crate::drafts::DraftStore;

#[async_trait]
pub trait SaveTarget<T>: Send + Sync {
    async fn save(&self, content: &T) -> Result<(), PersistenceError>;
}

/// Persists story drafts into the local draft store under `draft_<story_id>`.
#[derive(Debug, Clone)]
pub struct DraftSaveTarget {
    store: Arc<DraftStore>,
}

impl DraftSaveTarget {
    pub fn new(store: Arc<DraftStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SaveTarget<StoryDraft> for DraftSaveTarget {
    async fn save(&self, content: &StoryDraft) -> Result<(), PersistenceError> {
        let item = self.store.save_draft(&content.story_id, content)?;
        tracing::debug!(
            key = %item.key,
            version = %item.version,
            words = content.word_count(),
            "Draft saved"
        );
        Ok(())
    }
}
