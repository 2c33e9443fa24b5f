use std::sync::Arc;

use shared_types::StoryDraft;

use crate::actors::{AutoSaveError, AutoSaveHandle, DraftSaveTarget, SaveTarget};
use crate::config::Config;
use crate::drafts::{DraftStore, SqliteBackend, StorageError};
use crate::generation::{ChatBackend, ChatCompletionClient, GenerationError, StoryAssistant};
use crate::resilience::ResilientExecutor;

#[derive(Debug, thiserror::Error)]
pub enum AppStateError {
    #[error("failed to open draft storage: {0}")]
    Storage(#[from] StorageError),

    #[error("failed to build generation client: {0}")]
    Generation(#[from] GenerationError),
}

/// Process-wide services, built once and shared by cloning.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    drafts: Arc<DraftStore>,
    assistant: StoryAssistant,
}

impl AppState {
    /// Open the SQLite draft store and the HTTP generation client from `config`.
    pub fn from_config(config: Config) -> Result<Self, AppStateError> {
        let drafts = DraftStore::new(SqliteBackend::open(&config.drafts_db)?);
        let client = ChatCompletionClient::new(config.api_url.clone(), config.api_key.clone())?;
        Ok(Self::new(config, drafts, Arc::new(client)))
    }

    pub fn new(config: Config, drafts: DraftStore, backend: Arc<dyn ChatBackend>) -> Self {
        let executor = ResilientExecutor::new(config.retry_config());
        let assistant = StoryAssistant::new(backend, executor, config.generation_settings());
        Self {
            inner: Arc::new(AppStateInner {
                config,
                drafts: Arc::new(drafts),
                assistant,
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn drafts(&self) -> Arc<DraftStore> {
        self.inner.drafts.clone()
    }

    pub fn assistant(&self) -> &StoryAssistant {
        &self.inner.assistant
    }

    /// Start an auto-saver that writes story drafts into the shared store.
    /// `loaded` is the draft as currently stored, if any; it is not re-saved
    /// until it changes.
    pub async fn spawn_draft_autosave(
        &self,
        loaded: Option<StoryDraft>,
    ) -> Result<AutoSaveHandle<StoryDraft>, AutoSaveError> {
        let target: Arc<dyn SaveTarget<StoryDraft>> = Arc::new(DraftSaveTarget::new(self.drafts()));
        let options = self
            .inner
            .config
            .draft_autosave_options()
            .with_initial(loaded)
            .on_error(|err| {
                tracing::error!(error = %err, "Draft auto-save failed");
            });
        let (handle, _join) = AutoSaveHandle::spawn(target, options).await?;
        Ok(handle)
    }
}
