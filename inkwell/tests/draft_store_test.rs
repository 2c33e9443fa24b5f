//! Draft store over SQLite, and draft auto-save wired through AppState.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use inkwell::actors::SaveNowOutcome;
use inkwell::app_state::AppState;
use inkwell::config::Config;
use inkwell::drafts::{DraftStore, SqliteBackend};
use inkwell::generation::{ChatBackend, GenerationError};
use shared_types::{ChatCompletionRequest, StoryDraft, SyncStatus};
use tokio_util::sync::CancellationToken;

struct OfflineBackend;

#[async_trait]
impl ChatBackend for OfflineBackend {
    async fn complete(
        &self,
        _request: &ChatCompletionRequest,
        _cancel: CancellationToken,
    ) -> Result<String, GenerationError> {
        Err(GenerationError::Transport {
            endpoint: "offline".to_string(),
            message: "no network in tests".to_string(),
        })
    }
}

fn draft(id: &str, content: &str) -> StoryDraft {
    StoryDraft {
        content: content.to_string(),
        ..StoryDraft::new(id, "Untitled")
    }
}

fn test_config() -> Config {
    Config {
        drafts_db: ":memory:".to_string(),
        max_retries: 1,
        autosave_delay: Duration::from_millis(500),
        autosave_interval: Duration::ZERO,
        ..Config::default()
    }
}

#[test]
fn drafts_survive_reopening_the_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("drafts.db");
    let path = path.to_str().unwrap();

    {
        let store = DraftStore::new(SqliteBackend::open(path).unwrap());
        store.save_draft("s1", draft("s1", "First line.")).unwrap();
        store.save_draft("s2", draft("s2", "Second story.")).unwrap();
        assert!(store.update_sync_status("draft_s2", SyncStatus::Synced));
    }

    let store = DraftStore::new(SqliteBackend::open(path).unwrap());
    let mut drafts: Vec<String> = store
        .get_all_drafts::<StoryDraft>()
        .into_iter()
        .map(|item| item.data.story_id)
        .collect();
    drafts.sort();
    assert_eq!(drafts, vec!["s1".to_string(), "s2".to_string()]);

    let pending = store.get_pending_items::<StoryDraft>();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].key, "draft_s1");
}

#[test]
fn conflicts_are_listed_separately() {
    let store = DraftStore::new(SqliteBackend::open(":memory:").unwrap());
    store.set_item("k1", 1, None).unwrap();
    store.set_item("k2", 2, None).unwrap();
    store.set_item("k3", 3, None).unwrap();
    assert!(store.update_sync_status("k3", SyncStatus::Conflict));

    let conflicts = store.get_conflict_items::<i32>();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].data, 3);
    assert_eq!(store.get_pending_items::<i32>().len(), 2);

    assert!(store.remove_item("k3"));
    assert!(store.get_conflict_items::<i32>().is_empty());
}

#[test]
fn sqlite_storage_reports_usage() {
    let store = DraftStore::new(SqliteBackend::open(":memory:").unwrap());
    store.save_draft("big", draft("big", &"word ".repeat(2_000))).unwrap();

    let availability = store.check_storage_availability();
    assert!(availability.available);
    assert!(availability.used_bytes >= 10_000);
    assert_eq!(
        availability.used_bytes + availability.remaining_bytes,
        availability.total_bytes
    );
}

#[tokio::test(start_paused = true)]
async fn app_state_autosaves_drafts_into_shared_store() {
    let app = AppState::new(
        test_config(),
        DraftStore::new(SqliteBackend::open(":memory:").unwrap()),
        Arc::new(OfflineBackend),
    );
    let autosave = app.spawn_draft_autosave(None).await.unwrap();

    autosave.notify_change(draft("tale", "Too short")).unwrap();
    tokio::time::sleep(Duration::from_millis(1_000)).await;
    assert!(app.drafts().get_draft::<StoryDraft>("tale").is_none());

    let text = "The ferry left without its captain.";
    autosave.notify_change(draft("tale", text)).unwrap();
    tokio::time::sleep(Duration::from_millis(1_000)).await;

    let saved = app.drafts().get_draft::<StoryDraft>("tale").unwrap();
    assert_eq!(saved.data.content, text);
    assert_eq!(saved.sync_status, SyncStatus::Pending);

    assert_eq!(autosave.save_now().await.unwrap(), SaveNowOutcome::Saved);
    autosave.stop();
}

#[tokio::test(start_paused = true)]
async fn reopening_a_synced_draft_does_not_mark_it_pending() {
    let app = AppState::new(
        test_config(),
        DraftStore::new(SqliteBackend::open(":memory:").unwrap()),
        Arc::new(OfflineBackend),
    );
    app.drafts()
        .save_draft("tale", draft("tale", "The ferry left without its captain."))
        .unwrap();
    assert!(app.drafts().update_sync_status("draft_tale", SyncStatus::Synced));
    let version = app.drafts().get_draft::<StoryDraft>("tale").unwrap().version;

    let loaded = app.drafts().get_draft::<StoryDraft>("tale").unwrap().data;
    let autosave = app.spawn_draft_autosave(Some(loaded.clone())).await.unwrap();
    autosave.notify_change(loaded).unwrap();
    tokio::time::sleep(Duration::from_millis(2_000)).await;

    let item = app.drafts().get_draft::<StoryDraft>("tale").unwrap();
    assert_eq!(item.sync_status, SyncStatus::Synced);
    assert_eq!(item.version, version);
    assert!(!autosave.status().await.unwrap().has_unsaved_changes);
    autosave.stop();
}

#[tokio::test]
async fn offline_assistant_still_answers() {
    let app = AppState::new(
        test_config(),
        DraftStore::in_memory(),
        Arc::new(OfflineBackend),
    );
    let generated = app.assistant().plot_prompt(Some("fantasy")).await;
    assert!(inkwell::resilience::is_valid_text(&generated.text));
}
