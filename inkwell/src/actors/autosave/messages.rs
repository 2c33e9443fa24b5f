//! Auto-save actor messages and error types.

use ractor::RpcReplyPort;
use shared_types::AutoSaveStatus;

use crate::drafts::DraftStoreError;

#[derive(Debug)]
pub enum AutoSaveMsg<T> {
    /// Latest editor content. Cheap to send on every keystroke.
    ContentChanged(T),
    /// Save immediately, bypassing both timers. Replies once the save settles.
    SaveNow { reply: RpcReplyPort<SaveNowOutcome> },
    GetStatus { reply: RpcReplyPort<AutoSaveStatus> },
    GetSavedContent { reply: RpcReplyPort<Option<T>> },
    /// Internal: debounce timer for `generation` fired.
    DebounceElapsed { generation: u64 },
    /// Internal: periodic save check.
    IntervalTick,
    /// Internal: a spawned save task finished.
    SaveFinished {
        ticket: u64,
        result: Result<(), PersistenceError>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveNowOutcome {
    Saved,
    Failed(String),
    /// Another save was already in flight.
    Skipped,
    /// The save predicate rejected the current content.
    Vetoed,
    NothingToSave,
}

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("draft store error: {0}")]
    DraftStore(#[from] DraftStoreError),

    #[error("save failed: {0}")]
    Failed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum AutoSaveError {
    #[error("failed to spawn auto-save actor: {0}")]
    Spawn(String),

    #[error("auto-save actor unreachable: {0}")]
    Rpc(String),
}
