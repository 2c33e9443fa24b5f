pub mod autosave;

pub use autosave::{
    AutoSaveActor, AutoSaveError, AutoSaveHandle, AutoSaveMsg, AutoSaveOptions, DraftSaveTarget,
    PersistenceError, SaveNowOutcome, SaveTarget,
};
