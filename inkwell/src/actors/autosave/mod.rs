//! AutoSaveActor - debounced and periodic persistence of editor content.
//!
//! One actor per edited document. Every change is pushed in with
//! [`AutoSaveHandle::notify_change`]; the actor decides when to write through
//! its [`SaveTarget`]:
//!
//! - after `save_delay` of quiet, once at least `min_changes` edits piled up
//! - every `interval`, whenever the content differs from the last save
//! - on [`AutoSaveHandle::save_now`]
//!
//! Saves run in their own task and report back, so the actor keeps answering
//! while a write is in flight and never starts a second one concurrently.

mod messages;
mod state;
mod target;

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use ractor::concurrency::JoinHandle as ActorJoinHandle;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use shared_types::AutoSaveStatus;
use tokio::task::JoinHandle;

pub use messages::{AutoSaveError, AutoSaveMsg, PersistenceError, SaveNowOutcome};
pub use state::{
    AutoSaveContent, AutoSaveMachine, ChangeOutcome, SavePredicate, SaveRequest, SaveSettled,
    SaveTrigger,
};
pub use target::{DraftSaveTarget, SaveTarget};

pub const DEFAULT_SAVE_DELAY: Duration = Duration::from_millis(2_000);
pub const DEFAULT_SAVE_INTERVAL: Duration = Duration::from_millis(30_000);
pub const DEFAULT_MIN_CHANGES: u32 = 1;

pub type SavedCallback<T> = Arc<dyn Fn(&T) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&PersistenceError) + Send + Sync>;

pub struct AutoSaveOptions<T> {
    /// Quiet period after the last change before a debounced save.
    pub save_delay: Duration,
    /// Period of the unconditional dirty check. Zero disables it.
    pub interval: Duration,
    pub min_changes: u32,
    /// Content already persisted when the scheduler attaches.
    pub initial: Option<T>,
    pub predicate: Option<SavePredicate<T>>,
    pub on_saved: Option<SavedCallback<T>>,
    pub on_error: Option<ErrorCallback>,
}

impl<T> Default for AutoSaveOptions<T> {
    fn default() -> Self {
        Self {
            save_delay: DEFAULT_SAVE_DELAY,
            interval: DEFAULT_SAVE_INTERVAL,
            min_changes: DEFAULT_MIN_CHANGES,
            initial: None,
            predicate: None,
            on_saved: None,
            on_error: None,
        }
    }
}

impl<T> std::fmt::Debug for AutoSaveOptions<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoSaveOptions")
            .field("save_delay", &self.save_delay)
            .field("interval", &self.interval)
            .field("min_changes", &self.min_changes)
            .field("initial", &self.initial.is_some())
            .field("predicate", &self.predicate.is_some())
            .field("on_saved", &self.on_saved.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

impl<T> AutoSaveOptions<T> {
    pub fn with_initial(mut self, initial: Option<T>) -> Self {
        self.initial = initial;
        self
    }

    pub fn with_predicate(mut self, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    pub fn on_saved(mut self, callback: impl Fn(&T) + Send + Sync + 'static) -> Self {
        self.on_saved = Some(Arc::new(callback));
        self
    }

    pub fn on_error(
        mut self,
        callback: impl Fn(&PersistenceError) + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }
}

pub struct AutoSaveArguments<T> {
    pub target: Arc<dyn SaveTarget<T>>,
    pub options: AutoSaveOptions<T>,
}

pub struct AutoSaveActorState<T> {
    machine: AutoSaveMachine<T>,
    target: Arc<dyn SaveTarget<T>>,
    save_delay: Duration,
    on_saved: Option<SavedCallback<T>>,
    on_error: Option<ErrorCallback>,
    debounce_task: Option<JoinHandle<()>>,
    ticker: Option<JoinHandle<()>>,
    /// Caller of an in-flight `SaveNow`, keyed by save ticket.
    pending_reply: Option<(u64, RpcReplyPort<SaveNowOutcome>)>,
}

pub struct AutoSaveActor<T>(PhantomData<fn() -> T>);

impl<T> Default for AutoSaveActor<T> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

#[async_trait]
impl<T: AutoSaveContent> Actor for AutoSaveActor<T> {
    type Msg = AutoSaveMsg<T>;
    type State = AutoSaveActorState<T>;
    type Arguments = AutoSaveArguments<T>;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let AutoSaveArguments { target, options } = args;

        let ticker = if options.interval.is_zero() {
            None
        } else {
            let period = options.interval;
            let tick_ref = myself.clone();
            Some(tokio::spawn(async move {
                let mut ticker =
                    tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    if tick_ref.cast(AutoSaveMsg::IntervalTick).is_err() {
                        break;
                    }
                }
            }))
        };

        tracing::debug!(
            save_delay_ms = options.save_delay.as_millis() as u64,
            interval_ms = options.interval.as_millis() as u64,
            min_changes = options.min_changes,
            "Auto-save started"
        );

        let mut machine = AutoSaveMachine::new(options.min_changes, options.predicate);
        if let Some(initial) = options.initial {
            machine.seed_baseline(initial);
        }

        Ok(AutoSaveActorState {
            machine,
            target,
            save_delay: options.save_delay,
            on_saved: options.on_saved,
            on_error: options.on_error,
            debounce_task: None,
            ticker,
            pending_reply: None,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            AutoSaveMsg::ContentChanged(content) => match state.machine.content_changed(content) {
                ChangeOutcome::ArmDebounce { generation } => {
                    Self::arm_debounce(&myself, state, generation);
                }
                ChangeOutcome::Unchanged => {
                    if let Some(task) = state.debounce_task.take() {
                        task.abort();
                    }
                }
            },
            AutoSaveMsg::SaveNow { reply } => match state.machine.save_now() {
                Ok(request) => {
                    state.pending_reply = Some((request.ticket, reply));
                    Self::spawn_save(&myself, state, request);
                }
                Err(outcome) => {
                    let _ = reply.send(outcome);
                }
            },
            AutoSaveMsg::GetStatus { reply } => {
                let _ = reply.send(state.machine.status());
            }
            AutoSaveMsg::GetSavedContent { reply } => {
                let _ = reply.send(state.machine.saved_content().cloned());
            }
            AutoSaveMsg::DebounceElapsed { generation } => {
                if let Some(request) = state.machine.debounce_elapsed(generation) {
                    Self::spawn_save(&myself, state, request);
                }
            }
            AutoSaveMsg::IntervalTick => {
                if let Some(request) = state.machine.interval_tick() {
                    Self::spawn_save(&myself, state, request);
                }
            }
            AutoSaveMsg::SaveFinished { ticket, result } => {
                Self::settle(state, ticket, result);
            }
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if let Some(task) = state.debounce_task.take() {
            task.abort();
        }
        if let Some(task) = state.ticker.take() {
            task.abort();
        }
        if state.machine.has_unsaved_changes() {
            tracing::warn!(
                pending_changes = state.machine.status().pending_change_count,
                "Auto-save stopped with unsaved changes"
            );
        }
        Ok(())
    }
}

impl<T: AutoSaveContent> AutoSaveActor<T> {
    fn arm_debounce(myself: &ActorRef<AutoSaveMsg<T>>, state: &mut AutoSaveActorState<T>, generation: u64) {
        if let Some(task) = state.debounce_task.take() {
            task.abort();
        }
        let delay = state.save_delay;
        let debounce_ref = myself.clone();
        state.debounce_task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = debounce_ref.cast(AutoSaveMsg::DebounceElapsed { generation });
        }));
    }

    fn spawn_save(
        myself: &ActorRef<AutoSaveMsg<T>>,
        state: &AutoSaveActorState<T>,
        request: SaveRequest<T>,
    ) {
        tracing::debug!(
            ticket = request.ticket,
            trigger = request.trigger.as_str(),
            "Auto-save starting"
        );
        let target = state.target.clone();
        let save_ref = myself.clone();
        tokio::spawn(async move {
            let result = target.save(&request.content).await;
            let _ = save_ref.cast(AutoSaveMsg::SaveFinished {
                ticket: request.ticket,
                result,
            });
        });
    }

    fn settle(
        state: &mut AutoSaveActorState<T>,
        ticket: u64,
        result: Result<(), PersistenceError>,
    ) {
        let reply = match state.pending_reply.take() {
            Some((reply_ticket, reply)) if reply_ticket == ticket => Some(reply),
            other => {
                state.pending_reply = other;
                None
            }
        };

        let machine_result = result.as_ref().map(|_| ()).map_err(ToString::to_string);
        let outcome = match state.machine.finish_save(ticket, machine_result, Utc::now()) {
            Some(SaveSettled::Saved { trigger, content }) => {
                tracing::info!(
                    trigger = trigger.as_str(),
                    save_count = state.machine.status().save_count,
                    "Auto-save completed"
                );
                if let Some(callback) = &state.on_saved {
                    callback(&content);
                }
                SaveNowOutcome::Saved
            }
            Some(SaveSettled::Failed { trigger, error }) => {
                tracing::warn!(trigger = trigger.as_str(), error = %error, "Auto-save failed");
                if let (Some(callback), Err(err)) = (&state.on_error, &result) {
                    callback(err);
                }
                SaveNowOutcome::Failed(error)
            }
            None => {
                tracing::debug!(ticket, "Ignoring result for unknown auto-save ticket");
                return;
            }
        };

        if let Some(reply) = reply {
            let _ = reply.send(outcome);
        }
    }
}

/// Cloneable front end to a running [`AutoSaveActor`].
pub struct AutoSaveHandle<T: AutoSaveContent> {
    actor: ActorRef<AutoSaveMsg<T>>,
}

impl<T: AutoSaveContent> Clone for AutoSaveHandle<T> {
    fn clone(&self) -> Self {
        Self {
            actor: self.actor.clone(),
        }
    }
}

impl<T: AutoSaveContent> AutoSaveHandle<T> {
    pub async fn spawn(
        target: Arc<dyn SaveTarget<T>>,
        options: AutoSaveOptions<T>,
    ) -> Result<(Self, ActorJoinHandle<()>), AutoSaveError> {
        let (actor, join) = Actor::spawn(
            None,
            AutoSaveActor::<T>::default(),
            AutoSaveArguments { target, options },
        )
        .await
        .map_err(|e| AutoSaveError::Spawn(e.to_string()))?;
        Ok((Self { actor }, join))
    }

    pub fn actor(&self) -> &ActorRef<AutoSaveMsg<T>> {
        &self.actor
    }

    pub fn notify_change(&self, content: T) -> Result<(), AutoSaveError> {
        self.actor
            .cast(AutoSaveMsg::ContentChanged(content))
            .map_err(|e| AutoSaveError::Rpc(e.to_string()))
    }

    /// Save the latest content now and wait for the write to settle.
    pub async fn save_now(&self) -> Result<SaveNowOutcome, AutoSaveError> {
        ractor::call!(self.actor, |reply| AutoSaveMsg::SaveNow { reply })
            .map_err(|e| AutoSaveError::Rpc(e.to_string()))
    }

    pub async fn status(&self) -> Result<AutoSaveStatus, AutoSaveError> {
        ractor::call!(self.actor, |reply| AutoSaveMsg::GetStatus { reply })
            .map_err(|e| AutoSaveError::Rpc(e.to_string()))
    }

    pub async fn saved_content(&self) -> Result<Option<T>, AutoSaveError> {
        ractor::call!(self.actor, |reply| AutoSaveMsg::GetSavedContent { reply })
            .map_err(|e| AutoSaveError::Rpc(e.to_string()))
    }

    /// Stop timers and the actor. Unsaved changes are not flushed.
    pub fn stop(&self) {
        self.actor.stop(None);
    }
}
