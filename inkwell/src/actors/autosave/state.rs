//! Auto-save state machine.
//!
//! Pure bookkeeping with no timers and no I/O. The actor owns the clocks and
//! feeds events in; the machine answers with what to do next.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use shared_types::{AutoSavePhase, AutoSaveStatus};

use super::messages::SaveNowOutcome;

/// Content the scheduler can track.
pub trait AutoSaveContent: Serialize + Clone + Send + Sync + 'static {}

impl<T> AutoSaveContent for T where T: Serialize + Clone + Send + Sync + 'static {}

/// Returns `false` to veto a save about to start.
pub type SavePredicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveTrigger {
    Debounce,
    Interval,
    Manual,
}

impl SaveTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            SaveTrigger::Debounce => "debounce",
            SaveTrigger::Interval => "interval",
            SaveTrigger::Manual => "manual",
        }
    }
}

/// A save the machine has committed to. The caller must report back with
/// [`AutoSaveMachine::finish_save`] using the same ticket.
#[derive(Debug, Clone)]
pub struct SaveRequest<T> {
    pub ticket: u64,
    pub trigger: SaveTrigger,
    pub content: T,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeOutcome {
    /// Content matches the last saved snapshot.
    Unchanged,
    /// (Re)start the debounce timer for this generation.
    ArmDebounce { generation: u64 },
}

#[derive(Debug, Clone)]
pub enum SaveSettled<T> {
    Saved { trigger: SaveTrigger, content: T },
    Failed { trigger: SaveTrigger, error: String },
}

#[derive(Debug, Clone)]
struct InFlight<T> {
    ticket: u64,
    trigger: SaveTrigger,
    signature: String,
    content: T,
    changes_at_start: u32,
}

pub struct AutoSaveMachine<T> {
    min_changes: u32,
    predicate: Option<SavePredicate<T>>,

    current: Option<(T, String)>,
    saved_content: Option<T>,
    saved_signature: Option<String>,
    last_saved: Option<DateTime<Utc>>,
    save_count: u64,
    pending_change_count: u32,

    debounce_generation: u64,
    debounce_armed: bool,
    next_ticket: u64,
    in_flight: Option<InFlight<T>>,
}

impl<T: std::fmt::Debug> std::fmt::Debug for AutoSaveMachine<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoSaveMachine")
            .field("min_changes", &self.min_changes)
            .field("has_predicate", &self.predicate.is_some())
            .field("save_count", &self.save_count)
            .field("pending_change_count", &self.pending_change_count)
            .field("debounce_generation", &self.debounce_generation)
            .field("debounce_armed", &self.debounce_armed)
            .field("saving", &self.in_flight.is_some())
            .finish_non_exhaustive()
    }
}

impl<T: AutoSaveContent> AutoSaveMachine<T> {
    pub fn new(min_changes: u32, predicate: Option<SavePredicate<T>>) -> Self {
        Self {
            min_changes,
            predicate,
            current: None,
            saved_content: None,
            saved_signature: None,
            last_saved: None,
            save_count: 0,
            pending_change_count: 0,
            debounce_generation: 0,
            debounce_armed: false,
            next_ticket: 0,
            in_flight: None,
        }
    }

    /// Treat `content` as already persisted, e.g. a draft just loaded from
    /// storage. Does not count as a save.
    pub fn seed_baseline(&mut self, content: T) {
        match serde_json::to_string(&content) {
            Ok(signature) => {
                self.saved_signature = Some(signature.clone());
                self.saved_content = Some(content.clone());
                self.current = Some((content, signature));
            }
            Err(err) => {
                tracing::warn!(error = %err, "Auto-save could not serialize baseline; starting empty");
            }
        }
    }

    /// Record new content. Content identical to the last saved snapshot is not
    /// counted; it disarms any pending debounce and clears the change counter.
    pub fn content_changed(&mut self, content: T) -> ChangeOutcome {
        let signature = match serde_json::to_string(&content) {
            Ok(signature) => signature,
            Err(err) => {
                tracing::warn!(error = %err, "Auto-save could not serialize content; change ignored");
                return ChangeOutcome::Unchanged;
            }
        };

        let matches_saved = self.saved_signature.as_deref() == Some(signature.as_str());
        self.current = Some((content, signature));

        if matches_saved {
            self.debounce_armed = false;
            if self.in_flight.is_none() {
                self.pending_change_count = 0;
            }
            return ChangeOutcome::Unchanged;
        }

        self.pending_change_count = self.pending_change_count.saturating_add(1);
        self.debounce_generation += 1;
        self.debounce_armed = true;
        ChangeOutcome::ArmDebounce {
            generation: self.debounce_generation,
        }
    }

    /// Debounce timer fired. Stale generations are ignored.
    pub fn debounce_elapsed(&mut self, generation: u64) -> Option<SaveRequest<T>> {
        if !self.debounce_armed || generation != self.debounce_generation {
            return None;
        }
        self.debounce_armed = false;

        if self.in_flight.is_some() {
            tracing::debug!("Debounced save skipped; a save is already in flight");
            return None;
        }
        if self.pending_change_count < self.min_changes {
            return None;
        }
        self.begin_save(SaveTrigger::Debounce).ok()
    }

    pub fn interval_tick(&mut self) -> Option<SaveRequest<T>> {
        if self.in_flight.is_some() || !self.has_unsaved_changes() {
            return None;
        }
        self.begin_save(SaveTrigger::Interval).ok()
    }

    /// Forced save. Skips both timers but never overlaps a save in flight.
    pub fn save_now(&mut self) -> Result<SaveRequest<T>, SaveNowOutcome> {
        if self.in_flight.is_some() {
            return Err(SaveNowOutcome::Skipped);
        }
        self.begin_save(SaveTrigger::Manual)
    }

    /// Settle the save identified by `ticket`. Unknown tickets return `None`.
    pub fn finish_save(
        &mut self,
        ticket: u64,
        result: Result<(), String>,
        now: DateTime<Utc>,
    ) -> Option<SaveSettled<T>> {
        if self.in_flight.as_ref().map(|f| f.ticket) != Some(ticket) {
            return None;
        }
        let flight = self.in_flight.take()?;

        match result {
            Ok(()) => {
                self.saved_signature = Some(flight.signature);
                self.saved_content = Some(flight.content.clone());
                self.last_saved = Some(now);
                self.save_count += 1;
                self.pending_change_count = self
                    .pending_change_count
                    .saturating_sub(flight.changes_at_start);
                if !self.has_unsaved_changes() {
                    self.debounce_armed = false;
                }
                Some(SaveSettled::Saved {
                    trigger: flight.trigger,
                    content: flight.content,
                })
            }
            Err(error) => Some(SaveSettled::Failed {
                trigger: flight.trigger,
                error,
            }),
        }
    }

    pub fn is_saving(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn has_unsaved_changes(&self) -> bool {
        match &self.current {
            Some((_, signature)) => self.saved_signature.as_deref() != Some(signature.as_str()),
            None => false,
        }
    }

    pub fn saved_content(&self) -> Option<&T> {
        self.saved_content.as_ref()
    }

    pub fn phase(&self) -> AutoSavePhase {
        if self.in_flight.is_some() {
            AutoSavePhase::Saving
        } else if self.debounce_armed {
            AutoSavePhase::PendingDebounce
        } else {
            AutoSavePhase::Idle
        }
    }

    pub fn status(&self) -> AutoSaveStatus {
        AutoSaveStatus {
            phase: self.phase(),
            is_saving: self.is_saving(),
            last_saved: self.last_saved,
            save_count: self.save_count,
            pending_change_count: self.pending_change_count,
            has_unsaved_changes: self.has_unsaved_changes(),
        }
    }

    fn begin_save(&mut self, trigger: SaveTrigger) -> Result<SaveRequest<T>, SaveNowOutcome> {
        let Some((content, signature)) = self.current.clone() else {
            return Err(SaveNowOutcome::NothingToSave);
        };
        if let Some(predicate) = &self.predicate {
            if !predicate(&content) {
                tracing::debug!(trigger = trigger.as_str(), "Auto-save vetoed by predicate");
                return Err(SaveNowOutcome::Vetoed);
            }
        }

        self.next_ticket += 1;
        let ticket = self.next_ticket;
        self.in_flight = Some(InFlight {
            ticket,
            trigger,
            signature,
            content: content.clone(),
            changes_at_start: self.pending_change_count,
        });
        Ok(SaveRequest {
            ticket,
            trigger,
            content,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> AutoSaveMachine<String> {
        AutoSaveMachine::new(1, None)
    }

    fn armed(outcome: ChangeOutcome) -> u64 {
        match outcome {
            ChangeOutcome::ArmDebounce { generation } => generation,
            ChangeOutcome::Unchanged => panic!("expected debounce to arm"),
        }
    }

    #[test]
    fn burst_of_edits_yields_one_save_for_last_generation() {
        let mut m = machine();
        let g1 = armed(m.content_changed("a".into()));
        let g2 = armed(m.content_changed("ab".into()));
        let g3 = armed(m.content_changed("abc".into()));
        assert_eq!(m.phase(), AutoSavePhase::PendingDebounce);

        assert!(m.debounce_elapsed(g1).is_none());
        assert!(m.debounce_elapsed(g2).is_none());
        let request = m.debounce_elapsed(g3).expect("latest generation saves");
        assert_eq!(request.content, "abc");
        assert_eq!(request.trigger, SaveTrigger::Debounce);
        assert_eq!(m.phase(), AutoSavePhase::Saving);

        m.finish_save(request.ticket, Ok(()), Utc::now()).unwrap();
        let status = m.status();
        assert_eq!(status.phase, AutoSavePhase::Idle);
        assert_eq!(status.save_count, 1);
        assert_eq!(status.pending_change_count, 0);
        assert!(!status.has_unsaved_changes);
        assert_eq!(m.saved_content().map(String::as_str), Some("abc"));
    }

    #[test]
    fn change_back_to_saved_content_is_not_counted() {
        let mut m = machine();
        let request = {
            m.content_changed("draft".into());
            m.save_now().unwrap()
        };
        m.finish_save(request.ticket, Ok(()), Utc::now());

        assert_eq!(m.content_changed("draft".into()), ChangeOutcome::Unchanged);
        assert_eq!(m.status().pending_change_count, 0);
        assert!(m.interval_tick().is_none());
    }

    #[test]
    fn baseline_is_clean_until_edited() {
        let mut m = machine();
        m.seed_baseline("loaded".to_string());
        assert!(!m.has_unsaved_changes());
        assert_eq!(m.saved_content().map(String::as_str), Some("loaded"));
        assert_eq!(m.status().save_count, 0);
        assert!(m.status().last_saved.is_none());

        assert_eq!(m.content_changed("loaded".into()), ChangeOutcome::Unchanged);
        assert!(m.interval_tick().is_none());

        let g = armed(m.content_changed("loaded, then edited".into()));
        assert_eq!(m.debounce_elapsed(g).unwrap().content, "loaded, then edited");
    }

    #[test]
    fn debounce_respects_min_changes() {
        let mut m = AutoSaveMachine::new(3, None);
        m.content_changed("a".to_string());
        let g = armed(m.content_changed("ab".to_string()));
        assert!(m.debounce_elapsed(g).is_none());

        let g = armed(m.content_changed("abc".to_string()));
        assert!(m.debounce_elapsed(g).is_some());
    }

    #[test]
    fn save_now_is_skipped_while_in_flight() {
        let mut m = machine();
        m.content_changed("x".into());
        let first = m.save_now().unwrap();
        assert!(matches!(m.save_now(), Err(SaveNowOutcome::Skipped)));
        assert!(m.interval_tick().is_none());
        m.finish_save(first.ticket, Ok(()), Utc::now());
        assert!(!m.is_saving());
    }

    #[test]
    fn save_now_without_content_has_nothing_to_save() {
        let mut m = machine();
        assert!(matches!(m.save_now(), Err(SaveNowOutcome::NothingToSave)));
    }

    #[test]
    fn failed_save_keeps_pending_changes() {
        let mut m = machine();
        m.content_changed("x".into());
        m.content_changed("xy".into());
        let request = m.save_now().unwrap();
        let settled = m
            .finish_save(request.ticket, Err("disk full".into()), Utc::now())
            .unwrap();

        assert!(matches!(settled, SaveSettled::Failed { .. }));
        let status = m.status();
        assert_eq!(status.pending_change_count, 2);
        assert_eq!(status.save_count, 0);
        assert!(status.has_unsaved_changes);
        assert!(status.last_saved.is_none());
    }

    #[test]
    fn edits_during_save_stay_pending() {
        let mut m = machine();
        m.content_changed("one".into());
        let request = m.save_now().unwrap();
        m.content_changed("two".into());
        m.finish_save(request.ticket, Ok(()), Utc::now());

        let status = m.status();
        assert_eq!(status.pending_change_count, 1);
        assert!(status.has_unsaved_changes);
        assert_eq!(status.phase, AutoSavePhase::PendingDebounce);
        assert_eq!(m.saved_content().map(String::as_str), Some("one"));
    }

    #[test]
    fn stale_ticket_is_ignored() {
        let mut m = machine();
        m.content_changed("x".into());
        let request = m.save_now().unwrap();
        assert!(m.finish_save(request.ticket + 1, Ok(()), Utc::now()).is_none());
        assert!(m.is_saving());
    }

    #[test]
    fn predicate_vetoes_every_trigger() {
        let predicate: SavePredicate<String> = Arc::new(|content: &String| content.len() >= 5);
        let mut m = AutoSaveMachine::new(1, Some(predicate));
        let g = armed(m.content_changed("abc".into()));

        assert!(m.debounce_elapsed(g).is_none());
        assert!(m.interval_tick().is_none());
        assert!(matches!(m.save_now(), Err(SaveNowOutcome::Vetoed)));
        assert!(!m.is_saving());

        m.content_changed("abcdef".into());
        assert!(m.save_now().is_ok());
    }

    #[test]
    fn interval_saves_dirty_content_regardless_of_min_changes() {
        let mut m = AutoSaveMachine::new(10, None);
        assert!(m.interval_tick().is_none());
        m.content_changed("x".to_string());
        let request = m.interval_tick().unwrap();
        assert_eq!(request.trigger, SaveTrigger::Interval);
    }
}
