//! Review/diff staging for one ingestion.
//!
//! A session keeps an untouched copy of what the model proposed next to a
//! working copy the reviewer edits. Approval diffs the two into
//! [`CorrectionRecord`]s, filters out ignored and empty items, and hands the
//! rest to the [`CommitGate`]. Only one approval may be in flight per
//! session; a second one is rejected, not queued.

use crate::commit::{ApprovedPayload, CommitContext, CommitGate, CommitReport};
use crate::error::ReviewError;
use crate::schema::{
    CorrectionRecord, EnergyLevel, EstimatedTime, FieldChange, NormalizedBatch, Priority,
    ProposedCalendarEvent, ProposedStaffInsight, ProposedStrategyNote, ProposedTask,
    ProposedWellbeingLog, RecordKind,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

/// Task fields compared at approval time.
const TRACKED_TASK_FIELDS: [&str; 11] = [
    "title",
    "dueDate",
    "assignee",
    "priority",
    "category",
    "summary",
    "estimatedMinutes",
    "themeTag",
    "energyLevel",
    "estimatedTime",
    "isWeeklyWin",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewState {
    Idle,
    Populated,
    Editing,
    Approving,
    Committed,
    Cancelled,
}

impl ReviewState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Populated => "populated",
            Self::Editing => "editing",
            Self::Approving => "approving",
            Self::Committed => "committed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// A working item plus its ignore flag. Toggling the flag never touches the
/// item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Staged<T> {
    #[serde(flatten)]
    pub item: T,
    pub ignored: bool,
}

impl<T> Staged<T> {
    fn new(item: T) -> Self {
        Self {
            item,
            ignored: false,
        }
    }
}

/// One field edit on a staged task, as sent by the review surface:
/// `{"field": "priority", "value": "High"}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "camelCase")]
pub enum TaskEdit {
    Title(String),
    DueDate(Option<NaiveDate>),
    Assignee(String),
    Priority(Priority),
    Category(String),
    Summary(String),
    EstimatedMinutes(Option<u32>),
    ThemeTag(String),
    EnergyLevel(EnergyLevel),
    EstimatedTime(EstimatedTime),
    IsWeeklyWin(bool),
}

impl TaskEdit {
    fn apply(self, task: &mut ProposedTask) {
        match self {
            Self::Title(v) => task.title = v,
            Self::DueDate(v) => task.due_date = v,
            Self::Assignee(v) => task.assignee = v,
            Self::Priority(v) => task.priority = v,
            Self::Category(v) => task.category = v,
            Self::Summary(v) => task.summary = v,
            Self::EstimatedMinutes(v) => task.estimated_minutes = v,
            Self::ThemeTag(v) => task.theme_tag = v,
            Self::EnergyLevel(v) => task.energy_level = Some(v),
            Self::EstimatedTime(v) => task.estimated_time = Some(v),
            Self::IsWeeklyWin(v) => task.is_weekly_win = Some(v),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewSession {
    pub id: String,
    pub account_id: String,
    pub user_id: String,
    pub mode: String,
    pub source_hash: String,
    pub created_at: DateTime<Utc>,
    state: ReviewState,
    /// Model output as received, for manual salvage.
    raw_text: String,
    /// The batch as proposed. Never edited.
    originals: NormalizedBatch,
    tasks: Vec<Staged<ProposedTask>>,
    calendar_events: Vec<Staged<ProposedCalendarEvent>>,
    staff_insights: Vec<Staged<ProposedStaffInsight>>,
    strategy_notes: Vec<Staged<ProposedStrategyNote>>,
    wellbeing: Option<Staged<ProposedWellbeingLog>>,
    #[serde(skip)]
    saving: Arc<AtomicBool>,
}

/// Everything an approval commits, taken from the session under its lock.
/// Dropping it releases the session's saving flag.
#[derive(Debug)]
pub struct ApprovalTicket {
    pub payload: ApprovedPayload,
    pub corrections: Vec<CorrectionRecord>,
    pub context: CommitContext,
    _guard: SavingGuard,
}

#[derive(Debug)]
struct SavingGuard(Arc<AtomicBool>);

impl Drop for SavingGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Approval {
    pub report: CommitReport,
    pub corrections: Vec<CorrectionRecord>,
}

impl ReviewSession {
    pub fn new(
        id: impl Into<String>,
        account_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            account_id: account_id.into(),
            user_id: user_id.into(),
            mode: String::new(),
            source_hash: String::new(),
            created_at: Utc::now(),
            state: ReviewState::Idle,
            raw_text: String::new(),
            originals: NormalizedBatch::default(),
            tasks: Vec::new(),
            calendar_events: Vec::new(),
            staff_insights: Vec::new(),
            strategy_notes: Vec::new(),
            wellbeing: None,
            saving: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn state(&self) -> ReviewState {
        self.state
    }

    pub fn is_saving(&self) -> bool {
        self.saving.load(Ordering::Acquire)
    }

    /// Load a fresh model result. The batch is kept as the diff baseline and
    /// copied into the working set.
    pub fn populate(
        &mut self,
        batch: NormalizedBatch,
        mode: impl Into<String>,
        source_hash: impl Into<String>,
    ) -> Result<(), ReviewError> {
        self.expect_state(&[ReviewState::Idle], "populate")?;

        self.mode = mode.into();
        self.source_hash = source_hash.into();
        self.raw_text = batch.raw_text.clone();
        self.tasks = batch.tasks.iter().cloned().map(Staged::new).collect();
        self.calendar_events = batch.calendar_events.iter().cloned().map(Staged::new).collect();
        self.staff_insights = batch.staff_insights.iter().cloned().map(Staged::new).collect();
        self.strategy_notes = batch.strategy_notes.iter().cloned().map(Staged::new).collect();
        self.wellbeing = batch.wellbeing.clone().map(Staged::new);
        self.originals = batch;
        self.state = ReviewState::Populated;
        Ok(())
    }

    pub fn edit_task(&mut self, index: usize, edit: TaskEdit) -> Result<(), ReviewError> {
        self.begin_edit()?;
        let staged = self
            .tasks
            .get_mut(index)
            .ok_or(ReviewError::UnknownItem { kind: "task", index })?;
        edit.apply(&mut staged.item);
        Ok(())
    }

    pub fn replace_event(&mut self, index: usize, event: ProposedCalendarEvent) -> Result<(), ReviewError> {
        self.begin_edit()?;
        replace(&mut self.calendar_events, "calendarEvent", index, event)
    }

    pub fn replace_insight(&mut self, index: usize, insight: ProposedStaffInsight) -> Result<(), ReviewError> {
        self.begin_edit()?;
        replace(&mut self.staff_insights, "staffInsight", index, insight)
    }

    pub fn replace_note(&mut self, index: usize, note: ProposedStrategyNote) -> Result<(), ReviewError> {
        self.begin_edit()?;
        replace(&mut self.strategy_notes, "strategyNote", index, note)
    }

    /// Set or overwrite the wellbeing log, keeping its ignore flag.
    pub fn replace_wellbeing(&mut self, log: ProposedWellbeingLog) -> Result<(), ReviewError> {
        self.begin_edit()?;
        match &mut self.wellbeing {
            Some(staged) => staged.item = log,
            None => self.wellbeing = Some(Staged::new(log)),
        }
        Ok(())
    }

    pub fn set_ignored(&mut self, kind: RecordKind, index: usize, ignored: bool) -> Result<(), ReviewError> {
        self.begin_edit()?;
        let unknown = ReviewError::UnknownItem {
            kind: kind.as_str(),
            index,
        };
        let flag = match kind {
            RecordKind::Task => self.tasks.get_mut(index).map(|s| &mut s.ignored),
            RecordKind::CalendarEvent => self.calendar_events.get_mut(index).map(|s| &mut s.ignored),
            RecordKind::StaffInsight => self.staff_insights.get_mut(index).map(|s| &mut s.ignored),
            RecordKind::StrategyNote => self.strategy_notes.get_mut(index).map(|s| &mut s.ignored),
            RecordKind::Wellbeing if index == 0 => self.wellbeing.as_mut().map(|s| &mut s.ignored),
            RecordKind::Wellbeing => None,
        };
        *flag.ok_or(unknown)? = ignored;
        Ok(())
    }

    /// Discard the batch without committing anything.
    pub fn close(&mut self) -> Result<(), ReviewError> {
        self.expect_state(
            &[ReviewState::Idle, ReviewState::Populated, ReviewState::Editing],
            "close",
        )?;
        self.tasks.clear();
        self.calendar_events.clear();
        self.staff_insights.clear();
        self.strategy_notes.clear();
        self.wellbeing = None;
        self.state = ReviewState::Cancelled;
        Ok(())
    }

    /// Claim the saving flag and move to `Approving`. The ticket carries the
    /// filtered payload and the diff; the session lock need not be held
    /// while it is committed.
    pub fn begin_approval(&mut self, today: NaiveDate) -> Result<ApprovalTicket, ReviewError> {
        if self.saving.swap(true, Ordering::AcqRel) {
            return Err(ReviewError::AlreadySaving);
        }
        let guard = SavingGuard(self.saving.clone());

        // An approval whose future was dropped leaves the state behind but
        // not the flag, so it can be retried.
        self.expect_state(
            &[ReviewState::Populated, ReviewState::Editing, ReviewState::Approving],
            "approve",
        )?;
        self.state = ReviewState::Approving;

        Ok(ApprovalTicket {
            payload: self.approved_payload(),
            corrections: self.corrections(),
            context: CommitContext {
                account_id: self.account_id.clone(),
                user_id: self.user_id.clone(),
                today,
                source_hash: self.source_hash.clone(),
            },
            _guard: guard,
        })
    }

    /// Settle an approval. A failed commit leaves the batch editable so the
    /// reviewer can try again.
    pub fn finish_approval(&mut self, committed: bool) {
        self.state = if committed {
            ReviewState::Committed
        } else {
            ReviewState::Editing
        };
    }

    /// Non-ignored items, minus tasks with neither a title nor a summary.
    pub fn approved_payload(&self) -> ApprovedPayload {
        fn kept<T: Clone>(items: &[Staged<T>]) -> Vec<T> {
            items
                .iter()
                .filter(|s| !s.ignored)
                .map(|s| s.item.clone())
                .collect()
        }

        ApprovedPayload {
            tasks: kept(&self.tasks)
                .into_iter()
                .filter(|t| !t.title.trim().is_empty() || !t.summary.trim().is_empty())
                .collect(),
            calendar_events: kept(&self.calendar_events),
            staff_insights: kept(&self.staff_insights),
            strategy_notes: kept(&self.strategy_notes),
            wellbeing: self
                .wellbeing
                .as_ref()
                .filter(|s| !s.ignored)
                .map(|s| s.item.clone()),
        }
    }

    /// Field-level differences between the proposed and the reviewed tasks.
    pub fn corrections(&self) -> Vec<CorrectionRecord> {
        self.originals
            .tasks
            .iter()
            .zip(&self.tasks)
            .filter_map(|(original, staged)| task_correction(original, staged))
            .collect()
    }

    fn begin_edit(&mut self) -> Result<(), ReviewError> {
        self.expect_state(&[ReviewState::Populated, ReviewState::Editing], "edit")?;
        self.state = ReviewState::Editing;
        Ok(())
    }

    fn expect_state(&self, allowed: &[ReviewState], action: &'static str) -> Result<(), ReviewError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(ReviewError::InvalidState {
                state: self.state.as_str(),
                action,
            })
        }
    }
}

fn replace<T>(items: &mut [Staged<T>], kind: &'static str, index: usize, item: T) -> Result<(), ReviewError> {
    let staged = items
        .get_mut(index)
        .ok_or(ReviewError::UnknownItem { kind, index })?;
    staged.item = item;
    Ok(())
}

fn task_correction(original: &ProposedTask, staged: &Staged<ProposedTask>) -> Option<CorrectionRecord> {
    let before = serde_json::to_value(original).ok()?;
    let after = serde_json::to_value(&staged.item).ok()?;

    let mut changes = BTreeMap::new();
    for field in TRACKED_TASK_FIELDS {
        let from = before.get(field).cloned().unwrap_or(Value::Null);
        let to = after.get(field).cloned().unwrap_or(Value::Null);
        if from != to {
            changes.insert(field.to_string(), FieldChange { from, to });
        }
    }
    if staged.ignored {
        changes.insert(
            "ignore".to_string(),
            FieldChange {
                from: json!(false),
                to: json!(true),
            },
        );
    }

    if changes.is_empty() {
        return None;
    }
    let label = if original.title.trim().is_empty() {
        staged.item.title.clone()
    } else {
        original.title.clone()
    };
    Some(CorrectionRecord {
        record_type: RecordKind::Task,
        label,
        changes,
    })
}

fn lock(session: &Mutex<ReviewSession>) -> std::sync::MutexGuard<'_, ReviewSession> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Approve and commit a shared session. The saving flag is released on
/// every path, including a failed commit.
pub async fn approve(
    session: &Mutex<ReviewSession>,
    gate: &CommitGate,
    today: NaiveDate,
) -> Result<Approval, ReviewError> {
    let ticket = lock(session).begin_approval(today)?;
    let review_id = lock(session).id.clone();

    for correction in &ticket.corrections {
        info!(
            "Correction [{}] {} '{}': {}",
            review_id,
            correction.record_type,
            correction.label,
            correction
                .changes
                .keys()
                .cloned()
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    let result = gate.commit(&ticket.context, &ticket.payload).await;
    lock(session).finish_approval(result.is_ok());

    let report = result.map_err(|e| {
        warn!("Approval of review {} failed: {}", review_id, e);
        ReviewError::from(e)
    })?;
    Ok(Approval {
        report,
        corrections: ticket.corrections,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::tests::FlakyStore;
    use crate::notify::NoticeBuffer;
    use crate::store::{Collection, MemoryStore};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 18).unwrap()
    }

    fn batch() -> NormalizedBatch {
        NormalizedBatch {
            raw_text: "{...}".into(),
            tasks: vec![
                ProposedTask {
                    title: "Email Year 8 parents".into(),
                    due_date: NaiveDate::from_ymd_opt(2026, 10, 19),
                    estimated_minutes: Some(5),
                    estimated_time: Some(EstimatedTime::FiveMin),
                    energy_level: Some(EnergyLevel::LowEnergyAdmin),
                    is_weekly_win: Some(false),
                    ..Default::default()
                },
                ProposedTask {
                    title: "Chase Dave".into(),
                    assignee: "Dave".into(),
                    ..Default::default()
                },
            ],
            calendar_events: vec![ProposedCalendarEvent {
                title: "Trip".into(),
                start_date_time: "2026-10-22T09:00".into(),
                ..Default::default()
            }],
            wellbeing: Some(ProposedWellbeingLog {
                mood: "Tired".into(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn session() -> ReviewSession {
        let mut s = ReviewSession::new("r1", "acc", "user-1");
        s.populate(batch(), "brain_dump", "hash").unwrap();
        s
    }

    #[test]
    fn test_populate_snapshots_batch() {
        let s = session();
        assert_eq!(s.state(), ReviewState::Populated);
        assert_eq!(s.originals, batch());
        assert_eq!(s.approved_payload().tasks, batch().tasks);
        assert!(s.corrections().is_empty());
    }

    #[test]
    fn test_populate_only_once() {
        let mut s = session();
        assert!(matches!(
            s.populate(batch(), "brain_dump", "hash"),
            Err(ReviewError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_priority_only_edit_yields_one_change() {
        let mut s = session();
        s.edit_task(1, TaskEdit::Priority(Priority::High)).unwrap();

        assert_eq!(s.state(), ReviewState::Editing);
        assert_eq!(s.originals.tasks[1].priority, Priority::Medium);

        let corrections = s.corrections();
        assert_eq!(corrections.len(), 1);
        assert_eq!(corrections[0].label, "Chase Dave");
        assert_eq!(corrections[0].record_type, RecordKind::Task);
        let keys: Vec<&String> = corrections[0].changes.keys().collect();
        assert_eq!(keys, ["priority"]);
        assert_eq!(corrections[0].changes["priority"].from, json!("Medium"));
        assert_eq!(corrections[0].changes["priority"].to, json!("High"));
    }

    #[test]
    fn test_ignore_toggle_keeps_edits() {
        let mut s = session();
        s.edit_task(0, TaskEdit::Title("Email all Year 8 parents".into()))
            .unwrap();
        s.set_ignored(RecordKind::Task, 0, true).unwrap();
        assert_eq!(s.approved_payload().tasks.len(), 1);

        let ignored = s.corrections();
        assert!(ignored[0].changes.contains_key("ignore"));

        s.set_ignored(RecordKind::Task, 0, false).unwrap();
        let payload = s.approved_payload();
        assert_eq!(payload.tasks[0].title, "Email all Year 8 parents");

        let corrections = s.corrections();
        assert!(!corrections[0].changes.contains_key("ignore"));
        assert!(corrections[0].changes.contains_key("title"));
    }

    #[test]
    fn test_ignored_and_empty_items_excluded() {
        let mut s = session();
        s.edit_task(1, TaskEdit::Title("  ".into())).unwrap();
        s.set_ignored(RecordKind::CalendarEvent, 0, true).unwrap();
        s.set_ignored(RecordKind::Wellbeing, 0, true).unwrap();

        let payload = s.approved_payload();
        assert_eq!(payload.tasks.len(), 1);
        assert!(payload.calendar_events.is_empty());
        assert!(payload.wellbeing.is_none());
    }

    #[test]
    fn test_unknown_items() {
        let mut s = session();
        assert!(matches!(
            s.edit_task(9, TaskEdit::IsWeeklyWin(true)),
            Err(ReviewError::UnknownItem { kind: "task", index: 9 })
        ));
        assert!(s.set_ignored(RecordKind::StrategyNote, 0, true).is_err());
        assert!(s.set_ignored(RecordKind::Wellbeing, 1, true).is_err());
    }

    #[test]
    fn test_replace_items() {
        let mut s = session();
        s.replace_event(
            0,
            ProposedCalendarEvent {
                title: "Museum trip".into(),
                ..Default::default()
            },
        )
        .unwrap();
        s.set_ignored(RecordKind::Wellbeing, 0, true).unwrap();
        s.replace_wellbeing(ProposedWellbeingLog {
            mood: "Better".into(),
            ..Default::default()
        })
        .unwrap();

        let payload = s.approved_payload();
        assert_eq!(payload.calendar_events[0].title, "Museum trip");
        assert!(payload.wellbeing.is_none());
        assert_eq!(s.originals.calendar_events[0].title, "Trip");
    }

    #[test]
    fn test_task_edit_wire_format() {
        let edit: TaskEdit =
            serde_json::from_value(json!({"field": "priority", "value": "High"})).unwrap();
        assert_eq!(edit, TaskEdit::Priority(Priority::High));

        let edit: TaskEdit =
            serde_json::from_value(json!({"field": "dueDate", "value": "2026-10-30"})).unwrap();
        assert_eq!(edit, TaskEdit::DueDate(NaiveDate::from_ymd_opt(2026, 10, 30)));

        let edit: TaskEdit =
            serde_json::from_value(json!({"field": "energyLevel", "value": "Low Energy/Admin"}))
                .unwrap();
        assert_eq!(edit, TaskEdit::EnergyLevel(EnergyLevel::LowEnergyAdmin));

        assert!(serde_json::from_value::<TaskEdit>(json!({"field": "colour", "value": 1})).is_err());
    }

    #[test]
    fn test_double_submit_rejected() {
        let mut s = session();
        let ticket = s.begin_approval(today()).unwrap();
        assert!(s.is_saving());
        assert!(matches!(
            s.begin_approval(today()),
            Err(ReviewError::AlreadySaving)
        ));
        assert!(matches!(
            s.edit_task(0, TaskEdit::Title("x".into())),
            Err(ReviewError::InvalidState { .. })
        ));

        drop(ticket);
        assert!(!s.is_saving());
        // The abandoned approval can be retried.
        assert!(s.begin_approval(today()).is_ok());
    }

    #[test]
    fn test_close_discards() {
        let mut s = session();
        s.close().unwrap();
        assert_eq!(s.state(), ReviewState::Cancelled);
        assert!(s.approved_payload().tasks.is_empty());
        assert!(s.edit_task(0, TaskEdit::Title("x".into())).is_err());
        assert!(s.begin_approval(today()).is_err());
        assert!(!s.is_saving());
    }

    fn gate(store: Arc<dyn crate::store::DocumentStore>) -> CommitGate {
        CommitGate::new(store, Arc::new(NoticeBuffer::new()), 50)
    }

    #[tokio::test]
    async fn test_approve_commits_and_finishes() {
        let store = MemoryStore::new();
        let shared = Mutex::new(session());
        lock(&shared)
            .edit_task(1, TaskEdit::Priority(Priority::High))
            .unwrap();

        let approval = approve(&shared, &gate(Arc::new(store.clone())), today())
            .await
            .unwrap();
        assert_eq!(approval.report.tasks.added, 2);
        assert_eq!(approval.corrections.len(), 1);

        let s = lock(&shared);
        assert_eq!(s.state(), ReviewState::Committed);
        assert!(!s.is_saving());
        assert_eq!(store.documents("acc", Collection::Tasks)[0]["sourceHash"], "hash");
    }

    #[tokio::test]
    async fn test_failed_commit_can_be_retried() {
        let memory = MemoryStore::new();
        let flaky = FlakyStore {
            inner: memory.clone(),
            fail_insert: Some(Collection::CalendarEvents),
            fail_interactions: false,
        };
        let shared = Mutex::new(session());

        let err = approve(&shared, &gate(Arc::new(flaky)), today())
            .await
            .unwrap_err();
        assert!(matches!(err, ReviewError::Commit(_)));
        {
            let s = lock(&shared);
            assert_eq!(s.state(), ReviewState::Editing);
            assert!(!s.is_saving());
        }

        let retry = approve(&shared, &gate(Arc::new(memory.clone())), today())
            .await
            .unwrap();
        assert_eq!(retry.report.tasks.skipped, 2);
        assert_eq!(retry.report.calendar_events.added, 1);
        assert_eq!(memory.documents("acc", Collection::Tasks).len(), 2);
    }
}
