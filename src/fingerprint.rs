//! Commit-time identity keys.
//!
//! A fingerprint is built from a record's identity fields only, so two
//! records that agree on those fields collide regardless of anything else.
//! The field list per record type is pinned to a [`KeyVersion`]; adding a
//! field means adding a version, never editing an existing one, because
//! fingerprints are recomputed from already-stored documents.

use crate::payload::{coerce_day, coerce_string, coerce_u32};
use crate::schema::{
    ProposedCalendarEvent, ProposedStaffInsight, ProposedStrategyNote, ProposedTask,
    ProposedWellbeingLog,
};
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyVersion {
    V1,
}

pub const CURRENT: KeyVersion = KeyVersion::V1;

impl KeyVersion {
    fn prefix(self) -> &'static str {
        match self {
            Self::V1 => "v1",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    fn build(version: KeyVersion, kind: &str, parts: &[String]) -> Self {
        Self(format!("{}:{}:{}", version.prefix(), kind, parts.join("|")))
    }

    /// Title, due date, assignee, category.
    pub fn task(task: &ProposedTask) -> Self {
        Self::task_key(&task.title, task.due_date, &task.assignee, &task.category)
    }

    /// Same key as [`Fingerprint::task`], read from a stored document.
    /// Only the identity fields are looked at, so a document written by
    /// another client with odd values elsewhere still matches.
    pub fn task_from_doc(doc: &Value) -> Option<Self> {
        let doc = doc.as_object()?;
        Some(Self::task_key(
            &text(doc, "title"),
            doc.get("dueDate").and_then(coerce_day),
            &text(doc, "assignee"),
            &text(doc, "category"),
        ))
    }

    fn task_key(title: &str, due: Option<NaiveDate>, assignee: &str, category: &str) -> Self {
        match CURRENT {
            KeyVersion::V1 => Self::build(
                CURRENT,
                "task",
                &[norm(title), day(due), norm(assignee), norm(category)],
            ),
        }
    }

    /// Title and start.
    pub fn calendar_event(event: &ProposedCalendarEvent) -> Self {
        Self::event_key(&event.title, &event.start_date_time)
    }

    pub fn calendar_event_from_doc(doc: &Value) -> Option<Self> {
        let doc = doc.as_object()?;
        Some(Self::event_key(&text(doc, "title"), &text(doc, "startDateTime")))
    }

    fn event_key(title: &str, start: &str) -> Self {
        match CURRENT {
            KeyVersion::V1 => Self::build(CURRENT, "event", &[norm(title), norm(start)]),
        }
    }

    /// Staff member, day, summary.
    pub fn staff_insight(insight: &ProposedStaffInsight) -> Self {
        Self::insight_key(&insight.staff_name, insight.date, &insight.summary)
    }

    pub fn staff_insight_from_doc(doc: &Value) -> Option<Self> {
        let doc = doc.as_object()?;
        Some(Self::insight_key(
            &text(doc, "staffName"),
            doc.get("date").and_then(coerce_day),
            &text(doc, "summary"),
        ))
    }

    fn insight_key(staff: &str, date: Option<NaiveDate>, summary: &str) -> Self {
        match CURRENT {
            KeyVersion::V1 => Self::build(
                CURRENT,
                "insight",
                &[norm(staff), day(date), norm(summary)],
            ),
        }
    }

    /// Theme and note text.
    pub fn strategy_note(note: &ProposedStrategyNote) -> Self {
        Self::note_key(&note.theme, &note.note)
    }

    pub fn strategy_note_from_doc(doc: &Value) -> Option<Self> {
        let doc = doc.as_object()?;
        Some(Self::note_key(&text(doc, "theme"), &text(doc, "note")))
    }

    fn note_key(theme: &str, note: &str) -> Self {
        match CURRENT {
            KeyVersion::V1 => Self::build(CURRENT, "note", &[norm(theme), norm(note)]),
        }
    }

    /// A wellbeing log is identified by the day it was logged on.
    pub fn wellbeing(log: &ProposedWellbeingLog, logged_on: Option<NaiveDate>) -> Self {
        Self::wellbeing_key(logged_on, &log.mood, log.energy.map(u32::from), &log.summary)
    }

    /// The logged-on day comes from the document's own `date`.
    pub fn wellbeing_from_doc(doc: &Value) -> Option<Self> {
        let doc = doc.as_object()?;
        Some(Self::wellbeing_key(
            doc.get("date").and_then(coerce_day),
            &text(doc, "mood"),
            doc.get("energy").and_then(coerce_u32),
            &text(doc, "summary"),
        ))
    }

    fn wellbeing_key(
        logged_on: Option<NaiveDate>,
        mood: &str,
        energy: Option<u32>,
        summary: &str,
    ) -> Self {
        match CURRENT {
            KeyVersion::V1 => Self::build(
                CURRENT,
                "wellbeing",
                &[
                    day(logged_on),
                    norm(mood),
                    energy.map(|e| e.to_string()).unwrap_or_default(),
                    norm(summary),
                ],
            ),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lowercase with runs of whitespace collapsed.
fn norm(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn text(doc: &Map<String, Value>, key: &str) -> String {
    doc.get(key).map(coerce_string).unwrap_or_default()
}

fn day(date: Option<NaiveDate>) -> String {
    date.map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{EnergyLevel, Priority};
    use serde_json::json;

    fn task() -> ProposedTask {
        ProposedTask {
            title: "Book  the Coach".into(),
            due_date: NaiveDate::from_ymd_opt(2026, 10, 20),
            assignee: "Dave".into(),
            category: "Trips".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_task_key_layout() {
        assert_eq!(
            Fingerprint::task(&task()).as_str(),
            "v1:task:book the coach|2026-10-20|dave|trips"
        );
    }

    #[test]
    fn test_non_identity_fields_ignored() {
        let mut other = task();
        other.priority = Priority::High;
        other.summary = "Different".into();
        other.energy_level = Some(EnergyLevel::HighFocus);
        other.title = "book the coach ".into();
        assert_eq!(Fingerprint::task(&task()), Fingerprint::task(&other));
    }

    #[test]
    fn test_identity_fields_matter() {
        let mut other = task();
        other.assignee = "Priya".into();
        assert_ne!(Fingerprint::task(&task()), Fingerprint::task(&other));
    }

    #[test]
    fn test_stored_task_matches_on_identity_fields_only() {
        let stored = json!({
            "title": "Book the coach",
            "dueDate": "2026-10-20T00:00:00Z",
            "assignee": "dave",
            "category": "Trips",
            "priority": "high",
            "estimatedMinutes": "15",
            "summary": null,
            "energyLevel": 3.5
        });
        assert_eq!(Fingerprint::task_from_doc(&stored), Some(Fingerprint::task(&task())));
        assert_eq!(Fingerprint::task_from_doc(&json!("not a document")), None);
    }

    #[test]
    fn test_stored_wellbeing_uses_its_date() {
        let log = ProposedWellbeingLog {
            mood: "Busy".into(),
            energy: Some(6),
            summary: String::new(),
        };
        let stored = json!({"date": "2026-10-18", "mood": "busy", "energy": "6", "summary": null});
        assert_eq!(
            Fingerprint::wellbeing_from_doc(&stored),
            Some(Fingerprint::wellbeing(&log, NaiveDate::from_ymd_opt(2026, 10, 18)))
        );
    }

    #[test]
    fn test_kinds_do_not_collide() {
        let note = ProposedStrategyNote {
            theme: "a".into(),
            note: "b".into(),
            linked_to: String::new(),
        };
        let event = ProposedCalendarEvent {
            title: "a".into(),
            start_date_time: "b".into(),
            ..Default::default()
        };
        assert_ne!(
            Fingerprint::strategy_note(&note),
            Fingerprint::calendar_event(&event)
        );
    }
}
