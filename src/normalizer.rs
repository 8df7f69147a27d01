//! Turns an unvalidated payload into typed, tagged, de-duplicated records.
//!
//! Pure: the result depends only on the payload, the source text and the
//! date passed in.

use crate::keywords::STAKEHOLDER;
use crate::payload::{
    coerce_bool, coerce_day, coerce_minutes, coerce_string, coerce_u32, parse_day, RawItem,
    UnvalidatedPayload,
};
use crate::schema::{
    EnergyLevel, EstimatedTime, InsightType, NormalizedBatch, Priority, ProposedCalendarEvent,
    ProposedStaffInsight, ProposedStrategyNote, ProposedTask, ProposedWellbeingLog,
};
use crate::tagging::apply_context_tags;
use chrono::{Days, NaiveDate};
use std::collections::HashSet;

const TITLE_PREVIEW_CHARS: usize = 80;
const DEFAULT_CATEGORY: &str = "General";
const DEFAULT_EVENT_TYPE: &str = "event";

/// Normalize one extraction pass. `raw_text` is left for the caller to fill.
pub fn normalize(
    payload: Option<&UnvalidatedPayload>,
    source_text: &str,
    today: NaiveDate,
) -> NormalizedBatch {
    let empty = UnvalidatedPayload::default();
    let payload = payload.unwrap_or(&empty);

    // A lone task may borrow a date cue the model left out of its wording.
    let cue_fallback = (payload.tasks.len() == 1).then_some(source_text);
    let mut tasks = dedup_by_key(
        payload
            .tasks
            .iter()
            .map(|item| finish_task(coerce_task(item), cue_fallback, today))
            .collect(),
        task_key,
    );

    // Never drop the user's input on the floor.
    if tasks.is_empty() && !source_text.trim().is_empty() {
        tasks.push(finish_task(synthesize_task(source_text), None, today));
    }

    NormalizedBatch {
        raw_text: String::new(),
        tasks,
        wellbeing: payload.wellbeing.as_ref().and_then(coerce_wellbeing),
        staff_insights: dedup_by_key(
            payload
                .staff_insights
                .iter()
                .map(|item| coerce_insight(item, today))
                .collect(),
            insight_key,
        ),
        calendar_events: dedup_by_key(
            payload.calendar_events.iter().map(coerce_event).collect(),
            event_key,
        ),
        strategy_notes: dedup_by_key(
            payload.strategy_notes.iter().map(coerce_note).collect(),
            note_key,
        ),
    }
}

/// The single task standing in for input the model could not structure.
fn synthesize_task(source_text: &str) -> ProposedTask {
    ProposedTask {
        title: preview(source_text),
        summary: source_text.to_string(),
        category: DEFAULT_CATEGORY.to_string(),
        ..Default::default()
    }
}

/// Collapse whitespace and cap at [`TITLE_PREVIEW_CHARS`], ellipsis included.
fn preview(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= TITLE_PREVIEW_CHARS {
        return collapsed;
    }
    let head: String = collapsed.chars().take(TITLE_PREVIEW_CHARS - 1).collect();
    format!("{}…", head.trim_end())
}

// ============================================================================
// Tasks
// ============================================================================

fn coerce_task(item: &RawItem) -> ProposedTask {
    let summary = item.text(&["summary", "description", "details", "notes"], false);
    let mut title = item.text(&["title", "task", "name", "action"], true);
    if title.is_empty() && !summary.is_empty() {
        title = preview(&summary);
    }
    let category = item.text(&["category"], false);

    ProposedTask {
        title,
        due_date: item
            .get(&["dueDate", "due_date", "deadline", "due"])
            .and_then(coerce_day),
        assignee: item.text(&["assignee", "owner", "assignedTo", "assigned_to"], false),
        priority: item
            .get(&["priority"])
            .map(coerce_string)
            .and_then(|p| Priority::parse(&p))
            .unwrap_or_default(),
        category: if category.is_empty() {
            DEFAULT_CATEGORY.to_string()
        } else {
            category
        },
        summary,
        estimated_minutes: item
            .get(&["estimatedMinutes", "estimated_minutes", "minutes"])
            .and_then(coerce_minutes),
        estimated_time: item
            .get(&["estimatedTime", "estimated_time"])
            .map(coerce_string)
            .and_then(|t| EstimatedTime::parse(&t)),
        energy_level: item
            .get(&["energyLevel", "energy_level", "energy"])
            .map(coerce_string)
            .and_then(|e| EnergyLevel::parse(&e)),
        is_weekly_win: item
            .get(&["isWeeklyWin", "is_weekly_win", "weeklyWin"])
            .and_then(coerce_bool),
        theme_tag: item.text(&["themeTag", "theme_tag", "theme", "strategyLink"], false),
    }
}

/// Tag, fill the time fields, then infer a due date if none was given.
fn finish_task(task: ProposedTask, cue_fallback: Option<&str>, today: NaiveDate) -> ProposedTask {
    let mut task = apply_context_tags(&task);
    let estimate = *task.estimated_time.get_or_insert(EstimatedTime::ThirtyMin);
    task.estimated_minutes.get_or_insert(estimate.minutes());
    if task.due_date.is_none() {
        task.due_date = Some(infer_due_date(&task, cue_fallback, today));
    }
    task
}

/// Textual cue in the task itself, then in `cue_fallback`, then
/// stakeholder urgency, then size, then a week out.
///
/// `cue_fallback` is the source text when it describes this task alone.
/// Tasks split from a longer input pass `None` so one task's "tomorrow"
/// does not leak into its siblings.
pub fn infer_due_date(
    task: &ProposedTask,
    cue_fallback: Option<&str>,
    today: NaiveDate,
) -> NaiveDate {
    let text = format!("{} {}", task.title, task.summary).to_lowercase();

    if let Some(due) = textual_cue(&text, today)
        .or_else(|| cue_fallback.and_then(|s| textual_cue(&s.to_lowercase(), today)))
    {
        return due;
    }
    if STAKEHOLDER.matches(&text) {
        return today;
    }
    match task.estimated_minutes {
        Some(m) if m <= 15 => today,
        Some(m) if m < 30 => today + Days::new(2),
        _ => today + Days::new(7),
    }
}

/// `text` must already be lowercase.
fn textual_cue(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    if text.contains("tomorrow") {
        Some(today + Days::new(1))
    } else if text.contains("today") || text.contains("end of day") {
        Some(today)
    } else {
        None
    }
}

// ============================================================================
// Other records
// ============================================================================

fn coerce_event(item: &RawItem) -> ProposedCalendarEvent {
    let event_type = item.text(&["type", "eventType", "event_type"], false);
    ProposedCalendarEvent {
        title: item.text(&["title", "name", "event"], true),
        start_date_time: item.text(&["startDateTime", "start_date_time", "start", "startTime", "date"], false),
        end_date_time: item.text(&["endDateTime", "end_date_time", "end", "endTime"], false),
        description: item.text(&["description", "details", "notes"], false),
        event_type: if event_type.is_empty() {
            DEFAULT_EVENT_TYPE.to_string()
        } else {
            event_type.to_lowercase()
        },
    }
}

fn coerce_insight(item: &RawItem, today: NaiveDate) -> ProposedStaffInsight {
    ProposedStaffInsight {
        staff_name: item.text(&["staffName", "staff_name", "staff", "name", "person"], false),
        summary: item.text(&["summary", "insight", "note", "text"], true),
        date: item
            .get(&["date"])
            .and_then(coerce_day)
            .or(Some(today)),
        insight_type: item
            .get(&["type", "sentiment"])
            .map(|v| InsightType::parse(&coerce_string(v)))
            .unwrap_or_default(),
    }
}

fn coerce_note(item: &RawItem) -> ProposedStrategyNote {
    ProposedStrategyNote {
        theme: item.text(&["theme", "title"], false),
        note: item.text(&["note", "text", "summary", "content"], true),
        linked_to: item.text(&["linkedTo", "linked_to", "link"], false),
    }
}

fn coerce_wellbeing(item: &RawItem) -> Option<ProposedWellbeingLog> {
    let log = ProposedWellbeingLog {
        mood: item.text(&["mood"], false),
        energy: item
            .get(&["energy", "energyLevel", "energy_level"])
            .and_then(coerce_u32)
            .map(|e| e.clamp(1, 10) as u8),
        summary: item.text(&["summary", "note", "notes"], true),
    };
    let present = !log.mood.is_empty() || log.energy.is_some() || !log.summary.is_empty();
    present.then_some(log)
}

// ============================================================================
// In-batch de-duplication
// ============================================================================

/// Keep the first item per key; items with an empty key are dropped.
fn dedup_by_key<T>(items: Vec<T>, key: fn(&T) -> String) -> Vec<T> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| {
            let k = key(item);
            !k.is_empty() && seen.insert(k)
        })
        .collect()
}

fn lower(s: &str) -> String {
    s.trim().to_lowercase()
}

fn day_of(date: Option<NaiveDate>) -> String {
    date.map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

fn task_key(task: &ProposedTask) -> String {
    let title = lower(&task.title);
    if title.is_empty() {
        return String::new();
    }
    format!("{}|{}", title, day_of(task.due_date))
}

fn event_key(event: &ProposedCalendarEvent) -> String {
    let title = lower(&event.title);
    if title.is_empty() {
        return String::new();
    }
    let start = parse_day(&event.start_date_time)
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| lower(&event.start_date_time));
    format!("{}|{}", title, start)
}

fn insight_key(insight: &ProposedStaffInsight) -> String {
    let staff = lower(&insight.staff_name);
    let summary = lower(&insight.summary);
    if staff.is_empty() && summary.is_empty() {
        return String::new();
    }
    format!("{}|{}|{}", staff, day_of(insight.date), summary)
}

fn note_key(note: &ProposedStrategyNote) -> String {
    let theme = lower(&note.theme);
    let body = lower(&note.note);
    if theme.is_empty() && body.is_empty() {
        return String::new();
    }
    format!("{}|{}", theme, body)
}
