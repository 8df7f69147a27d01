//! Typed records produced by ingestion and staged for review.
//!
//! Field names serialize in camelCase to match the stored documents.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "high" | "urgent" => Some(Self::High),
            "medium" | "normal" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EstimatedTime {
    #[serde(rename = "5 min")]
    FiveMin,
    #[serde(rename = "15 min")]
    FifteenMin,
    #[serde(rename = "30 min")]
    ThirtyMin,
    #[serde(rename = "1 hr+")]
    HourPlus,
}

impl EstimatedTime {
    pub fn from_minutes(minutes: u32) -> Self {
        match minutes {
            0..=5 => Self::FiveMin,
            6..=15 => Self::FifteenMin,
            16..=30 => Self::ThirtyMin,
            _ => Self::HourPlus,
        }
    }

    /// Representative duration of the bucket.
    pub fn minutes(self) -> u32 {
        match self {
            Self::FiveMin => 5,
            Self::FifteenMin => 15,
            Self::ThirtyMin => 30,
            Self::HourPlus => 60,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "5 min" | "5min" | "5 mins" => Some(Self::FiveMin),
            "15 min" | "15min" | "15 mins" => Some(Self::FifteenMin),
            "30 min" | "30min" | "30 mins" => Some(Self::ThirtyMin),
            "1 hr+" | "1hr+" | "1 hr" | "1 hour" | "1 hour+" => Some(Self::HourPlus),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnergyLevel {
    #[serde(rename = "High Focus")]
    HighFocus,
    #[serde(rename = "Low Energy/Admin")]
    LowEnergyAdmin,
}

impl EnergyLevel {
    pub fn parse(s: &str) -> Option<Self> {
        let lower = s.trim().to_lowercase();
        if lower.starts_with("high") {
            Some(Self::HighFocus)
        } else if lower.starts_with("low") || lower.contains("admin") {
            Some(Self::LowEnergyAdmin)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightType {
    Praise,
    Concern,
    #[default]
    Neutral,
}

impl InsightType {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "praise" | "positive" => Self::Praise,
            "concern" | "negative" | "issue" => Self::Concern,
            _ => Self::Neutral,
        }
    }
}

/// A task proposed by the model. The three context tags are optional while a
/// task is being built; the normalizer fills all of them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProposedTask {
    pub title: String,
    #[serde(with = "lenient_day")]
    pub due_date: Option<NaiveDate>,
    pub assignee: String,
    pub priority: Priority,
    pub category: String,
    pub summary: String,
    pub estimated_minutes: Option<u32>,
    pub estimated_time: Option<EstimatedTime>,
    pub energy_level: Option<EnergyLevel>,
    pub is_weekly_win: Option<bool>,
    pub theme_tag: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProposedCalendarEvent {
    pub title: String,
    pub start_date_time: String,
    pub end_date_time: String,
    pub description: String,
    #[serde(rename = "type")]
    pub event_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProposedStaffInsight {
    pub staff_name: String,
    pub summary: String,
    #[serde(with = "lenient_day")]
    pub date: Option<NaiveDate>,
    #[serde(rename = "type")]
    pub insight_type: InsightType,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProposedStrategyNote {
    pub theme: String,
    pub note: String,
    pub linked_to: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProposedWellbeingLog {
    pub mood: String,
    /// 1-10 self-reported energy.
    pub energy: Option<u8>,
    pub summary: String,
}

/// Normalizer output. Every collection is present, possibly empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NormalizedBatch {
    pub raw_text: String,
    pub tasks: Vec<ProposedTask>,
    pub wellbeing: Option<ProposedWellbeingLog>,
    pub staff_insights: Vec<ProposedStaffInsight>,
    pub calendar_events: Vec<ProposedCalendarEvent>,
    pub strategy_notes: Vec<ProposedStrategyNote>,
}

/// Record collections a staged item can belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecordKind {
    Task,
    CalendarEvent,
    StaffInsight,
    StrategyNote,
    Wellbeing,
}

impl RecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::CalendarEvent => "calendarEvent",
            Self::StaffInsight => "staffInsight",
            Self::StrategyNote => "strategyNote",
            Self::Wellbeing => "wellbeing",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub from: Value,
    pub to: Value,
}

/// What a reviewer changed on one proposed task. Audit only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionRecord {
    #[serde(rename = "type")]
    pub record_type: RecordKind,
    pub label: String,
    pub changes: BTreeMap<String, FieldChange>,
}

/// `YYYY-MM-DD` on the way out; anything with a leading ISO date on the way
/// in. Unparseable values become `None` rather than failing the record.
pub(crate) mod lenient_day {
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    pub fn serialize<S: Serializer>(day: &Option<NaiveDate>, s: S) -> Result<S::Ok, S::Error> {
        match day {
            Some(d) => s.serialize_str(&d.format("%Y-%m-%d").to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveDate>, D::Error> {
        let value = Option::<Value>::deserialize(d)?;
        Ok(value.as_ref().and_then(crate::payload::coerce_day))
    }
}
