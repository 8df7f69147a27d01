//! Commit gate: persists approved records that are not already stored.
//!
//! Each record type is handled in turn. Its recent stored documents are
//! fetched, fingerprinted, and only candidates with an unseen fingerprint
//! are written, all in one batch. Committing the same payload twice
//! therefore writes nothing the second time.

use crate::error::CommitError;
use crate::fingerprint::Fingerprint;
use crate::notify::{Notice, Notifier};
use crate::schema::{
    InsightType, ProposedCalendarEvent, ProposedStaffInsight, ProposedStrategyNote, ProposedTask,
    ProposedWellbeingLog,
};
use crate::store::{Collection, DocumentStore, StaffMember};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

const SOURCE_TAG: &str = "ai-ingest";

/// Reviewed records cleared for persistence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApprovedPayload {
    pub tasks: Vec<ProposedTask>,
    pub calendar_events: Vec<ProposedCalendarEvent>,
    pub staff_insights: Vec<ProposedStaffInsight>,
    pub strategy_notes: Vec<ProposedStrategyNote>,
    pub wellbeing: Option<ProposedWellbeingLog>,
}

/// Who is committing, and for which account.
#[derive(Debug, Clone)]
pub struct CommitContext {
    pub account_id: String,
    pub user_id: String,
    pub today: NaiveDate,
    /// SHA-256 of the ingested text.
    pub source_hash: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TypeCount {
    pub added: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitReport {
    pub tasks: TypeCount,
    pub calendar_events: TypeCount,
    pub staff_insights: TypeCount,
    pub strategy_notes: TypeCount,
    pub wellbeing: TypeCount,
    pub interactions_logged: usize,
    /// Side effects that failed after the primary writes succeeded.
    pub secondary_failures: Vec<String>,
}

impl CommitReport {
    pub fn total_added(&self) -> usize {
        self.tasks.added
            + self.calendar_events.added
            + self.staff_insights.added
            + self.strategy_notes.added
            + self.wellbeing.added
    }
}

/// How one record type is keyed, fetched and decorated.
struct CollectionPlan<K, E, D> {
    collection: Collection,
    /// `None` reads the whole account.
    limit: Option<usize>,
    key: K,
    /// Key of an already-stored document, from its identity fields.
    stored_key: E,
    decorate: D,
}

pub struct CommitGate {
    store: Arc<dyn DocumentStore>,
    notifier: Arc<dyn Notifier>,
    /// Pre-fetch window for everything except tasks.
    recent_limit: usize,
}

impl CommitGate {
    pub fn new(store: Arc<dyn DocumentStore>, notifier: Arc<dyn Notifier>, recent_limit: usize) -> Self {
        Self {
            store,
            notifier,
            recent_limit,
        }
    }

    pub async fn commit(
        &self,
        ctx: &CommitContext,
        payload: &ApprovedPayload,
    ) -> Result<CommitReport, CommitError> {
        let mut report = CommitReport::default();

        let staff = match self.store.staff(&ctx.account_id).await {
            Ok(staff) => staff,
            Err(e) => {
                self.secondary_failure(&mut report, format!("could not load staff list: {}", e));
                Vec::new()
            }
        };

        let (tasks, count) = self
            .commit_collection(
                ctx,
                &payload.tasks,
                CollectionPlan {
                    collection: Collection::Tasks,
                    limit: None,
                    key: Fingerprint::task,
                    stored_key: Fingerprint::task_from_doc,
                    decorate: |_: &ProposedTask, _: &mut Map<String, Value>| {},
                },
            )
            .await?;
        report.tasks = count;

        let (_, count) = self
            .commit_collection(
                ctx,
                &payload.calendar_events,
                CollectionPlan {
                    collection: Collection::CalendarEvents,
                    limit: Some(self.recent_limit),
                    key: Fingerprint::calendar_event,
                    stored_key: Fingerprint::calendar_event_from_doc,
                    decorate: |_: &ProposedCalendarEvent, _: &mut Map<String, Value>| {},
                },
            )
            .await?;
        report.calendar_events = count;

        let (insights, count) = self
            .commit_collection(
                ctx,
                &payload.staff_insights,
                CollectionPlan {
                    collection: Collection::StaffInsights,
                    limit: Some(self.recent_limit),
                    key: Fingerprint::staff_insight,
                    stored_key: Fingerprint::staff_insight_from_doc,
                    decorate: |insight: &ProposedStaffInsight, doc: &mut Map<String, Value>| {
                        if let Some(member) = match_staff(&staff, &insight.staff_name) {
                            doc.insert("staffId".to_string(), json!(member.id));
                        }
                    },
                },
            )
            .await?;
        report.staff_insights = count;

        let (_, count) = self
            .commit_collection(
                ctx,
                &payload.strategy_notes,
                CollectionPlan {
                    collection: Collection::StrategyNotes,
                    limit: Some(self.recent_limit),
                    key: Fingerprint::strategy_note,
                    stored_key: Fingerprint::strategy_note_from_doc,
                    decorate: |_: &ProposedStrategyNote, _: &mut Map<String, Value>| {},
                },
            )
            .await?;
        report.strategy_notes = count;

        let today = ctx.today;
        let (_, count) = self
            .commit_collection(
                ctx,
                payload.wellbeing.as_slice(),
                CollectionPlan {
                    collection: Collection::WellbeingLogs,
                    limit: Some(self.recent_limit),
                    key: |log: &ProposedWellbeingLog| Fingerprint::wellbeing(log, Some(today)),
                    stored_key: Fingerprint::wellbeing_from_doc,
                    decorate: |_: &ProposedWellbeingLog, doc: &mut Map<String, Value>| {
                        doc.insert("date".to_string(), json!(today.format("%Y-%m-%d").to_string()));
                    },
                },
            )
            .await?;
        report.wellbeing = count;

        self.sync_interactions(ctx, &staff, &tasks, &insights, &mut report)
            .await;

        info!(
            "Commit for {}: {} records added, {} interactions logged, {} secondary failures",
            ctx.account_id,
            report.total_added(),
            report.interactions_logged,
            report.secondary_failures.len()
        );
        Ok(report)
    }

    /// Fingerprint-filter one record type and write the survivors in a
    /// single batch. Returns the items that were written.
    async fn commit_collection<'a, T, K, E, D>(
        &self,
        ctx: &CommitContext,
        items: &'a [T],
        plan: CollectionPlan<K, E, D>,
    ) -> Result<(Vec<&'a T>, TypeCount), CommitError>
    where
        T: Serialize,
        K: Fn(&T) -> Fingerprint,
        E: Fn(&Value) -> Option<Fingerprint>,
        D: Fn(&T, &mut Map<String, Value>),
    {
        let CollectionPlan {
            collection,
            limit,
            key,
            stored_key,
            decorate,
        } = plan;
        if items.is_empty() {
            return Ok((Vec::new(), TypeCount::default()));
        }
        let persist_error = |source| CommitError::Persist {
            collection: collection.name(),
            source,
        };

        let stored = self
            .store
            .recent(&ctx.account_id, collection, limit)
            .await
            .map_err(persist_error)?;
        let mut seen: HashSet<Fingerprint> = stored.iter().filter_map(&stored_key).collect();
        debug!(
            "{} existing {} fingerprints for {}",
            seen.len(),
            collection.name(),
            ctx.account_id
        );

        let mut accepted = Vec::new();
        let mut docs = Vec::new();
        for item in items {
            let fingerprint = key(item);
            if !seen.insert(fingerprint.clone()) {
                continue;
            }
            let Ok(Value::Object(mut doc)) = serde_json::to_value(item) else {
                continue;
            };
            doc.insert("fingerprint".to_string(), json!(fingerprint.as_str()));
            doc.insert("createdBy".to_string(), json!(ctx.user_id));
            doc.insert("source".to_string(), json!(SOURCE_TAG));
            doc.insert("sourceHash".to_string(), json!(ctx.source_hash));
            decorate(item, &mut doc);
            docs.push(Value::Object(doc));
            accepted.push(item);
        }

        let count = TypeCount {
            added: accepted.len(),
            skipped: items.len() - accepted.len(),
        };
        if !docs.is_empty() {
            self.store
                .insert_batch(&ctx.account_id, collection, docs)
                .await
                .map_err(persist_error)?;
        }
        info!(
            "{}: {} added, {} already stored",
            collection.name(),
            count.added,
            count.skipped
        );
        Ok((accepted, count))
    }

    /// Log an interaction against each known staff member named by a newly
    /// written task or insight. Failures are reported, never propagated.
    async fn sync_interactions(
        &self,
        ctx: &CommitContext,
        staff: &[StaffMember],
        tasks: &[&ProposedTask],
        insights: &[&ProposedStaffInsight],
        report: &mut CommitReport,
    ) {
        if staff.is_empty() {
            return;
        }

        let mut entries: Vec<(&StaffMember, Value)> = Vec::new();
        for task in tasks {
            if let Some(member) = match_staff(staff, &task.assignee) {
                entries.push((member, interaction_entry(ctx, "task", &task.title, None)));
            }
        }
        for insight in insights {
            if let Some(member) = match_staff(staff, &insight.staff_name) {
                entries.push((
                    member,
                    interaction_entry(ctx, "insight", &insight.summary, Some(insight.insight_type)),
                ));
            }
        }

        for (member, entry) in entries {
            match self
                .store
                .append_interaction(&ctx.account_id, &member.id, entry)
                .await
            {
                Ok(()) => report.interactions_logged += 1,
                Err(e) => self.secondary_failure(
                    report,
                    format!("could not update interaction log for {}: {}", member.name, e),
                ),
            }
        }
    }

    fn secondary_failure(&self, report: &mut CommitReport, message: String) {
        warn!("Secondary write failed: {}", message);
        self.notifier
            .notify(Notice::warning("Staff log not updated", message.clone()));
        report.secondary_failures.push(message);
    }
}

fn interaction_entry(
    ctx: &CommitContext,
    kind: &str,
    summary: &str,
    sentiment: Option<InsightType>,
) -> Value {
    json!({
        "date": ctx.today.format("%Y-%m-%d").to_string(),
        "type": kind,
        "summary": summary,
        "sentiment": sentiment.unwrap_or_default(),
        "source": SOURCE_TAG,
        "createdBy": ctx.user_id,
    })
}

/// Case-insensitive full name first, then initials ("DM", "D.M.").
pub fn match_staff<'a>(staff: &'a [StaffMember], name: &str) -> Option<&'a StaffMember> {
    let wanted = collapse(name);
    if wanted.is_empty() {
        return None;
    }
    if let Some(member) = staff.iter().find(|m| collapse(&m.name) == wanted) {
        return Some(member);
    }

    let letters: String = wanted
        .chars()
        .filter(|c| !matches!(c, '.' | ' '))
        .collect();
    if letters.chars().count() < 2 || !letters.chars().all(char::is_alphabetic) {
        return None;
    }
    staff.iter().find(|m| initials(&m.name) == letters)
}

fn collapse(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn initials(name: &str) -> String {
    name.split_whitespace()
        .filter_map(|w| w.chars().next())
        .flat_map(char::to_lowercase)
        .collect()
}
