//! Document persistence.
//!
//! [`DocumentStore`] is the only persistence surface the commit gate sees.
//! [`SupabaseStore`] keeps one JSON document per row (PostgREST over
//! Postgres); calendar events live in an array on the account's `contexts`
//! row. [`MemoryStore`] backs local runs and tests.

use crate::error::StoreError;
use chrono::Utc;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Tasks,
    WellbeingLogs,
    StaffInsights,
    StrategyNotes,
    CalendarEvents,
}

impl Collection {
    pub fn name(self) -> &'static str {
        match self {
            Self::Tasks => "tasks",
            Self::WellbeingLogs => "wellbeingLogs",
            Self::StaffInsights => "staffInsights",
            Self::StrategyNotes => "strategyNotes",
            Self::CalendarEvents => "calendarEvents",
        }
    }

    fn table(self) -> &'static str {
        match self {
            Self::Tasks => "tasks",
            Self::WellbeingLogs => "wellbeing_logs",
            Self::StaffInsights => "staff_insights",
            Self::StrategyNotes => "strategy_notes",
            Self::CalendarEvents => "contexts",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffMember {
    pub id: String,
    pub name: String,
}

#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    /// Newest first. `limit = None` reads the whole collection.
    async fn recent(
        &self,
        account: &str,
        collection: Collection,
        limit: Option<usize>,
    ) -> Result<Vec<Value>, StoreError>;

    /// Write every document in one request. The store stamps `createdAt`.
    async fn insert_batch(
        &self,
        account: &str,
        collection: Collection,
        docs: Vec<Value>,
    ) -> Result<(), StoreError>;

    async fn staff(&self, account: &str) -> Result<Vec<StaffMember>, StoreError>;

    async fn append_interaction(
        &self,
        account: &str,
        staff_id: &str,
        entry: Value,
    ) -> Result<(), StoreError>;
}

fn stamp(mut doc: Value, created_at: &str) -> Value {
    if let Value::Object(map) = &mut doc {
        map.insert("createdAt".to_string(), Value::String(created_at.to_string()));
    }
    doc
}

// ============================================================================
// Supabase
// ============================================================================

#[derive(Clone)]
pub struct SupabaseStore {
    client: Client,
    base_url: String,
    service_role_key: String,
}

impl SupabaseStore {
    pub fn new(base_url: impl Into<String>, service_role_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            service_role_key: service_role_key.into(),
        }
    }

    fn url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.service_role_key)
            .header("Authorization", format!("Bearer {}", self.service_role_key))
    }

    async fn get_rows<T: serde::de::DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, StoreError> {
        let resp = self
            .authed(self.client.get(self.url(table)))
            .query(query)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::Status { status, body });
        }
        resp.json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))
    }

    async fn post_rows(&self, table: &str, rows: &Value, prefer: &str) -> Result<(), StoreError> {
        let resp = self
            .authed(self.client.post(self.url(table)))
            .header("Content-Type", "application/json")
            .header("Prefer", prefer)
            .json(rows)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::Status { status, body });
        }
        Ok(())
    }

    async fn calendar_events(&self, account: &str) -> Result<Vec<Value>, StoreError> {
        let rows: Vec<ContextRow> = self
            .get_rows(
                Collection::CalendarEvents.table(),
                &[
                    ("account_id", format!("eq.{}", account)),
                    ("select", "calendar_events".to_string()),
                ],
            )
            .await?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|r| r.calendar_events)
            .unwrap_or_default())
    }
}

#[async_trait::async_trait]
impl DocumentStore for SupabaseStore {
    async fn recent(
        &self,
        account: &str,
        collection: Collection,
        limit: Option<usize>,
    ) -> Result<Vec<Value>, StoreError> {
        if collection == Collection::CalendarEvents {
            let events = self.calendar_events(account).await?;
            let take = limit.unwrap_or(events.len());
            return Ok(events.into_iter().rev().take(take).collect());
        }

        let mut query = vec![
            ("account_id", format!("eq.{}", account)),
            ("select", "data,created_at".to_string()),
            ("order", "created_at.desc".to_string()),
        ];
        if let Some(limit) = limit {
            query.push(("limit", limit.to_string()));
        }

        let rows: Vec<DocumentRow> = self.get_rows(collection.table(), &query).await?;
        debug!(
            "Fetched {} {} documents for {}",
            rows.len(),
            collection.name(),
            account
        );
        Ok(rows
            .into_iter()
            .map(|r| match r.created_at {
                Some(ts) => stamp(r.data, &ts),
                None => r.data,
            })
            .collect())
    }

    async fn insert_batch(
        &self,
        account: &str,
        collection: Collection,
        docs: Vec<Value>,
    ) -> Result<(), StoreError> {
        if docs.is_empty() {
            return Ok(());
        }
        let count = docs.len();

        if collection == Collection::CalendarEvents {
            let now = Utc::now().to_rfc3339();
            let mut events = self.calendar_events(account).await?;
            events.extend(docs.into_iter().map(|d| stamp(d, &now)));
            let row = json!([{ "account_id": account, "calendar_events": events }]);
            self.post_rows(
                &format!("{}?on_conflict=account_id", collection.table()),
                &row,
                "resolution=merge-duplicates,return=minimal",
            )
            .await?;
        } else {
            // created_at comes from the column default.
            let rows: Vec<Value> = docs
                .into_iter()
                .map(|data| json!({ "account_id": account, "data": data }))
                .collect();
            self.post_rows(collection.table(), &Value::Array(rows), "return=minimal")
                .await?;
        }

        info!("Inserted {} {} documents for {}", count, collection.name(), account);
        Ok(())
    }

    async fn staff(&self, account: &str) -> Result<Vec<StaffMember>, StoreError> {
        self.get_rows(
            "staff",
            &[
                ("account_id", format!("eq.{}", account)),
                ("select", "id,name".to_string()),
            ],
        )
        .await
    }

    async fn append_interaction(
        &self,
        account: &str,
        staff_id: &str,
        entry: Value,
    ) -> Result<(), StoreError> {
        let row = json!([{ "account_id": account, "staff_id": staff_id, "data": entry }]);
        self.post_rows("staff_interactions", &row, "return=minimal")
            .await
    }
}

#[derive(Debug, Deserialize)]
struct DocumentRow {
    data: Value,
    #[serde(default)]
    created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContextRow {
    #[serde(default)]
    calendar_events: Option<Vec<Value>>,
}

// ============================================================================
// In-memory
// ============================================================================

#[derive(Debug, Default)]
struct MemoryInner {
    documents: HashMap<(String, Collection), Vec<Value>>,
    staff: HashMap<String, Vec<StaffMember>>,
    interactions: HashMap<(String, String), Vec<Value>>,
}

/// Process-local store with the same semantics as the hosted one.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<MemoryInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_staff(&self, account: &str, member: StaffMember) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .staff
            .entry(account.to_string())
            .or_default()
            .push(member);
    }

    #[cfg(test)]
    pub fn documents(&self, account: &str, collection: Collection) -> Vec<Value> {
        self.inner
            .read()
            .unwrap()
            .documents
            .get(&(account.to_string(), collection))
            .cloned()
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub fn interactions(&self, account: &str, staff_id: &str) -> Vec<Value> {
        self.inner
            .read()
            .unwrap()
            .interactions
            .get(&(account.to_string(), staff_id.to_string()))
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl DocumentStore for MemoryStore {
    async fn recent(
        &self,
        account: &str,
        collection: Collection,
        limit: Option<usize>,
    ) -> Result<Vec<Value>, StoreError> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let docs = inner
            .documents
            .get(&(account.to_string(), collection))
            .map(Vec::as_slice)
            .unwrap_or_default();
        let take = limit.unwrap_or(docs.len());
        Ok(docs.iter().rev().take(take).cloned().collect())
    }

    async fn insert_batch(
        &self,
        account: &str,
        collection: Collection,
        docs: Vec<Value>,
    ) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner
            .documents
            .entry((account.to_string(), collection))
            .or_default()
            .extend(docs.into_iter().map(|d| stamp(d, &now)));
        Ok(())
    }

    async fn staff(&self, account: &str) -> Result<Vec<StaffMember>, StoreError> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Ok(inner.staff.get(account).cloned().unwrap_or_default())
    }

    async fn append_interaction(
        &self,
        account: &str,
        staff_id: &str,
        entry: Value,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner
            .interactions
            .entry((account.to_string(), staff_id.to_string()))
            .or_default()
            .push(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_recent_is_newest_first_and_bounded() {
        let store = MemoryStore::new();
        store
            .insert_batch(
                "acc",
                Collection::StrategyNotes,
                vec![json!({"n": 1}), json!({"n": 2}), json!({"n": 3})],
            )
            .await
            .unwrap();

        let recent = store
            .recent("acc", Collection::StrategyNotes, Some(2))
            .await
            .unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0]["n"], 3);
        assert!(recent[0]["createdAt"].is_string());

        let all = store.recent("acc", Collection::StrategyNotes, None).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_memory_accounts_are_isolated() {
        let store = MemoryStore::new();
        store
            .insert_batch("a", Collection::Tasks, vec![json!({"title": "x"})])
            .await
            .unwrap();
        assert!(store.recent("b", Collection::Tasks, None).await.unwrap().is_empty());
        assert_eq!(store.documents("a", Collection::Tasks).len(), 1);
    }

    #[tokio::test]
    async fn test_memory_staff_and_interactions() {
        let store = MemoryStore::new();
        store.add_staff(
            "acc",
            StaffMember {
                id: "s1".into(),
                name: "Dave Martin".into(),
            },
        );
        assert_eq!(store.staff("acc").await.unwrap().len(), 1);

        store
            .append_interaction("acc", "s1", json!({"summary": "hi"}))
            .await
            .unwrap();
        assert_eq!(store.interactions("acc", "s1").len(), 1);
    }

    #[test]
    fn test_collection_tables() {
        assert_eq!(Collection::WellbeingLogs.table(), "wellbeing_logs");
        assert_eq!(Collection::CalendarEvents.table(), "contexts");
        assert_eq!(Collection::StaffInsights.name(), "staffInsights");
    }
}
