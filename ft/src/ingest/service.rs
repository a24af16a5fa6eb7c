//! Task Ingest Service
//!
//! Orchestrates one natural-language submission: validate, extract, resolve
//! the due date, persist. Also owns the manual and housekeeping operations
//! on a family's task list.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, info, warn};

use crate::dates::DateResolver;
use crate::domain::{ManualTask, Member, RequestContext, Task, TaskSource};
use crate::error::{Error, Result};
use crate::extract::{Extractor, TaskCandidate};
use crate::state::{StateEvent, TaskStore};

/// A full task list for one family, sent on every change
pub type Snapshot = Result<Vec<Task>>;

pub struct IngestService {
    extractor: Extractor,
    resolver: DateResolver,
    store: Arc<dyn TaskStore>,
}

impl IngestService {
    pub fn new(extractor: Extractor, resolver: DateResolver, store: Arc<dyn TaskStore>) -> Self {
        Self {
            extractor,
            resolver,
            store,
        }
    }

    /// Turn free text into a stored task, relative to the current time
    pub async fn ingest(&self, ctx: &RequestContext, text: &str) -> Result<Task> {
        self.ingest_at(ctx, text, Utc::now()).await
    }

    /// Turn free text into a stored task, resolving dates against `now`
    pub async fn ingest_at(&self, ctx: &RequestContext, text: &str, now: DateTime<Utc>) -> Result<Task> {
        debug!(group_key = %ctx.group_key, text_len = text.len(), %now, "ingest_at: called");
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::InvalidRequest("text is required".to_string()));
        }

        let TaskCandidate {
            title,
            participants,
            due_date_text,
        } = self.extractor.extract(text).await.inspect_err(|e| {
            warn!(group_key = %ctx.group_key, error = %e, "ingest_at: extraction failed");
        })?;

        let mut task = Task::new(title, &ctx.group_key, TaskSource::Ai, now).with_participants(participants);
        if let Some(ref phrase) = due_date_text {
            match self.resolver.resolve(phrase, now) {
                Some(resolved) => task = task.with_due(resolved.instant),
                None => info!(%phrase, "ingest_at: due date not resolved, keeping the raw phrase"),
            }
        }
        let task = task.with_due_text(due_date_text);

        let stored = self.store.create_task(task).await.map_err(|e| {
            error!(group_key = %ctx.group_key, error = %e, "ingest_at: failed to store task");
            Error::Storage(e.to_string())
        })?;
        info!(id = %stored.id, group_key = %stored.group_key, due = ?stored.due_iso, "Task ingested");
        Ok(stored)
    }

    /// Store a task entered by hand
    pub async fn create_manual(&self, ctx: &RequestContext, input: ManualTask) -> Result<Task> {
        debug!(group_key = %ctx.group_key, title = %input.title, "create_manual: called");
        let title = input.title.trim();
        if title.is_empty() {
            return Err(Error::InvalidRequest("title is required".to_string()));
        }

        let mut task = Task::new(title, &ctx.group_key, TaskSource::Manual, Utc::now())
            .with_participants(input.participants.into_names());
        if let Some(due) = input.due.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
            let instant = self
                .resolver
                .parse_datetime(due)
                .ok_or_else(|| Error::InvalidRequest(format!("invalid due date-time: '{}'", due)))?;
            task = task.with_due(instant);
        }

        let stored = self.store.create_task(task).await.map_err(|e| {
            error!(group_key = %ctx.group_key, error = %e, "create_manual: failed to store task");
            Error::Storage(e.to_string())
        })?;
        info!(id = %stored.id, group_key = %stored.group_key, "Manual task created");
        Ok(stored)
    }

    /// Current tasks of the caller's family, oldest first
    pub async fn list(&self, ctx: &RequestContext) -> Result<Vec<Task>> {
        debug!(group_key = %ctx.group_key, "list: called");
        snapshot(self.store.as_ref(), &ctx.group_key).await
    }

    /// Live task list: one snapshot now, then one after every change to the family
    ///
    /// The stream ends only if the store goes away; a subscriber that falls
    /// behind gets a fresh snapshot rather than the missed events.
    pub fn subscribe(&self, ctx: &RequestContext) -> BoxStream<'static, Snapshot> {
        debug!(group_key = %ctx.group_key, "subscribe: called");
        // Subscribe before the first list so no change slips in between
        let feed = Feed {
            store: Arc::clone(&self.store),
            events: self.store.subscribe(),
            group_key: ctx.group_key.clone(),
            primed: false,
        };

        stream::unfold(feed, |mut feed| async move {
            if feed.primed {
                feed.next_change().await?;
            }
            feed.primed = true;
            let tasks = snapshot(feed.store.as_ref(), &feed.group_key).await;
            Some((tasks, feed))
        })
        .boxed()
    }

    /// Mark a task done; done tasks are removed
    pub async fn complete(&self, ctx: &RequestContext, id: &str) -> Result<Task> {
        debug!(group_key = %ctx.group_key, %id, "complete: called");
        let task = self.remove(ctx, id).await?;
        info!(%id, group_key = %ctx.group_key, title = %task.title, "Task completed");
        Ok(task)
    }

    /// Delete a task
    pub async fn delete(&self, ctx: &RequestContext, id: &str) -> Result<Task> {
        debug!(group_key = %ctx.group_key, %id, "delete: called");
        let task = self.remove(ctx, id).await?;
        info!(%id, group_key = %ctx.group_key, "Task deleted");
        Ok(task)
    }

    async fn remove(&self, ctx: &RequestContext, id: &str) -> Result<Task> {
        let task = self
            .store
            .get_task(id)
            .await
            .map_err(|e| Error::Storage(e.to_string()))?
            // Another family's task is reported exactly like a missing one
            .filter(|task| task.group_key == ctx.group_key)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        self.store
            .delete_task(&task.id)
            .await
            .map_err(|e| Error::Storage(e.to_string()))?
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Build a request context from an explicit family or the user's membership
    pub async fn resolve_context(&self, family: Option<&str>, user_id: Option<&str>) -> Result<RequestContext> {
        debug!(?family, ?user_id, "resolve_context: called");
        let user_id = user_id.map(str::trim).filter(|u| !u.is_empty());

        if let Some(family) = family.map(str::trim).filter(|f| !f.is_empty()) {
            let ctx = RequestContext::for_family(family)?;
            return Ok(match user_id {
                Some(user) => ctx.with_user(user),
                None => ctx,
            });
        }

        let Some(user) = user_id else {
            return Err(Error::InvalidRequest("family is required".to_string()));
        };
        let member = self
            .store
            .get_member(user)
            .await
            .map_err(|e| Error::Storage(e.to_string()))?
            .ok_or_else(|| Error::InvalidRequest(format!("user '{}' does not belong to a family", user)))?;
        Ok(RequestContext::for_family(&member.group_key)?.with_user(user))
    }

    /// Record that a user belongs to a family
    pub async fn join(&self, user_id: &str, family: &str) -> Result<Member> {
        debug!(%user_id, %family, "join: called");
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(Error::InvalidRequest("user id is required".to_string()));
        }
        let ctx = RequestContext::for_family(family)?;
        let member = Member::new(user_id, ctx.group_key);
        self.store
            .set_member(member.clone())
            .await
            .map_err(|e| Error::Storage(e.to_string()))?;
        info!(%user_id, group_key = %member.group_key, "Member joined family");
        Ok(member)
    }
}

async fn snapshot(store: &dyn TaskStore, group_key: &str) -> Snapshot {
    let mut tasks = store
        .list_tasks(group_key)
        .await
        .map_err(|e| Error::Storage(e.to_string()))?;
    tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    Ok(tasks)
}

/// Subscription state carried between snapshots
struct Feed {
    store: Arc<dyn TaskStore>,
    events: broadcast::Receiver<StateEvent>,
    group_key: String,
    primed: bool,
}

impl Feed {
    /// Wait for the next change to this family; `None` once the store is gone
    async fn next_change(&mut self) -> Option<()> {
        loop {
            match self.events.recv().await {
                Ok(event) if event.group_key() == self.group_key => return Some(()),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    debug!(%skipped, group_key = %self.group_key, "next_change: lagged, re-listing");
                    return Some(());
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::mock::{MockLlmClient, MockReply};
    use crate::prompts::PromptLoader;
    use crate::state::fake::FakeTaskStore;
    use chrono::TimeZone;
    use proptest::prelude::*;

    /// Wednesday 2024-05-15, 10:00 UTC
    fn wednesday() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 15, 10, 0, 0).unwrap()
    }

    fn ctx() -> RequestContext {
        RequestContext::for_family("smiths").unwrap()
    }

    fn service(replies: Vec<MockReply>) -> (IngestService, Arc<MockLlmClient>, Arc<FakeTaskStore>) {
        service_with_store(replies, FakeTaskStore::new())
    }

    fn service_with_store(
        replies: Vec<MockReply>,
        store: FakeTaskStore,
    ) -> (IngestService, Arc<MockLlmClient>, Arc<FakeTaskStore>) {
        let llm = Arc::new(MockLlmClient::new(replies));
        let store = Arc::new(store);
        let extractor = Extractor::new(llm.clone(), PromptLoader::embedded_only());
        let service = IngestService::new(extractor, DateResolver::default(), store.clone());
        (service, llm, store)
    }

    #[tokio::test]
    async fn test_lunch_with_mara() {
        let (service, llm, store) = service(vec![MockReply::content(
            r#"{"title":"Lunch with Mara","participants":["Mara"],"due_date_text":"next Friday at noon"}"#,
        )]);

        let task = service
            .ingest_at(&ctx(), "Lunch with Mara next Friday at noon", wednesday())
            .await
            .unwrap();

        assert!(!task.id.is_empty());
        assert_eq!(task.title, "Lunch with Mara");
        assert_eq!(task.participants, vec!["Mara".to_string()]);
        assert_eq!(task.source, TaskSource::Ai);
        assert_eq!(task.group_key, "smiths");
        assert_eq!(task.due_iso.as_deref(), Some("2024-05-24T12:00:00.000Z"));
        assert!(task.due_instant.is_some_and(|due| due > wednesday()));
        assert_eq!(task.due_text_raw.as_deref(), Some("next Friday at noon"));
        assert_eq!(task.created_at, wednesday());
        assert_eq!(llm.call_count(), 1);
        assert_eq!(store.create_calls(), 1);
    }

    #[tokio::test]
    async fn test_empty_text_makes_no_llm_call() {
        let (service, llm, store) = service(vec![]);

        for text in ["", "   ", "\n\t"] {
            let err = service.ingest_at(&ctx(), text, wednesday()).await.unwrap_err();
            assert!(matches!(err, Error::InvalidRequest(_)));
        }
        assert_eq!(llm.call_count(), 0);
        assert_eq!(store.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_provider_failure_creates_nothing() {
        let (service, llm, store) = service(vec![MockReply::ApiError {
            status: 503,
            message: "over capacity".to_string(),
        }]);

        let err = service.ingest_at(&ctx(), "Buy milk", wednesday()).await.unwrap_err();
        assert!(matches!(err, Error::ExtractionService { status: Some(503), .. }));
        assert_eq!(llm.call_count(), 1);
        assert_eq!(store.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_null_due_date_text() {
        let (service, _, _) = service(vec![MockReply::content(
            r#"{"title":"Water plants","participants":[],"due_date_text":null}"#,
        )]);

        let task = service.ingest_at(&ctx(), "Water plants", wednesday()).await.unwrap();
        assert!(task.due_instant.is_none());
        assert!(task.due_iso.is_none());
        assert!(task.due_text_raw.is_none());
    }

    #[tokio::test]
    async fn test_unparseable_phrase_is_kept() {
        let (service, _, store) = service(vec![MockReply::content(
            r#"{"title":"Fix the fence","participants":["Dad"],"due_date_text":"the day after never"}"#,
        )]);

        let task = service
            .ingest_at(&ctx(), "Dad fixes the fence the day after never", wednesday())
            .await
            .unwrap();
        assert!(task.due_instant.is_none());
        assert!(task.due_iso.is_none());
        assert_eq!(task.due_text_raw.as_deref(), Some("the day after never"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_model_output() {
        let (service, _, store) = service(vec![MockReply::content(r#"{"title":"   "}"#)]);
        let err = service.ingest_at(&ctx(), "hmm", wednesday()).await.unwrap_err();
        assert!(matches!(err, Error::ExtractionValidation(_)));
        assert_eq!(store.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_storage_failure() {
        let (service, _, store) = service_with_store(
            vec![MockReply::content(r#"{"title":"Buy milk"}"#)],
            FakeTaskStore::failing(),
        );
        let err = service.ingest_at(&ctx(), "Buy milk", wednesday()).await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert_eq!(store.create_calls(), 1);
    }

    #[tokio::test]
    async fn test_round_trip_through_store() {
        let (service, _, _) = service(vec![MockReply::content(
            r#"{"title":"Dentist","participants":["Ivy"],"due_date_text":"Tuesday"}"#,
        )]);
        let stored = service.ingest_at(&ctx(), "Ivy dentist Tuesday", wednesday()).await.unwrap();

        let listed = service.list(&ctx()).await.unwrap();
        assert_eq!(listed, vec![stored.clone()]);
        // Tuesday seen from a Wednesday is six days out
        assert_eq!(stored.due_iso.as_deref(), Some("2024-05-21T12:00:00.000Z"));
    }

    #[tokio::test]
    async fn test_create_manual() {
        let (service, llm, _) = service(vec![]);
        let task = service
            .create_manual(
                &ctx(),
                ManualTask {
                    title: "  Take out recycling ".to_string(),
                    participants: crate::domain::Participants::Text("Kid, ".to_string()),
                    due: Some("2024-05-16T19:00:00Z".to_string()),
                },
            )
            .await
            .unwrap();

        assert_eq!(task.title, "Take out recycling");
        assert_eq!(task.participants, vec!["Kid".to_string()]);
        assert_eq!(task.source, TaskSource::Manual);
        assert_eq!(task.due_iso.as_deref(), Some("2024-05-16T19:00:00.000Z"));
        assert!(task.due_text_raw.is_none());
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_create_manual_rejects_bad_input() {
        let (service, _, store) = service(vec![]);

        let err = service.create_manual(&ctx(), ManualTask::default()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));

        let err = service
            .create_manual(
                &ctx(),
                ManualTask {
                    title: "Vet".to_string(),
                    due: Some("soonish".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(ref m) if m.contains("soonish")));
        assert_eq!(store.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_complete_and_delete() {
        let (service, _, store) = service(vec![]);
        let a = service
            .create_manual(&ctx(), ManualTask { title: "A".to_string(), ..Default::default() })
            .await
            .unwrap();
        let b = service
            .create_manual(&ctx(), ManualTask { title: "B".to_string(), ..Default::default() })
            .await
            .unwrap();

        assert_eq!(service.complete(&ctx(), &a.id).await.unwrap().id, a.id);
        assert_eq!(service.delete(&ctx(), &b.id).await.unwrap().id, b.id);
        assert_eq!(store.len(), 0);

        // Already gone
        assert!(matches!(service.delete(&ctx(), &a.id).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_other_family_task_is_not_found() {
        let (service, _, store) = service(vec![]);
        let theirs = RequestContext::for_family("joneses").unwrap();
        let task = service
            .create_manual(&theirs, ManualTask { title: "Mow".to_string(), ..Default::default() })
            .await
            .unwrap();

        assert!(matches!(service.complete(&ctx(), &task.id).await, Err(Error::NotFound(_))));
        assert!(service.list(&ctx()).await.unwrap().is_empty());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_subscribe_snapshots() {
        let (service, _, _) = service(vec![]);
        let mut feed = service.subscribe(&ctx());

        // Immediate snapshot
        assert!(feed.next().await.unwrap().unwrap().is_empty());

        // Another family's change does not wake us; ours does
        let theirs = RequestContext::for_family("joneses").unwrap();
        service
            .create_manual(&theirs, ManualTask { title: "Mow".to_string(), ..Default::default() })
            .await
            .unwrap();
        let ours = service
            .create_manual(&ctx(), ManualTask { title: "Vet".to_string(), ..Default::default() })
            .await
            .unwrap();

        let tasks = feed.next().await.unwrap().unwrap();
        assert_eq!(tasks, vec![ours.clone()]);

        service.delete(&ctx(), &ours.id).await.unwrap();
        assert!(feed.next().await.unwrap().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_context() {
        let (service, _, _) = service(vec![]);

        let ctx = service.resolve_context(Some(" smiths "), None).await.unwrap();
        assert_eq!(ctx.group_key, "smiths");
        assert!(ctx.user_id.is_none());

        assert!(matches!(
            service.resolve_context(None, Some("uid-1")).await,
            Err(Error::InvalidRequest(_))
        ));

        service.join("uid-1", "smiths").await.unwrap();
        let ctx = service.resolve_context(None, Some("uid-1")).await.unwrap();
        assert_eq!(ctx.group_key, "smiths");
        assert_eq!(ctx.user_id.as_deref(), Some("uid-1"));

        // Explicit family wins over membership
        let ctx = service.resolve_context(Some("joneses"), Some("uid-1")).await.unwrap();
        assert_eq!(ctx.group_key, "joneses");

        assert!(matches!(service.resolve_context(Some(""), None).await, Err(Error::InvalidRequest(_))));
    }

    proptest! {
        /// Whatever title the model returns, a stored task never has an empty one
        #[test]
        fn ingest_never_stores_empty_title(title in "\\PC{0,40}", pad in "[ \t]{0,3}") {
            let content = serde_json::json!({ "title": format!("{}{}{}", pad, title, pad) }).to_string();
            let (service, _, store) = service(vec![MockReply::content(content)]);

            let rt = tokio::runtime::Runtime::new().unwrap();
            let result = rt.block_on(service.ingest_at(&ctx(), "something to do", wednesday()));

            match result {
                Ok(task) => {
                    prop_assert!(!task.title.trim().is_empty());
                    prop_assert_eq!(task.title.as_str(), title.trim());
                }
                Err(e) => {
                    prop_assert!(title.trim().is_empty());
                    prop_assert!(matches!(e, Error::ExtractionValidation(_)));
                    prop_assert_eq!(store.create_calls(), 0);
                }
            }
        }
    }
}
