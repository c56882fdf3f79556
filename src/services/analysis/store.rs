//! Store Contracts
//!
//! The queue and conversation stores the analysis pipeline depends on, plus
//! their SQLite implementations on `Database`. All queue mutation goes
//! through `QueueStore`.

use async_trait::async_trait;
use chronicle_core::{Conversation, ConversationMessage, QueueItem, ScanScope};

use crate::storage::database::Database;
use crate::utils::error::AppResult;

/// Durable queue of analysis work items
#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn insert(&self, item: &QueueItem) -> AppResult<()>;

    /// Atomically move up to `count` pending items to `claimed` for `owner`,
    /// highest priority first, ties by creation order.
    async fn claim_pending(&self, count: usize, owner: &str) -> AppResult<Vec<QueueItem>>;

    /// `claimed -> completed`. Returns false when the item was not claimed.
    async fn mark_completed(
        &self,
        id: &str,
        result_payload: &str,
        backend: &str,
        model: Option<&str>,
    ) -> AppResult<bool>;

    /// `claimed -> failed`. Returns false when the item was not claimed.
    async fn mark_failed(&self, id: &str, reason: &str) -> AppResult<bool>;

    async fn fetch_pending(&self) -> AppResult<Vec<QueueItem>>;

    async fn pending_count(&self) -> AppResult<usize>;

    async fn get(&self, id: &str) -> AppResult<Option<QueueItem>>;

    /// Fail items left claimed by any owner other than `current_owner`
    async fn fail_orphaned_claims(&self, current_owner: &str, reason: &str) -> AppResult<usize>;
}

/// Read access to imported conversations
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn fetch(&self, subject_id: &str) -> AppResult<Option<Conversation>>;

    async fn fetch_messages(&self, subject_id: &str) -> AppResult<Vec<ConversationMessage>>;

    /// Conversation ids inside `scope`, most recently updated first
    async fn list_subjects(&self, scope: &ScanScope) -> AppResult<Vec<String>>;
}

#[async_trait]
impl QueueStore for Database {
    async fn insert(&self, item: &QueueItem) -> AppResult<()> {
        self.insert_queue_item(item)
    }

    async fn claim_pending(&self, count: usize, owner: &str) -> AppResult<Vec<QueueItem>> {
        self.claim_queue_items(count, owner)
    }

    async fn mark_completed(
        &self,
        id: &str,
        result_payload: &str,
        backend: &str,
        model: Option<&str>,
    ) -> AppResult<bool> {
        self.complete_queue_item(id, result_payload, backend, model)
    }

    async fn mark_failed(&self, id: &str, reason: &str) -> AppResult<bool> {
        self.fail_queue_item(id, reason)
    }

    async fn fetch_pending(&self) -> AppResult<Vec<QueueItem>> {
        self.get_pending_queue_items()
    }

    async fn pending_count(&self) -> AppResult<usize> {
        self.count_pending_queue_items()
    }

    async fn get(&self, id: &str) -> AppResult<Option<QueueItem>> {
        self.get_queue_item(id)
    }

    async fn fail_orphaned_claims(&self, current_owner: &str, reason: &str) -> AppResult<usize> {
        self.fail_orphaned_queue_items(current_owner, reason)
    }
}

#[async_trait]
impl ConversationStore for Database {
    async fn fetch(&self, subject_id: &str) -> AppResult<Option<Conversation>> {
        self.get_conversation(subject_id)
    }

    async fn fetch_messages(&self, subject_id: &str) -> AppResult<Vec<ConversationMessage>> {
        self.get_messages(subject_id)
    }

    async fn list_subjects(&self, scope: &ScanScope) -> AppResult<Vec<String>> {
        Ok(self
            .list_conversations()?
            .into_iter()
            .filter(|c| scope.matches(c))
            .map(|c| c.id)
            .collect())
    }
}
