//! Thread API: the durable side of chat.
//!
//! [`ChatService`] owns the store handle. Each call takes the lock, runs one
//! store operation to completion on the blocking pool and releases it, so
//! operations never interleave and appends to a thread are totally ordered.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info};

use ecobites_shared::types::validate_content;
use ecobites_shared::{ChatMessage, ItemId, ItemKind, ItemRef, ThreadId, UserId, ValidationError};
use ecobites_store::{
    Database, ItemRecord, MessageView, Participants, StoreError, Thread, ThreadSummary, UserRecord,
};

use crate::error::ServerError;

/// Validated input for [`ChatService::get_or_create_thread`].
#[derive(Debug, Clone)]
pub struct NewThread {
    pub donor_id: UserId,
    pub requester_id: UserId,
    pub item_id: ItemId,
    /// Variant claimed by the caller; only needed for items the directory
    /// does not know.
    pub item_kind: Option<ItemKind>,
}

impl NewThread {
    pub fn parse(
        donor_id: Option<&str>,
        requester_id: Option<&str>,
        item_id: Option<&str>,
        item_kind: Option<&str>,
    ) -> Result<Self, ValidationError> {
        let donor_id = UserId::require("donorId", donor_id)?;
        let requester_id = UserId::require("requesterId", requester_id)?;
        if donor_id == requester_id {
            return Err(ValidationError::SelfChat);
        }
        let item_id = ItemId::require("itemId", item_id)?;
        let item_kind = item_kind
            .filter(|k| !k.trim().is_empty())
            .map(str::parse::<ItemKind>)
            .transpose()?;

        Ok(Self {
            donor_id,
            requester_id,
            item_id,
            item_kind,
        })
    }
}

/// Result of a durable append.
#[derive(Debug, Clone)]
pub struct Appended {
    pub thread: Thread,
    pub message: ChatMessage,
}

#[derive(Clone)]
pub struct ChatService {
    db: Arc<Mutex<Database>>,
}

impl ChatService {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    /// Run `op` against the database on the blocking pool.
    async fn with_db<T, F>(&self, op: F) -> Result<T, ServerError>
    where
        F: FnOnce(&Database) -> Result<T, ServerError> + Send + 'static,
        T: Send + 'static,
    {
        let guard = self.db.clone().lock_owned().await;
        tokio::task::spawn_blocking(move || op(&guard))
            .await
            .map_err(|e| ServerError::Internal(format!("store task failed: {e}")))?
    }

    /// Fetch the thread for `(donor, requester, item)` or create it. The flag
    /// is `true` when the thread was created by this call.
    pub async fn get_or_create_thread(&self, req: NewThread) -> Result<(Thread, bool), ServerError> {
        if req.donor_id == req.requester_id {
            return Err(ValidationError::SelfChat.into());
        }

        let (thread, created) = self
            .with_db(move |db| {
                let item = resolve_item(db, &req)?;
                Ok(db.get_or_create_thread(&req.donor_id, &req.requester_id, &item, Utc::now())?)
            })
            .await?;

        if created {
            info!(
                thread = %thread.id,
                donor = %thread.donor_id,
                requester = %thread.requester_id,
                item = %thread.item.id(),
                kind = %thread.item.kind(),
                "chat initialized"
            );
        }
        Ok((thread, created))
    }

    /// Durably append a message. `timestamp` defaults to now.
    pub async fn append_message(
        &self,
        thread_id: ThreadId,
        sender_id: UserId,
        content: String,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<Appended, ServerError> {
        validate_content(&content)?;

        let appended = self
            .with_db(move |db| {
                // Stamped under the lock so time order follows seq order.
                let timestamp = timestamp.unwrap_or_else(Utc::now);
                let participants = participants_of(db, thread_id)?;
                if participants.is_self_chat() {
                    return Err(ValidationError::SelfChat.into());
                }
                if !participants.contains(&sender_id) {
                    return Err(ValidationError::NotParticipant(sender_id.to_string()).into());
                }

                let message = db
                    .append_message(thread_id, &sender_id, &content, timestamp)
                    .map_err(|e| thread_error(thread_id, e))?;
                let thread = db.get_thread(thread_id)?;
                Ok(Appended { thread, message })
            })
            .await?;

        debug!(
            thread = %thread_id,
            sender = %appended.message.sender_id,
            seq = appended.message.seq,
            "message appended"
        );
        Ok(appended)
    }

    pub async fn list_threads_for_user(&self, user: UserId) -> Result<Vec<ThreadSummary>, ServerError> {
        self.with_db(move |db| Ok(db.list_threads_for_user(&user)?))
            .await
    }

    pub async fn list_messages(&self, thread_id: ThreadId) -> Result<Vec<ChatMessage>, ServerError> {
        self.with_db(move |db| db.get_messages(thread_id).map_err(|e| thread_error(thread_id, e)))
            .await
    }

    pub async fn list_message_views(
        &self,
        thread_id: ThreadId,
    ) -> Result<Vec<MessageView>, ServerError> {
        self.with_db(move |db| {
            db.get_message_views(thread_id)
                .map_err(|e| thread_error(thread_id, e))
        })
        .await
    }

    pub async fn participants(&self, thread_id: ThreadId) -> Result<Participants, ServerError> {
        self.with_db(move |db| participants_of(db, thread_id))
            .await
    }

    // ------------------------------------------------------------------
    // Directory
    // ------------------------------------------------------------------

    pub async fn upsert_user(&self, id: UserId, username: String) -> Result<UserRecord, ServerError> {
        self.with_db(move |db| Ok(db.upsert_user(&id, &username, Utc::now())?))
            .await
    }

    pub async fn upsert_item(
        &self,
        id: ItemId,
        kind: ItemKind,
        donor_id: UserId,
        title: String,
    ) -> Result<ItemRecord, ServerError> {
        self.with_db(move |db| Ok(db.upsert_item(&id, kind, &donor_id, &title, Utc::now())?))
            .await
    }

    #[cfg(test)]
    pub(crate) async fn raw<T>(&self, op: impl FnOnce(&Database) -> T) -> T {
        let guard = self.db.lock().await;
        op(&guard)
    }
}

fn thread_error(thread_id: ThreadId, e: StoreError) -> ServerError {
    match e {
        StoreError::NotFound => ServerError::ThreadNotFound(thread_id),
        other => ServerError::Storage(other),
    }
}

fn participants_of(db: &Database, thread_id: ThreadId) -> Result<Participants, ServerError> {
    db.get_participants(thread_id)
        .map_err(|e| thread_error(thread_id, e))
}

/// Decide which kind of item a new thread is about.
///
/// A listing known to the directory is authoritative; otherwise the caller
/// must say what kind of item it is.
fn resolve_item(db: &Database, req: &NewThread) -> Result<ItemRef, ServerError> {
    match db.get_item(&req.item_id) {
        Ok(record) => {
            if let Some(requested) = req.item_kind {
                if requested != record.kind {
                    return Err(ValidationError::ItemKindMismatch {
                        item: record.id.to_string(),
                        stored: record.kind.as_str(),
                        requested: requested.as_str(),
                    }
                    .into());
                }
            }
            if record.donor_id != req.donor_id {
                return Err(ValidationError::ItemDonorMismatch {
                    item: record.id.to_string(),
                    donor: req.donor_id.to_string(),
                }
                .into());
            }
            Ok(ItemRef::new(record.kind, record.id))
        }
        Err(StoreError::NotFound) => match req.item_kind {
            Some(kind) => Ok(ItemRef::new(kind, req.item_id.clone())),
            None => Err(ServerError::ItemNotFound(req.item_id.clone())),
        },
        Err(other) => Err(other.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str) -> UserId {
        UserId::parse("userId", id).unwrap()
    }

    fn service() -> ChatService {
        ChatService::new(Database::open_in_memory().unwrap())
    }

    fn new_thread(donor: &str, requester: &str, item: &str) -> NewThread {
        NewThread::parse(Some(donor), Some(requester), Some(item), Some("food")).unwrap()
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let chat = service();
        let (first, created) = chat
            .get_or_create_thread(new_thread("d", "r", "i"))
            .await
            .unwrap();
        assert!(created);

        let (second, created) = chat
            .get_or_create_thread(new_thread("d", "r", "i"))
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn test_parse_rejects_missing_and_self_chat() {
        assert_eq!(
            NewThread::parse(None, Some("r"), Some("i"), None).unwrap_err(),
            ValidationError::MissingField("donorId")
        );
        assert_eq!(
            NewThread::parse(Some("d"), Some(" "), Some("i"), None).unwrap_err(),
            ValidationError::MissingField("requesterId")
        );
        assert_eq!(
            NewThread::parse(Some("u"), Some("u"), Some("i"), None).unwrap_err(),
            ValidationError::SelfChat
        );
        assert!(matches!(
            NewThread::parse(Some("d"), Some("r"), Some("i"), Some("car")).unwrap_err(),
            ValidationError::UnknownItemKind(_)
        ));
    }

    #[tokio::test]
    async fn test_self_chat_rejected_at_creation() {
        let chat = service();
        let req = NewThread {
            donor_id: user("u"),
            requester_id: user("u"),
            item_id: ItemId::parse("itemId", "i").unwrap(),
            item_kind: Some(ItemKind::Food),
        };
        let err = chat.get_or_create_thread(req).await.unwrap_err();
        assert!(matches!(err, ServerError::Validation(ValidationError::SelfChat)));
    }

    #[tokio::test]
    async fn test_item_resolution_uses_directory() {
        let chat = service();
        chat.upsert_item(
            ItemId::parse("itemId", "sofa").unwrap(),
            ItemKind::NonFood,
            user("d"),
            "Sofa".into(),
        )
        .await
        .unwrap();

        let req = NewThread::parse(Some("d"), Some("r"), Some("sofa"), None).unwrap();
        let (thread, _) = chat.get_or_create_thread(req).await.unwrap();
        assert_eq!(thread.item.kind(), ItemKind::NonFood);

        let wrong_kind = NewThread::parse(Some("d"), Some("r"), Some("sofa"), Some("food")).unwrap();
        assert!(matches!(
            chat.get_or_create_thread(wrong_kind).await.unwrap_err(),
            ServerError::Validation(ValidationError::ItemKindMismatch { .. })
        ));

        let wrong_donor = NewThread::parse(Some("x"), Some("r"), Some("sofa"), None).unwrap();
        assert!(matches!(
            chat.get_or_create_thread(wrong_donor).await.unwrap_err(),
            ServerError::Validation(ValidationError::ItemDonorMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_item_without_kind_is_not_found() {
        let chat = service();
        let req = NewThread::parse(Some("d"), Some("r"), Some("ghost"), None).unwrap();
        assert!(matches!(
            chat.get_or_create_thread(req).await.unwrap_err(),
            ServerError::ItemNotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_append_validates_sender_and_content() {
        let chat = service();
        let (thread, _) = chat
            .get_or_create_thread(new_thread("d", "r", "i"))
            .await
            .unwrap();

        let err = chat
            .append_message(thread.id, user("stranger"), "hi".into(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Validation(ValidationError::NotParticipant(_))));

        let err = chat
            .append_message(thread.id, user("r"), "   ".into(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Validation(ValidationError::EmptyContent)));

        let err = chat
            .append_message(ThreadId::new(), user("r"), "hi".into(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::ThreadNotFound(_)));
    }

    #[tokio::test]
    async fn test_append_returns_updated_thread() {
        let chat = service();
        let (thread, _) = chat
            .get_or_create_thread(new_thread("d", "r", "i"))
            .await
            .unwrap();

        let appended = chat
            .append_message(thread.id, user("r"), "Is this available?".into(), None)
            .await
            .unwrap();
        assert_eq!(appended.message.seq, 0);
        assert_eq!(appended.thread.messages, vec![appended.message.clone()]);
        assert_eq!(appended.thread.last_message_at, appended.message.timestamp);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_are_totally_ordered() {
        let chat = service();
        let (thread, _) = chat
            .get_or_create_thread(new_thread("d", "r", "i"))
            .await
            .unwrap();

        let mut tasks = Vec::new();
        for sender in ["d", "r"] {
            let chat = chat.clone();
            tasks.push(tokio::spawn(async move {
                for n in 0..20 {
                    chat.append_message(thread.id, user(sender), format!("{sender}-{n}"), None)
                        .await
                        .unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let log = chat.list_messages(thread.id).await.unwrap();
        assert_eq!(log.len(), 40);
        let seqs: Vec<u32> = log.iter().map(|m| m.seq).collect();
        assert_eq!(seqs, (0..40).collect::<Vec<u32>>());

        // Each caller's messages keep the order that caller sent them in.
        for sender in ["d", "r"] {
            let own: Vec<String> = log
                .iter()
                .filter(|m| m.sender_id == user(sender))
                .map(|m| m.content.clone())
                .collect();
            let expected: Vec<String> = (0..20).map(|n| format!("{sender}-{n}")).collect();
            assert_eq!(own, expected);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_server_timestamps_follow_seq() {
        let chat = service();
        let (thread, _) = chat
            .get_or_create_thread(new_thread("d", "r", "i"))
            .await
            .unwrap();

        let mut tasks = Vec::new();
        for n in 0..16 {
            let chat = chat.clone();
            let sender = if n % 2 == 0 { "d" } else { "r" };
            tasks.push(tokio::spawn(async move {
                for i in 0..50 {
                    chat.append_message(thread.id, user(sender), format!("{n}-{i}"), None)
                        .await
                        .unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let log = chat.list_messages(thread.id).await.unwrap();
        assert_eq!(log.len(), 800);
        for pair in log.windows(2) {
            assert!(
                pair[0].timestamp <= pair[1].timestamp,
                "seq {} at {} is later than seq {} at {}",
                pair[0].seq,
                pair[0].timestamp,
                pair[1].seq,
                pair[1].timestamp
            );
        }
    }
}
