//! Delivery: durable append first, then a best-effort push to the other
//! participant if they are online.

use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use ecobites_shared::protocol::ServerPush;
use ecobites_shared::{ChatMessage, ThreadId, UserId};

use crate::chat::{Appended, ChatService};
use crate::error::ServerError;
use crate::presence::PresenceRegistry;

/// What happened to the push of one appended message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Queued on the recipient's live connection.
    Delivered,
    /// Recipient has no live connection; they will see it on their next fetch.
    Offline,
    /// No recipient: self-chat or a sender outside the thread.
    Skipped,
    /// Recipient's connection is closing or its queue is full.
    Dropped,
}

#[derive(Clone)]
pub struct DeliveryRouter {
    chat: ChatService,
    presence: PresenceRegistry,
}

impl DeliveryRouter {
    pub fn new(chat: ChatService, presence: PresenceRegistry) -> Self {
        Self { chat, presence }
    }

    /// Append `content` to the thread and push it to the counterpart.
    ///
    /// Errors only when the append fails, in which case nothing is pushed.
    /// Push failures never surface to the sender.
    pub async fn send(
        &self,
        thread_id: ThreadId,
        sender_id: UserId,
        content: String,
    ) -> Result<Appended, ServerError> {
        let appended = self
            .chat
            .append_message(thread_id, sender_id, content, None)
            .await?;

        let participants = appended.thread.participants();
        let recipient = participants.counterpart(&appended.message.sender_id);
        let outcome = self.route(thread_id, &appended.message, recipient);
        debug!(thread = %thread_id, seq = appended.message.seq, ?outcome, "message routed");

        Ok(appended)
    }

    fn route(
        &self,
        thread_id: ThreadId,
        message: &ChatMessage,
        recipient: Option<&UserId>,
    ) -> DeliveryOutcome {
        let Some(recipient) = recipient else {
            return DeliveryOutcome::Skipped;
        };
        if *recipient == message.sender_id {
            return DeliveryOutcome::Skipped;
        }
        let Some(handle) = self.presence.lookup(recipient) else {
            return DeliveryOutcome::Offline;
        };

        match handle.push(ServerPush::new_message(thread_id, message.clone())) {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(TrySendError::Full(_)) => {
                debug!(
                    recipient = %recipient,
                    connection = %handle.id(),
                    "push queue full, dropping message"
                );
                DeliveryOutcome::Dropped
            }
            Err(TrySendError::Closed(_)) => {
                debug!(recipient = %recipient, connection = %handle.id(), "connection closing");
                DeliveryOutcome::Dropped
            }
        }
    }

    /// Push an already-stored message to whichever participant did not send
    /// it. Never fails; the outcome is for logging and tests.
    pub async fn route_message(
        &self,
        thread_id: ThreadId,
        message: &ChatMessage,
    ) -> DeliveryOutcome {
        let participants = match self.chat.participants(thread_id).await {
            Ok(p) => p,
            Err(e) => {
                warn!(thread = %thread_id, error = %e, "cannot route message");
                return DeliveryOutcome::Skipped;
            }
        };
        self.route(
            thread_id,
            message,
            participants.counterpart(&message.sender_id),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::NewThread;
    use crate::presence::ConnectionHandle;
    use ecobites_store::Database;

    fn user(id: &str) -> UserId {
        UserId::parse("userId", id).unwrap()
    }

    async fn setup() -> (DeliveryRouter, ChatService, PresenceRegistry, ThreadId) {
        let chat = ChatService::new(Database::open_in_memory().unwrap());
        let presence = PresenceRegistry::new();
        let (thread, _) = chat
            .get_or_create_thread(
                NewThread::parse(Some("d"), Some("r"), Some("i"), Some("food")).unwrap(),
            )
            .await
            .unwrap();
        let router = DeliveryRouter::new(chat.clone(), presence.clone());
        (router, chat, presence, thread.id)
    }

    fn expect_push(
        rx: &mut tokio::sync::mpsc::Receiver<ServerPush>,
    ) -> (ThreadId, ChatMessage) {
        match rx.try_recv().expect("push queued") {
            ServerPush::NewMessage(payload) => (payload.thread_id, payload.message),
        }
    }

    #[tokio::test]
    async fn test_message_reaches_recipient_only() {
        let (router, _chat, presence, thread_id) = setup().await;
        let (donor_conn, mut donor_rx) = ConnectionHandle::new(8);
        let (req_conn, mut req_rx) = ConnectionHandle::new(8);
        presence.join(user("d"), donor_conn);
        presence.join(user("r"), req_conn);

        let appended = router
            .send(thread_id, user("r"), "Is this available?".into())
            .await
            .unwrap();

        let (pushed_thread, pushed) = expect_push(&mut donor_rx);
        assert_eq!(pushed_thread, thread_id);
        assert_eq!(pushed, appended.message);
        assert!(req_rx.try_recv().is_err(), "sender gets no echo");
    }

    #[tokio::test]
    async fn test_offline_recipient_still_stored() {
        let (router, chat, _presence, thread_id) = setup().await;

        let appended = router
            .send(thread_id, user("r"), "hello".into())
            .await
            .unwrap();
        let outcome = router.route_message(thread_id, &appended.message).await;
        assert_eq!(outcome, DeliveryOutcome::Offline);

        let log = chat.list_messages(thread_id).await.unwrap();
        assert_eq!(log, vec![appended.message]);
    }

    #[tokio::test]
    async fn test_failed_append_pushes_nothing() {
        let (router, chat, presence, thread_id) = setup().await;
        let (donor_conn, mut donor_rx) = ConnectionHandle::new(8);
        presence.join(user("d"), donor_conn);

        chat.raw(|db| db.conn().execute_batch("DROP TABLE messages").unwrap())
            .await;

        let err = router
            .send(thread_id, user("r"), "hello".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Storage(_)));
        assert!(donor_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_rejoin_routes_to_newest_connection() {
        let (router, _chat, presence, thread_id) = setup().await;
        let (c1, mut rx1) = ConnectionHandle::new(8);
        let (c2, mut rx2) = ConnectionHandle::new(8);
        presence.join(user("d"), c1.clone());
        presence.join(user("d"), c2);
        // The first connection closes late; the newer binding must survive.
        presence.leave(c1.id());

        router
            .send(thread_id, user("r"), "ping".into())
            .await
            .unwrap();

        assert!(rx1.try_recv().is_err());
        let (_, pushed) = expect_push(&mut rx2);
        assert_eq!(pushed.content, "ping");
    }

    #[tokio::test]
    async fn test_disconnected_recipient_sees_message_on_fetch() {
        let (router, chat, presence, thread_id) = setup().await;
        let (conn, mut rx) = ConnectionHandle::new(8);
        presence.join(user("d"), conn.clone());
        presence.leave(conn.id());

        router
            .send(thread_id, user("r"), "while you were away".into())
            .await
            .unwrap();

        assert!(rx.try_recv().is_err());
        let log = chat.list_messages(thread_id).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].content, "while you were away");
    }

    #[tokio::test]
    async fn test_full_queue_drops_push_but_keeps_message() {
        let (router, chat, presence, thread_id) = setup().await;
        let (conn, _rx) = ConnectionHandle::new(1);
        presence.join(user("d"), conn);

        let first = router.send(thread_id, user("r"), "one".into()).await.unwrap();
        let second = router.send(thread_id, user("r"), "two".into()).await.unwrap();

        assert_eq!(
            router.route_message(thread_id, &second.message).await,
            DeliveryOutcome::Dropped
        );
        let log = chat.list_messages(thread_id).await.unwrap();
        assert_eq!(log, vec![first.message, second.message]);
    }

    #[tokio::test]
    async fn test_unknown_thread_is_skipped() {
        let (router, _chat, _presence, _thread_id) = setup().await;
        let message = ChatMessage {
            seq: 0,
            sender_id: user("r"),
            content: "x".into(),
            timestamp: chrono::Utc::now(),
        };
        assert_eq!(
            router.route_message(ThreadId::new(), &message).await,
            DeliveryOutcome::Skipped
        );
    }

    #[tokio::test]
    async fn test_self_chat_row_gets_no_live_delivery() {
        let (router, chat, presence, _thread_id) = setup().await;
        // A u<->u row written straight to the store, bypassing creation checks.
        let self_chat = chat
            .raw(|db| {
                let item = ecobites_shared::ItemRef::Food(
                    ecobites_shared::ItemId::parse("itemId", "i").unwrap(),
                );
                db.get_or_create_thread(&user("u"), &user("u"), &item, chrono::Utc::now())
                    .unwrap()
                    .0
                    .id
            })
            .await;
        let (conn, mut rx) = ConnectionHandle::new(8);
        presence.join(user("u"), conn);

        let message = ChatMessage {
            seq: 0,
            sender_id: user("u"),
            content: "note to self".into(),
            timestamp: chrono::Utc::now(),
        };
        assert_eq!(
            router.route_message(self_chat, &message).await,
            DeliveryOutcome::Skipped
        );
        assert!(rx.try_recv().is_err());

        let err = router
            .send(self_chat, user("u"), "note to self".into())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServerError::Validation(ecobites_shared::ValidationError::SelfChat)
        ));
        assert!(rx.try_recv().is_err());
        assert!(chat.list_messages(self_chat).await.unwrap().is_empty());
    }
}
