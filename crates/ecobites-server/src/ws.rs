//! WebSocket endpoint.
//!
//! Client -> Server:
//! ```json
//! {"event": "join", "data": {"userId": "u-1", "token": "u-1.9f2c..."}}
//! {"event": "sendMessage", "data": {"threadId": "...", "message": {"senderId": "u-1", "content": "Hi"}}}
//! ```
//!
//! Server -> Client:
//! ```json
//! {"event": "newMessage", "data": {"threadId": "...", "message": {"seq": 0, "senderId": "...", "content": "...", "timestamp": "..."}}}
//! ```
//!
//! Bad signals are logged and dropped; the connection stays open.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tracing::{debug, warn};

use ecobites_shared::protocol::{ClientSignal, JoinPayload, SendMessagePayload};
use ecobites_shared::{ThreadId, UserId, ValidationError};

use crate::api::AppState;
use crate::auth::TokenVerifier;
use crate::error::ServerError;
use crate::presence::{ConnectionHandle, PresenceRegistry};
use crate::router::DeliveryRouter;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (handle, mut rx) = ConnectionHandle::new(state.config.push_capacity);
    let mut session = ConnectionSession::new(&state, handle);
    debug!(connection = %session.connection_id(), "websocket opened");

    let sender_task = tokio::spawn(async move {
        while let Some(push) = rx.recv().await {
            let text = match push.to_json() {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "failed to encode push");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = ws_receiver.next().await {
        match msg {
            Message::Text(text) => {
                session.handle_text(&text).await;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    session.close();
    sender_task.abort();
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SessionState {
    Open,
    Joined(UserId),
    Closed,
}

/// Result of handling one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalOutcome {
    Joined(UserId),
    Sent { thread_id: ThreadId, seq: u32 },
    Dropped,
}

/// Per-connection state machine: Open -> Joined -> Closed.
pub struct ConnectionSession {
    handle: ConnectionHandle,
    state: SessionState,
    presence: PresenceRegistry,
    router: DeliveryRouter,
    tokens: Arc<TokenVerifier>,
}

impl ConnectionSession {
    pub fn new(state: &AppState, handle: ConnectionHandle) -> Self {
        Self {
            handle,
            state: SessionState::Open,
            presence: state.presence.clone(),
            router: state.router.clone(),
            tokens: state.tokens.clone(),
        }
    }

    pub fn connection_id(&self) -> crate::presence::ConnectionId {
        self.handle.id()
    }

    pub fn user(&self) -> Option<&UserId> {
        match &self.state {
            SessionState::Joined(user) => Some(user),
            _ => None,
        }
    }

    pub async fn handle_text(&mut self, text: &str) -> SignalOutcome {
        let signal = match ClientSignal::from_json(text) {
            Ok(signal) => signal,
            Err(e) => {
                warn!(connection = %self.handle.id(), error = %e, "malformed signal");
                return SignalOutcome::Dropped;
            }
        };

        let result = match signal {
            ClientSignal::Join(payload) => self.join(payload),
            ClientSignal::SendMessage(payload) => self.send_message(payload).await,
        };

        result.unwrap_or_else(|e| {
            warn!(
                connection = %self.handle.id(),
                user = ?self.user(),
                error = %e,
                "signal rejected"
            );
            SignalOutcome::Dropped
        })
    }

    fn join(&mut self, payload: JoinPayload) -> Result<SignalOutcome, ServerError> {
        if self.state == SessionState::Closed {
            return Err(ServerError::Forbidden("connection is closed".into()));
        }
        let user = UserId::require("userId", payload.user_id.as_deref())?;
        let Some(token) = payload.token.as_deref() else {
            warn!(
                connection = %self.handle.id(),
                user = %user,
                "join without a token, expected {{\"userId\", \"token\"}}"
            );
            return Err(ServerError::Unauthorized);
        };
        let verified = self.tokens.verify(token).ok_or(ServerError::Unauthorized)?;
        if verified != user {
            return Err(ServerError::Forbidden(format!(
                "token does not belong to {user}"
            )));
        }

        self.presence.join(user.clone(), self.handle.clone());
        self.state = SessionState::Joined(user.clone());
        Ok(SignalOutcome::Joined(user))
    }

    async fn send_message(
        &mut self,
        payload: SendMessagePayload,
    ) -> Result<SignalOutcome, ServerError> {
        let SessionState::Joined(bound) = &self.state else {
            return Err(ServerError::Forbidden("sendMessage before join".into()));
        };

        let thread_id: ThreadId = payload.thread_id.as_deref().unwrap_or_default().parse()?;
        let sender = UserId::require("senderId", payload.message.sender_id.as_deref())?;
        if sender != *bound {
            return Err(ServerError::Forbidden(format!(
                "connection is bound to {bound}, not {sender}"
            )));
        }
        let content = payload
            .message
            .content
            .ok_or(ValidationError::EmptyContent)?;

        let appended = self.router.send(thread_id, sender, content).await?;
        Ok(SignalOutcome::Sent {
            thread_id,
            seq: appended.message.seq,
        })
    }

    /// Release the presence binding held by this connection.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.presence.leave(self.handle.id());
        self.state = SessionState::Closed;
        debug!(connection = %self.handle.id(), "websocket closed");
    }
}
