//! WebSocket live channel
//!
//! A connection is attached to at most one session at a time. Every
//! subscription gets its own `Subscriber` and delivery channel; leaving a
//! session drops that channel, so nothing queued for an earlier
//! subscription can reach the client after a re-subscribe. Replies to
//! client requests and broadcaster deliveries are written by the same
//! loop, so the order a client sees is the order the broadcaster enqueued.

use super::protocol::{ClientMessage, ServerMessage};
use super::AppState;
use crate::broadcast::{Delivery, Subscriber, SubscriberId};
use crate::error::AuditError;
use crate::lifecycle::AuditService;
use crate::types::SessionStatus;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{Sink, SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// GET /ws
pub async fn handle_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
    tracing::info!(connection = connection_id, "WebSocket connection established");

    let (mut sender, mut receiver) = socket.split();
    let mut conn = Connection::new(state.service.clone(), state.subscriber_capacity);

    loop {
        let outgoing = tokio::select! {
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => conn.handle_text(&text).await,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    tracing::debug!(connection = connection_id, error = %e, "WebSocket receive failed");
                    break;
                }
            },
            delivery = conn.next_delivery() => match delivery {
                Some(delivery) => conn.on_delivery(delivery),
                None => conn.on_subscription_closed(),
            },
        };

        if send_all(&mut sender, outgoing).await.is_err() {
            break;
        }
    }

    conn.close().await;
    tracing::info!(connection = connection_id, "WebSocket connection closed");
}

async fn send_all<S>(sender: &mut S, messages: Vec<ServerMessage>) -> Result<(), axum::Error>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    for msg in messages {
        match serde_json::to_string(&msg) {
            Ok(json) => sender.send(Message::Text(json)).await?,
            Err(e) => tracing::warn!(error = %e, "Failed to encode server message"),
        }
    }
    Ok(())
}

/// One live subscription: its session, broadcaster handle, and channel
struct Subscription {
    session_id: String,
    subscriber_id: SubscriberId,
    deliveries: mpsc::Receiver<Delivery>,
}

/// Protocol state of one live channel connection
pub struct Connection {
    service: Arc<AuditService>,
    capacity: usize,
    subscription: Option<Subscription>,
}

impl Connection {
    pub fn new(service: Arc<AuditService>, capacity: usize) -> Self {
        Self {
            service,
            capacity,
            subscription: None,
        }
    }

    /// Session this connection is subscribed to, if any
    pub fn current_session(&self) -> Option<&str> {
        self.subscription.as_ref().map(|s| s.session_id.as_str())
    }

    /// Next delivery for the current subscription
    ///
    /// Pends forever while unsubscribed. `None` means the broadcaster let
    /// go of the subscriber (dropped as saturated) before a terminal notice.
    pub async fn next_delivery(&mut self) -> Option<Delivery> {
        match self.subscription.as_mut() {
            Some(sub) => sub.deliveries.recv().await,
            None => std::future::pending().await,
        }
    }

    /// Parse and handle one text frame
    pub async fn handle_text(&mut self, text: &str) -> Vec<ServerMessage> {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(msg) => self.handle(msg).await,
            Err(e) => vec![ServerMessage::error(format!("Invalid message: {}", e))],
        }
    }

    pub async fn handle(&mut self, msg: ClientMessage) -> Vec<ServerMessage> {
        match msg {
            ClientMessage::Subscribe { session_id } => self.subscribe(session_id).await,
            ClientMessage::Unsubscribe => match self.detach().await {
                Some(session_id) => vec![ServerMessage::Unsubscribed { session_id }],
                None => vec![ServerMessage::error("Not subscribed")],
            },
            ClientMessage::GetHistory { session_id } => {
                match self.service.get_history(&session_id).await {
                    Ok(entries) => vec![ServerMessage::History {
                        session_id,
                        entries,
                    }],
                    Err(e) => vec![ServerMessage::error(e.to_string())],
                }
            }
            ClientMessage::Ping => vec![ServerMessage::Pong],
        }
    }

    async fn subscribe(&mut self, session_id: String) -> Vec<ServerMessage> {
        self.detach().await;

        let (subscriber, deliveries) = Subscriber::channel(self.capacity);
        let subscriber_id = subscriber.id();
        match self.service.subscribe(&session_id, subscriber).await {
            // Replay and the `subscribed` marker arrive through the delivery channel
            Ok(()) => {
                self.subscription = Some(Subscription {
                    session_id,
                    subscriber_id,
                    deliveries,
                });
                Vec::new()
            }
            Err(AuditError::UnknownSession(_)) => self.replay_from_store(session_id).await,
            Err(e) => vec![ServerMessage::error(e.to_string())],
        }
    }

    /// Serve a subscription for a session that is not live from durable history
    async fn replay_from_store(&self, session_id: String) -> Vec<ServerMessage> {
        let session = match self.service.get_session(&session_id).await {
            Ok(Some(session)) => session,
            Ok(None) => {
                return vec![ServerMessage::error(format!(
                    "Unknown session: {}",
                    session_id
                ))]
            }
            Err(e) => return vec![ServerMessage::error(e.to_string())],
        };
        let entries = match self.service.get_history(&session_id).await {
            Ok(entries) => entries,
            Err(e) => return vec![ServerMessage::error(e.to_string())],
        };

        let total_entries = entries.len() as u64;
        let mut out: Vec<ServerMessage> = entries.into_iter().map(ServerMessage::entry).collect();
        out.push(ServerMessage::Subscribed {
            session_id: session_id.clone(),
        });
        if session.status.is_terminal() {
            out.push(ServerMessage::Completed {
                session_id,
                success: session.status == SessionStatus::Completed,
                total_entries,
            });
        }
        out
    }

    /// Translate a broadcaster delivery into wire messages
    pub fn on_delivery(&mut self, delivery: Delivery) -> Vec<ServerMessage> {
        if self.current_session() != Some(delivery.session_id()) {
            return Vec::new();
        }

        match delivery {
            Delivery::Replay {
                session_id,
                entries,
            } => {
                let mut out: Vec<ServerMessage> =
                    entries.into_iter().map(ServerMessage::entry).collect();
                out.push(ServerMessage::Subscribed { session_id });
                out
            }
            Delivery::Entry(entry) => vec![ServerMessage::entry(entry)],
            Delivery::Completed {
                session_id,
                status,
                total_entries,
            } => {
                // Subscriber set is already discarded broadcaster-side
                self.subscription = None;
                vec![ServerMessage::Completed {
                    session_id,
                    success: status == SessionStatus::Completed,
                    total_entries,
                }]
            }
        }
    }

    /// The broadcaster dropped this subscriber; tell the client
    pub fn on_subscription_closed(&mut self) -> Vec<ServerMessage> {
        match self.subscription.take() {
            Some(sub) => {
                tracing::debug!(session_id = %sub.session_id, "Live subscription dropped");
                vec![ServerMessage::error(format!(
                    "Subscription to {} dropped: client too slow",
                    sub.session_id
                ))]
            }
            None => Vec::new(),
        }
    }

    async fn detach(&mut self) -> Option<String> {
        let sub = self.subscription.take()?;
        self.service
            .unsubscribe(&sub.session_id, sub.subscriber_id)
            .await;
        Some(sub.session_id)
    }

    /// Release the subscription on disconnect
    pub async fn close(&mut self) {
        self.detach().await;
    }
}
