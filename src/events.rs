//! Outcome events emitted by the session core.
//!
//! The core never navigates or renders anything itself. It publishes
//! [`ClientEvent`]s and a host adapter decides what the user sees.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::alert::Alert;

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogoutReason {
    /// Explicit user logout
    UserRequested,
    /// The refresh credential could not be exchanged any more
    RenewalExhausted,
    /// The liveness probe failed
    ServerUnreachable,
}

/// Views the host adapter may be asked to show
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum View {
    Home,
    Login,
}

/// Events flowing from the core to the host adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// A renewal call stored a fresh token
    TokenRenewed,
    /// A renewal call failed; token and refresh cookie were cleared
    RenewalFailed { reason: String },
    /// A request ended with a 401 after the renewal path was used up
    AuthorizationExhausted { url: String },
    LoggedIn,
    LoggedOut { reason: LogoutReason },
    ProfileUpdated,
    /// A liveness probe failed
    ServerDown { consecutive_failures: u32 },
    /// All persisted local state was wiped after repeated probe failures
    LocalStateCleared,
    /// The server answered again after being down. The host should reload
    /// and show `navigate_to`.
    ServerRecovered { navigate_to: View },
    AlertIssued { alert: Alert },
    AlertExpired { id: Uuid },
}

impl ClientEvent {
    /// Stable name used in logs and statistics
    pub fn event_type(&self) -> &'static str {
        match self {
            ClientEvent::TokenRenewed => "token_renewed",
            ClientEvent::RenewalFailed { .. } => "renewal_failed",
            ClientEvent::AuthorizationExhausted { .. } => "authorization_exhausted",
            ClientEvent::LoggedIn => "logged_in",
            ClientEvent::LoggedOut { .. } => "logged_out",
            ClientEvent::ProfileUpdated => "profile_updated",
            ClientEvent::ServerDown { .. } => "server_down",
            ClientEvent::LocalStateCleared => "local_state_cleared",
            ClientEvent::ServerRecovered { .. } => "server_recovered",
            ClientEvent::AlertIssued { .. } => "alert_issued",
            ClientEvent::AlertExpired { .. } => "alert_expired",
        }
    }
}

/// An event together with the moment it was published
#[derive(Debug, Clone)]
pub struct Stamped<T> {
    pub at: DateTime<Utc>,
    pub event: T,
}

/// Statistics for monitoring stream activity
#[derive(Debug, Clone, Default)]
pub struct EventStreamStats {
    pub events_published: u64,
    pub events_dropped: u64,
    pub type_counts: HashMap<String, u64>,
}

/// Broadcast stream with a bounded replay buffer
pub struct EventStream<T: Clone + Send + 'static> {
    sender: broadcast::Sender<T>,
    buffer: Arc<RwLock<VecDeque<Stamped<T>>>>,
    buffer_size: usize,
    stats: Arc<RwLock<EventStreamStats>>,
}

impl<T: Clone + Send + 'static> EventStream<T> {
    /// Create a new event stream with specified capacity
    pub fn new(capacity: usize, buffer_size: usize) -> Self {
        debug!(capacity, buffer_size, "Creating new event stream");
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            buffer: Arc::new(RwLock::new(VecDeque::with_capacity(buffer_size))),
            buffer_size,
            stats: Arc::new(RwLock::new(EventStreamStats::default())),
        }
    }

    /// Subscribe to the event stream
    pub fn subscribe(&self) -> Subscriber<T> {
        Subscriber {
            receiver: self.sender.subscribe(),
        }
    }

    /// Publish an event to all subscribers. Having no subscribers is not an
    /// error; the event is still buffered.
    pub async fn publish_typed(&self, event: T, event_type: &str) -> usize {
        let receivers = self.sender.send(event.clone()).unwrap_or(0);
        self.buffer_event(event).await;

        let mut stats = self.stats.write().await;
        if receivers == 0 {
            stats.events_dropped += 1;
        } else {
            stats.events_published += 1;
        }
        *stats.type_counts.entry(event_type.to_string()).or_insert(0) += 1;
        trace!(receivers, event_type, "Event published");

        receivers
    }

    /// Store an event in the buffer for replay
    async fn buffer_event(&self, event: T) {
        let mut buffer = self.buffer.write().await;
        buffer.push_back(Stamped {
            at: Utc::now(),
            event,
        });

        while buffer.len() > self.buffer_size {
            buffer.pop_front();
        }
    }

    /// Events currently held in the replay buffer, oldest first
    pub async fn recent(&self) -> Vec<T> {
        self.buffer
            .read()
            .await
            .iter()
            .map(|s| s.event.clone())
            .collect()
    }

    /// Get current statistics
    pub async fn get_stats(&self) -> EventStreamStats {
        self.stats.read().await.clone()
    }

    /// Get the buffer capacity
    pub fn capacity(&self) -> usize {
        self.buffer_size
    }
}

impl EventStream<ClientEvent> {
    pub async fn publish(&self, event: ClientEvent) -> usize {
        let event_type = event.event_type();
        self.publish_typed(event, event_type).await
    }

    /// How many buffered events have the given type
    pub async fn count_of(&self, event_type: &str) -> usize {
        self.buffer
            .read()
            .await
            .iter()
            .filter(|s| s.event.event_type() == event_type)
            .count()
    }
}

impl<T: Clone + Send + 'static> Clone for EventStream<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            buffer: Arc::clone(&self.buffer),
            buffer_size: self.buffer_size,
            stats: Arc::clone(&self.stats),
        }
    }
}

/// Subscriber for receiving events from a stream
pub struct Subscriber<T: Clone + Send + 'static> {
    receiver: broadcast::Receiver<T>,
}

impl<T: Clone + Send + 'static> Subscriber<T> {
    /// Receive the next event
    pub async fn recv(&mut self) -> Result<T, broadcast::error::RecvError> {
        self.receiver.recv().await
    }
}
