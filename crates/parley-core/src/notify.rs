//! Notification Dispatcher.
//!
//! Best-effort, out-of-band delivery to room members through their stored
//! push endpoints. Every attempt is independent: a failure or timeout is
//! logged and skipped, never retried, and never affects other attempts.

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::{Message, PushEndpoint, RoomId, UserId};
use crate::store::UserStore;

/// Default per-attempt delivery timeout.
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Push delivery failure.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The push service answered with a non-success status.
    #[error("Push service rejected delivery with status {status}")]
    Rejected { status: u16 },

    /// The request could not be sent.
    #[error("Push transport error: {0}")]
    Transport(String),

    /// The attempt did not finish in time.
    #[error("Push delivery timed out")]
    Timeout,
}

/// Delivers a JSON payload to one endpoint.
#[async_trait]
pub trait PushGateway: Send + Sync {
    /// Deliver a payload.
    ///
    /// # Errors
    ///
    /// Returns a [`DeliveryError`] if the push service did not accept it.
    async fn deliver(
        &self,
        endpoint: &PushEndpoint,
        payload: &serde_json::Value,
    ) -> Result<(), DeliveryError>;
}

/// Notification content.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    /// Opaque context forwarded to the client.
    pub data: serde_json::Value,
}

impl Notification {
    /// Notification announcing a new message.
    #[must_use]
    pub fn new_message(message: &Message) -> Self {
        let body = if message.body.is_empty() {
            "Sent a file".to_string()
        } else {
            message.body.clone()
        };
        Self {
            title: "New message".to_string(),
            body,
            data: json!({ "roomId": message.room_id }),
        }
    }

    /// Room this notification points at, if any.
    #[must_use]
    pub fn room_id(&self) -> Option<RoomId> {
        self.data
            .get("roomId")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
    }

    /// Wire payload.
    #[must_use]
    pub fn payload(&self) -> serde_json::Value {
        json!({ "title": self.title, "body": self.body, "data": self.data })
    }
}

/// Which members receive a push for a new message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyPolicy {
    /// Every member except the sender.
    #[default]
    AllMembers,
    /// Members without a session joined to the room.
    OfflineOnly,
}

impl FromStr for NotifyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all_members" | "all" => Ok(NotifyPolicy::AllMembers),
            "offline_only" | "offline" => Ok(NotifyPolicy::OfflineOnly),
            other => Err(format!("unknown notify policy '{other}'")),
        }
    }
}

/// Outcome counts of one dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
}

/// Fans a notification out to every endpoint of every recipient.
pub struct NotificationDispatcher {
    users: Arc<dyn UserStore>,
    gateway: Arc<dyn PushGateway>,
    timeout: Duration,
}

impl NotificationDispatcher {
    #[must_use]
    pub fn new(users: Arc<dyn UserStore>, gateway: Arc<dyn PushGateway>) -> Self {
        Self {
            users,
            gateway,
            timeout: DEFAULT_DELIVERY_TIMEOUT,
        }
    }

    /// Set the per-attempt timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Deliver a notification to the recipients.
    ///
    /// Attempts run concurrently, each bounded by the configured timeout.
    /// Never fails; the report says what happened.
    pub async fn notify(&self, recipients: &[UserId], notification: &Notification) -> DispatchReport {
        if recipients.is_empty() {
            return DispatchReport::default();
        }

        let users = match self.users.users(recipients).await {
            Ok(users) => users,
            Err(e) => {
                warn!(error = %e, "Could not load notification recipients");
                return DispatchReport::default();
            }
        };

        let payload = &notification.payload();
        let attempts = users.iter().flat_map(|user| {
            user.endpoints
                .iter()
                .map(move |endpoint| self.attempt(user.id, endpoint, payload))
        });
        let outcomes = join_all(attempts).await;

        let delivered = outcomes.iter().filter(|ok| **ok).count();
        let report = DispatchReport {
            attempted: outcomes.len(),
            delivered,
            failed: outcomes.len() - delivered,
        };
        debug!(
            recipients = recipients.len(),
            attempted = report.attempted,
            delivered = report.delivered,
            failed = report.failed,
            "Notification dispatched"
        );
        report
    }

    async fn attempt(&self, user_id: UserId, endpoint: &PushEndpoint, payload: &serde_json::Value) -> bool {
        let result = match tokio::time::timeout(self.timeout, self.gateway.deliver(endpoint, payload)).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout),
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(user = %user_id, endpoint = %endpoint.endpoint, error = %e, "Push delivery failed");
                false
            }
        }
    }
}

impl std::fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::{new_id, now, User};
    use crate::store::MemoryStore;
    use tokio::sync::mpsc;

    /// Gateway double that reports every delivery and can fail or stall
    /// selected endpoints.
    pub(crate) struct RecordingGateway {
        pub(crate) tx: mpsc::UnboundedSender<(String, serde_json::Value)>,
        pub(crate) failing: Vec<String>,
        pub(crate) stalled: Vec<String>,
    }

    impl RecordingGateway {
        pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<(String, serde_json::Value)>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (
                Self {
                    tx,
                    failing: Vec::new(),
                    stalled: Vec::new(),
                },
                rx,
            )
        }
    }

    #[async_trait]
    impl PushGateway for RecordingGateway {
        async fn deliver(
            &self,
            endpoint: &PushEndpoint,
            payload: &serde_json::Value,
        ) -> Result<(), DeliveryError> {
            if self.stalled.contains(&endpoint.endpoint) {
                std::future::pending::<()>().await;
            }
            if self.failing.contains(&endpoint.endpoint) {
                return Err(DeliveryError::Rejected { status: 410 });
            }
            let _ = self.tx.send((endpoint.endpoint.clone(), payload.clone()));
            Ok(())
        }
    }

    async fn user_with(store: &MemoryStore, endpoints: &[&str]) -> UserId {
        let mut user = User::new("Someone", format!("{}@example.com", new_id()));
        for e in endpoints {
            user = user.with_endpoint(PushEndpoint::new(*e));
        }
        store.upsert_user(&user).await.unwrap();
        user.id
    }

    #[test]
    fn test_new_message_payload() {
        let room = new_id();
        let text = Message::new(room, new_id(), Some("hello"), None, now()).unwrap();
        let payload = Notification::new_message(&text).payload();
        assert_eq!(payload["title"], "New message");
        assert_eq!(payload["body"], "hello");
        assert_eq!(payload["data"]["roomId"], room.to_string());

        let file = crate::model::Attachment::from_parts(Some("https://f/x".into()), None);
        let file_only = Message::new(room, new_id(), None, file, now()).unwrap();
        let notification = Notification::new_message(&file_only);
        assert_eq!(notification.body, "Sent a file");
        assert_eq!(notification.room_id(), Some(room));
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!("offline_only".parse::<NotifyPolicy>().unwrap(), NotifyPolicy::OfflineOnly);
        assert_eq!("ALL_MEMBERS".parse::<NotifyPolicy>().unwrap(), NotifyPolicy::AllMembers);
        assert!("nobody".parse::<NotifyPolicy>().is_err());
    }

    #[tokio::test]
    async fn test_failures_do_not_abort_others() {
        let store = Arc::new(MemoryStore::new());
        let (mut gateway, mut rx) = RecordingGateway::new();
        gateway.failing.push("https://push/bad".into());

        let ok = user_with(&store, &["https://push/good-1", "https://push/bad"]).await;
        let other = user_with(&store, &["https://push/good-2"]).await;
        let no_endpoints = user_with(&store, &[]).await;

        let dispatcher = NotificationDispatcher::new(store, Arc::new(gateway));
        let message = Message::new(new_id(), new_id(), Some("hi"), None, now()).unwrap();
        let report = dispatcher
            .notify(&[ok, other, no_endpoints], &Notification::new_message(&message))
            .await;

        assert_eq!(
            report,
            DispatchReport {
                attempted: 3,
                delivered: 2,
                failed: 1
            }
        );
        let mut delivered = vec![rx.recv().await.unwrap().0, rx.recv().await.unwrap().0];
        delivered.sort();
        assert_eq!(delivered, vec!["https://push/good-1", "https://push/good-2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout() {
        let store = Arc::new(MemoryStore::new());
        let (mut gateway, mut rx) = RecordingGateway::new();
        gateway.stalled.push("https://push/slow".into());

        let user = user_with(&store, &["https://push/slow", "https://push/fast"]).await;
        let dispatcher = NotificationDispatcher::new(store, Arc::new(gateway))
            .with_timeout(Duration::from_millis(50));
        let message = Message::new(new_id(), new_id(), Some("hi"), None, now()).unwrap();

        let report = dispatcher.notify(&[user], &Notification::new_message(&message)).await;
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(rx.recv().await.unwrap().0, "https://push/fast");
    }

    #[tokio::test]
    async fn test_no_recipients() {
        let store = Arc::new(MemoryStore::new());
        let (gateway, _rx) = RecordingGateway::new();
        let dispatcher = NotificationDispatcher::new(store, Arc::new(gateway));
        let message = Message::new(new_id(), new_id(), Some("hi"), None, now()).unwrap();

        let report = dispatcher.notify(&[], &Notification::new_message(&message)).await;
        assert_eq!(report, DispatchReport::default());
    }
}
