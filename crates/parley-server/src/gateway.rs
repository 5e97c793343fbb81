//! Session Gateway.
//!
//! Authenticates the channel handshake, then runs one task per connection
//! that decodes client intents, dispatches them in order, and writes room
//! events back to the client. Intent failures never reach the client: they
//! are dropped and logged.

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use parley_core::{
    bearer_token, BroadcastError, CoreError, Draft, Engine, SessionHandle, UserIdentity,
};
use parley_protocol::{
    ClientIntent, Encoding, ProtocolError, RoomId, ServerEvent, Version, Welcome, PROTOCOL_VERSION,
};
use parley_transport::{Connection, WebSocketConfig, WebSocketConnection};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::error::ApiError;
use crate::metrics::{self, ConnectionMetricsGuard};
use crate::session::SessionState;
use crate::state::AppState;

/// Query parameters of the upgrade request.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    /// Bearer credential, for clients that cannot set headers.
    pub token: Option<String>,
    /// Protocol version spoken by the client, `major[.minor]`.
    pub version: Option<String>,
    /// `json` (default) or `msgpack`.
    pub encoding: Option<String>,
}

/// Channel upgrade handler.
///
/// The credential is checked before the upgrade so a rejected client gets a
/// plain 401 and never a socket.
pub async fn ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    params: Result<Query<ConnectParams>, QueryRejection>,
    ws: Option<WebSocketUpgrade>,
) -> Result<Response, ApiError> {
    let Query(params) = params?;

    let token = params
        .token
        .as_deref()
        .filter(|t| !t.is_empty())
        .or_else(|| {
            headers
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(bearer_token)
        })
        .ok_or_else(|| {
            metrics::record_error("unauthorized");
            ApiError::unauthorized()
        })?;
    let identity = state.verifier.verify(token).await.map_err(|e| {
        metrics::record_error("unauthorized");
        ApiError::from(e)
    })?;

    let protocol = negotiate(params.version.as_deref())?;
    let encoding = match params.encoding.as_deref() {
        Some(raw) => raw
            .parse::<Encoding>()
            .map_err(|e| ApiError::bad_request(e.to_string()))?,
        None => Encoding::Json,
    };

    let Some(ws) = ws else {
        return Err(ApiError::new(
            StatusCode::UPGRADE_REQUIRED,
            "upgrade_required",
            "WebSocket upgrade expected",
        ));
    };

    let max_message_size = state.config.limits.max_message_size;
    let engine = state.engine.clone();
    Ok(ws
        .max_message_size(max_message_size)
        .on_upgrade(move |socket| async move {
            let config = WebSocketConfig {
                max_message_size,
                encoding,
            };
            run_session(WebSocketConnection::new(socket, config), identity, protocol, engine).await;
        }))
}

fn negotiate(requested: Option<&str>) -> Result<Version, ApiError> {
    let Some(raw) = requested else {
        return Ok(PROTOCOL_VERSION);
    };
    let client: Version = raw
        .parse()
        .map_err(|e: ProtocolError| ApiError::bad_request(e.to_string()))?;
    PROTOCOL_VERSION.negotiate(&client).ok_or_else(|| {
        ApiError::bad_request(format!(
            "Unsupported protocol version {client}, server speaks {PROTOCOL_VERSION}"
        ))
    })
}

/// Why an intent was dropped.
#[derive(Debug, Error)]
enum IntentError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Broadcast(#[from] BroadcastError),
}

impl IntentError {
    fn kind(&self) -> &'static str {
        match self {
            IntentError::Core(e) | IntentError::Broadcast(BroadcastError::Core(e)) => e.kind(),
            IntentError::Broadcast(BroadcastError::AlreadyJoined(_)) => "already_joined",
            IntentError::Broadcast(BroadcastError::SubscriptionLimit) => "subscription_limit",
        }
    }

    fn is_server_fault(&self) -> bool {
        matches!(
            self,
            IntentError::Core(CoreError::Storage(_))
                | IntentError::Broadcast(BroadcastError::Core(CoreError::Storage(_)))
        )
    }
}

/// One authenticated channel session.
struct Session {
    handle: SessionHandle,
    state: SessionState,
    engine: Engine,
    /// Events of every joined room, merged.
    events: mpsc::UnboundedSender<Arc<ServerEvent>>,
    /// Per-room tasks forwarding room events into `events`.
    forwarders: HashMap<RoomId, JoinHandle<()>>,
}

impl Session {
    async fn dispatch(&mut self, intent: ClientIntent) -> Result<(), IntentError> {
        if !self.state.accepts_intents() {
            trace!(session = %self.handle.id, state = self.state.name(), "Intent ignored");
            return Ok(());
        }
        let user_id = self.handle.user_id;

        match intent {
            ClientIntent::JoinRoom(room_id) => self.join(room_id).await?,
            ClientIntent::LeaveRoom(room_id) => self.leave(room_id),
            ClientIntent::Typing(signal) => {
                self.engine
                    .broadcaster()
                    .typing(&self.handle, signal.room_id, signal.is_typing);
            }
            ClientIntent::SendMessage(send) => {
                let draft = Draft {
                    text: send.text,
                    file_url: send.file_url,
                    file_type: send.file_type,
                };
                self.engine.send_message(user_id, send.room_id, draft).await?;
            }
            ClientIntent::EditMessage(edit) => {
                self.engine
                    .edit_message(user_id, edit.message_id, &edit.text)
                    .await?;
            }
            ClientIntent::DeleteMessage(delete) => {
                self.engine.delete_message(user_id, delete.message_id).await?;
            }
        }
        Ok(())
    }

    async fn join(&mut self, room_id: RoomId) -> Result<(), IntentError> {
        if self.state.is_joined(room_id) {
            return Ok(());
        }
        let Some(mut subscription) = self.engine.broadcaster().join(&self.handle, room_id).await?
        else {
            // Not a member: ignored without a trace on the channel.
            return Ok(());
        };

        let events = self.events.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                if events.send(event).is_err() {
                    break; // Session ended
                }
            }
        });
        if let Some(stale) = self.forwarders.insert(room_id, forwarder) {
            stale.abort();
        }
        self.state.join(room_id);
        metrics::set_active_rooms(self.engine.broadcaster().stats().room_count);
        Ok(())
    }

    fn leave(&mut self, room_id: RoomId) {
        if let Some(forwarder) = self.forwarders.remove(&room_id) {
            forwarder.abort();
        }
        self.engine.broadcaster().leave(&self.handle.id, room_id);
        self.state.leave(room_id);
        metrics::set_active_rooms(self.engine.broadcaster().stats().room_count);
    }

    fn close(&mut self) -> usize {
        for (_, forwarder) in self.forwarders.drain() {
            forwarder.abort();
        }
        self.engine.broadcaster().leave_all(&self.handle.id);
        metrics::set_active_rooms(self.engine.broadcaster().stats().room_count);
        self.state.close().len()
    }
}

/// Drive a connection until it closes.
///
/// Sends `connected`, then processes intents sequentially while forwarding
/// the events of joined rooms. On exit the session leaves every room.
pub async fn run_session<C: Connection>(
    mut conn: C,
    identity: UserIdentity,
    protocol: Version,
    engine: Engine,
) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let handle = SessionHandle::new(conn.id().to_string(), identity.user_id);
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let mut session = Session {
        handle,
        state: SessionState::Connecting,
        engine,
        events: events_tx,
        forwarders: HashMap::new(),
    };
    session.state.authenticate();

    let welcome = ServerEvent::Connected(Welcome {
        session_id: session.handle.id.clone(),
        user_id: identity.user_id,
        protocol,
    });
    if let Err(e) = conn.send(&welcome).await {
        warn!(session = %session.handle.id, error = %e, "Failed to send connected event");
        session.close();
        return;
    }

    info!(
        session = %session.handle.id,
        user = %identity.user_id,
        encoding = ?conn.encoding(),
        "Session connected"
    );

    loop {
        tokio::select! {
            biased;

            Some(event) = events_rx.recv() => {
                if let Err(e) = conn.send(&event).await {
                    debug!(session = %session.handle.id, error = %e, "Write failed");
                    metrics::record_error("transport");
                    break;
                }
                metrics::record_fanout(event.kind());
            }

            received = conn.recv() => match received {
                Ok(Some(intent)) => {
                    let start = Instant::now();
                    let kind = intent.kind();
                    if let Err(e) = session.dispatch(intent).await {
                        metrics::record_error(e.kind());
                        if e.is_server_fault() {
                            warn!(session = %session.handle.id, event = %kind, error = %e, "Intent failed");
                        } else {
                            debug!(session = %session.handle.id, event = %kind, error = %e, "Intent dropped");
                        }
                    }
                    metrics::record_intent(kind, start.elapsed());
                }
                Ok(None) => {
                    debug!(session = %session.handle.id, "Connection closed by client");
                    break;
                }
                Err(e) if e.is_recoverable() => {
                    debug!(session = %session.handle.id, error = %e, "Malformed frame dropped");
                    metrics::record_error("malformed_frame");
                }
                Err(e) => {
                    debug!(session = %session.handle.id, error = %e, "Connection failed");
                    metrics::record_error("transport");
                    break;
                }
            }
        }
    }

    let rooms = session.close();
    if conn.is_open() {
        if let Err(e) = conn.close().await {
            trace!(session = %session.handle.id, error = %e, "Close failed");
        }
    }
    info!(session = %session.handle.id, user = %identity.user_id, rooms, "Session closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestApp;
    use parley_protocol::{MessageView, SenderRef, TypingNotice};
    use parley_transport::{MemoryConnection, MemoryPeer, WireMessage};
    use std::time::Duration;
    use tokio::time::{sleep, timeout};

    const WAIT: Duration = Duration::from_secs(2);

    struct Client {
        peer: MemoryPeer,
        session_id: String,
        task: JoinHandle<()>,
    }

    async fn connect(app: &TestApp, user: &parley_core::User) -> Client {
        let (conn, mut peer) = MemoryConnection::pair();
        let identity = UserIdentity {
            user_id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
        };
        let task = tokio::spawn(run_session(conn, identity, PROTOCOL_VERSION, app.engine().clone()));

        let Some(ServerEvent::Connected(welcome)) = timeout(WAIT, peer.recv()).await.unwrap().unwrap()
        else {
            panic!("expected connected event");
        };
        assert_eq!(welcome.user_id, user.id);
        assert_eq!(welcome.protocol, PROTOCOL_VERSION);

        Client {
            peer,
            session_id: welcome.session_id,
            task,
        }
    }

    async fn join(app: &TestApp, client: &Client, room: RoomId) {
        client.peer.send(&ClientIntent::join(room)).unwrap();
        wait_until(|| app.engine().broadcaster().is_joined(&client.session_id, room)).await;
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    async fn next_event(client: &mut Client) -> ServerEvent {
        timeout(WAIT, client.peer.recv())
            .await
            .expect("timed out waiting for event")
            .unwrap()
            .expect("connection closed")
    }

    fn message(event: ServerEvent) -> MessageView {
        match event {
            ServerEvent::NewMessage(m) | ServerEvent::MessageEdited(m) | ServerEvent::MessageDeleted(m) => m,
            other => panic!("expected a message event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_send_reaches_every_joined_session() {
        let app = TestApp::new();
        let alice = app.user("Alice", "alice@example.com").await;
        let bob = app.user("Bob", "bob@example.com").await;
        let room = app.direct_room(&alice, &bob).await;

        let mut a = connect(&app, &alice).await;
        let mut b = connect(&app, &bob).await;
        join(&app, &a, room).await;
        join(&app, &b, room).await;

        a.peer.send(&ClientIntent::send_text(room, "hello")).unwrap();

        let to_a = message(next_event(&mut a).await);
        let to_b = message(next_event(&mut b).await);
        assert_eq!(to_a.id, to_b.id);
        assert_eq!(to_b.text, "hello");
        assert_eq!(to_b.room, room);
        assert!(matches!(to_b.sender, SenderRef::Populated(ref s) if s.id == alice.id));
    }

    #[tokio::test]
    async fn test_edit_and_delete_fan_out() {
        let app = TestApp::new();
        let alice = app.user("Alice", "alice@example.com").await;
        let bob = app.user("Bob", "bob@example.com").await;
        let room = app.direct_room(&alice, &bob).await;

        let mut a = connect(&app, &alice).await;
        let mut b = connect(&app, &bob).await;
        join(&app, &a, room).await;
        join(&app, &b, room).await;

        a.peer.send(&ClientIntent::send_text(room, "draft")).unwrap();
        let sent = message(next_event(&mut b).await);
        next_event(&mut a).await;

        // Bob cannot touch Alice's message; nothing is fanned out.
        b.peer.send(&ClientIntent::edit(sent.id, "hijack")).unwrap();
        a.peer.send(&ClientIntent::edit(sent.id, "final")).unwrap();
        let edited = message(next_event(&mut b).await);
        assert_eq!(edited.id, sent.id);
        assert_eq!(edited.text, "final");
        assert!(edited.edited);

        a.peer.send(&ClientIntent::delete(sent.id)).unwrap();
        let deleted = message(next_event(&mut b).await);
        assert!(deleted.deleted);
        assert!(deleted.text.is_empty());
        assert!(deleted.file_url.is_none());
    }

    #[tokio::test]
    async fn test_typing_skips_originator() {
        let app = TestApp::new();
        let alice = app.user("Alice", "alice@example.com").await;
        let bob = app.user("Bob", "bob@example.com").await;
        let room = app.direct_room(&alice, &bob).await;

        let mut a = connect(&app, &alice).await;
        let mut b = connect(&app, &bob).await;
        join(&app, &a, room).await;
        join(&app, &b, room).await;

        a.peer.send(&ClientIntent::typing(room, true)).unwrap();
        assert_eq!(
            next_event(&mut b).await,
            ServerEvent::UserTyping(TypingNotice {
                room_id: room,
                user_id: alice.id,
                is_typing: true,
            })
        );

        // Alice's next event is her own message, not her typing notice.
        a.peer.send(&ClientIntent::send_text(room, "done")).unwrap();
        assert!(matches!(next_event(&mut a).await, ServerEvent::NewMessage(_)));
    }

    #[tokio::test]
    async fn test_non_member_join_is_ignored() {
        let app = TestApp::new();
        let alice = app.user("Alice", "alice@example.com").await;
        let bob = app.user("Bob", "bob@example.com").await;
        let carol = app.user("Carol", "carol@example.com").await;
        let room = app.direct_room(&alice, &bob).await;

        let mut a = connect(&app, &alice).await;
        let mut c = connect(&app, &carol).await;
        join(&app, &a, room).await;

        c.peer.send(&ClientIntent::join(room)).unwrap();
        c.peer.send(&ClientIntent::send_text(room, "let me in")).unwrap();
        a.peer.send(&ClientIntent::send_text(room, "private")).unwrap();

        let seen = message(next_event(&mut a).await);
        assert_eq!(seen.text, "private");
        sleep(Duration::from_millis(50)).await;
        assert!(c.peer.try_recv().is_none());
        assert!(a.peer.try_recv().is_none());
        assert!(!app.engine().broadcaster().is_joined(&c.session_id, room));
    }

    #[tokio::test]
    async fn test_malformed_frame_keeps_connection() {
        let app = TestApp::new();
        let alice = app.user("Alice", "alice@example.com").await;
        let bob = app.user("Bob", "bob@example.com").await;
        let room = app.direct_room(&alice, &bob).await;

        let mut a = connect(&app, &alice).await;
        a.peer.send_raw(WireMessage::Text("{not json".into())).unwrap();
        a.peer
            .send_raw(WireMessage::Text(r#"{"event":"sendMessage","data":{}}"#.into()))
            .unwrap();
        join(&app, &a, room).await;

        a.peer.send(&ClientIntent::send_text(room, "still here")).unwrap();
        assert_eq!(message(next_event(&mut a).await).text, "still here");
    }

    #[tokio::test]
    async fn test_leave_stops_delivery() {
        let app = TestApp::new();
        let alice = app.user("Alice", "alice@example.com").await;
        let bob = app.user("Bob", "bob@example.com").await;
        let room = app.direct_room(&alice, &bob).await;

        let mut a = connect(&app, &alice).await;
        let mut b = connect(&app, &bob).await;
        join(&app, &a, room).await;
        join(&app, &b, room).await;

        b.peer.send(&ClientIntent::leave(room)).unwrap();
        wait_until(|| !app.engine().broadcaster().is_joined(&b.session_id, room)).await;

        a.peer.send(&ClientIntent::send_text(room, "anyone?")).unwrap();
        next_event(&mut a).await;
        sleep(Duration::from_millis(50)).await;
        assert!(b.peer.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_disconnect_leaves_all_rooms() {
        let app = TestApp::new();
        let alice = app.user("Alice", "alice@example.com").await;
        let bob = app.user("Bob", "bob@example.com").await;
        let room = app.direct_room(&alice, &bob).await;

        let mut a = connect(&app, &alice).await;
        let mut b = connect(&app, &bob).await;
        join(&app, &a, room).await;
        join(&app, &b, room).await;

        // Alice typing when her only session drops.
        a.peer.send(&ClientIntent::typing(room, true)).unwrap();
        assert!(matches!(next_event(&mut b).await, ServerEvent::UserTyping(t) if t.is_typing));

        a.peer.close();
        timeout(WAIT, &mut a.task).await.unwrap().unwrap();

        assert!(!app.engine().broadcaster().is_joined(&a.session_id, room));
        assert_eq!(
            next_event(&mut b).await,
            ServerEvent::UserTyping(TypingNotice {
                room_id: room,
                user_id: alice.id,
                is_typing: false,
            })
        );

        b.peer.close();
        timeout(WAIT, &mut b.task).await.unwrap().unwrap();
        assert_eq!(app.engine().broadcaster().stats().room_count, 0);
    }

    #[test]
    fn test_negotiate() {
        assert_eq!(negotiate(None).unwrap(), PROTOCOL_VERSION);
        assert_eq!(negotiate(Some("1")).unwrap().major, PROTOCOL_VERSION.major);
        assert_eq!(negotiate(Some("99.0")).unwrap_err().status, StatusCode::BAD_REQUEST);
        assert_eq!(negotiate(Some("one")).unwrap_err().status, StatusCode::BAD_REQUEST);
    }
}
