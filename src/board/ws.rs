use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::api::{ApiError, OwnerId, SharedState, owned_board};
use super::registry::{Audience, Connection, OUTBOUND_QUEUE};
use crate::errors::BoardError;

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

// ── Handlers ─────────────────────────────────────────────────────────

/// Owner's live view of one of their boards.
pub async fn board_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
    OwnerId(owner): OwnerId,
    Path(board_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .db
        .call(move |db| owned_board(db, board_id, &owner))
        .await?;
    Ok(ws.on_upgrade(move |socket| attach(socket, state, board_id, Audience::Owner)))
}

/// Anonymous live view through the public link.
pub async fn public_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let board = state
        .db
        .call(move |db| {
            Ok(db
                .find_board_by_token(&token)?
                .ok_or_else(|| BoardError::board_not_found("for this link"))?)
        })
        .await?;
    Ok(ws.on_upgrade(move |socket| {
        attach(socket, state, board.id, Audience::Public)
    }))
}

/// Register the socket under `board_id` for as long as it stays open.
async fn attach(mut socket: WebSocket, state: SharedState, board_id: i64, audience: Audience) {
    let Some((conn, outbound)) = register_viewer(&state, board_id, audience).await else {
        let _ = socket.send(Message::Close(None)).await;
        return;
    };
    let registry = Arc::clone(state.registry());
    tracing::debug!(board_id, connection = %conn.id(), ?audience, "Viewer attached");

    let (sender, receiver) = socket.split();
    run_socket_loop(sender, receiver, outbound, &conn).await;

    // No grace period. After an eviction this finds nothing to remove.
    registry.unregister(board_id, conn.id());
    conn.close();
    tracing::debug!(board_id, connection = %conn.id(), "Viewer detached");
}

/// Register a new connection, then confirm the board still exists.
///
/// A board deleted after the handshake lookup may already have been evicted
/// before this connection joined its bucket; such a connection is removed
/// and closed here instead of lingering. A deletion committed after the
/// check finds the connection registered and evicts it.
async fn register_viewer(
    state: &SharedState,
    board_id: i64,
    audience: Audience,
) -> Option<(Connection, mpsc::Receiver<Arc<str>>)> {
    let (conn, outbound) = Connection::with_audience(OUTBOUND_QUEUE, audience);
    let registry = state.registry();
    registry.register(board_id, conn.clone());

    let board = state.db.call(move |db| db.find_board(board_id)).await;
    match board {
        Ok(Some(_)) => return Some((conn, outbound)),
        Ok(None) => {
            tracing::debug!(board_id, connection = %conn.id(), "Board deleted during attach");
        }
        Err(e) => {
            tracing::warn!(board_id, connection = %conn.id(), error = %e, "Board lookup failed during attach");
        }
    }
    registry.unregister(board_id, conn.id());
    conn.close();
    None
}

/// Core WebSocket loop with ping/pong keepalive.
///
/// Drains the connection's outbound queue in order, watches for client
/// frames, and sends a Ping every [`PING_INTERVAL`]. Exits when the client
/// goes away, when no Pong arrives within [`PONG_TIMEOUT`], or when the
/// registry closes the connection.
async fn run_socket_loop<S, R, E>(
    mut sender: S,
    mut receiver: R,
    mut outbound: mpsc::Receiver<Arc<str>>,
    conn: &Connection,
) where
    S: Sink<Message> + Unpin,
    R: Stream<Item = Result<Message, E>> + Unpin,
{
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately; consume it so the first real
    // ping fires after PING_INTERVAL has elapsed.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            // ── Periodic ping ───────────────────────────────────────
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    tracing::debug!(connection = %conn.id(), "Pong timeout");
                    break;
                }
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            // ── Queued live events ──────────────────────────────────
            payload = outbound.recv() => {
                match payload {
                    Some(json) => {
                        if sender.send(Message::Text(json.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            // ── Eviction ────────────────────────────────────────────
            _ = conn.closed() => break,

            // ── Client messages (pong, close, etc.) ─────────────────
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {
                        // Viewers are read-only; ignore Text, Binary, Ping.
                    }
                    Some(Err(_)) => break,
                }
            }
        }
    }

    // Best-effort close frame
    let _ = sender.send(Message::Close(None)).await;
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use futures::channel::mpsc as fmpsc;

    use super::*;
    use crate::board::api::AppState;
    use crate::board::broadcast::BroadcastDispatcher;
    use crate::board::db::{BoardDb, DbHandle};
    use crate::board::gate::Unlimited;
    use crate::board::notify::NotificationFanout;
    use crate::board::registry::ConnectionRegistry;

    type ClientFrame = Result<Message, std::io::Error>;

    fn text(s: &str) -> Message {
        Message::Text(s.to_string().into())
    }

    #[test]
    fn test_keepalive_constants() {
        assert!(PONG_TIMEOUT > PING_INTERVAL);
        assert_eq!(PING_INTERVAL, Duration::from_secs(30));
        assert_eq!(PONG_TIMEOUT, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_forwards_queue_in_order_and_stops_on_close() {
        let (sink, mut wire) = fmpsc::unbounded::<Message>();
        let (_client_tx, client_rx) = fmpsc::unbounded::<ClientFrame>();
        let (conn, outbound) = Connection::new(8);
        for payload in ["one", "two", "three"] {
            conn.send(Arc::from(payload)).unwrap();
        }

        let loop_conn = conn.clone();
        let task = tokio::spawn(async move {
            run_socket_loop(sink, client_rx, outbound, &loop_conn).await;
        });

        assert_eq!(wire.next().await, Some(text("one")));
        assert_eq!(wire.next().await, Some(text("two")));
        assert_eq!(wire.next().await, Some(text("three")));

        conn.close();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("loop should exit after close")
            .unwrap();
        assert_eq!(wire.next().await, Some(Message::Close(None)));
    }

    #[tokio::test]
    async fn test_client_close_ends_loop() {
        let (sink, mut wire) = fmpsc::unbounded::<Message>();
        let (client_tx, client_rx) = fmpsc::unbounded::<ClientFrame>();
        let (conn, outbound) = Connection::new(8);
        client_tx.unbounded_send(Ok(text("hello"))).unwrap();
        client_tx.unbounded_send(Ok(Message::Close(None))).unwrap();

        tokio::time::timeout(
            Duration::from_secs(5),
            run_socket_loop(sink, client_rx, outbound, &conn),
        )
        .await
        .expect("loop should exit on client close");
        assert_eq!(wire.next().await, Some(Message::Close(None)));
    }

    #[tokio::test]
    async fn test_client_error_ends_loop() {
        let (sink, _wire) = fmpsc::unbounded::<Message>();
        let (client_tx, client_rx) = fmpsc::unbounded::<ClientFrame>();
        let (conn, outbound) = Connection::new(8);
        client_tx
            .unbounded_send(Err(std::io::Error::other("reset")))
            .unwrap();

        tokio::time::timeout(
            Duration::from_secs(5),
            run_socket_loop(sink, client_rx, outbound, &conn),
        )
        .await
        .expect("loop should exit on client error");
    }

    fn test_state() -> SharedState {
        let registry = Arc::new(ConnectionRegistry::new());
        Arc::new(AppState::new(
            DbHandle::new(BoardDb::new_in_memory().unwrap()),
            NotificationFanout::new(BroadcastDispatcher::new(registry)),
            Box::new(Unlimited),
        ))
    }

    #[tokio::test]
    async fn test_viewer_of_live_board_stays_registered() {
        let state = test_state();
        let board = state
            .db
            .call(|db| db.create_board("owner-1", "Live", ""))
            .await
            .unwrap();

        let (conn, _outbound) = register_viewer(&state, board.id, Audience::Public)
            .await
            .expect("board exists");
        assert_eq!(conn.audience(), Audience::Public);
        assert!(!conn.is_closed());
        assert_eq!(state.registry().board_of(conn.id()), Some(board.id));
    }

    #[tokio::test]
    async fn test_viewer_attaching_after_board_deletion_is_dropped() {
        let state = test_state();
        let board = state
            .db
            .call(|db| db.create_board("owner-1", "Doomed", ""))
            .await
            .unwrap();

        // The handshake saw the board; the deletion and its eviction finish
        // before the socket task registers.
        let report = state.cascade.delete_board(board.id, "owner-1").await.unwrap();
        assert_eq!(report.viewers_evicted, 0);

        assert!(register_viewer(&state, board.id, Audience::Owner).await.is_none());
        assert!(state.registry().connections_for(board.id).is_empty());
        assert_eq!(state.registry().connection_count(), 0);
    }

    #[tokio::test]
    async fn test_deletion_after_attach_evicts_viewer() {
        let state = test_state();
        let board = state
            .db
            .call(|db| db.create_board("owner-1", "Later", ""))
            .await
            .unwrap();
        let (conn, _outbound) = register_viewer(&state, board.id, Audience::Public)
            .await
            .unwrap();

        let report = state.cascade.delete_board(board.id, "owner-1").await.unwrap();
        assert_eq!(report.viewers_evicted, 1);
        assert!(conn.is_closed());
        assert_eq!(state.registry().connection_count(), 0);
    }
}
