use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use super::models::{Board, Column, FeedbackKind, Idea, IdeaStatus, PublicIdea};
use super::registry::{Audience, ConnectionRegistry};

// ── Live event types ──────────────────────────────────────────────────

/// Events pushed to the viewers of a board.
#[derive(Debug, Clone, PartialEq)]
pub enum BoardEvent {
    IdeaUpdated {
        idea: Idea,
    },
    IdeaMoved {
        idea_id: i64,
        from_column: Column,
        to_column: Column,
        position: i32,
        /// Not sent on the wire; archived ideas stay off public views.
        status: IdeaStatus,
    },
    BoardUpdated {
        board: Board,
    },
    FeedbackAnimation {
        idea_id: i64,
        feedback: FeedbackKind,
        timestamp: DateTime<Utc>,
    },
}

/// Wire envelope: `{ type, boardId, ideaId?, data }`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LiveMessage<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    board_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    idea_id: Option<i64>,
    data: serde_json::Value,
}

impl BoardEvent {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::IdeaUpdated { .. } => "idea_update",
            Self::IdeaMoved { .. } => "idea_moved",
            Self::BoardUpdated { .. } => "board_updated",
            Self::FeedbackAnimation { .. } => "feedback_animation",
        }
    }

    pub fn idea_id(&self) -> Option<i64> {
        match self {
            Self::IdeaUpdated { idea } => Some(idea.id),
            Self::IdeaMoved { idea_id, .. } | Self::FeedbackAnimation { idea_id, .. } => {
                Some(*idea_id)
            }
            Self::BoardUpdated { .. } => None,
        }
    }

    fn data(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            Self::IdeaUpdated { idea } => serde_json::to_value(idea),
            // Public viewers get this too: never send owner or token.
            Self::BoardUpdated { board } => Ok(json!({
                "id": board.id,
                "name": board.name,
                "description": board.description,
                "visibleColumns": board.visible_columns,
                "visibleFields": board.visible_fields,
                "updatedAt": board.updated_at,
            })),
            Self::IdeaMoved {
                idea_id,
                from_column,
                to_column,
                position,
                ..
            } => Ok(json!({
                "ideaId": idea_id,
                "fromColumn": from_column,
                "toColumn": to_column,
                "position": position,
            })),
            Self::FeedbackAnimation {
                idea_id,
                feedback,
                timestamp,
            } => Ok(json!({
                "ideaId": idea_id,
                "feedbackType": feedback.feedback_type(),
                "emoji": feedback.symbol(),
                "timestamp": timestamp,
            })),
        }
    }

    fn envelope(&self, board_id: i64, data: serde_json::Value) -> serde_json::Result<String> {
        serde_json::to_string(&LiveMessage {
            kind: self.type_name(),
            board_id,
            idea_id: self.idea_id(),
            data,
        })
    }

    /// Serialize into the envelope owner connections receive.
    pub fn to_json(&self, board_id: i64) -> serde_json::Result<String> {
        self.envelope(board_id, self.data()?)
    }

    /// Serialize for viewers of the public link, or `None` when the event
    /// concerns nothing the public view shows.
    ///
    /// Ideas are projected to the board's visible fields. An idea that
    /// enters or leaves the public view is announced as `board_updated` so
    /// public clients refetch instead of learning hidden columns.
    pub fn to_public_json(&self, board: &Board) -> serde_json::Result<Option<String>> {
        let shown = |column: &Column| board.visible_columns.contains(column);
        let refetch = || BoardEvent::BoardUpdated {
            board: board.clone(),
        };
        let json = match self {
            Self::IdeaUpdated { idea } if shown(&idea.column) => {
                if idea.status == IdeaStatus::Archived {
                    refetch().to_json(board.id)?
                } else {
                    let public = PublicIdea::project(idea, &board.visible_fields);
                    self.envelope(board.id, serde_json::to_value(public)?)?
                }
            }
            Self::IdeaUpdated { .. } => return Ok(None),
            Self::IdeaMoved {
                from_column,
                to_column,
                status,
                ..
            } => match (shown(from_column), shown(to_column)) {
                (false, false) => return Ok(None),
                (true, true) if *status != IdeaStatus::Archived => self.to_json(board.id)?,
                (true, true) => return Ok(None),
                _ => refetch().to_json(board.id)?,
            },
            Self::BoardUpdated { .. } | Self::FeedbackAnimation { .. } => self.to_json(board.id)?,
        };
        Ok(Some(json))
    }
}

// ── Dispatcher ────────────────────────────────────────────────────────

/// Outcome of one broadcast, for logging and tests only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub evicted: usize,
}

/// Pushes events to the viewers of a board.
///
/// Delivery is a non-blocking enqueue per connection. A connection whose
/// queue is closed or full is unregistered and closed; the remaining
/// viewers still receive the event and the caller never sees the failure.
/// Owner connections get the full event, public connections the projection
/// from [`BoardEvent::to_public_json`].
#[derive(Clone)]
pub struct BroadcastDispatcher {
    registry: Arc<ConnectionRegistry>,
}

impl BroadcastDispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn broadcast(&self, board: &Board, event: &BoardEvent) -> BroadcastReport {
        let board_id = board.id;
        let mut report = BroadcastReport::default();
        let viewers = self.registry.connections_for(board_id);
        if viewers.is_empty() {
            return report;
        }

        let encoded = event.to_json(board_id).and_then(|owner| {
            let public = event.to_public_json(board)?;
            Ok((Arc::<str>::from(owner), public.map(Arc::<str>::from)))
        });
        let (owner_payload, public_payload) = match encoded {
            Ok(payloads) => payloads,
            Err(e) => {
                tracing::error!(board_id, event = event.type_name(), error = %e, "Failed to serialize live event");
                return report;
            }
        };

        for conn in viewers {
            let payload = match conn.audience() {
                Audience::Owner => &owner_payload,
                Audience::Public => match &public_payload {
                    Some(payload) => payload,
                    None => continue,
                },
            };
            match conn.send(Arc::clone(payload)) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::warn!(board_id, connection = %conn.id(), error = %e, "Dropping viewer after failed delivery");
                    // Only the caller that wins the unregister closes it.
                    if let Some(evicted) = self.registry.unregister(board_id, conn.id()) {
                        evicted.close();
                        report.evicted += 1;
                    }
                }
            }
        }
        tracing::debug!(
            board_id,
            event = event.type_name(),
            delivered = report.delivered,
            evicted = report.evicted,
            "Broadcast live event"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::board::models::{IdeaField, RiceScore};
    use crate::board::registry::Connection;

    fn idea() -> Idea {
        Idea {
            id: 5,
            board_id: 1,
            one_liner: "Share links".to_string(),
            description: "Internal: needs legal review".to_string(),
            value_statement: String::new(),
            rice: RiceScore::default(),
            column: Column::Now,
            in_progress: false,
            status: IdeaStatus::Active,
            position: 0,
            thumbs_up: 2,
            emoji_reactions: BTreeMap::new(),
            created_at: "2024-01-01".to_string(),
            updated_at: "2024-01-01".to_string(),
        }
    }

    fn board(id: i64) -> Board {
        Board {
            id,
            owner_id: "o".to_string(),
            name: "Roadmap".to_string(),
            description: String::new(),
            public_token: "t".to_string(),
            visible_columns: Column::ALL.to_vec(),
            visible_fields: IdeaField::ALL.to_vec(),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    /// Board whose public link shows only the `now` column and no optional
    /// fields.
    fn narrow_board() -> Board {
        Board {
            visible_columns: vec![Column::Now],
            visible_fields: vec![],
            ..board(1)
        }
    }

    fn moved(from_column: Column, to_column: Column, position: i32) -> BoardEvent {
        BoardEvent::IdeaMoved {
            idea_id: 5,
            from_column,
            to_column,
            position,
            status: IdeaStatus::Active,
        }
    }

    fn public_value(event: &BoardEvent, board: &Board) -> Option<serde_json::Value> {
        event
            .to_public_json(board)
            .unwrap()
            .map(|json| serde_json::from_str(&json).unwrap())
    }

    #[test]
    fn test_idea_update_envelope() {
        let json = BoardEvent::IdeaUpdated { idea: idea() }.to_json(1).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "idea_update");
        assert_eq!(value["boardId"], 1);
        assert_eq!(value["ideaId"], 5);
        assert_eq!(value["data"]["one_liner"], "Share links");
    }

    #[test]
    fn test_idea_moved_envelope() {
        let event = moved(Column::Now, Column::WontDo, 2);
        let value: serde_json::Value = serde_json::from_str(&event.to_json(1).unwrap()).unwrap();
        assert_eq!(value["type"], "idea_moved");
        assert_eq!(value["data"]["fromColumn"], "now");
        assert_eq!(value["data"]["toColumn"], "wont_do");
        assert_eq!(value["data"]["position"], 2);
        assert!(value["data"].get("status").is_none());
    }

    #[test]
    fn test_board_updated_has_no_idea_id() {
        let event = BoardEvent::BoardUpdated { board: board(1) };
        let value: serde_json::Value = serde_json::from_str(&event.to_json(1).unwrap()).unwrap();
        assert_eq!(value["type"], "board_updated");
        assert!(value.get("ideaId").is_none());
        assert_eq!(value["data"]["name"], "Roadmap");
        assert!(value["data"].get("public_token").is_none());
        assert!(value["data"].get("owner_id").is_none());
    }

    #[test]
    fn test_feedback_animation_envelope() {
        let event = BoardEvent::FeedbackAnimation {
            idea_id: 5,
            feedback: FeedbackKind::emoji("🔥").unwrap(),
            timestamp: Utc::now(),
        };
        let value: serde_json::Value = serde_json::from_str(&event.to_json(3).unwrap()).unwrap();
        assert_eq!(value["type"], "feedback_animation");
        assert_eq!(value["boardId"], 3);
        assert_eq!(value["data"]["feedbackType"], "emoji");
        assert_eq!(value["data"]["emoji"], "🔥");

        let thumbs = BoardEvent::FeedbackAnimation {
            idea_id: 5,
            feedback: FeedbackKind::ThumbsUp,
            timestamp: Utc::now(),
        };
        let value: serde_json::Value = serde_json::from_str(&thumbs.to_json(3).unwrap()).unwrap();
        assert_eq!(value["data"]["feedbackType"], "thumbs_up");
        assert!(value["data"]["emoji"].is_null());
    }

    #[test]
    fn test_public_idea_update_strips_hidden_fields() {
        let value = public_value(&BoardEvent::IdeaUpdated { idea: idea() }, &narrow_board())
            .expect("idea in a visible column is shown");
        assert_eq!(value["type"], "idea_update");
        assert_eq!(value["data"]["one_liner"], "Share links");
        assert!(value["data"].get("description").is_none());
        assert!(value["data"].get("thumbs_up").is_none());
        assert!(value["data"].get("column").is_none());
    }

    #[test]
    fn test_public_idea_update_skips_hidden_column() {
        let parked = Idea {
            column: Column::Parking,
            ..idea()
        };
        assert!(public_value(&BoardEvent::IdeaUpdated { idea: parked }, &narrow_board()).is_none());
    }

    #[test]
    fn test_public_archive_in_visible_column_asks_for_refetch() {
        let archived = Idea {
            status: IdeaStatus::Archived,
            ..idea()
        };
        let value =
            public_value(&BoardEvent::IdeaUpdated { idea: archived }, &narrow_board()).unwrap();
        assert_eq!(value["type"], "board_updated");
        assert!(value.get("ideaId").is_none());
    }

    #[test]
    fn test_public_moves_never_name_hidden_columns() {
        let board = Board {
            visible_columns: vec![Column::Now, Column::Next],
            ..narrow_board()
        };
        let shown = public_value(&moved(Column::Now, Column::Next, 1), &board).unwrap();
        assert_eq!(shown["type"], "idea_moved");

        let leaving = public_value(&moved(Column::Now, Column::Parking, 0), &board).unwrap();
        assert_eq!(leaving["type"], "board_updated");
        assert!(!leaving.to_string().contains("parking"));

        let entering = public_value(&moved(Column::Later, Column::Now, 0), &board).unwrap();
        assert_eq!(entering["type"], "board_updated");

        assert!(public_value(&moved(Column::Parking, Column::Later, 0), &board).is_none());

        let archived = BoardEvent::IdeaMoved {
            idea_id: 5,
            from_column: Column::Now,
            to_column: Column::Next,
            position: 0,
            status: IdeaStatus::Archived,
        };
        assert!(public_value(&archived, &board).is_none());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_viewer() {
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = BroadcastDispatcher::new(Arc::clone(&registry));
        let (a, mut rx_a) = Connection::new(4);
        let (b, mut rx_b) = Connection::new(4);
        registry.register(1, a);
        registry.register(1, b);

        let report = dispatcher.broadcast(&board(1), &BoardEvent::IdeaUpdated { idea: idea() });
        assert_eq!(report, BroadcastReport { delivered: 2, evicted: 0 });
        assert!(rx_a.recv().await.unwrap().contains("idea_update"));
        assert!(rx_b.recv().await.unwrap().contains("idea_update"));
    }

    #[tokio::test]
    async fn test_public_viewer_gets_projection_and_owner_gets_full_idea() {
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = BroadcastDispatcher::new(Arc::clone(&registry));
        let (owner, mut owner_rx) = Connection::new(4);
        let (public, mut public_rx) = Connection::with_audience(4, Audience::Public);
        registry.register(1, owner);
        registry.register(1, public);

        let board = narrow_board();
        dispatcher.broadcast(&board, &BoardEvent::IdeaUpdated { idea: idea() });
        let full: serde_json::Value =
            serde_json::from_str(&owner_rx.recv().await.unwrap()).unwrap();
        assert_eq!(full["data"]["description"], "Internal: needs legal review");
        let projected = public_rx.recv().await.unwrap();
        assert!(!projected.contains("legal review"));

        let parked = Idea {
            column: Column::Parking,
            ..idea()
        };
        let report = dispatcher.broadcast(&board, &BoardEvent::IdeaUpdated { idea: parked });
        assert_eq!(report, BroadcastReport { delivered: 1, evicted: 0 });
        assert!(owner_rx.try_recv().is_ok());
        assert!(public_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failed_viewer_is_evicted_and_others_still_receive() {
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = BroadcastDispatcher::new(Arc::clone(&registry));
        let mut receivers = Vec::new();
        for _ in 0..3 {
            let (conn, rx) = Connection::new(4);
            registry.register(1, conn);
            receivers.push(rx);
        }
        let (broken, broken_rx) = Connection::new(4);
        registry.register(1, broken.clone());
        drop(broken_rx);

        let report = dispatcher.broadcast(&board(1), &BoardEvent::IdeaUpdated { idea: idea() });
        assert_eq!(report, BroadcastReport { delivered: 3, evicted: 1 });
        assert_eq!(registry.connections_for(1).len(), 3);
        assert!(broken.is_closed());
        for rx in &mut receivers {
            assert!(rx.recv().await.is_some());
        }
    }

    #[test]
    fn test_broadcast_to_board_without_viewers_is_noop() {
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = BroadcastDispatcher::new(Arc::clone(&registry));
        let (other, _rx) = Connection::new(4);
        registry.register(2, other);
        let report = dispatcher.broadcast(&board(1), &BoardEvent::IdeaUpdated { idea: idea() });
        assert_eq!(report, BroadcastReport::default());
    }

    #[tokio::test]
    async fn test_events_for_one_viewer_arrive_in_dispatch_order() {
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = BroadcastDispatcher::new(Arc::clone(&registry));
        let (conn, mut rx) = Connection::new(16);
        registry.register(1, conn);
        for position in 0..5 {
            dispatcher.broadcast(&board(1), &moved(Column::Now, Column::Next, position));
        }
        for position in 0..5 {
            let msg = rx.recv().await.unwrap();
            let value: serde_json::Value = serde_json::from_str(&msg).unwrap();
            assert_eq!(value["data"]["position"], position);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_broadcasts_and_eviction_close_each_viewer_once() {
        const VIEWERS: usize = 40;
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = BroadcastDispatcher::new(Arc::clone(&registry));

        let mut connections = Vec::new();
        let mut kept_receivers = Vec::new();
        for i in 0..VIEWERS {
            let (conn, rx) = Connection::new(2);
            registry.register(9, conn.clone());
            // Every third viewer has already gone away.
            if i % 3 == 0 {
                drop(rx);
            } else {
                kept_receivers.push(rx);
            }
            connections.push(conn);
        }

        let mut broadcasters = Vec::new();
        for round in 0..4 {
            let dispatcher = dispatcher.clone();
            broadcasters.push(tokio::spawn(async move {
                let mut evicted = 0;
                for position in 0..25 {
                    tokio::task::yield_now().await;
                    let event = moved(Column::Now, Column::Next, round * 100 + position);
                    evicted += dispatcher.broadcast(&board(9), &event).evicted;
                }
                evicted
            }));
        }
        let evictor = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                registry.evict_board(9)
            })
        };

        let mut closes = evictor.await.unwrap();
        for task in broadcasters {
            closes += task.await.unwrap();
        }
        closes += registry.evict_board(9);

        assert!(connections.iter().all(Connection::is_closed));
        assert_eq!(closes, VIEWERS, "each viewer is closed by exactly one path");
        assert_eq!(registry.connection_count(), 0);
        assert_eq!(registry.board_count(), 0);
        drop(kept_receivers);
    }
}
