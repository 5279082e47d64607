//! Board deletion together with its ideas and live viewers.
//!
//! Ideas and the board row go in one transaction. Viewer eviction runs only
//! after the commit; it cleans up sockets and cannot undo or redo the delete.

use std::sync::Arc;

use super::db::DbHandle;
use super::registry::ConnectionRegistry;
use crate::errors::BoardError;

/// Result of a successful cascade delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletionReport {
    pub board_id: i64,
    pub ideas_deleted: usize,
    pub viewers_evicted: usize,
}

#[derive(Clone)]
pub struct CascadeDeletionCoordinator {
    db: DbHandle,
    registry: Arc<ConnectionRegistry>,
}

impl CascadeDeletionCoordinator {
    pub fn new(db: DbHandle, registry: Arc<ConnectionRegistry>) -> Self {
        Self { db, registry }
    }

    /// Delete `board_id` on behalf of `owner_id`.
    ///
    /// A board that is missing or owned by someone else is reported as
    /// `NotFound` either way. Any failure inside the unit of work rolls it
    /// back and comes out as `Transaction`.
    pub async fn delete_board(
        &self,
        board_id: i64,
        owner_id: &str,
    ) -> Result<DeletionReport, BoardError> {
        let owner = owner_id.to_string();
        let outcome = self
            .db
            .call(move |db| {
                let uow = db.begin()?;
                match uow.find_board(board_id)? {
                    Some(board) if board.owner_id == owner => {}
                    _ => {
                        uow.abort()?;
                        return Ok(None);
                    }
                }
                let ideas_deleted = uow.delete_ideas_by_board(board_id)?;
                if !uow.delete_board(board_id)? {
                    anyhow::bail!("board {} disappeared during deletion", board_id);
                }
                uow.commit()?;
                Ok(Some(ideas_deleted))
            })
            .await;

        let ideas_deleted = match outcome {
            Ok(Some(count)) => count,
            Ok(None) => return Err(BoardError::board_not_found(board_id)),
            Err(e) => {
                tracing::error!(board_id, error = %format!("{:#}", e), "Board deletion rolled back");
                return Err(BoardError::Transaction(e));
            }
        };

        let viewers_evicted = self.registry.evict_board(board_id);
        tracing::info!(board_id, ideas_deleted, viewers_evicted, "Deleted board");
        Ok(DeletionReport {
            board_id,
            ideas_deleted,
            viewers_evicted,
        })
    }
}
