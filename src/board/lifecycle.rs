//! Idea lifecycle state machine.
//!
//! Every transition is a pure function of the current idea and the request,
//! producing one [`IdeaPatch`]. The caller persists the patch with a single
//! write, so fields that change together (status `done` and column
//! `release`) are never stored or read apart.
//!
//! Invariants kept by construction:
//! - `column == Parking` implies `in_progress == false`
//! - `status == Done` is only ever entered together with `column == Release`
//! - feedback counters never decrease

use super::models::{Column, FeedbackKind, Idea, IdeaPatch, IdeaStatus};
use crate::errors::BoardError;

/// A requested change to an idea's workflow state.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Move { column: Column, position: i32 },
    MarkInProgress(bool),
    SetStatus(IdeaStatus),
    RecordFeedback(FeedbackKind),
}

/// Resolve a transition into the patch that must be written atomically.
pub fn apply(idea: &Idea, transition: &Transition) -> Result<IdeaPatch, BoardError> {
    match transition {
        Transition::Move { column, position } => move_to(idea, *column, *position),
        Transition::MarkInProgress(flag) => mark_in_progress(idea, *flag),
        Transition::SetStatus(status) => Ok(set_status(idea, *status)),
        Transition::RecordFeedback(kind) => Ok(record_feedback(idea, kind)),
    }
}

/// Move to any column at the given position.
///
/// Entering Parking clears the in-progress flag. Leaving Release does not
/// touch the status, so a done idea moved back keeps `status == Done`.
pub fn move_to(_idea: &Idea, column: Column, position: i32) -> Result<IdeaPatch, BoardError> {
    if position < 0 {
        return Err(BoardError::validation(
            "position",
            format!("{} is negative", position),
        ));
    }
    let mut patch = IdeaPatch {
        column: Some(column),
        position: Some(position),
        ..IdeaPatch::default()
    };
    if column == Column::Parking {
        patch.in_progress = Some(false);
    }
    Ok(patch)
}

/// Same as [`move_to`] for a column name received over the wire.
pub fn move_named(idea: &Idea, column: &str, position: i32) -> Result<IdeaPatch, BoardError> {
    move_to(idea, column.parse()?, position)
}

pub fn mark_in_progress(idea: &Idea, in_progress: bool) -> Result<IdeaPatch, BoardError> {
    if in_progress && idea.column == Column::Parking {
        return Err(BoardError::validation(
            "in_progress",
            "move the idea out of parking before starting it",
        ));
    }
    Ok(IdeaPatch {
        in_progress: Some(in_progress),
        ..IdeaPatch::default()
    })
}

/// Change the status. `Done` is a compound transition that also moves the
/// idea to Release in the same patch.
pub fn set_status(_idea: &Idea, status: IdeaStatus) -> IdeaPatch {
    let mut patch = IdeaPatch {
        status: Some(status),
        ..IdeaPatch::default()
    };
    if status == IdeaStatus::Done {
        patch.column = Some(Column::Release);
    }
    patch
}

/// Fold one feedback event into the idea counters. No cap, no dedup.
pub fn record_feedback(idea: &Idea, kind: &FeedbackKind) -> IdeaPatch {
    match kind {
        FeedbackKind::ThumbsUp => IdeaPatch {
            thumbs_up: Some(idea.thumbs_up.saturating_add(1)),
            ..IdeaPatch::default()
        },
        FeedbackKind::Emoji { symbol } => {
            let mut reactions = idea.emoji_reactions.clone();
            let count = reactions.entry(symbol.clone()).or_insert(0);
            *count = count.saturating_add(1);
            IdeaPatch {
                emoji_reactions: Some(reactions),
                ..IdeaPatch::default()
            }
        }
    }
}
