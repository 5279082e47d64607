use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::BoardError;

// ── Columns, statuses, fields ─────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Column {
    Parking,
    Now,
    Next,
    Later,
    Release,
    WontDo,
}

impl Column {
    /// Board order, left to right.
    pub const ALL: [Column; 6] = [
        Self::Parking,
        Self::Now,
        Self::Next,
        Self::Later,
        Self::Release,
        Self::WontDo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parking => "parking",
            Self::Now => "now",
            Self::Next => "next",
            Self::Later => "later",
            Self::Release => "release",
            Self::WontDo => "wont_do",
        }
    }
}

impl std::fmt::Display for Column {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Column {
    type Err = BoardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "parking" => Ok(Self::Parking),
            "now" => Ok(Self::Now),
            "next" => Ok(Self::Next),
            "later" => Ok(Self::Later),
            "release" => Ok(Self::Release),
            "wont_do" | "wont-do" | "won't-do" => Ok(Self::WontDo),
            _ => Err(BoardError::validation(
                "column",
                format!("unknown column '{}'", s),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IdeaStatus {
    Draft,
    Active,
    Done,
    Archived,
}

impl IdeaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Done => "done",
            Self::Archived => "archived",
        }
    }
}

impl FromStr for IdeaStatus {
    type Err = BoardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "active" => Ok(Self::Active),
            "done" => Ok(Self::Done),
            "archived" => Ok(Self::Archived),
            _ => Err(BoardError::validation(
                "status",
                format!("unknown status '{}'", s),
            )),
        }
    }
}

/// Idea attributes a board owner can expose on the public link.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IdeaField {
    Description,
    ValueStatement,
    Rice,
    InProgress,
    Status,
    ThumbsUp,
    EmojiReactions,
}

impl IdeaField {
    pub const ALL: [IdeaField; 7] = [
        Self::Description,
        Self::ValueStatement,
        Self::Rice,
        Self::InProgress,
        Self::Status,
        Self::ThumbsUp,
        Self::EmojiReactions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Description => "description",
            Self::ValueStatement => "value_statement",
            Self::Rice => "rice",
            Self::InProgress => "in_progress",
            Self::Status => "status",
            Self::ThumbsUp => "thumbs_up",
            Self::EmojiReactions => "emoji_reactions",
        }
    }
}

impl FromStr for IdeaField {
    type Err = BoardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| BoardError::validation("visible_fields", format!("unknown field '{}'", s)))
    }
}

// ── RICE ──────────────────────────────────────────────────────────────

/// RICE confidence multiplier. Only 1, 2, 4 and 8 are meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Confidence(u8);

impl Confidence {
    pub const LOW: Confidence = Confidence(1);

    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for Confidence {
    fn default() -> Self {
        Self::LOW
    }
}

impl TryFrom<u8> for Confidence {
    type Error = BoardError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 | 2 | 4 | 8 => Ok(Self(value)),
            _ => Err(BoardError::validation(
                "confidence",
                format!("{} is not one of 1, 2, 4, 8", value),
            )),
        }
    }
}

impl From<Confidence> for u8 {
    fn from(c: Confidence) -> u8 {
        c.0
    }
}

const RICE_MAX: u8 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RiceScore {
    pub reach: u8,
    pub impact: u8,
    pub confidence: Confidence,
    pub effort: u8,
}

impl RiceScore {
    pub fn new(reach: u8, impact: u8, confidence: u8, effort: u8) -> Result<Self, BoardError> {
        for (field, value) in [("reach", reach), ("impact", impact), ("effort", effort)] {
            if value > RICE_MAX {
                return Err(BoardError::validation(
                    field,
                    format!("{} exceeds {}", value, RICE_MAX),
                ));
            }
        }
        Ok(Self {
            reach,
            impact,
            confidence: Confidence::try_from(confidence)?,
            effort,
        })
    }

    /// reach × impact × confidence / effort, or 0 when no effort is set.
    pub fn score(&self) -> f64 {
        if self.effort == 0 {
            return 0.0;
        }
        f64::from(self.reach) * f64::from(self.impact) * f64::from(self.confidence.value())
            / f64::from(self.effort)
    }
}

// ── Records ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Board {
    pub id: i64,
    pub owner_id: String,
    pub name: String,
    pub description: String,
    pub public_token: String,
    pub visible_columns: Vec<Column>,
    pub visible_fields: Vec<IdeaField>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Idea {
    pub id: i64,
    pub board_id: i64,
    pub one_liner: String,
    pub description: String,
    pub value_statement: String,
    pub rice: RiceScore,
    pub column: Column,
    pub in_progress: bool,
    pub status: IdeaStatus,
    pub position: i32,
    pub thumbs_up: i64,
    pub emoji_reactions: BTreeMap<String, i64>,
    pub created_at: String,
    pub updated_at: String,
}

/// A partial idea update. Every set field is written in one statement, so a
/// compound transition is never observable half-applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdeaPatch {
    pub one_liner: Option<String>,
    pub description: Option<String>,
    pub value_statement: Option<String>,
    pub rice: Option<RiceScore>,
    pub column: Option<Column>,
    pub position: Option<i32>,
    pub in_progress: Option<bool>,
    pub status: Option<IdeaStatus>,
    pub thumbs_up: Option<i64>,
    pub emoji_reactions: Option<BTreeMap<String, i64>>,
}

impl IdeaPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply to an in-memory idea; the stored row gets the same values.
    pub fn apply_to(&self, idea: &Idea) -> Idea {
        let mut next = idea.clone();
        if let Some(v) = &self.one_liner {
            next.one_liner = v.clone();
        }
        if let Some(v) = &self.description {
            next.description = v.clone();
        }
        if let Some(v) = &self.value_statement {
            next.value_statement = v.clone();
        }
        if let Some(v) = self.rice {
            next.rice = v;
        }
        if let Some(v) = self.column {
            next.column = v;
        }
        if let Some(v) = self.position {
            next.position = v;
        }
        if let Some(v) = self.in_progress {
            next.in_progress = v;
        }
        if let Some(v) = self.status {
            next.status = v;
        }
        if let Some(v) = self.thumbs_up {
            next.thumbs_up = v;
        }
        if let Some(v) = &self.emoji_reactions {
            next.emoji_reactions = v.clone();
        }
        next
    }
}

// ── Inputs ────────────────────────────────────────────────────────────

pub const BOARD_NAME_MAX: usize = 120;
pub const ONE_LINER_MAX: usize = 200;
pub const LONG_TEXT_MAX: usize = 5000;

/// Trim and length-check a text field. `required` rejects blank values.
pub fn check_text(
    field: &'static str,
    value: &str,
    required: bool,
    max_chars: usize,
) -> Result<String, BoardError> {
    let trimmed = value.trim();
    if required && trimmed.is_empty() {
        return Err(BoardError::validation(field, "must not be empty"));
    }
    if trimmed.chars().count() > max_chars {
        return Err(BoardError::validation(
            field,
            format!("longer than {} characters", max_chars),
        ));
    }
    Ok(trimmed.to_string())
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewIdea {
    pub one_liner: String,
    pub description: String,
    pub value_statement: String,
    pub rice: RiceScore,
}

impl NewIdea {
    pub fn validated(self) -> Result<Self, BoardError> {
        Ok(Self {
            one_liner: check_text("one_liner", &self.one_liner, true, ONE_LINER_MAX)?,
            description: check_text("description", &self.description, false, LONG_TEXT_MAX)?,
            value_statement: check_text(
                "value_statement",
                &self.value_statement,
                false,
                LONG_TEXT_MAX,
            )?,
            rice: self.rice,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoardPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub visible_columns: Option<Vec<Column>>,
    pub visible_fields: Option<Vec<IdeaField>>,
}

// ── Feedback ──────────────────────────────────────────────────────────

const EMOJI_MAX_BYTES: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedbackKind {
    ThumbsUp,
    Emoji { symbol: String },
}

/// No spaces, control characters or plain ASCII. Digits, `#` and `*` are
/// accepted only as the base of a keycap sequence such as `1️⃣`.
fn is_emoji_symbol(symbol: &str) -> bool {
    let mut chars = symbol.chars().peekable();
    while let Some(c) = chars.next() {
        if c.is_whitespace() || c.is_control() {
            return false;
        }
        let keycap_base = c.is_ascii_digit() || c == '#' || c == '*';
        if c.is_ascii()
            && !(keycap_base && matches!(chars.peek(), Some('\u{FE0F}' | '\u{20E3}')))
        {
            return false;
        }
    }
    true
}

impl FeedbackKind {
    /// Validate an emoji symbol submitted by a viewer.
    pub fn emoji(symbol: &str) -> Result<Self, BoardError> {
        let symbol = symbol.trim();
        if symbol.is_empty() {
            return Err(BoardError::validation("emoji", "symbol is empty"));
        }
        if symbol.len() > EMOJI_MAX_BYTES {
            return Err(BoardError::validation(
                "emoji",
                format!("symbol longer than {} bytes", EMOJI_MAX_BYTES),
            ));
        }
        if !is_emoji_symbol(symbol) {
            return Err(BoardError::validation("emoji", "symbol is not an emoji"));
        }
        Ok(Self::Emoji {
            symbol: symbol.to_string(),
        })
    }

    /// Wire name used in live events and outbound payloads.
    pub fn feedback_type(&self) -> &'static str {
        match self {
            Self::ThumbsUp => "thumbs_up",
            Self::Emoji { .. } => "emoji",
        }
    }

    pub fn symbol(&self) -> Option<&str> {
        match self {
            Self::ThumbsUp => None,
            Self::Emoji { symbol } => Some(symbol),
        }
    }
}

impl std::fmt::Display for FeedbackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ThumbsUp => f.write_str("thumbs-up"),
            Self::Emoji { symbol } => write!(f, "emoji:{}", symbol),
        }
    }
}

/// One viewer reaction, built per request and folded into idea counters.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackEvent {
    pub board_id: i64,
    pub idea_id: i64,
    pub kind: FeedbackKind,
    pub origin: String,
    pub at: DateTime<Utc>,
}

impl FeedbackEvent {
    pub fn new(board_id: i64, idea_id: i64, kind: FeedbackKind, origin: impl Into<String>) -> Self {
        Self {
            board_id,
            idea_id,
            kind,
            origin: origin.into(),
            at: Utc::now(),
        }
    }
}

/// Detached copy of everything a channel needs to describe one feedback
/// event. Holds no reference to live board or idea state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationMessage {
    pub board_id: i64,
    pub board_name: String,
    pub board_link: Option<String>,
    pub idea_id: i64,
    pub idea_title: String,
    pub feedback: FeedbackKind,
    pub origin: String,
    pub at: DateTime<Utc>,
    pub admin_email: Option<String>,
}

impl NotificationMessage {
    /// One-line human summary, e.g. `🔥 on "Dark mode" (Roadmap)`.
    pub fn summary(&self) -> String {
        match &self.feedback {
            FeedbackKind::ThumbsUp => format!(
                "👍 New thumbs-up on \"{}\" ({})",
                self.idea_title, self.board_name
            ),
            FeedbackKind::Emoji { symbol } => format!(
                "{} New reaction on \"{}\" ({})",
                symbol, self.idea_title, self.board_name
            ),
        }
    }
}

// ── API view types ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardView {
    pub board: Board,
    pub columns: Vec<ColumnView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnView {
    pub name: Column,
    pub ideas: Vec<Idea>,
}

/// What an anonymous visitor sees through the public link.
#[derive(Debug, Clone, Serialize)]
pub struct PublicBoardView {
    pub name: String,
    pub description: String,
    pub columns: Vec<PublicColumnView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublicColumnView {
    pub name: Column,
    pub ideas: Vec<PublicIdea>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublicIdea {
    pub id: i64,
    pub one_liner: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_statement: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rice: Option<RiceScore>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_progress: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<IdeaStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbs_up: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emoji_reactions: Option<BTreeMap<String, i64>>,
}

impl PublicIdea {
    pub fn project(idea: &Idea, visible: &[IdeaField]) -> Self {
        let show = |f: IdeaField| visible.contains(&f);
        Self {
            id: idea.id,
            one_liner: idea.one_liner.clone(),
            description: show(IdeaField::Description).then(|| idea.description.clone()),
            value_statement: show(IdeaField::ValueStatement)
                .then(|| idea.value_statement.clone()),
            rice: show(IdeaField::Rice).then_some(idea.rice),
            in_progress: show(IdeaField::InProgress).then_some(idea.in_progress),
            status: show(IdeaField::Status).then_some(idea.status),
            thumbs_up: show(IdeaField::ThumbsUp).then_some(idea.thumbs_up),
            emoji_reactions: show(IdeaField::EmojiReactions)
                .then(|| idea.emoji_reactions.clone()),
        }
    }
}

impl PublicBoardView {
    /// Keep visible columns only, drop archived ideas, strip hidden fields.
    pub fn from_board_view(view: &BoardView) -> Self {
        let board = &view.board;
        let columns = view
            .columns
            .iter()
            .filter(|c| board.visible_columns.contains(&c.name))
            .map(|c| PublicColumnView {
                name: c.name,
                ideas: c
                    .ideas
                    .iter()
                    .filter(|i| i.status != IdeaStatus::Archived)
                    .map(|i| PublicIdea::project(i, &board.visible_fields))
                    .collect(),
            })
            .collect();
        Self {
            name: board.name.clone(),
            description: board.description.clone(),
            columns,
        }
    }
}
