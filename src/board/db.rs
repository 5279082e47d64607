use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, params, params_from_iter};
use uuid::Uuid;

use super::lifecycle::{self, Transition};
use super::models::*;
use crate::errors::BoardError;

/// Async-safe handle to the board database.
///
/// Wraps `BoardDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so synchronous SQLite I/O never
/// ties up async worker threads. The mutex also serializes every
/// read-modify-write closure passed to [`DbHandle::call`].
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<BoardDb>>,
}

impl DbHandle {
    pub fn new(db: BoardDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&BoardDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database mutex synchronously. Only for startup and tests.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, BoardDb>> {
        self.inner
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))
    }
}

const TOKEN_ATTEMPTS: usize = 3;

const BOARD_COLUMNS: &str = "id, owner_id, name, description, public_token, visible_columns, \
     visible_fields, created_at, updated_at";

const IDEA_COLUMNS: &str = "id, board_id, one_liner, description, value_statement, reach, impact, \
     confidence, effort, column_name, in_progress, status, position, thumbs_up, emoji_reactions, \
     created_at, updated_at";

/// Unguessable public-link token: 32 hex chars from a v4 UUID.
fn new_public_token() -> String {
    Uuid::new_v4().simple().to_string()
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

pub struct BoardDb {
    conn: Connection,
}

impl BoardDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        // Ideas reference boards without ON DELETE CASCADE: a board row can
        // only go once its ideas are gone.
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS boards (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    owner_id TEXT NOT NULL,
                    name TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    public_token TEXT NOT NULL UNIQUE,
                    visible_columns TEXT NOT NULL DEFAULT '[]',
                    visible_fields TEXT NOT NULL DEFAULT '[]',
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS ideas (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    board_id INTEGER NOT NULL REFERENCES boards(id),
                    one_liner TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    value_statement TEXT NOT NULL DEFAULT '',
                    reach INTEGER NOT NULL DEFAULT 0,
                    impact INTEGER NOT NULL DEFAULT 0,
                    confidence INTEGER NOT NULL DEFAULT 1,
                    effort INTEGER NOT NULL DEFAULT 0,
                    column_name TEXT NOT NULL DEFAULT 'parking',
                    in_progress INTEGER NOT NULL DEFAULT 0,
                    status TEXT NOT NULL DEFAULT 'draft',
                    position INTEGER NOT NULL DEFAULT 0,
                    thumbs_up INTEGER NOT NULL DEFAULT 0,
                    emoji_reactions TEXT NOT NULL DEFAULT '{}',
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE INDEX IF NOT EXISTS idx_boards_owner ON boards(owner_id);
                CREATE INDEX IF NOT EXISTS idx_ideas_board ON ideas(board_id);
                CREATE INDEX IF NOT EXISTS idx_ideas_column ON ideas(board_id, column_name);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Board CRUD ────────────────────────────────────────────────────

    pub fn create_board(&self, owner_id: &str, name: &str, description: &str) -> Result<Board> {
        let name = check_text("name", name, true, BOARD_NAME_MAX)?;
        let description = check_text("description", description, false, LONG_TEXT_MAX)?;
        let columns = serde_json::to_string(&Column::ALL).context("Failed to encode columns")?;
        let fields = serde_json::to_string(&IdeaField::ALL).context("Failed to encode fields")?;

        for _ in 0..TOKEN_ATTEMPTS {
            let token = new_public_token();
            match self.conn.execute(
                "INSERT INTO boards (owner_id, name, description, public_token, visible_columns, visible_fields)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![owner_id, name, description, token, columns, fields],
            ) {
                Ok(_) => {
                    let id = self.conn.last_insert_rowid();
                    return self.find_board(id)?.context("Board not found after insert");
                }
                Err(e) if is_constraint_violation(&e) => continue,
                Err(e) => return Err(e).context("Failed to insert board"),
            }
        }
        anyhow::bail!("Could not allocate a unique public token")
    }

    pub fn list_boards(&self, owner_id: &str) -> Result<Vec<Board>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM boards WHERE owner_id = ?1 ORDER BY id",
                BOARD_COLUMNS
            ))
            .context("Failed to prepare list_boards")?;
        let rows = stmt
            .query_map(params![owner_id], read_board_row)
            .context("Failed to query boards")?;
        let mut boards = Vec::new();
        for row in rows {
            boards.push(row.context("Failed to read board row")?.into_board()?);
        }
        Ok(boards)
    }

    pub fn find_board(&self, id: i64) -> Result<Option<Board>> {
        find_board_in(&self.conn, id)
    }

    pub fn find_board_by_token(&self, token: &str) -> Result<Option<Board>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM boards WHERE public_token = ?1", BOARD_COLUMNS),
                params![token],
                read_board_row,
            )
            .optional()
            .context("Failed to query board by token")?
            .map(BoardRow::into_board)
            .transpose()
    }

    /// Apply a board patch. All changed columns are written in one statement.
    pub fn update_board(&self, id: i64, patch: &BoardPatch) -> Result<Board> {
        let mut board = self
            .find_board(id)?
            .ok_or_else(|| BoardError::board_not_found(id))?;
        if let Some(name) = &patch.name {
            board.name = check_text("name", name, true, BOARD_NAME_MAX)?;
        }
        if let Some(description) = &patch.description {
            board.description = check_text("description", description, false, LONG_TEXT_MAX)?;
        }
        if let Some(columns) = &patch.visible_columns {
            board.visible_columns = dedup_in_order(columns);
        }
        if let Some(fields) = &patch.visible_fields {
            board.visible_fields = dedup_in_order(fields);
        }
        let columns =
            serde_json::to_string(&board.visible_columns).context("Failed to encode columns")?;
        let fields =
            serde_json::to_string(&board.visible_fields).context("Failed to encode fields")?;
        self.conn
            .execute(
                "UPDATE boards SET name = ?1, description = ?2, visible_columns = ?3,
                 visible_fields = ?4, updated_at = datetime('now') WHERE id = ?5",
                params![board.name, board.description, columns, fields, id],
            )
            .context("Failed to update board")?;
        self.find_board(id)?.context("Board not found after update")
    }

    /// Issue a fresh public link. The old token stops resolving immediately.
    pub fn regenerate_public_token(&self, id: i64) -> Result<Board> {
        for _ in 0..TOKEN_ATTEMPTS {
            let token = new_public_token();
            match self.conn.execute(
                "UPDATE boards SET public_token = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![token, id],
            ) {
                Ok(0) => return Err(BoardError::board_not_found(id).into()),
                Ok(_) => return self.find_board(id)?.context("Board not found after token update"),
                Err(e) if is_constraint_violation(&e) => continue,
                Err(e) => return Err(e).context("Failed to update public token"),
            }
        }
        anyhow::bail!("Could not allocate a unique public token")
    }

    // ── Idea CRUD ─────────────────────────────────────────────────────

    /// New ideas start in Parking as drafts, after the last parked idea.
    pub fn create_idea(&self, board_id: i64, idea: NewIdea) -> Result<Idea> {
        let idea = idea.validated()?;
        if self.find_board(board_id)?.is_none() {
            return Err(BoardError::board_not_found(board_id).into());
        }
        let max_pos: i32 = self
            .conn
            .query_row(
                "SELECT COALESCE(MAX(position), -1) FROM ideas WHERE board_id = ?1 AND column_name = ?2",
                params![board_id, Column::Parking.as_str()],
                |row| row.get(0),
            )
            .context("Failed to read parking positions")?;
        self.conn
            .execute(
                "INSERT INTO ideas (board_id, one_liner, description, value_statement,
                     reach, impact, confidence, effort, column_name, status, position)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    board_id,
                    idea.one_liner,
                    idea.description,
                    idea.value_statement,
                    idea.rice.reach,
                    idea.rice.impact,
                    idea.rice.confidence.value(),
                    idea.rice.effort,
                    Column::Parking.as_str(),
                    IdeaStatus::Draft.as_str(),
                    max_pos + 1,
                ],
            )
            .context("Failed to insert idea")?;
        let id = self.conn.last_insert_rowid();
        self.find_idea(id)?.context("Idea not found after insert")
    }

    pub fn find_idea(&self, id: i64) -> Result<Option<Idea>> {
        find_idea_in(&self.conn, id)
    }

    pub fn list_ideas(&self, board_id: i64) -> Result<Vec<Idea>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM ideas WHERE board_id = ?1 ORDER BY position, id",
                IDEA_COLUMNS
            ))
            .context("Failed to prepare list_ideas")?;
        let rows = stmt
            .query_map(params![board_id], read_idea_row)
            .context("Failed to query ideas")?;
        let mut ideas = Vec::new();
        for row in rows {
            ideas.push(row.context("Failed to read idea row")?.into_idea()?);
        }
        // Board order, not the alphabetical order of the stored column name.
        ideas.sort_by_key(|idea| (idea.column, idea.position, idea.id));
        Ok(ideas)
    }

    /// Write every set field of `patch` in a single UPDATE.
    pub fn update_idea(&self, id: i64, patch: &IdeaPatch) -> Result<Idea> {
        update_idea_in(&self.conn, id, patch)
    }

    /// Run a lifecycle transition against the stored idea and persist the
    /// resulting patch. Returns the idea before and after.
    pub fn transition_idea(&self, id: i64, transition: &Transition) -> Result<(Idea, Idea)> {
        let before = self
            .find_idea(id)?
            .ok_or_else(|| BoardError::idea_not_found(id))?;
        let patch = lifecycle::apply(&before, transition)?;
        let after = self.update_idea(id, &patch)?;
        Ok((before, after))
    }

    pub fn delete_idea(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM ideas WHERE id = ?1", params![id])
            .context("Failed to delete idea")?;
        Ok(count > 0)
    }

    // ── Board view ────────────────────────────────────────────────────

    pub fn get_board_view(&self, board_id: i64) -> Result<Option<BoardView>> {
        let Some(board) = self.find_board(board_id)? else {
            return Ok(None);
        };
        let mut by_column: BTreeMap<Column, Vec<Idea>> = BTreeMap::new();
        for idea in self.list_ideas(board_id)? {
            by_column.entry(idea.column).or_default().push(idea);
        }
        let columns = Column::ALL
            .into_iter()
            .map(|name| ColumnView {
                name,
                ideas: by_column.remove(&name).unwrap_or_default(),
            })
            .collect();
        Ok(Some(BoardView { board, columns }))
    }

    // ── Unit of work ──────────────────────────────────────────────────

    /// Start an atomic unit of work. Dropping it without [`UnitOfWork::commit`]
    /// rolls everything back.
    pub fn begin(&self) -> Result<UnitOfWork<'_>> {
        // Safety: DbHandle's Mutex already guarantees single-threaded access.
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        Ok(UnitOfWork { tx })
    }

    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql).context("Failed to run raw SQL")
    }
}

/// Transactional scope over the board and idea tables.
pub struct UnitOfWork<'a> {
    tx: Transaction<'a>,
}

impl UnitOfWork<'_> {
    pub fn find_board(&self, id: i64) -> Result<Option<Board>> {
        find_board_in(&self.tx, id)
    }

    pub fn find_idea(&self, id: i64) -> Result<Option<Idea>> {
        find_idea_in(&self.tx, id)
    }

    pub fn update_idea(&self, id: i64, patch: &IdeaPatch) -> Result<Idea> {
        update_idea_in(&self.tx, id, patch)
    }

    pub fn delete_ideas_by_board(&self, board_id: i64) -> Result<usize> {
        self.tx
            .execute("DELETE FROM ideas WHERE board_id = ?1", params![board_id])
            .context("Failed to delete board ideas")
    }

    pub fn delete_board(&self, id: i64) -> Result<bool> {
        let count = self
            .tx
            .execute("DELETE FROM boards WHERE id = ?1", params![id])
            .context("Failed to delete board")?;
        Ok(count > 0)
    }

    pub fn commit(self) -> Result<()> {
        self.tx.commit().context("Failed to commit transaction")
    }

    pub fn abort(self) -> Result<()> {
        self.tx.rollback().context("Failed to roll back transaction")
    }
}

// ── Shared queries ────────────────────────────────────────────────────

fn find_board_in(conn: &Connection, id: i64) -> Result<Option<Board>> {
    conn.query_row(
        &format!("SELECT {} FROM boards WHERE id = ?1", BOARD_COLUMNS),
        params![id],
        read_board_row,
    )
    .optional()
    .context("Failed to query board")?
    .map(BoardRow::into_board)
    .transpose()
}

fn find_idea_in(conn: &Connection, id: i64) -> Result<Option<Idea>> {
    conn.query_row(
        &format!("SELECT {} FROM ideas WHERE id = ?1", IDEA_COLUMNS),
        params![id],
        read_idea_row,
    )
    .optional()
    .context("Failed to query idea")?
    .map(IdeaRow::into_idea)
    .transpose()
}

fn update_idea_in(conn: &Connection, id: i64, patch: &IdeaPatch) -> Result<Idea> {
    let mut sets: Vec<&'static str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();
    let mut set = |column: &'static str, value: Value| {
        sets.push(column);
        values.push(value);
    };

    if let Some(v) = &patch.one_liner {
        set("one_liner", Value::Text(v.clone()));
    }
    if let Some(v) = &patch.description {
        set("description", Value::Text(v.clone()));
    }
    if let Some(v) = &patch.value_statement {
        set("value_statement", Value::Text(v.clone()));
    }
    if let Some(rice) = patch.rice {
        set("reach", Value::Integer(rice.reach.into()));
        set("impact", Value::Integer(rice.impact.into()));
        set("confidence", Value::Integer(rice.confidence.value().into()));
        set("effort", Value::Integer(rice.effort.into()));
    }
    if let Some(column) = patch.column {
        set("column_name", Value::Text(column.as_str().to_string()));
    }
    if let Some(position) = patch.position {
        set("position", Value::Integer(position.into()));
    }
    if let Some(flag) = patch.in_progress {
        set("in_progress", Value::Integer(flag.into()));
    }
    if let Some(status) = patch.status {
        set("status", Value::Text(status.as_str().to_string()));
    }
    if let Some(count) = patch.thumbs_up {
        set("thumbs_up", Value::Integer(count));
    }
    if let Some(reactions) = &patch.emoji_reactions {
        let json = serde_json::to_string(reactions).context("Failed to encode emoji reactions")?;
        set("emoji_reactions", Value::Text(json));
    }

    if sets.is_empty() {
        return Ok(find_idea_in(conn, id)?.ok_or_else(|| BoardError::idea_not_found(id))?);
    }

    let assignments: Vec<String> = sets
        .iter()
        .enumerate()
        .map(|(i, column)| format!("{} = ?{}", column, i + 1))
        .collect();
    let sql = format!(
        "UPDATE ideas SET {}, updated_at = datetime('now') WHERE id = ?{}",
        assignments.join(", "),
        sets.len() + 1
    );
    values.push(Value::Integer(id));

    let changed = conn
        .execute(&sql, params_from_iter(values))
        .context("Failed to update idea")?;
    if changed == 0 {
        return Err(BoardError::idea_not_found(id).into());
    }
    find_idea_in(conn, id)?.context("Idea not found after update")
}

fn dedup_in_order<T: PartialEq + Copy>(items: &[T]) -> Vec<T> {
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        if !out.contains(item) {
            out.push(*item);
        }
    }
    out
}

// ── Row mapping ───────────────────────────────────────────────────────

/// Intermediate row struct for boards.
struct BoardRow {
    id: i64,
    owner_id: String,
    name: String,
    description: String,
    public_token: String,
    visible_columns: String,
    visible_fields: String,
    created_at: String,
    updated_at: String,
}

fn read_board_row(row: &Row<'_>) -> rusqlite::Result<BoardRow> {
    Ok(BoardRow {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        public_token: row.get(4)?,
        visible_columns: row.get(5)?,
        visible_fields: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

impl BoardRow {
    fn into_board(self) -> Result<Board> {
        let visible_columns: Vec<Column> = serde_json::from_str(&self.visible_columns)
            .context("Failed to parse visible columns JSON")?;
        let visible_fields: Vec<IdeaField> = serde_json::from_str(&self.visible_fields)
            .context("Failed to parse visible fields JSON")?;
        Ok(Board {
            id: self.id,
            owner_id: self.owner_id,
            name: self.name,
            description: self.description,
            public_token: self.public_token,
            visible_columns,
            visible_fields,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Intermediate row struct for ideas.
struct IdeaRow {
    id: i64,
    board_id: i64,
    one_liner: String,
    description: String,
    value_statement: String,
    reach: u8,
    impact: u8,
    confidence: u8,
    effort: u8,
    column_name: String,
    in_progress: bool,
    status: String,
    position: i32,
    thumbs_up: i64,
    emoji_reactions: String,
    created_at: String,
    updated_at: String,
}

fn read_idea_row(row: &Row<'_>) -> rusqlite::Result<IdeaRow> {
    Ok(IdeaRow {
        id: row.get(0)?,
        board_id: row.get(1)?,
        one_liner: row.get(2)?,
        description: row.get(3)?,
        value_statement: row.get(4)?,
        reach: row.get(5)?,
        impact: row.get(6)?,
        confidence: row.get(7)?,
        effort: row.get(8)?,
        column_name: row.get(9)?,
        in_progress: row.get(10)?,
        status: row.get(11)?,
        position: row.get(12)?,
        thumbs_up: row.get(13)?,
        emoji_reactions: row.get(14)?,
        created_at: row.get(15)?,
        updated_at: row.get(16)?,
    })
}

impl IdeaRow {
    fn into_idea(self) -> Result<Idea> {
        let column: Column = self
            .column_name
            .parse()
            .context("Failed to parse idea column")?;
        let status: IdeaStatus = self.status.parse().context("Failed to parse idea status")?;
        let rice = RiceScore::new(self.reach, self.impact, self.confidence, self.effort)
            .context("Stored RICE score out of range")?;
        let emoji_reactions: BTreeMap<String, i64> = serde_json::from_str(&self.emoji_reactions)
            .context("Failed to parse emoji reactions JSON")?;

        Ok(Idea {
            id: self.id,
            board_id: self.board_id,
            one_liner: self.one_liner,
            description: self.description,
            value_statement: self.value_statement,
            rice,
            column,
            in_progress: self.in_progress,
            status,
            position: self.position,
            thumbs_up: self.thumbs_up,
            emoji_reactions,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn new_idea(title: &str) -> NewIdea {
        NewIdea {
            one_liner: title.to_string(),
            description: String::new(),
            value_statement: String::new(),
            rice: RiceScore::default(),
        }
    }

    #[test]
    fn test_create_database_and_run_migrations() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let table_count: i32 = db.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('boards', 'ideas')",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(table_count, 2);
        Ok(())
    }

    #[test]
    fn test_create_board_defaults() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let board = db.create_board("owner-1", " Roadmap ", "Q3 plans")?;
        assert_eq!(board.name, "Roadmap");
        assert_eq!(board.owner_id, "owner-1");
        assert_eq!(board.public_token.len(), 32);
        assert!(board.public_token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(board.visible_columns, Column::ALL.to_vec());
        assert_eq!(board.visible_fields, IdeaField::ALL.to_vec());
        Ok(())
    }

    #[test]
    fn test_create_board_rejects_blank_name() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let err = db.create_board("owner-1", "  ", "").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BoardError>(),
            Some(BoardError::Validation { field: "name", .. })
        ));
        Ok(())
    }

    #[test]
    fn test_public_tokens_are_unique() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let mut tokens = std::collections::HashSet::new();
        for i in 0..50 {
            let board = db.create_board("owner", &format!("b{}", i), "")?;
            assert!(tokens.insert(board.public_token));
        }
        Ok(())
    }

    #[test]
    fn test_list_boards_scoped_to_owner() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        db.create_board("alice", "A1", "")?;
        db.create_board("bob", "B1", "")?;
        db.create_board("alice", "A2", "")?;
        let boards = db.list_boards("alice")?;
        assert_eq!(boards.len(), 2);
        assert_eq!(boards[0].name, "A1");
        assert_eq!(boards[1].name, "A2");
        Ok(())
    }

    #[test]
    fn test_find_board_by_token_and_regenerate() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let board = db.create_board("owner", "Roadmap", "")?;
        let found = db.find_board_by_token(&board.public_token)?.expect("board by token");
        assert_eq!(found.id, board.id);

        let rotated = db.regenerate_public_token(board.id)?;
        assert_ne!(rotated.public_token, board.public_token);
        assert!(db.find_board_by_token(&board.public_token)?.is_none());
        assert!(db.find_board_by_token(&rotated.public_token)?.is_some());
        Ok(())
    }

    #[test]
    fn test_update_board_fields() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let board = db.create_board("owner", "Roadmap", "")?;
        let updated = db.update_board(
            board.id,
            &BoardPatch {
                name: Some("Public roadmap".to_string()),
                visible_columns: Some(vec![Column::Now, Column::Next, Column::Now]),
                visible_fields: Some(vec![IdeaField::ThumbsUp]),
                ..BoardPatch::default()
            },
        )?;
        assert_eq!(updated.name, "Public roadmap");
        assert_eq!(updated.visible_columns, vec![Column::Now, Column::Next]);
        assert_eq!(updated.visible_fields, vec![IdeaField::ThumbsUp]);
        assert_eq!(updated.public_token, board.public_token);
        Ok(())
    }

    #[test]
    fn test_create_idea_starts_parked_draft() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let board = db.create_board("owner", "Roadmap", "")?;
        let first = db.create_idea(board.id, new_idea("First"))?;
        let second = db.create_idea(board.id, new_idea("Second"))?;
        assert_eq!(first.column, Column::Parking);
        assert_eq!(first.status, IdeaStatus::Draft);
        assert!(!first.in_progress);
        assert_eq!(first.position, 0);
        assert_eq!(second.position, 1);
        assert_eq!(first.thumbs_up, 0);
        assert!(first.emoji_reactions.is_empty());
        Ok(())
    }

    #[test]
    fn test_create_idea_on_missing_board() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let err = db.create_idea(99, new_idea("Orphan")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BoardError>(),
            Some(BoardError::NotFound { entity: "Board", .. })
        ));
        Ok(())
    }

    #[test]
    fn test_update_idea_writes_all_fields_together() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let board = db.create_board("owner", "Roadmap", "")?;
        let idea = db.create_idea(board.id, new_idea("Ship it"))?;
        let updated = db.update_idea(
            idea.id,
            &IdeaPatch {
                status: Some(IdeaStatus::Done),
                column: Some(Column::Release),
                rice: Some(RiceScore::new(10, 20, 4, 5)?),
                ..IdeaPatch::default()
            },
        )?;
        assert_eq!(updated.status, IdeaStatus::Done);
        assert_eq!(updated.column, Column::Release);
        assert_eq!(updated.rice.confidence.value(), 4);
        assert_eq!(updated.one_liner, "Ship it");
        Ok(())
    }

    #[test]
    fn test_update_missing_idea_is_not_found() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let err = db
            .update_idea(
                42,
                &IdeaPatch {
                    thumbs_up: Some(1),
                    ..IdeaPatch::default()
                },
            )
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BoardError>(),
            Some(BoardError::NotFound { entity: "Idea", .. })
        ));
        Ok(())
    }

    #[test]
    fn test_transition_set_done_persists_release() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let board = db.create_board("owner", "Roadmap", "")?;
        let idea = db.create_idea(board.id, new_idea("I2"))?;
        db.transition_idea(
            idea.id,
            &Transition::Move {
                column: Column::Now,
                position: 0,
            },
        )?;
        let (before, after) = db.transition_idea(idea.id, &Transition::SetStatus(IdeaStatus::Done))?;
        assert_eq!(before.column, Column::Now);
        assert_eq!((after.status, after.column), (IdeaStatus::Done, Column::Release));

        let (_, parked) = db.transition_idea(
            idea.id,
            &Transition::Move {
                column: Column::Parking,
                position: 0,
            },
        )?;
        assert_eq!(parked.column, Column::Parking);
        assert!(!parked.in_progress);
        assert_eq!(parked.status, IdeaStatus::Done);
        Ok(())
    }

    #[test]
    fn test_transition_rejection_leaves_idea_untouched() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let board = db.create_board("owner", "Roadmap", "")?;
        let idea = db.create_idea(board.id, new_idea("Parked"))?;
        let err = db
            .transition_idea(idea.id, &Transition::MarkInProgress(true))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BoardError>(),
            Some(BoardError::Validation { .. })
        ));
        assert_eq!(db.find_idea(idea.id)?.expect("idea"), idea);
        Ok(())
    }

    #[test]
    fn test_feedback_counters_persist() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let board = db.create_board("owner", "Roadmap", "")?;
        let idea = db.create_idea(board.id, new_idea("Popular"))?;
        for _ in 0..3 {
            db.transition_idea(idea.id, &Transition::RecordFeedback(FeedbackKind::ThumbsUp))?;
        }
        db.transition_idea(
            idea.id,
            &Transition::RecordFeedback(FeedbackKind::emoji("🔥")?),
        )?;
        let stored = db.find_idea(idea.id)?.expect("idea");
        assert_eq!(stored.thumbs_up, 3);
        assert_eq!(stored.emoji_reactions.get("🔥"), Some(&1));
        Ok(())
    }

    #[test]
    fn test_board_view_groups_by_column() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let board = db.create_board("owner", "Roadmap", "")?;
        let a = db.create_idea(board.id, new_idea("A"))?;
        db.create_idea(board.id, new_idea("B"))?;
        db.transition_idea(
            a.id,
            &Transition::Move {
                column: Column::Next,
                position: 0,
            },
        )?;

        let view = db.get_board_view(board.id)?.expect("view");
        assert_eq!(view.columns.len(), 6);
        assert_eq!(view.columns[0].name, Column::Parking);
        assert_eq!(view.columns[0].ideas.len(), 1);
        assert_eq!(view.columns[2].name, Column::Next);
        assert_eq!(view.columns[2].ideas[0].id, a.id);
        assert!(db.get_board_view(999)?.is_none());
        Ok(())
    }

    #[test]
    fn test_delete_idea() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let board = db.create_board("owner", "Roadmap", "")?;
        let idea = db.create_idea(board.id, new_idea("Gone"))?;
        assert!(db.delete_idea(idea.id)?);
        assert!(!db.delete_idea(idea.id)?);
        assert!(db.find_idea(idea.id)?.is_none());
        Ok(())
    }

    #[test]
    fn test_board_cannot_be_deleted_before_its_ideas() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let board = db.create_board("owner", "Roadmap", "")?;
        db.create_idea(board.id, new_idea("Still here"))?;
        let uow = db.begin()?;
        assert!(uow.delete_board(board.id).is_err());
        uow.abort()?;
        assert!(db.find_board(board.id)?.is_some());
        Ok(())
    }

    #[test]
    fn test_unit_of_work_commit() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let board = db.create_board("owner", "Roadmap", "")?;
        let idea = db.create_idea(board.id, new_idea("I3"))?;
        let uow = db.begin()?;
        assert_eq!(uow.delete_ideas_by_board(board.id)?, 1);
        assert!(uow.delete_board(board.id)?);
        uow.commit()?;
        assert!(db.find_board(board.id)?.is_none());
        assert!(db.find_idea(idea.id)?.is_none());
        Ok(())
    }

    #[test]
    fn test_unit_of_work_dropped_rolls_back() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let board = db.create_board("owner", "Roadmap", "")?;
        let idea = db.create_idea(board.id, new_idea("I4"))?;
        {
            let uow = db.begin()?;
            uow.delete_ideas_by_board(board.id)?;
            assert!(uow.find_idea(idea.id)?.is_none());
        }
        assert!(db.find_idea(idea.id)?.is_some());
        assert!(db.find_board(board.id)?.is_some());
        Ok(())
    }
}
