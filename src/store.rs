use chrono::NaiveDate;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{Connection, OptionalExtension, ToSql};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Active,
    Archived,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Active => "active",
            Status::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<Status> {
        match s {
            "active" => Some(Status::Active),
            "archived" => Some(Status::Archived),
            _ => None,
        }
    }
}

impl ToSql for Status {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Status {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        Status::parse(s).ok_or(FromSqlError::InvalidType)
    }
}

impl Serialize for Status {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TermRow {
    pub id: String,
    pub label: String,
    pub start_date: String,
    pub end_date: String,
    pub status: Status,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SemesterRow {
    pub id: String,
    pub term_id: String,
    pub label: String,
    pub start_date: String,
    pub end_date: String,
    pub status: Status,
}

impl TermRow {
    pub fn end(&self) -> Option<NaiveDate> {
        parse_date(&self.end_date)
    }
}

impl SemesterRow {
    pub fn start(&self) -> Option<NaiveDate> {
        parse_date(&self.start_date)
    }

    pub fn end(&self) -> Option<NaiveDate> {
        parse_date(&self.end_date)
    }
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreError {
    pub code: String,
    pub message: String,
}

impl StoreError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

fn term_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TermRow> {
    Ok(TermRow {
        id: row.get(0)?,
        label: row.get(1)?,
        start_date: row.get(2)?,
        end_date: row.get(3)?,
        status: row.get(4)?,
    })
}

fn semester_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SemesterRow> {
    Ok(SemesterRow {
        id: row.get(0)?,
        term_id: row.get(1)?,
        label: row.get(2)?,
        start_date: row.get(3)?,
        end_date: row.get(4)?,
        status: row.get(5)?,
    })
}

pub fn get_active_term(conn: &Connection) -> Result<Option<TermRow>, StoreError> {
    conn.query_row(
        "SELECT id, label, start_date, end_date, status
         FROM terms
         WHERE status = 'active'
         ORDER BY start_date DESC
         LIMIT 1",
        [],
        term_from_row,
    )
    .optional()
    .map_err(|e| StoreError::new("db_query_failed", e.to_string()))
}

pub fn get_term(conn: &Connection, term_id: &str) -> Result<Option<TermRow>, StoreError> {
    conn.query_row(
        "SELECT id, label, start_date, end_date, status FROM terms WHERE id = ?",
        [term_id],
        term_from_row,
    )
    .optional()
    .map_err(|e| StoreError::new("db_query_failed", e.to_string()))
}

pub fn get_active_semester(
    conn: &Connection,
    term_id: &str,
) -> Result<Option<SemesterRow>, StoreError> {
    conn.query_row(
        "SELECT id, term_id, label, start_date, end_date, status
         FROM semesters
         WHERE term_id = ? AND status = 'active'
         ORDER BY start_date
         LIMIT 1",
        [term_id],
        semester_from_row,
    )
    .optional()
    .map_err(|e| StoreError::new("db_query_failed", e.to_string()))
}

pub fn list_semesters(conn: &Connection, term_id: &str) -> Result<Vec<SemesterRow>, StoreError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, term_id, label, start_date, end_date, status
             FROM semesters
             WHERE term_id = ?
             ORDER BY start_date",
        )
        .map_err(|e| StoreError::new("db_query_failed", e.to_string()))?;
    stmt.query_map([term_id], semester_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| StoreError::new("db_query_failed", e.to_string()))
}

pub fn list_archived_terms(conn: &Connection) -> Result<Vec<TermRow>, StoreError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, label, start_date, end_date, status
             FROM terms
             WHERE status = 'archived'
             ORDER BY start_date DESC",
        )
        .map_err(|e| StoreError::new("db_query_failed", e.to_string()))?;
    stmt.query_map([], term_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| StoreError::new("db_query_failed", e.to_string()))
}

pub fn list_archived_semesters(
    conn: &Connection,
    term_id: &str,
) -> Result<Vec<SemesterRow>, StoreError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, term_id, label, start_date, end_date, status
             FROM semesters
             WHERE term_id = ? AND status = 'archived'
             ORDER BY start_date",
        )
        .map_err(|e| StoreError::new("db_query_failed", e.to_string()))?;
    stmt.query_map([term_id], semester_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| StoreError::new("db_query_failed", e.to_string()))
}

/// Atomic single-row status write. No transition-legality checks here;
/// callers decide what a legal transition is.
pub fn set_term_status(
    conn: &Connection,
    term_id: &str,
    status: Status,
) -> Result<(), StoreError> {
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM terms WHERE id = ?", [term_id], |r| r.get(0))
        .optional()
        .map_err(|e| StoreError::new("db_query_failed", e.to_string()))?;
    if exists.is_none() {
        return Err(StoreError::new("not_found", "term not found"));
    }
    conn.execute(
        "UPDATE terms SET status = ? WHERE id = ?",
        (status, term_id),
    )
    .map_err(|e| StoreError::new("db_update_failed", e.to_string()))?;
    Ok(())
}

pub fn set_semester_status(
    conn: &Connection,
    semester_id: &str,
    status: Status,
) -> Result<(), StoreError> {
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM semesters WHERE id = ?",
            [semester_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| StoreError::new("db_query_failed", e.to_string()))?;
    if exists.is_none() {
        return Err(StoreError::new("not_found", "semester not found"));
    }
    conn.execute(
        "UPDATE semesters SET status = ? WHERE id = ?",
        (status, semester_id),
    )
    .map_err(|e| StoreError::new("db_update_failed", e.to_string()))?;
    Ok(())
}

/// Archive a term together with all of its still-active semesters in one
/// transaction. Returns (terms changed, semesters changed); both are zero
/// when a concurrent caller already archived the term.
pub fn archive_term_with_semesters(
    conn: &Connection,
    term_id: &str,
) -> Result<(usize, usize), StoreError> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| StoreError::new("db_tx_failed", e.to_string()))?;

    let terms_changed = tx
        .execute(
            "UPDATE terms SET status = 'archived' WHERE id = ? AND status = 'active'",
            [term_id],
        )
        .map_err(|e| StoreError::new("db_update_failed", e.to_string()))?;

    let semesters_changed = tx
        .execute(
            "UPDATE semesters SET status = 'archived' WHERE term_id = ? AND status = 'active'",
            [term_id],
        )
        .map_err(|e| StoreError::new("db_update_failed", e.to_string()))?;

    tx.commit()
        .map_err(|e| StoreError::new("db_commit_failed", e.to_string()))?;

    Ok((terms_changed, semesters_changed))
}
