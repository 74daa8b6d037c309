use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("orgportal.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS organizations(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            kind TEXT NOT NULL,
            adviser TEXT,
            created_at TEXT
        )",
        [],
    )?;
    ensure_organizations_adviser(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS terms(
            id TEXT PRIMARY KEY,
            label TEXT NOT NULL UNIQUE,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            status TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS semesters(
            id TEXT PRIMARY KEY,
            term_id TEXT NOT NULL,
            label TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            status TEXT NOT NULL,
            FOREIGN KEY(term_id) REFERENCES terms(id),
            UNIQUE(term_id, label)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_semesters_term ON semesters(term_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_semesters_status ON semesters(status)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS events(
            id TEXT PRIMARY KEY,
            org_id TEXT NOT NULL,
            semester_id TEXT NOT NULL,
            title TEXT NOT NULL,
            event_date TEXT NOT NULL,
            venue TEXT,
            FOREIGN KEY(org_id) REFERENCES organizations(id),
            FOREIGN KEY(semester_id) REFERENCES semesters(id)
        )",
        [],
    )?;
    ensure_events_venue(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_org ON events(org_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_semester ON events(semester_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS event_approvals(
            id TEXT PRIMARY KEY,
            event_id TEXT NOT NULL,
            semester_id TEXT NOT NULL,
            requested_by TEXT NOT NULL,
            state TEXT NOT NULL,
            decided_by TEXT,
            decided_at TEXT,
            created_at TEXT,
            FOREIGN KEY(event_id) REFERENCES events(id),
            FOREIGN KEY(semester_id) REFERENCES semesters(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_event_approvals_event ON event_approvals(event_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_event_approvals_semester ON event_approvals(semester_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS awards(
            id TEXT PRIMARY KEY,
            org_id TEXT NOT NULL,
            semester_id TEXT NOT NULL,
            title TEXT NOT NULL,
            awarded_to TEXT NOT NULL,
            awarded_on TEXT,
            FOREIGN KEY(org_id) REFERENCES organizations(id),
            FOREIGN KEY(semester_id) REFERENCES semesters(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_awards_org ON awards(org_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_awards_semester ON awards(semester_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS financial_reports(
            id TEXT PRIMARY KEY,
            org_id TEXT NOT NULL,
            semester_id TEXT NOT NULL,
            period TEXT NOT NULL,
            total_income REAL NOT NULL,
            total_expense REAL NOT NULL,
            submitted_at TEXT,
            FOREIGN KEY(org_id) REFERENCES organizations(id),
            FOREIGN KEY(semester_id) REFERENCES semesters(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_financial_reports_org ON financial_reports(org_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_financial_reports_semester ON financial_reports(semester_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_officials(
            id TEXT PRIMARY KEY,
            org_id TEXT NOT NULL,
            semester_id TEXT NOT NULL,
            student_no TEXT NOT NULL,
            full_name TEXT NOT NULL,
            position TEXT NOT NULL,
            FOREIGN KEY(org_id) REFERENCES organizations(id),
            FOREIGN KEY(semester_id) REFERENCES semesters(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_officials_org ON student_officials(org_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_officials_semester ON student_officials(semester_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS roster_entries(
            id TEXT PRIMARY KEY,
            org_id TEXT NOT NULL,
            semester_id TEXT,
            student_no TEXT NOT NULL,
            full_name TEXT NOT NULL,
            FOREIGN KEY(org_id) REFERENCES organizations(id),
            FOREIGN KEY(semester_id) REFERENCES semesters(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_roster_entries_org ON roster_entries(org_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_roster_entries_semester ON roster_entries(semester_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS notifications(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            semester_id TEXT,
            message TEXT NOT NULL,
            created_at TEXT,
            expires_at TEXT,
            FOREIGN KEY(semester_id) REFERENCES semesters(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(user_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_notifications_semester ON notifications(semester_id)",
        [],
    )?;

    // Older workspaces stored '' or 'inactive' in the status columns; the
    // portal only recognizes 'active' and 'archived'.
    migrate_status_strings(&conn)?;

    Ok(conn)
}

fn ensure_organizations_adviser(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "organizations", "adviser")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE organizations ADD COLUMN adviser TEXT", [])?;
    Ok(())
}

fn ensure_events_venue(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "events", "venue")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE events ADD COLUMN venue TEXT", [])?;
    Ok(())
}

fn migrate_status_strings(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE terms SET status = 'archived' WHERE status NOT IN ('active', 'archived')",
        [],
    )?;
    conn.execute(
        "UPDATE semesters SET status = 'archived' WHERE status NOT IN ('active', 'archived')",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
