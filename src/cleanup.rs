use rusqlite::Connection;
use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupSummary {
    pub roster_entries_deleted: i64,
    pub notifications_deleted: i64,
    pub event_approvals_deleted: i64,
    pub errors: Vec<String>,
}

/// Delete roster entries whose semester is archived, plus any entry whose
/// semester is not the current active semester. The second predicate is a
/// repair pass for stale rows left by a pass that failed midway; both are
/// safe to re-run.
pub fn enforce_roster_cleanup(conn: &Connection) -> anyhow::Result<usize> {
    let archived = conn.execute(
        "DELETE FROM roster_entries
         WHERE semester_id IN (SELECT id FROM semesters WHERE status = 'archived')",
        [],
    )?;
    let stale = conn.execute(
        "DELETE FROM roster_entries
         WHERE semester_id IS NOT NULL
           AND semester_id NOT IN (
             SELECT s.id
             FROM semesters s
             JOIN terms t ON t.id = s.term_id
             WHERE s.status = 'active' AND t.status = 'active'
           )",
        [],
    )?;
    Ok(archived + stale)
}

/// Notifications are ephemeral: expired by TTL or scoped to an archived
/// semester, they are deleted rather than retained.
pub fn enforce_notification_cleanup(conn: &Connection, now: &str) -> anyhow::Result<usize> {
    let expired = conn.execute(
        "DELETE FROM notifications
         WHERE expires_at IS NOT NULL AND expires_at <= ?",
        [now],
    )?;
    let orphaned = conn.execute(
        "DELETE FROM notifications
         WHERE semester_id IS NOT NULL
           AND semester_id IN (SELECT id FROM semesters WHERE status = 'archived')",
        [],
    )?;
    Ok(expired + orphaned)
}

/// Pending approval requests die with their term; decided rows are kept
/// as history and surface through the archive getters.
pub fn enforce_event_approval_cleanup(conn: &Connection) -> anyhow::Result<usize> {
    let deleted = conn.execute(
        "DELETE FROM event_approvals
         WHERE state = 'pending'
           AND semester_id IN (
             SELECT s.id
             FROM semesters s
             JOIN terms t ON t.id = s.term_id
             WHERE s.status = 'archived' OR t.status = 'archived'
           )",
        [],
    )?;
    Ok(deleted)
}

pub fn cleanup_user_expired_notifications(
    conn: &Connection,
    user_id: &str,
    now: &str,
) -> anyhow::Result<usize> {
    let deleted = conn.execute(
        "DELETE FROM notifications
         WHERE user_id = ? AND expires_at IS NOT NULL AND expires_at <= ?",
        (user_id, now),
    )?;
    Ok(deleted)
}

/// Run every enforcement step; each is wrapped independently so a failing
/// table never blocks the others or the triggering request.
pub fn run_enforcement(conn: &Connection, now: &str) -> CleanupSummary {
    let mut summary = CleanupSummary::default();

    match enforce_roster_cleanup(conn) {
        Ok(n) => summary.roster_entries_deleted += n as i64,
        Err(e) => {
            tracing::warn!(error = %e, "roster cleanup failed");
            summary.errors.push(format!("roster cleanup: {}", e));
        }
    }

    match enforce_notification_cleanup(conn, now) {
        Ok(n) => summary.notifications_deleted += n as i64,
        Err(e) => {
            tracing::warn!(error = %e, "notification cleanup failed");
            summary.errors.push(format!("notification cleanup: {}", e));
        }
    }

    match enforce_event_approval_cleanup(conn) {
        Ok(n) => summary.event_approvals_deleted += n as i64,
        Err(e) => {
            tracing::warn!(error = %e, "event approval cleanup failed");
            summary.errors.push(format!("event approval cleanup: {}", e));
        }
    }

    summary
}
