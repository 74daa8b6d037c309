use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_str, required_date, required_str};
use crate::ipc::types::{AppState, Request};

const STATE_PENDING: &str = "pending";
const STATE_APPROVED: &str = "approved";
const STATE_REJECTED: &str = "rejected";

fn validate_approval_state(s: &str) -> bool {
    matches!(s, STATE_PENDING | STATE_APPROVED | STATE_REJECTED)
}

fn semester_exists(
    conn: &rusqlite::Connection,
    semester_id: &str,
) -> Result<bool, rusqlite::Error> {
    conn.query_row(
        "SELECT 1 FROM semesters WHERE id = ?",
        [semester_id],
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
}

fn org_exists(conn: &rusqlite::Connection, org_id: &str) -> Result<bool, rusqlite::Error> {
    conn.query_row(
        "SELECT 1 FROM organizations WHERE id = ?",
        [org_id],
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
}

fn handle_events_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let org_id = match required_str(req, "orgId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let semester_id = match required_str(req, "semesterId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let title = match required_str(req, "title") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let event_date = match required_date(req, "eventDate") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let venue = optional_str(req, "venue");

    match org_exists(conn, &org_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "organization not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    match semester_exists(conn, &semester_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "semester not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let event_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO events(id, org_id, semester_id, title, event_date, venue)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &event_id,
            &org_id,
            &semester_id,
            &title,
            event_date.format("%Y-%m-%d").to_string(),
            venue.as_deref(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "events" })),
        );
    }

    ok(&req.id, json!({ "eventId": event_id }))
}

// Active views only show rows whose semester and term are both active;
// everything else belongs to the archive getters.
fn handle_events_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let org_id = optional_str(req, "orgId");

    let sql = "SELECT e.id, e.org_id, e.semester_id, e.title, e.event_date, e.venue
               FROM events e
               JOIN semesters s ON s.id = e.semester_id
               JOIN terms t ON t.id = s.term_id
               WHERE s.status = 'active' AND t.status = 'active'
                 AND (?1 IS NULL OR e.org_id = ?1)
               ORDER BY e.event_date";
    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([org_id.as_deref()], |row| {
            let id: String = row.get(0)?;
            let org_id: String = row.get(1)?;
            let semester_id: String = row.get(2)?;
            let title: String = row.get(3)?;
            let event_date: String = row.get(4)?;
            let venue: Option<String> = row.get(5)?;
            Ok(json!({
                "id": id,
                "orgId": org_id,
                "semesterId": semester_id,
                "title": title,
                "eventDate": event_date,
                "venue": venue
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(events) => ok(&req.id, json!({ "events": events })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_events_submit_approval(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let event_id = match required_str(req, "eventId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let requested_by = match required_str(req, "requestedBy") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let semester_id: Option<String> = match conn
        .query_row(
            "SELECT semester_id FROM events WHERE id = ?",
            [&event_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(semester_id) = semester_id else {
        return err(&req.id, "not_found", "event not found", None);
    };

    let pending: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM event_approvals WHERE event_id = ? AND state = 'pending'",
        [&event_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if pending > 0 {
        return err(
            &req.id,
            "bad_params",
            "an approval request is already pending for this event",
            None,
        );
    }

    let approval_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO event_approvals(id, event_id, semester_id, requested_by, state, created_at)
         VALUES(?, ?, ?, ?, 'pending', strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (&approval_id, &event_id, &semester_id, &requested_by),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "event_approvals" })),
        );
    }

    ok(&req.id, json!({ "approvalId": approval_id }))
}

fn handle_approvals_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let state_filter = match optional_str(req, "state") {
        None => None,
        Some(s) if validate_approval_state(&s) => Some(s),
        Some(other) => {
            return err(
                &req.id,
                "bad_params",
                "state must be one of: pending, approved, rejected",
                Some(json!({ "state": other })),
            )
        }
    };

    let sql = "SELECT a.id, a.event_id, e.title, a.requested_by, a.state, a.decided_by, a.decided_at
               FROM event_approvals a
               JOIN events e ON e.id = a.event_id
               WHERE (?1 IS NULL OR a.state = ?1)
               ORDER BY a.created_at";
    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([state_filter.as_deref()], |row| {
            let id: String = row.get(0)?;
            let event_id: String = row.get(1)?;
            let event_title: String = row.get(2)?;
            let requested_by: String = row.get(3)?;
            let state: String = row.get(4)?;
            let decided_by: Option<String> = row.get(5)?;
            let decided_at: Option<String> = row.get(6)?;
            Ok(json!({
                "id": id,
                "eventId": event_id,
                "eventTitle": event_title,
                "requestedBy": requested_by,
                "state": state,
                "decidedBy": decided_by,
                "decidedAt": decided_at
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(approvals) => ok(&req.id, json!({ "approvals": approvals })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_approvals_decide(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let approval_id = match required_str(req, "approvalId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let decided_by = match required_str(req, "decidedBy") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let approve = match req.params.get("approve").and_then(|v| v.as_bool()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing approve", None),
    };

    let new_state = if approve { STATE_APPROVED } else { STATE_REJECTED };
    // Only pending rows can be decided; repeating a decision is an error,
    // not a silent overwrite.
    let changed = match conn.execute(
        "UPDATE event_approvals
         SET state = ?, decided_by = ?, decided_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
         WHERE id = ? AND state = 'pending'",
        (new_state, &decided_by, &approval_id),
    ) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "event_approvals" })),
            )
        }
    };
    if changed == 0 {
        let exists: Option<i64> = match conn
            .query_row(
                "SELECT 1 FROM event_approvals WHERE id = ?",
                [&approval_id],
                |r| r.get(0),
            )
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        return if exists.is_some() {
            err(&req.id, "bad_params", "approval already decided", None)
        } else {
            err(&req.id, "not_found", "approval not found", None)
        };
    }

    ok(&req.id, json!({ "state": new_state }))
}

fn handle_awards_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let org_id = match required_str(req, "orgId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let semester_id = match required_str(req, "semesterId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let title = match required_str(req, "title") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let awarded_to = match required_str(req, "awardedTo") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let awarded_on = optional_str(req, "awardedOn");

    match org_exists(conn, &org_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "organization not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    match semester_exists(conn, &semester_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "semester not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let award_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO awards(id, org_id, semester_id, title, awarded_to, awarded_on)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &award_id,
            &org_id,
            &semester_id,
            &title,
            &awarded_to,
            awarded_on.as_deref(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "awards" })),
        );
    }

    ok(&req.id, json!({ "awardId": award_id }))
}

fn handle_awards_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let org_id = optional_str(req, "orgId");

    let sql = "SELECT a.id, a.org_id, a.semester_id, a.title, a.awarded_to, a.awarded_on
               FROM awards a
               JOIN semesters s ON s.id = a.semester_id
               JOIN terms t ON t.id = s.term_id
               WHERE s.status = 'active' AND t.status = 'active'
                 AND (?1 IS NULL OR a.org_id = ?1)
               ORDER BY a.awarded_on";
    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([org_id.as_deref()], |row| {
            let id: String = row.get(0)?;
            let org_id: String = row.get(1)?;
            let semester_id: String = row.get(2)?;
            let title: String = row.get(3)?;
            let awarded_to: String = row.get(4)?;
            let awarded_on: Option<String> = row.get(5)?;
            Ok(json!({
                "id": id,
                "orgId": org_id,
                "semesterId": semester_id,
                "title": title,
                "awardedTo": awarded_to,
                "awardedOn": awarded_on
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(awards) => ok(&req.id, json!({ "awards": awards })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "events.create" => Some(handle_events_create(state, req)),
        "events.list" => Some(handle_events_list(state, req)),
        "events.submitApproval" => Some(handle_events_submit_approval(state, req)),
        "approvals.list" => Some(handle_approvals_list(state, req)),
        "approvals.decide" => Some(handle_approvals_decide(state, req)),
        "awards.create" => Some(handle_awards_create(state, req)),
        "awards.list" => Some(handle_awards_list(state, req)),
        _ => None,
    }
}
