use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, required_date, required_str};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, Status};

fn handle_terms_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let label = match required_str(req, "label") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let start = match required_date(req, "startDate") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let end = match required_date(req, "endDate") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if start > end {
        return err(
            &req.id,
            "bad_params",
            "startDate must not be after endDate",
            None,
        );
    }
    let make_active = req
        .params
        .get("makeActive")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);

    let term_id = Uuid::new_v4().to_string();
    let status = if make_active { "active" } else { "archived" };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Starting a new school year retires the previous one, semesters
    // included, in the same transaction (single active term invariant).
    if make_active {
        if let Err(e) = tx.execute(
            "UPDATE semesters SET status = 'archived'
             WHERE status = 'active'
               AND term_id IN (SELECT id FROM terms WHERE status = 'active')",
            [],
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "semesters" })),
            );
        }
        if let Err(e) = tx.execute(
            "UPDATE terms SET status = 'archived' WHERE status = 'active'",
            [],
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "terms" })),
            );
        }
    }

    if let Err(e) = tx.execute(
        "INSERT INTO terms(id, label, start_date, end_date, status) VALUES(?, ?, ?, ?, ?)",
        (
            &term_id,
            &label,
            start.format("%Y-%m-%d").to_string(),
            end.format("%Y-%m-%d").to_string(),
            status,
        ),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "terms" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "termId": term_id, "label": label, "status": status }),
    )
}

fn handle_terms_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "terms": [] }));
    };

    // Include the semester count so the dashboard can render a useful
    // school-year overview without a second round trip.
    let mut stmt = match conn.prepare(
        "SELECT
           t.id,
           t.label,
           t.start_date,
           t.end_date,
           t.status,
           (SELECT COUNT(*) FROM semesters s WHERE s.term_id = t.id) AS semester_count
         FROM terms t
         ORDER BY t.start_date DESC",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let label: String = row.get(1)?;
            let start_date: String = row.get(2)?;
            let end_date: String = row.get(3)?;
            let status: String = row.get(4)?;
            let semester_count: i64 = row.get(5)?;
            Ok(json!({
                "id": id,
                "label": label,
                "startDate": start_date,
                "endDate": end_date,
                "status": status,
                "semesterCount": semester_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(terms) => ok(&req.id, json!({ "terms": terms })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_terms_current(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let term = match store::get_active_term(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, &e.code, e.message, None),
    };
    let semester = match &term {
        Some(t) => match store::get_active_semester(conn, &t.id) {
            Ok(v) => v,
            Err(e) => return err(&req.id, &e.code, e.message, None),
        },
        None => None,
    };

    ok(&req.id, json!({ "term": term, "semester": semester }))
}

fn handle_terms_archive(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let term_id = match required_str(req, "termId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match store::get_term(conn, &term_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "term not found", None),
        Err(e) => return err(&req.id, &e.code, e.message, None),
    }

    // Already-archived terms report zero changes; the explicit trigger is
    // as repeat-safe as the login one.
    match store::archive_term_with_semesters(conn, &term_id) {
        Ok((terms, semesters)) => ok(
            &req.id,
            json!({ "termsArchived": terms, "semestersArchived": semesters }),
        ),
        Err(e) => err(&req.id, &e.code, e.message, None),
    }
}

fn handle_terms_activate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let term_id = match required_str(req, "termId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match store::get_term(conn, &term_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "term not found", None),
        Err(e) => return err(&req.id, &e.code, e.message, None),
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Administrative reactivation: retire whichever term is currently
    // active first so at most one stays active.
    if let Err(e) = tx.execute(
        "UPDATE semesters SET status = 'archived'
         WHERE status = 'active'
           AND term_id IN (SELECT id FROM terms WHERE status = 'active' AND id != ?)",
        [&term_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "semesters" })),
        );
    }
    if let Err(e) = tx.execute(
        "UPDATE terms SET status = 'archived' WHERE status = 'active' AND id != ?",
        [&term_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "terms" })),
        );
    }
    if let Err(e) = store::set_term_status(conn, &term_id, Status::Active) {
        let _ = tx.rollback();
        return err(&req.id, &e.code, e.message, None);
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

// Early close of a single semester (e.g. a shortened summer block). No
// cascade here: the dependent-row sweep converges on the next
// enforcement pass.
fn handle_semesters_archive(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let semester_id = match required_str(req, "semesterId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match store::set_semester_status(conn, &semester_id, Status::Archived) {
        Ok(()) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, &e.code, e.message, None),
    }
}

fn handle_semesters_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let term_id = match required_str(req, "termId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let label = match required_str(req, "label") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let start = match required_date(req, "startDate") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let end = match required_date(req, "endDate") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if start > end {
        return err(
            &req.id,
            "bad_params",
            "startDate must not be after endDate",
            None,
        );
    }

    let term_exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM terms WHERE id = ?", [&term_id], |r| r.get(0))
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if term_exists.is_none() {
        return err(&req.id, "not_found", "term not found", None);
    }

    let start_s = start.format("%Y-%m-%d").to_string();
    let end_s = end.format("%Y-%m-%d").to_string();

    // Overlapping sibling windows would make the activation rule
    // ambiguous, so they are rejected at creation time.
    let overlapping: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM semesters
         WHERE term_id = ? AND NOT (end_date < ? OR start_date > ?)",
        (&term_id, &start_s, &end_s),
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if overlapping > 0 {
        return err(
            &req.id,
            "bad_params",
            "date range overlaps an existing semester of this term",
            Some(json!({ "startDate": start_s, "endDate": end_s })),
        );
    }

    // New semesters start non-active; the transition engine activates one
    // when its window opens.
    let semester_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO semesters(id, term_id, label, start_date, end_date, status)
         VALUES(?, ?, ?, ?, ?, 'archived')",
        (&semester_id, &term_id, &label, &start_s, &end_s),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "semesters" })),
        );
    }

    ok(&req.id, json!({ "semesterId": semester_id, "label": label }))
}

fn handle_semesters_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let term_id = match required_str(req, "termId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match store::list_semesters(conn, &term_id) {
        Ok(semesters) => ok(&req.id, json!({ "semesters": semesters })),
        Err(e) => err(&req.id, &e.code, e.message, None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "terms.create" => Some(handle_terms_create(state, req)),
        "terms.list" => Some(handle_terms_list(state, req)),
        "terms.current" => Some(handle_terms_current(state, req)),
        "terms.archive" => Some(handle_terms_archive(state, req)),
        "terms.activate" => Some(handle_terms_activate(state, req)),
        "semesters.create" => Some(handle_semesters_create(state, req)),
        "semesters.list" => Some(handle_semesters_list(state, req)),
        "semesters.archive" => Some(handle_semesters_archive(state, req)),
        _ => None,
    }
}
