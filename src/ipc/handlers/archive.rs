use serde_json::json;

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::store;

// Strictly read-only consumers of the status store. Reporting must never
// trigger a transition; the write path stays at the login and admin
// triggers.

fn handle_archive_terms(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match store::list_archived_terms(conn) {
        Ok(terms) => ok(&req.id, json!({ "terms": terms })),
        Err(e) => err(&req.id, &e.code, e.message, None),
    }
}

fn handle_archive_semesters(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let term_id = match required_str(req, "termId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match store::list_archived_semesters(conn, &term_id) {
        Ok(semesters) => ok(&req.id, json!({ "semesters": semesters })),
        Err(e) => err(&req.id, &e.code, e.message, None),
    }
}

// A row is archive-visible as soon as its semester or its term stops
// being active, which is exactly the complement of the active views.
const ARCHIVED_SCOPE: &str = "NOT (s.status = 'active' AND t.status = 'active')
                 AND (?1 IS NULL OR x.org_id = ?1)
                 AND (?2 IS NULL OR t.id = ?2)
                 AND (?3 IS NULL OR s.id = ?3)";

struct ArchiveFilters {
    org_id: Option<String>,
    term_id: Option<String>,
    semester_id: Option<String>,
}

fn parse_filters(req: &Request) -> ArchiveFilters {
    ArchiveFilters {
        org_id: optional_str(req, "orgId"),
        term_id: optional_str(req, "termId"),
        semester_id: optional_str(req, "semesterId"),
    }
}

fn handle_archive_events(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let f = parse_filters(req);

    let sql = format!(
        "SELECT x.id, x.org_id, x.semester_id, x.title, x.event_date, x.venue, t.label
         FROM events x
         JOIN semesters s ON s.id = x.semester_id
         JOIN terms t ON t.id = s.term_id
         WHERE {}
         ORDER BY x.event_date",
        ARCHIVED_SCOPE
    );
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map(
            (
                f.org_id.as_deref(),
                f.term_id.as_deref(),
                f.semester_id.as_deref(),
            ),
            |row| {
                let id: String = row.get(0)?;
                let org_id: String = row.get(1)?;
                let semester_id: String = row.get(2)?;
                let title: String = row.get(3)?;
                let event_date: String = row.get(4)?;
                let venue: Option<String> = row.get(5)?;
                let term_label: String = row.get(6)?;
                Ok(json!({
                    "id": id,
                    "orgId": org_id,
                    "semesterId": semester_id,
                    "title": title,
                    "eventDate": event_date,
                    "venue": venue,
                    "termLabel": term_label
                }))
            },
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(events) => ok(&req.id, json!({ "events": events })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_archive_awards(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let f = parse_filters(req);

    let sql = format!(
        "SELECT x.id, x.org_id, x.semester_id, x.title, x.awarded_to, x.awarded_on, t.label
         FROM awards x
         JOIN semesters s ON s.id = x.semester_id
         JOIN terms t ON t.id = s.term_id
         WHERE {}
         ORDER BY x.awarded_on",
        ARCHIVED_SCOPE
    );
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map(
            (
                f.org_id.as_deref(),
                f.term_id.as_deref(),
                f.semester_id.as_deref(),
            ),
            |row| {
                let id: String = row.get(0)?;
                let org_id: String = row.get(1)?;
                let semester_id: String = row.get(2)?;
                let title: String = row.get(3)?;
                let awarded_to: String = row.get(4)?;
                let awarded_on: Option<String> = row.get(5)?;
                let term_label: String = row.get(6)?;
                Ok(json!({
                    "id": id,
                    "orgId": org_id,
                    "semesterId": semester_id,
                    "title": title,
                    "awardedTo": awarded_to,
                    "awardedOn": awarded_on,
                    "termLabel": term_label
                }))
            },
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(awards) => ok(&req.id, json!({ "awards": awards })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_archive_financial_reports(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let f = parse_filters(req);

    let sql = format!(
        "SELECT x.id, x.org_id, x.semester_id, x.period,
                x.total_income, x.total_expense, x.submitted_at, t.label
         FROM financial_reports x
         JOIN semesters s ON s.id = x.semester_id
         JOIN terms t ON t.id = s.term_id
         WHERE {}
         ORDER BY x.submitted_at",
        ARCHIVED_SCOPE
    );
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map(
            (
                f.org_id.as_deref(),
                f.term_id.as_deref(),
                f.semester_id.as_deref(),
            ),
            |row| {
                let id: String = row.get(0)?;
                let org_id: String = row.get(1)?;
                let semester_id: String = row.get(2)?;
                let period: String = row.get(3)?;
                let total_income: f64 = row.get(4)?;
                let total_expense: f64 = row.get(5)?;
                let submitted_at: Option<String> = row.get(6)?;
                let term_label: String = row.get(7)?;
                Ok(json!({
                    "id": id,
                    "orgId": org_id,
                    "semesterId": semester_id,
                    "period": period,
                    "totalIncome": total_income,
                    "totalExpense": total_expense,
                    "balance": total_income - total_expense,
                    "submittedAt": submitted_at,
                    "termLabel": term_label
                }))
            },
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(reports) => ok(&req.id, json!({ "reports": reports })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_archive_officials(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let f = parse_filters(req);

    let sql = format!(
        "SELECT x.id, x.org_id, x.semester_id, x.student_no, x.full_name, x.position, t.label
         FROM student_officials x
         JOIN semesters s ON s.id = x.semester_id
         JOIN terms t ON t.id = s.term_id
         WHERE {}
         ORDER BY x.full_name",
        ARCHIVED_SCOPE
    );
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map(
            (
                f.org_id.as_deref(),
                f.term_id.as_deref(),
                f.semester_id.as_deref(),
            ),
            |row| {
                let id: String = row.get(0)?;
                let org_id: String = row.get(1)?;
                let semester_id: String = row.get(2)?;
                let student_no: String = row.get(3)?;
                let full_name: String = row.get(4)?;
                let position: String = row.get(5)?;
                let term_label: String = row.get(6)?;
                Ok(json!({
                    "id": id,
                    "orgId": org_id,
                    "semesterId": semester_id,
                    "studentNo": student_no,
                    "fullName": full_name,
                    "position": position,
                    "termLabel": term_label
                }))
            },
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(officials) => ok(&req.id, json!({ "officials": officials })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "archive.terms" => Some(handle_archive_terms(state, req)),
        "archive.semesters" => Some(handle_archive_semesters(state, req)),
        "archive.events" => Some(handle_archive_events(state, req)),
        "archive.awards" => Some(handle_archive_awards(state, req)),
        "archive.financialReports" => Some(handle_archive_financial_reports(state, req)),
        "archive.officials" => Some(handle_archive_officials(state, req)),
        _ => None,
    }
}
