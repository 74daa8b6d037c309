use chrono::{Local, NaiveDate, Utc};
use serde_json::json;

use crate::cleanup;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::lifecycle;
use crate::store;

fn resolve_today(req: &Request) -> Result<Option<NaiveDate>, serde_json::Value> {
    let Some(raw) = optional_str(req, "today") else {
        return Ok(None);
    };
    match store::parse_date(&raw) {
        Some(d) => Ok(Some(d)),
        None => Err(err(
            &req.id,
            "bad_params",
            "today must be a YYYY-MM-DD date",
            Some(json!({ "today": raw })),
        )),
    }
}

/// The login trigger point. The shell calls this after verifying
/// credentials and before establishing the session; whatever happens in
/// here must never block the login, so every sub-step reports through the
/// summaries instead of failing the request.
fn handle_login_status_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let user_id = match required_str(req, "userId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let role = optional_str(req, "role");
    let today_override = match resolve_today(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let today = today_override.unwrap_or_else(|| Local::now().date_naive());
    // Notification TTLs compare against an ISO timestamp; a date override
    // pins it to that day's midnight so replayed passes stay deterministic.
    let now = match today_override {
        Some(d) => format!("{}T00:00:00Z", d.format("%Y-%m-%d")),
        None => Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
    };

    let mut transitions = lifecycle::run_status_update(conn, today);

    let mut cleanup_summary = cleanup::run_enforcement(conn, &now);

    let user_notifications_deleted =
        match cleanup::cleanup_user_expired_notifications(conn, &user_id, &now) {
            Ok(n) => n as i64,
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "user notification cleanup failed");
                cleanup_summary
                    .errors
                    .push(format!("user notification cleanup: {}", e));
                0
            }
        };

    // President logins re-check archival eligibility after the cascade;
    // with nothing newly due this second pass is a no-op.
    if role.as_deref() == Some("president") {
        let recheck = lifecycle::run_status_update(conn, today);
        transitions.terms_archived += recheck.terms_archived;
        transitions.terms_activated += recheck.terms_activated;
        transitions.semesters_archived += recheck.semesters_archived;
        transitions.semesters_activated += recheck.semesters_activated;
        transitions.errors.extend(recheck.errors);
    }

    ok(
        &req.id,
        json!({
            "transitions": transitions,
            "cleanup": cleanup_summary,
            "userNotificationsDeleted": user_notifications_deleted
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "login.statusUpdate" => Some(handle_login_status_update(state, req)),
        _ => None,
    }
}
