use chrono::Utc;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_str, required_str};
use crate::ipc::types::{AppState, Request};

fn handle_notifications_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let user_id = match required_str(req, "userId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let message = match required_str(req, "message") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let expires_at = optional_str(req, "expiresAt");
    let semester_id = optional_str(req, "semesterId");

    if let Some(sid) = &semester_id {
        let exists: Option<i64> = match conn
            .query_row("SELECT 1 FROM semesters WHERE id = ?", [sid], |r| r.get(0))
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if exists.is_none() {
            return err(&req.id, "not_found", "semester not found", None);
        }
    }

    let notification_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO notifications(id, user_id, semester_id, message, created_at, expires_at)
         VALUES(?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'), ?)",
        (
            &notification_id,
            &user_id,
            semester_id.as_deref(),
            &message,
            expires_at.as_deref(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "notifications" })),
        );
    }

    ok(&req.id, json!({ "notificationId": notification_id }))
}

// Listing hides expired rows even before a cleanup pass has swept them.
fn handle_notifications_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let user_id = match required_str(req, "userId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let now = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();

    let mut stmt = match conn.prepare(
        "SELECT id, semester_id, message, created_at, expires_at
         FROM notifications
         WHERE user_id = ?
           AND (expires_at IS NULL OR expires_at > ?)
         ORDER BY created_at DESC",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map((&user_id, &now), |row| {
            let id: String = row.get(0)?;
            let semester_id: Option<String> = row.get(1)?;
            let message: String = row.get(2)?;
            let created_at: Option<String> = row.get(3)?;
            let expires_at: Option<String> = row.get(4)?;
            Ok(json!({
                "id": id,
                "semesterId": semester_id,
                "message": message,
                "createdAt": created_at,
                "expiresAt": expires_at
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(notifications) => ok(&req.id, json!({ "notifications": notifications })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "notifications.create" => Some(handle_notifications_create(state, req)),
        "notifications.list" => Some(handle_notifications_list(state, req)),
        _ => None,
    }
}
