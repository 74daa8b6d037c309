use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_str, required_str};
use crate::ipc::types::{AppState, Request};

fn handle_officials_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let student_no = match required_str(req, "studentNo") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let full_name = match required_str(req, "fullName") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let position = match required_str(req, "position") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let org_exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM organizations WHERE id = ?",
            [&org_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if org_exists.is_none() {
        return err(&req.id, "not_found", "organization not found", None);
    }

    let semester_exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM semesters WHERE id = ?",
            [&semester_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if semester_exists.is_none() {
        return err(&req.id, "not_found", "semester not found", None);
    }

    let official_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO student_officials(id, org_id, semester_id, student_no, full_name, position)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &official_id,
            &org_id,
            &semester_id,
            &student_no,
            &full_name,
            &position,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "student_officials" })),
        );
    }

    ok(&req.id, json!({ "officialId": official_id }))
}

fn handle_officials_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let org_id = optional_str(req, "orgId");

    let sql = "SELECT o.id, o.org_id, o.semester_id, o.student_no, o.full_name, o.position
               FROM student_officials o
               JOIN semesters s ON s.id = o.semester_id
               JOIN terms t ON t.id = s.term_id
               WHERE s.status = 'active' AND t.status = 'active'
                 AND (?1 IS NULL OR o.org_id = ?1)
               ORDER BY o.full_name";
    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([org_id.as_deref()], |row| {
            let id: String = row.get(0)?;
            let org_id: String = row.get(1)?;
            let semester_id: String = row.get(2)?;
            let student_no: String = row.get(3)?;
            let full_name: String = row.get(4)?;
            let position: String = row.get(5)?;
            Ok(json!({
                "id": id,
                "orgId": org_id,
                "semesterId": semester_id,
                "studentNo": student_no,
                "fullName": full_name,
                "position": position
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(officials) => ok(&req.id, json!({ "officials": officials })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

// Rosters are per-semester membership lists; setting one replaces the
// org's entries for that semester wholesale.
fn handle_rosters_set(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let Some(members) = req.params.get("members").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing/invalid members", None);
    };

    let mut parsed: Vec<(String, String)> = Vec::with_capacity(members.len());
    for m in members {
        let student_no = m
            .get("studentNo")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let full_name = m
            .get("fullName")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let (Some(student_no), Some(full_name)) = (student_no, full_name) else {
            return err(
                &req.id,
                "bad_params",
                "each member needs studentNo and fullName",
                None,
            );
        };
        parsed.push((student_no, full_name));
    }

    let org_exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM organizations WHERE id = ?",
            [&org_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if org_exists.is_none() {
        return err(&req.id, "not_found", "organization not found", None);
    }

    let semester_exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM semesters WHERE id = ?",
            [&semester_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if semester_exists.is_none() {
        return err(&req.id, "not_found", "semester not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    if let Err(e) = tx.execute(
        "DELETE FROM roster_entries WHERE org_id = ? AND semester_id = ?",
        (&org_id, &semester_id),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "roster_entries" })),
        );
    }

    for (student_no, full_name) in &parsed {
        let entry_id = Uuid::new_v4().to_string();
        if let Err(e) = tx.execute(
            "INSERT INTO roster_entries(id, org_id, semester_id, student_no, full_name)
             VALUES(?, ?, ?, ?, ?)",
            (&entry_id, &org_id, &semester_id, student_no, full_name),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "roster_entries" })),
            );
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "memberCount": parsed.len() }))
}

fn handle_rosters_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let org_id = match required_str(req, "orgId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let sql = "SELECT r.id, r.semester_id, r.student_no, r.full_name
               FROM roster_entries r
               JOIN semesters s ON s.id = r.semester_id
               JOIN terms t ON t.id = s.term_id
               WHERE r.org_id = ?
                 AND s.status = 'active' AND t.status = 'active'
               ORDER BY r.full_name";
    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&org_id], |row| {
            let id: String = row.get(0)?;
            let semester_id: String = row.get(1)?;
            let student_no: String = row.get(2)?;
            let full_name: String = row.get(3)?;
            Ok(json!({
                "id": id,
                "semesterId": semester_id,
                "studentNo": student_no,
                "fullName": full_name
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(members) => ok(&req.id, json!({ "members": members })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "officials.create" => Some(handle_officials_create(state, req)),
        "officials.list" => Some(handle_officials_list(state, req)),
        "rosters.set" => Some(handle_rosters_set(state, req)),
        "rosters.list" => Some(handle_rosters_list(state, req)),
        _ => None,
    }
}
