use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_str, required_str};
use crate::ipc::types::{AppState, Request};

const KIND_ORGANIZATION: &str = "organization";
const KIND_COUNCIL: &str = "council";

fn handle_orgs_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let kind = match req.params.get("kind").and_then(|v| v.as_str()) {
        None => KIND_ORGANIZATION.to_string(),
        Some(k) if k == KIND_ORGANIZATION || k == KIND_COUNCIL => k.to_string(),
        Some(other) => {
            return err(
                &req.id,
                "bad_params",
                "kind must be one of: organization, council",
                Some(json!({ "kind": other })),
            )
        }
    };
    let adviser = optional_str(req, "adviser");

    let org_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO organizations(id, name, kind, adviser, created_at)
         VALUES(?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (&org_id, &name, &kind, adviser.as_deref()),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "organizations" })),
        );
    }

    ok(
        &req.id,
        json!({ "orgId": org_id, "name": name, "kind": kind }),
    )
}

fn handle_orgs_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "organizations": [] }));
    };

    // Correlated subqueries rather than joins so one org with many events
    // and many awards is not double-counted.
    let mut stmt = match conn.prepare(
        "SELECT
           o.id,
           o.name,
           o.kind,
           o.adviser,
           (SELECT COUNT(*) FROM events e WHERE e.org_id = o.id) AS event_count,
           (SELECT COUNT(*) FROM awards a WHERE a.org_id = o.id) AS award_count
         FROM organizations o
         ORDER BY o.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let kind: String = row.get(2)?;
            let adviser: Option<String> = row.get(3)?;
            let event_count: i64 = row.get(4)?;
            let award_count: i64 = row.get(5)?;
            Ok(json!({
                "id": id,
                "name": name,
                "kind": kind,
                "adviser": adviser,
                "eventCount": event_count,
                "awardCount": award_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(organizations) => ok(&req.id, json!({ "organizations": organizations })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_orgs_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let org_id = match required_str(req, "orgId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let exists: Option<i64> = match conn
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
    if exists.is_none() {
        return err(&req.id, "not_found", "organization not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Explicitly delete in dependency order (no ON DELETE CASCADE). This
    // is the only path that removes an organization's history; term
    // archival never touches the organization row.
    if let Err(e) = tx.execute(
        "DELETE FROM event_approvals
         WHERE event_id IN (SELECT id FROM events WHERE org_id = ?)",
        [&org_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "event_approvals" })),
        );
    }

    if let Err(e) = tx.execute("DELETE FROM events WHERE org_id = ?", [&org_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "events" })),
        );
    }

    if let Err(e) = tx.execute("DELETE FROM awards WHERE org_id = ?", [&org_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "awards" })),
        );
    }

    if let Err(e) = tx.execute("DELETE FROM financial_reports WHERE org_id = ?", [&org_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "financial_reports" })),
        );
    }

    if let Err(e) = tx.execute("DELETE FROM student_officials WHERE org_id = ?", [&org_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "student_officials" })),
        );
    }

    if let Err(e) = tx.execute("DELETE FROM roster_entries WHERE org_id = ?", [&org_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "roster_entries" })),
        );
    }

    if let Err(e) = tx.execute("DELETE FROM organizations WHERE id = ?", [&org_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "organizations" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "orgs.create" => Some(handle_orgs_create(state, req)),
        "orgs.list" => Some(handle_orgs_list(state, req)),
        "orgs.delete" => Some(handle_orgs_delete(state, req)),
        _ => None,
    }
}
