use crate::backup;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use std::path::PathBuf;
use uuid::Uuid;

fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn parse_csv_record(line: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut buf = String::new();
    let mut in_quotes = false;
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0usize;
    while i < chars.len() {
        let ch = chars[i];
        if ch == '"' {
            if in_quotes && i + 1 < chars.len() && chars[i + 1] == '"' {
                buf.push('"');
                i += 2;
                continue;
            }
            in_quotes = !in_quotes;
            i += 1;
            continue;
        }
        if ch == ',' && !in_quotes {
            out.push(buf);
            buf = String::new();
            i += 1;
            continue;
        }
        buf.push(ch);
        i += 1;
    }
    out.push(buf);
    out
}

fn handle_export_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let out_path = match required_str(req, "outPath") {
        Ok(v) => PathBuf::from(v),
        Err(resp) => return resp,
    };

    match backup::export_workspace_bundle(&workspace, &out_path) {
        Ok(summary) => ok(
            &req.id,
            json!({
                "bundleFormat": summary.bundle_format,
                "entryCount": summary.entry_count,
                "outPath": out_path.to_string_lossy()
            }),
        ),
        Err(e) => err(&req.id, "export_failed", format!("{e:#}"), None),
    }
}

fn handle_import_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let in_path = match required_str(req, "inPath") {
        Ok(v) => PathBuf::from(v),
        Err(resp) => return resp,
    };

    // Drop the open connection before the database file is swapped out.
    state.db = None;

    let summary = match backup::import_workspace_bundle(&in_path, &workspace) {
        Ok(v) => v,
        Err(e) => {
            // Reopen whatever is there so the session stays usable.
            state.db = db::open_db(&workspace).ok();
            return err(&req.id, "import_failed", format!("{e:#}"), None);
        }
    };

    match db::open_db(&workspace) {
        Ok(conn) => {
            state.db = Some(conn);
            ok(
                &req.id,
                json!({ "bundleFormatDetected": summary.bundle_format_detected }),
            )
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

fn handle_roster_export_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let mut stmt = match conn.prepare(
        "SELECT student_no, full_name
         FROM roster_entries
         WHERE org_id = ? AND semester_id = ?
         ORDER BY full_name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map((&org_id, &semester_id), |row| {
            let student_no: String = row.get(0)?;
            let full_name: String = row.get(1)?;
            Ok((student_no, full_name))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut csv = String::from("student_no,full_name\n");
    for (student_no, full_name) in &rows {
        csv.push_str(&format!(
            "{},{}\n",
            csv_quote(student_no),
            csv_quote(full_name)
        ));
    }

    ok(&req.id, json!({ "csv": csv, "rowCount": rows.len() }))
}

fn handle_roster_import_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let csv = match req.params.get("csv").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing csv", None),
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

    // Header line first, then student_no,full_name records; bad lines are
    // reported as warnings and skipped, like the rest of the exchange
    // surface.
    let mut parsed: Vec<(String, String)> = Vec::new();
    let mut warnings: Vec<serde_json::Value> = Vec::new();
    for (line_no, raw_line) in csv.lines().enumerate() {
        if line_no == 0 {
            continue;
        }
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        let fields = parse_csv_record(line);
        if fields.len() < 2 {
            warnings.push(json!({
                "line": line_no + 1,
                "code": "bad_columns",
                "message": "expected student_no,full_name"
            }));
            continue;
        }
        let student_no = fields[0].trim().to_string();
        let full_name = fields[1].trim().to_string();
        if student_no.is_empty() || full_name.is_empty() {
            warnings.push(json!({
                "line": line_no + 1,
                "code": "empty_field",
                "message": "student_no and full_name must not be empty"
            }));
            continue;
        }
        parsed.push((student_no, full_name));
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

    ok(
        &req.id,
        json!({ "imported": parsed.len(), "warnings": warnings }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "workspace.exportBundle" => Some(handle_export_bundle(state, req)),
        "workspace.importBundle" => Some(handle_import_bundle(state, req)),
        "exchange.rosterExportCsv" => Some(handle_roster_export_csv(state, req)),
        "exchange.rosterImportCsv" => Some(handle_roster_import_csv(state, req)),
        _ => None,
    }
}
