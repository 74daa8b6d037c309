use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_str, required_str};
use crate::ipc::types::{AppState, Request};

fn required_f64(req: &Request, key: &str) -> Result<f64, serde_json::Value> {
    match req.params.get(key).and_then(|v| v.as_f64()) {
        Some(v) if v >= 0.0 => Ok(v),
        Some(_) => Err(err(
            &req.id,
            "bad_params",
            format!("{} must not be negative", key),
            None,
        )),
        None => Err(err(&req.id, "bad_params", format!("missing {}", key), None)),
    }
}

fn handle_finance_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let period = match required_str(req, "period") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let total_income = match required_f64(req, "totalIncome") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let total_expense = match required_f64(req, "totalExpense") {
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

    let report_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO financial_reports(
           id, org_id, semester_id, period, total_income, total_expense, submitted_at
         ) VALUES(?, ?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (
            &report_id,
            &org_id,
            &semester_id,
            &period,
            total_income,
            total_expense,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "financial_reports" })),
        );
    }

    ok(&req.id, json!({ "reportId": report_id }))
}

fn handle_finance_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let org_id = optional_str(req, "orgId");

    let sql = "SELECT f.id, f.org_id, f.semester_id, f.period,
                      f.total_income, f.total_expense, f.submitted_at
               FROM financial_reports f
               JOIN semesters s ON s.id = f.semester_id
               JOIN terms t ON t.id = s.term_id
               WHERE s.status = 'active' AND t.status = 'active'
                 AND (?1 IS NULL OR f.org_id = ?1)
               ORDER BY f.submitted_at";
    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([org_id.as_deref()], |row| {
            let id: String = row.get(0)?;
            let org_id: String = row.get(1)?;
            let semester_id: String = row.get(2)?;
            let period: String = row.get(3)?;
            let total_income: f64 = row.get(4)?;
            let total_expense: f64 = row.get(5)?;
            let submitted_at: Option<String> = row.get(6)?;
            Ok(json!({
                "id": id,
                "orgId": org_id,
                "semesterId": semester_id,
                "period": period,
                "totalIncome": total_income,
                "totalExpense": total_expense,
                "balance": total_income - total_expense,
                "submittedAt": submitted_at
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(reports) => ok(&req.id, json!({ "reports": reports })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "finance.submit" => Some(handle_finance_submit(state, req)),
        "finance.list" => Some(handle_finance_list(state, req)),
        _ => None,
    }
}
