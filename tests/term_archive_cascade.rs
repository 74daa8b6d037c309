use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_orgportald");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn orgportald");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

#[test]
fn explicit_archive_cascades_semesters_and_flips_visibility() {
    let workspace = temp_dir("orgportal-archive-cascade");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let term = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "terms.create",
        json!({
            "label": "2024-2025",
            "startDate": "2024-08-01",
            "endDate": "2025-05-31"
        }),
    );
    let term_id = term
        .get("termId")
        .and_then(|v| v.as_str())
        .expect("termId")
        .to_string();

    let sem = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "semesters.create",
        json!({
            "termId": term_id,
            "label": "1st Semester",
            "startDate": "2024-08-01",
            "endDate": "2024-12-20"
        }),
    );
    let semester_id = sem
        .get("semesterId")
        .and_then(|v| v.as_str())
        .expect("semesterId")
        .to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "login.statusUpdate",
        json!({ "userId": "u1", "today": "2024-09-02" }),
    );

    let org = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "orgs.create",
        json!({ "name": "Science Club", "kind": "organization", "adviser": "Dr. Reyes" }),
    );
    let org_id = org
        .get("orgId")
        .and_then(|v| v.as_str())
        .expect("orgId")
        .to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "events.create",
        json!({
            "orgId": org_id,
            "semesterId": semester_id,
            "title": "Orientation Day",
            "eventDate": "2024-09-15",
            "venue": "Gymnasium"
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "awards.create",
        json!({
            "orgId": org_id,
            "semesterId": semester_id,
            "title": "Best Organization",
            "awardedTo": "Science Club",
            "awardedOn": "2024-10-01"
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "finance.submit",
        json!({
            "orgId": org_id,
            "semesterId": semester_id,
            "period": "Q1",
            "totalIncome": 1500.0,
            "totalExpense": 900.0
        }),
    );

    let active_events = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "events.list",
        json!({ "orgId": org_id }),
    );
    assert_eq!(
        active_events
            .get("events")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(1)
    );

    let archived = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "terms.archive",
        json!({ "termId": term_id }),
    );
    assert_eq!(archived.get("termsArchived").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(
        archived.get("semestersArchived").and_then(|v| v.as_i64()),
        Some(1)
    );

    // No orphaned active semester after the cascade.
    let semesters = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "semesters.list",
        json!({ "termId": term_id }),
    );
    for s in semesters
        .get("semesters")
        .and_then(|v| v.as_array())
        .expect("semesters")
    {
        assert_eq!(s.get("status").and_then(|v| v.as_str()), Some("archived"));
    }

    // Active views go dark, archive views light up.
    let active_events = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "events.list",
        json!({ "orgId": org_id }),
    );
    assert_eq!(
        active_events
            .get("events")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );

    let archived_events = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "archive.events",
        json!({ "orgId": org_id, "termId": term_id }),
    );
    let rows = archived_events
        .get("events")
        .and_then(|v| v.as_array())
        .expect("archived events");
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].get("termLabel").and_then(|v| v.as_str()),
        Some("2024-2025")
    );

    let archived_awards = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "archive.awards",
        json!({ "orgId": org_id }),
    );
    assert_eq!(
        archived_awards
            .get("awards")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(1)
    );

    let archived_reports = request_ok(
        &mut stdin,
        &mut reader,
        "15",
        "archive.financialReports",
        json!({ "orgId": org_id }),
    );
    let reports = archived_reports
        .get("reports")
        .and_then(|v| v.as_array())
        .expect("reports");
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].get("balance").and_then(|v| v.as_f64()), Some(600.0));

    // Organizations persist across terms; only their term-scoped activity
    // moved to the archive.
    let orgs = request_ok(&mut stdin, &mut reader, "16", "orgs.list", json!({}));
    let org_rows = orgs
        .get("organizations")
        .and_then(|v| v.as_array())
        .expect("organizations");
    assert_eq!(org_rows.len(), 1);
    assert_eq!(
        org_rows[0].get("name").and_then(|v| v.as_str()),
        Some("Science Club")
    );

    // Re-archiving is repeat-safe and reports zero changes.
    let again = request_ok(
        &mut stdin,
        &mut reader,
        "17",
        "terms.archive",
        json!({ "termId": term_id }),
    );
    assert_eq!(again.get("termsArchived").and_then(|v| v.as_i64()), Some(0));
    assert_eq!(
        again.get("semestersArchived").and_then(|v| v.as_i64()),
        Some(0)
    );

    let archived_terms = request_ok(&mut stdin, &mut reader, "18", "archive.terms", json!({}));
    assert_eq!(
        archived_terms
            .get("terms")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(1)
    );
}
