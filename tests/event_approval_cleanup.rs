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
fn pending_approvals_die_with_the_term_but_decided_history_survives() {
    let workspace = temp_dir("orgportal-approval-cleanup");
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
            "label": "2023-2024",
            "startDate": "2023-08-01",
            "endDate": "2024-05-31"
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
            "label": "2nd Semester",
            "startDate": "2024-01-08",
            "endDate": "2024-05-31"
        }),
    );
    let semester_id = sem
        .get("semesterId")
        .and_then(|v| v.as_str())
        .expect("semesterId")
        .to_string();

    let org = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "orgs.create",
        json!({ "name": "Student Council", "kind": "council" }),
    );
    let org_id = org
        .get("orgId")
        .and_then(|v| v.as_str())
        .expect("orgId")
        .to_string();

    let e1 = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "events.create",
        json!({
            "orgId": org_id,
            "semesterId": semester_id,
            "title": "Acquaintance Party",
            "eventDate": "2024-02-14"
        }),
    );
    let e1_id = e1
        .get("eventId")
        .and_then(|v| v.as_str())
        .expect("eventId")
        .to_string();
    let e2 = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "events.create",
        json!({
            "orgId": org_id,
            "semesterId": semester_id,
            "title": "Outreach Program",
            "eventDate": "2024-03-02"
        }),
    );
    let e2_id = e2
        .get("eventId")
        .and_then(|v| v.as_str())
        .expect("eventId")
        .to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "events.submitApproval",
        json!({ "eventId": e1_id, "requestedBy": "pres-1" }),
    );
    let a2 = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "events.submitApproval",
        json!({ "eventId": e2_id, "requestedBy": "pres-1" }),
    );
    let a2_id = a2
        .get("approvalId")
        .and_then(|v| v.as_str())
        .expect("approvalId")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "approvals.decide",
        json!({ "approvalId": a2_id, "approve": true, "decidedBy": "osas-head" }),
    );

    // Term ends. The pending request is deleted, the decided one stays.
    let r = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "login.statusUpdate",
        json!({ "userId": "u1", "today": "2024-06-01" }),
    );
    let cleanup = r.get("cleanup").expect("cleanup");
    assert_eq!(
        cleanup
            .get("eventApprovalsDeleted")
            .and_then(|v| v.as_i64()),
        Some(1)
    );

    let approvals = request_ok(&mut stdin, &mut reader, "11", "approvals.list", json!({}));
    let rows = approvals
        .get("approvals")
        .and_then(|v| v.as_array())
        .expect("approvals");
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].get("state").and_then(|v| v.as_str()),
        Some("approved")
    );
    assert_eq!(
        rows[0].get("eventTitle").and_then(|v| v.as_str()),
        Some("Outreach Program")
    );
}

#[test]
fn deciding_an_approval_twice_is_rejected() {
    let workspace = temp_dir("orgportal-approval-double-decide");
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
    let org = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "orgs.create",
        json!({ "name": "Chess Club" }),
    );
    let org_id = org
        .get("orgId")
        .and_then(|v| v.as_str())
        .expect("orgId")
        .to_string();
    let event = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "events.create",
        json!({
            "orgId": org_id,
            "semesterId": semester_id,
            "title": "Open Tournament",
            "eventDate": "2024-09-21"
        }),
    );
    let event_id = event
        .get("eventId")
        .and_then(|v| v.as_str())
        .expect("eventId")
        .to_string();
    let approval = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "events.submitApproval",
        json!({ "eventId": event_id, "requestedBy": "pres-2" }),
    );
    let approval_id = approval
        .get("approvalId")
        .and_then(|v| v.as_str())
        .expect("approvalId")
        .to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "approvals.decide",
        json!({ "approvalId": approval_id, "approve": false, "decidedBy": "osas-head" }),
    );
    let again = request(
        &mut stdin,
        &mut reader,
        "8",
        "approvals.decide",
        json!({ "approvalId": approval_id, "approve": true, "decidedBy": "osas-head" }),
    );
    assert_eq!(again.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        again
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("bad_params")
    );
}
