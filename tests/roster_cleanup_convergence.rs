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
fn archived_semester_rosters_are_swept_and_resweeping_is_a_noop() {
    let workspace = temp_dir("orgportal-roster-cleanup");
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
            "startDate": "2024-01-01",
            "endDate": "2025-05-31"
        }),
    );
    let term_id = term
        .get("termId")
        .and_then(|v| v.as_str())
        .expect("termId")
        .to_string();

    let s1 = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "semesters.create",
        json!({
            "termId": term_id,
            "label": "1st Semester",
            "startDate": "2024-01-08",
            "endDate": "2024-05-31"
        }),
    );
    let s1_id = s1
        .get("semesterId")
        .and_then(|v| v.as_str())
        .expect("semesterId")
        .to_string();
    let s2 = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "semesters.create",
        json!({
            "termId": term_id,
            "label": "2nd Semester",
            "startDate": "2024-06-03",
            "endDate": "2024-10-31"
        }),
    );
    let s2_id = s2
        .get("semesterId")
        .and_then(|v| v.as_str())
        .expect("semesterId")
        .to_string();

    // Activate the first semester and give the org a roster in it.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "login.statusUpdate",
        json!({ "userId": "u1", "today": "2024-02-01" }),
    );
    let org = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "orgs.create",
        json!({ "name": "Debate Society", "kind": "organization" }),
    );
    let org_id = org
        .get("orgId")
        .and_then(|v| v.as_str())
        .expect("orgId")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "rosters.set",
        json!({
            "orgId": org_id,
            "semesterId": s1_id,
            "members": [
                { "studentNo": "2024-0001", "fullName": "Cruz, Ana" },
                { "studentNo": "2024-0002", "fullName": "Santos, Ben" }
            ]
        }),
    );

    // The handoff login archives the ended semester; cleanup deletes its
    // roster entries in the same pass.
    let r = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "login.statusUpdate",
        json!({ "userId": "u1", "today": "2024-06-05" }),
    );
    let cleanup = r.get("cleanup").expect("cleanup");
    assert_eq!(
        cleanup.get("rosterEntriesDeleted").and_then(|v| v.as_i64()),
        Some(2)
    );

    // Membership in the now-active semester is untouched by a re-sweep.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "rosters.set",
        json!({
            "orgId": org_id,
            "semesterId": s2_id,
            "members": [
                { "studentNo": "2024-0003", "fullName": "Lim, Carla" }
            ]
        }),
    );

    let r2 = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "login.statusUpdate",
        json!({ "userId": "u1", "today": "2024-06-06" }),
    );
    let cleanup2 = r2.get("cleanup").expect("cleanup");
    assert_eq!(
        cleanup2.get("rosterEntriesDeleted").and_then(|v| v.as_i64()),
        Some(0)
    );

    let members = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "rosters.list",
        json!({ "orgId": org_id }),
    );
    let rows = members
        .get("members")
        .and_then(|v| v.as_array())
        .expect("members");
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].get("fullName").and_then(|v| v.as_str()),
        Some("Lim, Carla")
    );
}
