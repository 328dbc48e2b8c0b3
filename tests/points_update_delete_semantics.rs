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
    let exe = env!("CARGO_BIN_EXE_meritd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn meritd");
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

fn summary_of(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    student_id: &str,
) -> serde_json::Value {
    request_ok(
        stdin,
        reader,
        id,
        "summaries.get",
        json!({ "studentId": student_id }),
    )
    .get("summary")
    .cloned()
    .expect("summary")
}

#[test]
fn delete_recomputes_as_if_event_never_existed() {
    let workspace = temp_dir("meritd-delete-semantics");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let course = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "courses.create",
        json!({ "name": "Physics 11" }),
    );
    let course_id = course
        .get("courseId")
        .and_then(|v| v.as_str())
        .expect("courseId")
        .to_string();
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({ "courseId": course_id, "lastName": "Lindt", "firstName": "Ada" }),
    );
    let student_id = student
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string();
    let ptype = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "types.create",
        json!({ "ownerUserId": "teacher-1", "name": "Experiment", "defaultPoints": 4 }),
    );
    let type_id = ptype
        .get("typeId")
        .and_then(|v| v.as_str())
        .expect("typeId")
        .to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "points.assign",
        json!({ "studentId": student_id, "issuerId": "teacher-1", "typeId": type_id, "value": 5 }),
    );
    let baseline = summary_of(&mut stdin, &mut reader, "6", &student_id);

    let extra = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "points.assign",
        json!({ "studentId": student_id, "issuerId": "teacher-1", "typeId": type_id, "value": 9 }),
    );
    let extra_id = extra
        .get("pointId")
        .and_then(|v| v.as_str())
        .expect("pointId")
        .to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "points.delete",
        json!({ "pointId": extra_id }),
    );
    let after = summary_of(&mut stdin, &mut reader, "9", &student_id);
    assert_eq!(after, baseline, "delete must undo the event entirely");

    // Deleting an unknown id reports not_found.
    let resp = request(
        &mut stdin,
        &mut reader,
        "10",
        "points.delete",
        json!({ "pointId": "missing-point" }),
    );
    assert_eq!(
        resp.pointer("/error/code").and_then(|v| v.as_str()),
        Some("not_found")
    );
}

#[test]
fn update_reruns_the_recompute_pipeline() {
    let workspace = temp_dir("meritd-update-semantics");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let course = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "courses.create",
        json!({ "name": "Algebra 7" }),
    );
    let course_id = course
        .get("courseId")
        .and_then(|v| v.as_str())
        .expect("courseId")
        .to_string();
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({ "courseId": course_id, "lastName": "Moreno", "firstName": "Lia" }),
    );
    let student_id = student
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string();
    let ptype = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "types.create",
        json!({ "ownerUserId": "teacher-1", "name": "Homework", "defaultPoints": 2 }),
    );
    let type_id = ptype
        .get("typeId")
        .and_then(|v| v.as_str())
        .expect("typeId")
        .to_string();

    let assigned = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "points.assign",
        json!({ "studentId": student_id, "issuerId": "teacher-1", "typeId": type_id, "value": 5 }),
    );
    let point_id = assigned
        .get("pointId")
        .and_then(|v| v.as_str())
        .expect("pointId")
        .to_string();

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "points.update",
        json!({ "pointId": point_id, "typeId": type_id, "value": 8, "reason": "recount" }),
    );
    assert_eq!(
        updated
            .pointer("/summary/totalPoints")
            .and_then(|v| v.as_i64()),
        Some(8)
    );
    assert_eq!(
        updated
            .pointer("/summary/participationCount")
            .and_then(|v| v.as_i64()),
        Some(1)
    );

    // A bad value leaves the event untouched.
    let resp = request(
        &mut stdin,
        &mut reader,
        "7",
        "points.update",
        json!({ "pointId": point_id, "typeId": type_id, "value": 0 }),
    );
    assert_eq!(
        resp.pointer("/error/code").and_then(|v| v.as_str()),
        Some("bad_params")
    );
    let summary = summary_of(&mut stdin, &mut reader, "8", &student_id);
    assert_eq!(
        summary.get("totalPoints").and_then(|v| v.as_i64()),
        Some(8)
    );

    let resp = request(
        &mut stdin,
        &mut reader,
        "9",
        "points.update",
        json!({ "pointId": "missing-point", "typeId": type_id, "value": 3 }),
    );
    assert_eq!(
        resp.pointer("/error/code").and_then(|v| v.as_str()),
        Some("not_found")
    );
}
