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

#[test]
fn history_replays_running_sum_graded_on_todays_scale() {
    let workspace = temp_dir("meritd-history-replay");
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
        json!({ "name": "Geography 9" }),
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
        json!({ "courseId": course_id, "lastName": "Novak", "firstName": "Emil" }),
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
        json!({ "ownerUserId": "teacher-1", "name": "Map work", "defaultPoints": 5 }),
    );
    let type_id = ptype
        .get("typeId")
        .and_then(|v| v.as_str())
        .expect("typeId")
        .to_string();

    for (id, value) in [("5", 5_i64), ("6", -2), ("7", 10)] {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            id,
            "points.assign",
            json!({
                "studentId": student_id,
                "issuerId": "teacher-1",
                "typeId": type_id,
                "value": value
            }),
        );
    }

    let history = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "analytics.student.history",
        json!({ "studentId": student_id }),
    );
    let points = history
        .get("points")
        .and_then(|v| v.as_array())
        .expect("points");
    assert_eq!(points.len(), 3);

    let cumulative: Vec<i64> = points
        .iter()
        .map(|p| p.get("cumulativePoints").and_then(|v| v.as_i64()).unwrap())
        .collect();
    assert_eq!(cumulative, vec![5, 3, 13]);

    let day_points: Vec<i64> = points
        .iter()
        .map(|p| p.get("dayPoints").and_then(|v| v.as_i64()).unwrap())
        .collect();
    assert_eq!(day_points, vec![5, -2, 10]);

    // Today's course max is 13, so every step is graded against 13 — a
    // retrospective view, not a point-in-time audit.
    let grades: Vec<i64> = points
        .iter()
        .map(|p| p.get("finalGrade").and_then(|v| v.as_i64()).unwrap())
        .collect();
    assert_eq!(grades, vec![8, 5, 20]);

    for p in points {
        assert_eq!(
            p.get("participationType").and_then(|v| v.as_str()),
            Some("Map work")
        );
        assert!(p.get("date").and_then(|v| v.as_str()).is_some());
    }

    assert_eq!(
        history
            .pointer("/summary/totalPoints")
            .and_then(|v| v.as_i64()),
        Some(13)
    );
    assert_eq!(
        history
            .pointer("/summary/finalGrade")
            .and_then(|v| v.as_i64()),
        Some(20)
    );

    let resp = request(
        &mut stdin,
        &mut reader,
        "9",
        "analytics.student.history",
        json!({ "studentId": "missing-student" }),
    );
    assert_eq!(
        resp.pointer("/error/code").and_then(|v| v.as_str()),
        Some("not_found")
    );
}
