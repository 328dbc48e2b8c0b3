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

struct Fixture {
    course_id: String,
    type_id: String,
}

fn setup(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, workspace: &PathBuf) -> Fixture {
    let _ = request_ok(
        stdin,
        reader,
        "setup-ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let course = request_ok(
        stdin,
        reader,
        "setup-course",
        "courses.create",
        json!({ "name": "History 8" }),
    );
    let ptype = request_ok(
        stdin,
        reader,
        "setup-type",
        "types.create",
        json!({ "ownerUserId": "teacher-1", "name": "Debate", "defaultPoints": 5 }),
    );
    Fixture {
        course_id: course
            .get("courseId")
            .and_then(|v| v.as_str())
            .expect("courseId")
            .to_string(),
        type_id: ptype
            .get("typeId")
            .and_then(|v| v.as_str())
            .expect("typeId")
            .to_string(),
    }
}

fn create_student(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    course_id: &str,
    last: &str,
) -> String {
    let student = request_ok(
        stdin,
        reader,
        id,
        "students.create",
        json!({ "courseId": course_id, "lastName": last, "firstName": "Test" }),
    );
    student
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string()
}

fn assign(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    student_id: &str,
    type_id: &str,
    value: i64,
) -> serde_json::Value {
    request_ok(
        stdin,
        reader,
        id,
        "points.assign",
        json!({
            "studentId": student_id,
            "issuerId": "teacher-1",
            "typeId": type_id,
            "value": value
        }),
    )
}

#[test]
fn grade_is_relative_to_course_top_scorer() {
    let workspace = temp_dir("meritd-relative-grading");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup(&mut stdin, &mut reader, &workspace);

    let a = create_student(&mut stdin, &mut reader, "s1", &fx.course_id, "Arai");
    let b = create_student(&mut stdin, &mut reader, "s2", &fx.course_id, "Beck");

    let _ = assign(&mut stdin, &mut reader, "a1", &a, &fx.type_id, 10);
    let _ = assign(&mut stdin, &mut reader, "b1", &b, &fx.type_id, 20);

    // The max shifted when b scored 20; a's stored grade is refreshed on
    // a's next recompute.
    let _ = assign(&mut stdin, &mut reader, "a2", &a, &fx.type_id, 5);
    let _ = assign(
        &mut stdin,
        &mut reader,
        "a3",
        &a,
        &fx.type_id,
        -5,
    );

    let standings = request_ok(
        &mut stdin,
        &mut reader,
        "st",
        "summaries.course",
        json!({ "courseId": fx.course_id }),
    );
    assert_eq!(standings.get("courseMax").and_then(|v| v.as_i64()), Some(20));
    let students = standings
        .get("students")
        .and_then(|v| v.as_array())
        .expect("students");
    let row_a = students
        .iter()
        .find(|s| s.get("studentId").and_then(|v| v.as_str()) == Some(a.as_str()))
        .expect("row for a");
    assert_eq!(row_a.get("totalPoints").and_then(|v| v.as_i64()), Some(10));
    assert_eq!(
        row_a.get("averagePoints").and_then(|v| v.as_f64()),
        Some(10.0)
    );
    assert_eq!(
        row_a.get("roundedAverage").and_then(|v| v.as_i64()),
        Some(10)
    );

    let row_b = students
        .iter()
        .find(|s| s.get("studentId").and_then(|v| v.as_str()) == Some(b.as_str()))
        .expect("row for b");
    assert_eq!(
        row_b.get("roundedAverage").and_then(|v| v.as_i64()),
        Some(20)
    );
}

#[test]
fn sole_positive_total_grades_twenty() {
    let workspace = temp_dir("meritd-sole-positive");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup(&mut stdin, &mut reader, &workspace);

    let a = create_student(&mut stdin, &mut reader, "s1", &fx.course_id, "Okafor");
    let assigned = assign(&mut stdin, &mut reader, "a1", &a, &fx.type_id, 7);
    assert_eq!(
        assigned
            .pointer("/summary/roundedAverage")
            .and_then(|v| v.as_i64()),
        Some(20)
    );
}

#[test]
fn negative_total_keeps_negative_average() {
    let workspace = temp_dir("meritd-negative-average");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup(&mut stdin, &mut reader, &workspace);

    let a = create_student(&mut stdin, &mut reader, "s1", &fx.course_id, "Pavlov");
    let b = create_student(&mut stdin, &mut reader, "s2", &fx.course_id, "Quist");

    let _ = assign(&mut stdin, &mut reader, "b1", &b, &fx.type_id, 20);
    let assigned = assign(&mut stdin, &mut reader, "a1", &a, &fx.type_id, -10);

    // Only the 20 ceiling is enforced; a negative total is a penalty marker.
    assert_eq!(
        assigned
            .pointer("/summary/averagePoints")
            .and_then(|v| v.as_f64()),
        Some(-10.0)
    );
    assert_eq!(
        assigned
            .pointer("/summary/roundedAverage")
            .and_then(|v| v.as_i64()),
        Some(-10)
    );
}
