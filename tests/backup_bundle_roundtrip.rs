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
fn bundle_export_import_roundtrips_the_workspace() {
    let source_ws = temp_dir("meritd-backup-src");
    let target_ws = temp_dir("meritd-backup-dst");
    let bundle = std::env::temp_dir().join(format!(
        "meritd-bundle-{}.zip",
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": source_ws.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "courses.create",
        json!({ "name": "Archived 12" }),
    );

    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "backup.export",
        json!({ "outPath": bundle.to_string_lossy() }),
    );
    assert_eq!(
        exported.get("bundleFormat").and_then(|v| v.as_str()),
        Some("merit-workspace-v1")
    );
    assert!(exported
        .get("dbSha256")
        .and_then(|v| v.as_str())
        .map(|s| s.len() == 64)
        .unwrap_or(false));

    // Import into a fresh workspace and find the same course there.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "workspace.select",
        json!({ "path": target_ws.to_string_lossy() }),
    );
    let before = request_ok(&mut stdin, &mut reader, "5", "courses.list", json!({}));
    assert_eq!(
        before
            .get("courses")
            .and_then(|v| v.as_array())
            .map(|v| v.len()),
        Some(0)
    );

    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "backup.import",
        json!({ "bundlePath": bundle.to_string_lossy() }),
    );
    assert_eq!(
        imported
            .get("bundleFormatDetected")
            .and_then(|v| v.as_str()),
        Some("merit-workspace-v1")
    );

    let after = request_ok(&mut stdin, &mut reader, "7", "courses.list", json!({}));
    let names: Vec<&str> = after
        .get("courses")
        .and_then(|v| v.as_array())
        .expect("courses")
        .iter()
        .map(|c| c.get("name").and_then(|v| v.as_str()).unwrap())
        .collect();
    assert_eq!(names, vec!["Archived 12"]);

    let missing = request(
        &mut stdin,
        &mut reader,
        "8",
        "backup.import",
        json!({ "bundlePath": "/nonexistent/bundle.zip" }),
    );
    assert_eq!(
        missing.pointer("/error/code").and_then(|v| v.as_str()),
        Some("not_found")
    );
}
