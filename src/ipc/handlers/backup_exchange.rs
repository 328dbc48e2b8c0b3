use std::path::PathBuf;

use serde_json::json;

use crate::backup;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};

fn handle_backup_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    let out_path = match req.params.get("outPath").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing outPath", None),
    };
    let Some(workspace_path) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    if let Some(conn) = state.db.as_ref() {
        let _ = conn.execute_batch("PRAGMA wal_checkpoint(FULL)");
    }

    let out = PathBuf::from(&out_path);
    let export = match backup::export_workspace_bundle(&workspace_path, &out) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "io_failed",
                e.to_string(),
                Some(json!({ "path": out_path })),
            )
        }
    };

    ok(
        &req.id,
        json!({
            "ok": true,
            "path": out_path,
            "bundleFormat": export.bundle_format,
            "entryCount": export.entry_count,
            "dbSha256": export.db_sha256
        }),
    )
}

fn handle_backup_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let in_path = match req.params.get("bundlePath").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing bundlePath", None),
    };
    let Some(workspace_path) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let src = PathBuf::from(&in_path);
    if !src.is_file() {
        return err(
            &req.id,
            "not_found",
            "bundle file not found",
            Some(json!({ "path": in_path })),
        );
    }

    // Drop the open handle before replacing the database file.
    state.db = None;

    let import = match backup::import_workspace_bundle(&src, &workspace_path) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "io_failed",
                e.to_string(),
                Some(json!({ "path": src.to_string_lossy() })),
            )
        }
    };

    match db::open_db(&workspace_path) {
        Ok(conn) => {
            state.db = Some(conn);
            ok(
                &req.id,
                json!({
                    "ok": true,
                    "workspacePath": workspace_path.to_string_lossy(),
                    "bundleFormatDetected": import.bundle_format_detected
                }),
            )
        }
        Err(e) => err(&req.id, "db_open_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.export" => Some(handle_backup_export(state, req)),
        "backup.import" => Some(handle_backup_import(state, req)),
        _ => None,
    }
}
