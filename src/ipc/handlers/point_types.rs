use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{calc_err, db_conn, optional_i64, optional_str, required_i64, required_str};
use crate::ipc::types::{AppState, Request};

fn handle_types_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let owner_user_id = match required_str(req, "ownerUserId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }
    let default_points = match required_i64(req, "defaultPoints") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = calc::validate_point_value(default_points) {
        return calc_err(req, e);
    }

    let type_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO participation_types(id, owner_user_id, name, default_points)
         VALUES(?, ?, ?, ?)",
        (&type_id, &owner_user_id, &name, default_points),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "participation_types" })),
        );
    }

    ok(&req.id, json!({ "typeId": type_id, "name": name }))
}

fn handle_types_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut stmt = match conn.prepare(
        "SELECT
           t.id,
           t.owner_user_id,
           t.name,
           t.default_points,
           (SELECT COUNT(*) FROM point_events pe WHERE pe.type_id = t.id) AS usage_count
         FROM participation_types t
         ORDER BY t.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let owner: String = row.get(1)?;
            let name: String = row.get(2)?;
            let default_points: i64 = row.get(3)?;
            let usage_count: i64 = row.get(4)?;
            Ok(json!({
                "id": id,
                "ownerUserId": owner,
                "name": name,
                "defaultPoints": default_points,
                "usageCount": usage_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(types) => ok(&req.id, json!({ "types": types })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

/// Ownership short-circuit: when the caller names itself, a mismatch with
/// the type's owner is rejected before any mutation.
fn check_type_owner(
    conn: &rusqlite::Connection,
    req: &Request,
    type_id: &str,
) -> Option<serde_json::Value> {
    let acting = match optional_str(req, "actingUserId") {
        Ok(v) => v?,
        Err(e) => return Some(e),
    };
    let owner: Option<String> = match conn
        .query_row(
            "SELECT owner_user_id FROM participation_types WHERE id = ?",
            [type_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return Some(err(&req.id, "db_query_failed", e.to_string(), None)),
    };
    match owner {
        Some(owner) if owner != acting => Some(err(
            &req.id,
            "forbidden",
            "participation type belongs to another user",
            Some(json!({ "typeId": type_id, "ownerUserId": owner })),
        )),
        _ => None,
    }
}

fn handle_types_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let type_id = match required_str(req, "typeId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Some(resp) = check_type_owner(conn, req, &type_id) {
        return resp;
    }
    let name = match optional_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let default_points = match optional_i64(req, "defaultPoints") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut set_parts: Vec<&str> = Vec::new();
    let mut bind: Vec<rusqlite::types::Value> = Vec::new();
    if let Some(v) = name {
        let v = v.trim().to_string();
        if v.is_empty() {
            return err(&req.id, "bad_params", "name must not be empty", None);
        }
        set_parts.push("name = ?");
        bind.push(rusqlite::types::Value::Text(v));
    }
    if let Some(v) = default_points {
        if let Err(e) = calc::validate_point_value(v) {
            return calc_err(req, e);
        }
        set_parts.push("default_points = ?");
        bind.push(rusqlite::types::Value::Integer(v));
    }
    if set_parts.is_empty() {
        return err(&req.id, "bad_params", "nothing to update", None);
    }

    bind.push(rusqlite::types::Value::Text(type_id));
    let sql = format!(
        "UPDATE participation_types SET {} WHERE id = ?",
        set_parts.join(", ")
    );
    let changed = match conn.execute(&sql, rusqlite::params_from_iter(bind)) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if changed == 0 {
        return err(&req.id, "not_found", "participation type not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_types_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let type_id = match required_str(req, "typeId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Some(resp) = check_type_owner(conn, req, &type_id) {
        return resp;
    }

    let exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM participation_types WHERE id = ?",
            [&type_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "participation type not found", None);
    }

    // Usage-count guard: a type stays as long as any ledger row points at it.
    let usage_count: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM point_events WHERE type_id = ?",
        [&type_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if usage_count > 0 {
        return err(
            &req.id,
            "conflict",
            "participation type is referenced by point events",
            Some(json!({ "typeId": type_id, "usageCount": usage_count })),
        );
    }

    if let Err(e) = conn.execute("DELETE FROM participation_types WHERE id = ?", [&type_id]) {
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "participation_types" })),
        );
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "types.create" => Some(handle_types_create(state, req)),
        "types.list" => Some(handle_types_list(state, req)),
        "types.update" => Some(handle_types_update(state, req)),
        "types.delete" => Some(handle_types_delete(state, req)),
        _ => None,
    }
}
