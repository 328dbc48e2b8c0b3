use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_str, required_str};
use crate::ipc::types::{AppState, Request};

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match optional_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let last_name = match required_str(req, "lastName") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };
    let first_name = match required_str(req, "firstName") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };
    if last_name.is_empty() || first_name.is_empty() {
        return err(&req.id, "bad_params", "names must not be empty", None);
    }

    if let Some(cid) = course_id.as_deref() {
        let exists: Option<i64> = match conn
            .query_row("SELECT 1 FROM courses WHERE id = ?", [cid], |r| r.get(0))
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if exists.is_none() {
            return err(&req.id, "not_found", "course not found", None);
        }
    }

    let student_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, course_id, last_name, first_name, created_at)
         VALUES(?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (&student_id, &course_id, &last_name, &first_name),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    ok(&req.id, json!({ "studentId": student_id }))
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut stmt = match conn.prepare(
        "SELECT id, last_name, first_name, created_at
         FROM students
         WHERE course_id = ?
         ORDER BY last_name, first_name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&course_id], |row| {
            let id: String = row.get(0)?;
            let last: String = row.get(1)?;
            let first: String = row.get(2)?;
            let created_at: Option<String> = row.get(3)?;
            Ok(json!({
                "id": id,
                "lastName": last,
                "firstName": first,
                "displayName": format!("{}, {}", last, first),
                "createdAt": created_at
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let last_name = match optional_str(req, "lastName") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let first_name = match optional_str(req, "firstName") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut set_parts: Vec<&str> = Vec::new();
    let mut bind: Vec<String> = Vec::new();
    if let Some(v) = last_name {
        let v = v.trim().to_string();
        if v.is_empty() {
            return err(&req.id, "bad_params", "lastName must not be empty", None);
        }
        set_parts.push("last_name = ?");
        bind.push(v);
    }
    if let Some(v) = first_name {
        let v = v.trim().to_string();
        if v.is_empty() {
            return err(&req.id, "bad_params", "firstName must not be empty", None);
        }
        set_parts.push("first_name = ?");
        bind.push(v);
    }
    if set_parts.is_empty() {
        return err(&req.id, "bad_params", "nothing to update", None);
    }

    bind.push(student_id);
    let sql = format!("UPDATE students SET {} WHERE id = ?", set_parts.join(", "));
    let changed = match conn.execute(&sql, rusqlite::params_from_iter(bind.iter())) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if changed == 0 {
        return err(&req.id, "not_found", "student not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "student not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Explicit dependency order: ledger, summary, memberships, then the row.
    let steps: [(&str, &str); 4] = [
        ("point_events", "DELETE FROM point_events WHERE student_id = ?"),
        (
            "student_summaries",
            "DELETE FROM student_summaries WHERE student_id = ?",
        ),
        (
            "group_members",
            "DELETE FROM group_members WHERE student_id = ?",
        ),
        ("students", "DELETE FROM students WHERE id = ?"),
    ];
    for (table, sql) in steps {
        if let Err(e) = tx.execute(sql, [&student_id]) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": table })),
            );
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.create" => Some(handle_students_create(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}
