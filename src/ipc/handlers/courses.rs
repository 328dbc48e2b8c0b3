use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_str, required_str};
use crate::ipc::types::{AppState, Request};

fn handle_courses_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
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
    let level = match optional_str(req, "level") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let academic_period = match optional_str(req, "academicPeriod") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let course_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO courses(id, name, level, academic_period, created_at)
         VALUES(?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (&course_id, &name, &level, &academic_period),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "courses" })),
        );
    }

    ok(&req.id, json!({ "courseId": course_id, "name": name }))
}

fn handle_courses_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "courses": [] }));
    };

    // Include basic counts so the UI can show a useful dashboard.
    // Correlated subqueries avoid double-counting from joins.
    let mut stmt = match conn.prepare(
        "SELECT
           c.id,
           c.name,
           c.level,
           c.academic_period,
           (SELECT COUNT(*) FROM students s WHERE s.course_id = c.id) AS student_count,
           (SELECT COUNT(*) FROM groups g WHERE g.course_id = c.id) AS group_count
         FROM courses c
         ORDER BY c.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let level: Option<String> = row.get(2)?;
            let academic_period: Option<String> = row.get(3)?;
            let student_count: i64 = row.get(4)?;
            let group_count: i64 = row.get(5)?;
            Ok(json!({
                "id": id,
                "name": name,
                "level": level,
                "academicPeriod": academic_period,
                "studentCount": student_count,
                "groupCount": group_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(courses) => ok(&req.id, json!({ "courses": courses })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_courses_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM courses WHERE id = ?", [&course_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "course not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Explicitly delete in dependency order (no ON DELETE CASCADE).
    let steps: [(&str, &str); 8] = [
        (
            "group_members",
            "DELETE FROM group_members
             WHERE group_id IN (SELECT id FROM groups WHERE course_id = ?)",
        ),
        (
            "group_members",
            "DELETE FROM group_members
             WHERE student_id IN (SELECT id FROM students WHERE course_id = ?)",
        ),
        // Subgroups first so no row still references its parent group.
        (
            "groups",
            "DELETE FROM groups WHERE course_id = ? AND parent_group_id IS NOT NULL",
        ),
        ("groups", "DELETE FROM groups WHERE course_id = ?"),
        (
            "point_events",
            "DELETE FROM point_events
             WHERE student_id IN (SELECT id FROM students WHERE course_id = ?)",
        ),
        (
            "student_summaries",
            "DELETE FROM student_summaries
             WHERE student_id IN (SELECT id FROM students WHERE course_id = ?)",
        ),
        ("students", "DELETE FROM students WHERE course_id = ?"),
        ("courses", "DELETE FROM courses WHERE id = ?"),
    ];
    for (table, sql) in steps {
        if let Err(e) = tx.execute(sql, [&course_id]) {
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
        "courses.create" => Some(handle_courses_create(state, req)),
        "courses.list" => Some(handle_courses_list(state, req)),
        "courses.delete" => Some(handle_courses_delete(state, req)),
        _ => None,
    }
}
