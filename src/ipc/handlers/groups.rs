use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{calc_err, db_conn, optional_i64, optional_str, parse_id_list, required_str};
use crate::ipc::types::{AppState, Request};

use super::points;

#[derive(Debug, Clone)]
struct GroupRow {
    id: String,
    course_id: Option<String>,
    kind: String,
}

fn load_group(conn: &Connection, group_id: &str) -> Result<Option<GroupRow>, rusqlite::Error> {
    conn.query_row(
        "SELECT id, course_id, kind FROM groups WHERE id = ?",
        [group_id],
        |r| {
            Ok(GroupRow {
                id: r.get(0)?,
                course_id: r.get(1)?,
                kind: r.get(2)?,
            })
        },
    )
    .optional()
}

/// The subset-of-parent invariant: every requested student must already be
/// a member of the parent general group. Returns the first offender.
fn first_non_parent_member(
    conn: &Connection,
    parent_group_id: &str,
    student_ids: &[String],
) -> Result<Option<String>, rusqlite::Error> {
    for sid in student_ids {
        let is_member: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM group_members WHERE group_id = ? AND student_id = ?",
                (parent_group_id, sid),
                |r| r.get(0),
            )
            .optional()?;
        if is_member.is_none() {
            return Ok(Some(sid.clone()));
        }
    }
    Ok(None)
}

fn insert_members(
    tx: &rusqlite::Transaction<'_>,
    group_id: &str,
    student_ids: &[String],
) -> Result<(), rusqlite::Error> {
    let mut stmt = tx.prepare(
        "INSERT INTO group_members(group_id, student_id, added_at)
         VALUES(?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
    )?;
    for sid in student_ids {
        stmt.execute((group_id, sid))?;
    }
    Ok(())
}

fn handle_groups_create_general(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let created_by = match required_str(req, "createdBy") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let course_name: Option<String> = match conn
        .query_row("SELECT name FROM courses WHERE id = ?", [&course_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(course_name) = course_name else {
        return err(&req.id, "not_found", "course not found", None);
    };

    let existing: Option<String> = match conn
        .query_row(
            "SELECT id FROM groups WHERE course_id = ? AND kind = 'general'",
            [&course_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Some(existing_id) = existing {
        return err(
            &req.id,
            "conflict",
            "course already has a general group",
            Some(json!({ "groupId": existing_id })),
        );
    }

    let student_ids: Vec<String> = {
        let mut stmt = match conn
            .prepare("SELECT id FROM students WHERE course_id = ? ORDER BY last_name, first_name")
        {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        match stmt
            .query_map([&course_id], |r| r.get::<_, String>(0))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    };
    if student_ids.is_empty() {
        return err(&req.id, "bad_params", "course has no students", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let group_id = Uuid::new_v4().to_string();
    if let Err(e) = tx.execute(
        "INSERT INTO groups(id, name, course_id, kind, parent_group_id, created_by, created_at)
         VALUES(?, ?, ?, 'general', NULL, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (&group_id, &course_name, &course_id, &created_by),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "groups" })),
        );
    }
    if let Err(e) = insert_members(&tx, &group_id, &student_ids) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "group_members" })),
        );
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "groupId": group_id,
            "name": course_name,
            "memberCount": student_ids.len()
        }),
    )
}

fn handle_groups_create_subgroup(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let parent_group_id = match required_str(req, "parentGroupId") {
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
    let student_ids = match parse_id_list(req, "studentIds") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let created_by = match required_str(req, "createdBy") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let parent = match load_group(conn, &parent_group_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(parent) = parent else {
        return err(&req.id, "not_found", "parent group not found", None);
    };
    if parent.kind != "general" {
        return err(
            &req.id,
            "bad_params",
            "parent group must be a general group",
            Some(json!({ "kind": parent.kind })),
        );
    }

    match first_non_parent_member(conn, &parent.id, &student_ids) {
        Ok(Some(sid)) => {
            return err(
                &req.id,
                "bad_params",
                "student is not a member of the parent general group",
                Some(json!({ "studentId": sid })),
            )
        }
        Ok(None) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let group_id = Uuid::new_v4().to_string();
    if let Err(e) = tx.execute(
        "INSERT INTO groups(id, name, course_id, kind, parent_group_id, created_by, created_at)
         VALUES(?, ?, ?, 'subgroup', ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (&group_id, &name, &parent.course_id, &parent.id, &created_by),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "groups" })),
        );
    }
    if let Err(e) = insert_members(&tx, &group_id, &student_ids) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "group_members" })),
        );
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "groupId": group_id, "memberCount": student_ids.len() }),
    )
}

fn handle_groups_create_independent(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let group_name = match required_str(req, "groupName") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };
    let course_name = match required_str(req, "courseName") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };
    if group_name.is_empty() || course_name.is_empty() {
        return err(&req.id, "bad_params", "names must not be empty", None);
    }
    let level = match optional_str(req, "level") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let academic_period = match optional_str(req, "academicPeriod") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let created_by = match required_str(req, "createdBy") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let Some(raw_students) = req.params.get("students").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing students", None);
    };
    if raw_students.is_empty() {
        return err(&req.id, "bad_params", "students must not be empty", None);
    }
    let mut students: Vec<(String, String)> = Vec::with_capacity(raw_students.len());
    for s in raw_students {
        let last = s
            .get("lastName")
            .and_then(|v| v.as_str())
            .map(|v| v.trim())
            .unwrap_or("");
        let first = s
            .get("firstName")
            .and_then(|v| v.as_str())
            .map(|v| v.trim())
            .unwrap_or("");
        if last.is_empty() || first.is_empty() {
            return err(
                &req.id,
                "bad_params",
                "each student needs lastName and firstName",
                None,
            );
        }
        students.push((last.to_string(), first.to_string()));
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // The one path where a course is created as a side effect of a group.
    let course_id = Uuid::new_v4().to_string();
    if let Err(e) = tx.execute(
        "INSERT INTO courses(id, name, level, academic_period, created_at)
         VALUES(?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (&course_id, &course_name, &level, &academic_period),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "courses" })),
        );
    }

    let mut student_ids: Vec<String> = Vec::with_capacity(students.len());
    for (last, first) in &students {
        let sid = Uuid::new_v4().to_string();
        if let Err(e) = tx.execute(
            "INSERT INTO students(id, course_id, last_name, first_name, created_at)
             VALUES(?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
            (&sid, &course_id, last, first),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "students" })),
            );
        }
        student_ids.push(sid);
    }

    let group_id = Uuid::new_v4().to_string();
    if let Err(e) = tx.execute(
        "INSERT INTO groups(id, name, course_id, kind, parent_group_id, created_by, created_at)
         VALUES(?, ?, ?, 'independent', NULL, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (&group_id, &group_name, &course_id, &created_by),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "groups" })),
        );
    }
    if let Err(e) = insert_members(&tx, &group_id, &student_ids) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "group_members" })),
        );
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "groupId": group_id,
            "courseId": course_id,
            "studentIds": student_ids,
            "memberCount": student_ids.len()
        }),
    )
}

fn handle_groups_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match optional_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let sql = "SELECT
                 g.id, g.name, g.course_id, g.kind, g.parent_group_id, g.created_by,
                 (SELECT COUNT(*) FROM group_members gm WHERE gm.group_id = g.id) AS member_count
               FROM groups g
               WHERE (?1 IS NULL OR g.course_id = ?1)
               ORDER BY g.name";
    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&course_id], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let course_id: Option<String> = row.get(2)?;
            let kind: String = row.get(3)?;
            let parent_group_id: Option<String> = row.get(4)?;
            let created_by: String = row.get(5)?;
            let member_count: i64 = row.get(6)?;
            Ok(json!({
                "id": id,
                "name": name,
                "courseId": course_id,
                "kind": kind,
                "parentGroupId": parent_group_id,
                "createdBy": created_by,
                "memberCount": member_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(groups) => ok(&req.id, json!({ "groups": groups })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_groups_members(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let group_id = match required_str(req, "groupId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let group = match load_group(conn, &group_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if group.is_none() {
        return err(&req.id, "not_found", "group not found", None);
    }

    let mut stmt = match conn.prepare(
        "SELECT s.id, s.last_name, s.first_name, gm.added_at
         FROM group_members gm
         JOIN students s ON s.id = gm.student_id
         WHERE gm.group_id = ?
         ORDER BY s.last_name, s.first_name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&group_id], |row| {
            let id: String = row.get(0)?;
            let last: String = row.get(1)?;
            let first: String = row.get(2)?;
            let added_at: String = row.get(3)?;
            Ok(json!({
                "studentId": id,
                "displayName": format!("{}, {}", last, first),
                "addedAt": added_at
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(members) => ok(&req.id, json!({ "groupId": group_id, "members": members })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_groups_replace_members(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let group_id = match required_str(req, "groupId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_ids = match parse_id_list(req, "studentIds") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let group = match load_group(conn, &group_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(group) = group else {
        return err(&req.id, "not_found", "group not found", None);
    };

    if group.kind == "subgroup" {
        let parent_id: Option<String> = match conn
            .query_row(
                "SELECT parent_group_id FROM groups WHERE id = ?",
                [&group.id],
                |r| r.get(0),
            )
            .optional()
        {
            Ok(v) => v.flatten(),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let Some(parent_id) = parent_id else {
            return err(&req.id, "internal", "subgroup has no parent group", None);
        };
        match first_non_parent_member(conn, &parent_id, &student_ids) {
            Ok(Some(sid)) => {
                return err(
                    &req.id,
                    "bad_params",
                    "student is not a member of the parent general group",
                    Some(json!({ "studentId": sid })),
                )
            }
            Ok(None) => {}
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    } else {
        for sid in &student_ids {
            let exists: Option<i64> = match conn
                .query_row("SELECT 1 FROM students WHERE id = ?", [sid], |r| r.get(0))
                .optional()
            {
                Ok(v) => v,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
            if exists.is_none() {
                return err(
                    &req.id,
                    "not_found",
                    "student not found",
                    Some(json!({ "studentId": sid })),
                );
            }
        }
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Remove-then-add, not a diff: membership rows are recreated with
    // fresh added_at timestamps.
    if let Err(e) = tx.execute("DELETE FROM group_members WHERE group_id = ?", [&group_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "group_members" })),
        );
    }
    if let Err(e) = insert_members(&tx, &group_id, &student_ids) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "group_members" })),
        );
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "groupId": group_id, "memberCount": student_ids.len() }),
    )
}

fn handle_groups_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let group_id = match required_str(req, "groupId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let group = match load_group(conn, &group_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if group.is_none() {
        return err(&req.id, "not_found", "group not found", None);
    }

    // No automatic cascade: children must be deleted first.
    let subgroup_count: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM groups WHERE parent_group_id = ?",
        [&group_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if subgroup_count > 0 {
        return err(
            &req.id,
            "conflict",
            "group still has subgroups",
            Some(json!({ "groupId": group_id, "subgroupCount": subgroup_count })),
        );
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = tx.execute("DELETE FROM group_members WHERE group_id = ?", [&group_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "group_members" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM groups WHERE id = ?", [&group_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "groups" })),
        );
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

/// Students of the parent already claimed by some other sibling subgroup.
/// Advisory: the store itself allows cross-subgroup duplicates; the editor
/// consults this list to prevent double-assignment.
fn handle_groups_subgroup_exclusions(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let parent_group_id = match required_str(req, "parentGroupId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let exclude_subgroup_id = match optional_str(req, "excludeSubgroupId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let parent = match load_group(conn, &parent_group_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(parent) = parent else {
        return err(&req.id, "not_found", "parent group not found", None);
    };
    if parent.kind != "general" {
        return err(
            &req.id,
            "bad_params",
            "parent group must be a general group",
            Some(json!({ "kind": parent.kind })),
        );
    }

    let mut stmt = match conn.prepare(
        "SELECT DISTINCT gm.student_id
         FROM group_members gm
         JOIN groups g ON g.id = gm.group_id
         WHERE g.parent_group_id = ?1 AND (?2 IS NULL OR g.id <> ?2)
         ORDER BY gm.student_id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map((&parent_group_id, &exclude_subgroup_id), |r| {
            r.get::<_, String>(0)
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(student_ids) => ok(&req.id, json!({ "studentIds": student_ids })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

/// Best-effort fan-out: one assign per member, sequentially. A failing
/// member is counted and reported, never aborting the rest of the batch.
fn handle_groups_bulk_assign(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let group_id = match required_str(req, "groupId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let issuer_id = match required_str(req, "issuerId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let type_id = match required_str(req, "typeId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let explicit_value = match optional_i64(req, "value") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let reason = match optional_str(req, "reason") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let group = match load_group(conn, &group_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if group.is_none() {
        return err(&req.id, "not_found", "group not found", None);
    }

    // Validate once, before touching any member's ledger.
    let value = match points::resolve_type_value(conn, &type_id, explicit_value) {
        Ok(v) => v,
        Err(e) => return calc_err(req, e),
    };
    if let Err(e) = calc::validate_reason(reason.as_deref()) {
        return calc_err(req, e);
    }

    let member_ids: Vec<String> = {
        let mut stmt = match conn
            .prepare("SELECT student_id FROM group_members WHERE group_id = ? ORDER BY rowid")
        {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        match stmt
            .query_map([&group_id], |r| r.get::<_, String>(0))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    };

    let mut success_count = 0_u64;
    let mut failed: Vec<serde_json::Value> = Vec::new();
    for sid in &member_ids {
        match points::assign_point(conn, sid, &issuer_id, &type_id, value, reason.as_deref()) {
            Ok(_) => success_count += 1,
            Err(e) => {
                tracing::warn!(
                    group_id = %group_id,
                    student_id = %sid,
                    code = %e.code,
                    "bulk assign failed for member"
                );
                failed.push(json!({
                    "studentId": sid,
                    "code": e.code,
                    "message": e.message
                }));
            }
        }
    }

    ok(
        &req.id,
        json!({
            "successCount": success_count,
            "failCount": failed.len(),
            "failed": failed
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "groups.createGeneral" => Some(handle_groups_create_general(state, req)),
        "groups.createSubgroup" => Some(handle_groups_create_subgroup(state, req)),
        "groups.createIndependent" => Some(handle_groups_create_independent(state, req)),
        "groups.list" => Some(handle_groups_list(state, req)),
        "groups.members" => Some(handle_groups_members(state, req)),
        "groups.replaceMembers" => Some(handle_groups_replace_members(state, req)),
        "groups.delete" => Some(handle_groups_delete(state, req)),
        "groups.subgroupExclusions" => Some(handle_groups_subgroup_exclusions(state, req)),
        "groups.bulkAssignPoints" => Some(handle_groups_bulk_assign(state, req)),
        _ => None,
    }
}
