use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{calc_err, db_conn, optional_i64, optional_str, required_str};
use crate::ipc::types::{AppState, Request};

pub struct AssignOutcome {
    pub point_id: String,
    pub value: i64,
    pub summary: Option<calc::SummaryRecord>,
    pub grade_refreshed: bool,
    pub summary_error: Option<calc::CalcError>,
}

/// Append one ledger row and refresh the owning student's summary.
///
/// Inputs are validated by the caller. The ledger write is never rolled
/// back when the recompute fails afterwards; the failure is carried back
/// in `summary_error` and recomputing later is always safe.
pub fn assign_point(
    conn: &Connection,
    student_id: &str,
    issuer_id: &str,
    type_id: &str,
    value: i64,
    reason: Option<&str>,
) -> Result<AssignOutcome, calc::CalcError> {
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|e| calc::CalcError::new("db_query_failed", e.to_string()))?;
    if exists.is_none() {
        return Err(calc::CalcError::with_details(
            "not_found",
            "student not found",
            json!({ "studentId": student_id }),
        ));
    }

    let point_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO point_events(id, student_id, issued_by, type_id, value, reason, created_at)
         VALUES(?, ?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (&point_id, student_id, issuer_id, type_id, value, reason),
    )
    .map_err(|e| calc::CalcError::new("db_insert_failed", e.to_string()))?;

    Ok(finish_recompute(conn, student_id, point_id, value))
}

/// Run the summary recompute after a successful ledger mutation.
fn finish_recompute(
    conn: &Connection,
    student_id: &str,
    point_id: String,
    value: i64,
) -> AssignOutcome {
    match calc::recompute_summary(conn, student_id) {
        Ok(outcome) => {
            if !outcome.grade_refreshed {
                tracing::warn!(
                    student_id,
                    "student has no course; points recorded, grade unchanged"
                );
            }
            AssignOutcome {
                point_id,
                value,
                summary: outcome.summary,
                grade_refreshed: outcome.grade_refreshed,
                summary_error: None,
            }
        }
        Err(e) => {
            tracing::warn!(
                student_id,
                code = %e.code,
                message = %e.message,
                "summary recompute failed after ledger write"
            );
            AssignOutcome {
                point_id,
                value,
                summary: None,
                grade_refreshed: false,
                summary_error: Some(e),
            }
        }
    }
}

fn outcome_json(student_id: &str, outcome: &AssignOutcome) -> serde_json::Value {
    let mut result = json!({
        "pointId": outcome.point_id,
        "studentId": student_id,
        "value": outcome.value,
        "summary": outcome
            .summary
            .as_ref()
            .map(|s| serde_json::to_value(s).unwrap_or(serde_json::Value::Null)),
        "gradeRefreshed": outcome.grade_refreshed,
    });
    if let Some(e) = &outcome.summary_error {
        result["summaryError"] = serde_json::to_value(e).unwrap_or(serde_json::Value::Null);
    }
    result
}

/// Resolve the event value: explicit when given, else the type's default.
/// Fails `not_found` for an unknown type before anything is written.
pub fn resolve_type_value(
    conn: &Connection,
    type_id: &str,
    explicit: Option<i64>,
) -> Result<i64, calc::CalcError> {
    let default_points: Option<i64> = conn
        .query_row(
            "SELECT default_points FROM participation_types WHERE id = ?",
            [type_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| calc::CalcError::new("db_query_failed", e.to_string()))?;
    let Some(default_points) = default_points else {
        return Err(calc::CalcError::with_details(
            "not_found",
            "participation type not found",
            json!({ "typeId": type_id }),
        ));
    };
    let value = explicit.unwrap_or(default_points);
    calc::validate_point_value(value)?;
    Ok(value)
}

fn handle_points_assign(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
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

    let value = match resolve_type_value(conn, &type_id, explicit_value) {
        Ok(v) => v,
        Err(e) => return calc_err(req, e),
    };
    if let Err(e) = calc::validate_reason(reason.as_deref()) {
        return calc_err(req, e);
    }

    match assign_point(
        conn,
        &student_id,
        &issuer_id,
        &type_id,
        value,
        reason.as_deref(),
    ) {
        Ok(outcome) => ok(&req.id, outcome_json(&student_id, &outcome)),
        Err(e) => calc_err(req, e),
    }
}

fn handle_points_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let point_id = match required_str(req, "pointId") {
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

    let value = match resolve_type_value(conn, &type_id, explicit_value) {
        Ok(v) => v,
        Err(e) => return calc_err(req, e),
    };
    if let Err(e) = calc::validate_reason(reason.as_deref()) {
        return calc_err(req, e);
    }

    let student_id: Option<String> = match conn
        .query_row(
            "SELECT student_id FROM point_events WHERE id = ?",
            [&point_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(student_id) = student_id else {
        return err(
            &req.id,
            "not_found",
            "point event not found",
            Some(json!({ "pointId": point_id })),
        );
    };

    if let Err(e) = conn.execute(
        "UPDATE point_events SET type_id = ?, value = ?, reason = ? WHERE id = ?",
        (&type_id, value, &reason, &point_id),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    let outcome = finish_recompute(conn, &student_id, point_id, value);
    ok(&req.id, outcome_json(&student_id, &outcome))
}

fn handle_points_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let point_id = match required_str(req, "pointId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let student_id: Option<String> = match conn
        .query_row(
            "SELECT student_id FROM point_events WHERE id = ?",
            [&point_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(student_id) = student_id else {
        return err(
            &req.id,
            "not_found",
            "point event not found",
            Some(json!({ "pointId": point_id })),
        );
    };

    if let Err(e) = conn.execute("DELETE FROM point_events WHERE id = ?", [&point_id]) {
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }

    let outcome = finish_recompute(conn, &student_id, point_id, 0);
    let mut result = json!({
        "ok": true,
        "summary": outcome
            .summary
            .as_ref()
            .map(|s| serde_json::to_value(s).unwrap_or(serde_json::Value::Null)),
        "gradeRefreshed": outcome.grade_refreshed,
    });
    if let Some(e) = &outcome.summary_error {
        result["summaryError"] = serde_json::to_value(e).unwrap_or(serde_json::Value::Null);
    }
    ok(&req.id, result)
}

fn event_rows(
    conn: &Connection,
    sql: &str,
    key: &str,
    limit: Option<i64>,
) -> Result<Vec<serde_json::Value>, rusqlite::Error> {
    let mut bind: Vec<rusqlite::types::Value> = vec![rusqlite::types::Value::Text(key.to_string())];
    let sql = if let Some(n) = limit {
        bind.push(rusqlite::types::Value::Integer(n));
        format!("{} LIMIT ?", sql)
    } else {
        sql.to_string()
    };
    let mut stmt = conn.prepare(&sql)?;
    stmt.query_map(rusqlite::params_from_iter(bind), |row| {
        let id: String = row.get(0)?;
        let student_id: String = row.get(1)?;
        let issued_by: String = row.get(2)?;
        let type_id: String = row.get(3)?;
        let type_name: String = row.get(4)?;
        let value: i64 = row.get(5)?;
        let reason: Option<String> = row.get(6)?;
        let created_at: String = row.get(7)?;
        Ok(json!({
            "id": id,
            "studentId": student_id,
            "issuedBy": issued_by,
            "typeId": type_id,
            "participationType": type_name,
            "value": value,
            "reason": reason,
            "createdAt": created_at
        }))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
}

fn parse_limit(req: &Request) -> Result<Option<i64>, serde_json::Value> {
    let limit = optional_i64(req, "limit")?;
    if let Some(n) = limit {
        if n <= 0 {
            return Err(err(&req.id, "bad_params", "limit must be positive", None));
        }
    }
    Ok(limit)
}

fn handle_points_list_by_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let limit = match parse_limit(req) {
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

    let rows = event_rows(
        conn,
        "SELECT pe.id, pe.student_id, pe.issued_by, pe.type_id, pt.name, pe.value,
                pe.reason, pe.created_at
         FROM point_events pe
         JOIN participation_types pt ON pt.id = pe.type_id
         WHERE pe.student_id = ?
         ORDER BY pe.created_at DESC, pe.rowid DESC",
        &student_id,
        limit,
    );
    match rows {
        Ok(events) => ok(&req.id, json!({ "events": events })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_points_list_by_course(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let limit = match parse_limit(req) {
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

    let rows = event_rows(
        conn,
        "SELECT pe.id, pe.student_id, pe.issued_by, pe.type_id, pt.name, pe.value,
                pe.reason, pe.created_at
         FROM point_events pe
         JOIN participation_types pt ON pt.id = pe.type_id
         JOIN students s ON s.id = pe.student_id
         WHERE s.course_id = ?
         ORDER BY pe.created_at DESC, pe.rowid DESC",
        &course_id,
        limit,
    );
    match rows {
        Ok(events) => ok(&req.id, json!({ "events": events })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "points.assign" => Some(handle_points_assign(state, req)),
        "points.update" => Some(handle_points_update(state, req)),
        "points.delete" => Some(handle_points_delete(state, req)),
        "points.listByStudent" => Some(handle_points_list_by_student(state, req)),
        "points.listByCourse" => Some(handle_points_list_by_course(state, req)),
        _ => None,
    }
}
