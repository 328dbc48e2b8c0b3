use rusqlite::OptionalExtension;
use serde_json::json;

use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{calc_err, db_conn, required_str};
use crate::ipc::types::{AppState, Request};

fn handle_student_history(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let student_row: Option<(String, String, Option<String>)> = match conn
        .query_row(
            "SELECT last_name, first_name, course_id FROM students WHERE id = ?",
            [&student_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((last_name, first_name, course_id)) = student_row else {
        return err(&req.id, "not_found", "student not found", None);
    };

    let points = match calc::student_history(conn, &student_id) {
        Ok(v) => v,
        Err(e) => return calc_err(req, e),
    };

    let total_points = points.last().map(|p| p.cumulative_points).unwrap_or(0);
    let final_grade = points.last().map(|p| p.final_grade);
    let points_json: Vec<serde_json::Value> = points
        .iter()
        .map(|p| serde_json::to_value(p).unwrap_or(serde_json::Value::Null))
        .collect();

    ok(
        &req.id,
        json!({
            "student": {
                "id": student_id,
                "displayName": format!("{}, {}", last_name, first_name),
                "courseId": course_id
            },
            "points": points_json,
            "summary": {
                "eventCount": points.len(),
                "totalPoints": total_points,
                "finalGrade": final_grade
            }
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "analytics.student.history" => Some(handle_student_history(state, req)),
        _ => None,
    }
}
