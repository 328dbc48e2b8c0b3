use rusqlite::OptionalExtension;
use serde_json::json;

use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{calc_err, db_conn, required_str};
use crate::ipc::types::{AppState, Request};

fn handle_summaries_get(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    match calc::read_summary(conn, &student_id) {
        Ok(summary) => ok(
            &req.id,
            json!({
                "summary": summary
                    .map(|s| serde_json::to_value(&s).unwrap_or(serde_json::Value::Null))
            }),
        ),
        Err(e) => calc_err(req, e),
    }
}

fn handle_summaries_course(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let max_total = match calc::course_max(conn, &course_id) {
        Ok(v) => v,
        Err(e) => return calc_err(req, e),
    };

    // Students without a summary yet rank with zero totals and no grade.
    let mut stmt = match conn.prepare(
        "SELECT s.id, s.last_name, s.first_name,
                ss.total_points, ss.participation_count, ss.average_points, ss.rounded_average
         FROM students s
         LEFT JOIN student_summaries ss ON ss.student_id = s.id
         WHERE s.course_id = ?
         ORDER BY COALESCE(ss.total_points, 0) DESC, s.last_name, s.first_name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&course_id], |row| {
            let id: String = row.get(0)?;
            let last: String = row.get(1)?;
            let first: String = row.get(2)?;
            let total_points: Option<i64> = row.get(3)?;
            let participation_count: Option<i64> = row.get(4)?;
            let average_points: Option<f64> = row.get(5)?;
            let rounded_average: Option<i64> = row.get(6)?;
            Ok(json!({
                "studentId": id,
                "displayName": format!("{}, {}", last, first),
                "totalPoints": total_points.unwrap_or(0),
                "participationCount": participation_count.unwrap_or(0),
                "averagePoints": average_points,
                "roundedAverage": rounded_average
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(
            &req.id,
            json!({ "courseId": course_id, "courseMax": max_total, "students": students }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "summaries.get" => Some(handle_summaries_get(state, req)),
        "summaries.course" => Some(handle_summaries_course(state, req)),
        _ => None,
    }
}
