use chrono::NaiveDateTime;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

pub const MIN_POINT_VALUE: i64 = -100;
pub const MAX_POINT_VALUE: i64 = 100;
pub const MAX_REASON_CHARS: usize = 500;

/// Grade scale ceiling. Grades are relative: the course's top total maps to 20.
pub const GRADE_CEILING: f64 = 20.0;

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(code: &str, message: impl Into<String>, details: serde_json::Value) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: Some(details),
        }
    }
}

fn db_err(e: rusqlite::Error) -> CalcError {
    CalcError::new("db_query_failed", e.to_string())
}

/// Point values are signed, non-zero, and bounded. Zero carries no
/// information in a participation ledger and is rejected outright.
pub fn validate_point_value(value: i64) -> Result<(), CalcError> {
    if value == 0 {
        return Err(CalcError::new("bad_params", "value must not be zero"));
    }
    if !(MIN_POINT_VALUE..=MAX_POINT_VALUE).contains(&value) {
        return Err(CalcError::with_details(
            "bad_params",
            format!(
                "value must be between {} and {}",
                MIN_POINT_VALUE, MAX_POINT_VALUE
            ),
            serde_json::json!({ "value": value }),
        ));
    }
    Ok(())
}

pub fn validate_reason(reason: Option<&str>) -> Result<(), CalcError> {
    if let Some(r) = reason {
        if r.chars().count() > MAX_REASON_CHARS {
            return Err(CalcError::new(
                "bad_params",
                format!("reason must be at most {} characters", MAX_REASON_CHARS),
            ));
        }
    }
    Ok(())
}

/// Round half-up: `floor(x + 0.5)`.
pub fn round_half_up(x: f64) -> i64 {
    (x + 0.5).floor() as i64
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Normalized {
    pub average_points: f64,
    pub rounded_average: i64,
}

/// Relative grading against the course's best total.
///
/// Only the 20 ceiling is enforced, not a floor: a negative total yields a
/// negative average, which the UI shows as a penalty indicator. With no
/// positive totals in the course yet, any positive total grades 20 and the
/// rest grade 0.
pub fn normalize(total_points: i64, course_max: i64) -> Normalized {
    let average_points = if course_max > 0 {
        let scaled = total_points as f64 * GRADE_CEILING / course_max as f64;
        scaled.min(GRADE_CEILING)
    } else if total_points > 0 {
        GRADE_CEILING
    } else {
        0.0
    };
    Normalized {
        average_points,
        rounded_average: round_half_up(average_points),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub total_points: i64,
    pub participation_count: i64,
}

/// Fresh aggregate over the ledger. No caching here; summaries are the
/// cached projection and are written elsewhere.
pub fn compute_totals(conn: &Connection, student_id: &str) -> Result<Totals, CalcError> {
    conn.query_row(
        "SELECT COALESCE(SUM(value), 0), COUNT(*) FROM point_events WHERE student_id = ?",
        [student_id],
        |r| {
            Ok(Totals {
                total_points: r.get(0)?,
                participation_count: r.get(1)?,
            })
        },
    )
    .map_err(db_err)
}

/// Highest summary total among the course's students, skipping one student
/// (the one whose summary is about to be rewritten from fresh totals).
fn course_peer_max(
    conn: &Connection,
    course_id: &str,
    exclude_student_id: &str,
) -> Result<i64, CalcError> {
    conn.query_row(
        "SELECT COALESCE(MAX(total_points), 0)
         FROM student_summaries
         WHERE course_id = ? AND student_id <> ?",
        (course_id, exclude_student_id),
        |r| r.get(0),
    )
    .map_err(db_err)
}

/// Highest summary total in the course as currently stored.
pub fn course_max(conn: &Connection, course_id: &str) -> Result<i64, CalcError> {
    conn.query_row(
        "SELECT COALESCE(MAX(total_points), 0) FROM student_summaries WHERE course_id = ?",
        [course_id],
        |r| r.get(0),
    )
    .map_err(db_err)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryRecord {
    pub student_id: String,
    pub course_id: Option<String>,
    pub total_points: i64,
    pub participation_count: i64,
    pub average_points: f64,
    pub rounded_average: i64,
}

#[derive(Debug, Clone)]
pub struct RecomputeOutcome {
    pub summary: Option<SummaryRecord>,
    /// false when the student has no course: totals are still refreshed on
    /// an existing summary, but grade fields keep their previous values.
    pub grade_refreshed: bool,
}

/// Rebuild a student's summary from the ledger.
///
/// Totals are always a fresh SUM/COUNT. The grade denominator is the larger
/// of the fresh total and the best stored total among course peers, so a
/// downward edit on the current top scorer cannot leave its own stale total
/// inflating the scale. Idempotent: recomputing twice without a ledger
/// mutation writes the same row.
pub fn recompute_summary(
    conn: &Connection,
    student_id: &str,
) -> Result<RecomputeOutcome, CalcError> {
    let course_id: Option<Option<String>> = conn
        .query_row(
            "SELECT course_id FROM students WHERE id = ?",
            [student_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?;
    let Some(course_id) = course_id else {
        return Err(CalcError::with_details(
            "not_found",
            "student not found",
            serde_json::json!({ "studentId": student_id }),
        ));
    };

    let totals = compute_totals(conn, student_id)?;

    let Some(course_id) = course_id else {
        // No course, no scale to grade against. Keep any existing summary's
        // grade at its previous value; refresh only the ledger-derived
        // columns.
        let changed = conn
            .execute(
                "UPDATE student_summaries
                 SET total_points = ?, participation_count = ?
                 WHERE student_id = ?",
                (totals.total_points, totals.participation_count, student_id),
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Ok(RecomputeOutcome {
                summary: None,
                grade_refreshed: false,
            });
        }
        let summary = read_summary(conn, student_id)?;
        return Ok(RecomputeOutcome {
            summary,
            grade_refreshed: false,
        });
    };

    let peer_max = course_peer_max(conn, &course_id, student_id)?;
    let max_total = peer_max.max(totals.total_points);
    let normalized = normalize(totals.total_points, max_total);

    conn.execute(
        "INSERT INTO student_summaries(
            student_id, course_id, total_points, participation_count,
            average_points, rounded_average
         ) VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id) DO UPDATE SET
            course_id = excluded.course_id,
            total_points = excluded.total_points,
            participation_count = excluded.participation_count,
            average_points = excluded.average_points,
            rounded_average = excluded.rounded_average",
        (
            student_id,
            &course_id,
            totals.total_points,
            totals.participation_count,
            normalized.average_points,
            normalized.rounded_average,
        ),
    )
    .map_err(db_err)?;

    Ok(RecomputeOutcome {
        summary: Some(SummaryRecord {
            student_id: student_id.to_string(),
            course_id: Some(course_id),
            total_points: totals.total_points,
            participation_count: totals.participation_count,
            average_points: normalized.average_points,
            rounded_average: normalized.rounded_average,
        }),
        grade_refreshed: true,
    })
}

pub fn read_summary(
    conn: &Connection,
    student_id: &str,
) -> Result<Option<SummaryRecord>, CalcError> {
    conn.query_row(
        "SELECT student_id, course_id, total_points, participation_count,
                average_points, rounded_average
         FROM student_summaries
         WHERE student_id = ?",
        [student_id],
        |r| {
            Ok(SummaryRecord {
                student_id: r.get(0)?,
                course_id: r.get(1)?,
                total_points: r.get(2)?,
                participation_count: r.get(3)?,
                average_points: r.get(4)?,
                rounded_average: r.get(5)?,
            })
        },
    )
    .optional()
    .map_err(db_err)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPoint {
    pub date: String,
    pub day_points: i64,
    pub cumulative_points: i64,
    pub participation_type: String,
    pub final_grade: i64,
}

/// Chronological replay of a student's ledger for trend charts.
///
/// Each step re-grades the running sum against the course max as it stands
/// today, not as it stood when the event was issued. The chart answers
/// "how would this trajectory grade on the current scale", which shifts
/// whenever any student's total moves.
pub fn student_history(
    conn: &Connection,
    student_id: &str,
) -> Result<Vec<HistoryPoint>, CalcError> {
    let course_id: Option<Option<String>> = conn
        .query_row(
            "SELECT course_id FROM students WHERE id = ?",
            [student_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?;
    let Some(course_id) = course_id else {
        return Err(CalcError::with_details(
            "not_found",
            "student not found",
            serde_json::json!({ "studentId": student_id }),
        ));
    };

    let max_total = match course_id.as_deref() {
        Some(cid) => course_max(conn, cid)?,
        None => 0,
    };

    let mut stmt = conn
        .prepare(
            "SELECT pe.value, pe.created_at, pt.name
             FROM point_events pe
             JOIN participation_types pt ON pt.id = pe.type_id
             WHERE pe.student_id = ?
             ORDER BY pe.created_at, pe.rowid",
        )
        .map_err(db_err)?;
    let rows = stmt
        .query_map([student_id], |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let mut points = Vec::with_capacity(rows.len());
    let mut running = 0_i64;
    for (value, created_at, type_name) in rows {
        running += value;
        let normalized = normalize(running, max_total);
        points.push(HistoryPoint {
            date: day_of(&created_at),
            day_points: value,
            cumulative_points: running,
            participation_type: type_name,
            final_grade: normalized.rounded_average,
        });
    }
    Ok(points)
}

fn day_of(timestamp: &str) -> String {
    match NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%dT%H:%M:%SZ") {
        Ok(dt) => dt.date().format("%Y-%m-%d").to_string(),
        Err(_) => timestamp.chars().take(10).collect(),
    }
}
