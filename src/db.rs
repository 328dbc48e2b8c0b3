use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("merit.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            level TEXT,
            academic_period TEXT,
            created_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            course_id TEXT,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            created_at TEXT,
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_course ON students(course_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS participation_types(
            id TEXT PRIMARY KEY,
            owner_user_id TEXT NOT NULL,
            name TEXT NOT NULL,
            default_points INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS point_events(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            issued_by TEXT NOT NULL,
            type_id TEXT NOT NULL,
            value INTEGER NOT NULL,
            reason TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(type_id) REFERENCES participation_types(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_point_events_student ON point_events(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_point_events_type ON point_events(type_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_point_events_student_created ON point_events(student_id, created_at)",
        [],
    )?;

    // One derived row per student. Never trusted as a source of truth:
    // totals and grades are recomputed from point_events on every mutation.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_summaries(
            student_id TEXT PRIMARY KEY,
            course_id TEXT,
            total_points INTEGER NOT NULL,
            participation_count INTEGER NOT NULL,
            average_points REAL NOT NULL,
            rounded_average INTEGER NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_summaries_course ON student_summaries(course_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS groups(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            course_id TEXT,
            kind TEXT NOT NULL CHECK(kind IN ('general','subgroup','independent')),
            parent_group_id TEXT,
            created_by TEXT NOT NULL,
            created_at TEXT,
            FOREIGN KEY(course_id) REFERENCES courses(id),
            FOREIGN KEY(parent_group_id) REFERENCES groups(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_groups_course ON groups(course_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_groups_parent ON groups(parent_group_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS group_members(
            group_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            added_at TEXT NOT NULL,
            PRIMARY KEY(group_id, student_id),
            FOREIGN KEY(group_id) REFERENCES groups(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_group_members_student ON group_members(student_id)",
        [],
    )?;

    ensure_point_events_reason(&conn)?;

    Ok(conn)
}

fn ensure_point_events_reason(conn: &Connection) -> anyhow::Result<()> {
    // Early workspaces were created before the optional reason column.
    if table_has_column(conn, "point_events", "reason")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE point_events ADD COLUMN reason TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
