use chrono::Utc;
use rusqlite::Connection;
use std::path::Path;
use uuid::Uuid;

pub const DB_FILE: &str = "registry.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS terms(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            starts_on TEXT,
            ends_on TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schools(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS programs(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            FOREIGN KEY(school_id) REFERENCES schools(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_programs_school ON programs(school_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            student_no TEXT NOT NULL UNIQUE,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            email TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            id TEXT PRIMARY KEY,
            term_id TEXT NOT NULL,
            student_no TEXT NOT NULL,
            program_id TEXT NOT NULL,
            semester_number TEXT NOT NULL,
            status TEXT NOT NULL,
            updated_at TEXT,
            UNIQUE(term_id, student_no),
            FOREIGN KEY(term_id) REFERENCES terms(id),
            FOREIGN KEY(program_id) REFERENCES programs(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_term ON enrollments(term_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_student ON enrollments(student_no)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS semester_modules(
            id TEXT PRIMARY KEY,
            term_id TEXT NOT NULL,
            module_code TEXT NOT NULL,
            title TEXT NOT NULL,
            credits REAL NOT NULL DEFAULT 0,
            UNIQUE(term_id, module_code),
            FOREIGN KEY(term_id) REFERENCES terms(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_semester_modules_term ON semester_modules(term_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS module_registrations(
            id TEXT PRIMARY KEY,
            term_id TEXT NOT NULL,
            student_no TEXT NOT NULL,
            semester_module_id TEXT NOT NULL,
            status TEXT NOT NULL,
            grade TEXT,
            updated_at TEXT,
            UNIQUE(semester_module_id, student_no),
            FOREIGN KEY(term_id) REFERENCES terms(id),
            FOREIGN KEY(semester_module_id) REFERENCES semester_modules(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_module_registrations_term ON module_registrations(term_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_module_registrations_student ON module_registrations(student_no)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_marks(
            id TEXT PRIMARY KEY,
            term_id TEXT NOT NULL,
            semester_module_id TEXT NOT NULL,
            student_no TEXT NOT NULL,
            week INTEGER NOT NULL,
            status TEXT NOT NULL,
            recorded_at TEXT,
            UNIQUE(semester_module_id, student_no, week),
            FOREIGN KEY(term_id) REFERENCES terms(id),
            FOREIGN KEY(semester_module_id) REFERENCES semester_modules(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_marks_term ON attendance_marks(term_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_marks_student ON attendance_marks(student_no)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_marks_module ON attendance_marks(semester_module_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sponsors(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            contact_email TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS sponsorships(
            id TEXT PRIMARY KEY,
            sponsor_id TEXT NOT NULL,
            term_id TEXT NOT NULL,
            student_no TEXT NOT NULL,
            amount REAL NOT NULL DEFAULT 0,
            note TEXT,
            UNIQUE(sponsor_id, term_id, student_no),
            FOREIGN KEY(sponsor_id) REFERENCES sponsors(id),
            FOREIGN KEY(term_id) REFERENCES terms(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sponsorships_sponsor ON sponsorships(sponsor_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sponsorships_term ON sponsorships(term_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS audit_log(
            id TEXT PRIMARY KEY,
            at TEXT NOT NULL,
            action TEXT NOT NULL,
            entity TEXT NOT NULL,
            details TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_audit_log_at ON audit_log(at)",
        [],
    )?;

    // Existing workspaces may predate these columns. Add if needed.
    ensure_students_updated_at(&conn)?;
    ensure_attendance_recorded_at(&conn)?;

    Ok(conn)
}

fn ensure_students_updated_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "students", "updated_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE students ADD COLUMN updated_at TEXT", [])?;
    Ok(())
}

fn ensure_attendance_recorded_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "attendance_marks", "recorded_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE attendance_marks ADD COLUMN recorded_at TEXT", [])?;
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

/// Append one audit row. Mutating handlers call this inside the same
/// transaction as the write they record.
pub fn audit_append(
    conn: &Connection,
    action: &str,
    entity: &str,
    details: &serde_json::Value,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO audit_log(id, at, action, entity, details) VALUES(?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            Utc::now().to_rfc3339(),
            action,
            entity,
            details.to_string(),
        ),
    )?;
    Ok(())
}
