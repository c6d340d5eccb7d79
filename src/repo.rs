use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};

use crate::calc::{CalcError, ReportFilters};

/// Chunk size for multi-value IN (...) filters. Keeps statements bounded
/// when a report covers thousands of students.
const IN_BATCH: usize = 50;

#[derive(Debug, Clone)]
pub struct EnrollmentRow {
    pub student_no: String,
    pub student_name: String,
    pub school_code: String,
    pub school_name: String,
    pub program_code: String,
    pub program_name: String,
    pub semester_number: String,
    pub status: String,
}

#[derive(Debug, Clone)]
pub struct MarkRow {
    pub semester_module_id: String,
    pub student_no: String,
    pub week: i64,
    pub status: String,
}

#[derive(Debug, Clone)]
pub struct RegistrationRow {
    pub semester_module_id: String,
    pub module_code: String,
    pub title: String,
    pub credits: f64,
    pub student_no: String,
    pub status: String,
    pub grade: Option<String>,
}

pub fn term_exists(conn: &Connection, term_id: &str) -> Result<bool, CalcError> {
    conn.query_row("SELECT 1 FROM terms WHERE id = ?", [term_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(|e| CalcError::new("db_query_failed", e.to_string()))
}

/// Distinct enrolled students for a term under the report filters, joined
/// with student/program/school metadata. `statuses` narrows the enrollment
/// status; `None` means every status (the BOE path classifies them all).
pub fn fetch_enrollments(
    conn: &Connection,
    filters: &ReportFilters,
    statuses: Option<&[&str]>,
) -> Result<Vec<EnrollmentRow>, CalcError> {
    let Some(term_id) = filters.term_id.as_deref() else {
        return Ok(Vec::new());
    };

    let mut sql = String::from(
        "SELECT e.student_no, st.last_name, st.first_name,
                sc.code, sc.name, p.code, p.name,
                e.semester_number, e.status
         FROM enrollments e
         JOIN students st ON st.student_no = e.student_no
         JOIN programs p ON p.id = e.program_id
         JOIN schools sc ON sc.id = p.school_id
         WHERE e.term_id = ?",
    );
    let mut values: Vec<Value> = vec![Value::Text(term_id.to_string())];

    if let Some(ids) = filters.school_ids.as_ref() {
        if !ids.is_empty() {
            sql.push_str(&format!(" AND sc.id IN ({})", placeholders(ids.len())));
            values.extend(ids.iter().map(|id| Value::Text(id.clone())));
        }
    }
    if let Some(program_id) = filters.program_id.as_deref() {
        sql.push_str(" AND p.id = ?");
        values.push(Value::Text(program_id.to_string()));
    }
    if let Some(sem) = filters.semester_number.as_deref() {
        sql.push_str(" AND e.semester_number = ?");
        values.push(Value::Text(sem.to_string()));
    }
    if let Some(statuses) = statuses {
        sql.push_str(&format!(" AND e.status IN ({})", placeholders(statuses.len())));
        values.extend(statuses.iter().map(|s| Value::Text((*s).to_string())));
    }
    sql.push_str(" ORDER BY st.last_name, st.first_name, e.student_no");

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
    stmt.query_map(params_from_iter(values), |r| {
        let last: String = r.get(1)?;
        let first: String = r.get(2)?;
        Ok(EnrollmentRow {
            student_no: r.get(0)?,
            student_name: format!("{}, {}", last, first),
            school_code: r.get(3)?,
            school_name: r.get(4)?,
            program_code: r.get(5)?,
            program_name: r.get(6)?,
            semester_number: r.get(7)?,
            status: r.get(8)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| CalcError::new("db_query_failed", e.to_string()))
}

/// Raw attendance marks for a term, optionally restricted to one week.
pub fn fetch_marks(
    conn: &Connection,
    term_id: &str,
    week: Option<i64>,
) -> Result<Vec<MarkRow>, CalcError> {
    let mut sql = String::from(
        "SELECT semester_module_id, student_no, week, status
         FROM attendance_marks
         WHERE term_id = ?",
    );
    let mut values: Vec<Value> = vec![Value::Text(term_id.to_string())];
    if let Some(week) = week {
        sql.push_str(" AND week = ?");
        values.push(Value::Integer(week));
    }

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
    stmt.query_map(params_from_iter(values), |r| {
        Ok(MarkRow {
            semester_module_id: r.get(0)?,
            student_no: r.get(1)?,
            week: r.get(2)?,
            status: r.get(3)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| CalcError::new("db_query_failed", e.to_string()))
}

/// Module registrations (with module metadata) for a set of students,
/// fetched in batches of 50 student numbers.
pub fn fetch_registrations(
    conn: &Connection,
    term_id: &str,
    student_nos: &[String],
) -> Result<Vec<RegistrationRow>, CalcError> {
    let mut out = Vec::new();
    for chunk in student_nos.chunks(IN_BATCH) {
        let sql = format!(
            "SELECT r.semester_module_id, m.module_code, m.title, m.credits,
                    r.student_no, r.status, r.grade
             FROM module_registrations r
             JOIN semester_modules m ON m.id = r.semester_module_id
             WHERE r.term_id = ? AND r.student_no IN ({})
             ORDER BY m.module_code, r.student_no",
            placeholders(chunk.len())
        );
        let mut values: Vec<Value> = Vec::with_capacity(chunk.len() + 1);
        values.push(Value::Text(term_id.to_string()));
        values.extend(chunk.iter().map(|s| Value::Text(s.clone())));

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
        let rows = stmt
            .query_map(params_from_iter(values), |r| {
                Ok(RegistrationRow {
                    semester_module_id: r.get(0)?,
                    module_code: r.get(1)?,
                    title: r.get(2)?,
                    credits: r.get(3)?,
                    student_no: r.get(4)?,
                    status: r.get(5)?,
                    grade: r.get(6)?,
                })
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
        out.extend(rows);
    }
    Ok(out)
}

fn placeholders(n: usize) -> String {
    std::iter::repeat("?").take(n).collect::<Vec<_>>().join(",")
}
