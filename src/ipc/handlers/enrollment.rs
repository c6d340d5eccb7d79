use crate::db;
use crate::ipc::error::ok;
use crate::ipc::helpers::{db_conn, required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn row_exists(conn: &Connection, sql: &str, id: &str) -> Result<bool, HandlerErr> {
    conn.query_row(sql, [id], |r| r.get::<_, i64>(0))
        .optional()
        .map(|v| v.is_some())
        .map_err(HandlerErr::query)
}

fn enrollments_upsert(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let term_id = required_str(params, "termId")?;
    let student_no = required_str(params, "studentNo")?;
    let program_id = required_str(params, "programId")?;
    let semester_number = required_str(params, "semesterNumber")?;
    let status = required_str(params, "status")?;

    if !row_exists(conn, "SELECT 1 FROM terms WHERE id = ?", &term_id)? {
        return Err(HandlerErr::new("not_found", "term not found"));
    }
    if !row_exists(conn, "SELECT 1 FROM programs WHERE id = ?", &program_id)? {
        return Err(HandlerErr::new("not_found", "program not found"));
    }
    if !row_exists(conn, "SELECT 1 FROM students WHERE student_no = ?", &student_no)? {
        return Err(HandlerErr::new("not_found", "student not found"));
    }

    let enrollment_id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO enrollments(id, term_id, student_no, program_id, semester_number, status, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(term_id, student_no) DO UPDATE SET
           program_id = excluded.program_id,
           semester_number = excluded.semester_number,
           status = excluded.status,
           updated_at = excluded.updated_at",
        (
            &enrollment_id,
            &term_id,
            &student_no,
            &program_id,
            &semester_number,
            &status,
            &now,
        ),
    )
    .map_err(|e| HandlerErr::update(e, "enrollments"))?;
    db::audit_append(
        conn,
        "enrollments.upsert",
        &student_no,
        &json!({ "termId": term_id, "status": status }),
    )
    .map_err(|e| HandlerErr::update(e, "audit_log"))?;

    Ok(json!({ "termId": term_id, "studentNo": student_no, "status": status }))
}

fn enrollments_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let term_id = required_str(params, "termId")?;

    let mut stmt = conn
        .prepare(
            "SELECT e.student_no, st.last_name, st.first_name, p.code, e.semester_number, e.status
             FROM enrollments e
             JOIN students st ON st.student_no = e.student_no
             JOIN programs p ON p.id = e.program_id
             WHERE e.term_id = ?
             ORDER BY st.last_name, st.first_name, e.student_no",
        )
        .map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map([&term_id], |r| {
            let last: String = r.get(1)?;
            let first: String = r.get(2)?;
            Ok(json!({
                "studentNo": r.get::<_, String>(0)?,
                "displayName": format!("{}, {}", last, first),
                "programCode": r.get::<_, String>(3)?,
                "semesterNumber": r.get::<_, String>(4)?,
                "status": r.get::<_, String>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    Ok(json!({ "enrollments": rows }))
}

fn dispatch(
    state: &mut AppState,
    req: &Request,
    f: impl Fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "enrollments.upsert" => Some(dispatch(state, req, enrollments_upsert)),
        "enrollments.list" => Some(dispatch(state, req, enrollments_list)),
        _ => None,
    }
}
