use crate::db;
use crate::ipc::error::ok;
use crate::ipc::helpers::{db_conn, required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const MARK_STATUSES: [&str; 4] = ["present", "absent", "late", "excused"];

fn parse_week(params: &serde_json::Value) -> Result<i64, HandlerErr> {
    let week = params
        .get("week")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::bad_params("missing week"))?;
    if week < 1 {
        return Err(HandlerErr::bad_params("week must be >= 1"));
    }
    Ok(week)
}

fn parse_mark_status(params: &serde_json::Value) -> Result<String, HandlerErr> {
    let status = required_str(params, "status")?.to_ascii_lowercase();
    if !MARK_STATUSES.contains(&status.as_str()) {
        return Err(HandlerErr::bad_params(
            "status must be one of: present, absent, late, excused",
        ));
    }
    Ok(status)
}

fn module_in_term(
    conn: &Connection,
    semester_module_id: &str,
    term_id: &str,
) -> Result<bool, HandlerErr> {
    conn.query_row(
        "SELECT 1 FROM semester_modules WHERE id = ? AND term_id = ?",
        (semester_module_id, term_id),
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::query)
}

fn student_exists(conn: &Connection, student_no: &str) -> Result<bool, HandlerErr> {
    conn.query_row(
        "SELECT 1 FROM students WHERE student_no = ?",
        [student_no],
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::query)
}

fn upsert_mark(
    conn: &Connection,
    term_id: &str,
    semester_module_id: &str,
    student_no: &str,
    week: i64,
    status: &str,
) -> Result<(), HandlerErr> {
    conn.execute(
        "INSERT INTO attendance_marks(id, term_id, semester_module_id, student_no, week, status, recorded_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(semester_module_id, student_no, week) DO UPDATE SET
           status = excluded.status,
           recorded_at = excluded.recorded_at",
        (
            Uuid::new_v4().to_string(),
            term_id,
            semester_module_id,
            student_no,
            week,
            status,
            Utc::now().to_rfc3339(),
        ),
    )
    .map_err(|e| HandlerErr::update(e, "attendance_marks"))?;
    Ok(())
}

fn attendance_record(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let term_id = required_str(params, "termId")?;
    let semester_module_id = required_str(params, "semesterModuleId")?;
    let student_no = required_str(params, "studentNo")?;
    let week = parse_week(params)?;
    let status = parse_mark_status(params)?;

    if !module_in_term(conn, &semester_module_id, &term_id)? {
        return Err(HandlerErr::new("not_found", "module not found in term"));
    }
    if !student_exists(conn, &student_no)? {
        return Err(HandlerErr::new("not_found", "student not found"));
    }

    upsert_mark(conn, &term_id, &semester_module_id, &student_no, week, &status)?;
    db::audit_append(
        conn,
        "attendance.record",
        &student_no,
        &json!({ "semesterModuleId": semester_module_id, "week": week, "status": status }),
    )
    .map_err(|e| HandlerErr::update(e, "audit_log"))?;

    Ok(json!({ "ok": true }))
}

fn attendance_bulk_record(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let term_id = required_str(params, "termId")?;
    let semester_module_id = required_str(params, "semesterModuleId")?;
    let week = parse_week(params)?;
    let status = parse_mark_status(params)?;
    let Some(student_nos_json) = params.get("studentNos").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing studentNos"));
    };
    let student_nos: Vec<String> = student_nos_json
        .iter()
        .filter_map(|v| v.as_str().map(|s| s.to_string()))
        .collect();

    if !module_in_term(conn, &semester_module_id, &term_id)? {
        return Err(HandlerErr::new("not_found", "module not found in term"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let mut stamped: i64 = 0;
    for student_no in &student_nos {
        // Unknown student numbers are skipped, not fatal.
        if !student_exists(&tx, student_no)? {
            continue;
        }
        upsert_mark(&tx, &term_id, &semester_module_id, student_no, week, &status)?;
        stamped += 1;
    }
    db::audit_append(
        &tx,
        "attendance.bulkRecord",
        &semester_module_id,
        &json!({ "week": week, "status": status, "stamped": stamped }),
    )
    .map_err(|e| HandlerErr::update(e, "audit_log"))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({ "stamped": stamped }))
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
        "attendance.record" => Some(dispatch(state, req, attendance_record)),
        "attendance.bulkRecord" => Some(dispatch(state, req, attendance_bulk_record)),
        _ => None,
    }
}
