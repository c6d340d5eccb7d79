use crate::db;
use crate::ipc::error::ok;
use crate::ipc::helpers::{db_conn, optional_str, required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn modules_upsert(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let term_id = required_str(params, "termId")?;
    let module_code = required_str(params, "moduleCode")?;
    let title = required_str(params, "title")?;
    let credits = params.get("credits").and_then(|v| v.as_f64()).unwrap_or(0.0);
    if credits < 0.0 {
        return Err(HandlerErr::bad_params("credits must be >= 0"));
    }

    let term_exists = conn
        .query_row("SELECT 1 FROM terms WHERE id = ?", [&term_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(HandlerErr::query)?
        .is_some();
    if !term_exists {
        return Err(HandlerErr::new("not_found", "term not found"));
    }

    let module_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO semester_modules(id, term_id, module_code, title, credits)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(term_id, module_code) DO UPDATE SET
           title = excluded.title,
           credits = excluded.credits",
        (&module_id, &term_id, &module_code, &title, credits),
    )
    .map_err(|e| HandlerErr::update(e, "semester_modules"))?;

    // The upsert may have kept an existing id; read the canonical one back.
    let canonical_id: String = conn
        .query_row(
            "SELECT id FROM semester_modules WHERE term_id = ? AND module_code = ?",
            (&term_id, &module_code),
            |r| r.get(0),
        )
        .map_err(HandlerErr::query)?;
    db::audit_append(
        conn,
        "modules.upsert",
        &canonical_id,
        &json!({ "moduleCode": module_code }),
    )
    .map_err(|e| HandlerErr::update(e, "audit_log"))?;

    Ok(json!({ "semesterModuleId": canonical_id, "moduleCode": module_code }))
}

fn modules_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let term_id = required_str(params, "termId")?;

    let mut stmt = conn
        .prepare(
            "SELECT m.id, m.module_code, m.title, m.credits,
               (SELECT COUNT(*) FROM module_registrations r
                WHERE r.semester_module_id = m.id) AS registration_count
             FROM semester_modules m
             WHERE m.term_id = ?
             ORDER BY m.module_code",
        )
        .map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map([&term_id], |r| {
            Ok(json!({
                "semesterModuleId": r.get::<_, String>(0)?,
                "moduleCode": r.get::<_, String>(1)?,
                "title": r.get::<_, String>(2)?,
                "credits": r.get::<_, f64>(3)?,
                "registrationCount": r.get::<_, i64>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    Ok(json!({ "modules": rows }))
}

fn registrations_upsert(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let term_id = required_str(params, "termId")?;
    let student_no = required_str(params, "studentNo")?;
    let semester_module_id = required_str(params, "semesterModuleId")?;
    let status = required_str(params, "status")?;
    let grade = optional_str(params, "grade")?;

    let module_in_term = conn
        .query_row(
            "SELECT 1 FROM semester_modules WHERE id = ? AND term_id = ?",
            (&semester_module_id, &term_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(HandlerErr::query)?
        .is_some();
    if !module_in_term {
        return Err(HandlerErr::new("not_found", "module not found in term"));
    }
    let student_exists = conn
        .query_row(
            "SELECT 1 FROM students WHERE student_no = ?",
            [&student_no],
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(HandlerErr::query)?
        .is_some();
    if !student_exists {
        return Err(HandlerErr::new("not_found", "student not found"));
    }

    let registration_id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO module_registrations(id, term_id, student_no, semester_module_id, status, grade, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(semester_module_id, student_no) DO UPDATE SET
           status = excluded.status,
           grade = excluded.grade,
           updated_at = excluded.updated_at",
        (
            &registration_id,
            &term_id,
            &student_no,
            &semester_module_id,
            &status,
            &grade,
            &now,
        ),
    )
    .map_err(|e| HandlerErr::update(e, "module_registrations"))?;
    db::audit_append(
        conn,
        "registrations.upsert",
        &student_no,
        &json!({ "semesterModuleId": semester_module_id, "status": status, "grade": grade }),
    )
    .map_err(|e| HandlerErr::update(e, "audit_log"))?;

    Ok(json!({
        "studentNo": student_no,
        "semesterModuleId": semester_module_id,
        "status": status,
        "grade": grade
    }))
}

fn registrations_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let term_id = required_str(params, "termId")?;
    let semester_module_id = optional_str(params, "semesterModuleId")?;

    let rows = if let Some(module_id) = semester_module_id {
        let mut stmt = conn
            .prepare(
                "SELECT r.student_no, m.module_code, r.status, r.grade
                 FROM module_registrations r
                 JOIN semester_modules m ON m.id = r.semester_module_id
                 WHERE r.term_id = ? AND r.semester_module_id = ?
                 ORDER BY r.student_no",
            )
            .map_err(HandlerErr::query)?;
        stmt.query_map((&term_id, &module_id), |r| {
            Ok(json!({
                "studentNo": r.get::<_, String>(0)?,
                "moduleCode": r.get::<_, String>(1)?,
                "status": r.get::<_, String>(2)?,
                "grade": r.get::<_, Option<String>>(3)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?
    } else {
        let mut stmt = conn
            .prepare(
                "SELECT r.student_no, m.module_code, r.status, r.grade
                 FROM module_registrations r
                 JOIN semester_modules m ON m.id = r.semester_module_id
                 WHERE r.term_id = ?
                 ORDER BY m.module_code, r.student_no",
            )
            .map_err(HandlerErr::query)?;
        stmt.query_map([&term_id], |r| {
            Ok(json!({
                "studentNo": r.get::<_, String>(0)?,
                "moduleCode": r.get::<_, String>(1)?,
                "status": r.get::<_, String>(2)?,
                "grade": r.get::<_, Option<String>>(3)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?
    };

    Ok(json!({ "registrations": rows }))
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
        "modules.upsert" => Some(dispatch(state, req, modules_upsert)),
        "modules.list" => Some(dispatch(state, req, modules_list)),
        "registrations.upsert" => Some(dispatch(state, req, registrations_upsert)),
        "registrations.list" => Some(dispatch(state, req, registrations_list)),
        _ => None,
    }
}
