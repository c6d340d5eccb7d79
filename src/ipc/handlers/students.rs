use crate::db;
use crate::ipc::error::ok;
use crate::ipc::helpers::{db_conn, optional_str, required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn students_upsert(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_no = required_str(params, "studentNo")?;
    let last_name = required_str(params, "lastName")?;
    let first_name = required_str(params, "firstName")?;
    let email = optional_str(params, "email")?;
    let active = params
        .get("active")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);

    let student_id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO students(id, student_no, last_name, first_name, email, active, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_no) DO UPDATE SET
           last_name = excluded.last_name,
           first_name = excluded.first_name,
           email = excluded.email,
           active = excluded.active,
           updated_at = excluded.updated_at",
        (
            &student_id,
            &student_no,
            &last_name,
            &first_name,
            &email,
            active as i64,
            &now,
        ),
    )
    .map_err(|e| HandlerErr::update(e, "students"))?;
    db::audit_append(
        conn,
        "students.upsert",
        &student_no,
        &json!({ "lastName": last_name, "firstName": first_name }),
    )
    .map_err(|e| HandlerErr::update(e, "audit_log"))?;

    Ok(json!({ "studentNo": student_no }))
}

fn students_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let search = optional_str(params, "search")?.map(|s| s.to_ascii_lowercase());

    let mut stmt = conn
        .prepare(
            "SELECT student_no, last_name, first_name, email, active
             FROM students
             ORDER BY last_name, first_name, student_no",
        )
        .map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map([], |r| {
            let student_no: String = r.get(0)?;
            let last: String = r.get(1)?;
            let first: String = r.get(2)?;
            let email: Option<String> = r.get(3)?;
            let active: i64 = r.get(4)?;
            Ok((student_no, last, first, email, active != 0))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    let students: Vec<serde_json::Value> = rows
        .into_iter()
        .filter(|(student_no, last, first, _, _)| {
            let Some(needle) = search.as_deref() else {
                return true;
            };
            let display = format!("{}, {}", last, first).to_ascii_lowercase();
            display.contains(needle) || student_no.to_ascii_lowercase().contains(needle)
        })
        .map(|(student_no, last, first, email, active)| {
            json!({
                "studentNo": student_no,
                "displayName": format!("{}, {}", last, first),
                "email": email,
                "active": active
            })
        })
        .collect();

    Ok(json!({ "students": students }))
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
        "students.upsert" => Some(dispatch(state, req, students_upsert)),
        "students.list" => Some(dispatch(state, req, students_list)),
        _ => None,
    }
}
