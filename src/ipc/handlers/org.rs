use crate::db;
use crate::ipc::error::ok;
use crate::ipc::helpers::{db_conn, required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn terms_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let code = required_str(params, "code")?;
    let name = required_str(params, "name")?;
    let starts_on = params.get("startsOn").and_then(|v| v.as_str());
    let ends_on = params.get("endsOn").and_then(|v| v.as_str());

    let term_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO terms(id, code, name, starts_on, ends_on) VALUES(?, ?, ?, ?, ?)",
        (&term_id, &code, &name, &starts_on, &ends_on),
    )
    .map_err(|e| HandlerErr::update(e, "terms"))?;
    db::audit_append(conn, "terms.create", &term_id, &json!({ "code": code }))
        .map_err(|e| HandlerErr::update(e, "audit_log"))?;

    Ok(json!({ "termId": term_id, "code": code, "name": name }))
}

fn terms_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id, code, name, starts_on, ends_on FROM terms ORDER BY code")
        .map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "code": r.get::<_, String>(1)?,
                "name": r.get::<_, String>(2)?,
                "startsOn": r.get::<_, Option<String>>(3)?,
                "endsOn": r.get::<_, Option<String>>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "terms": rows }))
}

fn schools_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let code = required_str(params, "code")?;
    let name = required_str(params, "name")?;

    let school_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO schools(id, code, name) VALUES(?, ?, ?)",
        (&school_id, &code, &name),
    )
    .map_err(|e| HandlerErr::update(e, "schools"))?;
    db::audit_append(conn, "schools.create", &school_id, &json!({ "code": code }))
        .map_err(|e| HandlerErr::update(e, "audit_log"))?;

    Ok(json!({ "schoolId": school_id, "code": code, "name": name }))
}

fn schools_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.code, s.name,
               (SELECT COUNT(*) FROM programs p WHERE p.school_id = s.id) AS program_count
             FROM schools s
             ORDER BY s.code",
        )
        .map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "code": r.get::<_, String>(1)?,
                "name": r.get::<_, String>(2)?,
                "programCount": r.get::<_, i64>(3)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "schools": rows }))
}

fn programs_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let school_id = required_str(params, "schoolId")?;
    let code = required_str(params, "code")?;
    let name = required_str(params, "name")?;

    let school_exists = conn
        .query_row("SELECT 1 FROM schools WHERE id = ?", [&school_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(HandlerErr::query)?
        .is_some();
    if !school_exists {
        return Err(HandlerErr::new("not_found", "school not found"));
    }

    let program_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO programs(id, school_id, code, name) VALUES(?, ?, ?, ?)",
        (&program_id, &school_id, &code, &name),
    )
    .map_err(|e| HandlerErr::update(e, "programs"))?;
    db::audit_append(conn, "programs.create", &program_id, &json!({ "code": code }))
        .map_err(|e| HandlerErr::update(e, "audit_log"))?;

    Ok(json!({ "programId": program_id, "code": code, "name": name }))
}

fn programs_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT p.id, p.code, p.name, s.id, s.code
             FROM programs p
             JOIN schools s ON s.id = p.school_id
             ORDER BY p.code",
        )
        .map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "code": r.get::<_, String>(1)?,
                "name": r.get::<_, String>(2)?,
                "schoolId": r.get::<_, String>(3)?,
                "schoolCode": r.get::<_, String>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "programs": rows }))
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
        "terms.create" => Some(dispatch(state, req, terms_create)),
        "terms.list" => Some(dispatch(state, req, |conn, _| terms_list(conn))),
        "schools.create" => Some(dispatch(state, req, schools_create)),
        "schools.list" => Some(dispatch(state, req, |conn, _| schools_list(conn))),
        "programs.create" => Some(dispatch(state, req, programs_create)),
        "programs.list" => Some(dispatch(state, req, |conn, _| programs_list(conn))),
        _ => None,
    }
}
