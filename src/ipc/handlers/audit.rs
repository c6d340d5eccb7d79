use crate::ipc::error::ok;
use crate::ipc::helpers::{db_conn, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

fn audit_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let limit = match params.get("limit") {
        None => 100,
        Some(v) => {
            let Some(n) = v.as_u64() else {
                return Err(HandlerErr::bad_params("limit must be a positive integer"));
            };
            if n == 0 || n > 1000 {
                return Err(HandlerErr::bad_params("limit must be in range 1..=1000"));
            }
            n as i64
        }
    };

    let mut stmt = conn
        .prepare(
            "SELECT id, at, action, entity, details
             FROM audit_log
             ORDER BY at DESC, rowid DESC
             LIMIT ?",
        )
        .map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map([limit], |r| {
            let details_raw: Option<String> = r.get(4)?;
            let details = details_raw
                .and_then(|s| serde_json::from_str::<serde_json::Value>(&s).ok())
                .unwrap_or(serde_json::Value::Null);
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "at": r.get::<_, String>(1)?,
                "action": r.get::<_, String>(2)?,
                "entity": r.get::<_, String>(3)?,
                "details": details,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    Ok(json!({ "entries": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "audit.list" => {
            let conn = match db_conn(state, req) {
                Ok(c) => c,
                Err(resp) => return Some(resp),
            };
            Some(match audit_list(conn, &req.params) {
                Ok(result) => ok(&req.id, result),
                Err(error) => error.response(&req.id),
            })
        }
        _ => None,
    }
}
