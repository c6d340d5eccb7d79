use crate::db;
use crate::ipc::error::ok;
use crate::ipc::helpers::{db_conn, optional_str, required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn sponsors_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = required_str(params, "name")?;
    let contact_email = optional_str(params, "contactEmail")?;

    let sponsor_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO sponsors(id, name, contact_email) VALUES(?, ?, ?)",
        (&sponsor_id, &name, &contact_email),
    )
    .map_err(|e| HandlerErr::update(e, "sponsors"))?;
    db::audit_append(conn, "sponsors.create", &sponsor_id, &json!({ "name": name }))
        .map_err(|e| HandlerErr::update(e, "audit_log"))?;

    Ok(json!({ "sponsorId": sponsor_id, "name": name }))
}

fn sponsorships_upsert(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let sponsor_id = required_str(params, "sponsorId")?;
    let term_id = required_str(params, "termId")?;
    let student_no = required_str(params, "studentNo")?;
    let amount = params.get("amount").and_then(|v| v.as_f64()).unwrap_or(0.0);
    if amount < 0.0 {
        return Err(HandlerErr::bad_params("amount must be >= 0"));
    }
    let note = optional_str(params, "note")?;

    let sponsor_exists = conn
        .query_row("SELECT 1 FROM sponsors WHERE id = ?", [&sponsor_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(HandlerErr::query)?
        .is_some();
    if !sponsor_exists {
        return Err(HandlerErr::new("not_found", "sponsor not found"));
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

    let sponsorship_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO sponsorships(id, sponsor_id, term_id, student_no, amount, note)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(sponsor_id, term_id, student_no) DO UPDATE SET
           amount = excluded.amount,
           note = excluded.note",
        (&sponsorship_id, &sponsor_id, &term_id, &student_no, amount, &note),
    )
    .map_err(|e| HandlerErr::update(e, "sponsorships"))?;
    db::audit_append(
        conn,
        "sponsorships.upsert",
        &student_no,
        &json!({ "sponsorId": sponsor_id, "termId": term_id, "amount": amount }),
    )
    .map_err(|e| HandlerErr::update(e, "audit_log"))?;

    Ok(json!({ "sponsorId": sponsor_id, "studentNo": student_no, "amount": amount }))
}

fn sponsorships_summary(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let term_id = required_str(params, "termId")?;

    let mut stmt = conn
        .prepare(
            "SELECT sp.id, sp.name,
                    COUNT(DISTINCT s.student_no) AS student_count,
                    COALESCE(SUM(s.amount), 0) AS total_amount
             FROM sponsorships s
             JOIN sponsors sp ON sp.id = s.sponsor_id
             WHERE s.term_id = ?
             GROUP BY sp.id, sp.name
             ORDER BY sp.name",
        )
        .map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map([&term_id], |r| {
            Ok(json!({
                "sponsorId": r.get::<_, String>(0)?,
                "sponsorName": r.get::<_, String>(1)?,
                "studentCount": r.get::<_, i64>(2)?,
                "totalAmount": r.get::<_, f64>(3)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    Ok(json!({ "sponsors": rows }))
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
        "sponsors.create" => Some(dispatch(state, req, sponsors_create)),
        "sponsorships.upsert" => Some(dispatch(state, req, sponsorships_upsert)),
        "sponsorships.summary" => Some(dispatch(state, req, sponsorships_summary)),
        _ => None,
    }
}
