use crate::calc;
use crate::db;
use crate::ipc::error::ok;
use crate::ipc::helpers::{db_conn, required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

/// Import LMS quiz results onto module registrations. Each score is a
/// percentage converted to a letter grade on the registry scale; students
/// without an existing registration for the module are reported back as
/// skipped rather than silently enrolled.
fn import_quiz_scores(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let term_id = required_str(params, "termId")?;
    let semester_module_id = required_str(params, "semesterModuleId")?;
    let Some(scores) = params.get("scores").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing scores"));
    };

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

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let mut imported: i64 = 0;
    let mut skipped: Vec<String> = Vec::new();
    for entry in scores {
        let Some(student_no) = entry.get("studentNo").and_then(|v| v.as_str()) else {
            return Err(HandlerErr::bad_params("scores entries need studentNo"));
        };
        let Some(percent) = entry.get("percent").and_then(|v| v.as_f64()) else {
            return Err(HandlerErr::bad_params("scores entries need percent"));
        };
        if !(0.0..=100.0).contains(&percent) {
            return Err(HandlerErr::bad_params("percent must be in 0..=100"));
        }

        let grade = calc::quiz_letter_grade(percent);
        let updated = tx
            .execute(
                "UPDATE module_registrations
                 SET grade = ?, updated_at = ?
                 WHERE semester_module_id = ? AND student_no = ?",
                (grade, Utc::now().to_rfc3339(), &semester_module_id, student_no),
            )
            .map_err(|e| HandlerErr::update(e, "module_registrations"))?;
        if updated == 0 {
            skipped.push(student_no.to_string());
        } else {
            imported += 1;
        }
    }
    db::audit_append(
        &tx,
        "lms.importQuizScores",
        &semester_module_id,
        &json!({ "imported": imported, "skipped": skipped.len() }),
    )
    .map_err(|e| HandlerErr::update(e, "audit_log"))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    tracing::info!(module = %semester_module_id, imported, "quiz scores imported");
    Ok(json!({ "imported": imported, "skipped": skipped }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "lms.importQuizScores" => {
            let conn = match db_conn(state, req) {
                Ok(c) => c,
                Err(resp) => return Some(resp),
            };
            Some(match import_quiz_scores(conn, &req.params) {
                Ok(result) => ok(&req.id, result),
                Err(error) => error.response(&req.id),
            })
        }
        _ => None,
    }
}
