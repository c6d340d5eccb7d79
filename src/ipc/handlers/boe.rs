use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{calc_err, db_conn};
use crate::ipc::types::{AppState, Request};
use crate::repo;
use serde_json::json;

fn handle_boe_stats(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let filters = match calc::parse_report_filters(req.params.get("filters")) {
        Ok(f) => f,
        Err(e) => return calc_err(req, e),
    };

    let Some(term_id) = filters.term_id.clone() else {
        return ok(
            &req.id,
            json!({
                "filters": filters,
                "overview": calc::BoeCounts::default(),
                "schools": [],
                "rankings": [],
            }),
        );
    };
    match repo::term_exists(conn, &term_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "term not found", None),
        Err(e) => return calc_err(req, e),
    }

    // The board classifies every enrollment status, so no status narrowing.
    let enrollments = match repo::fetch_enrollments(conn, &filters, None) {
        Ok(v) => v,
        Err(e) => return calc_err(req, e),
    };
    let student_nos: Vec<String> = enrollments.iter().map(|e| e.student_no.clone()).collect();
    let registrations = match repo::fetch_registrations(conn, &term_id, &student_nos) {
        Ok(v) => v,
        Err(e) => return calc_err(req, e),
    };

    let summaries = calc::summarize_boe(&enrollments, &registrations);
    let rollup = calc::boe_rollup(&summaries);

    tracing::info!(
        term = %term_id,
        students = rollup.overview.total_students,
        passed = rollup.overview.passed,
        failed = rollup.overview.failed,
        "BOE statistics computed"
    );

    ok(
        &req.id,
        json!({
            "filters": filters,
            "overview": rollup.overview,
            "schools": rollup.schools,
            "rankings": rollup.rankings,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.boeStats" => Some(handle_boe_stats(state, req)),
        _ => None,
    }
}
