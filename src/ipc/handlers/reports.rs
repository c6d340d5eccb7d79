use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{calc_err, db_conn, optional_str, parse_page, parse_page_size, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::repo;
use rusqlite::Connection;
use serde_json::json;

struct ReportInputs {
    enrollments: Vec<repo::EnrollmentRow>,
    marks: Vec<repo::MarkRow>,
    registrations: Vec<repo::RegistrationRow>,
}

/// Fetch everything a report needs up front; aggregation is pure after this.
fn load_report_inputs(
    conn: &Connection,
    term_id: &str,
    filters: &calc::ReportFilters,
) -> Result<ReportInputs, calc::CalcError> {
    let enrollments = repo::fetch_enrollments(
        conn,
        filters,
        Some(&calc::COUNTED_ENROLLMENT_STATUSES),
    )?;
    let marks = repo::fetch_marks(conn, term_id, filters.week)?;
    let student_nos: Vec<String> = enrollments.iter().map(|e| e.student_no.clone()).collect();
    let registrations = repo::fetch_registrations(conn, term_id, &student_nos)?;
    Ok(ReportInputs {
        enrollments,
        marks,
        registrations,
    })
}

fn handle_attendance_overview(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let filters = match calc::parse_report_filters(req.params.get("filters")) {
        Ok(f) => f,
        Err(e) => return calc_err(req, e),
    };

    let Some(term_id) = filters.term_id.clone() else {
        // No term selected is an explicit empty report, not an error.
        return ok(
            &req.id,
            json!({
                "filters": filters,
                "overview": calc::OverviewStats::default(),
                "schools": [],
                "atRiskStudents": [],
                "moduleBreakdown": [],
            }),
        );
    };
    match repo::term_exists(conn, &term_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "term not found", None),
        Err(e) => return calc_err(req, e),
    }

    let inputs = match load_report_inputs(conn, &term_id, &filters) {
        Ok(v) => v,
        Err(e) => return calc_err(req, e),
    };

    let counts = calc::counts_by_student(&inputs.marks);
    let students = calc::summarize_students(&inputs.enrollments, &counts);
    let rollup = calc::attendance_rollup(&students);
    let breakdown = calc::module_breakdown(&inputs.registrations, &inputs.marks);

    tracing::info!(
        term = %term_id,
        students = rollup.overview.total_students,
        at_risk = rollup.overview.total_at_risk,
        "attendance overview computed"
    );

    ok(
        &req.id,
        json!({
            "filters": filters,
            "overview": rollup.overview,
            "schools": rollup.schools,
            "atRiskStudents": rollup.at_risk_students,
            "moduleBreakdown": breakdown,
        }),
    )
}

fn parse_details_query(req: &Request) -> Result<(Option<String>, usize, usize), HandlerErr> {
    let search = optional_str(&req.params, "search")?;
    let page = parse_page(req.params.get("page"))?;
    let page_size = parse_page_size(req.params.get("pageSize"))?;
    Ok((search, page, page_size))
}

fn handle_student_details(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let filters = match calc::parse_report_filters(req.params.get("filters")) {
        Ok(f) => f,
        Err(e) => return calc_err(req, e),
    };
    let (search, page, page_size) = match parse_details_query(req) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let Some(term_id) = filters.term_id.clone() else {
        return ok(
            &req.id,
            json!({
                "filters": filters,
                "total": 0,
                "page": page as i64,
                "pageSize": page_size as i64,
                "rows": [],
            }),
        );
    };
    match repo::term_exists(conn, &term_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "term not found", None),
        Err(e) => return calc_err(req, e),
    }

    let inputs = match load_report_inputs(conn, &term_id, &filters) {
        Ok(v) => v,
        Err(e) => return calc_err(req, e),
    };

    let details = calc::student_details(
        &inputs.enrollments,
        &inputs.registrations,
        &inputs.marks,
        search.as_deref(),
        page,
        page_size,
    );

    ok(
        &req.id,
        json!({
            "filters": filters,
            "total": details.total,
            "page": details.page,
            "pageSize": details.page_size,
            "rows": details.rows,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.attendanceOverview" => Some(handle_attendance_overview(state, req)),
        "reports.studentDetails" => Some(handle_student_details(state, req)),
        _ => None,
    }
}
