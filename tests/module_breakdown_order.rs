mod test_support;

use serde_json::json;
use test_support::{
    create_module, create_program, create_school, create_term, enroll, record_mark, register,
    request_ok, select_workspace, spawn_sidecar, temp_dir, upsert_student,
};

#[test]
fn breakdown_sorts_worst_first_and_skips_dropped_registrations() {
    let workspace = temp_dir("registryd-breakdown");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let term = create_term(&mut stdin, &mut reader, "2025S1");
    let eng = create_school(&mut stdin, &mut reader, "ENG", "School of Engineering");
    let bse = create_program(&mut stdin, &mut reader, &eng, "BSE", "Software Engineering");
    upsert_student(&mut stdin, &mut reader, "S001", "Ali", "Aisha");
    upsert_student(&mut stdin, &mut reader, "S002", "Brown", "Ben");
    enroll(&mut stdin, &mut reader, &term, "S001", &bse, "1", "Active");
    enroll(&mut stdin, &mut reader, &term, "S002", &bse, "1", "Active");

    let good = create_module(&mut stdin, &mut reader, &term, "CS101", "Programming I", 3.0);
    let poor = create_module(&mut stdin, &mut reader, &term, "CS202", "Data Structures", 3.0);
    let middling = create_module(&mut stdin, &mut reader, &term, "CS303", "Databases", 3.0);
    let ghost = create_module(&mut stdin, &mut reader, &term, "CS404", "Networks", 3.0);

    register(&mut stdin, &mut reader, &term, "S001", &good, "Confirmed", None);
    register(&mut stdin, &mut reader, &term, "S001", &poor, "Confirmed", None);
    register(&mut stdin, &mut reader, &term, "S001", &middling, "Confirmed", None);
    register(&mut stdin, &mut reader, &term, "S002", &middling, "Confirmed", None);
    // Dropped and deleted registrations never count as members.
    register(&mut stdin, &mut reader, &term, "S002", &poor, "Drop", None);
    register(&mut stdin, &mut reader, &term, "S001", &ghost, "Delete", None);

    record_mark(&mut stdin, &mut reader, &term, &good, "S001", 1, "present");
    record_mark(&mut stdin, &mut reader, &term, &good, "S001", 2, "present");
    record_mark(&mut stdin, &mut reader, &term, &poor, "S001", 1, "absent");
    record_mark(&mut stdin, &mut reader, &term, &poor, "S001", 2, "absent");
    // S002's marks in the dropped module must not count either.
    record_mark(&mut stdin, &mut reader, &term, &poor, "S002", 1, "present");
    record_mark(&mut stdin, &mut reader, &term, &middling, "S001", 1, "present");
    record_mark(&mut stdin, &mut reader, &term, &middling, "S002", 1, "absent");

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "reports.attendanceOverview",
        json!({ "filters": { "termId": term } }),
    );
    let breakdown = result
        .get("moduleBreakdown")
        .and_then(|v| v.as_array())
        .expect("moduleBreakdown");

    // CS404 has no live members and vanishes entirely.
    assert_eq!(breakdown.len(), 3);
    let codes: Vec<&str> = breakdown
        .iter()
        .filter_map(|m| m.get("moduleCode").and_then(|v| v.as_str()))
        .collect();
    assert_eq!(codes, vec!["CS202", "CS303", "CS101"]);

    let rates: Vec<i64> = breakdown
        .iter()
        .filter_map(|m| m.get("avgAttendanceRate").and_then(|v| v.as_i64()))
        .collect();
    assert_eq!(rates, vec![0, 50, 100]);
    for pair in rates.windows(2) {
        assert!(pair[0] <= pair[1], "must be ascending by rate");
    }

    // CS202: one live member (S001, 0%, at risk); the dropped S002 excluded.
    assert_eq!(
        breakdown[0].get("totalStudents").and_then(|v| v.as_i64()),
        Some(1)
    );
    assert_eq!(
        breakdown[0].get("atRiskCount").and_then(|v| v.as_i64()),
        Some(1)
    );
}
