#![allow(dead_code)]

use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> String {
    NEXT_ID.fetch_add(1, Ordering::Relaxed).to_string()
}

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_registryd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn registryd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    method: &str,
    params: Value,
) -> Value {
    let id = next_id();
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
    value
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    method: &str,
    params: Value,
) -> Value {
    let value = request(stdin, reader, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().expect("result")
}

pub fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    method: &str,
    params: Value,
) -> Value {
    let value = request(stdin, reader, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value.get("error").cloned().expect("error")
}

pub fn select_workspace(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &Path,
) {
    let _ = request_ok(
        stdin,
        reader,
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
}

pub fn create_term(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    code: &str,
) -> String {
    request_ok(
        stdin,
        reader,
        "terms.create",
        json!({ "code": code, "name": format!("Term {}", code) }),
    )
    .get("termId")
    .and_then(|v| v.as_str())
    .expect("termId")
    .to_string()
}

pub fn create_school(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    code: &str,
    name: &str,
) -> String {
    request_ok(
        stdin,
        reader,
        "schools.create",
        json!({ "code": code, "name": name }),
    )
    .get("schoolId")
    .and_then(|v| v.as_str())
    .expect("schoolId")
    .to_string()
}

pub fn create_program(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    school_id: &str,
    code: &str,
    name: &str,
) -> String {
    request_ok(
        stdin,
        reader,
        "programs.create",
        json!({ "schoolId": school_id, "code": code, "name": name }),
    )
    .get("programId")
    .and_then(|v| v.as_str())
    .expect("programId")
    .to_string()
}

pub fn upsert_student(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    student_no: &str,
    last_name: &str,
    first_name: &str,
) {
    let _ = request_ok(
        stdin,
        reader,
        "students.upsert",
        json!({ "studentNo": student_no, "lastName": last_name, "firstName": first_name }),
    );
}

pub fn enroll(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    term_id: &str,
    student_no: &str,
    program_id: &str,
    semester_number: &str,
    status: &str,
) {
    let _ = request_ok(
        stdin,
        reader,
        "enrollments.upsert",
        json!({
            "termId": term_id,
            "studentNo": student_no,
            "programId": program_id,
            "semesterNumber": semester_number,
            "status": status
        }),
    );
}

pub fn create_module(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    term_id: &str,
    module_code: &str,
    title: &str,
    credits: f64,
) -> String {
    request_ok(
        stdin,
        reader,
        "modules.upsert",
        json!({ "termId": term_id, "moduleCode": module_code, "title": title, "credits": credits }),
    )
    .get("semesterModuleId")
    .and_then(|v| v.as_str())
    .expect("semesterModuleId")
    .to_string()
}

pub fn register(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    term_id: &str,
    student_no: &str,
    semester_module_id: &str,
    status: &str,
    grade: Option<&str>,
) {
    let _ = request_ok(
        stdin,
        reader,
        "registrations.upsert",
        json!({
            "termId": term_id,
            "studentNo": student_no,
            "semesterModuleId": semester_module_id,
            "status": status,
            "grade": grade
        }),
    );
}

pub fn record_mark(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    term_id: &str,
    semester_module_id: &str,
    student_no: &str,
    week: i64,
    status: &str,
) {
    let _ = request_ok(
        stdin,
        reader,
        "attendance.record",
        json!({
            "termId": term_id,
            "semesterModuleId": semester_module_id,
            "studentNo": student_no,
            "week": week,
            "status": status
        }),
    );
}
