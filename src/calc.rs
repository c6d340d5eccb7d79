use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::repo::{EnrollmentRow, MarkRow, RegistrationRow};

/// Attendance rate below which a student counts as at risk, provided they
/// have at least one marked week.
pub const AT_RISK_THRESHOLD: i64 = 75;

/// GPA at or above which an active student-semester passes the board.
pub const PASS_GPA: f64 = 2.0;

/// Enrollment statuses counted by the attendance reports.
pub const COUNTED_ENROLLMENT_STATUSES: [&str; 4] =
    ["Active", "Enrolled", "Outstanding", "Repeat"];

/// Module registration statuses excluded from breakdowns and GPA.
pub const EXCLUDED_MODULE_STATUSES: [&str; 2] = ["Delete", "Drop"];

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportFilters {
    pub term_id: Option<String>,
    pub school_ids: Option<Vec<String>>,
    pub program_id: Option<String>,
    pub semester_number: Option<String>,
    pub week: Option<i64>,
}

/// Parse the common report filter object. All fields are optional; an
/// absent or empty termId is not an error here — the report entry points
/// answer it with an explicit empty result instead.
pub fn parse_report_filters(raw: Option<&serde_json::Value>) -> Result<ReportFilters, CalcError> {
    let Some(raw) = raw else {
        return Ok(ReportFilters::default());
    };
    if raw.is_null() {
        return Ok(ReportFilters::default());
    }
    let Some(obj) = raw.as_object() else {
        return Err(CalcError::new("bad_params", "filters must be an object"));
    };

    let term_id = match obj.get("termId") {
        None => None,
        Some(v) if v.is_null() => None,
        Some(v) => match v.as_str() {
            Some(s) if s.trim().is_empty() => None,
            Some(s) => Some(s.trim().to_string()),
            None => return Err(CalcError::new("bad_params", "filters.termId must be a string")),
        },
    };

    let school_ids = match obj.get("schoolIds") {
        None => None,
        Some(v) if v.is_null() => None,
        Some(v) => {
            let Some(arr) = v.as_array() else {
                return Err(CalcError::new(
                    "bad_params",
                    "filters.schoolIds must be an array of strings",
                ));
            };
            let mut ids = Vec::new();
            for item in arr {
                let Some(s) = item.as_str() else {
                    return Err(CalcError::new(
                        "bad_params",
                        "filters.schoolIds must contain only strings",
                    ));
                };
                let trimmed = s.trim();
                if !trimmed.is_empty() {
                    ids.push(trimmed.to_string());
                }
            }
            if ids.is_empty() {
                None
            } else {
                Some(ids)
            }
        }
    };

    let program_id = optional_trimmed(obj.get("programId"), "filters.programId")?;
    let semester_number = optional_trimmed(obj.get("semesterNumber"), "filters.semesterNumber")?;

    let week = match obj.get("week") {
        None => None,
        Some(v) if v.is_null() => None,
        Some(v) => {
            let Some(w) = v.as_i64() else {
                return Err(CalcError::new("bad_params", "filters.week must be an integer"));
            };
            if w < 1 {
                return Err(CalcError::new("bad_params", "filters.week must be >= 1"));
            }
            Some(w)
        }
    };

    Ok(ReportFilters {
        term_id,
        school_ids,
        program_id,
        semester_number,
        week,
    })
}

fn optional_trimmed(
    v: Option<&serde_json::Value>,
    label: &str,
) -> Result<Option<String>, CalcError> {
    match v {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => match v.as_str() {
            Some(s) if s.trim().is_empty() => Ok(None),
            Some(s) => Ok(Some(s.trim().to_string())),
            None => Err(CalcError::new(
                "bad_params",
                format!("{} must be a string", label),
            )),
        },
    }
}

// ---------------------------------------------------------------------------
// Shared derivations
// ---------------------------------------------------------------------------

/// Synthetic class label: program code + "YxSy" parsed from the enrollment's
/// free-form semester number. One shared implementation for every report.
pub fn derive_class_name(program_code: &str, semester_number: &str) -> String {
    let (year, sem) = parse_year_sem(semester_number);
    format!("{}Y{}S{}", program_code, year, sem)
}

/// Extract (year, semester) digit strings from a semester-number field.
///
/// Two accepted forms: "Year N Sem M" free text (any case, any spacing) and
/// a plain numeric code n, where year = ceil(n/2) and sem = 2 when n is
/// even, else 1. Malformed input degrades to empty digit strings — the
/// label becomes e.g. "BSCSYS" — rather than failing the whole report.
pub fn parse_year_sem(semester_number: &str) -> (String, String) {
    let t = semester_number.trim();
    if t.is_empty() {
        return (String::new(), String::new());
    }
    let lower = t.to_ascii_lowercase();
    if lower.contains("year") {
        if let Some(year) = digits_after(&lower, "year") {
            let sem = digits_after(&lower, "sem").unwrap_or_default();
            return (year, sem);
        }
        return (String::new(), String::new());
    }
    if let Ok(n) = t.parse::<i64>() {
        if n >= 1 {
            let year = (n + 1) / 2;
            let sem = if n % 2 == 0 { 2 } else { 1 };
            return (year.to_string(), sem.to_string());
        }
    }
    (String::new(), String::new())
}

fn digits_after(haystack: &str, label: &str) -> Option<String> {
    let pos = haystack.find(label)?;
    let rest = &haystack[pos + label.len()..];
    let digits: String = rest
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.is_empty() {
        None
    } else {
        Some(digits)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub present: i64,
    pub absent: i64,
    pub late: i64,
    pub excused: i64,
}

impl StatusCounts {
    /// Count one mark. Unknown statuses are ignored.
    pub fn add(&mut self, status: &str) {
        match status {
            "present" => self.present += 1,
            "absent" => self.absent += 1,
            "late" => self.late += 1,
            "excused" => self.excused += 1,
            _ => {}
        }
    }

    pub fn total(&self) -> i64 {
        self.present + self.absent + self.late + self.excused
    }
}

/// round(100 × (present+late) / total); exactly 0 when nothing is marked.
pub fn attendance_rate(counts: &StatusCounts) -> i64 {
    let total = counts.total();
    if total <= 0 {
        return 0;
    }
    (100.0 * (counts.present + counts.late) as f64 / total as f64).round() as i64
}

pub fn is_at_risk(rate: i64, total_marked: i64) -> bool {
    rate < AT_RISK_THRESHOLD && total_marked > 0
}

pub fn is_excluded_module_status(status: &str) -> bool {
    EXCLUDED_MODULE_STATUSES.contains(&status)
}

pub fn grade_point(grade: &str) -> Option<f64> {
    match grade.trim().to_ascii_uppercase().as_str() {
        "A+" | "A" => Some(4.0),
        "A-" => Some(3.7),
        "B+" => Some(3.3),
        "B" => Some(3.0),
        "B-" => Some(2.7),
        "C+" => Some(2.3),
        "C" => Some(2.0),
        "C-" => Some(1.7),
        "D+" => Some(1.3),
        "D" => Some(1.0),
        "F" | "FA" | "I" | "W" => Some(0.0),
        _ => None,
    }
}

pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Σ(gradePoint × credits) / Σ(credits) over graded, credit-bearing
/// modules; 0.0 when none qualify. Rounded to 2 decimals.
pub fn semester_gpa<'a, I>(graded: I) -> f64
where
    I: IntoIterator<Item = (&'a str, f64)>,
{
    let mut points = 0.0;
    let mut credits = 0.0;
    for (grade, c) in graded {
        if c <= 0.0 {
            continue;
        }
        if let Some(p) = grade_point(grade) {
            points += p * c;
            credits += c;
        }
    }
    if credits > 0.0 {
        round2(points / credits)
    } else {
        0.0
    }
}

/// Letter grade for an LMS quiz percentage, on the registry's fixed scale.
pub fn quiz_letter_grade(percent: f64) -> &'static str {
    if percent >= 90.0 {
        "A+"
    } else if percent >= 85.0 {
        "A"
    } else if percent >= 80.0 {
        "A-"
    } else if percent >= 75.0 {
        "B+"
    } else if percent >= 70.0 {
        "B"
    } else if percent >= 65.0 {
        "B-"
    } else if percent >= 60.0 {
        "C+"
    } else if percent >= 55.0 {
        "C"
    } else if percent >= 50.0 {
        "C-"
    } else if percent >= 45.0 {
        "D+"
    } else if percent >= 40.0 {
        "D"
    } else {
        "F"
    }
}

// ---------------------------------------------------------------------------
// Per-student attendance summaries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAttendanceSummary {
    pub student_no: String,
    pub student_name: String,
    pub school_code: String,
    pub school_name: String,
    pub program_code: String,
    pub program_name: String,
    pub class_name: String,
    pub present: i64,
    pub absent: i64,
    pub late: i64,
    pub excused: i64,
    pub total_marked: i64,
    pub attendance_rate: i64,
    pub at_risk: bool,
}

pub fn counts_by_student(marks: &[MarkRow]) -> HashMap<String, StatusCounts> {
    let mut out: HashMap<String, StatusCounts> = HashMap::new();
    for mark in marks {
        out.entry(mark.student_no.clone())
            .or_default()
            .add(&mark.status);
    }
    out
}

/// Join enrollments with per-student counters; rate is 0 without marks.
pub fn summarize_students(
    enrollments: &[EnrollmentRow],
    counts: &HashMap<String, StatusCounts>,
) -> Vec<StudentAttendanceSummary> {
    enrollments
        .iter()
        .map(|e| {
            let c = counts.get(&e.student_no).copied().unwrap_or_default();
            let total = c.total();
            let rate = attendance_rate(&c);
            StudentAttendanceSummary {
                student_no: e.student_no.clone(),
                student_name: e.student_name.clone(),
                school_code: e.school_code.clone(),
                school_name: e.school_name.clone(),
                program_code: e.program_code.clone(),
                program_name: e.program_name.clone(),
                class_name: derive_class_name(&e.program_code, &e.semester_number),
                present: c.present,
                absent: c.absent,
                late: c.late,
                excused: c.excused,
                total_marked: total,
                attendance_rate: rate,
                at_risk: is_at_risk(rate, total),
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Grouping
// ---------------------------------------------------------------------------

/// Group items under an Ord key; BTreeMap iteration gives the report's
/// ascending key order for free.
fn group_by<'a, T, K, F>(items: impl IntoIterator<Item = &'a T>, key: F) -> BTreeMap<K, Vec<&'a T>>
where
    K: Ord,
    F: Fn(&T) -> K,
{
    let mut out: BTreeMap<K, Vec<&'a T>> = BTreeMap::new();
    for item in items {
        out.entry(key(item)).or_default().push(item);
    }
    out
}

/// Student-count-weighted mean of child average rates, rounded; 0 when the
/// parent has no students. This is NOT a re-average of raw mark counts —
/// report output depends on the weighted form.
fn weighted_avg_rate<I>(children: I) -> i64
where
    I: IntoIterator<Item = (i64, i64)>,
{
    let mut weighted: i64 = 0;
    let mut students: i64 = 0;
    for (avg, n) in children {
        weighted += avg * n;
        students += n;
    }
    if students > 0 {
        (weighted as f64 / students as f64).round() as i64
    } else {
        0
    }
}

// ---------------------------------------------------------------------------
// Attendance rollup (student → class → program → school)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverviewStats {
    pub total_students: i64,
    pub avg_attendance_rate: i64,
    pub total_at_risk: i64,
    pub at_risk_percentage: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassAttendanceSummary {
    pub class_name: String,
    pub total_students: i64,
    pub avg_attendance_rate: i64,
    pub at_risk_count: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramAttendanceSummary {
    pub program_code: String,
    pub program_name: String,
    pub total_students: i64,
    pub avg_attendance_rate: i64,
    pub at_risk_count: i64,
    pub classes: Vec<ClassAttendanceSummary>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolAttendanceSummary {
    pub school_code: String,
    pub school_name: String,
    pub total_students: i64,
    pub avg_attendance_rate: i64,
    pub at_risk_count: i64,
    pub programs: Vec<ProgramAttendanceSummary>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AtRiskStudent {
    pub student_no: String,
    pub student_name: String,
    pub program_code: String,
    pub class_name: String,
    pub attendance_rate: i64,
    pub total_marked: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRollup {
    pub overview: OverviewStats,
    pub schools: Vec<SchoolAttendanceSummary>,
    pub at_risk_students: Vec<AtRiskStudent>,
}

pub fn attendance_rollup(students: &[StudentAttendanceSummary]) -> AttendanceRollup {
    let mut schools = Vec::new();
    for (school_code, school_members) in group_by(students, |s| s.school_code.clone()) {
        let mut programs = Vec::new();
        for (program_code, program_members) in
            group_by(school_members.iter().copied(), |s| s.program_code.clone())
        {
            let mut classes = Vec::new();
            for (class_name, class_members) in
                group_by(program_members.iter().copied(), |s| s.class_name.clone())
            {
                classes.push(ClassAttendanceSummary {
                    class_name,
                    total_students: class_members.len() as i64,
                    avg_attendance_rate: weighted_avg_rate(
                        class_members.iter().map(|s| (s.attendance_rate, 1)),
                    ),
                    at_risk_count: class_members.iter().filter(|s| s.at_risk).count() as i64,
                });
            }
            programs.push(ProgramAttendanceSummary {
                program_code,
                program_name: program_members[0].program_name.clone(),
                total_students: classes.iter().map(|c| c.total_students).sum(),
                avg_attendance_rate: weighted_avg_rate(
                    classes
                        .iter()
                        .map(|c| (c.avg_attendance_rate, c.total_students)),
                ),
                at_risk_count: classes.iter().map(|c| c.at_risk_count).sum(),
                classes,
            });
        }
        schools.push(SchoolAttendanceSummary {
            school_code,
            school_name: school_members[0].school_name.clone(),
            total_students: programs.iter().map(|p| p.total_students).sum(),
            avg_attendance_rate: weighted_avg_rate(
                programs
                    .iter()
                    .map(|p| (p.avg_attendance_rate, p.total_students)),
            ),
            at_risk_count: programs.iter().map(|p| p.at_risk_count).sum(),
            programs,
        });
    }

    let total_students: i64 = schools.iter().map(|s| s.total_students).sum();
    let total_at_risk: i64 = schools.iter().map(|s| s.at_risk_count).sum();
    let overview = OverviewStats {
        total_students,
        avg_attendance_rate: weighted_avg_rate(
            schools
                .iter()
                .map(|s| (s.avg_attendance_rate, s.total_students)),
        ),
        total_at_risk,
        at_risk_percentage: if total_students > 0 {
            (100.0 * total_at_risk as f64 / total_students as f64).round() as i64
        } else {
            0
        },
    };

    let mut at_risk_students: Vec<AtRiskStudent> = students
        .iter()
        .filter(|s| s.at_risk)
        .map(|s| AtRiskStudent {
            student_no: s.student_no.clone(),
            student_name: s.student_name.clone(),
            program_code: s.program_code.clone(),
            class_name: s.class_name.clone(),
            attendance_rate: s.attendance_rate,
            total_marked: s.total_marked,
        })
        .collect();
    at_risk_students.sort_by(|a, b| {
        a.attendance_rate
            .cmp(&b.attendance_rate)
            .then_with(|| a.student_no.cmp(&b.student_no))
    });

    AttendanceRollup {
        overview,
        schools,
        at_risk_students,
    }
}

// ---------------------------------------------------------------------------
// Module-level breakdown
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleAttendanceSummary {
    pub semester_module_id: String,
    pub module_code: String,
    pub title: String,
    pub total_students: i64,
    pub avg_attendance_rate: i64,
    pub at_risk_count: i64,
}

/// Attendance grouped by semester module. Members are the students whose
/// registration status is outside the excluded set; their rates come from
/// that module's marks alone. Ascending by average rate — worst attendance
/// first, the remediation triage order the report consumers rely on.
pub fn module_breakdown(
    registrations: &[RegistrationRow],
    marks: &[MarkRow],
) -> Vec<ModuleAttendanceSummary> {
    let mut counts: HashMap<(&str, &str), StatusCounts> = HashMap::new();
    for mark in marks {
        counts
            .entry((mark.semester_module_id.as_str(), mark.student_no.as_str()))
            .or_default()
            .add(&mark.status);
    }

    let included: Vec<&RegistrationRow> = registrations
        .iter()
        .filter(|r| !is_excluded_module_status(&r.status))
        .collect();

    let mut out = Vec::new();
    for (module_id, members) in group_by(
        included.iter().copied(),
        |r| r.semester_module_id.clone(),
    ) {
        let mut rate_sum: i64 = 0;
        let mut at_risk_count: i64 = 0;
        for reg in &members {
            let c = counts
                .get(&(reg.semester_module_id.as_str(), reg.student_no.as_str()))
                .copied()
                .unwrap_or_default();
            let rate = attendance_rate(&c);
            rate_sum += rate;
            if is_at_risk(rate, c.total()) {
                at_risk_count += 1;
            }
        }
        let total_students = members.len() as i64;
        out.push(ModuleAttendanceSummary {
            semester_module_id: module_id,
            module_code: members[0].module_code.clone(),
            title: members[0].title.clone(),
            total_students,
            avg_attendance_rate: if total_students > 0 {
                (rate_sum as f64 / total_students as f64).round() as i64
            } else {
                0
            },
            at_risk_count,
        });
    }

    out.sort_by(|a, b| {
        a.avg_attendance_rate
            .cmp(&b.avg_attendance_rate)
            .then_with(|| a.module_code.cmp(&b.module_code))
    });
    out
}

// ---------------------------------------------------------------------------
// Paginated student/module detail view
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentModuleDetail {
    pub semester_module_id: String,
    pub module_code: String,
    pub title: String,
    pub present: i64,
    pub absent: i64,
    pub late: i64,
    pub excused: i64,
    pub total_marked: i64,
    pub attendance_rate: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentDetailRow {
    pub student_no: String,
    pub student_name: String,
    pub program_code: String,
    pub class_name: String,
    pub modules: Vec<StudentModuleDetail>,
    pub total_marked: i64,
    pub overall_attendance_rate: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentDetailsPage {
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub rows: Vec<StudentDetailRow>,
}

/// One row per enrolled student with nested per-module stats. The overall
/// rate is present+late over total marked across every module combined —
/// not an average of the per-module rates.
pub fn student_details(
    enrollments: &[EnrollmentRow],
    registrations: &[RegistrationRow],
    marks: &[MarkRow],
    search: Option<&str>,
    page: usize,
    page_size: usize,
) -> StudentDetailsPage {
    let mut counts: HashMap<(&str, &str), StatusCounts> = HashMap::new();
    for mark in marks {
        counts
            .entry((mark.semester_module_id.as_str(), mark.student_no.as_str()))
            .or_default()
            .add(&mark.status);
    }

    let included: Vec<&RegistrationRow> = registrations
        .iter()
        .filter(|r| !is_excluded_module_status(&r.status))
        .collect();
    let regs_by_student = group_by(included.iter().copied(), |r| r.student_no.clone());

    let needle = search.map(|s| s.trim().to_ascii_lowercase());

    let mut rows: Vec<StudentDetailRow> = Vec::new();
    for e in enrollments {
        if let Some(needle) = needle.as_deref() {
            if !needle.is_empty() {
                let hit = e.student_name.to_ascii_lowercase().contains(needle)
                    || e.student_no.to_ascii_lowercase().contains(needle)
                    || e.program_code.to_ascii_lowercase().contains(needle);
                if !hit {
                    continue;
                }
            }
        }

        let mut modules = Vec::new();
        let mut combined = StatusCounts::default();
        if let Some(regs) = regs_by_student.get(&e.student_no) {
            for reg in regs {
                let c = counts
                    .get(&(reg.semester_module_id.as_str(), reg.student_no.as_str()))
                    .copied()
                    .unwrap_or_default();
                combined.present += c.present;
                combined.absent += c.absent;
                combined.late += c.late;
                combined.excused += c.excused;
                modules.push(StudentModuleDetail {
                    semester_module_id: reg.semester_module_id.clone(),
                    module_code: reg.module_code.clone(),
                    title: reg.title.clone(),
                    present: c.present,
                    absent: c.absent,
                    late: c.late,
                    excused: c.excused,
                    total_marked: c.total(),
                    attendance_rate: attendance_rate(&c),
                });
            }
        }
        modules.sort_by(|a, b| a.module_code.cmp(&b.module_code));

        rows.push(StudentDetailRow {
            student_no: e.student_no.clone(),
            student_name: e.student_name.clone(),
            program_code: e.program_code.clone(),
            class_name: derive_class_name(&e.program_code, &e.semester_number),
            modules,
            total_marked: combined.total(),
            overall_attendance_rate: attendance_rate(&combined),
        });
    }

    rows.sort_by(|a, b| {
        a.student_name
            .cmp(&b.student_name)
            .then_with(|| a.student_no.cmp(&b.student_no))
    });

    let total = rows.len() as i64;
    let start = page.saturating_sub(1) * page_size;
    let paged = if start >= rows.len() {
        Vec::new()
    } else {
        let end = std::cmp::min(start + page_size, rows.len());
        rows[start..end].to_vec()
    };

    StudentDetailsPage {
        total,
        page: page as i64,
        page_size: page_size as i64,
        rows: paged,
    }
}

// ---------------------------------------------------------------------------
// BOE statistics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoeOutcome {
    Passed,
    Failed,
    DroppedOut,
    Withdrawn,
    Deferred,
}

#[derive(Debug, Clone)]
pub struct StudentBoeSummary {
    pub student_no: String,
    pub student_name: String,
    pub school_code: String,
    pub school_name: String,
    pub program_code: String,
    pub program_name: String,
    pub class_name: String,
    pub outcome: BoeOutcome,
    pub gpa: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoeCounts {
    pub total_students: i64,
    pub passed: i64,
    pub failed: i64,
    pub dropped_out: i64,
    pub withdrawn: i64,
    pub deferred: i64,
    pub avg_gpa: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoeStatsClassRow {
    pub class_name: String,
    #[serde(flatten)]
    pub counts: BoeCounts,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoeStatsProgramRow {
    pub program_code: String,
    pub program_name: String,
    #[serde(flatten)]
    pub counts: BoeCounts,
    pub classes: Vec<BoeStatsClassRow>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoeStatsSchool {
    pub school_code: String,
    pub school_name: String,
    #[serde(flatten)]
    pub counts: BoeCounts,
    pub programs: Vec<BoeStatsProgramRow>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoeStudentRanking {
    pub student_no: String,
    pub student_name: String,
    pub program_code: String,
    pub class_name: String,
    pub gpa: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoeRollup {
    pub overview: BoeCounts,
    pub schools: Vec<BoeStatsSchool>,
    pub rankings: Vec<BoeStudentRanking>,
}

/// Classify every student-semester into exactly one outcome. The inactive
/// enrollment statuses map directly and skip GPA entirely; everyone else
/// passes at GPA >= 2.0 over their non-dropped, graded modules.
pub fn summarize_boe(
    enrollments: &[EnrollmentRow],
    registrations: &[RegistrationRow],
) -> Vec<StudentBoeSummary> {
    let included: Vec<&RegistrationRow> = registrations
        .iter()
        .filter(|r| !is_excluded_module_status(&r.status))
        .collect();
    let regs_by_student = group_by(included.iter().copied(), |r| r.student_no.clone());

    enrollments
        .iter()
        .map(|e| {
            let (outcome, gpa) = match e.status.as_str() {
                "Dropped Out" => (BoeOutcome::DroppedOut, None),
                "Withdrawn" => (BoeOutcome::Withdrawn, None),
                "Deferred" => (BoeOutcome::Deferred, None),
                _ => {
                    let gpa = semester_gpa(
                        regs_by_student
                            .get(&e.student_no)
                            .into_iter()
                            .flatten()
                            .filter_map(|r| {
                                r.grade.as_deref().map(|g| (g, r.credits))
                            }),
                    );
                    let outcome = if gpa >= PASS_GPA {
                        BoeOutcome::Passed
                    } else {
                        BoeOutcome::Failed
                    };
                    (outcome, Some(gpa))
                }
            };
            StudentBoeSummary {
                student_no: e.student_no.clone(),
                student_name: e.student_name.clone(),
                school_code: e.school_code.clone(),
                school_name: e.school_name.clone(),
                program_code: e.program_code.clone(),
                program_name: e.program_name.clone(),
                class_name: derive_class_name(&e.program_code, &e.semester_number),
                outcome,
                gpa,
            }
        })
        .collect()
}

fn boe_counts<'a, I>(members: I) -> BoeCounts
where
    I: IntoIterator<Item = &'a StudentBoeSummary>,
{
    let mut counts = BoeCounts::default();
    let mut gpa_sum = 0.0;
    let mut gpa_n = 0i64;
    for s in members {
        counts.total_students += 1;
        match s.outcome {
            BoeOutcome::Passed => counts.passed += 1,
            BoeOutcome::Failed => counts.failed += 1,
            BoeOutcome::DroppedOut => counts.dropped_out += 1,
            BoeOutcome::Withdrawn => counts.withdrawn += 1,
            BoeOutcome::Deferred => counts.deferred += 1,
        }
        if let Some(gpa) = s.gpa {
            gpa_sum += gpa;
            gpa_n += 1;
        }
    }
    counts.avg_gpa = if gpa_n > 0 {
        round2(gpa_sum / gpa_n as f64)
    } else {
        0.0
    };
    counts
}

pub fn boe_rollup(students: &[StudentBoeSummary]) -> BoeRollup {
    let mut schools = Vec::new();
    for (school_code, school_members) in group_by(students, |s| s.school_code.clone()) {
        let mut programs = Vec::new();
        for (program_code, program_members) in
            group_by(school_members.iter().copied(), |s| s.program_code.clone())
        {
            let mut classes = Vec::new();
            for (class_name, class_members) in
                group_by(program_members.iter().copied(), |s| s.class_name.clone())
            {
                classes.push(BoeStatsClassRow {
                    class_name,
                    counts: boe_counts(class_members.iter().copied()),
                });
            }
            programs.push(BoeStatsProgramRow {
                program_code,
                program_name: program_members[0].program_name.clone(),
                counts: boe_counts(program_members.iter().copied()),
                classes,
            });
        }
        schools.push(BoeStatsSchool {
            school_code,
            school_name: school_members[0].school_name.clone(),
            counts: boe_counts(school_members.iter().copied()),
            programs,
        });
    }

    let mut rankings: Vec<BoeStudentRanking> = students
        .iter()
        .filter_map(|s| {
            s.gpa.map(|gpa| BoeStudentRanking {
                student_no: s.student_no.clone(),
                student_name: s.student_name.clone(),
                program_code: s.program_code.clone(),
                class_name: s.class_name.clone(),
                gpa,
            })
        })
        .collect();
    rankings.sort_by(|a, b| {
        b.gpa
            .partial_cmp(&a.gpa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.student_no.cmp(&b.student_no))
    });

    BoeRollup {
        overview: boe_counts(students.iter()),
        schools,
        rankings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enrollment(
        student_no: &str,
        name: &str,
        school: &str,
        program: &str,
        semester: &str,
        status: &str,
    ) -> EnrollmentRow {
        EnrollmentRow {
            student_no: student_no.to_string(),
            student_name: name.to_string(),
            school_code: school.to_string(),
            school_name: format!("School of {}", school),
            program_code: program.to_string(),
            program_name: format!("{} Programme", program),
            semester_number: semester.to_string(),
            status: status.to_string(),
        }
    }

    fn mark(module: &str, student_no: &str, week: i64, status: &str) -> MarkRow {
        MarkRow {
            semester_module_id: module.to_string(),
            student_no: student_no.to_string(),
            week,
            status: status.to_string(),
        }
    }

    fn registration(
        module: &str,
        code: &str,
        credits: f64,
        student_no: &str,
        status: &str,
        grade: Option<&str>,
    ) -> RegistrationRow {
        RegistrationRow {
            semester_module_id: module.to_string(),
            module_code: code.to_string(),
            title: code.to_string(),
            credits,
            student_no: student_no.to_string(),
            status: status.to_string(),
            grade: grade.map(|g| g.to_string()),
        }
    }

    #[test]
    fn class_name_from_text_and_numeric_forms() {
        assert_eq!(derive_class_name("BSCS", "Year 2 Sem 1"), "BSCSY2S1");
        assert_eq!(derive_class_name("BSCS", "year 3 semester 2"), "BSCSY3S2");
        assert_eq!(derive_class_name("BSCS", "1"), "BSCSY1S1");
        assert_eq!(derive_class_name("BSCS", "2"), "BSCSY1S2");
        assert_eq!(derive_class_name("BSCS", "5"), "BSCSY3S1");
        assert_eq!(derive_class_name("BSCS", "6"), "BSCSY3S2");
    }

    #[test]
    fn class_name_degrades_on_malformed_input() {
        // Documented degrade: empty year/sem digits, never an error.
        assert_eq!(derive_class_name("BIT", "TBD"), "BITYS");
        assert_eq!(derive_class_name("BIT", ""), "BITYS");
        assert_eq!(derive_class_name("BIT", "Year ? Sem ?"), "BITYS");
        assert_eq!(derive_class_name("BIT", "0"), "BITYS");
    }

    #[test]
    fn rate_is_zero_without_marks_and_rounds_otherwise() {
        assert_eq!(attendance_rate(&StatusCounts::default()), 0);

        let mut c = StatusCounts::default();
        c.present = 2;
        c.late = 1;
        c.absent = 1;
        assert_eq!(attendance_rate(&c), 75);

        let mut c = StatusCounts::default();
        c.present = 1;
        c.absent = 2;
        assert_eq!(attendance_rate(&c), 33);

        // Excused marks count toward the denominator only.
        let mut c = StatusCounts::default();
        c.present = 1;
        c.excused = 1;
        assert_eq!(attendance_rate(&c), 50);
    }

    #[test]
    fn at_risk_requires_marked_weeks() {
        assert!(is_at_risk(74, 10));
        assert!(!is_at_risk(75, 10));
        assert!(!is_at_risk(0, 0));
    }

    #[test]
    fn gpa_round_trip_from_fixed_table() {
        // (credits=3, 'A') + (credits=3, 'F') => (4.0*3 + 0*3)/6 = 2.00
        assert_eq!(semester_gpa([("A", 3.0), ("F", 3.0)]), 2.0);
        assert_eq!(semester_gpa([("A-", 3.0)]), 3.7);
        assert_eq!(semester_gpa([]), 0.0);
        // Unknown grades are excluded, not counted as zero.
        assert_eq!(semester_gpa([("A", 3.0), ("??", 3.0)]), 4.0);
        assert_eq!(semester_gpa([("B+", 3.0), ("C", 2.0)]), round2((3.3 * 3.0 + 2.0 * 2.0) / 5.0));
    }

    #[test]
    fn rollup_sums_and_weighted_averages_hold() {
        let enrollments = vec![
            enrollment("S001", "Ali, Aisha", "ENG", "BSE", "1", "Active"),
            enrollment("S002", "Brown, Ben", "ENG", "BSE", "1", "Active"),
            enrollment("S003", "Chen, Cara", "ENG", "BSE", "3", "Active"),
            enrollment("S004", "Diaz, Dan", "BUS", "BBA", "2", "Active"),
        ];
        let marks = vec![
            // S001: 3 of 4 counted
            mark("m1", "S001", 1, "present"),
            mark("m1", "S001", 2, "present"),
            mark("m1", "S001", 3, "late"),
            mark("m1", "S001", 4, "absent"),
            // S002: 1 of 4
            mark("m1", "S002", 1, "absent"),
            mark("m1", "S002", 2, "absent"),
            mark("m1", "S002", 3, "present"),
            mark("m1", "S002", 4, "absent"),
            // S003: no marks at all
            // S004: perfect
            mark("m2", "S004", 1, "present"),
            mark("m2", "S004", 2, "present"),
        ];

        let students = summarize_students(&enrollments, &counts_by_student(&marks));
        let rollup = attendance_rollup(&students);

        // Level sums.
        for school in &rollup.schools {
            assert_eq!(
                school.total_students,
                school.programs.iter().map(|p| p.total_students).sum::<i64>()
            );
            assert_eq!(
                school.at_risk_count,
                school.programs.iter().map(|p| p.at_risk_count).sum::<i64>()
            );
            for program in &school.programs {
                assert_eq!(
                    program.total_students,
                    program.classes.iter().map(|c| c.total_students).sum::<i64>()
                );
            }
        }

        // Schools sorted by code: BUS before ENG.
        assert_eq!(rollup.schools[0].school_code, "BUS");
        assert_eq!(rollup.schools[1].school_code, "ENG");

        let eng = &rollup.schools[1];
        let bse = &eng.programs[0];
        assert_eq!(bse.program_code, "BSE");
        // Classes sorted by name: Y1S1 before Y2S1.
        assert_eq!(bse.classes[0].class_name, "BSEY1S1");
        assert_eq!(bse.classes[1].class_name, "BSEY2S1");
        // Y1S1: rates 75 and 25 => avg 50, one at risk.
        assert_eq!(bse.classes[0].avg_attendance_rate, 50);
        assert_eq!(bse.classes[0].at_risk_count, 1);
        // Y2S1: unmarked student => avg 0, zero at risk.
        assert_eq!(bse.classes[1].avg_attendance_rate, 0);
        assert_eq!(bse.classes[1].at_risk_count, 0);
        // Program: round((50*2 + 0*1)/3) = 33.
        assert_eq!(bse.avg_attendance_rate, 33);
        assert_eq!(eng.avg_attendance_rate, 33);

        // Overview: round((33*3 + 100*1)/4) = 50.
        assert_eq!(rollup.overview.total_students, 4);
        assert_eq!(rollup.overview.avg_attendance_rate, 50);
        assert_eq!(rollup.overview.total_at_risk, 1);
        assert_eq!(rollup.overview.at_risk_percentage, 25);

        // At-risk list ascending by rate.
        assert_eq!(rollup.at_risk_students.len(), 1);
        assert_eq!(rollup.at_risk_students[0].student_no, "S002");
    }

    #[test]
    fn lone_unmarked_student_yields_zeroes_not_risk() {
        let enrollments = vec![enrollment("S001", "Ali, Aisha", "ENG", "BSE", "1", "Active")];
        let students = summarize_students(&enrollments, &HashMap::new());
        let rollup = attendance_rollup(&students);
        assert_eq!(rollup.overview.total_students, 1);
        assert_eq!(rollup.overview.avg_attendance_rate, 0);
        assert_eq!(rollup.overview.total_at_risk, 0);
        assert_eq!(rollup.overview.at_risk_percentage, 0);
        assert!(rollup.at_risk_students.is_empty());
    }

    #[test]
    fn empty_input_rolls_up_to_zeroed_overview() {
        let rollup = attendance_rollup(&[]);
        assert_eq!(rollup.overview.total_students, 0);
        assert_eq!(rollup.overview.avg_attendance_rate, 0);
        assert!(rollup.schools.is_empty());
        assert!(rollup.at_risk_students.is_empty());
    }

    #[test]
    fn module_breakdown_excludes_dropped_and_sorts_ascending() {
        let regs = vec![
            registration("m1", "CS101", 3.0, "S001", "Confirmed", None),
            registration("m1", "CS101", 3.0, "S002", "Drop", None),
            registration("m2", "CS202", 3.0, "S001", "Confirmed", None),
            registration("m3", "CS303", 3.0, "S001", "Delete", None),
        ];
        let marks = vec![
            mark("m1", "S001", 1, "absent"),
            mark("m1", "S002", 1, "present"),
            mark("m2", "S001", 1, "present"),
        ];
        let breakdown = module_breakdown(&regs, &marks);

        // m3 has no non-dropped members; m1's dropped member is not counted.
        assert_eq!(breakdown.len(), 2);
        assert_eq!(breakdown[0].module_code, "CS101");
        assert_eq!(breakdown[0].total_students, 1);
        assert_eq!(breakdown[0].avg_attendance_rate, 0);
        assert_eq!(breakdown[0].at_risk_count, 1);
        assert_eq!(breakdown[1].module_code, "CS202");
        assert_eq!(breakdown[1].avg_attendance_rate, 100);
    }

    #[test]
    fn module_breakdown_order_property_on_synthetic_data() {
        // Deterministic LCG so the scenario is reproducible.
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        let mut next = move || {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (seed >> 33) as i64
        };

        let mut regs = Vec::new();
        let mut marks = Vec::new();
        for m in 0..12 {
            let module = format!("m{:02}", m);
            let code = format!("MOD{:02}", m);
            for s in 0..8 {
                let student = format!("S{:03}", s);
                regs.push(registration(&module, &code, 3.0, &student, "Confirmed", None));
                for week in 1..=6 {
                    let status = match next() % 4 {
                        0 => "present",
                        1 => "absent",
                        2 => "late",
                        _ => "excused",
                    };
                    marks.push(mark(&module, &student, week, status));
                }
            }
        }

        let breakdown = module_breakdown(&regs, &marks);
        assert_eq!(breakdown.len(), 12);
        for pair in breakdown.windows(2) {
            assert!(
                pair[0].avg_attendance_rate <= pair[1].avg_attendance_rate,
                "breakdown must be ascending by avg rate: {} then {}",
                pair[0].avg_attendance_rate,
                pair[1].avg_attendance_rate
            );
        }
    }

    #[test]
    fn details_overall_rate_combines_marks_not_module_rates() {
        let enrollments = vec![enrollment("S001", "Ali, Aisha", "ENG", "BSE", "1", "Active")];
        let regs = vec![
            registration("m1", "CS101", 3.0, "S001", "Confirmed", None),
            registration("m2", "CS202", 3.0, "S001", "Confirmed", None),
        ];
        let marks = vec![
            mark("m1", "S001", 1, "present"),
            mark("m2", "S001", 1, "present"),
            mark("m2", "S001", 2, "absent"),
            mark("m2", "S001", 3, "absent"),
        ];
        let page = student_details(&enrollments, &regs, &marks, None, 1, 50);
        assert_eq!(page.total, 1);
        let row = &page.rows[0];
        assert_eq!(row.modules.len(), 2);
        assert_eq!(row.modules[0].attendance_rate, 100);
        assert_eq!(row.modules[1].attendance_rate, 33);
        // 2 of 4 marks, not the 67 an average of per-module rates would give.
        assert_eq!(row.overall_attendance_rate, 50);
    }

    #[test]
    fn details_search_and_pagination() {
        let enrollments = vec![
            enrollment("S001", "Ali, Aisha", "ENG", "BSE", "1", "Active"),
            enrollment("S002", "Brown, Ben", "ENG", "BSE", "1", "Active"),
            enrollment("S003", "Chen, Cara", "ENG", "BIT", "1", "Active"),
        ];
        let all = student_details(&enrollments, &[], &[], None, 1, 2);
        assert_eq!(all.total, 3);
        assert_eq!(all.rows.len(), 2);
        assert_eq!(all.rows[0].student_no, "S001");

        let second = student_details(&enrollments, &[], &[], None, 2, 2);
        assert_eq!(second.rows.len(), 1);
        assert_eq!(second.rows[0].student_no, "S003");

        let by_program = student_details(&enrollments, &[], &[], Some("bit"), 1, 50);
        assert_eq!(by_program.total, 1);
        assert_eq!(by_program.rows[0].student_no, "S003");

        let by_name = student_details(&enrollments, &[], &[], Some("brown"), 1, 50);
        assert_eq!(by_name.total, 1);
        assert_eq!(by_name.rows[0].student_no, "S002");

        let past_end = student_details(&enrollments, &[], &[], None, 9, 2);
        assert_eq!(past_end.total, 3);
        assert!(past_end.rows.is_empty());
    }

    #[test]
    fn boe_classification_covers_every_outcome() {
        let enrollments = vec![
            enrollment("S001", "Ali, Aisha", "ENG", "BSE", "1", "Active"),
            enrollment("S002", "Brown, Ben", "ENG", "BSE", "1", "Active"),
            enrollment("S003", "Chen, Cara", "ENG", "BSE", "1", "Dropped Out"),
            enrollment("S004", "Diaz, Dan", "ENG", "BSE", "1", "Withdrawn"),
            enrollment("S005", "Evans, Eve", "ENG", "BSE", "1", "Deferred"),
        ];
        let regs = vec![
            registration("m1", "CS101", 3.0, "S001", "Confirmed", Some("A")),
            registration("m2", "CS202", 3.0, "S001", "Confirmed", Some("F")),
            registration("m1", "CS101", 3.0, "S002", "Confirmed", Some("D")),
            // Dropped module grade must not pull S001 under the bar.
            registration("m3", "CS303", 3.0, "S001", "Drop", Some("F")),
            // Inactive statuses never reach GPA computation.
            registration("m1", "CS101", 3.0, "S003", "Confirmed", Some("A+")),
        ];

        let summaries = summarize_boe(&enrollments, &regs);
        let by_no: HashMap<&str, &StudentBoeSummary> =
            summaries.iter().map(|s| (s.student_no.as_str(), s)).collect();

        assert_eq!(by_no["S001"].outcome, BoeOutcome::Passed);
        assert_eq!(by_no["S001"].gpa, Some(2.0));
        assert_eq!(by_no["S002"].outcome, BoeOutcome::Failed);
        assert_eq!(by_no["S002"].gpa, Some(1.0));
        assert_eq!(by_no["S003"].outcome, BoeOutcome::DroppedOut);
        assert_eq!(by_no["S003"].gpa, None);
        assert_eq!(by_no["S004"].outcome, BoeOutcome::Withdrawn);
        assert_eq!(by_no["S005"].outcome, BoeOutcome::Deferred);

        let rollup = boe_rollup(&summaries);
        assert_eq!(rollup.overview.total_students, 5);
        assert_eq!(rollup.overview.passed, 1);
        assert_eq!(rollup.overview.failed, 1);
        assert_eq!(rollup.overview.dropped_out, 1);
        assert_eq!(rollup.overview.withdrawn, 1);
        assert_eq!(rollup.overview.deferred, 1);
        assert_eq!(rollup.overview.avg_gpa, 1.5);

        // Rankings: GPA-bearing students only, descending.
        assert_eq!(rollup.rankings.len(), 2);
        assert_eq!(rollup.rankings[0].student_no, "S001");
        assert_eq!(rollup.rankings[1].student_no, "S002");
    }

    #[test]
    fn quiz_letter_scale_boundaries() {
        assert_eq!(quiz_letter_grade(90.0), "A+");
        assert_eq!(quiz_letter_grade(89.9), "A");
        assert_eq!(quiz_letter_grade(70.0), "B");
        assert_eq!(quiz_letter_grade(55.0), "C");
        assert_eq!(quiz_letter_grade(39.9), "F");
    }

    #[test]
    fn report_filters_parse_and_validate() {
        let parsed = parse_report_filters(Some(&serde_json::json!({
            "termId": " t1 ",
            "schoolIds": ["sc1", " ", "sc2"],
            "programId": null,
            "semesterNumber": "Year 1 Sem 2",
            "week": 3
        })))
        .expect("parse filters");
        assert_eq!(parsed.term_id.as_deref(), Some("t1"));
        assert_eq!(parsed.school_ids.as_deref(), Some(&["sc1".to_string(), "sc2".to_string()][..]));
        assert_eq!(parsed.program_id, None);
        assert_eq!(parsed.week, Some(3));

        let empty = parse_report_filters(Some(&serde_json::json!({ "termId": "" })))
            .expect("parse empty term");
        assert_eq!(empty.term_id, None);

        assert!(parse_report_filters(Some(&serde_json::json!({ "week": 0 }))).is_err());
        assert!(parse_report_filters(Some(&serde_json::json!({ "termId": 7 }))).is_err());
    }
}
