use crate::db;
use crate::grading::{self, Components};
use crate::ipc::error::{db_query, db_tx, db_write, HandlerError};
use crate::ipc::helpers::{conn, opt_str, req_str, score_field, str_field};
use crate::ipc::types::{AppState, Request};
use crate::roles::{Role, Session};
use crate::scoping::{self, AssignmentKey};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{info, warn};
use uuid::Uuid;

const UPSERT_MAX_ROWS: usize = 2000;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkRow {
    pub id: String,
    pub student_id: String,
    pub student_name: String,
    pub subject_id: String,
    pub subject_name: String,
    pub semester_id: String,
    pub semester_name: String,
    pub ca1: Option<f64>,
    pub ca2: Option<f64>,
    pub mid_term: Option<f64>,
    pub end_term: Option<f64>,
    pub total: Option<f64>,
    pub grade: Option<String>,
    pub teacher_id: Option<String>,
    pub last_updated: String,
}

/// Reads mark rows with display names joined from current reference data;
/// the stored snapshot and then an "Unknown" placeholder fill any gap.
const MARK_SELECT: &str = "SELECT m.id,
        m.student_id,
        COALESCE(u.name, NULLIF(m.student_name, ''), 'Unknown Student') AS stu_name,
        m.subject_id,
        COALESCE(s.name, NULLIF(m.subject_name, ''), 'Unknown Subject') AS sub_name,
        m.semester_id,
        COALESCE(sm.name, NULLIF(m.semester_name, ''), 'Unknown Semester') AS sem_name,
        m.ca1, m.ca2, m.mid_term, m.end_term, m.total, m.grade,
        m.teacher_id, m.last_updated
    FROM marks m
    LEFT JOIN users u ON u.id = m.student_id
    LEFT JOIN subjects s ON s.id = m.subject_id
    LEFT JOIN semesters sm ON sm.id = m.semester_id";

fn map_mark(r: &rusqlite::Row<'_>) -> rusqlite::Result<MarkRow> {
    Ok(MarkRow {
        id: r.get(0)?,
        student_id: r.get(1)?,
        student_name: r.get(2)?,
        subject_id: r.get(3)?,
        subject_name: r.get(4)?,
        semester_id: r.get(5)?,
        semester_name: r.get(6)?,
        ca1: r.get(7)?,
        ca2: r.get(8)?,
        mid_term: r.get(9)?,
        end_term: r.get(10)?,
        total: r.get(11)?,
        grade: r.get(12)?,
        teacher_id: r.get(13)?,
        last_updated: r.get(14)?,
    })
}

#[derive(Debug, Default)]
pub struct MarkFilter {
    pub student_id: Option<String>,
    pub subject_id: Option<String>,
    pub semester_id: Option<String>,
}

pub fn query_marks(conn: &Connection, filter: &MarkFilter) -> Result<Vec<MarkRow>, HandlerError> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut bind: Vec<SqlValue> = Vec::new();
    if let Some(v) = &filter.student_id {
        clauses.push("m.student_id = ?");
        bind.push(SqlValue::Text(v.clone()));
    }
    if let Some(v) = &filter.subject_id {
        clauses.push("m.subject_id = ?");
        bind.push(SqlValue::Text(v.clone()));
    }
    if let Some(v) = &filter.semester_id {
        clauses.push("m.semester_id = ?");
        bind.push(SqlValue::Text(v.clone()));
    }

    let mut sql = String::from(MARK_SELECT);
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY sm.year DESC, sem_name, sub_name COLLATE NOCASE, stu_name COLLATE NOCASE");

    let mut stmt = conn.prepare(&sql).map_err(db_query)?;
    let marks = stmt
        .query_map(params_from_iter(bind), map_mark)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query)?;
    Ok(marks)
}

fn require_assigned(
    conn: &Connection,
    session: &Session,
    subject_id: &str,
    semester_id: &str,
) -> Result<(), HandlerError> {
    if session.role != Role::Teacher {
        return Ok(());
    }
    let keys = db::load_assignment_keys(conn, Some(&session.user_id)).map_err(db_query)?;
    if !scoping::is_assigned(&session.user_id, subject_id, semester_id, &keys) {
        return Err(HandlerError::forbidden(
            "not assigned to this subject and semester",
        ));
    }
    Ok(())
}

/// Every student with their mark row (or an empty one) for one
/// subject/semester pair.
fn marks_sheet(state: &AppState, session: &Session, req: &Request) -> Result<Value, HandlerError> {
    let conn = conn(&state.db)?;
    let subject_id = req_str(req, "subjectId")?;
    let semester_id = req_str(req, "semesterId")?;
    require_assigned(conn, session, &subject_id, &semester_id)?;

    let subject_name = db::subject_name(conn, &subject_id)
        .map_err(db_query)?
        .ok_or(HandlerError::NotFound("subject"))?;
    let semester_name = db::semester_name(conn, &semester_id)
        .map_err(db_query)?
        .ok_or(HandlerError::NotFound("semester"))?;

    let existing: HashMap<String, MarkRow> = query_marks(
        conn,
        &MarkFilter {
            student_id: None,
            subject_id: Some(subject_id.clone()),
            semester_id: Some(semester_id.clone()),
        },
    )?
    .into_iter()
    .map(|m| (m.student_id.clone(), m))
    .collect();

    let mut stmt = conn
        .prepare(
            "SELECT id, name, prn FROM users WHERE role = 'student' ORDER BY name COLLATE NOCASE",
        )
        .map_err(db_query)?;
    let students = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, Option<String>>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query)?;

    let rows: Vec<Value> = students
        .into_iter()
        .map(|(student_id, name, prn)| {
            let m = existing.get(&student_id);
            json!({
                "markId": m.map(|m| m.id.clone()),
                "studentId": student_id,
                "studentName": name,
                "prn": prn,
                "ca1": m.and_then(|m| m.ca1),
                "ca2": m.and_then(|m| m.ca2),
                "midTerm": m.and_then(|m| m.mid_term),
                "endTerm": m.and_then(|m| m.end_term),
                "total": m.and_then(|m| m.total),
                "grade": m.and_then(|m| m.grade.clone()),
                "lastUpdated": m.map(|m| m.last_updated.clone()),
            })
        })
        .collect();

    Ok(json!({
        "subjectId": subject_id,
        "subjectName": subject_name,
        "semesterId": semester_id,
        "semesterName": semester_name,
        "rows": rows
    }))
}

#[derive(Debug)]
struct UpsertRow {
    index: usize,
    mark_id: Option<String>,
    student_id: String,
    subject_id: String,
    semester_id: String,
    student_name: String,
    subject_name: String,
    semester_name: String,
    components: Components,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SkippedRow {
    index: usize,
    reason: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

/// Lookup caches for one batch so repeated ids hit the store once.
struct BatchRefs<'a> {
    conn: &'a Connection,
    students: HashMap<String, Option<String>>,
    subjects: HashMap<String, Option<String>>,
    semesters: HashMap<String, Option<String>>,
}

impl<'a> BatchRefs<'a> {
    fn new(conn: &'a Connection) -> Self {
        Self {
            conn,
            students: HashMap::new(),
            subjects: HashMap::new(),
            semesters: HashMap::new(),
        }
    }

    fn student(&mut self, id: &str) -> Result<Option<String>, HandlerError> {
        if let Some(v) = self.students.get(id) {
            return Ok(v.clone());
        }
        let name = db::user_name_role(self.conn, id)
            .map_err(db_query)?
            .filter(|(_, role)| role == Role::Student.as_str())
            .map(|(name, _)| name);
        self.students.insert(id.to_string(), name.clone());
        Ok(name)
    }

    fn subject(&mut self, id: &str) -> Result<Option<String>, HandlerError> {
        if let Some(v) = self.subjects.get(id) {
            return Ok(v.clone());
        }
        let name = db::subject_name(self.conn, id).map_err(db_query)?;
        self.subjects.insert(id.to_string(), name.clone());
        Ok(name)
    }

    fn semester(&mut self, id: &str) -> Result<Option<String>, HandlerError> {
        if let Some(v) = self.semesters.get(id) {
            return Ok(v.clone());
        }
        let name = db::semester_name(self.conn, id).map_err(db_query)?;
        self.semesters.insert(id.to_string(), name.clone());
        Ok(name)
    }
}

fn skip(skipped: &mut Vec<SkippedRow>, index: usize, reason: &'static str, message: Option<String>) {
    warn!(index, reason, message = message.as_deref().unwrap_or(""), "skipping mark row");
    skipped.push(SkippedRow {
        index,
        reason,
        message,
    });
}

/// Validates one raw row. `Ok(None)` means it was recorded as skipped.
fn prepare_row(
    refs: &mut BatchRefs<'_>,
    session: &Session,
    assignments: &[AssignmentKey],
    index: usize,
    raw: &Value,
    skipped: &mut Vec<SkippedRow>,
) -> Result<Option<UpsertRow>, HandlerError> {
    let (Some(student_id), Some(subject_id), Some(semester_id)) = (
        str_field(raw, "studentId"),
        str_field(raw, "subjectId"),
        str_field(raw, "semesterId"),
    ) else {
        skip(skipped, index, "missing_ids", None);
        return Ok(None);
    };

    let mut components = Components::default();
    for (key, slot) in [
        ("ca1", &mut components.ca1),
        ("ca2", &mut components.ca2),
        ("midTerm", &mut components.mid_term),
        ("endTerm", &mut components.end_term),
    ] {
        match score_field(raw, key) {
            Ok(v) => *slot = v,
            Err(message) => {
                skip(skipped, index, "bad_value", Some(message));
                return Ok(None);
            }
        }
    }
    if let Err(e) = components.validate() {
        skip(
            skipped,
            index,
            "out_of_range",
            Some(format!("{} must be between 0 and {} (got {})", e.component, e.max, e.value)),
        );
        return Ok(None);
    }

    if session.role == Role::Teacher
        && !scoping::is_assigned(&session.user_id, subject_id, semester_id, assignments)
    {
        skip(skipped, index, "not_assigned", None);
        return Ok(None);
    }

    let (Some(student_name), Some(subject_name), Some(semester_name)) = (
        refs.student(student_id)?,
        refs.subject(subject_id)?,
        refs.semester(semester_id)?,
    ) else {
        skip(skipped, index, "unknown_reference", None);
        return Ok(None);
    };

    Ok(Some(UpsertRow {
        index,
        mark_id: str_field(raw, "id")
            .or_else(|| str_field(raw, "markId"))
            .map(str::to_string),
        student_id: student_id.to_string(),
        subject_id: subject_id.to_string(),
        semester_id: semester_id.to_string(),
        student_name,
        subject_name,
        semester_name,
        components,
    }))
}

fn marks_upsert(state: &AppState, session: &Session, req: &Request) -> Result<Value, HandlerError> {
    let conn = conn(&state.db)?;
    let Some(rows) = req.params.get("rows").and_then(|v| v.as_array()) else {
        return Err(HandlerError::bad_params("missing rows"));
    };
    if rows.len() > UPSERT_MAX_ROWS {
        return Err(HandlerError::bad_params(format!(
            "too many rows in one batch (max {UPSERT_MAX_ROWS})"
        )));
    }

    let assignments = match session.role {
        Role::Teacher => db::load_assignment_keys(conn, Some(&session.user_id)).map_err(db_query)?,
        _ => Vec::new(),
    };

    let mut skipped: Vec<SkippedRow> = Vec::new();
    let mut accepted: Vec<UpsertRow> = Vec::new();
    let mut refs = BatchRefs::new(conn);
    for (index, raw) in rows.iter().enumerate() {
        if let Some(row) = prepare_row(&mut refs, session, &assignments, index, raw, &mut skipped)? {
            accepted.push(row);
        }
    }

    let now = db::now_rfc3339();
    let mut created = 0usize;
    let mut updated = 0usize;

    // One Save is one transaction: readers see all of it or none of it.
    let tx = conn.unchecked_transaction().map_err(db_tx)?;
    for row in &accepted {
        let total = row.components.total();
        let grade = row.components.grade().map(|g| g.as_str());

        let target_id: Option<String> = match &row.mark_id {
            Some(id) => tx
                .query_row(
                    "SELECT id FROM marks
                     WHERE id = ? AND student_id = ? AND subject_id = ? AND semester_id = ?",
                    (id, &row.student_id, &row.subject_id, &row.semester_id),
                    |r| r.get(0),
                )
                .optional()
                .map_err(db_query)?,
            None => tx
                .query_row(
                    "SELECT id FROM marks
                     WHERE student_id = ? AND subject_id = ? AND semester_id = ?",
                    (&row.student_id, &row.subject_id, &row.semester_id),
                    |r| r.get(0),
                )
                .optional()
                .map_err(db_query)?,
        };

        match target_id {
            Some(id) => {
                tx.execute(
                    "UPDATE marks SET
                       ca1 = ?, ca2 = ?, mid_term = ?, end_term = ?,
                       total = ?, grade = ?, teacher_id = ?, last_updated = ?,
                       student_name = ?, subject_name = ?, semester_name = ?
                     WHERE id = ?",
                    (
                        row.components.ca1,
                        row.components.ca2,
                        row.components.mid_term,
                        row.components.end_term,
                        total,
                        grade,
                        &session.user_id,
                        &now,
                        &row.student_name,
                        &row.subject_name,
                        &row.semester_name,
                        &id,
                    ),
                )
                .map_err(db_write)?;
                updated += 1;
            }
            None if row.mark_id.is_some() => {
                skip(&mut skipped, row.index, "not_found", None);
            }
            None => {
                tx.execute(
                    "INSERT INTO marks(
                       id, student_id, subject_id, semester_id,
                       ca1, ca2, mid_term, end_term, total, grade,
                       teacher_id, last_updated,
                       student_name, subject_name, semester_name)
                     VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    (
                        Uuid::new_v4().to_string(),
                        &row.student_id,
                        &row.subject_id,
                        &row.semester_id,
                        row.components.ca1,
                        row.components.ca2,
                        row.components.mid_term,
                        row.components.end_term,
                        total,
                        grade,
                        &session.user_id,
                        &now,
                        &row.student_name,
                        &row.subject_name,
                        &row.semester_name,
                    ),
                )
                .map_err(db_write)?;
                created += 1;
            }
        }
    }
    tx.commit().map_err(db_tx)?;

    skipped.sort_by_key(|s| s.index);
    info!(
        editor = %session.user_id,
        created,
        updated,
        skipped = skipped.len(),
        "mark batch saved"
    );
    Ok(json!({
        "saved": created + updated,
        "created": created,
        "updated": updated,
        "skipped": skipped,
        "lastUpdated": now
    }))
}

fn marks_list(state: &AppState, session: &Session, req: &Request) -> Result<Value, HandlerError> {
    let conn = conn(&state.db)?;
    let filter = MarkFilter {
        student_id: session.resolve_student_id(opt_str(req, "studentId").as_deref()),
        subject_id: opt_str(req, "subjectId"),
        semester_id: opt_str(req, "semesterId"),
    };

    if session.role == Role::Teacher {
        let (Some(subject_id), Some(semester_id)) = (&filter.subject_id, &filter.semester_id) else {
            return Err(HandlerError::bad_params(
                "teachers must name subjectId and semesterId",
            ));
        };
        require_assigned(conn, session, subject_id, semester_id)?;
    }

    let marks = query_marks(conn, &filter)?;
    Ok(json!({ "marks": marks }))
}

fn marks_delete(state: &AppState, req: &Request) -> Result<Value, HandlerError> {
    let conn = conn(&state.db)?;
    let mark_id = req_str(req, "markId")?;
    let n = conn
        .execute("DELETE FROM marks WHERE id = ?", [&mark_id])
        .map_err(db_write)?;
    if n == 0 {
        return Err(HandlerError::NotFound("mark"));
    }
    info!(mark_id = %mark_id, "mark deleted");
    Ok(json!({ "deleted": true }))
}

fn marks_summary(state: &AppState, session: &Session, req: &Request) -> Result<Value, HandlerError> {
    let conn = conn(&state.db)?;
    let semester_id = req_str(req, "semesterId")?;
    let student_id = session
        .resolve_student_id(opt_str(req, "studentId").as_deref())
        .ok_or_else(|| HandlerError::bad_params("missing studentId"))?;

    let marks = query_marks(
        conn,
        &MarkFilter {
            student_id: Some(student_id.clone()),
            subject_id: None,
            semester_id: Some(semester_id.clone()),
        },
    )?;
    let summary = grading::summarize(marks.iter().map(|m| m.total));

    Ok(json!({
        "studentId": student_id,
        "semesterId": semester_id,
        "summary": summary,
        "marks": marks
    }))
}

pub fn try_handle(
    state: &mut AppState,
    session: &Session,
    req: &Request,
) -> Option<Result<Value, HandlerError>> {
    match req.method.as_str() {
        "marks.sheet" => Some(marks_sheet(state, session, req)),
        "marks.upsert" => Some(marks_upsert(state, session, req)),
        "marks.list" => Some(marks_list(state, session, req)),
        "marks.delete" => Some(marks_delete(state, req)),
        "marks.summary" => Some(marks_summary(state, session, req)),
        _ => None,
    }
}
