use crate::ipc::error::{db_query, db_write, HandlerError};
use crate::ipc::helpers::{conn, opt_date, patch_obj, req_str, str_field};
use crate::ipc::types::{AppState, Request};
use crate::roles::Session;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: String,
    pub name: String,
    pub code: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Semester {
    pub id: String,
    pub name: String,
    pub year: i64,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

pub fn map_subject(r: &rusqlite::Row<'_>) -> rusqlite::Result<Subject> {
    Ok(Subject {
        id: r.get(0)?,
        name: r.get(1)?,
        code: r.get(2)?,
    })
}

pub fn map_semester(r: &rusqlite::Row<'_>) -> rusqlite::Result<Semester> {
    Ok(Semester {
        id: r.get(0)?,
        name: r.get(1)?,
        year: r.get(2)?,
        start_date: r.get(3)?,
        end_date: r.get(4)?,
    })
}

/// Counts the rows that still point at a subject or semester.
fn reference_counts(
    conn: &Connection,
    column: &str,
    id: &str,
) -> Result<(i64, i64), HandlerError> {
    let marks: i64 = conn
        .query_row(
            &format!("SELECT COUNT(*) FROM marks WHERE {column} = ?"),
            [id],
            |r| r.get(0),
        )
        .map_err(db_query)?;
    let assignments: i64 = conn
        .query_row(
            &format!("SELECT COUNT(*) FROM teacher_assignments WHERE {column} = ?"),
            [id],
            |r| r.get(0),
        )
        .map_err(db_query)?;
    Ok((marks, assignments))
}

fn subjects_list(state: &AppState) -> Result<Value, HandlerError> {
    let conn = conn(&state.db)?;
    let mut stmt = conn
        .prepare("SELECT id, name, code FROM subjects ORDER BY name COLLATE NOCASE")
        .map_err(db_query)?;
    let subjects = stmt
        .query_map([], map_subject)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query)?;
    Ok(json!({ "subjects": subjects }))
}

fn subjects_create(state: &AppState, req: &Request) -> Result<Value, HandlerError> {
    let conn = conn(&state.db)?;
    let name = req_str(req, "name")?;
    let code = req_str(req, "code")?;

    let subject_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO subjects(id, name, code) VALUES(?, ?, ?)",
        (&subject_id, &name, &code),
    )
    .map_err(db_write)?;
    info!(subject_id = %subject_id, code = %code, "subject created");

    Ok(json!({ "subjectId": subject_id }))
}

fn subjects_update(state: &AppState, req: &Request) -> Result<Value, HandlerError> {
    let conn = conn(&state.db)?;
    let subject_id = req_str(req, "subjectId")?;
    let patch = Value::Object(patch_obj(req)?.clone());

    let current = conn
        .query_row(
            "SELECT id, name, code FROM subjects WHERE id = ?",
            [&subject_id],
            map_subject,
        )
        .optional()
        .map_err(db_query)?
        .ok_or(HandlerError::NotFound("subject"))?;

    let name = str_field(&patch, "name").map(str::to_string).unwrap_or(current.name);
    let code = str_field(&patch, "code").map(str::to_string).unwrap_or(current.code);
    conn.execute(
        "UPDATE subjects SET name = ?, code = ? WHERE id = ?",
        (&name, &code, &subject_id),
    )
    .map_err(db_write)?;

    Ok(json!({ "ok": true }))
}

fn subjects_delete(state: &AppState, req: &Request) -> Result<Value, HandlerError> {
    let conn = conn(&state.db)?;
    let subject_id = req_str(req, "subjectId")?;

    let (marks, assignments) = reference_counts(conn, "subject_id", &subject_id)?;
    if marks > 0 || assignments > 0 {
        return Err(HandlerError::Conflict(format!(
            "subject is still referenced by {marks} marks and {assignments} assignments"
        )));
    }
    let n = conn
        .execute("DELETE FROM subjects WHERE id = ?", [&subject_id])
        .map_err(db_write)?;
    if n == 0 {
        return Err(HandlerError::NotFound("subject"));
    }
    Ok(json!({ "deleted": true }))
}

fn semesters_list(state: &AppState) -> Result<Value, HandlerError> {
    let conn = conn(&state.db)?;
    let mut stmt = conn
        .prepare(
            "SELECT id, name, year, start_date, end_date
             FROM semesters
             ORDER BY year DESC, name COLLATE NOCASE",
        )
        .map_err(db_query)?;
    let semesters = stmt
        .query_map([], map_semester)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query)?;
    Ok(json!({ "semesters": semesters }))
}

fn year_field(obj: &Value) -> Result<Option<i64>, HandlerError> {
    match obj.get("year") {
        None | Some(Value::Null) => Ok(None),
        Some(v) => {
            let year = v
                .as_i64()
                .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
                .ok_or_else(|| HandlerError::bad_params("year must be an integer"))?;
            if !(1900..=2200).contains(&year) {
                return Err(HandlerError::bad_params("year out of range"));
            }
            Ok(Some(year))
        }
    }
}

fn check_date_order(start: &Option<String>, end: &Option<String>) -> Result<(), HandlerError> {
    if let (Some(s), Some(e)) = (start, end) {
        // ISO dates compare correctly as strings.
        if s > e {
            return Err(HandlerError::bad_params("startDate must not be after endDate"));
        }
    }
    Ok(())
}

fn semesters_create(state: &AppState, req: &Request) -> Result<Value, HandlerError> {
    let conn = conn(&state.db)?;
    let name = req_str(req, "name")?;
    let year = year_field(&req.params)?.ok_or_else(|| HandlerError::bad_params("missing year"))?;
    let start_date = opt_date(&req.params, "startDate")?;
    let end_date = opt_date(&req.params, "endDate")?;
    check_date_order(&start_date, &end_date)?;

    let semester_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO semesters(id, name, year, start_date, end_date) VALUES(?, ?, ?, ?, ?)",
        (&semester_id, &name, year, &start_date, &end_date),
    )
    .map_err(db_write)?;
    info!(semester_id = %semester_id, year, "semester created");

    Ok(json!({ "semesterId": semester_id }))
}

fn semesters_update(state: &AppState, req: &Request) -> Result<Value, HandlerError> {
    let conn = conn(&state.db)?;
    let semester_id = req_str(req, "semesterId")?;
    let patch_map = patch_obj(req)?;
    let patch = Value::Object(patch_map.clone());

    let current = conn
        .query_row(
            "SELECT id, name, year, start_date, end_date FROM semesters WHERE id = ?",
            [&semester_id],
            map_semester,
        )
        .optional()
        .map_err(db_query)?
        .ok_or(HandlerError::NotFound("semester"))?;

    let name = str_field(&patch, "name").map(str::to_string).unwrap_or(current.name);
    let year = year_field(&patch)?.unwrap_or(current.year);
    let start_date = match patch_map.get("startDate") {
        Some(Value::Null) => None,
        Some(_) => opt_date(&patch, "startDate")?,
        None => current.start_date,
    };
    let end_date = match patch_map.get("endDate") {
        Some(Value::Null) => None,
        Some(_) => opt_date(&patch, "endDate")?,
        None => current.end_date,
    };
    check_date_order(&start_date, &end_date)?;

    conn.execute(
        "UPDATE semesters SET name = ?, year = ?, start_date = ?, end_date = ? WHERE id = ?",
        (&name, year, &start_date, &end_date, &semester_id),
    )
    .map_err(db_write)?;

    Ok(json!({ "ok": true }))
}

fn semesters_delete(state: &AppState, req: &Request) -> Result<Value, HandlerError> {
    let conn = conn(&state.db)?;
    let semester_id = req_str(req, "semesterId")?;

    let (marks, assignments) = reference_counts(conn, "semester_id", &semester_id)?;
    if marks > 0 || assignments > 0 {
        return Err(HandlerError::Conflict(format!(
            "semester is still referenced by {marks} marks and {assignments} assignments"
        )));
    }
    let n = conn
        .execute("DELETE FROM semesters WHERE id = ?", [&semester_id])
        .map_err(db_write)?;
    if n == 0 {
        return Err(HandlerError::NotFound("semester"));
    }
    Ok(json!({ "deleted": true }))
}

pub fn try_handle(
    state: &mut AppState,
    _session: &Session,
    req: &Request,
) -> Option<Result<Value, HandlerError>> {
    match req.method.as_str() {
        "subjects.list" => Some(subjects_list(state)),
        "subjects.create" => Some(subjects_create(state, req)),
        "subjects.update" => Some(subjects_update(state, req)),
        "subjects.delete" => Some(subjects_delete(state, req)),
        "semesters.list" => Some(semesters_list(state)),
        "semesters.create" => Some(semesters_create(state, req)),
        "semesters.update" => Some(semesters_update(state, req)),
        "semesters.delete" => Some(semesters_delete(state, req)),
        _ => None,
    }
}
