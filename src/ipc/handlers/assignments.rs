use crate::db;
use crate::ipc::error::{db_query, db_write, HandlerError};
use crate::ipc::handlers::reference::{map_semester, map_subject};
use crate::ipc::helpers::{conn, opt_str, req_str};
use crate::ipc::types::{AppState, Request};
use crate::roles::{Role, Session};
use crate::scoping::{self, Selection};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AssignmentRow {
    id: String,
    teacher_id: String,
    teacher_name: String,
    subject_id: String,
    subject_name: String,
    semester_id: String,
    semester_name: String,
}

/// Resolves the teacher whose assignments a request is about. Teachers always
/// get themselves; admins must name one.
fn scoped_teacher(session: &Session, req: &Request) -> Result<String, HandlerError> {
    session
        .resolve_teacher_id(opt_str(req, "teacherId").as_deref())
        .ok_or_else(|| HandlerError::bad_params("missing teacherId"))
}

fn assignments_list(
    state: &AppState,
    session: &Session,
    req: &Request,
) -> Result<Value, HandlerError> {
    let conn = conn(&state.db)?;
    let teacher_filter = session.resolve_teacher_id(opt_str(req, "teacherId").as_deref());

    // Current names win; the write-time snapshot covers rows whose reference
    // record is gone.
    let mut sql = String::from(
        "SELECT a.id,
                a.teacher_id,
                COALESCE(u.name, NULLIF(a.teacher_name, ''), 'Unknown Teacher') AS t_name,
                a.subject_id,
                COALESCE(s.name, NULLIF(a.subject_name, ''), 'Unknown Subject') AS sub_name,
                a.semester_id,
                COALESCE(sm.name, NULLIF(a.semester_name, ''), 'Unknown Semester') AS sem_name
         FROM teacher_assignments a
         LEFT JOIN users u ON u.id = a.teacher_id
         LEFT JOIN subjects s ON s.id = a.subject_id
         LEFT JOIN semesters sm ON sm.id = a.semester_id",
    );
    let mut bind: Vec<SqlValue> = Vec::new();
    if let Some(tid) = teacher_filter {
        sql.push_str(" WHERE a.teacher_id = ?");
        bind.push(SqlValue::Text(tid));
    }
    sql.push_str(" ORDER BY t_name COLLATE NOCASE, sm.year DESC, sem_name, sub_name");

    let mut stmt = conn.prepare(&sql).map_err(db_query)?;
    let rows = stmt
        .query_map(params_from_iter(bind), |r| {
            Ok(AssignmentRow {
                id: r.get(0)?,
                teacher_id: r.get(1)?,
                teacher_name: r.get(2)?,
                subject_id: r.get(3)?,
                subject_name: r.get(4)?,
                semester_id: r.get(5)?,
                semester_name: r.get(6)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query)?;

    Ok(json!({ "assignments": rows }))
}

fn assignments_create(state: &AppState, req: &Request) -> Result<Value, HandlerError> {
    let conn = conn(&state.db)?;
    let teacher_id = req_str(req, "teacherId")?;
    let subject_id = req_str(req, "subjectId")?;
    let semester_id = req_str(req, "semesterId")?;

    let (teacher_name, role) = db::user_name_role(conn, &teacher_id)
        .map_err(db_query)?
        .ok_or(HandlerError::NotFound("teacher"))?;
    if Role::parse(&role) != Some(Role::Teacher) {
        return Err(HandlerError::bad_params("teacherId does not name a teacher"));
    }
    let subject_name = db::subject_name(conn, &subject_id)
        .map_err(db_query)?
        .ok_or(HandlerError::NotFound("subject"))?;
    let semester_name = db::semester_name(conn, &semester_id)
        .map_err(db_query)?
        .ok_or(HandlerError::NotFound("semester"))?;

    // Assignments form a set over (teacher, subject, semester).
    let new_id = Uuid::new_v4().to_string();
    let inserted = conn
        .execute(
            "INSERT INTO teacher_assignments(
                id, teacher_id, subject_id, semester_id,
                teacher_name, subject_name, semester_name)
             VALUES(?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(teacher_id, subject_id, semester_id) DO NOTHING",
            (
                &new_id,
                &teacher_id,
                &subject_id,
                &semester_id,
                &teacher_name,
                &subject_name,
                &semester_name,
            ),
        )
        .map_err(db_write)?;

    let assignment_id: String = conn
        .query_row(
            "SELECT id FROM teacher_assignments
             WHERE teacher_id = ? AND subject_id = ? AND semester_id = ?",
            (&teacher_id, &subject_id, &semester_id),
            |r| r.get(0),
        )
        .map_err(db_query)?;

    if inserted > 0 {
        info!(assignment_id = %assignment_id, teacher_id = %teacher_id, "assignment created");
    }
    Ok(json!({ "assignmentId": assignment_id, "created": inserted > 0 }))
}

fn assignments_delete(state: &AppState, req: &Request) -> Result<Value, HandlerError> {
    let conn = conn(&state.db)?;
    let assignment_id = req_str(req, "assignmentId")?;
    let n = conn
        .execute(
            "DELETE FROM teacher_assignments WHERE id = ?",
            [&assignment_id],
        )
        .map_err(db_write)?;
    if n == 0 {
        return Err(HandlerError::NotFound("assignment"));
    }
    Ok(json!({ "deleted": true }))
}

fn semesters_by_ids(conn: &Connection, ids: &[String]) -> Result<Vec<Value>, HandlerError> {
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        let sem = conn
            .query_row(
                "SELECT id, name, year, start_date, end_date FROM semesters WHERE id = ?",
                [id],
                map_semester,
            )
            .optional()
            .map_err(db_query)?;
        out.push(match sem {
            Some(s) => json!(s),
            None => json!({ "id": id, "name": "Unknown Semester", "year": null }),
        });
    }
    Ok(out)
}

fn subjects_by_ids(conn: &Connection, ids: &[String]) -> Result<Vec<Value>, HandlerError> {
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        let subj = conn
            .query_row(
                "SELECT id, name, code FROM subjects WHERE id = ?",
                [id],
                map_subject,
            )
            .optional()
            .map_err(db_query)?;
        out.push(match subj {
            Some(s) => json!(s),
            None => json!({ "id": id, "name": "Unknown Subject", "code": "" }),
        });
    }
    Ok(out)
}

fn scope_semesters(
    state: &AppState,
    session: &Session,
    req: &Request,
) -> Result<Value, HandlerError> {
    let conn = conn(&state.db)?;
    let teacher_id = scoped_teacher(session, req)?;
    let keys = db::load_assignment_keys(conn, Some(&teacher_id)).map_err(db_query)?;
    let ids = scoping::semesters_for(&teacher_id, &keys);
    Ok(json!({ "teacherId": teacher_id, "semesters": semesters_by_ids(conn, &ids)? }))
}

fn scope_subjects(
    state: &AppState,
    session: &Session,
    req: &Request,
) -> Result<Value, HandlerError> {
    let conn = conn(&state.db)?;
    let teacher_id = scoped_teacher(session, req)?;
    let semester_id = req_str(req, "semesterId")?;
    let keys = db::load_assignment_keys(conn, Some(&teacher_id)).map_err(db_query)?;
    let ids = scoping::subjects_for(&teacher_id, &semester_id, &keys);
    Ok(json!({
        "teacherId": teacher_id,
        "semesterId": semester_id,
        "subjects": subjects_by_ids(conn, &ids)?
    }))
}

/// Applies a semester choice against the caller's current subject choice and
/// reports the resulting selection.
fn scope_select(
    state: &AppState,
    session: &Session,
    req: &Request,
) -> Result<Value, HandlerError> {
    let conn = conn(&state.db)?;
    let teacher_id = scoped_teacher(session, req)?;
    let semester_id = req_str(req, "semesterId")?;
    let current = Selection {
        semester_id: opt_str(req, "currentSemesterId"),
        subject_id: opt_str(req, "subjectId"),
    };

    let keys = db::load_assignment_keys(conn, Some(&teacher_id)).map_err(db_query)?;
    let (next, subject_ids) = scoping::select_semester(&teacher_id, &current, &semester_id, &keys);

    Ok(json!({
        "teacherId": teacher_id,
        "semesterId": next.semester_id,
        "subjectId": next.subject_id,
        "subjectCleared": current.subject_id.is_some() && next.subject_id.is_none(),
        "subjects": subjects_by_ids(conn, &subject_ids)?
    }))
}

pub fn try_handle(
    state: &mut AppState,
    session: &Session,
    req: &Request,
) -> Option<Result<Value, HandlerError>> {
    match req.method.as_str() {
        "assignments.list" => Some(assignments_list(state, session, req)),
        "assignments.create" => Some(assignments_create(state, req)),
        "assignments.delete" => Some(assignments_delete(state, req)),
        "scope.semesters" => Some(scope_semesters(state, session, req)),
        "scope.subjects" => Some(scope_subjects(state, session, req)),
        "scope.select" => Some(scope_select(state, session, req)),
        _ => None,
    }
}
