use crate::ai::{AnalysisRequest, MarkLine};
use crate::db;
use crate::ipc::error::{db_query, HandlerError};
use crate::ipc::handlers::marks::{query_marks, MarkFilter};
use crate::ipc::helpers::conn;
use crate::ipc::types::{AppState, Request};
use crate::roles::Session;
use serde_json::{json, Value};
use tracing::warn;

fn analysis_generate(state: &AppState, session: &Session) -> Result<Value, HandlerError> {
    let conn = conn(&state.db)?;
    let student_id = session.user_id.clone();
    let student_name = db::user_name_role(conn, &student_id)
        .map_err(db_query)?
        .map(|(name, _)| name)
        .ok_or(HandlerError::NotFound("student"))?;

    let marks = query_marks(
        conn,
        &MarkFilter {
            student_id: Some(student_id.clone()),
            ..Default::default()
        },
    )?;
    if marks.is_empty() {
        return Err(HandlerError::bad_params("no marks recorded yet"));
    }

    let request = AnalysisRequest {
        student_name,
        student_id: student_id.clone(),
        marks: marks
            .into_iter()
            .map(|m| MarkLine {
                semester: m.semester_name,
                subject: m.subject_name,
                ca1: m.ca1,
                ca2: m.ca2,
                mid_term: m.mid_term,
                end_term: m.end_term,
            })
            .collect(),
    };

    let analysis = state.analyzer.analyze(&request).map_err(|e| {
        warn!(student_id = %student_id, error = %e, "performance analysis failed");
        HandlerError::from(e)
    })?;

    Ok(json!({
        "studentId": student_id,
        "generatedAt": db::now_rfc3339(),
        "analysis": analysis
    }))
}

pub fn try_handle(
    state: &mut AppState,
    session: &Session,
    req: &Request,
) -> Option<Result<Value, HandlerError>> {
    match req.method.as_str() {
        "analysis.generate" => Some(analysis_generate(state, session)),
        _ => None,
    }
}
