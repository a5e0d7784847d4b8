use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::{err, ok, HandlerError};
use crate::roles::{Action, Session};
use tracing::{debug, warn};

/// Action each session-bound method requires. Methods absent from this table
/// are either session-free (see `handlers::core`) or unknown.
fn required_action(method: &str) -> Option<Action> {
    let action = match method {
        "users.list" | "users.get" => Action::ViewUsers,
        "users.create" | "users.update" | "users.delete" => Action::ManageUsers,
        "subjects.list" | "semesters.list" => Action::ViewReferenceData,
        "subjects.create" | "subjects.update" | "subjects.delete" | "semesters.create"
        | "semesters.update" | "semesters.delete" => Action::ManageReferenceData,
        "assignments.list" | "scope.semesters" | "scope.subjects" | "scope.select" => {
            Action::ViewAssignments
        }
        "assignments.create" | "assignments.delete" => Action::ManageAssignments,
        "marks.sheet" | "marks.upsert" => Action::EnterMarks,
        "marks.list" => Action::ViewMarks,
        "marks.delete" => Action::DeleteMarks,
        "marks.summary" => Action::ViewSummary,
        "analysis.generate" => Action::RequestAnalysis,
        "backup.exportWorkspaceBundle" | "backup.importWorkspaceBundle" => Action::ManageBackups,
        _ => return None,
    };
    Some(action)
}

fn dispatch(
    state: &mut AppState,
    session: &Session,
    req: &Request,
) -> Option<Result<serde_json::Value, HandlerError>> {
    if let Some(resp) = handlers::users::try_handle(state, session, req) {
        return Some(resp);
    }
    if let Some(resp) = handlers::reference::try_handle(state, session, req) {
        return Some(resp);
    }
    if let Some(resp) = handlers::assignments::try_handle(state, session, req) {
        return Some(resp);
    }
    if let Some(resp) = handlers::marks::try_handle(state, session, req) {
        return Some(resp);
    }
    if let Some(resp) = handlers::analysis::try_handle(state, session, req) {
        return Some(resp);
    }
    handlers::backup::try_handle(state, session, req)
}

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    debug!(id = %req.id, method = %req.method, "request");

    if let Some(resp) = handlers::core::try_handle(state, &req) {
        return resp;
    }

    let Some(action) = required_action(&req.method) else {
        return err(
            &req.id,
            "not_implemented",
            format!("unknown method: {}", req.method),
            None,
        );
    };

    let Some(session) = state.session.clone() else {
        return HandlerError::NoSession.response(&req.id);
    };
    if !session.can(action) {
        warn!(
            user_id = %session.user_id,
            role = session.role.as_str(),
            method = %req.method,
            "action not permitted for role"
        );
        return HandlerError::forbidden(format!(
            "{} is not permitted for role {}",
            req.method,
            session.role.as_str()
        ))
        .response(&req.id);
    }

    match dispatch(state, &session, &req) {
        Some(Ok(value)) => ok(&req.id, value),
        Some(Err(e)) => {
            debug!(id = %req.id, method = %req.method, code = e.code(), error = %e, "request failed");
            e.response(&req.id)
        }
        None => err(
            &req.id,
            "not_implemented",
            format!("unknown method: {}", req.method),
            None,
        ),
    }
}
