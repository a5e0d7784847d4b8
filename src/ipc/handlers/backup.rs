use crate::backup;
use crate::db;
use crate::ipc::error::HandlerError;
use crate::ipc::handlers::core::load_session;
use crate::ipc::helpers::req_str;
use crate::ipc::types::{AppState, Request};
use crate::roles::Session;
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::{info, warn};

fn export_bundle(state: &AppState, req: &Request) -> Result<Value, HandlerError> {
    let workspace = state.workspace.as_ref().ok_or(HandlerError::NoWorkspace)?;
    let out_path = PathBuf::from(req_str(req, "outPath")?);

    let summary = backup::export_workspace_bundle(workspace, &out_path)
        .map_err(|e| HandlerError::Backup(format!("{e:#}")))?;
    info!(out = %out_path.to_string_lossy(), sha256 = %summary.db_sha256, "workspace exported");

    Ok(json!({
        "outPath": out_path.to_string_lossy(),
        "bundleFormat": summary.bundle_format,
        "entryCount": summary.entry_count,
        "dbSha256": summary.db_sha256
    }))
}

/// Replaces the workspace database with the bundle's. The connection is closed
/// for the swap and reopened afterwards; the session survives only if its user
/// still exists with the same role in the restored data.
fn import_bundle(state: &mut AppState, session: &Session, req: &Request) -> Result<Value, HandlerError> {
    let workspace = state.workspace.clone().ok_or(HandlerError::NoWorkspace)?;
    let in_path = PathBuf::from(req_str(req, "inPath")?);

    state.db = None;
    let imported = backup::import_workspace_bundle(&in_path, &workspace);
    let reopened = db::open_db(&workspace);
    match reopened {
        Ok(conn) => state.db = Some(conn),
        Err(e) => {
            state.session = None;
            return Err(HandlerError::Backup(format!("failed to reopen workspace: {e:#}")));
        }
    }
    let summary = imported.map_err(|e| HandlerError::Backup(format!("{e:#}")))?;

    let restored = match state.db.as_ref() {
        Some(conn) => load_session(conn, &session.user_id)?,
        None => None,
    };
    let keep_session = restored.as_ref().map(|s| s.role) == Some(session.role);
    if keep_session {
        state.session = restored;
    } else {
        warn!(user_id = %session.user_id, "session user missing after import; session ended");
        state.session = None;
    }
    info!(input = %in_path.to_string_lossy(), "workspace imported");

    Ok(json!({
        "bundleFormat": summary.bundle_format,
        "dbSha256": summary.db_sha256,
        "sessionKept": keep_session
    }))
}

pub fn try_handle(
    state: &mut AppState,
    session: &Session,
    req: &Request,
) -> Option<Result<Value, HandlerError>> {
    match req.method.as_str() {
        "backup.exportWorkspaceBundle" => Some(export_bundle(state, req)),
        "backup.importWorkspaceBundle" => Some(import_bundle(state, session, req)),
        _ => None,
    }
}
