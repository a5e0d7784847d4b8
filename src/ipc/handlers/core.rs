use crate::db;
use crate::ipc::error::{db_query, db_write_unique, err, ok, HandlerError};
use crate::ipc::helpers::{conn, opt_str, req_str};
use crate::ipc::types::{AppState, Request};
use crate::roles::{Role, Session};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::path::PathBuf;
use tracing::{info, warn};
use uuid::Uuid;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "session": state.session,
        }),
    )
}

pub fn open_workspace(state: &mut AppState, path: PathBuf) -> anyhow::Result<()> {
    let conn = db::open_db(&path)?;
    // A session belongs to the workspace it was started in.
    state.session = None;
    state.db = Some(conn);
    info!(workspace = %path.to_string_lossy(), "workspace opened");
    state.workspace = Some(path);
    Ok(())
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(path) = opt_str(req, "path").map(PathBuf::from) else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match open_workspace(state, path.clone()) {
        Ok(()) => ok(&req.id, json!({ "workspacePath": path.to_string_lossy() })),
        Err(e) => {
            warn!(error = %e, "workspace open failed");
            err(&req.id, "db_open_failed", format!("{e:?}"), None)
        }
    }
}

pub fn load_session(conn: &Connection, user_id: &str) -> Result<Option<Session>, HandlerError> {
    let row: Option<(String, String, String, String)> = conn
        .query_row(
            "SELECT id, name, email, role FROM users WHERE id = ?",
            [user_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()
        .map_err(db_query)?;
    let Some((user_id, name, email, role)) = row else {
        return Ok(None);
    };
    let role = Role::parse(&role)
        .ok_or_else(|| HandlerError::bad_params(format!("user has unknown role {role:?}")))?;
    Ok(Some(Session {
        user_id,
        name,
        email,
        role,
    }))
}

fn session_begin(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerError> {
    let conn = conn(&state.db)?;

    let user_id = match (opt_str(req, "userId"), opt_str(req, "email")) {
        (Some(id), _) => Some(id),
        (None, Some(email)) => conn
            .query_row(
                "SELECT id FROM users WHERE email = ? COLLATE NOCASE",
                [&email],
                |r| r.get::<_, String>(0),
            )
            .optional()
            .map_err(db_query)?,
        (None, None) => return Err(HandlerError::bad_params("missing userId or email")),
    };

    let session = match user_id {
        Some(id) => load_session(conn, &id)?,
        None => None,
    };
    let Some(session) = session else {
        return Err(HandlerError::NotFound("user"));
    };

    info!(user_id = %session.user_id, role = session.role.as_str(), "session started");
    let result = json!({ "session": session });
    state.session = Some(session);
    Ok(result)
}

fn bootstrap_admin(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerError> {
    let conn = conn(&state.db)?;
    let email = req_str(req, "email")?;
    let name = req_str(req, "name")?;
    if !email.contains('@') {
        return Err(HandlerError::bad_params("email must contain @"));
    }

    let existing = db::count_users(conn).map_err(db_query)?;
    if existing > 0 {
        return Err(HandlerError::Conflict(
            "workspace already has users; sign in as an administrator".to_string(),
        ));
    }

    let user_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO users(id, email, name, role, created_at) VALUES(?, ?, ?, 'admin', ?)",
        (&user_id, &email, &name, db::now_rfc3339()),
    )
    .map_err(db_write_unique("user"))?;
    info!(user_id = %user_id, "bootstrap administrator created");

    Ok(json!({ "userId": user_id }))
}

fn respond(req: &Request, result: Result<serde_json::Value, HandlerError>) -> serde_json::Value {
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "session.begin" => Some(respond(req, session_begin(state, req))),
        "session.current" => Some(ok(&req.id, json!({ "session": state.session }))),
        "session.end" => {
            if let Some(s) = state.session.take() {
                info!(user_id = %s.user_id, "session ended");
            }
            Some(ok(&req.id, json!({ "ended": true })))
        }
        "users.bootstrapAdmin" => Some(respond(req, bootstrap_admin(state, req))),
        _ => None,
    }
}
