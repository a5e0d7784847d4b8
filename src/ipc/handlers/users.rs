use crate::db;
use crate::ipc::error::{db_query, db_tx, db_write, db_write_unique, HandlerError};
use crate::ipc::helpers::{conn, opt_str, patch_obj, req_str, str_field};
use crate::ipc::types::{AppState, Request};
use crate::roles::{Role, Session};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UserProfile {
    id: String,
    email: String,
    name: String,
    role: String,
    prn: Option<String>,
    avatar: Option<String>,
    created_at: Option<String>,
}

const USER_COLUMNS: &str = "id, email, name, role, prn, avatar, created_at";

fn map_user(r: &rusqlite::Row<'_>) -> rusqlite::Result<UserProfile> {
    Ok(UserProfile {
        id: r.get(0)?,
        email: r.get(1)?,
        name: r.get(2)?,
        role: r.get(3)?,
        prn: r.get(4)?,
        avatar: r.get(5)?,
        created_at: r.get(6)?,
    })
}

fn get_user(conn: &Connection, user_id: &str) -> Result<Option<UserProfile>, HandlerError> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"),
        [user_id],
        map_user,
    )
    .optional()
    .map_err(db_query)
}

fn users_list(state: &AppState, req: &Request) -> Result<Value, HandlerError> {
    let conn = conn(&state.db)?;
    let role = match opt_str(req, "role") {
        Some(r) => Some(
            Role::parse(&r).ok_or_else(|| HandlerError::bad_params(format!("unknown role {r:?}")))?,
        ),
        None => None,
    };

    let users = match role {
        Some(role) => {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {USER_COLUMNS} FROM users WHERE role = ? ORDER BY name COLLATE NOCASE"
                ))
                .map_err(db_query)?;
            let rows = stmt.query_map([role.as_str()], map_user).map_err(db_query)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(db_query)?
        }
        None => {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {USER_COLUMNS} FROM users ORDER BY role, name COLLATE NOCASE"
                ))
                .map_err(db_query)?;
            let rows = stmt.query_map([], map_user).map_err(db_query)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(db_query)?
        }
    };

    Ok(json!({ "users": users }))
}

fn users_get(state: &AppState, req: &Request) -> Result<Value, HandlerError> {
    let conn = conn(&state.db)?;
    let user_id = req_str(req, "userId")?;
    let user = get_user(conn, &user_id)?.ok_or(HandlerError::NotFound("user"))?;
    Ok(json!({ "user": user }))
}

fn validate_email(email: &str) -> Result<(), HandlerError> {
    if !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
        return Err(HandlerError::bad_params("email must look like name@domain"));
    }
    Ok(())
}

fn users_create(state: &AppState, req: &Request) -> Result<Value, HandlerError> {
    let conn = conn(&state.db)?;
    let email = req_str(req, "email")?;
    let name = req_str(req, "name")?;
    let role_raw = req_str(req, "role")?;
    let role = Role::parse(&role_raw)
        .ok_or_else(|| HandlerError::bad_params(format!("unknown role {role_raw:?}")))?;
    validate_email(&email)?;

    let prn = opt_str(req, "prn");
    if prn.is_some() && role != Role::Student {
        return Err(HandlerError::bad_params("prn applies to students only"));
    }
    let avatar = opt_str(req, "avatar");

    let user_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO users(id, email, name, role, prn, avatar, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &user_id,
            &email,
            &name,
            role.as_str(),
            &prn,
            &avatar,
            db::now_rfc3339(),
        ),
    )
    .map_err(db_write_unique("user with this email"))?;
    info!(user_id = %user_id, role = role.as_str(), "user created");

    Ok(json!({ "userId": user_id }))
}

fn users_update(state: &AppState, req: &Request) -> Result<Value, HandlerError> {
    let conn = conn(&state.db)?;
    let user_id = req_str(req, "userId")?;
    let patch = patch_obj(req)?;
    let patch_value = Value::Object(patch.clone());

    if patch.contains_key("role") {
        return Err(HandlerError::bad_params(
            "role cannot be changed; create a new user instead",
        ));
    }
    let current = get_user(conn, &user_id)?.ok_or(HandlerError::NotFound("user"))?;

    let name = str_field(&patch_value, "name")
        .map(str::to_string)
        .unwrap_or(current.name);
    let email = str_field(&patch_value, "email")
        .map(str::to_string)
        .unwrap_or(current.email);
    validate_email(&email)?;

    // Explicit null clears the optional fields.
    let prn = match patch.get("prn") {
        Some(Value::Null) => None,
        Some(_) => str_field(&patch_value, "prn").map(str::to_string),
        None => current.prn,
    };
    if prn.is_some() && current.role != Role::Student.as_str() {
        return Err(HandlerError::bad_params("prn applies to students only"));
    }
    let avatar = match patch.get("avatar") {
        Some(Value::Null) => None,
        Some(_) => str_field(&patch_value, "avatar").map(str::to_string),
        None => current.avatar,
    };

    conn.execute(
        "UPDATE users SET name = ?, email = ?, prn = ?, avatar = ? WHERE id = ?",
        (&name, &email, &prn, &avatar, &user_id),
    )
    .map_err(db_write_unique("user with this email"))?;

    Ok(json!({ "ok": true }))
}

fn users_delete(state: &AppState, session: &Session, req: &Request) -> Result<Value, HandlerError> {
    let conn = conn(&state.db)?;
    let user_id = req_str(req, "userId")?;
    if user_id == session.user_id {
        return Err(HandlerError::bad_params("cannot delete the signed-in user"));
    }
    if get_user(conn, &user_id)?.is_none() {
        return Err(HandlerError::NotFound("user"));
    }

    let tx = conn.unchecked_transaction().map_err(db_tx)?;
    // Dependency order; there is no ON DELETE CASCADE.
    let marks_deleted = tx
        .execute("DELETE FROM marks WHERE student_id = ?", [&user_id])
        .map_err(db_write)?;
    let assignments_deleted = tx
        .execute(
            "DELETE FROM teacher_assignments WHERE teacher_id = ?",
            [&user_id],
        )
        .map_err(db_write)?;
    tx.execute("DELETE FROM users WHERE id = ?", [&user_id])
        .map_err(db_write)?;
    tx.commit().map_err(db_tx)?;

    info!(
        user_id = %user_id,
        marks_deleted,
        assignments_deleted,
        "user deleted"
    );
    Ok(json!({
        "deleted": true,
        "marksDeleted": marks_deleted,
        "assignmentsDeleted": assignments_deleted
    }))
}

pub fn try_handle(
    state: &mut AppState,
    session: &Session,
    req: &Request,
) -> Option<Result<Value, HandlerError>> {
    match req.method.as_str() {
        "users.list" => Some(users_list(state, req)),
        "users.get" => Some(users_get(state, req)),
        "users.create" => Some(users_create(state, req)),
        "users.update" => Some(users_update(state, req)),
        "users.delete" => Some(users_delete(state, session, req)),
        _ => None,
    }
}
