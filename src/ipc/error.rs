use crate::ai::AiError;
use serde_json::json;
use thiserror::Error;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("select a workspace first")]
    NoWorkspace,

    #[error("begin a session first")]
    NoSession,

    #[error("{0}")]
    BadParams(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{message}")]
    Db { code: &'static str, message: String },

    #[error(transparent)]
    Ai(#[from] AiError),

    #[error("{0}")]
    Backup(String),
}

impl HandlerError {
    pub fn bad_params(message: impl Into<String>) -> Self {
        HandlerError::BadParams(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        HandlerError::Forbidden(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            HandlerError::NoWorkspace => "no_workspace",
            HandlerError::NoSession => "no_session",
            HandlerError::BadParams(_) => "bad_params",
            HandlerError::NotFound(_) => "not_found",
            HandlerError::Forbidden(_) => "forbidden",
            HandlerError::Conflict(_) => "conflict",
            HandlerError::Db { code, .. } => *code,
            HandlerError::Ai(e) => e.code(),
            HandlerError::Backup(_) => "backup_failed",
        }
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        let details = match &self {
            HandlerError::NotFound(what) => Some(json!({ "entity": what })),
            _ => None,
        };
        err(id, self.code(), self.to_string(), details)
    }
}

pub fn db_query(e: rusqlite::Error) -> HandlerError {
    HandlerError::Db {
        code: "db_query_failed",
        message: e.to_string(),
    }
}

pub fn db_write(e: rusqlite::Error) -> HandlerError {
    HandlerError::Db {
        code: "db_write_failed",
        message: e.to_string(),
    }
}

pub fn db_tx(e: rusqlite::Error) -> HandlerError {
    HandlerError::Db {
        code: "db_tx_failed",
        message: e.to_string(),
    }
}

/// Writes that trip a UNIQUE index surface as `conflict` instead of a store
/// failure.
pub fn db_write_unique(what: &str) -> impl Fn(rusqlite::Error) -> HandlerError + '_ {
    move |e| match e {
        rusqlite::Error::SqliteFailure(f, _)
            if f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            HandlerError::Conflict(format!("{what} already exists"))
        }
        other => db_write(other),
    }
}
