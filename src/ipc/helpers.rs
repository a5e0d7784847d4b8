use crate::ipc::error::HandlerError;
use crate::ipc::types::Request;
use rusqlite::Connection;
use serde_json::Value;

pub fn conn(db: &Option<Connection>) -> Result<&Connection, HandlerError> {
    db.as_ref().ok_or(HandlerError::NoWorkspace)
}

/// Trimmed string value; blank strings count as absent.
pub fn str_field<'a>(obj: &'a Value, key: &str) -> Option<&'a str> {
    obj.get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

pub fn opt_str(req: &Request, key: &str) -> Option<String> {
    str_field(&req.params, key).map(str::to_string)
}

pub fn req_str(req: &Request, key: &str) -> Result<String, HandlerError> {
    opt_str(req, key).ok_or_else(|| HandlerError::bad_params(format!("missing {key}")))
}

pub fn patch_obj(req: &Request) -> Result<&serde_json::Map<String, Value>, HandlerError> {
    req.params
        .get("patch")
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerError::bad_params("missing patch"))
}

/// Reads a score cell. `null`, a missing key and `""` mean "not entered";
/// numbers and numeric strings are scores.
pub fn score_field(obj: &Value, key: &str) -> Result<Option<f64>, String> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_f64()
            .map(Some)
            .ok_or_else(|| format!("{key} is not a finite number")),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| format!("{key} is not a number")),
        Some(_) => Err(format!("{key} must be a number or null")),
    }
}

/// `YYYY-MM-DD`, or absent.
pub fn opt_date(obj: &Value, key: &str) -> Result<Option<String>, HandlerError> {
    let Some(raw) = str_field(obj, key) else {
        return Ok(None);
    };
    chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(|d| Some(d.format("%Y-%m-%d").to_string()))
        .map_err(|_| HandlerError::bad_params(format!("{key} must be YYYY-MM-DD")))
}
