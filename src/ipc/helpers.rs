use std::collections::HashSet;

use rusqlite::Connection;

use super::error::err;
use super::types::{AppState, Request};
use crate::calc;

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn optional_str(req: &Request, key: &str) -> Result<Option<String>, serde_json::Value> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_str()
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| err(&req.id, "bad_params", format!("{} must be a string", key), None)),
    }
}

pub fn optional_i64(req: &Request, key: &str) -> Result<Option<i64>, serde_json::Value> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| err(&req.id, "bad_params", format!("{} must be an integer", key), None)),
    }
}

pub fn required_i64(req: &Request, key: &str) -> Result<i64, serde_json::Value> {
    optional_i64(req, key)?
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

/// Deduplicating id-list parser; first occurrence wins, order preserved.
pub fn parse_id_list(req: &Request, key: &str) -> Result<Vec<String>, serde_json::Value> {
    let Some(raw) = req.params.get(key).and_then(|v| v.as_array()) else {
        return Err(err(&req.id, "bad_params", format!("missing {}", key), None));
    };
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    for v in raw {
        let Some(id) = v.as_str() else {
            return Err(err(
                &req.id,
                "bad_params",
                format!("{} must contain only strings", key),
                None,
            ));
        };
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(err(
                &req.id,
                "bad_params",
                format!("{} must not contain empty ids", key),
                None,
            ));
        }
        let owned = trimmed.to_string();
        if seen.insert(owned.clone()) {
            out.push(owned);
        }
    }
    Ok(out)
}

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn calc_err(req: &Request, e: calc::CalcError) -> serde_json::Value {
    err(&req.id, &e.code, e.message, e.details)
}
