use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    if let Some(resp) = handlers::core::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::courses::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::students::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::point_types::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::points::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::summaries::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::analytics::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::groups::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::backup_exchange::try_handle(state, &req) {
        return resp;
    }

    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
