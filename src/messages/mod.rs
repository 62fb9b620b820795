use crate::state::AppState;
use axum::routing::get;
use axum::Router;

mod dto;
pub mod handlers;
pub mod repo;

pub fn router() -> Router<AppState> {
    Router::new().nest(
        "/zk-message-center",
        Router::new()
            .route("/past", get(handlers::past_messages))
            .route("/scheduled", get(handlers::scheduled_messages)),
    )
}
