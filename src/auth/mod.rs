use crate::rate_limit::{email_rate_limit, ip_rate_limit};
use crate::state::AppState;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;

mod dto;
pub mod handlers;
pub mod jwt;
pub mod oauth;
pub mod password;
pub mod repo;
pub mod services;
pub(crate) mod extractors;

/// The `/auth` namespace. Endpoint-specific limiters sit on their routes and
/// the namespace-wide limiter wraps the whole router.
pub fn router(state: &AppState) -> Router<AppState> {
    let limiters = &state.limiters;
    Router::new()
        .route(
            "/auth/signup",
            post(handlers::signup)
                .route_layer(from_fn_with_state(limiters.signup.clone(), ip_rate_limit)),
        )
        .route(
            "/auth/login",
            post(handlers::login)
                .route_layer(from_fn_with_state(limiters.login.clone(), ip_rate_limit)),
        )
        .route(
            "/auth/resend-otp",
            post(handlers::resend_otp)
                .route_layer(from_fn_with_state(limiters.otp.clone(), email_rate_limit)),
        )
        .route(
            "/auth/magic-link-request",
            post(handlers::request_magic_link)
                .route_layer(from_fn_with_state(limiters.magic.clone(), email_rate_limit)),
        )
        .route("/auth/magic", get(handlers::verify_magic_link))
        .route("/auth/verify-otp", post(handlers::verify_otp))
        .route("/auth/google", get(handlers::google_redirect))
        .route("/auth/google/callback", get(handlers::google_callback))
        .layer(from_fn_with_state(limiters.auth.clone(), ip_rate_limit))
}
