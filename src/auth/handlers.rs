use axum::{
    extract::{FromRef, Query, State},
    http::StatusCode,
    response::Redirect,
    Json,
};
use time::{Duration, OffsetDateTime};
use tracing::{error, info, instrument, warn};

use crate::{
    auth::{
        dto::{
            EmailRequest, GoogleCallbackQuery, LoginRequest, MagicLoginResponse,
            MagicVerifyQuery, MessageResponse, ProtectedResponse, PublicUser, SignupRequest,
            TokenResponse, VerifyOtpRequest,
        },
        extractors::AuthUser,
        jwt::JwtKeys,
        oauth::{self, GoogleOAuth},
        password::{hash_password, verify_password},
        repo::User,
        services::{
            check_otp, generate_magic_token, generate_otp, hash_token, is_valid_email,
            OtpOutcome, MAGIC_TOKEN_EXPIRATION_MINUTES, OTP_EXPIRATION_MINUTES,
        },
    },
    email::{magic_link_mail, otp_mail},
    error::ApiError,
    state::AppState,
};

#[instrument(skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    Json(mut payload): Json<SignupRequest>,
) -> Result<(StatusCode, Json<MessageResponse>), ApiError> {
    payload.email = payload.email.trim().to_lowercase();

    if payload.name.is_empty() || payload.email.is_empty() || payload.password.is_empty() {
        return Err(ApiError::Validation("All fields are required".into()));
    }
    if !is_valid_email(&payload.email) {
        warn!(email = %payload.email, "invalid email");
        return Err(ApiError::Validation("Invalid email".into()));
    }

    if User::find_by_email(&state.db, &payload.email).await?.is_some() {
        warn!(email = %payload.email, "email already registered");
        return Err(ApiError::Conflict("Email is already in use".into()));
    }

    let hash = hash_password(&payload.password)?;
    let user = User::create_local(&state.db, &payload.name, &payload.email, &hash).await?;

    info!(user_id = %user.id, email = %user.email, "user registered");
    Ok((
        StatusCode::CREATED,
        Json(MessageResponse {
            message: "User registered successfully",
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(mut payload): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    payload.email = payload.email.trim().to_lowercase();

    if payload.email.is_empty() || payload.password.is_empty() {
        return Err(ApiError::Validation(
            "Email and password are required".into(),
        ));
    }

    // Unknown email and wrong password both answer the same way; the
    // response must not confirm whether the account exists.
    let Some(user) = User::find_by_email(&state.db, &payload.email).await? else {
        warn!(email = %payload.email, "login unknown email");
        return Err(ApiError::Unauthorized("Invalid credentials".into()));
    };

    if user.is_google() {
        return Err(ApiError::ProviderMismatch);
    }

    let Some(password_hash) = user.password_hash.as_deref() else {
        warn!(user_id = %user.id, "local account without password hash");
        return Err(ApiError::Unauthorized("Invalid credentials".into()));
    };

    if !verify_password(&payload.password, password_hash)? {
        warn!(user_id = %user.id, "login invalid password");
        return Err(ApiError::Unauthorized("Invalid credentials".into()));
    }

    let keys = JwtKeys::from_ref(&state);
    let token = keys.sign(user.id, &user.email)?;

    info!(user_id = %user.id, email = %user.email, "user logged in");
    Ok(Json(TokenResponse {
        message: "Login successful",
        token,
    }))
}

#[instrument(skip(state, payload))]
pub async fn resend_otp(
    State(state): State<AppState>,
    Json(payload): Json<EmailRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let email = payload.email.trim().to_lowercase();
    if email.is_empty() {
        return Err(ApiError::Validation("Email is required".into()));
    }

    let Some(user) = User::find_by_email(&state.db, &email).await? else {
        return Err(ApiError::NotFound("User not found".into()));
    };

    let otp = generate_otp();
    let expires = OffsetDateTime::now_utc() + Duration::minutes(OTP_EXPIRATION_MINUTES);
    User::set_otp(&state.db, user.id, otp, expires).await?;

    if let Err(e) = state.mailer.send(otp_mail(&user.email, otp)).await {
        error!(error = %e, user_id = %user.id, "failed to send otp email");
        // Undo so an undeliverable code does not linger.
        User::clear_otp(&state.db, user.id).await?;
        return Err(ApiError::Delivery(
            "Failed to send OTP. Please try again later.".into(),
        ));
    }

    info!(user_id = %user.id, "otp resent");
    Ok(Json(MessageResponse {
        message: "OTP resent successfully",
    }))
}

#[instrument(skip(state, payload))]
pub async fn verify_otp(
    State(state): State<AppState>,
    Json(payload): Json<VerifyOtpRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let email = payload.email.trim().to_lowercase();

    let Some(user) = User::find_by_email(&state.db, &email).await? else {
        return Err(ApiError::NotFound("Unable to process!".into()));
    };

    match check_otp(
        user.otp,
        user.otp_expires,
        payload.otp,
        OffsetDateTime::now_utc(),
    ) {
        OtpOutcome::Mismatch => Err(ApiError::Validation("Invalid OTP".into())),
        OtpOutcome::Expired => Err(ApiError::Validation("OTP has expired".into())),
        OtpOutcome::Match => {
            User::clear_otp(&state.db, user.id).await?;
            info!(user_id = %user.id, "otp verified");
            Ok(Json(MessageResponse {
                message: "OTP verified successfully",
            }))
        }
    }
}

#[instrument(skip(state, payload))]
pub async fn request_magic_link(
    State(state): State<AppState>,
    Json(payload): Json<EmailRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let email = payload.email.trim().to_lowercase();
    if email.is_empty() {
        return Err(ApiError::Validation("Email is required".into()));
    }

    // Same acknowledgment whether or not the account exists.
    let Some(user) = User::find_by_email(&state.db, &email).await? else {
        return Ok(Json(MessageResponse {
            message: "If an account exists with this email, a magic link has been sent",
        }));
    };

    if user.is_google() {
        return Err(ApiError::ProviderMismatch);
    }

    let token = generate_magic_token();
    let expires = OffsetDateTime::now_utc() + Duration::minutes(MAGIC_TOKEN_EXPIRATION_MINUTES);
    User::set_magic_token(&state.db, user.id, &hash_token(&token), expires).await?;

    info!(user_id = %user.id, "magic link requested");

    let mail = magic_link_mail(&state.config.frontend_url, &user.email, &token);
    if let Err(e) = state.mailer.send(mail).await {
        error!(error = %e, user_id = %user.id, "failed to send magic link email");
        // Roll the pending token back so an undeliverable link does not block
        // future requests.
        User::clear_magic_token(&state.db, user.id).await?;
        return Err(ApiError::Delivery(
            "Failed to send magic link. Please try again later.".into(),
        ));
    }

    Ok(Json(MessageResponse {
        message: "Magic link sent to your email. Please check your inbox.",
    }))
}

#[instrument(skip(state, query))]
pub async fn verify_magic_link(
    State(state): State<AppState>,
    Query(query): Query<MagicVerifyQuery>,
) -> Result<Json<MagicLoginResponse>, ApiError> {
    let Some(token) = query.token.filter(|t| !t.is_empty()) else {
        return Err(ApiError::Validation("Invalid or missing token".into()));
    };

    // One response for never-existed, already-consumed and expired alike.
    let Some(user) = User::consume_magic_token(&state.db, &hash_token(&token)).await? else {
        return Err(ApiError::Unauthorized(
            "Invalid or expired magic link. Please request a new one.".into(),
        ));
    };

    info!(user_id = %user.id, email = %user.email, "magic link verified");

    let keys = JwtKeys::from_ref(&state);
    let token = keys.sign(user.id, &user.email)?;

    Ok(Json(MagicLoginResponse {
        message: "Login successful",
        token,
        user: PublicUser::from(&user),
    }))
}

#[instrument(skip(state))]
pub async fn google_redirect(State(state): State<AppState>) -> Result<Redirect, ApiError> {
    let Some(google) = state.config.google.as_ref() else {
        return Err(ApiError::Internal(anyhow::anyhow!(
            "google oauth is not configured"
        )));
    };
    let url = GoogleOAuth::new(google).authorize_url()?;
    Ok(Redirect::temporary(&url))
}

#[instrument(skip(state, query))]
pub async fn google_callback(
    State(state): State<AppState>,
    Query(query): Query<GoogleCallbackQuery>,
) -> Result<Redirect, ApiError> {
    let Some(google) = state.config.google.as_ref() else {
        return Err(ApiError::Internal(anyhow::anyhow!(
            "google oauth is not configured"
        )));
    };
    let Some(code) = query.code.filter(|c| !c.is_empty()) else {
        return Err(ApiError::Unauthorized(
            "Google authentication failed".into(),
        ));
    };

    let client = GoogleOAuth::new(google);
    let userinfo = async {
        let access_token = client.exchange_code(&code).await?;
        client.fetch_userinfo(&access_token).await
    }
    .await
    .map_err(|e| {
        error!(error = %e, "google identity exchange failed");
        ApiError::Unauthorized("Google authentication failed".into())
    })?;

    let Some(email) = userinfo.email.as_deref() else {
        warn!("google profile has no email");
        return Err(ApiError::Unauthorized(
            "Google authentication failed".into(),
        ));
    };
    let display_name = userinfo.name.as_deref().unwrap_or(email);

    let user = oauth::reconcile(&state.db, &userinfo.sub, email, display_name).await?;

    let keys = JwtKeys::from_ref(&state);
    let token = keys.sign(user.id, &user.email)?;

    info!(user_id = %user.id, "google login reconciled");
    Ok(Redirect::temporary(&format!(
        "{}/oauth?token={}",
        state.config.frontend_url, token
    )))
}

/// Example authenticated echo behind the auth gate.
pub async fn protected(AuthUser(user): AuthUser) -> Json<ProtectedResponse> {
    Json(ProtectedResponse {
        message: "Protected route accessed successfully!",
        user: PublicUser::from(&user),
    })
}
