//! Google identity reconciliation.
//!
//! The provider is an external identity service; this module exchanges the
//! callback code for a profile and merges that assertion into the local
//! credential store.

use reqwest::Client;
use serde::Deserialize;
use sqlx::PgPool;
use tracing::info;
use url::Url;

use crate::auth::repo::User;
use crate::config::GoogleConfig;

const AUTHORIZATION_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const USERINFO_ENDPOINT: &str = "https://openidconnect.googleapis.com/v1/userinfo";

#[derive(Debug, Deserialize)]
struct GoogleTokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
pub struct GoogleUserInfo {
    pub sub: String,
    pub email: Option<String>,
    pub name: Option<String>,
}

#[derive(Clone)]
pub struct GoogleOAuth {
    client_id: String,
    client_secret: String,
    callback_url: String,
    http_client: Client,
}

impl GoogleOAuth {
    pub fn new(config: &GoogleConfig) -> Self {
        Self {
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            callback_url: config.callback_url.clone(),
            http_client: Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    pub fn authorize_url(&self) -> anyhow::Result<String> {
        let mut url = Url::parse(AUTHORIZATION_ENDPOINT)?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.callback_url)
            .append_pair("response_type", "code")
            .append_pair("scope", "openid email profile");
        Ok(url.into())
    }

    pub async fn exchange_code(&self, code: &str) -> anyhow::Result<String> {
        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", self.callback_url.as_str()),
        ];

        let response = self
            .http_client
            .post(TOKEN_ENDPOINT)
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("google token exchange failed with status {status}");
        }

        let token: GoogleTokenResponse = response.json().await?;
        Ok(token.access_token)
    }

    pub async fn fetch_userinfo(&self, access_token: &str) -> anyhow::Result<GoogleUserInfo> {
        let response = self
            .http_client
            .get(USERINFO_ENDPOINT)
            .bearer_auth(access_token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("google userinfo request failed with status {status}");
        }

        Ok(response.json().await?)
    }
}

#[derive(Debug)]
pub enum ReconcileAction {
    /// Seen this external identifier before.
    UseExisting(User),
    /// Same email signed up locally earlier; link instead of duplicating.
    LinkExisting(User),
    /// First contact with this identity.
    CreateNew,
}

/// Precedence: external identifier match, then email match, then creation.
pub fn reconcile_action(by_google_id: Option<User>, by_email: Option<User>) -> ReconcileAction {
    match (by_google_id, by_email) {
        (Some(user), _) => ReconcileAction::UseExisting(user),
        (None, Some(user)) => ReconcileAction::LinkExisting(user),
        (None, None) => ReconcileAction::CreateNew,
    }
}

/// Merge an external identity assertion into the credential store.
pub async fn reconcile(
    db: &PgPool,
    google_id: &str,
    email: &str,
    display_name: &str,
) -> anyhow::Result<User> {
    let by_google_id = User::find_by_google_id(db, google_id).await?;
    let by_email = if by_google_id.is_some() {
        None
    } else {
        User::find_by_email(db, email).await?
    };

    match reconcile_action(by_google_id, by_email) {
        ReconcileAction::UseExisting(user) => Ok(user),
        ReconcileAction::LinkExisting(user) => {
            info!(user_id = %user.id, "linking google identity to existing account");
            User::link_google(db, user.id, google_id).await
        }
        ReconcileAction::CreateNew => {
            info!(email = %email, "creating account from google identity");
            User::create_google(db, display_name, email, google_id).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GoogleConfig;

    fn oauth() -> GoogleOAuth {
        GoogleOAuth::new(&GoogleConfig {
            client_id: "client-123".into(),
            client_secret: "secret".into(),
            callback_url: "https://api.zicket.test/auth/google/callback".into(),
        })
    }

    #[test]
    fn authorize_url_carries_client_and_redirect() {
        let url = oauth().authorize_url().expect("url");
        assert!(url.starts_with("https://accounts.google.com/o/oauth2/v2/auth?"));
        assert!(url.contains("client_id=client-123"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("redirect_uri=https%3A%2F%2Fapi.zicket.test%2Fauth%2Fgoogle%2Fcallback"));
        assert!(!url.contains("secret"));
    }

    fn fake_user(email: &str, google_id: Option<&str>) -> User {
        use time::OffsetDateTime;
        User {
            id: uuid::Uuid::new_v4(),
            name: "Test".into(),
            email: email.into(),
            password_hash: None,
            google_id: google_id.map(String::from),
            provider: if google_id.is_some() {
                "google".into()
            } else {
                "local".into()
            },
            otp: None,
            otp_expires: None,
            email_verified_at: None,
            magic_token_hash: None,
            magic_token_expires: None,
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn identifier_match_takes_precedence_over_email() {
        let by_id = fake_user("a@x.com", Some("g-1"));
        let by_email = fake_user("a@x.com", None);
        let expected = by_id.id;
        match reconcile_action(Some(by_id), Some(by_email)) {
            ReconcileAction::UseExisting(user) => assert_eq!(user.id, expected),
            other => panic!("expected UseExisting, got {other:?}"),
        }
    }

    #[test]
    fn email_match_links_instead_of_creating() {
        let local = fake_user("a@x.com", None);
        let expected = local.id;
        match reconcile_action(None, Some(local)) {
            ReconcileAction::LinkExisting(user) => assert_eq!(user.id, expected),
            other => panic!("expected LinkExisting, got {other:?}"),
        }
    }

    #[test]
    fn unknown_identity_creates() {
        assert!(matches!(
            reconcile_action(None, None),
            ReconcileAction::CreateNew
        ));
    }
}
