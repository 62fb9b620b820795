//! Email delivery seam.
//!
//! The auth flows only need to hand a message to a collaborator and learn
//! whether delivery succeeded; everything behind that is an operator concern.
//! `LogMailer` is the default for local development and logs instead of
//! sending. Real transports implement `Mailer` and are wired in at startup.

use async_trait::async_trait;
use tracing::info;

/// A fully composed outbound message.
#[derive(Debug, Clone)]
pub struct Mail {
    pub to: String,
    pub subject: String,
    pub text: String,
}

/// Compose the magic-link login email. The plaintext token only ever leaves
/// the process inside this message.
pub fn magic_link_mail(frontend_url: &str, to: &str, token: &str) -> Mail {
    let link = format!("{frontend_url}/auth/magic?token={token}");
    Mail {
        to: to.to_string(),
        subject: "Your Zicket Magic Link".to_string(),
        text: format!(
            "You requested a magic link to log in to your Zicket account.\n\n\
             Click or copy this link to log in:\n{link}\n\n\
             This link expires in 15 minutes and can only be used once.\n\
             If you didn't request this, please ignore this email."
        ),
    }
}

/// Compose the OTP resend email.
pub fn otp_mail(to: &str, code: i32) -> Mail {
    Mail {
        to: to.to_string(),
        subject: "Your Zicket Verification Code".to_string(),
        text: format!(
            "Your verification code is {code:06}.\n\n\
             It expires in 10 minutes. If you didn't request this, please \
             ignore this email."
        ),
    }
}

/// Email delivery abstraction. An `Err` means the message was NOT delivered
/// and the caller must roll back any credential state that depends on it.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: Mail) -> anyhow::Result<()>;
}

/// Local dev mailer that logs the message instead of sending it.
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, mail: Mail) -> anyhow::Result<()> {
        info!(to = %mail.to, subject = %mail.subject, body = %mail.text, "email send stub");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_link_mail_embeds_token_in_link() {
        let mail = magic_link_mail("https://app.example.com", "a@x.com", "abc123");
        assert_eq!(mail.to, "a@x.com");
        assert!(mail
            .text
            .contains("https://app.example.com/auth/magic?token=abc123"));
    }

    #[test]
    fn otp_mail_zero_pads_code() {
        let mail = otp_mail("a@x.com", 42);
        assert!(mail.text.contains("000042"));
    }

    #[tokio::test]
    async fn log_mailer_accepts_mail() {
        let mailer = LogMailer;
        mailer
            .send(magic_link_mail("http://localhost", "a@x.com", "t"))
            .await
            .expect("log mailer never fails");
    }
}
