//! System email service for account confirmation and password reset emails.
//!
//! Uses the SMTP settings from the `[email]` config section. When SMTP is not
//! configured the email is skipped and the link is only written to the debug log.

use anyhow::Result;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use crate::config::EmailConfig;

/// Service for sending system emails
#[derive(Debug, Clone)]
pub struct SystemEmailService {
    config: EmailConfig,
    public_url: String,
}

/// A rendered email ready to send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
}

impl SystemEmailService {
    pub fn new(config: EmailConfig, public_url: impl Into<String>) -> Self {
        Self {
            config,
            public_url: public_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Check if email sending is configured and enabled
    pub fn is_enabled(&self) -> bool {
        self.config.is_configured()
    }

    pub fn confirmation_url(&self, token: &str) -> String {
        format!("{}/verify-email?token={}", self.public_url, token)
    }

    pub fn reset_url(&self, token: &str) -> String {
        format!("{}/reset-password?token={}", self.public_url, token)
    }

    pub async fn send_confirmation_email(
        &self,
        to_email: &str,
        first_name: &str,
        token: &str,
        expires_in_hours: i64,
    ) -> Result<()> {
        let link = self.confirmation_url(token);
        if !self.is_enabled() {
            tracing::warn!(to = %to_email, "Email not configured, skipping confirmation email");
            tracing::debug!(link = %link, "Confirmation link");
            return Ok(());
        }

        let email = render_confirmation(first_name, &link, expires_in_hours);
        self.send_email(to_email, &email).await
    }

    pub async fn send_password_reset_email(
        &self,
        to_email: &str,
        token: &str,
        expires_in_minutes: i64,
    ) -> Result<()> {
        let link = self.reset_url(token);
        if !self.is_enabled() {
            tracing::warn!(to = %to_email, "Email not configured, skipping password reset email");
            tracing::debug!(link = %link, "Password reset link");
            return Ok(());
        }

        let email = render_password_reset(&link, expires_in_minutes);
        self.send_email(to_email, &email).await
    }

    /// Send an email with HTML and plain text versions
    async fn send_email(&self, to_email: &str, email: &RenderedEmail) -> Result<()> {
        let smtp_host = self
            .config
            .smtp_host
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("SMTP host not configured"))?;
        let from_address = self
            .config
            .from_address
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("From address not configured"))?;

        let from: Mailbox = format!("{} <{}>", self.config.from_name, from_address).parse()?;
        let to: Mailbox = to_email.parse()?;

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(email.subject.as_str())
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(email.text_body.clone()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(email.html_body.clone()),
                    ),
            )?;

        let mailer = if self.config.smtp_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(smtp_host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(smtp_host)
        }
        .port(self.config.smtp_port);

        let mailer = if let (Some(username), Some(password)) =
            (&self.config.smtp_username, &self.config.smtp_password)
        {
            mailer.credentials(Credentials::new(username.clone(), password.clone()))
        } else {
            mailer
        };

        mailer.build().send(message).await?;

        tracing::info!(to = %to_email, subject = %email.subject, "Email sent successfully");
        Ok(())
    }
}

fn render_confirmation(first_name: &str, link: &str, expires_in_hours: i64) -> RenderedEmail {
    let name = html_escape(first_name);
    let html_link = html_escape(link);
    RenderedEmail {
        subject: "Confirmez votre adresse email - Pinsart Déco".to_string(),
        html_body: format!(
            r#"<!DOCTYPE html>
<html>
<body style="font-family: Arial, sans-serif; color: #1f2937;">
  <h2>Bienvenue {name} !</h2>
  <p>Merci de votre inscription sur Pinsart Déco. Confirmez votre adresse email pour accéder à votre espace :</p>
  <p><a href="{html_link}" style="background:#b45309;color:#fff;padding:10px 18px;border-radius:6px;text-decoration:none;">Confirmer mon email</a></p>
  <p style="font-size:12px;color:#6b7280;">Ce lien expire dans {expires_in_hours} heures.</p>
</body>
</html>"#
        ),
        text_body: format!(
            "Bienvenue {first_name} !\n\nConfirmez votre adresse email pour accéder à votre espace :\n{link}\n\nCe lien expire dans {expires_in_hours} heures.\n"
        ),
    }
}

fn render_password_reset(link: &str, expires_in_minutes: i64) -> RenderedEmail {
    let html_link = html_escape(link);
    RenderedEmail {
        subject: "Réinitialisation de votre mot de passe - Pinsart Déco".to_string(),
        html_body: format!(
            r#"<!DOCTYPE html>
<html>
<body style="font-family: Arial, sans-serif; color: #1f2937;">
  <h2>Réinitialisation du mot de passe</h2>
  <p>Vous avez demandé à réinitialiser votre mot de passe :</p>
  <p><a href="{html_link}" style="background:#b45309;color:#fff;padding:10px 18px;border-radius:6px;text-decoration:none;">Choisir un nouveau mot de passe</a></p>
  <p style="font-size:12px;color:#6b7280;">Ce lien expire dans {expires_in_minutes} minutes. Si vous n'êtes pas à l'origine de cette demande, ignorez cet email.</p>
</body>
</html>"#
        ),
        text_body: format!(
            "Vous avez demandé à réinitialiser votre mot de passe :\n{link}\n\nCe lien expire dans {expires_in_minutes} minutes. Si vous n'êtes pas à l'origine de cette demande, ignorez cet email.\n"
        ),
    }
}

/// Escape HTML special characters
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
