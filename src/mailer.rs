use log::info;
use serde_json::json;
use thiserror::Error;

use crate::config::MailConfig;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("mail provider answered {0}")]
    Rejected(reqwest::StatusCode),
}

/// Outbound mail through an HTTP API with a SendGrid v3 compatible body.
#[derive(Clone)]
pub struct Mailer {
    client: reqwest::Client,
    config: MailConfig,
}

impl Mailer {
    pub fn new(client: reqwest::Client, config: MailConfig) -> Self {
        Mailer { client, config }
    }

    pub fn reset_link(&self, token: &str) -> String {
        let sep = if self.config.reset_link_base.contains('?') {
            '&'
        } else {
            '?'
        };
        format!("{}{}token={}", self.config.reset_link_base, sep, token)
    }

    pub async fn send(&self, to: &str, subject: &str, text: &str) -> Result<(), MailError> {
        let body = json!({
            "personalizations": [{ "to": [{ "email": to }] }],
            "from": { "email": self.config.from },
            "subject": subject,
            "content": [{ "type": "text/plain", "value": text }],
        });
        let resp = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(MailError::Rejected(resp.status()));
        }
        info!("Mail {:?} dispatched to {}", subject, to);
        Ok(())
    }

    pub async fn send_password_reset(&self, to: &str, token: &str) -> Result<(), MailError> {
        let text = format!(
            "You requested a password reset.\n\n\
             Open this link on your phone to choose a new password:\n{}\n\n\
             The link expires in 30 minutes. If you did not ask for this, ignore this email.",
            self.reset_link(token)
        );
        self.send(to, "Password reset", &text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mailer(base: &str) -> Mailer {
        Mailer::new(
            reqwest::Client::new(),
            MailConfig {
                api_url: "http://127.0.0.1:9/send".into(),
                api_key: "key".into(),
                from: "noreply@finder.app".into(),
                reset_link_base: base.into(),
            },
        )
    }

    #[test]
    fn reset_link_embeds_token() {
        assert_eq!(
            mailer("finderapp://reset-password").reset_link("abc"),
            "finderapp://reset-password?token=abc"
        );
        assert_eq!(
            mailer("https://finder.app/reset?lang=fr").reset_link("abc"),
            "https://finder.app/reset?lang=fr&token=abc"
        );
    }
}
