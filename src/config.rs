use std::env;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{0} has an invalid value: {1}")]
    Invalid(&'static str, String),
}

#[derive(Clone, Debug)]
pub struct CloudinaryConfig {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
}

#[derive(Clone, Debug)]
pub struct MailConfig {
    pub api_url: String,
    pub api_key: String,
    pub from: String,
    /// Deep link the reset token is appended to, e.g. `finderapp://reset-password`.
    pub reset_link_base: String,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub mongo_uri: String,
    pub database_name: String,
    pub jwt_secret: String,
    pub port: u16,
    pub frontend_origin: Option<String>,
    pub cloudinary: CloudinaryConfig,
    pub mail: MailConfig,
    pub geocoder_url: String,
    pub geocoder_user_agent: String,
    pub keepalive_url: Option<String>,
    pub use_transactions: bool,
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::Missing(key)),
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let port = match optional("PORT") {
            Some(p) => p
                .parse()
                .map_err(|_| ConfigError::Invalid("PORT", p.clone()))?,
            None => 3000,
        };
        let use_transactions = match optional("MONGO_TRANSACTIONS") {
            Some(v) => v
                .parse()
                .map_err(|_| ConfigError::Invalid("MONGO_TRANSACTIONS", v.clone()))?,
            None => false,
        };

        Ok(Self {
            mongo_uri: required("MONGO_URI")?,
            database_name: optional("DATABASE_NAME").unwrap_or_else(|| "finder".to_string()),
            jwt_secret: required("JWT_SECRET")?,
            port,
            frontend_origin: optional("FRONTEND_ORIGIN"),
            cloudinary: CloudinaryConfig {
                cloud_name: required("CLOUDINARY_CLOUD_NAME")?,
                api_key: required("CLOUDINARY_API_KEY")?,
                api_secret: required("CLOUDINARY_API_SECRET")?,
            },
            mail: MailConfig {
                api_url: optional("MAIL_API_URL")
                    .unwrap_or_else(|| "https://api.sendgrid.com/v3/mail/send".to_string()),
                api_key: required("MAIL_API_KEY")?,
                from: required("MAIL_FROM")?,
                reset_link_base: optional("RESET_LINK_BASE")
                    .unwrap_or_else(|| "finderapp://reset-password".to_string()),
            },
            geocoder_url: optional("GEOCODER_URL")
                .unwrap_or_else(|| "https://nominatim.openstreetmap.org/search".to_string()),
            geocoder_user_agent: optional("GEOCODER_USER_AGENT")
                .unwrap_or_else(|| "FinderApp/1.0".to_string()),
            keepalive_url: optional("KEEPALIVE_URL"),
            use_transactions,
        })
    }
}
