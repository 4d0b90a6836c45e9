use std::sync::Arc;

use crate::config::Config;
use crate::db::MongoDB;
use crate::geocode::Geocoder;
use crate::mailer::Mailer;
use crate::media::MediaHost;

/// Process-scoped handles shared by every request.
#[derive(Clone)]
pub struct AppState {
    pub mongodb: Arc<MongoDB>,
    pub config: Config,
    pub http_client: reqwest::Client,
    pub geocoder: Geocoder,
    pub media: MediaHost,
    pub mailer: Mailer,
}

impl AppState {
    pub fn new(mongodb: Arc<MongoDB>, config: Config) -> Self {
        let http_client = reqwest::Client::new();
        AppState {
            geocoder: Geocoder::new(
                http_client.clone(),
                config.geocoder_url.clone(),
                config.geocoder_user_agent.clone(),
            ),
            media: MediaHost::new(http_client.clone(), config.cloudinary.clone()),
            mailer: Mailer::new(http_client.clone(), config.mail.clone()),
            http_client,
            mongodb,
            config,
        }
    }
}
