use std::time::Duration;

use log::{info, warn};

/// Hosting platforms put idle instances to sleep after 15 minutes.
pub const PING_INTERVAL: Duration = Duration::from_secs(14 * 60);

/// Periodically GETs `url` so the hosting platform keeps the instance awake.
pub fn spawn(client: reqwest::Client, url: String) {
    info!("Keep-alive pinger targeting {} every {:?}", url, PING_INTERVAL);
    actix_web::rt::spawn(async move {
        let mut ticker = tokio::time::interval(PING_INTERVAL);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match client.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => info!("Keep-alive ping ok"),
                Ok(resp) => warn!("Keep-alive ping answered {}", resp.status()),
                Err(e) => warn!("Keep-alive ping failed: {}", e),
            }
        }
    });
}
