// src/main.rs

use std::io;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{http, middleware::Logger, web, App, HttpServer};
use env_logger::Env;
use log::{error, info};

use finder_api::app_state::AppState;
use finder_api::config::Config;
use finder_api::db::MongoDB;
use finder_api::keepalive;
use finder_api::middleware::Authentication;

fn startup_error(context: &str, e: impl std::fmt::Display) -> io::Error {
    error!("{}: {}", context, e);
    io::Error::new(io::ErrorKind::Other, format!("{}: {}", context, e))
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = Config::from_env().map_err(|e| startup_error("Invalid configuration", e))?;

    let mongodb = MongoDB::init(&config.mongo_uri, &config.database_name)
        .await
        .map_err(|e| startup_error("Error configuring database client", e))?;
    mongodb
        .ping()
        .await
        .map_err(|e| startup_error("Error connecting to database", e))?;
    info!("Database connected: {}", config.database_name);
    mongodb
        .ensure_indexes()
        .await
        .map_err(|e| startup_error("Error creating indexes", e))?;

    let state = AppState::new(Arc::new(mongodb), config.clone());
    if let Some(url) = &config.keepalive_url {
        keepalive::spawn(state.http_client.clone(), url.clone());
    }

    let frontend_origin = config.frontend_origin.clone();
    info!("Server running on port {}", config.port);
    match &frontend_origin {
        Some(origin) => info!("Allowed CORS origin: {}", origin),
        None => info!("Allowed CORS origin: any"),
    }

    HttpServer::new(move || {
        let cors = match &frontend_origin {
            Some(origin) => Cors::default().allowed_origin(origin),
            None => Cors::default().allow_any_origin(),
        }
        .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
        .allowed_headers(vec![
            http::header::CONTENT_TYPE,
            http::header::ACCEPT,
            http::header::AUTHORIZATION,
        ])
        .max_age(3600);

        App::new()
            .wrap(Authentication)
            .wrap(cors)
            .wrap(Logger::default())
            .app_data(web::Data::new(state.clone()))
            .configure(finder_api::configure)
    })
    .bind(("0.0.0.0", config.port))?
    .run()
    .await
}
