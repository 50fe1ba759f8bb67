use actix_cors::Cors;
use actix_web::{App, HttpServer};
use predict_backend::{AppConfig, AppState, configure_routes};
use std::env;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    if let Ok(current_dir) = env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    } else {
        log::error!("Failed to get the current working directory.");
    }

    let config = AppConfig::load().map_err(|e| {
        log::error!("Failed to load configuration: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
    })?;

    let state = AppState::from_config(&config);
    if let Err(e) = state.namer.ensure_dir().await {
        log::error!("{}", e);
        return Err(std::io::Error::other(e.to_string()));
    }

    log::info!(
        "Analyzer: {} {} <image> (cwd {})",
        config.analyzer.command,
        config.analyzer.args.join(" "),
        config.analyzer_base_dir().display()
    );
    match config.analyzer.max_concurrent {
        Some(limit) => log::info!("At most {} analyses run at once", limit),
        None => log::info!("Concurrent analyses are unbounded"),
    }
    log::info!("Staging uploads in {}", state.namer.dir().display());
    log::info!(
        "Serving /{} from {}",
        config.serving_prefix(),
        config.artifact_root().display()
    );
    if state.settings.staging_is_served() {
        log::warn!(
            "Upload directory {} lies inside the artifact root; staged uploads are never served",
            state.namer.dir().display()
        );
    }

    let bind_address = config.bind_address();
    let cors_origin = config.cors_allowed_origin.clone();

    log::info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        let cors = match &cors_origin {
            Some(origin) => Cors::default().allowed_origin(origin),
            None => Cors::default().allow_any_origin(),
        }
        .allowed_methods(vec!["GET", "POST", "OPTIONS"])
        .allowed_headers(vec![
            actix_web::http::header::ACCEPT,
            actix_web::http::header::CONTENT_TYPE,
        ])
        .max_age(3600);

        App::new()
            .wrap(cors)
            .configure(|cfg| configure_routes(cfg, &state))
    })
    .bind(&bind_address)?
    .run()
    .await
}
