use log::{error, info};
use std::fs;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use actix_web::{App, HttpServer, web};

use sysgpio::{AppConfig, AppError, AppState, PulseCounterService};

#[actix_web::main]
async fn main() -> ExitCode {
    env_logger::init();

    match run().await {
        Ok(()) => {
            info!("shut down cleanly");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e}");
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), AppError> {
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("SYSGPIO_CONFIG").ok())
        .unwrap_or_else(|| "config.json".to_string());
    let config = AppConfig::load_from_file(&config_path)?;

    let service = Arc::new(PulseCounterService::start(&config)?);
    let app_state = AppState {
        service: service.clone(),
    };

    let http_cfg = config.http.clone();
    let server = HttpServer::new(move || {
        let scope_path = http_cfg.path.clone();
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .service(app_state.api_scope(&scope_path))
    });

    let http_cfg = config.http.clone();
    let bound = (move || -> Result<_, AppError> {
        match (&http_cfg.unix_socket, &http_cfg.host) {
            (Some(socket_path), Some(host)) => {
                if Path::new(socket_path).exists() {
                    fs::remove_file(socket_path)?;
                }
                let server = server.bind_uds(socket_path)?.bind_auto_h2c(host)?;
                Ok((server, format!("{} and {}", socket_path, host)))
            }
            (Some(socket_path), None) => {
                if Path::new(socket_path).exists() {
                    fs::remove_file(socket_path)?;
                }
                Ok((server.bind_uds(socket_path)?, socket_path.clone()))
            }
            (None, Some(host)) => Ok((server.bind_auto_h2c(host)?, host.clone())),
            // rejected by AppConfig::validate
            (None, None) => Err(AppError::Config(
                "either 'unix_socket' or 'host' must be specified".into(),
            )),
        }
    })();
    let (server, bind_addrs) = match bound {
        Ok(bound) => bound,
        Err(e) => {
            service.stop();
            return Err(e);
        }
    };

    info!("Starting server on {}...", bind_addrs);

    let server = server.run();
    let server_handle = server.handle();
    let mut monitor = {
        let service = service.clone();
        tokio::task::spawn_blocking(move || service.wait())
    };

    let outcome = tokio::select! {
        served = server => {
            service.stop();
            let finished = (&mut monitor).await;
            served?;
            finished
        }
        finished = &mut monitor => {
            error!("pin monitor ended, stopping server");
            server_handle.stop(true).await;
            finished
        }
    };

    outcome.map_err(|e| AppError::InvalidState(format!("monitor task failed: {e}")))?
}
