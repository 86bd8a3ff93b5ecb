use actix_web::{web, App, HttpServer};
use anyhow::Result;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod http;

use config::Config;
use rollcall_core::EncodingStore;
use rollcall_vision::OnnxVision;

#[actix_web::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();
    tracing::info!(
        device = %config.camera_device,
        faces_dir = %config.registered_faces_dir.display(),
        attendance = %config.attendance_file.display(),
        tolerance = config.tolerance,
        "rollcalld starting"
    );

    let vision = OnnxVision::load(
        &config.detector_model_path(),
        &config.encoder_model_path(),
    )?;

    let engine = engine::spawn_engine(&config, Box::new(vision))?;
    let store = EncodingStore::open(&config.registered_faces_dir)?;
    let state = web::Data::new(http::AppState { engine, store });

    tracing::info!(addr = %config.bind_addr, "rollcalld ready");

    HttpServer::new(move || App::new().app_data(state.clone()).configure(http::configure))
        .bind(config.bind_addr.as_str())?
        .run()
        .await?;

    tracing::info!("rollcalld shutting down");
    Ok(())
}
