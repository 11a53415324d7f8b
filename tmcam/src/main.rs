//! Serve the classifier page.
//!
use std::{net::SocketAddr, sync::Arc};

use anyhow::Result;
use clap::Parser;
use env_logger::TimestampPrecision;
use tmcam::{
    config::Args, controller::RunLoopController, endpoints::app, meter::spawn_meter_logger,
    nn::RemoteModelLoader, sensors::V4lCameras,
};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logger
    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let loader = RemoteModelLoader::new(args.model_source(), args.cache_dir());
    let controller = Arc::new(RunLoopController::new(loader, V4lCameras, args.settings()));

    spawn_meter_logger();

    // Serve HTTP server
    let addr: SocketAddr = args.server_address.parse()?;
    log::info!("Serving on http://{addr}");
    axum::Server::bind(&addr)
        .serve(app(controller).into_make_service())
        .await?;

    Ok(())
}
