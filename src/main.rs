use std::sync::Arc;

use clap::Parser;
use log::{error, info};
use whiteboard_relay::config::Config;
use whiteboard_relay::routes::routes;
use whiteboard_relay::server::Server;
use whiteboard_relay::store::SqliteStore;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::parse();

    let store = match SqliteStore::connect(&config.database_url).await {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to open store at {}: {}", config.database_url, e);
            std::process::exit(1);
        }
    };
    info!("Store ready at {}", config.database_url);

    let server = Server::new(Arc::new(store));
    let routes = routes(server, config.max_snapshot_bytes);

    match config.tls_paths() {
        Some((cert, key)) => {
            info!("Starting secure server (HTTPS/WSS) on {}...", config.addr);
            warp::serve(routes)
                .tls()
                .cert_path(cert)
                .key_path(key)
                .run(config.addr)
                .await;
        }
        None => {
            info!("Starting server (HTTP/WS) on {}...", config.addr);
            warp::serve(routes).run(config.addr).await;
        }
    }
}
