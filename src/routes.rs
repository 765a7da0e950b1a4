use std::convert::Infallible;
use std::sync::Arc;

use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::server::Server;
use crate::store::Store;

#[derive(Debug, Deserialize)]
pub struct SnapshotIn {
    pub image_data: String,
}

#[derive(Debug, Serialize)]
struct SaveResponse {
    message: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    detail: String,
}

/// Every HTTP and WebSocket endpoint of the relay, with CORS and request
/// logging applied.
pub fn routes(
    server: Server,
    max_snapshot_bytes: u64,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let cors = warp::cors()
        .allow_any_origin()
        .allow_methods(vec!["GET", "POST", "OPTIONS"])
        .allow_headers(vec!["content-type"]);

    let store = server.store().clone();

    ws_route(server)
        .or(save_route(store, max_snapshot_bytes))
        .with(cors)
        .with(warp::log("whiteboard_relay::http"))
}

/// `GET /ws/{room_id}`: upgrades to a WebSocket session in that room.
pub fn ws_route(server: Server) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("ws" / String)
        .and(warp::ws())
        .map(move |room_id: String, ws: warp::ws::Ws| {
            let server = server.clone();
            ws.on_upgrade(move |socket| async move {
                server.handle_connection(room_id, socket).await;
            })
        })
}

/// `POST /save/{room_id}` with `{"image_data": ...}`: stores the room's canvas.
pub fn save_route(
    store: Arc<dyn Store>,
    max_snapshot_bytes: u64,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::post()
        .and(warp::path!("save" / String))
        .and(warp::body::content_length_limit(max_snapshot_bytes))
        .and(warp::body::json())
        .and(warp::any().map(move || store.clone()))
        .and_then(save_snapshot)
}

async fn save_snapshot(
    room_id: String,
    snapshot: SnapshotIn,
    store: Arc<dyn Store>,
) -> Result<impl Reply, Infallible> {
    info!("Saving snapshot for room {room_id}");
    debug!(
        "Snapshot data starts with {}",
        snapshot.image_data.chars().take(50).collect::<String>()
    );

    let (body, status) = match store.upsert_snapshot(&room_id, &snapshot.image_data).await {
        Ok(()) => (
            warp::reply::json(&SaveResponse {
                message: "Whiteboard state saved successfully.".to_string(),
            }),
            StatusCode::OK,
        ),
        Err(e) => {
            error!("Failed to save snapshot for room {room_id}: {e}");
            (
                warp::reply::json(&ErrorResponse {
                    detail: e.to_string(),
                }),
                StatusCode::INTERNAL_SERVER_ERROR,
            )
        }
    };

    Ok(warp::reply::with_status(body, status))
}
