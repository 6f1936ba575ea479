use crate::db::VehicleRegistry;
use crate::decode::RawImage;
use crate::pipeline::{self, Flows, ScanFlow};
use crate::recognition::TextRecognizer;
use bytes::Buf;
use futures::StreamExt;
use log::{debug, error, info, warn};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Reply};

const MAX_UPLOAD_BYTES: u64 = 20 * 1024 * 1024;

/// Everything a request handler needs. The recognizer is the process-wide
/// engine, so it is borrowed for `'static`.
pub struct AppState {
    pub recognizer: &'static dyn TextRecognizer,
    pub registry: Arc<dyn VehicleRegistry>,
    pub flows: Flows,
}

#[derive(Debug, Deserialize)]
struct ScanQuery {
    flow: Option<String>,
}

struct Upload {
    bytes: Vec<u8>,
    mime: Option<String>,
}

pub async fn run(addr: SocketAddr, state: Arc<AppState>) {
    info!("Listening on {}", addr);
    warp::serve(routes(state)).run(addr).await;
}

pub fn routes(
    state: Arc<AppState>,
) -> impl Filter<Extract = (Response,), Error = warp::Rejection> + Clone {
    warp::post()
        .and(warp::path!("scan-plate"))
        .and(warp::query::<ScanQuery>())
        .and(warp::multipart::form().max_length(MAX_UPLOAD_BYTES))
        .and(warp::any().map(move || state.clone()))
        .and_then(handle_scan)
}

async fn handle_scan(
    query: ScanQuery,
    form: warp::multipart::FormData,
    state: Arc<AppState>,
) -> Result<Response, Infallible> {
    let flow = match query.flow.as_deref().map(str::parse::<ScanFlow>).transpose() {
        Ok(flow) => flow.unwrap_or_default(),
        Err(e) => {
            warn!("Rejected scan request: {}", e);
            return Ok(error_reply(StatusCode::BAD_REQUEST, &e.to_string()));
        }
    };
    let upload = match read_image_part(form).await {
        Ok(Some(upload)) => upload,
        Ok(None) => return Ok(error_reply(StatusCode::BAD_REQUEST, "No image provided")),
        Err(e) => {
            warn!("Failed to read upload: {}", e);
            return Ok(error_reply(StatusCode::BAD_REQUEST, "Malformed upload"));
        }
    };
    debug!(
        "Received {} byte image ({:?}) for {:?} scan",
        upload.bytes.len(),
        upload.mime,
        flow
    );

    // Decoding and inference are CPU-bound; keep them off the reactor.
    let result = tokio::task::spawn_blocking(move || {
        let raw = RawImage::with_mime_type(&upload.bytes, upload.mime.as_deref());
        pipeline::scan(
            &raw,
            state.recognizer,
            state.registry.as_ref(),
            state.flows.settings(flow),
        )
    })
    .await;

    Ok(match result {
        Ok(Ok(scan)) => warp::reply::json(&scan).into_response(),
        Ok(Err(e)) if e.is_client_error() => {
            warn!("Rejected upload: {}", e);
            error_reply(StatusCode::BAD_REQUEST, &e.to_string())
        }
        Ok(Err(e)) => {
            error!("Error scanning plate: {}", e);
            error_reply(StatusCode::INTERNAL_SERVER_ERROR, "Failed to process image")
        }
        Err(e) => {
            error!("Scan task failed: {}", e);
            error_reply(StatusCode::INTERNAL_SERVER_ERROR, "Failed to process image")
        }
    })
}

/// Collects the `image` part. Other parts are ignored.
async fn read_image_part(
    mut form: warp::multipart::FormData,
) -> Result<Option<Upload>, warp::Error> {
    let mut upload = None;
    while let Some(part) = form.next().await {
        let part = part?;
        match part.name() {
            "image" => {
                let mime = part.content_type().map(str::to_string);
                let mut bytes: Vec<u8> = vec![];
                let mut stream = part.stream();
                while let Some(buf) = stream.next().await {
                    bytes.extend_from_slice(buf?.chunk());
                }
                upload = Some(Upload { bytes, mime });
            }
            name => warn!("Ignoring part {}", name),
        }
    }
    Ok(upload)
}

fn error_reply(status: StatusCode, message: &str) -> Response {
    warp::reply::with_status(warp::reply::json(&json!({ "error": message })), status)
        .into_response()
}
