use hyper::{
    service::{make_service_fn, service_fn},
    Body, Method, Request, Response, Server, StatusCode,
};
use lazy_static::lazy_static;
use prometheus::{register_int_gauge_with_registry, Encoder, IntGauge, TextEncoder};
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use synchronizer::metrics::{LAST_PROCESSED_BLOCK, SYNCHRONIZER_REGISTRY, SYNC_STATE};
use synchronizer::SyncState;

pub const DEFAULT_PORT: u16 = 9001;

lazy_static! {
    pub static ref PROCESS_START_TIME: IntGauge = register_int_gauge_with_registry!(
        "process_start_time_seconds",
        "Unix time the node was started",
        SYNCHRONIZER_REGISTRY
    )
    .unwrap();
}

fn sync_state() -> &'static str {
    u8::try_from(SYNC_STATE.get())
        .ok()
        .and_then(SyncState::from_u8)
        .map_or("unknown", |state| state.as_str())
}

async fn handle_request(req: Request<Body>) -> Result<Response<Body>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            // Gather the metrics from both the `dac` registry and the default registry
            let mut metric_families = SYNCHRONIZER_REGISTRY.gather();
            metric_families.extend(prometheus::gather());

            let encoder = TextEncoder::new();
            let mut buffer = Vec::new();
            match encoder.encode(&metric_families, &mut buffer) {
                Ok(()) => Response::builder()
                    .status(StatusCode::OK)
                    .header(hyper::header::CONTENT_TYPE, encoder.format_type())
                    .body(Body::from(buffer)),
                Err(err) => {
                    tracing::error!("Failed to encode metrics: {err}");
                    Response::builder()
                        .status(StatusCode::INTERNAL_SERVER_ERROR)
                        .body(Body::empty())
                }
            }
        }
        (&Method::GET, "/health") => {
            let health_status = json!({
                "status": "healthy",
                "timestamp": std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs(),
                "version": env!("CARGO_PKG_VERSION"),
                "sync_state": sync_state(),
                "last_processed_block": LAST_PROCESSED_BLOCK.get(),
            });

            Response::builder()
                .status(StatusCode::OK)
                .header(hyper::header::CONTENT_TYPE, "application/json")
                .body(Body::from(health_status.to_string()))
        }
        (&Method::GET, "/ready") => {
            // ready once the loop is running
            let ready = SYNC_STATE.get() != SyncState::Idle as i64
                && SYNC_STATE.get() != SyncState::Stopped as i64;
            let status = if ready {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            Response::builder()
                .status(status)
                .body(Body::from(if ready { "ready" } else { "not ready" }))
        }
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::from("Not Found")),
    };

    Ok(response.unwrap_or_else(|_| {
        let mut error = Response::new(Body::empty());
        *error.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        error
    }))
}

pub async fn start_server(port_number: Option<u16>) {
    let port = port_number.unwrap_or(DEFAULT_PORT);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let make_svc =
        make_service_fn(|_conn| async { Ok::<_, Infallible>(service_fn(handle_request)) });

    let server = match Server::try_bind(&addr) {
        Ok(builder) => builder.serve(make_svc),
        Err(err) => {
            tracing::error!("Failed to bind metrics server to {addr}: {err}");
            return;
        }
    };

    PROCESS_START_TIME.set(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64,
    );

    tokio::spawn(async move {
        tracing::info!("Starting metrics server on {}", addr);

        if let Err(e) = server.await {
            tracing::error!("Metrics server error: {}", e);
        }
    });
}
