use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::engine::ConsumerEngine;

/// Minimal HTTP surface exposing `/healthz` and `/stats`: a manual
/// `service_fn` routing loop, no web framework.
pub async fn serve(bind_address: &str, engine: Arc<ConsumerEngine>) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind_address).await?;
    info!(%bind_address, "health/stats server listening");

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let engine = Arc::clone(&engine);

        tokio::spawn(async move {
            let service = service_fn(move |req| handle(req, Arc::clone(&engine)));
            if let Err(e) = hyper::server::conn::http1::Builder::new()
                .serve_connection(io, service)
                .await
            {
                error!(error = %e, "health connection error");
            }
        });
    }
}

async fn handle(
    req: Request<hyper::body::Incoming>,
    engine: Arc<ConsumerEngine>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/healthz") => Response::new(Full::new(Bytes::from_static(b"ok"))),
        (&Method::GET, "/stats") => {
            let snapshot = engine.get_stats();
            match serde_json::to_vec(&snapshot) {
                Ok(body) => Response::builder()
                    .header("content-type", "application/json")
                    .body(Full::new(Bytes::from(body)))
                    .unwrap(),
                Err(e) => {
                    error!(error = %e, "failed to serialize stats");
                    Response::builder()
                        .status(StatusCode::INTERNAL_SERVER_ERROR)
                        .body(Full::new(Bytes::from_static(b"serialization error")))
                        .unwrap()
                }
            }
        }
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from_static(b"not found")))
            .unwrap(),
    };
    Ok(response)
}
