//! Boundary adapter: a thin hyper 1.x server loop feeding the engine.
//!
//! Hyper owns the wire; this module only converts between hyper's request
//! and response types and the engine's records, and handles graceful
//! shutdown. Enabled by the `server` feature.

use std::net::SocketAddr;

use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::app::Engine;
use crate::http::{ConnectionInfo, HttpRequest, HttpResponse};

/// Bind `addr` and serve requests until Ctrl-C (or SIGTERM on Unix).
pub async fn serve(engine: Engine, addr: &str) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    info!(%local, "hostel listening");

    loop {
        tokio::select! {
            _ = shutdown_signal() => break,
            accepted = listener.accept() => {
                let (stream, remote) = accepted?;
                let engine = engine.clone();
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let service = service_fn(move |request| {
                        let engine = engine.clone();
                        async move {
                            handle_connection(engine, request, remote, local.port()).await
                        }
                    });
                    if let Err(err) = hyper::server::conn::http1::Builder::new()
                        .serve_connection(io, service)
                        .await
                    {
                        error!(%err, "connection error");
                    }
                });
            }
        }
    }

    engine.shutdown();
    info!("hostel stopped");
    Ok(())
}

async fn handle_connection(
    engine: Engine,
    request: hyper::Request<Incoming>,
    remote: SocketAddr,
    local_port: u16,
) -> Result<hyper::Response<Full<bytes::Bytes>>, std::convert::Infallible> {
    let (parts, body) = request.into_parts();
    let body = body.collect().await.map(|b| b.to_bytes()).unwrap_or_default();

    let host = parts
        .headers
        .get(http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let mut builder = HttpRequest::builder()
        .method(parts.method)
        .path(
            parts
                .uri
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or("/"),
        )
        .connection(ConnectionInfo {
            remote_addr: Some(remote),
            secure: false,
            local_port,
            host,
        });
    for (name, value) in parts.headers.iter() {
        if let Ok(text) = value.to_str() {
            builder = builder.header(name.as_str(), text);
        }
    }
    if !body.is_empty() {
        builder = builder.body(body);
    }

    let response = engine.handle(builder.build()).await;
    Ok(into_hyper(response))
}

fn into_hyper(response: HttpResponse) -> hyper::Response<Full<bytes::Bytes>> {
    let mut out = hyper::Response::builder().status(response.status);
    if let Some(headers) = out.headers_mut() {
        *headers = response.headers.clone();
    }
    out.body(Full::new(response.body))
        .unwrap_or_else(|_| hyper::Response::new(Full::new(bytes::Bytes::new())))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut signal) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            signal.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
