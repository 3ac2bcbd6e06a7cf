use fanout_core::SyncStatus;
use hyper::{Body, Method, Request, Response, StatusCode};
use std::net::SocketAddr;
use tokio::sync::watch;
use tracing::{info, instrument};

/// Serves the HTTP admin surface.
///
/// `GET /ready` reports the cache's sync status: 200 while the view is
/// in-sync, 503 naming the current status while it is not, so a load
/// balancer doesn't route peers at a hub that would hand them an
/// incomplete snapshot.
#[instrument(skip(status))]
pub async fn serve(
    addr: SocketAddr,
    status: watch::Receiver<SyncStatus>,
) -> Result<(), hyper::Error> {
    let make = hyper::service::make_service_fn(move |_conn| {
        let status = status.clone();
        async move {
            Ok::<_, hyper::Error>(hyper::service::service_fn(move |req: Request<Body>| {
                let status = *status.borrow();
                async move { Ok::<_, hyper::Error>(handle(req, status)) }
            }))
        }
    });
    let server = hyper::server::Server::bind(&addr).serve(make);
    info!(addr = %server.local_addr(), "HTTP admin server listening");
    server.await
}

fn handle(req: Request<Body>, status: SyncStatus) -> Response<Body> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/ready") | (&Method::HEAD, "/ready") => ready_response(status),
        (_, "/ready") => response(StatusCode::METHOD_NOT_ALLOWED, Body::default()),
        _ => response(StatusCode::NOT_FOUND, Body::default()),
    }
}

fn ready_response(status: SyncStatus) -> Response<Body> {
    let code = match status {
        SyncStatus::InSync => StatusCode::OK,
        SyncStatus::WaitForDatastore | SyncStatus::Resync => StatusCode::SERVICE_UNAVAILABLE,
    };
    let mut rsp = response(code, format!("{}\n", status).into());
    rsp.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("text/plain"),
    );
    rsp
}

fn response(code: StatusCode, body: Body) -> Response<Body> {
    Response::builder().status(code).body(body).unwrap()
}
