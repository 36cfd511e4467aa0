use std::net::{Ipv6Addr, SocketAddr, TcpListener};

use actix_web::dev::Server;
use actix_web::{App, HttpResponse, HttpServer, Responder, get, web};
use metrics_exporter_prometheus::PrometheusHandle;
use tracing::info;
use tracing_actix_web::TracingLogger;

#[get("/ping")]
async fn ping() -> impl Responder {
    HttpResponse::Ok().body("Pong!")
}

#[get("/metrics")]
async fn metrics(handle: web::Data<PrometheusHandle>) -> impl Responder {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(handle.render())
}

/// Binds the liveness server on `[::]:{port}`.
///
/// `/metrics` is only served when a handle is given, that is when no dedicated exporter
/// listener runs. The returned server must be awaited or spawned to start serving.
pub fn start_health_server(
    port: u16,
    metrics_handle: Option<PrometheusHandle>,
) -> std::io::Result<Server> {
    let listener = TcpListener::bind(SocketAddr::from((Ipv6Addr::UNSPECIFIED, port)))?;
    info!(address = %listener.local_addr()?, "starting health server");

    let metrics_handle = metrics_handle.map(web::Data::new);
    let server = HttpServer::new(move || {
        let app = App::new().wrap(TracingLogger::default()).service(ping);

        match metrics_handle.clone() {
            Some(handle) => app.app_data(handle).service(metrics),
            None => app,
        }
    })
    .workers(1)
    .disable_signals()
    .listen(listener)?
    .run();

    Ok(server)
}
