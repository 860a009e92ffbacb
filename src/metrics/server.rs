use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;

use crate::metrics::PrometheusSink;

// ============================================================================
// Metrics HTTP Server
// ============================================================================
//
// Exposes the sink's registry at /metrics in the Prometheus text exposition
// format, plus /health for liveness probes. Runs until stopped; spawn it on
// its own task next to the producers and consumers it observes.
//
// ============================================================================

/// Serve `sink`'s metrics on `bind_addr` ("host:port"). The address comes
/// from `BrokerConfig::metrics_addr` in the standard wiring.
pub async fn start_metrics_server(
    sink: Arc<PrometheusSink>,
    bind_addr: &str,
) -> std::io::Result<()> {
    tracing::info!(addr = %bind_addr, "Serving /metrics and /health");

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(sink.clone()))
            .configure(routes)
    })
    .bind(bind_addr)?
    .run()
    .await
}

fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/metrics", web::get().to(metrics_handler))
        .route("/health", web::get().to(health_handler));
}

async fn metrics_handler(sink: web::Data<Arc<PrometheusSink>>) -> impl Responder {
    let encoder = TextEncoder::new();
    let metric_families = sink.registry().gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return HttpResponse::InternalServerError().finish();
    }

    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(buffer)
}

async fn health_handler() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "picstream-events"
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{ErrorStage, InstrumentationSink};
    use actix_web::test::{call_and_read_body, init_service, TestRequest};

    #[actix_web::test]
    async fn metrics_endpoint_serves_sink_counters() {
        let sink = Arc::new(PrometheusSink::new().unwrap());
        sink.record_produced("users");
        sink.record_error("users", ErrorStage::Commit);

        let app = init_service(
            App::new()
                .app_data(web::Data::new(sink))
                .configure(routes),
        )
        .await;
        let body = call_and_read_body(&app, TestRequest::get().uri("/metrics").to_request()).await;
        let text = String::from_utf8(body.to_vec()).unwrap();

        assert!(text.contains("events_produced_total{topic=\"users\"} 1"));
        assert!(text.contains("event_errors_total{stage=\"commit\",topic=\"users\"} 1"));
    }

    #[actix_web::test]
    async fn health_endpoint_reports_service() {
        let sink = Arc::new(PrometheusSink::new().unwrap());
        let app = init_service(
            App::new()
                .app_data(web::Data::new(sink))
                .configure(routes),
        )
        .await;

        let body = call_and_read_body(&app, TestRequest::get().uri("/health").to_request()).await;
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("picstream-events"));
    }
}
