use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// GET /metrics: Prometheus text exposition of the customization metrics.
///
/// Covers `garment_generation_seconds`, the `customization_jobs_total` and
/// `customization_jobs_failed` counters, `tryon_jobs_started`,
/// `tryon_jobs_reconciled` and `rate_limit_denied_total`.
pub async fn prometheus_metrics(
    axum::extract::State(handle): axum::extract::State<Arc<PrometheusHandle>>,
) -> impl IntoResponse {
    handle.render()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::StatusCode;
    use metrics_exporter_prometheus::PrometheusBuilder;

    #[tokio::test]
    async fn test_scrape_renders_recorded_counters() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = Arc::new(recorder.handle());
        metrics::with_local_recorder(&recorder, || {
            metrics::counter!("tryon_jobs_started").increment(2);
            metrics::counter!("rate_limit_denied_total").increment(1);
        });

        let response = prometheus_metrics(State(handle)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("tryon_jobs_started 2"));
        assert!(text.contains("rate_limit_denied_total 1"));
    }
}
