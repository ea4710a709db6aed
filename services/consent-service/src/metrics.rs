//! Prometheus metrics exposition
//!
//! Service-level metrics:
//!
//! - `removal_requests_total` (counter): label `outcome` (`done` or a failure code)
//! - `removal_duration_seconds` (histogram)
//!
//! The removebg and key-pool crates emit `removebg_provider_calls_total`,
//! `key_usage_recorded_total` and `key_force_exhausted_total` through the same
//! recorder.

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

/// Buckets for `removal_duration_seconds`: 50ms up to the worst case of several
/// keys each hitting the provider timeout.
const DURATION_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0];

fn builder() -> PrometheusBuilder {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("removal_duration_seconds".to_string()),
            DURATION_BUCKETS,
        )
        .unwrap_or_else(|_| PrometheusBuilder::new())
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    Ok(builder().install_recorder()?)
}

/// Record a finished background-removal request.
pub fn record_removal(outcome: &'static str, duration_secs: f64) {
    metrics::counter!("removal_requests_total", "outcome" => outcome).increment(1);
    metrics::histogram!("removal_duration_seconds").record(duration_secs);
}

#[cfg(test)]
pub(crate) fn test_handle() -> PrometheusHandle {
    builder().build_recorder().handle()
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusRecorder;

    fn isolated_recorder() -> (PrometheusRecorder, PrometheusHandle) {
        let recorder = builder().build_recorder();
        let handle = recorder.handle();
        (recorder, handle)
    }

    #[test]
    fn record_removal_does_not_panic_without_recorder() {
        record_removal("done", 0.2);
    }

    #[test]
    fn record_removal_renders_counter_and_histogram() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_removal("done", 0.8);
        record_removal("quota_exhausted", 0.01);

        let output = handle.render();
        assert!(output.contains("removal_requests_total"));
        assert!(output.contains("outcome=\"done\""));
        assert!(output.contains("outcome=\"quota_exhausted\""));
        assert!(
            output.contains("removal_duration_seconds_bucket"),
            "histogram must render _bucket lines"
        );
        assert!(output.contains("le=\"0.05\""));
        assert!(output.contains("le=\"+Inf\""));
    }

    #[test]
    fn library_counters_share_the_recorder() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        metrics::counter!("key_force_exhausted_total").increment(1);
        assert!(handle.render().contains("key_force_exhausted_total 1"));
    }
}
