/*
 * rumtk attempts to implement HL7 and medical protocols for interoperability in medicine.
 * This toolkit aims to be reliable, simple, performant, and standards compliant.
 * Copyright (C) 2025  Luis M. Santos, M.D.
 *
 * This library is free software; you can redistribute it and/or
 * modify it under the terms of the GNU Lesser General Public
 * License as published by the Free Software Foundation; either
 * version 2.1 of the License, or (at your option) any later version.
 *
 * This library is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
 * Lesser General Public License for more details.
 *
 * You should have received a copy of the GNU Lesser General Public
 * License along with this library; if not, write to the Free Software
 * Foundation, Inc., 51 Franklin Street, Fifth Floor, Boston, MA  02110-1301  USA
 */

///
/// Counter registry and scrape server. Unlike the `prometheus_client` globals
/// this mirrors, every counter lives on one [MetricsRegistry] value owned by
/// the service rather than behind module-level statics, so a test can spin up
/// its own registry without sharing state with any other test.
///
pub mod registry {
    use std::io;
    use std::net::SocketAddr;
    use std::path::Path;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};

    use serde::{Deserialize, Serialize};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[derive(Default)]
    struct Welford {
        count: u64,
        mean: f64,
        m2: f64,
    }

    impl Welford {
        fn observe(&mut self, value: f64) {
            self.count += 1;
            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
        }

        /// Population variance (divides by `count`, not `count - 1`): the standard
        /// deviation reported is over every creatinine value observed, not a sample
        /// estimate.
        fn variance(&self) -> f64 {
            if self.count == 0 {
                0.0
            } else {
                self.m2 / self.count as f64
            }
        }
    }

    /// Plain-data snapshot of everything needed to restore a registry's counters
    /// across a restart, persisted as JSON.
    #[derive(Debug, Default, Serialize, Deserialize)]
    pub struct MetricsSnapshot {
        pub messages_received: u64,
        pub messages_processed: u64,
        pub blood_test_results_received: u64,
        pub positive_aki_predictions: u64,
        pub unsuccessful_pager_requests: u64,
        pub mllp_socket_reconnections: u64,
        pub blood_test_result_count: u64,
        pub blood_test_result_mean: f64,
        pub blood_test_result_m2: f64,
    }

    pub struct MetricsRegistry {
        messages_received: AtomicU64,
        messages_processed: AtomicU64,
        blood_test_results_received: AtomicU64,
        positive_aki_predictions: AtomicU64,
        unsuccessful_pager_requests: AtomicU64,
        mllp_socket_reconnections: AtomicU64,
        blood_test_result_distribution: Mutex<Welford>,
    }

    impl Default for MetricsRegistry {
        fn default() -> Self {
            MetricsRegistry {
                messages_received: AtomicU64::new(0),
                messages_processed: AtomicU64::new(0),
                blood_test_results_received: AtomicU64::new(0),
                positive_aki_predictions: AtomicU64::new(0),
                unsuccessful_pager_requests: AtomicU64::new(0),
                mllp_socket_reconnections: AtomicU64::new(0),
                blood_test_result_distribution: Mutex::new(Welford::default()),
            }
        }
    }

    impl MetricsRegistry {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn record_message_received(&self) {
            self.messages_received.fetch_add(1, Ordering::Relaxed);
        }

        pub fn record_message_processed(&self) {
            self.messages_processed.fetch_add(1, Ordering::Relaxed);
        }

        pub fn record_blood_test_result(&self, value: f64) {
            self.blood_test_results_received.fetch_add(1, Ordering::Relaxed);
            self.blood_test_result_distribution.lock().unwrap().observe(value);
        }

        pub fn record_positive_aki_prediction(&self) {
            self.positive_aki_predictions.fetch_add(1, Ordering::Relaxed);
        }

        pub fn record_unsuccessful_pager_request(&self) {
            self.unsuccessful_pager_requests.fetch_add(1, Ordering::Relaxed);
        }

        pub fn record_mllp_socket_reconnection(&self) {
            self.mllp_socket_reconnections.fetch_add(1, Ordering::Relaxed);
        }

        /// Fraction of observed blood test results that triggered a positive prediction.
        pub fn positive_prediction_rate(&self) -> f64 {
            let total = self.blood_test_results_received.load(Ordering::Relaxed);
            if total == 0 {
                0.0
            } else {
                self.positive_aki_predictions.load(Ordering::Relaxed) as f64 / total as f64
            }
        }

        pub fn snapshot(&self) -> MetricsSnapshot {
            let welford = self.blood_test_result_distribution.lock().unwrap();
            MetricsSnapshot {
                messages_received: self.messages_received.load(Ordering::Relaxed),
                messages_processed: self.messages_processed.load(Ordering::Relaxed),
                blood_test_results_received: self.blood_test_results_received.load(Ordering::Relaxed),
                positive_aki_predictions: self.positive_aki_predictions.load(Ordering::Relaxed),
                unsuccessful_pager_requests: self.unsuccessful_pager_requests.load(Ordering::Relaxed),
                mllp_socket_reconnections: self.mllp_socket_reconnections.load(Ordering::Relaxed),
                blood_test_result_count: welford.count,
                blood_test_result_mean: welford.mean,
                blood_test_result_m2: welford.m2,
            }
        }

        /// Writes a JSON snapshot to `path`, overwriting any existing file.
        pub fn persist(&self, path: &Path) -> io::Result<()> {
            let snapshot = self.snapshot();
            let json = serde_json::to_vec_pretty(&snapshot)?;
            std::fs::write(path, json)
        }

        /// Restores counters from `path`. A missing file restores all-zero counters —
        /// this is the expected state on first boot, not an error.
        pub fn restore(path: &Path) -> io::Result<Arc<Self>> {
            let registry = Self::new();
            match std::fs::read(path) {
                Ok(bytes) => {
                    let snapshot: MetricsSnapshot = serde_json::from_slice(&bytes)?;
                    registry.messages_received.store(snapshot.messages_received, Ordering::Relaxed);
                    registry.messages_processed.store(snapshot.messages_processed, Ordering::Relaxed);
                    registry
                        .blood_test_results_received
                        .store(snapshot.blood_test_results_received, Ordering::Relaxed);
                    registry
                        .positive_aki_predictions
                        .store(snapshot.positive_aki_predictions, Ordering::Relaxed);
                    registry
                        .unsuccessful_pager_requests
                        .store(snapshot.unsuccessful_pager_requests, Ordering::Relaxed);
                    registry
                        .mllp_socket_reconnections
                        .store(snapshot.mllp_socket_reconnections, Ordering::Relaxed);
                    let mut welford = registry.blood_test_result_distribution.lock().unwrap();
                    welford.count = snapshot.blood_test_result_count;
                    welford.mean = snapshot.blood_test_result_mean;
                    welford.m2 = snapshot.blood_test_result_m2;
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
            Ok(registry)
        }

        /// Renders every counter in Prometheus text exposition format.
        pub fn render_prometheus_text(&self) -> String {
            let welford = self.blood_test_result_distribution.lock().unwrap();
            let mut out = String::new();

            let counter = |out: &mut String, name: &str, help: &str, value: u64| {
                out.push_str(&format!("# HELP {name} {help}\n# TYPE {name} counter\n{name} {value}\n"));
            };
            let gauge = |out: &mut String, name: &str, help: &str, value: f64| {
                out.push_str(&format!("# HELP {name} {help}\n# TYPE {name} gauge\n{name} {value}\n"));
            };

            counter(&mut out, "messages_received", "Number of messages received", self.messages_received.load(Ordering::Relaxed));
            counter(&mut out, "messages_processed", "Number of messages processed", self.messages_processed.load(Ordering::Relaxed));
            counter(&mut out, "blood_test_results_received", "Number of blood test results received", self.blood_test_results_received.load(Ordering::Relaxed));
            counter(&mut out, "positive_aki_predictions", "Number of positive AKI predictions", self.positive_aki_predictions.load(Ordering::Relaxed));
            counter(&mut out, "unsuccessful_pager_requests", "Number of unsuccessful pager HTTP requests", self.unsuccessful_pager_requests.load(Ordering::Relaxed));
            counter(&mut out, "mllp_socket_reconnections", "Number of reconnections to the MLLP socket", self.mllp_socket_reconnections.load(Ordering::Relaxed));
            gauge(&mut out, "positive_prediction_rate", "Fraction of blood test results that triggered a positive prediction", self.positive_prediction_rate());
            gauge(&mut out, "blood_test_result_mean", "Running mean of observed blood test results", welford.mean);
            gauge(&mut out, "blood_test_result_stddev", "Running standard deviation of observed blood test results", welford.variance().sqrt());

            out
        }
    }

    const NOT_FOUND: &str = "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n";

    async fn handle_connection(mut stream: tokio::net::TcpStream, registry: Arc<MetricsRegistry>) -> io::Result<()> {
        let mut buf = [0u8; 1024];
        let n = stream.read(&mut buf).await?;
        let request = String::from_utf8_lossy(&buf[..n]);
        let first_line = request.lines().next().unwrap_or("");

        if first_line.starts_with("GET /metrics") {
            let body = registry.render_prometheus_text();
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\n\r\n{}",
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await?;
        } else {
            stream.write_all(NOT_FOUND.as_bytes()).await?;
        }
        stream.shutdown().await
    }

    ///
    /// Serves `GET /metrics` on `addr` until the process exits. One connection is
    /// handled at a time per accepted socket via its own spawned task — this is a
    /// single-purpose scrape endpoint, not a general web server, so there is no
    /// routing beyond the one path.
    ///
    pub async fn serve(registry: Arc<MetricsRegistry>, addr: SocketAddr) -> io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(%addr, "metrics server listening");
        loop {
            let (stream, _) = listener.accept().await?;
            let registry = registry.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, registry).await {
                    tracing::warn!(error = %e, "metrics connection error");
                }
            });
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use tempfile::NamedTempFile;

        #[test]
        fn positive_prediction_rate_is_zero_with_no_observations() {
            let registry = MetricsRegistry::new();
            assert_eq!(registry.positive_prediction_rate(), 0.0);
        }

        #[test]
        fn positive_prediction_rate_divides_predictions_by_results() {
            let registry = MetricsRegistry::new();
            registry.record_blood_test_result(1.0);
            registry.record_blood_test_result(2.0);
            registry.record_positive_aki_prediction();
            assert_eq!(registry.positive_prediction_rate(), 0.5);
        }

        #[test]
        fn welford_mean_matches_simple_average() {
            let registry = MetricsRegistry::new();
            for v in [1.0, 2.0, 3.0, 4.0] {
                registry.record_blood_test_result(v);
            }
            let snapshot = registry.snapshot();
            assert!((snapshot.blood_test_result_mean - 2.5).abs() < 1e-9);
        }

        #[test]
        fn snapshot_round_trips_through_a_file() {
            let registry = MetricsRegistry::new();
            registry.record_message_received();
            registry.record_blood_test_result(1.3);
            registry.record_positive_aki_prediction();

            let file = NamedTempFile::new().unwrap();
            registry.persist(file.path()).unwrap();

            let restored = MetricsRegistry::restore(file.path()).unwrap();
            assert_eq!(restored.snapshot().messages_received, 1);
            assert_eq!(restored.snapshot().positive_aki_predictions, 1);
        }

        #[test]
        fn restore_from_a_missing_file_is_all_zeros() {
            let restored = MetricsRegistry::restore(Path::new("/nonexistent/path.json")).unwrap();
            let snapshot = restored.snapshot();
            assert_eq!(snapshot.messages_received, 0);
            assert_eq!(snapshot.blood_test_results_received, 0);
        }

        #[test]
        fn renders_prometheus_text_exposition_format() {
            let registry = MetricsRegistry::new();
            registry.record_message_received();
            let text = registry.render_prometheus_text();
            assert!(text.contains("messages_received 1"));
            assert!(text.contains("# TYPE messages_received counter"));
        }
    }
}
