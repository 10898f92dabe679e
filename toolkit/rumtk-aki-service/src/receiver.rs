/*
 * rumtk attempts to implement HL7 and medical protocols for interoperability in medicine.
 * This toolkit aims to be reliable, simple, performant, and standards compliant.
 * Copyright (C) 2025  Luis M. Santos, M.D.
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

///
/// TCP client to the MLLP source (C9). Implements the `Connecting` /
/// `Receiving` / `AwaitingAckGate` / `Closing` state machine: connect with
/// exponential backoff, assemble whole frames out of however many bytes a single
/// `read` happened to deliver, hand each decoded frame to the processor, and only
/// emit the MLLP ACK once the processor signals the corresponding mutation is
/// durable. At most one frame is ever in flight on a connection, which is what
/// lets the upstream source safely replay after a reconnect.
///
pub mod receiver {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::{mpsc, watch};

    use rumtk_mllp::mllp::{mllp_encode, MllpFrameBuffer};

    use crate::config::config::ServiceConfig;
    use crate::service::service::{AckSignal, Service};

    const READ_BUFFER_SIZE: usize = 4096;
    const BACKOFF_BASE: Duration = Duration::from_secs(1);
    const BACKOFF_CAP: Duration = Duration::from_secs(30);

    /// The ACK body; downstream only inspects the `MSA` code, so the timestamp is a
    /// fixed constant rather than wall-clock time.
    fn ack_segments() -> [&'static str; 2] {
        ["MSH|^~\\&|||||20240129093837||ACK|||2.5", "MSA|AA"]
    }

    pub async fn run(
        service: Arc<Service>,
        config: ServiceConfig,
        msg_tx: mpsc::Sender<Vec<String>>,
        mut ack_rx: mpsc::Receiver<AckSignal>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut attempt: u32 = 0;

        'reconnect: loop {
            if *shutdown.borrow() {
                break;
            }

            let mut stream = match connect_with_backoff(&service, &config, &mut attempt, &mut shutdown).await {
                Some(stream) => stream,
                None => break,
            };
            attempt = 0;

            let mut framer = MllpFrameBuffer::new();
            let mut buf = [0u8; READ_BUFFER_SIZE];

            loop {
                if *shutdown.borrow() {
                    break 'reconnect;
                }

                let n = tokio::select! {
                    _ = shutdown.changed() => continue,
                    result = stream.read(&mut buf) => match result {
                        Ok(n) => n,
                        Err(e) => {
                            tracing::warn!(error = %e, "mllp read error; reconnecting");
                            0
                        }
                    },
                };

                if n == 0 {
                    service.metrics.record_mllp_socket_reconnection();
                    tracing::warn!("mllp connection closed; reconnecting");
                    continue 'reconnect;
                }

                framer.push(&buf[..n]);

                while let Some(frame) = framer.next_frame() {
                    let segments = match frame {
                        Ok(segments) => segments,
                        Err(e) => {
                            tracing::error!(error = %e, "malformed mllp frame; dropping it");
                            continue;
                        }
                    };

                    service.metrics.record_message_received();
                    if msg_tx.send(segments).await.is_err() {
                        break 'reconnect;
                    }

                    match ack_rx.recv().await {
                        Some(AckSignal::Ack) => {
                            let ack = mllp_encode(&ack_segments());
                            if let Err(e) = stream.write_all(&ack).await {
                                tracing::warn!(error = %e, "failed to send ack; reconnecting");
                                service.metrics.record_mllp_socket_reconnection();
                                continue 'reconnect;
                            }
                        }
                        Some(AckSignal::Abort) => {
                            service.metrics.record_mllp_socket_reconnection();
                            tracing::warn!(
                                "processor aborted the in-flight message; reconnecting without acking"
                            );
                            continue 'reconnect;
                        }
                        None => break 'reconnect,
                    }
                }
            }
        }
    }

    async fn connect_with_backoff(
        service: &Arc<Service>,
        config: &ServiceConfig,
        attempt: &mut u32,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<TcpStream> {
        loop {
            if *shutdown.borrow() {
                return None;
            }

            match TcpStream::connect((config.mllp_host.as_str(), config.mllp_port)).await {
                Ok(stream) => {
                    tracing::info!(host = %config.mllp_host, port = config.mllp_port, "connected to mllp source");
                    return Some(stream);
                }
                Err(e) => {
                    *attempt += 1;
                    if *attempt > config.max_reconnect_attempts {
                        tracing::error!("exceeded the maximum number of reconnect attempts; giving up");
                        return None;
                    }
                    service.metrics.record_mllp_socket_reconnection();
                    let exponent = attempt.saturating_sub(1).min(5);
                    let backoff = (BACKOFF_BASE * (1u32 << exponent)).min(BACKOFF_CAP);
                    tracing::warn!(error = %e, attempt = *attempt, ?backoff, "mllp connect failed; retrying");

                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {},
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                return None;
                            }
                        },
                    }
                }
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use tempfile::NamedTempFile;
        use tokio::net::TcpListener;

        use rumtk_feature_store::feature_store::FeatureStore;
        use rumtk_metrics::registry::MetricsRegistry;
        use rumtk_pager::pager::Pager;
        use rumtk_predictor::predictor::Predictor;

        fn write_model(path: &std::path::Path) {
            std::fs::write(path, r#"{"weights":[0,0,0,0,0,0,0],"bias":-10,"threshold":0.5}"#).unwrap();
        }

        struct Harness {
            _db: NamedTempFile,
            _model: NamedTempFile,
            service: Arc<Service>,
        }

        fn harness() -> Harness {
            let db = NamedTempFile::new().unwrap();
            let model = NamedTempFile::new().unwrap();
            write_model(model.path());

            let feature_store = FeatureStore::open(db.path()).unwrap();
            let predictor = Predictor::load(model.path()).unwrap();
            let pager = Pager::new("127.0.0.1:1");
            let metrics = MetricsRegistry::new();

            Harness {
                _db: db,
                _model: model,
                service: Arc::new(Service { feature_store, predictor, pager, metrics }),
            }
        }

        fn test_config(port: u16) -> ServiceConfig {
            ServiceConfig {
                mllp_host: "127.0.0.1".to_string(),
                mllp_port: port,
                pager_address: "127.0.0.1:1".to_string(),
                db_path: "".into(),
                metrics_path: "".into(),
                model_path: "".into(),
                preload_csv_path: "".into(),
                max_reconnect_attempts: 5,
                metrics_bind_addr: "127.0.0.1:0".parse().unwrap(),
            }
        }

        #[tokio::test]
        async fn forwards_a_frame_and_emits_ack_after_the_processor_signals() {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let h = harness();

            let (msg_tx, mut msg_rx) = mpsc::channel(1);
            let (ack_tx, ack_rx) = mpsc::channel(1);
            let (_shutdown_tx, shutdown_rx) = watch::channel(false);

            let handle = tokio::spawn(run(h.service.clone(), test_config(addr.port()), msg_tx, ack_rx, shutdown_rx));

            let (mut server_stream, _) = listener.accept().await.unwrap();
            let frame = mllp_encode(&["MSH|^~\\&|||||20240129093837||ADT^A03|||2.5", "PID|1||829339"]);
            server_stream.write_all(&frame).await.unwrap();

            let received = msg_rx.recv().await.unwrap();
            assert_eq!(received[0], "MSH|^~\\&|||||20240129093837||ADT^A03|||2.5");

            ack_tx.send(AckSignal::Ack).await.unwrap();

            let mut buf = [0u8; 256];
            let n = server_stream.read(&mut buf).await.unwrap();
            let ack_segments = rumtk_mllp::mllp::mllp_decode(&buf[..n]).unwrap();
            assert_eq!(ack_segments[1], "MSA|AA");

            handle.abort();
        }

        #[tokio::test]
        async fn abort_signal_reconnects_instead_of_acking() {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let h = harness();

            let (msg_tx, mut msg_rx) = mpsc::channel(1);
            let (ack_tx, ack_rx) = mpsc::channel(1);
            let (_shutdown_tx, shutdown_rx) = watch::channel(false);

            let handle = tokio::spawn(run(h.service.clone(), test_config(addr.port()), msg_tx, ack_rx, shutdown_rx));

            let (mut server_stream, _) = listener.accept().await.unwrap();
            let frame = mllp_encode(&["MSH|^~\\&|||||20240129093837||ADT^A01|||2.5"]);
            server_stream.write_all(&frame).await.unwrap();
            msg_rx.recv().await.unwrap();

            ack_tx.send(AckSignal::Abort).await.unwrap();

            let (_second_stream, _) = listener.accept().await.unwrap();
            assert!(h.service.metrics.snapshot().mllp_socket_reconnections >= 1);

            handle.abort();
        }

        #[tokio::test]
        async fn peer_disconnect_triggers_a_reconnect_and_counts_it() {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let h = harness();

            let (msg_tx, _msg_rx) = mpsc::channel(1);
            let (_ack_tx, ack_rx) = mpsc::channel(1);
            let (_shutdown_tx, shutdown_rx) = watch::channel(false);

            let handle = tokio::spawn(run(h.service.clone(), test_config(addr.port()), msg_tx, ack_rx, shutdown_rx));

            let (server_stream, _) = listener.accept().await.unwrap();
            drop(server_stream);

            let (_second, _) = listener.accept().await.unwrap();
            assert!(h.service.metrics.snapshot().mllp_socket_reconnections >= 1);

            handle.abort();
        }

        #[tokio::test]
        async fn shutdown_flag_stops_the_receiver_between_frames() {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let h = harness();

            let (msg_tx, _msg_rx) = mpsc::channel(1);
            let (_ack_tx, ack_rx) = mpsc::channel(1);
            let (shutdown_tx, shutdown_rx) = watch::channel(false);

            let handle = tokio::spawn(run(h.service, test_config(addr.port()), msg_tx, ack_rx, shutdown_rx));
            let _server = listener.accept().await.unwrap();

            shutdown_tx.send(true).unwrap();
            tokio::time::timeout(Duration::from_secs(2), handle)
                .await
                .expect("receiver should exit promptly once shutdown is observed")
                .unwrap();
        }
    }
}
