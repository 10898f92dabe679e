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
/// Startup and shutdown orchestration (C10): restores durable state, wires the
/// receiver/processor pair and the metrics server, then waits for a termination
/// signal and tears everything down in order instead of just letting the process
/// die mid-commit.
///
pub mod supervisor {
    use std::sync::Arc;

    use thiserror::Error;
    use tokio::sync::{mpsc, watch};

    use rumtk_feature_store::feature_store::{FeatureStore, FeatureStoreError};
    use rumtk_metrics::registry::MetricsRegistry;
    use rumtk_pager::pager::Pager;
    use rumtk_predictor::predictor::{Predictor, PredictorError};

    use crate::config::config::ServiceConfig;
    use crate::service::service::{AckSignal, Service};
    use crate::{processor, receiver};

    const ACK_GATE_CAPACITY: usize = 1;

    #[derive(Debug, Error)]
    pub enum SupervisorError {
        #[error("failed to open the feature store: {0}")]
        FeatureStoreOpen(#[source] FeatureStoreError),
        #[error("failed to preload patient history: {0}")]
        Preload(#[source] FeatureStoreError),
        #[error("failed to load the predictor model: {0}")]
        PredictorLoad(#[source] PredictorError),
        #[error("failed to persist the metrics snapshot: {0}")]
        MetricsPersist(#[source] std::io::Error),
    }

    pub async fn run(config: ServiceConfig) -> Result<(), SupervisorError> {
        let metrics = MetricsRegistry::restore(&config.metrics_path).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "could not restore a prior metrics snapshot; starting from zero");
            MetricsRegistry::new()
        });

        let db_existed = config.db_path.exists();
        let feature_store =
            FeatureStore::open(&config.db_path).map_err(SupervisorError::FeatureStoreOpen)?;
        if !db_existed {
            tracing::info!(path = ?config.preload_csv_path, "preloading patient history into a fresh feature store");
            feature_store
                .preload_from_csv(&config.preload_csv_path)
                .map_err(SupervisorError::Preload)?;
        }

        let predictor = Predictor::load(&config.model_path).map_err(SupervisorError::PredictorLoad)?;
        let pager = Pager::new(config.pager_address.clone());

        let service = Arc::new(Service { feature_store, predictor, pager, metrics: metrics.clone() });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (msg_tx, msg_rx) = mpsc::channel(ACK_GATE_CAPACITY);
        let (ack_tx, ack_rx) = mpsc::channel(ACK_GATE_CAPACITY);

        let metrics_addr = config.metrics_bind_addr;
        let metrics_for_server = service.metrics.clone();
        let metrics_server = tokio::spawn(async move {
            if let Err(e) = rumtk_metrics::registry::serve(metrics_for_server, metrics_addr).await {
                tracing::error!(error = %e, "metrics server exited");
            }
        });

        let processor_handle = tokio::spawn(processor::processor::run(
            service.clone(),
            msg_rx,
            ack_tx,
            shutdown_rx.clone(),
        ));
        let receiver_handle = tokio::spawn(receiver::receiver::run(
            service.clone(),
            config.clone(),
            msg_tx,
            ack_rx,
            shutdown_rx,
        ));

        wait_for_termination().await;
        tracing::info!("shutdown signal received; draining in-flight work");
        let _ = shutdown_tx.send(true);

        let _ = receiver_handle.await;
        let _ = processor_handle.await;
        metrics_server.abort();

        service
            .metrics
            .persist(&config.metrics_path)
            .map_err(SupervisorError::MetricsPersist)?;

        Ok(())
    }

    #[cfg(unix)]
    async fn wait_for_termination() {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = terminate.recv() => {},
        }
    }

    #[cfg(not(unix))]
    async fn wait_for_termination() {
        let _ = tokio::signal::ctrl_c().await;
    }
}
