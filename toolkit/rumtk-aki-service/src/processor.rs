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
/// The clinical state machine (C8): dequeues a decoded HL7 segment list, routes by
/// message type, mutates the feature store, and attempts a prediction. Never
/// acknowledges on behalf of the receiver directly — it only ever signals the
/// ack-gate once its own work on the message is durable, which is what lets the
/// receiver safely emit the MLLP ACK afterwards.
///
pub mod processor {
    use std::sync::Arc;

    use tokio::sync::{mpsc, watch};

    use rumtk_feature_store::feature_store::{FeatureStoreError, FeatureVector, IngestOutcome};
    use rumtk_hl7_v2::{calculate_age, parse_message, Message};

    use crate::service::service::{AckSignal, Service};

    const CREATININE: &str = "CREATININE";
    const ADMISSION: &str = "ADT^A01";
    const LAB_RESULT: &str = "ORU^R01";

    ///
    /// Runs until the message channel closes or a shutdown is observed while idle.
    /// A shutdown flag is only consulted between messages — once a message is
    /// dequeued it is always carried through to completion (or an abort) before the
    /// loop checks shutdown again, per the "never interrupt an in-progress commit"
    /// cancellation rule.
    ///
    pub async fn run(
        service: Arc<Service>,
        mut msg_rx: mpsc::Receiver<Vec<String>>,
        ack_tx: mpsc::Sender<AckSignal>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            let segments = tokio::select! {
                _ = shutdown.changed() => continue,
                msg = msg_rx.recv() => match msg {
                    Some(segments) => segments,
                    None => break,
                },
            };

            let signal = match process_message(&service, segments).await {
                Ok(()) => {
                    service.metrics.record_message_processed();
                    AckSignal::Ack
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        "feature store commit failed; aborting connection instead of acknowledging"
                    );
                    AckSignal::Abort
                }
            };

            if ack_tx.send(signal).await.is_err() {
                break;
            }
        }
    }

    async fn process_message(service: &Service, segments: Vec<String>) -> Result<(), FeatureStoreError> {
        let message = match parse_message(segments) {
            Ok(message) => message,
            Err(e) => {
                tracing::error!(error = %e, "discarding a frame with no MSH segment");
                return Ok(());
            }
        };

        let message_type = match message.message_type() {
            Ok(message_type) => message_type.to_string(),
            Err(e) => {
                tracing::error!(error = %e, "message is missing its MSH-9 type field");
                return Ok(());
            }
        };

        match message_type.as_str() {
            ADMISSION => handle_admission(service, &message).await,
            LAB_RESULT => handle_lab_result(service, &message).await,
            other => {
                tracing::debug!(message_type = %other, "no state change for this message type");
                Ok(())
            }
        }
    }

    async fn handle_admission(service: &Service, message: &Message) -> Result<(), FeatureStoreError> {
        let patient = match message.patient_identifier() {
            Ok(patient) => patient,
            Err(e) => {
                tracing::error!(error = %e, "invalid PID segment on an admission; no state change");
                return Ok(());
            }
        };

        let today = chrono::Utc::now().date_naive();
        let age = calculate_age(patient.date_of_birth, today);
        service.feature_store.ingest_demographics(&patient.mrn, age, patient.sex)?;

        if let Some(vector) = service.feature_store.resolve_pending(&patient.mrn)? {
            attempt_prediction(service, &patient.mrn, vector).await;
        }
        Ok(())
    }

    async fn handle_lab_result(service: &Service, message: &Message) -> Result<(), FeatureStoreError> {
        let observation = match message.observation() {
            Ok(observation) => observation,
            Err(e) => {
                tracing::error!(error = %e, "invalid OBX/PID segment on a lab result; no state change");
                return Ok(());
            }
        };

        if observation.test_name != CREATININE {
            tracing::debug!(test_name = %observation.test_name, "ignoring a non-creatinine observation");
            return Ok(());
        }

        service.metrics.record_blood_test_result(observation.value);
        let outcome = service
            .feature_store
            .ingest_creatinine(&observation.mrn, observation.value)?;

        if let IngestOutcome::Ready(vector) = outcome {
            attempt_prediction(service, &observation.mrn, vector).await;
        }
        Ok(())
    }

    async fn attempt_prediction(service: &Service, mrn: &str, vector: FeatureVector) {
        if !service.predictor.predict(&vector) {
            return;
        }
        service.metrics.record_positive_aki_prediction();
        if let Err(e) = service.pager.page(mrn).await {
            service.metrics.record_unsuccessful_pager_request();
            tracing::warn!(error = %e, mrn = %mrn, "pager request failed");
        }
    }

}
