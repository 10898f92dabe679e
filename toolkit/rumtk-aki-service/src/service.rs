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
/// A single value owning every collaborator the processor and receiver activities
/// share, constructed once by the supervisor and passed around by `Arc` reference —
/// the re-architecture the design notes call for in place of the original's
/// module-level `messages`/`send_ack`/`model` globals.
///
pub mod service {
    use std::sync::Arc;

    use rumtk_feature_store::feature_store::FeatureStore;
    use rumtk_metrics::registry::MetricsRegistry;
    use rumtk_pager::pager::Pager;
    use rumtk_predictor::predictor::Predictor;

    pub struct Service {
        pub feature_store: FeatureStore,
        pub predictor: Predictor,
        pub pager: Pager,
        pub metrics: Arc<MetricsRegistry>,
    }

    ///
    /// Sent from the processor to the receiver over the ack-gate channel once a
    /// dequeued message has been fully handled. [AckSignal::Ack] means the state
    /// mutation committed and the receiver may emit the MLLP ACK and read the next
    /// frame; [AckSignal::Abort] means the commit failed and the receiver must tear
    /// down the connection instead so the upstream source retransmits the message.
    ///
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum AckSignal {
        Ack,
        Abort,
    }
}
