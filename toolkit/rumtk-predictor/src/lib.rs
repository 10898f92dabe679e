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
/// The AKI classifier is treated as an opaque artifact by the rest of the
/// service: a fixed-size weight vector plus a bias and a decision threshold,
/// serialized to JSON rather than a pickled model object. `predict` is a pure
/// function of its input — same feature vector always yields the same label.
///
pub mod predictor {
    use std::path::Path;

    use serde::{Deserialize, Serialize};
    use thiserror::Error;

    use rumtk_feature_store::feature_store::FeatureVector;

    /// `age, sex, test_1..test_5`.
    pub const FEATURE_COUNT: usize = 7;

    #[derive(Error, Debug)]
    pub enum PredictorError {
        #[error("io error reading model artifact: {0}")]
        Io(#[from] std::io::Error),
        #[error("model artifact is not valid JSON: {0}")]
        Malformed(#[from] serde_json::Error),
        #[error("model artifact has {actual} weights, expected {FEATURE_COUNT}")]
        WeightCountMismatch { actual: usize },
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ModelArtifact {
        weights: Vec<f64>,
        bias: f64,
        threshold: f64,
    }

    /// A loaded, ready-to-evaluate AKI classifier.
    #[derive(Debug, Clone)]
    pub struct Predictor {
        weights: [f64; FEATURE_COUNT],
        bias: f64,
        threshold: f64,
    }

    fn sigmoid(x: f64) -> f64 {
        1.0 / (1.0 + (-x).exp())
    }

    impl Predictor {
        /// Loads a model artifact previously serialized by training tooling outside
        /// this service's scope (no training procedure is implemented here).
        pub fn load(path: &Path) -> Result<Self, PredictorError> {
            let raw = std::fs::read_to_string(path)?;
            let artifact: ModelArtifact = serde_json::from_str(&raw)?;
            Self::from_artifact(artifact)
        }

        pub fn from_artifact(artifact: ModelArtifact) -> Result<Self, PredictorError> {
            if artifact.weights.len() != FEATURE_COUNT {
                return Err(PredictorError::WeightCountMismatch { actual: artifact.weights.len() });
            }
            let mut weights = [0.0; FEATURE_COUNT];
            weights.copy_from_slice(&artifact.weights);
            Ok(Predictor { weights, bias: artifact.bias, threshold: artifact.threshold })
        }

        ///
        /// Evaluates the model against a feature vector. Never panics: a caller
        /// that constructs a [FeatureVector] always supplies exactly
        /// [FEATURE_COUNT] values by construction, so the only failure mode left
        /// is a corrupted artifact, which is rejected at load time — this method
        /// is infallible by the time it runs.
        ///
        pub fn predict(&self, features: &FeatureVector) -> bool {
            let input = features.as_array();
            let logit: f64 = self
                .weights
                .iter()
                .zip(input.iter())
                .map(|(w, x)| w * x)
                .sum::<f64>()
                + self.bias;
            sigmoid(logit) >= self.threshold
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn artifact(weights: Vec<f64>, bias: f64, threshold: f64) -> ModelArtifact {
            ModelArtifact { weights, bias, threshold }
        }

        #[test]
        fn rejects_an_artifact_with_the_wrong_weight_count() {
            let err = Predictor::from_artifact(artifact(vec![1.0, 2.0], 0.0, 0.5)).unwrap_err();
            assert!(matches!(err, PredictorError::WeightCountMismatch { actual: 2 }));
        }

        #[test]
        fn prediction_is_deterministic() {
            let predictor = Predictor::from_artifact(artifact(vec![0.1; FEATURE_COUNT], 0.0, 0.5)).unwrap();
            let features = FeatureVector { age: 70.0, sex: 1.0, tests: [5.0, 4.8, 4.5, 4.2, 4.0] };
            let first = predictor.predict(&features);
            let second = predictor.predict(&features);
            assert_eq!(first, second);
        }

        #[test]
        fn high_creatinine_crosses_a_low_threshold() {
            let predictor = Predictor::from_artifact(artifact(vec![0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0], 0.0, 0.5)).unwrap();
            let features = FeatureVector { age: 50.0, sex: 0.0, tests: [10.0, 1.0, 1.0, 1.0, 1.0] };
            assert!(predictor.predict(&features));
        }

        #[test]
        fn low_weighted_input_stays_below_threshold() {
            let predictor = Predictor::from_artifact(artifact(vec![0.0; FEATURE_COUNT], -10.0, 0.5)).unwrap();
            let features = FeatureVector { age: 50.0, sex: 0.0, tests: [1.0, 1.0, 1.0, 1.0, 1.0] };
            assert!(!predictor.predict(&features));
        }
    }
}
