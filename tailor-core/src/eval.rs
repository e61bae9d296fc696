use std::fmt;

use serde::Serialize;
use tracing::warn;

use crate::model::GraphEncoderModel;
use crate::types::Example;

/// Confusion counts and derived scores at one threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Metrics {
    pub true_positives: usize,
    pub false_positives: usize,
    pub true_negatives: usize,
    pub false_negatives: usize,
    /// Examples the model could not score.
    pub skipped: usize,
}

impl Metrics {
    pub fn total(&self) -> usize {
        self.true_positives + self.false_positives + self.true_negatives + self.false_negatives
    }

    pub fn precision(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_positives)
    }

    pub fn recall(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_negatives)
    }

    pub fn f1(&self) -> f64 {
        let (p, r) = (self.precision(), self.recall());
        if p + r == 0.0 { 0.0 } else { 2.0 * p * r / (p + r) }
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.true_positives + self.true_negatives, self.total())
    }

    fn record(&mut self, predicted: bool, actual: bool) {
        match (predicted, actual) {
            (true, true) => self.true_positives += 1,
            (true, false) => self.false_positives += 1,
            (false, false) => self.true_negatives += 1,
            (false, true) => self.false_negatives += 1,
        }
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

impl fmt::Display for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "precision={:.4} recall={:.4} f1={:.4} accuracy={:.4} (tp={} fp={} tn={} fn={})",
            self.precision(),
            self.recall(),
            self.f1(),
            self.accuracy(),
            self.true_positives,
            self.false_positives,
            self.true_negatives,
            self.false_negatives
        )
    }
}

/// Threshold classifier over model scores. `score >= threshold` is positive.
#[derive(Debug, Clone, Copy)]
pub struct Evaluator {
    threshold: f32,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self { threshold: 0.5 }
    }
}

impl Evaluator {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn is_positive(&self, score: f32) -> bool {
        score >= self.threshold
    }

    /// Metrics over precomputed `(score, label)` pairs.
    pub fn score_pairs(&self, scored: impl IntoIterator<Item = (f32, u8)>) -> Metrics {
        let mut metrics = Metrics::default();
        for (score, label) in scored {
            metrics.record(self.is_positive(score), label == 1);
        }
        metrics
    }

    pub fn evaluate(&self, model: &dyn GraphEncoderModel, examples: &[Example]) -> Metrics {
        let mut metrics = Metrics::default();
        for example in examples {
            match model.predict(example) {
                Ok(score) => metrics.record(self.is_positive(score), example.is_positive()),
                Err(e) => {
                    warn!(example = %example.id, error = %e, "Could not score example");
                    metrics.skipped += 1;
                }
            }
        }
        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_is_inclusive() {
        let eval = Evaluator::new(0.5);
        assert!(eval.is_positive(0.5));
        let below = f32::from_bits(0.5f32.to_bits() - 1);
        assert!(below < 0.5);
        assert!(!eval.is_positive(below));
    }

    #[test]
    fn metrics_from_confusion_counts() {
        let metrics = Evaluator::default().score_pairs([
            (0.9, 1),
            (0.6, 0),
            (0.2, 1),
            (0.1, 0),
            (0.5, 1),
        ]);
        assert_eq!(
            (metrics.true_positives, metrics.false_positives, metrics.true_negatives, metrics.false_negatives),
            (2, 1, 1, 1)
        );
        assert!((metrics.precision() - 2.0 / 3.0).abs() < 1e-9);
        assert!((metrics.recall() - 2.0 / 3.0).abs() < 1e-9);
        assert!((metrics.accuracy() - 0.6).abs() < 1e-9);
        assert!(metrics.to_string().starts_with("precision=0.6667"));
    }

    #[test]
    fn empty_metrics_are_zero() {
        let metrics = Metrics::default();
        assert_eq!(metrics.f1(), 0.0);
        assert_eq!(metrics.accuracy(), 0.0);
    }
}
