//! Display slots holding the latest prediction per category.
//!
use common::protocol::{LabelMarker, LabelSlot};

use crate::nn::Prediction;

/// Probability at or above which a slot is marked as high confidence.
pub const HIGH_CONFIDENCE_THRESHOLD: f32 = 0.75;

/// Number of decimal digits shown for a percentage.
pub const PERCENT_DECIMALS: usize = 2;

/// How predictions are rendered into slots.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DisplayConfig {
    pub high_confidence_threshold: f32,
    pub decimals: usize,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            high_confidence_threshold: HIGH_CONFIDENCE_THRESHOLD,
            decimals: PERCENT_DECIMALS,
        }
    }
}

/// Format a probability as a percentage with exactly `decimals` digits, without the `%` sign.
pub fn format_percent(probability: f32, decimals: usize) -> String {
    format!("{:.*}", decimals, probability * 100.0)
}

/// Render a category and its formatted percentage as `"<category>: <percent>%"`.
pub fn format_label(class_name: &str, percent: &str) -> String {
    format!("{class_name}: {percent}%")
}

/// Render a prediction as `"<category>: <percent>%"`.
pub fn format_prediction(prediction: &Prediction, config: &DisplayConfig) -> String {
    let percent = format_percent(prediction.probability, config.decimals);
    format_label(&prediction.class_name, &percent)
}

/// Pick the marker for an already formatted percentage.
///
/// Only the whole-number part counts, so `"74.99"` is normal while `"75.00"` is high confidence
/// even if the raw probability was slightly below the threshold.
pub fn marker_for(percent: &str, config: &DisplayConfig) -> LabelMarker {
    let whole = percent.split('.').next().unwrap_or_default();
    match whole.parse::<i64>() {
        Ok(whole) if whole as f32 >= config.high_confidence_threshold * 100.0 => {
            LabelMarker::HighConfidence
        }
        _ => LabelMarker::Normal,
    }
}

/// Fixed set of slots, one per category.
#[derive(Debug, Default)]
pub struct LabelBoard {
    slots: Vec<LabelSlot>,
}

impl LabelBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all slots with `num_classes` empty ones.
    pub fn allocate(&mut self, num_classes: usize) {
        self.slots.clear();
        self.slots.resize_with(num_classes, LabelSlot::default);
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[LabelSlot] {
        &self.slots
    }

    /// Write prediction `i` into slot `i`.
    pub fn update(&mut self, predictions: &[Prediction], config: &DisplayConfig) {
        if predictions.len() != self.slots.len() {
            log::warn!(
                "Got {} predictions for {} slots",
                predictions.len(),
                self.slots.len()
            );
        }

        for (slot, prediction) in self.slots.iter_mut().zip(predictions) {
            let percent = format_percent(prediction.probability, config.decimals);
            slot.marker = Some(marker_for(&percent, config));
            slot.text = format_label(&prediction.class_name, &percent);
        }
    }
}
