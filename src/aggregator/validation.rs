//! Domain validation: sanity bounds plus a rolling z-score screen
//!
//! Values outside their bounds are dropped outright. Values inside the bounds
//! are compared with the metric's rolling window once it holds enough samples;
//! before that the z-score screen is skipped (cold start). Every in-bounds
//! observation enters the window, so a sustained regime shift is absorbed
//! after a while instead of being rejected forever.

use std::collections::{HashMap, VecDeque};

use crate::error::ValidationFailure;

#[derive(Debug, Clone)]
pub struct ValidationConfig {
    pub min_price: f64,
    pub max_price: f64,
    pub zscore_threshold: f64,
    /// Samples required before the z-score screen is applied
    pub min_history_samples: usize,
    pub window_size: usize,
    /// Floor for the window's standard deviation, avoids infinite z on flat series
    pub min_stddev: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_price: 0.70,
            max_price: 1.30,
            zscore_threshold: 4.0,
            min_history_samples: 10,
            window_size: 100,
            min_stddev: 0.005,
        }
    }
}

/// Fixed-capacity window of recent observations for one metric
#[derive(Debug, Clone)]
pub struct RollingWindow {
    values: VecDeque<f64>,
    capacity: usize,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, value: f64) {
        self.values.push_back(value);
        while self.values.len() > self.capacity {
            self.values.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }

    pub fn stddev(&self) -> f64 {
        if self.values.len() < 2 {
            return 0.0;
        }
        let mean = self.mean();
        let var = self.values.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
            / self.values.len() as f64;
        var.sqrt()
    }

    /// |z| of `value` against this window, with the stddev floored at `min_stddev`
    pub fn zscore(&self, value: f64, min_stddev: f64) -> f64 {
        let std = self.stddev().max(min_stddev);
        if std <= 0.0 {
            return 0.0;
        }
        ((value - self.mean()) / std).abs()
    }
}

pub fn check_bounds(metric: &str, value: f64, min: f64, max: f64) -> Result<(), ValidationFailure> {
    if !value.is_finite() {
        return Err(ValidationFailure::NotFinite {
            metric: metric.to_string(),
        });
    }
    if value < min || value > max {
        return Err(ValidationFailure::OutOfBounds {
            metric: metric.to_string(),
            value,
            min,
            max,
        });
    }
    Ok(())
}

/// Rolling windows for every validated metric, owned by the aggregator state
#[derive(Debug, Clone)]
pub struct HistoricalWindows {
    config: ValidationConfig,
    windows: HashMap<String, RollingWindow>,
}

impl HistoricalWindows {
    pub fn new(config: ValidationConfig) -> Self {
        Self {
            config,
            windows: HashMap::new(),
        }
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    pub fn samples(&self, metric: &str) -> usize {
        self.windows.get(metric).map(|w| w.len()).unwrap_or(0)
    }

    /// Bounds check, then z-score screen against the metric's window
    pub fn validate(
        &mut self,
        metric: &str,
        value: f64,
        min: f64,
        max: f64,
    ) -> Result<f64, ValidationFailure> {
        check_bounds(metric, value, min, max)?;

        let window_size = self.config.window_size;
        let window = self
            .windows
            .entry(metric.to_string())
            .or_insert_with(|| RollingWindow::new(window_size));

        let verdict = if window.len() >= self.config.min_history_samples {
            let z = window.zscore(value, self.config.min_stddev);
            if z > self.config.zscore_threshold {
                Err(ValidationFailure::Anomalous {
                    metric: metric.to_string(),
                    value,
                    zscore: z,
                    threshold: self.config.zscore_threshold,
                })
            } else {
                Ok(value)
            }
        } else {
            Ok(value)
        };

        window.push(value);
        verdict
    }

    pub fn validate_price(&mut self, metric: &str, value: f64) -> Result<f64, ValidationFailure> {
        let (min, max) = (self.config.min_price, self.config.max_price);
        self.validate(metric, value, min, max)
    }

    pub fn validate_unit(&mut self, metric: &str, value: f64) -> Result<f64, ValidationFailure> {
        self.validate(metric, value, 0.0, 1.0)
    }
}
