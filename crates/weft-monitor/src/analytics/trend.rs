//! Regression, smoothing, anomaly, and forecast primitives.

use jiff::{SignedDuration, Timestamp};
use serde::{Deserialize, Serialize};

/// Minimum points required for anomaly and change-point detection.
const MIN_DETECTION_POINTS: usize = 10;
/// Minimum points required for seasonality search.
const MIN_SEASONALITY_POINTS: usize = 20;
/// Autocorrelation floor below which no seasonality is reported.
const SEASONALITY_CORRELATION_FLOOR: f64 = 0.5;

/// One observation in a metric time series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub timestamp: Timestamp,
    pub value: f64,
}

impl TrendPoint {
    pub fn new(timestamp: Timestamp, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Categorical direction of a trend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    #[default]
    Stable,
}

/// Linear-regression summary of a series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TrendResult {
    /// Change in value per second.
    pub slope: f64,
    pub intercept: f64,
    pub mean: f64,
    pub std_deviation: f64,
    pub r_squared: f64,
    pub direction: TrendDirection,
    /// 0 to 100, scaled from r².
    pub strength: f64,
}

/// Severity bands for detected anomalies.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, strum::Display, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
pub enum AnomalySeverity {
    Minor,
    Moderate,
    Severe,
}

/// One point flagged as anomalous.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyResult {
    pub timestamp: Timestamp,
    pub value: f64,
    pub expected_value: f64,
    pub z_score: f64,
    pub severity: AnomalySeverity,
    pub description: String,
}

/// One forecast point with its confidence band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionPoint {
    pub timestamp: Timestamp,
    pub predicted_value: f64,
    pub confidence_lower: f64,
    pub confidence_upper: f64,
    pub confidence_level: f64,
}

fn seconds_since(first: Timestamp, point: Timestamp) -> f64 {
    (point.as_millisecond() - first.as_millisecond()) as f64 / 1_000.0
}

/// Least-squares linear regression over a series.
///
/// The direction is stable when the per-minute change stays within 1 % of
/// the mean; strength scales r² to 0..100.
pub fn analyze_trend(points: &[TrendPoint]) -> TrendResult {
    let mut result = TrendResult::default();
    if points.len() < 2 {
        return result;
    }

    let first = points[0].timestamp;
    let xs: Vec<f64> = points
        .iter()
        .map(|point| seconds_since(first, point.timestamp))
        .collect();
    let ys: Vec<f64> = points.iter().map(|point| point.value).collect();

    let x_mean = xs.iter().sum::<f64>() / xs.len() as f64;
    let y_mean = ys.iter().sum::<f64>() / ys.len() as f64;
    result.mean = y_mean;

    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for (x, y) in xs.iter().zip(&ys) {
        numerator += (x - x_mean) * (y - y_mean);
        denominator += (x - x_mean) * (x - x_mean);
    }
    if denominator != 0.0 {
        result.slope = numerator / denominator;
        result.intercept = y_mean - result.slope * x_mean;
    }

    let mut ss_tot = 0.0;
    let mut ss_res = 0.0;
    for (x, y) in xs.iter().zip(&ys) {
        let predicted = result.slope * x + result.intercept;
        ss_tot += (y - y_mean) * (y - y_mean);
        ss_res += (y - predicted) * (y - predicted);
    }
    result.std_deviation = (ss_tot / ys.len() as f64).sqrt();
    result.r_squared = if ss_tot != 0.0 {
        1.0 - ss_res / ss_tot
    } else {
        0.0
    };

    let slope_per_minute = result.slope * 60.0;
    result.direction = if slope_per_minute.abs() < 0.01 * result.mean.abs() {
        TrendDirection::Stable
    } else if slope_per_minute > 0.0 {
        TrendDirection::Increasing
    } else {
        TrendDirection::Decreasing
    };
    result.strength = (result.r_squared.abs() * 100.0).min(100.0);

    result
}

/// Simple moving average over a window; empty when the series is shorter
/// than the window.
pub fn moving_average(points: &[TrendPoint], window: usize) -> Vec<TrendPoint> {
    if window == 0 || points.len() < window {
        return Vec::new();
    }
    points
        .windows(window)
        .map(|slice| {
            let sum: f64 = slice.iter().map(|point| point.value).sum();
            TrendPoint::new(slice[slice.len() - 1].timestamp, sum / window as f64)
        })
        .collect()
}

/// Exponential moving average with smoothing factor `alpha`.
pub fn exponential_moving_average(points: &[TrendPoint], alpha: f64) -> Vec<TrendPoint> {
    let mut smoothed: Vec<TrendPoint> = Vec::with_capacity(points.len());
    for point in points {
        let value = match smoothed.last() {
            Some(previous) => alpha * point.value + (1.0 - alpha) * previous.value,
            None => point.value,
        };
        smoothed.push(TrendPoint::new(point.timestamp, value));
    }
    smoothed
}

/// Z-score anomaly detection with the given threshold in standard
/// deviations. Requires at least ten points.
pub fn detect_anomalies(points: &[TrendPoint], threshold: f64) -> Vec<AnomalyResult> {
    if points.len() < MIN_DETECTION_POINTS {
        return Vec::new();
    }

    let mean = points.iter().map(|point| point.value).sum::<f64>() / points.len() as f64;
    let variance = points
        .iter()
        .map(|point| (point.value - mean) * (point.value - mean))
        .sum::<f64>()
        / points.len() as f64;
    let std_dev = variance.sqrt();

    points
        .iter()
        .filter_map(|point| {
            let z_score = if std_dev != 0.0 {
                (point.value - mean) / std_dev
            } else {
                0.0
            };
            if z_score.abs() <= threshold {
                return None;
            }

            let severity = if z_score.abs() > 5.0 {
                AnomalySeverity::Severe
            } else if z_score.abs() > 4.0 {
                AnomalySeverity::Moderate
            } else {
                AnomalySeverity::Minor
            };

            Some(AnomalyResult {
                timestamp: point.timestamp,
                value: point.value,
                expected_value: mean,
                z_score,
                severity,
                description: format!(
                    "Value {} deviates {:.2} standard deviations from mean",
                    point.value,
                    z_score.abs()
                ),
            })
        })
        .collect()
}

/// Linear extrapolation of the regression over `horizon`, producing
/// `count` evenly spaced points with a 95 % confidence band from the
/// residual standard error.
pub fn predict_linear(
    points: &[TrendPoint],
    horizon: SignedDuration,
    count: usize,
) -> Vec<PredictionPoint> {
    if points.len() < 3 || count == 0 {
        return Vec::new();
    }

    let trend = analyze_trend(points);
    let standard_error = trend.std_deviation * (1.0 - trend.r_squared).max(0.0).sqrt();
    let first = points[0].timestamp;
    let last = points[points.len() - 1].timestamp;
    let step_ms = horizon.as_millis() / count as i128;

    (1..=count)
        .map(|index| {
            let timestamp = last + SignedDuration::from_millis((step_ms * index as i128) as i64);
            let elapsed = seconds_since(first, timestamp);
            let predicted_value = trend.slope * elapsed + trend.intercept;
            let margin = 1.96 * standard_error;
            PredictionPoint {
                timestamp,
                predicted_value,
                confidence_lower: predicted_value - margin,
                confidence_upper: predicted_value + margin,
                confidence_level: 0.95,
            }
        })
        .collect()
}

/// Autocorrelation search for a dominant period.
///
/// Returns the lag (in points) with the highest correlation above 0.5, or
/// zero when none qualifies. A non-zero `period_hint` narrows the search
/// to half..double the hint.
pub fn detect_seasonality(points: &[TrendPoint], period_hint: usize) -> usize {
    if points.len() < MIN_SEASONALITY_POINTS {
        return 0;
    }

    let values: Vec<f64> = points.iter().map(|point| point.value).collect();
    let mean = values.iter().sum::<f64>() / values.len() as f64;

    let min_period = (if period_hint > 0 { period_hint / 2 } else { 2 }).max(2);
    let max_period = if period_hint > 0 {
        period_hint * 2
    } else {
        values.len() / 3
    };

    let mut best_period = 0;
    let mut best_correlation = 0.0;

    for lag in min_period..=max_period.min(values.len().saturating_sub(1)) {
        let mut correlation = 0.0;
        let mut variance_head = 0.0;
        let mut variance_tail = 0.0;
        for index in 0..values.len() - lag {
            let head = values[index] - mean;
            let tail = values[index + lag] - mean;
            correlation += head * tail;
            variance_head += head * head;
            variance_tail += tail * tail;
        }
        if variance_head > 0.0 && variance_tail > 0.0 {
            correlation /= (variance_head * variance_tail).sqrt();
            if correlation > best_correlation && correlation > SEASONALITY_CORRELATION_FLOOR {
                best_correlation = correlation;
                best_period = lag;
            }
        }
    }

    best_period
}

/// CUSUM change-point detection over first differences.
///
/// The threshold is `(3 - 2 * sensitivity) * std_dev`, so higher
/// sensitivity flags smaller shifts.
pub fn detect_change_points(points: &[TrendPoint], sensitivity: f64) -> Vec<usize> {
    if points.len() < MIN_DETECTION_POINTS {
        return Vec::new();
    }

    let values: Vec<f64> = points.iter().map(|point| point.value).collect();
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let std_dev = (values
        .iter()
        .map(|value| (value - mean) * (value - mean))
        .sum::<f64>()
        / values.len() as f64)
        .sqrt();

    let threshold = (3.0 - 2.0 * sensitivity) * std_dev;
    let mut change_points = Vec::new();
    let mut cusum_pos = 0.0f64;
    let mut cusum_neg = 0.0f64;

    for index in 1..values.len() {
        let diff = values[index] - values[index - 1];
        cusum_pos = (cusum_pos + diff - threshold / 2.0).max(0.0);
        cusum_neg = (cusum_neg - diff - threshold / 2.0).max(0.0);

        if cusum_pos > threshold || cusum_neg > threshold {
            change_points.push(index);
            cusum_pos = 0.0;
            cusum_neg = 0.0;
        }
    }

    change_points
}

/// Pearson correlation between two equal-length series.
pub fn correlation(series_a: &[TrendPoint], series_b: &[TrendPoint]) -> f64 {
    if series_a.len() != series_b.len() || series_a.is_empty() {
        return 0.0;
    }

    let mean_a = series_a.iter().map(|point| point.value).sum::<f64>() / series_a.len() as f64;
    let mean_b = series_b.iter().map(|point| point.value).sum::<f64>() / series_b.len() as f64;

    let mut covariance = 0.0;
    let mut variance_a = 0.0;
    let mut variance_b = 0.0;
    for (a, b) in series_a.iter().zip(series_b) {
        let diff_a = a.value - mean_a;
        let diff_b = b.value - mean_b;
        covariance += diff_a * diff_b;
        variance_a += diff_a * diff_a;
        variance_b += diff_b * diff_b;
    }

    if variance_a == 0.0 || variance_b == 0.0 {
        return 0.0;
    }
    covariance / (variance_a * variance_b).sqrt()
}

/// Forecast when the series crosses `capacity_limit`.
///
/// Returns `None` for flat or decreasing trends; when the latest value
/// already exceeds the limit, returns its timestamp.
pub fn predict_capacity_exhaustion(
    points: &[TrendPoint],
    capacity_limit: f64,
) -> Option<Timestamp> {
    if points.len() < 5 {
        return None;
    }

    let trend = analyze_trend(points);
    if trend.slope <= 0.0 {
        return None;
    }

    let last = points[points.len() - 1];
    if last.value >= capacity_limit {
        return Some(last.timestamp);
    }

    let seconds_to_limit = (capacity_limit - trend.intercept) / trend.slope;
    if seconds_to_limit < 0.0 {
        return None;
    }

    Some(points[0].timestamp + SignedDuration::from_secs(seconds_to_limit as i64))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(values: &[f64]) -> Vec<TrendPoint> {
        let base = Timestamp::now();
        values
            .iter()
            .enumerate()
            .map(|(index, value)| {
                TrendPoint::new(base + SignedDuration::from_secs(index as i64), *value)
            })
            .collect()
    }

    #[test]
    fn test_increasing_trend() {
        let points = series(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let trend = analyze_trend(&points);

        assert!((trend.slope - 1.0).abs() < 1e-9);
        assert_eq!(trend.direction, TrendDirection::Increasing);
        assert!(trend.r_squared > 0.99);
        assert!(trend.strength > 99.0);
    }

    #[test]
    fn test_stable_trend() {
        let points = series(&[100.0, 100.001, 100.0, 99.999, 100.0, 100.001]);
        let trend = analyze_trend(&points);
        assert_eq!(trend.direction, TrendDirection::Stable);
    }

    #[test]
    fn test_moving_average_window() {
        let points = series(&[1.0, 2.0, 3.0, 4.0]);
        let averaged = moving_average(&points, 2);
        let values: Vec<f64> = averaged.iter().map(|point| point.value).collect();
        assert_eq!(values, vec![1.5, 2.5, 3.5]);

        assert!(moving_average(&points, 10).is_empty());
    }

    #[test]
    fn test_ema_smooths_towards_new_values() {
        let points = series(&[0.0, 10.0]);
        let smoothed = exponential_moving_average(&points, 0.5);
        assert_eq!(smoothed[0].value, 0.0);
        assert_eq!(smoothed[1].value, 5.0);
    }

    #[test]
    fn test_anomaly_detection_single_spike() {
        // ~100 points around 50, one spike at index 70.
        let mut values = Vec::new();
        for index in 0..100 {
            let wobble = match index % 4 {
                0 => -2.0,
                1 => 1.0,
                2 => 2.0,
                _ => -1.0,
            };
            values.push(50.0 + wobble);
        }
        values[70] = 80.0;

        let anomalies = detect_anomalies(&series(&values), 3.0);
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].value, 80.0);
        assert!(anomalies[0].severity >= AnomalySeverity::Moderate);
        assert!(anomalies[0].z_score.abs() > 3.0);
    }

    #[test]
    fn test_anomaly_detection_requires_ten_points() {
        let points = series(&[1.0, 2.0, 100.0]);
        assert!(detect_anomalies(&points, 3.0).is_empty());
    }

    #[test]
    fn test_every_flagged_point_exceeds_threshold() {
        let mut values: Vec<f64> = (0..50).map(|index| 10.0 + (index % 3) as f64).collect();
        values[10] = 60.0;
        values[30] = -40.0;

        let threshold = 3.0;
        for anomaly in detect_anomalies(&series(&values), threshold) {
            assert!(anomaly.z_score.abs() > threshold);
        }
    }

    #[test]
    fn test_linear_prediction_extends_trend() {
        let points = series(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let predictions = predict_linear(&points, SignedDuration::from_secs(5), 5);

        assert_eq!(predictions.len(), 5);
        let last = predictions[predictions.len() - 1];
        assert!((last.predicted_value - 10.0).abs() < 0.5);
        assert!(last.confidence_lower <= last.predicted_value);
        assert!(last.confidence_upper >= last.predicted_value);
        assert_eq!(last.confidence_level, 0.95);
    }

    #[test]
    fn test_seasonality_detects_period() {
        let values: Vec<f64> = (0..60)
            .map(|index| (index % 6) as f64 * 10.0)
            .collect();
        let period = detect_seasonality(&series(&values), 0);
        assert_eq!(period, 6);
    }

    #[test]
    fn test_seasonality_hint_of_one_keeps_minimum_lag() {
        // A hint of 1 must not admit lag 0 (self-correlation is always
        // 1.0); the search floor stays at lag 2.
        let values: Vec<f64> = (0..40)
            .map(|index| if index % 2 == 0 { 0.0 } else { 10.0 })
            .collect();
        let period = detect_seasonality(&series(&values), 1);
        assert_eq!(period, 2);
    }

    #[test]
    fn test_seasonality_on_noise_is_zero() {
        // Digits of pi as a fixed aperiodic sequence.
        let values: Vec<f64> = [
            3.0, 1.0, 4.0, 1.0, 5.0, 9.0, 2.0, 6.0, 5.0, 3.0, 5.0, 8.0, 9.0, 7.0, 9.0, 3.0, 2.0,
            3.0, 8.0, 4.0, 6.0, 2.0, 6.0, 4.0, 3.0, 3.0, 8.0, 3.0, 2.0, 7.0, 9.0, 5.0, 0.0, 2.0,
            8.0, 8.0, 4.0, 1.0, 9.0, 7.0,
        ]
        .to_vec();
        let period = detect_seasonality(&series(&values), 17);
        assert_eq!(period, 0);
    }

    #[test]
    fn test_change_point_detection() {
        let mut values = vec![10.0; 20];
        values.extend(vec![50.0; 20]);

        let change_points = detect_change_points(&series(&values), 0.5);
        assert!(change_points.contains(&20));
    }

    #[test]
    fn test_correlation_of_identical_series() {
        let points = series(&[1.0, 3.0, 2.0, 5.0, 4.0]);
        assert!((correlation(&points, &points) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_capacity_exhaustion_on_growth() {
        let points = series(&[10.0, 20.0, 30.0, 40.0, 50.0]);
        let eta = predict_capacity_exhaustion(&points, 100.0).unwrap();
        // Slope 10/s from a base of 10: the limit is ~9 seconds out.
        let delta = eta.as_millisecond() - points[0].timestamp.as_millisecond();
        assert!((8_000..=10_000).contains(&delta));
    }

    #[test]
    fn test_capacity_exhaustion_flat_or_decreasing() {
        assert!(predict_capacity_exhaustion(&series(&[5.0; 6]), 100.0).is_none());
        assert!(
            predict_capacity_exhaustion(&series(&[50.0, 40.0, 30.0, 20.0, 10.0]), 100.0).is_none()
        );
    }

    #[test]
    fn test_capacity_already_exceeded() {
        let points = series(&[10.0, 30.0, 60.0, 90.0, 120.0]);
        let eta = predict_capacity_exhaustion(&points, 100.0).unwrap();
        assert_eq!(eta, points[points.len() - 1].timestamp);
    }
}
