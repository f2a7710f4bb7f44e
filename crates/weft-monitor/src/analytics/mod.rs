//! Trend, anomaly, forecast, and alerting analytics over metric series.

mod alerts;
mod trend;

pub use alerts::{AlertCondition, AlertEvent, AlertManager, AlertSeverity};
pub use trend::{
    AnomalyResult, AnomalySeverity, PredictionPoint, TrendDirection, TrendPoint, TrendResult,
    analyze_trend, correlation, detect_anomalies, detect_change_points, detect_seasonality,
    exponential_moving_average, moving_average, predict_capacity_exhaustion, predict_linear,
};
