//! Threshold alerting with cooldowns and bounded history.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use jiff::Timestamp;

/// Maximum retained alert events.
const MAX_HISTORY: usize = 1_000;

/// Alert severities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

/// Predicate over an observed metric value.
pub type AlertPredicate = Arc<dyn Fn(f64) -> bool + Send + Sync>;

/// A user-supplied alert condition.
///
/// The message template may reference `{value}` and `{metric}`; both are
/// substituted when the alert fires.
#[derive(Clone)]
pub struct AlertCondition {
    pub name: String,
    pub predicate: AlertPredicate,
    pub severity: AlertSeverity,
    pub message_template: String,
    pub cooldown: Duration,
}

impl AlertCondition {
    pub fn new(
        name: impl Into<String>,
        predicate: impl Fn(f64) -> bool + Send + Sync + 'static,
        severity: AlertSeverity,
        message_template: impl Into<String>,
        cooldown: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            predicate: Arc::new(predicate),
            severity,
            message_template: message_template.into(),
            cooldown,
        }
    }
}

impl std::fmt::Debug for AlertCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertCondition")
            .field("name", &self.name)
            .field("severity", &self.severity)
            .field("cooldown", &self.cooldown)
            .finish()
    }
}

/// A fired alert.
#[derive(Debug, Clone)]
pub struct AlertEvent {
    pub condition_name: String,
    pub severity: AlertSeverity,
    pub timestamp: Timestamp,
    pub value: f64,
    pub message: String,
}

/// Evaluates alert conditions against observed metric values.
///
/// A condition inside its cooldown window is skipped. History is bounded
/// with FIFO eviction.
#[derive(Debug, Default)]
pub struct AlertManager {
    conditions: Vec<AlertCondition>,
    last_fired: HashMap<String, Instant>,
    history: VecDeque<AlertEvent>,
}

impl AlertManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a condition.
    pub fn add_condition(&mut self, condition: AlertCondition) {
        self.conditions.push(condition);
    }

    /// Evaluate every condition against `value`, returning the fired events.
    pub fn evaluate(&mut self, metric_name: &str, value: f64) -> Vec<AlertEvent> {
        let now = Instant::now();
        let mut events = Vec::new();

        for condition in &self.conditions {
            if !(condition.predicate)(value) {
                continue;
            }
            if let Some(fired_at) = self.last_fired.get(&condition.name) {
                if fired_at.elapsed() < condition.cooldown {
                    continue;
                }
            }

            let message = condition
                .message_template
                .replace("{value}", &value.to_string())
                .replace("{metric}", metric_name);
            let event = AlertEvent {
                condition_name: condition.name.clone(),
                severity: condition.severity,
                timestamp: Timestamp::now(),
                value,
                message,
            };

            self.last_fired.insert(condition.name.clone(), now);
            if self.history.len() >= MAX_HISTORY {
                self.history.pop_front();
            }
            self.history.push_back(event.clone());
            events.push(event);
        }

        events
    }

    /// Up to `count` most recent alerts, oldest first.
    pub fn recent_alerts(&self, count: usize) -> Vec<AlertEvent> {
        let skip = self.history.len().saturating_sub(count);
        self.history.iter().skip(skip).cloned().collect()
    }

    /// Event counts per severity.
    pub fn statistics(&self) -> HashMap<AlertSeverity, usize> {
        let mut stats = HashMap::new();
        for event in &self.history {
            *stats.entry(event.severity).or_insert(0) += 1;
        }
        stats
    }

    /// Drop all history and cooldown state.
    pub fn clear_history(&mut self) {
        self.history.clear();
        self.last_fired.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn high_cpu_condition(cooldown: Duration) -> AlertCondition {
        AlertCondition::new(
            "high-cpu",
            |value| value > 90.0,
            AlertSeverity::Critical,
            "{metric} at {value} exceeds limit",
            cooldown,
        )
    }

    #[test]
    fn test_alert_fires_with_substituted_message() {
        let mut manager = AlertManager::new();
        manager.add_condition(high_cpu_condition(Duration::ZERO));

        let events = manager.evaluate("cpu_usage", 95.0);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message, "cpu_usage at 95 exceeds limit");
        assert_eq!(events[0].severity, AlertSeverity::Critical);
    }

    #[test]
    fn test_condition_below_threshold_is_silent() {
        let mut manager = AlertManager::new();
        manager.add_condition(high_cpu_condition(Duration::ZERO));

        assert!(manager.evaluate("cpu_usage", 50.0).is_empty());
        assert!(manager.recent_alerts(10).is_empty());
    }

    #[test]
    fn test_cooldown_suppresses_repeat_alerts() {
        let mut manager = AlertManager::new();
        manager.add_condition(high_cpu_condition(Duration::from_secs(60)));

        assert_eq!(manager.evaluate("cpu_usage", 95.0).len(), 1);
        assert!(manager.evaluate("cpu_usage", 96.0).is_empty());
        assert_eq!(manager.recent_alerts(10).len(), 1);
    }

    #[test]
    fn test_statistics_by_severity() {
        let mut manager = AlertManager::new();
        manager.add_condition(high_cpu_condition(Duration::ZERO));
        manager.add_condition(AlertCondition::new(
            "low-memory",
            |value| value > 0.0,
            AlertSeverity::Warning,
            "memory pressure {value}",
            Duration::ZERO,
        ));

        manager.evaluate("cpu_usage", 95.0);
        manager.evaluate("cpu_usage", 97.0);

        let stats = manager.statistics();
        assert_eq!(stats[&AlertSeverity::Critical], 2);
        assert_eq!(stats[&AlertSeverity::Warning], 2);
    }

    #[test]
    fn test_clear_history_resets_cooldowns() {
        let mut manager = AlertManager::new();
        manager.add_condition(high_cpu_condition(Duration::from_secs(60)));

        manager.evaluate("cpu_usage", 95.0);
        manager.clear_history();

        assert!(manager.recent_alerts(10).is_empty());
        assert_eq!(manager.evaluate("cpu_usage", 95.0).len(), 1);
    }
}
