//! Threshold-based autoscaling with smoothed metrics and cooldown.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use jiff::Timestamp;
use tracing::debug;

use crate::TRACING_TARGET_OPTIMIZER;
use crate::snapshot::MetricsSnapshot;

/// EMA smoothing factor applied to observed loads.
const SMOOTHING_ALPHA: f64 = 0.3;
/// Maximum retained scaling decisions.
const MAX_HISTORY: usize = 100;
/// Memory budget used to express usage as a percentage.
const MEMORY_BUDGET_BYTES: f64 = 4.0 * 1024.0 * 1024.0 * 1024.0;

/// Scaling thresholds and pacing.
#[derive(Debug, Clone)]
pub struct ScalingPolicy {
    pub cpu_threshold_up: f64,
    pub cpu_threshold_down: f64,
    pub memory_threshold_up: f64,
    pub memory_threshold_down: f64,
    pub cooldown: Duration,
    pub scale_factor: f64,
    pub initial_resources: usize,
}

impl Default for ScalingPolicy {
    fn default() -> Self {
        Self {
            cpu_threshold_up: 80.0,
            cpu_threshold_down: 30.0,
            memory_threshold_up: 80.0,
            memory_threshold_down: 30.0,
            cooldown: Duration::from_secs(60),
            scale_factor: 1.5,
            initial_resources: 4,
        }
    }
}

/// Recommended scaling action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ScalingAction {
    #[default]
    None,
    ScaleUp,
    ScaleDown,
}

/// One scaling recommendation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScalingDecision {
    pub action: ScalingAction,
    pub confidence: f64,
    pub recommended_resources: usize,
    pub reason: String,
}

struct ScalerState {
    smoothed_cpu: f64,
    smoothed_memory: f64,
    current_resources: usize,
    last_scale: Instant,
}

/// Decides when to grow or shrink a pool.
///
/// Observed loads are smoothed with an EMA before being compared against
/// the policy thresholds; decisions are only taken outside the cooldown
/// window and recorded in a bounded history.
pub struct AutoScaler {
    policy: ScalingPolicy,
    state: Mutex<ScalerState>,
    history: Mutex<VecDeque<(Timestamp, ScalingDecision)>>,
}

impl std::fmt::Debug for AutoScaler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoScaler")
            .field("resources", &self.current_resources())
            .finish()
    }
}

impl AutoScaler {
    pub fn new(policy: ScalingPolicy) -> Self {
        let initial = policy.initial_resources.max(1);
        // Start outside the cooldown so the first decision is live.
        let last_scale = Instant::now()
            .checked_sub(policy.cooldown)
            .unwrap_or_else(Instant::now);
        Self {
            policy,
            state: Mutex::new(ScalerState {
                smoothed_cpu: 0.0,
                smoothed_memory: 0.0,
                current_resources: initial,
                last_scale,
            }),
            history: Mutex::new(VecDeque::new()),
        }
    }

    /// Decide from a captured snapshot; memory is expressed against a
    /// 4 GiB budget.
    pub fn decide(&self, snapshot: &MetricsSnapshot) -> ScalingDecision {
        let memory_percent =
            snapshot.system.memory_usage_bytes as f64 / MEMORY_BUDGET_BYTES * 100.0;
        self.decide_from_loads(snapshot.system.cpu_usage_percent, memory_percent)
    }

    /// Decide from raw cpu and memory percentages.
    pub fn decide_from_loads(&self, cpu_load: f64, memory_load: f64) -> ScalingDecision {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if state.last_scale.elapsed() < self.policy.cooldown {
            return ScalingDecision {
                action: ScalingAction::None,
                reason: "In cooldown period".to_owned(),
                recommended_resources: state.current_resources,
                ..Default::default()
            };
        }

        state.smoothed_cpu =
            SMOOTHING_ALPHA * cpu_load + (1.0 - SMOOTHING_ALPHA) * state.smoothed_cpu;
        state.smoothed_memory =
            SMOOTHING_ALPHA * memory_load + (1.0 - SMOOTHING_ALPHA) * state.smoothed_memory;

        let mut decision = ScalingDecision {
            recommended_resources: state.current_resources,
            ..Default::default()
        };

        if state.smoothed_cpu > self.policy.cpu_threshold_up
            || state.smoothed_memory > self.policy.memory_threshold_up
        {
            decision.action = ScalingAction::ScaleUp;
            decision.confidence = ((state.smoothed_cpu - self.policy.cpu_threshold_up)
                .max(state.smoothed_memory - self.policy.memory_threshold_up)
                / 20.0)
                .clamp(0.0, 1.0);
            decision.recommended_resources =
                (state.current_resources as f64 * self.policy.scale_factor).ceil() as usize;
            decision.reason = "High resource utilization".to_owned();
        } else if state.smoothed_cpu < self.policy.cpu_threshold_down
            && state.smoothed_memory < self.policy.memory_threshold_down
        {
            decision.action = ScalingAction::ScaleDown;
            decision.confidence = ((self.policy.cpu_threshold_down - state.smoothed_cpu)
                .max(self.policy.memory_threshold_down - state.smoothed_memory)
                / 20.0)
                .clamp(0.0, 1.0);
            decision.recommended_resources = ((state.current_resources as f64
                / self.policy.scale_factor)
                .floor() as usize)
                .max(1);
            decision.reason = "Low resource utilization".to_owned();
        }

        if decision.action != ScalingAction::None {
            state.current_resources = decision.recommended_resources;
            state.last_scale = Instant::now();
            drop(state);
            self.record(decision.clone());
            debug!(
                target: TRACING_TARGET_OPTIMIZER,
                action = %decision.action,
                resources = decision.recommended_resources,
                confidence = decision.confidence,
                "scaling decision"
            );
        }

        decision
    }

    /// Decide from a forecast load over `horizon`.
    pub fn decide_predictive(&self, predicted_load: f64, horizon: Duration) -> ScalingDecision {
        let state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut decision = ScalingDecision {
            recommended_resources: state.current_resources,
            ..Default::default()
        };

        if predicted_load > self.policy.cpu_threshold_up {
            decision.action = ScalingAction::ScaleUp;
            decision.confidence =
                ((predicted_load - self.policy.cpu_threshold_up) / 20.0).clamp(0.0, 1.0);
            decision.recommended_resources =
                (state.current_resources as f64 * self.policy.scale_factor).ceil() as usize;
            decision.reason = format!("Predicted high load in {} seconds", horizon.as_secs());
        } else if predicted_load < self.policy.cpu_threshold_down {
            decision.action = ScalingAction::ScaleDown;
            decision.confidence =
                ((self.policy.cpu_threshold_down - predicted_load) / 20.0).clamp(0.0, 1.0);
            decision.recommended_resources = ((state.current_resources as f64
                / self.policy.scale_factor)
                .floor() as usize)
                .max(1);
            decision.reason = format!("Predicted low load in {} seconds", horizon.as_secs());
        }

        decision
    }

    /// The resource count after the most recent decision.
    pub fn current_resources(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .current_resources
    }

    /// Up to `count` most recent decisions, oldest first.
    pub fn history(&self, count: usize) -> Vec<(Timestamp, ScalingDecision)> {
        let history = self
            .history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let skip = history.len().saturating_sub(count);
        history.iter().skip(skip).cloned().collect()
    }

    fn record(&self, decision: ScalingDecision) {
        let mut history = self
            .history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if history.len() >= MAX_HISTORY {
            history.pop_front();
        }
        history.push_back((Timestamp::now(), decision));
    }
}
