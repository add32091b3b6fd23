//! Prometheus metrics collection and formatting.
//!
//! This module provides metrics in Prometheus text exposition format.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use waypoint_core::BarrierState;

/// Counters maintained by the coordination engines.
#[derive(Debug, Default)]
pub struct Metrics {
    assignment_checks: AtomicU64,
    assignment_rejections: AtomicU64,
    whitelist_hits: AtomicU64,
    whitelist_misses: AtomicU64,
    barrier_evaluations: AtomicU64,
    barriers_down: AtomicU64,
    barriers_endured: AtomicU64,
    monitor_ticks: AtomicU64,
}

impl Metrics {
    pub fn record_assignment(&self, assignable: bool) {
        self.assignment_checks.fetch_add(1, Ordering::Relaxed);
        if !assignable {
            self.assignment_rejections.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_whitelist(&self, whitelisted: bool) {
        let counter = if whitelisted {
            &self.whitelist_hits
        } else {
            &self.whitelist_misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_barrier_evaluation(&self) {
        self.barrier_evaluations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_barrier_transition(&self, state: BarrierState) {
        match state {
            BarrierState::Down => self.barriers_down.fetch_add(1, Ordering::Relaxed),
            BarrierState::Endure => self.barriers_endured.fetch_add(1, Ordering::Relaxed),
            BarrierState::Standing => 0,
        };
    }

    pub fn record_monitor_tick(&self) {
        self.monitor_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn barrier_transitions(&self, state: BarrierState) -> u64 {
        match state {
            BarrierState::Down => self.barriers_down.load(Ordering::Relaxed),
            BarrierState::Endure => self.barriers_endured.load(Ordering::Relaxed),
            BarrierState::Standing => 0,
        }
    }

    /// Format all counters as Prometheus text.
    pub fn render(&self) -> String {
        let mut output = String::new();

        self.render_assignment(&mut output);
        self.render_barriers(&mut output);

        output
    }

    fn render_assignment(&self, output: &mut String) {
        let checks = self.assignment_checks.load(Ordering::Relaxed);
        let rejections = self.assignment_rejections.load(Ordering::Relaxed);
        let hits = self.whitelist_hits.load(Ordering::Relaxed);
        let misses = self.whitelist_misses.load(Ordering::Relaxed);

        writeln!(
            output,
            "# HELP waypoint_assignment_checks_total Delegate eligibility checks by outcome"
        )
        .ok();
        writeln!(output, "# TYPE waypoint_assignment_checks_total counter").ok();
        writeln!(
            output,
            "waypoint_assignment_checks_total{{outcome=\"assignable\"}} {}",
            checks.saturating_sub(rejections)
        )
        .ok();
        writeln!(
            output,
            "waypoint_assignment_checks_total{{outcome=\"rejected\"}} {rejections}"
        )
        .ok();

        writeln!(output).ok();
        writeln!(
            output,
            "# HELP waypoint_whitelist_lookups_total Whitelist lookups by result"
        )
        .ok();
        writeln!(output, "# TYPE waypoint_whitelist_lookups_total counter").ok();
        writeln!(output, "waypoint_whitelist_lookups_total{{result=\"hit\"}} {hits}").ok();
        writeln!(output, "waypoint_whitelist_lookups_total{{result=\"miss\"}} {misses}").ok();
    }

    fn render_barriers(&self, output: &mut String) {
        let evaluations = self.barrier_evaluations.load(Ordering::Relaxed);
        let down = self.barriers_down.load(Ordering::Relaxed);
        let endured = self.barriers_endured.load(Ordering::Relaxed);
        let ticks = self.monitor_ticks.load(Ordering::Relaxed);

        writeln!(output).ok();
        writeln!(
            output,
            "# HELP waypoint_barrier_evaluations_total Barrier state evaluations"
        )
        .ok();
        writeln!(output, "# TYPE waypoint_barrier_evaluations_total counter").ok();
        writeln!(output, "waypoint_barrier_evaluations_total {evaluations}").ok();

        writeln!(output).ok();
        writeln!(
            output,
            "# HELP waypoint_barrier_transitions_total Barriers that reached a terminal state"
        )
        .ok();
        writeln!(output, "# TYPE waypoint_barrier_transitions_total counter").ok();
        writeln!(output, "waypoint_barrier_transitions_total{{state=\"down\"}} {down}").ok();
        writeln!(
            output,
            "waypoint_barrier_transitions_total{{state=\"endure\"}} {endured}"
        )
        .ok();

        writeln!(output).ok();
        writeln!(
            output,
            "# HELP waypoint_barrier_monitor_ticks_total Barrier monitor scans"
        )
        .ok();
        writeln!(output, "# TYPE waypoint_barrier_monitor_ticks_total counter").ok();
        writeln!(output, "waypoint_barrier_monitor_ticks_total {ticks}").ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_empty_metrics() {
        let output = Metrics::default().render();

        assert!(output.contains("waypoint_assignment_checks_total{outcome=\"assignable\"} 0"));
        assert!(output.contains("waypoint_whitelist_lookups_total{result=\"miss\"} 0"));
        assert!(output.contains("waypoint_barrier_transitions_total{state=\"down\"} 0"));
        assert!(output.contains("waypoint_barrier_monitor_ticks_total 0"));
    }

    #[test]
    fn test_render_counts() {
        let metrics = Metrics::default();
        metrics.record_assignment(true);
        metrics.record_assignment(false);
        metrics.record_barrier_transition(BarrierState::Endure);

        let output = metrics.render();
        assert!(output.contains("waypoint_assignment_checks_total{outcome=\"assignable\"} 1"));
        assert!(output.contains("waypoint_assignment_checks_total{outcome=\"rejected\"} 1"));
        assert!(output.contains("waypoint_barrier_transitions_total{state=\"endure\"} 1"));
    }
}
