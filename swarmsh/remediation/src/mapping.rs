use span_log::PatternAlert;

use crate::action::{ActionKind, ActionOrigin, ActionRequest};

/// Action carrying out a decision of the given kind.
#[must_use]
pub fn action_for_decision(decision_kind: &str) -> Option<ActionKind> {
    let kind = match decision_kind {
        "scale_up" => ActionKind::ScaleUp,
        "scale_down" => ActionKind::ScaleDown,
        "restart_service" => ActionKind::RestartService,
        "coordination_improve" => ActionKind::ThrottleRequests,
        "optimize" => ActionKind::ClearCache,
        "health_check" | "telemetry_enhance" => ActionKind::HealthCheck,
        _ => return None,
    };
    Some(kind)
}

/// Action answering an alert of the given kind.
#[must_use]
pub fn action_for_alert(alert_kind: &str) -> Option<ActionKind> {
    let kind = match alert_kind {
        "error_spike" => ActionKind::RestartService,
        "latency_increase" => ActionKind::ClearCache,
        "throughput_drop" => ActionKind::ScaleUp,
        "cascade_failure" => ActionKind::CircuitBreaker,
        _ => return None,
    };
    Some(kind)
}

/// Request answering `alert` against `target`, when the alert kind has a remedy.
#[must_use]
pub fn request_for_alert(alert: &PatternAlert, target: &str) -> Option<ActionRequest> {
    action_for_alert(&alert.kind).map(|kind| {
        ActionRequest::new(kind, target, format!("{}: {}", alert.kind, alert.message))
            .with_origin(ActionOrigin::Alert(alert.id))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_decision_kind_maps() {
        for kind in [
            "scale_up",
            "scale_down",
            "restart_service",
            "coordination_improve",
            "optimize",
            "health_check",
            "telemetry_enhance",
        ] {
            assert!(action_for_decision(kind).is_some(), "{kind}");
        }
        assert_eq!(action_for_decision("noop"), None);
    }

    #[test]
    fn alerts_map_to_requests() {
        let alert = PatternAlert::new("cascade_failure", "cascade_failure", 1.0, "db, api, queue");
        let request = request_for_alert(&alert, "swarm").unwrap();
        assert_eq!(request.kind, ActionKind::CircuitBreaker);
        assert_eq!(request.origin, ActionOrigin::Alert(alert.id));
        let other = PatternAlert::new("agent:roberts", "agent_error", 1.0, "boom");
        assert!(request_for_alert(&other, "swarm").is_none());
    }
}
