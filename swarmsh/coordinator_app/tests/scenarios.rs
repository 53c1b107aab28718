use std::{sync::Arc, time::Duration};

use span_log::{now_unix, MemorySpanLog, SharedLog, Span, SpanLog};
use swarmsh_autonomy::DecisionKind;
use swarmsh_coordinator::{Coordinator, CoordinatorConfig};
use swarmsh_remediation::{ActionKind, ActionStatus};
use swarmsh_window::HealthBand;

fn coordinator(raw: &str) -> (Coordinator, SharedLog) {
    let log = MemorySpanLog::shared();
    let config = CoordinatorConfig::parse(raw, ".").unwrap();
    (Coordinator::with_log(config, Arc::clone(&log)).unwrap(), log)
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn names(log: &SharedLog) -> Vec<String> {
    log.read_from(0, usize::MAX)
        .into_iter()
        .map(|entry| entry.span.name.clone())
        .collect()
}

#[tokio::test]
async fn passed_motion_starts_sprint_planning() {
    let raw = r#"
        [[agents]]
        id = "roberts"
        kind = "roberts"

        [[agents]]
        id = "scrum"
        kind = "scrum"
    "#;
    let (coordinator, log) = coordinator(raw);
    let coordinator = Arc::new(coordinator);
    let running = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.run().await })
    };

    log.append(Span::new("swarmsh.roberts.open").with_attr("motion_id", "m1"))
        .await
        .unwrap();
    wait_for(|| {
        coordinator
            .registry()
            .get("roberts")
            .is_some_and(|status| status.state == "open")
    })
    .await;

    log.append(
        Span::new("swarmsh.roberts.vote")
            .with_attr("motion_id", "m1")
            .with_attr("result", "passed"),
    )
    .await
    .unwrap();
    wait_for(|| names(&log).iter().any(|name| name == "swarmsh.scrum.plan")).await;
    wait_for(|| {
        coordinator
            .registry()
            .get("roberts")
            .is_some_and(|status| status.state == "closed")
    })
    .await;

    let plan = log
        .read_from(0, usize::MAX)
        .into_iter()
        .find(|entry| entry.span.name == "swarmsh.scrum.plan")
        .unwrap();
    assert_eq!(plan.span.attr_str("motion_id"), Some("m1"));

    coordinator.shutdown();
    let report = running.await.unwrap().unwrap();
    let roberts = report.agents.iter().find(|run| run.id == "roberts").unwrap();
    assert_eq!(roberts.summary.unwrap().transitions, 2);
    assert!(report.dispatch.succeeded >= 1);
}

fn batch(base: f64, total: usize, errors: usize) -> Vec<Span> {
    (0..total)
        .map(|idx| {
            let span = Span::new("swarmsh.work.complete")
                .at(base + idx as f64 * 0.1)
                .with_attr("agent.name", format!("worker-{}", idx % 3));
            if idx < errors {
                span.with_attr("error", true).with_attr("work.status", "failed")
            } else {
                span.with_attr("work.status", "completed")
            }
        })
        .collect()
}

#[tokio::test]
async fn error_spike_leads_to_restart() {
    let (coordinator, log) = coordinator("");
    let base = now_unix();

    for span in batch(base, 100, 1) {
        log.append(span).await.unwrap();
    }
    let calm = coordinator.window().tick_at(base + 10.5).await;
    assert!((calm.snapshot.error_rate - 0.01).abs() < 1e-9);
    assert!(calm.alerts.is_empty());

    for span in batch(base + 100.0, 100, 15) {
        log.append(span).await.unwrap();
    }
    let spiking = coordinator.window().tick_at(base + 110.5).await;
    assert_eq!(spiking.snapshot.span_count, 100);
    assert!((spiking.snapshot.error_rate - 0.15).abs() < 1e-9);
    let spike = spiking
        .alerts
        .iter()
        .find(|alert| alert.kind == "error_spike")
        .unwrap();
    assert!((spike.severity - 2.0).abs() < 1e-9);
    assert_eq!(spike.evidence_span_ids.len(), 15);
    assert_eq!(coordinator.alerts().of_kind("error_spike").len(), 1);
    assert!(names(&log).iter().any(|name| name == "swarmsh.alert.error_spike"));

    let cycle = coordinator.decisions().run_cycle().await;
    let restart = cycle
        .decisions
        .iter()
        .find(|decision| decision.kind == DecisionKind::RestartService)
        .unwrap();
    assert!(restart.confidence >= 0.6);
    assert_eq!(cycle.decisions[0].kind, DecisionKind::RestartService);

    let executed = cycle
        .execution
        .executed
        .iter()
        .find(|executed| executed.decision.kind == DecisionKind::RestartService)
        .unwrap();
    let action = executed.action.as_ref().unwrap();
    assert_eq!(action.request.kind, ActionKind::RestartService);
    assert_eq!(action.status, ActionStatus::Succeeded);
    assert!(names(&log)
        .iter()
        .any(|name| name == "swarmsh.remediation.restart_service"));
}

#[tokio::test]
async fn long_queue_degrades_and_prioritises_coordination() {
    let (coordinator, log) = coordinator("");
    let base = now_unix();
    for idx in 0..20 {
        let status = if idx < 9 { "completed" } else { "failed" };
        log.append(
            Span::new("swarmsh.work.update")
                .at(base + f64::from(idx))
                .with_attr("work.status", status)
                .with_attr("agent.name", format!("worker-{}", idx % 3)),
        )
        .await
        .unwrap();
    }
    log.append(
        Span::new("swarmsh.queue.depth")
            .at(base + 20.0)
            .with_attr("queue.size", 15_i64),
    )
    .await
    .unwrap();

    let tick = coordinator.window().tick_at(base + 30.0).await;
    assert_eq!(tick.snapshot.queue_size, 15);
    assert!((tick.snapshot.completion_rate - 0.45).abs() < 1e-9);
    assert_eq!(tick.snapshot.band, HealthBand::Degraded);

    let metrics = coordinator.decisions().analyze().unwrap();
    assert_eq!(metrics.band, HealthBand::Degraded);
    let decisions = coordinator.decisions().decide(&metrics);
    let coordination = decisions
        .iter()
        .position(|decision| decision.kind == DecisionKind::CoordinationImprove)
        .unwrap();
    assert_eq!(coordination, 0);
    assert!(decisions[coordination].priority > 4);
    let optimize = decisions
        .iter()
        .position(|decision| decision.kind == DecisionKind::Optimize)
        .unwrap_or(usize::MAX);
    assert!(coordination < optimize);
}
