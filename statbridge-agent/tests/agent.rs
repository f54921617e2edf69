use statbridge_agent::agent::Agent;
use statbridge_agent::config::Schedule;
use statbridge_metrics::catalog::{PROCESS_DEFINITIONS, QUEUE_INFO, SERVER_INFO};
use statbridge_metrics::sources::JsonFileSource;
use statbridge_metrics::{GaugeReading, SnapshotSource};
use std::sync::Arc;
use std::time::Duration;
use test_log::test;

fn schedule() -> Schedule {
    Schedule {
        delay: Duration::from_millis(20),
        fetch_timeout: Duration::from_secs(1),
        ..Default::default()
    }
}

#[test(tokio::test)]
async fn agent_polls_every_family() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(
        dir.path().join("processdefinitions.json"),
        r#"[{"Name": "OrderFlow", "Created": 3, "Completed": 2}]"#,
    )
    .expect("write");
    std::fs::write(
        dir.path().join("queueinfo.json"),
        r#"[{"QueueName": "orders", "PendingMessageCount": 4}]"#,
    )
    .expect("write");
    // serverinfo.json is missing: that probe fails every cycle without affecting the others

    let families = [PROCESS_DEFINITIONS, SERVER_INFO, QUEUE_INFO];
    let mut agent = Agent::new(&families, schedule(), |family| {
        Ok(Arc::new(JsonFileSource::in_dir(dir.path(), family)) as Arc<dyn SnapshotSource>)
    })
    .expect("agent");
    assert_eq!(agent.probes().len(), 3);

    agent.start();
    tokio::time::sleep(Duration::from_millis(100)).await;

    std::fs::write(
        dir.path().join("queueinfo.json"),
        r#"[{"QueueName": "orders", "PendingMessageCount": 5}]"#,
    )
    .expect("write");
    tokio::time::sleep(Duration::from_millis(100)).await;

    agent.stop();
    let registry = agent.registry().clone();
    let names: Vec<_> = agent
        .prometheus_registry()
        .gather()
        .iter()
        .map(|mf| mf.get_name().to_string())
        .collect();
    agent.join().await;

    assert_eq!(
        registry.readings("bwengine.processdefinition.completed"),
        vec![GaugeReading::new("OrderFlow", 2)]
    );
    assert_eq!(
        registry.readings("ems.queue.pending_messages"),
        vec![GaugeReading::new("orders", 5)]
    );
    assert!(names.contains(&"bwengine_processdefinition_created".to_string()));
    assert!(!names.iter().any(|n| n.starts_with("ems_server")));
}

#[test]
fn agent_needs_a_family() {
    let result = Agent::new(&[], schedule(), |_| unreachable!());
    assert!(result.is_err());
}

#[test]
fn source_errors_fail_construction() {
    let result = Agent::new(&[QUEUE_INFO], schedule(), |_| {
        Err(anyhow::anyhow!("no source"))
    });
    assert!(result.is_err());
}
