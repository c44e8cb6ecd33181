//! Integration tests for the liveness monitor
use anyhow::Result;

use crate::test_harness::TestEnvironment;
use dailog_session::health::SERVER_LOST_MESSAGE;
use dailog_session::{ClientEvent, ProbeOutcome, View};

#[tokio::test]
async fn test_unreachable_server_clears_state_once() -> Result<()> {
    let mut env = TestEnvironment::new().await;
    env.logged_in_with("token").await;
    env.ctx.store.set_field("draft", "unsaved").await?;

    let probe = env
        .server
        .mock("GET", "/api/health-check")
        .with_status(500)
        .expect(3)
        .create_async()
        .await;

    let first = env.ctx.health.tick().await;
    assert_eq!(first, ProbeOutcome::Down { consecutive_failures: 1 });
    assert!(!env.ctx.session.is_logged_in());
    assert_eq!(env.ctx.store.get_field("draft").await.as_deref(), Some("unsaved"));

    env.ctx.health.tick().await;
    env.ctx.health.tick().await;
    assert!(env.ctx.store.get_field("draft").await.is_none());

    let alerts = env.ctx.alerts.active().await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].message, SERVER_LOST_MESSAGE);
    assert_eq!(env.count_events("local_state_cleared").await, 1);

    probe.assert_async().await;
    Ok(())
}

#[tokio::test]
async fn test_recovery_after_outage() -> Result<()> {
    let mut env = TestEnvironment::new().await;

    let down = env
        .server
        .mock("GET", "/api/health-check")
        .with_status(503)
        .expect(1)
        .create_async()
        .await;
    assert!(matches!(env.ctx.health.tick().await, ProbeOutcome::Down { .. }));
    down.assert_async().await;
    down.remove_async().await;

    env.server
        .mock("GET", "/api/health-check")
        .with_status(200)
        .create_async()
        .await;
    assert_eq!(env.ctx.health.tick().await, ProbeOutcome::Recovered);
    assert_eq!(env.ctx.health.tick().await, ProbeOutcome::Alive);

    let recovered = env
        .ctx
        .events
        .recent()
        .await
        .into_iter()
        .filter(|e| *e == ClientEvent::ServerRecovered { navigate_to: View::Home })
        .count();
    assert_eq!(recovered, 1);
    Ok(())
}

#[tokio::test]
async fn test_connection_refused_counts_as_down() -> Result<()> {
    // Nothing listens on port 9 locally
    let env = TestEnvironment::with_config(|config| {
        config.api.base_url = "http://127.0.0.1:9".to_string();
    })
    .await;

    assert_eq!(
        env.ctx.health.check_server_status().await,
        ProbeOutcome::Down { consecutive_failures: 1 }
    );
    Ok(())
}
