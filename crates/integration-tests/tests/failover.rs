mod harness;

use harness::config::{ConfigBuilder, TENANT};
use harness::mock_upstream::MockUpstream;
use harness::server::TestServer;
use serde_json::Value;

#[tokio::test]
async fn primary_succeeds_no_failover() {
    let primary = MockUpstream::start().await.unwrap();
    let backup = MockUpstream::start().await.unwrap();

    let config = ConfigBuilder::new()
        .with_channel(1, 10, &primary.base_url())
        .with_channel(2, 5, &backup.base_url())
        .build();
    let server = TestServer::start(config).await.unwrap();

    let resp = server.generate(false).send().await.unwrap();
    assert_eq!(resp.status(), 200);

    assert_eq!(primary.completion_count(), 1);
    assert_eq!(backup.completion_count(), 0);
}

#[tokio::test]
async fn primary_fails_falls_back_to_lower_tier() {
    let primary = MockUpstream::start_failing(1).await.unwrap();
    let backup = MockUpstream::start().await.unwrap();

    let config = ConfigBuilder::new()
        .with_channel(1, 10, &primary.base_url())
        .with_channel(2, 5, &backup.base_url())
        .build();
    let server = TestServer::start(config).await.unwrap();

    let resp = server.generate(false).send().await.unwrap();
    assert_eq!(resp.status(), 200);

    let json: Value = resp.json().await.unwrap();
    assert_eq!(json["content"], "Hello from mock");

    assert_eq!(primary.completion_count(), 1);
    assert_eq!(backup.completion_count(), 1);

    // Only the successful attempt is charged
    let tenant = server.settled(TENANT).await;
    assert_eq!(tenant["reserved_total"], 0);
}

#[tokio::test]
async fn single_tier_retries_same_channel() {
    let mock = MockUpstream::start_failing(1).await.unwrap();
    let config = ConfigBuilder::new().with_channel(1, 0, &mock.base_url()).build();
    let server = TestServer::start(config).await.unwrap();

    let resp = server.generate(false).send().await.unwrap();

    assert_eq!(resp.status(), 200);
    assert_eq!(mock.completion_count(), 2);
}

#[tokio::test]
async fn exhausted_retries_release_the_hold() {
    let primary = MockUpstream::start_failing(10).await.unwrap();
    let backup = MockUpstream::start_failing(10).await.unwrap();

    let config = ConfigBuilder::new()
        .with_channel(1, 10, &primary.base_url())
        .with_channel(2, 5, &backup.base_url())
        .build();
    let server = TestServer::start(config).await.unwrap();

    let resp = server.generate(false).send().await.unwrap();

    assert_eq!(resp.status(), 502);
    let json: Value = resp.json().await.unwrap();
    assert_eq!(json["error"]["type"], "upstream_error");

    // One attempt on the primary, the remaining retries on the last tier
    assert_eq!(primary.completion_count(), 1);
    assert_eq!(backup.completion_count(), 3);

    let tenant = server.tenant(TENANT).await;
    assert_eq!(tenant["balance"], 10_000);
    assert_eq!(tenant["reserved_total"], 0);
    assert_eq!(tenant["committed_total"], 0);
}
