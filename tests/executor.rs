mod common;

use common::mock_pool::{MockPool, Record, Script};
use common::{get, init_tracing};
use leash::telemetry::{ExchangeEvent, MemorySink};
use leash::{Client, ClientConfig, ClientError, Disposition, RequestKey};
use std::error::Error as _;
use std::sync::Arc;
use std::time::Duration;

fn client(pool: &Arc<MockPool>) -> Client<MockPool> {
    Client::builder(pool.clone()).build()
}

#[tokio::test]
async fn success_releases_once_after_the_response_is_dropped() {
    init_tracing();
    let pool = Arc::new(MockPool::new().fresh(Script::ok()));
    let client = client(&pool);

    let response = client.execute(&get("http://example.com/")).await.unwrap();
    assert!(response.status().is_success());
    assert_eq!(response.body(), "conn-0");
    assert_eq!(response.attempts(), 1);
    assert_eq!(response.key(), Some(&RequestKey::new("http", "example.com")));
    assert!(pool.records().is_empty(), "connection stays borrowed while the response is held");

    drop(response);
    assert_eq!(
        pool.records(),
        vec![Record { id: 0, disposition: Disposition::Release, stages_left: 0 }]
    );
    assert!(pool.invalidated().is_empty());
    pool.assert_exactly_once();
}

#[tokio::test]
async fn explicit_release_and_invalidate_on_the_response() {
    let pool = Arc::new(MockPool::new());
    let client = client(&pool);

    client.execute(&get("http://example.com/a")).await.unwrap().release();
    client.execute(&get("http://example.com/b")).await.unwrap().invalidate();

    assert_eq!(pool.released(), vec![0]);
    assert_eq!(pool.invalidated(), vec![1]);
    pool.assert_exactly_once();
}

#[tokio::test]
async fn fresh_connection_closed_is_connect_failure_without_retry() {
    let pool = Arc::new(MockPool::new().fresh(Script::Close));
    let client = client(&pool);

    let err = client.execute(&get("http://unreachable.test/")).await.unwrap_err();
    assert!(err.is_connect_failed(), "got {err:?}");
    assert!(err.to_string().contains("http://unreachable.test"));
    assert_eq!(pool.borrow_count(), 1, "an unreachable endpoint must not be retried");
    assert_eq!(pool.invalidated(), vec![0]);
    assert!(pool.released().is_empty());
    pool.assert_exactly_once();
}

#[tokio::test]
async fn stale_pooled_connection_is_retried_transparently() {
    let pool = Arc::new(MockPool::new().reused(Script::Close).fresh(Script::ok()));
    let client = client(&pool);

    let response = client.execute(&get("http://example.com/retry")).await.unwrap();
    assert_eq!(response.attempts(), 2);
    assert_eq!(response.body(), "conn-1");
    assert_eq!(pool.invalidated(), vec![0]);

    drop(response);
    assert_eq!(pool.released(), vec![1]);
    let keys = pool.borrowed_keys();
    assert_eq!(keys.len(), 2);
    assert_eq!(keys[0], keys[1], "retry borrows from the same partition");
    pool.assert_exactly_once();
}

#[tokio::test]
async fn consecutive_stale_connections_are_all_retried() {
    let pool = Arc::new(
        MockPool::new()
            .reused(Script::Close)
            .reused(Script::Close)
            .reused(Script::Close)
            .reused(Script::ok()),
    );
    let client = client(&pool);

    let response = client.execute(&get("http://example.com/")).await.unwrap();
    assert_eq!(response.attempts(), 4);
    drop(response);

    assert_eq!(pool.invalidated(), vec![0, 1, 2]);
    assert_eq!(pool.released(), vec![3]);
    pool.assert_exactly_once();
}

#[tokio::test]
async fn stale_then_fresh_closed_reports_connect_failure() {
    let pool = Arc::new(MockPool::new().reused(Script::Close).fresh(Script::Close));
    let client = client(&pool);

    let err = client.execute(&get("http://example.com/")).await.unwrap_err();
    assert!(err.is_connect_failed());
    assert_eq!(pool.invalidated(), vec![0, 1]);
    pool.assert_exactly_once();
}

#[tokio::test]
async fn stale_retry_bound_gives_up() {
    let pool = Arc::new(
        MockPool::new().reused(Script::Close).reused(Script::Close).reused(Script::ok()),
    );
    let client = Client::builder(pool.clone())
        .config(ClientConfig::builder().max_stale_retries(1).build())
        .build();

    let err = client.execute(&get("http://example.com/")).await.unwrap_err();
    match err {
        ClientError::StaleRetriesExhausted { key, retries } => {
            assert_eq!(key, RequestKey::new("http", "example.com"));
            assert_eq!(retries, 1);
        }
        other => panic!("expected StaleRetriesExhausted, got {other:?}"),
    }
    assert_eq!(pool.borrow_count(), 2);
    assert_eq!(pool.invalidated(), vec![0, 1]);
    pool.assert_exactly_once();
}

#[tokio::test]
async fn exchange_failure_is_passed_through_and_invalidates() {
    let pool = Arc::new(MockPool::new().reused(Script::Fail("connection reset by peer")));
    let client = client(&pool);

    let err = client.execute(&get("http://example.com/")).await.unwrap_err();
    assert!(err.is_exchange());
    assert_eq!(err.to_string(), "connection reset by peer");
    assert_eq!(err.into_exchange().unwrap().kind(), std::io::ErrorKind::ConnectionReset);
    assert_eq!(pool.borrow_count(), 1, "only a closed endpoint is retried");
    assert_eq!(pool.invalidated(), vec![0]);
    pool.assert_exactly_once();
}

#[tokio::test]
async fn invalidate_failures_do_not_change_the_outcome() {
    let pool = Arc::new(MockPool::new().reused(Script::Close).fresh(Script::ok()));
    pool.set_fail_invalidate(true);
    let client = client(&pool);

    let response = client.execute(&get("http://example.com/")).await.unwrap();
    assert_eq!(response.attempts(), 2);
    drop(response);
    pool.assert_exactly_once();
}

#[tokio::test]
async fn borrow_failure_surfaces_with_its_source() {
    let pool = Arc::new(MockPool::new());
    pool.set_fail_borrow(true);
    let client = client(&pool);

    let err = client.execute(&get("https://example.com/")).await.unwrap_err();
    assert!(matches!(err, ClientError::Borrow { .. }), "got {err:?}");
    assert_eq!(err.source().map(|s| s.to_string()), Some("pool shut down".to_string()));
    assert!(pool.records().is_empty());
}

#[tokio::test]
async fn request_without_authority_is_rejected_before_borrowing() {
    let pool = Arc::new(MockPool::new());
    let client = client(&pool);

    let err = client.execute(&get("/no-host")).await.unwrap_err();
    assert!(matches!(err, ClientError::InvalidTarget { ref target } if target == "/no-host"));
    assert_eq!(pool.borrow_count(), 0);
}

#[tokio::test]
async fn requests_to_one_origin_share_a_key() {
    let pool = Arc::new(MockPool::new());
    let client = client(&pool);

    drop(client.execute(&get("HTTP://Example.com:80/a")).await.unwrap());
    drop(client.execute(&get("http://example.com/b?q=1")).await.unwrap());
    drop(client.execute(&get("http://example.com:8080/")).await.unwrap());

    let keys = pool.borrowed_keys();
    assert_eq!(keys[0], keys[1]);
    assert_ne!(keys[1], keys[2]);
}

#[tokio::test]
async fn telemetry_traces_a_stale_retry() {
    let pool = Arc::new(MockPool::new().reused(Script::Close).fresh(Script::ok()));
    let sink = MemorySink::new();
    let client = Client::builder(pool.clone()).telemetry(sink.clone()).build();

    drop(client.execute(&get("http://example.com/")).await.unwrap());

    let events = sink.events();
    assert_eq!(events.len(), 4, "{events:?}");
    assert_eq!(events[0], ExchangeEvent::Borrowed { attempt: 1, fresh: false });
    assert_eq!(events[1], ExchangeEvent::StaleRetry { attempt: 1 });
    assert_eq!(events[2], ExchangeEvent::Borrowed { attempt: 2, fresh: true });
    assert!(matches!(events[3], ExchangeEvent::Completed { attempts: 2, .. }));
}

#[tokio::test]
async fn telemetry_reports_connect_failure() {
    let pool = Arc::new(MockPool::new().fresh(Script::Close));
    let sink = MemorySink::new();
    let client = Client::builder(pool.clone()).telemetry(sink.clone()).build();

    client.execute(&get("http://example.com/")).await.unwrap_err();

    let events = sink.events();
    assert_eq!(events[1], ExchangeEvent::ConnectFailed);
    assert!(matches!(events.last(), Some(ExchangeEvent::Failed { .. })));
}

#[tokio::test]
async fn config_updates_apply_to_later_calls() {
    let pool = Arc::new(
        MockPool::new().reused(Script::Close).reused(Script::ok()).reused(Script::Close),
    );
    let client = client(&pool);

    drop(client.execute(&get("http://example.com/")).await.unwrap());

    client.config().set(ClientConfig::builder().max_stale_retries(0).build());
    let err = client.execute(&get("http://example.com/")).await.unwrap_err();
    assert!(matches!(err, ClientError::StaleRetriesExhausted { retries: 0, .. }));
    pool.assert_exactly_once();
}

#[tokio::test]
async fn clones_share_the_pool() {
    let pool = Arc::new(MockPool::new());
    let client = client(&pool);
    let other = client.clone();

    let req1 = get("http://example.com/1");
    let req2 = get("http://example.com/2");
    let (a, b) = tokio::join!(client.execute(&req1), other.execute(&req2),);
    drop((a.unwrap(), b.unwrap()));
    assert_eq!(pool.released().len(), 2);
    assert!(Arc::ptr_eq(client.manager(), other.manager()));
    pool.assert_exactly_once();
}

#[tokio::test(start_paused = true)]
async fn zero_stale_retries_still_makes_the_first_attempt() {
    let pool = Arc::new(MockPool::new().reused(Script::ok()));
    let client = Client::builder(pool.clone())
        .config(
            ClientConfig::builder()
                .max_stale_retries(0)
                .request_timeout(Duration::from_secs(1))
                .build(),
        )
        .build();
    let response = client.execute(&get("http://example.com/")).await.unwrap();
    assert_eq!(response.attempts(), 1);
}
