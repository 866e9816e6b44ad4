//! End-to-end scenarios over the events fixture (10 rows, 3 shards of
//! sizes {4,3,3}) across 1/2/4-worker clusters and fan-ins {2,8}, plus the
//! failure-semantics and determinism invariants.

mod support;

use std::sync::Arc;
use std::time::{Duration, Instant};

use msf_common::{MsfError, Value};
use msf_engine::cancel_pair;
use support::*;

const WORKER_COUNTS: [usize; 3] = [1, 2, 4];
const FANINS: [usize; 2] = [2, 8];

fn int(v: i64) -> Value {
    Value::Int(v)
}

fn float(v: f64) -> Value {
    Value::Float(v)
}

fn text(v: &str) -> Value {
    Value::Str(v.to_string())
}

#[tokio::test]
async fn s1_select_star_returns_all_rows() {
    for workers in WORKER_COUNTS {
        for fanin in FANINS {
            let cluster = events_cluster(workers, fanin).await;
            let result = cluster
                .database
                .query(cluster.db_path(), "SELECT * FROM events")
                .await
                .expect("s1");
            assert_eq!(
                result.columns,
                vec!["event_id", "user_id", "event_type", "value", "event_time"]
            );
            assert_eq!(
                result.types,
                vec!["integer", "integer", "varchar", "double", "timestamp"]
            );
            assert_eq!(result.row_count, 10);
            assert_eq!(sorted(result.rows), sorted(fixture_rows()));
        }
    }
}

#[tokio::test]
async fn s2_filtered_projection() {
    for workers in WORKER_COUNTS {
        for fanin in FANINS {
            let cluster = events_cluster(workers, fanin).await;
            let result = cluster
                .database
                .query(
                    cluster.db_path(),
                    "SELECT event_id, value FROM events \
                     WHERE event_type = 'click' AND value > 1.0",
                )
                .await
                .expect("s2");
            assert_eq!(
                sorted(result.rows),
                vec![
                    vec![int(1), float(1.5)],
                    vec![int(2), float(2.0)],
                    vec![int(4), float(3.5)],
                ]
            );
        }
    }
}

#[tokio::test]
async fn s3_scalar_count_and_sum() {
    for workers in WORKER_COUNTS {
        for fanin in FANINS {
            let cluster = events_cluster(workers, fanin).await;
            let result = cluster
                .database
                .query(
                    cluster.db_path(),
                    "SELECT COUNT(*) AS n, SUM(value) AS total_value FROM events",
                )
                .await
                .expect("s3");
            assert_eq!(result.columns, vec!["n", "total_value"]);
            assert_eq!(result.rows, vec![vec![int(10), float(58.5)]]);
        }
    }
}

#[tokio::test]
async fn s4_grouped_count() {
    for workers in WORKER_COUNTS {
        for fanin in FANINS {
            let cluster = events_cluster(workers, fanin).await;
            let result = cluster
                .database
                .query(
                    cluster.db_path(),
                    "SELECT event_type, COUNT(*) AS n_events FROM events GROUP BY event_type",
                )
                .await
                .expect("s4");
            assert_eq!(
                sorted(result.rows),
                vec![
                    vec![text("click"), int(5)],
                    vec![text("purchase"), int(2)],
                    vec![text("view"), int(3)],
                ]
            );
        }
    }
}

#[tokio::test]
async fn s5_grouped_count_with_filter() {
    for workers in WORKER_COUNTS {
        for fanin in FANINS {
            let cluster = events_cluster(workers, fanin).await;
            let result = cluster
                .database
                .query(
                    cluster.db_path(),
                    "SELECT event_type, COUNT(*) AS n_events FROM events \
                     WHERE value >= 1.0 GROUP BY event_type",
                )
                .await
                .expect("s5");
            assert_eq!(
                sorted(result.rows),
                vec![
                    vec![text("click"), int(4)],
                    vec![text("purchase"), int(2)],
                    vec![text("view"), int(1)],
                ]
            );
        }
    }
}

const S6_SQL: &str = "SELECT event_type, COUNT(*) AS n, SUM(value) AS total, \
                      AVG(value) AS avg FROM events \
                      WHERE user_id IS NOT NULL GROUP BY event_type";

fn s6_expected() -> Vec<Vec<Value>> {
    vec![
        vec![text("click"), int(5), float(7.0), float(1.4)],
        vec![text("purchase"), int(2), float(50.0), float(25.0)],
        vec![text("view"), int(1), float(0.0), float(0.0)],
    ]
}

#[tokio::test]
async fn s6_grouped_sum_and_recomposed_avg() {
    for workers in WORKER_COUNTS {
        for fanin in FANINS {
            let cluster = events_cluster(workers, fanin).await;
            let result = cluster
                .database
                .query(cluster.db_path(), S6_SQL)
                .await
                .expect("s6");
            assert_eq!(result.columns, vec!["event_type", "n", "total", "avg"]);
            assert_eq!(sorted(result.rows), s6_expected());
        }
    }
}

#[tokio::test]
async fn reduce_fanin_does_not_change_aggregates() {
    let mut baseline = None;
    for fanin in [2, 3, 4, 8, 32] {
        let cluster = events_cluster(2, fanin).await;
        let grouped = cluster
            .database
            .query(cluster.db_path(), S6_SQL)
            .await
            .expect("grouped");
        let scalar = cluster
            .database
            .query(
                cluster.db_path(),
                "SELECT COUNT(*) AS n, SUM(value) AS s, AVG(value) AS a FROM events",
            )
            .await
            .expect("scalar");
        let observed = (sorted(grouped.rows), scalar.rows);
        match &baseline {
            None => baseline = Some(observed),
            Some(expected) => assert_eq!(&observed, expected, "fanin {fanin} diverged"),
        }
    }
}

#[tokio::test]
async fn repeated_executions_are_byte_identical() {
    let cluster = events_cluster(4, 2).await;
    let first = cluster
        .database
        .query(cluster.db_path(), S6_SQL)
        .await
        .expect("first run");
    for _ in 0..5 {
        let again = cluster
            .database
            .query(cluster.db_path(), S6_SQL)
            .await
            .expect("repeat run");
        assert_eq!(again.rows, first.rows);
    }
}

#[tokio::test]
async fn retryable_failures_do_not_change_results() {
    // Fail the first attempt of several tasks; every task retries on
    // another worker and the final result matches a clean run.
    let clean = events_cluster(2, 2).await;
    let expected = clean
        .database
        .query(clean.db_path(), S6_SQL)
        .await
        .expect("clean run");

    let flaky = build_cluster(2, test_config(2), |inner| {
        Arc::new(FlakyClient::new(inner, 3))
    });
    load_events(&flaky).await;
    let result = flaky
        .database
        .query(flaky.db_path(), S6_SQL)
        .await
        .expect("flaky run succeeds via retries");
    assert_eq!(sorted(result.rows), sorted(expected.rows));
}

#[tokio::test]
async fn exhausted_retries_fail_the_query() {
    // Keep the failure threshold out of the way so the per-task retry
    // budget, not worker blacklisting, decides the outcome.
    let config = msf_common::EngineConfig {
        failure_threshold: 1_000,
        ..test_config(2)
    };
    let cluster = build_cluster(2, config, |inner| {
        Arc::new(FlakyClient::new(inner, 1_000))
    });
    // Loading goes through the catalog only; the transport is not involved
    // until SELECT fans out.
    load_events(&cluster).await;
    let err = cluster
        .database
        .query(cluster.db_path(), "SELECT COUNT(*) AS n FROM events")
        .await
        .unwrap_err();
    assert!(matches!(err, MsfError::TaskFailed(_)), "got {err:?}");
}

#[tokio::test]
async fn no_workers_is_raised_not_hung() {
    let config = msf_common::EngineConfig {
        acquire_timeout_ms: 200,
        ..test_config(2)
    };
    let cluster = build_cluster(0, config, |inner| Arc::new(inner));
    load_events(&cluster).await;
    let started = Instant::now();
    let err = cluster
        .database
        .query(cluster.db_path(), "SELECT COUNT(*) AS n FROM events")
        .await
        .unwrap_err();
    assert!(matches!(err, MsfError::NoWorkers(_)), "got {err:?}");
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn query_deadline_is_fatal() {
    let config = msf_common::EngineConfig {
        query_timeout_ms: 150,
        ..test_config(2)
    };
    let cluster = build_cluster(2, config, |inner| {
        Arc::new(SlowClient::new(inner, Duration::from_secs(5)))
    });
    load_events(&cluster).await;
    let err = cluster
        .database
        .query(cluster.db_path(), "SELECT COUNT(*) AS n FROM events")
        .await
        .unwrap_err();
    assert!(matches!(err, MsfError::Timeout(_)), "got {err:?}");
}

#[tokio::test]
async fn cancellation_unwinds_with_cancelled() {
    let config = msf_common::EngineConfig {
        cancel_grace_ms: 200,
        ..test_config(2)
    };
    let cluster = build_cluster(2, config, |inner| {
        Arc::new(SlowClient::new(inner, Duration::from_secs(30)))
    });
    load_events(&cluster).await;

    let (handle, token) = cancel_pair();
    let query = cluster.database.query_with_cancel(
        cluster.db_path(),
        "SELECT COUNT(*) AS n FROM events",
        token,
    );
    tokio::pin!(query);

    let started = Instant::now();
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_millis(100)) => handle.cancel(),
        _ = &mut query => panic!("query finished before cancellation"),
    }
    let err = query.await.unwrap_err();
    assert!(matches!(err, MsfError::Cancelled), "got {err:?}");
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn empty_table_aggregates_yield_identity_row() {
    let cluster = build_cluster(1, test_config(2), |inner| Arc::new(inner));
    cluster
        .database
        .query(cluster.db_path(), EVENTS_DDL)
        .await
        .expect("create");
    let scalar = cluster
        .database
        .query(
            cluster.db_path(),
            "SELECT COUNT(*) AS n, SUM(value) AS s, AVG(value) AS a FROM events",
        )
        .await
        .expect("scalar over empty table");
    assert_eq!(scalar.rows, vec![vec![int(0), Value::Null, Value::Null]]);

    let rows = cluster
        .database
        .query(cluster.db_path(), "SELECT * FROM events")
        .await
        .expect("pass-through over empty table");
    assert_eq!(rows.row_count, 0);
    assert_eq!(rows.columns.len(), 5);

    let grouped = cluster
        .database
        .query(
            cluster.db_path(),
            "SELECT event_type, COUNT(*) AS n FROM events GROUP BY event_type",
        )
        .await
        .expect("grouped over empty table");
    assert_eq!(grouped.row_count, 0);
}

#[tokio::test]
async fn ddl_lifecycle_and_if_exists_flags() {
    let cluster = build_cluster(1, test_config(2), |inner| Arc::new(inner));
    let db = cluster.db_path();

    cluster.database.query(db, EVENTS_DDL).await.expect("create");
    let err = cluster.database.query(db, EVENTS_DDL).await.unwrap_err();
    assert!(matches!(err, MsfError::AlreadyExists(_)));
    cluster
        .database
        .query(db, &format!("{EVENTS_DDL} IF NOT EXISTS"))
        .await
        .expect("create if not exists");

    let source = write_source(db, "rows.jsonl", &fixture_rows());
    let insert = cluster
        .database
        .query(
            db,
            &format!("INSERT INTO events FROM '{}' ROWS PER SHARD 4", source.display()),
        )
        .await
        .expect("insert");
    assert_eq!(
        insert.rows[0][0],
        text("Inserted 10 rows into 'events' (3 shards)")
    );

    cluster
        .database
        .query(db, "DROP TABLE events")
        .await
        .expect("drop");
    let err = cluster
        .database
        .query(db, "SELECT * FROM events")
        .await
        .unwrap_err();
    assert!(matches!(err, MsfError::NotFound(_)));
    cluster
        .database
        .query(db, "DROP TABLE events IF EXISTS")
        .await
        .expect("drop if exists");
}

#[tokio::test]
async fn insert_into_missing_table_is_not_found() {
    let cluster = build_cluster(1, test_config(2), |inner| Arc::new(inner));
    let source = write_source(cluster.db_path(), "rows.jsonl", &fixture_rows());
    let err = cluster
        .database
        .query(
            cluster.db_path(),
            &format!("INSERT INTO nope FROM '{}'", source.display()),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, MsfError::NotFound(_)));
}

#[tokio::test]
async fn parse_errors_surface_as_parse_kind() {
    let cluster = build_cluster(1, test_config(2), |inner| Arc::new(inner));
    let err = cluster
        .database
        .query(cluster.db_path(), "SELECT FROM WHERE")
        .await
        .unwrap_err();
    assert!(matches!(err, MsfError::Parse(_)));
    assert_eq!(err.http_status(), 400);
}
