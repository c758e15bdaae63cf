//! Memoized read operations.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::test_config;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use voyage_cache::{CacheService, MemoizeError, build_key, namespaces};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Suggestion {
    term: String,
    results: Vec<String>,
}

#[derive(Debug, Clone)]
struct Query {
    term: String,
    locale: String,
}

fn query(term: &str) -> Query {
    Query {
        term: term.into(),
        locale: "en".into(),
    }
}

fn query_key(q: &Query) -> String {
    format!("{}:{}", q.term, q.locale)
}

async fn service() -> CacheService {
    CacheService::builder(test_config()).start().await.unwrap()
}

#[tokio::test]
async fn test_runs_once_per_key() {
    let service = service().await;
    let runs = Arc::new(AtomicUsize::new(0));

    let memo = {
        let runs = Arc::clone(&runs);
        service.memoizer(namespaces::SEARCH, None, query_key, move |q: Query| {
            let runs = Arc::clone(&runs);
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(Suggestion {
                    results: vec![format!("{} old town", q.term)],
                    term: q.term,
                })
            }
        })
    };

    let first = memo.call(query("porto")).await.unwrap();
    let second = memo.call(query("porto")).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.results, vec!["porto old town".to_string()]);
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    memo.call(query("faro")).await.unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);

    let key = build_key(namespaces::SEARCH, "porto:en", None).unwrap();
    assert!(service.orchestrator().memory().contains(key.as_str()));

    service.cleanup().await;
}

#[tokio::test]
async fn test_concurrent_first_calls_share_one_run() {
    let service = service().await;
    let runs = Arc::new(AtomicUsize::new(0));

    let memo = {
        let runs = Arc::clone(&runs);
        service.memoizer(namespaces::HOT, None, |n: &usize| format!("top:{n}"), move |n: usize| {
            let runs = Arc::clone(&runs);
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok::<_, String>((0..n as u32).collect::<Vec<u32>>())
            }
        })
    };

    let results = join_all((0..20).map(|_| memo.call(10usize))).await;
    for result in results {
        assert_eq!(result.unwrap(), (0..10).collect::<Vec<u32>>());
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    service.cleanup().await;
}

#[tokio::test]
async fn test_reruns_after_ttl() {
    let service = service().await;
    let runs = Arc::new(AtomicUsize::new(0));

    let memo = {
        let runs = Arc::clone(&runs);
        service.memoizer(
            namespaces::CATEGORY,
            Some(Duration::from_secs(1)),
            |id: &u32| id.to_string(),
            move |id: u32| {
                let runs = Arc::clone(&runs);
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(format!("category {id}"))
                }
            },
        )
    };

    assert_eq!(memo.call(3).await.unwrap(), "category 3");
    assert_eq!(memo.call(3).await.unwrap(), "category 3");
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(1300)).await;

    assert_eq!(memo.call(3).await.unwrap(), "category 3");
    assert_eq!(runs.load(Ordering::SeqCst), 2);

    service.cleanup().await;
}

#[tokio::test]
async fn test_errors_are_returned_and_not_cached() {
    let service = service().await;
    let runs = Arc::new(AtomicUsize::new(0));

    let memo = {
        let runs = Arc::clone(&runs);
        service.memoizer(namespaces::PRODUCT, None, |id: &u32| id.to_string(), move |_id: u32| {
            let runs = Arc::clone(&runs);
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                Err::<String, _>("catalog timeout".to_string())
            }
        })
    };

    match memo.call(1).await {
        Err(MemoizeError::Operation(e)) => assert_eq!(e, "catalog timeout"),
        other => panic!("expected operation error, got {other:?}"),
    }
    assert!(memo.call(1).await.is_err());
    assert_eq!(runs.load(Ordering::SeqCst), 2);

    service.cleanup().await;
}

#[tokio::test]
async fn test_undecodable_payload_is_recomputed() {
    let service = service().await;
    let key = build_key(namespaces::MEMO, "42", None).unwrap();
    service
        .orchestrator()
        .set(&key, vec![0xc1, 0xc1, 0xc1], None)
        .await
        .unwrap();

    let memo = service.memoizer(namespaces::MEMO, None, |id: &u32| id.to_string(), |id: u32| async move {
        Ok::<_, String>(Suggestion {
            term: id.to_string(),
            results: Vec::new(),
        })
    });

    let value = memo.call(42).await.unwrap();
    assert_eq!(value.term, "42");

    // The recomputed value replaced the bad payload.
    let again = memo.call(42).await.unwrap();
    assert_eq!(again, value);

    service.cleanup().await;
}
