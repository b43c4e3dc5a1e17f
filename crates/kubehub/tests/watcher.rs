use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use kube::core::{ApiResource, DynamicObject, ErrorResponse, GroupVersionKind};
use ksync_kubehub::{ObjectWatcher, RetryError, WatchError};
use tokio_util::sync::CancellationToken;

fn config_map(name: &str, rv: &str) -> DynamicObject {
    let ar = ApiResource::from_gvk(&GroupVersionKind::gvk("", "v1", "ConfigMap"));
    let mut obj = DynamicObject::new(name, &ar);
    obj.metadata.resource_version = Some(rv.to_string());
    obj
}

fn not_found() -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".into(),
        message: "configmaps \"cm\" not found".into(),
        reason: "NotFound".into(),
        code: 404,
    })
}

fn immediate(name: &'static str) -> ObjectWatcher {
    ObjectWatcher::with_poll(CancellationToken::new(), name, move || async move { Ok::<_, kube::Error>(config_map(name, "1")) })
        .with_interval(Duration::from_millis(10))
}

#[tokio::test]
async fn timeout_wins_over_slow_poll() {
    let w = ObjectWatcher::with_poll(CancellationToken::new(), "cm", || async {
        tokio::time::sleep(Duration::from_secs(2)).await;
        Ok::<_, kube::Error>(config_map("cm", "1"))
    });
    let calls = AtomicUsize::new(0);
    let started = Instant::now();
    let err = w
        .watch_until(
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                true
            },
            Duration::from_millis(100),
        )
        .await
        .unwrap_err();
    assert!(err.is_timeout(), "{err}");
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(err.last_object().is_none());
}

#[tokio::test]
async fn first_poll_satisfies_predicate() {
    let obj = immediate("cm").watch_until(|_| true, Duration::from_secs(5)).await.unwrap();
    assert_eq!(obj.metadata.name.as_deref(), Some("cm"));
}

#[tokio::test]
async fn predicate_never_true_times_out_with_last_object() {
    let err = immediate("cm").watch_until(|_| false, Duration::from_millis(150)).await.unwrap_err();
    assert!(err.is_timeout());
    let last = err.last_object().expect("a poll completed before the deadline");
    assert_eq!(last.metadata.resource_version.as_deref(), Some("1"));
    assert!(err.to_string().contains("ConfigMap/cm"), "{err}");
}

#[tokio::test]
async fn poll_error_ends_watch_until() {
    let w = ObjectWatcher::with_poll(CancellationToken::new(), "cm", || async { Err::<DynamicObject, _>(not_found()) });
    let err = w.watch_until(|_| true, Duration::from_secs(5)).await.unwrap_err();
    assert!(matches!(err, WatchError::Poll { .. }), "{err}");
}

#[tokio::test]
async fn pre_cancelled_retry_until_fails() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let w = ObjectWatcher::with_poll(cancel, "cm", || async { Ok::<_, kube::Error>(config_map("cm", "1")) });
    let err = w.retry_until(|_, _| Ok(()), Duration::from_secs(5)).await.unwrap_err();
    assert!(err.is_cancelled(), "{err}");
}

#[tokio::test]
async fn cancellation_mid_session() {
    let cancel = CancellationToken::new();
    let w = ObjectWatcher::with_poll(cancel.clone(), "cm", || async { Ok::<_, kube::Error>(config_map("cm", "7")) })
        .with_interval(Duration::from_millis(10));
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });
    let err = w.watch_until(|_| false, Duration::from_secs(10)).await.unwrap_err();
    assert!(err.is_cancelled());
    assert!(err.last_object().is_some());
}

#[tokio::test]
async fn permanent_retry_error_is_returned() {
    let err = immediate("cm")
        .retry_until(|_, _| Err(RetryError::permanent("immutable field changed")), Duration::from_secs(5))
        .await
        .unwrap_err();
    match err {
        WatchError::Retry { source, .. } => {
            assert!(!source.retryable);
            assert_eq!(source.to_string(), "immutable field changed");
        }
        other => panic!("unexpected {other}"),
    }
}

#[tokio::test]
async fn retryable_errors_keep_polling() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let seen = attempts.clone();
    let w = ObjectWatcher::with_poll(CancellationToken::new(), "cm", move || {
        let n = seen.fetch_add(1, Ordering::SeqCst);
        async move { if n < 2 { Err(not_found()) } else { Ok(config_map("cm", "3")) } }
    })
    .with_interval(Duration::from_millis(10));

    let obj = w
        .retry_until(
            |obj, err| match (obj, err) {
                (Some(_), None) => Ok(()),
                (_, Some(e)) => Err(RetryError::retryable(e.to_string())),
                (None, None) => Err(RetryError::permanent("no outcome")),
            },
            Duration::from_secs(5),
        )
        .await
        .unwrap();
    assert_eq!(obj.and_then(|o| o.metadata.resource_version), Some("3".to_string()));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}
