use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use hierstore::client::{LookupOptions, Mutation, MutationOutcome, NativeQuery, RawRow};
use hierstore::{
    Connection, ConnectionConfig, ExponentialBackoff, Key, MemoryStore, StoreError,
    StoreTransport,
};

/// Transport failing the first `failures` calls with a canned error,
/// then delegating to an in-process store.
struct FlakyStore {
    inner: MemoryStore,
    failures: usize,
    error: String,
    attempts: AtomicUsize,
}

impl FlakyStore {
    fn new(failures: usize, error: &str) -> Self {
        Self {
            inner: MemoryStore::new(),
            failures,
            error: error.to_string(),
            attempts: AtomicUsize::new(0),
        }
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn gate(&self) -> hierstore::Result<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            Err(StoreError::Transport(self.error.clone()))
        } else {
            Ok(())
        }
    }
}

impl StoreTransport for FlakyStore {
    fn lookup(&self, key: &Key, options: &LookupOptions) -> hierstore::Result<Option<RawRow>> {
        self.gate()?;
        self.inner.lookup(key, options)
    }

    fn lookup_batch(
        &self,
        keys: &[Key],
        options: &LookupOptions,
    ) -> hierstore::Result<Vec<RawRow>> {
        self.gate()?;
        self.inner.lookup_batch(keys, options)
    }

    fn run_query(&self, query: &NativeQuery) -> hierstore::Result<Vec<RawRow>> {
        self.gate()?;
        self.inner.run_query(query)
    }

    fn commit(&self, mutations: &[Mutation]) -> hierstore::Result<Vec<MutationOutcome>> {
        self.gate()?;
        self.inner.commit(mutations)
    }
}

fn fast_config() -> ConnectionConfig {
    let _ = env_logger::builder().is_test(true).try_init();
    ConnectionConfig::new("default")
        .retry_base_delay(Duration::from_millis(1))
        .retry_max_delay(Duration::from_millis(2))
}

#[test]
fn transient_contention_is_retried_to_success() {
    let store = Arc::new(FlakyStore::new(
        2,
        "ABORTED: too much contention on these datastore entities",
    ));
    let conn = Connection::new(store.clone(), fast_config());
    let page = conn.kind("Person").get().unwrap();
    assert!(page.is_empty());
    assert_eq!(store.attempts(), 3);
}

#[test]
fn connection_reset_is_retried() {
    let store = Arc::new(FlakyStore::new(1, "read failed: Connection reset by peer"));
    let conn = Connection::new(store.clone(), fast_config());
    assert!(conn.kind("Person").find("alice").unwrap().is_none());
    assert_eq!(store.attempts(), 2);
}

#[test]
fn unavailable_status_is_retried() {
    let store = Arc::new(FlakyStore::new(1, r#"rpc error { "status": "UNAVAILABLE" }"#));
    let conn = Connection::new(store.clone(), fast_config());
    conn.kind("Person").get().unwrap();
    assert_eq!(store.attempts(), 2);
}

#[test]
fn non_transient_errors_fail_on_the_first_attempt() {
    let store = Arc::new(FlakyStore::new(usize::MAX, "PERMISSION_DENIED"));
    let conn = Connection::new(store.clone(), fast_config());
    let err = conn.kind("Person").get().unwrap_err();
    assert!(err.to_string().contains("PERMISSION_DENIED"));
    assert_eq!(store.attempts(), 1);
}

#[test]
fn attempt_budget_is_six_by_default() {
    let store = Arc::new(FlakyStore::new(
        usize::MAX,
        "too much contention on these datastore entities",
    ));
    let conn = Connection::new(store.clone(), fast_config());
    let err = conn.kind("Person").get().unwrap_err();
    assert!(err.to_string().contains("too much contention"));
    assert_eq!(store.attempts(), 6);
}

#[test]
fn budget_is_configurable() {
    let store = Arc::new(FlakyStore::new(
        usize::MAX,
        "too much contention on these datastore entities",
    ));
    let conn = Connection::new(store.clone(), fast_config().retry_attempts(3));
    conn.kind("Person").get().unwrap_err();
    assert_eq!(store.attempts(), 3);
}

#[test]
fn writes_are_retried_too() {
    let store = Arc::new(FlakyStore::new(
        1,
        "too much contention on these datastore entities",
    ));
    let conn = Connection::new(store.clone(), fast_config());
    let keys = conn
        .kind("Person")
        .insert(vec![[("name".to_string(), "a".into())].into_iter().collect()])
        .unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(store.attempts(), 2);
}

#[test]
fn bare_backoff_spends_its_whole_budget() {
    let backoff = ExponentialBackoff::new(4)
        .base_delay(Duration::from_millis(1))
        .max_delay(Duration::from_millis(3));
    let mut calls = 0;
    let result: hierstore::Result<()> = backoff.execute(|| {
        calls += 1;
        Err(StoreError::Transport("too much contention".into()))
    });
    assert!(result.is_err());
    assert_eq!(calls, 4);
}
