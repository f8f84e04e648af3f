use super::*;

fn error(text: &str) -> anyhow::Error {
    anyhow::anyhow!(text.to_string())
}

#[test]
fn test_record_then_get_increments_by_one() {
    let storage = FailureInfoStorage::default();

    assert_eq!(storage.record("m-1", error("first"), ContextBag::new()), 1);
    assert_eq!(storage.try_get("m-1").unwrap().attempts, 1);

    assert_eq!(storage.record("m-1", error("second"), ContextBag::new()), 2);
    let record = storage.try_get("m-1").unwrap();
    assert_eq!(record.attempts, 2);
    assert_eq!(record.error.to_string(), "second");
}

#[test]
fn test_try_get_does_not_remove() {
    let storage = FailureInfoStorage::default();
    storage.record("m-1", error("boom"), ContextBag::new());

    assert!(storage.try_get("m-1").is_some());
    assert!(storage.try_get("m-1").is_some());
    assert_eq!(storage.len(), 1);
}

#[test]
fn test_clear_removes_record() {
    let storage = FailureInfoStorage::default();
    storage.record("m-1", error("boom"), ContextBag::new());

    assert!(storage.clear("m-1").is_some());
    assert!(storage.try_get("m-1").is_none());
    assert!(storage.clear("m-1").is_none());
    assert!(storage.is_empty());
}

/// After clearing, a new failure starts counting from 1 again.
#[test]
fn test_record_after_clear_restarts_count() {
    let storage = FailureInfoStorage::default();
    storage.record("m-1", error("a"), ContextBag::new());
    storage.record("m-1", error("b"), ContextBag::new());
    storage.clear("m-1");

    assert_eq!(storage.record("m-1", error("c"), ContextBag::new()), 1);
}

#[test]
fn test_oldest_record_is_evicted_beyond_capacity() {
    let storage = FailureInfoStorage::new(2);
    storage.record("m-1", error("a"), ContextBag::new());
    storage.record("m-2", error("b"), ContextBag::new());
    storage.record("m-3", error("c"), ContextBag::new());

    assert_eq!(storage.len(), 2);
    assert!(storage.try_get("m-1").is_none());
    assert!(storage.try_get("m-3").is_some());
}

#[test]
fn test_capacity_defaults_and_minimum() {
    assert_eq!(FailureInfoStorage::default().capacity(), 1000);
    assert_eq!(FailureInfoStorage::new(0).capacity(), 1);
}

#[test]
fn test_context_is_kept_with_record() {
    let storage = FailureInfoStorage::default();
    let context = ContextBag::new();
    context.set("tenant", "contoso");

    storage.record("m-1", error("boom"), context);

    let record = storage.try_get("m-1").unwrap();
    assert_eq!(record.context.get::<String>("tenant").as_deref(), Some("contoso"));
}

#[test]
fn test_concurrent_records_for_same_id_are_all_counted() {
    let storage = Arc::new(FailureInfoStorage::default());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let storage = Arc::clone(&storage);
            std::thread::spawn(move || {
                for _ in 0..25 {
                    storage.record("shared", anyhow::anyhow!("boom"), ContextBag::new());
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(storage.try_get("shared").unwrap().attempts, 200);
}
