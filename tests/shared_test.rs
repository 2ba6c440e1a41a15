// Process-wide connection manager tests for Chatstore
//
// Kept in its own test binary: the shared manager is bound once per process.

use std::sync::Arc;

use chatstore::db::{connection, OpenOptions, StoreError};
use tempfile::TempDir;

#[tokio::test]
async fn test_shared_manager_is_bound_to_first_path() {
    let temp = TempDir::new().unwrap();
    let first = temp.path().join("chat.db");
    let other = temp.path().join("other.db");

    let manager = connection::shared(&first, OpenOptions::default()).unwrap();
    assert_eq!(manager.path(), first.as_path());

    let again = connection::shared(&first, OpenOptions::default()).unwrap();
    assert!(Arc::ptr_eq(&manager, &again));

    let err = connection::shared(&other, OpenOptions::default()).unwrap_err();
    assert!(matches!(err, StoreError::Connection(_)), "got {:?}", err);
    assert!(!other.exists());

    let db = manager.open().await.unwrap();
    assert!(db.health_check().await);
}
