//! Tests for application wiring through the dependency container

mod common;

use std::sync::Arc;

use tempfile::TempDir;
use trainyard::container::{EntryKind, names};
use trainyard::data::Database;
use trainyard::{AppState, build_container};

async fn container() -> (TempDir, trainyard::container::Container) {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("wiring.db");
    let config = common::test_config("http://127.0.0.1:9", db_path.clone(), 8080);
    let db = Database::connect(&db_path).await.unwrap();
    (dir, build_container(config, db).unwrap())
}

#[tokio::test]
async fn test_every_application_name_is_registered() {
    let (_dir, container) = container().await;

    assert_eq!(container.kind(names::CONFIG), Some(EntryKind::Constant));
    assert_eq!(container.kind(names::DATABASE), Some(EntryKind::Constant));
    for name in [
        names::HTTP_CLIENT,
        names::GITHUB,
        names::SESSION_CODEC,
        names::CSRF_GUARD,
        names::USERS,
        names::REPOS,
        names::MODELS,
    ] {
        assert_eq!(container.kind(name), Some(EntryKind::Factory), "{name}");
    }
}

#[tokio::test]
async fn test_state_shares_singletons() {
    let (_dir, container) = container().await;

    let first = AppState::from_container(&container).unwrap();
    let second = AppState::from_container(&container).unwrap();

    assert!(Arc::ptr_eq(&first.github, &second.github));
    assert!(Arc::ptr_eq(&first.sessions, &second.sessions));
    assert!(Arc::ptr_eq(&first.models, &second.models));
    assert!(Arc::ptr_eq(&first.db, &second.db));
}

#[tokio::test]
async fn test_wrong_type_is_reported() {
    let (_dir, container) = container().await;

    let error = container.get::<String>(names::CONFIG).unwrap_err();
    assert!(error.to_string().contains("config"));
}
