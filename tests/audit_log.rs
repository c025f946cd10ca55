//! Audit logger behaviour against a real directory.

use std::fs;
use std::sync::Arc;

use erp_gateway::audit::file_sink::is_rotated_name;
use erp_gateway::audit::{AuditEvent, AuditLevel, AuditLogger, AuditQuery, EventKind, FileSink};
use erp_gateway::config::AuditConfig;
use erp_gateway::security::context::{AuthMethod, Principal};
use erp_gateway::store::{MemoryStore, SharedStore};
use std::time::Duration;

fn file_config(dir: &std::path::Path) -> AuditConfig {
    AuditConfig {
        file_enabled: true,
        directory: dir.display().to_string(),
        ..AuditConfig::default()
    }
}

fn event(kind: EventKind, user: &str) -> AuditEvent {
    AuditEvent::new(kind)
        .with_principal(Principal::user(user, AuthMethod::Session))
        .with_message(format!("{} by {user}", kind.as_str()))
        .with_attribute("order_id", "SO-1001")
}

#[tokio::test]
async fn emitted_events_come_back_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let logger = AuditLogger::new(&file_config(dir.path()), None).unwrap();

    let emitted = vec![
        event(EventKind::UserCreated, "alice"),
        event(EventKind::AdminAction, "root"),
        event(EventKind::RequestProcessed, "bob"),
    ];
    for e in &emitted {
        logger.record(e.clone()).await;
    }

    let all = logger.query(&AuditQuery::default()).await.unwrap();
    assert_eq!(all, emitted);

    // Querying twice does not disturb anything.
    let again = logger.query(&AuditQuery::default()).await.unwrap();
    assert_eq!(again, emitted);

    let bob = logger
        .query(&AuditQuery {
            user_id: Some("bob".into()),
            ..AuditQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(bob, vec![emitted[2].clone()]);
}

#[tokio::test]
async fn query_filters_and_limit() {
    let logger = AuditLogger::new(
        &AuditConfig {
            file_enabled: false,
            ..AuditConfig::default()
        },
        None,
    )
    .unwrap();

    for i in 0..5 {
        logger
            .record(event(EventKind::AuthLoginFailed, &format!("u{i}")))
            .await;
    }
    logger
        .record(event(EventKind::RequestProcessed, "u9").with_level(AuditLevel::Info))
        .await;

    let failed = logger
        .query(&AuditQuery {
            kind: Some(EventKind::AuthLoginFailed),
            limit: Some(2),
            ..AuditQuery::default()
        })
        .await
        .unwrap();
    let users: Vec<_> = failed.iter().filter_map(|e| e.user_id()).collect();
    assert_eq!(users, vec!["u3", "u4"]);

    let warnings = logger
        .query(&AuditQuery {
            min_level: Some(AuditLevel::Warning),
            ..AuditQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(warnings.len(), 5);
}

#[test]
fn write_past_threshold_lands_in_a_fresh_file() {
    let dir = tempfile::tempdir().unwrap();
    let sink = FileSink::new(dir.path(), "audit.log", 200, Duration::from_secs(86_400)).unwrap();

    let first = event(EventKind::UserUpdated, "alice");
    sink.append(&first).unwrap();
    assert!(fs::metadata(sink.current_path()).unwrap().len() > 200);

    let second = event(EventKind::UserDeleted, "alice");
    sink.append(&second).unwrap();

    let rotated: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| is_rotated_name(name, "audit.log"))
        .collect();
    assert_eq!(rotated.len(), 1);

    let old = fs::read(dir.path().join(&rotated[0])).unwrap();
    assert_eq!(old.last(), Some(&b'\n'));
    let old_event: AuditEvent = serde_json::from_slice(&old[..old.len() - 1]).unwrap();
    assert_eq!(old_event, first);

    let current = fs::read_to_string(sink.current_path()).unwrap();
    assert_eq!(current.lines().count(), 1);
    assert_eq!(sink.read_all().unwrap(), vec![first, second]);
}

#[tokio::test]
async fn store_mirror_receives_events() {
    let store = Arc::new(MemoryStore::new());
    let logger = AuditLogger::new(
        &AuditConfig {
            file_enabled: false,
            store_enabled: true,
            ..AuditConfig::default()
        },
        Some(store.clone() as Arc<dyn SharedStore>),
    )
    .unwrap();

    let e = event(EventKind::AdminAction, "root");
    let key = format!("audit:{}", e.id);
    logger.record(e.clone()).await;

    // The mirror write is fire-and-forget.
    let mut stored = None;
    for _ in 0..50 {
        stored = store.get(&key).await.unwrap();
        if stored.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let stored: AuditEvent = serde_json::from_str(&stored.unwrap()).unwrap();
    assert_eq!(stored, e);
    assert!(store.ttl(&key).await.unwrap().is_some());
}
