use goodforme_core::{
    ChangeEvent, Gateway, GatewayConfig, Persistable, SortOrder, StoreConfig, UserActivity,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn resign_active_flushes_pending_changes() {
    let gateway = Gateway::open(GatewayConfig::default()).unwrap();
    let service = gateway.data_service(SortOrder::<UserActivity>::by_creation());
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    service.subscribe("list", move |_event: &ChangeEvent| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    gateway
        .store()
        .with(|store| store.save(&UserActivity::new("Run")))
        .unwrap();
    assert!(service.is_empty());

    let report = gateway.resign_active().unwrap();
    assert_eq!(report.created.len(), 1);
    assert!(gateway.resign_active().unwrap().is_empty());

    service.flush_presentation();
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert!(service.values()[0].storage_id().is_some());
}

#[test]
fn shutdown_commits_pending_work_to_disk() {
    let dir = tempfile::tempdir().unwrap();
    let config = GatewayConfig::new(StoreConfig::named(dir.path(), "session"));

    let gateway = Gateway::open(config.clone()).unwrap();
    gateway
        .store()
        .with(|store| store.save(&UserActivity::new("Run")))
        .unwrap();
    gateway.shutdown().unwrap();

    let gateway = Gateway::open(config).unwrap();
    let stored = gateway
        .store()
        .with(|store| store.fetch_all::<UserActivity>());
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].name(), "Run");
}

#[test]
fn shutdown_ends_subscriptions_and_rejects_late_jobs() {
    let gateway = Gateway::open(GatewayConfig::default()).unwrap();
    let service = gateway.data_service(SortOrder::<UserActivity>::by_creation());
    let presentation = Arc::clone(gateway.presentation());
    let store = gateway.store().clone();

    gateway.shutdown().unwrap();

    assert_eq!(store.with(|store| store.listener_count()), 0);
    assert!(!presentation.dispatch(|| {}));
    drop(service);
}

#[test]
fn presentation_thread_uses_configured_name() {
    let mut config = GatewayConfig::default();
    config.presentation_thread = "habits-ui".to_string();
    let gateway = Gateway::open(config).unwrap();

    let observed = Arc::new(std::sync::Mutex::new(None));
    let sink = Arc::clone(&observed);
    gateway.presentation().dispatch(move || {
        *sink.lock().unwrap() = std::thread::current().name().map(str::to_string);
    });
    gateway.presentation().flush();

    assert_eq!(observed.lock().unwrap().as_deref(), Some("habits-ui"));
}
