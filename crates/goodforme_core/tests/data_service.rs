use goodforme_core::{
    ChangeEvent, CommitListener, CommitReport, DataService, Gateway, GatewayConfig, LogicalId,
    Persistable, PersistentStore, SortOrder, StoreError, UserActivity, DAY_MS,
};
use std::sync::{mpsc, Arc, Mutex};

type EventLog = Arc<Mutex<Vec<ChangeEvent>>>;

fn gateway() -> Gateway {
    Gateway::open(GatewayConfig::default()).unwrap()
}

fn by_name(gateway: &Gateway) -> DataService<UserActivity> {
    gateway.data_service(SortOrder::by_key(|activity: &UserActivity| {
        activity.name().to_string()
    }))
}

fn record_events(service: &DataService<UserActivity>, key: &str) -> EventLog {
    let log: EventLog = Arc::default();
    let sink = Arc::clone(&log);
    service.subscribe(key, move |event: &ChangeEvent| {
        sink.lock().unwrap().push(*event);
    });
    log
}

fn drain(service: &DataService<UserActivity>, log: &EventLog) -> Vec<ChangeEvent> {
    service.flush_presentation();
    std::mem::take(&mut *log.lock().unwrap())
}

#[test]
fn create_returns_unpersisted_value_without_touching_cache() {
    let gateway = gateway();
    let service = by_name(&gateway);

    let draft = service.create().unwrap();
    assert!(draft.storage_id().is_none());
    assert_eq!(draft.name(), "");
    assert!(service.is_empty());
    assert!(!gateway.store().with(|store| store.has_pending()));
}

#[test]
fn update_returns_committed_value_and_cache_follows_observer() {
    let gateway = gateway();
    let service = by_name(&gateway);
    let events = record_events(&service, "list");

    let draft = service.create().unwrap().renamed("Run");
    let saved = service.update(&draft).unwrap();

    assert_eq!(saved.id(), draft.id());
    assert!(saved.storage_id().is_some());
    assert_eq!(service.values(), vec![saved.clone()]);
    assert_eq!(drain(&service, &events), vec![ChangeEvent::Insert { index: 0 }]);

    let done = service.update(&saved.with_date(DAY_MS)).unwrap();
    assert_eq!(drain(&service, &events), vec![ChangeEvent::Update { index: 0 }]);
    assert_eq!(service.values()[0].dates(), &[DAY_MS]);
    assert_eq!(service.get(saved.id()), Some(done));
}

#[test]
fn unchanged_update_emits_at_most_one_update() {
    let gateway = gateway();
    let service = by_name(&gateway);
    let saved = service.update(&UserActivity::new("Run")).unwrap();
    let events = record_events(&service, "list");

    let changed = saved.with_date(DAY_MS);
    service.update(&changed).unwrap();
    service.update(&changed).unwrap();

    assert_eq!(drain(&service, &events), vec![ChangeEvent::Update { index: 0 }]);
}

#[test]
fn insert_lands_at_sorted_position_for_every_subscriber() {
    let gateway = gateway();
    let service = by_name(&gateway);
    for name in ["Cycle", "Run", "Yoga"] {
        service.update(&UserActivity::new(name)).unwrap();
    }
    let first = record_events(&service, "A");
    let second = record_events(&service, "B");

    service.update(&UserActivity::new("Read")).unwrap();

    let expected = vec![ChangeEvent::Insert { index: 1 }];
    assert_eq!(drain(&service, &first), expected);
    assert_eq!(drain(&service, &second), expected);
    let names: Vec<String> = service
        .values()
        .iter()
        .map(|activity| activity.name().to_string())
        .collect();
    assert_eq!(names, vec!["Cycle", "Read", "Run", "Yoga"]);
}

#[test]
fn unsubscribed_key_stops_receiving_events() {
    let gateway = gateway();
    let service = by_name(&gateway);
    let first = record_events(&service, "A");
    let second = record_events(&service, "B");

    let run = service.update(&UserActivity::new("Run")).unwrap();
    assert_eq!(drain(&service, &first), drain(&service, &second));

    assert!(service.unsubscribe("A"));
    assert!(!service.unsubscribe("A"));
    service.update(&run.with_date(DAY_MS)).unwrap();

    assert!(drain(&service, &first).is_empty());
    assert_eq!(drain(&service, &second), vec![ChangeEvent::Update { index: 0 }]);
    assert_eq!(service.subscriber_count(), 1);
}

#[test]
fn resubscribing_replaces_the_previous_callback() {
    let gateway = gateway();
    let service = by_name(&gateway);
    let stale = record_events(&service, "list");
    let fresh = record_events(&service, "list");

    service.update(&UserActivity::new("Run")).unwrap();

    assert!(drain(&service, &stale).is_empty());
    assert_eq!(drain(&service, &fresh).len(), 1);
    assert_eq!(service.subscriber_count(), 1);
}

#[test]
fn reordering_update_moves_the_entry() {
    let gateway = gateway();
    let service = by_name(&gateway);
    let run = service.update(&UserActivity::new("Run")).unwrap();
    service.update(&UserActivity::new("Swim")).unwrap();
    let events = record_events(&service, "list");

    service.update(&run.renamed("Walk")).unwrap();

    assert_eq!(drain(&service, &events), vec![ChangeEvent::Move { from: 0, to: 1 }]);
    assert_eq!(service.values()[1].name(), "Walk");
}

#[test]
fn delete_of_unknown_logical_id_is_a_no_op() {
    let gateway = gateway();
    let service = by_name(&gateway);
    service.update(&UserActivity::new("Run")).unwrap();
    let events = record_events(&service, "list");

    assert!(!service.delete(&LogicalId::generate()).unwrap());

    assert!(drain(&service, &events).is_empty());
    assert_eq!(service.len(), 1);
}

#[test]
fn delete_removes_cached_value_through_observer() {
    let gateway = gateway();
    let service = by_name(&gateway);
    let read = service.update(&UserActivity::new("Read")).unwrap();
    service.update(&UserActivity::new("Run")).unwrap();
    let events = record_events(&service, "list");

    assert!(service.delete(read.id()).unwrap());

    assert_eq!(drain(&service, &events), vec![ChangeEvent::Delete { index: 0 }]);
    assert!(service.get(read.id()).is_none());
    assert_eq!(service.len(), 1);
}

#[test]
fn fetch_delivers_full_reload_with_committed_state() {
    let gateway = gateway();
    let writer = by_name(&gateway);
    writer.update(&UserActivity::new("Run")).unwrap();

    let reader = by_name(&gateway);
    assert!(reader.is_empty());
    let events = record_events(&reader, "list");
    reader.fetch();

    assert_eq!(drain(&reader, &events), vec![ChangeEvent::FullReload]);
    assert_eq!(reader.len(), 1);
}

#[test]
fn mutations_from_one_service_reach_another_services_subscribers() {
    let gateway = gateway();
    let writer = by_name(&gateway);
    let reader = by_name(&gateway);
    reader.fetch();
    let events = record_events(&reader, "list");

    writer.update(&UserActivity::new("Run")).unwrap();

    assert_eq!(drain(&reader, &events), vec![ChangeEvent::Insert { index: 0 }]);
    assert_eq!(reader.len(), 1);
}

#[test]
fn reopen_resets_every_service_with_full_reload() {
    let gateway = gateway();
    let service = by_name(&gateway);
    service.update(&UserActivity::new("Run")).unwrap();
    let events = record_events(&service, "list");

    gateway.reopen().unwrap();

    assert_eq!(drain(&service, &events), vec![ChangeEvent::FullReload]);
    assert!(service.is_empty());
}

#[test]
fn failed_commit_leaves_cache_untouched_until_retry() {
    let gateway = gateway();
    let service = by_name(&gateway);
    let events = record_events(&service, "list");
    gateway.store().with(|store| {
        store
            .connection()
            .execute_batch(
                "CREATE TRIGGER block_inserts BEFORE INSERT ON records
                 BEGIN SELECT RAISE(ABORT, 'blocked'); END;",
            )
            .unwrap()
    });

    let err = service.update(&UserActivity::new("Run")).unwrap_err();
    assert!(matches!(err, StoreError::Commit(_)));
    assert!(service.is_empty());
    assert!(drain(&service, &events).is_empty());

    gateway.store().with(|store| {
        store
            .connection()
            .execute_batch("DROP TRIGGER block_inserts;")
            .unwrap()
    });
    let report = service.retry_commit().unwrap();
    assert_eq!(report.created.len(), 1);
    assert_eq!(drain(&service, &events), vec![ChangeEvent::Insert { index: 0 }]);
}

#[test]
fn discarded_commit_never_reaches_subscribers() {
    let gateway = gateway();
    let service = by_name(&gateway);
    let events = record_events(&service, "list");
    gateway.store().with(|store| {
        store
            .connection()
            .execute_batch(
                "CREATE TRIGGER block_inserts BEFORE INSERT ON records
                 BEGIN SELECT RAISE(ABORT, 'blocked'); END;",
            )
            .unwrap()
    });

    assert!(service.update(&UserActivity::new("Run")).is_err());
    service.discard_pending();

    assert!(!gateway.store().with(|store| store.has_pending()));
    assert!(service.retry_commit().unwrap().is_empty());
    assert!(drain(&service, &events).is_empty());
}

#[test]
fn panicking_subscriber_does_not_block_others() {
    let gateway = gateway();
    let service = by_name(&gateway);
    service.subscribe("broken", |_event: &ChangeEvent| panic!("subscriber bug"));
    let events = record_events(&service, "healthy");

    service.update(&UserActivity::new("Run")).unwrap();
    service.update(&UserActivity::new("Swim")).unwrap();

    assert_eq!(
        drain(&service, &events),
        vec![ChangeEvent::Insert { index: 0 }, ChangeEvent::Insert { index: 1 }]
    );
}

#[test]
fn callbacks_see_the_values_their_event_was_computed_against() {
    let gateway = gateway();
    let service = by_name(&gateway);
    let seen: Arc<Mutex<Vec<(ChangeEvent, Vec<String>)>>> = Arc::default();
    let sink = Arc::clone(&seen);
    service.subscribe_with_snapshot("list", move |event: &ChangeEvent, values: &[UserActivity]| {
        let names = values.iter().map(|value| value.name().to_string()).collect();
        sink.lock().unwrap().push((*event, names));
    });

    let (release, gate) = mpsc::channel::<()>();
    gateway.presentation().dispatch(move || {
        let _ = gate.recv();
    });
    service.update(&UserActivity::new("Swim")).unwrap();
    service.update(&UserActivity::new("Run")).unwrap();
    assert_eq!(service.len(), 2);
    release.send(()).unwrap();
    service.flush_presentation();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            (ChangeEvent::Insert { index: 0 }, vec!["Swim".to_string()]),
            (
                ChangeEvent::Insert { index: 0 },
                vec!["Run".to_string(), "Swim".to_string()]
            ),
        ]
    );
}

#[test]
fn panicking_store_listener_leaves_service_in_sync() {
    struct Failing;

    impl CommitListener for Failing {
        fn family(&self) -> &'static str {
            UserActivity::schema().family
        }

        fn committed(&mut self, _store: &PersistentStore, _report: &CommitReport) {
            panic!("listener failed during commit");
        }

        fn reset(&mut self, _store: &PersistentStore) {}
    }

    let gateway = gateway();
    gateway
        .store()
        .with(|store| store.add_listener(Box::new(Failing)));
    let service = by_name(&gateway);
    let events = record_events(&service, "list");

    service.update(&UserActivity::new("Run")).unwrap();
    service.update(&UserActivity::new("Swim")).unwrap();

    assert_eq!(gateway.store().with(|store| store.listener_count()), 2);
    assert_eq!(service.len(), 2);
    assert_eq!(
        drain(&service, &events),
        vec![ChangeEvent::Insert { index: 0 }, ChangeEvent::Insert { index: 1 }]
    );
}

#[test]
fn dropping_service_unregisters_its_observer() {
    let gateway = gateway();
    let service = by_name(&gateway);
    assert_eq!(gateway.store().with(|store| store.listener_count()), 1);
    drop(service);
    assert_eq!(gateway.store().with(|store| store.listener_count()), 0);
}

#[test]
fn concurrent_writers_are_observed_in_commit_order() {
    let gateway = gateway();
    let service = Arc::new(by_name(&gateway));
    let events = record_events(&service, "list");

    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let service = Arc::clone(&service);
            std::thread::spawn(move || {
                for step in 0..5 {
                    service
                        .update(&UserActivity::new(format!("w{worker}-{step}")))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let delivered = drain(&service, &events);
    assert_eq!(delivered.len(), 20);
    assert!(delivered
        .iter()
        .all(|event| matches!(event, ChangeEvent::Insert { .. })));
    assert_eq!(service.len(), 20);
}
