use std::sync::{Arc, Mutex};

use booksync::config::Config;
use booksync::{
    builtin_registry, draw_counter, open_session, Backend, BackendProvider, Book, CompareOp, ErrorCode, Frame,
    Guid, Instance, MemoryProvider, MemoryRoot, OpenFlags, Path, PercentageFn, ProviderRegistry, Query,
    ResolvePolicy, Session, Value,
};
use booksync_core::{ProviderDescriptor, ResolveError, SessionError};

fn setup() -> (ProviderRegistry, MemoryRoot) {
    let root = MemoryRoot::new();
    let registry = ProviderRegistry::new();
    registry.register(Arc::new(MemoryProvider::with_root(root.clone())));
    (registry, root)
}

fn create(registry: &ProviderRegistry, location: &str) -> Session {
    Session::open(registry, location, OpenFlags::create()).expect("Failed to open session")
}

fn join(registry: &ProviderRegistry, location: &str) -> Session {
    let flags = OpenFlags {
        ignore_lock: true,
        create_if_nonexistent: false,
    };
    Session::open(registry, location, flags).expect("Failed to join session")
}

fn account(session: &mut Session, name: &str, code: i64) -> Guid {
    let mut inst = Instance::new("Account");
    inst.slots_mut().set("name", Value::from(name));
    inst.slots_mut().set("code", Value::Int64(code));
    let guid = session.add(inst);
    session.begin_edit(guid).expect("Failed to begin edit");
    session.commit_edit(guid).expect("Failed to commit edit");
    guid
}

#[test]
fn test_counter_sequence() {
    let (registry, _) = setup();
    let mut session = create(&registry, "mem://counters");
    let values: Vec<i64> = (0..3).map(|_| session.counter("txn-seq")).collect();
    assert_eq!(values, vec![1, 2, 3]);
    assert!(session.get_error().is_none());
}

#[test]
fn test_counter_sentinel_on_failure() {
    let (registry, _) = setup();
    let mut session = create(&registry, "mem://ro-counter");
    let mut options = Frame::new();
    options.set("read-only", Value::Int64(1));
    session.load_config(&options).unwrap();

    assert_eq!(session.counter("txn-seq"), -1);
    match session.get_error() {
        Some(err) => assert_eq!(err.code, ErrorCode::ReadOnly),
        None => panic!("Expected read-only error"),
    }
    assert!(session.get_error().is_none());
}

#[test]
fn test_counter_exhausted_yields_sentinel() {
    let (registry, _) = setup();
    let mut session = create(&registry, "mem://last-counter");
    let mut options = Frame::new();
    options.set("counter-start", Value::Int64(i64::MAX - 1));
    session.load_config(&options).unwrap();

    assert_eq!(session.counter("txn-seq"), i64::MAX);
    assert_eq!(session.counter("txn-seq"), -1);
    match session.get_error() {
        Some(err) => assert_eq!(err.code, ErrorCode::Misc),
        None => panic!("Expected exhausted counter error"),
    }
    session.end().unwrap();
}

#[test]
fn test_edit_conflict_after_destroy() {
    let (registry, root) = setup();
    let mut first = create(&registry, "mem://conflict");
    let guid = account(&mut first, "Cash", 1000);

    let mut second = join(&registry, "mem://conflict");
    second.load().unwrap();

    first.begin_edit(guid).unwrap();
    second.begin_edit(guid).unwrap();
    second
        .book_mut()
        .get_mut(&guid)
        .unwrap()
        .slots_mut()
        .set("name", Value::from("Petty cash"));

    first.destroy(guid).unwrap();
    assert!(!first.book().contains(&guid));

    match second.commit_edit(guid) {
        Err(err) => assert_eq!(err.code(), Some(ErrorCode::ModifyAfterDestroy)),
        _ => panic!("Expected modify-after-destroy"),
    }
    assert_eq!(second.get_error().map(|e| e.code), Some(ErrorCode::ModifyAfterDestroy));

    let rolled_back = second.rollback_edit(guid);
    assert_eq!(rolled_back.unwrap_err().code(), Some(ErrorCode::ModifyAfterDestroy));
    assert!(!second.book().contains(&guid));

    let summary = root.summary("conflict").unwrap();
    assert_eq!(summary.pending_edits, 0);
}

#[test]
fn test_concurrent_edit_rejected() {
    let (registry, _) = setup();
    let mut first = create(&registry, "mem://race");
    let guid = account(&mut first, "Cash", 1000);
    let mut second = join(&registry, "mem://race");
    second.load().unwrap();

    first.begin_edit(guid).unwrap();
    second.begin_edit(guid).unwrap();
    first.book_mut().get_mut(&guid).unwrap().slots_mut().set("code", Value::Int64(1001));
    first.commit_edit(guid).unwrap();

    second.book_mut().get_mut(&guid).unwrap().slots_mut().set("code", Value::Int64(1002));
    assert_eq!(second.commit_edit(guid).unwrap_err().code(), Some(ErrorCode::Conflict));
    second.rollback_edit(guid).unwrap();

    let restored = second.book().get(&guid).unwrap();
    assert_eq!(restored.slots().get_slot("code"), Some(&Value::Int64(1000)));
    assert_eq!(restored.version, 1);
}

#[test]
fn test_rollback_restores_snapshot() {
    let (registry, _) = setup();
    let mut session = create(&registry, "mem://rollback");
    let guid = account(&mut session, "Cash", 1000);

    session.begin_edit(guid).unwrap();
    session.book_mut().get_mut(&guid).unwrap().slots_mut().set("name", Value::from("Scratch"));
    session.rollback_edit(guid).unwrap();

    let inst = session.book().get(&guid).unwrap();
    assert_eq!(inst.slots().get_slot("name"), Some(&Value::from("Cash")));
    assert!(!inst.dirty);
}

#[test]
fn test_lock_and_ignore_lock() {
    let (registry, _) = setup();
    let _owner = create(&registry, "mem://locked");

    match Session::open(&registry, "mem://locked", OpenFlags::default()) {
        Err(err) => assert_eq!(err.code(), Some(ErrorCode::Locked)),
        _ => panic!("Expected lock error"),
    }

    let retry = OpenFlags {
        ignore_lock: true,
        create_if_nonexistent: false,
    };
    assert!(Session::open(&registry, "mem://locked", retry).is_ok());
}

#[test]
fn test_missing_store_not_created() {
    let (registry, root) = setup();
    match Session::open(&registry, "mem://absent", OpenFlags::default()) {
        Err(err) => assert_eq!(err.code(), Some(ErrorCode::NotFound)),
        _ => panic!("Expected not found"),
    }
    assert!(!root.contains("absent"));
}

#[test]
fn test_empty_location_save_as() {
    let (registry, _) = setup();
    let mut session = create(&registry, "mem://");
    assert_ne!(session.fullpath(), "mem://");
    assert!(!session.save_may_clobber_data());

    let guid = account(&mut session, "Cash", 1000);
    assert!(session.save_may_clobber_data());

    let fullpath = session.fullpath().to_string();
    let book = session.end().unwrap();
    assert!(book.contains(&guid));

    let mut reopened = Session::open(&registry, &fullpath, OpenFlags::default()).unwrap();
    reopened.load().unwrap();
    assert!(reopened.book().contains(&guid));
}

#[test]
fn test_provider_selection() {
    let registry = ProviderRegistry::new();
    let hits = Arc::new(Mutex::new(Vec::new()));

    let log = hits.clone();
    registry.register(Arc::new(
        ProviderDescriptor::new("ledger-files", "file", move || {
            log.lock().unwrap().push("ledger");
            MemoryProvider::new().new_backend()
        })
        .recognizer(|path: &str| path.ends_with(".ledger")),
    ));
    registry.register(Arc::new(
        ProviderDescriptor::new("sheets", "file", || MemoryProvider::new().new_backend())
            .recognizer(|path: &str| path.is_empty() || path.ends_with(".sheet")),
    ));

    assert_eq!(registry.resolve("/books/main.ledger").unwrap().name(), "ledger-files");
    assert_eq!(registry.resolve("file:///books/q1.sheet").unwrap().name(), "sheets");
    assert_eq!(registry.resolve("").unwrap().name(), "sheets");
    assert!(matches!(
        registry.resolve("/books/notes.txt"),
        Err(ResolveError::Unrecognized { .. })
    ));
    assert!(matches!(
        registry.resolve("http://host/book"),
        Err(ResolveError::NoProvider { .. })
    ));
    assert!(hits.lock().unwrap().is_empty());
}

#[test]
fn test_sole_provider_policy() {
    let strict = builtin_registry(ResolvePolicy::Strict);
    assert!(strict.resolve("mem://not a name").is_err());

    let lenient = builtin_registry(ResolvePolicy::SoleProvider);
    assert_eq!(lenient.resolve("mem://not a name").unwrap().name(), "memory");
    match Session::open(&lenient, "mem://not a name", OpenFlags::create()) {
        Err(SessionError::Backend(err)) => assert_eq!(err.code, ErrorCode::BadUrl),
        _ => panic!("Expected bad url"),
    }
}

#[test]
fn test_config_between_begin_and_commit() {
    let (registry, _) = setup();
    let mut session = create(&registry, "mem://reconfig");
    let guid = account(&mut session, "Cash", 1000);

    session.begin_edit(guid).unwrap();
    session.book_mut().get_mut(&guid).unwrap().slots_mut().set("code", Value::Int64(1100));

    let mut options = Frame::new();
    options.set("read-only", Value::Int64(1));
    session.load_config(&options).unwrap();
    assert_eq!(session.commit_edit(guid).unwrap_err().code(), Some(ErrorCode::ReadOnly));

    options.set("read-only", Value::Int64(0));
    session.load_config(&options).unwrap();
    session.commit_edit(guid).unwrap();
    assert_eq!(session.book().get(&guid).unwrap().version, 2);
    assert_eq!(session.config().get_slot("read-only"), Some(&Value::Int64(0)));
    assert_eq!(session.backend().state().config_count(), 2);
}

#[test]
fn test_unsupported_option_reported() {
    let (registry, _) = setup();
    let mut session = create(&registry, "mem://options");
    let mut options = Frame::new();
    options.set("compression", Value::from("zstd"));
    assert_eq!(
        session.load_config(&options).unwrap_err().code(),
        Some(ErrorCode::UnsupportedOption)
    );
    assert_eq!(session.peek_error().map(|e| e.code), Some(ErrorCode::UnsupportedOption));
}

#[test]
fn test_query_fills_book() {
    let (registry, _) = setup();
    let mut writer = create(&registry, "mem://query");
    account(&mut writer, "Cash", 1000);
    account(&mut writer, "Bank", 1010);
    account(&mut writer, "Rent", 5000);

    let mut lazy_options = Frame::new();
    lazy_options.set("load-all", Value::Int64(0));
    let flags = OpenFlags {
        ignore_lock: true,
        create_if_nonexistent: false,
    };
    let mut reader = Session::open_with(&registry, "mem://query", flags, &lazy_options, None).unwrap();
    reader.load().unwrap();
    assert!(reader.book().is_empty());

    let assets = Query::new("Account").filter(Path::parse("code").unwrap(), CompareOp::Lt, Value::Int64(2000));
    reader.run_query(&assets).unwrap();
    assert_eq!(reader.book().len(), 2);
    assert!(reader.book().instances().all(|i| assets.matches(i)));
}

#[test]
fn test_sync_reconciles_only_held_instances() {
    let (registry, _) = setup();
    let mut first = create(&registry, "mem://sync");
    let cash = account(&mut first, "Cash", 1000);

    let mut second = join(&registry, "mem://sync");
    second.load().unwrap();
    second.book_mut().get_mut(&cash).unwrap().slots_mut().set("name", Value::from("Till"));
    second.sync().unwrap();
    let rent = account(&mut second, "Rent", 5000);

    first.sync().unwrap();
    let held = first.book().get(&cash).unwrap();
    assert_eq!(held.slots().get_slot("name"), Some(&Value::from("Till")));
    assert!(!first.book().contains(&rent));
}

#[test]
fn test_events_drained() {
    let (registry, _) = setup();
    let mut first = create(&registry, "mem://events");
    let cash = account(&mut first, "Cash", 1000);
    let mut second = join(&registry, "mem://events");
    second.load().unwrap();
    assert!(!second.events_pending());

    first.begin_edit(cash).unwrap();
    first.book_mut().get_mut(&cash).unwrap().slots_mut().set("code", Value::Int64(1001));
    first.commit_edit(cash).unwrap();

    assert!(second.events_pending());
    assert!(second.process_events());
    assert_eq!(
        second.book().get(&cash).unwrap().slots().get_slot("code"),
        Some(&Value::Int64(1001))
    );
    assert!(!second.events_pending());
    assert!(!second.process_events());
}

#[test]
fn test_partition_moves_selected_instances() {
    let (registry, _) = setup();
    let mut session = create(&registry, "mem://ledger");
    let old = account(&mut session, "Closed", 100);
    let current = account(&mut session, "Open", 900);

    let mut archive = Book::new();
    let selection = Query::new("Account").filter(Path::parse("code").unwrap(), CompareOp::Lt, Value::Int64(500));
    let location = session.partition(&selection, &mut archive).unwrap().unwrap();

    assert!(archive.contains(&old));
    assert!(!session.book().contains(&old));
    assert!(session.book().contains(&current));

    let mut split = Session::open(&registry, &location, OpenFlags::default()).unwrap();
    split.load().unwrap();
    assert_eq!(split.book().guid, archive.guid);
    assert!(split.book().contains(&old));
}

#[test]
fn test_failed_partition_returns_instances() {
    let (registry, _) = setup();
    let mut session = create(&registry, "mem://ledger2");
    let old = account(&mut session, "Closed", 100);
    let selection = Query::new("Account").filter(Path::parse("code").unwrap(), CompareOp::Lt, Value::Int64(500));

    let mut archive = Book::new();
    let mut options = Frame::new();
    options.set("read-only", Value::Int64(1));
    session.load_config(&options).unwrap();

    assert_eq!(
        session.partition(&selection, &mut archive).unwrap_err().code(),
        Some(ErrorCode::ReadOnly)
    );
    assert!(archive.is_empty());
    assert!(session.book().contains(&old));
}

#[test]
fn test_open_session_from_config() {
    let config = Config::from_toml(
        r#"
        [session]
        location = "mem://from-config"

        [backend]
        counter-start = 99
        "#,
    )
    .unwrap();
    let registry = builtin_registry(config.registry.resolve_policy);
    let mut session = open_session(&config, &registry).unwrap();
    assert_eq!(draw_counter(&mut session, "invoice").unwrap(), 100);
    assert_eq!(draw_counter(&mut session, "invoice").unwrap(), 101);
}

#[test]
fn test_progress_reported() {
    let (registry, _) = setup();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let progress: PercentageFn = Box::new(move |_: Option<&str>, pct: f64| sink.lock().unwrap().push(pct));
    let session = Session::open_with(&registry, "mem://progress", OpenFlags::create(), &Frame::new(), Some(progress))
        .unwrap();
    drop(session);

    let seen = seen.lock().unwrap();
    assert!(!seen.is_empty());
    assert!(seen.iter().all(|pct| (0.0..=100.0).contains(pct)));
}
