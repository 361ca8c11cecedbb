use super::*;
use cm_storage::{InMemoryStorage, KeyValueStorage, RocksDbStorage};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Mutex;

fn customer(id: &str, name: &str) -> Customer {
    Customer::new(id, name)
}

#[test]
fn add_then_update_then_get() -> anyhow::Result<()> {
    let store = Store::in_memory();

    store.add_customer(customer("c1", "Alice"));
    store.update_customer("c1", json!({"name": "Alice B"}))?;

    assert_eq!(*store.customers(), vec![customer("c1", "Alice B")]);
    Ok(())
}

#[test]
fn ids_stay_unique_over_a_mixed_sequence() -> anyhow::Result<()> {
    let store = Store::in_memory();
    let ops: &[(&str, &str)] = &[
        ("add", "a"),
        ("add", "b"),
        ("add", "a"),
        ("update", "b"),
        ("remove", "a"),
        ("add", "c"),
        ("remove", "zz"),
        ("add", "a"),
        ("update", "missing"),
        ("remove", "b"),
        ("add", "c"),
    ];

    let mut model: Vec<String> = Vec::new();
    for (op, id) in ops {
        match *op {
            "add" => {
                store.add_customer(customer(id, "n"));
                if !model.iter().any(|m| m == id) {
                    model.push(id.to_string());
                }
            }
            "update" => {
                store.update_customer(id, json!({"notes": "touched"}))?;
            }
            "remove" => {
                store.remove_customer(id);
                model.retain(|m| m != id);
                assert!(store.find::<Customer>(id).is_none());
            }
            _ => unreachable!(),
        }

        let ids: Vec<String> = store.customers().iter().map(|c| c.id.clone()).collect();
        let unique: HashSet<&String> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len(), "duplicate id after {op} {id}");
        assert_eq!(ids, model);
    }
    Ok(())
}

#[test]
fn add_with_existing_id_replaces_in_place() {
    let store = Store::in_memory();
    assert!(store.add_customer(customer("c1", "Alice")));
    assert!(store.add_customer(customer("c2", "Bob")));
    assert!(!store.add_customer(customer("c1", "Alicia")));

    let names: Vec<String> = store.customers().iter().map(|c| c.name.clone()).collect();
    assert_eq!(names, vec!["Alicia", "Bob"]);
}

#[test]
fn update_is_a_shallow_merge() -> anyhow::Result<()> {
    let store = Store::in_memory();
    let mut c = customer("c1", "Alice");
    c.extra.insert("address".into(), json!({"city": "Oslo", "zip": "0150"}));
    store.add_customer(c);

    let merged = store
        .update_customer("c1", json!({"address": {"city": "Bergen"}}))?
        .expect("record exists");

    assert_eq!(merged.extra["address"], json!({"city": "Bergen"}));
    assert_eq!(merged.name, "Alice");
    Ok(())
}

#[test]
fn update_accepts_backend_field_casing() -> anyhow::Result<()> {
    let store = Store::in_memory();
    store.add_customer(customer("c1", "Alice"));

    let merged = store
        .update_customer("c1", json!({"Name": "Alice B", "Email": "alice@example.com"}))?
        .expect("record exists");
    assert_eq!(merged.name, "Alice B");
    assert_eq!(merged.email.as_deref(), Some("alice@example.com"));
    assert!(merged.extra.is_empty());

    let merged = store
        .update_customer("c1", json!({"CustomerID": "c1", "email": "a@b"}))?
        .expect("record exists");
    assert_eq!(merged.id, "c1");
    assert_eq!(merged.email.as_deref(), Some("a@b"));

    store.add_vendor(Vendor::new("v1", "Acme"));
    store.update_vendor("v1", json!({"VendorName": "Acme Ltd"}))?;
    assert_eq!(store.vendors()[0].name, "Acme Ltd");
    Ok(())
}

#[test]
fn update_of_unknown_id_is_a_no_op() -> anyhow::Result<()> {
    let store = Store::in_memory();
    let changes = Arc::new(Mutex::new(0));
    let c = changes.clone();
    let _sub = store.subscribe("customers", move |_| *c.lock().unwrap() += 1);

    assert!(store.update_customer("ghost", json!({"name": "x"}))?.is_none());
    assert_eq!(*changes.lock().unwrap(), 0);
    Ok(())
}

#[test]
fn update_rejects_non_object_and_id_collisions() {
    let store = Store::in_memory();
    store.add_customer(customer("c1", "Alice"));
    store.add_customer(customer("c2", "Bob"));

    assert!(matches!(
        store.update_customer("c1", json!(["nope"])),
        Err(StoreError::PatchNotObject { .. })
    ));
    assert!(matches!(
        store.update_customer("c1", json!({"id": "c2"})),
        Err(StoreError::DuplicateId { .. })
    ));
    assert!(matches!(
        store.update_customer("c1", json!({"name": 42})),
        Err(StoreError::InvalidPatch { .. })
    ));
    assert_eq!(store.customers().len(), 2);
}

#[test]
fn get_all_is_a_detached_deep_copy() {
    let store = Store::in_memory();
    store.add_customer(customer("c1", "Alice"));

    let mut snapshot = store.get_all();
    assert_eq!(snapshot.customers, *store.customers());

    snapshot.customers[0].name = "Mallory".into();
    snapshot.customers.push(customer("c9", "Eve"));

    assert_eq!(*store.customers(), vec![customer("c1", "Alice")]);
}

#[test]
fn held_collection_keeps_the_version_it_was_read_at() {
    let store = Store::in_memory();
    store.add_customer(customer("c1", "Alice"));

    let before = store.customers();
    store.add_customer(customer("c2", "Bob"));

    assert_eq!(before.len(), 1);
    assert_eq!(store.customers().len(), 2);
}

#[test]
fn subscribers_see_changes_and_can_unsubscribe() {
    let store = Store::in_memory();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let s = seen.clone();
    let sub = store.subscribe("vendors", move |change| {
        s.lock().unwrap().push(change.value.as_array().map(|a| a.len()).unwrap_or(0));
    });
    let any = Arc::new(Mutex::new(Vec::new()));
    let a = any.clone();
    let _any = store.subscribe(ANY_CHANGE, move |change| a.lock().unwrap().push(change.key.clone()));

    store.add_vendor(Vendor::new("v1", "Acme"));
    store.add_vendor(Vendor::new("v2", "Globex"));
    store.add_customer(customer("c1", "Alice"));
    assert!(sub.unsubscribe());
    store.remove_vendor("v1");

    assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    assert_eq!(
        *any.lock().unwrap(),
        vec!["vendors", "vendors", "customers", "vendors"]
    );
}

#[test]
fn subscriber_may_read_the_store_during_notify() {
    let store = Arc::new(Store::in_memory());
    let observed = Arc::new(Mutex::new(0usize));

    let reader = store.clone();
    let o = observed.clone();
    let _sub = store.subscribe("customers", move |_| {
        *o.lock().unwrap() = reader.customers().len();
    });

    store.add_customer(customer("c1", "Alice"));
    assert_eq!(*observed.lock().unwrap(), 1);
}

#[test]
fn panicking_subscriber_does_not_block_others() {
    let store = Store::in_memory();
    let hits = Arc::new(Mutex::new(0));

    let _bad = store.subscribe("customers", |_| panic!("bad subscriber"));
    let h = hits.clone();
    let _good = store.subscribe("customers", move |_| *h.lock().unwrap() += 1);

    store.add_customer(customer("c1", "Alice"));
    assert_eq!(*hits.lock().unwrap(), 1);
}

#[test]
fn mutations_persist_under_namespaced_keys() -> anyhow::Result<()> {
    let storage = Arc::new(InMemoryStorage::new());
    let store = Store::new(storage.clone());

    store.add_customer(customer("c1", "Alice"));
    store.set_business_balance(125.5);
    store.set_current_tab("vendors");

    let raw = storage.get("itservices_customers")?.expect("customers persisted");
    let persisted: Vec<Customer> = serde_json::from_str(&raw)?;
    assert_eq!(persisted, vec![customer("c1", "Alice")]);
    assert_eq!(storage.get("itservices_businessBalance")?.as_deref(), Some("125.5"));
    assert_eq!(storage.get("itservices_currentTab")?.as_deref(), Some("\"vendors\""));
    // untouched keys are not written
    assert_eq!(storage.get("itservices_vendors")?, None);
    Ok(())
}

#[test]
fn hydrates_on_construction_and_drops_malformed_keys() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let storage = Arc::new(RocksDbStorage::open(dir.path())?);
    storage.set("itservices_customers", r#"[{"CustomerID": 5, "Name": "Zed"}]"#)?;
    storage.set("itservices_vendors", "{not json")?;
    storage.set("itservices_settings", r#"{"currency": "EUR"}"#)?;

    let store = Store::new(storage);

    assert_eq!(*store.customers(), vec![customer("5", "Zed")]);
    assert!(store.vendors().is_empty());
    assert_eq!(store.settings().currency, "EUR");
    assert_eq!(store.settings().company_name, Settings::default().company_name);
    Ok(())
}

#[test]
fn persistence_failures_are_swallowed() {
    let storage = Arc::new(InMemoryStorage::with_quota(8));
    let store = Store::new(storage);

    store.add_customer(customer("c1", "A name long enough to blow the quota"));

    assert_eq!(store.customers().len(), 1);
    assert!(store.persist_failures() >= 1);
}

#[test]
fn reset_restores_defaults_and_clears_namespace_only() -> anyhow::Result<()> {
    let storage = Arc::new(InMemoryStorage::new());
    let store = Store::new(storage.clone());
    store.add_customer(customer("c1", "Alice"));
    store.set_current_tab("pnl");
    store.mark_has_run();

    let events = Arc::new(Mutex::new(Vec::new()));
    let e = events.clone();
    let _sub = store.subscribe(RESET_EVENT, move |change| e.lock().unwrap().push(change.key.clone()));

    store.reset();

    assert!(store.customers().is_empty());
    assert_eq!(store.current_tab(), DEFAULT_TAB);
    assert!(storage.keys_with_prefix(STORAGE_PREFIX)?.is_empty());
    assert!(!store.is_first_run());
    assert_eq!(*events.lock().unwrap(), vec![RESET_EVENT]);
    Ok(())
}

#[test]
fn export_import_round_trip() -> anyhow::Result<()> {
    let source = Store::in_memory();
    source.add_customer(customer("c1", "Alice"));
    source.add_vendor(Vendor::new("v1", "Acme"));
    source.add_business_transaction(BusinessTransaction {
        id: "t1".into(),
        amount: 99.0,
        description: "setup fee".into(),
        ..BusinessTransaction::default()
    });
    source.set_business_balance(99.0);
    source.update_settings(json!({"currency": "GBP"}))?;
    source.set_current_tab("customers");

    let exported = source.export_data()?;

    let target = Store::in_memory();
    assert!(target.import_data(&exported));
    assert_eq!(target.get_all(), source.get_all());
    Ok(())
}

#[test]
fn import_rejects_missing_keys_and_garbage() {
    let store = Store::in_memory();
    store.add_customer(customer("c1", "Alice"));

    assert!(!store.import_data("not json"));
    assert!(!store.import_data("[]"));
    assert!(!store.import_data(r#"{"customers": []}"#));

    let mut doc: Value = serde_json::to_value(StoreData::default()).expect("serializable");
    doc["customers"] = json!([{"name": "no id"}]);
    assert!(!store.import_data(&doc.to_string()));

    assert_eq!(store.customers().len(), 1);
}

#[test]
fn modify_runs_a_composite_update_atomically() {
    let store = Store::in_memory();
    store.add_customer(customer("c1", "Alice"));
    store.add_customer(customer("c2", "Bob"));

    let renamed = store.modify::<Customer, _, _>(|list| {
        for c in list.iter_mut() {
            c.name = c.name.to_uppercase();
        }
        list.len()
    });

    assert_eq!(renamed, 2);
    assert_eq!(store.customers()[1].name, "BOB");
}

#[test]
fn auxiliary_keys_round_trip() {
    let store = Store::in_memory();
    assert!(store.is_first_run());
    assert!(store.user_settings().is_none());

    store.save_user_settings(&json!({"compact": true}));
    store.save_app_state(&json!({"lastTab": "vendors"}));
    store.mark_has_run();

    assert_eq!(store.user_settings(), Some(json!({"compact": true})));
    assert_eq!(store.app_state(), Some(json!({"lastTab": "vendors"})));
    assert!(!store.is_first_run());
}
