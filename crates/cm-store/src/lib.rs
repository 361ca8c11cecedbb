//! Client-side state cache.
//!
//! The store mirrors server entities for fast rendering. It is not a source
//! of truth: every mutation is persisted best-effort to the key/value
//! storage under `itservices_<key>`, and a failed write is logged and
//! dropped while the in-memory state stays authoritative.
//!
//! Each mutating call is atomic with respect to other store calls. A
//! read-modify-write that spans an `.await` is not; callers that need one
//! should use [`Store::modify`], which runs the whole closure under the
//! write lock.

mod data;
mod notify;

pub use data::{STORAGE_PREFIX, DEFAULT_TAB, State, StateKey, StoreData, Stored, top_level_keys};
pub use notify::{ANY_CHANGE, StoreChange, Subscription};

use cm_api_types::{
    BusinessTransaction, CollectionKey, CreditBalance, Customer, DashboardStats, Settings,
    Subscription as CustomerSubscription, Vendor, VendorService, VendorTransaction,
};
use cm_storage::{InMemoryStorage, KeyValueStorage};
use notify::Subscribers;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const USER_SETTINGS_KEY: &str = "userSettings";
pub const APP_STATE_KEY: &str = "appState";
pub const HAS_RUN_BEFORE_KEY: &str = "hasRunBefore";

/// Change names published for whole-store operations.
pub const RESET_EVENT: &str = "reset";
pub const IMPORT_EVENT: &str = "import";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("patch for {key}/{id} must be a JSON object")]
    PatchNotObject { key: CollectionKey, id: String },
    #[error("patch for {key}/{id} produced an invalid record: {reason}")]
    InvalidPatch {
        key: CollectionKey,
        id: String,
        reason: String,
    },
    #[error("invalid settings patch: {0}")]
    InvalidSettings(String),
    #[error("{key} already contains id {id}")]
    DuplicateId { key: CollectionKey, id: String },
}

pub struct Store {
    state: RwLock<State>,
    storage: Arc<dyn KeyValueStorage>,
    subscribers: Arc<Subscribers>,
    persist_failures: AtomicU64,
}

impl Store {
    /// Build a store and hydrate it from `storage`. Keys that are missing or
    /// fail to parse keep their defaults.
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        let store = Self {
            state: RwLock::new(State::default()),
            storage,
            subscribers: Arc::new(Subscribers::default()),
            persist_failures: AtomicU64::new(0),
        };
        store.hydrate();
        store
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryStorage::new()))
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn hydrate(&self) {
        let mut state = self.write();
        let mut loaded = 0usize;
        for key in StateKey::ALL {
            let raw = match self.storage.get(&key.storage_key()) {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(err) => {
                    warn!(key = %key, error = %err, "failed to read persisted state");
                    continue;
                }
            };
            match state.load_key(key, &raw) {
                Ok(()) => loaded += 1,
                Err(err) => debug!(key = %key, error = %err, "dropping malformed persisted state"),
            }
        }
        if loaded > 0 {
            info!(loaded, "hydrated store from storage");
        }
    }

    /// Serialize one key to storage. Failures are logged and swallowed.
    fn persist(&self, state: &State, key: StateKey) -> Value {
        let value = match state.value_of(key) {
            Ok(value) => value,
            Err(err) => {
                self.persist_failures.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, error = %err, "failed to serialize state");
                return Value::Null;
            }
        };
        self.write_raw(&key.storage_key(), &value);
        value
    }

    fn write_raw(&self, storage_key: &str, value: &Value) {
        let result = serde_json::to_string(value)
            .map_err(|err| err.to_string())
            .and_then(|raw| self.storage.set(storage_key, &raw).map_err(|err| err.to_string()));
        if let Err(err) = result {
            self.persist_failures.fetch_add(1, Ordering::Relaxed);
            warn!(key = storage_key, error = %err, "failed to persist state");
        }
    }

    /// Number of persistence writes that failed since construction.
    pub fn persist_failures(&self) -> u64 {
        self.persist_failures.load(Ordering::Relaxed)
    }

    fn commit(&self, state: RwLockWriteGuard<'_, State>, key: StateKey) {
        let value = self.persist(&state, key);
        drop(state);
        self.subscribers.notify(&StoreChange {
            key: key.as_str().to_owned(),
            value,
        });
    }

    // ── Subscriptions ──

    /// Call `callback` synchronously after every change to `event` (a key
    /// name such as `"customers"`, [`RESET_EVENT`], [`IMPORT_EVENT`] or
    /// [`ANY_CHANGE`]). Dropping the returned handle does not unsubscribe.
    pub fn subscribe<F>(&self, event: &str, callback: F) -> Subscription
    where
        F: Fn(&StoreChange) + Send + Sync + 'static,
    {
        self.subscribers.add(event, Arc::new(callback))
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    // ── Collections ──

    /// The live collection. Mutations go through the setters, which swap in
    /// a new vector; a held `Arc` keeps seeing the version it was read at.
    pub fn get<E: Stored>(&self) -> Arc<Vec<E>> {
        E::slot(&self.read()).clone()
    }

    pub fn find<E: Stored>(&self, id: &str) -> Option<E> {
        E::slot(&self.read()).iter().find(|item| item.id() == id).cloned()
    }

    pub fn set<E: Stored>(&self, list: Vec<E>) {
        let mut state = self.write();
        *E::slot_mut(&mut state) = Arc::new(list);
        self.commit(state, StateKey::Collection(E::KEY));
    }

    /// Insert `item`, replacing any existing record with the same id in
    /// place. Returns `true` when the id was new.
    pub fn add<E: Stored>(&self, item: E) -> bool {
        let mut state = self.write();
        let list = Arc::make_mut(E::slot_mut(&mut state));
        let inserted = match list.iter().position(|existing| existing.id() == item.id()) {
            Some(pos) => {
                list[pos] = item;
                false
            }
            None => {
                list.push(item);
                true
            }
        };
        self.commit(state, StateKey::Collection(E::KEY));
        inserted
    }

    /// Shallow-merge `patch` over the record with `id`: top-level keys in the
    /// patch replace the record's keys wholesale. Patch keys may use either
    /// casing (`Name` or `name`). Returns the merged record, or `None` when no
    /// record has that id.
    pub fn update<E: Stored>(&self, id: &str, patch: Value) -> Result<Option<E>, StoreError> {
        let Value::Object(patch) = patch else {
            return Err(StoreError::PatchNotObject {
                key: E::KEY,
                id: id.to_owned(),
            });
        };

        let mut state = self.write();
        let Some(pos) = E::slot(&state).iter().position(|item| item.id() == id) else {
            return Ok(None);
        };

        let patch: Map<String, Value> = patch
            .into_iter()
            .map(|(key, value)| (E::canonical_field(&key).to_owned(), value))
            .collect();
        let merged: E = merge_record(&E::slot(&state)[pos], patch).map_err(|reason| {
            StoreError::InvalidPatch {
                key: E::KEY,
                id: id.to_owned(),
                reason,
            }
        })?;

        if merged.id() != id && E::slot(&state).iter().any(|item| item.id() == merged.id()) {
            return Err(StoreError::DuplicateId {
                key: E::KEY,
                id: merged.id().to_owned(),
            });
        }

        Arc::make_mut(E::slot_mut(&mut state))[pos] = merged.clone();
        self.commit(state, StateKey::Collection(E::KEY));
        Ok(Some(merged))
    }

    /// Remove the record with `id`. Returns whether anything was removed.
    pub fn remove<E: Stored>(&self, id: &str) -> bool {
        let mut state = self.write();
        if !E::slot(&state).iter().any(|item| item.id() == id) {
            return false;
        }
        Arc::make_mut(E::slot_mut(&mut state)).retain(|item| item.id() != id);
        self.commit(state, StateKey::Collection(E::KEY));
        true
    }

    /// Run `f` against the collection under the write lock, then persist and
    /// notify once.
    pub fn modify<E, F, R>(&self, f: F) -> R
    where
        E: Stored,
        F: FnOnce(&mut Vec<E>) -> R,
    {
        let mut state = self.write();
        let result = f(Arc::make_mut(E::slot_mut(&mut state)));
        self.commit(state, StateKey::Collection(E::KEY));
        result
    }

    // ── Scalars ──

    pub fn business_balance(&self) -> f64 {
        self.read().business_balance
    }

    pub fn set_business_balance(&self, balance: f64) {
        let mut state = self.write();
        state.business_balance = balance;
        self.commit(state, StateKey::BusinessBalance);
    }

    pub fn dashboard_stats(&self) -> DashboardStats {
        self.read().dashboard_stats.clone()
    }

    pub fn set_dashboard_stats(&self, stats: DashboardStats) {
        let mut state = self.write();
        state.dashboard_stats = stats;
        self.commit(state, StateKey::DashboardStats);
    }

    pub fn settings(&self) -> Settings {
        self.read().settings.clone()
    }

    pub fn set_settings(&self, settings: Settings) {
        let mut state = self.write();
        state.settings = settings;
        self.commit(state, StateKey::Settings);
    }

    /// Shallow-merge `patch` into the settings.
    pub fn update_settings(&self, patch: Value) -> Result<Settings, StoreError> {
        let Value::Object(patch) = patch else {
            return Err(StoreError::InvalidSettings("patch must be a JSON object".to_owned()));
        };
        let mut state = self.write();
        let merged: Settings =
            merge_record(&state.settings, patch).map_err(StoreError::InvalidSettings)?;
        state.settings = merged.clone();
        self.commit(state, StateKey::Settings);
        Ok(merged)
    }

    pub fn current_tab(&self) -> String {
        self.read().current_tab.clone()
    }

    pub fn set_current_tab(&self, tab: &str) {
        let mut state = self.write();
        state.current_tab = tab.to_owned();
        self.commit(state, StateKey::CurrentTab);
    }

    // ── Whole-store operations ──

    /// Deep copy of the entire state; mutating it never affects the store.
    pub fn get_all(&self) -> StoreData {
        self.read().to_data()
    }

    /// Restore defaults and delete every `itservices_*` key.
    pub fn reset(&self) {
        *self.write() = State::default();

        match self.storage.keys_with_prefix(STORAGE_PREFIX) {
            Ok(keys) => {
                for key in keys {
                    if let Err(err) = self.storage.remove(&key) {
                        warn!(key, error = %err, "failed to clear persisted key");
                    }
                }
            }
            Err(err) => warn!(error = %err, "failed to list persisted keys"),
        }

        info!("store reset to defaults");
        self.notify_all(RESET_EVENT);
    }

    pub fn export_data(&self) -> Result<String, StoreError> {
        Ok(serde_json::to_string_pretty(&self.get_all())?)
    }

    /// Replace the whole state from an [`Store::export_data`] document.
    /// Returns `false` (and logs why) when the document is not an object
    /// carrying every top-level key, or when a key fails to parse.
    pub fn import_data(&self, json: &str) -> bool {
        let value: Value = match serde_json::from_str(json) {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, "import rejected: not valid JSON");
                return false;
            }
        };

        let Some(object) = value.as_object() else {
            warn!("import rejected: top level is not an object");
            return false;
        };

        let missing: Vec<&str> = top_level_keys().filter(|key| !object.contains_key(*key)).collect();
        if !missing.is_empty() {
            warn!(?missing, "import rejected: missing top-level keys");
            return false;
        }

        let data: StoreData = match serde_json::from_value(value) {
            Ok(data) => data,
            Err(err) => {
                warn!(error = %err, "import rejected: malformed data");
                return false;
            }
        };

        let mut state = self.write();
        *state = State::from_data(data);
        for key in StateKey::ALL {
            self.persist(&state, key);
        }
        drop(state);

        info!("store imported");
        self.notify_all(IMPORT_EVENT);
        true
    }

    fn notify_all(&self, event: &str) {
        let snapshot = self.read().clone();
        for key in StateKey::ALL {
            let value = snapshot.value_of(key).unwrap_or(Value::Null);
            self.subscribers.notify(&StoreChange {
                key: key.as_str().to_owned(),
                value,
            });
        }
        self.subscribers.notify(&StoreChange {
            key: event.to_owned(),
            value: Value::Null,
        });
    }

    // ── Auxiliary keys ──

    fn read_aux(&self, key: &str) -> Option<Value> {
        match self.storage.get(key) {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(err) => {
                    debug!(key, error = %err, "ignoring malformed auxiliary key");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                warn!(key, error = %err, "failed to read auxiliary key");
                None
            }
        }
    }

    pub fn user_settings(&self) -> Option<Value> {
        self.read_aux(USER_SETTINGS_KEY)
    }

    pub fn save_user_settings(&self, settings: &Value) {
        self.write_raw(USER_SETTINGS_KEY, settings);
    }

    pub fn app_state(&self) -> Option<Value> {
        self.read_aux(APP_STATE_KEY)
    }

    pub fn save_app_state(&self, app_state: &Value) {
        self.write_raw(APP_STATE_KEY, app_state);
    }

    pub fn is_first_run(&self) -> bool {
        !matches!(self.read_aux(HAS_RUN_BEFORE_KEY), Some(Value::Bool(true)))
    }

    pub fn mark_has_run(&self) {
        self.write_raw(HAS_RUN_BEFORE_KEY, &Value::Bool(true));
    }
}

fn merge_record<T>(current: &T, patch: Map<String, Value>) -> Result<T, String>
where
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    let mut object = match serde_json::to_value(current) {
        Ok(Value::Object(object)) => object,
        Ok(_) => return Err("record does not serialize to an object".to_owned()),
        Err(err) => return Err(err.to_string()),
    };
    object.extend(patch);
    serde_json::from_value(Value::Object(object)).map_err(|err| err.to_string())
}

/// Named per-collection accessors (`customers`, `add_customer`, ...).
macro_rules! collection_accessors {
    ($ty:ty, $get:ident, $set:ident, $add:ident, $update:ident, $remove:ident) => {
        impl Store {
            pub fn $get(&self) -> Arc<Vec<$ty>> {
                self.get::<$ty>()
            }

            pub fn $set(&self, list: Vec<$ty>) {
                self.set::<$ty>(list)
            }

            pub fn $add(&self, item: $ty) -> bool {
                self.add::<$ty>(item)
            }

            pub fn $update(&self, id: &str, patch: Value) -> Result<Option<$ty>, StoreError> {
                self.update::<$ty>(id, patch)
            }

            pub fn $remove(&self, id: &str) -> bool {
                self.remove::<$ty>(id)
            }
        }
    };
}

collection_accessors!(Customer, customers, set_customers, add_customer, update_customer, remove_customer);
collection_accessors!(Vendor, vendors, set_vendors, add_vendor, update_vendor, remove_vendor);
collection_accessors!(
    VendorService,
    vendor_services,
    set_vendor_services,
    add_vendor_service,
    update_vendor_service,
    remove_vendor_service
);
collection_accessors!(
    CustomerSubscription,
    subscriptions,
    set_subscriptions,
    add_subscription,
    update_subscription,
    remove_subscription
);
collection_accessors!(
    VendorTransaction,
    vendor_transactions,
    set_vendor_transactions,
    add_vendor_transaction,
    update_vendor_transaction,
    remove_vendor_transaction
);
collection_accessors!(
    CreditBalance,
    credit_balances,
    set_credit_balances,
    add_credit_balance,
    update_credit_balance,
    remove_credit_balance
);
collection_accessors!(
    BusinessTransaction,
    business_transactions,
    set_business_transactions,
    add_business_transaction,
    update_business_transaction,
    remove_business_transaction
);

#[cfg(test)]
mod tests;
