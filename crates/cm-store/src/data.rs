//! State shape, keys and the entity ↔ slot mapping.

use cm_api_types::{
    BusinessTransaction, CollectionKey, CreditBalance, Customer, DashboardStats, Entity, Settings,
    Subscription, Vendor, VendorService, VendorTransaction,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub const STORAGE_PREFIX: &str = "itservices_";
pub const DEFAULT_TAB: &str = "dashboard";

/// Owned snapshot of the whole store. Also the export/import format.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoreData {
    pub customers: Vec<Customer>,
    pub vendors: Vec<Vendor>,
    pub vendor_services: Vec<VendorService>,
    pub subscriptions: Vec<Subscription>,
    pub vendor_transactions: Vec<VendorTransaction>,
    pub credit_balances: Vec<CreditBalance>,
    pub business_transactions: Vec<BusinessTransaction>,
    pub business_balance: f64,
    pub dashboard_stats: DashboardStats,
    pub settings: Settings,
    pub current_tab: String,
}

impl Default for StoreData {
    fn default() -> Self {
        Self {
            customers: Vec::new(),
            vendors: Vec::new(),
            vendor_services: Vec::new(),
            subscriptions: Vec::new(),
            vendor_transactions: Vec::new(),
            credit_balances: Vec::new(),
            business_transactions: Vec::new(),
            business_balance: 0.0,
            dashboard_stats: DashboardStats::default(),
            settings: Settings::default(),
            current_tab: DEFAULT_TAB.to_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKey {
    Collection(CollectionKey),
    BusinessBalance,
    DashboardStats,
    Settings,
    CurrentTab,
}

impl StateKey {
    pub const ALL: [StateKey; 11] = [
        StateKey::Collection(CollectionKey::Customers),
        StateKey::Collection(CollectionKey::Vendors),
        StateKey::Collection(CollectionKey::VendorServices),
        StateKey::Collection(CollectionKey::Subscriptions),
        StateKey::Collection(CollectionKey::VendorTransactions),
        StateKey::Collection(CollectionKey::CreditBalances),
        StateKey::Collection(CollectionKey::BusinessTransactions),
        StateKey::BusinessBalance,
        StateKey::DashboardStats,
        StateKey::Settings,
        StateKey::CurrentTab,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StateKey::Collection(key) => key.as_str(),
            StateKey::BusinessBalance => "businessBalance",
            StateKey::DashboardStats => "dashboardStats",
            StateKey::Settings => "settings",
            StateKey::CurrentTab => "currentTab",
        }
    }

    pub fn storage_key(&self) -> String {
        format!("{STORAGE_PREFIX}{}", self.as_str())
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live state. Collections are shared copy-on-write so readers get the
/// current vector without cloning it.
#[derive(Debug, Clone)]
pub struct State {
    pub(crate) customers: Arc<Vec<Customer>>,
    pub(crate) vendors: Arc<Vec<Vendor>>,
    pub(crate) vendor_services: Arc<Vec<VendorService>>,
    pub(crate) subscriptions: Arc<Vec<Subscription>>,
    pub(crate) vendor_transactions: Arc<Vec<VendorTransaction>>,
    pub(crate) credit_balances: Arc<Vec<CreditBalance>>,
    pub(crate) business_transactions: Arc<Vec<BusinessTransaction>>,
    pub(crate) business_balance: f64,
    pub(crate) dashboard_stats: DashboardStats,
    pub(crate) settings: Settings,
    pub(crate) current_tab: String,
}

impl Default for State {
    fn default() -> Self {
        Self::from_data(StoreData::default())
    }
}

impl State {
    pub(crate) fn from_data(data: StoreData) -> Self {
        Self {
            customers: Arc::new(data.customers),
            vendors: Arc::new(data.vendors),
            vendor_services: Arc::new(data.vendor_services),
            subscriptions: Arc::new(data.subscriptions),
            vendor_transactions: Arc::new(data.vendor_transactions),
            credit_balances: Arc::new(data.credit_balances),
            business_transactions: Arc::new(data.business_transactions),
            business_balance: data.business_balance,
            dashboard_stats: data.dashboard_stats,
            settings: data.settings,
            current_tab: data.current_tab,
        }
    }

    pub(crate) fn to_data(&self) -> StoreData {
        StoreData {
            customers: self.customers.as_ref().clone(),
            vendors: self.vendors.as_ref().clone(),
            vendor_services: self.vendor_services.as_ref().clone(),
            subscriptions: self.subscriptions.as_ref().clone(),
            vendor_transactions: self.vendor_transactions.as_ref().clone(),
            credit_balances: self.credit_balances.as_ref().clone(),
            business_transactions: self.business_transactions.as_ref().clone(),
            business_balance: self.business_balance,
            dashboard_stats: self.dashboard_stats.clone(),
            settings: self.settings.clone(),
            current_tab: self.current_tab.clone(),
        }
    }

    pub(crate) fn value_of(&self, key: StateKey) -> serde_json::Result<serde_json::Value> {
        match key {
            StateKey::Collection(CollectionKey::Customers) => serde_json::to_value(&*self.customers),
            StateKey::Collection(CollectionKey::Vendors) => serde_json::to_value(&*self.vendors),
            StateKey::Collection(CollectionKey::VendorServices) => {
                serde_json::to_value(&*self.vendor_services)
            }
            StateKey::Collection(CollectionKey::Subscriptions) => {
                serde_json::to_value(&*self.subscriptions)
            }
            StateKey::Collection(CollectionKey::VendorTransactions) => {
                serde_json::to_value(&*self.vendor_transactions)
            }
            StateKey::Collection(CollectionKey::CreditBalances) => {
                serde_json::to_value(&*self.credit_balances)
            }
            StateKey::Collection(CollectionKey::BusinessTransactions) => {
                serde_json::to_value(&*self.business_transactions)
            }
            StateKey::BusinessBalance => serde_json::to_value(self.business_balance),
            StateKey::DashboardStats => serde_json::to_value(&self.dashboard_stats),
            StateKey::Settings => serde_json::to_value(&self.settings),
            StateKey::CurrentTab => serde_json::to_value(&self.current_tab),
        }
    }

    /// Overwrite one key from its persisted JSON. On a parse error the
    /// current value is left untouched.
    pub(crate) fn load_key(&mut self, key: StateKey, raw: &str) -> serde_json::Result<()> {
        match key {
            StateKey::Collection(CollectionKey::Customers) => load_slot(&mut self.customers, raw),
            StateKey::Collection(CollectionKey::Vendors) => load_slot(&mut self.vendors, raw),
            StateKey::Collection(CollectionKey::VendorServices) => {
                load_slot(&mut self.vendor_services, raw)
            }
            StateKey::Collection(CollectionKey::Subscriptions) => {
                load_slot(&mut self.subscriptions, raw)
            }
            StateKey::Collection(CollectionKey::VendorTransactions) => {
                load_slot(&mut self.vendor_transactions, raw)
            }
            StateKey::Collection(CollectionKey::CreditBalances) => {
                load_slot(&mut self.credit_balances, raw)
            }
            StateKey::Collection(CollectionKey::BusinessTransactions) => {
                load_slot(&mut self.business_transactions, raw)
            }
            StateKey::BusinessBalance => {
                self.business_balance = serde_json::from_str(raw)?;
                Ok(())
            }
            StateKey::DashboardStats => {
                self.dashboard_stats = serde_json::from_str(raw)?;
                Ok(())
            }
            StateKey::Settings => {
                self.settings = serde_json::from_str(raw)?;
                Ok(())
            }
            StateKey::CurrentTab => {
                self.current_tab = serde_json::from_str(raw)?;
                Ok(())
            }
        }
    }
}

fn load_slot<E: Entity>(slot: &mut Arc<Vec<E>>, raw: &str) -> serde_json::Result<()> {
    let list: Vec<E> = serde_json::from_str(raw)?;
    *slot = Arc::new(list);
    Ok(())
}

/// Entities that have a collection slot in [`State`].
pub trait Stored: Entity {
    fn slot(state: &State) -> &Arc<Vec<Self>>;
    fn slot_mut(state: &mut State) -> &mut Arc<Vec<Self>>;
}

macro_rules! stored {
    ($ty:ty, $field:ident) => {
        impl Stored for $ty {
            fn slot(state: &State) -> &Arc<Vec<Self>> {
                &state.$field
            }

            fn slot_mut(state: &mut State) -> &mut Arc<Vec<Self>> {
                &mut state.$field
            }
        }
    };
}

stored!(Customer, customers);
stored!(Vendor, vendors);
stored!(VendorService, vendor_services);
stored!(Subscription, subscriptions);
stored!(VendorTransaction, vendor_transactions);
stored!(CreditBalance, credit_balances);
stored!(BusinessTransaction, business_transactions);

/// Every top-level key an import must carry.
pub fn top_level_keys() -> impl Iterator<Item = &'static str> {
    StateKey::ALL.iter().map(|key| key.as_str())
}
