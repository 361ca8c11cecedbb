//! Canonical entity schema shared by the store, the API client and the widgets.
//!
//! The backend is inconsistent about id field names (`id`, `CustomerID`,
//! `vendor_id`, `VendorID`, ...) and sometimes sends numeric ids. All of that
//! is folded into one `id: String` here, at deserialization time, so nothing
//! downstream has to check both casings.

use serde::de::{self, DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CollectionKey {
    #[serde(rename = "customers")]
    Customers,
    #[serde(rename = "vendors")]
    Vendors,
    #[serde(rename = "vendorServices")]
    VendorServices,
    #[serde(rename = "subscriptions")]
    Subscriptions,
    #[serde(rename = "vendorTransactions")]
    VendorTransactions,
    #[serde(rename = "creditBalances")]
    CreditBalances,
    #[serde(rename = "businessTransactions")]
    BusinessTransactions,
}

impl CollectionKey {
    pub const ALL: [CollectionKey; 7] = [
        CollectionKey::Customers,
        CollectionKey::Vendors,
        CollectionKey::VendorServices,
        CollectionKey::Subscriptions,
        CollectionKey::VendorTransactions,
        CollectionKey::CreditBalances,
        CollectionKey::BusinessTransactions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionKey::Customers => "customers",
            CollectionKey::Vendors => "vendors",
            CollectionKey::VendorServices => "vendorServices",
            CollectionKey::Subscriptions => "subscriptions",
            CollectionKey::VendorTransactions => "vendorTransactions",
            CollectionKey::CreditBalances => "creditBalances",
            CollectionKey::BusinessTransactions => "businessTransactions",
        }
    }
}

impl fmt::Display for CollectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record kept in one of the store's collections.
pub trait Entity: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    const KEY: CollectionKey;

    /// Backend spellings of canonical fields, as `(alias, field)` pairs.
    /// Mirrors the `#[serde(alias)]` attributes on the struct.
    const ALIASES: &'static [(&'static str, &'static str)];

    fn id(&self) -> &str;

    /// Canonical name for a field key in either casing. Unknown keys come
    /// back unchanged.
    fn canonical_field(key: &str) -> &str {
        Self::ALIASES
            .iter()
            .find(|(alias, _)| *alias == key)
            .map_or(key, |(_, field)| field)
    }
}

/// Accepts `"c1"`, `17` or `17.0` and yields a string id.
pub fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(i.to_string()),
            None => Ok(n.to_string()),
        },
        other => Err(de::Error::custom(format!("invalid id: {other}"))),
    }
}

fn deserialize_opt_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(match n.as_i64() {
            Some(i) => i.to_string(),
            None => n.to_string(),
        })),
        Some(other) => Err(de::Error::custom(format!("invalid id: {other}"))),
    }
}

/// Amounts arrive as numbers or numeric strings depending on the endpoint.
pub fn deserialize_amount<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(0.0),
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| de::Error::custom(format!("amount out of range: {n}"))),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(0.0),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| de::Error::custom(format!("invalid amount: {s}"))),
        Some(other) => Err(de::Error::custom(format!("invalid amount: {other}"))),
    }
}

// ── Entities ──

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Customer {
    #[serde(alias = "CustomerID", alias = "customer_id", deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default, alias = "Name")]
    pub name: String,
    #[serde(default, alias = "Email", skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, alias = "Phone", skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, alias = "Company", skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default, alias = "Notes", skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, alias = "CreatedAt", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Customer {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Self::default()
        }
    }
}

impl Entity for Customer {
    const KEY: CollectionKey = CollectionKey::Customers;
    const ALIASES: &'static [(&'static str, &'static str)] = &[
        ("CustomerID", "id"),
        ("customer_id", "id"),
        ("Name", "name"),
        ("Email", "email"),
        ("Phone", "phone"),
        ("Company", "company"),
        ("Notes", "notes"),
        ("CreatedAt", "created_at"),
    ];

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Vendor {
    #[serde(alias = "vendor_id", alias = "VendorID", deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default, alias = "Name", alias = "VendorName")]
    pub name: String,
    #[serde(default, alias = "ContactName", skip_serializing_if = "Option::is_none")]
    pub contact_name: Option<String>,
    #[serde(default, alias = "Email", skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, alias = "Phone", skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, alias = "Website", skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Vendor {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Self::default()
        }
    }
}

impl Entity for Vendor {
    const KEY: CollectionKey = CollectionKey::Vendors;
    const ALIASES: &'static [(&'static str, &'static str)] = &[
        ("vendor_id", "id"),
        ("VendorID", "id"),
        ("Name", "name"),
        ("VendorName", "name"),
        ("ContactName", "contact_name"),
        ("Email", "email"),
        ("Phone", "phone"),
        ("Website", "website"),
    ];

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VendorService {
    #[serde(alias = "service_id", alias = "ServiceID", deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default, alias = "VendorID", deserialize_with = "deserialize_opt_id")]
    pub vendor_id: Option<String>,
    #[serde(default, alias = "ServiceName", alias = "service_name")]
    pub name: String,
    #[serde(default, alias = "Description", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, alias = "UnitPrice", alias = "price", deserialize_with = "deserialize_amount")]
    pub unit_price: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Entity for VendorService {
    const KEY: CollectionKey = CollectionKey::VendorServices;
    const ALIASES: &'static [(&'static str, &'static str)] = &[
        ("service_id", "id"),
        ("ServiceID", "id"),
        ("VendorID", "vendor_id"),
        ("ServiceName", "name"),
        ("service_name", "name"),
        ("Description", "description"),
        ("UnitPrice", "unit_price"),
        ("price", "unit_price"),
    ];

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Subscription {
    #[serde(
        alias = "subscription_id",
        alias = "SubscriptionID",
        deserialize_with = "deserialize_id"
    )]
    pub id: String,
    #[serde(default, alias = "CustomerID", deserialize_with = "deserialize_opt_id")]
    pub customer_id: Option<String>,
    #[serde(default, alias = "ServiceID", alias = "service_id", deserialize_with = "deserialize_opt_id")]
    pub vendor_service_id: Option<String>,
    #[serde(default, alias = "Credits", alias = "credits_used", deserialize_with = "deserialize_amount")]
    pub credits: f64,
    #[serde(default, alias = "StartDate", skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, alias = "EndDate", alias = "expiry_date", skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(default, alias = "Status")]
    pub status: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Entity for Subscription {
    const KEY: CollectionKey = CollectionKey::Subscriptions;
    const ALIASES: &'static [(&'static str, &'static str)] = &[
        ("subscription_id", "id"),
        ("SubscriptionID", "id"),
        ("CustomerID", "customer_id"),
        ("ServiceID", "vendor_service_id"),
        ("service_id", "vendor_service_id"),
        ("Credits", "credits"),
        ("credits_used", "credits"),
        ("StartDate", "start_date"),
        ("EndDate", "end_date"),
        ("expiry_date", "end_date"),
        ("Status", "status"),
    ];

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VendorTransaction {
    #[serde(alias = "transaction_id", alias = "TransactionID", deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default, alias = "VendorID", deserialize_with = "deserialize_opt_id")]
    pub vendor_id: Option<String>,
    #[serde(default, alias = "Credits", deserialize_with = "deserialize_amount")]
    pub credits: f64,
    #[serde(default, alias = "Amount", alias = "cost", deserialize_with = "deserialize_amount")]
    pub amount: f64,
    #[serde(default, alias = "Date", alias = "purchase_date", skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, alias = "Notes", skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Entity for VendorTransaction {
    const KEY: CollectionKey = CollectionKey::VendorTransactions;
    const ALIASES: &'static [(&'static str, &'static str)] = &[
        ("transaction_id", "id"),
        ("TransactionID", "id"),
        ("VendorID", "vendor_id"),
        ("Credits", "credits"),
        ("Amount", "amount"),
        ("cost", "amount"),
        ("Date", "date"),
        ("purchase_date", "date"),
        ("Notes", "notes"),
    ];

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CreditBalance {
    #[serde(alias = "balance_id", alias = "BalanceID", deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default, alias = "VendorID", deserialize_with = "deserialize_opt_id")]
    pub vendor_id: Option<String>,
    #[serde(default, alias = "ServiceID", alias = "service_id", deserialize_with = "deserialize_opt_id")]
    pub vendor_service_id: Option<String>,
    #[serde(
        default,
        alias = "RemainingCredits",
        alias = "remaining",
        deserialize_with = "deserialize_amount"
    )]
    pub remaining_credits: f64,
    #[serde(default, alias = "ExpiryDate", alias = "expiry_date", skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Entity for CreditBalance {
    const KEY: CollectionKey = CollectionKey::CreditBalances;
    const ALIASES: &'static [(&'static str, &'static str)] = &[
        ("balance_id", "id"),
        ("BalanceID", "id"),
        ("VendorID", "vendor_id"),
        ("ServiceID", "vendor_service_id"),
        ("service_id", "vendor_service_id"),
        ("RemainingCredits", "remaining_credits"),
        ("remaining", "remaining_credits"),
        ("ExpiryDate", "expires_at"),
        ("expiry_date", "expires_at"),
    ];

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    #[default]
    #[serde(alias = "INCOME", alias = "credit")]
    Income,
    #[serde(alias = "EXPENSE", alias = "debit")]
    Expense,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BusinessTransaction {
    #[serde(alias = "transaction_id", alias = "TransactionID", deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default, alias = "type", alias = "Type", alias = "transaction_type")]
    pub kind: TransactionKind,
    #[serde(default, alias = "Amount", deserialize_with = "deserialize_amount")]
    pub amount: f64,
    #[serde(default, alias = "Description")]
    pub description: String,
    #[serde(default, alias = "Category", skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, alias = "Date", alias = "transaction_date", skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BusinessTransaction {
    /// Signed effect on the business balance.
    pub fn signed_amount(&self) -> f64 {
        match self.kind {
            TransactionKind::Income => self.amount,
            TransactionKind::Expense => -self.amount,
        }
    }
}

impl Entity for BusinessTransaction {
    const KEY: CollectionKey = CollectionKey::BusinessTransactions;
    const ALIASES: &'static [(&'static str, &'static str)] = &[
        ("transaction_id", "id"),
        ("TransactionID", "id"),
        ("type", "kind"),
        ("Type", "kind"),
        ("transaction_type", "kind"),
        ("Amount", "amount"),
        ("Description", "description"),
        ("Category", "category"),
        ("Date", "date"),
        ("transaction_date", "date"),
    ];

    fn id(&self) -> &str {
        &self.id
    }
}

// ── Scalars ──

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DashboardStats {
    #[serde(alias = "totalCustomers")]
    pub total_customers: u64,
    #[serde(alias = "totalVendors")]
    pub total_vendors: u64,
    #[serde(alias = "activeSubscriptions")]
    pub active_subscriptions: u64,
    #[serde(alias = "monthlyRevenue", deserialize_with = "deserialize_amount")]
    pub monthly_revenue: f64,
    #[serde(alias = "expiringCredits")]
    pub expiring_credits: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub company_name: String,
    pub currency: String,
    pub theme: String,
    pub low_credit_threshold: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            company_name: "IT Services".to_owned(),
            currency: "USD".to_owned(),
            theme: "light".to_owned(),
            low_credit_threshold: 10.0,
        }
    }
}

// ── Reporting ──

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PnlEntry {
    #[serde(alias = "month", alias = "year", alias = "Period", deserialize_with = "deserialize_id")]
    pub period: String,
    #[serde(default, alias = "Revenue", alias = "income", deserialize_with = "deserialize_amount")]
    pub revenue: f64,
    #[serde(default, alias = "Expenses", alias = "costs", deserialize_with = "deserialize_amount")]
    pub expenses: f64,
    #[serde(default, alias = "Profit", deserialize_with = "deserialize_amount")]
    pub profit: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CreditUsage {
    #[serde(alias = "CustomerID", deserialize_with = "deserialize_opt_id", default)]
    pub customer_id: Option<String>,
    #[serde(default, alias = "CreditsUsed", deserialize_with = "deserialize_amount")]
    pub credits_used: f64,
    #[serde(default, alias = "Date", skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

// ── Requests ──

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NewCustomer {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn customer_accepts_either_id_casing() -> anyhow::Result<()> {
        let a: Customer = serde_json::from_value(json!({"id": "c1", "name": "Alice"}))?;
        let b: Customer = serde_json::from_value(json!({"CustomerID": 7, "Name": "Bob"}))?;

        assert_eq!(a.id(), "c1");
        assert_eq!(b.id(), "7");
        assert_eq!(b.name, "Bob");

        let out = serde_json::to_value(&b)?;
        assert_eq!(out["id"], json!("7"));
        assert!(out.get("CustomerID").is_none());
        Ok(())
    }

    #[test]
    fn unknown_fields_survive_in_extra() -> anyhow::Result<()> {
        let v: Vendor = serde_json::from_value(json!({
            "VendorID": "v9",
            "name": "Acme",
            "tier": "gold"
        }))?;

        assert_eq!(v.id, "v9");
        assert_eq!(v.extra.get("tier"), Some(&json!("gold")));
        Ok(())
    }

    #[test]
    fn amounts_parse_from_strings() -> anyhow::Result<()> {
        let t: BusinessTransaction = serde_json::from_value(json!({
            "transaction_id": 3,
            "type": "expense",
            "amount": "12.50",
            "description": "licence"
        }))?;

        assert_eq!(t.kind, TransactionKind::Expense);
        assert_eq!(t.signed_amount(), -12.5);
        Ok(())
    }

    fn assert_alias_table<E: Entity + PartialEq>(sample: Value) -> anyhow::Result<()> {
        let expected: E = serde_json::from_value(sample.clone())?;
        for (alias, field) in E::ALIASES {
            let mut renamed = sample.as_object().cloned().unwrap_or_default();
            let value = renamed.remove(*field).unwrap_or(Value::Null);
            renamed.insert((*alias).to_owned(), value);
            let decoded: E = serde_json::from_value(Value::Object(renamed))?;
            assert_eq!(decoded, expected, "{alias} should decode as {field}");
            assert_eq!(E::canonical_field(alias), *field);
        }
        assert_eq!(E::canonical_field("tier"), "tier");
        Ok(())
    }

    #[test]
    fn alias_tables_match_deserialization() -> anyhow::Result<()> {
        assert_alias_table::<Customer>(json!({
            "id": "c1", "name": "Alice", "email": "a@x", "phone": "1", "company": "Co",
            "notes": "n", "created_at": "2026-01-01"
        }))?;
        assert_alias_table::<Vendor>(json!({
            "id": "v1", "name": "Acme", "contact_name": "Eve", "email": "e@x",
            "phone": "2", "website": "w"
        }))?;
        assert_alias_table::<VendorService>(json!({
            "id": "s1", "vendor_id": "v1", "name": "Seats", "description": "d", "unit_price": 3.5
        }))?;
        assert_alias_table::<Subscription>(json!({
            "id": "sub1", "customer_id": "c1", "vendor_service_id": "s1", "credits": 4.0,
            "start_date": "2026-01-01", "end_date": "2026-12-31", "status": "active"
        }))?;
        assert_alias_table::<VendorTransaction>(json!({
            "id": "t1", "vendor_id": "v1", "credits": 10.0, "amount": 99.0,
            "date": "2026-02-01", "notes": "n"
        }))?;
        assert_alias_table::<CreditBalance>(json!({
            "id": "b1", "vendor_id": "v1", "vendor_service_id": "s1",
            "remaining_credits": 8.0, "expires_at": "2026-12-31"
        }))?;
        assert_alias_table::<BusinessTransaction>(json!({
            "id": "t1", "kind": "expense", "amount": 12.0, "description": "d",
            "category": "c", "date": "2026-03-01"
        }))?;
        Ok(())
    }

    #[test]
    fn bad_id_is_rejected() {
        let result = serde_json::from_value::<Customer>(json!({"id": [1, 2]}));
        assert!(result.is_err());
    }

    #[test]
    fn collection_keys_use_camel_case() {
        assert_eq!(CollectionKey::VendorServices.as_str(), "vendorServices");
        assert_eq!(
            serde_json::to_value(CollectionKey::CreditBalances).ok(),
            Some(json!("creditBalances"))
        );
    }
}
