//! REST client for the credit-management backend.
//!
//! [`ApiClient`] is the transport seam: [`HttpApiClient`] talks to the real
//! server, [`MockApiClient`] serves canned in-memory routes. [`Api`] layers
//! typed calls on top and normalizes every payload into the canonical
//! schema before it reaches a widget or the store.

mod http;
mod mock;

pub use http::HttpApiClient;
pub use mock::{MockApiClient, Reply};

use async_trait::async_trait;
use cm_api_types::{
    BusinessTransaction, CreditBalance, CreditUsage, Customer, DashboardStats, NewCustomer,
    PnlEntry, Subscription, Vendor, VendorService, VendorTransaction, deserialize_amount,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub mod routes {
    use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};

    pub const CUSTOMERS: &str = "/api/customers";
    pub const VENDORS: &str = "/api/vendors";
    pub const VENDOR_SERVICES: &str = "/api/vendor-services";
    pub const SUBSCRIPTIONS: &str = "/api/subscriptions";
    pub const VENDOR_TRANSACTIONS: &str = "/api/vendor-transactions";
    pub const CREDIT_BALANCES: &str = "/api/credit-balances";
    pub const CREDITS_USAGE: &str = "/api/credits/usage";
    pub const BUSINESS_TRANSACTIONS: &str = "/api/business/transactions";
    pub const BUSINESS_BALANCE: &str = "/api/business/balance";
    pub const DASHBOARD_STATS: &str = "/api/dashboard/stats";
    pub const PNL_MONTHLY: &str = "/api/pnl/monthly";
    pub const PNL_YEARLY: &str = "/api/pnl/yearly";

    const SEGMENT_ENCODE_SET: &AsciiSet = &CONTROLS
        .add(b' ')
        .add(b'"')
        .add(b'#')
        .add(b'%')
        .add(b'/')
        .add(b'<')
        .add(b'>')
        .add(b'?')
        .add(b'`')
        .add(b'{')
        .add(b'}');

    /// `/api/customers/{id}` with the id encoded as one path segment.
    pub fn customer(id: &str) -> String {
        format!("{CUSTOMERS}/{}", utf8_percent_encode(id, SEGMENT_ENCODE_SET))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        })
    }
}

#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("transport error calling {path}: {message}")]
    Transport { path: String, message: String },
    #[error("{status} from {path}: {body}")]
    Status { status: u16, path: String, body: String },
    #[error("unexpected response from {path}: {reason}")]
    Decode { path: String, reason: String },
    #[error("no route for {method} {path}")]
    NoRoute { method: Method, path: String },
}

#[async_trait]
pub trait ApiClient: Send + Sync {
    async fn request(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, ApiError>;
}

/// Accepts a bare array or an object wrapping one under `key`, `data`,
/// `items` or `results`.
pub fn extract_list(path: &str, value: Value, key: &str) -> Result<Vec<Value>, ApiError> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut object) => {
            for candidate in [key, "data", "items", "results"] {
                if let Some(Value::Array(items)) = object.remove(candidate) {
                    return Ok(items);
                }
            }
            Err(ApiError::Decode {
                path: path.to_owned(),
                reason: format!("expected an array or an object with `{key}`"),
            })
        }
        Value::Null => Ok(Vec::new()),
        other => Err(ApiError::Decode {
            path: path.to_owned(),
            reason: format!("expected a list, got {other}"),
        }),
    }
}

fn decode<T: DeserializeOwned>(path: &str, value: Value) -> Result<T, ApiError> {
    serde_json::from_value(value).map_err(|err| ApiError::Decode {
        path: path.to_owned(),
        reason: err.to_string(),
    })
}

fn encode<T: Serialize>(path: &str, body: &T) -> Result<Value, ApiError> {
    serde_json::to_value(body).map_err(|err| ApiError::Decode {
        path: path.to_owned(),
        reason: err.to_string(),
    })
}

/// Typed calls over any [`ApiClient`].
#[derive(Clone)]
pub struct Api {
    client: Arc<dyn ApiClient>,
}

impl Api {
    pub fn new(client: Arc<dyn ApiClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Arc<dyn ApiClient> {
        &self.client
    }

    pub async fn get(&self, path: &str) -> Result<Value, ApiError> {
        self.client.request(Method::Get, path, None).await
    }

    async fn list<T: DeserializeOwned>(&self, path: &str, key: &str) -> Result<Vec<T>, ApiError> {
        let value = self.get(path).await?;
        extract_list(path, value, key)?
            .into_iter()
            .map(|item| decode(path, item))
            .collect()
    }

    pub async fn customers(&self) -> Result<Vec<Customer>, ApiError> {
        self.list(routes::CUSTOMERS, "customers").await
    }

    pub async fn create_customer(&self, customer: &NewCustomer) -> Result<Customer, ApiError> {
        let body = encode(routes::CUSTOMERS, customer)?;
        let value = self
            .client
            .request(Method::Post, routes::CUSTOMERS, Some(body))
            .await?;
        let value = match value {
            Value::Object(mut object) if object.contains_key("customer") => {
                object.remove("customer").unwrap_or(Value::Null)
            }
            other => other,
        };
        decode(routes::CUSTOMERS, value)
    }

    pub async fn update_customer(&self, id: &str, patch: Value) -> Result<Value, ApiError> {
        let path = routes::customer(id);
        self.client.request(Method::Put, &path, Some(patch)).await
    }

    pub async fn delete_customer(&self, id: &str) -> Result<(), ApiError> {
        let path = routes::customer(id);
        self.client.request(Method::Delete, &path, None).await?;
        Ok(())
    }

    pub async fn vendors(&self) -> Result<Vec<Vendor>, ApiError> {
        self.list(routes::VENDORS, "vendors").await
    }

    pub async fn vendor_services(&self) -> Result<Vec<VendorService>, ApiError> {
        self.list(routes::VENDOR_SERVICES, "services").await
    }

    pub async fn subscriptions(&self) -> Result<Vec<Subscription>, ApiError> {
        self.list(routes::SUBSCRIPTIONS, "subscriptions").await
    }

    pub async fn vendor_transactions(&self) -> Result<Vec<VendorTransaction>, ApiError> {
        self.list(routes::VENDOR_TRANSACTIONS, "transactions").await
    }

    pub async fn credit_balances(&self) -> Result<Vec<CreditBalance>, ApiError> {
        self.list(routes::CREDIT_BALANCES, "balances").await
    }

    pub async fn credit_usage(&self) -> Result<Vec<CreditUsage>, ApiError> {
        self.list(routes::CREDITS_USAGE, "usage").await
    }

    pub async fn business_transactions(&self) -> Result<Vec<BusinessTransaction>, ApiError> {
        self.list(routes::BUSINESS_TRANSACTIONS, "transactions").await
    }

    /// Accepts a bare amount or `{"balance": amount}`, numbers or numeric
    /// strings alike.
    pub async fn business_balance(&self) -> Result<f64, ApiError> {
        let path = routes::BUSINESS_BALANCE;
        let value = match self.get(path).await? {
            Value::Object(mut object) => object.remove("balance").ok_or_else(|| ApiError::Decode {
                path: path.to_owned(),
                reason: "missing `balance`".to_owned(),
            })?,
            other => other,
        };
        deserialize_amount(value).map_err(|err| ApiError::Decode {
            path: path.to_owned(),
            reason: err.to_string(),
        })
    }

    pub async fn dashboard_stats(&self) -> Result<DashboardStats, ApiError> {
        let value = self.get(routes::DASHBOARD_STATS).await?;
        decode(routes::DASHBOARD_STATS, value)
    }

    pub async fn monthly_pnl(&self, year: i32) -> Result<Vec<PnlEntry>, ApiError> {
        let path = format!("{}?year={year}", routes::PNL_MONTHLY);
        self.list(&path, "months").await
    }

    pub async fn yearly_pnl(&self) -> Result<Vec<PnlEntry>, ApiError> {
        self.list(routes::PNL_YEARLY, "years").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extract_list_accepts_common_wrappers() -> anyhow::Result<()> {
        assert_eq!(extract_list("/x", json!([1, 2]), "k")?.len(), 2);
        assert_eq!(extract_list("/x", json!({"k": [1]}), "k")?.len(), 1);
        assert_eq!(extract_list("/x", json!({"data": [1, 2, 3]}), "k")?.len(), 3);
        assert!(extract_list("/x", Value::Null, "k")?.is_empty());
        assert!(extract_list("/x", json!({"other": 1}), "k").is_err());
        assert!(extract_list("/x", json!("str"), "k").is_err());
        Ok(())
    }

    #[tokio::test]
    async fn typed_calls_normalize_payloads() -> anyhow::Result<()> {
        let mock = Arc::new(MockApiClient::new());
        mock.route(
            Method::Get,
            routes::CUSTOMERS,
            Reply::json(json!({"customers": [
                {"CustomerID": 1, "Name": "Alice"},
                {"id": "c2", "name": "Bob"}
            ]})),
        );
        mock.route(Method::Get, routes::BUSINESS_BALANCE, Reply::json(json!({"balance": 42.5})));

        let api = Api::new(mock.clone());
        let customers = api.customers().await?;

        assert_eq!(customers[0].id, "1");
        assert_eq!(customers[1].name, "Bob");
        assert_eq!(api.business_balance().await?, 42.5);
        assert_eq!(mock.calls().len(), 2);
        Ok(())
    }

    #[test]
    fn customer_paths_encode_the_id() {
        assert_eq!(routes::customer("c-3"), "/api/customers/c-3");
        assert_eq!(routes::customer("a/b"), "/api/customers/a%2Fb");
        assert_eq!(routes::customer("x?y#z"), "/api/customers/x%3Fy%23z");
        assert_eq!(routes::customer("50%"), "/api/customers/50%25");
    }

    #[tokio::test]
    async fn delete_targets_the_encoded_segment() -> anyhow::Result<()> {
        let mock = Arc::new(MockApiClient::new());
        mock.route(Method::Delete, "/api/customers/a%2Fb", Reply::json(json!({})));
        mock.route(Method::Delete, "/api/customers/a/b", Reply::status(500, "wrong route"));

        let api = Api::new(mock.clone());
        api.delete_customer("a/b").await?;
        assert_eq!(
            mock.calls(),
            vec![(Method::Delete, "/api/customers/a%2Fb".to_owned())]
        );
        Ok(())
    }

    #[tokio::test]
    async fn business_balance_accepts_strings_and_bare_numbers() -> anyhow::Result<()> {
        let mock = Arc::new(MockApiClient::new());
        let api = Api::new(mock.clone());

        mock.route(Method::Get, routes::BUSINESS_BALANCE, Reply::json(json!({"balance": "42.50"})));
        assert_eq!(api.business_balance().await?, 42.5);

        mock.route(Method::Get, routes::BUSINESS_BALANCE, Reply::json(json!(-7)));
        assert_eq!(api.business_balance().await?, -7.0);

        mock.route(Method::Get, routes::BUSINESS_BALANCE, Reply::json(json!({"total": 1})));
        assert!(matches!(api.business_balance().await, Err(ApiError::Decode { .. })));

        mock.route(Method::Get, routes::BUSINESS_BALANCE, Reply::json(json!({"balance": "n/a"})));
        assert!(matches!(api.business_balance().await, Err(ApiError::Decode { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn create_customer_unwraps_envelope() -> anyhow::Result<()> {
        let mock = Arc::new(MockApiClient::new());
        mock.route(
            Method::Post,
            routes::CUSTOMERS,
            Reply::handler(|body| {
                let name = body.and_then(|b| b.get("name")).cloned().unwrap_or(Value::Null);
                Ok(json!({"customer": {"CustomerID": 77, "Name": name}}))
            }),
        );

        let api = Api::new(mock);
        let created = api
            .create_customer(&NewCustomer {
                name: "Carol".into(),
                ..NewCustomer::default()
            })
            .await?;

        assert_eq!(created.id, "77");
        assert_eq!(created.name, "Carol");
        Ok(())
    }

    #[tokio::test]
    async fn server_errors_surface_as_status() {
        let mock = Arc::new(MockApiClient::new());
        mock.route(Method::Get, routes::VENDORS, Reply::status(503, "maintenance"));

        let api = Api::new(mock);
        let err = api.vendors().await.expect_err("503 is an error");
        assert!(matches!(err, ApiError::Status { status: 503, .. }));

        let err = api.credit_balances().await.expect_err("no route");
        assert!(matches!(err, ApiError::NoRoute { .. }));
    }
}
