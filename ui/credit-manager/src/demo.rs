//! Seeded in-memory backend for running the app without a server.

use cm_api_client::{ApiError, Method, MockApiClient, Reply, routes};
use cm_api_types::{Customer, Entity};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::widgets::current_year;

type Rows = Arc<Mutex<Vec<Value>>>;

fn rows(rows: &Rows) -> MutexGuard<'_, Vec<Value>> {
    rows.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn seeded_customers() -> Vec<Value> {
    vec![
        json!({ "CustomerID": 1, "Name": "Northwind Traders", "Email": "it@northwind.example", "Company": "Northwind" }),
        json!({ "customer_id": "2", "name": "Contoso Clinic", "phone": "+1 555 0100" }),
        json!({ "id": "c-3", "name": "Fabrikam Legal", "email": "admin@fabrikam.example" }),
    ]
}

fn not_found(id: &str) -> ApiError {
    ApiError::Status {
        status: 404,
        path: routes::customer(id),
        body: "customer not found".to_owned(),
    }
}

/// PUT and DELETE for one customer id.
fn register_customer_routes(mock: &MockApiClient, customers: &Rows, id: String) {
    let path = routes::customer(&id);

    let list = customers.clone();
    let target = id.clone();
    mock.route(
        Method::Put,
        &path,
        Reply::handler(move |body| {
            let mut rows = rows(&list);
            let row = rows
                .iter_mut()
                .find(|row| row_id(row).as_deref() == Some(target.as_str()))
                .ok_or_else(|| not_found(&target))?;
            let canonical = serde_json::from_value::<Customer>(row.clone())
                .and_then(serde_json::to_value);
            let Ok(Value::Object(mut fields)) = canonical else {
                return Err(ApiError::Decode {
                    path: routes::customer(&target),
                    reason: "stored customer is malformed".to_owned(),
                });
            };
            if let Some(Value::Object(patch)) = body {
                for (key, value) in patch {
                    fields.insert(Customer::canonical_field(key).to_owned(), value.clone());
                }
            }
            *row = Value::Object(fields);
            Ok(json!({ "customer": row.clone() }))
        }),
    );

    let list = customers.clone();
    mock.route(
        Method::Delete,
        &path,
        Reply::handler(move |_| {
            let mut rows = rows(&list);
            let before = rows.len();
            rows.retain(|row| row_id(row).as_deref() != Some(id.as_str()));
            if rows.len() == before {
                return Err(not_found(&id));
            }
            Ok(json!({ "deleted": id }))
        }),
    );
}

fn row_id(row: &Value) -> Option<String> {
    ["id", "CustomerID", "customer_id"]
        .iter()
        .find_map(|key| row.get(*key))
        .map(|id| match id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
}

/// A mock backend answering every route the widgets call. Customers can be
/// created and deleted; everything else is static.
pub fn demo_api() -> Arc<MockApiClient> {
    Arc::new_cyclic(|me: &Weak<MockApiClient>| {
        let mock = MockApiClient::new();
        let customers: Rows = Arc::new(Mutex::new(seeded_customers()));

        for id in rows(&customers).iter().filter_map(row_id) {
            register_customer_routes(&mock, &customers, id);
        }

        let list = customers.clone();
        mock.route(
            Method::Get,
            routes::CUSTOMERS,
            Reply::handler(move |_| Ok(json!({ "customers": rows(&list).clone() }))),
        );

        let list = customers.clone();
        let me = me.clone();
        let next_id = AtomicU64::new(100);
        mock.route(
            Method::Post,
            routes::CUSTOMERS,
            Reply::handler(move |body| {
                let mut customer = body.cloned().unwrap_or_else(|| json!({}));
                let id = next_id.fetch_add(1, Ordering::Relaxed).to_string();
                if let Value::Object(fields) = &mut customer {
                    fields.insert("id".to_owned(), Value::String(id.clone()));
                }
                rows(&list).push(customer.clone());
                if let Some(mock) = me.upgrade() {
                    register_customer_routes(&mock, &list, id);
                }
                Ok(json!({ "customer": customer }))
            }),
        );

        mock.route(
            Method::Get,
            routes::VENDORS,
            Reply::json(json!([
                { "VendorID": 1, "VendorName": "Microsoft", "ContactName": "Partner desk", "Website": "https://microsoft.example" },
                { "vendor_id": "2", "name": "Google Cloud", "email": "billing@gcp.example" },
            ])),
        );
        mock.route(
            Method::Get,
            routes::VENDOR_SERVICES,
            Reply::json(json!({ "services": [
                { "ServiceID": 10, "VendorID": 1, "ServiceName": "Microsoft 365 E3", "UnitPrice": "36.00" },
                { "service_id": "11", "vendor_id": "1", "name": "Azure credits", "unit_price": 1.0 },
                { "id": "12", "vendor_id": 2, "service_name": "Workspace Business", "price": 12 },
            ]})),
        );
        mock.route(
            Method::Get,
            routes::SUBSCRIPTIONS,
            Reply::json(json!({ "subscriptions": [
                { "SubscriptionID": 1, "CustomerID": 1, "ServiceID": 10, "Credits": 25, "StartDate": "2026-01-01", "EndDate": "2026-12-31", "Status": "active" },
                { "subscription_id": "2", "customer_id": "1", "service_id": "11", "credits_used": "40", "status": "active" },
                { "id": "3", "customer_id": "c-3", "vendor_service_id": 12, "credits": 10, "expiry_date": "2026-06-30", "status": "expired" },
            ]})),
        );
        mock.route(
            Method::Get,
            routes::VENDOR_TRANSACTIONS,
            Reply::json(json!([
                { "TransactionID": 1, "VendorID": 1, "Credits": 100, "Amount": "3600.00", "Date": "2026-01-02" },
                { "transaction_id": "2", "vendor_id": "2", "credits": 50, "cost": 600, "purchase_date": "2026-02-10" },
            ])),
        );
        mock.route(
            Method::Get,
            routes::CREDITS_USAGE,
            Reply::json(json!({ "usage": [
                { "CustomerID": 1, "CreditsUsed": 12.5, "Date": "2026-03-01" },
                { "customer_id": "c-3", "credits_used": "4", "date": "2026-03-04" },
            ]})),
        );
        mock.route(
            Method::Get,
            routes::CREDIT_BALANCES,
            Reply::json(json!([
                { "BalanceID": 1, "VendorID": 1, "ServiceID": 10, "RemainingCredits": 42, "ExpiryDate": "2026-12-31" },
                { "balance_id": "2", "vendor_id": "1", "service_id": "11", "remaining": "4.5" },
                { "id": "3", "vendor_id": 2, "vendor_service_id": 12, "remaining_credits": 120 },
            ])),
        );
        mock.route(
            Method::Get,
            routes::BUSINESS_TRANSACTIONS,
            Reply::json(json!({ "transactions": [
                { "TransactionID": 1, "Type": "INCOME", "Amount": 4200, "Description": "Managed services retainer", "Date": "2026-01-05" },
                { "transaction_id": "2", "transaction_type": "expense", "amount": "1250.50", "description": "Licence renewals", "category": "Licences" },
                { "id": "3", "type": "income", "amount": 980, "description": "Project work" },
            ]})),
        );
        mock.route(
            Method::Get,
            routes::BUSINESS_BALANCE,
            Reply::json(json!({ "balance": 3929.5 })),
        );
        mock.route(
            Method::Get,
            routes::DASHBOARD_STATS,
            Reply::json(json!({
                "totalCustomers": 3,
                "totalVendors": 2,
                "activeSubscriptions": 5,
                "monthlyRevenue": "5180.00",
                "expiringCredits": 1,
            })),
        );

        let months: Vec<Value> = (1..=12)
            .map(|m| {
                let revenue = 4000.0 + f64::from(m) * 150.0;
                let expenses = 2500.0 + f64::from(m % 4) * 400.0;
                json!({ "month": m, "revenue": revenue, "expenses": expenses, "profit": revenue - expenses })
            })
            .collect();
        mock.route(
            Method::Get,
            &format!("{}?year={}", routes::PNL_MONTHLY, current_year()),
            Reply::json(json!({ "months": months })),
        );
        mock.route(
            Method::Get,
            routes::PNL_YEARLY,
            Reply::json(json!({ "years": [
                { "year": current_year() - 1, "Revenue": 52000, "Expenses": 38000, "Profit": 14000 },
                { "year": current_year(), "revenue": 61000, "expenses": 41000, "profit": 20000 },
            ]})),
        );

        mock
    })
}
