use async_trait::async_trait;
use cm_api_types::{CreditBalance, CreditUsage, Customer, Vendor, VendorService};
use cm_widgets::html::{empty_state, escape};
use cm_widgets::{Widget, WidgetContext, WidgetError, WidgetHost};
use std::sync::Arc;
use tracing::debug;

use super::{Shared, lock, name_of, schedule_refresh};

/// Remaining vendor credits, flagged when under the configured threshold,
/// and credits consumed by customers.
#[derive(Default)]
pub struct CreditsWidget {
    usage: Shared<Vec<CreditUsage>>,
}

impl CreditsWidget {
    pub fn new() -> Self {
        Self::default()
    }
}

fn usage_table(usage: &[CreditUsage], customers: &[Customer]) -> String {
    if usage.is_empty() {
        return empty_state("No credit usage recorded.");
    }
    let rows: String = usage
        .iter()
        .map(|entry| {
            let customer = match entry.customer_id.as_deref() {
                Some(id) => customers
                    .iter()
                    .find(|c| c.id == id)
                    .map_or_else(|| format!("Customer {id}"), |c| c.name.clone()),
                None => "-".to_owned(),
            };
            format!(
                r#"<tr><td>{date}</td><td>{customer}</td><td class="num">{used:.2}</td></tr>"#,
                date = escape(entry.date.as_deref().unwrap_or("-")),
                customer = escape(&customer),
                used = entry.credits_used,
            )
        })
        .collect();
    let total: f64 = usage.iter().map(|entry| entry.credits_used).sum();
    format!(
        "<table class=\"data-table usage\"><thead><tr><th>Date</th><th>Customer</th><th>Credits used</th></tr></thead><tbody>{rows}</tbody><tfoot><tr><td colspan=\"2\">Total</td><td class=\"num\">{total:.2}</td></tr></tfoot></table>"
    )
}

fn row(balance: &CreditBalance, vendors: &[Vendor], services: &[VendorService], threshold: f64) -> String {
    let low = balance.remaining_credits < threshold;
    format!(
        r#"<tr class="{class}" data-id="{id}"><td>{vendor}</td><td>{service}</td><td class="num">{remaining:.2}</td><td>{expires}</td></tr>"#,
        class = if low { "credit-row low-balance" } else { "credit-row" },
        id = escape(&balance.id),
        vendor = escape(&name_of(vendors, balance.vendor_id.as_deref(), |v| v.name.as_str())),
        service = escape(&name_of(services, balance.vendor_service_id.as_deref(), |s| s.name.as_str())),
        remaining = balance.remaining_credits,
        expires = escape(balance.expires_at.as_deref().unwrap_or("-")),
    )
}

#[async_trait]
impl Widget for CreditsWidget {
    fn name(&self) -> &str {
        "Credits"
    }

    async fn load_data(&mut self, ctx: &WidgetContext) -> Result<(), WidgetError> {
        let (balances, vendors, services, usage) = tokio::try_join!(
            ctx.api.credit_balances(),
            ctx.api.vendors(),
            ctx.api.vendor_services(),
            ctx.api.credit_usage(),
        )?;
        debug!(balances = balances.len(), usage = usage.len(), "credit balances loaded");
        *lock(&self.usage) = usage;
        ctx.store.set_credit_balances(balances);
        ctx.store.set_vendors(vendors);
        ctx.store.set_vendor_services(services);
        Ok(())
    }

    fn render(&self, ctx: &WidgetContext) -> Result<String, WidgetError> {
        let balances = ctx.store.credit_balances();
        let vendors = ctx.store.vendors();
        let services = ctx.store.vendor_services();
        let threshold = ctx.store.settings().low_credit_threshold;
        let low = balances
            .iter()
            .filter(|b| b.remaining_credits < threshold)
            .count();

        let body = if balances.is_empty() {
            empty_state("No credit balances recorded.")
        } else {
            let rows: String = balances
                .iter()
                .map(|b| row(b, &vendors, &services, threshold))
                .collect();
            format!(
                "<table class=\"data-table\"><thead><tr><th>Vendor</th><th>Service</th><th>Remaining</th><th>Expires</th></tr></thead><tbody>{rows}</tbody></table>"
            )
        };
        let warning = if low > 0 {
            format!(r#"<p class="credit-warning">{low} balance(s) below {threshold}</p>"#)
        } else {
            String::new()
        };
        let usage = usage_table(&lock(&self.usage), &ctx.store.customers());
        Ok(format!(
            r#"<section class="credits"><header><h2>Credit balances</h2><button class="btn" data-action="refresh">Refresh</button></header>{warning}{body}<h3>Credit usage</h3>{usage}</section>"#
        ))
    }

    fn bind_events(&mut self, host: &Arc<WidgetHost>) -> Result<(), WidgetError> {
        let me = host.weak();
        host.listen_dom("click", move |event| {
            if event.attr("action") == Some("refresh") {
                schedule_refresh(&me)?;
            }
            Ok(())
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_balances_are_flagged_and_unknown_refs_named() {
        let vendors = vec![Vendor::new("v1", "Cloudy")];
        let balance = CreditBalance {
            id: "b1".into(),
            vendor_id: Some("v1".into()),
            vendor_service_id: Some("missing".into()),
            remaining_credits: 3.0,
            ..CreditBalance::default()
        };

        let html = row(&balance, &vendors, &[], 10.0);
        assert!(html.contains("low-balance"));
        assert!(html.contains("<td>Cloudy</td>"));
        assert!(html.contains("<td>Unknown</td>"));

        let healthy = CreditBalance {
            remaining_credits: 50.0,
            ..balance
        };
        assert!(!row(&healthy, &vendors, &[], 10.0).contains("low-balance"));
    }

    #[test]
    fn usage_names_known_customers_and_totals() {
        let customers = vec![Customer::new("1", "Northwind")];
        let usage = vec![
            CreditUsage {
                customer_id: Some("1".into()),
                credits_used: 12.5,
                date: Some("2026-03-01".into()),
            },
            CreditUsage {
                customer_id: Some("c-3".into()),
                credits_used: 4.0,
                date: None,
            },
        ];

        let html = usage_table(&usage, &customers);
        assert!(html.contains("<td>Northwind</td>"));
        assert!(html.contains("<td>Customer c-3</td>"));
        assert!(html.contains(r#"<td class="num">16.50</td>"#));
        assert!(usage_table(&[], &customers).contains("No credit usage recorded."));
    }
}
