use async_trait::async_trait;
use cm_api_types::{Vendor, VendorService, VendorTransaction};
use cm_widgets::html::{empty_state, escape, money};
use cm_widgets::{Widget, WidgetContext, WidgetError, WidgetHost};
use std::sync::Arc;

use super::{name_of, schedule_refresh};

/// Vendor directory with the number of services each one offers, and the
/// credit purchases made from them, newest first.
#[derive(Default)]
pub struct VendorsWidget;

impl VendorsWidget {
    pub fn new() -> Self {
        Self
    }
}

fn row(vendor: &Vendor, services: &[VendorService], currency: &str) -> String {
    let offered: Vec<&VendorService> = services
        .iter()
        .filter(|s| s.vendor_id.as_deref() == Some(vendor.id.as_str()))
        .collect();
    let cheapest = offered
        .iter()
        .map(|s| s.unit_price)
        .fold(None, |min: Option<f64>, p| Some(min.map_or(p, |m| m.min(p))));
    format!(
        r#"<tr data-id="{id}"><td>{name}</td><td>{contact}</td><td>{email}</td><td class="num">{count}</td><td class="num">{from}</td></tr>"#,
        id = escape(&vendor.id),
        name = escape(&vendor.name),
        contact = escape(vendor.contact_name.as_deref().unwrap_or("-")),
        email = escape(vendor.email.as_deref().unwrap_or("-")),
        count = offered.len(),
        from = cheapest.map(|p| money(p, currency)).unwrap_or_else(|| "-".to_owned()),
    )
}

fn purchases(transactions: &[VendorTransaction], vendors: &[Vendor], currency: &str) -> String {
    if transactions.is_empty() {
        return empty_state("No credit purchases recorded.");
    }
    let mut sorted: Vec<&VendorTransaction> = transactions.iter().collect();
    sorted.sort_by(|a, b| b.date.cmp(&a.date));
    let rows: String = sorted
        .iter()
        .map(|tx| {
            format!(
                r#"<tr data-id="{id}"><td>{date}</td><td>{vendor}</td><td class="num">{credits}</td><td class="num">{amount}</td></tr>"#,
                id = escape(&tx.id),
                date = escape(tx.date.as_deref().unwrap_or("-")),
                vendor = escape(&name_of(vendors, tx.vendor_id.as_deref(), |v| v.name.as_str())),
                credits = tx.credits,
                amount = money(tx.amount, currency),
            )
        })
        .collect();
    format!(
        "<table class=\"data-table purchases\"><thead><tr><th>Date</th><th>Vendor</th><th>Credits</th><th>Cost</th></tr></thead><tbody>{rows}</tbody></table>"
    )
}

#[async_trait]
impl Widget for VendorsWidget {
    fn name(&self) -> &str {
        "Vendors"
    }

    async fn load_data(&mut self, ctx: &WidgetContext) -> Result<(), WidgetError> {
        let (vendors, services, transactions) = tokio::try_join!(
            ctx.api.vendors(),
            ctx.api.vendor_services(),
            ctx.api.vendor_transactions(),
        )?;
        ctx.store.set_vendors(vendors);
        ctx.store.set_vendor_services(services);
        ctx.store.set_vendor_transactions(transactions);
        Ok(())
    }

    fn render(&self, ctx: &WidgetContext) -> Result<String, WidgetError> {
        let vendors = ctx.store.vendors();
        let services = ctx.store.vendor_services();
        let currency = ctx.store.settings().currency;

        let body = if vendors.is_empty() {
            empty_state("No vendors yet.")
        } else {
            let rows: String = vendors.iter().map(|v| row(v, &services, &currency)).collect();
            format!(
                "<table class=\"data-table\"><thead><tr><th>Vendor</th><th>Contact</th><th>Email</th><th>Services</th><th>From</th></tr></thead><tbody>{rows}</tbody></table>"
            )
        };
        let history = purchases(&ctx.store.vendor_transactions(), &vendors, &currency);
        Ok(format!(
            r#"<section class="vendors"><header><h2>Vendors <span class="count">{}</span></h2><button class="btn" data-action="refresh">Refresh</button></header>{body}<h3>Credit purchases</h3>{history}</section>"#,
            vendors.len()
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
