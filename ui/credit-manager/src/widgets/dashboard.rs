use async_trait::async_trait;
use cm_store::Subscription;
use cm_widgets::html::{escape, money};
use cm_widgets::{Widget, WidgetContext, WidgetError, WidgetHost};
use std::sync::Arc;

use super::{schedule_refresh, schedule_render};

/// Headline numbers plus a low-credit warning count.
#[derive(Default)]
pub struct DashboardWidget {
    balance_watch: Option<Subscription>,
}

impl DashboardWidget {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Widget for DashboardWidget {
    fn name(&self) -> &str {
        "Dashboard"
    }

    async fn load_data(&mut self, ctx: &WidgetContext) -> Result<(), WidgetError> {
        let (stats, balance, credits) = tokio::try_join!(
            ctx.api.dashboard_stats(),
            ctx.api.business_balance(),
            ctx.api.credit_balances(),
        )?;
        ctx.store.set_dashboard_stats(stats);
        ctx.store.set_business_balance(balance);
        ctx.store.set_credit_balances(credits);
        Ok(())
    }

    fn render(&self, ctx: &WidgetContext) -> Result<String, WidgetError> {
        let stats = ctx.store.dashboard_stats();
        let settings = ctx.store.settings();
        let balance = ctx.store.business_balance();
        let low_credits = ctx
            .store
            .credit_balances()
            .iter()
            .filter(|b| b.remaining_credits < settings.low_credit_threshold)
            .count();

        // `value` is markup: counts or `money` output.
        let card = |label: &str, value: String, class: &str| {
            format!(
                r#"<div class="stat-card {class}"><span class="stat-label">{}</span><span class="stat-value">{value}</span></div>"#,
                escape(label)
            )
        };
        let cards = [
            card("Customers", stats.total_customers.to_string(), "customers"),
            card("Vendors", stats.total_vendors.to_string(), "vendors"),
            card(
                "Active subscriptions",
                stats.active_subscriptions.to_string(),
                "subscriptions",
            ),
            card(
                "Monthly revenue",
                money(stats.monthly_revenue, &settings.currency),
                "revenue",
            ),
            card("Business balance", money(balance, &settings.currency), "balance"),
            card(
                "Low credit balances",
                low_credits.to_string(),
                if low_credits > 0 { "warning" } else { "ok" },
            ),
        ]
        .concat();

        Ok(format!(
            r#"<section class="dashboard"><header><h2>{}</h2><button class="btn" data-action="refresh">Refresh</button></header><div class="stat-grid">{cards}</div></section>"#,
            escape(&settings.company_name)
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

        let me = host.weak();
        self.balance_watch = Some(host.context().store.subscribe("businessBalance", move |_| {
            if let Err(err) = schedule_render(&me) {
                tracing::warn!("dashboard re-render not scheduled: {err}");
            }
        }));
        Ok(())
    }

    fn on_destroy(&mut self) {
        if let Some(watch) = self.balance_watch.take() {
            watch.unsubscribe();
        }
    }
}
