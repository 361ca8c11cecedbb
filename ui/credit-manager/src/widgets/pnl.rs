use async_trait::async_trait;
use chrono::{Datelike, Utc};
use cm_api_types::PnlEntry;
use cm_widgets::html::{empty_state, escape, money};
use cm_widgets::{Widget, WidgetContext, WidgetError, WidgetHost};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use super::{Shared, lock, schedule_refresh};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PnlPeriod {
    #[default]
    Monthly,
    Yearly,
}

impl PnlPeriod {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "monthly" => Some(PnlPeriod::Monthly),
            "yearly" => Some(PnlPeriod::Yearly),
            _ => None,
        }
    }
}

/// Calendar year in UTC.
pub fn current_year() -> i32 {
    Utc::now().year()
}

struct PnlView {
    period: PnlPeriod,
    year: i32,
    entries: Vec<PnlEntry>,
}

/// Profit and loss report, monthly for one year or year over year.
pub struct PnlWidget {
    view: Shared<PnlView>,
}

impl Default for PnlWidget {
    fn default() -> Self {
        Self::new(current_year())
    }
}

impl PnlWidget {
    pub fn new(year: i32) -> Self {
        Self {
            view: Arc::new(Mutex::new(PnlView {
                period: PnlPeriod::Monthly,
                year,
                entries: Vec::new(),
            })),
        }
    }

    pub fn period(&self) -> PnlPeriod {
        lock(&self.view).period
    }

    pub fn year(&self) -> i32 {
        lock(&self.view).year
    }
}

fn totals(entries: &[PnlEntry]) -> (f64, f64, f64) {
    entries.iter().fold((0.0, 0.0, 0.0), |(r, e, p), entry| {
        (r + entry.revenue, e + entry.expenses, p + entry.profit)
    })
}

#[async_trait]
impl Widget for PnlWidget {
    fn name(&self) -> &str {
        "Profit & loss"
    }

    async fn load_data(&mut self, ctx: &WidgetContext) -> Result<(), WidgetError> {
        let (period, year) = {
            let view = lock(&self.view);
            (view.period, view.year)
        };
        let entries = match period {
            PnlPeriod::Monthly => ctx.api.monthly_pnl(year).await?,
            PnlPeriod::Yearly => ctx.api.yearly_pnl().await?,
        };
        lock(&self.view).entries = entries;
        Ok(())
    }

    fn render(&self, ctx: &WidgetContext) -> Result<String, WidgetError> {
        let view = lock(&self.view);
        let currency = ctx.store.settings().currency;
        let cash = |amount: f64| money(amount, &currency);
        let tab = |period: PnlPeriod, label: &str| {
            let active = if view.period == period { " active" } else { "" };
            let value = match period {
                PnlPeriod::Monthly => "monthly",
                PnlPeriod::Yearly => "yearly",
            };
            format!(r#"<button class="period-tab{active}" data-period="{value}">{label}</button>"#)
        };

        let body = if view.entries.is_empty() {
            empty_state("No figures for this period.")
        } else {
            let rows: String = view
                .entries
                .iter()
                .map(|e| {
                    let class = if e.profit < 0.0 { "loss" } else { "profit" };
                    format!(
                        r#"<tr><td>{}</td><td class="num">{}</td><td class="num">{}</td><td class="num {class}">{}</td></tr>"#,
                        escape(&e.period),
                        cash(e.revenue),
                        cash(e.expenses),
                        cash(e.profit),
                    )
                })
                .collect();
            let (revenue, expenses, profit) = totals(&view.entries);
            format!(
                r#"<table class="data-table pnl"><thead><tr><th>Period</th><th>Revenue</th><th>Expenses</th><th>Profit</th></tr></thead><tbody>{rows}</tbody><tfoot><tr class="totals"><td>Total</td><td class="num">{}</td><td class="num">{}</td><td class="num">{}</td></tr></tfoot></table>"#,
                cash(revenue),
                cash(expenses),
                cash(profit),
            )
        };

        let year_picker = match view.period {
            PnlPeriod::Monthly => format!(
                r#"<input type="number" data-field="year" value="{}">"#,
                view.year
            ),
            PnlPeriod::Yearly => String::new(),
        };
        Ok(format!(
            r#"<section class="pnl"><header><h2>Profit &amp; loss</h2>{}{}{year_picker}</header>{body}</section>"#,
            tab(PnlPeriod::Monthly, "Monthly"),
            tab(PnlPeriod::Yearly, "Yearly"),
        ))
    }

    fn bind_events(&mut self, host: &Arc<WidgetHost>) -> Result<(), WidgetError> {
        let view = self.view.clone();
        let me = host.weak();
        host.listen_dom("click", move |event| {
            let Some(period) = event.attr("period").and_then(PnlPeriod::parse) else {
                return Ok(());
            };
            {
                let mut view = lock(&view);
                if view.period == period {
                    return Ok(());
                }
                view.period = period;
            }
            schedule_refresh(&me)
        });

        let view = self.view.clone();
        let me = host.weak();
        host.listen_dom("change", move |event| {
            if event.attr("field") != Some("year") {
                return Ok(());
            }
            let raw = event.attr("value").unwrap_or_default().trim();
            let year: i32 = raw
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid year `{raw}`"))?;
            lock(&view).year = year;
            schedule_refresh(&me)
        });
        Ok(())
    }
}
