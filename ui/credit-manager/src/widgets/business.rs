use async_trait::async_trait;
use cm_api_types::{BusinessTransaction, TransactionKind};
use cm_widgets::html::{empty_state, escape, money};
use cm_widgets::{Widget, WidgetContext, WidgetError, WidgetHost};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{Shared, lock, schedule_refresh, schedule_render};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionFilter {
    #[default]
    All,
    Income,
    Expense,
}

impl TransactionFilter {
    const ALL: [TransactionFilter; 3] = [
        TransactionFilter::All,
        TransactionFilter::Income,
        TransactionFilter::Expense,
    ];

    fn as_str(self) -> &'static str {
        match self {
            TransactionFilter::All => "all",
            TransactionFilter::Income => "income",
            TransactionFilter::Expense => "expense",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == raw)
    }

    pub fn matches(self, tx: &BusinessTransaction) -> bool {
        match self {
            TransactionFilter::All => true,
            TransactionFilter::Income => tx.kind == TransactionKind::Income,
            TransactionFilter::Expense => tx.kind == TransactionKind::Expense,
        }
    }
}

/// Business ledger: balance, income and expense totals, filtered history.
#[derive(Default)]
pub struct BusinessWidget {
    filter: Shared<TransactionFilter>,
}

impl BusinessWidget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(&self) -> TransactionFilter {
        *lock(&self.filter)
    }
}

#[derive(Debug, Default, PartialEq)]
struct Totals {
    income: f64,
    expenses: f64,
}

fn totals(transactions: &[BusinessTransaction]) -> Totals {
    transactions.iter().fold(Totals::default(), |mut acc, tx| {
        match tx.kind {
            TransactionKind::Income => acc.income += tx.amount,
            TransactionKind::Expense => acc.expenses += tx.amount,
        }
        acc
    })
}

#[async_trait]
impl Widget for BusinessWidget {
    fn name(&self) -> &str {
        "Business"
    }

    async fn load_data(&mut self, ctx: &WidgetContext) -> Result<(), WidgetError> {
        let (transactions, balance) =
            tokio::try_join!(ctx.api.business_transactions(), ctx.api.business_balance())?;
        ctx.store.set_business_transactions(transactions);
        ctx.store.set_business_balance(balance);
        Ok(())
    }

    fn render(&self, ctx: &WidgetContext) -> Result<String, WidgetError> {
        let filter = *lock(&self.filter);
        let transactions = ctx.store.business_transactions();
        let currency = ctx.store.settings().currency;
        let cash = |amount: f64| money(amount, &currency);
        let sums = totals(&transactions);

        let filters: String = TransactionFilter::ALL
            .into_iter()
            .map(|f| {
                let active = if f == filter { " active" } else { "" };
                format!(
                    r#"<button class="filter{active}" data-filter="{value}">{value}</button>"#,
                    value = f.as_str()
                )
            })
            .collect();

        let visible: Vec<&BusinessTransaction> =
            transactions.iter().filter(|tx| filter.matches(tx)).collect();
        let body = if visible.is_empty() {
            empty_state("No transactions.")
        } else {
            let rows: String = visible
                .iter()
                .map(|tx| {
                    format!(
                        r#"<tr class="{kind}"><td>{date}</td><td>{desc}</td><td>{category}</td><td class="num">{amount}</td></tr>"#,
                        kind = match tx.kind {
                            TransactionKind::Income => "income",
                            TransactionKind::Expense => "expense",
                        },
                        date = escape(tx.date.as_deref().unwrap_or("-")),
                        desc = escape(&tx.description),
                        category = escape(tx.category.as_deref().unwrap_or("-")),
                        amount = cash(tx.signed_amount()),
                    )
                })
                .collect();
            format!(
                "<table class=\"data-table\"><thead><tr><th>Date</th><th>Description</th><th>Category</th><th>Amount</th></tr></thead><tbody>{rows}</tbody></table>"
            )
        };

        Ok(format!(
            r#"<section class="business"><header><h2>Business account</h2><button class="btn" data-action="refresh">Refresh</button></header><div class="summary"><span class="balance">{balance}</span><span class="income">{income}</span><span class="expenses">{expenses}</span></div><div class="filters">{filters}</div>{body}</section>"#,
            balance = cash(ctx.store.business_balance()),
            income = cash(sums.income),
            expenses = cash(sums.expenses),
        ))
    }

    fn bind_events(&mut self, host: &Arc<WidgetHost>) -> Result<(), WidgetError> {
        let filter = self.filter.clone();
        let me = host.weak();
        host.listen_dom("click", move |event| {
            if event.attr("action") == Some("refresh") {
                return schedule_refresh(&me);
            }
            if let Some(next) = event.attr("filter").and_then(TransactionFilter::parse) {
                *lock(&filter) = next;
                return schedule_render(&me);
            }
            Ok(())
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(id: &str, kind: TransactionKind, amount: f64) -> BusinessTransaction {
        BusinessTransaction {
            id: id.into(),
            kind,
            amount,
            ..BusinessTransaction::default()
        }
    }

    #[test]
    fn totals_split_by_kind() {
        let ledger = vec![
            tx("1", TransactionKind::Income, 500.0),
            tx("2", TransactionKind::Expense, 120.0),
            tx("3", TransactionKind::Income, 80.0),
        ];
        assert_eq!(
            totals(&ledger),
            Totals {
                income: 580.0,
                expenses: 120.0
            }
        );
    }

    #[test]
    fn filters_select_by_kind() {
        let income = tx("1", TransactionKind::Income, 1.0);
        let expense = tx("2", TransactionKind::Expense, 1.0);

        assert!(TransactionFilter::All.matches(&expense));
        assert!(TransactionFilter::Income.matches(&income));
        assert!(!TransactionFilter::Income.matches(&expense));
        assert_eq!(TransactionFilter::parse("expense"), Some(TransactionFilter::Expense));
        assert_eq!(TransactionFilter::parse("other"), None);
    }
}
