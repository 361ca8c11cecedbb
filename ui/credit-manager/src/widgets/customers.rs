use async_trait::async_trait;
use cm_api_types::{Customer, Subscription};
use cm_widgets::html::{empty_state, escape};
use cm_widgets::{Widget, WidgetContext, WidgetError, WidgetHost, WidgetOptions};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, info};

use super::customer_form::{CUSTOMER_CREATED, CUSTOMER_UPDATED, CustomerFormWidget, FORM_CANCELLED};
use super::{Shared, contains_ci, lock, schedule_render, spawn};

const FORM_SLOT: &str = "form";

#[derive(Default)]
struct View {
    search: String,
}

/// Customer list with a search box, subscription counts, inline create and
/// edit forms, and delete.
#[derive(Default)]
pub struct CustomersWidget {
    view: Shared<View>,
}

impl CustomersWidget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_search(search: &str) -> Self {
        Self {
            view: Arc::new(Mutex::new(View {
                search: search.to_owned(),
            })),
        }
    }

    /// Current search filter.
    pub fn search(&self) -> String {
        lock(&self.view).search.clone()
    }
}

fn matches(customer: &Customer, needle: &str) -> bool {
    needle.is_empty()
        || contains_ci(&customer.name, needle)
        || customer.email.as_deref().is_some_and(|e| contains_ci(e, needle))
        || customer.company.as_deref().is_some_and(|c| contains_ci(c, needle))
}

fn active_subscriptions(customer: &Customer, subscriptions: &[Subscription]) -> usize {
    subscriptions
        .iter()
        .filter(|s| s.customer_id.as_deref() == Some(customer.id.as_str()))
        .filter(|s| s.status.is_empty() || s.status.eq_ignore_ascii_case("active"))
        .count()
}

fn row(customer: &Customer, subscriptions: &[Subscription]) -> String {
    let opt = |v: &Option<String>| escape(v.as_deref().unwrap_or("-"));
    format!(
        r#"<tr data-id="{id}"><td>{name}</td><td>{email}</td><td>{phone}</td><td>{company}</td><td class="num">{subs}</td><td><button class="btn" data-action="edit" data-id="{id}">Edit</button><button class="btn btn-danger" data-action="delete" data-id="{id}">Delete</button></td></tr>"#,
        id = escape(&customer.id),
        name = escape(&customer.name),
        email = opt(&customer.email),
        phone = opt(&customer.phone),
        company = opt(&customer.company),
        subs = active_subscriptions(customer, subscriptions),
    )
}

/// Mount `widget` in the form slot, replacing any open form.
fn open_form(parent: &Arc<WidgetHost>, widget: CustomerFormWidget) -> anyhow::Result<()> {
    let ctx = parent.context().clone();
    let form_id = format!("{}-form", parent.id());
    if !ctx.document.contains(&form_id) {
        ctx.document.create_element(&form_id, Some(parent.id()))?;
    }

    let form = WidgetHost::new(
        &form_id,
        widget,
        ctx,
        WidgetOptions::default().with_class("customer-form"),
    );
    parent.add_child(FORM_SLOT, form.clone());

    for event in [CUSTOMER_CREATED, CUSTOMER_UPDATED, FORM_CANCELLED] {
        let owner = parent.weak();
        form.on(event, move |_| close_form(&owner));
    }
    spawn(async move {
        let _ = form.initialize().await;
    })
}

fn close_form(owner: &Weak<WidgetHost>) -> anyhow::Result<()> {
    if let Some(parent) = owner.upgrade() {
        parent.remove_child(FORM_SLOT);
        let _ = parent.context().document.remove_element(&format!("{}-form", parent.id()));
    }
    schedule_render(owner)
}

fn edit_customer(parent: &Arc<WidgetHost>, id: &str) -> anyhow::Result<()> {
    let customers = parent.context().store.customers();
    match customers.iter().find(|c| c.id == id) {
        Some(customer) => open_form(parent, CustomerFormWidget::edit(customer)),
        None => Ok(()),
    }
}

fn delete_customer(host: &Weak<WidgetHost>, id: String) -> anyhow::Result<()> {
    let Some(host) = host.upgrade() else {
        return Ok(());
    };
    spawn(async move {
        let ctx = host.context().clone();
        match ctx.api.delete_customer(&id).await {
            Ok(()) => {
                ctx.store.remove_customer(&id);
                info!(customer = %id, "customer deleted");
                let _ = host.render().await;
            }
            Err(err) => host.report_error(&WidgetError::from(err)),
        }
    })
}

#[async_trait]
impl Widget for CustomersWidget {
    fn name(&self) -> &str {
        "Customers"
    }

    async fn load_data(&mut self, ctx: &WidgetContext) -> Result<(), WidgetError> {
        let (customers, subscriptions) =
            tokio::try_join!(ctx.api.customers(), ctx.api.subscriptions())?;
        debug!(
            count = customers.len(),
            subscriptions = subscriptions.len(),
            "customers loaded"
        );
        ctx.store.set_customers(customers);
        ctx.store.set_subscriptions(subscriptions);
        Ok(())
    }

    fn render(&self, ctx: &WidgetContext) -> Result<String, WidgetError> {
        let search = lock(&self.view).search.clone();
        let customers = ctx.store.customers();
        let subscriptions = ctx.store.subscriptions();
        let visible: Vec<&Customer> = customers.iter().filter(|c| matches(c, &search)).collect();

        let body = if visible.is_empty() {
            empty_state(if search.is_empty() {
                "No customers yet."
            } else {
                "No customers match your search."
            })
        } else {
            let rows: String = visible.iter().map(|c| row(c, &subscriptions)).collect();
            format!(
                "<table class=\"data-table\"><thead><tr><th>Name</th><th>Email</th><th>Phone</th><th>Company</th><th>Subscriptions</th><th></th></tr></thead><tbody>{rows}</tbody></table>"
            )
        };

        Ok(format!(
            r#"<section class="customers"><header><h2>Customers <span class="count">{shown}/{total}</span></h2><input type="search" data-field="search" value="{search}" placeholder="Search customers"><button class="btn btn-primary" data-action="add">Add customer</button></header>{body}</section>"#,
            shown = visible.len(),
            total = customers.len(),
            search = escape(&search),
        ))
    }

    fn bind_events(&mut self, host: &Arc<WidgetHost>) -> Result<(), WidgetError> {
        let view = self.view.clone();
        let me = host.weak();
        host.listen_dom("input", move |event| {
            if event.attr("field") == Some("search") {
                lock(&view).search = event.attr("value").unwrap_or_default().trim().to_owned();
                schedule_render(&me)?;
            }
            Ok(())
        });

        let me = host.weak();
        host.listen_dom("click", move |event| match event.attr("action") {
            Some("add") => match me.upgrade() {
                Some(parent) => open_form(&parent, CustomerFormWidget::new()),
                None => Ok(()),
            },
            Some("edit") => match (me.upgrade(), event.attr("id")) {
                (Some(parent), Some(id)) => edit_customer(&parent, id),
                _ => Ok(()),
            },
            Some("delete") => match event.attr("id") {
                Some(id) => delete_customer(&me, id.to_owned()),
                None => Ok(()),
            },
            _ => Ok(()),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscription(id: &str, customer: &str, status: &str) -> Subscription {
        Subscription {
            id: id.into(),
            customer_id: Some(customer.into()),
            status: status.into(),
            ..Subscription::default()
        }
    }

    #[test]
    fn rows_count_active_subscriptions_and_offer_edit() {
        let customer = Customer::new("c1", "Acme");
        let subscriptions = vec![
            subscription("s1", "c1", "active"),
            subscription("s2", "c1", "Active"),
            subscription("s3", "c1", "expired"),
            subscription("s4", "c2", "active"),
        ];

        assert_eq!(active_subscriptions(&customer, &subscriptions), 2);
        let html = row(&customer, &subscriptions);
        assert!(html.contains(r#"<td class="num">2</td>"#));
        assert!(html.contains(r#"data-action="edit" data-id="c1""#));
    }

    #[test]
    fn search_covers_name_email_and_company() {
        let mut customer = Customer::new("c1", "Acme");
        customer.email = Some("ops@globex.example".into());
        customer.company = Some("Initech".into());

        assert!(matches(&customer, ""));
        assert!(matches(&customer, "acme"));
        assert!(matches(&customer, "GLOBEX"));
        assert!(matches(&customer, "initech"));
        assert!(!matches(&customer, "umbrella"));
    }
}
