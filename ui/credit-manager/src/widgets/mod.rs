//! Feature widgets. Each loads through the API into the store and renders
//! from the store, so a held store snapshot always matches the markup.

mod business;
mod credits;
mod customer_form;
mod customers;
mod dashboard;
mod pnl;
mod vendors;

pub use business::{BusinessWidget, TransactionFilter};
pub use credits::CreditsWidget;
pub use customer_form::{
    CUSTOMER_CREATED, CUSTOMER_UPDATED, CustomerFormWidget, FORM_CANCELLED, validate_customer,
};
pub use customers::CustomersWidget;
pub use dashboard::DashboardWidget;
pub use pnl::{PnlPeriod, PnlWidget, current_year};
pub use vendors::VendorsWidget;

use cm_api_types::Entity;
use cm_widgets::WidgetHost;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Run `task` on the current runtime from a synchronous handler.
pub(crate) fn spawn<F>(task: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::runtime::Handle::try_current()?.spawn(task);
    Ok(())
}

pub(crate) fn schedule_render(host: &Weak<WidgetHost>) -> anyhow::Result<()> {
    let Some(host) = host.upgrade() else {
        return Ok(());
    };
    spawn(async move {
        let _ = host.render().await;
    })
}

pub(crate) fn schedule_refresh(host: &Weak<WidgetHost>) -> anyhow::Result<()> {
    let Some(host) = host.upgrade() else {
        return Ok(());
    };
    spawn(async move { host.refresh().await })
}

pub(crate) fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Display name of the entity `id` refers to.
pub(crate) fn name_of<T: Entity>(items: &[T], id: Option<&str>, name: impl Fn(&T) -> &str) -> String {
    id.and_then(|id| items.iter().find(|item| item.id() == id))
        .map(|item| name(item).to_owned())
        .unwrap_or_else(|| "Unknown".to_owned())
}

pub(crate) type Shared<T> = Arc<Mutex<T>>;
