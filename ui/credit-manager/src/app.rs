//! Bootstrap: builds the widget context, registers the tabs and brings the
//! manager up. Failures during start land on a full-screen error with
//! reload and clear-data actions.

use anyhow::Context;
use cm_api_client::{Api, ApiClient, HttpApiClient};
use cm_events::{EventBus, ListenerId};
use cm_storage::RocksDbStorage;
use cm_store::{DEFAULT_TAB, Store};
use cm_widgets::html::escape;
use cm_widgets::{
    Document, DomListenerId, ListenerTarget, NotificationKind, TabDefinition, WidgetContext,
    WidgetManager, WidgetOptions, panel_id,
};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::demo::demo_api;
use crate::widgets::{
    BusinessWidget, CUSTOMER_CREATED, CUSTOMER_UPDATED, CreditsWidget, CustomersWidget,
    DashboardWidget, PnlWidget, VendorsWidget, current_year,
};

pub const APP_TITLE: &str = "IT Services Credit Manager";
pub const FATAL_ERROR_ID: &str = "app-fatal-error";

const WELCOME: &str = "Welcome! Pick a tab to get started.";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct CreditManagementApp {
    config: AppConfig,
    manager: Arc<WidgetManager>,
    fatal_listener: Mutex<Option<DomListenerId>>,
    app_listeners: Mutex<Vec<ListenerId>>,
    me: Weak<CreditManagementApp>,
}

impl CreditManagementApp {
    pub fn new(config: AppConfig, ctx: WidgetContext) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            manager: WidgetManager::new(ctx, APP_TITLE),
            config,
            fatal_listener: Mutex::new(None),
            app_listeners: Mutex::new(Vec::new()),
            me: me.clone(),
        })
    }

    /// Wire storage and the API client from `config`.
    pub fn from_config(config: AppConfig) -> anyhow::Result<Arc<Self>> {
        let storage = RocksDbStorage::open(&config.data_dir)
            .with_context(|| format!("opening data dir {}", config.data_dir.display()))?;
        let client: Arc<dyn ApiClient> = if config.mock_api {
            info!("using the built-in demo backend");
            demo_api()
        } else {
            Arc::new(HttpApiClient::new(Some(config.api_url.clone())))
        };
        let ctx = WidgetContext::new(
            Arc::new(Store::new(Arc::new(storage))),
            Arc::new(EventBus::new()),
            Arc::new(Document::new()),
            Api::new(client),
        );
        Ok(Self::new(config, ctx))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<WidgetManager> {
        &self.manager
    }

    pub fn context(&self) -> &WidgetContext {
        self.manager.context()
    }

    pub fn tab_definitions(&self) -> Vec<TabDefinition> {
        let dashboard_options = match self.config.refresh_interval {
            Some(every) => WidgetOptions::default().with_refresh(every),
            None => WidgetOptions::default(),
        };
        vec![
            TabDefinition::new("dashboard", "Dashboard", |_| Box::new(DashboardWidget::new()))
                .with_icon("📊")
                .with_options(dashboard_options),
            TabDefinition::new("customers", "Customers", |_| Box::new(CustomersWidget::new()))
                .with_icon("👥"),
            TabDefinition::new("vendors", "Vendors", |_| Box::new(VendorsWidget::new()))
                .with_icon("🏢"),
            TabDefinition::new("credits", "Credits", |_| Box::new(CreditsWidget::new()))
                .with_icon("💳"),
            TabDefinition::new("business", "Business", |_| Box::new(BusinessWidget::new()))
                .with_icon("💼"),
            TabDefinition::new("pnl", "Profit & Loss", |_| Box::new(PnlWidget::new(current_year())))
                .with_icon("📈"),
        ]
    }

    /// Tab to open first: the configured one, then the last one used, then
    /// the dashboard. Unknown ids are skipped.
    fn initial_tab(&self) -> String {
        let known: Vec<String> = self.manager.tabs().into_iter().map(|t| t.id).collect();
        let persisted = self.context().store.current_tab();
        [self.config.start_tab.clone(), Some(persisted)]
            .into_iter()
            .flatten()
            .find(|tab| known.contains(tab))
            .unwrap_or_else(|| DEFAULT_TAB.to_owned())
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        self.clear_fatal_error();
        match self.bring_up().await {
            Ok(()) => Ok(()),
            Err(err) => {
                error!("application failed to start: {err:#}");
                self.show_fatal_error(&format!("{err:#}"));
                Err(err)
            }
        }
    }

    async fn bring_up(&self) -> anyhow::Result<()> {
        for tab in self.tab_definitions() {
            self.manager.register_tab(tab);
        }
        self.manager
            .initialize()
            .await
            .context("initializing the widget manager")?;
        self.bind_app_events();

        let tab = self.initial_tab();
        self.manager
            .show_tab(&tab)
            .await
            .with_context(|| format!("opening tab `{tab}`"))?;

        let store = &self.context().store;
        if store.is_first_run() {
            self.manager.show_notification(WELCOME, NotificationKind::Info);
            store.mark_has_run();
        }
        info!(%tab, "application started");
        Ok(())
    }

    fn bind_app_events(&self) {
        self.unbind_app_events();
        for (name, verb) in [(CUSTOMER_CREATED, "Added"), (CUSTOMER_UPDATED, "Updated")] {
            let me = self.me.clone();
            let id = self.context().bus.on_global(name, move |event| {
                if let Some(app) = me.upgrade() {
                    let name = event.payload["name"].as_str().unwrap_or("customer");
                    app.manager
                        .show_notification(&format!("{verb} {name}"), NotificationKind::Success);
                }
                Ok(())
            });
            lock(&self.app_listeners).push(id);
        }
    }

    fn unbind_app_events(&self) {
        let ids = std::mem::take(&mut *lock(&self.app_listeners));
        for id in ids {
            self.context().bus.off(id);
        }
    }

    /// Tear everything down and cover the page with an error screen.
    pub fn show_fatal_error(&self, message: &str) {
        self.manager.destroy_all();
        self.unbind_app_events();

        let doc = &self.context().document;
        if !doc.contains(FATAL_ERROR_ID) {
            if let Err(err) = doc.create_element(FATAL_ERROR_ID, None) {
                warn!("fatal error screen unavailable: {err}");
                return;
            }
        }
        let markup = format!(
            r#"<div class="fatal-error"><h1>Something went wrong</h1><p>{}</p><button class="btn btn-primary" data-action="reload">Reload</button><button class="btn btn-danger" data-action="clear-data">Clear data and restart</button></div>"#,
            escape(message)
        );
        let _ = doc.set_content(FATAL_ERROR_ID, &markup);

        let mut slot = lock(&self.fatal_listener);
        if slot.is_none() {
            let me = self.me.clone();
            *slot = Some(doc.add_listener(
                ListenerTarget::Element(FATAL_ERROR_ID.to_owned()),
                "click",
                None,
                move |event| {
                    let Some(app) = me.upgrade() else {
                        return Ok(());
                    };
                    let action = event.attr("action").map(ToOwned::to_owned);
                    tokio::runtime::Handle::try_current()?.spawn(async move {
                        let outcome = match action.as_deref() {
                            Some("reload") => app.start().await,
                            Some("clear-data") => app.clear_data_and_restart().await,
                            _ => Ok(()),
                        };
                        if let Err(err) = outcome {
                            warn!("recovery from the error screen failed: {err:#}");
                        }
                    });
                    Ok(())
                },
            ));
        }
    }

    pub fn fatal_error(&self) -> Option<String> {
        self.context().document.content(FATAL_ERROR_ID)
    }

    /// Id and markup of the tab on screen.
    pub fn active_panel(&self) -> Option<(String, String)> {
        let tab = self.manager.current_tab()?;
        let markup = self.context().document.content(&panel_id(&tab))?;
        Some((tab, markup))
    }

    fn clear_fatal_error(&self) {
        let doc = &self.context().document;
        if let Some(id) = lock(&self.fatal_listener).take() {
            doc.remove_listener(id);
        }
        if doc.contains(FATAL_ERROR_ID) {
            let _ = doc.remove_element(FATAL_ERROR_ID);
        }
    }

    /// Wipe the local cache and start again from a clean shell.
    pub async fn clear_data_and_restart(&self) -> anyhow::Result<()> {
        info!("clearing local data and restarting");
        self.manager.destroy_all();
        self.unbind_app_events();
        self.context().store.reset();
        self.start().await
    }

    pub fn shutdown(&self) {
        self.unbind_app_events();
        self.clear_fatal_error();
        self.manager.destroy_all();
        info!("application shut down");
    }
}
