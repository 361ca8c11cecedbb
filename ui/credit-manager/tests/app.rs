use cm_api_client::MockApiClient;
use cm_widgets::{APP_HEADER, NotificationKind, WidgetContext, panel_id};
use credit_manager::widgets::current_year;
use credit_manager::{AppConfig, CreditManagementApp, FATAL_ERROR_ID, demo_api};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn app_with(config: AppConfig) -> (Arc<CreditManagementApp>, WidgetContext) {
    let ctx = WidgetContext::headless(demo_api());
    (CreditManagementApp::new(config, ctx.clone()), ctx)
}

fn content(ctx: &WidgetContext, id: &str) -> String {
    ctx.document.content(id).unwrap_or_default()
}

/// The previous instance holds the database lock until its last task lets go.
async fn reopen(config: &AppConfig) -> anyhow::Result<Arc<CreditManagementApp>> {
    for _ in 0..100 {
        if let Ok(app) = CreditManagementApp::from_config(config.clone()) {
            return Ok(app);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    CreditManagementApp::from_config(config.clone())
}

async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[tokio::test]
async fn starts_on_the_dashboard_and_welcomes_first_runs() -> anyhow::Result<()> {
    let (app, ctx) = app_with(AppConfig::default());
    app.start().await?;

    assert!(app.manager().is_initialized());
    assert_eq!(app.manager().current_tab().as_deref(), Some("dashboard"));
    let dashboard = content(&ctx, &panel_id("dashboard"));
    assert!(dashboard.contains("stat-card"));
    assert!(dashboard.contains("$5,180.00"));
    assert!(content(&ctx, APP_HEADER).contains("IT Services Credit Manager"));

    let (tab, markup) = app.active_panel().expect("a tab is on screen");
    assert_eq!(tab, "dashboard");
    assert_eq!(markup, dashboard);

    let notes = app.manager().notifications();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].kind, NotificationKind::Info);
    assert!(!ctx.store.is_first_run());
    Ok(())
}

#[tokio::test]
async fn start_tab_prefers_config_then_persisted_tab() -> anyhow::Result<()> {
    let (app, _) = app_with(AppConfig {
        start_tab: Some("customers".into()),
        ..AppConfig::default()
    });
    app.start().await?;
    assert_eq!(app.manager().current_tab().as_deref(), Some("customers"));

    let (app, ctx) = app_with(AppConfig {
        start_tab: Some("no-such-tab".into()),
        ..AppConfig::default()
    });
    ctx.store.set_current_tab("vendors");
    app.start().await?;
    assert_eq!(app.manager().current_tab().as_deref(), Some("vendors"));
    assert!(content(&ctx, &panel_id("vendors")).contains("Microsoft"));
    Ok(())
}

#[tokio::test]
async fn customer_form_validates_then_creates() -> anyhow::Result<()> {
    let (app, ctx) = app_with(AppConfig {
        start_tab: Some("customers".into()),
        ..AppConfig::default()
    });
    app.start().await?;
    let panel = panel_id("customers");
    let form = format!("{panel}-form");
    assert!(content(&ctx, &panel).contains("Northwind Traders"));

    ctx.document.dispatch(&panel, "click", json!({ "action": "add" }));
    assert!(wait_for(|| content(&ctx, &form).contains("customer-form")).await);

    ctx.document
        .dispatch(&form, "submit", json!({ "name": " ", "email": "nobody" }));
    assert!(wait_for(|| content(&ctx, &form).contains("Name is required")).await);
    assert!(content(&ctx, &form).contains("Enter a valid email address"));
    assert_eq!(ctx.store.customers().len(), 3);

    ctx.document.dispatch(
        &form,
        "submit",
        json!({ "name": "Tailspin Toys", "email": "hello@tailspin.example" }),
    );
    assert!(wait_for(|| !ctx.document.contains(&form)).await);
    assert!(wait_for(|| content(&ctx, &panel).contains("Tailspin Toys")).await);
    assert_eq!(ctx.store.customers().len(), 4);
    assert!(
        app.manager()
            .notifications()
            .iter()
            .any(|n| n.kind == NotificationKind::Success && n.message == "Added Tailspin Toys")
    );
    Ok(())
}

#[tokio::test]
async fn editing_a_customer_saves_every_field() -> anyhow::Result<()> {
    let (app, ctx) = app_with(AppConfig {
        start_tab: Some("customers".into()),
        ..AppConfig::default()
    });
    app.start().await?;
    let panel = panel_id("customers");
    let form = format!("{panel}-form");

    ctx.document
        .dispatch(&panel, "click", json!({ "action": "edit", "id": "1" }));
    assert!(wait_for(|| content(&ctx, &form).contains("Edit customer")).await);
    assert!(content(&ctx, &form).contains("it@northwind.example"));

    ctx.document.dispatch(
        &form,
        "submit",
        json!({ "name": "Northwind Holdings", "email": "ops@northwind.example" }),
    );
    assert!(wait_for(|| !ctx.document.contains(&form)).await);
    assert!(wait_for(|| content(&ctx, &panel).contains("Northwind Holdings")).await);
    assert_eq!(ctx.store.customers().len(), 3);
    assert!(
        app.manager()
            .notifications()
            .iter()
            .any(|n| n.kind == NotificationKind::Success && n.message == "Updated Northwind Holdings")
    );

    let saved = ctx.api.customers().await?;
    let northwind = saved.iter().find(|c| c.id == "1").expect("customer 1 kept");
    assert_eq!(northwind.name, "Northwind Holdings");
    assert_eq!(northwind.email.as_deref(), Some("ops@northwind.example"));
    assert_eq!(northwind.company, None);
    Ok(())
}

#[tokio::test]
async fn cancelling_the_form_removes_it() -> anyhow::Result<()> {
    let (app, ctx) = app_with(AppConfig {
        start_tab: Some("customers".into()),
        ..AppConfig::default()
    });
    app.start().await?;
    let panel = panel_id("customers");
    let form = format!("{panel}-form");

    ctx.document.dispatch(&panel, "click", json!({ "action": "add" }));
    assert!(wait_for(|| ctx.document.contains(&form) && content(&ctx, &form).contains("Cancel")).await);

    ctx.document.dispatch(&form, "click", json!({ "action": "cancel" }));
    assert!(wait_for(|| !ctx.document.contains(&form)).await);
    assert_eq!(ctx.store.customers().len(), 3);
    Ok(())
}

#[tokio::test]
async fn search_and_delete_customers() -> anyhow::Result<()> {
    let (app, ctx) = app_with(AppConfig {
        start_tab: Some("customers".into()),
        ..AppConfig::default()
    });
    app.start().await?;
    let panel = panel_id("customers");

    ctx.document
        .dispatch(&panel, "input", json!({ "field": "search", "value": "fabrikam" }));
    assert!(wait_for(|| content(&ctx, &panel).contains("1/3")).await);
    assert!(!content(&ctx, &panel).contains("Northwind Traders"));

    ctx.document
        .dispatch(&panel, "click", json!({ "action": "delete", "id": "c-3" }));
    assert!(wait_for(|| ctx.store.customers().len() == 2).await);
    assert!(wait_for(|| content(&ctx, &panel).contains("No customers match your search.")).await);
    Ok(())
}

#[tokio::test]
async fn business_filter_and_pnl_period_switch() -> anyhow::Result<()> {
    let (app, ctx) = app_with(AppConfig::default());
    app.start().await?;

    app.manager().show_tab("business").await?;
    let business = panel_id("business");
    assert!(content(&ctx, &business).contains("Project work"));
    ctx.document
        .dispatch(&business, "click", json!({ "filter": "expense" }));
    assert!(wait_for(|| !content(&ctx, &business).contains("Project work")).await);
    assert!(content(&ctx, &business).contains("Licence renewals"));

    app.manager().show_tab("pnl").await?;
    let pnl = panel_id("pnl");
    assert!(content(&ctx, &pnl).contains("Total"));
    let last_year = (current_year() - 1).to_string();
    assert!(!content(&ctx, &pnl).contains(&format!("<td>{last_year}</td>")));
    ctx.document.dispatch(&pnl, "click", json!({ "period": "yearly" }));
    assert!(wait_for(|| content(&ctx, &pnl).contains(&format!("<td>{last_year}</td>"))).await);
    Ok(())
}

#[tokio::test]
async fn vendors_list_purchases_and_credits_list_usage() -> anyhow::Result<()> {
    let (app, ctx) = app_with(AppConfig::default());
    app.start().await?;

    app.manager().show_tab("vendors").await?;
    let vendors = content(&ctx, &panel_id("vendors"));
    assert!(vendors.contains("Credit purchases"));
    assert!(vendors.contains("$3,600.00"));
    assert!(vendors.contains("$600.00"));

    app.manager().show_tab("credits").await?;
    let (tab, credits) = app.active_panel().expect("credits on screen");
    assert_eq!(tab, "credits");
    assert!(credits.contains("Credit usage"));
    assert!(credits.contains("16.50"));
    Ok(())
}

#[tokio::test]
async fn failed_tab_load_stays_inline_and_notifies() -> anyhow::Result<()> {
    let ctx = WidgetContext::headless(Arc::new(MockApiClient::new()));
    let app = CreditManagementApp::new(AppConfig::default(), ctx.clone());
    app.start().await?;

    assert!(app.manager().is_initialized());
    assert!(content(&ctx, &panel_id("dashboard")).contains("widget-error"));
    assert!(!ctx.document.contains(FATAL_ERROR_ID));
    assert!(
        app.manager()
            .notifications()
            .iter()
            .any(|n| n.kind == NotificationKind::Error)
    );
    Ok(())
}

#[tokio::test]
async fn bootstrap_failure_shows_error_screen_and_reload_recovers() -> anyhow::Result<()> {
    let (app, ctx) = app_with(AppConfig::default());
    // A stray element with a shell id makes the shell impossible to build.
    ctx.document.create_element(APP_HEADER, None)?;

    assert!(app.start().await.is_err());
    assert!(!app.manager().is_initialized());
    let screen = app.fatal_error().unwrap_or_default();
    assert!(screen.contains("Something went wrong"));
    assert!(screen.contains(r#"data-action="clear-data""#));

    ctx.document.remove_element(APP_HEADER)?;
    ctx.document
        .dispatch(FATAL_ERROR_ID, "click", json!({ "action": "reload" }));
    assert!(wait_for(|| app.manager().current_tab().as_deref() == Some("dashboard")).await);
    assert!(app.manager().is_initialized());
    assert!(!ctx.document.contains(FATAL_ERROR_ID));
    Ok(())
}

#[tokio::test]
async fn clear_data_restarts_from_defaults() -> anyhow::Result<()> {
    let (app, ctx) = app_with(AppConfig::default());
    app.start().await?;
    app.manager().show_tab("credits").await?;
    assert!(!ctx.store.credit_balances().is_empty());

    app.clear_data_and_restart().await?;

    assert!(app.manager().is_initialized());
    assert_eq!(app.manager().current_tab().as_deref(), Some("dashboard"));
    assert_eq!(ctx.store.credit_balances().len(), 3);
    assert!(app.manager().notifications().is_empty());
    assert!(ctx.store.vendor_services().is_empty());
    Ok(())
}

#[tokio::test]
async fn file_backed_app_remembers_the_last_tab() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let config = AppConfig {
        data_dir: dir.path().to_path_buf(),
        mock_api: true,
        ..AppConfig::default()
    };

    let app = CreditManagementApp::from_config(config.clone())?;
    app.start().await?;
    app.manager().show_tab("vendors").await?;
    app.shutdown();
    drop(app);

    let app = reopen(&config).await?;
    app.start().await?;
    assert_eq!(app.manager().current_tab().as_deref(), Some("vendors"));
    assert!(app.manager().notifications().is_empty());
    app.shutdown();
    Ok(())
}
