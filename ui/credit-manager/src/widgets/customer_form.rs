use async_trait::async_trait;
use cm_api_types::{Customer, NewCustomer};
use cm_widgets::html::escape;
use cm_widgets::{DomEvent, Widget, WidgetContext, WidgetError, WidgetHost};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use super::{Shared, lock, schedule_render, spawn};

/// Emitted by the form after the server accepted a new customer, with
/// `{id, name}`.
pub const CUSTOMER_CREATED: &str = "customer:created";
/// Emitted after an edit was saved, with `{id, name}`.
pub const CUSTOMER_UPDATED: &str = "customer:updated";
pub const FORM_CANCELLED: &str = "customer-form:cancelled";

const NAME_MAX: usize = 100;

#[derive(Default)]
struct FormState {
    /// Id of the customer being edited; `None` creates a new one.
    editing: Option<String>,
    values: NewCustomer,
    errors: BTreeMap<String, String>,
    submitting: bool,
    submit_error: Option<String>,
}

/// Field-level problems with `input`; empty when it can be submitted.
pub fn validate_customer(input: &NewCustomer) -> BTreeMap<String, String> {
    let mut errors = BTreeMap::new();

    let name = input.name.trim();
    if name.is_empty() {
        errors.insert("name".to_owned(), "Name is required".to_owned());
    } else if name.chars().count() > NAME_MAX {
        errors.insert(
            "name".to_owned(),
            format!("Name must be at most {NAME_MAX} characters"),
        );
    }

    if let Some(email) = input.email.as_deref().map(str::trim).filter(|e| !e.is_empty()) {
        if !valid_email(email) {
            errors.insert("email".to_owned(), "Enter a valid email address".to_owned());
        }
    }

    if let Some(phone) = input.phone.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
        let allowed = phone
            .chars()
            .all(|c| c.is_ascii_digit() || " +-().".contains(c));
        let digits = phone.chars().filter(char::is_ascii_digit).count();
        if !allowed || !(7..=15).contains(&digits) {
            errors.insert("phone".to_owned(), "Enter a valid phone number".to_owned());
        }
    }
    errors
}

fn valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !email.chars().any(char::is_whitespace)
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

fn field(event: &DomEvent, name: &str) -> Option<String> {
    event
        .attr(name)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToOwned::to_owned)
}

/// Full replacement of the editable fields. Cleared inputs become `null`.
fn edit_patch(input: &NewCustomer) -> Value {
    json!({
        "name": input.name,
        "email": input.email,
        "phone": input.phone,
        "company": input.company,
        "notes": input.notes,
    })
}

/// Inline form creating a customer, or editing one, through the API.
#[derive(Default)]
pub struct CustomerFormWidget {
    state: Shared<FormState>,
}

impl CustomerFormWidget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Form prefilled from `customer`; saving updates it in place.
    pub fn edit(customer: &Customer) -> Self {
        let values = NewCustomer {
            name: customer.name.clone(),
            email: customer.email.clone(),
            phone: customer.phone.clone(),
            company: customer.company.clone(),
            notes: customer.notes.clone(),
        };
        Self {
            state: Arc::new(Mutex::new(FormState {
                editing: Some(customer.id.clone()),
                values,
                ..FormState::default()
            })),
        }
    }

    pub fn editing(&self) -> Option<String> {
        lock(&self.state).editing.clone()
    }
}

async fn save(host: &Arc<WidgetHost>, state: &Shared<FormState>, input: NewCustomer) -> Result<(), String> {
    let ctx = host.context().clone();
    let editing = lock(state).editing.clone();
    match editing {
        None => {
            let customer = ctx.api.create_customer(&input).await.map_err(|e| e.to_string())?;
            info!(customer = %customer.id, "customer created");
            let payload = json!({ "id": customer.id, "name": customer.name });
            ctx.store.add_customer(customer);
            *lock(state) = FormState::default();
            host.emit(CUSTOMER_CREATED, payload);
        }
        Some(id) => {
            let patch = edit_patch(&input);
            ctx.api
                .update_customer(&id, patch.clone())
                .await
                .map_err(|e| e.to_string())?;
            ctx.store.update_customer(&id, patch).map_err(|e| e.to_string())?;
            info!(customer = %id, "customer updated");
            lock(state).submitting = false;
            host.emit(CUSTOMER_UPDATED, json!({ "id": id, "name": input.name }));
        }
    }
    Ok(())
}

#[async_trait]
impl Widget for CustomerFormWidget {
    fn name(&self) -> &str {
        "Customer form"
    }

    fn render(&self, _ctx: &WidgetContext) -> Result<String, WidgetError> {
        let state = lock(&self.state);
        let input = |name: &str, label: &str, value: Option<&str>| {
            let error = state
                .errors
                .get(name)
                .map(|e| format!(r#"<span class="field-error">{}</span>"#, escape(e)))
                .unwrap_or_default();
            format!(
                r#"<label class="form-field{invalid}">{label}<input name="{name}" value="{value}">{error}</label>"#,
                invalid = if error.is_empty() { "" } else { " invalid" },
                value = escape(value.unwrap_or_default()),
            )
        };
        let values = &state.values;
        let fields = [
            input("name", "Name", Some(&values.name)),
            input("email", "Email", values.email.as_deref()),
            input("phone", "Phone", values.phone.as_deref()),
            input("company", "Company", values.company.as_deref()),
            input("notes", "Notes", values.notes.as_deref()),
        ]
        .concat();
        let banner = state
            .submit_error
            .as_deref()
            .map(|e| format!(r#"<div class="form-error">{}</div>"#, escape(e)))
            .unwrap_or_default();
        let disabled = if state.submitting { " disabled" } else { "" };
        let title = if state.editing.is_some() { "Edit customer" } else { "New customer" };

        Ok(format!(
            r#"<form class="customer-form"><h3>{title}</h3>{banner}{fields}<div class="form-actions"><button type="submit" class="btn btn-primary"{disabled}>Save</button><button type="button" class="btn" data-action="cancel">Cancel</button></div></form>"#
        ))
    }

    fn bind_events(&mut self, host: &Arc<WidgetHost>) -> Result<(), WidgetError> {
        let state = self.state.clone();
        let me = host.weak();
        host.listen_dom("submit", move |event| {
            let input = NewCustomer {
                name: field(event, "name").unwrap_or_default(),
                email: field(event, "email"),
                phone: field(event, "phone"),
                company: field(event, "company"),
                notes: field(event, "notes"),
            };
            let errors = validate_customer(&input);
            {
                let mut st = lock(&state);
                if st.submitting {
                    return Ok(());
                }
                st.values = input.clone();
                st.submit_error = None;
                st.submitting = errors.is_empty();
                st.errors = errors;
            }
            if !lock(&state).submitting {
                return schedule_render(&me);
            }

            let Some(host) = me.upgrade() else {
                return Ok(());
            };
            let state = state.clone();
            spawn(async move {
                if let Err(err) = save(&host, &state, input).await {
                    warn!("saving customer failed: {err}");
                    {
                        let mut st = lock(&state);
                        st.submitting = false;
                        st.submit_error = Some(err);
                    }
                    let _ = host.render().await;
                }
            })
        });

        let me = host.weak();
        host.listen_dom("click", move |event| {
            if event.attr("action") == Some("cancel") {
                if let Some(host) = me.upgrade() {
                    host.emit(FORM_CANCELLED, json!({}));
                }
            }
            Ok(())
        });
        Ok(())
    }
}
