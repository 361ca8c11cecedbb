//! Markup helpers shared by every widget.

use crate::WidgetError;

pub fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

pub fn loading(label: &str) -> String {
    format!(
        r#"<div class="widget-loading"><div class="spinner"></div><p>{}</p></div>"#,
        escape(label)
    )
}

pub fn empty_state(message: &str) -> String {
    format!(r#"<div class="empty-state"><p>{}</p></div>"#, escape(message))
}

/// Inline error block. Retryable errors carry a `data-action="retry"` button.
pub fn error_block(widget: &str, err: &WidgetError) -> String {
    let retry = if err.is_retryable() {
        r#"<button class="btn btn-secondary" data-action="retry">Retry</button>"#
    } else {
        ""
    };
    format!(
        r#"<div class="widget-error" data-kind="{kind}"><h3>{title} is unavailable</h3><p>{message}</p>{retry}</div>"#,
        kind = err.kind(),
        title = escape(widget),
        message = escape(&err.to_string()),
    )
}

/// Formatted amount, already escaped for markup.
pub fn money(amount: f64, currency: &str) -> String {
    let cents = (amount.abs() * 100.0).round() as u64;
    let sign = if amount < 0.0 && cents > 0 { "-" } else { "" };
    let whole = cents / 100;
    let digits = whole.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let symbol = match currency {
        "USD" => "$",
        "EUR" => "€",
        "GBP" => "£",
        _ => "",
    };
    if symbol.is_empty() {
        format!("{sign}{grouped}.{:02} {}", cents % 100, escape(currency))
    } else {
        format!("{sign}{symbol}{grouped}.{:02}", cents % 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markup() {
        assert_eq!(
            escape(r#"<b>"Tom" & 'Jerry'</b>"#),
            "&lt;b&gt;&quot;Tom&quot; &amp; &#39;Jerry&#39;&lt;/b&gt;"
        );
    }

    #[test]
    fn money_groups_thousands() {
        assert_eq!(money(1234567.891, "USD"), "$1,234,567.89");
        assert_eq!(money(-12.5, "EUR"), "-€12.50");
        assert_eq!(money(999.0, "NOK"), "999.00 NOK");
        assert_eq!(money(0.0, "GBP"), "£0.00");
    }

    #[test]
    fn money_rounds_before_signing_and_escapes_codes() {
        assert_eq!(money(-0.001, "USD"), "$0.00");
        assert_eq!(money(-0.005, "USD"), "-$0.01");
        assert_eq!(money(5.0, "<b>"), "5.00 &lt;b&gt;");
    }

    #[test]
    fn only_retryable_errors_offer_retry() {
        let load = error_block("Customers", &WidgetError::DataLoad("timeout".into()));
        assert!(load.contains(r#"data-action="retry""#));
        assert!(load.contains("timeout"));

        let gone = error_block("Customers", &WidgetError::ContainerNotFound("x".into()));
        assert!(!gone.contains("retry"));
    }
}
