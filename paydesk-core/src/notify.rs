//! Notification sender: delivers invoice emails. Holds no decision logic;
//! callers decide what to do with a failed delivery.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::ExternalError;
use crate::models::client::Client;
use crate::models::invoice::InvoiceDetail;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Transport-assigned id of a delivered message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryHandle {
    pub message_id: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<DeliveryHandle, ExternalError>;
}

/// Mail transport that writes messages to the log.
///
/// Used for local runs; production deployments plug a provider behind the
/// same trait.
#[derive(Debug, Default, Clone)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<DeliveryHandle, ExternalError> {
        let message_id = format!("log-{}", Uuid::new_v4());
        info!(
            message_id = %message_id,
            to = %email.to,
            subject = %email.subject,
            "Email delivered to log transport"
        );
        info!("Body preview: {}...", preview(&email.html, 100));
        Ok(DeliveryHandle { message_id })
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Escapes text for inclusion in HTML element content or attributes.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Builds the email that carries an invoice to its client.
pub fn render_invoice_email(detail: &InvoiceDetail, client: &Client, sender_name: &str) -> OutgoingEmail {
    let invoice = &detail.invoice;
    let currency = &invoice.currency;

    let rows: String = detail
        .line_items
        .iter()
        .map(|item| {
            format!(
                "<tr><td>{}</td><td>{}</td><td>{:.2}</td><td>{:.2}</td></tr>",
                escape_html(&item.description),
                item.quantity,
                item.rate,
                item.amount
            )
        })
        .collect();

    let pay_link = invoice
        .payment_reference
        .as_deref()
        .map(|url| {
            format!(
                "<p><a href=\"{}\">Pay invoice {}</a></p>",
                escape_html(url),
                escape_html(&invoice.invoice_number)
            )
        })
        .unwrap_or_default();

    let notes = invoice
        .notes
        .as_deref()
        .map(|n| format!("<p>{}</p>", escape_html(n)))
        .unwrap_or_default();

    let html = format!(
        "<html><body>\
         <p>Dear {client},</p>\
         <p>{sender} has sent you invoice {number}, due {due}.</p>\
         <table>\
         <tr><th>Description</th><th>Qty</th><th>Rate</th><th>Amount</th></tr>\
         {rows}\
         </table>\
         <p>Subtotal: {currency} {subtotal:.2}<br>\
         Tax ({tax_rate}%): {currency} {tax:.2}<br>\
         <strong>Total: {currency} {total:.2}</strong></p>\
         {notes}{pay_link}\
         </body></html>",
        client = escape_html(&client.name),
        sender = escape_html(sender_name),
        number = escape_html(&invoice.invoice_number),
        due = invoice.due_date,
        rows = rows,
        currency = escape_html(currency),
        subtotal = invoice.subtotal,
        tax_rate = invoice.tax_rate.normalize(),
        tax = invoice.tax_amount,
        total = invoice.total,
        notes = notes,
        pay_link = pay_link,
    );

    OutgoingEmail {
        to: client.email.clone(),
        subject: format!(
            "Invoice {} from {} ({} {:.2})",
            invoice.invoice_number, sender_name, currency, invoice.total
        ),
        html,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::invoice::{Invoice, InvoiceStatus, LineItem};
    use chrono::{NaiveDate, Utc};
    use rust_decimal_macros::dec;

    fn sample() -> (InvoiceDetail, Client) {
        let user_id = Uuid::new_v4();
        let client = Client {
            id: Uuid::new_v4(),
            user_id,
            name: "Ada <Lovelace>".into(),
            email: "ada@example.com".into(),
            address: None,
            company: None,
            phone: None,
            archived_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let invoice = Invoice {
            id: Uuid::new_v4(),
            user_id,
            client_id: client.id,
            invoice_number: "INV-0007".into(),
            issue_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            due_date: NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            status: InvoiceStatus::Draft,
            currency: "USD".into(),
            subtotal: dec!(125.00),
            tax_rate: dec!(10.0000),
            tax_amount: dec!(12.50),
            total: dec!(137.50),
            notes: Some("Thanks & see you".into()),
            payment_reference: Some("https://pay.example.com/c/123".into()),
            sent_at: None,
            paid_at: None,
            payout_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let line_items = vec![LineItem {
            id: Uuid::new_v4(),
            invoice_id: invoice.id,
            description: "Design work".into(),
            quantity: 2,
            rate: dec!(50.00),
            amount: dec!(100.00),
            position: 0,
        }];
        (InvoiceDetail { invoice, line_items }, client)
    }

    #[test]
    fn test_render_invoice_email() {
        let (detail, client) = sample();
        let email = render_invoice_email(&detail, &client, "Studio Nine");

        assert_eq!(email.to, "ada@example.com");
        assert_eq!(email.subject, "Invoice INV-0007 from Studio Nine (USD 137.50)");
        assert!(email.html.contains("Total: USD 137.50"));
        assert!(email.html.contains("Tax (10%)"));
        assert!(email.html.contains("<td>Design work</td>"));
        assert!(email.html.contains("https://pay.example.com/c/123"));
    }

    #[test]
    fn test_render_escapes_user_text() {
        let (detail, client) = sample();
        let email = render_invoice_email(&detail, &client, "Studio Nine");
        assert!(email.html.contains("Ada &lt;Lovelace&gt;"));
        assert!(email.html.contains("Thanks &amp; see you"));
        assert!(!email.html.contains("<Lovelace>"));
    }

    #[tokio::test]
    async fn test_log_mailer_returns_a_handle() {
        let (detail, client) = sample();
        let email = render_invoice_email(&detail, &client, "Studio Nine");
        let handle = LogMailer.send(&email).await.expect("log transport never fails");
        assert!(handle.message_id.starts_with("log-"));
    }
}
