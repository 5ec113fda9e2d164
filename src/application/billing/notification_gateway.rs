//! NotificationGateway - Templated lifecycle emails.
//!
//! Sending is best-effort. Every failure is logged here and reported as a
//! [`Delivery`] value; nothing propagates to the caller as an error.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::billing::Subscription;
use crate::ports::{EmailService, TransactionalEmail};

/// Which lifecycle message to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    /// A scheduled cancellation took effect.
    Cancellation,
    /// A paused subscription resumed.
    Resumption,
    /// Dunning gave up and the subscription is being canceled.
    DunningCancellation,
}

impl NotificationKind {
    /// Value of the `category` tag.
    pub fn category(&self) -> &'static str {
        match self {
            NotificationKind::Cancellation => "subscription_canceled",
            NotificationKind::Resumption => "subscription_resumed",
            NotificationKind::DunningCancellation => "dunning_canceled",
        }
    }

    fn subject(&self) -> &'static str {
        match self {
            NotificationKind::Cancellation => "Your subscription has been canceled",
            NotificationKind::Resumption => "Your subscription has resumed",
            NotificationKind::DunningCancellation => {
                "Your subscription is being canceled after failed payments"
            }
        }
    }

    fn body(&self, product: &str) -> String {
        match self {
            NotificationKind::Cancellation => format!(
                "<p>Your subscription to <strong>{}</strong> has been canceled as scheduled.</p>\
                 <p>You will not be charged again.</p>",
                product
            ),
            NotificationKind::Resumption => format!(
                "<p>Your pause has ended and your subscription to <strong>{}</strong> \
                 is active again.</p>\
                 <p>Billing continues on your regular schedule.</p>",
                product
            ),
            NotificationKind::DunningCancellation => format!(
                "<p>We were unable to collect payment for <strong>{}</strong> \
                 after several attempts.</p>\
                 <p>Your subscription will be canceled. Grant a new payment \
                 delegation to subscribe again.</p>",
                product
            ),
        }
    }
}

/// What happened to one notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Accepted by the provider with this message id.
    Sent(String),
    /// The customer has no email address on file.
    Skipped,
    /// The message could not be built or the provider refused it.
    Failed,
}

/// Renders and sends lifecycle emails.
#[derive(Clone)]
pub struct NotificationGateway {
    email: Arc<dyn EmailService>,
}

impl NotificationGateway {
    pub fn new(email: Arc<dyn EmailService>) -> Self {
        Self { email }
    }

    pub async fn notify(&self, kind: NotificationKind, subscription: &Subscription) -> Delivery {
        let Some(to) = subscription.customer_email.as_deref() else {
            warn!(
                subscription_id = %subscription.id,
                category = kind.category(),
                "no customer email on file, notification skipped"
            );
            return Delivery::Skipped;
        };

        let product = escape_html(subscription.display_name());
        let email = match TransactionalEmail::new(to, kind.subject(), kind.body(&product)) {
            Ok(email) => email
                .with_tag("category", kind.category())
                .with_tag("subscription_id", subscription.id.to_string()),
            Err(e) => {
                warn!(
                    subscription_id = %subscription.id,
                    category = kind.category(),
                    error = %e,
                    "notification not built"
                );
                return Delivery::Failed;
            }
        };

        match self.email.send_transactional_email(&email).await {
            Ok(message_id) => {
                debug!(
                    subscription_id = %subscription.id,
                    category = kind.category(),
                    %message_id,
                    "notification sent"
                );
                Delivery::Sent(message_id)
            }
            Err(e) => {
                warn!(
                    subscription_id = %subscription.id,
                    category = kind.category(),
                    error = %e,
                    "notification failed"
                );
                Delivery::Failed
            }
        }
    }
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
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
