//! Email service port for transactional mail.
//!
//! From the scheduler's point of view sending is fire-and-forget: errors are
//! logged by the caller and never fail a pass.

use crate::domain::foundation::{DomainError, ValidationError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Port for the external email provider.
#[async_trait]
pub trait EmailService: Send + Sync {
    /// Hands one message to the provider. Returns the provider's message id.
    async fn send_transactional_email(&self, email: &TransactionalEmail)
        -> Result<String, DomainError>;
}

/// Provider tag attached to a message for filtering and analytics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailTag {
    pub name: String,
    pub value: String,
}

impl EmailTag {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A single rendered message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionalEmail {
    pub to: String,
    pub subject: String,
    pub html_body: String,
    pub tags: Vec<EmailTag>,
}

impl TransactionalEmail {
    /// Builds a message, rejecting an empty recipient or subject.
    pub fn new(
        to: impl Into<String>,
        subject: impl Into<String>,
        html_body: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let to = to.into();
        let subject = subject.into();
        if to.trim().is_empty() {
            return Err(ValidationError::empty_field("to"));
        }
        if !to.contains('@') {
            return Err(ValidationError::invalid_format("to", "missing @ symbol"));
        }
        if subject.trim().is_empty() {
            return Err(ValidationError::empty_field("subject"));
        }
        Ok(Self {
            to,
            subject,
            html_body: html_body.into(),
            tags: Vec::new(),
        })
    }

    pub fn with_tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push(EmailTag::new(name, value));
        self
    }

    /// Value of the first tag with this name.
    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.name == name)
            .map(|t| t.value.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_service_is_object_safe() {
        fn _accepts_dyn(_service: &dyn EmailService) {}
    }

    #[test]
    fn rejects_empty_recipient() {
        assert!(TransactionalEmail::new("", "Hi", "<p>x</p>").is_err());
        assert!(TransactionalEmail::new("not-an-address", "Hi", "<p>x</p>").is_err());
    }

    #[test]
    fn tags_are_looked_up_by_name() {
        let email = TransactionalEmail::new("a@example.com", "Hi", "<p>x</p>")
            .unwrap()
            .with_tag("category", "subscription_canceled");
        assert_eq!(email.tag("category"), Some("subscription_canceled"));
        assert_eq!(email.tag("missing"), None);
    }
}
