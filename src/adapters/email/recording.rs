//! Recording email service for tests and dry runs.
//!
//! Keeps every accepted message in memory instead of delivering it, and can
//! be told to reject all messages or only those for one recipient.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::domain::foundation::{DomainError, ErrorCode};
use crate::ports::{EmailService, TransactionalEmail};

#[derive(Default)]
struct State {
    sent: Vec<TransactionalEmail>,
    attempts: usize,
    fail_all: bool,
    failing_recipients: HashSet<String>,
}

#[derive(Default)]
pub struct RecordingEmailService {
    state: Mutex<State>,
}

impl RecordingEmailService {
    pub fn new() -> Self {
        Self::default()
    }

    /// A service whose provider is down.
    pub fn failing() -> Self {
        let service = Self::new();
        service.lock().fail_all = true;
        service
    }

    pub fn fail_for_recipient(&self, to: impl Into<String>) {
        self.lock().failing_recipients.insert(to.into());
    }

    /// Messages the provider accepted.
    pub fn sent(&self) -> Vec<TransactionalEmail> {
        self.lock().sent.clone()
    }

    /// Accepted messages carrying `category=<category>`.
    pub fn sent_with_category(&self, category: &str) -> Vec<TransactionalEmail> {
        self.lock()
            .sent
            .iter()
            .filter(|e| e.tag("category") == Some(category))
            .cloned()
            .collect()
    }

    /// Every send call, accepted or not.
    pub fn attempts(&self) -> usize {
        self.lock().attempts
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl EmailService for RecordingEmailService {
    async fn send_transactional_email(
        &self,
        email: &TransactionalEmail,
    ) -> Result<String, DomainError> {
        let mut state = self.lock();
        state.attempts += 1;
        if state.fail_all || state.failing_recipients.contains(&email.to) {
            return Err(DomainError::new(
                ErrorCode::ExternalServiceError,
                format!("email provider rejected message to {}", email.to),
            ));
        }
        state.sent.push(email.clone());
        Ok(format!("msg_{}", state.sent.len()))
    }
}
