//! Mock implementations for testing.
//!
//! Test doubles for the transport, the background spawner and the state
//! store, plus configuration fixtures.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Arc, Mutex};

use crate::config::ReminderConfig;
use crate::errors::{ReminderError, ReminderResult};
use crate::reminder::CheckSpawner;
use crate::store::StateStore;
use crate::transport::MailTransport;
use crate::types::{Email, ReminderRecord, SendReceipt};

/// Mock mail transport that records every email it is asked to send.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    sent: Arc<Mutex<Vec<Email>>>,
    fail_next: Arc<Mutex<Option<ReminderError>>>,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the next send to fail.
    pub fn fail_next_with(&self, error: ReminderError) -> &Self {
        *self.fail_next.lock().unwrap() = Some(error);
        self
    }

    /// Returns the emails sent so far.
    pub fn sent_emails(&self) -> Vec<Email> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailTransport for MockTransport {
    async fn send(&self, email: &Email) -> ReminderResult<SendReceipt> {
        if let Some(error) = self.fail_next.lock().unwrap().take() {
            return Err(error);
        }

        self.sent.lock().unwrap().push(email.clone());
        Ok(SendReceipt {
            message_id: format!("mock-{}@example.com", Utc::now().timestamp_millis()),
            accepted: email.envelope_to.clone(),
            rejected: Vec::new(),
            response: "2.0.0 OK".to_string(),
        })
    }
}

/// Mock spawner that records tokens instead of starting processes.
#[derive(Debug, Clone, Default)]
pub struct MockSpawner {
    tokens: Arc<Mutex<Vec<String>>>,
    fail_next: Arc<Mutex<Option<ReminderError>>>,
}

impl MockSpawner {
    /// Creates a new mock spawner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the next spawn to fail.
    pub fn fail_next_with(&self, error: ReminderError) -> &Self {
        *self.fail_next.lock().unwrap() = Some(error);
        self
    }

    /// Returns the tokens passed to `spawn_check`.
    pub fn spawned_tokens(&self) -> Vec<String> {
        self.tokens.lock().unwrap().clone()
    }
}

impl CheckSpawner for MockSpawner {
    fn spawn_check(&self, token: &str) -> ReminderResult<()> {
        if let Some(error) = self.fail_next.lock().unwrap().take() {
            return Err(error);
        }
        self.tokens.lock().unwrap().push(token.to_string());
        Ok(())
    }
}

/// In-memory state store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    record: Arc<Mutex<Option<ReminderRecord>>>,
    fail_writes: Arc<Mutex<bool>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail.
    pub fn set_fail_writes(&self, fail: bool) {
        *self.fail_writes.lock().unwrap() = fail;
    }
}

impl StateStore for MemoryStore {
    fn read(&self) -> Option<ReminderRecord> {
        self.record.lock().unwrap().clone()
    }

    fn write(&self, record: &ReminderRecord) -> ReminderResult<()> {
        if *self.fail_writes.lock().unwrap() {
            return Err(ReminderError::state_io("Mock write failure"));
        }
        *self.record.lock().unwrap() = Some(record.clone());
        Ok(())
    }
}

/// Configuration JSON used by the fixtures.
pub fn test_config_json() -> &'static str {
    r#"{
        "smtp": { "host": "smtp.example.com", "port": 587, "secure": false,
                  "user": "bot@example.com", "pass": "hunter2" },
        "from": { "email": "bot@example.com", "name": "Reminder Bot" },
        "to": ["dev@example.com", "ops@example.com"]
    }"#
}

/// Parsed test configuration.
pub fn test_config() -> ReminderConfig {
    ReminderConfig::from_json_str(test_config_json()).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Address;

    #[tokio::test]
    async fn test_mock_transport_failure_is_one_shot() {
        let transport = MockTransport::new();
        transport.fail_next_with(ReminderError::connection("Test failure"));

        let email = Email {
            from: "a@example.com".to_string(),
            to: "b@example.com".to_string(),
            subject: "s".to_string(),
            text: "t".to_string(),
            envelope_from: Address::new("a@example.com").unwrap(),
            envelope_to: vec![Address::new("b@example.com").unwrap()],
        };

        assert!(transport.send(&email).await.is_err());
        assert!(transport.send(&email).await.is_ok());
        assert_eq!(transport.sent_emails().len(), 1);
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        assert!(store.read().is_none());

        store.write(&ReminderRecord::bare("tok")).unwrap();
        assert_eq!(store.read().map(|r| r.token), Some("tok".to_string()));

        store.set_fail_writes(true);
        assert!(store.write(&ReminderRecord::bare("other")).is_err());
    }

    #[test]
    fn test_fixture_config() {
        let config = test_config();
        assert_eq!(config.to.to_header(), "dev@example.com, ops@example.com");
    }
}
