use anyhow::{Result, bail};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::Check;
use crate::models::SendRequest;

/// What a [`MockCheck`] answers with.
#[derive(Debug, Clone)]
pub enum Behavior {
    Pass,
    Reject,
    Fail(String),
}

/// A scripted check for tests. Always answers the same way and counts calls.
pub struct MockCheck {
    name: String,
    behavior: Behavior,
    delay: Option<Duration>,
    calls: AtomicUsize,
    answered: AtomicUsize,
}

impl MockCheck {
    pub fn new(name: impl Into<String>, behavior: Behavior) -> Self {
        Self {
            name: name.into(),
            behavior,
            delay: None,
            calls: AtomicUsize::new(0),
            answered: AtomicUsize::new(0),
        }
    }

    pub fn passing(name: impl Into<String>) -> Self {
        Self::new(name, Behavior::Pass)
    }

    pub fn rejecting(name: impl Into<String>) -> Self {
        Self::new(name, Behavior::Reject)
    }

    pub fn failing(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, Behavior::Fail(message.into()))
    }

    /// Sleep before answering, to keep the check in flight.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Calls that got past the delay. Lower than `calls` while checks are
    /// in flight or after one was aborted.
    pub fn answered(&self) -> usize {
        self.answered.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Check for MockCheck {
    fn name(&self) -> &str {
        &self.name
    }

    async fn evaluate(&self, _request: &SendRequest) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.answered.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Pass => Ok(true),
            Behavior::Reject => Ok(false),
            Behavior::Fail(message) => bail!("{}", message),
        }
    }
}
