// Scripted chat models for unit tests

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

use super::{ChatModel, ChatRequest};
use crate::{RagError, Result};

/// Returns a fixed reply and remembers every request it saw
#[derive(Debug)]
pub(crate) struct ScriptedChat {
    reply: String,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedChat {
    pub(crate) fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn requests(&self) -> Vec<ChatRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChatModel for ScriptedChat {
    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        Ok(self.reply.clone())
    }
}

#[derive(Debug)]
pub(crate) struct FailingChat;

#[async_trait]
impl ChatModel for FailingChat {
    async fn complete(&self, _request: &ChatRequest) -> Result<String> {
        Err(RagError::Network("connection refused".to_string()))
    }
}

/// Sleeps before answering, for timeout tests
#[derive(Debug)]
pub(crate) struct SlowChat {
    pub(crate) delay: Duration,
}

#[async_trait]
impl ChatModel for SlowChat {
    async fn complete(&self, _request: &ChatRequest) -> Result<String> {
        tokio::time::sleep(self.delay).await;
        Ok("too late".to_string())
    }
}
