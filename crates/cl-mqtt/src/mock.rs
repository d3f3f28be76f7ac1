//! Mock channel for testing publishers without a broker.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::channel::Channel;
use crate::error::{MqttError, MqttResult};

/// A message recorded by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Recording mock channel with scriptable failures.
#[derive(Default)]
pub struct MockChannel {
    published: Mutex<Vec<PublishedMessage>>,
    fail_remaining: Mutex<u32>,
}

impl MockChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` publish calls fail.
    pub fn fail_next(&self, count: u32) {
        *self.fail_remaining.lock().unwrap() = count;
    }

    /// Copies of everything published so far.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().unwrap().clone()
    }

    pub fn published_count(&self) -> usize {
        self.published.lock().unwrap().len()
    }
}

#[async_trait]
impl Channel for MockChannel {
    async fn publish(&self, topic: &str, payload: &[u8]) -> MqttResult<()> {
        {
            let mut remaining = self.fail_remaining.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(MqttError::Publish("scripted failure".into()));
            }
        }

        self.published.lock().unwrap().push(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        });
        Ok(())
    }
}
