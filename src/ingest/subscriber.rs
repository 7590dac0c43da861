//! Relay feed client.
//!
//! The relay republishes sensor messages as `"<topic> <json>"` lines. The
//! subscriber keeps one connection, reconnects with a fixed backoff and folds
//! each accepted line to completion before reading the next one.

use crate::control::controller::Controller;
use crate::core::config::IngestConfig;
use crate::core::time::Clock;
use crate::ingest::event::MalformedEvent;
use crate::net::framing::read_raw_line;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::sync::watch;

/// Topic prefix of a relay line; `None` for a bare JSON object.
pub fn topic_of(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    if trimmed.starts_with('{') {
        return None;
    }
    trimmed.split_once(' ').map(|(topic, _)| topic)
}

pub struct RelaySubscriber<C: Clock> {
    addr: String,
    topics: Vec<String>,
    backoff: Duration,
    controller: Arc<Controller<C>>,
}

enum Exit {
    Shutdown,
    Disconnected,
}

impl<C: Clock> RelaySubscriber<C> {
    pub fn new(addr: impl Into<String>, config: &IngestConfig, controller: Arc<Controller<C>>) -> Self {
        Self {
            addr: addr.into(),
            topics: config.topics.clone(),
            backoff: config.reconnect_backoff(),
            controller,
        }
    }

    /// Whether a line passes the topic filter. Bare JSON always passes.
    pub fn accepts(&self, line: &str) -> bool {
        match topic_of(line) {
            Some(topic) => self.topics.is_empty() || self.topics.iter().any(|t| t == topic),
            None => true,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(addr = %self.addr, topics = ?self.topics, "relay subscriber started");
        loop {
            match TcpStream::connect(&self.addr).await {
                Ok(stream) => {
                    tracing::info!(addr = %self.addr, "connected to relay");
                    if let Exit::Shutdown = self.consume(stream, &mut shutdown).await {
                        break;
                    }
                    tracing::warn!(addr = %self.addr, "relay connection lost");
                }
                Err(err) => tracing::warn!(addr = %self.addr, "relay connect failed: {err}"),
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = self.controller.clock().sleep(self.backoff) => {}
            }
        }
        tracing::info!("relay subscriber stopped");
    }

    async fn consume(&self, stream: TcpStream, shutdown: &mut watch::Receiver<bool>) -> Exit {
        let mut reader = BufReader::new(stream);
        loop {
            let next = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Exit::Shutdown;
                    }
                    continue;
                }
                next = read_raw_line(&mut reader) => next,
            };
            let raw = match next {
                Ok(Some(raw)) => raw,
                Ok(None) => return Exit::Disconnected,
                Err(err) => {
                    tracing::warn!("relay read error: {err}");
                    return Exit::Disconnected;
                }
            };
            let line = match String::from_utf8(raw) {
                Ok(line) => line,
                Err(err) => {
                    self.controller
                        .reject_event(&MalformedEvent::InvalidEncoding(err.to_string()).into());
                    continue;
                }
            };
            if line.trim().is_empty() || !self.accepts(&line) {
                continue;
            }
            // Rejections are counted and logged by the controller.
            let _ = self.controller.ingest_line(&line).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_prefix_is_optional() {
        assert_eq!(topic_of("camara {\"a\":1}"), Some("camara"));
        assert_eq!(topic_of("  {\"a\":1}"), None);
        assert_eq!(topic_of("gps"), None);
    }
}
