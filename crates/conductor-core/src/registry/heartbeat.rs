//! Agent-side registration lifecycle.
//!
//! A [`Heartbeater`] registers an agent, refreshes its registration on a fixed
//! period, re-registers when the registry has forgotten it, and unregisters on
//! shutdown. Retries happen only inside [`RegistryClient`]; the heartbeater
//! makes one client call per step.

use super::{AgentDescriptor, HeartbeatStatus, RegistryClient};
use crate::config::ClientConfig;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Keeps one agent registered while running.
#[derive(Debug, Clone)]
pub struct Heartbeater {
    client: RegistryClient,
    descriptor: AgentDescriptor,
    interval: Duration,
}

impl Heartbeater {
    /// Creates a heartbeater.
    ///
    /// # Arguments
    /// * `client` - Registry client; its retry policy governs every attempt
    /// * `descriptor` - Descriptor to keep registered
    /// * `interval` - Period between heartbeats
    #[must_use]
    pub const fn new(client: RegistryClient, descriptor: AgentDescriptor, interval: Duration) -> Self {
        Self { client, descriptor, interval }
    }

    /// Creates a heartbeater from the `[client]` config section.
    #[must_use]
    pub fn from_config(config: &ClientConfig, descriptor: AgentDescriptor) -> Self {
        Self::new(RegistryClient::from_config(config), descriptor, config.heartbeat_interval())
            .with_registration_attempts(config.registration_attempts)
    }

    /// Sets how many times registration is attempted on transport errors.
    #[must_use]
    pub fn with_registration_attempts(mut self, attempts: u32) -> Self {
        self.client = self.client.with_write_attempts(attempts.max(1));
        self
    }

    /// Returns the descriptor being kept alive.
    #[must_use]
    pub const fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    /// Registers the agent.
    ///
    /// # Returns
    /// `true` once the registry accepted the descriptor
    pub async fn register(&self) -> bool {
        let registered = self.client.register(&self.descriptor).await;
        if !registered {
            error!(agent_id = %self.descriptor.agent_id, "Giving up on registration");
        }
        registered
    }

    /// Spawns the heartbeat loop.
    ///
    /// The loop keeps running even when startup registration fails; the
    /// next heartbeat the registry rejects triggers another registration.
    #[must_use]
    pub fn start(self) -> HeartbeatHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            self.register().await;

            loop {
                tokio::select! {
                    () = tokio::time::sleep(self.interval) => {
                        self.beat().await;
                    }
                    _ = shutdown_rx.changed() => {
                        break;
                    }
                }
            }

            info!(agent_id = %self.descriptor.agent_id, "Stopping heartbeat");
            self.client.unregister(&self.descriptor.agent_id).await;
        });

        HeartbeatHandle { shutdown, task }
    }

    async fn beat(&self) {
        match self.client.send_heartbeat(&self.descriptor.agent_id).await {
            HeartbeatStatus::Accepted => debug!(agent_id = %self.descriptor.agent_id, "Heartbeat sent"),
            HeartbeatStatus::UnknownAgent => {
                warn!(agent_id = %self.descriptor.agent_id, "Heartbeat rejected, re-registering");
                if !self.client.register(&self.descriptor).await {
                    warn!(agent_id = %self.descriptor.agent_id, "Re-registration failed");
                }
            }
            // An unreachable registry is retried on the next tick.
            HeartbeatStatus::Failed => {}
        }
    }
}

/// Handle to a running heartbeat loop.
#[derive(Debug)]
pub struct HeartbeatHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl HeartbeatHandle {
    /// Stops the loop and waits for the agent to be unregistered.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "Heartbeat task ended abnormally");
        }
    }

    /// Returns whether the loop has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::{BackoffStrategy, RetryPolicy};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn heartbeater(url: &str, interval: Duration) -> Heartbeater {
        let client = RegistryClient::new(url, Duration::from_secs(2)).with_retry_policy(RetryPolicy {
            max_attempts: 1,
            strategy: BackoffStrategy::Constant,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(10),
        });
        let descriptor = AgentDescriptor::new("j1", "jira_agent", "tickets", "http://jira:8000");
        Heartbeater::new(client, descriptor, interval)
    }

    #[tokio::test]
    async fn test_lifecycle_registers_beats_and_unregisters() {
        let mut server = mockito::Server::new_async().await;
        let register = server.mock("POST", "/register").with_status(200).with_body("{}").expect(1).create();
        let beat = server
            .mock("POST", "/heartbeat/j1")
            .with_status(200)
            .with_body("{}")
            .expect_at_least(2)
            .create();
        let unregister = server.mock("DELETE", "/agents/j1").with_status(200).with_body("{}").expect(1).create();

        let handle = heartbeater(&server.url(), Duration::from_millis(50)).start();
        tokio::time::sleep(Duration::from_millis(300)).await;
        handle.shutdown().await;

        register.assert();
        beat.assert();
        unregister.assert();
    }

    #[tokio::test]
    async fn test_rejected_heartbeat_triggers_reregistration() {
        let mut server = mockito::Server::new_async().await;
        let register = server
            .mock("POST", "/register")
            .with_status(200)
            .with_body("{}")
            .expect_at_least(2)
            .create();
        let _beat = server.mock("POST", "/heartbeat/j1").with_status(404).create();
        let _unregister = server.mock("DELETE", "/agents/j1").with_status(200).with_body("{}").create();

        let handle = heartbeater(&server.url(), Duration::from_millis(50)).start();
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.shutdown().await;

        register.assert();
    }

    #[tokio::test]
    async fn test_registry_error_status_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let register = server.mock("POST", "/register").with_status(503).expect(1).create();

        let heartbeater = heartbeater(&server.url(), Duration::from_secs(60)).with_registration_attempts(3);
        assert!(!heartbeater.register().await);
        register.assert();
    }

    /// Accepts connections and closes them unanswered, counting each one.
    async fn dropping_listener() -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&accepted);
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
            }
        });
        (url, accepted)
    }

    #[tokio::test]
    async fn test_registration_attempts_are_not_multiplied() {
        let (url, accepted) = dropping_listener().await;
        let heartbeater = heartbeater(&url, Duration::from_secs(60)).with_registration_attempts(2);

        assert!(!heartbeater.register().await);
        assert_eq!(accepted.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unreachable_registry_skips_reregistration() {
        let (url, accepted) = dropping_listener().await;
        let heartbeater = heartbeater(&url, Duration::from_secs(60));

        heartbeater.beat().await;
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
    }
}
