//! Subscribers and the callback dispatch between monitors and clients.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::monitor::{
    EventSink, FileEvent, FileReference, MonitorError, MonitorId, MonitorState, ServerId,
};

use super::MonitorEntry;
use super::hash_index::HashIndex;

/// Failure reported by a subscriber when a batch could not be delivered.
#[derive(Error, Debug)]
pub enum SubscriberError {
    #[error("Subscriber is no longer listening")]
    Disconnected,

    #[error("Delivery failed: {0}")]
    Delivery(String),
}

/// Callback target registered when a monitor is created.
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Receive one batch of events detected by `monitor_id`.
    async fn on_file_events(
        &self,
        monitor_id: &MonitorId,
        events: Vec<FileEvent>,
    ) -> Result<(), SubscriberError>;
}

/// A batch as received through a [`ChannelSubscriber`].
#[derive(Debug, Clone)]
pub struct Notification {
    pub monitor_id: MonitorId,
    pub events: Vec<FileEvent>,
}

/// Forwards batches into a bounded tokio channel.
#[derive(Clone)]
pub struct ChannelSubscriber {
    sender: mpsc::Sender<Notification>,
}

impl ChannelSubscriber {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl Subscriber for ChannelSubscriber {
    async fn on_file_events(
        &self,
        monitor_id: &MonitorId,
        events: Vec<FileEvent>,
    ) -> Result<(), SubscriberError> {
        self.sender
            .send(Notification {
                monitor_id: monitor_id.clone(),
                events,
            })
            .await
            .map_err(|_| SubscriberError::Disconnected)
    }
}

/// Writes every event to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSubscriber;

#[async_trait]
impl Subscriber for LoggingSubscriber {
    async fn on_file_events(
        &self,
        monitor_id: &MonitorId,
        events: Vec<FileEvent>,
    ) -> Result<(), SubscriberError> {
        for event in &events {
            crate::log_event!(
                "subscriber",
                "event",
                "{monitor_id} {} {}",
                event.event_type,
                event.path.display()
            );
        }
        Ok(())
    }
}

pub(super) type Registry = Mutex<HashMap<MonitorId, MonitorEntry>>;

/// Routes monitor output to the subscriber registered for it.
///
/// Holds the registry weakly so running monitor tasks never keep a dropped
/// server alive. Every delivered path also invalidates any digest recorded
/// for it, since a newly completed file replaces whatever content was there.
pub(super) struct Dispatch {
    server_id: ServerId,
    registry: Weak<Registry>,
    hashes: Arc<HashIndex>,
}

impl Dispatch {
    pub(super) fn new(
        server_id: ServerId,
        registry: &Arc<Registry>,
        hashes: Arc<HashIndex>,
    ) -> Self {
        Self {
            server_id,
            registry: Arc::downgrade(registry),
            hashes,
        }
    }
}

#[async_trait]
impl EventSink for Dispatch {
    async fn deliver(&self, monitor_id: &MonitorId, events: Vec<FileEvent>) {
        for event in &events {
            self.hashes
                .forget(&FileReference::new(self.server_id, event.path.clone()));
        }

        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        // Never await while holding the registry lock
        let subscriber = registry
            .lock()
            .get(monitor_id)
            .map(|entry| entry.subscriber.clone());
        drop(registry);

        let Some(subscriber) = subscriber else {
            crate::debug_event!("dispatch", "orphaned", "{monitor_id} no longer registered");
            return;
        };

        let count = events.len();
        match subscriber.on_file_events(monitor_id, events).await {
            Ok(()) => crate::debug_event!("dispatch", "delivered", "{count} events for {monitor_id}"),
            Err(e) => crate::log_event!("dispatch", "callback failed", "{monitor_id}: {e}"),
        }
    }

    async fn monitor_failed(&self, monitor_id: &MonitorId, error: &MonitorError) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let Some(shared) = registry
            .lock()
            .get(monitor_id)
            .map(|entry| entry.monitor.clone())
        else {
            return;
        };

        // A run started after the failing one keeps the monitor running
        if !shared.lock().await.reap_cancelled() {
            crate::debug_event!("dispatch", "stale failure", "{monitor_id}: {error}");
            return;
        }

        if let Some(entry) = registry.lock().get_mut(monitor_id)
            && entry.state == MonitorState::Running
        {
            entry.state = MonitorState::Stopped;
            tracing::error!("[dispatch] monitor {monitor_id} stopped: {error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::monitor::MonitorConfig;
    use crate::server::MonitorServer;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_channel_subscriber_forwards() {
        let (subscriber, mut rx) = ChannelSubscriber::new(4);
        let id = MonitorId::from("m-1");

        subscriber
            .on_file_events(&id, vec![FileEvent::created("/in/a.tif")])
            .await
            .unwrap();

        let notification = rx.recv().await.unwrap();
        assert_eq!(notification.monitor_id, id);
        assert_eq!(notification.events, vec![FileEvent::created("/in/a.tif")]);
    }

    #[tokio::test]
    async fn test_channel_subscriber_disconnected() {
        let (subscriber, rx) = ChannelSubscriber::new(1);
        drop(rx);

        let err = subscriber
            .on_file_events(&MonitorId::from("m-1"), vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, SubscriberError::Disconnected));
    }

    #[tokio::test]
    async fn test_dispatch_after_registry_dropped() {
        let registry: Arc<Registry> = Arc::new(Mutex::new(HashMap::new()));
        let dispatch = Dispatch::new(ServerId::generate(), &registry, Arc::new(HashIndex::new()));
        drop(registry);

        // Must neither panic nor block
        dispatch
            .deliver(&MonitorId::from("gone"), vec![FileEvent::created("/x")])
            .await;
    }

    fn fatal() -> MonitorError {
        MonitorError::Native {
            details: "watch limit reached".to_string(),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_fatal_error_stops_monitor() {
        let temp = TempDir::new().unwrap();
        let server = MonitorServer::new(Settings::default());
        let id = server
            .create_monitor(MonitorConfig::new(temp.path()), Arc::new(LoggingSubscriber))
            .unwrap();
        server.start_monitor(&id).await.unwrap();

        // A failing loop cancels its own run before reporting
        let (shared, _) = server.shared_monitor(&id).unwrap();
        shared.lock().await.cancel();
        server.sink.monitor_failed(&id, &fatal()).await;

        assert_eq!(server.get_monitor_state(&id).unwrap(), MonitorState::Stopped);
        assert!(!shared.lock().await.is_running());

        // The monitor can be started again after a failure
        server.start_monitor(&id).await.unwrap();
        assert_eq!(server.get_monitor_state(&id).unwrap(), MonitorState::Running);
        server.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stale_failure_keeps_newer_run() {
        let temp = TempDir::new().unwrap();
        let server = MonitorServer::new(Settings::default());
        let id = server
            .create_monitor(MonitorConfig::new(temp.path()), Arc::new(LoggingSubscriber))
            .unwrap();
        server.start_monitor(&id).await.unwrap();
        server.stop_monitor(&id).await.unwrap();
        server.start_monitor(&id).await.unwrap();

        // Reported by the first run after the second one started
        server.sink.monitor_failed(&id, &fatal()).await;

        assert_eq!(server.get_monitor_state(&id).unwrap(), MonitorState::Running);
        let (shared, _) = server.shared_monitor(&id).unwrap();
        assert!(shared.lock().await.is_running());
        server.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_busy_monitor_does_not_block_others() {
        let temp = TempDir::new().unwrap();
        let server = MonitorServer::new(Settings::default());
        let busy = server
            .create_monitor(MonitorConfig::new(temp.path()), Arc::new(LoggingSubscriber))
            .unwrap();
        let (subscriber, mut rx) = ChannelSubscriber::new(4);
        let other = server
            .create_monitor(MonitorConfig::new(temp.path()), Arc::new(subscriber))
            .unwrap();

        // Held for the whole test, as during a long baseline walk
        let (shared, _) = server.shared_monitor(&busy).unwrap();
        let _guard = shared.lock().await;

        let delivery = server
            .sink
            .deliver(&other, vec![FileEvent::created("/in/a.tif")]);
        tokio::time::timeout(Duration::from_secs(2), delivery)
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().monitor_id, other);
        assert_eq!(server.get_monitor_state(&busy).unwrap(), MonitorState::Created);
        assert_eq!(server.list_monitors().len(), 2);
    }

    #[tokio::test]
    async fn test_delivery_invalidates_recorded_digest() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("scan.tif");
        std::fs::write(&path, b"first pass").unwrap();

        let server = MonitorServer::new(Settings::default());
        let reference = server.file_reference(&path);
        let digest = server.get_content_hash(&reference).await.unwrap();
        assert_eq!(server.get_file_reference_by_hash(&digest).unwrap(), reference);

        server
            .sink
            .deliver(&MonitorId::from("m-1"), vec![FileEvent::created(&path)])
            .await;

        assert!(matches!(
            server.get_file_reference_by_hash(&digest),
            Err(crate::server::ServerError::FileNotFound { .. })
        ));
    }
}
