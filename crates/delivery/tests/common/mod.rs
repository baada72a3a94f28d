//! Scripted gateway and in-memory store shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use pushgate_common::types::Notification;
use pushgate_delivery::{
    DeliveryWorker, NotificationQueue, NotificationStore, RetryPolicy, StoreError, Validation,
    WorkerSettings,
};
use pushgate_gateway::{
    Certificate, Connector, ERROR_TUPLE_BYTES, GatewayConnection, GatewayError,
};

/// How the fake gateway answers the next send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Silence,
    Tuple([u8; ERROR_TUPLE_BYTES]),
    Closed,
    SendFails,
}

#[derive(Default)]
pub struct GatewayLog {
    script: Mutex<VecDeque<Reply>>,
    built: Mutex<Vec<Certificate>>,
    sent: Mutex<Vec<Vec<u8>>>,
    connects: AtomicUsize,
    refusals: AtomicUsize,
    reconnects: AtomicUsize,
    closes: AtomicUsize,
}

impl GatewayLog {
    pub fn script(&self, replies: impl IntoIterator<Item = Reply>) {
        self.script.lock().unwrap().extend(replies);
    }

    /// Refuse the next `count` connection attempts.
    pub fn refuse_next_connects(&self, count: usize) {
        self.refusals.store(count, Ordering::SeqCst);
    }

    pub fn built(&self) -> Vec<Certificate> {
        self.built.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn reconnects(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

pub struct MockConnector(pub Arc<GatewayLog>);

impl Connector for MockConnector {
    type Connection = MockConnection;

    fn build(&self, _worker: &str, certificate: &Certificate) -> Result<MockConnection, GatewayError> {
        self.0.built.lock().unwrap().push(certificate.clone());
        Ok(MockConnection {
            log: self.0.clone(),
            pending: Reply::Silence,
            connected: false,
        })
    }
}

pub struct MockConnection {
    log: Arc<GatewayLog>,
    pending: Reply,
    connected: bool,
}

#[async_trait]
impl GatewayConnection for MockConnection {
    async fn connect(&mut self) -> Result<(), GatewayError> {
        let refused = self
            .log
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(GatewayError::Connect {
                host: "gateway.test".to_string(),
                port: 2195,
                source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
            });
        }
        self.log.connects.fetch_add(1, Ordering::SeqCst);
        self.connected = true;
        Ok(())
    }

    async fn reconnect(&mut self) -> Result<(), GatewayError> {
        self.log.reconnects.fetch_add(1, Ordering::SeqCst);
        self.pending = Reply::Silence;
        self.connected = true;
        Ok(())
    }

    async fn send(&mut self, payload: &[u8]) -> Result<(), GatewayError> {
        if !self.connected {
            return Err(GatewayError::NotConnected);
        }
        let reply = self
            .log
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Reply::Silence);
        if reply == Reply::SendFails {
            return Err(GatewayError::Write(std::io::Error::from(
                std::io::ErrorKind::BrokenPipe,
            )));
        }
        self.log.sent.lock().unwrap().push(payload.to_vec());
        self.pending = reply;
        Ok(())
    }

    async fn poll_for_error(&mut self, _timeout: Duration) -> Result<bool, GatewayError> {
        Ok(self.pending != Reply::Silence)
    }

    async fn read_error_tuple(
        &mut self,
    ) -> Result<Option<[u8; ERROR_TUPLE_BYTES]>, GatewayError> {
        match std::mem::replace(&mut self.pending, Reply::Silence) {
            Reply::Tuple(bytes) => Ok(Some(bytes)),
            _ => Ok(None),
        }
    }

    async fn close(&mut self) {
        if self.connected {
            self.connected = false;
            self.log.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Store that keeps every save in memory and can simulate connectivity loss.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<i64, Notification>>,
    saves: Mutex<Vec<Notification>>,
    outages: AtomicU32,
    reconnects: AtomicU32,
}

impl MemoryStore {
    pub fn insert(&self, notification: Notification) {
        self.records
            .lock()
            .unwrap()
            .insert(notification.id, notification);
    }

    /// Fail the next `count` saves with a recoverable error.
    pub fn fail_next_saves(&self, count: u32) {
        self.outages.store(count, Ordering::SeqCst);
    }

    pub fn saves_for(&self, id: i64) -> Vec<Notification> {
        self.saves
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.id == id)
            .cloned()
            .collect()
    }

    pub fn saved_ids(&self) -> Vec<i64> {
        self.saves.lock().unwrap().iter().map(|n| n.id).collect()
    }

    pub fn reconnects(&self) -> u32 {
        self.reconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn save(
        &self,
        notification: &Notification,
        validation: Validation,
    ) -> Result<(), StoreError> {
        let outage = self
            .outages
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if outage {
            return Err(StoreError::Connectivity(sqlx::Error::PoolTimedOut));
        }
        if validation == Validation::Enforce {
            notification.validate()?;
        }

        self.saves.lock().unwrap().push(notification.clone());
        self.records
            .lock()
            .unwrap()
            .insert(notification.id, notification.clone());
        Ok(())
    }

    async fn ready_for_delivery(&self, limit: i64) -> Result<Vec<Notification>, StoreError> {
        let mut ready: Vec<Notification> = self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|n| !n.is_terminal())
            .cloned()
            .collect();
        ready.sort_by_key(|n| n.id);
        ready.truncate(limit as usize);
        Ok(ready)
    }

    async fn reconnect(&self) -> Result<(), StoreError> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub const DEFAULT_CERTIFICATE: &str = "default-certificate-pem";

pub fn notification(id: i64) -> Notification {
    Notification::new(id, format!("device-{id}"), format!("frame-{id}").into_bytes())
}

pub fn settings() -> WorkerSettings {
    WorkerSettings {
        poll_timeout: Duration::from_millis(10),
        retry_policy: RetryPolicy {
            max_attempts: 3,
            delay: Duration::ZERO,
        },
    }
}

pub struct Harness {
    pub gateway: Arc<GatewayLog>,
    pub store: Arc<MemoryStore>,
    pub queue: Arc<NotificationQueue>,
    pub cancellation_token: CancellationToken,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            gateway: Arc::new(GatewayLog::default()),
            store: Arc::new(MemoryStore::default()),
            queue: Arc::new(NotificationQueue::new()),
            cancellation_token: CancellationToken::new(),
        }
    }

    pub fn connector(&self) -> Arc<MockConnector> {
        Arc::new(MockConnector(self.gateway.clone()))
    }

    pub fn worker(&self) -> DeliveryWorker<MockConnector, MemoryStore> {
        DeliveryWorker::new(
            0,
            self.queue.clone(),
            self.connector(),
            Certificate::from(DEFAULT_CERTIFICATE),
            self.store.clone(),
            settings(),
            self.cancellation_token.clone(),
        )
    }

    /// Queue `notifications` followed by a sentinel and run one worker to completion.
    pub async fn deliver_all(&self, notifications: impl IntoIterator<Item = Notification>) {
        for n in notifications {
            self.queue.push_notification(n).await;
        }
        self.queue.push_stop().await;
        tokio::time::timeout(Duration::from_secs(5), self.worker().run())
            .await
            .expect("worker did not stop");
    }
}
