use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use taskplane_core::{protocol::Message, BoxedReader, Channel, SchedulerError, SchedulerResult};

use crate::backoff::Backoff;

/// Worker-side connection to the dispatcher.
///
/// Owns the single outbound [`Channel`]. Each established connection hands its
/// read half to the inbound handler through the reader queue, so the handler
/// always reads from the newest stream.
pub struct DispatcherClient {
    address: String,
    channel: Channel,
    reader_tx: mpsc::UnboundedSender<BoxedReader>,
    reconnect_requested: AtomicBool,
    reconnect_notify: Notify,
    last_heartbeat: Mutex<Option<Instant>>,
}

impl DispatcherClient {
    pub fn new(address: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<BoxedReader>) {
        let address = address.into();
        let (reader_tx, reader_rx) = mpsc::unbounded_channel();
        let client = Self {
            channel: Channel::detached("dispatcher", address.clone()),
            address,
            reader_tx,
            reconnect_requested: AtomicBool::new(false),
            reconnect_notify: Notify::new(),
            last_heartbeat: Mutex::new(None),
        };
        (client, reader_rx)
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Establish the outbound stream and clear any pending reconnect request
    pub async fn connect(&self) -> SchedulerResult<()> {
        let stream = TcpStream::connect(&self.address)
            .await
            .map_err(|e| SchedulerError::Network(format!("connect to {} failed: {e}", self.address)))?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY");
        }

        let (reader, writer) = stream.into_split();
        self.channel.attach(Box::new(writer)).await;
        self.reader_tx
            .send(Box::new(reader))
            .map_err(|_| SchedulerError::Internal("inbound handler is gone".to_string()))?;

        self.reconnect_requested.store(false, Ordering::SeqCst);
        info!(address = %self.address, "Connected to dispatcher");
        Ok(())
    }

    /// Send a message; connection errors request a reconnect before being returned
    pub async fn send(&self, message: &Message) -> SchedulerResult<()> {
        match self.channel.send(message).await {
            Ok(()) => Ok(()),
            Err(e) => {
                if e.is_connection_error() {
                    self.request_reconnect();
                }
                Err(e)
            }
        }
    }

    /// Ask the reconnect loop to run. Returns false if a reconnect is already pending.
    pub fn request_reconnect(&self) -> bool {
        let acquired = self
            .reconnect_requested
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if acquired {
            warn!(address = %self.address, "Connection lost, reconnect requested");
            self.reconnect_notify.notify_one();
        }
        acquired
    }

    pub fn is_reconnect_requested(&self) -> bool {
        self.reconnect_requested.load(Ordering::SeqCst)
    }

    /// Serve reconnect requests forever.
    ///
    /// Each attempt waits the current backoff delay first; a failed attempt
    /// doubles the delay.
    pub async fn reconnect_loop(&self, mut backoff: Backoff) {
        loop {
            if !self.is_reconnect_requested() {
                self.reconnect_notify.notified().await;
                continue;
            }

            let delay = backoff.current();
            info!(delay_ms = delay.as_millis() as u64, "Reconnecting to dispatcher");
            tokio::time::sleep(delay).await;

            match self.connect().await {
                Ok(()) => info!("Reconnected to dispatcher"),
                Err(e) => {
                    warn!(error = %e, "Reconnect attempt failed");
                    backoff.advance();
                }
            }
        }
    }

    pub fn record_pong(&self) {
        *self
            .last_heartbeat
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Instant::now());
    }

    /// Time the last `pong` arrived. Informational only.
    pub fn last_heartbeat(&self) -> Option<Instant> {
        *self
            .last_heartbeat
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub async fn close(&self) {
        self.channel.close().await;
    }
}
