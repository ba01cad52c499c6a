use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use taskplane_core::{
    protocol::{Message, Received},
    BoxedReader, Channel, MessageReader, SchedulerError, SchedulerResult,
};

use super::{DispatcherClient, TaskExecutionManager};

enum Inbound {
    NewStream(BoxedReader),
    Received(SchedulerResult<Received>),
}

/// Reads messages from the dispatcher and routes them.
pub struct InboundHandler {
    dispatcher_client: Arc<DispatcherClient>,
    executions: Arc<TaskExecutionManager>,
}

impl InboundHandler {
    pub fn new(
        dispatcher_client: Arc<DispatcherClient>,
        executions: Arc<TaskExecutionManager>,
    ) -> Self {
        Self {
            dispatcher_client,
            executions,
        }
    }

    /// Read until the dispatcher closes the connection cleanly.
    ///
    /// A clean close is fatal and returned as `ConnectionLost`. A read error
    /// requests a reconnect, and reading resumes on the next stream handed
    /// over through `readers`.
    pub async fn run(&self, mut readers: mpsc::UnboundedReceiver<BoxedReader>) -> SchedulerResult<()> {
        let mut messages: Option<MessageReader<BoxedReader>> = None;

        loop {
            let Some(active) = messages.as_mut() else {
                match readers.recv().await {
                    Some(reader) => messages = Some(Channel::receive(reader)),
                    None => {
                        return Err(SchedulerError::ConnectionLost(
                            "connection manager stopped".to_string(),
                        ))
                    }
                }
                continue;
            };

            let event = tokio::select! {
                Some(reader) = readers.recv() => Inbound::NewStream(reader),
                received = active.next_message() => Inbound::Received(received),
            };

            match event {
                Inbound::NewStream(reader) => {
                    debug!("Switching to new dispatcher stream");
                    messages = Some(Channel::receive(reader));
                }
                Inbound::Received(Ok(Received::Message(message))) => {
                    self.handle_message(message).await
                }
                Inbound::Received(Ok(Received::Closed)) => {
                    error!("Connection closed by dispatcher");
                    return Err(SchedulerError::ConnectionLost(
                        "dispatcher closed the connection".to_string(),
                    ));
                }
                Inbound::Received(Err(e)) => {
                    warn!(error = %e, "Failed to read from dispatcher");
                    messages = None;
                    self.dispatcher_client.request_reconnect();
                }
            }
        }
    }

    pub async fn handle_message(&self, message: Message) {
        match message {
            Message::Pong => {
                self.dispatcher_client.record_pong();
                debug!("Heartbeat received");
            }
            Message::Task(dispatch) => self.executions.handle_dispatch(dispatch).await,
            Message::StopTask => {
                self.executions.stop_current();
            }
            Message::Unknown { command, .. } => {
                let err = SchedulerError::ProtocolViolation(format!("unknown command {command}"));
                warn!(error = %err, "Ignoring message");
            }
            other => {
                info!(command = other.command(), "Ignoring unexpected message");
            }
        }
    }
}
