// SPDX-FileCopyrightText: © 2025 MediaFlux Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Shared-memory pub/sub services for out-of-process nodes.
//!
//! Each out-of-process node gets two services, named deterministically from
//! `(session_id, node_id)`: one carrying inputs to the worker, one carrying
//! its outputs back. Services live on an iceoryx2 node shared per process.
//!
//! Semantics:
//! - **At-most-once**: history depth is 0. A sample published while no
//!   subscriber is active is gone; [`WorkerLink::connect`] therefore brings
//!   up its output subscriber before the input publisher exists, so the
//!   worker cannot publish into the void.
//! - **Zero-copy**: published payloads are written into loaned bus memory;
//!   received payloads are copied out of the sample before it is released.
//! - **Ordering**: publish order per service.
//! - **Lifecycle**: created on node `initialize()`, destroyed on
//!   `cleanup()` (dropping the link tears both services down). Names embed
//!   the session id, so sessions cannot collide.

use std::time::{Duration, SystemTime};

use iceoryx2::port::publisher::Publisher;
use iceoryx2::port::subscriber::Subscriber;
use iceoryx2::prelude::*;
use iceoryx2::service::port_factory::publish_subscribe::PortFactory;
use mediaflux_core::buffer::Buffer;

use crate::frame::{decode, encode, WireFrame};
use crate::IpcError;

/// Default ceiling for one framed record (matches the bus slice limit).
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 1024 * 1024;

/// Interval between subscriber polls while waiting for a worker sample.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Name of the scheduler→worker service for a node.
pub fn input_service_name(session_id: &str, node_id: &str) -> String {
    format!("mediaflux/{session_id}/{node_id}/in")
}

/// Name of the worker→scheduler service for a node.
pub fn output_service_name(session_id: &str, node_id: &str) -> String {
    format!("mediaflux/{session_id}/{node_id}/out")
}

/// Process-wide handle to the shared-memory bus.
pub struct IpcBus {
    node: Node<ipc::Service>,
}

impl IpcBus {
    /// Bring up the bus for this process.
    ///
    /// # Errors
    ///
    /// [`IpcError::Service`] when the underlying shared-memory runtime
    /// cannot be created (typically a permissions or resource problem).
    pub fn new() -> Result<Self, IpcError> {
        let node = NodeBuilder::new()
            .create::<ipc::Service>()
            .map_err(|e| IpcError::Service(format!("failed to create bus node: {e:?}")))?;
        tracing::debug!("shared-memory bus ready");
        Ok(Self { node })
    }

    /// Open (or create) one pub/sub service carrying byte slices.
    ///
    /// `queue_depth` bounds how many unread samples a subscriber may hold;
    /// history is always 0.
    fn open_service(
        &self,
        name: &str,
        queue_depth: usize,
    ) -> Result<PortFactory<ipc::Service, [u8], ()>, IpcError> {
        let service_name = ServiceName::new(name)
            .map_err(|e| IpcError::Service(format!("invalid service name '{name}': {e:?}")))?;
        self.node
            .service_builder(&service_name)
            .publish_subscribe::<[u8]>()
            .max_publishers(2)
            .max_subscribers(2)
            .history_size(0)
            .subscriber_max_buffer_size(queue_depth)
            .open_or_create()
            .map_err(|e| IpcError::Service(format!("failed to open service '{name}': {e:?}")))
    }
}

/// Configuration for one worker link.
#[derive(Debug, Clone)]
pub struct WorkerLinkConfig {
    /// Ceiling for a single framed record.
    pub max_message_bytes: usize,
    /// Unread samples a subscriber may buffer before the publisher blocks
    /// allocating new ones.
    pub queue_depth: usize,
}

impl Default for WorkerLinkConfig {
    fn default() -> Self {
        Self { max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES, queue_depth: 64 }
    }
}

/// The scheduler's end of one out-of-process node: a publisher feeding the
/// worker and a subscriber draining its outputs.
pub struct WorkerLink {
    session_id: String,
    node_id: String,
    max_message_bytes: usize,
    // Port factories must outlive their ports or the services are torn down.
    _in_service: PortFactory<ipc::Service, [u8], ()>,
    _out_service: PortFactory<ipc::Service, [u8], ()>,
    publisher: Publisher<ipc::Service, [u8], ()>,
    subscriber: Subscriber<ipc::Service, [u8], ()>,
}

impl WorkerLink {
    /// Create both services for `(session_id, node_id)` and attach ports.
    ///
    /// The output subscriber is attached before the input publisher so the
    /// at-most-once bus cannot drop the worker's first replies.
    ///
    /// # Errors
    ///
    /// [`IpcError::Service`] if either service or port cannot be created.
    pub fn connect(
        bus: &IpcBus,
        session_id: &str,
        node_id: &str,
        config: &WorkerLinkConfig,
    ) -> Result<Self, IpcError> {
        let out_name = output_service_name(session_id, node_id);
        let out_service = bus.open_service(&out_name, config.queue_depth)?;
        let subscriber = out_service
            .subscriber_builder()
            .buffer_size(config.queue_depth)
            .create()
            .map_err(|e| {
                IpcError::Service(format!("failed to create subscriber on '{out_name}': {e:?}"))
            })?;

        let in_name = input_service_name(session_id, node_id);
        let in_service = bus.open_service(&in_name, config.queue_depth)?;
        let publisher = in_service
            .publisher_builder()
            .initial_max_slice_len(config.max_message_bytes)
            .allocation_strategy(AllocationStrategy::PowerOfTwo)
            .create()
            .map_err(|e| {
                IpcError::Service(format!("failed to create publisher on '{in_name}': {e:?}"))
            })?;

        tracing::info!(session = session_id, node = node_id, "worker link connected");

        Ok(Self {
            session_id: session_id.to_string(),
            node_id: node_id.to_string(),
            max_message_bytes: config.max_message_bytes,
            _in_service: in_service,
            _out_service: out_service,
            publisher,
            subscriber,
        })
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Frame and publish one buffer to the worker.
    ///
    /// The record header carries the buffer's own timestamp when it has
    /// one (video frames), so presentation time survives the trip; other
    /// variants are stamped with the publish time.
    ///
    /// # Errors
    ///
    /// [`IpcError::Unsupported`] for buffers outside the wire ABI or over
    /// the size ceiling; [`IpcError::Service`] when the bus rejects the
    /// sample.
    pub fn publish(&self, buffer: &Buffer) -> Result<(), IpcError> {
        let timestamp_ns = crate::frame::buffer_timestamp_ns(buffer).unwrap_or_else(now_ns);
        let frame = WireFrame::new(self.session_id.clone(), timestamp_ns, buffer.clone());
        let bytes = encode(&frame)?;
        if bytes.len() > self.max_message_bytes {
            return Err(IpcError::Unsupported(format!(
                "message is {} bytes, link ceiling is {}",
                bytes.len(),
                self.max_message_bytes
            )));
        }

        let sample = self.publisher.loan_slice_uninit(bytes.len()).map_err(|e| {
            IpcError::Service(format!("failed to loan {} bytes: {e:?}", bytes.len()))
        })?;
        let sample = sample.write_from_slice(&bytes);
        sample
            .send()
            .map_err(|e| IpcError::Service(format!("failed to send sample: {e:?}")))?;

        tracing::trace!(node = %self.node_id, bytes = bytes.len(), "published to worker");
        Ok(())
    }

    /// Non-blocking poll for one worker output.
    ///
    /// The payload is copied out of the loaned sample before it is
    /// released back to the bus.
    ///
    /// # Errors
    ///
    /// [`IpcError::Service`] on a bus receive failure, [`IpcError::InvalidFrame`]
    /// if the sample does not decode.
    pub fn try_receive(&self) -> Result<Option<WireFrame>, IpcError> {
        match self.subscriber.receive() {
            Ok(Some(sample)) => {
                let frame = decode(sample.payload())?;
                if frame.session_id != self.session_id {
                    return Err(IpcError::InvalidFrame(format!(
                        "sample for session '{}' arrived on link for '{}'",
                        frame.session_id, self.session_id
                    )));
                }
                Ok(Some(frame))
            },
            Ok(None) => Ok(None),
            Err(e) => Err(IpcError::Service(format!("receive failed: {e:?}"))),
        }
    }

    /// Await the next worker output, polling the bus.
    ///
    /// Returns `None` when `deadline` elapses with no sample; the caller
    /// decides whether that is a timeout error.
    ///
    /// # Errors
    ///
    /// Propagates [`Self::try_receive`] failures.
    pub async fn receive(&mut self, deadline: Duration) -> Result<Option<WireFrame>, IpcError> {
        let start = std::time::Instant::now();
        loop {
            if let Some(frame) = self.try_receive()? {
                return Ok(Some(frame));
            }
            if start.elapsed() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_names_embed_session_and_node() {
        assert_eq!(input_service_name("s1", "vad"), "mediaflux/s1/vad/in");
        assert_eq!(output_service_name("s1", "vad"), "mediaflux/s1/vad/out");
        // Distinct sessions never share a service.
        assert_ne!(input_service_name("s1", "vad"), input_service_name("s2", "vad"));
    }
}
