//! Session pulling one data stream from a remote device.

use crate::protocol::Protocol;
use crate::transport::{PubSubTransport, TransportError};
use eaip_proto::{status_state, DeviceState};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug, Default)]
struct Session {
    /// `None` until the first status message arrives.
    state: Option<DeviceState>,
    buffer: VecDeque<String>,
}

/// Request session for one `(device, data id)` pair.
///
/// The session follows the target's status and buffers received values.
/// Start and stop requests are refused only once the target reported
/// itself as anything but `ONLINE`; before the first status they are sent.
///
/// Sessions on the same device share one status subscription of their
/// [`Protocol`]. The data subscription, and the status subscription once
/// its last session leaves, are removed by [`close`](Self::close) or,
/// failing that, when the session is dropped.
pub struct DataRequester<'p, T: PubSubTransport> {
    protocol: &'p Protocol<T>,
    device_id: String,
    data_id: String,
    session: Arc<Mutex<Session>>,
    status_watch: u64,
    closed: bool,
}

impl<'p, T: PubSubTransport> DataRequester<'p, T> {
    /// Subscribe to status and data of the target device.
    ///
    /// # Errors
    ///
    /// Returns error if either subscription fails; no subscription is left
    /// behind in that case.
    pub fn new(
        protocol: &'p Protocol<T>,
        device_id: &str,
        data_id: &str,
    ) -> Result<Self, RequestError> {
        let session = Arc::new(Mutex::new(Session::default()));

        let status_session = Arc::clone(&session);
        let status_watch = protocol.watch_status(
            device_id,
            Arc::new(move |topic: &str, message: &str| {
                let state = match status_state(message) {
                    Some(DeviceState::Online) => DeviceState::Online,
                    _ => DeviceState::Offline,
                };
                tracing::debug!(topic, %state, "Target status changed");
                status_session.lock().state = Some(state);
            }),
        )?;

        let data_session = Arc::clone(&session);
        let subscribed =
            protocol.subscribe_data(device_id, data_id, move |_: &str, message: &str| {
                data_session.lock().buffer.push_back(message.to_string());
            });
        if let Err(e) = subscribed {
            if let Err(cleanup) = protocol.unwatch_status(device_id, status_watch) {
                tracing::warn!(
                    error = %cleanup,
                    device_id,
                    "Failed to roll back status subscription"
                );
            }
            return Err(e.into());
        }

        tracing::info!(device_id, data_id, "Data request session opened");

        Ok(Self {
            protocol,
            device_id: device_id.to_string(),
            data_id: data_id.to_string(),
            session,
            status_watch,
            closed: false,
        })
    }

    /// Target device id.
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Requested data id.
    #[must_use]
    pub fn data_id(&self) -> &str {
        &self.data_id
    }

    /// Last observed state of the target, `None` if unknown.
    #[must_use]
    pub fn device_state(&self) -> Option<DeviceState> {
        self.session.lock().state
    }

    /// Number of buffered values.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.session.lock().buffer.len()
    }

    /// Ask the target to start sending data.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::DeviceUnavailable`] if the target is known to
    /// be offline, or a transport error if publishing fails.
    pub fn start(&self) -> Result<(), RequestError> {
        self.ensure_available()?;
        self.protocol.publish_start(&self.device_id, &self.data_id)?;
        Ok(())
    }

    /// Ask the target to stop sending data.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::DeviceUnavailable`] if the target is known to
    /// be offline, or a transport error if publishing fails.
    pub fn stop(&self) -> Result<(), RequestError> {
        self.ensure_available()?;
        self.protocol.publish_stop(&self.device_id, &self.data_id)?;
        Ok(())
    }

    /// Take the oldest buffered value, if any.
    #[must_use]
    pub fn get_data(&self) -> Option<String> {
        self.session.lock().buffer.pop_front()
    }

    /// Leave the status subscription and remove the data subscription.
    ///
    /// # Errors
    ///
    /// Returns the first unsubscribe error; both unsubscribes are attempted.
    pub fn close(mut self) -> Result<(), RequestError> {
        self.release()
    }

    fn ensure_available(&self) -> Result<(), RequestError> {
        if self.device_state() == Some(DeviceState::Offline) {
            return Err(RequestError::DeviceUnavailable {
                device_id: self.device_id.clone(),
            });
        }
        Ok(())
    }

    fn release(&mut self) -> Result<(), RequestError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let status = self
            .protocol
            .unwatch_status(&self.device_id, self.status_watch);
        let data = self
            .protocol
            .unsubscribe_data(&self.device_id, &self.data_id);

        tracing::info!(
            device_id = %self.device_id,
            data_id = %self.data_id,
            "Data request session closed"
        );

        status.and(data).map_err(RequestError::from)
    }
}

impl<T: PubSubTransport> Drop for DataRequester<'_, T> {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!(
                error = %e,
                device_id = %self.device_id,
                "Failed to release data request session"
            );
        }
    }
}

/// Errors of a data request session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    /// Target reported itself offline
    #[error("device unavailable: {device_id}")]
    DeviceUnavailable {
        /// Target device id
        device_id: String,
    },
    /// Transport rejected an operation
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryBroker, MemoryTransport};
    use eaip_proto::{DeviceType, StatusMessage};

    const STATUS_TOPIC: &str = "eaip://test/node/STATUS";
    const DATA_TOPIC: &str = "eaip://test/node/DATA/temp";
    const START_TOPIC: &str = "eaip://test/node/START/temp";

    fn app(broker: &MemoryBroker) -> Protocol<MemoryTransport> {
        Protocol::new(broker.connect("app"), DeviceType::Application, "eaip://test")
    }

    fn status(state: DeviceState) -> String {
        StatusMessage::new("node", DeviceType::Node, state).encode()
    }

    #[test]
    fn unknown_state_is_permissive() {
        let broker = MemoryBroker::new();
        let app = app(&broker);
        let requester = DataRequester::new(&app, "node", "temp").unwrap();

        assert_eq!(requester.device_state(), None);
        requester.start().unwrap();
        requester.stop().unwrap();
        assert_eq!(broker.published_to(START_TOPIC), vec!["eaip://test/app"]);
    }

    #[test]
    fn offline_then_online_gates_start() {
        let broker = MemoryBroker::new();
        let app = app(&broker);
        let requester = DataRequester::new(&app, "node", "temp").unwrap();

        broker.inject(STATUS_TOPIC, &status(DeviceState::Offline));
        assert_eq!(
            requester.start(),
            Err(RequestError::DeviceUnavailable {
                device_id: "node".to_string()
            })
        );
        assert!(matches!(
            requester.stop(),
            Err(RequestError::DeviceUnavailable { .. })
        ));
        assert!(broker.published_to(START_TOPIC).is_empty());

        broker.inject(STATUS_TOPIC, &status(DeviceState::Online));
        requester.start().unwrap();
        assert_eq!(broker.published_to(START_TOPIC), vec!["eaip://test/app"]);
    }

    #[test]
    fn unexpected_status_counts_as_offline() {
        let broker = MemoryBroker::new();
        let app = app(&broker);
        let requester = DataRequester::new(&app, "node", "temp").unwrap();

        broker.inject(STATUS_TOPIC, "ID:node;TYPE:NODE;");
        assert_eq!(requester.device_state(), Some(DeviceState::Offline));

        broker.inject(STATUS_TOPIC, "ID:node;STATE:online;");
        assert_eq!(requester.device_state(), Some(DeviceState::Offline));
    }

    #[test]
    fn retained_status_is_seen_on_open() {
        let broker = MemoryBroker::new();
        let node = broker.connect("node");
        node.publish(STATUS_TOPIC, &status(DeviceState::Offline), true)
            .unwrap();

        let app = app(&broker);
        let requester = DataRequester::new(&app, "node", "temp").unwrap();
        assert_eq!(requester.device_state(), Some(DeviceState::Offline));
    }

    #[test]
    fn data_is_buffered_fifo() {
        let broker = MemoryBroker::new();
        let app = app(&broker);
        let requester = DataRequester::new(&app, "node", "temp").unwrap();

        assert_eq!(requester.get_data(), None);

        broker.inject(DATA_TOPIC, "1");
        broker.inject(DATA_TOPIC, "2");
        broker.inject("eaip://test/node/DATA/other", "x");
        assert_eq!(requester.pending(), 2);

        assert_eq!(requester.get_data().as_deref(), Some("1"));
        assert_eq!(requester.get_data().as_deref(), Some("2"));
        assert_eq!(requester.get_data(), None);
    }

    #[test]
    fn close_and_drop_unsubscribe() {
        let broker = MemoryBroker::new();
        let app = app(&broker);

        let requester = DataRequester::new(&app, "node", "temp").unwrap();
        assert_eq!(app.transport().registry().len(), 2);
        requester.close().unwrap();
        assert!(app.transport().registry().is_empty());

        {
            let _requester = DataRequester::new(&app, "node", "temp").unwrap();
            assert_eq!(app.transport().registry().len(), 2);
        }
        assert!(app.transport().registry().is_empty());
    }

    #[test]
    fn sessions_on_one_device_share_status() {
        let broker = MemoryBroker::new();
        let app = app(&broker);
        let temp = DataRequester::new(&app, "node", "temp").unwrap();
        let humidity = DataRequester::new(&app, "node", "humidity").unwrap();

        broker.inject(STATUS_TOPIC, &status(DeviceState::Offline));
        assert_eq!(temp.device_state(), Some(DeviceState::Offline));
        assert_eq!(humidity.device_state(), Some(DeviceState::Offline));

        humidity.close().unwrap();
        assert_eq!(app.transport().registry().filters(), vec![STATUS_TOPIC, DATA_TOPIC]);
        assert!(matches!(
            temp.start(),
            Err(RequestError::DeviceUnavailable { .. })
        ));

        broker.inject(STATUS_TOPIC, &status(DeviceState::Online));
        temp.start().unwrap();

        let late = DataRequester::new(&app, "node", "pressure").unwrap();
        assert_eq!(late.device_state(), Some(DeviceState::Online));

        late.close().unwrap();
        temp.close().unwrap();
        assert!(app.transport().registry().is_empty());
    }

    #[test]
    fn failed_open_leaves_no_subscription() {
        let broker = MemoryBroker::new();
        let app = app(&broker);
        broker.set_offline(true);

        let result = DataRequester::new(&app, "node", "temp");
        assert!(matches!(
            result,
            Err(RequestError::Transport(TransportError::Subscribe(_)))
        ));
        assert!(app.transport().registry().is_empty());
    }

    #[test]
    fn publish_failure_is_reported() {
        let broker = MemoryBroker::new();
        let app = app(&broker);
        let requester = DataRequester::new(&app, "node", "temp").unwrap();

        broker.set_offline(true);
        assert!(matches!(
            requester.start(),
            Err(RequestError::Transport(TransportError::Publish(_)))
        ));
        broker.set_offline(false);
    }
}
