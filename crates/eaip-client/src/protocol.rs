//! Protocol facade over a pub/sub transport.

use crate::registry;
use crate::transport::{Handler, PubSubTransport, TransportError};
use eaip_proto::topics::trim_slashes;
use eaip_proto::{Channel, DeviceState, DeviceType, StatusMessage, TopicScheme};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Watchers sharing the status subscription of one device.
#[derive(Default)]
struct StatusWatchers {
    watchers: Vec<(u64, Handler)>,
    /// Last `(topic, payload)` seen, replayed to late watchers.
    last: Option<(String, String)>,
}

impl StatusWatchers {
    fn deliver(shared: &Mutex<Self>, topic: &str, payload: &str) {
        let watchers: Vec<Handler> = {
            let mut shared = shared.lock();
            shared.last = Some((topic.to_string(), payload.to_string()));
            shared
                .watchers
                .iter()
                .map(|(_, handler)| Arc::clone(handler))
                .collect()
        };

        for handler in &watchers {
            registry::invoke(handler, topic, payload);
        }
    }
}

/// elastic-AI protocol endpoint of the local device.
///
/// Requests (`START`, `STOP`, `DO`) are published into the target device's
/// namespace and received under the local one. Status, data and command
/// results are published under the producer and subscribed by naming it.
pub struct Protocol<T> {
    transport: T,
    scheme: TopicScheme,
    device_id: String,
    device_type: DeviceType,
    status_watches: Mutex<HashMap<String, Arc<Mutex<StatusWatchers>>>>,
    next_watch: AtomicU64,
}

impl<T: PubSubTransport> Protocol<T> {
    /// Create a protocol endpoint.
    ///
    /// The device id is taken from the transport's client id.
    #[must_use]
    pub fn new(transport: T, device_type: DeviceType, base_url: &str) -> Self {
        let device_id = transport.client_id().to_string();
        Self {
            transport,
            scheme: TopicScheme::new(base_url),
            device_id,
            device_type,
            status_watches: Mutex::new(HashMap::new()),
            next_watch: AtomicU64::new(0),
        }
    }

    /// Id of the local device.
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Type of the local device.
    #[must_use]
    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    /// Topic scheme in use.
    #[must_use]
    pub fn scheme(&self) -> &TopicScheme {
        &self.scheme
    }

    /// Underlying transport.
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Status message of the local device.
    #[must_use]
    pub fn status_message(&self, state: DeviceState, fields: &[(String, String)]) -> StatusMessage {
        StatusMessage {
            device_id: self.device_id.clone(),
            device_type: self.device_type,
            state,
            fields: fields.to_vec(),
        }
    }

    // region PUBLISH

    /// Publish the retained status of the local device.
    ///
    /// # Errors
    ///
    /// Returns error if the transport rejects the message.
    pub fn publish_status(
        &self,
        state: DeviceState,
        fields: &[(String, String)],
    ) -> Result<(), TransportError> {
        let topic = self.scheme.status(&self.device_id);
        let message = self.status_message(state, fields).encode();
        self.publish(&topic, &message, true)
    }

    /// Publish a value of a local data stream.
    ///
    /// # Errors
    ///
    /// Returns error if the transport rejects the message.
    pub fn publish_data(&self, data_id: &str, data: &str) -> Result<(), TransportError> {
        let topic = self
            .scheme
            .topic(&self.device_id, Channel::Data, Some(data_id));
        self.publish(&topic, data, false)
    }

    /// Ask `device_id` to start sending `data_id`.
    ///
    /// # Errors
    ///
    /// Returns error if the transport rejects the message.
    pub fn publish_start(&self, device_id: &str, data_id: &str) -> Result<(), TransportError> {
        let topic = self.scheme.topic(device_id, Channel::Start, Some(data_id));
        let return_address = self.scheme.device_address(&self.device_id);
        self.publish(&topic, &return_address, false)
    }

    /// Ask `device_id` to stop sending `data_id`.
    ///
    /// # Errors
    ///
    /// Returns error if the transport rejects the message.
    pub fn publish_stop(&self, device_id: &str, data_id: &str) -> Result<(), TransportError> {
        let topic = self.scheme.topic(device_id, Channel::Stop, Some(data_id));
        let return_address = self.scheme.device_address(&self.device_id);
        self.publish(&topic, &return_address, false)
    }

    /// Send `command` to `device_id`, with optional settings.
    ///
    /// # Errors
    ///
    /// Returns error if the transport rejects the message.
    pub fn publish_do(
        &self,
        device_id: &str,
        command: &str,
        settings: Option<&str>,
    ) -> Result<(), TransportError> {
        let topic = self.scheme.topic(device_id, Channel::Do, Some(command));
        self.publish(&topic, settings.unwrap_or_default(), false)
    }

    /// Publish the result of `command` under `device_id`.
    ///
    /// # Errors
    ///
    /// Returns error if the transport rejects the message.
    pub fn publish_done(
        &self,
        device_id: &str,
        command: &str,
        result: &str,
    ) -> Result<(), TransportError> {
        let topic = self.scheme.topic(device_id, Channel::Done, Some(command));
        self.publish(&topic, result, false)
    }

    // endregion PUBLISH

    // region SUBSCRIBE

    /// Receive status messages of `device_id`.
    ///
    /// This takes over the subscription that [`DataRequester`] sessions on
    /// the same device share.
    ///
    /// [`DataRequester`]: crate::DataRequester
    ///
    /// # Errors
    ///
    /// Returns error if the transport rejects the subscription.
    pub fn subscribe_status<F>(&self, device_id: &str, handler: F) -> Result<(), TransportError>
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        let topic = self.scheme.status(trim_slashes(device_id));
        self.subscribe(&topic, Arc::new(handler))
    }

    /// Receive values of `data_id` produced by `device_id`.
    ///
    /// # Errors
    ///
    /// Returns error if the transport rejects the subscription.
    pub fn subscribe_data<F>(
        &self,
        device_id: &str,
        data_id: &str,
        handler: F,
    ) -> Result<(), TransportError>
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        let topic = self
            .scheme
            .topic(trim_slashes(device_id), Channel::Data, Some(data_id));
        self.subscribe(&topic, Arc::new(handler))
    }

    /// Receive start requests for the local stream `data_id`.
    ///
    /// The handler payload is the requester's address.
    ///
    /// # Errors
    ///
    /// Returns error if the transport rejects the subscription.
    pub fn subscribe_start<F>(&self, data_id: &str, handler: F) -> Result<(), TransportError>
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        let topic = self
            .scheme
            .topic(&self.device_id, Channel::Start, Some(data_id));
        self.subscribe(&topic, Arc::new(handler))
    }

    /// Receive stop requests for the local stream `data_id`.
    ///
    /// # Errors
    ///
    /// Returns error if the transport rejects the subscription.
    pub fn subscribe_stop<F>(&self, data_id: &str, handler: F) -> Result<(), TransportError>
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        let topic = self
            .scheme
            .topic(&self.device_id, Channel::Stop, Some(data_id));
        self.subscribe(&topic, Arc::new(handler))
    }

    /// Receive `command` requests sent to the local device.
    ///
    /// # Errors
    ///
    /// Returns error if the transport rejects the subscription.
    pub fn subscribe_do<F>(&self, command: &str, handler: F) -> Result<(), TransportError>
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        let topic = self
            .scheme
            .topic(&self.device_id, Channel::Do, Some(command));
        self.subscribe(&topic, Arc::new(handler))
    }

    /// Receive results of `command` executed by `device_id`.
    ///
    /// # Errors
    ///
    /// Returns error if the transport rejects the subscription.
    pub fn subscribe_done<F>(
        &self,
        device_id: &str,
        command: &str,
        handler: F,
    ) -> Result<(), TransportError>
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        let topic = self
            .scheme
            .topic(trim_slashes(device_id), Channel::Done, Some(command));
        self.subscribe(&topic, Arc::new(handler))
    }

    // endregion SUBSCRIBE

    // region UNSUBSCRIBE

    /// Stop receiving status messages of `device_id`.
    ///
    /// # Errors
    ///
    /// Returns error if the filter was not subscribed or the transport
    /// rejects the request.
    pub fn unsubscribe_status(&self, device_id: &str) -> Result<(), TransportError> {
        self.unsubscribe(&self.scheme.status(trim_slashes(device_id)))
    }

    /// Stop receiving values of `data_id` from `device_id`.
    ///
    /// # Errors
    ///
    /// Returns error if the filter was not subscribed or the transport
    /// rejects the request.
    pub fn unsubscribe_data(&self, device_id: &str, data_id: &str) -> Result<(), TransportError> {
        self.unsubscribe(
            &self
                .scheme
                .topic(trim_slashes(device_id), Channel::Data, Some(data_id)),
        )
    }

    /// Stop receiving start requests for `data_id`.
    ///
    /// # Errors
    ///
    /// Returns error if the filter was not subscribed or the transport
    /// rejects the request.
    pub fn unsubscribe_start(&self, data_id: &str) -> Result<(), TransportError> {
        self.unsubscribe(
            &self
                .scheme
                .topic(&self.device_id, Channel::Start, Some(data_id)),
        )
    }

    /// Stop receiving stop requests for `data_id`.
    ///
    /// # Errors
    ///
    /// Returns error if the filter was not subscribed or the transport
    /// rejects the request.
    pub fn unsubscribe_stop(&self, data_id: &str) -> Result<(), TransportError> {
        self.unsubscribe(
            &self
                .scheme
                .topic(&self.device_id, Channel::Stop, Some(data_id)),
        )
    }

    /// Stop receiving `command` requests.
    ///
    /// # Errors
    ///
    /// Returns error if the filter was not subscribed or the transport
    /// rejects the request.
    pub fn unsubscribe_do(&self, command: &str) -> Result<(), TransportError> {
        self.unsubscribe(
            &self
                .scheme
                .topic(&self.device_id, Channel::Do, Some(command)),
        )
    }

    /// Stop receiving results of `command` from `device_id`.
    ///
    /// # Errors
    ///
    /// Returns error if the filter was not subscribed or the transport
    /// rejects the request.
    pub fn unsubscribe_done(&self, device_id: &str, command: &str) -> Result<(), TransportError> {
        self.unsubscribe(
            &self
                .scheme
                .topic(trim_slashes(device_id), Channel::Done, Some(command)),
        )
    }

    // endregion UNSUBSCRIBE

    /// Follow the status of `device_id` through one subscription shared by
    /// every watcher of that device.
    ///
    /// A watcher joining an existing subscription first receives the last
    /// status seen on it. The returned id releases the watcher again.
    pub(crate) fn watch_status(
        &self,
        device_id: &str,
        handler: Handler,
    ) -> Result<u64, TransportError> {
        let device_id = trim_slashes(device_id);
        let watch = self.next_watch.fetch_add(1, Ordering::Relaxed);
        let mut watches = self.status_watches.lock();

        if let Some(shared) = watches.get(device_id) {
            let mut shared = shared.lock();
            if let Some((topic, payload)) = &shared.last {
                registry::invoke(&handler, topic, payload);
            }
            shared.watchers.push((watch, handler));
            tracing::debug!(
                device_id,
                watchers = shared.watchers.len(),
                "Joined status subscription"
            );
            return Ok(watch);
        }

        let shared = Arc::new(Mutex::new(StatusWatchers::default()));
        shared.lock().watchers.push((watch, handler));

        let fan_out = Arc::clone(&shared);
        self.subscribe(
            &self.scheme.status(device_id),
            Arc::new(move |topic: &str, payload: &str| {
                StatusWatchers::deliver(&fan_out, topic, payload);
            }),
        )?;
        watches.insert(device_id.to_string(), shared);

        Ok(watch)
    }

    /// Release a watcher; the last one of a device unsubscribes its status.
    pub(crate) fn unwatch_status(
        &self,
        device_id: &str,
        watch: u64,
    ) -> Result<(), TransportError> {
        let device_id = trim_slashes(device_id);
        let topic = self.scheme.status(device_id);
        let mut watches = self.status_watches.lock();

        let Some(shared) = watches.get(device_id) else {
            return Err(TransportError::NotSubscribed(topic));
        };
        let remaining = {
            let mut shared = shared.lock();
            let Some(position) = shared.watchers.iter().position(|(id, _)| *id == watch)
            else {
                return Err(TransportError::NotSubscribed(topic));
            };
            shared.watchers.remove(position);
            shared.watchers.len()
        };

        if remaining > 0 {
            tracing::debug!(device_id, watchers = remaining, "Left status subscription");
            return Ok(());
        }

        watches.remove(device_id);
        self.unsubscribe(&topic)
    }

    fn publish(&self, topic: &str, payload: &str, retain: bool) -> Result<(), TransportError> {
        tracing::debug!(topic, payload_len = payload.len(), retain, "Publishing");
        self.transport.publish(topic, payload, retain)
    }

    fn subscribe(&self, topic: &str, handler: Handler) -> Result<(), TransportError> {
        tracing::debug!(topic, "Subscribing");
        self.transport.subscribe(topic, handler)
    }

    fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        tracing::debug!(topic, "Unsubscribing");
        self.transport.unsubscribe(topic)
    }
}
