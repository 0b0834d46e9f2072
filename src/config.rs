//! Channel configuration and builder.
//!
//! [`ChannelConfig`] holds the few settings a channel needs. It is usually
//! assembled through [`ChannelBuilder`], obtained from
//! [`ManagementChannel::builder`](crate::ManagementChannel::builder).

use std::sync::Arc;

use crate::{
    channel::ManagementChannel,
    handler::OperationHandler,
    protocol::PROTOCOL_VERSION,
    transport::MessageTransport,
};

/// Default channel name used in logs and errors.
pub const DEFAULT_NAME: &str = "management";
/// Default bound on inbound messages processed concurrently.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 64;

/// Settings for one [`ManagementChannel`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelConfig {
    name: String,
    protocol_version: u32,
    max_in_flight: usize,
}

impl ChannelConfig {
    /// Name used in logs and errors.
    #[must_use]
    pub fn name(&self) -> &str { &self.name }

    /// Highest protocol version this side speaks.
    #[must_use]
    pub fn protocol_version(&self) -> u32 { self.protocol_version }

    /// Maximum inbound messages processed at once by
    /// [`ManagementChannel::serve`].
    #[must_use]
    pub fn max_in_flight(&self) -> usize { self.max_in_flight }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_owned(),
            protocol_version: PROTOCOL_VERSION,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

/// Builder for [`ManagementChannel`].
///
/// # Examples
///
/// ```
/// use muxframe::{ManagementChannel, transport::MemoryTransport};
///
/// let (transport, _inbound) = MemoryTransport::channel(8);
/// let channel = ManagementChannel::builder()
///     .name("host-controller")
///     .max_in_flight(4)
///     .build(transport);
/// assert_eq!(channel.name(), "host-controller");
/// ```
#[derive(Default)]
#[must_use]
pub struct ChannelBuilder {
    config: ChannelConfig,
    operation_handler: Option<Arc<dyn OperationHandler>>,
}

impl ChannelBuilder {
    /// Start from the default configuration.
    pub fn new() -> Self { Self::default() }

    /// Set the channel name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Set the highest protocol version this side speaks.
    pub fn protocol_version(mut self, version: u32) -> Self {
        self.config.protocol_version = version;
        self
    }

    /// Bound the inbound messages processed at once. Values below one are
    /// raised to one.
    pub fn max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.config.max_in_flight = max_in_flight.max(1);
        self
    }

    /// Install `handler` before the channel is handed out.
    pub fn operation_handler(mut self, handler: Arc<dyn OperationHandler>) -> Self {
        self.operation_handler = Some(handler);
        self
    }

    /// Configuration assembled so far.
    #[must_use]
    pub fn config(&self) -> &ChannelConfig { &self.config }

    /// Build a channel sending through `transport`.
    pub fn build<T: MessageTransport>(self, transport: T) -> ManagementChannel {
        self.build_shared(Arc::new(transport))
    }

    /// Build a channel sending through a shared transport.
    pub fn build_shared(self, transport: Arc<dyn MessageTransport>) -> ManagementChannel {
        let channel = ManagementChannel::from_parts(self.config, transport);
        if let Some(handler) = self.operation_handler {
            channel.set_operation_handler(handler);
        }
        channel
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn defaults() {
        let config = ChannelConfig::default();
        assert_eq!(config.name(), DEFAULT_NAME);
        assert_eq!(config.protocol_version(), PROTOCOL_VERSION);
        assert_eq!(config.max_in_flight(), DEFAULT_MAX_IN_FLIGHT);
    }

    #[rstest]
    #[case(0, 1)]
    #[case(1, 1)]
    #[case(16, 16)]
    fn max_in_flight_is_at_least_one(#[case] requested: usize, #[case] expected: usize) {
        let builder = ChannelBuilder::new().max_in_flight(requested);
        assert_eq!(builder.config().max_in_flight(), expected);
    }

    #[test]
    fn builder_overrides_version_and_name() {
        let builder = ChannelBuilder::new().name("domain").protocol_version(3);
        assert_eq!(builder.config().name(), "domain");
        assert_eq!(builder.config().protocol_version(), 3);
    }
}
