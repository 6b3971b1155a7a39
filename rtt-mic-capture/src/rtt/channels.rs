//! RTT channel discovery
//!
//! Descriptors are only used for operator diagnostics and for resolving a
//! channel by name; nothing here is allowed to abort a capture.

use crate::error::Result;
use crate::probe::{ChannelDescriptor, ChannelDirection, RttTransport};
use tracing::{debug, info, warn};

/// List every buffer in `direction`, in index order
pub fn list_channels<T: RttTransport + ?Sized>(
    transport: &mut T,
    direction: ChannelDirection,
) -> Result<Vec<ChannelDescriptor>> {
    let count = match direction {
        ChannelDirection::Up => transport.up_channel_count()?,
        ChannelDirection::Down => transport.down_channel_count()?,
    };
    debug!("Querying {} {} channel descriptors", count, direction);

    (0..count)
        .map(|index| transport.channel_descriptor(direction, index))
        .collect()
}

/// Log up and down channels. Returns the up channels that could be listed,
/// or an empty list when discovery failed.
pub fn log_channels<T: RttTransport + ?Sized>(transport: &mut T) -> Vec<ChannelDescriptor> {
    let mut up_channels = Vec::new();

    for direction in [ChannelDirection::Up, ChannelDirection::Down] {
        match list_channels(transport, direction) {
            Ok(channels) => {
                info!("{} channels:", direction);
                for channel in &channels {
                    info!("    {}: name = {:?}, size = {} bytes, flags = {}",
                          channel.index, channel.name, channel.size, channel.flags);
                }
                if direction == ChannelDirection::Up {
                    up_channels = channels;
                }
            }
            Err(e) => warn!("Could not list {} channels: {}", direction, e),
        }
    }

    up_channels
}

/// Pick the up channel to capture from.
///
/// A channel whose name equals `name` wins; without a name, or when no
/// descriptor matches, `fallback` is used.
pub fn resolve_up_channel(
    channels: &[ChannelDescriptor],
    name: Option<&str>,
    fallback: usize,
) -> usize {
    let Some(name) = name else {
        return fallback;
    };
    match channels.iter().find(|c| c.name == name) {
        Some(channel) => {
            info!("Using up channel {} ({:?})", channel.index, channel.name);
            channel.index
        }
        None => {
            warn!("No up channel named {:?}, using index {}", name, fallback);
            fallback
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CaptureError;

    struct FixedChannels {
        up: Vec<&'static str>,
        down: Vec<&'static str>,
        broken_index: Option<usize>,
    }

    impl RttTransport for FixedChannels {
        fn start_rtt(&mut self) -> Result<()> { Ok(()) }
        fn up_channel_count(&mut self) -> Result<usize> { Ok(self.up.len()) }
        fn down_channel_count(&mut self) -> Result<usize> { Ok(self.down.len()) }
        fn channel_descriptor(&mut self, direction: ChannelDirection, index: usize) -> Result<ChannelDescriptor> {
            if self.broken_index == Some(index) {
                return Err(CaptureError::ChannelNotFound(index.to_string()));
            }
            let names = match direction {
                ChannelDirection::Up => &self.up,
                ChannelDirection::Down => &self.down,
            };
            Ok(ChannelDescriptor {
                index,
                name: names[index].to_string(),
                size: 1024,
                flags: 2,
                direction,
            })
        }
        fn read_up(&mut self, _: usize, _: &mut [u8]) -> Result<usize> { Ok(0) }
        fn is_connected(&mut self) -> bool { true }
        fn close(&mut self) {}
    }

    #[test]
    fn test_list_channels_in_index_order() {
        let mut transport = FixedChannels {
            up: vec!["Terminal", "ZSW_MIC"],
            down: vec!["Terminal"],
            broken_index: None,
        };
        let up = list_channels(&mut transport, ChannelDirection::Up).unwrap();
        assert_eq!(up.len(), 2);
        assert_eq!(up[1].index, 1);
        assert_eq!(up[1].name, "ZSW_MIC");

        let down = list_channels(&mut transport, ChannelDirection::Down).unwrap();
        assert_eq!(down[0].direction, ChannelDirection::Down);
    }

    #[test]
    fn test_log_channels_swallows_errors() {
        let mut transport = FixedChannels {
            up: vec!["Terminal", "ZSW_MIC"],
            down: vec![],
            broken_index: Some(1),
        };
        assert!(log_channels(&mut transport).is_empty());
    }

    #[test]
    fn test_resolve_by_name_with_fallback() {
        let mut transport = FixedChannels {
            up: vec!["Terminal", "Logger", "ZSW_MIC"],
            down: vec![],
            broken_index: None,
        };
        let up = log_channels(&mut transport);
        assert_eq!(resolve_up_channel(&up, Some("ZSW_MIC"), 1), 2);
        assert_eq!(resolve_up_channel(&up, Some("missing"), 1), 1);
        assert_eq!(resolve_up_channel(&up, None, 1), 1);
        assert_eq!(resolve_up_channel(&[], Some("ZSW_MIC"), 1), 1);
    }
}
