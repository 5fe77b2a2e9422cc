//! Domain model for the channel catalog.
//!
//! # Purpose
//! Defines the catalog entities (channels, streams, groups, logos, profiles)
//! and the channel-number value type shared by the store backends, the
//! allocator, and the provisioner.
mod channel;
mod group;
mod logo;
mod number;
mod profile;
mod stream;

pub use channel::Channel;
pub use group::ChannelGroup;
pub use logo::Logo;
pub use number::{ChannelNumber, InvalidNumber};
pub use profile::{ChannelProfile, ProfileMembership};
pub use stream::{NewStream, Stream};
