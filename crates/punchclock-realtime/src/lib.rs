//! Realtime side of the core: the in-process event bus, the channel adapter
//! that turns hosted change notifications into domain events, and the
//! reconnect policy that keeps those channels alive.

pub mod adapter;
pub mod bus;
pub mod channel;
pub mod classify;
pub mod reconnect;
pub mod socket;

pub use adapter::RealtimeChannelAdapter;
pub use bus::{EventBus, ListenerToken, Subscription};
pub use channel::{
    ChannelHandle, ChannelMessage, ChannelScope, ChannelSpec, ChannelState, OpenChannel,
    RealtimeBackend, RealtimeError,
};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use socket::SocketBackend;
