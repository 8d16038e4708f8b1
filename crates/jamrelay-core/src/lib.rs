//! jamrelay-core: wire protocol and data model shared by the relay server,
//! the store and the client tools. No IO lives here.

pub mod error;
pub mod protocol;
pub mod types;

pub use error::ProtocolError;
pub use protocol::{ChannelSwitch, Message, NewEstimation, decode};
pub use types::{ChannelQuality, NodeChannelAssignment, StoreSnapshot};
