//! Control path: packet layouts, the UDP relay to the remote receiver and
//! the per-viewer control session

pub mod packet;
pub mod relay;
pub mod session;

pub use packet::{
    MultiPlayerCodec, PacketCodec, ProtocolVariant, SinglePlayerCodec, FORMAT_MARKER,
};
pub use relay::{ControlRelay, RelayStats};
pub use session::{ClientMessage, ControlSession, RemapRegistry, RemapStatus, ServerMessage};
