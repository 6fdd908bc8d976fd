//! Utility modules shared by the media sources, the relay and the web layer

pub mod net;
pub mod throttle;

pub use net::{bind_tcp_listener, bind_udp_socket};
pub use throttle::LogThrottler;
