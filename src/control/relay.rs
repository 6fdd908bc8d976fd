//! Fire-and-forget UDP relay for control packets

use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::UdpSocket;
use tracing::{debug, info};

use super::packet::{PacketCodec, ProtocolVariant};
use crate::config::ControlConfig;
use crate::error::{AppError, Result};
use crate::input::InputSample;
use crate::utils::{bind_udp_socket, LogThrottler};

/// Relay counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RelayStats {
    /// Packets handed to the socket
    pub sent: u64,
    /// Packets lost to a transport error
    pub dropped: u64,
    /// Samples refused before encoding
    pub rejected: u64,
}

#[derive(Default)]
struct Counters {
    sent: AtomicU64,
    dropped: AtomicU64,
    rejected: AtomicU64,
}

/// Encodes input samples and sends them to the remote receiver
///
/// Every send is attempted exactly once. Transport errors drop the packet.
pub struct ControlRelay {
    socket: UdpSocket,
    target: SocketAddr,
    codec: &'static dyn PacketCodec,
    counters: Counters,
    throttler: LogThrottler,
}

impl ControlRelay {
    /// Bind the local socket and resolve the receiver from config
    pub async fn from_config(config: &ControlConfig) -> Result<Self> {
        let target = resolve_target(&config.remote_host, config.remote_port).await?;
        let socket = bind_udp_socket(config.bind_addr()?)?;
        let socket = UdpSocket::from_std(socket)?;

        info!(
            "Control relay {} -> {} ({} layout)",
            socket.local_addr()?,
            target,
            config.variant
        );

        Ok(Self::with_socket(socket, target, config.variant))
    }

    pub fn with_socket(socket: UdpSocket, target: SocketAddr, variant: ProtocolVariant) -> Self {
        Self {
            socket,
            target,
            codec: variant.codec(),
            counters: Counters::default(),
            throttler: LogThrottler::default(),
        }
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    pub fn variant(&self) -> ProtocolVariant {
        self.codec.variant()
    }

    /// Validate, encode and send one sample to the configured receiver
    ///
    /// Returns `Err` only when the sample itself is rejected; transport
    /// failures are swallowed.
    pub fn send(&self, sample: &InputSample) -> Result<()> {
        if let Err(e) = self.codec.validate(sample) {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            crate::warn_throttled!(self.throttler, "reject", "Rejected input sample: {}", e);
            return Err(e);
        }

        let packet = self.codec.encode(sample);
        self.send_to(&packet, self.target);
        Ok(())
    }

    /// Send a raw packet, dropping it on any transport error
    ///
    /// Never waits for the socket: a full send buffer drops the packet too.
    pub fn send_to(&self, packet: &[u8], destination: SocketAddr) {
        match self.socket.try_send_to(packet, destination) {
            Ok(_) => {
                self.counters.sent.fetch_add(1, Ordering::Relaxed);
                self.throttler.clear("send");
            }
            Err(e) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                crate::warn_throttled!(
                    self.throttler,
                    "send",
                    "Dropped control packet to {}: {}",
                    destination,
                    e
                );
            }
        }
    }

    /// Send a neutral sample for `player` so the receiver does not latch input
    pub fn release(&self, player: u8) {
        debug!("Releasing input for player {}", player);
        if self.send(&InputSample::neutral(player)).is_err() {
            debug!("Release skipped for invalid player {}", player);
        }
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            sent: self.counters.sent.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
        }
    }
}

async fn resolve_target(host: &str, port: u16) -> Result<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| AppError::Config(format!("Cannot resolve {}:{}: {}", host, port, e)))?
        .next()
        .ok_or_else(|| AppError::Config(format!("No address for {}:{}", host, port)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn relay_pair(variant: ProtocolVariant) -> (ControlRelay, UdpSocket) {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let relay = ControlRelay::with_socket(socket, receiver.local_addr().unwrap(), variant);
        (relay, receiver)
    }

    async fn recv(receiver: &UdpSocket) -> Vec<u8> {
        let mut buf = [0u8; 64];
        let (n, _) = tokio::time::timeout(Duration::from_secs(2), receiver.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        buf[..n].to_vec()
    }

    #[tokio::test]
    async fn test_send_single() {
        let (relay, receiver) = relay_pair(ProtocolVariant::SinglePlayer).await;
        let sample = InputSample {
            player: 1,
            buttons: 0b101,
            lx: 128,
            ly: 0,
            rx: 255,
            ry: 64,
        };
        relay.send(&sample).unwrap();
        assert_eq!(
            recv(&receiver).await,
            [0x05, 0x00, 0x08, 0x80, 0x00, 0xFF, 0x40]
        );
        assert_eq!(relay.stats().sent, 1);
    }

    #[tokio::test]
    async fn test_order_preserved_and_release() {
        let (relay, receiver) = relay_pair(ProtocolVariant::MultiPlayer).await;
        for buttons in 1..=3u16 {
            let mut sample = InputSample::neutral(2);
            sample.buttons = buttons;
            relay.send(&sample).unwrap();
        }
        relay.release(2);

        for buttons in 1..=3u8 {
            let packet = recv(&receiver).await;
            assert_eq!(packet[0], 2);
            assert_eq!(packet[1], buttons);
        }
        assert_eq!(
            recv(&receiver).await,
            [0x02, 0x00, 0x00, 0x08, 0x80, 0x80, 0x80, 0x80]
        );
        assert_eq!(relay.stats().sent, 4);
    }

    #[tokio::test]
    async fn test_invalid_player_rejected() {
        let (relay, _receiver) = relay_pair(ProtocolVariant::MultiPlayer).await;
        assert!(relay.send(&InputSample::neutral(3)).is_err());
        let stats = relay.stats();
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.sent, 0);
    }

    #[tokio::test]
    async fn test_transport_error_swallowed() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        // IPv6 destination from an IPv4 socket fails at send time
        let target: SocketAddr = "[::1]:4210".parse().unwrap();
        let relay = ControlRelay::with_socket(socket, target, ProtocolVariant::SinglePlayer);
        relay.send(&InputSample::neutral(1)).unwrap();
        let stats = relay.stats();
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.sent, 0);
    }

    #[tokio::test]
    async fn test_backlog_drops_instead_of_waiting() {
        let (relay, _receiver) = relay_pair(ProtocolVariant::MultiPlayer).await;
        let sample = InputSample::neutral(1);

        // Nobody reads; every call still returns at once
        let start = std::time::Instant::now();
        for _ in 0..20_000 {
            relay.send(&sample).unwrap();
        }
        assert!(start.elapsed() < Duration::from_secs(2));

        let stats = relay.stats();
        assert_eq!(stats.sent + stats.dropped, 20_000);
    }
}
