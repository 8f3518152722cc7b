//! One-way UDP telemetry of offset estimates.
//!
//! Every estimate goes out as a single ASCII datagram `ai: <offset>` with
//! six decimals. There is no framing, acknowledgement, sequence number or
//! retry: a lost datagram is simply lost.

use crate::error::{LaneError, LaneResult};
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Largest datagram the listener accepts.
const MAX_DATAGRAM: usize = 1024;

pub fn format_offset(offset: f32) -> String {
    format!("ai: {offset:.6}")
}

/// Resolves `host:port`, preferring an IPv4 address.
pub fn resolve(host: &str, port: u16) -> LaneResult<SocketAddr> {
    let addrs: Vec<SocketAddr> = (host, port).to_socket_addrs()?.collect();
    addrs
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| LaneError::Telemetry(format!("{host}:{port} did not resolve")))
}

/// Sends offset estimates to a fixed target.
#[derive(Debug)]
pub struct TelemetrySender {
    socket: UdpSocket,
    target: SocketAddr,
}

impl TelemetrySender {
    pub fn connect(host: &str, port: u16) -> LaneResult<Self> {
        let target = resolve(host, port)?;
        let local = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(local)?;
        info!("Sending telemetry to {target} from {}", socket.local_addr()?);
        Ok(Self { socket, target })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Sends one estimate and returns the number of bytes written.
    pub fn send(&self, offset: f32) -> LaneResult<usize> {
        let message = format_offset(offset);
        let sent = self.socket.send_to(message.as_bytes(), self.target)?;
        debug!("Sent {message:?} to {}", self.target);
        Ok(sent)
    }
}

/// A decoded datagram, following the robot receiver's conventions.
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryMessage {
    /// `ai:<float>`
    Offset(f32),
    /// `mood:<name>` with one trailing newline removed. A mood sent without
    /// the newline is kept whole rather than losing its last character.
    Mood(String),
    /// Anything else; only the first character matters.
    Command(char),
}

impl TelemetryMessage {
    pub fn parse(datagram: &str) -> LaneResult<Self> {
        if let Some(value) = datagram.strip_prefix("ai:") {
            let offset = value
                .trim()
                .parse::<f32>()
                .map_err(|e| LaneError::Telemetry(format!("bad offset {value:?}: {e}")))?;
            return Ok(Self::Offset(offset));
        }
        if datagram.starts_with("mood:") {
            let mood = datagram.strip_suffix('\n').unwrap_or(datagram);
            return Ok(Self::Mood(mood.to_string()));
        }
        datagram
            .chars()
            .next()
            .map(Self::Command)
            .ok_or_else(|| LaneError::Telemetry("empty datagram".to_string()))
    }
}

/// Differential drive mix the robot derives from an offset estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SteeringMix {
    /// Offset after the fudge factor was subtracted.
    pub ai: f32,
    pub left: f32,
    pub right: f32,
}

impl SteeringMix {
    pub fn from_offset(offset: f32, fudge_factor: f32) -> Self {
        let ai = offset - fudge_factor;
        Self {
            ai,
            left: -1.666 * ai + 0.5,
            right: 1.666 * (ai + 0.3),
        }
    }

    /// The line the receiver logs for each estimate.
    pub fn summary(&self) -> String {
        format!("ai {:.2}, ml {:.2}, mr {:.2}", self.ai, self.left, self.right)
    }
}

/// Receives and decodes telemetry datagrams.
#[derive(Debug)]
pub struct TelemetryListener {
    socket: UdpSocket,
}

impl TelemetryListener {
    pub fn bind(addr: impl ToSocketAddrs) -> LaneResult<Self> {
        let socket = UdpSocket::bind(addr)?;
        info!("Listening for telemetry on {}", socket.local_addr()?);
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> LaneResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn set_timeout(&self, timeout: Option<Duration>) -> LaneResult<()> {
        Ok(self.socket.set_read_timeout(timeout)?)
    }

    /// Blocks for the next datagram. Undecodable datagrams are returned as
    /// errors so the caller decides whether to keep listening.
    pub fn recv(&self) -> LaneResult<(TelemetryMessage, SocketAddr)> {
        let mut buf = [0u8; MAX_DATAGRAM];
        let (len, from) = self.socket.recv_from(&mut buf)?;
        let text = String::from_utf8_lossy(&buf[..len]);
        Ok((TelemetryMessage::parse(&text)?, from))
    }

    /// Logs every datagram until `limit` messages were received, forever
    /// when `limit` is `None`.
    pub fn run(&self, fudge_factor: f32, limit: Option<usize>) -> LaneResult<usize> {
        let mut received = 0;
        while limit.map_or(true, |limit| received < limit) {
            match self.recv() {
                Ok((TelemetryMessage::Offset(offset), from)) => {
                    let mix = SteeringMix::from_offset(offset, fudge_factor);
                    info!("{from}: {}", mix.summary());
                }
                Ok((message, from)) => info!("{from}: {message:?}"),
                Err(LaneError::Telemetry(reason)) => warn!("Ignoring datagram: {reason}"),
                Err(err) => return Err(err),
            }
            received += 1;
        }
        Ok(received)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_offset() {
        assert_eq!(format_offset(0.125), "ai: 0.125000");
        assert_eq!(format_offset(-0.0333333), "ai: -0.033333");
    }

    #[test]
    fn test_parse_offset() {
        assert_eq!(
            TelemetryMessage::parse("ai: 0.250000").unwrap(),
            TelemetryMessage::Offset(0.25)
        );
        assert_eq!(
            TelemetryMessage::parse("ai:-0.5").unwrap(),
            TelemetryMessage::Offset(-0.5)
        );
        assert!(TelemetryMessage::parse("ai: left").is_err());
    }

    #[test]
    fn test_parse_mood_and_command() {
        assert_eq!(
            TelemetryMessage::parse("mood:happy\n").unwrap(),
            TelemetryMessage::Mood("mood:happy".to_string())
        );
        assert_eq!(
            TelemetryMessage::parse("mood:happy").unwrap(),
            TelemetryMessage::Mood("mood:happy".to_string())
        );
        assert_eq!(
            TelemetryMessage::parse("forward").unwrap(),
            TelemetryMessage::Command('f')
        );
        assert!(TelemetryMessage::parse("").is_err());
    }

    #[test]
    fn test_steering_mix_is_balanced_near_centre() {
        let mix = SteeringMix::from_offset(0.011, 0.011);
        assert!((mix.left - 0.5).abs() < 1e-6);
        assert!((mix.left - mix.right).abs() < 1e-3);
        assert_eq!(mix.ai, 0.0);

        let right_turn = SteeringMix::from_offset(0.2, 0.0);
        assert!(right_turn.right > right_turn.left);
    }

    #[test]
    fn test_summary_reports_fudged_offset() {
        let mix = SteeringMix::from_offset(0.261, 0.011);
        assert_eq!(mix.summary(), "ai 0.25, ml 0.08, mr 0.92");
    }

    #[test]
    fn test_resolve_prefers_ipv4() {
        let addr = resolve("127.0.0.1", 4000).unwrap();
        assert_eq!(addr, "127.0.0.1:4000".parse().unwrap());
    }
}
