use std::{
    fs::read_to_string,
    net::{IpAddr, SocketAddr},
    str::FromStr,
};

use anyhow::Result;
use clap::Parser;
use serde::Deserialize;
use service::translator::SsrcPolicy;

/// A half open range of UDP ports, written as `"20000..20005"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    start: u16,
    end: u16,
}

impl PortRange {
    pub fn size(&self) -> usize {
        self.end.saturating_sub(self.start) as usize
    }

    pub fn iter(&self) -> std::ops::Range<u16> {
        self.start..self.end
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            start: 20000,
            end: 20005,
        }
    }
}

impl From<std::ops::Range<u16>> for PortRange {
    fn from(range: std::ops::Range<u16>) -> Self {
        assert!(range.start <= range.end);

        Self {
            start: range.start,
            end: range.end,
        }
    }
}

impl std::fmt::Display for PortRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

#[derive(Debug)]
pub struct PortRangeParseError(String);

impl std::error::Error for PortRangeParseError {}

impl std::fmt::Display for PortRangeParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<std::num::ParseIntError> for PortRangeParseError {
    fn from(error: std::num::ParseIntError) -> Self {
        PortRangeParseError(error.to_string())
    }
}

impl FromStr for PortRange {
    type Err = PortRangeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, end) = s
            .split_once("..")
            .ok_or(PortRangeParseError(s.to_string()))?;

        Ok(Self {
            start: start.parse()?,
            end: end.parse()?,
        })
    }
}

impl<'de> Deserialize<'de> for PortRange {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(|e| serde::de::Error::custom(e.0))
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Rtp {
    ///
    /// The address the RTP listeners bind to.
    ///
    #[serde(default = "Rtp::listen")]
    pub listen: IpAddr,
    ///
    /// One listener is bound per port in this range. A port that
    /// cannot be bound is skipped with a warning, it does not prevent
    /// the other listeners from starting.
    ///
    #[serde(default)]
    pub port_range: PortRange,
    ///
    /// Maximum Transmission Unit (MTU) size for network packets.
    ///
    #[serde(default = "Rtp::mtu")]
    pub mtu: usize,
}

impl Rtp {
    fn listen() -> IpAddr {
        "0.0.0.0".parse().unwrap()
    }

    fn mtu() -> usize {
        1500
    }
}

impl Default for Rtp {
    fn default() -> Self {
        Self {
            listen: Self::listen(),
            port_range: PortRange::default(),
            mtu: Self::mtu(),
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Srtp {
    #[serde(default)]
    pub enable: bool,
    ///
    /// Hex encoded key material for the AES-CM-128 / HMAC-SHA1-80
    /// suite, exactly 60 characters. When absent the key is read from
    /// the SRTP_KEY environment variable so that it can be kept out of
    /// the configuration file.
    ///
    #[serde(default)]
    pub key: Option<String>,
}

impl Srtp {
    pub fn key(&self) -> Option<String> {
        self.key.clone().or_else(|| std::env::var("SRTP_KEY").ok())
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Quic {
    ///
    /// Address and port of the QUIC peer the gateway forwards media
    /// to.
    ///
    pub server: SocketAddr,
    ///
    /// TLS server name presented during the handshake. Defaults to
    /// the peer's IP address.
    ///
    #[serde(default)]
    pub server_name: Option<String>,
    ///
    /// Application layer protocol identifier negotiated on the
    /// connection.
    ///
    #[serde(default = "Quic::alpn")]
    pub alpn: String,
    ///
    /// Idle timeout in seconds. The connection is closed when no
    /// packet is received within this window.
    ///
    #[serde(default = "Quic::idle_timeout")]
    pub idle_timeout: u64,
    ///
    /// How many unidirectional streams the peer may keep open towards
    /// the gateway.
    ///
    #[serde(default = "Quic::peer_stream_limit")]
    pub peer_stream_limit: u32,
    ///
    /// Path of a PEM file holding the root certificates the peer is
    /// verified against.
    ///
    #[serde(default)]
    pub ca: Option<String>,
    ///
    /// Skip peer certificate verification. Only meant for closed test
    /// networks.
    ///
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

impl Quic {
    fn alpn() -> String {
        "hq-29".to_string()
    }

    fn idle_timeout() -> u64 {
        30
    }

    fn peer_stream_limit() -> u32 {
        100
    }

    pub fn server_name(&self) -> String {
        self.server_name
            .clone()
            .unwrap_or_else(|| self.server.ip().to_string())
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Reverse {
    ///
    /// SSRC stamping policy for synthesized reverse packets: "fixed"
    /// multiplexes all reverse traffic onto the gateway SSRC below,
    /// "echo" stamps the most recently seen inbound stream instead.
    ///
    #[serde(default)]
    pub ssrc_policy: SsrcPolicy,
    ///
    /// The gateway assigned SSRC of the synthetic reverse stream.
    ///
    #[serde(default = "Reverse::ssrc")]
    pub ssrc: u32,
    #[serde(default = "Reverse::payload_type")]
    pub payload_type: u8,
    ///
    /// Media clock step added to the timestamp of every synthesized
    /// packet.
    ///
    #[serde(default = "Reverse::timestamp_increment")]
    pub timestamp_increment: u32,
}

impl Reverse {
    fn ssrc() -> u32 {
        0x12345678
    }

    fn payload_type() -> u8 {
        96
    }

    fn timestamp_increment() -> u32 {
        160
    }
}

impl Default for Reverse {
    fn default() -> Self {
        Self {
            ssrc_policy: SsrcPolicy::default(),
            ssrc: Self::ssrc(),
            payload_type: Self::payload_type(),
            timestamp_increment: Self::timestamp_increment(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Cache {
    ///
    /// Connection URI of the redis instance persisting the routing
    /// directory, for example "redis://127.0.0.1:6379/0".
    ///
    pub uri: String,
}

#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "trace" => Self::Trace,
            "debug" => Self::Debug,
            "info" => Self::Info,
            "warn" => Self::Warn,
            "error" => Self::Error,
            _ => return Err(format!("unknown log level: {value}")),
        })
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match *self {
            Self::Error => log::Level::Error,
            Self::Debug => log::Level::Debug,
            Self::Trace => log::Level::Trace,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Log {
    ///
    /// log level
    ///
    /// An enum representing the available verbosity levels of the
    /// logger.
    ///
    #[serde(default)]
    pub level: LogLevel,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub rtp: Rtp,
    #[serde(default)]
    pub srtp: Srtp,
    pub quic: Quic,
    #[serde(default)]
    pub reverse: Reverse,
    #[serde(default)]
    pub cache: Option<Cache>,
    #[serde(default)]
    pub log: Log,
}

#[derive(Parser, Debug)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
)]
struct Cli {
    ///
    /// Specify the configuration file path
    ///
    /// Example: quic-bridge --config /etc/quic-bridge/config.toml
    ///
    #[arg(long, short)]
    config: String,
}

impl Config {
    ///
    /// Load configure from config file and command line parameters.
    ///
    /// Load command line parameters, if the configuration file path is
    /// specified, the configuration is read from the configuration
    /// file, otherwise the default configuration is used.
    ///
    pub fn load() -> Result<Self> {
        Ok(toml::from_str::<Self>(&read_to_string(
            &Cli::parse().config,
        )?)?)
    }
}
