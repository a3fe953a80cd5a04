//! Port Policy (spec §2 item 5) and Resolver configuration surface (spec §6,
//! §4.6, and SPEC_FULL §4.10).

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use crate::error::ResolveError;

/// Minimum EDNS0 UDP buffer size, regardless of DNSSEC (spec §6, `udp_size`).
pub const MIN_UDP_SIZE: u16 = 1220;

/// Minimum EDNS0 UDP buffer size once DNSSEC is enabled (spec invariant I6).
pub const DNSSEC_MIN_UDP_SIZE: u16 = 4096;

/// A handful of registered ports above the well-known range that this
/// resolver refuses to bind as a *source* port, in addition to the entire
/// `0..=1024` well-known range excluded by spec's `(1024, 65535)` bound.
/// Not an exhaustive IANA registry -- just the ports most likely to collide
/// with another service on the host (spec §9: "the only process-wide state
/// is the log sink and the IANA-reserved-port table... read-only thereafter").
const ADDITIONAL_RESERVED_PORTS: &[u16] = &[1900, 5353, 5355];

/// Validated source-port selection: a single `0` (any ephemeral port chosen
/// by the OS), or an explicit, non-empty set of usable ports (spec
/// invariant I7, property P6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourcePorts {
    Any,
    Fixed(Vec<u16>),
}

impl SourcePorts {
    pub fn any() -> Self {
        Self::Any
    }

    /// Validates a list of candidate ports, or a single `0`.
    pub fn from_list(ports: impl IntoIterator<Item = u16>) -> Result<Self, ResolveError> {
        let ports: Vec<u16> = ports.into_iter().collect();

        if ports.is_empty() {
            return Err(ResolveError::Argument("source port list is empty".into()));
        }

        if ports == [0] {
            return Ok(Self::Any);
        }

        for &port in &ports {
            if port == 0 {
                return Err(ResolveError::Argument(
                    "port 0 cannot be mixed with explicit ports".into(),
                ));
            }

            if !is_usable_source_port(port) {
                return Err(ResolveError::Argument(format!(
                    "port {port} is reserved or outside (1024, 65535)"
                )));
            }
        }

        Ok(Self::Fixed(ports))
    }

    /// Validates an inclusive range of ports.
    pub fn from_range(start: u16, end: u16) -> Result<Self, ResolveError> {
        if start > end {
            return Err(ResolveError::Argument(format!(
                "port range start {start} is after end {end}"
            )));
        }

        Self::from_list(start..=end)
    }
}

fn is_usable_source_port(port: u16) -> bool {
    port > 1024 && port < 65535 && !ADDITIONAL_RESERVED_PORTS.contains(&port)
}

/// A TSIG signing configuration (spec §6, `tsig`). The key material and
/// the actual HMAC signing live inside `SingleTransport` (out of scope for
/// this crate per spec §1); this type only carries the caller's choice of
/// *which* of the three shapes to sign with through to the transport.
#[derive(Clone)]
pub enum Tsig {
    /// An already-assembled TSIG record, opaque to this crate.
    Record(Vec<u8>),
    /// A `(name, key)` pair.
    NamedKey { name: String, key: Vec<u8> },
    /// A bare key, algorithm and name left to the transport's defaults.
    BareKey(Vec<u8>),
}

impl std::fmt::Debug for Tsig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Record(_) => f.write_str("Tsig::Record(..)"),
            Self::NamedKey { name, .. } => {
                f.debug_struct("Tsig::NamedKey").field("name", name).finish_non_exhaustive()
            }
            Self::BareKey(_) => f.write_str("Tsig::BareKey(..)"),
        }
    }
}

/// Configuration for a single upstream transport (spec §6, "Configurable
/// fields the orchestrator sets on every transport on construction and
/// whenever configuration changes").
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub port: u16,
    pub use_tcp: bool,
    pub tsig: Option<Tsig>,
    pub ignore_truncation: bool,
    pub packet_timeout: Duration,
    pub src_address: IpAddr,
    pub src_port: SourcePorts,
    pub persistent_tcp: bool,
    pub persistent_udp: bool,
    pub recurse: bool,
    pub udp_size: u16,
    pub dnssec: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            port: 53,
            use_tcp: false,
            tsig: None,
            ignore_truncation: false,
            packet_timeout: Duration::from_secs(10),
            src_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            src_port: SourcePorts::any(),
            persistent_tcp: false,
            persistent_udp: false,
            recurse: true,
            udp_size: MIN_UDP_SIZE,
            dnssec: false,
        }
    }
}

/// Top-level resolver configuration (spec §6, §4.6).
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub transport: TransportConfig,
    pub query_timeout: Duration,
    pub retry_times: u32,
    pub retry_delay: Duration,
    pub tick_period: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            query_timeout: Duration::ZERO, // 0 means none, per spec.
            retry_times: 4,
            retry_delay: Duration::from_secs(5),
            tick_period: Duration::from_millis(500),
        }
    }
}

impl ResolverConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dnssec(mut self, enabled: bool) -> Result<Self, ResolveError> {
        self.transport.dnssec = enabled;

        if enabled && self.transport.udp_size < DNSSEC_MIN_UDP_SIZE {
            self.transport.udp_size = DNSSEC_MIN_UDP_SIZE;
        }

        Ok(self)
    }

    pub fn with_udp_size(mut self, size: u16) -> Result<Self, ResolveError> {
        let floor = if self.transport.dnssec {
            DNSSEC_MIN_UDP_SIZE
        } else {
            MIN_UDP_SIZE
        };

        if size < floor {
            return Err(ResolveError::Argument(format!(
                "udp_size {size} is below the floor of {floor} for this configuration"
            )));
        }

        self.transport.udp_size = size;
        Ok(self)
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry_times: u32, retry_delay: Duration) -> Self {
        self.retry_times = retry_times;
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_src_port(mut self, ports: SourcePorts) -> Self {
        self.transport.src_port = ports;
        self
    }

    pub fn with_tick_period(mut self, period: Duration) -> Self {
        self.tick_period = period;
        self
    }

    pub fn with_recurse(mut self, recurse: bool) -> Self {
        self.transport.recurse = recurse;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.transport.port = port;
        self
    }

    pub fn with_use_tcp(mut self, use_tcp: bool) -> Self {
        self.transport.use_tcp = use_tcp;
        self
    }

    /// `None` disables signing (spec §6, `tsig`: "`null` disables signing").
    pub fn with_tsig(mut self, tsig: Option<Tsig>) -> Self {
        self.transport.tsig = tsig;
        self
    }

    pub fn with_ignore_truncation(mut self, ignore: bool) -> Self {
        self.transport.ignore_truncation = ignore;
        self
    }

    pub fn with_packet_timeout(mut self, timeout: Duration) -> Self {
        self.transport.packet_timeout = timeout;
        self
    }

    pub fn with_src_address(mut self, address: IpAddr) -> Self {
        self.transport.src_address = address;
        self
    }

    pub fn with_persistent_tcp(mut self, persistent: bool) -> Self {
        self.transport.persistent_tcp = persistent;
        self
    }

    pub fn with_persistent_udp(mut self, persistent: bool) -> Self {
        self.transport.persistent_udp = persistent;
        self
    }

    /// Whether to set the CD bit by default on new queries. Per spec §4.6,
    /// this defaults to the DNSSEC-enabled flag: "client does its own
    /// validation".
    pub fn default_checking_disabled(&self) -> bool {
        self.transport.dnssec
    }
}
