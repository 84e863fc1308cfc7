use std::net::Ipv4Addr;
use std::time::Duration;

/// The IPv4 addresses of the 13 IANA root nameservers,
/// `a.root-servers.net` through `m.root-servers.net`.
///
/// See <https://www.iana.org/domains/root/servers>.
pub const ROOT_SERVERS: [Ipv4Addr; 13] = [
    Ipv4Addr::new(198, 41, 0, 4),     // a - Verisign
    Ipv4Addr::new(199, 9, 14, 201),   // b - USC-ISI
    Ipv4Addr::new(192, 33, 4, 12),    // c - Cogent
    Ipv4Addr::new(199, 7, 91, 13),    // d - University of Maryland
    Ipv4Addr::new(192, 203, 230, 10), // e - NASA Ames
    Ipv4Addr::new(192, 5, 5, 241),    // f - ISC
    Ipv4Addr::new(192, 112, 36, 4),   // g - DISA
    Ipv4Addr::new(198, 97, 190, 53),  // h - U.S. Army Research Lab
    Ipv4Addr::new(192, 36, 148, 17),  // i - Netnod
    Ipv4Addr::new(192, 58, 128, 30),  // j - Verisign
    Ipv4Addr::new(193, 0, 14, 129),   // k - RIPE NCC
    Ipv4Addr::new(199, 7, 83, 42),    // l - ICANN
    Ipv4Addr::new(202, 12, 27, 33),   // m - WIDE
];

/// How queries to a single nameserver are carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// How long to wait for one request before cancelling it.
    pub timeout: Duration,

    /// How many times to try a nameserver before moving on to the
    /// next candidate.
    pub retry_count: usize,

    /// Whether to query over UDP.  When both protocols are enabled,
    /// UDP is tried first.
    pub use_udp: bool,

    /// Whether to query over TCP, either directly or as the fallback
    /// when a UDP response comes back truncated.
    pub use_tcp: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            retry_count: 3,
            use_udp: true,
            use_tcp: true,
        }
    }
}

/// Configuration for the recursive resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverConfig {
    /// Whether to consult (and fill) the shared cache.
    pub use_cache: bool,

    /// Where resolution starts.
    pub root_servers: Vec<Ipv4Addr>,

    /// Per-nameserver transport behaviour, including the timeout and
    /// retry count.
    pub transport: TransportConfig,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            use_cache: true,
            root_servers: ROOT_SERVERS.to_vec(),
            transport: TransportConfig::default(),
        }
    }
}
