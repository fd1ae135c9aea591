//! Configuration schema definitions.
//!
//! One route file describes one virtual hostname. All types derive Serde
//! traits for deserialization from TOML or JSON route files.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

/// Listen address used when a route file does not name one.
pub const DEFAULT_LISTEN_ADDRESS: &str = ":25565";

/// Backend connect timeout used when a route file does not name one.
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// Configuration of a single route: one hostname, one listener, one backend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Virtual hostname clients request during the handshake.
    pub domain_name: String,

    /// Address the owning multiplexer listens on (e.g., ":25565").
    #[serde(default = "default_listen_to")]
    pub listen_to: String,

    /// Backend address (e.g., "mc-survival:25565").
    pub proxy_to: String,

    /// Local IP to bind outbound backend connections from.
    #[serde(default)]
    pub proxy_bind: Option<String>,

    /// Backend connect timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Settings for the on-demand backend wake-up collaborator.
    #[serde(default)]
    pub process: Option<ProcessConfig>,
}

fn default_listen_to() -> String {
    DEFAULT_LISTEN_ADDRESS.to_string()
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

impl RouteConfig {
    /// Create a config with default listener settings.
    pub fn new(domain_name: impl Into<String>, listen_to: impl Into<String>, proxy_to: impl Into<String>) -> Self {
        Self {
            domain_name: domain_name.into(),
            listen_to: listen_to.into(),
            proxy_to: proxy_to.into(),
            proxy_bind: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            process: None,
        }
    }

    /// Return the canonical form used as registry and multiplexer keys.
    ///
    /// The listen address becomes a full socket address string and the
    /// hostname is lower-cased without a trailing dot. Values that do not
    /// parse are left as written; validation rejects them.
    pub fn normalized(mut self) -> Self {
        if let Ok(addr) = parse_listen_address(&self.listen_to) {
            self.listen_to = addr.to_string();
        }
        self.domain_name = normalize_hostname(&self.domain_name);
        self
    }
}

/// Parse a listen address, accepting the ":port" shorthand for all interfaces.
pub fn parse_listen_address(address: &str) -> Result<SocketAddr, std::net::AddrParseError> {
    let address = address.trim();
    if address.starts_with(':') {
        format!("0.0.0.0{}", address).parse()
    } else {
        address.parse()
    }
}

/// Lower-case a hostname and strip the trailing root dot.
pub fn normalize_hostname(hostname: &str) -> String {
    hostname.trim().trim_end_matches('.').to_lowercase()
}

/// Wake-up settings for a stopped backend (container or VM).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// DNS server used to resolve the backend container.
    pub dns_server: String,

    /// Name of the container hosting the backend.
    pub container_name: String,

    /// Portainer API access, if the container is managed through it.
    pub portainer: Option<PortainerConfig>,
}

impl ProcessConfig {
    /// True only when every Portainer field is filled in.
    pub fn has_portainer_config(&self) -> bool {
        match &self.portainer {
            Some(p) => {
                !p.address.is_empty()
                    && !p.endpoint_id.is_empty()
                    && !p.username.is_empty()
                    && !p.password.is_empty()
            }
            None => false,
        }
    }
}

/// Portainer API credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PortainerConfig {
    pub address: String,
    pub endpoint_id: String,
    pub username: String,
    pub password: String,
}
