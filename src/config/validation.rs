//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses, ports and hostnames
//! - Reject half-configured wake-up settings
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RouteConfig → Result<(), Vec<ValidationError>>
//! - Runs before a config is accepted by a route

use std::net::{IpAddr, SocketAddr};

use crate::config::schema::{normalize_hostname, parse_listen_address, RouteConfig};

/// Longest hostname a client can put in the handshake.
pub const MAX_HOSTNAME_LEN: usize = 255;

/// A single semantic problem found in a route config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    EmptyHostname,
    HostnameTooLong(usize),
    HostnameWhitespace(String),
    InvalidListenAddress(String),
    InvalidBackendAddress(String),
    InvalidBindAddress(String),
    ZeroTimeout,
    IncompletePortainer,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::EmptyHostname => write!(f, "domain_name must not be empty"),
            ValidationError::HostnameTooLong(len) => {
                write!(f, "domain_name is {} bytes, limit is {}", len, MAX_HOSTNAME_LEN)
            }
            ValidationError::HostnameWhitespace(h) => {
                write!(f, "domain_name {:?} contains whitespace", h)
            }
            ValidationError::InvalidListenAddress(a) => write!(f, "invalid listen_to address {:?}", a),
            ValidationError::InvalidBackendAddress(a) => {
                write!(f, "invalid proxy_to address {:?}, expected host:port", a)
            }
            ValidationError::InvalidBindAddress(a) => write!(f, "invalid proxy_bind address {:?}", a),
            ValidationError::ZeroTimeout => write!(f, "timeout_ms must be greater than zero"),
            ValidationError::IncompletePortainer => {
                write!(f, "process.portainer needs address, endpoint_id, username and password")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validate a route config, collecting every problem found.
pub fn validate_route(config: &RouteConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    // Check the key the route will actually be bound under.
    let hostname = normalize_hostname(&config.domain_name);
    if hostname.is_empty() {
        errors.push(ValidationError::EmptyHostname);
    } else if hostname.len() > MAX_HOSTNAME_LEN {
        errors.push(ValidationError::HostnameTooLong(hostname.len()));
    } else if hostname.chars().any(char::is_whitespace) {
        errors.push(ValidationError::HostnameWhitespace(config.domain_name.clone()));
    }

    if parse_listen_address(&config.listen_to).is_err() {
        errors.push(ValidationError::InvalidListenAddress(config.listen_to.clone()));
    }

    if !is_host_port(&config.proxy_to) {
        errors.push(ValidationError::InvalidBackendAddress(config.proxy_to.clone()));
    }

    if let Some(bind) = &config.proxy_bind {
        if bind.parse::<IpAddr>().is_err() && bind.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::InvalidBindAddress(bind.clone()));
        }
    }

    if config.timeout_ms == 0 {
        errors.push(ValidationError::ZeroTimeout);
    }

    if let Some(process) = &config.process {
        if process.portainer.is_some() && !process.has_portainer_config() {
            errors.push(ValidationError::IncompletePortainer);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn is_host_port(address: &str) -> bool {
    if address.parse::<SocketAddr>().is_ok() {
        return true;
    }
    match address.rsplit_once(':') {
        Some((host, port)) => {
            !host.is_empty()
                && !host.contains(char::is_whitespace)
                && port.parse::<u16>().is_ok()
        }
        None => false,
    }
}
