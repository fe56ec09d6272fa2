//! Resolves and parses the container-engine endpoint, mirroring Docker's own
//! `DOCKER_HOST` conventions: `unix://`, `tcp://host:port`, bare `host:port`
//! (implies tcp), and `fd://*` passed through untouched.

use crate::error::EndpointError;

const DEFAULT_SOCKET: &str = "/var/run/docker.sock";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Unix { path: String },
    Tcp { host: String, port: String },
    Fd { raw: String },
}

/// Reads `DOCKER_HOST`, defaulting to `unix:///var/run/docker.sock` when unset
/// or empty.
pub fn resolve_from_env() -> Result<Endpoint, EndpointError> {
    let raw = std::env::var("DOCKER_HOST").unwrap_or_default();
    parse_host(&raw)
}

/// Parses a single endpoint string per the scheme rules above.
pub fn parse_host(addr: &str) -> Result<Endpoint, EndpointError> {
    if addr.is_empty() {
        return Ok(Endpoint::Unix {
            path: DEFAULT_SOCKET.to_owned(),
        });
    }

    if let Some(rest) = addr.strip_prefix("fd://") {
        return Ok(Endpoint::Fd { raw: rest.to_owned() });
    }

    if let Some(rest) = addr.strip_prefix("unix://") {
        let path = if rest.is_empty() { DEFAULT_SOCKET } else { rest };
        return Ok(Endpoint::Unix { path: path.to_owned() });
    }

    let host_port = if let Some(rest) = addr.strip_prefix("tcp://") {
        rest
    } else if addr.contains("://") {
        return Err(EndpointError::BadProtocol(addr.to_owned()));
    } else {
        addr
    };

    let (host, port) = host_port
        .rsplit_once(':')
        .ok_or_else(|| EndpointError::BadFormat(addr.to_owned()))?;
    if host.is_empty() || port.is_empty() {
        return Err(EndpointError::BadFormat(addr.to_owned()));
    }
    port.parse::<u16>()
        .map_err(|_| EndpointError::BadFormat(addr.to_owned()))?;

    Ok(Endpoint::Tcp {
        host: host.to_owned(),
        port: port.to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_defaults_to_unix_socket() {
        assert_eq!(
            parse_host("").unwrap(),
            Endpoint::Unix {
                path: DEFAULT_SOCKET.to_owned()
            }
        );
    }

    #[test]
    fn unix_scheme_with_custom_path() {
        assert_eq!(
            parse_host("unix:///tmp/custom.sock").unwrap(),
            Endpoint::Unix {
                path: "/tmp/custom.sock".to_owned()
            }
        );
    }

    #[test]
    fn tcp_requires_host_and_port() {
        assert_eq!(
            parse_host("tcp://1.2.3.4:2375").unwrap(),
            Endpoint::Tcp {
                host: "1.2.3.4".to_owned(),
                port: "2375".to_owned(),
            }
        );
        assert!(parse_host("tcp://1.2.3.4").is_err());
        assert!(parse_host("tcp://:2375").is_err());
    }

    #[test]
    fn bare_host_port_implies_tcp() {
        assert_eq!(
            parse_host("1.2.3.4:2375").unwrap(),
            Endpoint::Tcp {
                host: "1.2.3.4".to_owned(),
                port: "2375".to_owned(),
            }
        );
    }

    #[test]
    fn fd_scheme_passes_through() {
        assert_eq!(
            parse_host("fd://3").unwrap(),
            Endpoint::Fd { raw: "3".to_owned() }
        );
    }

    #[test]
    fn unknown_scheme_is_an_error() {
        assert!(parse_host("npipe://./pipe/docker_engine").is_err());
    }
}
