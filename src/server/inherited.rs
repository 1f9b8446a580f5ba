//! Inherited-file-descriptor binding (spec §4.6, "bind: inherited fd").
//!
//! `GATEWAYRT_INHERIT` names one or more already-open listening sockets a
//! process supervisor (systemd-style socket activation, a zero-downtime
//! restart harness, ...) passed down across an `exec`. Grammar, one entry
//! per `,`-separated segment:
//!
//! ```text
//! host:port=fd       127.0.0.1:8080=3
//! port=fd            8080=3
//! /path=fd           /run/app.sock=4
//! [v6]:port=fd        [::1]:8080=3
//! ```
//!
//! When more than one entry is present, the first one wins — this core
//! drives exactly one listener per Supervisor.

use std::net::{SocketAddr, TcpListener as StdTcpListener};
#[cfg(unix)]
use std::os::unix::io::FromRawFd;

use crate::error::{Error, Result};

pub(crate) const INHERIT_ENV_VAR: &str = "GATEWAYRT_INHERIT";

/// One parsed `GATEWAYRT_INHERIT` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum InheritedTarget {
    Tcp { addr: SocketAddr, fd: i32 },
    Unix { path: String, fd: i32 },
}

/// Parse the full `GATEWAYRT_INHERIT` value into its `,`-separated entries.
pub(crate) fn parse(value: &str) -> Result<Vec<InheritedTarget>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse_entry)
        .collect()
}

fn parse_entry(entry: &str) -> Result<InheritedTarget> {
    let (addr_part, fd_part) = entry.rsplit_once('=').ok_or_else(|| {
        Error::Config(format!(
            "malformed {INHERIT_ENV_VAR} entry (expected `addr=fd`): {entry:?}"
        ))
    })?;
    let fd: i32 = fd_part
        .parse()
        .map_err(|_| Error::Config(format!("malformed file descriptor in {INHERIT_ENV_VAR} entry: {entry:?}")))?;

    if let Some(path) = addr_part.strip_prefix('/') {
        return Ok(InheritedTarget::Unix {
            path: format!("/{path}"),
            fd,
        });
    }

    let addr: SocketAddr = if let Some(rest) = addr_part.strip_prefix('[') {
        // `[v6]:port`
        let (host, port) = rest
            .split_once("]:")
            .ok_or_else(|| Error::Config(format!("malformed IPv6 address in {INHERIT_ENV_VAR} entry: {entry:?}")))?;
        format!("[{host}]:{port}")
            .parse()
            .map_err(|e| Error::Config(format!("invalid IPv6 address in {INHERIT_ENV_VAR} entry {entry:?}: {e}")))?
    } else if let Ok(port_only) = addr_part.parse::<u16>() {
        SocketAddr::from(([0, 0, 0, 0], port_only))
    } else {
        addr_part
            .parse()
            .map_err(|e| Error::Config(format!("invalid address in {INHERIT_ENV_VAR} entry {entry:?}: {e}")))?
    };

    Ok(InheritedTarget::Tcp { addr, fd })
}

/// Reconstruct a `std::net::TcpListener` from an inherited file descriptor.
///
/// # Safety-adjacent note
/// This assumes the supervisor that set `fd` in the environment is passing
/// ownership of a valid, already-listening TCP socket; a stale or
/// wrong-type fd will surface as a bind/accept error rather than a panic,
/// but is still technically unsafe at the OS level (`from_raw_fd` takes
/// ownership of whatever is at that descriptor number).
#[cfg(unix)]
pub(crate) fn tcp_listener_from_fd(fd: i32) -> StdTcpListener {
    unsafe { StdTcpListener::from_raw_fd(fd) }
}

#[cfg(not(unix))]
pub(crate) fn tcp_listener_from_fd(_fd: i32) -> StdTcpListener {
    panic!("inherited file descriptors are only supported on unix targets")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_port_fd() {
        let targets = parse("127.0.0.1:8080=3").unwrap();
        assert_eq!(
            targets,
            vec![InheritedTarget::Tcp {
                addr: "127.0.0.1:8080".parse().unwrap(),
                fd: 3,
            }]
        );
    }

    #[test]
    fn parses_bare_port_fd_as_wildcard_host() {
        let targets = parse("9090=5").unwrap();
        assert_eq!(
            targets,
            vec![InheritedTarget::Tcp {
                addr: "0.0.0.0:9090".parse().unwrap(),
                fd: 5,
            }]
        );
    }

    #[test]
    fn parses_unix_socket_path_fd() {
        let targets = parse("/run/app.sock=4").unwrap();
        assert_eq!(
            targets,
            vec![InheritedTarget::Unix {
                path: "/run/app.sock".into(),
                fd: 4,
            }]
        );
    }

    #[test]
    fn parses_ipv6_host_port_fd() {
        let targets = parse("[::1]:8080=3").unwrap();
        assert_eq!(
            targets,
            vec![InheritedTarget::Tcp {
                addr: "[::1]:8080".parse().unwrap(),
                fd: 3,
            }]
        );
    }

    #[test]
    fn parses_multiple_comma_separated_entries() {
        let targets = parse("127.0.0.1:8080=3,/run/app.sock=4").unwrap();
        assert_eq!(targets.len(), 2);
    }

    #[test]
    fn rejects_an_entry_without_a_file_descriptor() {
        assert!(parse("127.0.0.1:8080").is_err());
    }
}
