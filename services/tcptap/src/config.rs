//! Startup configuration.
//!
//! Everything is provided once on the command line; there is no config
//! file or persistent store. The listen port defaults to the remote port
//! so the proxy can be dropped in front of a service unchanged.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use clap::Parser;

use crate::proxy::FilterSpec;

/// Transparent TCP intercepting proxy with per-direction filter programs.
///
/// Accepted connections are forwarded to `<REMOTE_ADDR>:<REMOTE_PORT>`;
/// client-to-server traffic passes through the in-filter and
/// server-to-client traffic through the out-filter, while a colored
/// transcript of both directions is written to stdout.
#[derive(Debug, Clone, Parser)]
#[command(name = "tcptap", version, about)]
pub struct Config {
    /// Address to bind the listener to.
    #[arg(short = 'a', long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind_addr: IpAddr,

    /// Port to listen on; defaults to the remote port.
    #[arg(short = 'p', long, value_parser = parse_port)]
    pub bind_port: Option<u16>,

    /// Filter command for client -> server traffic, run as `sh -c <CMD>`.
    #[arg(short = 'i', long, value_name = "CMD", default_value = "cat")]
    pub filter_in: FilterSpec,

    /// Filter command for server -> client traffic, run as `sh -c <CMD>`.
    #[arg(short = 'o', long, value_name = "CMD", default_value = "cat")]
    pub filter_out: FilterSpec,

    /// Diagnostic log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Remote address to forward connections to.
    pub remote_addr: IpAddr,

    /// Remote port to forward connections to.
    #[arg(value_parser = parse_port)]
    pub remote_port: u16,
}

impl Config {
    /// The address the listener binds to.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.bind_port.unwrap_or(self.remote_port))
    }

    /// The fixed remote endpoint every connection is forwarded to.
    pub fn remote(&self) -> SocketAddr {
        SocketAddr::new(self.remote_addr, self.remote_port)
    }
}

fn parse_port(s: &str) -> Result<u16, String> {
    let port: u16 = s.parse().map_err(|_| format!("invalid port `{s}`"))?;
    if port == 0 {
        return Err("port must be in 1-65535".to_string());
    }
    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_invocation_uses_defaults() {
        let config = Config::try_parse_from(["tcptap", "10.0.0.1", "8080"]).unwrap();
        assert_eq!(config.bind_addr, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(config.filter_in.command(), "cat");
        assert_eq!(config.filter_out.command(), "cat");
        assert_eq!(config.remote().to_string(), "10.0.0.1:8080");
        // Listen port falls back to the remote port.
        assert_eq!(config.listen_addr().port(), 8080);
    }

    #[test]
    fn explicit_bind_port_wins() {
        let config =
            Config::try_parse_from(["tcptap", "-a", "127.0.0.1", "-p", "9000", "10.0.0.1", "8080"])
                .unwrap();
        assert_eq!(config.listen_addr().to_string(), "127.0.0.1:9000");
    }

    #[test]
    fn filters_are_taken_verbatim() {
        let config = Config::try_parse_from([
            "tcptap",
            "-i",
            "tr a-z A-Z | head -c 100",
            "10.0.0.1",
            "8080",
        ])
        .unwrap();
        assert_eq!(config.filter_in.command(), "tr a-z A-Z | head -c 100");
    }

    #[test]
    fn port_zero_is_rejected() {
        assert!(Config::try_parse_from(["tcptap", "10.0.0.1", "0"]).is_err());
        assert!(Config::try_parse_from(["tcptap", "-p", "0", "10.0.0.1", "80"]).is_err());
    }

    #[test]
    fn remote_endpoint_is_required() {
        assert!(Config::try_parse_from(["tcptap"]).is_err());
        assert!(Config::try_parse_from(["tcptap", "10.0.0.1"]).is_err());
    }

    #[test]
    fn invalid_remote_address_is_rejected() {
        assert!(Config::try_parse_from(["tcptap", "not-an-address", "80"]).is_err());
    }
}
