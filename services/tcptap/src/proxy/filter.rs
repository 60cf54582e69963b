//! Filter subprocess launching.
//!
//! A filter is an arbitrary external program that transforms one direction
//! of the proxied traffic. It is started as `/bin/sh -c <command>` with
//! stdin and stdout piped back to the connection's pipeline and stderr
//! inherited. The command line is trusted configuration; the launcher
//! never interprets or escapes it. Sockets never leak into the child:
//! Rust opens them close-on-exec.

use std::fmt;
use std::io;
use std::process::Stdio;
use std::str::FromStr;

use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::debug;

use crate::error::ProxyError;

/// Shell command line for one direction's filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSpec(String);

impl FilterSpec {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self(cmd.into())
    }

    pub fn command(&self) -> &str {
        &self.0
    }
}

impl FromStr for FilterSpec {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl fmt::Display for FilterSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A running filter with its pipeline-facing ends detached.
pub struct FilterProcess {
    pub child: Child,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
}

/// Start a filter process for one direction.
///
/// Failure here is fatal for the connection being set up, never for the
/// listener or sibling connections.
pub fn spawn(spec: &FilterSpec) -> Result<FilterProcess, ProxyError> {
    fn spawn_err(spec: &FilterSpec, source: io::Error) -> ProxyError {
        ProxyError::FilterSpawn {
            cmd: spec.command().to_string(),
            source,
        }
    }

    let mut child = Command::new("/bin/sh")
        .arg("-c")
        .arg(spec.command())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .map_err(|e| spawn_err(spec, e))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| spawn_err(spec, io::Error::other("stdin not captured")))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| spawn_err(spec, io::Error::other("stdout not captured")))?;

    debug!(cmd = spec.command(), pid = child.id(), "filter started");

    Ok(FilterProcess {
        child,
        stdin,
        stdout,
    })
}
