//! dcat - delay cat.
//!
//! Copies stdin to stdout, sleeping for the configured delay after every
//! underlying read. Handy as a throttling filter in front of tcptap, e.g.
//! `tcptap -i 'dcat 100' <remote> <port>`.

use std::io::ErrorKind;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::sleep;

const BUF_SIZE: usize = 1024;

/// Copy stdin to stdout with a delay inserted after every read.
#[derive(Debug, Parser)]
#[command(name = "dcat", version, about)]
struct Args {
    /// Delay in milliseconds.
    delay_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let delay = Duration::from_millis(args.delay_ms);

    let mut stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    let mut buf = [0u8; BUF_SIZE];

    loop {
        let len = match stdin.read(&mut buf).await {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        sleep(delay).await;

        // Partial writes keep the unwritten suffix; a zero-length write
        // means the reader is gone and we are done.
        let mut pos = 0;
        while pos < len {
            match stdout.write(&buf[pos..len]).await {
                Ok(0) => return Ok(()),
                Ok(n) => pos += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        stdout.flush().await?;
    }
}
