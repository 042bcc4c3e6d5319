use alohanet::medium::{MediumArbiter, MediumConfig};
use anyhow::Result;
use clap::Parser;
use std::{process, time::Duration};
use tokio::{io::AsyncReadExt, sync::oneshot};

#[derive(Parser, Debug)]
#[clap(name = "medium", version = "0.1.0", author = "Alohanet")]
#[clap(about = "A slotted shared medium with collision detection", long_about = None)]
struct MediumCli {
    /// The TCP port to listen on for peers.
    port: u16,
    /// The slot time in milliseconds.
    slot_time: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = MediumCli::try_parse().unwrap_or_else(|err| {
        let _ = err.print();
        process::exit(1);
    });

    let config = MediumConfig::new(cli.port, Duration::from_millis(cli.slot_time));
    let arbiter = MediumArbiter::bind(config).await?;

    // EOF on stdin is the shutdown signal; anything typed before it is
    // swallowed.
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    tokio::spawn(async move {
        let mut stdin = tokio::io::stdin();
        let mut buf = [0u8; 64];
        loop {
            match stdin.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => continue,
            }
        }
        let _ = shutdown_tx.send(());
    });

    for report in arbiter.run(shutdown_rx).await {
        eprintln!(
            "From {} port {}: {} collisions",
            report.addr.ip(),
            report.addr.port(),
            report.collisions
        );
    }
    Ok(())
}
