use alohanet::{
    aloha::{fragment, AlohaSocket, AlohaSocketConfig, TransferReport},
    wire::builtin::MAX_PAYLOAD_SIZE,
};
use anyhow::Result;
use clap::Parser;
use rand::{rngs::SmallRng, SeedableRng};
use std::{
    fs,
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
    process,
    time::Duration,
};

#[derive(Parser, Debug)]
#[clap(name = "sender", version = "0.1.0", author = "Alohanet")]
#[clap(about = "Transmits a file across the shared medium with slotted backoff", long_about = None)]
struct SenderCli {
    /// The IP address of the channel.
    chan_ip: IpAddr,
    /// The TCP port of the channel.
    chan_port: u16,
    /// The path to the file to transmit.
    file_name: PathBuf,
    /// The payload size of each frame in bytes.
    frame_size: usize,
    /// The slot time in milliseconds.
    slot_time: u64,
    /// The seed for the randomized backoff.
    seed: u64,
    /// The ack timeout in seconds.
    timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = SenderCli::try_parse().unwrap_or_else(|err| {
        let _ = err.print();
        process::exit(1);
    });

    if cli.frame_size == 0 || cli.frame_size > MAX_PAYLOAD_SIZE {
        eprintln!(
            "Error: Frame size must be between 1 and {} bytes.",
            MAX_PAYLOAD_SIZE
        );
        process::exit(1);
    }

    let data = match fs::read(&cli.file_name) {
        Ok(data) => data,
        Err(_) => {
            eprintln!("Error: Cannot open file {}", cli.file_name.display());
            return Ok(());
        }
    };

    let source_id = fragment::source_tag();
    let mut rng = SmallRng::seed_from_u64(cli.seed);
    let frames = fragment::split(&data, cli.frame_size, source_id, &mut rng);

    let config = AlohaSocketConfig::new(
        SocketAddr::new(cli.chan_ip, cli.chan_port),
        source_id,
        Duration::from_millis(cli.slot_time),
        Duration::from_secs(cli.timeout),
        cli.seed,
    );
    let mut socket = AlohaSocket::connect(config).await;
    let report = socket.transfer(&frames).await?;

    print_summary(&cli.file_name, data.len(), &report);
    Ok(())
}

fn print_summary(file_name: &Path, file_size: usize, report: &TransferReport) {
    eprintln!("Sent file: {}", file_name.display());
    eprintln!(
        "Result: {}",
        if report.delivered {
            "Success :)"
        } else {
            "Failure :("
        }
    );
    eprintln!(
        "File size: {} Bytes ({} frames)",
        file_size, report.frames_total
    );
    eprintln!(
        "Total transfer time: {} milliseconds",
        report.elapsed.as_millis()
    );
    eprintln!(
        "Transmissions/frame: average {}, maximum {}",
        report.mean_transmissions(),
        report.max_transmissions
    );
    eprintln!("Average bandwidth: {} Mbps", report.bandwidth_mbps());
}
