use alohanet::{
    aloha::{fragment, AlohaIoError, AlohaSocket, AlohaSocketConfig, TransferReport},
    medium::{MediumArbiter, MediumConfig},
    wire::{builtin::HEADER_SIZE, FrameHeader, NoiseFrame},
};
use rand::{rngs::SmallRng, SeedableRng};
use std::{net::SocketAddr, time::Duration};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
    sync::oneshot,
    task::JoinHandle,
};
use zerocopy::FromBytes;

const TAG: [u8; 6] = [7, 7, 7, 7, 0, 0];

/// What the scripted channel does with the nth frame it receives.
#[derive(Debug, Clone, Copy)]
enum Response {
    Echo,
    Noise,
    ForeignEcho,
    StaleEcho,
    Hangup,
}

/// A cooperative stand-in for the medium: accepts one sender, reads whole
/// frames, and answers each according to the script. Returns the payloads it
/// saw, in receipt order.
async fn scripted_channel(
    listener: TcpListener,
    mut respond: impl FnMut(usize) -> Response + Send + 'static,
) -> Vec<Vec<u8>> {
    let (mut stream, _) = listener.accept().await.unwrap();
    let mut payloads = Vec::new();
    let mut receipts = 0usize;
    loop {
        let mut header = [0u8; HEADER_SIZE];
        if stream.read_exact(&mut header).await.is_err() {
            break;
        }
        let parsed = FrameHeader::read_from(&header[..]).unwrap();
        let length = parsed.payload_length as usize;
        let mut payload = vec![0u8; length];
        stream.read_exact(&mut payload).await.unwrap();

        let mut frame = header.to_vec();
        frame.extend_from_slice(&payload);
        payloads.push(payload);

        match respond(receipts) {
            Response::Echo => stream.write_all(&frame).await.unwrap(),
            Response::Noise => {
                let noise: Vec<u8> = NoiseFrame::new().into();
                stream.write_all(&noise).await.unwrap();
            }
            Response::ForeignEcho => {
                frame[6] ^= 0xFF;
                stream.write_all(&frame).await.unwrap();
            }
            Response::StaleEcho => {
                frame[15] ^= 0xFF;
                stream.write_all(&frame).await.unwrap();
            }
            Response::Hangup => break,
        }
        receipts += 1;
    }
    payloads
}

async fn start_channel(
    respond: impl FnMut(usize) -> Response + Send + 'static,
) -> (SocketAddr, JoinHandle<Vec<Vec<u8>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (addr, tokio::spawn(scripted_channel(listener, respond)))
}

fn config(addr: SocketAddr, seed: u64, slot: Duration) -> AlohaSocketConfig {
    AlohaSocketConfig::new(addr, TAG, slot, Duration::from_millis(500), seed)
}

fn frames_of(data: &[u8], payload_size: usize, seed: u64) -> Vec<alohanet::wire::DataFrame> {
    let mut rng = SmallRng::seed_from_u64(seed);
    fragment::split(data, payload_size, TAG, &mut rng)
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cooperative_channel_delivers_the_file() {
    let (addr, channel) = start_channel(|_| Response::Echo).await;
    let data: Vec<u8> = (0..100u8).collect();
    let frames = frames_of(&data, 40, 42);

    let mut socket = AlohaSocket::connect(config(addr, 42, Duration::from_millis(10))).await;
    let report = socket.transfer(&frames).await.unwrap();

    assert!(report.delivered);
    assert_eq!(report.frames_total, 3);
    assert_eq!(report.frames_delivered, 3);
    assert_eq!(report.bytes_delivered, 100);
    assert_eq!(report.total_transmissions, 3);
    assert_eq!(report.max_transmissions, 1);
    assert_eq!(report.first_payload_length, 40);
    assert!((report.mean_transmissions() - 1.0).abs() < f64::EPSILON);

    drop(socket);
    let payloads = channel.await.unwrap();
    let lengths: Vec<usize> = payloads.iter().map(Vec::len).collect();
    assert_eq!(lengths, vec![40, 40, 20]);
    assert_eq!(payloads.concat(), data);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_noise_forces_backoff_then_recovery() {
    let (addr, channel) = start_channel(|receipt| {
        if receipt == 0 {
            Response::Noise
        } else {
            Response::Echo
        }
    })
    .await;
    let data = vec![0x11; 100];
    let frames = frames_of(&data, 40, 5);

    let mut socket = AlohaSocket::connect(config(addr, 5, Duration::from_millis(10))).await;
    let report = socket.transfer(&frames).await.unwrap();

    assert!(report.delivered);
    assert_eq!(report.frames_total, 3);
    assert_eq!(report.total_transmissions, 4);
    assert_eq!(report.max_transmissions, 2);

    drop(socket);
    assert_eq!(channel.await.unwrap().len(), 4);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_foreign_echo_is_not_an_ack() {
    let (addr, channel) = start_channel(|receipt| {
        if receipt == 0 {
            Response::ForeignEcho
        } else {
            Response::Echo
        }
    })
    .await;
    let data = vec![0x22; 10];
    let frames = frames_of(&data, 40, 6);

    let mut socket = AlohaSocket::connect(config(addr, 6, Duration::from_millis(10))).await;
    let report = socket.transfer(&frames).await.unwrap();

    assert!(report.delivered);
    assert_eq!(report.frames_total, 1);
    assert_eq!(report.total_transmissions, 2);
    assert_eq!(report.max_transmissions, 2);

    drop(socket);
    assert_eq!(channel.await.unwrap().len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stale_sequence_echo_is_not_an_ack() {
    let (addr, channel) = start_channel(|receipt| {
        if receipt == 0 {
            Response::StaleEcho
        } else {
            Response::Echo
        }
    })
    .await;
    let data = vec![0x33; 10];
    let frames = frames_of(&data, 40, 8);

    let mut socket = AlohaSocket::connect(config(addr, 8, Duration::from_millis(10))).await;
    let report = socket.transfer(&frames).await.unwrap();

    assert!(report.delivered);
    assert_eq!(report.total_transmissions, 2);

    drop(socket);
    assert_eq!(channel.await.unwrap().len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_jammed_channel_hits_the_attempt_cap() {
    let (addr, channel) = start_channel(|_| Response::Noise).await;
    let data = vec![0x44; 10];
    let frames = frames_of(&data, 40, 9);

    let mut socket = AlohaSocket::connect(config(addr, 9, Duration::from_millis(1))).await;
    let report = socket.transfer(&frames).await.unwrap();

    assert!(!report.delivered);
    assert_eq!(report.frames_total, 1);
    assert_eq!(report.frames_delivered, 0);
    assert_eq!(report.bytes_delivered, 0);
    assert_eq!(report.total_transmissions, 10);
    assert_eq!(report.max_transmissions, 10);

    drop(socket);
    assert_eq!(channel.await.unwrap().len(), 10);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_channel_hangup_surfaces_as_an_error() {
    let (addr, _channel) = start_channel(|_| Response::Hangup).await;
    let data = vec![0x55; 10];
    let frames = frames_of(&data, 40, 10);

    let mut socket = AlohaSocket::connect(config(addr, 10, Duration::from_millis(10))).await;
    let err = socket.transfer(&frames).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<AlohaIoError>(),
        Some(AlohaIoError::ChannelClosed)
    ));
}

async fn run_sender(addr: SocketAddr, tag: [u8; 6], seed: u64) -> TransferReport {
    let data = vec![seed as u8; 120];
    let mut rng = SmallRng::seed_from_u64(seed);
    let frames = fragment::split(&data, 60, tag, &mut rng);
    let config = AlohaSocketConfig::new(
        addr,
        tag,
        Duration::from_millis(5),
        Duration::from_millis(500),
        seed,
    );
    let mut socket = AlohaSocket::connect(config).await;
    socket.transfer(&frames).await.unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_two_senders_share_the_medium() {
    let arbiter = MediumArbiter::bind(MediumConfig::new(0, Duration::from_millis(5)))
        .await
        .unwrap();
    let port = arbiter.local_addr().unwrap().port();
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let medium = tokio::spawn(arbiter.run(shutdown_rx));

    let left = tokio::spawn(run_sender(addr, [1, 1, 1, 1, 0, 0], 1));
    let right = tokio::spawn(run_sender(addr, [2, 2, 2, 2, 0, 0], 2));
    let (left, right) = (left.await.unwrap(), right.await.unwrap());

    assert!(left.delivered);
    assert!(right.delivered);
    assert_eq!(left.frames_delivered, 2);
    assert_eq!(right.frames_delivered, 2);

    shutdown_tx.send(()).unwrap();
    let reports = medium.await.unwrap();
    assert_eq!(reports.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sender_connects_before_the_channel_listens() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let connect = tokio::spawn(async move {
        AlohaSocket::connect(config(addr, 11, Duration::from_millis(10))).await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let listener = TcpListener::bind(addr).await.unwrap();
    let accepted = listener.accept();
    let (result, socket) = tokio::join!(accepted, connect);
    result.unwrap();
    drop(socket.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_empty_file_produces_an_empty_report() {
    let (addr, _channel) = start_channel(|_| Response::Echo).await;
    let frames = frames_of(&[], 40, 12);

    let mut socket = AlohaSocket::connect(config(addr, 12, Duration::from_millis(10))).await;
    let report = socket.transfer(&frames).await.unwrap();

    assert!(report.delivered);
    assert_eq!(report.frames_total, 0);
    assert_eq!(report.total_transmissions, 0);
    assert_eq!(report.mean_transmissions(), 0.0);
    assert_eq!(report.bandwidth_mbps(), 0.0);
}
