//! Integration tests for the TFTP daemon
//!
//! These tests start a real server on loopback, serving a temporary directory,
//! and drive it with a minimal client.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use tempfile::tempdir;
use tftp::{
    BLOCK_SIZE, FileSystem, Packet, TftpErrorCode, TftpRequest, TftpServer, TftpServerConfig, TransferConfig,
};
use tokio::fs;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

const REPLY_TIMEOUT: Duration = Duration::from_secs(2);

/// Start a server for `root` on an ephemeral loopback port
async fn start_server(root: &Path, file_system: FileSystem) -> (SocketAddr, JoinHandle<anyhow::Result<()>>) {
    let config = TftpServerConfig {
        bind_address: "127.0.0.1:0".to_string(),
        transfer_config: TransferConfig {
            root_dir: root.to_path_buf(),
            retry_interval: Duration::from_millis(300),
            timeout: Duration::from_secs(3),
            local_bind: None,
        },
    };

    let mut server = TftpServer::with_ports(config, file_system, file_system);
    let addr = server.bind().await.unwrap();
    let handle = tokio::spawn(async move { server.serve().await });
    (addr, handle)
}

async fn recv_packet(sock: &UdpSocket) -> (Packet, SocketAddr) {
    let mut buf = [0u8; 1500];
    let (n, from) = timeout(REPLY_TIMEOUT, sock.recv_from(&mut buf))
        .await
        .expect("no reply from server")
        .unwrap();
    (Packet::decode(&buf[..n]).unwrap(), from)
}

/// Download `filename`, acknowledging every block
async fn download(server: SocketAddr, filename: &str) -> Result<Vec<u8>, Packet> {
    let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let rrq = Packet::Request(TftpRequest::read_request(filename, "octet"));
    sock.send_to(&rrq.encode(), server).await.unwrap();

    let (packet, tid) = recv_packet(&sock).await;
    match packet {
        Packet::Ack { block: 0 } => {}
        other => return Err(other),
    }
    assert_ne!(tid, server, "transfer must use its own port");

    let mut contents = Vec::new();
    let mut expected: u16 = 1;
    loop {
        let (packet, from) = recv_packet(&sock).await;
        assert_eq!(from, tid);
        let Packet::Data { block, payload } = packet else {
            return Err(packet);
        };
        assert_eq!(block, expected);
        contents.extend_from_slice(&payload);
        sock.send_to(&Packet::Ack { block }.encode(), tid).await.unwrap();

        if payload.len() < BLOCK_SIZE {
            return Ok(contents);
        }
        expected = expected.wrapping_add(1);
    }
}

/// Upload `contents` as `filename`, waiting for every ACK
async fn upload(server: SocketAddr, filename: &str, contents: &[u8]) -> Result<(), Packet> {
    let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let wrq = Packet::Request(TftpRequest::write_request(filename, "octet"));
    sock.send_to(&wrq.encode(), server).await.unwrap();

    let (packet, tid) = recv_packet(&sock).await;
    match packet {
        Packet::Ack { block: 0 } => {}
        other => return Err(other),
    }

    // A final empty block terminates uploads that are a multiple of the block size
    let mut chunks: Vec<&[u8]> = contents.chunks(BLOCK_SIZE).collect();
    if contents.len() % BLOCK_SIZE == 0 {
        chunks.push(&[]);
    }

    for (i, chunk) in chunks.into_iter().enumerate() {
        let block = (i + 1) as u16;
        let data = Packet::Data {
            block,
            payload: chunk.to_vec(),
        };
        sock.send_to(&data.encode(), tid).await.unwrap();

        match recv_packet(&sock).await.0 {
            Packet::Ack { block: acked } if acked == block => {}
            other => return Err(other),
        }
    }
    Ok(())
}

#[tokio::test]
async fn test_read_request_end_to_end() {
    let temp_dir = tempdir().unwrap();
    let contents: Vec<u8> = (0..1300u32).map(|i| (i % 251) as u8).collect();
    fs::write(temp_dir.path().join("pxelinux.0"), &contents).await.unwrap();

    let (server, handle) = start_server(temp_dir.path(), FileSystem::default()).await;

    assert_eq!(download(server, "pxelinux.0").await.unwrap(), contents);

    handle.abort();
}

#[tokio::test]
async fn test_read_request_block_multiple() {
    let temp_dir = tempdir().unwrap();
    let contents = vec![0x5a; BLOCK_SIZE * 2];
    fs::write(temp_dir.path().join("exact.bin"), &contents).await.unwrap();

    let (server, handle) = start_server(temp_dir.path(), FileSystem::default()).await;

    assert_eq!(download(server, "exact.bin").await.unwrap(), contents);

    handle.abort();
}

#[tokio::test]
async fn test_write_request_end_to_end() {
    let temp_dir = tempdir().unwrap();
    let contents: Vec<u8> = (0..(BLOCK_SIZE * 3 + 17)).map(|i| (i % 7) as u8).collect();

    let (server, handle) = start_server(temp_dir.path(), FileSystem::default()).await;

    upload(server, "upload.bin", &contents).await.unwrap();

    // The file is flushed before the final ACK goes out
    let written = fs::read(temp_dir.path().join("upload.bin")).await.unwrap();
    assert_eq!(written, contents);

    handle.abort();
}

#[tokio::test]
async fn test_errors_reported_to_client() {
    let temp_dir = tempdir().unwrap();
    fs::write(temp_dir.path().join("existing.txt"), b"keep me").await.unwrap();

    let (server, handle) = start_server(temp_dir.path(), FileSystem { overwrite: false }).await;

    let err = download(server, "missing.txt").await.unwrap_err();
    assert_eq!(err, Packet::error(TftpErrorCode::FileNotFound));

    let err = download(server, "../etc/passwd").await.unwrap_err();
    assert!(matches!(err, Packet::Error { code, .. } if code == TftpErrorCode::AccessViolation.as_u16()));

    let err = upload(server, "existing.txt", b"replaced").await.unwrap_err();
    assert_eq!(err, Packet::error(TftpErrorCode::FileAlreadyExists));
    assert_eq!(
        fs::read(temp_dir.path().join("existing.txt")).await.unwrap(),
        b"keep me"
    );

    handle.abort();
}

#[tokio::test]
async fn test_non_octet_mode_rejected() {
    let temp_dir = tempdir().unwrap();
    fs::write(temp_dir.path().join("readme.txt"), b"text").await.unwrap();

    let (server, handle) = start_server(temp_dir.path(), FileSystem::default()).await;

    let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let rrq = Packet::Request(TftpRequest::read_request("readme.txt", "netascii"));
    sock.send_to(&rrq.encode(), server).await.unwrap();

    let (packet, _) = recv_packet(&sock).await;
    assert!(matches!(packet, Packet::Error { code, .. } if code == TftpErrorCode::IllegalOperation.as_u16()));

    handle.abort();
}

#[tokio::test]
async fn test_concurrent_transfers() {
    let temp_dir = tempdir().unwrap();
    for i in 0..4 {
        let contents = vec![i as u8; BLOCK_SIZE * 4 + i];
        fs::write(temp_dir.path().join(format!("file{}.bin", i)), contents)
            .await
            .unwrap();
    }

    let (server, handle) = start_server(temp_dir.path(), FileSystem::default()).await;

    let downloads: Vec<_> = (0..4)
        .map(|i| tokio::spawn(async move { (i, download(server, &format!("file{}.bin", i)).await) }))
        .collect();

    for task in downloads {
        let (i, result) = task.await.unwrap();
        assert_eq!(result.unwrap(), vec![i as u8; BLOCK_SIZE * 4 + i]);
    }

    handle.abort();
}

#[tokio::test]
async fn test_server_survives_garbage() {
    let temp_dir = tempdir().unwrap();
    fs::write(temp_dir.path().join("boot.cfg"), b"default linux").await.unwrap();

    let (server, handle) = start_server(temp_dir.path(), FileSystem::default()).await;

    let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    sock.send_to(&[], server).await.unwrap();
    sock.send_to(&[0, 1, b'x'], server).await.unwrap();
    sock.send_to(&[0, 99, 0, 0], server).await.unwrap();
    sock.send_to(&Packet::Ack { block: 0 }.encode(), server).await.unwrap();
    sleep(Duration::from_millis(100)).await;

    assert!(!handle.is_finished());
    assert_eq!(download(server, "boot.cfg").await.unwrap(), b"default linux");

    handle.abort();
}
