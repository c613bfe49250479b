//! RFB protocol tests over a loopback socket: a real session (with a PTY
//! running `cat`) on one side, a hand-rolled client on the other.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::LocalSet;
use tokio::time::timeout;

use rfbterm::pty::HostPty;
use rfbterm::render::Depth;
use rfbterm::rfb::auth::encrypt_challenge;
use rfbterm::rfb::{ServerOptions, Session};
use rfbterm::system::TerminalSystem;

const TITLE: &str = "rfbterm test";

/// Start a session on an ephemeral port. 80x24 cells at depth 8 gives the
/// 640x384 pixel framebuffer the assertions below expect.
async fn start_session(password: Option<String>) -> (Session, SocketAddr) {
    let system = TerminalSystem::new(80, 24, Depth::D8, 50, TITLE.to_string());
    let (host_tx, host_rx) = mpsc::unbounded_channel();
    let host = HostPty::spawn(&["/bin/cat".to_string()], 80, 24, host_tx).expect("spawn cat");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let opts = ServerOptions {
        password,
        graphic_keyboard: false,
    };
    (Session::new(listener, system, host, host_rx, opts), addr)
}

async fn read_exact(sock: &mut TcpStream, n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    timeout(Duration::from_secs(5), sock.read_exact(&mut buf))
        .await
        .expect("read timed out")
        .expect("read failed");
    buf
}

/// Drive version + security (no auth) + ClientInit, returning the raw
/// ServerInit bytes.
async fn handshake_no_auth(sock: &mut TcpStream) -> Vec<u8> {
    let version = read_exact(sock, 12).await;
    assert_eq!(&version, b"RFB 003.003\n");
    sock.write_all(b"RFB 003.003\n").await.unwrap();

    let security = read_exact(sock, 4).await;
    assert_eq!(security, [0, 0, 0, 1]);

    sock.write_all(&[1]).await.unwrap(); // ClientInit: shared
    read_exact(sock, 2 + 2 + 16 + 4 + TITLE.len()).await
}

#[tokio::test]
async fn server_init_is_byte_exact() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let (mut session, addr) = start_session(None).await;
            tokio::task::spawn_local(async move {
                let _ = session.run().await;
            });

            let mut sock = TcpStream::connect(addr).await.unwrap();
            let init = handshake_no_auth(&mut sock).await;

            let mut expected = Vec::new();
            expected.extend_from_slice(&640u16.to_be_bytes());
            expected.extend_from_slice(&384u16.to_be_bytes());
            let host_be = u8::from(cfg!(target_endian = "big"));
            expected.extend_from_slice(&[8, 8, host_be, 1]);
            expected.extend_from_slice(&7u16.to_be_bytes());
            expected.extend_from_slice(&7u16.to_be_bytes());
            expected.extend_from_slice(&3u16.to_be_bytes());
            expected.extend_from_slice(&[5, 2, 0, 0, 0, 0]);
            expected.extend_from_slice(&(TITLE.len() as u32).to_be_bytes());
            expected.extend_from_slice(TITLE.as_bytes());
            assert_eq!(init, expected);
        })
        .await;
}

#[tokio::test]
async fn full_update_covers_the_requested_region() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let (mut session, addr) = start_session(None).await;
            tokio::task::spawn_local(async move {
                let _ = session.run().await;
            });

            let mut sock = TcpStream::connect(addr).await.unwrap();
            handshake_no_auth(&mut sock).await;

            // Non-incremental FramebufferUpdateRequest for the whole screen.
            let mut req = vec![3u8, 0];
            req.extend_from_slice(&0u16.to_be_bytes());
            req.extend_from_slice(&0u16.to_be_bytes());
            req.extend_from_slice(&640u16.to_be_bytes());
            req.extend_from_slice(&384u16.to_be_bytes());
            sock.write_all(&req).await.unwrap();

            let header = read_exact(&mut sock, 4).await;
            assert_eq!(header[0], 0); // FramebufferUpdate
            let n_rects = u16::from_be_bytes([header[2], header[3]]);
            assert!(n_rects > 0);

            let mut area = 0usize;
            for _ in 0..n_rects {
                let rect = read_exact(&mut sock, 12).await;
                let w = usize::from(u16::from_be_bytes([rect[4], rect[5]]));
                let h = usize::from(u16::from_be_bytes([rect[6], rect[7]]));
                let encoding = i32::from_be_bytes([rect[8], rect[9], rect[10], rect[11]]);
                assert_eq!(encoding, 0, "raw encoding expected");
                // Depth 8: one byte per pixel.
                let _payload = read_exact(&mut sock, w * h).await;
                area += w * h;
            }
            assert_eq!(area, 640 * 384);
        })
        .await;
}

#[tokio::test]
async fn vnc_auth_accepts_the_right_password() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let (mut session, addr) = start_session(Some("hunter2".into())).await;
            tokio::task::spawn_local(async move {
                let _ = session.run().await;
            });

            let mut sock = TcpStream::connect(addr).await.unwrap();
            let version = read_exact(&mut sock, 12).await;
            assert_eq!(&version, b"RFB 003.003\n");
            sock.write_all(b"RFB 003.003\n").await.unwrap();

            let security = read_exact(&mut sock, 4).await;
            assert_eq!(security, [0, 0, 0, 2]);
            let challenge: [u8; 16] = read_exact(&mut sock, 16).await.try_into().unwrap();

            let response = encrypt_challenge("hunter2", &challenge);
            sock.write_all(&response).await.unwrap();
            let result = read_exact(&mut sock, 4).await;
            assert_eq!(result, [0, 0, 0, 0]);
        })
        .await;
}

#[tokio::test]
async fn vnc_auth_rejects_a_wrong_password() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let (mut session, addr) = start_session(Some("hunter2".into())).await;
            tokio::task::spawn_local(async move {
                let _ = session.run().await;
            });

            let mut sock = TcpStream::connect(addr).await.unwrap();
            let _version = read_exact(&mut sock, 12).await;
            sock.write_all(b"RFB 003.003\n").await.unwrap();
            let _security = read_exact(&mut sock, 4).await;
            let challenge: [u8; 16] = read_exact(&mut sock, 16).await.try_into().unwrap();

            let response = encrypt_challenge("wrong", &challenge);
            sock.write_all(&response).await.unwrap();

            let result = read_exact(&mut sock, 4).await;
            assert_eq!(result, [0, 0, 0, 1]);
            let reason_len = u32::from_be_bytes(read_exact(&mut sock, 4).await.try_into().unwrap());
            let reason = read_exact(&mut sock, reason_len as usize).await;
            assert_eq!(reason, b"Authentication failure");

            // The server closes the connection afterwards.
            let mut rest = Vec::new();
            let n = timeout(Duration::from_secs(5), sock.read_to_end(&mut rest))
                .await
                .expect("close timed out")
                .expect("read failed");
            assert_eq!(n, 0);
        })
        .await;
}

#[tokio::test]
async fn bad_version_closes_the_connection() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let (mut session, addr) = start_session(None).await;
            tokio::task::spawn_local(async move {
                let _ = session.run().await;
            });

            let mut sock = TcpStream::connect(addr).await.unwrap();
            let _version = read_exact(&mut sock, 12).await;
            sock.write_all(b"RFB 009.009\n").await.unwrap();

            let mut rest = Vec::new();
            let n = timeout(Duration::from_secs(5), sock.read_to_end(&mut rest))
                .await
                .expect("close timed out")
                .expect("read failed");
            assert_eq!(n, 0);
        })
        .await;
}
