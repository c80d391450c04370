//! Integration tests: the transaction engine against scripted servers on
//! real localhost sockets.
//!
//! Each test binds an ephemeral listener, runs a short server script on a
//! thread, and drives a [`ClientSession`] against it.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use rtsp_client::{
    ClientSession, InterleavedHandoff, SessionConfig, TransportBridge, TransportKind,
};

/// Read one complete RTSP request (through the blank header line).
fn read_request(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut raw = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        if stream.read(&mut byte)? == 0 {
            break;
        }
        raw.push(byte[0]);
        if raw.ends_with(b"\r\n\r\n") {
            break;
        }
    }
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

fn cseq_of(request: &str) -> String {
    request
        .lines()
        .find(|l| l.to_ascii_lowercase().starts_with("cseq:"))
        .and_then(|l| l.split(':').nth(1))
        .map(|v| v.trim().to_string())
        .unwrap_or_default()
}

fn ok_response(cseq: &str, extra_headers: &str) -> String {
    format!("RTSP/1.0 200 OK\r\nCSeq: {cseq}\r\n{extra_headers}\r\n")
}

fn spawn_server<F>(script: F) -> SocketAddr
where
    F: FnOnce(TcpListener) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind test listener");
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || script(listener));
    addr
}

fn session_for(addr: SocketAddr) -> ClientSession {
    ClientSession::new(SessionConfig::new(addr, &format!("rtsp://{addr}/stream")))
}

#[test]
fn setup_negotiates_session_state() {
    let addr = spawn_server(|listener| {
        let (mut stream, _) = listener.accept().unwrap();
        let request = read_request(&mut stream).unwrap();
        assert!(request.starts_with("SETUP "), "got: {request}");
        let cseq = cseq_of(&request);
        let headers =
            "Session: id1;timeout=10\r\nTransport: RTP/AVP;unicast;client_port=5000-5001\r\n";
        stream
            .write_all(ok_response(&cseq, headers).as_bytes())
            .unwrap();
    });

    let session = session_for(addr);
    let response = session
        .setup(
            &format!("rtsp://{addr}/stream/track1"),
            "RTP/AVP;unicast;client_port=5000-5001",
        )
        .expect("transaction")
        .expect("response");

    assert_eq!(response.status_code, 200);
    assert_eq!(session.session_id(), "id1");
    assert_eq!(session.session_timeout(), Duration::from_secs(10));
    assert_eq!(session.messages_sent(), 1);
    assert!(session.bytes_sent() > 0);
    assert!(session.round_trip_time().is_some());
}

#[test]
fn cseq_increases_across_requests() {
    let addr = spawn_server(|listener| {
        let (mut stream, _) = listener.accept().unwrap();
        for _ in 0..3 {
            let request = read_request(&mut stream).unwrap();
            let cseq = cseq_of(&request);
            stream.write_all(ok_response(&cseq, "").as_bytes()).unwrap();
        }
    });

    let session = session_for(addr);
    let mut seen = Vec::new();
    for _ in 0..3 {
        let response = session.options().unwrap().expect("response");
        seen.push(response.cseq().expect("echoed CSeq"));
    }
    assert!(
        seen.windows(2).all(|w| w[0] < w[1]),
        "CSeq not strictly increasing: {seen:?}"
    );
}

#[test]
fn options_records_supported_method() {
    let addr = spawn_server(|listener| {
        let (mut stream, _) = listener.accept().unwrap();
        let request = read_request(&mut stream).unwrap();
        let cseq = cseq_of(&request);
        stream
            .write_all(ok_response(&cseq, "Public: OPTIONS, DESCRIBE\r\n").as_bytes())
            .unwrap();
    });

    let session = session_for(addr);
    session.options().unwrap().expect("response");
    assert_eq!(session.supported_methods(), vec!["OPTIONS".to_string()]);
}

#[test]
fn basic_auth_retries_exactly_once() {
    let (tx, rx) = mpsc::channel();
    let addr = spawn_server(move |listener| {
        let (mut stream, _) = listener.accept().unwrap();
        let challenge = "WWW-Authenticate: Basic realm=\"wonderland\"\r\n";

        let first = read_request(&mut stream).unwrap();
        let cseq = cseq_of(&first);
        tx.send(first).unwrap();
        stream
            .write_all(
                format!("RTSP/1.0 401 Unauthorized\r\nCSeq: {cseq}\r\n{challenge}\r\n").as_bytes(),
            )
            .unwrap();

        let second = read_request(&mut stream).unwrap();
        let cseq = cseq_of(&second);
        tx.send(second).unwrap();
        // Same, non-stale challenge again: the client must give up.
        stream
            .write_all(
                format!("RTSP/1.0 401 Unauthorized\r\nCSeq: {cseq}\r\n{challenge}\r\n").as_bytes(),
            )
            .unwrap();

        // Anything else arriving here is a bug in the retry guard.
        stream
            .set_read_timeout(Some(Duration::from_millis(300)))
            .unwrap();
        if let Ok(extra) = read_request(&mut stream) {
            if !extra.is_empty() {
                tx.send(extra).unwrap();
            }
        }
    });

    let config = SessionConfig::new(addr, &format!("rtsp://{addr}/stream"))
        .with_credential(rtsp_client::Credential::new("user", "pass"), rtsp_client::AuthScheme::None);
    let session = ClientSession::new(config);

    let response = session.describe().unwrap().expect("final response");
    assert_eq!(response.status_code, 401);

    let first = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert!(
        !first.to_ascii_lowercase().contains("authorization:"),
        "first request must be unauthenticated: {first}"
    );
    let second = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert!(
        second.contains("Authorization: Basic dXNlcjpwYXNz"),
        "retried request missing Basic credentials: {second}"
    );
    assert!(
        rx.recv_timeout(Duration::from_millis(500)).is_err(),
        "a third request was sent for an already-tried challenge"
    );
}

#[test]
fn reconnects_and_resends_identical_bytes() {
    let (tx, rx) = mpsc::channel();
    let addr = spawn_server(move |listener| {
        // First connection: swallow the request, then drop the socket.
        let (mut first_conn, _) = listener.accept().unwrap();
        let first = read_request(&mut first_conn).unwrap();
        tx.send(first).unwrap();
        drop(first_conn);

        // Second connection: expect the same bytes, then answer.
        let (mut second_conn, _) = listener.accept().unwrap();
        let second = read_request(&mut second_conn).unwrap();
        let cseq = cseq_of(&second);
        tx.send(second).unwrap();
        second_conn
            .write_all(ok_response(&cseq, "").as_bytes())
            .unwrap();
    });

    let session = session_for(addr);
    let response = session.options().unwrap().expect("response after reconnect");
    assert_eq!(response.status_code, 200);

    let first = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    let second = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(first, second, "retransmission altered the request bytes");
}

#[test]
fn concurrent_sends_serialize_on_the_gate() {
    let addr = spawn_server(|listener| {
        let (mut stream, _) = listener.accept().unwrap();
        for _ in 0..2 {
            let request = read_request(&mut stream).unwrap();
            let cseq = cseq_of(&request);
            // Hold the reply back; the second sender must stay gated.
            thread::sleep(Duration::from_millis(50));
            stream.write_all(ok_response(&cseq, "").as_bytes()).unwrap();
        }
    });

    let session = Arc::new(session_for(addr));
    session.connect().unwrap();

    let first = {
        let session = session.clone();
        thread::spawn(move || session.options())
    };
    let second = {
        let session = session.clone();
        thread::spawn(move || session.describe())
    };

    let first = first.join().unwrap().unwrap().expect("first response");
    let second = second.join().unwrap().unwrap().expect("second response");
    assert_eq!(first.status_code, 200);
    assert_eq!(second.status_code, 200);
    assert_ne!(first.cseq(), second.cseq());
}

#[test]
fn silent_server_wait_is_abandoned_at_the_ceiling() {
    let addr = spawn_server(|listener| {
        let (mut stream, _) = listener.accept().unwrap();
        let _ = read_request(&mut stream);
        // Hold the connection open without ever answering.
        thread::sleep(Duration::from_secs(2));
    });

    let config = SessionConfig::new(addr, &format!("rtsp://{addr}/stream"))
        .with_session_timeout(Duration::from_millis(400)); // backoff ceiling 200ms
    let session = ClientSession::new(config);

    let started = Instant::now();
    let response = session.options().expect("abandoned wait is not an error");
    assert!(response.is_none());
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "wait was not bounded by the backoff ceiling"
    );
}

#[test]
fn udp_request_is_retransmitted() {
    let server = UdpSocket::bind("127.0.0.1:0").unwrap();
    let addr = server.local_addr().unwrap();

    let script = thread::spawn(move || {
        let mut buf = [0u8; 2048];
        // Drop the first copy on the floor, answer the retransmission.
        let _ = server.recv_from(&mut buf).unwrap();
        let (n, peer) = server.recv_from(&mut buf).unwrap();
        let request = String::from_utf8_lossy(&buf[..n]).into_owned();
        let cseq = cseq_of(&request);
        server
            .send_to(ok_response(&cseq, "").as_bytes(), peer)
            .unwrap();
        request
    });

    let config = SessionConfig::new(addr, &format!("rtsp://{addr}/stream"))
        .with_transport(TransportKind::Udp);
    let session = ClientSession::new(config);

    let response = session.options().unwrap().expect("response");
    assert_eq!(response.status_code, 200);
    assert!(session.messages_sent() >= 2, "request was never retransmitted");

    let request = script.join().unwrap();
    assert!(request.starts_with("OPTIONS "));
}

#[test]
fn version_negotiation_resends_once() {
    let addr = spawn_server(|listener| {
        let (mut stream, _) = listener.accept().unwrap();

        let first = read_request(&mut stream).unwrap();
        assert!(first.contains(" RTSP/1.0\r\n"));
        let cseq = cseq_of(&first);
        stream
            .write_all(
                format!("RTSP/2.0 505 RTSP Version Not Supported\r\nCSeq: {cseq}\r\n\r\n")
                    .as_bytes(),
            )
            .unwrap();

        let second = read_request(&mut stream).unwrap();
        assert!(
            second.contains(" RTSP/2.0\r\n"),
            "resend did not adopt server version: {second}"
        );
        let cseq = cseq_of(&second);
        stream
            .write_all(format!("RTSP/2.0 200 OK\r\nCSeq: {cseq}\r\n\r\n").as_bytes())
            .unwrap();
    });

    let session = session_for(addr);
    let response = session.options().unwrap().expect("response");
    assert_eq!(response.status_code, 200);
    assert_eq!(response.version, "RTSP/2.0");
}

struct RecordingBridge {
    activations: AtomicUsize,
    handoffs: Mutex<Vec<Vec<u8>>>,
}

impl RecordingBridge {
    fn new() -> Self {
        RecordingBridge {
            activations: AtomicUsize::new(0),
            handoffs: Mutex::new(Vec::new()),
        }
    }
}

impl TransportBridge for RecordingBridge {
    fn is_active(&self) -> bool {
        false
    }

    fn activate(&self) {
        self.activations.fetch_add(1, Ordering::SeqCst);
    }

    fn adopt_socket(&self, _remote: SocketAddr) -> Option<TcpStream> {
        None
    }

    fn handoff(&self, handoff: InterleavedHandoff) {
        self.handoffs.lock().unwrap().push(handoff.bytes().to_vec());
    }
}

#[test]
fn interleaved_bytes_are_handed_off() {
    let addr = spawn_server(|listener| {
        let (mut stream, _) = listener.accept().unwrap();
        let request = read_request(&mut stream).unwrap();
        let cseq = cseq_of(&request);

        // An interleaved RTP frame first ($-framed, RFC 2326 §10.12),
        // then the actual answer.
        stream
            .write_all(&[0x24, 0x00, 0x00, 0x04, 0x01, 0x02, 0x03, 0x04])
            .unwrap();
        stream.flush().unwrap();
        thread::sleep(Duration::from_millis(30));
        stream.write_all(ok_response(&cseq, "").as_bytes()).unwrap();
    });

    let bridge = Arc::new(RecordingBridge::new());
    let config = SessionConfig::new(addr, &format!("rtsp://{addr}/stream"));
    let session = ClientSession::with_bridge(config, bridge.clone());

    let response = session.options().unwrap().expect("response");
    assert_eq!(response.status_code, 200);

    let handoffs = bridge.handoffs.lock().unwrap();
    assert_eq!(handoffs.len(), 1, "interleaved frame was not handed off");
    assert_eq!(handoffs[0], vec![0x24, 0x00, 0x00, 0x04, 0x01, 0x02, 0x03, 0x04]);
}

#[test]
fn disposed_session_fails_fast() {
    let addr = spawn_server(|listener| {
        let _ = listener.accept();
    });

    let session = session_for(addr);
    session.dispose();
    assert!(session.options().is_err());
}
