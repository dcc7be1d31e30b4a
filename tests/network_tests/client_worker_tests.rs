//! Client Worker Tests
//!
//! Runs the client bridge on a thread between a fake server socket and the
//! caller's channel ends.

use std::io::{self, Read};
use std::net::{TcpListener, TcpStream};
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use netframe::network::ClientWorker;
use netframe::process::SharedFlag;
use netframe::protocol::{read_message, write_message, Message};
use netframe::{ClientConfig, NetframeError};

// =============================================================================
// Test Helpers
// =============================================================================

struct Bridge {
    /// Caller's read end of the worker → caller channel
    caller_in: UnixStream,
    /// Caller's write end of the caller → worker channel
    caller_out: UnixStream,
    /// Fake server side of the TCP connection
    peer: TcpStream,
    stop: Arc<SharedFlag>,
    lost: Arc<SharedFlag>,
    handle: JoinHandle<netframe::Result<()>>,
}

impl Bridge {
    fn start() -> Self {
        Self::start_with(test_config().build())
    }

    fn start_with(config: ClientConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let stream = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (peer, _) = listener.accept().unwrap();
        peer.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

        let (caller_in, worker_in) = UnixStream::pair().unwrap();
        let (caller_out, worker_out) = UnixStream::pair().unwrap();
        caller_in
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();

        let stop = Arc::new(SharedFlag::new().unwrap());
        let lost = Arc::new(SharedFlag::new().unwrap());

        let handle = {
            let stop = Arc::clone(&stop);
            let lost = Arc::clone(&lost);
            thread::spawn(move || {
                ClientWorker::new(stream, worker_in, worker_out, stop, lost, config)?.run()
            })
        };

        Self {
            caller_in,
            caller_out,
            peer,
            stop,
            lost,
            handle,
        }
    }
}

fn test_config() -> netframe::config::ClientConfigBuilder {
    ClientConfig::builder()
        .stop_poll_interval(Duration::from_millis(10))
        .graceful_shutdown_timeout(Duration::from_secs(2))
}

fn assert_eof<R: Read>(reader: &mut R) {
    match read_message(reader) {
        Err(NetframeError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
        other => panic!("expected EOF, got {:?}", other),
    }
}

// =============================================================================
// Bridging Tests
// =============================================================================

#[test]
fn test_outbound_messages_reach_peer_in_order() {
    let mut bridge = Bridge::start();

    for i in 0..5u16 {
        write_message(&mut bridge.caller_out, &Message::with_payload(i, b"out")).unwrap();
    }
    for i in 0..5u16 {
        let msg = read_message(&mut bridge.peer).unwrap();
        assert_eq!(msg.id(), i);
        assert_eq!(msg.payload(), b"out");
    }

    bridge.stop.set();
    assert_eof(&mut bridge.peer);
    drop(bridge.peer);
    bridge.handle.join().unwrap().unwrap();
}

#[test]
fn test_inbound_messages_reach_caller_in_order() {
    let mut bridge = Bridge::start();

    for i in 0..5u16 {
        write_message(&mut bridge.peer, &Message::with_payload(i, b"in")).unwrap();
    }
    for i in 0..5u16 {
        assert_eq!(
            read_message(&mut bridge.caller_in).unwrap(),
            Message::with_payload(i, b"in")
        );
    }

    bridge.stop.set();
    drop(bridge.peer);
    bridge.handle.join().unwrap().unwrap();
}

#[test]
fn test_round_trip_through_echoing_peer() {
    let mut bridge = Bridge::start();

    let mut peer = bridge.peer.try_clone().unwrap();
    let echo = thread::spawn(move || {
        while let Ok(msg) = read_message(&mut peer) {
            if write_message(&mut peer, &msg).is_err() {
                break;
            }
        }
    });

    for i in 0..20u16 {
        let msg = Message::with_payload(i, vec![i as u8; 100]);
        write_message(&mut bridge.caller_out, &msg).unwrap();
        assert_eq!(read_message(&mut bridge.caller_in).unwrap(), msg);
    }

    bridge.stop.set();
    drop(bridge.peer);
    echo.join().unwrap();
    bridge.handle.join().unwrap().unwrap();
}

#[test]
fn test_bounded_outbound_queue_delivers_everything() {
    let mut bridge = Bridge::start_with(test_config().outbound_capacity(2).build());

    for i in 0..50u16 {
        write_message(&mut bridge.caller_out, &Message::new(i)).unwrap();
    }
    for i in 0..50u16 {
        assert_eq!(read_message(&mut bridge.peer).unwrap().id(), i);
    }

    bridge.stop.set();
    drop(bridge.peer);
    bridge.handle.join().unwrap().unwrap();
}

// =============================================================================
// Connection Loss Tests
// =============================================================================

#[test]
fn test_peer_close_delivers_pending_then_sentinel() {
    let mut bridge = Bridge::start();

    write_message(&mut bridge.peer, &Message::with_payload(1, b"a")).unwrap();
    write_message(&mut bridge.peer, &Message::with_payload(2, b"b")).unwrap();
    drop(bridge.peer);

    assert_eq!(read_message(&mut bridge.caller_in).unwrap().id(), 1);
    assert_eq!(read_message(&mut bridge.caller_in).unwrap().id(), 2);
    assert_eof(&mut bridge.caller_in);

    bridge.handle.join().unwrap().unwrap();
    assert!(bridge.lost.is_set());
}

#[test]
fn test_partial_frame_before_close_is_discarded() {
    let mut bridge = Bridge::start();

    let packed = Message::with_payload(1, b"abcdef").pack();
    std::io::Write::write_all(&mut bridge.peer, &packed[..7]).unwrap();
    drop(bridge.peer);

    assert_eof(&mut bridge.caller_in);
    bridge.handle.join().unwrap().unwrap();
    assert!(bridge.lost.is_set());
}

// =============================================================================
// Stop Tests
// =============================================================================

#[test]
fn test_stop_flag_closes_gracefully() {
    let mut bridge = Bridge::start();

    bridge.stop.set();
    assert_eof(&mut bridge.peer);
    drop(bridge.peer);

    bridge.handle.join().unwrap().unwrap();
    assert!(!bridge.lost.is_set());
    assert_eof(&mut bridge.caller_in);
}

#[test]
fn test_caller_closing_outbound_stops_worker() {
    let mut bridge = Bridge::start();

    write_message(&mut bridge.caller_out, &Message::new(9)).unwrap();
    drop(bridge.caller_out);

    assert_eq!(read_message(&mut bridge.peer).unwrap().id(), 9);
    assert_eof(&mut bridge.peer);
    drop(bridge.peer);

    bridge.handle.join().unwrap().unwrap();
    assert!(!bridge.lost.is_set());
}
