use evloop::{
    Backend, Connection, ConnectionHandler, ConnectionState, EventLoop, EventLoopBuilder,
    Transform, TransformHandler,
};

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

fn backends() -> Vec<Backend> {
    let mut backends = vec![Backend::Select, Backend::Poll];
    if cfg!(target_os = "linux") {
        backends.push(Backend::Epoll);
        backends.push(Backend::EpollEdge);
    }
    backends
}

fn turn_until<H: ConnectionHandler>(
    event_loop: &mut EventLoop<H>,
    what: &str,
    mut done: impl FnMut(&EventLoop<H>) -> bool,
) {
    let deadline = Instant::now() + Duration::from_secs(5);

    while !done(event_loop) {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        event_loop
            .turn(Some(Duration::from_millis(10)))
            .expect("turn failed");
    }
}

fn exchange(client: &mut TcpStream, message: &[u8]) -> Vec<u8> {
    client.write_all(message).expect("write failed");
    let mut reply = vec![0u8; message.len()];
    client.read_exact(&mut reply).expect("read failed");
    reply
}

/// Records every callback and echoes input through ROT13.
#[derive(Debug, Default)]
struct Recorder {
    calls: Vec<(&'static str, usize)>,
}

impl Recorder {
    fn calls_for(&self, token: usize) -> Vec<&'static str> {
        self.calls
            .iter()
            .filter(|(_, t)| *t == token)
            .map(|(name, _)| *name)
            .collect()
    }

    fn count(&self, call: &str) -> usize {
        self.calls.iter().filter(|(name, _)| *name == call).count()
    }
}

impl ConnectionHandler for Recorder {
    fn on_connection_completed(&mut self, conn: &mut Connection) {
        self.calls.push(("completed", conn.token()));
    }

    fn on_message(&mut self, conn: &mut Connection) {
        self.calls.push(("message", conn.token()));

        let pending = conn.input().readable_size();
        let mut bytes = conn.input_mut().read(pending);
        Transform::Rot13.apply(&mut bytes);
        conn.send(&bytes);
    }

    fn on_write_completed(&mut self, conn: &mut Connection) {
        self.calls.push(("written", conn.token()));
    }

    fn on_connection_closed(&mut self, conn: &Connection) {
        assert_eq!(conn.state(), ConnectionState::Closing);
        self.calls.push(("closed", conn.token()));
    }
}

#[test]
fn test_rot13_on_every_backend() {
    for backend in backends() {
        let mut event_loop = EventLoopBuilder::new()
            .backend(backend)
            .build(TransformHandler::new(Transform::Rot13))
            .expect("failed to build event loop");
        let addr = event_loop.bind("127.0.0.1:0").expect("bind failed");

        let mut client = TcpStream::connect(addr).expect("connect failed");
        turn_until(&mut event_loop, "accept", |ev| ev.connection_count() == 1);

        client.write_all(b"Hello").expect("write failed");
        turn_until(&mut event_loop, "echo", |ev| {
            ev.connection_state(0) == Some(ConnectionState::Active)
        });

        let mut reply = [0u8; 5];
        client.read_exact(&mut reply).expect("read failed");
        assert_eq!(&reply, b"Uryyb", "backend {backend}");
    }
}

#[test]
fn test_running_loop_serves_and_stops() {
    let mut event_loop = EventLoopBuilder::new()
        .build(TransformHandler::new(Transform::Rot13))
        .expect("failed to build event loop");
    let addr = event_loop.bind("127.0.0.1:0").expect("bind failed");
    let handle = event_loop.handle();

    let server = thread::spawn(move || event_loop.run());

    let mut client = TcpStream::connect(addr).expect("connect failed");
    assert_eq!(exchange(&mut client, b"Hello"), b"Uryyb");
    assert_eq!(exchange(&mut client, b"Zoo"), b"Mbb");
    assert_eq!(handle.connection_count(), 1);

    handle.stop();
    server
        .join()
        .expect("loop thread panicked")
        .expect("loop failed");
}

#[cfg(target_os = "linux")]
#[test]
fn test_edge_triggered_accepts_all_pending_in_one_turn() {
    let mut event_loop = EventLoopBuilder::new()
        .backend(Backend::EpollEdge)
        .build(Recorder::default())
        .expect("failed to build event loop");
    let addr = event_loop.bind("127.0.0.1:0").expect("bind failed");

    let clients: Vec<_> = (0..5)
        .map(|_| TcpStream::connect(addr).expect("connect failed"))
        .collect();
    thread::sleep(Duration::from_millis(50));

    let handled = event_loop
        .turn(Some(Duration::from_secs(1)))
        .expect("turn failed");
    assert_eq!(handled, 1);
    assert_eq!(event_loop.connection_count(), clients.len());
}

#[test]
fn test_level_triggered_accepts_one_per_turn() {
    let mut event_loop = EventLoopBuilder::new()
        .backend(Backend::Poll)
        .build(Recorder::default())
        .expect("failed to build event loop");
    let addr = event_loop.bind("127.0.0.1:0").expect("bind failed");

    let _clients: Vec<_> = (0..3)
        .map(|_| TcpStream::connect(addr).expect("connect failed"))
        .collect();
    thread::sleep(Duration::from_millis(50));

    event_loop
        .turn(Some(Duration::from_secs(1)))
        .expect("turn failed");
    assert_eq!(event_loop.connection_count(), 1);

    turn_until(&mut event_loop, "remaining accepts", |ev| {
        ev.connection_count() == 3
    });
}

#[test]
fn test_closing_one_client_keeps_the_other() {
    for backend in backends() {
        let mut event_loop = EventLoopBuilder::new()
            .backend(backend)
            .build(Recorder::default())
            .expect("failed to build event loop");
        let addr = event_loop.bind("127.0.0.1:0").expect("bind failed");

        let mut first = TcpStream::connect(addr).expect("connect failed");
        turn_until(&mut event_loop, "first accept", |ev| ev.connection_count() == 1);
        let mut second = TcpStream::connect(addr).expect("connect failed");
        turn_until(&mut event_loop, "second accept", |ev| ev.connection_count() == 2);

        first.write_all(b"abc").expect("write failed");
        turn_until(&mut event_loop, "first echo", |ev| {
            ev.handler().calls_for(0).contains(&"written")
        });
        assert_eq!(
            event_loop.connection_state(0),
            Some(ConnectionState::Active),
            "backend {backend}"
        );

        let mut reply = [0u8; 3];
        first.read_exact(&mut reply).expect("read failed");
        assert_eq!(&reply, b"nop", "backend {backend}");

        drop(first);
        turn_until(&mut event_loop, "first release", |ev| {
            ev.connection_count() == 1
        });
        assert_eq!(event_loop.connection_state(0), None, "backend {backend}");
        assert_eq!(
            event_loop.handler().calls_for(0),
            vec!["completed", "message", "written", "closed"],
            "backend {backend}"
        );
        assert_eq!(
            event_loop.connection_state(1),
            Some(ConnectionState::Accepted),
            "backend {backend}"
        );

        second.write_all(b"Zoo").expect("write failed");
        turn_until(&mut event_loop, "second echo", |ev| {
            ev.handler().calls_for(1).contains(&"written")
        });

        second.read_exact(&mut reply).expect("read failed");
        assert_eq!(&reply, b"Mbb", "backend {backend}");
        assert_eq!(event_loop.connection_count(), 1);
    }
}

#[test]
fn test_immediate_half_close_skips_on_message() {
    for backend in backends() {
        let mut event_loop = EventLoopBuilder::new()
            .backend(backend)
            .build(Recorder::default())
            .expect("failed to build event loop");
        let addr = event_loop.bind("127.0.0.1:0").expect("bind failed");

        let client = TcpStream::connect(addr).expect("connect failed");
        client.shutdown(Shutdown::Write).expect("shutdown failed");

        turn_until(&mut event_loop, "close", |ev| {
            ev.handler().calls_for(0).contains(&"closed")
        });
        assert_eq!(event_loop.connection_count(), 0);
        assert_eq!(
            event_loop.handler().calls_for(0),
            vec!["completed", "closed"],
            "backend {backend}"
        );
    }
}

#[test]
fn test_capacity_pauses_and_resumes_accepting() {
    let mut backends = vec![Backend::Poll];
    if cfg!(target_os = "linux") {
        backends.push(Backend::EpollEdge);
    }

    for backend in backends {
        let mut event_loop = EventLoopBuilder::new()
            .backend(backend)
            .max_connections(1)
            .build(Recorder::default())
            .expect("failed to build event loop");
        let addr = event_loop.bind("127.0.0.1:0").expect("bind failed");

        let first = TcpStream::connect(addr).expect("connect failed");
        turn_until(&mut event_loop, "first accept", |ev| ev.connection_count() == 1);

        let mut second = TcpStream::connect(addr).expect("connect failed");
        turn_until(&mut event_loop, "pause", |ev| ev.is_accept_paused());

        for _ in 0..5 {
            event_loop
                .turn(Some(Duration::from_millis(10)))
                .expect("turn failed");
        }
        assert_eq!(event_loop.connection_count(), 1, "backend {backend}");

        drop(first);
        // The released slot is reused, so count completions rather than tokens.
        turn_until(&mut event_loop, "second accept", |ev| {
            ev.handler().count("completed") == 2
        });
        assert!(!event_loop.is_accept_paused());
        assert_eq!(event_loop.connection_count(), 1);

        second.write_all(b"Hello").expect("write failed");
        turn_until(&mut event_loop, "second echo", |ev| ev.handler().count("written") == 1);

        let mut reply = [0u8; 5];
        second.read_exact(&mut reply).expect("read failed");
        assert_eq!(&reply, b"Uryyb", "backend {backend}");
    }
}

#[test]
fn test_large_reply_survives_partial_writes() {
    for backend in backends() {
        let mut event_loop = EventLoopBuilder::new()
            .backend(backend)
            .read_chunk(4096)
            .build(TransformHandler::new(Transform::Echo))
            .expect("failed to build event loop");
        let addr = event_loop.bind("127.0.0.1:0").expect("bind failed");
        let handle = event_loop.handle();
        let server = thread::spawn(move || event_loop.run());

        let payload: Vec<u8> = (0..4 * 1024 * 1024).map(|i| (i % 251) as u8).collect();

        let mut client = TcpStream::connect(addr).expect("connect failed");
        let mut writer = client.try_clone().expect("clone failed");
        let expected = payload.clone();
        let sender = thread::spawn(move || {
            writer.write_all(&payload).expect("write failed");
            writer.shutdown(Shutdown::Write).expect("shutdown failed");
        });

        let mut received = Vec::with_capacity(expected.len());
        client.read_to_end(&mut received).expect("read failed");
        sender.join().expect("sender panicked");

        assert_eq!(received.len(), expected.len(), "backend {backend}");
        assert!(received == expected, "backend {backend}: payload corrupted");

        handle.stop();
        server
            .join()
            .expect("loop thread panicked")
            .expect("loop failed");
    }
}
