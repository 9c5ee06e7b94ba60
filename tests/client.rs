use evloop::{Backend, Error, EventLoopBuilder, Transform, TransformHandler};

use std::io::Write;
use std::net::TcpListener;
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;
use std::thread;

#[test]
fn test_client_round_trip_through_reactor() {
    let mut event_loop = EventLoopBuilder::new()
        .backend(Backend::Poll)
        .build(TransformHandler::new(Transform::Rot13))
        .expect("failed to build event loop");
    let addr = event_loop.bind("127.0.0.1:0").expect("bind failed");
    let handle = event_loop.handle();
    let server = thread::spawn(move || event_loop.run());

    let (mut feeder, input) = UnixStream::pair().expect("pair failed");
    feeder.write_all(b"Hello\n").expect("write failed");
    drop(feeder);

    let mut output = Vec::new();
    evloop::client::run(addr, input.as_raw_fd(), &mut output).expect("client failed");
    assert_eq!(output, b"Uryyb\n");

    handle.stop();
    server
        .join()
        .expect("loop thread panicked")
        .expect("loop failed");
}

#[test]
fn test_client_reports_server_termination() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind failed");
    let addr = listener.local_addr().expect("no local address");
    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().expect("accept failed");
        drop(stream);
    });

    let (_feeder, input) = UnixStream::pair().expect("pair failed");

    let mut output = Vec::new();
    let err = evloop::client::run(addr, input.as_raw_fd(), &mut output)
        .expect_err("client ignored the server closing");
    assert!(matches!(err, Error::ServerTerminated(a) if a == addr));
    assert!(output.is_empty());

    server.join().expect("server panicked");
}
