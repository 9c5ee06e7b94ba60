//! Interactive line client.
//!
//! Multiplexes an input descriptor and a server connection with the
//! `select` backend: each chunk read from the input is sent without its
//! trailing newline, and every chunk received from the server is
//! printed on its own line.

use crate::error::{Error, Result};
use crate::reactor::Event;
use crate::reactor::poller::unix::sys_read;
use crate::reactor::poller::{Demultiplexer, Interest, SelectDemultiplexer};

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use tracing::{debug, info};

const INPUT_TOKEN: usize = 0;
const SERVER_TOKEN: usize = 1;

/// Bytes read from either side per readiness notification.
const LINE_MAX: usize = 1024;

/// Connects to `addr` and relays between `input` and the server until
/// both directions are finished.
///
/// End of input half-closes the connection and waits for the server to
/// finish. The server closing first is reported as
/// [`Error::ServerTerminated`].
pub fn run<W: Write>(addr: SocketAddr, input: RawFd, out: &mut W) -> Result<()> {
    let mut stream = TcpStream::connect(addr)?;
    info!(%addr, "connected");

    let mut demux = SelectDemultiplexer::new();
    demux.register(input, INPUT_TOKEN, Interest::READABLE)?;
    demux.register(stream.as_raw_fd(), SERVER_TOKEN, Interest::READABLE)?;
    debug!(backend = demux.name(), "watching input and server");

    let mut events: Vec<Event> = Vec::new();
    let mut line = [0u8; LINE_MAX];
    let mut input_open = true;

    loop {
        demux.wait(&mut events, None)?;

        for event in &events {
            match event.token {
                SERVER_TOKEN => {
                    let n = match stream.read(&mut line) {
                        Ok(n) => n,
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => return Err(e.into()),
                    };

                    if n == 0 {
                        if input_open {
                            return Err(Error::ServerTerminated(addr));
                        }

                        debug!("server closed the connection");
                        return Ok(());
                    }

                    out.write_all(&line[..n])?;
                    out.write_all(b"\n")?;
                    out.flush()?;
                }
                INPUT_TOKEN => {
                    let n = match sys_read(input, &mut line) {
                        Ok(n) => n,
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => return Err(e.into()),
                    };

                    if n == 0 {
                        debug!("input closed, shutting down the write side");
                        demux.unregister(input)?;
                        stream.shutdown(Shutdown::Write)?;
                        input_open = false;
                        continue;
                    }

                    let message = strip_newline(&line[..n]);
                    info!(message = %String::from_utf8_lossy(message), "now sending");

                    stream.write_all(message)?;
                    debug!(bytes = message.len(), "sent");
                }
                _ => {}
            }
        }
    }
}

fn strip_newline(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\n").unwrap_or(line)
}
