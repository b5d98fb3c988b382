//! Request/response channel between the host application and the tunnel.
//!
//! Requests are bare UTF-8 command strings. Recognised commands get a byte
//! payload back; anything else gets no response at all, not an error.
//!
//! [`serve`] carries the same protocol over a localhost TCP socket, one
//! request per line, for host applications running in another process.

use crate::logger::{Event, SharedLogger};
use crate::store::DetectionStore;
use crate::tunnel::TunnelLifecycle;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Commands understood by the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRequest {
    GetStatus,
    ClearDetections,
    TestConnection,
    GetDetections,
}

impl ControlRequest {
    pub fn parse(request: &str) -> Option<Self> {
        match request.trim() {
            "get_status"       => Some(Self::GetStatus),
            "clear_detections" => Some(Self::ClearDetections),
            "test_connection"  => Some(Self::TestConnection),
            "get_detections"   => Some(Self::GetDetections),
            _ => None,
        }
    }
}

pub struct ControlChannel {
    lifecycle: Arc<TunnelLifecycle>,
    store:     Arc<DetectionStore>,
    logger:    SharedLogger,
}

impl ControlChannel {
    pub fn new(
        lifecycle: Arc<TunnelLifecycle>,
        store:     Arc<DetectionStore>,
        logger:    SharedLogger,
    ) -> Self {
        Self { lifecycle, store, logger }
    }

    /// Handles one raw request. `None` means "send nothing back".
    pub fn handle_message(&self, message: &[u8]) -> Option<Vec<u8>> {
        let text = std::str::from_utf8(message).unwrap_or_default();
        let response = ControlRequest::parse(text).and_then(|req| self.respond(req));
        self.logger.log(&Event::ControlRequest {
            request:  text.trim(),
            answered: response.is_some(),
        });
        response
    }

    fn log_error(&self, error: &str) {
        self.logger.log(&Event::ControlError { error });
    }

    fn respond(&self, request: ControlRequest) -> Option<Vec<u8>> {
        match request {
            ControlRequest::GetStatus => serde_json::to_vec(&self.lifecycle.status()).ok(),
            ControlRequest::ClearDetections => {
                self.store.clear();
                Some(b"cleared".to_vec())
            }
            ControlRequest::TestConnection => Some(b"ok".to_vec()),
            ControlRequest::GetDetections => serde_json::to_vec(&self.store.snapshot()).ok(),
        }
    }
}

/// Longest request line accepted, newline included. Requests are short
/// command words; a longer line closes the connection.
pub const MAX_REQUEST_LEN: u64 = 256;

/// Pause after a failed `accept()` before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(500);

/// Accepts control connections until `shutdown` is set.
///
/// Each connection is served on its own thread. Every line read is one
/// request; each response is written back followed by `\n`. Accept and
/// connection errors are logged; the listener keeps running through them.
pub fn serve(
    listener: TcpListener,
    channel:  Arc<ControlChannel>,
    shutdown: Arc<AtomicBool>,
) -> io::Result<thread::JoinHandle<()>> {
    listener.set_nonblocking(true)?;

    Ok(thread::spawn(move || {
        while !shutdown.load(Ordering::Relaxed) {
            match listener.accept() {
                Ok((stream, _)) => {
                    let channel = Arc::clone(&channel);
                    thread::spawn(move || {
                        if let Err(e) = handle_connection(stream, &channel) {
                            channel.log_error(&format!("connection: {}", e));
                        }
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(100));
                }
                Err(e) => thread::sleep(accept_failed(&channel, &e)),
            }
        }
    }))
}

/// Logs a failed `accept()` and returns how long to back off.
fn accept_failed(channel: &ControlChannel, err: &io::Error) -> Duration {
    channel.log_error(&format!("accept: {}", err));
    ACCEPT_BACKOFF
}

fn handle_connection(stream: TcpStream, channel: &ControlChannel) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    let mut writer = stream.try_clone()?;
    serve_requests(BufReader::new(stream), &mut writer, channel)
}

/// Answers newline-delimited requests from `reader` until EOF.
fn serve_requests<R: BufRead, W: Write>(
    mut reader: R,
    writer:     &mut W,
    channel:    &ControlChannel,
) -> io::Result<()> {
    let mut line = Vec::new();
    loop {
        line.clear();
        let n = (&mut reader).take(MAX_REQUEST_LEN).read_until(b'\n', &mut line)?;
        if n == 0 {
            return Ok(());
        }
        if n as u64 == MAX_REQUEST_LEN && line.last() != Some(&b'\n') {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("request longer than {} bytes", MAX_REQUEST_LEN),
            ));
        }
        if let Some(mut response) = channel.handle_message(&line) {
            response.push(b'\n');
            writer.write_all(&response)?;
            writer.flush()?;
        }
    }
}
