//! Unix socket transport.
//!
//! Wire format: 4 bytes big-endian length, then that many bytes of JSON. One
//! request and one response per connection.

use std::fs;
use std::io::{Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Sender};
use log::{debug, error, info, warn};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::message::{Request, RequestFrame, Response, PROTOCOL_VERSION};

pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// A decoded request on its way to the control loop.
pub struct Incoming {
    pub request: Request,
    pub reply: Sender<Response>,
}

pub struct IpcServer {
    listener: UnixListener,
    path: PathBuf,
}

impl IpcServer {
    /// Binds the daemon socket, replacing a stale socket file.
    pub fn bind(path: &Path) -> Result<IpcServer> {
        if path.exists() {
            if UnixStream::connect(path).is_ok() {
                return Err(Error::Config(format!(
                    "a daemon is already listening on {}",
                    path.display()
                )));
            }
            fs::remove_file(path).map_err(|e| Error::io("cannot remove stale socket", path, e))?;
        }
        let listener = UnixListener::bind(path).map_err(|e| Error::io("cannot bind socket", path, e))?;
        fs::set_permissions(path, fs::Permissions::from_mode(0o700))
            .map_err(|e| Error::io("cannot restrict permissions of", path, e))?;
        info!("Listening on {}", path.display());
        Ok(IpcServer {
            listener,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accepts connections on a dedicated thread and forwards requests to `sender`.
    ///
    /// The thread ends after it has answered an accepted stop request, or
    /// once the receiving side is dropped.
    pub fn spawn(self, sender: Sender<Incoming>) -> Result<JoinHandle<()>> {
        let path = self.path.clone();
        thread::Builder::new()
            .name("taskq-ipc".into())
            .spawn(move || self.serve(sender))
            .map_err(|e| Error::io("cannot spawn listener thread for", path, e))
    }

    fn serve(self, sender: Sender<Incoming>) {
        for stream in self.listener.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    continue;
                }
            };
            if !handle_connection(stream, &sender) {
                debug!("Listener exiting.");
                break;
            }
        }
    }

    /// Removes a socket file left at `path`.
    pub fn cleanup(path: &Path) {
        if path.exists() {
            if let Err(e) = fs::remove_file(path) {
                error!("Could not remove socket {}: {}", path.display(), e);
            }
        }
    }
}

/// Serves one connection. Returns false once no further connection must be
/// accepted: the daemon agreed to stop, or the control loop no longer answers.
fn handle_connection(mut stream: UnixStream, sender: &Sender<Incoming>) -> bool {
    if let Err(e) = stream.set_read_timeout(Some(READ_TIMEOUT)) {
        warn!("Cannot set read timeout: {}", e);
    }

    let (response, alive) = match read_frame(&mut stream).and_then(|bytes| decode_request(&bytes)) {
        Ok(request) => {
            debug!("Received request: {:?}", request);
            let stop = request == Request::StopDaemon;
            let (reply, answer) = bounded(1);
            match sender.send(Incoming { request, reply }) {
                Ok(()) => match answer.recv() {
                    Ok(response) => {
                        let alive = !(stop && response.is_success());
                        (response, alive)
                    }
                    Err(_) => (Response::error("The daemon is shutting down."), false),
                },
                Err(_) => (Response::error("The daemon is shutting down."), false),
            }
        }
        Err(e) => {
            warn!("Rejected request: {}", e);
            (Response::error(e.to_string()), true)
        }
    };

    if let Err(e) = send_message(&mut stream, &response) {
        warn!("Failed to answer client: {}", e);
    }
    alive
}

/// Parses a request frame, checking the protocol version before the mode.
pub fn decode_request(bytes: &[u8]) -> Result<Request> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| Error::Protocol(format!("request is not valid JSON: {}", e)))?;
    match value.get("version").and_then(Value::as_u64) {
        Some(version) if version == u64::from(PROTOCOL_VERSION) => {}
        Some(version) => {
            return Err(Error::Protocol(format!(
                "unsupported protocol version {} (daemon speaks {})",
                version, PROTOCOL_VERSION
            )))
        }
        None => return Err(Error::Protocol("request carries no protocol version".into())),
    }
    let frame: RequestFrame =
        serde_json::from_value(value).map_err(|e| Error::Protocol(format!("invalid request: {}", e)))?;
    Ok(frame.request)
}

pub fn read_frame<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .map_err(|e| Error::Protocol(format!("failed to read frame length: {}", e)))?;
    let len = u32::from_be_bytes(len_buf) as usize;

    if len == 0 {
        return Err(Error::Protocol("empty frame".into()));
    }
    if len > MAX_FRAME_LEN {
        return Err(Error::Protocol(format!("frame too large: {} bytes", len)));
    }

    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .map_err(|e| Error::Protocol(format!("failed to read frame payload: {}", e)))?;
    Ok(payload)
}

pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<()> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(Error::Protocol(format!("frame too large: {} bytes", payload.len())));
    }
    let len = payload.len() as u32;
    writer
        .write_all(&len.to_be_bytes())
        .and_then(|_| writer.write_all(payload))
        .and_then(|_| writer.flush())
        .map_err(|e| Error::Protocol(format!("failed to write frame: {}", e)))
}

pub fn send_message<W: Write, T: serde::Serialize>(writer: &mut W, message: &T) -> Result<()> {
    let json = serde_json::to_vec(message)?;
    write_frame(writer, &json)
}

/// Client side: one request, one response.
pub fn send_request(socket: &Path, request: Request) -> Result<Response> {
    let mut stream = UnixStream::connect(socket).map_err(|e| Error::io("cannot connect to daemon at", socket, e))?;
    send_message(&mut stream, &RequestFrame::new(request))?;
    let bytes = read_frame(&mut stream)?;
    Ok(serde_json::from_slice(&bytes)?)
}
