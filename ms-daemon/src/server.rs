//! Unix Socket Server
//!
//! Serves newline-delimited JSON requests from the `multisim` CLI.
//!
//! # Limits
//! - **Socket permissions**: owner only, symlinks refused
//! - **Peer credentials**: only root and the daemon's own uid are served
//! - **Connection limits**: maximum concurrent connections enforced
//! - **Rate limiting**: per-uid request window
//! - **Timeouts**: read/write timeouts per message
//! - **Message limits**: lines are bounded before they are buffered

use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use ms_core::constants::daemon::{
    MAX_CONNECTIONS, RATE_LIMIT_REQUESTS, RATE_LIMIT_WINDOW, READ_TIMEOUT, SOCKET_MODE,
    WRITE_TIMEOUT,
};
use ms_core::display::redact_opt;
use ms_core::SimRecord;
use ms_protocol::{PassReport, Request, RequestEnvelope, Response, ResponseEnvelope, SimSummary};

use crate::scheduler::SchedulerState;

const MAX_MESSAGE_SIZE: usize = ms_protocol::MAX_MESSAGE_SIZE;

/// Global connection counter
static ACTIVE_CONNECTIONS: AtomicUsize = AtomicUsize::new(0);

async fn read_line_bounded<R: tokio::io::AsyncBufRead + Unpin>(
    reader: &mut R,
    out: &mut Vec<u8>,
    max_len: usize,
) -> std::io::Result<usize> {
    out.clear();

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(0);
        }

        let (take_len, found_newline) = match available.iter().position(|b| *b == b'\n') {
            Some(pos) => (pos + 1, true),
            None => (available.len(), false),
        };

        let remaining = max_len.saturating_sub(out.len());
        if take_len > remaining {
            // Make progress without buffering past max_len
            let consume_len = remaining.min(available.len());
            reader.consume(consume_len);
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "Message too large",
            ));
        }

        out.extend_from_slice(&available[..take_len]);
        reader.consume(take_len);

        if found_newline {
            return Ok(out.len());
        }
    }
}

/// Per-uid request windows
struct RateLimiter {
    clients: HashMap<u32, ClientWindow>,
}

struct ClientWindow {
    request_count: u32,
    window_start: Instant,
}

impl RateLimiter {
    fn new() -> Self {
        Self {
            clients: HashMap::new(),
        }
    }

    /// Returns true if the request is allowed
    fn check_and_increment(&mut self, uid: u32) -> bool {
        let now = Instant::now();
        let window = self.clients.entry(uid).or_insert(ClientWindow {
            request_count: 0,
            window_start: now,
        });

        if now.duration_since(window.window_start) > RATE_LIMIT_WINDOW {
            window.request_count = 0;
            window.window_start = now;
        }

        if window.request_count >= RATE_LIMIT_REQUESTS {
            return false;
        }
        window.request_count += 1;
        true
    }

    fn cleanup(&mut self) {
        let now = Instant::now();
        self.clients
            .retain(|_, w| now.duration_since(w.window_start) < RATE_LIMIT_WINDOW * 2);
    }
}

/// Bind the socket, refusing to replace anything but a stale socket
pub fn bind_socket(socket_path: &Path) -> std::io::Result<UnixListener> {
    if let Ok(metadata) = socket_path.symlink_metadata() {
        if metadata.file_type().is_symlink() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "Socket path is a symlink - refusing",
            ));
        }
        std::fs::remove_file(socket_path)?;
        debug!("Removed existing socket file");
    }

    let listener = UnixListener::bind(socket_path)?;
    std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(SOCKET_MODE))?;
    Ok(listener)
}

/// Accept clients until `shutdown` is set
pub async fn run_server(
    listener: UnixListener,
    state: Arc<SchedulerState>,
    shutdown: Arc<AtomicBool>,
) -> std::io::Result<()> {
    info!(
        "Security: max_conn={}, max_msg={}, rate_limit={}/{:?}",
        MAX_CONNECTIONS, MAX_MESSAGE_SIZE, RATE_LIMIT_REQUESTS, RATE_LIMIT_WINDOW
    );

    let rate_limiter = Arc::new(Mutex::new(RateLimiter::new()));

    let rate_limiter_cleanup = rate_limiter.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(RATE_LIMIT_WINDOW).await;
            rate_limiter_cleanup.lock().await.cleanup();
        }
    });

    let mut shutdown_poll = tokio::time::interval(std::time::Duration::from_millis(500));

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let current = ACTIVE_CONNECTIONS.load(Ordering::SeqCst);
                        if current >= MAX_CONNECTIONS {
                            warn!("Connection limit reached ({}), rejecting new connection", current);
                            drop(stream);
                            continue;
                        }

                        ACTIVE_CONNECTIONS.fetch_add(1, Ordering::SeqCst);
                        let rate_limiter = rate_limiter.clone();
                        let state = state.clone();
                        tokio::spawn(async move {
                            handle_client(stream, rate_limiter, state).await;
                            ACTIVE_CONNECTIONS.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                    }
                }
            }
            _ = shutdown_poll.tick() => {
                if shutdown.load(Ordering::SeqCst) {
                    info!("Shutdown requested, closing socket");
                    break;
                }
            }
        }
    }

    Ok(())
}

#[derive(Debug, Clone, Copy)]
struct PeerCredentials {
    uid: u32,
    pid: i32,
}

async fn handle_client(
    stream: UnixStream,
    rate_limiter: Arc<Mutex<RateLimiter>>,
    state: Arc<SchedulerState>,
) {
    let cred = match get_peer_credentials(&stream) {
        Some(c) => c,
        None => {
            error!("Failed to get peer credentials, rejecting connection");
            return;
        }
    };

    if let Err(e) = authorize(&cred) {
        warn!("Rejected client uid={}, pid={}: {}", cred.uid, cred.pid, e);
        let (_, mut writer) = stream.into_split();
        let _ = send_response(&mut writer, &ResponseEnvelope::new(0, Response::error(e))).await;
        return;
    }

    debug!("Connection from uid={}, pid={}", cred.uid, cred.pid);

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line: Vec<u8> = Vec::with_capacity(1024);
    let mut request_count: u64 = 0;
    let connection_start = Instant::now();

    loop {
        let read_result = timeout(
            READ_TIMEOUT,
            read_line_bounded(&mut reader, &mut line, MAX_MESSAGE_SIZE),
        )
        .await;

        let reply = match read_result {
            Ok(Ok(0)) => {
                debug!(
                    "Client disconnected: uid={}, pid={}, requests={}, duration={:?}",
                    cred.uid, cred.pid, request_count, connection_start.elapsed()
                );
                break;
            }
            Ok(Ok(n)) => {
                if !rate_limiter.lock().await.check_and_increment(cred.uid) {
                    warn!("Rate limit exceeded for uid={}, pid={}", cred.uid, cred.pid);
                    ResponseEnvelope::new(0, Response::error("Rate limit exceeded"))
                } else {
                    request_count += 1;
                    trace!("Request #{} from uid={}: {} bytes", request_count, cred.uid, n);
                    match std::str::from_utf8(&line) {
                        Ok(text) => process_request(text, &cred, &state).await,
                        Err(_) => {
                            let _ = send_response(
                                &mut writer,
                                &ResponseEnvelope::new(0, Response::error("Invalid request encoding")),
                            )
                            .await;
                            break;
                        }
                    }
                }
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::InvalidData => {
                warn!(
                    "Message too large (>{} bytes) from uid={}, pid={}",
                    MAX_MESSAGE_SIZE, cred.uid, cred.pid
                );
                let _ = send_response(
                    &mut writer,
                    &ResponseEnvelope::new(0, Response::error("Message too large")),
                )
                .await;
                break;
            }
            Ok(Err(e)) => {
                error!("Read error from uid={}, pid={}: {}", cred.uid, cred.pid, e);
                break;
            }
            Err(_) => {
                debug!("Read timeout for uid={}, pid={}", cred.uid, cred.pid);
                break;
            }
        };

        if send_response(&mut writer, &reply).await.is_err() {
            break;
        }
    }
}

async fn send_response(
    writer: &mut tokio::net::unix::OwnedWriteHalf,
    envelope: &ResponseEnvelope,
) -> Result<(), ()> {
    let json = serde_json::to_string(envelope).unwrap_or_else(|_| {
        r#"{"id":0,"status":"error","message":"Serialization error"}"#.to_string()
    });

    let write_result = timeout(WRITE_TIMEOUT, async {
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok::<_, std::io::Error>(())
    })
    .await;

    match write_result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            error!("Write error: {}", e);
            Err(())
        }
        Err(_) => {
            error!("Write timeout");
            Err(())
        }
    }
}

/// Serve root and the daemon's own user only
fn authorize(cred: &PeerCredentials) -> Result<(), String> {
    // SAFETY: geteuid only returns the effective user id of this process.
    let own_uid = unsafe { libc::geteuid() };
    if cred.uid == 0 || cred.uid == own_uid {
        Ok(())
    } else {
        Err(format!("uid {} is not allowed", cred.uid))
    }
}

fn get_peer_credentials(stream: &UnixStream) -> Option<PeerCredentials> {
    use std::os::unix::io::AsRawFd;

    let fd = stream.as_raw_fd();

    #[cfg(target_os = "linux")]
    {
        // SAFETY: ucred is a plain C struct; all-zero is a valid value.
        let mut cred: libc::ucred = unsafe { std::mem::zeroed() };
        let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;

        // SAFETY: fd is a live socket owned by `stream`, and cred/len describe a
        // correctly sized ucred buffer.
        let result = unsafe {
            libc::getsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_PEERCRED,
                &mut cred as *mut _ as *mut libc::c_void,
                &mut len,
            )
        };

        if result == 0 {
            return Some(PeerCredentials {
                uid: cred.uid,
                pid: cred.pid,
            });
        }
    }

    #[cfg(any(
        target_os = "freebsd",
        target_os = "openbsd",
        target_os = "netbsd",
        target_os = "dragonfly",
        target_os = "macos"
    ))]
    {
        let mut uid: libc::uid_t = 0;
        let mut gid: libc::gid_t = 0;

        // SAFETY: fd is a live socket and uid/gid point to initialized locals.
        let result = unsafe { libc::getpeereid(fd, &mut uid, &mut gid) };

        if result == 0 {
            return Some(PeerCredentials { uid, pid: 0 });
        }
    }

    None
}

/// Client view of a stored SIM
pub fn summarize(record: &SimRecord) -> SimSummary {
    SimSummary {
        slot_index: record.slot_index,
        subscription_id: record.subscription_id,
        serial_digest: redact_opt(record.serial_id.as_deref()),
        operator_name: record.operator_name.clone(),
        country_iso: record.country_iso.clone(),
        hni: record.hni.clone(),
        roaming: record.is_roaming,
        display: record.to_string(),
    }
}

async fn process_request(line: &str, cred: &PeerCredentials, state: &SchedulerState) -> ResponseEnvelope {
    let envelope: RequestEnvelope = match serde_json::from_str(line.trim()) {
        Ok(e) => e,
        Err(e) => {
            debug!("Invalid JSON from uid={}: {}", cred.uid, e);
            return ResponseEnvelope::new(0, Response::error("Invalid request format"));
        }
    };

    let request_id = envelope.id;
    let request = envelope.request;

    if let Err(e) = request.validate() {
        warn!("Request validation failed from uid={}: {}", cred.uid, e);
        return ResponseEnvelope::new(request_id, Response::error(e));
    }

    let request_type = request.type_name();
    debug!("Processing {} (id={}) from uid={}, pid={}", request_type, request_id, cred.uid, cred.pid);

    let response = match request {
        Request::Ping => Response::ok_string("pong"),

        Request::Version => Response::ok_string(env!("CARGO_PKG_VERSION")),

        Request::Trigger { wait: false } => {
            info!("AUDIT: Trigger by uid={}, pid={}", cred.uid, cred.pid);
            state.signal_trigger();
            Response::ok_pass(PassReport::Queued)
        }

        Request::Trigger { wait: true } => {
            info!("AUDIT: Trigger (waiting) by uid={}, pid={}", cred.uid, cred.pid);
            Response::ok_pass(state.run_session().await)
        }

        Request::ListSims => match state.coordinator().current_sims() {
            Ok(sims) => Response::ok_sims(sims.iter().map(summarize).collect()),
            Err(e) => Response::error(format!("Failed to read SIM list: {}", e)),
        },

        Request::PresentByHni { hni } => match state.coordinator().store().present_by_hni(&hni) {
            Ok(sims) => Response::ok_sims(sims.iter().map(summarize).collect()),
            Err(e) => Response::error(format!("Failed to read SIM list: {}", e)),
        },

        Request::Status => Response::ok_status(state.status()),
    };

    if let Response::Error { ref message } = response {
        warn!("Request {} (id={}) failed for uid={}: {}", request_type, request_id, cred.uid, message);
    }

    ResponseEnvelope::new(request_id, response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ms_core::SimState;

    #[tokio::test]
    async fn test_bounded_read_rejects_long_lines() {
        let data: &[u8] = b"0123456789\nshort\n";
        let mut reader = BufReader::new(data);
        let mut line = Vec::new();

        assert!(read_line_bounded(&mut reader, &mut line, 5).await.is_err());
    }

    #[tokio::test]
    async fn test_bounded_read_splits_lines() {
        let data: &[u8] = b"{\"id\":1}\n{\"id\":2}\n";
        let mut reader = BufReader::new(data);
        let mut line = Vec::new();

        assert_eq!(read_line_bounded(&mut reader, &mut line, 64).await.unwrap(), 9);
        assert_eq!(line, b"{\"id\":1}\n");
        assert_eq!(read_line_bounded(&mut reader, &mut line, 64).await.unwrap(), 9);
        assert_eq!(read_line_bounded(&mut reader, &mut line, 64).await.unwrap(), 0);
    }

    #[test]
    fn test_rate_limiter_caps_window() {
        let mut limiter = RateLimiter::new();
        for _ in 0..RATE_LIMIT_REQUESTS {
            assert!(limiter.check_and_increment(1000));
        }
        assert!(!limiter.check_and_increment(1000));
        assert!(limiter.check_and_increment(1001));
    }

    #[test]
    fn test_summary_hides_serial() {
        let mut record = SimRecord::new(1, 4, Some("8925402100".into()));
        record.sim_state = SimState::Ready;
        record.operator_name = Some("Airtel".into());
        record.country_iso = Some("ke".into());

        let summary = summarize(&record);
        assert_eq!(summary.display, "Airtel KE (SIM 2)");
        assert!(summary.serial_digest.starts_with('#'));
        assert!(!summary.serial_digest.contains("8925402100"));
    }

    #[test]
    fn test_root_is_authorized() {
        assert!(authorize(&PeerCredentials { uid: 0, pid: 1 }).is_ok());
    }
}
