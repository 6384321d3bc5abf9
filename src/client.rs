/*
 * This file is part of multisim.
 *
 * Copyright (C) 2025 multisim contributors
 *
 * multisim is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * multisim is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with multisim. If not, see <https://www.gnu.org/licenses/>.
 */

//! Daemon Client
//!
//! Talks to `multisimd` over its Unix socket, one JSON line per request.

use std::io::{BufRead, BufReader, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;

use ms_core::constants::daemon::CLIENT_TIMEOUT;
use ms_core::{MultiSimError, Result};
use ms_protocol::{
    generate_request_id, PassReport, Request, RequestEnvelope, Response, ResponseData,
    ResponseEnvelope, SimSummary, StatusInfo, MAX_MESSAGE_SIZE,
};

/// Initial buffer size for responses
const INITIAL_BUFFER_SIZE: usize = 4096;

pub struct DaemonClient {
    writer: UnixStream,
    reader: BufReader<UnixStream>,
}

impl DaemonClient {
    pub fn connect(socket_path: &Path) -> Result<Self> {
        Self::connect_with_timeout(socket_path, CLIENT_TIMEOUT)
    }

    pub fn connect_with_timeout(socket_path: &Path, timeout: Duration) -> Result<Self> {
        let stream = UnixStream::connect(socket_path).map_err(|e| {
            MultiSimError::DaemonConnection(format!(
                "Failed to connect to daemon at {}: {}",
                socket_path.display(),
                e
            ))
        })?;
        let reader_stream = stream.try_clone()?;

        stream.set_write_timeout(Some(timeout))?;
        reader_stream.set_read_timeout(Some(timeout))?;

        Ok(Self {
            writer: stream,
            reader: BufReader::new(reader_stream),
        })
    }

    /// Send a request and read its response
    pub fn request(&mut self, req: Request) -> Result<Response> {
        req.validate().map_err(MultiSimError::IpcProtocol)?;

        let request_id = generate_request_id();
        let envelope = RequestEnvelope::with_id(req.clone(), request_id);

        let mut json = serde_json::to_vec(&envelope)?;
        json.push(b'\n');
        if json.len() > MAX_MESSAGE_SIZE {
            return Err(MultiSimError::MessageTooLarge {
                size: json.len(),
                max_size: MAX_MESSAGE_SIZE,
            });
        }

        self.writer.write_all(&json).map_err(|e| {
            MultiSimError::DaemonConnection(format!("Failed to send request: {}", e))
        })?;

        let mut response_buf: Vec<u8> = Vec::with_capacity(INITIAL_BUFFER_SIZE);
        (&mut self.reader)
            .take(MAX_MESSAGE_SIZE as u64 + 1)
            .read_until(b'\n', &mut response_buf)
            .map_err(|e| MultiSimError::DaemonConnection(format!("Failed to read response: {}", e)))?;

        if response_buf.is_empty() {
            return Err(MultiSimError::DaemonConnection("Daemon closed connection".to_string()));
        }
        if response_buf.len() > MAX_MESSAGE_SIZE {
            return Err(MultiSimError::MessageTooLarge {
                size: response_buf.len(),
                max_size: MAX_MESSAGE_SIZE,
            });
        }
        if response_buf.last() == Some(&b'\n') {
            response_buf.pop();
        }

        let response_envelope: ResponseEnvelope = serde_json::from_slice(&response_buf)?;

        // Id 0 marks connection-level rejections sent before the request was parsed
        if response_envelope.id != request_id && response_envelope.id != 0 {
            return Err(MultiSimError::IpcProtocol(format!(
                "Response ID mismatch: expected {}, got {}",
                request_id, response_envelope.id
            )));
        }

        Self::verify_response_type(&req, &response_envelope.response)?;
        Ok(response_envelope.response)
    }

    fn verify_response_type(req: &Request, resp: &Response) -> Result<()> {
        let Response::Ok(data) = resp else {
            return Ok(());
        };
        let valid = match req {
            Request::Ping | Request::Version => data.value.is_some(),
            Request::Trigger { .. } => data.pass.is_some(),
            Request::ListSims | Request::PresentByHni { .. } => data.sims.is_some(),
            Request::Status => data.daemon_status.is_some(),
        };
        if valid {
            Ok(())
        } else {
            Err(MultiSimError::IpcProtocol(format!(
                "Response type mismatch: got {:?} for request {}",
                data,
                req.type_name()
            )))
        }
    }

    /// Send a request and unwrap the payload of a successful reply
    fn call(&mut self, req: Request) -> Result<ResponseData> {
        match self.request(req)? {
            Response::Ok(data) => Ok(data),
            Response::Error { message } => Err(MultiSimError::DaemonResponse(message)),
        }
    }

    pub fn ping(&mut self) -> Result<()> {
        self.call(Request::Ping).map(|_| ())
    }

    pub fn version(&mut self) -> Result<String> {
        self.call(Request::Version)?
            .value
            .ok_or_else(|| MultiSimError::IpcProtocol("Unexpected response type".to_string()))
    }

    pub fn trigger(&mut self, wait: bool) -> Result<PassReport> {
        self.call(Request::Trigger { wait })?
            .pass
            .ok_or_else(|| MultiSimError::IpcProtocol("Unexpected response type".to_string()))
    }

    pub fn list_sims(&mut self) -> Result<Vec<SimSummary>> {
        Ok(self.call(Request::ListSims)?.sims.unwrap_or_default())
    }

    pub fn present_by_hni(&mut self, hni: &str) -> Result<Vec<SimSummary>> {
        Ok(self
            .call(Request::PresentByHni { hni: hni.to_string() })?
            .sims
            .unwrap_or_default())
    }

    pub fn status(&mut self) -> Result<StatusInfo> {
        self.call(Request::Status)?
            .daemon_status
            .ok_or_else(|| MultiSimError::IpcProtocol("Unexpected response type".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;
    use std::thread;

    /// Serve one connection, answering each request with `reply(request)`
    fn serve_once<F>(listener: UnixListener, reply: F) -> thread::JoinHandle<()>
    where
        F: Fn(RequestEnvelope) -> ResponseEnvelope + Send + 'static,
    {
        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut writer = stream.try_clone().unwrap();
            for line in BufReader::new(stream).lines() {
                let envelope: RequestEnvelope = serde_json::from_str(&line.unwrap()).unwrap();
                let mut out = serde_json::to_vec(&reply(envelope)).unwrap();
                out.push(b'\n');
                writer.write_all(&out).unwrap();
            }
        })
    }

    #[test]
    fn test_trigger_and_ping() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ms.sock");
        let server = serve_once(UnixListener::bind(&path).unwrap(), |env| {
            let response = match env.request {
                Request::Ping => Response::ok_string("pong"),
                Request::Trigger { wait: true } => Response::ok_pass(PassReport::Changed),
                _ => Response::error("unsupported"),
            };
            ResponseEnvelope::new(env.id, response)
        });

        let mut client = DaemonClient::connect(&path).unwrap();
        client.ping().unwrap();
        assert_eq!(client.trigger(true).unwrap(), PassReport::Changed);
        match client.status() {
            Err(MultiSimError::DaemonResponse(message)) => assert_eq!(message, "unsupported"),
            other => panic!("unexpected: {:?}", other),
        }
        drop(client);
        server.join().unwrap();
    }

    #[test]
    fn test_mismatched_reply_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ms.sock");
        let server = serve_once(UnixListener::bind(&path).unwrap(), |env| {
            ResponseEnvelope::new(env.id, Response::ok_string("not a list"))
        });

        let mut client = DaemonClient::connect(&path).unwrap();
        assert!(matches!(client.list_sims(), Err(MultiSimError::IpcProtocol(_))));
        drop(client);
        server.join().unwrap();
    }

    #[test]
    fn test_invalid_request_is_not_sent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ms.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let mut client = DaemonClient::connect(&path).unwrap();
        assert!(matches!(client.present_by_hni("63"), Err(MultiSimError::IpcProtocol(_))));
        drop(client);

        let (mut stream, _) = listener.accept().unwrap();
        let mut received = Vec::new();
        stream.read_to_end(&mut received).unwrap();
        assert!(received.is_empty());
    }

    #[test]
    fn test_missing_socket_is_a_connection_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = DaemonClient::connect(&dir.path().join("absent.sock"));
        assert!(matches!(result, Err(MultiSimError::DaemonConnection(_))));
    }
}
