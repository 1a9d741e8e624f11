use crate::fastcgi::codec::{
    chunk_into_records, FCGI_END_REQUEST, FCGI_PARAMS, FCGI_STDERR, FCGI_STDIN, FCGI_STDOUT,
};
use crate::fastcgi::pool::WorkerId;
use crate::http::request::find_subsequence;
use crate::http::response::{HttpResponse, ResponseBody};
use crate::prelude::*;

use super::codec::{encode_name_value, Record};

const REQUEST_ID: u16 = 1;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SessionPhase {
    Connecting,
    SendingParams,
    StreamingStdin,
    ReadingHeaders,
    StreamingBlocking,
    StreamingChunked,
    Ended,
}

#[derive(Debug)]
pub enum FastcgiError {
    WorkerUnavailable,
    Protocol(String),
}

/// One active dynamic request: owns the worker socket, the serialized
/// request params, pending STDIN bytes, and tracks whether the response
/// has switched to server-generated chunked transfer.
pub struct FastcgiSession {
    pub worker_id: WorkerId,
    pub stream: TcpStream,
    pub phase: SessionPhase,
    pending_stdin: Vec<u8>,
    stdin_sent_eof: bool,
    read_buf: Vec<u8>,
    header_buf: Vec<u8>,
    flush_count: usize,
    chunk_after_flushes: usize,
    pub ended: bool,
    pub end_app_status: Option<u32>,
    pub end_proto_status: Option<u8>,
    pub stderr: Vec<u8>,
}

impl FastcgiSession {
    pub fn new(worker_id: WorkerId, stream: TcpStream, chunk_after_flushes: usize) -> Self {
        stream.set_nodelay(true).ok();
        Self {
            worker_id,
            stream,
            phase: SessionPhase::Connecting,
            pending_stdin: Vec::new(),
            stdin_sent_eof: false,
            read_buf: Vec::new(),
            header_buf: Vec::new(),
            flush_count: 0,
            chunk_after_flushes,
            ended: false,
            end_app_status: None,
            end_proto_status: None,
            stderr: Vec::new(),
        }
    }

    /// Emits BEGIN_REQUEST followed by one or more PARAMS records built
    /// from the request's CGI-ish environment. A single name/value pair
    /// exceeding the record content limit is an error.
    pub fn send_params(&mut self, params: &HashMap<String, String>) -> std::result::Result<(), FastcgiError> {
        let begin = Record::begin_request(REQUEST_ID);
        self.write_all(&begin.encode())?;

        let mut content = Vec::new();
        for (k, v) in params {
            encode_name_value(k, v, &mut content)
                .map_err(|_| FastcgiError::Protocol("param pair exceeds record limit".to_string()))?;
        }
        for rec in chunk_into_records(FCGI_PARAMS, REQUEST_ID, &content) {
            self.write_all(&rec.encode())?;
        }
        // Empty PARAMS record terminates the stream.
        self.write_all(&Record { rec_type: FCGI_PARAMS, request_id: REQUEST_ID, content: Vec::new() }.encode())?;
        self.phase = SessionPhase::StreamingStdin;
        Ok(())
    }

    pub fn queue_stdin(&mut self, body: &[u8]) {
        self.pending_stdin.extend_from_slice(body);
    }

    /// Streams queued STDIN bytes to the worker, chunked to the record
    /// limit, terminating with an empty record once nothing remains.
    pub fn drive_stdin(&mut self) -> std::result::Result<(), FastcgiError> {
        if !self.pending_stdin.is_empty() {
            let take = self.pending_stdin.len().min(FASTCGI_MAX_RECORD_CONTENT);
            let chunk: Vec<u8> = self.pending_stdin.drain(..take).collect();
            let rec = Record { rec_type: FCGI_STDIN, request_id: REQUEST_ID, content: chunk };
            self.write_all(&rec.encode())?;
        }
        if self.pending_stdin.is_empty() && !self.stdin_sent_eof {
            self.write_all(
                &Record { rec_type: FCGI_STDIN, request_id: REQUEST_ID, content: Vec::new() }.encode(),
            )?;
            self.stdin_sent_eof = true;
            self.phase = SessionPhase::ReadingHeaders;
        }
        Ok(())
    }

    fn write_all(&mut self, bytes: &[u8]) -> std::result::Result<(), FastcgiError> {
        self.stream
            .write_all(bytes)
            .map_err(|e| FastcgiError::Protocol(e.to_string()))
    }

    /// Reads one turn's worth of data from the worker socket and routes
    /// any complete records into `res`. Returns true once END_REQUEST has
    /// been seen.
    pub fn poll_read(&mut self, res: &mut HttpResponse) -> std::result::Result<bool, FastcgiError> {
        let mut buf = [0u8; 8192];
        match self.stream.read(&mut buf) {
            Ok(0) => {
                self.ended = true;
                Ok(true)
            }
            Ok(n) => {
                self.read_buf.extend_from_slice(&buf[..n]);
                self.drain_records(res)?;
                Ok(self.ended)
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(FastcgiError::Protocol(e.to_string())),
        }
    }

    fn drain_records(&mut self, res: &mut HttpResponse) -> std::result::Result<(), FastcgiError> {
        loop {
            let decoded = Record::decode(&self.read_buf).map_err(|_| FastcgiError::Protocol("bad record".to_string()))?;
            let Some((rec, consumed)) = decoded else { break };
            self.read_buf.drain(..consumed);

            match rec.rec_type {
                FCGI_STDOUT => self.handle_stdout(&rec.content, res)?,
                FCGI_STDERR => {
                    warn!("fastcgi worker stderr: {}", String::from_utf8_lossy(&rec.content));
                    self.stderr.extend_from_slice(&rec.content);
                    // Drop back to blocking mode so the rest of the body
                    // isn't chunked out from under the captured error.
                    if self.phase == SessionPhase::StreamingChunked {
                        self.phase = SessionPhase::StreamingBlocking;
                        res.chunked = false;
                        res.remove_header("transfer-encoding");
                    }
                }
                FCGI_END_REQUEST => {
                    if let Some((app_status, proto_status)) = rec.end_request_status() {
                        self.end_app_status = Some(app_status);
                        self.end_proto_status = Some(proto_status);
                    }
                    self.ended = true;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn handle_stdout(&mut self, data: &[u8], res: &mut HttpResponse) -> std::result::Result<(), FastcgiError> {
        if self.phase == SessionPhase::ReadingHeaders {
            self.header_buf.extend_from_slice(data);
            if let Some(pos) = find_subsequence(&self.header_buf, b"\r\n\r\n") {
                let header_section = self.header_buf[..pos].to_vec();
                let body_start = self.header_buf[pos + 4..].to_vec();
                self.apply_headers(&header_section, res);
                self.phase = SessionPhase::StreamingBlocking;
                if !body_start.is_empty() {
                    self.append_body(&body_start, res);
                }
            }
            return Ok(());
        }

        self.append_body(data, res);
        Ok(())
    }

    fn apply_headers(&mut self, header_section: &[u8], res: &mut HttpResponse) {
        let text = String::from_utf8_lossy(header_section);
        let mut status = 200u16;
        for line in text.lines() {
            if let Some((key, val)) = line.split_once(':') {
                let key = key.trim().to_ascii_lowercase();
                let val = val.trim();
                if key == "status" {
                    status = val.split_whitespace().next().and_then(|s| s.parse().ok()).unwrap_or(200);
                } else if key == "x-sendfile" {
                    res.set_header("x-sendfile", val);
                } else {
                    res.set_header(&key, val);
                }
            }
        }
        res.set_status_code(status);
        res.status_text = HttpResponse::status_text(status).to_string();
    }

    /// Appends response body bytes, switching to server-generated chunked
    /// transfer once the buffered body reaches the record limit or the
    /// output has already been flushed more than the configured threshold
    /// (heuristic for long-running scripts).
    fn append_body(&mut self, data: &[u8], res: &mut HttpResponse) {
        match &mut res.body {
            ResponseBody::Buffered(buf) => {
                buf.extend_from_slice(data);
                if buf.len() >= FASTCGI_MAX_RECORD_CONTENT || self.flush_count >= self.chunk_after_flushes {
                    self.phase = SessionPhase::StreamingChunked;
                    res.chunked = true;
                    res.set_header("transfer-encoding", "chunked");
                    res.headers.remove("content-length");
                }
            }
            _ => {
                res.body = ResponseBody::Buffered(data.to_vec());
            }
        }
        self.flush_count += 1;
    }

    /// Called when the session ended with no body, no chunking, and no
    /// X-SendFile: synthesizes a diagnostic 500-class body carrying the
    /// FastCGI End Request status codes.
    pub fn synthesize_empty_response(&self, res: &mut HttpResponse) {
        let app_status = self.end_app_status.unwrap_or(0);
        let proto_status = self.end_proto_status.unwrap_or(0);
        res.set_status_code(HTTP_BAD_GATEWAY);
        let body = format!(
            "fastcgi worker produced no response (app_status={}, protocol_status={})",
            app_status, proto_status
        );
        res.set_body(body.into_bytes(), "text/plain");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_headers_extracts_status_and_strips_it() {
        let mut res = HttpResponse::new(200, "OK");
        let mut session = dummy_session();
        session.apply_headers(b"Status: 404 Not Found\r\nContent-Type: text/plain", &mut res);
        assert_eq!(res.status_code, 404);
        assert!(res.headers.get("status").is_none());
        assert_eq!(res.headers.get("content-type").unwrap(), "text/plain");
    }

    fn dummy_session() -> FastcgiSession {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let stream = TcpStream::connect(addr).unwrap();
        FastcgiSession::new(0, stream, 1)
    }
}
