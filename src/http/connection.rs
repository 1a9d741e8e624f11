use crate::fastcgi::pool::{WorkerId, WorkerPool};
use crate::fastcgi::session::FastcgiSession;
use crate::handlers::{HandlerContext, HandlerQueue, PendingAction, StatusSnapshot, StepOutcome};
use crate::http::response::ResponseBody;
use crate::prelude::*;
use std::collections::HashSet;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ConnState {
    ReadingRequest,
    Dispatching,
    Writing,
    Closed,
}

/// What the connection is currently doing with its outbound buffer: a
/// buffered send, a file stream hand-off, or an in-flight FastCGI
/// round-trip.
pub enum ActiveAction {
    None,
    FileStream { file: File, remaining: u64 },
    Fastcgi(FastcgiSession),
}

impl std::fmt::Debug for ActiveAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActiveAction::None => write!(f, "None"),
            ActiveAction::FileStream { remaining, .. } => write!(f, "FileStream({} left)", remaining),
            ActiveAction::Fastcgi(_) => write!(f, "Fastcgi"),
        }
    }
}

/// One client connection's state machine: parses requests, drives the
/// configured handler pipeline, and pumps the outbound response,
/// including a FastCGI worker round-trip or static file stream.
#[derive(Debug)]
pub struct ClientSession {
    pub stream: TcpStream,
    pub s_cfg: Arc<ServerConfig>,
    pub request: HttpRequest,
    pub response: HttpResponse,
    pub write_buffer: Vec<u8>,
    pub action: ActiveAction,
    pub state: ConnState,
    pub requests_served: usize,
    pub closed: bool,
    pub aborted: bool,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub last_activity: Instant,
}

impl ClientSession {
    pub fn new(stream: TcpStream, s_cfg: Arc<ServerConfig>) -> Self {
        let max_body = s_cfg.client_max_body_size;
        Self {
            stream,
            s_cfg,
            request: HttpRequest::new(max_body),
            response: HttpResponse::new(200, "OK"),
            write_buffer: Vec::new(),
            action: ActiveAction::None,
            state: ConnState::ReadingRequest,
            requests_served: 0,
            closed: false,
            aborted: false,
            bytes_in: 0,
            bytes_out: 0,
            last_activity: Instant::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn should_close(&self) -> bool {
        self.closed && self.write_buffer.is_empty()
    }

    /// Reads one bounded chunk from the socket. Returns `Ok(true)` on EOF.
    pub fn read_data(&mut self) -> io::Result<bool> {
        let mut buf = [0u8; READ_BUF_SIZE];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => return Ok(true),
                Ok(n) => {
                    self.bytes_in += n as u64;
                    match self.request.feed(&buf[..n]) {
                        Ok(_) => {}
                        Err(e) => {
                            self.fail_parse(e.status_code());
                            return Ok(false);
                        }
                    }
                    if self.request.is_complete() {
                        return Ok(false);
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => {
                    self.aborted = true;
                    return Ok(true);
                }
            }
        }
    }

    fn fail_parse(&mut self, status: u16) {
        handle_error_local(&mut self.response, status, Some(&self.s_cfg));
        self.response.verify();
        self.write_buffer.extend_from_slice(&self.response.to_bytes());
        self.closed = true;
        self.aborted = true;
    }

    /// Runs the configured handler pipeline for the currently-parsed
    /// request. Returns the pending action the caller (the connection
    /// driver) must service — a dynamic dispatch against the worker
    /// pool, or nothing further if the response is already complete.
    pub fn dispatch(&mut self, status: &StatusSnapshot) -> PendingAction {
        let mut fired_names: HashSet<String> = HashSet::new();
        loop {
            let mut queue = HandlerQueue::build_with_fired(&self.s_cfg.handlers, &fired_names);
            let mut ctx = HandlerContext {
                request: &mut self.request,
                response: &mut self.response,
                s_cfg: &self.s_cfg,
                action: PendingAction::None,
                reauthorize: false,
                status,
            };
            let completed = queue.run(&mut ctx);
            let action = std::mem::take(&mut ctx.action);
            fired_names.extend(queue.fired_step_names());
            let reprocess = self.request.dispatch.reprocessing;
            self.request.dispatch.reprocessing = false;

            if !completed && !matches!(action, PendingAction::Dynamic { .. }) {
                handle_error_local(&mut self.response, HTTP_INTERNAL_SERVER_ERROR, Some(&self.s_cfg));
            }

            if reprocess && matches!(action, PendingAction::None) {
                continue;
            }
            return action;
        }
    }

    /// Starts a FastCGI session for a dynamic dispatch: connects to a
    /// worker, sends params, and queues the request body as STDIN.
    ///
    /// Retries worker selection + socket connect up to
    /// `FASTCGI_CONNECT_RETRIES` times with a short backoff before giving
    /// up, per the worker pool's connect retry contract. `mark_in_use` is
    /// only ever called once, on the attempt that actually succeeds.
    pub fn start_fastcgi(&mut self, pool: &mut WorkerPool, preferred: Option<WorkerId>) -> Result<()> {
        const FASTCGI_CONNECT_RETRIES: u32 = 3;
        const FASTCGI_CONNECT_BACKOFF: Duration = Duration::from_micros(500);

        let mut last_err: Option<String> = None;
        let mut connected = None;
        for attempt in 0..FASTCGI_CONNECT_RETRIES {
            if attempt > 0 {
                std::thread::sleep(FASTCGI_CONNECT_BACKOFF);
            }
            match pool.connect(preferred) {
                Ok((worker_id, addr)) => match addr.parse().ok().and_then(|a| TcpStream::connect(a).ok()) {
                    Some(stream) => {
                        connected = Some((worker_id, stream));
                        break;
                    }
                    None => {
                        pool.mark_connection_failed(worker_id);
                        last_err = Some(format!("fastcgi socket connect to {} failed", addr));
                    }
                },
                Err(e) => last_err = Some(format!("fastcgi connect failed: {}", e)),
            }
        }

        let (worker_id, stream) =
            connected.ok_or_else(|| last_err.unwrap_or_else(|| "fastcgi connect exhausted retries".to_string()))?;
        pool.mark_in_use(worker_id);

        let mut session = FastcgiSession::new(worker_id, stream, self.s_cfg.fastcgi.chunk_after_flushes);
        let params = build_fastcgi_params(&self.request, &self.stream);
        session
            .send_params(&params)
            .map_err(|e| format!("fastcgi send_params failed: {:?}", e))?;
        session.queue_stdin(&self.request.body);

        self.response.body = ResponseBody::Buffered(Vec::new());
        self.action = ActiveAction::Fastcgi(session);
        Ok(())
    }

    /// Drives one turn of an in-flight FastCGI round-trip.
    pub fn pump_fastcgi(&mut self, pool: &mut WorkerPool) -> Result<bool> {
        let ActiveAction::Fastcgi(session) = &mut self.action else { return Ok(true) };
        session.drive_stdin().map_err(|e| format!("{:?}", e))?;
        let ended = session.poll_read(&mut self.response).map_err(|e| format!("{:?}", e))?;

        if ended {
            self.finish_fastcgi(pool);
        }
        Ok(ended)
    }

    fn finish_fastcgi(&mut self, pool: &mut WorkerPool) {
        let ActiveAction::Fastcgi(session) = std::mem::replace(&mut self.action, ActiveAction::None) else {
            return;
        };
        pool.release(session.worker_id);

        if let Some(sendfile) = self.response.headers.get("x-sendfile").cloned() {
            self.bind_sendfile(&sendfile);
        } else if matches!(&self.response.body, ResponseBody::Buffered(b) if b.is_empty()) && !self.response.chunked {
            session.synthesize_empty_response(&mut self.response);
        }
    }

    /// Implements the X-SendFile handoff: discards the buffered body and
    /// rebinds the response to the static file stream, provided the path
    /// is whitelisted in `paths.sendfile_allow`.
    fn bind_sendfile(&mut self, path: &str) {
        let allowed = self.s_cfg.paths.sendfile_allow.iter().any(|prefix| path.starts_with(prefix.as_str()));
        if !allowed {
            handle_error_local(&mut self.response, HTTP_FORBIDDEN, Some(&self.s_cfg));
            return;
        }
        match File::open(path) {
            Ok(file) => {
                let len = file.metadata().map(|m| m.len()).unwrap_or(0);
                self.response.headers.remove("x-sendfile");
                self.response.body = ResponseBody::File(file, len);
                self.response.set_header("content-length", &len.to_string());
            }
            Err(_) => handle_error_local(&mut self.response, HTTP_NOT_FOUND, Some(&self.s_cfg)),
        }
    }

    /// Finalizes the response (sets Connection per keep-alive policy,
    /// runs `verify()`) and serializes the head into the write buffer.
    /// The body itself is streamed separately by `pump_write`.
    pub fn prepare_response(&mut self) {
        self.requests_served += 1;
        let keep_alive = self.request.wants_keep_alive()
            && self.requests_served < self.s_cfg.keep_alive_max_requests;
        if !keep_alive {
            self.response.set_header("connection", "close");
        } else {
            self.response.set_header("connection", "keep-alive");
        }
        self.response.set_header("date", &crate::http::date::http_date_now());
        self.response.set_header("server", "fcgi-proxy");
        // A dynamic response that dropped out of chunked mode mid-stream
        // (e.g. a late FastCGI stderr record) needs its framing header
        // restored now that the full buffered body length is known.
        if !self.response.chunked && self.response.headers.get("content-length").is_none() {
            if let ResponseBody::Buffered(b) = &self.response.body {
                self.response.set_header("content-length", &b.len().to_string());
            }
        }
        self.response.verify();

        if !keep_alive {
            self.closed = true;
        }

        self.write_buffer.extend_from_slice(&self.response.head_to_bytes());
        match std::mem::replace(&mut self.response.body, ResponseBody::Empty) {
            ResponseBody::Empty => {}
            ResponseBody::Buffered(b) => {
                if self.response.chunked {
                    push_chunk(&mut self.write_buffer, &b);
                    self.write_buffer.extend_from_slice(b"0\r\n\r\n");
                } else {
                    self.write_buffer.extend_from_slice(&b);
                }
            }
            ResponseBody::File(file, len) => {
                self.action = ActiveAction::FileStream { file, remaining: len };
            }
        }
    }

    /// Writes one bounded chunk to the socket, refilling from an active
    /// file stream first if the write buffer has drained.
    pub fn pump_write(&mut self) -> bool {
        if self.write_buffer.is_empty() {
            if let ActiveAction::FileStream { file, remaining } = &mut self.action {
                let mut chunk = vec![0u8; 8192];
                let want = chunk.len().min(*remaining as usize);
                match file.read(&mut chunk[..want]) {
                    Ok(0) => self.action = ActiveAction::None,
                    Ok(n) => {
                        self.write_buffer.extend_from_slice(&chunk[..n]);
                        *remaining -= n as u64;
                    }
                    Err(_) => return true,
                }
            }
        }

        if self.write_buffer.is_empty() {
            return false;
        }
        match self.stream.write(&self.write_buffer) {
            Ok(n) => {
                self.bytes_out += n as u64;
                self.write_buffer.drain(..n);
                false
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => false,
            Err(_) => {
                self.aborted = true;
                true
            }
        }
    }

    /// Resets request/response state for the next pipelined or
    /// keep-alive request on this connection.
    pub fn reset_for_next_request(&mut self) {
        let max_body = self.s_cfg.client_max_body_size;
        self.request = HttpRequest::new(max_body);
        self.response = HttpResponse::new(200, "OK");
    }
}

fn push_chunk(buf: &mut Vec<u8>, data: &[u8]) {
    if data.is_empty() {
        return;
    }
    buf.extend_from_slice(format!("{:X}\r\n", data.len()).as_bytes());
    buf.extend_from_slice(data);
    buf.extend_from_slice(b"\r\n");
}

fn handle_error_local(res: &mut HttpResponse, code: u16, s_cfg: Option<&Arc<ServerConfig>>) {
    crate::http::response::handle_error(res, code, s_cfg);
}

/// Builds the standard CGI-ish environment pairs the FastCGI Session
/// sends as PARAMS.
fn build_fastcgi_params(req: &HttpRequest, stream: &TcpStream) -> HashMap<String, String> {
    let mut envs = HashMap::new();
    envs.insert("GATEWAY_INTERFACE".to_string(), "CGI/1.1".to_string());
    envs.insert("SERVER_PROTOCOL".to_string(), "HTTP/1.1".to_string());
    envs.insert("REQUEST_METHOD".to_string(), req.method.to_string());
    envs.insert("SCRIPT_NAME".to_string(), req.path.clone());
    envs.insert("QUERY_STRING".to_string(), req.query.clone());
    envs.insert("SERVER_NAME".to_string(), "fcgi-proxy".to_string());

    if let Ok(addr) = stream.peer_addr() {
        envs.insert("REMOTE_ADDR".to_string(), addr.ip().to_string());
        envs.insert("REMOTE_PORT".to_string(), addr.port().to_string());
    }
    if let Some(ct) = req.header("content-type") {
        envs.insert("CONTENT_TYPE".to_string(), ct.to_string());
    }
    envs.insert("CONTENT_LENGTH".to_string(), req.body.len().to_string());

    for (k, v) in &req.headers {
        let env_key = format!("HTTP_{}", k.to_uppercase().replace('-', "_"));
        envs.insert(env_key, v.clone());
    }
    envs
}
