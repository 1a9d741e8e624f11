use crate::fastcgi::pool::WorkerPool;
use crate::handlers::{PendingAction, StatusSnapshot};
use crate::http::connection::ActiveAction;
use crate::net::{TokenAllocator, LISTENER};
use crate::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};

const POLL_TIMEOUT: Duration = Duration::from_millis(250);

/// Owns the listening socket, the live client connections, and the
/// FastCGI worker pool. The single loop thread is the sole mutator of
/// all three.
pub struct Server {
    listener: TcpListener,
    config: Arc<ServerConfig>,
    connections: HashMap<Token, ClientSession>,
    fastcgi_tokens: HashMap<Token, Token>,
    tokens: TokenAllocator,
    pool: WorkerPool,
    shutdown: Arc<AtomicBool>,
    started_at: Instant,
    traffic_up: u64,
    traffic_down: u64,
    aborted: u64,
}

impl Server {
    pub fn new(config: AppConfig, poll: &Poll) -> Result<Self> {
        let s_cfg = Arc::new(config.server);
        let addr: SocketAddr = format!("{}:{}", s_cfg.host, s_cfg.port).parse()?;
        let mut listener = TcpListener::bind(addr)?;
        poll.registry().register(&mut listener, LISTENER, Interest::READABLE)?;

        let mut pool = WorkerPool::new(s_cfg.fastcgi.clone());
        pool.start_minimum()?;

        Ok(Self {
            listener,
            config: s_cfg,
            connections: HashMap::new(),
            fastcgi_tokens: HashMap::new(),
            tokens: TokenAllocator::new(),
            pool,
            shutdown: Arc::new(AtomicBool::new(false)),
            started_at: Instant::now(),
            traffic_up: 0,
            traffic_down: 0,
            aborted: 0,
        })
    }

    /// Builds a point-in-time snapshot of server-wide state for the admin
    /// status page: uptime, cumulative traffic, live client/worker counts
    /// and the worker scoreboard.
    fn status_snapshot(&self) -> StatusSnapshot {
        let live_up: u64 = self.connections.values().map(|c| c.bytes_in).sum();
        let live_down: u64 = self.connections.values().map(|c| c.bytes_out).sum();
        StatusSnapshot {
            version: env!("CARGO_PKG_VERSION"),
            launched: crate::http::date::http_date(self.started_at_system_time()),
            traffic_up: self.traffic_up + live_up,
            traffic_down: self.traffic_down + live_down,
            clients: self.connections.len(),
            fcgi_scoreboard: self.pool.scoreboard(),
            aborted: self.aborted,
        }
    }

    fn started_at_system_time(&self) -> std::time::SystemTime {
        std::time::SystemTime::now() - self.started_at.elapsed()
    }

    /// Folds a departing connection's traffic counters and abort flag
    /// into the server-wide cumulative totals before it is dropped.
    fn retire_connection(&mut self, conn: &ClientSession) {
        self.traffic_up += conn.bytes_in;
        self.traffic_down += conn.bytes_out;
        if conn.aborted {
            self.aborted += 1;
        }
    }

    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the readiness-selection loop until the shutdown flag trips.
    pub fn run(&mut self, poll: &mut Poll) -> Result<()> {
        let mut events = Events::with_capacity(1024);
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                info!("shutdown requested, draining {} connections", self.connections.len());
                self.drain_for_shutdown(poll);
                return Ok(());
            }

            poll.poll(&mut events, Some(POLL_TIMEOUT))?;

            for event in events.iter() {
                let token = event.token();
                if token == LISTENER {
                    self.accept_all(poll);
                    continue;
                }
                if let Some(&client_token) = self.fastcgi_tokens.get(&token) {
                    self.service_fastcgi(poll, token, client_token);
                    continue;
                }
                self.service_client(poll, token, event);
            }

            self.reap_idle(poll);
            self.pool.cull();
        }
    }

    fn accept_all(&mut self, poll: &Poll) {
        loop {
            match self.listener.accept() {
                Ok((mut stream, _addr)) => {
                    if self.connections.len() >= self.config.max_clients {
                        drop(stream);
                        continue;
                    }
                    let token = self.tokens.allocate();
                    if poll.registry().register(&mut stream, token, Interest::READABLE).is_err() {
                        self.tokens.release(token);
                        continue;
                    }
                    let session = ClientSession::new(stream, Arc::clone(&self.config));
                    self.connections.insert(token, session);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) => {
                    warn!("accept failed: {}", e);
                    return;
                }
            }
        }
    }

    fn service_client(&mut self, poll: &Poll, token: Token, event: &Event) {
        let Some(conn) = self.connections.get_mut(&token) else { return };
        conn.touch();

        if event.is_readable() {
            match conn.read_data() {
                Ok(is_eof) => conn.closed = conn.closed || is_eof,
                Err(_) => conn.closed = true,
            }

            if !conn.closed && conn.request.is_complete() {
                self.run_dispatch(poll, token);
            }
        }

        let conn_has_output =
            self.connections.get(&token).map(|c| !c.write_buffer.is_empty()).unwrap_or(false);
        if event.is_writable() || conn_has_output {
            self.pump_write(poll, token);
        }

        self.maybe_remove(poll, token);
    }

    fn run_dispatch(&mut self, poll: &Poll, token: Token) {
        let snapshot = self.status_snapshot();
        let Some(conn) = self.connections.get_mut(&token) else { return };
        match conn.dispatch(&snapshot) {
            PendingAction::None => {
                conn.prepare_response();
                let _ = poll.registry().reregister(
                    &mut conn.stream,
                    token,
                    Interest::READABLE | Interest::WRITABLE,
                );
            }
            PendingAction::Dynamic { preferred_worker, .. } => {
                if let Err(e) = conn.start_fastcgi(&mut self.pool, preferred_worker) {
                    errors!("fastcgi dispatch failed: {}", e);
                    crate::http::response::handle_error(
                        &mut conn.response,
                        HTTP_BAD_GATEWAY,
                        Some(&self.config),
                    );
                    conn.prepare_response();
                    let _ = poll.registry().reregister(
                        &mut conn.stream,
                        token,
                        Interest::READABLE | Interest::WRITABLE,
                    );
                    return;
                }
                if let ActiveAction::Fastcgi(session) = &mut conn.action {
                    let fd_token = self.tokens.allocate();
                    if poll
                        .registry()
                        .register(&mut session.stream, fd_token, Interest::READABLE | Interest::WRITABLE)
                        .is_ok()
                    {
                        self.fastcgi_tokens.insert(fd_token, token);
                    } else {
                        self.tokens.release(fd_token);
                    }
                }
            }
        }
    }

    fn service_fastcgi(&mut self, poll: &Poll, fd_token: Token, client_token: Token) {
        let Some(conn) = self.connections.get_mut(&client_token) else {
            self.fastcgi_tokens.remove(&fd_token);
            self.tokens.release(fd_token);
            return;
        };
        let ended = match conn.pump_fastcgi(&mut self.pool) {
            Ok(ended) => ended,
            Err(e) => {
                errors!("fastcgi round-trip failed: {}", e);
                true
            }
        };

        if ended {
            if let ActiveAction::Fastcgi(session) = &mut conn.action {
                let _ = poll.registry().deregister(&mut session.stream);
            }
            self.fastcgi_tokens.remove(&fd_token);
            self.tokens.release(fd_token);
            conn.action = ActiveAction::None;
            conn.prepare_response();
            let _ = poll.registry().reregister(
                &mut conn.stream,
                client_token,
                Interest::READABLE | Interest::WRITABLE,
            );
        }
    }

    fn pump_write(&mut self, poll: &Poll, token: Token) {
        let Some(conn) = self.connections.get_mut(&token) else { return };
        let write_failed = conn.pump_write();
        conn.closed = conn.closed || write_failed;

        let drained = conn.write_buffer.is_empty() && !matches!(conn.action, ActiveAction::FileStream { .. });
        if !conn.closed && drained {
            conn.reset_for_next_request();
            let _ = poll.registry().reregister(&mut conn.stream, token, Interest::READABLE);

            // HTTP pipelining: a second request may already be buffered.
            if conn.request.is_complete() {
                self.run_dispatch(poll, token);
            }
        }
    }

    fn maybe_remove(&mut self, poll: &Poll, token: Token) {
        let remove = self.connections.get(&token).map(|c| c.should_close()).unwrap_or(false);
        if remove {
            if let Some(mut conn) = self.connections.remove(&token) {
                let _ = poll.registry().deregister(&mut conn.stream);
                self.retire_connection(&conn);
            }
            self.tokens.release(token);
        }
    }

    fn reap_idle(&mut self, poll: &Poll) {
        let now = Instant::now();
        let timeout = Duration::from_secs(self.config.keep_alive_timeout as u64);
        let stale: Vec<Token> = self
            .connections
            .iter()
            .filter(|(_, c)| now.duration_since(c.last_activity) > timeout)
            .map(|(t, _)| *t)
            .collect();
        for token in stale {
            if let Some(mut conn) = self.connections.remove(&token) {
                let _ = poll.registry().deregister(&mut conn.stream);
                conn.aborted = true;
                self.retire_connection(&conn);
            }
            self.tokens.release(token);
        }
    }

    /// Closes the listener, gives every in-flight connection one bounded
    /// write to drain its current response, deregisters everything, and
    /// signals every worker.
    fn drain_for_shutdown(&mut self, poll: &Poll) {
        let _ = poll.registry().deregister(&mut self.listener);
        for conn in self.connections.values_mut() {
            conn.pump_write();
            let _ = poll.registry().deregister(&mut conn.stream);
        }
        let drained: Vec<ClientSession> = self.connections.drain().map(|(_, c)| c).collect();
        for conn in &drained {
            self.retire_connection(conn);
        }
        self.pool.shutdown_all();
    }
}
