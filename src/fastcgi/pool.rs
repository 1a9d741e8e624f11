use crate::config::FastcgiConfig;
use crate::fastcgi::codec::{chunk_into_records, encode_name_value, Record, FCGI_PARAMS, FCGI_STDIN, FCGI_STDOUT};
use crate::prelude::*;
use std::process::{Child, Command, Stdio};

pub type WorkerId = usize;

/// Well-known endpoint every spawned worker must answer for PID
/// discovery, per the pool's spawn-time probe contract.
const PID_PROBE_ENDPOINT: &str = "/__pid__";
const PID_PROBE_REQUEST_ID: u16 = 0;

#[derive(Debug)]
pub enum PoolError {
    NoWorkerAvailable,
    SpawnFailed(String),
}

impl std::fmt::Display for PoolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolError::NoWorkerAvailable => write!(f, "no fastcgi worker available"),
            PoolError::SpawnFailed(cmd) => write!(f, "failed to spawn fastcgi worker: {}", cmd),
        }
    }
}

impl std::error::Error for PoolError {}

/// One launched FastCGI worker process and its scoreboard entry.
#[derive(Debug)]
pub struct Worker {
    pub id: WorkerId,
    pub child: Child,
    pub pid: Option<u32>,
    pub addr: String,
    pub client_count: usize,
    pub request_count: usize,
    pub spawned_at: Instant,
    pub idle_since: Option<Instant>,
}

impl Worker {
    pub fn is_idle(&self) -> bool {
        self.client_count == 0
    }

    /// Cheap liveness check: a worker past its request-count recycle
    /// threshold is treated as no longer alive, without touching the OS.
    pub fn is_alive(&self, max_requests: usize) -> bool {
        self.request_count < max_requests
    }

    /// Expensive, accurate liveness check via `try_wait()`. Reserved for
    /// the connection-failure path — never called on the hot selection
    /// path in `connect()`.
    pub fn probe_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }
}

/// Owns the set of launched workers and implements the connect() policy
/// from the component design: prefer a given worker, else an idle one,
/// else spawn, else least-busy, else fail.
pub struct WorkerPool {
    config: FastcgiConfig,
    workers: HashMap<WorkerId, Worker>,
    next_id: WorkerId,
}

impl WorkerPool {
    pub fn new(config: FastcgiConfig) -> Self {
        Self { config, workers: HashMap::new(), next_id: 0 }
    }

    pub fn start_minimum(&mut self) -> Result<()> {
        for _ in 0..self.config.min_processes {
            self.spawn_worker()?;
        }
        Ok(())
    }

    fn bind_addr_for(&self, id: WorkerId) -> String {
        self.config
            .binds
            .get(id)
            .cloned()
            .unwrap_or_else(|| format!("127.0.0.1:{}", 9000 + id))
    }

    fn spawn_worker(&mut self) -> Result<WorkerId> {
        let id = self.next_id;
        self.next_id += 1;
        let addr = self.bind_addr_for(id);

        let mut parts = self.config.command.split_whitespace();
        let program = parts.next().ok_or_else(|| "fastcgi.command is empty".to_string())?;
        let child = Command::new(program)
            .args(parts)
            .env("FCGI_BIND", &addr)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| format!("failed to spawn fastcgi worker '{}': {}", self.config.command, e))?;

        info!("spawned fastcgi worker {} on {}", id, addr);

        self.workers.insert(
            id,
            Worker {
                id,
                child,
                pid: None,
                addr: addr.clone(),
                client_count: 0,
                request_count: 0,
                spawned_at: Instant::now(),
                idle_since: Some(Instant::now()),
            },
        );

        match probe_pid(&addr) {
            Some(pid) => self.record_pid(id, pid),
            None => warn!("fastcgi worker {} did not answer its PID probe at {}", id, addr),
        }
        Ok(id)
    }

    /// Implements the connect() policy: preferred worker, else idle, else
    /// spawn up to max, else least-busy, else fail.
    pub fn connect(
        &mut self,
        preferred: Option<WorkerId>,
    ) -> std::result::Result<(WorkerId, String), PoolError> {
        self.cull();

        if let Some(id) = preferred {
            if self.workers.contains_key(&id) {
                return Ok((id, self.workers[&id].addr.clone()));
            }
        }

        if let Some(id) = self.workers.values().find(|w| w.is_idle()).map(|w| w.id) {
            return Ok((id, self.workers[&id].addr.clone()));
        }

        if self.workers.len() < self.config.max_processes {
            if let Ok(id) = self.spawn_worker() {
                return Ok((id, self.workers[&id].addr.clone()));
            }
            return Err(PoolError::SpawnFailed(self.config.command.clone()));
        }

        if let Some(id) = self
            .workers
            .values()
            .filter(|w| w.is_alive(self.config.max_requests))
            .min_by_key(|w| w.client_count)
            .map(|w| w.id)
        {
            return Ok((id, self.workers[&id].addr.clone()));
        }

        Err(PoolError::NoWorkerAvailable)
    }

    /// Called when a socket connect/read to `id` has just failed. Runs
    /// the expensive OS-level liveness probe and recycles the worker if
    /// it has actually exited, so the next `connect()` doesn't hand the
    /// same dead worker back out. Returns true if the worker was recycled.
    pub fn mark_connection_failed(&mut self, id: WorkerId) -> bool {
        let dead = match self.workers.get_mut(&id) {
            Some(w) => !w.probe_alive(),
            None => return false,
        };
        if dead {
            warn!("fastcgi worker {} failed its liveness probe, recycling", id);
            self.batch_kill(&[id]);
        }
        dead
    }

    /// Must be called exactly once per successfully-connected session,
    /// never once per retry within a single `connect()` call.
    pub fn mark_in_use(&mut self, id: WorkerId) {
        if let Some(w) = self.workers.get_mut(&id) {
            w.client_count += 1;
            w.idle_since = None;
        }
    }

    pub fn release(&mut self, id: WorkerId) {
        if let Some(w) = self.workers.get_mut(&id) {
            w.client_count = w.client_count.saturating_sub(1);
            w.request_count += 1;
            if w.client_count == 0 {
                w.idle_since = Some(Instant::now());
            }
            if w.request_count >= self.config.max_requests {
                self.recycle(id);
            }
        }
    }

    /// Caches the PID discovered by a zero-id HEAD probe against the
    /// worker's well-known endpoint.
    pub fn record_pid(&mut self, id: WorkerId, pid: u32) {
        if let Some(w) = self.workers.get_mut(&id) {
            w.pid = Some(pid);
        }
    }

    fn recycle(&mut self, id: WorkerId) {
        self.batch_kill(&[id]);
    }

    /// Terminates any worker idle longer than the configured cull
    /// threshold (minutes) while pool size stays above the minimum.
    /// Termination is a single batched kill over the collected PID list.
    pub fn cull(&mut self) {
        if self.workers.len() <= self.config.min_processes {
            return;
        }
        let threshold = Duration::from_secs(self.config.cull_time_limit as u64 * 60);
        let mut to_kill = Vec::new();
        for w in self.workers.values() {
            if self.workers.len() - to_kill.len() <= self.config.min_processes {
                break;
            }
            if let Some(idle_since) = w.idle_since {
                if idle_since.elapsed() >= threshold {
                    to_kill.push(w.id);
                }
            }
        }
        self.batch_kill(&to_kill);
    }

    pub fn shutdown_all(&mut self) {
        let ids: Vec<WorkerId> = self.workers.keys().copied().collect();
        self.batch_kill(&ids);
    }

    /// Terminates the given workers as one batch: a single OS-level kill
    /// by PID list for every worker whose PID was discovered, then reaps
    /// each child individually so none are left as zombies.
    fn batch_kill(&mut self, ids: &[WorkerId]) {
        if ids.is_empty() {
            return;
        }
        let pids: Vec<u32> = ids.iter().filter_map(|id| self.workers.get(id).and_then(|w| w.pid)).collect();
        if !pids.is_empty() {
            let _ = Command::new("kill")
                .arg("-TERM")
                .args(pids.iter().map(|p| p.to_string()))
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
        }
        for id in ids {
            if let Some(mut w) = self.workers.remove(id) {
                let request_count = w.request_count;
                let _ = w.child.kill();
                let _ = w.child.wait();
                info!("recycled fastcgi worker {} after {} requests", id, request_count);
            }
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// A scoreboard row per live worker, for the admin status page.
    pub fn scoreboard(&self) -> Vec<crate::handlers::WorkerStatus> {
        self.workers
            .values()
            .map(|w| crate::handlers::WorkerStatus {
                id: w.id,
                pid: w.pid,
                client_count: w.client_count,
                request_count: w.request_count,
            })
            .collect()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown_all();
    }
}

/// Queries a freshly spawned worker with a zero-id HEAD FastCGI request
/// against its well-known PID endpoint and returns the PID carried back
/// in the `X-Pid` response header. The worker's listening socket may not
/// be accepting yet, so connect is retried briefly before giving up.
fn probe_pid(addr: &str) -> Option<u32> {
    let socket_addr: SocketAddr = addr.parse().ok()?;
    let deadline = Instant::now() + Duration::from_millis(500);

    let mut stream = loop {
        match TcpStream::connect(socket_addr) {
            Ok(s) => break s,
            Err(_) if Instant::now() < deadline => std::thread::sleep(Duration::from_millis(10)),
            Err(_) => return None,
        }
    };

    let begin = Record::begin_request(PID_PROBE_REQUEST_ID);
    stream.write_all(&begin.encode()).ok()?;

    let mut content = Vec::new();
    encode_name_value("REQUEST_METHOD", "HEAD", &mut content).ok()?;
    encode_name_value("SCRIPT_NAME", PID_PROBE_ENDPOINT, &mut content).ok()?;
    for rec in chunk_into_records(FCGI_PARAMS, PID_PROBE_REQUEST_ID, &content) {
        stream.write_all(&rec.encode()).ok()?;
    }
    stream
        .write_all(&Record { rec_type: FCGI_PARAMS, request_id: PID_PROBE_REQUEST_ID, content: Vec::new() }.encode())
        .ok()?;
    stream
        .write_all(&Record { rec_type: FCGI_STDIN, request_id: PID_PROBE_REQUEST_ID, content: Vec::new() }.encode())
        .ok()?;

    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    while Instant::now() < deadline {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                if let Some(pid) = extract_pid_header(&buf) {
                    return Some(pid);
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => std::thread::sleep(Duration::from_millis(5)),
            Err(_) => break,
        }
    }
    extract_pid_header(&buf)
}

fn extract_pid_header(buf: &[u8]) -> Option<u32> {
    let mut pos = 0;
    let mut stdout = Vec::new();
    while let Ok(Some((rec, consumed))) = Record::decode(&buf[pos..]) {
        if rec.rec_type == FCGI_STDOUT {
            stdout.extend_from_slice(&rec.content);
        }
        pos += consumed;
        if consumed == 0 || pos >= buf.len() {
            break;
        }
    }
    String::from_utf8_lossy(&stdout).lines().find_map(|line| {
        let (key, val) = line.split_once(':')?;
        key.trim().eq_ignore_ascii_case("x-pid").then(|| val.trim().parse().ok()).flatten()
    })
}
