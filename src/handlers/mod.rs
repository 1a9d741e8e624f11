pub mod admin;
pub mod auth;
pub mod directory;
pub mod dynamic;
pub mod private;
pub mod rewrite;
pub mod static_handler;

use crate::fastcgi::pool::WorkerId;
use crate::prelude::*;
use std::collections::HashSet;

#[derive(Debug, PartialEq, Eq)]
pub enum StepOutcome {
    Ok,
    Skip,
    Fatal,
}

/// What a handler step asked the connection driver to do once the
/// pipeline finishes running for this dispatch. A static file body is
/// carried directly in `Response::body` (`ResponseBody::File`) rather
/// than duplicated here.
#[derive(Debug, Default)]
pub enum PendingAction {
    #[default]
    None,
    Dynamic {
        preferred_worker: Option<WorkerId>,
        extension: String,
    },
}

/// One worker's scoreboard row, for the admin status page.
#[derive(Debug, Clone)]
pub struct WorkerStatus {
    pub id: WorkerId,
    pub pid: Option<u32>,
    pub client_count: usize,
    pub request_count: usize,
}

/// A point-in-time snapshot of server-wide state the admin status page
/// substitutes into its template. Built by `Server::status_snapshot()`,
/// which owns the connection table and worker pool the pipeline itself
/// has no access to.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub version: &'static str,
    pub launched: String,
    pub traffic_up: u64,
    pub traffic_down: u64,
    pub clients: usize,
    pub fcgi_scoreboard: Vec<WorkerStatus>,
    pub aborted: u64,
}

impl StatusSnapshot {
    pub fn empty() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            launched: String::new(),
            traffic_up: 0,
            traffic_down: 0,
            clients: 0,
            fcgi_scoreboard: Vec::new(),
            aborted: 0,
        }
    }
}

pub struct HandlerContext<'a> {
    pub request: &'a mut HttpRequest,
    pub response: &'a mut HttpResponse,
    pub s_cfg: &'a Arc<ServerConfig>,
    pub action: PendingAction,
    pub reauthorize: bool,
    pub status: &'a StatusSnapshot,
}

pub trait HandlerStep: std::fmt::Debug {
    fn name(&self) -> &'static str;
    fn matches(&self, ctx: &HandlerContext) -> bool;
    fn execute(&self, ctx: &mut HandlerContext) -> StepOutcome;
    fn is_final(&self) -> bool {
        false
    }
    fn use_once(&self) -> bool {
        false
    }
    fn skip_on_error(&self) -> bool {
        false
    }
}

/// An ordered, cursor-driven list of handler steps. Supports
/// insert-after-cursor (for the reauthorization hook) and tracks which
/// use-once steps have already fired for this dispatch.
pub struct HandlerQueue {
    steps: Vec<Box<dyn HandlerStep>>,
    cursor: usize,
    fired_once: Vec<bool>,
}

impl HandlerQueue {
    pub fn build(names: &[String]) -> Self {
        Self::build_with_fired(names, &HashSet::new())
    }

    /// Rebuilds the queue for a reprocessing pass, pre-marking any
    /// use-once step whose name is in `fired_names` as already fired so
    /// it is skipped a second time, per the reprocessing invariant.
    pub fn build_with_fired(names: &[String], fired_names: &HashSet<String>) -> Self {
        let steps: Vec<Box<dyn HandlerStep>> = names
            .iter()
            .filter_map(|n| step_by_name(n))
            .collect();
        let fired_once = steps.iter().map(|s| fired_names.contains(s.name())).collect();
        Self { steps, cursor: 0, fired_once }
    }

    /// Names of the steps that fired during this queue's run, for
    /// carrying use-once state into a rebuilt queue across reprocessing.
    pub fn fired_step_names(&self) -> HashSet<String> {
        self.steps
            .iter()
            .zip(self.fired_once.iter())
            .filter(|(_, &fired)| fired)
            .map(|(step, _)| step.name().to_string())
            .collect()
    }

    /// Inserts the named step immediately after the current cursor
    /// position, for the reauthorization hook.
    pub fn insert_after_cursor(&mut self, name: &str) {
        if let Some(step) = step_by_name(name) {
            let pos = (self.cursor + 1).min(self.steps.len());
            self.steps.insert(pos, step);
            self.fired_once.insert(pos, false);
        }
    }

    /// Runs the queue from the current cursor to completion or until a
    /// `final` step succeeds. Returns true if some step produced a final
    /// response.
    pub fn run(&mut self, ctx: &mut HandlerContext) -> bool {
        while self.cursor < self.steps.len() {
            let idx = self.cursor;
            let already_fired = self.fired_once[idx];
            let step = &self.steps[idx];

            if step.use_once() && already_fired {
                self.cursor += 1;
                continue;
            }
            if !step.matches(ctx) {
                self.cursor += 1;
                continue;
            }

            self.fired_once[idx] = true;
            match step.execute(ctx) {
                StepOutcome::Fatal => {
                    if !step.skip_on_error() {
                        return true;
                    }
                }
                StepOutcome::Skip => {}
                StepOutcome::Ok => {
                    // A redirect response is terminal regardless of the
                    // step's declared `final` flag (e.g. rewrite's
                    // redirect_status exit).
                    if step.is_final() || (300..400).contains(&ctx.response.status_code) {
                        return true;
                    }
                    if ctx.reauthorize {
                        ctx.reauthorize = false;
                        self.insert_after_cursor("auth");
                    }
                }
            }
            self.cursor += 1;
        }
        false
    }
}

fn step_by_name(name: &str) -> Option<Box<dyn HandlerStep>> {
    match name {
        "auth" => Some(Box::new(auth::AuthStep)),
        "admin" => Some(Box::new(admin::AdminStep)),
        "private" => Some(Box::new(private::PrivateStep)),
        "rewrite" => Some(Box::new(rewrite::RewriteStep)),
        "dynamic" => Some(Box::new(dynamic::DynamicStep)),
        "static" => Some(Box::new(static_handler::StaticStep)),
        "directory" => Some(Box::new(directory::DirectoryStep)),
        _ => None,
    }
}

pub use crate::http::response::{generate_autoindex, get_mime_type, handle_error};
