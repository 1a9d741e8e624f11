use super::{HandlerContext, HandlerStep, StepOutcome};
use crate::prelude::*;

#[derive(Debug)]
pub struct AdminStep;

impl HandlerStep for AdminStep {
    fn name(&self) -> &'static str {
        "admin"
    }

    fn matches(&self, ctx: &HandlerContext) -> bool {
        ctx.request.path == "/server-status" || ctx.request.path == "/server-info"
    }

    /// Renders the status page, substituting the well-known placeholders
    /// (`{version, launched, traffic-up, traffic-down, clients,
    /// fcgi-scoreboard, aborted, handlers, signature}`) with values the
    /// connection driver fills in via `Server::status_snapshot()`.
    fn execute(&self, ctx: &mut HandlerContext) -> StepOutcome {
        if ctx.request.dispatch.username.is_none() {
            return StepOutcome::Skip;
        }

        let status = ctx.status;
        let scoreboard = if status.fcgi_scoreboard.is_empty() {
            "(no workers)".to_string()
        } else {
            status
                .fcgi_scoreboard
                .iter()
                .map(|w| {
                    format!(
                        "worker {} (pid {}): {} clients, {} requests served",
                        w.id,
                        w.pid.map(|p| p.to_string()).unwrap_or_else(|| "?".to_string()),
                        w.client_count,
                        w.request_count,
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        };
        let signature = format!("fcgi-proxy/{}", status.version);

        let body = format!(
            "<html><body><h1>Server Status</h1><pre>\
             user: {}\n\
             version: {}\n\
             launched: {}\n\
             traffic-up: {} bytes\n\
             traffic-down: {} bytes\n\
             clients: {}\n\
             aborted: {}\n\
             handlers: {}\n\
             fcgi-scoreboard:\n{}\n\
             </pre><p>{}</p></body></html>",
            ctx.request.dispatch.username.as_deref().unwrap_or("-"),
            status.version,
            status.launched,
            status.traffic_up,
            status.traffic_down,
            status.clients,
            status.aborted,
            ctx.s_cfg.handlers.join(" -> "),
            scoreboard,
            signature,
        );
        ctx.response.set_status_code(200);
        ctx.response.set_body(body.into_bytes(), "text/html");
        StepOutcome::Ok
    }

    fn is_final(&self) -> bool {
        true
    }

    fn use_once(&self) -> bool {
        true
    }
}
