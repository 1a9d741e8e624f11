use super::{HandlerContext, HandlerStep, PendingAction, StepOutcome};
use std::path::Path;

#[derive(Debug)]
pub struct DynamicStep;

fn extension_of(path: &str) -> Option<&str> {
    Path::new(path).extension().and_then(|s| s.to_str())
}

impl HandlerStep for DynamicStep {
    fn name(&self) -> &'static str {
        "dynamic"
    }

    fn matches(&self, ctx: &HandlerContext) -> bool {
        match extension_of(&ctx.request.path) {
            Some(ext) => ctx.s_cfg.fastcgi.extensions.iter().any(|e| e == ext),
            None => false,
        }
    }

    /// Marks the dispatch as dynamic; the connection driver creates the
    /// FastcgiSession and drives the worker round-trip, since that
    /// requires mio registration the handler layer doesn't own.
    fn execute(&self, ctx: &mut HandlerContext) -> StepOutcome {
        let extension = extension_of(&ctx.request.path).unwrap_or("").to_string();
        ctx.action = PendingAction::Dynamic { preferred_worker: None, extension };
        StepOutcome::Ok
    }

    fn is_final(&self) -> bool {
        true
    }
}
