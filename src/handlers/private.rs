use super::{HandlerContext, HandlerStep, StepOutcome};

const PRIVATE_PREFIXES: [&str; 2] = ["/api-docs", "/extras"];

#[derive(Debug)]
pub struct PrivateStep;

impl HandlerStep for PrivateStep {
    fn name(&self) -> &'static str {
        "private"
    }

    fn matches(&self, ctx: &HandlerContext) -> bool {
        PRIVATE_PREFIXES.iter().any(|p| ctx.request.path.starts_with(p))
    }

    /// Remaps the docroot to the server's private tree and strips the
    /// matched private prefix from the path so downstream static/dynamic
    /// steps see a path relative to that tree.
    fn execute(&self, ctx: &mut HandlerContext) -> StepOutcome {
        let Some(prefix) = PRIVATE_PREFIXES.iter().find(|p| ctx.request.path.starts_with(**p)) else {
            return StepOutcome::Skip;
        };
        ctx.request.dispatch.docroot_override = Some(ctx.s_cfg.paths.private_docroot.clone());
        let stripped = ctx.request.path[prefix.len()..].to_string();
        ctx.request.path = if stripped.is_empty() { "/".to_string() } else { stripped };
        StepOutcome::Ok
    }

    fn use_once(&self) -> bool {
        true
    }
}
