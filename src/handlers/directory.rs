use super::{HandlerContext, HandlerStep, StepOutcome};
use crate::http::response::{generate_autoindex, handle_error};
use crate::prelude::*;
use std::path::Path;

#[derive(Debug)]
pub struct DirectoryStep;

impl HandlerStep for DirectoryStep {
    fn name(&self) -> &'static str {
        "directory"
    }

    fn matches(&self, ctx: &HandlerContext) -> bool {
        Path::new(&ctx.request.path).extension().is_none()
    }

    /// Adds a trailing slash via 301 if missing, otherwise picks the
    /// first existing configured index file and re-processes the
    /// request against it.
    fn execute(&self, ctx: &mut HandlerContext) -> StepOutcome {
        if !ctx.request.path.ends_with('/') {
            let scheme = if ctx.s_cfg.tls.enabled { "https" } else { "http" };
            let host = ctx
                .request
                .header("host")
                .map(str::to_string)
                .unwrap_or_else(|| format!("{}:{}", ctx.s_cfg.host, ctx.s_cfg.port));
            let target = format!("{}://{}{}/", scheme, host, ctx.request.path);
            *ctx.response = HttpResponse::redirect(HTTP_MOVED_PERMANENTLY, &target);
            return StepOutcome::Ok;
        }

        let root = ctx
            .request
            .dispatch
            .docroot_override
            .clone()
            .unwrap_or_else(|| ctx.s_cfg.paths.public_docroot.clone());
        let dir = PathBuf::from(&root).join(ctx.request.path.trim_start_matches('/'));

        for candidate in &ctx.s_cfg.index_files {
            if dir.join(candidate).is_file() {
                ctx.request.path = format!("{}{}", ctx.request.path, candidate);
                ctx.request.url = ctx.request.path.clone();
                ctx.request.dispatch.reprocessing = true;
                return StepOutcome::Ok;
            }
        }

        if dir.is_dir() {
            *ctx.response = generate_autoindex(&dir, &ctx.request.path);
        } else {
            handle_error(ctx.response, HTTP_NOT_FOUND, Some(ctx.s_cfg));
        }
        StepOutcome::Ok
    }

    fn is_final(&self) -> bool {
        true
    }
}
