use super::{HandlerContext, HandlerStep, PendingAction, StepOutcome};
use crate::http::date::http_date;
use crate::http::response::{get_mime_type, handle_error};
use crate::prelude::*;

#[derive(Debug)]
pub struct StaticStep;

impl HandlerStep for StaticStep {
    fn name(&self) -> &'static str {
        "static"
    }

    fn matches(&self, ctx: &HandlerContext) -> bool {
        match Path::new(&ctx.request.path).extension().and_then(|s| s.to_str()) {
            Some(ext) => !ctx.s_cfg.fastcgi.extensions.iter().any(|e| e == ext),
            None => false,
        }
    }

    fn execute(&self, ctx: &mut HandlerContext) -> StepOutcome {
        let root = ctx
            .request
            .dispatch
            .docroot_override
            .clone()
            .unwrap_or_else(|| ctx.s_cfg.paths.public_docroot.clone());
        let mut path = PathBuf::from(root);
        path.push(ctx.request.path.trim_start_matches('/'));

        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) => {
                let code = match e.kind() {
                    ErrorKind::NotFound => HTTP_NOT_FOUND,
                    ErrorKind::PermissionDenied => HTTP_FORBIDDEN,
                    _ => HTTP_INTERNAL_SERVER_ERROR,
                };
                handle_error(ctx.response, code, Some(ctx.s_cfg));
                return StepOutcome::Ok;
            }
        };

        let Ok(metadata) = file.metadata() else {
            handle_error(ctx.response, HTTP_INTERNAL_SERVER_ERROR, Some(ctx.s_cfg));
            return StepOutcome::Ok;
        };
        let last_modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let last_modified_str = http_date(last_modified);

        if let Some(ims) = ctx.request.header("if-modified-since") {
            if ims == last_modified_str {
                ctx.response.set_status_code(304);
                return StepOutcome::Ok;
            }
        }

        let file_size = metadata.len();
        let mime_type = get_mime_type(path.extension().and_then(|s| s.to_str()));
        ctx.response.set_status_code(200);
        ctx.response.set_header("last-modified", &last_modified_str);
        ctx.response.set_file_body(file, file_size, mime_type);
        ctx.action = PendingAction::None;
        StepOutcome::Ok
    }

    fn is_final(&self) -> bool {
        true
    }
}
