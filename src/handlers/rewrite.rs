use super::{HandlerContext, HandlerStep, StepOutcome};
use crate::config::RewriteRule;
use crate::http::response::HttpResponse;
use regex::Regex;
use std::fs;

#[derive(Debug)]
pub struct RewriteStep;

/// A rule's match regex is anchored to the whole path when `strict` is
/// set, otherwise it may match anywhere in the path.
fn rule_regex(pattern: &str, strict: bool) -> Option<Regex> {
    if strict {
        Regex::new(&format!("^(?:{})$", pattern)).ok()
    } else {
        Regex::new(pattern).ok()
    }
}

fn rule_matches(rule: &RewriteRule, path: &str) -> bool {
    let Some(re) = rule_regex(&rule.pattern, rule.strict) else { return false };
    if !re.is_match(path) {
        return false;
    }
    if let Some(exclude) = &rule.exclude {
        if Regex::new(exclude).map(|ex| ex.is_match(path)).unwrap_or(false) {
            return false;
        }
    }
    if rule.is_file || rule.is_dir {
        let target = re.replace(path, rule.replacement.as_str());
        return match fs::metadata(target.as_ref()) {
            Ok(meta) => (!rule.is_file || meta.is_file()) && (!rule.is_dir || meta.is_dir()),
            Err(_) => false,
        };
    }
    true
}

fn matching_rule<'a>(rules: &'a [RewriteRule], path: &str) -> Option<&'a RewriteRule> {
    rules.iter().find(|r| rule_matches(r, path))
}

fn rewritten_path(rule: &RewriteRule, path: &str) -> String {
    match rule_regex(&rule.pattern, rule.strict) {
        Some(re) => re.replace(path, rule.replacement.as_str()).into_owned(),
        None => path.to_string(),
    }
}

/// Bounds the in-pass rewrite chain so a misconfigured set of
/// non-`last` rules can't loop forever against a path they keep matching.
const MAX_CHAIN_LEN: usize = 16;

impl HandlerStep for RewriteStep {
    fn name(&self) -> &'static str {
        "rewrite"
    }

    fn matches(&self, ctx: &HandlerContext) -> bool {
        matching_rule(&ctx.s_cfg.rewrites, &ctx.request.path).is_some()
    }

    /// Applies the first matching rule, and, unless it's flagged `last`,
    /// keeps applying further matching rules against the rewritten path
    /// in the same pass. Requests reauthorization so an auth step
    /// configured for the rewritten path still runs.
    fn execute(&self, ctx: &mut HandlerContext) -> StepOutcome {
        let mut matched = false;

        for _ in 0..MAX_CHAIN_LEN {
            let Some(rule) = matching_rule(&ctx.s_cfg.rewrites, &ctx.request.path) else { break };
            matched = true;
            let new_path = rewritten_path(rule, &ctx.request.path);

            if let Some(code) = rule.redirect_status {
                *ctx.response = HttpResponse::redirect(code, &new_path);
                ctx.action = super::PendingAction::None;
                return StepOutcome::Ok;
            }

            if ctx.request.dispatch.original_url.is_none() {
                ctx.request.dispatch.original_url = Some(ctx.request.url.clone());
            }
            ctx.request.path = new_path.clone();
            ctx.request.url = if ctx.request.query.is_empty() {
                new_path
            } else {
                format!("{}?{}", new_path, ctx.request.query)
            };

            if rule.last {
                break;
            }
        }

        if !matched {
            return StepOutcome::Skip;
        }
        ctx.reauthorize = true;
        StepOutcome::Ok
    }

    fn use_once(&self) -> bool {
        true
    }

    fn skip_on_error(&self) -> bool {
        true
    }
}
