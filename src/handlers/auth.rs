use super::{HandlerContext, HandlerStep, StepOutcome};
use crate::prelude::*;

#[derive(Debug)]
pub struct AuthStep;

fn protected_realm_for<'a>(s_cfg: &'a ServerConfig, url: &str) -> Option<(&'a str, &'a str, &'a str)> {
    if url.starts_with("/server-status") || url.starts_with("/server-info") {
        return Some((&s_cfg.auth.admin_realm, &s_cfg.auth.admin_user, &s_cfg.auth.admin_pass));
    }
    for (prefix, rule) in &s_cfg.auth.protected {
        if url.starts_with(prefix.as_str()) {
            return Some((&rule.realm, &rule.user, &rule.pass));
        }
    }
    None
}

fn opaque_for(realm: &str) -> String {
    format!("{:x}", md5::compute(realm.as_bytes()))
}

fn generate_nonce() -> String {
    use rand::Rng;
    let bytes: [u8; 16] = rand::thread_rng().gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Parses the `Authorization: Digest ...` header into its component
/// fields, keyed by the RFC 7616 parameter names.
fn parse_digest_header(value: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    let rest = value.trim_start_matches("Digest").trim();
    for part in split_digest_params(rest) {
        if let Some((k, v)) = part.split_once('=') {
            let v = v.trim().trim_matches('"');
            out.insert(k.trim().to_string(), v.to_string());
        }
    }
    out
}

fn split_digest_params(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth_quote = false;
    let mut current = String::new();
    for c in s.chars() {
        match c {
            '"' => {
                depth_quote = !depth_quote;
                current.push(c);
            }
            ',' if !depth_quote => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

fn verify_digest(
    params: &HashMap<String, String>,
    method: &str,
    user: &str,
    pass: &str,
    realm: &str,
) -> bool {
    let Some(username) = params.get("username") else { return false };
    if username != user {
        return false;
    }
    let Some(uri) = params.get("uri") else { return false };
    let Some(nonce) = params.get("nonce") else { return false };
    let Some(nc) = params.get("nc") else { return false };
    let Some(cnonce) = params.get("cnonce") else { return false };
    let Some(response) = params.get("response") else { return false };
    let qop = params.get("qop").map(String::as_str).unwrap_or("auth");

    let ha1 = format!("{:x}", md5::compute(format!("{}:{}:{}", user, realm, pass)));
    let ha2 = format!("{:x}", md5::compute(format!("{}:{}", method, uri)));
    let expected = format!(
        "{:x}",
        md5::compute(format!("{}:{}:{}:{}:{}:{}", ha1, nonce, nc, cnonce, qop, ha2))
    );
    &expected == response
}

impl HandlerStep for AuthStep {
    fn name(&self) -> &'static str {
        "auth"
    }

    fn matches(&self, ctx: &HandlerContext) -> bool {
        protected_realm_for(ctx.s_cfg, &ctx.request.url).is_some()
    }

    fn execute(&self, ctx: &mut HandlerContext) -> StepOutcome {
        let Some((realm, user, pass)) = protected_realm_for(ctx.s_cfg, &ctx.request.url) else {
            return StepOutcome::Skip;
        };
        let realm = realm.to_string();
        let user = user.to_string();
        let pass = pass.to_string();

        let auth_header = ctx.request.header("authorization").map(str::to_string);
        if let Some(header) = auth_header {
            let params = parse_digest_header(&header);
            if verify_digest(&params, &ctx.request.method.to_string(), &user, &pass, &realm) {
                ctx.request.dispatch.username = Some(user);
                return StepOutcome::Ok;
            }
        }

        let nonce = generate_nonce();
        let challenge = format!(
            "Digest realm=\"{}\",qop=\"auth\",nonce=\"{}\",opaque=\"{}\"",
            realm,
            nonce,
            opaque_for(&realm)
        );
        ctx.response.set_status_code(HTTP_UNAUTHORIZED);
        ctx.response.set_header("www-authenticate", &challenge);
        ctx.response.set_body(Vec::new(), "text/plain");
        StepOutcome::Fatal
    }

    fn use_once(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_params_parse_quoted_and_bare_values() {
        let header = r#"Digest username="bob", realm="x", nonce="n1", uri="/a", qop=auth, nc=00000001, cnonce="c1", response="r1""#;
        let params = parse_digest_header(header);
        assert_eq!(params.get("username").unwrap(), "bob");
        assert_eq!(params.get("qop").unwrap(), "auth");
        assert_eq!(params.get("nc").unwrap(), "00000001");
    }

    #[test]
    fn verify_digest_accepts_matching_response() {
        let user = "admin";
        let pass = "secret";
        let realm = "server admin";
        let method = "GET";
        let uri = "/server-status";
        let nonce = "abc123";
        let nc = "00000001";
        let cnonce = "xyz";
        let qop = "auth";

        let ha1 = format!("{:x}", md5::compute(format!("{}:{}:{}", user, realm, pass)));
        let ha2 = format!("{:x}", md5::compute(format!("{}:{}", method, uri)));
        let response = format!(
            "{:x}",
            md5::compute(format!("{}:{}:{}:{}:{}:{}", ha1, nonce, nc, cnonce, qop, ha2))
        );

        let mut params = HashMap::new();
        params.insert("username".to_string(), user.to_string());
        params.insert("uri".to_string(), uri.to_string());
        params.insert("nonce".to_string(), nonce.to_string());
        params.insert("nc".to_string(), nc.to_string());
        params.insert("cnonce".to_string(), cnonce.to_string());
        params.insert("qop".to_string(), qop.to_string());
        params.insert("response".to_string(), response);

        assert!(verify_digest(&params, method, user, pass, realm));
    }
}
