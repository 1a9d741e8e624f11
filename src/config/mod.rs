pub mod display;
pub mod lexer;
pub mod parser;
pub mod types;
pub mod validate;

pub use parser::{ConfigError, ConfigParser, FromYaml, ParseResult};
pub use types::{AppConfig, AuthConfig, FastcgiConfig, PathsConfig, ProtectedPrefix, RewriteRule, RouteConfig, ServerConfig, TlsConfig};

impl AppConfig {
    pub fn display_config(&self) {
        display::display_config(&self.server);
    }

    /// Returns a list of human-readable problems; an empty list means the
    /// configuration is safe to run with.
    pub fn validate(&self) -> Vec<String> {
        validate::validate_config(&self.server)
    }
}
