use config_derive::FromYaml;
use std::collections::HashMap;

use crate::config::parser::FromYaml;

// --- Defaults ---
pub const DEFAULT_ADDRESS: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_MAX_CLIENTS: usize = 1024;
pub const DEFAULT_QUEUE_BACKLOG: usize = 128;
pub const DEFAULT_KEEP_ALIVE_TIMEOUT: usize = 15;
pub const DEFAULT_KEEP_ALIVE_MAX_REQUESTS: usize = 100;
pub const DEFAULT_MAX_BODY_SIZE: usize = 1_048_576;
pub const DEFAULT_ROUTE_PATH: &str = "/";
pub const DEFAULT_ROOT: &str = "./www";
pub const DEFAULT_FILE: &str = "index.html";
pub const DEFAULT_FASTCGI_MIN: usize = 1;
pub const DEFAULT_FASTCGI_MAX: usize = 4;
pub const DEFAULT_FASTCGI_MAX_REQUESTS: usize = 10_000;
pub const DEFAULT_CULL_MINUTES: usize = 5;
pub const DEFAULT_MAX_CLIENTS_PER_WORKER: usize = 64;
pub const DEFAULT_CHUNK_AFTER_FLUSHES: usize = 1;

#[derive(Debug, Clone, FromYaml)]
pub struct RouteConfig {
    pub path: String,
    pub methods: Vec<String>,
    pub root: String,
    pub default_file: String,
    pub autoindex: bool,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_ROUTE_PATH.to_string(),
            methods: vec!["GET".to_string(), "HEAD".to_string(), "POST".to_string()],
            root: DEFAULT_ROOT.to_string(),
            default_file: DEFAULT_FILE.to_string(),
            autoindex: false,
        }
    }
}

#[derive(Debug, Clone, FromYaml)]
pub struct TlsConfig {
    pub enabled: bool,
    pub cert_path: Option<String>,
    pub passphrase: Option<String>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self { enabled: false, cert_path: None, passphrase: None }
    }
}

#[derive(Debug, Clone, FromYaml)]
pub struct FastcgiConfig {
    pub command: String,
    pub min_processes: usize,
    pub max_processes: usize,
    pub max_requests: usize,
    pub cull_time_limit: usize,
    pub max_clients_per_worker: usize,
    pub extensions: Vec<String>,
    pub binds: Vec<String>,
    pub allow_from: Vec<String>,
    pub chunk_after_flushes: usize,
}

impl Default for FastcgiConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            min_processes: DEFAULT_FASTCGI_MIN,
            max_processes: DEFAULT_FASTCGI_MAX,
            max_requests: DEFAULT_FASTCGI_MAX_REQUESTS,
            cull_time_limit: DEFAULT_CULL_MINUTES,
            max_clients_per_worker: DEFAULT_MAX_CLIENTS_PER_WORKER,
            extensions: vec!["php".to_string()],
            binds: Vec::new(),
            allow_from: Vec::new(),
            chunk_after_flushes: DEFAULT_CHUNK_AFTER_FLUSHES,
        }
    }
}

#[derive(Debug, Clone, FromYaml)]
pub struct ProtectedPrefix {
    pub realm: String,
    pub user: String,
    pub pass: String,
}

impl Default for ProtectedPrefix {
    fn default() -> Self {
        Self { realm: "restricted".to_string(), user: String::new(), pass: String::new() }
    }
}

#[derive(Debug, Clone, FromYaml)]
pub struct AuthConfig {
    pub admin_user: String,
    pub admin_pass: String,
    pub admin_realm: String,
    pub protected: HashMap<String, ProtectedPrefix>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            admin_user: "admin".to_string(),
            admin_pass: String::new(),
            admin_realm: "server admin".to_string(),
            protected: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, FromYaml)]
pub struct RewriteRule {
    pub pattern: String,
    pub exclude: Option<String>,
    pub replacement: String,
    pub is_file: bool,
    pub is_dir: bool,
    pub strict: bool,
    pub last: bool,
    pub redirect_status: Option<u16>,
}

impl Default for RewriteRule {
    fn default() -> Self {
        Self {
            pattern: String::new(),
            exclude: None,
            replacement: String::new(),
            is_file: false,
            is_dir: false,
            strict: false,
            last: false,
            redirect_status: None,
        }
    }
}

#[derive(Debug, Clone, FromYaml)]
pub struct PathsConfig {
    pub public_docroot: String,
    pub private_docroot: String,
    pub log_dir: String,
    pub temp_dir: String,
    pub sendfile_allow: Vec<String>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            public_docroot: DEFAULT_ROOT.to_string(),
            private_docroot: "./private".to_string(),
            log_dir: "./logs".to_string(),
            temp_dir: "/tmp".to_string(),
            sendfile_allow: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, FromYaml)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_clients: usize,
    pub queue_backlog: usize,
    pub keep_alive_timeout: usize,
    pub keep_alive_max_requests: usize,
    pub index_files: Vec<String>,
    pub client_max_body_size: usize,
    pub error_pages: HashMap<u16, String>,
    pub tls: TlsConfig,
    pub fastcgi: FastcgiConfig,
    pub handlers: Vec<String>,
    pub auth: AuthConfig,
    pub rewrites: Vec<RewriteRule>,
    pub paths: PathsConfig,
    pub routes: Vec<RouteConfig>,
    pub debug: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            max_clients: DEFAULT_MAX_CLIENTS,
            queue_backlog: DEFAULT_QUEUE_BACKLOG,
            keep_alive_timeout: DEFAULT_KEEP_ALIVE_TIMEOUT,
            keep_alive_max_requests: DEFAULT_KEEP_ALIVE_MAX_REQUESTS,
            index_files: vec![DEFAULT_FILE.to_string()],
            client_max_body_size: DEFAULT_MAX_BODY_SIZE,
            error_pages: HashMap::new(),
            tls: TlsConfig::default(),
            fastcgi: FastcgiConfig::default(),
            handlers: vec![
                "auth".to_string(),
                "admin".to_string(),
                "private".to_string(),
                "rewrite".to_string(),
                "dynamic".to_string(),
                "static".to_string(),
                "directory".to_string(),
            ],
            auth: AuthConfig::default(),
            rewrites: Vec::new(),
            paths: PathsConfig::default(),
            routes: Vec::new(),
            debug: false,
        }
    }
}

#[derive(Debug, Clone, FromYaml)]
pub struct AppConfig {
    pub server: ServerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self { server: ServerConfig::default() }
    }
}
