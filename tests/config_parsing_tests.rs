use server_proxy::config::{AppConfig, FromYaml, ServerConfig};

#[test]
fn test_valid_server_config() {
    let yaml_str = "
host: 0.0.0.0
port: 8443
client_max_body_size: 2048
routes:
  - path: /
    root: ./www
";
    let config = ServerConfig::from_str(yaml_str).unwrap();

    assert_eq!(config.host, "0.0.0.0");
    assert_eq!(config.port, 8443);
    assert_eq!(config.client_max_body_size, 2048);
    assert_eq!(config.routes[0].path, "/");
}

#[test]
fn test_full_app_config() {
    let yaml_str = "
server:
  host: 127.0.0.1
  port: 9090
  max_clients: 512
  index_files: [index.html, index.htm]
  handlers: [static, directory]
";
    let config = AppConfig::from_str(yaml_str).unwrap();

    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.server.port, 9090);
    assert_eq!(config.server.max_clients, 512);
    assert_eq!(config.server.index_files, vec!["index.html", "index.htm"]);
    assert_eq!(config.server.handlers, vec!["static", "directory"]);
}

#[test]
fn test_nested_fastcgi_block() {
    let yaml_str = "
host: 127.0.0.1
fastcgi:
  command: /usr/bin/php-cgi
  min_processes: 2
  max_processes: 8
  extensions: [php, phtml]
";
    let config = ServerConfig::from_str(yaml_str).unwrap();

    assert_eq!(config.fastcgi.command, "/usr/bin/php-cgi");
    assert_eq!(config.fastcgi.min_processes, 2);
    assert_eq!(config.fastcgi.max_processes, 8);
    assert_eq!(config.fastcgi.extensions, vec!["php", "phtml"]);
}

#[test]
fn test_nested_paths_block() {
    let yaml_str = "
paths:
  public_docroot: ./www
  private_docroot: ./private
";
    let config = ServerConfig::from_str(yaml_str).unwrap();

    assert_eq!(config.paths.public_docroot, "./www");
    assert_eq!(config.paths.private_docroot, "./private");
}

#[test]
fn test_default_values() {
    let yaml_str = "host: 10.0.0.1";
    let config = ServerConfig::from_str(yaml_str).unwrap();

    assert_eq!(config.host, "10.0.0.1");
    assert_eq!(config.port, 8080);
    assert!(config.routes.is_empty());
    assert!(config.error_pages.is_empty());
}

#[test]
fn test_unknown_field_is_ignored() {
    let yaml_str = "
host: 127.0.0.1
totally_made_up_field: 123
port: 8081
";
    let config = ServerConfig::from_str(yaml_str).unwrap();
    assert_eq!(config.host, "127.0.0.1");
    assert_eq!(config.port, 8081);
}

#[test]
fn test_duplicate_field_errors() {
    let yaml_str = "
host: 127.0.0.1
host: 10.0.0.1
";
    let result = ServerConfig::from_str(yaml_str);
    assert!(result.is_err());
    let err = format!("{}", result.unwrap_err());
    assert!(err.contains("Duplicate field"));
}

#[test]
fn test_invalid_port_type() {
    let yaml_str = "port: 'not-a-number'";
    let result = ServerConfig::from_str(yaml_str);
    assert!(result.is_err());
    let err = format!("{}", result.unwrap_err());
    assert!(err.contains("Expected number"));
}

#[test]
fn test_invalid_client_max_body_size_type() {
    let yaml_str = "client_max_body_size: 'nope'";
    let result = ServerConfig::from_str(yaml_str);
    assert!(result.is_err());
}

#[test]
fn test_port_out_of_range() {
    let yaml_str = "port: 99999";
    let result = ServerConfig::from_str(yaml_str);
    assert!(result.is_err());
    let err = format!("{}", result.unwrap_err());
    assert!(err.contains("out of range"));
}

#[test]
fn test_bool_field_parses_on_and_true() {
    let config_on = ServerConfig::from_str("debug: on").unwrap();
    let config_true = ServerConfig::from_str("debug: true").unwrap();
    assert!(config_on.debug);
    assert!(config_true.debug);
}
