use crate::config::types::ServerConfig;

/// Sanity-checks one loaded server configuration, dropping nothing (there is
/// only one listener to validate — multi-host virtual hosting is out of
/// scope) but surfacing every problem found so the operator can fix the
/// file before the process binds a socket.
pub fn validate_config(config: &ServerConfig) -> Vec<String> {
    let mut problems = Vec::new();

    for (code, path) in &config.error_pages {
        if *code < 100 || *code > 599 {
            problems.push(format!(
                "error page status code {} is out of the valid 100-599 range",
                code
            ));
        }
        if let Err(e) = std::fs::File::open(path) {
            problems.push(format!("error page '{}' for status {}: {}", path, code, e));
        }
    }

    for route in &config.routes {
        if let Err(e) = std::fs::read_dir(&route.root) {
            problems.push(format!(
                "route '{}' refers to invalid root directory '{}': {}",
                route.path, route.root, e
            ));
        }
    }

    if config.fastcgi.min_processes > config.fastcgi.max_processes {
        problems.push(format!(
            "fastcgi.min_processes ({}) exceeds fastcgi.max_processes ({})",
            config.fastcgi.min_processes, config.fastcgi.max_processes
        ));
    }

    if config.fastcgi.max_processes > 0 && config.fastcgi.binds.len() > config.fastcgi.max_processes
    {
        problems.push(format!(
            "fastcgi.binds lists {} addresses but max_processes is {}",
            config.fastcgi.binds.len(),
            config.fastcgi.max_processes
        ));
    }

    for name in &config.handlers {
        if !matches!(
            name.as_str(),
            "auth" | "admin" | "private" | "rewrite" | "dynamic" | "static" | "directory"
        ) {
            problems.push(format!("unknown handler step '{}' in handlers list", name));
        }
    }

    problems
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::RouteConfig;

    #[test]
    fn test_validate_clean_config_has_no_problems() {
        let config = ServerConfig::default();
        assert!(validate_config(&config).is_empty());
    }

    #[test]
    fn test_validate_invalid_status_code() {
        let mut config = ServerConfig::default();
        config.error_pages.insert(99, "/non/existent".to_string());
        let problems = validate_config(&config);
        assert!(problems.iter().any(|p| p.contains("100-599")));
    }

    #[test]
    fn test_validate_missing_error_page_file() {
        let mut config = ServerConfig::default();
        config.error_pages.insert(404, "/non/existent/path/err.html".to_string());
        let problems = validate_config(&config);
        assert_eq!(problems.len(), 1);
    }

    #[test]
    fn test_validate_missing_route_root() {
        let mut config = ServerConfig::default();
        let mut route = RouteConfig::default();
        route.root = "/non/existent/dir".to_string();
        config.routes.push(route);
        let problems = validate_config(&config);
        assert_eq!(problems.len(), 1);
    }

    #[test]
    fn test_validate_existing_files_pass() {
        let temp_dir = std::env::temp_dir();
        let file_path = temp_dir.join("fcgi_proxy_test_err.html");
        std::fs::write(&file_path, "error").unwrap();

        let mut config = ServerConfig::default();
        config
            .error_pages
            .insert(404, file_path.to_str().unwrap().to_string());

        let mut route = RouteConfig::default();
        route.root = temp_dir.to_str().unwrap().to_string();
        config.routes.push(route);

        assert!(validate_config(&config).is_empty());

        let _ = std::fs::remove_file(file_path);
    }

    #[test]
    fn test_validate_fastcgi_process_bounds() {
        let mut config = ServerConfig::default();
        config.fastcgi.min_processes = 8;
        config.fastcgi.max_processes = 2;
        let problems = validate_config(&config);
        assert!(problems.iter().any(|p| p.contains("min_processes")));
    }

    #[test]
    fn test_validate_unknown_handler_name() {
        let mut config = ServerConfig::default();
        config.handlers.push("bogus".to_string());
        let problems = validate_config(&config);
        assert!(problems.iter().any(|p| p.contains("bogus")));
    }
}
