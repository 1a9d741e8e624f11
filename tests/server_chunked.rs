#[cfg(test)]
mod integration_tests {
    use mio::Poll;
    use server_proxy::config::{AppConfig, RouteConfig};
    use server_proxy::server::Server;
    use std::fs;
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::thread;
    use std::time::Duration;

    fn spawn_server(mut config: AppConfig, port: u16) {
        config.server.port = port;
        config.server.host = "127.0.0.1".to_string();
        thread::spawn(move || {
            let mut poll = Poll::new().unwrap();
            let mut server = Server::new(config, &poll).unwrap();
            server.run(&mut poll).unwrap();
        });
        thread::sleep(Duration::from_millis(300));
    }

    #[test]
    fn test_static_file_served_over_real_socket() {
        let test_root = "./tmp_test_root_static";
        let _ = fs::remove_dir_all(test_root);
        fs::create_dir_all(test_root).unwrap();
        fs::write(format!("{}/index.html", test_root), "Hello").unwrap();

        let mut config = AppConfig::default();
        config.server.paths.public_docroot = test_root.to_string();
        config.server.handlers = vec!["static".to_string()];
        config.server.routes = vec![RouteConfig::default()];

        spawn_server(config, 8180);

        let mut stream = TcpStream::connect("127.0.0.1:8180").expect("connect");
        stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

        let request = "GET /index.html HTTP/1.1\r\nHost: 127.0.0.1:8180\r\nConnection: close\r\n\r\n";
        stream.write_all(request.as_bytes()).unwrap();

        let mut response = Vec::new();
        stream.read_to_end(&mut response).unwrap();
        let response = String::from_utf8_lossy(&response);

        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.ends_with("Hello"));

        let _ = fs::remove_dir_all(test_root);
    }

    #[test]
    fn test_missing_file_returns_404() {
        let test_root = "./tmp_test_root_missing";
        let _ = fs::remove_dir_all(test_root);
        fs::create_dir_all(test_root).unwrap();

        let mut config = AppConfig::default();
        config.server.paths.public_docroot = test_root.to_string();
        config.server.handlers = vec!["static".to_string()];

        spawn_server(config, 8181);

        let mut stream = TcpStream::connect("127.0.0.1:8181").expect("connect");
        stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

        let request = "GET /nope.html HTTP/1.1\r\nHost: 127.0.0.1:8181\r\nConnection: close\r\n\r\n";
        stream.write_all(request.as_bytes()).unwrap();

        let mut response = Vec::new();
        stream.read_to_end(&mut response).unwrap();
        let response = String::from_utf8_lossy(&response);

        assert!(response.starts_with("HTTP/1.1 404"));

        let _ = fs::remove_dir_all(test_root);
    }

    #[test]
    fn test_directory_redirect_over_real_socket() {
        let test_root = "./tmp_test_root_redirect";
        let _ = fs::remove_dir_all(test_root);
        fs::create_dir_all(format!("{}/sub", test_root)).unwrap();
        fs::write(format!("{}/sub/index.html", test_root), "nested").unwrap();

        let mut config = AppConfig::default();
        config.server.paths.public_docroot = test_root.to_string();
        config.server.handlers = vec!["directory".to_string(), "static".to_string()];

        spawn_server(config, 8182);

        let mut stream = TcpStream::connect("127.0.0.1:8182").expect("connect");
        stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

        let request = "GET /sub HTTP/1.1\r\nHost: 127.0.0.1:8182\r\nConnection: close\r\n\r\n";
        stream.write_all(request.as_bytes()).unwrap();

        let mut response = Vec::new();
        stream.read_to_end(&mut response).unwrap();
        let response = String::from_utf8_lossy(&response);

        assert!(response.starts_with("HTTP/1.1 301"));
        assert!(response.contains("Location: http://127.0.0.1:8182/sub/"));

        let _ = fs::remove_dir_all(test_root);
    }

    #[test]
    fn test_pipelined_requests_over_one_connection() {
        let test_root = "./tmp_pipeline_test";
        let _ = fs::remove_dir_all(test_root);
        fs::create_dir_all(test_root).unwrap();
        fs::write(format!("{}/index.html", test_root), "Hello").unwrap();

        let mut config = AppConfig::default();
        config.server.paths.public_docroot = test_root.to_string();
        config.server.handlers = vec!["static".to_string()];

        spawn_server(config, 8183);

        let mut stream = TcpStream::connect("127.0.0.1:8183").unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

        let pipeline_data = "GET /index.html HTTP/1.1\r\nHost: localhost\r\n\r\n\
                             GET /index.html HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n";
        stream.write_all(pipeline_data.as_bytes()).unwrap();

        let mut buffer = Vec::new();
        stream.read_to_end(&mut buffer).unwrap();
        let response = String::from_utf8_lossy(&buffer);

        assert_eq!(response.matches("HTTP/1.1 200 OK").count(), 2);

        let _ = fs::remove_dir_all(test_root);
    }

    #[test]
    fn test_bad_gateway_when_dynamic_worker_unreachable() {
        let mut config = AppConfig::default();
        config.server.handlers = vec!["dynamic".to_string()];
        config.server.fastcgi.extensions = vec!["php".to_string()];
        config.server.fastcgi.command = "/nonexistent/php-cgi-binary".to_string();
        config.server.fastcgi.min_processes = 0;
        config.server.fastcgi.max_processes = 1;

        spawn_server(config, 8184);

        let mut stream = TcpStream::connect("127.0.0.1:8184").expect("connect");
        stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

        let request = "GET /index.php HTTP/1.1\r\nHost: 127.0.0.1:8184\r\nConnection: close\r\n\r\n";
        stream.write_all(request.as_bytes()).unwrap();

        let mut response = Vec::new();
        stream.read_to_end(&mut response).unwrap();
        let response = String::from_utf8_lossy(&response);

        assert!(response.starts_with("HTTP/1.1 502"));
    }
}
