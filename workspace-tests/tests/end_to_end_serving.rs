use clap::Parser;
use serve_cli::Args;
use serve_core::certificates::{CERT_FILE_NAME, KEY_FILE_NAME};
use serve_core::{AssetRegistry, CertificateProvisioner, ServeServer, ServerConfig};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tempfile::tempdir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

struct Running {
    addr: SocketAddr,
    stop: oneshot::Sender<()>,
    task: JoinHandle<serve_core::Result<()>>,
}

impl Running {
    async fn shutdown(self) {
        self.stop.send(()).expect("server already stopped");
        let result = tokio::time::timeout(Duration::from_secs(10), self.task)
            .await
            .expect("server did not stop within the grace period")
            .expect("server task panicked");
        assert!(result.is_ok(), "server returned an error: {:?}", result);
    }
}

fn config_from_args(argv: &[&str]) -> ServerConfig {
    let mut full = vec!["dirserve"];
    full.extend_from_slice(argv);
    Args::try_parse_from(full)
        .expect("arguments should parse")
        .into_server_config()
        .expect("configuration should be valid")
}

async fn start(server: ServeServer) -> Running {
    let handle = server.handle();
    let (stop, rx) = oneshot::channel::<()>();
    let task = tokio::spawn(server.run(async move {
        let _ = rx.await;
    }));

    let addr = tokio::time::timeout(Duration::from_secs(10), handle.listening())
        .await
        .expect("server did not start")
        .expect("server failed to bind");
    Running { addr, stop, task }
}

fn populate(root: &Path) {
    std::fs::create_dir_all(root.join("sub")).unwrap();
    std::fs::write(root.join("hello.txt"), "hello from dirserve\n").unwrap();
    std::fs::write(root.join("sub").join("inner.txt"), "inner file\n").unwrap();
}

/// Sends a raw request line so the path reaches the server without URL normalisation.
async fn raw_status(addr: SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        path, addr
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    let text = String::from_utf8_lossy(&response);
    text.lines().next().unwrap_or_default().to_string()
}

#[tokio::test]
async fn test_http_file_and_directory_serving() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("root");
    populate(&root);
    std::fs::write(dir.path().join("secret.txt"), "outside the root").unwrap();

    let config = config_from_args(&["-d", root.to_str().unwrap(), "127.0.0.1:0"]);
    let running = start(ServeServer::new(config, AssetRegistry::with_theme_assets())).await;
    let base = format!("http://{}", running.addr);

    let resp = reqwest::get(format!("{}/hello.txt", base)).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "hello from dirserve\n");

    let resp = reqwest::get(format!("{}/sub/", base)).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["x-frame-options"], "DENY");
    let html = resp.text().await.unwrap();
    assert!(html.contains("href=\"/sub/inner.txt\""));

    // The stylesheet linked from the index page is served by the same listener.
    let stylesheet = html
        .split("rel=\"stylesheet\" href=\"")
        .nth(1)
        .and_then(|rest| rest.split('"').next())
        .expect("pretty theme links a stylesheet")
        .to_string();
    let resp = reqwest::get(format!("{}{}", base, stylesheet)).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["cache-control"], "public, max-age=3600");

    let resp = reqwest::get(format!("{}/missing.txt", base)).await.unwrap();
    assert_eq!(resp.status(), 404);

    assert!(raw_status(running.addr, "/../secret.txt").await.contains(" 403 "));
    assert!(raw_status(running.addr, "/sub/../../secret.txt").await.contains(" 403 "));

    running.shutdown().await;
}

#[tokio::test]
async fn test_https_with_self_signed_certificate() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("root");
    let store = dir.path().join("certs");
    populate(&root);

    let config = config_from_args(&["-d", root.to_str().unwrap(), "--https", "127.0.0.1:0"]);
    let server = ServeServer::new(config, AssetRegistry::with_theme_assets())
        .with_provisioner(CertificateProvisioner::new(&store));
    let running = start(server).await;

    assert!(store.join(CERT_FILE_NAME).is_file());
    assert!(store.join(KEY_FILE_NAME).is_file());

    let client = reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .build()
        .unwrap();
    let resp = client
        .get(format!("https://{}/hello.txt", running.addr))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "hello from dirserve\n");

    running.shutdown().await;

    // A second start reuses the stored pair instead of generating a new one.
    let before = std::fs::read(store.join(CERT_FILE_NAME)).unwrap();
    let config = config_from_args(&["-d", root.to_str().unwrap(), "--https", "127.0.0.1:0"]);
    let server = ServeServer::new(config, AssetRegistry::new())
        .with_provisioner(CertificateProvisioner::new(&store));
    let running = start(server).await;
    assert_eq!(std::fs::read(store.join(CERT_FILE_NAME)).unwrap(), before);
    running.shutdown().await;
}

#[tokio::test]
async fn test_reverse_proxy_to_another_instance() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("root");
    populate(&root);

    let upstream_config = config_from_args(&["-d", root.to_str().unwrap(), "127.0.0.1:0"]);
    let upstream = start(ServeServer::new(upstream_config, AssetRegistry::new())).await;

    let target = format!("http://{}/sub/", upstream.addr);
    let proxy_config = config_from_args(&["--proxy", target.as_str(), "--proxy-headers", "127.0.0.1:0"]);
    let proxy = start(ServeServer::new(proxy_config, AssetRegistry::new())).await;

    let resp = reqwest::get(format!("http://{}/inner.txt", proxy.addr)).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "inner file\n");

    let resp = reqwest::get(format!("http://{}/nope.txt", proxy.addr)).await.unwrap();
    assert_eq!(resp.status(), 404);

    proxy.shutdown().await;

    // With the upstream gone the proxy answers 502.
    upstream.shutdown().await;
    let proxy_config = config_from_args(&["--proxy", target.as_str(), "127.0.0.1:0"]);
    let proxy = start(ServeServer::new(proxy_config, AssetRegistry::new())).await;
    let resp = reqwest::get(format!("http://{}/inner.txt", proxy.addr)).await.unwrap();
    assert_eq!(resp.status(), 502);
    assert_eq!(resp.text().await.unwrap(), "Error proxying request");
    proxy.shutdown().await;
}
