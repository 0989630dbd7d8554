//! End-to-end TMS fast-path scenarios (spec §8, scenarios 1-2): a cache hit
//! streams the file verbatim, a cache miss 404s without ever touching the
//! network.

use std::io::Write;
use std::net::TcpListener;
use std::process::{Child, Command};
use std::time::Duration;

struct ServerProcess {
    child: Child,
}

impl Drop for ServerProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
}

fn write_config(dir: &std::path::Path, cache_root: &std::path::Path, port: u16) -> std::path::PathBuf {
    let config_path = dir.join("twms.json");
    let config = serde_json::json!({
        "cache_root": cache_root,
        "bind_addr": format!("127.0.0.1:{port}"),
        "layers": [{
            "id": "osm",
            "mimetype": "image/png",
            "projection": "EPSG:3857",
            "fetch_kind": "tms",
            "remote_template": "https://tile.openstreetmap.org/{z}/{x}/{y}.png"
        }]
    });
    let mut file = std::fs::File::create(&config_path).unwrap();
    file.write_all(serde_json::to_string_pretty(&config).unwrap().as_bytes()).unwrap();
    config_path
}

async fn wait_until_ready(base_url: &str) {
    let client = reqwest::Client::new();
    for _ in 0..50 {
        if client.get(base_url).send().await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("server at {base_url} never became ready");
}

#[tokio::test]
async fn tms_miss_returns_404_without_fetching() {
    let tmp = tempfile::tempdir().unwrap();
    let cache_root = tmp.path().join("cache");
    std::fs::create_dir_all(&cache_root).unwrap();
    let port = free_port();
    let config_path = write_config(tmp.path(), &cache_root, port);

    let child = Command::new(env!("CARGO_BIN_EXE_twms-server"))
        .args(["--config", config_path.to_str().unwrap()])
        .spawn()
        .unwrap();
    let _server = ServerProcess { child };

    let base_url = format!("http://127.0.0.1:{port}/");
    wait_until_ready(&base_url).await;

    let resp = reqwest::get(format!("http://127.0.0.1:{port}/tiles/osm/10/512/340.png")).await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn tms_hit_streams_cached_bytes_verbatim() {
    let tmp = tempfile::tempdir().unwrap();
    let cache_root = tmp.path().join("cache");
    let tile_dir = cache_root.join("osm/10/512");
    std::fs::create_dir_all(&tile_dir).unwrap();
    let tile_bytes = b"not-really-a-png-but-byte-identical-check";
    std::fs::write(tile_dir.join("340.png"), tile_bytes).unwrap();

    let port = free_port();
    let config_path = write_config(tmp.path(), &cache_root, port);

    let child = Command::new(env!("CARGO_BIN_EXE_twms-server"))
        .args(["--config", config_path.to_str().unwrap()])
        .spawn()
        .unwrap();
    let _server = ServerProcess { child };

    let base_url = format!("http://127.0.0.1:{port}/");
    wait_until_ready(&base_url).await;

    let resp = reqwest::get(format!("http://127.0.0.1:{port}/tiles/osm/10/512/340.png")).await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let body = resp.bytes().await.unwrap();
    assert_eq!(&body[..], tile_bytes);
}
