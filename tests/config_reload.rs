//! Backend membership follows configuration updates.

use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use replay_proxy::load_balancer::BackendTarget;
use replay_proxy::{HttpServer, Shutdown};

mod common;

#[tokio::test]
async fn reloaded_backends_take_traffic() {
    let healthy = common::start_mock_backend(200, "OK").await;
    let initial = common::config(3, &[]);

    let server = HttpServer::new(&initial).unwrap();
    let pool = server.pool();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let (updates_tx, updates_rx) = mpsc::unbounded_channel();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, updates_rx, server_shutdown).await;
    });

    let client = common::client();
    let url = format!("http://{addr}/ok");
    let res = client.get(&url).send().await.unwrap();
    assert_eq!(res.status(), 503);

    updates_tx
        .send(common::config(3, &[healthy.url()]))
        .unwrap();
    for _ in 0..50 {
        if !pool.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(pool.servers().len(), 1);

    let res = client.get(&url).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "OK");

    updates_tx.send(common::config(3, &[])).unwrap();
    for _ in 0..50 {
        if pool.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(pool.is_empty());

    shutdown.trigger();
}
