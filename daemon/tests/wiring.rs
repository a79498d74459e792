//! End-to-end smoke test: wire every component with an empty resolver list,
//! confirm the query API comes up and answers a request, then shuts down
//! cleanly on cancellation.

use intel_daemon::config::DaemonConfig;
use intel_daemon::wiring;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn wires_up_and_answers_a_query_with_no_resolvers_configured() {
    let config = DaemonConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        ..Default::default()
    };

    let cancel = CancellationToken::new();
    let (handles, tasks) = wiring::run(config, cancel.clone()).await.unwrap();

    assert!(handles.history_feed.is_none());
    assert_eq!(handles.netenv.my_networks().len(), 0);

    let url = format!("http://{}/query?q=%7B%7D", handles.query_api_addr);
    let response = reqwest::get(&url).await.unwrap();
    assert!(response.status().is_success());

    cancel.cancel();
    for task in tasks {
        tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    }
}
