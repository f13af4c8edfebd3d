/// Integration tests for the per-OLT optics fan-out against a mocked PON
/// proxy: request shape, failure isolation, nested payload extraction, and
/// snapshot publication.
use fibermap_api::optics_client::PonProxyClient;
use fibermap_api::optics_fanout::{FanoutPlan, OpticsFanout};
use fibermap_api::snapshot::{readings_digest, SnapshotStore};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fanout_for(server: &MockServer) -> OpticsFanout {
    let client = PonProxyClient::new(
        format!("{}/pon_proxy.php", server.uri()),
        "10.0.0.1".to_string(),
    )
    .expect("client");
    OpticsFanout::new(client)
}

fn plan(olts: &[&str]) -> FanoutPlan {
    FanoutPlan {
        olts: olts.iter().map(|s| s.to_string()).collect(),
        slots: vec!["LT1".to_string()],
        ports: vec![1, 2],
    }
}

#[tokio::test]
async fn cycle_posts_device_ip_and_full_slot_port_sets() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/pon_proxy.php"))
        .and(body_partial_json(json!({
            "ip": "10.0.0.1",
            "olt": "DFW2-OLT1",
            "slot": ["LT1"],
            "port": [1, 2],
            "insecure": true,
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let snapshot = fanout_for(&server).run_cycle(&plan(&["DFW2-OLT1"])).await;

    assert_eq!(snapshot.requests_ok, 1);
    assert_eq!(snapshot.requests_total, 1);
    assert_eq!(snapshot.combos, 2);
    assert!(snapshot.readings.is_empty());
    assert!(snapshot.failures.is_empty());
}

#[tokio::test]
async fn failed_olt_is_recorded_without_sinking_the_cycle() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/pon_proxy.php"))
        .and(body_partial_json(json!({ "olt": "OLT-A" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "slot": "LT1",
                "port": 1,
                "data": { "ont-optics": { "name": "CPE1", "rx-power": -20.5 } }
            }
        ])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/pon_proxy.php"))
        .and(body_partial_json(json!({ "olt": "OLT-B" })))
        .respond_with(ResponseTemplate::new(500).set_body_string("proxy exploded"))
        .mount(&server)
        .await;

    let snapshot = fanout_for(&server)
        .run_cycle(&plan(&["OLT-A", "OLT-B"]))
        .await;

    assert_eq!(snapshot.requests_total, 2);
    assert_eq!(snapshot.requests_ok, 1);
    assert_eq!(snapshot.combos, 4);
    assert_eq!(snapshot.readings.len(), 1);
    assert_eq!(snapshot.readings[0].name.as_deref(), Some("CPE1"));
    assert_eq!(snapshot.readings[0].olt, "OLT-A");
    assert_eq!(snapshot.failures.len(), 1);
    assert_eq!(snapshot.failures[0].olt, "OLT-B");
    assert_eq!(snapshot.failures[0].status, Some(500));
    assert_eq!(snapshot.failures[0].body, "proxy exploded");
}

#[tokio::test]
async fn nested_pon_and_ont_readings_flow_into_the_snapshot() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/pon_proxy.php"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "slot": "LT1",
                "port": 1,
                "data": { "parsed": {
                    "ont-optics": [
                        { "name": "CPE900_1", "rx-power": "-19.8" },
                        { "name": "CPE900_2", "rx-power": -27.4 }
                    ],
                    "pon-optics": {
                        "name": "PON1",
                        "tx-power": 3.1,
                        "ont-optics": { "name": "CPE900_3", "rx-power": -22.0 }
                    }
                } }
            }
        ])))
        .mount(&server)
        .await;

    let snapshot = fanout_for(&server).run_cycle(&plan(&["DFW2-OLT1"])).await;

    let names: Vec<_> = snapshot
        .readings
        .iter()
        .filter_map(|r| r.name.as_deref())
        .collect();
    assert_eq!(names, vec!["CPE900_1", "CPE900_2", "PON1", "CPE900_3"]);
    // Numeric strings parse like numbers.
    assert_eq!(snapshot.readings[0].metrics.rx_power, Some(-19.8));
    assert_eq!(snapshot.readings[2].metrics.tx_power, Some(3.1));
    assert!(snapshot
        .readings
        .iter()
        .all(|r| r.olt == "DFW2-OLT1" && r.slot.as_deref() == Some("LT1")));
    assert_eq!(snapshot.digest, readings_digest(&snapshot.readings));
}

#[tokio::test]
async fn non_array_payload_counts_as_success_with_zero_rows() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/pon_proxy.php"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "error": "unparsed" })))
        .mount(&server)
        .await;

    let snapshot = fanout_for(&server).run_cycle(&plan(&["DFW2-OLT1"])).await;

    assert_eq!(snapshot.requests_ok, 1);
    assert!(snapshot.readings.is_empty());
    assert!(snapshot.failures.is_empty());
}

#[tokio::test]
async fn empty_plan_yields_a_zero_request_snapshot() {
    let server = MockServer::start().await;
    let empty = FanoutPlan {
        olts: Vec::new(),
        slots: vec!["LT1".to_string()],
        ports: vec![1],
    };

    let snapshot = fanout_for(&server).run_cycle(&empty).await;

    assert_eq!(snapshot.requests_total, 0);
    assert_eq!(snapshot.requests_ok, 0);
    assert_eq!(snapshot.combos, 0);
    assert!(snapshot.readings.is_empty());
    assert_eq!(snapshot.digest, readings_digest(&[]));
}

#[tokio::test]
async fn transport_errors_surface_as_statusless_failures() {
    // Nothing listens here, so the request fails before any HTTP status.
    let client = PonProxyClient::new(
        "http://127.0.0.1:1/pon_proxy.php".to_string(),
        "10.0.0.1".to_string(),
    )
    .expect("client");

    let snapshot = OpticsFanout::new(client).run_cycle(&plan(&["OLT-A"])).await;

    assert_eq!(snapshot.requests_ok, 0);
    assert_eq!(snapshot.failures.len(), 1);
    assert_eq!(snapshot.failures[0].olt, "OLT-A");
    assert!(snapshot.failures[0].status.is_none());
}

#[tokio::test]
async fn published_cycle_is_what_pollers_read_back() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/pon_proxy.php"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "slot": "LT1",
                "port": 2,
                "data": { "ont-optics": { "name": "CPE77", "rx-power": -18.2 } }
            }
        ])))
        .mount(&server)
        .await;

    let store = SnapshotStore::new();
    let snapshot = fanout_for(&server).run_cycle(&plan(&["DFW2-OLT1"])).await;
    store.publish(snapshot.clone()).await;

    let latest = store.latest().await.expect("snapshot present");
    assert_eq!(latest.cycle_id, snapshot.cycle_id);
    assert_eq!(latest.digest, snapshot.digest);
    assert_eq!(latest.readings.len(), 1);
    assert_eq!(latest.readings[0].name.as_deref(), Some("CPE77"));
}
