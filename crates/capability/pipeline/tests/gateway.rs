use std::sync::Arc;
use std::time::Duration;

use domain::{DataPoint, PointValueData};
use gateway_auth::{SecurityManager, SecuritySettings};
use gateway_mapping::{MappingStore, TransformationEngine};
use gateway_pipeline::{Gateway, GatewayError, TransferStatus, run_transfer_loop};
use gateway_protocol::{BackendMode, HandlerRegistry};
use serde_json::json;
use tokio::sync::watch;

struct Fixture {
    gateway: Arc<Gateway>,
    admin: String,
    operator: String,
    viewer: String,
}

fn fixture() -> Fixture {
    let security = SecurityManager::new(SecuritySettings {
        token_secret: b"pipeline-secret".to_vec(),
        encryption_key: None,
        token_ttl_seconds: 3600,
        password_iterations: 1000,
    })
    .expect("security");
    security.create_user("admin", "pw", "admin").expect("admin");
    security.create_user("op", "pw", "operator").expect("operator");
    security.create_user("eye", "pw", "viewer").expect("viewer");
    let admin = security.authenticate("admin", "pw").expect("admin token");
    let operator = security.authenticate("op", "pw").expect("operator token");
    let viewer = security.authenticate("eye", "pw").expect("viewer token");

    let gateway = Gateway::new(
        Arc::new(HandlerRegistry::initialize(BackendMode::Synthetic)),
        Arc::new(MappingStore::new()),
        Arc::new(TransformationEngine::new()),
        Arc::new(security),
    );
    Fixture {
        gateway: Arc::new(gateway),
        admin,
        operator,
        viewer,
    }
}

fn dnp3(id: u32) -> DataPoint {
    DataPoint::new("DNP3", json!(id), None)
}

fn mqtt(topic: &str) -> DataPoint {
    DataPoint::new("MQTT", json!({ "topic": topic }), None)
}

async fn connect_dnp3_and_mqtt(fx: &Fixture) {
    fx.gateway
        .connect(&fx.admin, "DNP3", json!({}))
        .await
        .expect("dnp3");
    fx.gateway
        .connect(&fx.admin, "mqtt", json!({ "broker": "localhost" }))
        .await
        .expect("mqtt");
}

#[tokio::test]
async fn permissions_gate_every_operation() {
    let fx = fixture();
    let gateway = &fx.gateway;

    assert!(matches!(
        gateway.connect(&fx.viewer, "DNP3", json!({})).await,
        Err(GatewayError::AccessDenied)
    ));
    assert!(matches!(
        gateway.connect(&fx.operator, "DNP3", json!({})).await,
        Err(GatewayError::AccessDenied)
    ));
    assert!(matches!(
        gateway.add_mapping(&fx.operator, dnp3(1), mqtt("a")),
        Err(GatewayError::AccessDenied)
    ));
    assert!(matches!(
        gateway.create_user(&fx.operator, "x", "pw", "viewer"),
        Err(GatewayError::AccessDenied)
    ));
    assert!(matches!(
        gateway.status("garbage", "DNP3").await,
        Err(GatewayError::AccessDenied)
    ));

    gateway.connect(&fx.admin, "DNP3", json!({})).await.expect("connect");
    let status = gateway.status(&fx.viewer, "DNP3").await.expect("viewer reads status");
    assert!(status.connected);
    gateway
        .read_points(&fx.viewer, "DNP3", &[json!(150)])
        .await
        .expect("viewer reads");
    assert!(matches!(
        gateway
            .write_points(&fx.viewer, "DNP3", &[json!(150)], &[PointValueData::F64(1.0)])
            .await,
        Err(GatewayError::AccessDenied)
    ));
    let results = gateway
        .write_points(&fx.operator, "DNP3", &[json!(150)], &[PointValueData::F64(1.0)])
        .await
        .expect("operator writes");
    assert_eq!(results, vec![true]);

    gateway
        .create_user(&fx.admin, "new", "pw", "viewer")
        .expect("admin creates user");
    assert!(gateway.security().has_user("new"));
}

#[tokio::test]
async fn unknown_protocol_is_reported() {
    let fx = fixture();
    let err = fx
        .gateway
        .connect(&fx.admin, "Profibus", json!({}))
        .await
        .expect_err("unknown");
    assert!(matches!(err, GatewayError::UnknownProtocol(name) if name == "Profibus"));
}

#[tokio::test]
async fn transfer_applies_transformation() {
    let fx = fixture();
    connect_dnp3_and_mqtt(&fx).await;
    let gateway = &fx.gateway;

    gateway
        .write_points(&fx.admin, "DNP3", &[json!(150)], &[PointValueData::F64(10.0)])
        .await
        .expect("seed source");
    let index = gateway
        .add_mapping(&fx.admin, dnp3(150), mqtt("plant/flow"))
        .expect("add");
    gateway
        .set_transformation(&fx.admin, index, Some("scale:2".to_string()))
        .expect("set");

    let report = gateway.transfer_once(&fx.admin).await.expect("transfer");
    assert_eq!(report.transferred(), 1);
    assert_eq!(
        report.outcome(index).map(|outcome| &outcome.status),
        Some(&TransferStatus::Transferred {
            value: PointValueData::F64(20.0)
        })
    );
    assert!(!report.transfer_id.is_empty());

    let readings = gateway
        .read_points(&fx.viewer, "MQTT", &[json!({ "topic": "plant/flow" })])
        .await
        .expect("read destination");
    assert_eq!(readings[0].value, Some(PointValueData::F64(20.0)));
}

#[tokio::test]
async fn one_failing_mapping_does_not_stop_the_others() {
    let fx = fixture();
    connect_dnp3_and_mqtt(&fx).await;
    let gateway = &fx.gateway;
    let admin = &fx.admin;

    let unknown_transform = gateway.add_mapping(admin, dnp3(150), mqtt("a")).expect("add");
    gateway
        .set_transformation(admin, unknown_transform, Some("value * 2".to_string()))
        .expect("set");
    let not_connected = gateway
        .add_mapping(
            admin,
            DataPoint::new("Modbus", json!({ "address": 1 }), None),
            mqtt("b"),
        )
        .expect("add");
    let bad_point = gateway
        .add_mapping(admin, DataPoint::new("DNP3", json!({ "id": "x" }), None), mqtt("c"))
        .expect("add");
    let disabled = gateway.add_mapping(admin, dnp3(5), mqtt("d")).expect("add");
    gateway.disable_mapping(admin, disabled).expect("disable");
    let healthy = gateway.add_mapping(admin, dnp3(250), mqtt("e")).expect("add");

    let report = gateway.transfer_once(admin).await.expect("transfer");
    assert_eq!(report.outcomes.len(), 4);
    assert_eq!(report.transferred(), 1);
    assert_eq!(report.skipped(), 1);
    assert_eq!(report.failed(), 2);

    let status = |index| &report.outcome(index).expect("outcome").status;
    assert!(matches!(status(unknown_transform), TransferStatus::Failed { error } if error.contains("unknown transformation")));
    assert!(matches!(status(not_connected), TransferStatus::Failed { .. }));
    assert!(matches!(status(bad_point), TransferStatus::Skipped { .. }));
    assert!(matches!(status(healthy), TransferStatus::Transferred { .. }));
    assert!(report.outcome(disabled).is_none());
}

#[tokio::test]
async fn transfer_requires_read_and_write() {
    let fx = fixture();
    assert!(matches!(
        fx.gateway.transfer_once(&fx.viewer).await,
        Err(GatewayError::AccessDenied)
    ));
    let report = fx.gateway.transfer_once(&fx.operator).await.expect("operator");
    assert!(report.outcomes.is_empty());
}

#[tokio::test]
async fn mapping_file_round_trip_through_gateway() {
    let fx = fixture();
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("mappings.json");

    fx.gateway.add_mapping(&fx.admin, dnp3(1), mqtt("a")).expect("add");
    fx.gateway.save_mappings(&fx.admin, &path).expect("save");
    assert!(matches!(
        fx.gateway.load_mappings(&fx.viewer, &path),
        Err(GatewayError::AccessDenied)
    ));

    fx.gateway.remove_mapping(&fx.admin, 0).expect("remove");
    assert_eq!(fx.gateway.load_mappings(&fx.admin, &path).expect("load"), 1);
    let mappings = fx.gateway.list_mappings(&fx.viewer).expect("list");
    assert_eq!(mappings[0].destination.name(), "MQTT_a");
}

#[tokio::test]
async fn transfer_loop_stops_on_shutdown() {
    let fx = fixture();
    connect_dnp3_and_mqtt(&fx).await;
    fx.gateway
        .add_mapping(&fx.admin, dnp3(150), mqtt("loop"))
        .expect("add");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(run_transfer_loop(
        fx.gateway.clone(),
        fx.admin.clone(),
        Duration::from_millis(10),
        shutdown_rx,
    ));
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown_tx.send(true).expect("signal");

    let result = tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("loop exits")
        .expect("join");
    assert!(result.is_ok());

    let readings = fx
        .gateway
        .read_points(&fx.viewer, "MQTT", &[json!({ "topic": "loop" })])
        .await
        .expect("read");
    assert!(readings[0].is_good());
}

#[tokio::test]
async fn transfer_loop_stops_when_access_is_denied() {
    let fx = fixture();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let result = run_transfer_loop(
        fx.gateway.clone(),
        fx.viewer.clone(),
        Duration::from_millis(10),
        shutdown_rx,
    )
    .await;
    assert!(matches!(result, Err(GatewayError::AccessDenied)));
}

#[tokio::test]
async fn shutdown_disconnects_every_handler() {
    let fx = fixture();
    connect_dnp3_and_mqtt(&fx).await;
    fx.gateway.shutdown().await;
    for name in fx.gateway.handlers().names() {
        let status = fx.gateway.status(&fx.viewer, name).await.expect("status");
        assert!(!status.connected, "{}", name);
    }
}
