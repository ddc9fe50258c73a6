use domain::{ConnectionState, PointValueData};
use gateway_protocol::{
    BackendKind, BackendMode, HandlerRegistry, ProtocolError, ProtocolKind, Quality, STARTDT_ACT,
    STARTDT_CON, STOPDT_ACT, STOPDT_CON,
};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

fn real() -> HandlerRegistry {
    HandlerRegistry::initialize(BackendMode::Transport)
}

/// 申请一个随即释放的本地端口（连接它会被拒绝）
async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    listener.local_addr().expect("addr").port()
}

/// 最小 Modbus TCP 从站：功能码 3 返回固定寄存器，功能码 6 回显
async fn serve_modbus(listener: TcpListener, registers: Vec<u16>) {
    let (mut stream, _) = listener.accept().await.expect("accept");
    loop {
        let mut header = [0u8; 7];
        if stream.read_exact(&mut header).await.is_err() {
            return;
        }
        let length = u16::from_be_bytes([header[4], header[5]]) as usize;
        let mut pdu = vec![0u8; length - 1];
        stream.read_exact(&mut pdu).await.expect("pdu");

        let response_pdu = match pdu[0] {
            0x03 => {
                let count = u16::from_be_bytes([pdu[3], pdu[4]]) as usize;
                let mut body = vec![0x03, (count * 2) as u8];
                for register in registers.iter().take(count) {
                    body.extend_from_slice(&register.to_be_bytes());
                }
                body
            }
            0x06 => pdu.clone(),
            other => vec![other | 0x80, 0x01],
        };

        let mut frame = Vec::with_capacity(7 + response_pdu.len());
        frame.extend_from_slice(&header[..4]);
        frame.extend_from_slice(&((response_pdu.len() + 1) as u16).to_be_bytes());
        frame.push(header[6]);
        frame.extend_from_slice(&response_pdu);
        stream.write_all(&frame).await.expect("respond");
    }
}

#[tokio::test]
async fn modbus_refused_connection_moves_to_error() {
    let registry = real();
    let modbus = registry.handler(ProtocolKind::Modbus);
    let port = closed_port().await;

    let err = modbus
        .connect(json!({"host": "127.0.0.1", "port": port, "timeout": 1}))
        .await
        .expect_err("refused");
    assert!(matches!(err, ProtocolError::Connection(_)));
    assert_eq!(modbus.state(), ConnectionState::Error);

    let status = modbus.status().await;
    assert_eq!(status.backend, BackendKind::Transport);
    assert!(status.last_error.is_some());
    assert!(matches!(
        modbus.read_points(&[json!({"address": 0})]).await,
        Err(ProtocolError::NotConnected)
    ));
}

#[tokio::test]
async fn modbus_reads_and_writes_holding_registers() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let bits = 12.5f32.to_bits();
    let server = tokio::spawn(serve_modbus(
        listener,
        vec![(bits >> 16) as u16, bits as u16],
    ));

    let registry = real();
    let modbus = registry.handler(ProtocolKind::Modbus);
    modbus
        .connect(json!({"host": "127.0.0.1", "port": port}))
        .await
        .expect("connect");

    let readings = modbus
        .read_points(&[
            json!({"type": "holding", "address": 0, "count": 2, "data_type": "float32"}),
            json!({"type": "holding", "address": 0}),
            json!({"type": "coil", "address": 0}),
            json!({"address": 0, "data_type": "float32"}),
        ])
        .await
        .expect("read");
    assert_eq!(readings[0].value, Some(PointValueData::F64(12.5)));
    assert_eq!(readings[1].value, Some(PointValueData::I64(i64::from(bits >> 16))));
    // 从站对功能码 1 返回异常码，只影响该点位
    assert_eq!(readings[2].quality, Quality::Bad);
    // 未给 count 时按 data_type 读取足够的寄存器
    assert_eq!(readings[3].value, Some(PointValueData::F64(12.5)));

    let results = modbus
        .write_points(
            &[json!({"type": "holding", "address": 4}), json!({"type": "input", "address": 4})],
            &[PointValueData::I64(321), PointValueData::I64(1)],
        )
        .await
        .expect("write");
    assert_eq!(results, vec![true, false]);
    assert_eq!(modbus.state(), ConnectionState::Connected);

    modbus.disconnect().await.expect("disconnect");
    server.await.expect("server");
}

#[tokio::test]
async fn modbus_dropped_peer_is_a_link_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        drop(stream);
    });

    let registry = real();
    let modbus = registry.handler(ProtocolKind::Modbus);
    modbus
        .connect(json!({"host": "127.0.0.1", "port": port, "timeout": 1}))
        .await
        .expect("connect");
    server.await.expect("server");

    let err = modbus
        .read_points(&[json!({"type": "holding", "address": 0})])
        .await
        .expect_err("link lost");
    assert!(matches!(err, ProtocolError::Connection(_)));
    assert_eq!(modbus.state(), ConnectionState::Error);

    modbus.disconnect().await.expect("disconnect");
    assert_eq!(modbus.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn iec104_start_and_stop_data_transfer() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");
        let mut frame = [0u8; 6];
        stream.read_exact(&mut frame).await.expect("startdt");
        assert_eq!(frame, STARTDT_ACT);
        stream.write_all(&STARTDT_CON).await.expect("confirm");

        stream.read_exact(&mut frame).await.expect("stopdt");
        assert_eq!(frame, STOPDT_ACT);
        stream.write_all(&STOPDT_CON).await.expect("confirm");
    });

    let registry = real();
    let iec104 = registry.handler(ProtocolKind::Iec104);
    iec104
        .connect(json!({"ip": "127.0.0.1", "port": port}))
        .await
        .expect("connect");
    assert_eq!(iec104.state(), ConnectionState::Connected);

    // ASDU 服务未接入：带内失败，链路保持
    let readings = iec104.read_points(&[json!(1001), json!({"ioa": 99999999})]).await.expect("read");
    assert!(readings.iter().all(|reading| reading.quality == Quality::Bad));
    assert_eq!(iec104.state(), ConnectionState::Connected);

    iec104.disconnect().await.expect("disconnect");
    server.await.expect("server");
}

#[tokio::test]
async fn iec104_peer_without_confirmation_fails_connect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");
        let mut frame = [0u8; 6];
        stream.read_exact(&mut frame).await.expect("startdt");
    });

    let registry = real();
    let iec104 = registry.handler(ProtocolKind::Iec104);
    let err = iec104
        .connect(json!({"ip": "127.0.0.1", "port": port}))
        .await
        .expect_err("no STARTDT con");
    assert!(matches!(err, ProtocolError::Connection(_)));
    assert_eq!(iec104.state(), ConnectionState::Error);
    server.await.expect("server");
}

#[tokio::test]
async fn iec104_connect_dropped_by_caller_deadline_lands_in_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");
        let mut frame = [0u8; 6];
        stream.read_exact(&mut frame).await.expect("startdt");
        // 不确认 STARTDT，保持链路直到测试结束
        let _ = release_rx.await;
    });

    let registry = real();
    let iec104 = registry.handler(ProtocolKind::Iec104);
    let deadline = tokio::time::timeout(
        Duration::from_millis(200),
        iec104.connect(json!({"ip": "127.0.0.1", "port": port})),
    )
    .await;
    assert!(deadline.is_err());
    assert_eq!(iec104.state(), ConnectionState::Error);

    let status = iec104.status().await;
    assert!(!status.connected);
    assert_eq!(status.last_error.as_deref(), Some("connect cancelled"));
    assert!(matches!(
        iec104.read_points(&[json!(1001)]).await,
        Err(ProtocolError::NotConnected)
    ));

    iec104.disconnect().await.expect("disconnect");
    assert_eq!(iec104.state(), ConnectionState::Disconnected);

    let _ = release_tx.send(());
    server.await.expect("server");
}

#[tokio::test]
async fn mqtt_broker_drop_is_a_link_failure_without_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");
        let mut connect = [0u8; 256];
        let read = stream.read(&mut connect).await.expect("CONNECT");
        assert_eq!(connect[0] >> 4, 1);
        assert!(read > 2);
        // CONNACK：会话不存在，返回码 0
        stream.write_all(&[0x20, 0x02, 0x00, 0x00]).await.expect("CONNACK");
        drop(stream);

        // 链路断开后客户端不得重连
        tokio::time::timeout(Duration::from_millis(500), listener.accept())
            .await
            .is_err()
    });

    let registry = real();
    let mqtt = registry.handler(ProtocolKind::Mqtt);
    mqtt.connect(json!({"broker": "127.0.0.1", "port": port, "client_id": "gateway-test"}))
        .await
        .expect("connect");
    assert_eq!(mqtt.state(), ConnectionState::Connected);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let err = mqtt
        .read_points(&[json!({"topic": "plant/t1"})])
        .await
        .expect_err("broker gone");
    assert!(matches!(err, ProtocolError::Connection(_)));
    assert_eq!(mqtt.state(), ConnectionState::Error);
    assert_eq!(mqtt.status().await.details.get("online"), Some(&Value::Bool(false)));

    assert!(server.await.expect("server"), "client reconnected");
    mqtt.disconnect().await.expect("disconnect");
}

#[tokio::test]
async fn opc_ua_server_serves_node_table() {
    let registry = real();
    let opc_ua = registry.handler(ProtocolKind::OpcUa);
    opc_ua
        .connect(json!({
            "mode": "server",
            "endpoint": "opc.tcp://127.0.0.1:0/gateway/",
            "nodes": [
                {"node_id": "ns=2;s=Tank.Level", "browse_name": "Level", "data_type": "Double", "access": "rw"},
                {"node_id": "ns=2;s=Tank.Alarm", "browse_name": "Alarm", "data_type": "Boolean", "access": "r"}
            ]
        }))
        .await
        .expect("start server");

    let status = opc_ua.status().await;
    let listen_addr = status
        .details
        .get("listen_addr")
        .and_then(Value::as_str)
        .expect("listen addr")
        .to_string();
    tokio::net::TcpStream::connect(&listen_addr).await.expect("peer connect");

    let readings = opc_ua
        .read_points(&[json!("ns=2;s=Tank.Level"), json!("ns=2;s=Tank.Alarm"), json!("ns=2;s=Missing")])
        .await
        .expect("read");
    assert_eq!(readings[0].value, Some(PointValueData::F64(0.0)));
    assert_eq!(readings[1].value, Some(PointValueData::Bool(false)));
    assert_eq!(readings[2].quality, Quality::Bad);

    let results = opc_ua
        .write_points(
            &[json!({"node_id": "ns=2;s=Tank.Level"}), json!("ns=2;s=Tank.Alarm")],
            &[PointValueData::F64(42.5), PointValueData::Bool(true)],
        )
        .await
        .expect("write");
    assert_eq!(results, vec![true, false]);

    let readings = opc_ua.read_points(&[json!("ns=2;s=Tank.Level")]).await.expect("read back");
    assert_eq!(readings[0].value, Some(PointValueData::F64(42.5)));

    opc_ua.disconnect().await.expect("stop server");
}

#[tokio::test]
async fn opc_ua_client_to_closed_endpoint_fails() {
    let registry = real();
    let opc_ua = registry.handler(ProtocolKind::OpcUa);
    let port = closed_port().await;

    let err = opc_ua
        .connect(json!({"endpoint": format!("opc.tcp://127.0.0.1:{}/", port)}))
        .await
        .expect_err("refused");
    assert!(matches!(err, ProtocolError::Connection(_)));
    assert_eq!(opc_ua.state(), ConnectionState::Error);
}

#[tokio::test]
async fn iec61850_tls_config_is_rejected() {
    let registry = real();
    let iec61850 = registry.handler(ProtocolKind::Iec61850);
    let err = iec61850
        .connect(json!({"host": "127.0.0.1", "tls": {"enabled": true}}))
        .await
        .expect_err("tls");
    assert!(matches!(err, ProtocolError::Connection(_)));
    assert_eq!(iec61850.state(), ConnectionState::Error);
}

#[tokio::test]
async fn iec61850_connect_timeout_ignores_polling_interval() {
    let registry = real();
    let iec61850 = registry.handler(ProtocolKind::Iec61850);
    // 不可路由地址：要么立即失败，要么在 connect_timeout_ms 后超时
    let attempt = tokio::time::timeout(
        Duration::from_secs(5),
        iec61850.connect(json!({
            "host": "10.255.255.1",
            "polling_interval_ms": 3_600_000,
            "connect_timeout_ms": 300
        })),
    )
    .await
    .expect("bounded by connect_timeout_ms");
    assert!(matches!(attempt, Err(ProtocolError::Connection(_))));
    assert_eq!(iec61850.state(), ConnectionState::Error);

    let err = iec61850
        .connect(json!({"host": "127.0.0.1", "connect_timeout_ms": 0}))
        .await
        .expect_err("zero timeout");
    assert!(matches!(err, ProtocolError::Connection(message) if message.contains("connect_timeout_ms")));
}

#[tokio::test]
async fn dnp3_and_opc_da_stay_synthetic() {
    let registry = real();
    for kind in [ProtocolKind::Dnp3, ProtocolKind::OpcDa] {
        let status = registry.handler(kind).status().await;
        assert_eq!(status.backend, BackendKind::Simulation);
    }
    assert_eq!(
        registry.handler(ProtocolKind::Mqtt).status().await.backend,
        BackendKind::Transport
    );
}
