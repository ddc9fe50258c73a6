//! TCP 链路工具
//!
//! 供只需要链路层握手、暂无点位编解码的协议后端使用（IEC 104、IEC 61850）。

use crate::error::ProtocolError;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

/// 带超时的 TCP 连接
pub(crate) async fn connect_tcp(
    host: &str,
    port: u16,
    connect_timeout: Duration,
) -> Result<TcpStream, ProtocolError> {
    if host.trim().is_empty() {
        return Err(ProtocolError::Config("host is empty".to_string()));
    }
    let addr = format!("{}:{}", host, port);
    match timeout(connect_timeout, TcpStream::connect(&addr)).await {
        Ok(Ok(stream)) => {
            let _ = stream.set_nodelay(true);
            Ok(stream)
        }
        Ok(Err(e)) => Err(ProtocolError::Connection(format!("{}: {}", addr, e))),
        Err(_) => Err(ProtocolError::Timeout(format!(
            "connect to {} after {}ms",
            addr,
            connect_timeout.as_millis()
        ))),
    }
}

/// 解析 `opc.tcp://host:port/path` 形式的端点
pub(crate) fn parse_endpoint(endpoint: &str, default_port: u16) -> Result<(String, u16), ProtocolError> {
    let rest = endpoint
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(endpoint);
    let authority = rest.split('/').next().unwrap_or_default();
    if authority.is_empty() {
        return Err(ProtocolError::Config(format!("invalid endpoint: {}", endpoint)));
    }
    match authority.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| ProtocolError::Config(format!("invalid port in endpoint: {}", endpoint)))?;
            Ok((host.to_string(), port))
        }
        None => Ok((authority.to_string(), default_port)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_endpoint() {
        let (host, port) = parse_endpoint("opc.tcp://localhost:4840/freeopcua/server/", 4840).unwrap();
        assert_eq!(host, "localhost");
        assert_eq!(port, 4840);

        let (host, port) = parse_endpoint("opc.tcp://10.0.0.5", 4840).unwrap();
        assert_eq!(host, "10.0.0.5");
        assert_eq!(port, 4840);

        assert!(parse_endpoint("opc.tcp://host:abc", 4840).is_err());
        assert!(parse_endpoint("", 4840).is_err());
    }
}
