#![cfg(feature = "runtime-tokio")]

mod support;

use spark_transport::TokioTransport;
use spark_transport_tls::{TlsConnector, rustls};
use support::{HOSTNAME, Pki};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[tokio::test]
async fn tokio_duplex_round_trip_against_tokio_rustls_server() {
    let pki = Pki::generate();
    let acceptor = tokio_rustls::TlsAcceptor::from(pki.server_config(rustls::DEFAULT_VERSIONS));
    let (client_io, server_io) = tokio::io::duplex(256);

    let server = tokio::spawn(async move {
        let mut tls = acceptor.accept(server_io).await.expect("服务端握手失败");
        let mut request = [0u8; 5];
        tls.read_exact(&mut request).await.expect("服务端读取失败");
        tls.write_all(&request.to_ascii_uppercase())
            .await
            .expect("服务端写入失败");
        tls.shutdown().await.expect("服务端关闭失败");
        request
    });

    let connector = TlsConnector::new(pki.client_config());
    let mut stream = connector
        .connect(TokioTransport::new(client_io), HOSTNAME)
        .expect("创建客户端流失败");
    stream.handshake().await.expect("客户端握手失败");
    AsyncWriteExt::write_all(&mut stream, b"hello")
        .await
        .expect("客户端写入失败");
    AsyncWriteExt::flush(&mut stream).await.expect("客户端刷新失败");

    let mut response = Vec::new();
    AsyncReadExt::read_to_end(&mut stream, &mut response)
        .await
        .expect("close_notify 应表现为 EOF");
    assert_eq!(response, b"HELLO");
    assert_eq!(&server.await.expect("服务端任务异常"), b"hello");

    AsyncWriteExt::shutdown(&mut stream)
        .await
        .expect("关闭不应失败");
}
