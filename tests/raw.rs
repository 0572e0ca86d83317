use std::io::Error as IoError;
use std::net::SocketAddr;
use std::time;

use futures_lite::future::zip;
use log::debug;

use xconnect::factory::{ConnectionFactory, RawConnectionFactory};
use xconnect::net::{BoxConnection, TcpListener};
use xconnect::test_async;
use xconnect::timer::sleep;
use xconnect::TransportError;

const ITER: u16 = 10;

async fn read_message(conn: &mut BoxConnection, len: usize) -> String {
    let mut buf = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        let n = conn.read(&mut buf[filled..]).await.expect("read");
        assert!(n > 0, "unexpected eof");
        filled += n;
    }
    String::from_utf8(buf).expect("utf8")
}

#[test_async]
async fn test_raw_round_trip() -> Result<(), IoError> {
    let port = portpicker::pick_unused_port().expect("free port");
    let addr: SocketAddr = format!("127.0.0.1:{}", port).parse().expect("parse");
    let factory = RawConnectionFactory::new();

    let server_ft = async {
        debug!("server: binding {}", addr);
        let listener = TcpListener::bind(addr).await.expect("bind");
        let mut conn = factory.create_connection();
        conn.accept(&listener).await.expect("accept");
        debug!("server: accepted from {:?}", conn.remote_endpoint());
        assert!(conn.remote_endpoint().is_some());
        assert!(conn.socket_id().is_some());

        for i in 0..ITER {
            let message = read_message(&mut conn, format!("message{}", i).len()).await;
            assert_eq!(message, format!("message{}", i));
            debug!("server: loop {}, echoing reply", i);
            let reply = format!("{}reply", message);
            let n = conn.write(reply.as_bytes()).await.expect("write");
            assert_eq!(n, reply.len());
        }
        Ok(()) as Result<(), IoError>
    };

    let client_ft = async {
        debug!("client: sleep to give server chance to come up");
        sleep(time::Duration::from_millis(100)).await;
        let mut conn = factory.create_connection();
        conn.connect(addr).await.expect("connect");
        assert!(!conn.options().tls_active);

        for i in 0..ITER {
            let message = format!("message{}", i);
            debug!("client: loop {} sending", i);
            conn.write(message.as_bytes()).await.expect("write");
            let reply = read_message(&mut conn, message.len() + 5).await;
            assert_eq!(reply, format!("message{}reply", i));
        }

        conn.close();
        // terminal: every operation fails the same way from now on
        assert!(matches!(
            conn.read(&mut [0u8; 4]).await,
            Err(TransportError::StateNotRecoverable)
        ));
        assert!(matches!(
            conn.write(b"late").await,
            Err(TransportError::StateNotRecoverable)
        ));
        Ok(()) as Result<(), IoError>
    };

    let _ = zip(client_ft, server_ft).await;

    Ok(())
}
