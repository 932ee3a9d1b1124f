#[cfg(test)]
mod tests {
    use crate::config::{ClientConfig, ServerConfig, WebSocketConfig};
    use crate::connection::WSConnection;
    use crate::error::Error;
    use crate::frame::{encode_close_payload, FrameHeader, FrameType, MaskCursor, OpCode};
    use crate::handshake::{accept_async_with_config, connect_async_with_config};
    use crate::message::Message;
    use crate::request::{build_upgrade_request, validate_protocol_name};
    use crate::stream::SocketWireStream;
    use crate::utils::generate_websocket_accept_value;
    use bytes::BytesMut;
    use std::net::SocketAddr;
    use std::time::{Duration, Instant};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    #[test]
    fn test_opcode() {
        let byte = 0x0;
        let res = OpCode::from(byte).unwrap();
        assert_eq!(res, OpCode::Continue);

        let opcode = OpCode::Text;
        let op_byte = opcode.as_u8();
        assert_eq!(op_byte, 0x1);

        assert!(OpCode::Close.is_control());
        assert!(!OpCode::Text.is_control());
        assert!(matches!(OpCode::from(0x3), Err(Error::InvalidOpcode)));
    }

    #[tokio::test]
    async fn test_header_roundtrip_all_length_forms() {
        let lengths: [u64; 7] = [0, 5, 125, 126, 65535, 65536, 1 << 20];
        let masks = [None, Some([0xDE, 0xAD, 0xBE, 0xEF])];

        for &length in &lengths {
            for &mask_key in &masks {
                let header = FrameHeader {
                    final_fragment: length % 2 == 0,
                    opcode: OpCode::Binary,
                    length,
                    mask_key,
                };
                let mut buf = BytesMut::new();
                header.encode(&mut buf);

                let mut slice: &[u8] = &buf;
                let decoded = FrameHeader::read_from(&mut slice).await.unwrap();
                assert_eq!(decoded, header, "length {length} mask {mask_key:?}");
                assert!(slice.is_empty(), "decoder left bytes behind");
            }
        }
    }

    #[tokio::test]
    async fn test_header_rejects_reserved_bits() {
        let mut slice: &[u8] = &[0b1101_0001, 0x00];
        assert!(matches!(
            FrameHeader::read_from(&mut slice).await,
            Err(Error::RSVNotZero)
        ));
    }

    #[test]
    fn test_mask_cursor_rolls_across_chunks() {
        let key = [0x01, 0x02, 0x03, 0x04];
        let payload: Vec<u8> = (0u8..=50).collect();

        let mut whole = payload.clone();
        MaskCursor::new(key).apply(&mut whole);

        // Masking the same bytes in uneven chunks must land on the same
        // result, the key index carries over.
        let mut chunked = payload.clone();
        let mut cursor = MaskCursor::new(key);
        let (left, right) = chunked.split_at_mut(7);
        cursor.apply(left);
        cursor.apply(right);
        assert_eq!(whole, chunked);

        // Unmasking is the same XOR again.
        MaskCursor::new(key).apply(&mut whole);
        assert_eq!(whole, payload);
    }

    #[test]
    fn test_close_payload_truncation() {
        let reason = "x".repeat(200);
        let payload = encode_close_payload(1000, &reason);
        assert_eq!(payload.len(), 125);
        assert_eq!(&payload[..2], &1000u16.to_be_bytes());
        assert!(payload[2..122].iter().all(|&byte| byte == b'x'));
        assert_eq!(&payload[122..], b"...");

        let short = encode_close_payload(1001, "done");
        assert_eq!(short.len(), 2 + 4);
    }

    #[test]
    fn test_accept_key_known_vector() {
        // The sample nonce straight out of the protocol RFC.
        assert_eq!(
            generate_websocket_accept_value("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_upgrade_request_construction() {
        let mut config = ClientConfig::default();
        config.supported_protocols = vec!["apple".into(), "orange".into()];
        let target =
            build_upgrade_request("ws://localhost:8080/chat?room=1", "a2V5a2V5", &config).unwrap();

        assert_eq!(target.host_with_port, "localhost:8080");
        assert!(!target.use_tls);
        assert!(target.request.starts_with("GET /chat?room=1 HTTP/1.1\r\n"));
        assert!(target.request.contains("Host: localhost:8080\r\n"));
        assert!(target.request.contains("Upgrade: websocket\r\n"));
        assert!(target.request.contains("Sec-WebSocket-Key: a2V5a2V5\r\n"));
        assert!(target.request.contains("Sec-WebSocket-Version: 13\r\n"));
        assert!(target
            .request
            .contains("Sec-WebSocket-Protocol: apple, orange\r\n"));
        assert!(target.request.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_upgrade_request_custom_headers_replace_defaults() {
        let mut config = ClientConfig::default();
        config.headers = Some(vec![
            ("User-Agent".into(), "socket-wire-test".into()),
            ("host".into(), "override.example".into()),
        ]);
        let target = build_upgrade_request("ws://localhost:8080", "a2V5", &config).unwrap();

        assert!(target.request.contains("User-Agent: socket-wire-test\r\n"));
        assert!(target.request.contains("Host: override.example\r\n"));
        assert!(!target.request.contains("Host: localhost:8080\r\n"));
    }

    #[test]
    fn test_upgrade_request_rejects_bad_urls() {
        let config = ClientConfig::default();
        assert!(matches!(
            build_upgrade_request("ftp://localhost:8080", "a2V5", &config),
            Err(Error::InvalidSchemeURL)
        ));
        assert!(build_upgrade_request("ws://:8080", "a2V5", &config).is_err());
    }

    #[test]
    fn test_protocol_name_validation() {
        assert!(validate_protocol_name("apple").is_ok());
        assert!(matches!(
            validate_protocol_name("chat.v2"),
            Err(Error::InvalidSubProtocolName(_))
        ));
        assert!(validate_protocol_name("").is_err());
    }

    #[test]
    fn test_keepalive_params_resolution() {
        let config = WebSocketConfig::default();
        let (interval, strikes) = config.keepalive_params();
        assert_eq!(interval, Duration::from_secs(30));
        assert_eq!(strikes, 2);

        let config = WebSocketConfig {
            ping_interval: Duration::from_millis(100),
            pong_timeout: Duration::from_millis(250),
            expose_pong_frames: false,
        };
        // 250ms of tolerance rounds up to three 100ms intervals.
        assert_eq!(config.keepalive_params(), (Duration::from_millis(100), 3));
    }

    // ---- integration helpers -------------------------------------------

    fn accept_one(config: ServerConfig) -> (SocketAddr, JoinHandle<Result<WSConnection, Error>>) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let listener = TcpListener::from_std(listener).unwrap();
            let (stream, _) = listener.accept().await.unwrap();
            accept_async_with_config(SocketWireStream::Plain(stream), Some(config)).await
        });
        (addr, handle)
    }

    async fn connected_pair(
        server_config: ServerConfig,
        client_config: ClientConfig,
    ) -> (WSConnection, WSConnection) {
        let (addr, server) = accept_one(server_config);
        let client = connect_async_with_config(&format!("ws://{addr}"), client_config)
            .await
            .unwrap();
        (server.await.unwrap().unwrap(), client)
    }

    async fn read_whole_payload(conn: &WSConnection) -> Vec<u8> {
        let mut data = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let read = conn.read_payload(&mut chunk).await.unwrap();
            if read == 0 {
                return data;
            }
            data.extend_from_slice(&chunk[..read]);
        }
    }

    // A bare TCP client that completes the upgrade by hand and then
    // speaks raw frames, for driving the protocol-error paths.
    async fn raw_upgrade(addr: SocketAddr) -> TcpStream {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "GET / HTTP/1.1\r\nHost: {addr}\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\
             Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n"
        );
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut head = Vec::new();
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            stream.read_exact(&mut byte).await.unwrap();
            head.push(byte[0]);
        }
        assert!(head.starts_with(b"HTTP/1.1 101"));
        stream
    }

    fn masked_frame(fin: bool, opcode: u8, payload: &[u8]) -> Vec<u8> {
        assert!(payload.len() <= 125);
        let key = [0x11, 0x22, 0x33, 0x44];
        let mut frame = vec![(fin as u8) << 7 | opcode, 0x80 | payload.len() as u8];
        frame.extend_from_slice(&key);
        frame.extend(
            payload
                .iter()
                .enumerate()
                .map(|(index, byte)| byte ^ key[index % 4]),
        );
        frame
    }

    fn slow_keepalive() -> WebSocketConfig {
        WebSocketConfig {
            ping_interval: Duration::from_secs(60),
            pong_timeout: Duration::ZERO,
            expose_pong_frames: false,
        }
    }

    // ---- round-trip scenarios ------------------------------------------

    #[tokio::test]
    async fn test_echo_text_and_graceful_close() {
        let server_config = ServerConfig {
            supported_protocols: vec!["apple".into(), "orange".into()],
            ..Default::default()
        };
        let client_config = ClientConfig {
            supported_protocols: vec!["apple".into()],
            ..Default::default()
        };
        let (server, client) = connected_pair(server_config, client_config).await;
        assert_eq!(client.subprotocol(), Some("apple"));

        // Server to client: a single sized text frame.
        server.send_text("hello").await.unwrap();
        assert_eq!(client.next_frame().await.unwrap(), Some(FrameType::Text));
        let payload = read_whole_payload(&client).await;
        assert_eq!(payload, vec![0x68, 0x65, 0x6C, 0x6C, 0x6F]);

        // Client to server: the same text streamed in one chunk.
        let mut writer = client.start_text_stream().await.unwrap();
        writer.write(b"hello").await.unwrap();
        writer.end().await.unwrap();
        assert_eq!(
            server.receive().await.unwrap(),
            Some(Message::Text("hello".into()))
        );

        // Server initiates a graceful close, the client sees code and
        // reason, and the server's receive loop consumes the echo.
        let close_task = tokio::spawn({
            let server = server.clone();
            async move { server.close(Duration::from_secs(5), 1000, "goodbye").await }
        });

        match client.next_frame().await {
            Err(Error::ClosedByPeer { code, reason }) => {
                assert_eq!(code, 1000);
                assert_eq!(reason, "goodbye");
            }
            other => panic!("expected ClosedByPeer, got {other:?}"),
        }
        assert!(matches!(server.next_frame().await, Ok(None)));
        close_task.await.unwrap().unwrap();

        // Everything after the close fails fast.
        assert!(matches!(
            client.send_text("late").await,
            Err(Error::AlreadyClosed)
        ));
        assert!(matches!(client.next_frame().await, Ok(None)));
    }

    #[tokio::test]
    async fn test_ping_pong_exposed() {
        let client_config = ClientConfig {
            web_socket_config: WebSocketConfig {
                expose_pong_frames: true,
                ..slow_keepalive()
            },
            ..Default::default()
        };
        let server_config = ServerConfig {
            web_socket_config: slow_keepalive(),
            ..Default::default()
        };
        let (server, client) = connected_pair(server_config, client_config).await;

        // The server side keeps reading so pings get their echoes.
        let pump = tokio::spawn(async move {
            while let Ok(Some(_)) = server.receive().await {}
        });

        client.send_ping(b"ping-pong").await.unwrap();

        // The keepalive's own numbered pong may come back first; the
        // manual ping echo must follow with the payload intact.
        let mut saw_echo = false;
        for _ in 0..5 {
            match client.next_frame().await.unwrap() {
                Some(FrameType::Pong) => {
                    if read_whole_payload(&client).await == b"ping-pong" {
                        saw_echo = true;
                        break;
                    }
                }
                Some(_) => {}
                None => break,
            }
        }
        assert!(saw_echo, "pong echo never surfaced");

        client.force_close().await;
        pump.await.unwrap();
    }

    #[tokio::test]
    async fn test_subprotocol_negotiation() {
        // First client-offered name the server supports wins.
        let server_config = ServerConfig {
            supported_protocols: vec!["apple".into(), "orange".into()],
            ..Default::default()
        };
        let client_config = ClientConfig {
            supported_protocols: vec!["pear".into(), "apple".into()],
            ..Default::default()
        };
        let (server, client) = connected_pair(server_config, client_config).await;
        assert_eq!(server.subprotocol(), Some("apple"));
        assert_eq!(client.subprotocol(), Some("apple"));

        // No overlap: no subprotocol, but the connection still works.
        let server_config = ServerConfig {
            supported_protocols: vec!["apple".into(), "orange".into()],
            ..Default::default()
        };
        let client_config = ClientConfig {
            supported_protocols: vec!["pear".into()],
            ..Default::default()
        };
        let (server, client) = connected_pair(server_config, client_config).await;
        assert_eq!(server.subprotocol(), None);
        assert_eq!(client.subprotocol(), None);

        client.send_text("still works").await.unwrap();
        assert_eq!(
            server.receive().await.unwrap(),
            Some(Message::Text("still works".into()))
        );
    }

    #[tokio::test]
    async fn test_close_reason_truncated_on_the_wire() {
        let (server, client) =
            connected_pair(ServerConfig::default(), ClientConfig::default()).await;

        let long_reason = "r".repeat(200);
        let close_task = tokio::spawn({
            let server = server.clone();
            async move {
                server
                    .close(Duration::from_secs(5), 1000, &long_reason)
                    .await
            }
        });

        match client.next_frame().await {
            Err(Error::ClosedByPeer { code, reason }) => {
                assert_eq!(code, 1000);
                assert_eq!(reason.len(), 123);
                assert!(reason.ends_with("..."));
                assert!(reason.starts_with("rrr"));
            }
            other => panic!("expected ClosedByPeer, got {other:?}"),
        }
        assert!(matches!(server.next_frame().await, Ok(None)));
        close_task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_keepalive_timeout_forces_close() {
        let server_config = ServerConfig {
            web_socket_config: WebSocketConfig {
                ping_interval: Duration::from_millis(100),
                pong_timeout: Duration::from_millis(300),
                expose_pong_frames: false,
            },
            ..Default::default()
        };
        let (addr, server) = accept_one(server_config);

        // A peer that upgrades fine and then never answers anything.
        let mute_peer = raw_upgrade(addr).await;
        let server = server.await.unwrap().unwrap();

        let started = Instant::now();
        assert!(matches!(server.next_frame().await, Ok(None)));
        let elapsed = started.elapsed();
        assert!(
            elapsed >= Duration::from_millis(250) && elapsed <= Duration::from_millis(1000),
            "force close took {elapsed:?}"
        );

        // Later reads stay at end of stream.
        assert!(matches!(server.next_frame().await, Ok(None)));
        drop(mute_peer);
    }

    #[tokio::test]
    async fn test_stray_continuation_is_a_protocol_error() {
        let server_config = ServerConfig {
            web_socket_config: slow_keepalive(),
            ..Default::default()
        };
        let (addr, server) = accept_one(server_config);
        let mut peer = raw_upgrade(addr).await;
        let server = server.await.unwrap().unwrap();

        peer.write_all(&masked_frame(true, 0x0, b"")).await.unwrap();
        assert!(matches!(
            server.next_frame().await,
            Err(Error::InvalidContinuationFrame)
        ));
        server.force_close().await;
    }

    #[tokio::test]
    async fn test_mismatched_pong_is_a_protocol_error() {
        let server_config = ServerConfig {
            web_socket_config: slow_keepalive(),
            ..Default::default()
        };
        let (addr, server) = accept_one(server_config);
        let mut peer = raw_upgrade(addr).await;
        let server = server.await.unwrap().unwrap();

        // The keepalive just sent ping 1; a pong claiming 5 is neither an
        // answer to it nor in order.
        peer.write_all(&masked_frame(true, 0xA, b"5")).await.unwrap();
        assert!(matches!(
            server.next_frame().await,
            Err(Error::InvalidPongPayload)
        ));
        server.force_close().await;
    }

    #[tokio::test]
    async fn test_large_binary_message_roundtrip() {
        let (server, client) =
            connected_pair(ServerConfig::default(), ClientConfig::default()).await;

        // 65536 forces the 64-bit length form, and the client side masks.
        let data: Vec<u8> = (0..65536u32).map(|index| index as u8).collect();
        let send_task = tokio::spawn({
            let client = client.clone();
            let data = data.clone();
            async move { client.send_binary(&data).await }
        });

        assert_eq!(server.next_frame().await.unwrap(), Some(FrameType::Binary));
        let received = read_whole_payload(&server).await;
        assert_eq!(received, data);
        send_task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_fragmented_stream_interleaves_with_keepalive() {
        let (server, client) =
            connected_pair(ServerConfig::default(), ClientConfig::default()).await;

        // A message streamed in several fragments arrives reassembled,
        // regardless of any control traffic in between.
        let mut writer = client.start_binary_stream().await.unwrap();
        for chunk in [b"abc".as_slice(), b"defg", b"hij"] {
            writer.write(chunk).await.unwrap();
        }
        writer.end().await.unwrap();

        assert_eq!(
            server.receive().await.unwrap(),
            Some(Message::Binary(b"abcdefghij".to_vec()))
        );
    }

    #[tokio::test]
    async fn test_json_roundtrip() {
        #[derive(serde::Serialize, serde::Deserialize, Debug, PartialEq)]
        struct Greeting {
            who: String,
            count: u32,
        }

        let (server, client) =
            connected_pair(ServerConfig::default(), ClientConfig::default()).await;

        let sent = Greeting {
            who: "world".into(),
            count: 3,
        };
        client.send_json(&sent).await.unwrap();

        assert_eq!(server.next_frame().await.unwrap(), Some(FrameType::Text));
        let received: Greeting = server.read_json().await.unwrap();
        assert_eq!(received, sent);
    }

    #[tokio::test]
    async fn test_oversize_write_poisons_the_connection() {
        let (server, client) =
            connected_pair(ServerConfig::default(), ClientConfig::default()).await;

        let mut writer = client.start_text(5).await.unwrap();
        assert!(matches!(
            writer.write(b"way past five").await,
            Err(Error::FrameOverflow)
        ));
        drop(writer);

        assert!(matches!(
            client.send_text("anything").await,
            Err(Error::AlreadyClosed)
        ));
        drop(server);
    }

    #[tokio::test]
    async fn test_read_contract_errors() {
        let (server, client) =
            connected_pair(ServerConfig::default(), ClientConfig::default()).await;

        // Reading with no frame selected.
        let mut buf = [0u8; 8];
        assert!(matches!(
            client.read_payload(&mut buf).await,
            Err(Error::NoActiveFrame)
        ));

        // Advancing before the current message is drained.
        server.send_text("hello").await.unwrap();
        assert_eq!(client.next_frame().await.unwrap(), Some(FrameType::Text));
        assert!(matches!(
            client.next_frame().await,
            Err(Error::MessageInProgress)
        ));

        // Draining it clears the way again.
        assert_eq!(read_whole_payload(&client).await, b"hello");
        server.send_text("again").await.unwrap();
        assert_eq!(client.next_frame().await.unwrap(), Some(FrameType::Text));
    }
}
