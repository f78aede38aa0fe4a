//! Integration tests for the WebSocket transport.
//!
//! These spin up a real listener on an OS-assigned port and talk to it with
//! either the crate's own client or a raw `tokio-tungstenite` client.

#[cfg(feature = "websocket")]
mod websocket {
    use devlink_transport::{
        Frame, FrameSink, FrameSource, TransportError, WebSocketListener, connect,
    };
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::Message;

    async fn bind(path: &str) -> (WebSocketListener, String) {
        let listener = WebSocketListener::bind("127.0.0.1:0", path)
            .await
            .expect("should bind");
        let addr = listener.local_addr().expect("local addr").to_string();
        (listener, addr)
    }

    #[tokio::test]
    async fn test_text_frames_flow_both_ways() {
        let (listener, addr) = bind("/devlink").await;
        let server = tokio::spawn(async move {
            listener.accept().await.expect("should accept")
        });

        let (client_sink, mut client_source) =
            connect(&format!("ws://{addr}/devlink"))
                .await
                .expect("client should connect");
        let (server_sink, mut server_source) = server.await.unwrap();

        assert!(server_sink.id().into_inner() > 0);
        assert_ne!(server_sink.id(), client_sink.id());

        server_sink
            .send_text("Text,-,e30=".into())
            .await
            .expect("send should succeed");
        let frame = client_source.next_frame().await.unwrap();
        assert_eq!(frame, Some(Frame::Text("Text,-,e30=".into())));

        client_sink.send_text("hello".into()).await.unwrap();
        let frame = server_source.next_frame().await.unwrap();
        assert_eq!(frame, Some(Frame::Text("hello".into())));

        client_sink.close().await.expect("close should succeed");
        let frame = server_source.next_frame().await.unwrap();
        assert_eq!(frame, None);
    }

    #[tokio::test]
    async fn test_binary_frames_are_surfaced_not_dropped() {
        let (listener, addr) = bind("/devlink").await;
        let server = tokio::spawn(async move { listener.accept().await.unwrap() });

        let (mut ws, _) =
            tokio_tungstenite::connect_async(format!("ws://{addr}/devlink"))
                .await
                .unwrap();
        let (_sink, mut source) = server.await.unwrap();

        ws.send(Message::Binary(vec![1, 2, 3].into())).await.unwrap();
        let frame = source.next_frame().await.unwrap();
        assert_eq!(frame, Some(Frame::Binary(vec![1, 2, 3])));

        ws.send(Message::Close(None)).await.unwrap();
        assert_eq!(source.next_frame().await.unwrap(), None);
        let _ = ws.next().await;
    }

    #[tokio::test]
    async fn test_send_after_close_reports_connection_closed() {
        let (listener, addr) = bind("/devlink").await;
        let server = tokio::spawn(async move { listener.accept().await.unwrap() });

        let (client_sink, _client_source) =
            connect(&format!("ws://{addr}/devlink")).await.unwrap();
        let (_server_sink, _server_source) = server.await.unwrap();

        client_sink.close().await.expect("close should succeed");
        let err = client_sink.send_text("late".into()).await.unwrap_err();
        assert!(
            matches!(err, TransportError::ConnectionClosed(_)),
            "got {err:?}"
        );
    }

    #[tokio::test]
    async fn test_handshake_on_wrong_path_is_refused() {
        let (listener, addr) = bind("/devlink").await;
        let server = tokio::spawn(async move { listener.accept().await });

        let client = connect(&format!("ws://{addr}/elsewhere")).await;
        assert!(client.is_err(), "client must be refused");

        let accepted = server.await.unwrap();
        assert!(accepted.is_err(), "server must report the refused handshake");
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails() {
        let (listener, addr) = bind("/devlink").await;
        drop(listener);
        let result = connect(&format!("ws://{addr}/devlink")).await;
        assert!(result.is_err());
    }
}
