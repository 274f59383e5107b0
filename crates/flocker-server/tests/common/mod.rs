use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use flocker_core::experiment::ExperimentConfig;
use flocker_core::net::messages::{ClientMessage, JoinRoomMsg, JoinRoomResponseMsg, ServerMessage};
use flocker_core::net::protocol::{PROTOCOL_VERSION, decode_server_message, encode_client_message};
use flocker_core::test_helpers::fast_config;

use flocker_server::build_app;
use flocker_server::config::ServerConfig;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub data_dir: tempfile::TempDir,
    _shutdown: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Start a server with short timings that waits in the lobby for five
    /// participants.
    pub async fn new() -> Self {
        Self::with_experiment(ExperimentConfig {
            min_participants: 5,
            ..fast_config()
        })
        .await
    }

    pub async fn with_experiment(experiment: ExperimentConfig) -> Self {
        let data_dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            listen_addr: "127.0.0.1:0".to_string(),
            data_dir: data_dir.path().display().to_string(),
            experiment,
            ..ServerConfig::default()
        };
        Self::from_config(config, data_dir).await
    }

    pub async fn from_config(config: ServerConfig, data_dir: tempfile::TempDir) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (app, _state) = build_app(config);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Give the server a moment to start accepting
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            addr,
            data_dir,
            _shutdown: handle,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub fn data_path(&self) -> &Path {
        self.data_dir.path()
    }
}

/// Connect a WebSocket client to the given URL.
pub async fn ws_connect(url: &str) -> WsStream {
    let (stream, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    stream
}

/// Send a ClientMessage.
pub async fn ws_send_client_msg(stream: &mut WsStream, msg: &ClientMessage) {
    let encoded = encode_client_message(msg).unwrap();
    stream.send(Message::Binary(encoded.into())).await.unwrap();
}

/// Send a JoinRoom and return the JoinRoomResponse (success or error).
pub async fn ws_join(
    stream: &mut WsStream,
    name: &str,
    session_id: Option<String>,
) -> JoinRoomResponseMsg {
    let msg = ClientMessage::JoinRoom(JoinRoomMsg {
        display_name: name.to_string(),
        session_id,
        protocol_version: PROTOCOL_VERSION,
    });
    ws_send_client_msg(stream, &msg).await;

    match ws_read_server_msg(stream).await {
        ServerMessage::JoinRoomResponse(join) => join,
        other => panic!("Expected JoinRoomResponse, got: {other:?}"),
    }
}

/// Join with a new session and assert success. Returns the session id.
pub async fn ws_join_ok(stream: &mut WsStream, name: &str) -> String {
    let resp = ws_join(stream, name, None).await;
    assert!(resp.success, "Expected successful join: {resp:?}");
    resp.session_id.unwrap()
}

/// Read raw binary data from a WebSocket stream (5s timeout).
pub async fn ws_read_raw(stream: &mut WsStream) -> Vec<u8> {
    let deadline = Duration::from_secs(5);
    tokio::time::timeout(deadline, async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Binary(data))) => return data.to_vec(),
                Some(Ok(Message::Close(_))) => panic!("WebSocket closed unexpectedly"),
                Some(Err(e)) => panic!("WebSocket error: {e}"),
                None => panic!("WebSocket stream ended"),
                _ => continue,
            }
        }
    })
    .await
    .expect("Timed out waiting for WebSocket message")
}

/// Read the next ServerMessage from a WebSocket stream (5s timeout).
pub async fn ws_read_server_msg(stream: &mut WsStream) -> ServerMessage {
    let data = ws_read_raw(stream).await;
    decode_server_message(&data).unwrap()
}

/// Read messages until one matches `pred` (5s overall timeout).
pub async fn ws_read_until<F>(stream: &mut WsStream, mut pred: F) -> ServerMessage
where
    F: FnMut(&ServerMessage) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let msg = ws_read_server_msg(stream).await;
            if pred(&msg) {
                return msg;
            }
        }
    })
    .await
    .expect("Timed out waiting for matching message")
}

/// Drain messages until the server closes the socket. Returns everything read.
pub async fn ws_read_until_closed(stream: &mut WsStream) -> Vec<ServerMessage> {
    tokio::time::timeout(Duration::from_secs(10), async {
        let mut seen = Vec::new();
        loop {
            match stream.next().await {
                Some(Ok(Message::Binary(data))) => {
                    seen.push(decode_server_message(&data).unwrap());
                },
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return seen,
                _ => continue,
            }
        }
    })
    .await
    .expect("Timed out waiting for server to close the socket")
}
