// TCP transport - framed reads, serialized writes, reconnect and heartbeat supervision
use bytes::Bytes;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::application::shot_repository::CommandObserver;
use crate::domain::protocol::{
    ASYNC_DATA_LEN, ASYNC_HEADER_LEN, AsyncHeader, Command, ConnectionState, ECHO_RESPONSE_PREFIX,
    FRAME_LEN, Message, ProtocolError, RECV_BUFFER_LEN, RESPONSE_LEN, is_async, unset_async,
};
use crate::infrastructure::config::BoardSettings;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("could not connect to {addr} after {attempts} attempts: {source}")]
    ConnectFailed {
        addr: String,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },
    #[error("connection closed by peer")]
    Eof,
    #[error("receive timed out {0} times within one message")]
    Timeout(u32),
    #[error("not connected")]
    NotConnected,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of one heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Heartbeat {
    /// Traffic seen within the period, nothing sent.
    Alive,
    /// Echo request sent.
    EchoSent { missed: u32 },
    /// Too many echoes went unanswered.
    ResetRequested,
    /// No socket installed; nothing sent or counted.
    Detached,
}

/// Write side of the board connection plus the link status shared with the
/// heartbeat task and HTTP handlers.
pub struct BoardLink {
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    state: Mutex<ConnectionState>,
    last_contact: Mutex<Instant>,
    missed: AtomicU32,
    observer: Option<Arc<dyn CommandObserver>>,
}

impl BoardLink {
    fn new(observer: Option<Arc<dyn CommandObserver>>) -> Self {
        Self {
            writer: tokio::sync::Mutex::new(None),
            state: Mutex::new(ConnectionState::NotConnected),
            last_contact: Mutex::new(Instant::now()),
            missed: AtomicU32::new(0),
            observer,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_state(&self, state: ConnectionState) {
        let mut current = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *current != state {
            tracing::info!(from = ?*current, to = ?state, "connection state");
            *current = state;
        }
    }

    pub fn missed_heartbeats(&self) -> u32 {
        self.missed.load(Ordering::Relaxed)
    }

    /// Any received byte counts as contact and undoes a heartbeat escalation.
    fn touch(&self) {
        *self.last_contact.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
        self.missed.store(0, Ordering::Relaxed);
        if self.state() == ConnectionState::Connecting {
            self.set_state(ConnectionState::Connected);
        }
    }

    fn idle_for(&self) -> Duration {
        self.last_contact
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .elapsed()
    }

    pub async fn send(&self, command: &Command) -> Result<(), TransportError> {
        self.send_text(&command.to_wire()).await
    }

    /// Writes one command string; writes from all tasks are serialized.
    pub async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        {
            let mut writer = self.writer.lock().await;
            let stream = writer.as_mut().ok_or(TransportError::NotConnected)?;
            stream.write_all(text.as_bytes()).await?;
        }

        tracing::debug!(command = text.trim_end(), "command sent");
        if let Some(observer) = &self.observer {
            observer.command_sent(text);
        }
        Ok(())
    }

    /// Sends an echo request when the link has been idle for `period`. An echo
    /// still unanswered at the next tick counts as a miss.
    pub async fn heartbeat(&self, period: Duration, miss_limit: u32) -> Heartbeat {
        if self.writer.lock().await.is_none() {
            return Heartbeat::Detached;
        }
        if self.idle_for() < period {
            return Heartbeat::Alive;
        }

        let missed = self.missed.fetch_add(1, Ordering::Relaxed);
        if missed > 0 && self.state() == ConnectionState::Connected {
            self.set_state(ConnectionState::Connecting);
        }
        if missed > miss_limit {
            tracing::warn!(missed, "heartbeat unanswered, requesting reset");
            return Heartbeat::ResetRequested;
        }

        if let Err(e) = self.send(&Command::Echo).await {
            tracing::warn!(error = %e, "heartbeat transmit failed");
        }
        Heartbeat::EchoSent { missed }
    }

    async fn shutdown(&self) {
        if let Some(mut stream) = self.writer.lock().await.take() {
            if let Err(e) = stream.shutdown().await {
                tracing::debug!(error = %e, "socket shutdown");
            }
        }
    }
}

pub struct BoardClient {
    settings: BoardSettings,
    reader: Option<OwnedReadHalf>,
    link: Arc<BoardLink>,
}

impl BoardClient {
    pub fn new(settings: BoardSettings, observer: Option<Arc<dyn CommandObserver>>) -> Self {
        Self {
            settings,
            reader: None,
            link: Arc::new(BoardLink::new(observer)),
        }
    }

    pub fn link(&self) -> Arc<BoardLink> {
        self.link.clone()
    }

    fn addr(&self) -> String {
        format!("{}:{}", self.settings.host, self.settings.port)
    }

    /// Connects with a bounded number of attempts.
    pub async fn connect(&mut self) -> Result<(), TransportError> {
        let addr = self.addr();
        let attempts = self.settings.connect_retries;
        let delay = Duration::from_millis(self.settings.connect_retry_ms);
        self.link.set_state(ConnectionState::Connecting);

        let mut attempt = 0;
        loop {
            attempt += 1;
            match TcpStream::connect(&addr).await {
                Ok(stream) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!(error = %e, "set_nodelay");
                    }
                    let (reader, writer) = stream.into_split();
                    self.reader = Some(reader);
                    *self.link.writer.lock().await = Some(writer);
                    self.link.touch();
                    self.link.set_state(ConnectionState::Connected);
                    tracing::info!(%addr, attempt, "connected to board");
                    return Ok(());
                }
                Err(e) if attempt < attempts => {
                    tracing::warn!(%addr, attempt, error = %e, "connect failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(source) => {
                    self.link.set_state(ConnectionState::NotConnected);
                    return Err(TransportError::ConnectFailed {
                        addr,
                        attempts,
                        source,
                    });
                }
            }
        }
    }

    pub async fn close(&mut self) {
        self.reader = None;
        self.link.shutdown().await;
        self.link.set_state(ConnectionState::NotConnected);
    }

    /// Close and reconnect.
    pub async fn reset(&mut self) -> Result<(), TransportError> {
        tracing::info!(addr = %self.addr(), "socket reconnect");
        self.close().await;
        self.connect().await
    }

    /// Reads one complete message. Echo responses update the link state and
    /// are swallowed unless `echo_verbose` is set.
    pub async fn receive(&mut self) -> Result<Message, TransportError> {
        loop {
            let mut frame = [0u8; FRAME_LEN];
            self.read_full(&mut frame, false).await?;

            if !is_async(frame[0]) {
                let mut buf = vec![0u8; RESPONSE_LEN];
                buf[0] = frame[0];
                self.read_full(&mut buf[FRAME_LEN..], true).await?;

                if buf[0] == ECHO_RESPONSE_PREFIX {
                    let state = self.link.state();
                    self.link.set_state(state.on_echo());
                    if !self.settings.echo_verbose {
                        continue;
                    }
                }
                return Ok(Message::Response(Bytes::from(buf)));
            }

            let mut raw = [0u8; ASYNC_HEADER_LEN];
            raw[0] = unset_async(frame[0]);
            self.read_full(&mut raw[FRAME_LEN..], true).await?;
            let header = AsyncHeader::decode(&raw)?;

            let mut len = header.num_bytes as usize;
            if len + ASYNC_HEADER_LEN > RECV_BUFFER_LEN {
                tracing::warn!(
                    num_bytes = len,
                    max = ASYNC_DATA_LEN,
                    "async payload exceeds receive buffer, truncating"
                );
                len = ASYNC_DATA_LEN;
            }

            let mut payload = vec![0u8; len];
            self.read_full(&mut payload, true).await?;
            return Ok(Message::Async {
                header,
                payload: Bytes::from(payload),
            });
        }
    }

    /// Fills `buf` completely. Waiting for a message to start has no time
    /// limit; inside a message the receive timeout is retried up to
    /// `read_retry_limit` times.
    async fn read_full(&mut self, buf: &mut [u8], timed: bool) -> Result<(), TransportError> {
        let timeout = Duration::from_millis(self.settings.recv_timeout_ms);
        let retry_limit = self.settings.read_retry_limit;
        let reader = self.reader.as_mut().ok_or(TransportError::NotConnected)?;

        let mut filled = 0;
        let mut timeouts = 0;
        while filled < buf.len() {
            let read = if timed {
                match tokio::time::timeout(timeout, reader.read(&mut buf[filled..])).await {
                    Ok(r) => r,
                    Err(_) => Err(ErrorKind::TimedOut.into()),
                }
            } else {
                reader.read(&mut buf[filled..]).await
            };

            match read {
                Ok(0) => return Err(TransportError::Eof),
                Ok(n) => {
                    filled += n;
                    self.link.touch();
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut
                    ) =>
                {
                    timeouts += 1;
                    tracing::warn!(error = %e, filled, wanted = buf.len(), "recv retry");
                    if timeouts > retry_limit {
                        return Err(TransportError::Timeout(timeouts));
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use tokio::net::TcpListener;

    fn settings(port: u16) -> BoardSettings {
        BoardSettings {
            host: "127.0.0.1".to_string(),
            port,
            connect_retries: 2,
            connect_retry_ms: 10,
            recv_timeout_ms: 50,
            read_retry_limit: 2,
            ..Default::default()
        }
    }

    async fn listener() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    fn response_bytes(text: &str) -> Vec<u8> {
        let mut buf = text.as_bytes().to_vec();
        buf.resize(RESPONSE_LEN, 0);
        buf
    }

    #[derive(Default)]
    struct Recorder(StdMutex<Vec<String>>);

    impl CommandObserver for Recorder {
        fn command_sent(&self, command: &str) {
            self.0.lock().unwrap().push(command.to_string());
        }
    }

    #[tokio::test]
    async fn test_receives_response_and_async_message() {
        let (listener, port) = listener().await;
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(&response_bytes("R_At home")).await.unwrap();

            let header = AsyncHeader {
                bin_id: b'B',
                bin_type: 5,
                packet_num: 1,
                num_packets: 1,
                num_bytes: 5,
                ..Default::default()
            };
            let mut raw = header.encode();
            raw[0] |= 0x80;
            // split writes exercise the fill loop
            sock.write_all(&raw[..4]).await.unwrap();
            sock.write_all(&raw[4..]).await.unwrap();
            sock.write_all(b"hello").await.unwrap();
        });

        let mut client = BoardClient::new(settings(port), None);
        client.connect().await.unwrap();

        match client.receive().await.unwrap() {
            Message::Response(buf) => {
                assert_eq!(buf.len(), RESPONSE_LEN);
                assert_eq!(Message::response_text(&buf), "R_At home");
            }
            other => panic!("unexpected {other:?}"),
        }
        match client.receive().await.unwrap() {
            Message::Async { header, payload } => {
                assert_eq!(header.bin_id, b'B');
                assert_eq!(header.bin_type, 5);
                assert_eq!(payload.as_ref(), b"hello");
            }
            other => panic!("unexpected {other:?}"),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_eof_reported() {
        let (listener, port) = listener().await;
        tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            drop(sock);
        });

        let mut client = BoardClient::new(settings(port), None);
        client.connect().await.unwrap();
        assert!(matches!(client.receive().await, Err(TransportError::Eof)));
    }

    #[tokio::test]
    async fn test_echo_promotes_state_and_is_swallowed() {
        let (listener, port) = listener().await;
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(&response_bytes("*")).await.unwrap();
            sock.write_all(&response_bytes("*")).await.unwrap();
            sock.write_all(&response_bytes("V301_1000")).await.unwrap();
        });

        let mut client = BoardClient::new(settings(port), None);
        client.connect().await.unwrap();
        let link = client.link();
        link.set_state(ConnectionState::Connecting);

        let msg = client.receive().await.unwrap();
        assert_eq!(link.state(), ConnectionState::Connected);
        match msg {
            Message::Response(buf) => assert_eq!(Message::response_text(&buf), "V301_1000"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stalled_message_times_out() {
        let (listener, port) = listener().await;
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"R_partial").await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let mut client = BoardClient::new(settings(port), None);
        client.connect().await.unwrap();
        assert!(matches!(client.receive().await, Err(TransportError::Timeout(3))));
    }

    #[tokio::test]
    async fn test_oversized_payload_capped() {
        let (listener, port) = listener().await;
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let header = AsyncHeader {
                bin_id: b'B',
                bin_type: 0,
                packet_num: 1,
                num_packets: 1,
                num_bytes: 2000,
                ..Default::default()
            };
            let mut raw = header.encode();
            raw[0] |= 0x80;
            sock.write_all(&raw).await.unwrap();
            sock.write_all(&vec![1u8; ASYNC_DATA_LEN]).await.unwrap();
            tokio::time::sleep(Duration::from_secs(1)).await;
        });

        let mut client = BoardClient::new(settings(port), None);
        client.connect().await.unwrap();
        match client.receive().await.unwrap() {
            Message::Async { header, payload } => {
                assert_eq!(header.num_bytes, 2000);
                assert_eq!(payload.len(), ASYNC_DATA_LEN);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_connect_budget_exhausted() {
        let (listener, port) = listener().await;
        drop(listener);

        let mut client = BoardClient::new(settings(port), None);
        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectFailed { attempts: 2, .. }));
        assert_eq!(client.link().state(), ConnectionState::NotConnected);
    }

    #[tokio::test]
    async fn test_send_notifies_observer() {
        let (listener, port) = listener().await;
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 3];
            sock.read_exact(&mut buf).await.unwrap();
            buf
        });

        let recorder = Arc::new(Recorder::default());
        let mut client = BoardClient::new(settings(port), Some(recorder.clone() as Arc<dyn CommandObserver>));
        client.connect().await.unwrap();
        client.link().send(&Command::GetVersion).await.unwrap();

        assert_eq!(&server.await.unwrap(), b"OV\r");
        assert_eq!(*recorder.0.lock().unwrap(), vec!["OV\r".to_string()]);
    }

    #[tokio::test]
    async fn test_heartbeat_escalates_then_requests_reset() {
        let (listener, port) = listener().await;
        tokio::spawn(async move {
            let (_sock, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let mut client = BoardClient::new(settings(port), None);
        client.connect().await.unwrap();
        let link = client.link();

        assert_eq!(link.heartbeat(Duration::from_secs(60), 1).await, Heartbeat::Alive);

        let period = Duration::ZERO;
        assert_eq!(link.heartbeat(period, 1).await, Heartbeat::EchoSent { missed: 0 });
        assert_eq!(link.state(), ConnectionState::Connected);
        assert_eq!(link.heartbeat(period, 1).await, Heartbeat::EchoSent { missed: 1 });
        assert_eq!(link.state(), ConnectionState::Connecting);
        assert_eq!(link.heartbeat(period, 1).await, Heartbeat::ResetRequested);
    }

    #[tokio::test]
    async fn test_heartbeat_idle_without_socket() {
        let client = BoardClient::new(settings(1), None);
        let link = client.link();
        link.set_state(ConnectionState::Connecting);

        for _ in 0..5 {
            assert_eq!(link.heartbeat(Duration::ZERO, 1).await, Heartbeat::Detached);
        }
        assert_eq!(link.missed_heartbeats(), 0);
        assert_eq!(link.state(), ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn test_traffic_restores_connected_after_escalation() {
        let (listener, port) = listener().await;
        let (go_tx, go_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            go_rx.await.unwrap();
            sock.write_all(&response_bytes("V301_1000")).await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let mut client = BoardClient::new(settings(port), None);
        client.connect().await.unwrap();
        let link = client.link();

        link.heartbeat(Duration::ZERO, 5).await;
        link.heartbeat(Duration::ZERO, 5).await;
        assert_eq!(link.state(), ConnectionState::Connecting);

        go_tx.send(()).unwrap();
        client.receive().await.unwrap();
        assert_eq!(link.state(), ConnectionState::Connected);
        assert_eq!(link.missed_heartbeats(), 0);
    }
}
