use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use sigrelay_wire::{EnvelopeCodec, FrameConfig, ShortId};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::codec::Framed;

use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::registry::Registry;

/// Callback invoked with a code when the receiver holding it disconnects.
pub type ReleaseHook = Arc<dyn Fn(&str) + Send + Sync>;

/// TCP front end of a [`Registry`].
///
/// Each accepted connection gets its own reader task and a writer task that
/// drains the connection's outbound queue. Only the registry is shared.
pub struct RelayServer {
    listener: TcpListener,
    config: RelayConfig,
    registry: Arc<Mutex<Registry>>,
    release_hook: Option<ReleaseHook>,
}

impl RelayServer {
    /// Bind the listening socket.
    pub async fn bind(config: RelayConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.bind)
            .await
            .map_err(|source| RelayError::Bind {
                addr: config.bind,
                source,
            })?;
        Ok(Self {
            listener,
            config,
            registry: Arc::new(Mutex::new(Registry::new())),
            release_hook: None,
        })
    }

    /// Register a callback for released codes.
    ///
    /// Called when the receiver currently reachable under a code disconnects.
    /// A receiver replaced by a later registration under the same code no
    /// longer owns it, so its disconnect is not reported.
    pub fn with_release_hook(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.release_hook = Some(Arc::new(hook));
        self
    }

    /// Address actually bound (resolves port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Shared handle to the routing state.
    pub fn registry(&self) -> Arc<Mutex<Registry>> {
        Arc::clone(&self.registry)
    }

    /// Serve until the task is dropped.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Serve until `shutdown` resolves, then drop every open connection.
    pub async fn serve_with_shutdown<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let addr = self.local_addr()?;
        tracing::info!(addr = %addr, "relay listening");

        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!(open = connections.len(), "relay shutting down");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        connections.spawn(serve_connection(
                            stream,
                            peer,
                            self.config.frame_config(),
                            Arc::clone(&self.registry),
                            self.release_hook.clone(),
                        ));
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to accept connection");
                    }
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        connections.shutdown().await;
        Ok(())
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    frame_config: FrameConfig,
    registry: Arc<Mutex<Registry>>,
    release_hook: Option<ReleaseHook>,
) {
    let _ = stream.set_nodelay(true);
    let (mut sink, mut inbound) =
        Framed::new(stream, EnvelopeCodec::with_config(frame_config)).split();
    let (outbox, mut queue) = mpsc::unbounded_channel();

    let id = registry.lock().connect(outbox);
    tracing::info!(id = %ShortId(&id), peer = %peer, "connection accepted");

    let _writer = AbortOnDrop(tokio::spawn(async move {
        while let Some(envelope) = queue.recv().await {
            if let Err(err) = sink.send(envelope).await {
                tracing::warn!(error = %err, "relay write failed");
                break;
            }
        }
    }));

    while let Some(item) = inbound.next().await {
        match item {
            Ok(envelope) => {
                tracing::debug!(id = %ShortId(&id), event = %envelope.event, "message received");
                registry.lock().handle(&id, &envelope);
            }
            Err(err) => {
                tracing::warn!(id = %ShortId(&id), error = %err, "closing connection after frame error");
                break;
            }
        }
    }

    let released = registry.lock().disconnect(&id);
    tracing::info!(id = %ShortId(&id), "connection closed");

    if let (Some(code), Some(hook)) = (released, release_hook) {
        hook(&code);
    }
}

/// Writer task tied to the lifetime of its connection task, including when
/// that task is aborted on shutdown.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use sigrelay_wire::{event, Envelope, FromRelay, ToRelay};

    use super::*;

    type Client = Framed<TcpStream, EnvelopeCodec>;

    async fn start(server: RelayServer) -> (SocketAddr, Arc<Mutex<Registry>>) {
        let addr = server.local_addr().expect("server should have an address");
        let registry = server.registry();
        tokio::spawn(server.serve());
        (addr, registry)
    }

    async fn local_server() -> RelayServer {
        let config = RelayConfig::default().with_bind("127.0.0.1:0".parse().expect("addr"));
        RelayServer::bind(config).await.expect("relay should bind")
    }

    async fn client(addr: SocketAddr) -> (Client, String) {
        let stream = TcpStream::connect(addr).await.expect("client should connect");
        let mut client = Framed::new(stream, EnvelopeCodec::new());
        let hello = recv(&mut client).await;
        let Ok(FromRelay::ClientId { id }) = FromRelay::try_from(&hello) else {
            panic!("expected CLIENT_ID, got {hello:?}");
        };
        (client, id)
    }

    async fn recv(client: &mut Client) -> Envelope {
        tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("envelope should arrive in time")
            .expect("stream should stay open")
            .expect("envelope should decode")
    }

    fn upgrade(code: &str) -> Envelope {
        ToRelay::ReceiverUpgrade {
            code: code.to_string(),
        }
        .into()
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn offer_roundtrip_through_tcp() {
        let (addr, registry) = start(local_server().await).await;

        let (mut receiver, receiver_id) = client(addr).await;
        let (mut initiator, initiator_id) = client(addr).await;

        receiver.send(upgrade("game")).await.expect("upgrade should send");
        wait_until(|| registry.lock().find_receiver("GAME").is_some()).await;

        initiator
            .send(Envelope::from(ToRelay::Offer {
                receiver_id: "GaMe".into(),
                offer: json!({"sdp": "o"}),
            }))
            .await
            .expect("offer should send");
        let offer = recv(&mut receiver).await;
        assert_eq!(
            offer,
            Envelope::new(event::OFFER, json!({"offer": {"sdp": "o"}, "initiatorId": initiator_id}))
        );

        receiver
            .send(Envelope::from(ToRelay::Answer {
                initiator_id: initiator_id.clone(),
                answer: json!({"sdp": "a"}),
            }))
            .await
            .expect("answer should send");
        let answer = recv(&mut initiator).await;
        assert_eq!(answer, Envelope::new(event::ANSWER, json!({"answer": {"sdp": "a"}})));
        assert_eq!(registry.lock().find_receiver("game"), Some(receiver_id.as_str()));
    }

    #[tokio::test]
    async fn unknown_code_gets_not_found() {
        let (addr, _registry) = start(local_server().await).await;
        let (mut initiator, _) = client(addr).await;

        initiator
            .send(Envelope::from(ToRelay::Offer {
                receiver_id: "NONE".into(),
                offer: json!({}),
            }))
            .await
            .expect("offer should send");

        assert_eq!(
            recv(&mut initiator).await,
            Envelope::new(event::NOT_FOUND, json!({"receiverId": "NONE"}))
        );
    }

    #[tokio::test]
    async fn receiver_disconnect_releases_code_through_hook() {
        let released = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&released);
        let server = local_server()
            .await
            .with_release_hook(move |code| sink.lock().push(code.to_string()));
        let (addr, registry) = start(server).await;

        let (mut receiver, _) = client(addr).await;
        receiver.send(upgrade("ab12")).await.expect("upgrade should send");
        wait_until(|| registry.lock().receiver_count() == 1).await;

        drop(receiver);
        wait_until(|| !released.lock().is_empty()).await;

        assert_eq!(*released.lock(), vec!["AB12".to_string()]);
        assert_eq!(registry.lock().find_receiver("AB12"), None);
        wait_until(|| registry.lock().is_empty()).await;
    }

    #[tokio::test]
    async fn superseded_receiver_disconnect_is_not_reported() {
        let released = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&released);
        let server = local_server()
            .await
            .with_release_hook(move |code| sink.lock().push(code.to_string()));
        let (addr, registry) = start(server).await;

        let (mut first, first_id) = client(addr).await;
        first.send(upgrade("ab12")).await.expect("upgrade should send");
        wait_until(|| registry.lock().find_receiver("AB12") == Some(first_id.as_str())).await;

        let (mut second, second_id) = client(addr).await;
        second.send(upgrade("AB12")).await.expect("upgrade should send");
        wait_until(|| registry.lock().find_receiver("AB12") == Some(second_id.as_str())).await;

        drop(first);
        wait_until(|| registry.lock().len() == 1).await;
        assert!(released.lock().is_empty());
        assert_eq!(registry.lock().find_receiver("AB12"), Some(second_id.as_str()));

        drop(second);
        wait_until(|| !released.lock().is_empty()).await;
        assert_eq!(*released.lock(), vec!["AB12".to_string()]);
    }

    #[tokio::test]
    async fn corrupt_stream_closes_only_that_connection() {
        use tokio::io::AsyncWriteExt;

        let (addr, registry) = start(local_server().await).await;
        let (_healthy, _) = client(addr).await;

        let mut raw = TcpStream::connect(addr).await.expect("raw client should connect");
        wait_until(|| registry.lock().len() == 2).await;
        raw.write_all(b"GARBAGE!").await.expect("write should succeed");

        wait_until(|| registry.lock().len() == 1).await;
    }

    #[tokio::test]
    async fn shutdown_stops_serving() {
        let server = local_server().await;
        let addr = server.local_addr().expect("server should have an address");
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(server.serve_with_shutdown(async {
            let _ = stop_rx.await;
        }));

        let (mut connected, _) = client(addr).await;
        stop_tx.send(()).expect("server should be waiting");
        task.await
            .expect("serve task should join")
            .expect("serve should return cleanly");

        let next = tokio::time::timeout(Duration::from_secs(5), connected.next())
            .await
            .expect("connection should close in time");
        assert!(next.is_none() || next.is_some_and(|item| item.is_err()));
    }
}
