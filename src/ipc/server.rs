//! Socket thread: accepts connections, frames lines and relays requests to
//! the reactor. Nothing here touches service state.

use std::io;
use std::os::unix::net::UnixListener as StdUnixListener;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Context;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::UnixListenerStream;
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::protocol::{ClientId, Request, Response};
use super::subscriptions::SharedServerState;
use crate::actor::reactor::{self, Event};

/// Requests longer than this are rejected and the connection dropped.
pub const MAX_LINE: usize = 1 << 20;

pub const TICK: Duration = Duration::from_millis(500);

static NEXT_CLIENT: AtomicU64 = AtomicU64::new(1);

/// `$XDG_RUNTIME_DIR/hud-service.sock`, else a per-user path under `/tmp`.
pub fn default_socket_path() -> PathBuf {
    match dirs::runtime_dir() {
        Some(dir) => dir.join("hud-service.sock"),
        None => PathBuf::from(format!("/tmp/hud-service-{}.sock", nix::unistd::getuid())),
    }
}

pub struct IpcServer {
    path: PathBuf,
    listener: StdUnixListener,
    state: SharedServerState,
    events: reactor::Sender,
}

impl IpcServer {
    /// Binds the socket now so startup errors are reported before the
    /// service runs. A stale socket file is replaced.
    pub fn bind(path: &Path, state: SharedServerState, events: reactor::Sender) -> anyhow::Result<Self> {
        if path.exists() {
            if std::os::unix::net::UnixStream::connect(path).is_ok() {
                anyhow::bail!("another service is listening on {}", path.display());
            }
            std::fs::remove_file(path).with_context(|| format!("removing stale {}", path.display()))?;
        }
        let listener =
            StdUnixListener::bind(path).with_context(|| format!("binding {}", path.display()))?;
        listener.set_nonblocking(true)?;
        info!(path = %path.display(), "listening");
        Ok(Self { path: path.to_path_buf(), listener, state, events })
    }

    pub fn path(&self) -> &Path { &self.path }

    /// Serves on a dedicated thread until the reactor goes away.
    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new().name("hud-ipc".into()).spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(runtime) => runtime,
                Err(e) => {
                    error!("cannot start socket runtime: {e}");
                    return;
                }
            };
            runtime.block_on(self.serve());
        })
    }

    async fn serve(self) {
        let IpcServer { path, listener, state, events } = self;
        let listener = match tokio::net::UnixListener::from_std(listener) {
            Ok(listener) => listener,
            Err(e) => {
                error!("cannot register socket: {e}");
                return;
            }
        };
        let mut incoming = UnixListenerStream::new(listener);
        let mut ticks = tokio::time::interval(TICK);
        ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(terminate) => terminate,
            Err(e) => {
                error!("cannot watch for SIGTERM: {e}");
                return;
            }
        };
        let interrupted = tokio::signal::ctrl_c();
        tokio::pin!(interrupted);

        loop {
            tokio::select! {
                conn = incoming.next() => match conn {
                    Some(Ok(stream)) => {
                        let client = ClientId::nth(NEXT_CLIENT.fetch_add(1, Ordering::Relaxed));
                        let span = info_span!("client", %client);
                        tokio::spawn(handle_client(stream, client, state.clone(), events.clone()).instrument(span));
                    }
                    Some(Err(e)) => warn!("accept failed: {e}"),
                    None => break,
                },
                _ = ticks.tick() => {
                    if events.try_send(Event::Tick).is_err() {
                        debug!("reactor gone, stopping socket thread");
                        break;
                    }
                }
                _ = &mut interrupted => {
                    info!("interrupted");
                    events.send(Event::Shutdown);
                    break;
                }
                _ = terminate.recv() => {
                    info!("terminated");
                    events.send(Event::Shutdown);
                    break;
                }
            }
        }
        if let Err(e) = std::fs::remove_file(&path) {
            debug!("socket cleanup: {e}");
        }
    }
}

async fn handle_client(stream: UnixStream, client: ClientId, state: SharedServerState, events: reactor::Sender) {
    let (read, mut write) = stream.into_split();
    let mut lines = FramedRead::new(read, LinesCodec::new_with_max_length(MAX_LINE));
    let (outlet, mut notifications) = mpsc::unbounded_channel::<String>();
    state.read().register_client(client.clone(), outlet);
    events.send(Event::ClientConnected(client.clone()));
    debug!("connected");

    loop {
        let line = tokio::select! {
            line = lines.next() => match line {
                Some(Ok(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let response = dispatch(&client, &line, &events).await;
                    match serde_json::to_string(&response) {
                        Ok(json) => json,
                        Err(e) => {
                            error!("cannot encode response: {e}");
                            continue;
                        }
                    }
                }
                Some(Err(e)) => {
                    warn!("dropping connection: {e}");
                    break;
                }
                None => break,
            },
            Some(event) = notifications.recv() => event,
        };
        if let Err(e) = write_line(&mut write, &line).await {
            debug!("write failed: {e}");
            break;
        }
    }

    state.read().remove_client(&client);
    events.send(Event::ClientDisconnected(client));
    debug!("disconnected");
}

async fn dispatch(client: &ClientId, line: &str, events: &reactor::Sender) -> Response {
    let request: Request = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => return Response::invalid(format!("malformed request: {e}")),
    };
    let (reply, response) = oneshot::channel();
    if events.try_send(Event::Request { client: client.clone(), request, reply }).is_err() {
        return Response::failed("service is shutting down");
    }
    response.await.unwrap_or_else(|_| Response::failed("service is shutting down"))
}

async fn write_line(write: &mut (impl AsyncWriteExt + Unpin), line: &str) -> io::Result<()> {
    write.write_all(line.as_bytes()).await?;
    write.write_all(b"\n").await?;
    write.flush().await
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::actor;
    use crate::ipc::ServerState;

    #[tokio::test]
    async fn malformed_lines_are_answered_locally() {
        let (tx, mut rx) = actor::channel::<Event>();
        let response = dispatch(&ClientId::nth(1), "{not json", &tx).await;
        assert!(response.is_error());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn requests_are_relayed_with_a_reply_channel() {
        let (tx, mut rx) = actor::channel::<Event>();
        let client = ClientId::nth(9);
        let pending = tokio::spawn({
            let client = client.clone();
            async move { dispatch(&client, r#"{"method": "get_open_queries"}"#, &tx).await }
        });
        let Some((_, Event::Request { client: from, request, reply })) = rx.recv().await else {
            panic!("expected a request");
        };
        assert_eq!(from, client);
        assert_eq!(request, Request::GetOpenQueries);
        reply.send(Response::ok(Vec::<String>::new())).unwrap();
        assert_eq!(pending.await.unwrap(), Response::ok(Vec::<String>::new()));
    }

    #[tokio::test]
    async fn dropped_reactor_fails_requests() {
        let (tx, rx) = actor::channel::<Event>();
        drop(rx);
        let response = dispatch(&ClientId::nth(2), r#"{"method": "get_applications"}"#, &tx).await;
        assert_eq!(response, Response::failed("service is shutting down"));
    }

    #[test]
    fn stale_sockets_are_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hud.sock");
        drop(StdUnixListener::bind(&path).unwrap());
        assert!(path.exists());

        let (tx, _rx) = actor::channel::<Event>();
        let server = IpcServer::bind(&path, ServerState::shared(), tx.clone()).unwrap();
        assert_eq!(server.path(), path);
        assert!(IpcServer::bind(&path, ServerState::shared(), tx).is_err());
    }
}
