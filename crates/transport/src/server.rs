//! A blocking accept loop that spawns one worker thread per accepted
//! connection (`spec.md` §4.1 "Concurrency", §5 "Scheduling model").

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::framed::FramedConnection;

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

struct ConnectedClient {
    addr: SocketAddr,
    stream: TcpStream,
}

/// Accepts connections on a listening socket and hands each one to a
/// caller-supplied handler on its own thread. `shutdown()` unblocks the
/// accept loop and asks every live client connection to close.
pub struct Server {
    listener: TcpListener,
    running: Arc<AtomicBool>,
    clients: Arc<Mutex<Vec<ConnectedClient>>>,
    accept_thread: Option<JoinHandle<()>>,
}

impl Server {
    pub fn bind(addr: impl std::net::ToSocketAddrs) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)?;
        // Non-blocking + a short poll interval is how this accept loop
        // stays cancellable without unsafely tearing down the listening fd
        // from another thread (see DESIGN.md).
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener,
            running: Arc::new(AtomicBool::new(false)),
            clients: Arc::new(Mutex::new(Vec::new())),
            accept_thread: None,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Start accepting connections. `handler` runs on a fresh thread per
    /// accepted connection and owns that connection for its lifetime.
    pub fn start<F>(&mut self, handler: F)
    where
        F: Fn(FramedConnection) + Send + Sync + 'static,
    {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let listener = self.listener.try_clone().expect("clone listening socket");
        let running = self.running.clone();
        let clients = self.clients.clone();
        let handler = Arc::new(handler);

        self.accept_thread = Some(std::thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                match listener.accept() {
                    Ok((stream, addr)) => {
                        info!(%addr, "accepted connection");
                        let tracked = stream.try_clone().expect("clone accepted socket");
                        clients
                            .lock()
                            .unwrap()
                            .push(ConnectedClient { addr, stream: tracked });

                        let clients = clients.clone();
                        let handler = handler.clone();
                        std::thread::spawn(move || {
                            let conn = FramedConnection::new(stream);
                            handler(conn);
                            clients.lock().unwrap().retain(|c| c.addr != addr);
                            debug!(%addr, "connection worker finished");
                        });
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        std::thread::sleep(ACCEPT_POLL_INTERVAL);
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed, closing this connection attempt");
                    }
                }
            }
        }));
    }

    /// True if a client at `addr` is currently tracked as connected.
    pub fn is_connected(&self, addr: &SocketAddr) -> bool {
        self.clients.lock().unwrap().iter().any(|c| &c.addr == addr)
    }

    pub fn connected_clients(&self) -> Vec<SocketAddr> {
        self.clients.lock().unwrap().iter().map(|c| c.addr).collect()
    }

    /// Unblock the accept loop, ask every tracked client to shut down, and
    /// block until the accept thread has exited.
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
        let mut clients = self.clients.lock().unwrap();
        for client in clients.drain(..) {
            let _ = client.stream.shutdown(std::net::Shutdown::Both);
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if self.running.load(Ordering::SeqCst) {
            self.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn accepts_a_connection_and_echoes() {
        let mut server = Server::bind("127.0.0.1:0").unwrap();
        let addr = server.local_addr().unwrap();
        let (tx, rx) = mpsc::channel();
        server.start(move |mut conn| {
            if let Ok(Some(payload)) = conn.receive() {
                let _ = conn.send(&payload);
            }
            let _ = tx.send(());
        });

        let mut client = crate::framed::FramedConnection::new(
            TcpStream::connect(addr).unwrap(),
        );
        client.send(b"ping").unwrap();
        assert_eq!(client.receive().unwrap(), Some(b"ping".to_vec()));
        rx.recv_timeout(Duration::from_secs(2)).unwrap();

        server.shutdown();
    }

    #[test]
    fn shutdown_unblocks_accept_and_closes_clients() {
        let mut server = Server::bind("127.0.0.1:0").unwrap();
        let addr = server.local_addr().unwrap();
        server.start(|mut conn| {
            // Block on a read that will never complete on its own --
            // shutdown() must still force it closed.
            let _ = conn.receive();
        });

        let _client = TcpStream::connect(addr).unwrap();
        std::thread::sleep(Duration::from_millis(200));
        server.shutdown();
        assert!(server.connected_clients().is_empty());
    }
}
