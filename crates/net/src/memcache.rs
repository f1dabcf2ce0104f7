//! Memcached-compatible front-end (`spec.md` §4.6).
//!
//! Grounded in `original_source/network/memcache.go`: a line-oriented ASCII
//! server on its own (non-TLS) TCP port that translates `get`/`set`/
//! `delete`/`exit` into calls on the cluster server. The original tracks
//! open connections in `map[string]net.Conn` so `Stop()` can force-close
//! them; here that becomes a `DashMap<String, Arc<Notify>>` since Rust has
//! no equivalent of calling `.Close()` on another goroutine's socket — each
//! connection's read loop instead races a `read_line` against its own
//! shutdown `Notify` in a `select!`.

use crate::server::ClusterServer;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;

/// Line-oriented memcached-protocol front-end, backed by a [`ClusterServer`].
pub struct MemcacheServer {
    port: u16,
    cluster: Arc<ClusterServer>,
    connections: DashMap<String, Arc<Notify>>,
    running: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
}

impl MemcacheServer {
    pub fn new(port: u16, cluster: Arc<ClusterServer>) -> Arc<Self> {
        Arc::new(Self {
            port,
            cluster,
            connections: DashMap::new(),
            running: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(Notify::new()),
        })
    }

    /// Binds `0.0.0.0:<port>` and accepts client connections until
    /// [`Self::stop`] is called.
    pub async fn start(self: &Arc<Self>) -> std::io::Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", self.port)).await?;
        self.running.store(true, Ordering::SeqCst);
        tracing::info!(port = self.port, "memcache front-end listening");

        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = this.shutdown.notified() => {
                        tracing::info!("memcache front-end stopping accept loop");
                        return;
                    }
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, remote_addr)) => {
                                let addr = remote_addr.to_string();
                                tracing::info!(%addr, "memcache connection accepted");
                                let notify = Arc::new(Notify::new());
                                this.connections.insert(addr.clone(), Arc::clone(&notify));
                                let this2 = Arc::clone(&this);
                                tokio::spawn(async move {
                                    this2.handle_connection(addr.clone(), stream, notify).await;
                                    this2.connections.remove(&addr);
                                });
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "memcache accept failed");
                            }
                        }
                    }
                }
            }
        });
        Ok(())
    }

    /// Stops accepting new connections and force-closes every open one.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_waiters();
        for entry in self.connections.iter() {
            entry.value().notify_waiters();
        }
    }

    async fn handle_connection(&self, addr: String, stream: TcpStream, notify: Arc<Notify>) {
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();

        loop {
            line.clear();
            let read = tokio::select! {
                _ = notify.notified() => {
                    tracing::debug!(%addr, "memcache connection force-closed");
                    break;
                }
                result = reader.read_line(&mut line) => result,
            };
            let n = match read {
                Ok(n) => n,
                Err(e) => {
                    tracing::debug!(%addr, error = %e, "memcache read error");
                    break;
                }
            };
            if n == 0 {
                break; // EOF
            }

            let trimmed = line.trim_end_matches(['\r', '\n']);
            let args: Vec<&str> = trimmed.split(' ').filter(|s| !s.is_empty()).collect();

            if args.is_empty() {
                if write_half.write_all(b"ERROR\r\n").await.is_err() {
                    break;
                }
                continue;
            }

            let should_close = match args[0] {
                "exit" => {
                    let _ = write_half.write_all(b"END\r\n").await;
                    true
                }
                "set" => {
                    self.handle_set(&addr, &mut reader, &mut write_half, &args).await;
                    false
                }
                "get" => {
                    self.handle_get(&addr, &mut write_half, &args).await;
                    false
                }
                "delete" => {
                    self.handle_delete(&addr, &mut write_half, &args).await;
                    false
                }
                _ => {
                    let _ = write_half.write_all(b"ERROR\r\n").await;
                    false
                }
            };
            if should_close {
                break;
            }
        }
        tracing::debug!(%addr, "memcache connection closed");
    }

    async fn handle_set(
        &self,
        addr: &str,
        reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>,
        writer: &mut tokio::net::tcp::OwnedWriteHalf,
        args: &[&str],
    ) {
        // args: ["set", key, flags, exptime, bytes, ("noreply")?]
        if args.len() < 5 || args.len() > 6 {
            let _ = writer.write_all(b"ERROR\r\n").await;
            return;
        }
        let key = args[1];
        let noreply = args.get(5).map(|s| *s == "noreply").unwrap_or(false);

        let flags: i64 = match args[2].parse() {
            Ok(v) => v,
            Err(_) => {
                let _ = writer.write_all(b"SERVER_ERROR\r\n").await;
                return;
            }
        };
        let exptime: i64 = match args[3].parse() {
            Ok(v) => v,
            Err(_) => {
                let _ = writer.write_all(b"SERVER_ERROR\r\n").await;
                return;
            }
        };
        let byte_count: usize = match args[4].parse() {
            Ok(v) => v,
            Err(_) => {
                let _ = writer.write_all(b"SERVER_ERROR\r\n").await;
                return;
            }
        };

        let mut data = vec![0u8; byte_count];
        if reader.read_exact(&mut data).await.is_err() {
            let _ = writer.write_all(b"SERVER_ERROR\r\n").await;
            return;
        }
        let mut crlf = [0u8; 2];
        if reader.read_exact(&mut crlf).await.is_err() {
            let _ = writer.write_all(b"SERVER_ERROR\r\n").await;
            return;
        }

        let flags = (flags & 0xFFFF) as i16;
        let expires_at = if exptime == 0 {
            None
        } else {
            Some(SystemTime::now() + Duration::from_secs(exptime.max(0) as u64))
        };

        tracing::debug!(%addr, key, "memcache set");
        self.cluster.set(key, data, flags, expires_at).await;

        if !noreply {
            let _ = writer.write_all(b"STORED\r\n").await;
        }
    }

    async fn handle_get(&self, addr: &str, writer: &mut tokio::net::tcp::OwnedWriteHalf, args: &[&str]) {
        if args.len() != 2 {
            let _ = writer.write_all(b"ERROR\r\n").await;
            return;
        }
        let key = args[1];
        tracing::debug!(%addr, key, "memcache get");
        match self.cluster.get(key).await {
            Some((data, flags)) => {
                let header = format!("VALUE {} {} {}\r\n", key, flags, data.len());
                let _ = writer.write_all(header.as_bytes()).await;
                let _ = writer.write_all(&data).await;
                let _ = writer.write_all(b"\r\n").await;
            }
            None => {}
        }
        let _ = writer.write_all(b"END\r\n").await;
    }

    async fn handle_delete(&self, addr: &str, writer: &mut tokio::net::tcp::OwnedWriteHalf, args: &[&str]) {
        if args.len() != 2 {
            let _ = writer.write_all(b"ERROR\r\n").await;
            return;
        }
        let key = args[1];
        tracing::debug!(%addr, key, "memcache delete");
        let found = self.cluster.delete(key).await;
        let response: &[u8] = if found { b"DELETED\r\n" } else { b"NOT_FOUND\r\n" };
        let _ = writer.write_all(response).await;
    }
}
