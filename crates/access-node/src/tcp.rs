//! TCP fabric
//!
//! Each node listens on one address. Frames are JSON lines `{"topic": …, "payload": …}`;
//! a static route table maps every topic to the addresses it is delivered to. Outbound
//! links are opened lazily, one writer task per peer, retrying the connection until the
//! peer's listener is up.

use crate::config::ConnectPolicy;
use crate::fabric::{Fabric, LocalRouter, Subscription, Topic};
use crate::{NodeError, NodeResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Serialize, Deserialize)]
struct Frame {
    topic: Topic,
    payload: String,
}

/// Fabric over plain TCP connections
#[derive(Debug)]
pub struct TcpFabric {
    local_addr: SocketAddr,
    router: Arc<LocalRouter>,
    routes: HashMap<Topic, Vec<String>>,
    links: Mutex<HashMap<String, mpsc::UnboundedSender<String>>>,
    policy: ConnectPolicy,
    accept_task: JoinHandle<()>,
}

impl TcpFabric {
    /// Listen on `listen` and deliver published topics along `routes`
    pub async fn bind(
        listen: &str,
        routes: HashMap<Topic, Vec<String>>,
        policy: ConnectPolicy,
    ) -> NodeResult<Self> {
        let listener = TcpListener::bind(listen).await?;
        let local_addr = listener.local_addr()?;
        let router = Arc::new(LocalRouter::default());
        let accept_task = tokio::spawn(accept_loop(listener, router.clone()));

        log::info!("Listening on {}", local_addr);

        Ok(TcpFabric {
            local_addr,
            router,
            routes,
            links: Mutex::new(HashMap::new()),
            policy,
            accept_task,
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn link(&self, addr: &str) -> mpsc::UnboundedSender<String> {
        let mut links = self.links.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = links.get(addr) {
            if !tx.is_closed() {
                return tx.clone();
            }
        }
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(addr.to_string(), rx, self.policy));
        links.insert(addr.to_string(), tx.clone());
        tx
    }
}

impl Drop for TcpFabric {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

#[async_trait]
impl Fabric for TcpFabric {
    async fn publish(&self, topic: Topic, payload: String) -> NodeResult<()> {
        let targets = self
            .routes
            .get(&topic)
            .ok_or_else(|| NodeError::Config(format!("no route for topic {}", topic)))?;

        let mut line = serde_json::to_string(&Frame { topic, payload })?;
        line.push('\n');

        for addr in targets {
            if self.link(addr).send(line.clone()).is_err() {
                log::warn!("Link to {} closed, dropping {} frame", addr, topic);
            }
        }
        Ok(())
    }

    async fn subscribe(&self, topic: Topic) -> NodeResult<Subscription> {
        Ok(self.router.subscribe(topic))
    }
}

async fn accept_loop(listener: TcpListener, router: Arc<LocalRouter>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                log::debug!("Accepted connection from {}", peer);
                tokio::spawn(read_loop(stream, peer, router.clone()));
            }
            Err(e) => log::warn!("Accept failed: {}", e),
        }
    }
}

async fn read_loop(stream: TcpStream, peer: SocketAddr, router: Arc<LocalRouter>) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match serde_json::from_str::<Frame>(&line) {
                Ok(frame) => router.dispatch(frame.topic, frame.payload),
                Err(e) => log::warn!("Dropping malformed frame from {}: {}", peer, e),
            },
            Ok(None) => break,
            Err(e) => {
                log::warn!("Read from {} failed: {}", peer, e);
                break;
            }
        }
    }
    log::debug!("Connection from {} closed", peer);
}

/// Connect to `addr`, retrying per `policy`
pub async fn connect(addr: &str, policy: ConnectPolicy) -> NodeResult<TcpStream> {
    for attempt in 1..=policy.attempts {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                log::debug!("Connect to {} attempt {}/{}: {}", addr, attempt, policy.attempts, e);
                tokio::time::sleep(policy.backoff).await;
            }
        }
    }
    Err(NodeError::ConnectFailed {
        addr: addr.to_string(),
        attempts: policy.attempts,
    })
}

async fn write_loop(addr: String, mut rx: mpsc::UnboundedReceiver<String>, policy: ConnectPolicy) {
    let mut stream = match connect(&addr, policy).await {
        Ok(stream) => stream,
        Err(e) => {
            log::error!("{}", e);
            return;
        }
    };

    while let Some(line) = rx.recv().await {
        if let Err(e) = stream.write_all(line.as_bytes()).await {
            log::warn!("Write to {} failed ({}), reconnecting", addr, e);
            stream = match connect(&addr, policy).await {
                Ok(stream) => stream,
                Err(e) => {
                    log::error!("{}", e);
                    return;
                }
            };
            if let Err(e) = stream.write_all(line.as_bytes()).await {
                log::error!("Write to {} failed again: {}", addr, e);
                return;
            }
        }
    }
}
