// RESP2 client for the shared key-value store.
//
// Only the handful of commands the coordination layer needs are wrapped:
// SET .. PX .. NX, GET, DEL, EVAL (compare-and-delete), PUBLISH, SUBSCRIBE,
// PING and SELECT. The codec is written against the wire grammar rather than
// any client library so the connection semantics (timeouts, health probes)
// stay explicit.
use async_trait::async_trait;
use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::kv::{KvError, KvResult, KvStore};

// Canonical compare-and-delete: remove the key only while it still holds the
// caller's marker.
const UNLOCK_SCRIPT: &str =
    "if redis.call('get', KEYS[1]) == ARGV[1] then return redis.call('del', KEYS[1]) else return 0 end";

/// One parsed server reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Option<Bytes>),
    Array(Option<Vec<Reply>>),
}

/// Encodes a command as a RESP array of bulk strings.
pub fn encode_command(args: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + args.iter().map(|a| a.len() + 12).sum::<usize>());
    out.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());
    for arg in args {
        out.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
    out
}

async fn read_crlf_line<R>(reader: &mut R) -> KvResult<String>
where
    R: AsyncBufRead + Unpin + Send,
{
    let mut line = String::new();
    let read = reader.read_line(&mut line).await?;
    if read == 0 {
        return Err(KvError::Protocol("connection closed".into()));
    }
    if !line.ends_with("\r\n") {
        return Err(KvError::Protocol("truncated reply line".into()));
    }
    line.truncate(line.len() - 2);
    Ok(line)
}

/// Reads a single reply. Boxed because arrays recurse.
pub fn read_reply<'a, R>(
    reader: &'a mut R,
) -> Pin<Box<dyn Future<Output = KvResult<Reply>> + Send + 'a>>
where
    R: AsyncBufRead + Unpin + Send,
{
    Box::pin(async move {
        let line = read_crlf_line(reader).await?;
        let (kind, rest) = line
            .split_at_checked(1)
            .ok_or_else(|| KvError::Protocol("empty reply line".into()))?;
        match kind {
            "+" => Ok(Reply::Simple(rest.to_string())),
            "-" => Ok(Reply::Error(rest.to_string())),
            ":" => rest
                .parse::<i64>()
                .map(Reply::Integer)
                .map_err(|_| KvError::Protocol(format!("bad integer reply: {rest}"))),
            "$" => {
                let len = rest
                    .parse::<i64>()
                    .map_err(|_| KvError::Protocol(format!("bad bulk length: {rest}")))?;
                if len < 0 {
                    return Ok(Reply::Bulk(None));
                }
                let len = len as usize;
                let mut buf = vec![0u8; len + 2];
                reader.read_exact(&mut buf).await?;
                if &buf[len..] != b"\r\n" {
                    return Err(KvError::Protocol("bulk reply missing terminator".into()));
                }
                buf.truncate(len);
                Ok(Reply::Bulk(Some(Bytes::from(buf))))
            }
            "*" => {
                let len = rest
                    .parse::<i64>()
                    .map_err(|_| KvError::Protocol(format!("bad array length: {rest}")))?;
                if len < 0 {
                    return Ok(Reply::Array(None));
                }
                let mut items = Vec::with_capacity(len as usize);
                for _ in 0..len {
                    items.push(read_reply(reader).await?);
                }
                Ok(Reply::Array(Some(items)))
            }
            other => Err(KvError::Protocol(format!("unknown reply type: {other}"))),
        }
    })
}

/// A single framed connection to the store.
///
/// The command path carries a bounded read timeout; the pub/sub path passes
/// `None` because a subscriber parks indefinitely waiting for pushes.
pub struct RespConnection {
    stream: BufStream<TcpStream>,
    read_timeout: Option<Duration>,
    last_io: Instant,
    subscribed: bool,
}

impl RespConnection {
    pub async fn connect(
        addr: &str,
        connect_timeout: Duration,
        read_timeout: Option<Duration>,
    ) -> KvResult<Self> {
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| KvError::Timeout(connect_timeout))??;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream: BufStream::new(stream),
            read_timeout,
            last_io: Instant::now(),
            subscribed: false,
        })
    }

    pub fn idle_for(&self) -> Duration {
        self.last_io.elapsed()
    }

    pub async fn command(&mut self, args: &[&[u8]]) -> KvResult<Reply> {
        if self.subscribed {
            return Err(KvError::Protocol(
                "connection is in subscribe mode".into(),
            ));
        }
        let encoded = encode_command(args);
        self.stream.write_all(&encoded).await?;
        self.stream.flush().await?;
        let reply = self.read_timed().await?;
        self.last_io = Instant::now();
        match reply {
            Reply::Error(message) => Err(KvError::Server(message)),
            reply => Ok(reply),
        }
    }

    /// Sends SUBSCRIBE and consumes the confirmation push.
    pub async fn subscribe(&mut self, channel: &str) -> KvResult<()> {
        let encoded = encode_command(&[b"SUBSCRIBE", channel.as_bytes()]);
        self.stream.write_all(&encoded).await?;
        self.stream.flush().await?;
        let reply = self.read_timed().await?;
        self.last_io = Instant::now();
        match reply {
            Reply::Error(message) => Err(KvError::Server(message)),
            Reply::Array(Some(_)) => {
                self.subscribed = true;
                Ok(())
            }
            other => Err(KvError::Protocol(format!(
                "unexpected subscribe reply: {other:?}"
            ))),
        }
    }

    /// Blocks until the next published message arrives. Only valid after
    /// `subscribe`; non-message pushes are skipped.
    pub async fn next_message(&mut self) -> KvResult<(String, Bytes)> {
        if !self.subscribed {
            return Err(KvError::Protocol("connection is not subscribed".into()));
        }
        loop {
            let reply = read_reply(&mut self.stream).await?;
            self.last_io = Instant::now();
            let Reply::Array(Some(items)) = reply else {
                return Err(KvError::Protocol("unexpected push format".into()));
            };
            if let [
                Reply::Bulk(Some(kind)),
                Reply::Bulk(Some(channel)),
                Reply::Bulk(Some(payload)),
            ] = items.as_slice()
                && kind.as_ref() == b"message"
            {
                let channel = String::from_utf8_lossy(channel).into_owned();
                return Ok((channel, payload.clone()));
            }
        }
    }

    async fn read_timed(&mut self) -> KvResult<Reply> {
        match self.read_timeout {
            Some(limit) => tokio::time::timeout(limit, read_reply(&mut self.stream))
                .await
                .map_err(|_| KvError::Timeout(limit))?,
            None => read_reply(&mut self.stream).await,
        }
    }
}

/// A live handle to the remote store.
///
/// The connection is mutex-guarded request/response state; callers share the
/// handle freely and serialize on the socket. When the link has been idle
/// past the health-check interval a PING is issued before the next command so
/// a silently dead socket fails here instead of mid-operation.
pub struct RemoteKv {
    conn: Mutex<RespConnection>,
    health_check_interval: Duration,
}

impl RemoteKv {
    pub fn new(conn: RespConnection, health_check_interval: Duration) -> Self {
        Self {
            conn: Mutex::new(conn),
            health_check_interval,
        }
    }

    async fn command(&self, args: &[&[u8]]) -> KvResult<Reply> {
        let mut conn = self.conn.lock().await;
        if !conn.subscribed && conn.idle_for() >= self.health_check_interval {
            conn.command(&[b"PING"]).await?;
        }
        conn.command(args).await
    }

    pub async fn select(&self, db: u32) -> KvResult<()> {
        match self.command(&[b"SELECT", db.to_string().as_bytes()]).await? {
            Reply::Simple(_) => Ok(()),
            other => Err(KvError::Protocol(format!(
                "unexpected SELECT reply: {other:?}"
            ))),
        }
    }

    pub async fn subscribe(&self, channel: &str) -> KvResult<()> {
        self.conn.lock().await.subscribe(channel).await
    }

    pub async fn next_message(&self) -> KvResult<(String, Bytes)> {
        self.conn.lock().await.next_message().await
    }
}

#[async_trait]
impl KvStore for RemoteKv {
    async fn set_nx(&self, key: &str, value: Bytes, ttl: Duration) -> KvResult<bool> {
        let millis = ttl.as_millis().max(1).to_string();
        let reply = self
            .command(&[
                b"SET",
                key.as_bytes(),
                value.as_ref(),
                b"PX",
                millis.as_bytes(),
                b"NX",
            ])
            .await?;
        match reply {
            Reply::Simple(_) => Ok(true),
            // Nil reply means the key already existed and nothing was set.
            Reply::Bulk(None) => Ok(false),
            other => Err(KvError::Protocol(format!("unexpected SET reply: {other:?}"))),
        }
    }

    async fn get(&self, key: &str) -> KvResult<Option<Bytes>> {
        match self.command(&[b"GET", key.as_bytes()]).await? {
            Reply::Bulk(value) => Ok(value),
            other => Err(KvError::Protocol(format!("unexpected GET reply: {other:?}"))),
        }
    }

    async fn delete(&self, key: &str) -> KvResult<bool> {
        match self.command(&[b"DEL", key.as_bytes()]).await? {
            Reply::Integer(removed) => Ok(removed > 0),
            other => Err(KvError::Protocol(format!("unexpected DEL reply: {other:?}"))),
        }
    }

    async fn compare_delete(&self, key: &str, expected: &[u8]) -> KvResult<bool> {
        let reply = self
            .command(&[
                b"EVAL",
                UNLOCK_SCRIPT.as_bytes(),
                b"1",
                key.as_bytes(),
                expected,
            ])
            .await?;
        match reply {
            Reply::Integer(removed) => Ok(removed > 0),
            other => Err(KvError::Protocol(format!(
                "unexpected EVAL reply: {other:?}"
            ))),
        }
    }

    async fn publish(&self, channel: &str, payload: Bytes) -> KvResult<u64> {
        let reply = self
            .command(&[b"PUBLISH", channel.as_bytes(), payload.as_ref()])
            .await?;
        match reply {
            Reply::Integer(receivers) => Ok(receivers.max(0) as u64),
            other => Err(KvError::Protocol(format!(
                "unexpected PUBLISH reply: {other:?}"
            ))),
        }
    }

    async fn ping(&self) -> KvResult<()> {
        match self.command(&[b"PING"]).await? {
            Reply::Simple(_) => Ok(()),
            other => Err(KvError::Protocol(format!(
                "unexpected PING reply: {other:?}"
            ))),
        }
    }
}
