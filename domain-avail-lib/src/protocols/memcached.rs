//! Memcached ASCII protocol backend for the result cache.
//!
//! Only the two commands the cache needs are spoken: `get` and `set`. Each
//! operation opens its own connection, so concurrent queries never wait on
//! one another for a socket.

use crate::cache::CacheBackend;
use crate::error::DomainAvailError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

/// Longest key memcached accepts.
const MAX_KEY_LENGTH: usize = 250;

/// Largest value we will read back. Stored statuses are at most 11 bytes.
const MAX_VALUE_LENGTH: usize = 1024;

/// Expiry values above this are read by memcached as absolute Unix times.
const MAX_RELATIVE_EXPIRY: u64 = 30 * 24 * 60 * 60;

/// Shared cache backend talking to a memcached server.
#[derive(Debug, Clone)]
pub struct MemcachedCache {
    /// `host:port` of the memcached server
    server: String,
}

impl MemcachedCache {
    /// Create a backend for the server at `host:port`.
    pub fn new(server: String) -> Self {
        Self { server }
    }

    async fn connect(&self) -> Result<BufReader<TcpStream>, DomainAvailError> {
        let stream = TcpStream::connect(&self.server).await.map_err(|e| {
            DomainAvailError::cache(
                "memcached",
                format!("Failed to connect to {}: {}", self.server, e),
            )
        })?;
        Ok(BufReader::new(stream))
    }
}

#[async_trait]
impl CacheBackend for MemcachedCache {
    fn name(&self) -> &'static str {
        "memcached"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, DomainAvailError> {
        let mut conn = self.connect().await?;
        memcached_get(&mut conn, key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), DomainAvailError> {
        let mut conn = self.connect().await?;
        memcached_set(&mut conn, key, value, ttl).await
    }
}

fn check_key(key: &str) -> Result<(), DomainAvailError> {
    if key.is_empty()
        || key.len() > MAX_KEY_LENGTH
        || key.chars().any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(DomainAvailError::cache(
            "memcached",
            format!("Key '{}' is not a valid memcached key", key),
        ));
    }
    Ok(())
}

fn protocol_error(message: String) -> DomainAvailError {
    DomainAvailError::cache("memcached", message)
}

fn io_error(err: std::io::Error) -> DomainAvailError {
    DomainAvailError::cache("memcached", format!("I/O error: {}", err))
}

/// Issue `get <key>` and parse the single-value reply.
pub(crate) async fn memcached_get<S>(
    conn: &mut BufReader<S>,
    key: &str,
) -> Result<Option<String>, DomainAvailError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    check_key(key)?;

    conn.write_all(format!("get {}\r\n", key).as_bytes())
        .await
        .map_err(io_error)?;
    conn.flush().await.map_err(io_error)?;

    let mut header = String::new();
    conn.read_line(&mut header).await.map_err(io_error)?;
    let header = header.trim_end();

    if header == "END" {
        return Ok(None);
    }

    // VALUE <key> <flags> <bytes> [<cas unique>]
    let fields: Vec<&str> = header.split(' ').collect();
    if fields.len() < 4 || fields[0] != "VALUE" {
        return Err(protocol_error(format!("Unexpected reply to get: '{}'", header)));
    }
    let length: usize = fields[3]
        .parse()
        .map_err(|_| protocol_error(format!("Bad value length in '{}'", header)))?;
    if length > MAX_VALUE_LENGTH {
        return Err(protocol_error(format!(
            "Value of {} bytes exceeds the {} byte limit",
            length, MAX_VALUE_LENGTH
        )));
    }

    let mut data = vec![0u8; length + 2];
    conn.read_exact(&mut data).await.map_err(io_error)?;
    if !data.ends_with(b"\r\n") {
        return Err(protocol_error("Value block not terminated by CRLF".to_string()));
    }
    data.truncate(length);

    let mut trailer = String::new();
    conn.read_line(&mut trailer).await.map_err(io_error)?;
    if trailer.trim_end() != "END" {
        return Err(protocol_error(format!(
            "Expected END after value, got '{}'",
            trailer.trim_end()
        )));
    }

    String::from_utf8(data)
        .map(Some)
        .map_err(|_| protocol_error("Stored value is not UTF-8".to_string()))
}

/// Issue `set <key> 0 <ttl> <bytes>` and expect `STORED`.
///
/// The TTL is clamped to `1..=30 days` so it is always read as relative.
pub(crate) async fn memcached_set<S>(
    conn: &mut BufReader<S>,
    key: &str,
    value: &str,
    ttl: Duration,
) -> Result<(), DomainAvailError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    check_key(key)?;

    let command = format!(
        "set {} 0 {} {}\r\n{}\r\n",
        key,
        ttl.as_secs().clamp(1, MAX_RELATIVE_EXPIRY),
        value.len(),
        value
    );
    conn.write_all(command.as_bytes()).await.map_err(io_error)?;
    conn.flush().await.map_err(io_error)?;

    let mut reply = String::new();
    conn.read_line(&mut reply).await.map_err(io_error)?;

    match reply.trim_end() {
        "STORED" => Ok(()),
        other => Err(protocol_error(format!("Unexpected reply to set: '{}'", other))),
    }
}
