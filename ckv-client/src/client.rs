//! # Synchronous Client API
//!
//! Purpose: Implement the `Store` contract over RESP2 so the cache facade and
//! lock manager can drive a Redis-compatible server.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `KVClient` hides pooling and protocol details.
//! 2. **Borrow-Friendly API**: Accept `&[u8]` to avoid unnecessary copies.
//! 3. **Fail Fast**: Protocol violations surface immediately as errors.
//! 4. **One Round Trip**: Every `Store` call is exactly one command; the
//!    client never retries.

use std::time::Duration;

use ckv_common::{
    ttl_millis, CkvError, CkvResult, Order, Script, ScriptReply, SetCondition, Store, TtlStatus,
};
use thiserror::Error;

use crate::pool::{ConnectionPool, PoolConfig};
use crate::resp::{format_score, RespValue};

/// Result type for the sync client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the sync client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network or IO failure while reading/writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// RESP2 framing or parse error.
    #[error("protocol error")]
    Protocol,
    /// Server returned an error reply.
    #[error("server error: {}", String::from_utf8_lossy(.message))]
    Server { message: Vec<u8> },
    /// Response type did not match the expected command response.
    #[error("unexpected response")]
    UnexpectedResponse,
    /// Pool is at capacity and no idle connections are available.
    #[error("connection pool exhausted")]
    PoolExhausted,
    /// Address could not be parsed into a socket address.
    #[error("invalid address")]
    InvalidAddress,
}

impl ClientError {
    fn is_no_such_key(&self) -> bool {
        match self {
            ClientError::Server { message } => message
                .windows(b"no such key".len())
                .any(|window| window.eq_ignore_ascii_case(b"no such key")),
            _ => false,
        }
    }
}

impl From<ClientError> for CkvError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Io(_) | ClientError::PoolExhausted | ClientError::InvalidAddress => {
                CkvError::unavailable(err.to_string())
            }
            ClientError::Protocol | ClientError::Server { .. } | ClientError::UnexpectedResponse => {
                CkvError::failed(err.to_string())
            }
        }
    }
}

/// Configuration for the synchronous client and its pool.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address, e.g. "127.0.0.1:6379".
    pub addr: String,
    /// Maximum idle connections kept in the pool.
    pub max_idle: usize,
    /// Maximum total connections (idle + in-use).
    pub max_total: usize,
    /// Optional TCP read timeout.
    pub read_timeout: Option<Duration>,
    /// Optional TCP write timeout.
    pub write_timeout: Option<Duration>,
    /// Optional TCP connect timeout.
    pub connect_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            addr: "127.0.0.1:6379".to_string(),
            max_idle: 8,
            max_total: 16,
            read_timeout: None,
            write_timeout: None,
            connect_timeout: None,
        }
    }
}

/// Synchronous store client with connection pooling.
///
/// Each call acquires a connection, executes one command, and returns the
/// connection to the pool. The client is cheap to share behind an `Arc`.
pub struct KVClient {
    pool: ConnectionPool,
}

impl KVClient {
    /// Creates a client with default configuration.
    pub fn connect(addr: impl Into<String>) -> ClientResult<Self> {
        let config = ClientConfig {
            addr: addr.into(),
            ..ClientConfig::default()
        };
        Self::with_config(config)
    }

    /// Creates a client with a custom configuration.
    pub fn with_config(config: ClientConfig) -> ClientResult<Self> {
        let pool = ConnectionPool::new(PoolConfig {
            addr: config.addr,
            max_idle: config.max_idle,
            max_total: config.max_total,
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
            connect_timeout: config.connect_timeout,
        })?;
        Ok(KVClient { pool })
    }

    fn command(&self, args: &[&[u8]]) -> ClientResult<RespValue> {
        let mut conn = self.pool.acquire()?;
        conn.exec(args)
    }
}

fn millis(ttl: Duration) -> String {
    ttl_millis(ttl).to_string()
}

impl Store for KVClient {
    fn exists(&self, key: &[u8]) -> CkvResult<bool> {
        Ok(self.command(&[b"EXISTS", key])?.into_flag()?)
    }

    fn get(&self, key: &[u8]) -> CkvResult<Option<Vec<u8>>> {
        Ok(self.command(&[b"GET", key])?.into_optional_bulk()?)
    }

    fn set(
        &self,
        key: &[u8],
        value: &[u8],
        ttl: Option<Duration>,
        condition: SetCondition,
    ) -> CkvResult<bool> {
        let ttl_ms = ttl.map(millis);
        let mut args: Vec<&[u8]> = Vec::with_capacity(6);
        args.push(b"SET");
        args.push(key);
        args.push(value);
        if let Some(ms) = ttl_ms.as_deref() {
            args.push(b"PX");
            args.push(ms.as_bytes());
        }
        match condition {
            SetCondition::Always => {}
            SetCondition::IfAbsent => args.push(b"NX"),
            SetCondition::IfPresent => args.push(b"XX"),
        }
        Ok(self.command(&args)?.into_ok_or_nil()?)
    }

    fn delete(&self, key: &[u8]) -> CkvResult<bool> {
        Ok(self.command(&[b"DEL", key])?.into_flag()?)
    }

    fn expire(&self, key: &[u8], ttl: Duration) -> CkvResult<bool> {
        let ms = millis(ttl);
        Ok(self.command(&[b"PEXPIRE", key, ms.as_bytes()])?.into_flag()?)
    }

    fn persist(&self, key: &[u8]) -> CkvResult<bool> {
        Ok(self.command(&[b"PERSIST", key])?.into_flag()?)
    }

    fn ttl(&self, key: &[u8]) -> CkvResult<TtlStatus> {
        match self.command(&[b"PTTL", key])?.into_integer()? {
            -2 => Ok(TtlStatus::Missing),
            -1 => Ok(TtlStatus::NoExpiry),
            ms if ms >= 0 => Ok(TtlStatus::ExpiresIn(Duration::from_millis(ms as u64))),
            _ => Err(ClientError::UnexpectedResponse.into()),
        }
    }

    fn rename_if_absent(&self, old: &[u8], new: &[u8]) -> CkvResult<bool> {
        match self.command(&[b"RENAMENX", old, new])?.into_flag() {
            Ok(renamed) => Ok(renamed),
            Err(err) if err.is_no_such_key() => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn increment_by(&self, key: &[u8], delta: i64) -> CkvResult<i64> {
        let delta = delta.to_string();
        Ok(self.command(&[b"INCRBY", key, delta.as_bytes()])?.into_integer()?)
    }

    fn decrement_by(&self, key: &[u8], delta: i64) -> CkvResult<i64> {
        let delta = delta.to_string();
        Ok(self.command(&[b"DECRBY", key, delta.as_bytes()])?.into_integer()?)
    }

    fn set_bit(&self, key: &[u8], offset: u64, bit: bool) -> CkvResult<bool> {
        let offset = offset.to_string();
        let bit: &[u8] = if bit { b"1" } else { b"0" };
        Ok(self.command(&[b"SETBIT", key, offset.as_bytes(), bit])?.into_flag()?)
    }

    fn bit_count(&self, key: &[u8]) -> CkvResult<i64> {
        Ok(self.command(&[b"BITCOUNT", key])?.into_integer()?)
    }

    fn zadd(&self, key: &[u8], member: &[u8], score: f64) -> CkvResult<bool> {
        let score = format_score(score);
        Ok(self.command(&[b"ZADD", key, score.as_bytes(), member])?.into_flag()?)
    }

    fn zrem(&self, key: &[u8], members: &[&[u8]]) -> CkvResult<i64> {
        let mut args: Vec<&[u8]> = Vec::with_capacity(members.len() + 2);
        args.push(b"ZREM");
        args.push(key);
        args.extend_from_slice(members);
        Ok(self.command(&args)?.into_integer()?)
    }

    fn zincrby(&self, key: &[u8], member: &[u8], delta: f64) -> CkvResult<f64> {
        let delta = format_score(delta);
        Ok(self.command(&[b"ZINCRBY", key, delta.as_bytes(), member])?.into_float()?)
    }

    fn zrange(&self, key: &[u8], start: i64, stop: i64, order: Order) -> CkvResult<Vec<Vec<u8>>> {
        let name: &[u8] = match order {
            Order::Ascending => b"ZRANGE",
            Order::Descending => b"ZREVRANGE",
        };
        let (start, stop) = (start.to_string(), stop.to_string());
        Ok(self
            .command(&[name, key, start.as_bytes(), stop.as_bytes()])?
            .into_bulk_list()?)
    }

    fn zcount(&self, key: &[u8], min: f64, max: f64) -> CkvResult<i64> {
        let (min, max) = (format_score(min), format_score(max));
        Ok(self
            .command(&[b"ZCOUNT", key, min.as_bytes(), max.as_bytes()])?
            .into_integer()?)
    }

    fn zrank(&self, key: &[u8], member: &[u8], order: Order) -> CkvResult<Option<u64>> {
        let name: &[u8] = match order {
            Order::Ascending => b"ZRANK",
            Order::Descending => b"ZREVRANK",
        };
        match self.command(&[name, key, member])?.into_optional_integer()? {
            Some(rank) if rank >= 0 => Ok(Some(rank as u64)),
            Some(_) => Err(ClientError::UnexpectedResponse.into()),
            None => Ok(None),
        }
    }

    fn eval(&self, script: &Script, keys: &[&[u8]], args: &[&[u8]]) -> CkvResult<ScriptReply> {
        let numkeys = keys.len().to_string();
        let mut command: Vec<&[u8]> = Vec::with_capacity(keys.len() + args.len() + 3);
        command.push(b"EVAL");
        command.push(script.body().as_bytes());
        command.push(numkeys.as_bytes());
        command.extend_from_slice(keys);
        command.extend_from_slice(args);
        Ok(self.command(&command)?.into_script_reply()?)
    }

    fn ping(&self) -> CkvResult<()> {
        match self.command(&[b"PING"])? {
            RespValue::Simple(_) | RespValue::Bulk(Some(_)) => Ok(()),
            RespValue::Error(message) => Err(ClientError::Server { message }.into()),
            _ => Err(ClientError::UnexpectedResponse.into()),
        }
    }
}
