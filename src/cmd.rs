//! # Command Dispatcher
//!
//! [Commands](https://redis.io/docs/latest/commands/)
//!
//! [COMMAND](https://redis.io/docs/latest/commands/command/): Redis command names are case-insensitive.
//!
//! Grounded on the teacher's `handle_ping`/`handle_echo` handler shape
//! (one async function per command, returning a reply rather than writing
//! the socket directly), generalized to a full dispatch table and widened
//! from two commands to the full set, backed by [`crate::store`] and
//! [`crate::blocking`] instead of direct byte-slice scanning.

use crate::adapt::record_to_resp;
use crate::blocking::Coordinator;
use crate::constants::BLPOP_UNBOUNDED_TIMEOUT_SECS;
use crate::errors::CmdError;
use crate::resp::Message;
use crate::store;
use crate::types::{Record, RecordValue, SharedStore};
use bytes::Bytes;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::time::timeout;

/// Server-wide config surface, as read by `CONFIG GET`.
#[derive(Debug, Clone)]
pub struct Config {
    pub dir: String,
    pub dbfilename: String,
}

/// Everything a command handler needs: the keyspace, the blocking
/// coordinator, and the read-only config.
#[derive(Clone)]
pub struct Context {
    pub store: SharedStore,
    pub coordinator: Coordinator,
    pub config: Arc<Config>,
}

/// Dispatches one already-framed command (name plus arguments, both already
/// extracted from the top-level RESP array) and produces its reply. Never
/// fails: every typed error from a handler becomes a simple-error reply
/// here, so the caller always has a well-formed message to write back.
pub async fn dispatch(ctx: &Context, name: &str, args: &[Bytes]) -> Message {
    let upper = name.to_ascii_uppercase();
    let result = match upper.as_str() {
        "PING" => handle_ping(args),
        "ECHO" => handle_echo(args),
        "GET" => handle_get(args, ctx).await,
        "SET" => handle_set(args, ctx).await,
        "KEYS" => handle_keys(args, ctx).await,
        "TYPE" => handle_type(args, ctx).await,
        "LPUSH" => handle_push(args, ctx, Push::Left).await,
        "RPUSH" => handle_push(args, ctx, Push::Right).await,
        "LPOP" => handle_lpop(args, ctx).await,
        "LLEN" => handle_llen(args, ctx).await,
        "LRANGE" => handle_lrange(args, ctx).await,
        "BLPOP" => handle_blpop(args, ctx).await,
        "CONFIG" => handle_config(args, ctx).await,
        other => Err(CmdError::UnknownCommand(other.to_string())),
    };

    match result {
        Ok(message) => message,
        Err(err) => cmd_error_to_message(&err),
    }
}

fn cmd_error_to_message(err: &CmdError) -> Message {
    let text = match err {
        CmdError::WrongType => err.to_string(),
        other => format!("ERR {other}"),
    };
    Message::SimpleError(Bytes::from(text.into_bytes()))
}

fn to_utf8(bytes: Bytes) -> Result<String, CmdError> {
    Ok(String::from_utf8(bytes.to_vec())?)
}

fn parse_i64(bytes: &Bytes) -> Result<i64, CmdError> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .ok_or(CmdError::NotAnInteger)
}

fn exact_args<const N: usize>(args: &[Bytes], name: &str) -> Result<[Bytes; N], CmdError> {
    <[Bytes; N]>::try_from(args.to_vec()).map_err(|_| CmdError::WrongArity(name.to_string()))
}

fn handle_ping(args: &[Bytes]) -> Result<Message, CmdError> {
    match args {
        [] => Ok(Message::SimpleString(Bytes::from_static(b"PONG"))),
        [message] => Ok(Message::BulkString(Some(message.clone()))),
        _ => Err(CmdError::WrongArity("ping".to_string())),
    }
}

fn handle_echo(args: &[Bytes]) -> Result<Message, CmdError> {
    let [message] = exact_args(args, "echo")?;
    Ok(Message::BulkString(Some(message)))
}

async fn handle_get(args: &[Bytes], ctx: &Context) -> Result<Message, CmdError> {
    let [key] = exact_args(args, "get")?;
    let key = to_utf8(key)?;
    match store::get(&ctx.store, &key).await {
        Some(record) => Ok(record_to_resp(&record.value)),
        None => Ok(Message::BulkString(None)),
    }
}

enum ExpiryOption {
    RelativeSecs(i64),
    RelativeMillis(i64),
    AbsoluteSecs(i64),
    AbsoluteMillis(i64),
}

async fn handle_set(args: &[Bytes], ctx: &Context) -> Result<Message, CmdError> {
    if args.len() < 2 {
        return Err(CmdError::WrongArity("set".to_string()));
    }
    let key = to_utf8(args[0].clone())?;
    let value = args[1].clone();

    let mut explicit_expiry: Option<ExpiryOption> = None;
    let mut keepttl = false;
    let mut want_get = false;
    let mut nx = false;
    let mut xx = false;

    let mut i = 2;
    while i < args.len() {
        let opt = to_utf8(args[i].clone())?.to_ascii_uppercase();
        match opt.as_str() {
            "EX" | "PX" | "EXAT" | "PXAT" => {
                i += 1;
                let raw = args.get(i).ok_or(CmdError::SyntaxError)?;
                let n = parse_i64(raw)?;
                explicit_expiry = Some(match opt.as_str() {
                    "EX" => ExpiryOption::RelativeSecs(n),
                    "PX" => ExpiryOption::RelativeMillis(n),
                    "EXAT" => ExpiryOption::AbsoluteSecs(n),
                    "PXAT" => ExpiryOption::AbsoluteMillis(n),
                    _ => unreachable!(),
                });
            }
            "KEEPTTL" => keepttl = true,
            "GET" => want_get = true,
            "NX" => nx = true,
            "XX" => xx = true,
            _ => return Err(CmdError::SyntaxError),
        }
        i += 1;
    }

    if keepttl && explicit_expiry.is_some() {
        return Err(CmdError::SyntaxError);
    }
    if nx && xx {
        return Err(CmdError::SyntaxError);
    }

    let expires_at = match explicit_expiry {
        Some(ExpiryOption::RelativeSecs(n)) if n >= 0 => {
            Some(SystemTime::now() + Duration::from_secs(n as u64))
        }
        Some(ExpiryOption::RelativeMillis(n)) if n >= 0 => {
            Some(SystemTime::now() + Duration::from_millis(n as u64))
        }
        Some(ExpiryOption::AbsoluteSecs(n)) if n >= 0 => {
            Some(SystemTime::UNIX_EPOCH + Duration::from_secs(n as u64))
        }
        Some(ExpiryOption::AbsoluteMillis(n)) if n >= 0 => {
            Some(SystemTime::UNIX_EPOCH + Duration::from_millis(n as u64))
        }
        Some(_) => return Err(CmdError::InvalidExpire("set".to_string())),
        None => None,
    };
    if let Some(at) = expires_at {
        if at <= SystemTime::now() {
            return Err(CmdError::InvalidExpire("set".to_string()));
        }
    }

    let old = store::get(&ctx.store, &key).await;

    if want_get {
        if let Some(record) = &old {
            if !matches!(record.value, RecordValue::String(_)) {
                return Err(CmdError::WrongType);
            }
        }
    }

    if (nx && old.is_some()) || (xx && old.is_none()) {
        return Ok(not_performed_reply(want_get, old));
    }

    let final_expiry = if keepttl {
        old.as_ref().and_then(|r| r.expires_at)
    } else {
        expires_at
    };

    store::set(
        &ctx.store,
        key,
        Record::with_expiry(RecordValue::String(value), final_expiry),
    )
    .await;

    if want_get {
        Ok(match old {
            Some(record) => record_to_resp(&record.value),
            None => Message::BulkString(None),
        })
    } else {
        Ok(Message::SimpleString(Bytes::from_static(b"OK")))
    }
}

fn not_performed_reply(want_get: bool, old: Option<Record>) -> Message {
    if want_get {
        match old {
            Some(record) => record_to_resp(&record.value),
            None => Message::BulkString(None),
        }
    } else {
        Message::BulkString(None)
    }
}

async fn handle_keys(args: &[Bytes], ctx: &Context) -> Result<Message, CmdError> {
    let [pattern] = exact_args(args, "keys")?;
    let pattern = to_utf8(pattern)?;

    let glob = globset::Glob::new(&pattern)
        .map_err(|_| CmdError::SyntaxError)?
        .compile_matcher();

    let matches: Vec<Message> = store::keys(&ctx.store)
        .await
        .into_iter()
        .filter(|key| glob.is_match(key))
        .map(|key| Message::BulkString(Some(Bytes::from(key.into_bytes()))))
        .collect();

    Ok(Message::Array(Some(matches)))
}

async fn handle_type(args: &[Bytes], ctx: &Context) -> Result<Message, CmdError> {
    let [key] = exact_args(args, "type")?;
    let key = to_utf8(key)?;
    let type_name = match store::get(&ctx.store, &key).await {
        Some(record) => record.value.type_name(),
        None => "none",
    };
    Ok(Message::SimpleString(Bytes::from_static(
        type_name.as_bytes(),
    )))
}

enum Push {
    Left,
    Right,
}

async fn handle_push(args: &[Bytes], ctx: &Context, side: Push) -> Result<Message, CmdError> {
    let name = match side {
        Push::Left => "lpush",
        Push::Right => "rpush",
    };
    if args.len() < 2 {
        return Err(CmdError::WrongArity(name.to_string()));
    }
    let key = to_utf8(args[0].clone())?;
    let values = args[1..].to_vec();

    let new_len = store::with_list_mut(&ctx.store, &key, |list| {
        match side {
            Push::Left => {
                for value in &values {
                    list.insert(0, value.clone());
                }
            }
            Push::Right => {
                for value in &values {
                    list.push(value.clone());
                }
            }
        }
        list.len()
    })
    .await?;

    ctx.coordinator.notify(&key).await;

    Ok(Message::Integer(new_len as i64))
}

async fn handle_lpop(args: &[Bytes], ctx: &Context) -> Result<Message, CmdError> {
    if args.is_empty() || args.len() > 2 {
        return Err(CmdError::WrongArity("lpop".to_string()));
    }
    let key = to_utf8(args[0].clone())?;
    let count = match args.get(1) {
        Some(raw) => {
            let n = parse_i64(raw)?;
            if n < 0 {
                return Err(CmdError::NotAnInteger);
            }
            n as usize
        }
        None => 1,
    };

    let popped = store::pop_front(&ctx.store, &key, count).await?;
    Ok(Message::Array(Some(
        popped
            .into_iter()
            .map(|b| Message::BulkString(Some(b)))
            .collect(),
    )))
}

async fn handle_llen(args: &[Bytes], ctx: &Context) -> Result<Message, CmdError> {
    let [key] = exact_args(args, "llen")?;
    let key = to_utf8(key)?;
    let len = store::get_list(&ctx.store, &key)
        .await?
        .map_or(0, |l| l.len());
    Ok(Message::Integer(len as i64))
}

async fn handle_lrange(args: &[Bytes], ctx: &Context) -> Result<Message, CmdError> {
    let [key, start, stop] = exact_args(args, "lrange")?;
    let key = to_utf8(key)?;
    let start = parse_i64(&start)?;
    let stop = parse_i64(&stop)?;

    let list = store::get_list(&ctx.store, &key).await?.unwrap_or_default();
    let len = list.len() as i64;
    if len == 0 {
        return Ok(Message::Array(Some(Vec::new())));
    }

    let normalize = |idx: i64| -> i64 { if idx < 0 { (len + idx).max(0) } else { idx } };
    let start = normalize(start).min(len - 1).max(0);
    let stop = normalize(stop).min(len - 1);

    if start > stop {
        return Ok(Message::Array(Some(Vec::new())));
    }

    let slice = list[start as usize..=stop as usize]
        .iter()
        .map(|b| Message::BulkString(Some(b.clone())))
        .collect();
    Ok(Message::Array(Some(slice)))
}

async fn handle_blpop(args: &[Bytes], ctx: &Context) -> Result<Message, CmdError> {
    if args.len() < 2 {
        return Err(CmdError::WrongArity("blpop".to_string()));
    }
    let (key_args, timeout_arg) = args.split_at(args.len() - 1);
    let keys: Vec<String> = key_args
        .iter()
        .map(|b| to_utf8(b.clone()))
        .collect::<Result<_, _>>()?;
    let timeout_secs = parse_i64(&timeout_arg[0])?;
    if timeout_secs < 0 {
        return Err(CmdError::InvalidExpire("blpop".to_string()));
    }
    let wait = if timeout_secs == 0 {
        Duration::from_secs(BLPOP_UNBOUNDED_TIMEOUT_SECS)
    } else {
        Duration::from_secs(timeout_secs as u64)
    };

    // Register before the non-blocking check, not after: otherwise a push
    // landing between the check and the registration calls `notify` while
    // this waiter isn't queued yet, and the push is missed until timeout.
    let registration = ctx.coordinator.register(keys.clone()).await;

    for key in &keys {
        let popped = store::pop_front(&ctx.store, key, 1).await?;
        if let Some(value) = popped.into_iter().next() {
            ctx.coordinator.unregister(registration.id).await;
            return Ok(pop_reply(key, value));
        }
    }

    match timeout(wait, registration.receiver).await {
        Ok(Ok(signaled_key)) => {
            let popped = store::pop_front(&ctx.store, &signaled_key, 1).await?;
            match popped.into_iter().next() {
                Some(value) => {
                    let remaining = store::get_list(&ctx.store, &signaled_key).await?;
                    if remaining.is_some_and(|l| !l.is_empty()) {
                        ctx.coordinator.notify(&signaled_key).await;
                    }
                    Ok(pop_reply(&signaled_key, value))
                }
                None => Ok(Message::Array(None)),
            }
        }
        Ok(Err(_)) | Err(_) => {
            ctx.coordinator.unregister(registration.id).await;
            Ok(Message::Array(None))
        }
    }
}

fn pop_reply(key: &str, value: Bytes) -> Message {
    Message::Array(Some(vec![
        Message::BulkString(Some(Bytes::from(key.to_string().into_bytes()))),
        Message::BulkString(Some(value)),
    ]))
}

async fn handle_config(args: &[Bytes], ctx: &Context) -> Result<Message, CmdError> {
    if args.is_empty() {
        return Err(CmdError::WrongArity("config".to_string()));
    }
    let sub = to_utf8(args[0].clone())?.to_ascii_uppercase();
    if sub != "GET" {
        return Err(CmdError::UnknownSubcommand("config".to_string()));
    }
    if args.len() < 2 {
        return Err(CmdError::WrongArity("config|get".to_string()));
    }

    let mut reply = Vec::new();
    for raw_name in &args[1..] {
        let name = to_utf8(raw_name.clone())?.to_ascii_lowercase();
        let value = match name.as_str() {
            "dir" => Some(ctx.config.dir.clone()),
            "dbfilename" => Some(ctx.config.dbfilename.clone()),
            _ => None,
        };
        if let Some(value) = value {
            reply.push(Message::BulkString(Some(Bytes::from(name.into_bytes()))));
            reply.push(Message::BulkString(Some(Bytes::from(value.into_bytes()))));
        }
    }
    Ok(Message::Array(Some(reply)))
}
