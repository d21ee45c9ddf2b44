//! Memcache verbs in terms of the internal command set
//!
//! A memcache command becomes an ordinary argument list that goes through
//! the same routing as RESP commands; the RESP-shaped reply is then mapped
//! back onto memcache vocabulary.

use crate::protocol::{McCommand, McCommandType, RespValue};
use bytes::Bytes;

/// Relative expiries above this many seconds are absolute unix timestamps
const MAX_RELATIVE_EXPIRE: u64 = 60 * 60 * 24 * 30;

pub(crate) const VERSION: &str = concat!("VERSION ", env!("CARGO_PKG_VERSION"));

/// What a memcache command turns into
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum McRequest {
    /// Run as an internal command, name first
    Command(Vec<Bytes>),
    Quit,
    Version,
}

fn client_error(msg: &str) -> RespValue {
    RespValue::error(format!("CLIENT_ERROR {}", msg))
}

fn server_error(msg: &str) -> RespValue {
    RespValue::error(format!("SERVER_ERROR {}", msg))
}

/// Expiry arguments for SET, given memcache's `exptime` and the current unix time
fn expire_args(expire_ts: u32, now_ms: u64) -> Vec<Bytes> {
    let expire_ts = u64::from(expire_ts);
    if expire_ts == 0 {
        return Vec::new();
    }

    let ttl_ms = if expire_ts <= MAX_RELATIVE_EXPIRE {
        expire_ts * 1000
    } else {
        // Absolute time; one already in the past expires on the next tick
        (expire_ts * 1000).saturating_sub(now_ms).max(1)
    };
    vec![Bytes::from_static(b"PX"), Bytes::from(ttl_ms.to_string())]
}

/// Build the internal command for `cmd`.
///
/// `value` is the data block of storage verbs. An `Err` carries the reply
/// to send instead of running anything.
pub(crate) fn translate(
    cmd: &McCommand,
    value: Option<&Bytes>,
    now_ms: u64,
) -> Result<McRequest, RespValue> {
    use McCommandType::*;

    let key = cmd.key.clone();
    let stored = |name: &'static str, extra: &[&'static str]| -> Result<McRequest, RespValue> {
        let value = value.cloned().ok_or_else(|| client_error("bad data chunk"))?;
        let mut args = vec![Bytes::from_static(name.as_bytes()), cmd.key.clone(), value];
        args.extend(extra.iter().copied().map(|opt| Bytes::from_static(opt.as_bytes())));
        Ok(McRequest::Command(args))
    };

    let request = match cmd.cmd_type {
        Set | Add | Replace => {
            let condition: &[&'static str] = match cmd.cmd_type {
                Add => &["NX"],
                Replace => &["XX"],
                _ => &[],
            };
            let mut request = stored("SET", condition)?;
            if let McRequest::Command(args) = &mut request {
                args.extend(expire_args(cmd.expire_ts, now_ms));
            }
            request
        }
        Append => stored("APPEND", &["XX"])?,
        Prepend => stored("PREPEND", &["XX"])?,
        Get | Gets => {
            let name: &'static [u8] = if cmd.keys_ext.is_empty() { b"GET" } else { b"MGET" };
            let mut args = vec![Bytes::from_static(name)];
            args.extend(cmd.keys().cloned());
            McRequest::Command(args)
        }
        Delete => McRequest::Command(vec![Bytes::from_static(b"DEL"), key]),
        Incr | Decr => {
            let delta = i64::try_from(cmd.delta)
                .map_err(|_| client_error("invalid numeric delta argument"))?;
            let name: &'static [u8] = if cmd.cmd_type == Incr { b"INCRBY" } else { b"DECRBY" };
            McRequest::Command(vec![
                Bytes::from_static(name),
                key,
                Bytes::from(delta.to_string()),
                Bytes::from_static(b"XX"),
            ])
        }
        Quit => McRequest::Quit,
        Version => McRequest::Version,
    };
    Ok(request)
}

/// Map the reply of the internal command back to memcache vocabulary
pub(crate) fn translate_reply(cmd: &McCommand, reply: RespValue) -> RespValue {
    use McCommandType::*;

    if let RespValue::Error(msg) = &reply {
        if msg.starts_with("CLIENT_ERROR") || msg.starts_with("SERVER_ERROR") {
            return reply;
        }
        return server_error(msg);
    }

    match cmd.cmd_type {
        Set | Add | Replace | Append | Prepend => match reply {
            RespValue::Null => RespValue::simple_string("NOT_STORED"),
            _ => RespValue::simple_string("STORED"),
        },
        Get | Gets => {
            let values = match reply {
                RespValue::Array(values) => values,
                single => vec![single],
            };
            let hits = cmd
                .keys()
                .zip(values)
                .filter_map(|(key, value)| match value {
                    RespValue::BulkString(data) => Some(RespValue::array(vec![
                        RespValue::bulk_string(key.clone()),
                        RespValue::BulkString(data),
                    ])),
                    _ => None,
                })
                .collect();
            RespValue::array(hits)
        }
        Delete => match reply.as_integer() {
            Some(n) if n > 0 => RespValue::simple_string("DELETED"),
            _ => RespValue::simple_string("NOT_FOUND"),
        },
        Incr | Decr => match reply {
            RespValue::Integer(n) => RespValue::integer(n),
            _ => RespValue::simple_string("NOT_FOUND"),
        },
        Quit => RespValue::ok(),
        Version => RespValue::simple_string(VERSION),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(parts: &[&str]) -> Vec<Bytes> {
        parts.iter().map(|p| Bytes::from(p.to_string())).collect()
    }

    fn command(request: Result<McRequest, RespValue>) -> Vec<Bytes> {
        match request {
            Ok(McRequest::Command(args)) => args,
            other => panic!("expected a command, got {:?}", other),
        }
    }

    #[test]
    fn test_storage_verbs() {
        let value = Bytes::from("v");

        let set = McCommand::new(McCommandType::Set, "k");
        assert_eq!(command(translate(&set, Some(&value), 0)), args(&["SET", "k", "v"]));

        let add = McCommand::new(McCommandType::Add, "k");
        assert_eq!(command(translate(&add, Some(&value), 0)), args(&["SET", "k", "v", "NX"]));

        let mut replace = McCommand::new(McCommandType::Replace, "k");
        replace.expire_ts = 10;
        assert_eq!(
            command(translate(&replace, Some(&value), 0)),
            args(&["SET", "k", "v", "XX", "PX", "10000"])
        );

        let append = McCommand::new(McCommandType::Append, "k");
        assert_eq!(command(translate(&append, Some(&value), 0)), args(&["APPEND", "k", "v", "XX"]));
    }

    #[test]
    fn test_missing_data_block() {
        let set = McCommand::new(McCommandType::Set, "k");
        assert_eq!(translate(&set, None, 0), Err(client_error("bad data chunk")));
    }

    #[test]
    fn test_absolute_expiry() {
        let now_ms = 3_000_000_000_000;
        let mut set = McCommand::new(McCommandType::Set, "k");
        set.expire_ts = 3_000_000_005;
        assert_eq!(
            command(translate(&set, Some(&Bytes::from("v")), now_ms)),
            args(&["SET", "k", "v", "PX", "5000"])
        );

        set.expire_ts = 2_999_999_000;
        assert_eq!(
            command(translate(&set, Some(&Bytes::from("v")), now_ms)),
            args(&["SET", "k", "v", "PX", "1"])
        );
    }

    #[test]
    fn test_retrieval_and_counters() {
        let mut get = McCommand::new(McCommandType::Get, "a");
        assert_eq!(command(translate(&get, None, 0)), args(&["GET", "a"]));
        get.keys_ext.push(Bytes::from("b"));
        assert_eq!(command(translate(&get, None, 0)), args(&["MGET", "a", "b"]));

        let mut decr = McCommand::new(McCommandType::Decr, "n");
        decr.delta = 3;
        assert_eq!(command(translate(&decr, None, 0)), args(&["DECRBY", "n", "3", "XX"]));

        decr.delta = u64::MAX;
        assert!(translate(&decr, None, 0).is_err());
    }

    #[test]
    fn test_reply_translation() {
        let set = McCommand::new(McCommandType::Add, "k");
        assert_eq!(translate_reply(&set, RespValue::ok()), RespValue::simple_string("STORED"));
        assert_eq!(translate_reply(&set, RespValue::Null), RespValue::simple_string("NOT_STORED"));

        let del = McCommand::new(McCommandType::Delete, "k");
        assert_eq!(translate_reply(&del, RespValue::integer(1)), RespValue::simple_string("DELETED"));
        assert_eq!(translate_reply(&del, RespValue::integer(0)), RespValue::simple_string("NOT_FOUND"));

        let mut get = McCommand::new(McCommandType::Get, "a");
        get.keys_ext.push(Bytes::from("b"));
        let reply = RespValue::array(vec![RespValue::Null, RespValue::bulk_string("2")]);
        assert_eq!(
            translate_reply(&get, reply),
            RespValue::array(vec![RespValue::array(vec![
                RespValue::bulk_string("b"),
                RespValue::bulk_string("2"),
            ])])
        );

        let incr = McCommand::new(McCommandType::Incr, "n");
        assert_eq!(translate_reply(&incr, RespValue::Null), RespValue::simple_string("NOT_FOUND"));
        assert_eq!(
            translate_reply(&incr, RespValue::error("ERR value is not an integer or out of range")),
            RespValue::error("SERVER_ERROR ERR value is not an integer or out of range")
        );
    }
}
