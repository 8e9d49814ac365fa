//! Command Handler
//!
//! Turns decoded RESP commands into expire-bin operations and their results
//! back into RESP replies.
//!
//! ## Commands
//!
//! `<ttl>` is an integer (`-1` never expires, `0` permanent, `n > 0` seconds)
//! or `KEEP` to keep the bin's current deadline.
//!
//! - `EBGET coll id bin [bin ...]` - value or nil per bin
//! - `EBPUT coll id bin value [ttl|KEEP]` - `+OK`
//! - `EBPUTS coll id bin value ttl|KEEP [bin value ttl|KEEP ...]` - `1`/`0` per bin
//! - `EBTOUCH coll id bin ttl [bin ttl ...]` - `1`/`0` per bin
//! - `EBTTL coll id bin` - seconds, `-1` infinite, `-2` absent
//! - `EBRECLAIM coll id` - number of bins removed
//! - `EBCLEAN coll [bin ...]` - job id of a detached sweep
//! - `EBCLEANSTATUS job` - `state <s> visited <n> removed <n> failed <n>`
//! - `PING`, `ECHO`, `INFO`, `COMMAND`, `QUIT`
//!
//! Failures reply with an error whose first word is the error class, e.g.
//! `-NOTFOUND record test:eb1 not found`.

use crate::expire::{
    BinMutation, BinOutcome, BinTouch, DeadlineRequest, ExpireBinError, RecordAccessor,
    SweepCoordinator,
};
use crate::protocol::RespValue;
use crate::storage::{BinFilter, RecordKey, RecordStore, Value};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Every command the server understands.
const COMMANDS: &[&str] = &[
    "EBGET", "EBPUT", "EBPUTS", "EBTOUCH", "EBTTL", "EBRECLAIM", "EBCLEAN", "EBCLEANSTATUS",
    "PING", "ECHO", "INFO", "COMMAND", "QUIT",
];

/// Dispatches RESP commands to a record accessor.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    accessor: Arc<RecordAccessor>,
    sweeps: Arc<SweepCoordinator>,
    start_time: Instant,
}

/// A failed command, already in reply form.
type Reply<T> = Result<T, RespValue>;

impl CommandHandler {
    /// Creates a handler that sweeps through `sweeps` and serves everything
    /// else from its accessor.
    pub fn new(sweeps: Arc<SweepCoordinator>) -> Self {
        Self {
            accessor: Arc::clone(sweeps.accessor()),
            sweeps,
            start_time: Instant::now(),
        }
    }

    /// Executes one command and returns the reply.
    ///
    /// `EBCLEAN` starts a blocking sweep, so this must run inside a tokio
    /// runtime.
    pub fn execute(&self, command: RespValue) -> RespValue {
        let Some(args) = command.into_array() else {
            return RespValue::error("invalid command format");
        };
        let Some(name) = args.first().and_then(RespValue::as_str) else {
            return RespValue::error("invalid command name");
        };

        let name = name.to_ascii_uppercase();
        let args = &args[1..];

        let reply = match name.as_str() {
            "EBGET" => self.cmd_ebget(args),
            "EBPUT" => self.cmd_ebput(args),
            "EBPUTS" => self.cmd_ebputs(args),
            "EBTOUCH" => self.cmd_ebtouch(args),
            "EBTTL" => self.cmd_ebttl(args),
            "EBRECLAIM" => self.cmd_ebreclaim(args),
            "EBCLEAN" => self.cmd_ebclean(args),
            "EBCLEANSTATUS" => self.cmd_ebcleanstatus(args),
            "PING" => Ok(cmd_ping(args)),
            "ECHO" => cmd_echo(args),
            "INFO" => Ok(self.cmd_info()),
            "COMMAND" => Ok(RespValue::Array(
                COMMANDS.iter().map(|c| RespValue::bulk_string(*c)).collect(),
            )),
            "QUIT" => Ok(RespValue::ok()),
            _ => Err(RespValue::error(format_args!("unknown command '{}'", name))),
        };

        reply.unwrap_or_else(|err| err)
    }

    /// EBGET coll id bin [bin ...]
    fn cmd_ebget(&self, args: &[RespValue]) -> Reply<RespValue> {
        if args.len() < 3 {
            return Err(wrong_arity("EBGET"));
        }
        let key = record_key(args)?;
        let bins = args[2..].iter().map(text).collect::<Reply<Vec<_>>>()?;

        let values = self.accessor.get(&key, &bins).map_err(error_reply)?;
        Ok(RespValue::Array(
            values
                .into_iter()
                .map(|value| match value {
                    Ok(payload) => RespValue::from(payload),
                    Err(e) => RespValue::error_with_code("CORRUPT", e),
                })
                .collect(),
        ))
    }

    /// EBPUT coll id bin value [ttl|KEEP]
    fn cmd_ebput(&self, args: &[RespValue]) -> Reply<RespValue> {
        if !(4..=5).contains(&args.len()) {
            return Err(wrong_arity("EBPUT"));
        }
        let key = record_key(args)?;
        let bin = text(&args[2])?;
        let payload = payload(&args[3])?;
        let request = match args.get(4) {
            Some(arg) => deadline_request(arg)?,
            None => None,
        };

        self.accessor
            .put(&key, bin, payload, request)
            .map_err(error_reply)?;
        Ok(RespValue::ok())
    }

    /// EBPUTS coll id bin value ttl|KEEP [bin value ttl|KEEP ...]
    fn cmd_ebputs(&self, args: &[RespValue]) -> Reply<RespValue> {
        if args.len() < 5 || (args.len() - 2) % 3 != 0 {
            return Err(wrong_arity("EBPUTS"));
        }
        let key = record_key(args)?;
        let mutations = args[2..]
            .chunks_exact(3)
            .map(|triple| -> Reply<BinMutation> {
                Ok(BinMutation {
                    bin: text(&triple[0])?.to_string(),
                    payload: payload(&triple[1])?,
                    request: deadline_request(&triple[2])?,
                })
            })
            .collect::<Reply<Vec<_>>>()?;

        let outcomes = self
            .accessor
            .put_many(&key, &mutations)
            .map_err(error_reply)?;
        Ok(outcome_flags(&outcomes))
    }

    /// EBTOUCH coll id bin ttl [bin ttl ...]
    fn cmd_ebtouch(&self, args: &[RespValue]) -> Reply<RespValue> {
        if args.len() < 4 || args.len() % 2 != 0 {
            return Err(wrong_arity("EBTOUCH"));
        }
        let key = record_key(args)?;
        let touches = args[2..]
            .chunks_exact(2)
            .map(|pair| -> Reply<BinTouch> {
                let request = deadline_request(&pair[1])?
                    .ok_or_else(|| RespValue::error("EBTOUCH needs an explicit ttl"))?;
                Ok(BinTouch::new(text(&pair[0])?, request))
            })
            .collect::<Reply<Vec<_>>>()?;

        let outcomes = self
            .accessor
            .touch_many(&key, &touches)
            .map_err(error_reply)?;
        Ok(outcome_flags(&outcomes))
    }

    /// EBTTL coll id bin
    fn cmd_ebttl(&self, args: &[RespValue]) -> Reply<RespValue> {
        if args.len() != 3 {
            return Err(wrong_arity("EBTTL"));
        }
        let key = record_key(args)?;
        let ttl = self
            .accessor
            .ttl(&key, text(&args[2])?)
            .map_err(error_reply)?;
        Ok(RespValue::Integer(ttl.as_wire()))
    }

    /// EBRECLAIM coll id
    fn cmd_ebreclaim(&self, args: &[RespValue]) -> Reply<RespValue> {
        if args.len() != 2 {
            return Err(wrong_arity("EBRECLAIM"));
        }
        let key = record_key(args)?;
        let removed = self.accessor.reclaim(&key).map_err(error_reply)?;
        Ok(RespValue::Integer(i64::try_from(removed).unwrap_or(i64::MAX)))
    }

    /// EBCLEAN coll [bin ...]
    fn cmd_ebclean(&self, args: &[RespValue]) -> Reply<RespValue> {
        let Some((collection, bins)) = args.split_first() else {
            return Err(wrong_arity("EBCLEAN"));
        };
        let collection = text(collection)?;
        let filter = if bins.is_empty() {
            None
        } else {
            Some(
                bins.iter()
                    .map(|b| text(b).map(str::to_string))
                    .collect::<Reply<BinFilter>>()?,
            )
        };

        let job_id = self.sweeps.run_sweep(collection, filter).detach();
        debug!(job_id, collection, "Sweep requested by client");
        Ok(RespValue::Integer(i64::try_from(job_id).unwrap_or(i64::MAX)))
    }

    /// EBCLEANSTATUS job
    fn cmd_ebcleanstatus(&self, args: &[RespValue]) -> Reply<RespValue> {
        let [job] = args else {
            return Err(wrong_arity("EBCLEANSTATUS"));
        };
        let job_id = job
            .as_integer()
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| RespValue::error("job id is not a valid integer"))?;

        let status = self.sweeps.status(job_id).ok_or_else(|| {
            RespValue::error_with_code("NOTFOUND", format_args!("sweep job {} not found", job_id))
        })?;
        let count = |n: u64| RespValue::Integer(i64::try_from(n).unwrap_or(i64::MAX));

        Ok(RespValue::Array(vec![
            RespValue::bulk_string("state"),
            RespValue::bulk_string(status.state.as_str()),
            RespValue::bulk_string("visited"),
            count(status.progress.records_visited),
            RespValue::bulk_string("removed"),
            count(status.progress.bins_removed),
            RespValue::bulk_string("failed"),
            count(status.progress.records_failed),
        ]))
    }

    /// INFO
    fn cmd_info(&self) -> RespValue {
        let policy = self.accessor.policy();
        let info = format!(
            "# Server\r\n\
             binexpire_version:{}\r\n\
             os:{}\r\n\
             uptime_in_seconds:{}\r\n\
             \r\n\
             # Keyspace\r\n\
             records:{}\r\n\
             \r\n\
             # Policy\r\n\
             timeout_ms:{}\r\n\
             max_retries:{}\r\n\
             reclaim_on_write:{}\r\n",
            crate::VERSION,
            std::env::consts::OS,
            self.start_time.elapsed().as_secs(),
            self.accessor.store().record_count(),
            policy.timeout.as_millis(),
            policy.max_retries,
            u8::from(policy.reclaim_on_write),
        );

        RespValue::bulk_string(Bytes::from(info))
    }
}

/// PING [message]
fn cmd_ping(args: &[RespValue]) -> RespValue {
    match args.first() {
        Some(RespValue::BulkString(msg)) => RespValue::BulkString(msg.clone()),
        _ => RespValue::pong(),
    }
}

/// ECHO message
fn cmd_echo(args: &[RespValue]) -> Reply<RespValue> {
    match args {
        [RespValue::BulkString(msg)] => Ok(RespValue::BulkString(msg.clone())),
        [RespValue::SimpleString(msg)] => Ok(RespValue::bulk_string(msg.clone())),
        _ => Err(wrong_arity("ECHO")),
    }
}

fn wrong_arity(command: &str) -> RespValue {
    RespValue::error(format_args!(
        "wrong number of arguments for '{}' command",
        command
    ))
}

fn error_reply(err: ExpireBinError) -> RespValue {
    RespValue::error_with_code(err.code(), &err)
}

fn text(arg: &RespValue) -> Reply<&str> {
    arg.as_str()
        .ok_or_else(|| RespValue::error("argument is not valid UTF-8"))
}

fn record_key(args: &[RespValue]) -> Reply<RecordKey> {
    Ok(RecordKey::new(text(&args[0])?, text(&args[1])?))
}

fn payload(arg: &RespValue) -> Reply<Value> {
    arg.clone()
        .into_value()
        .ok_or_else(|| RespValue::error("value can't be stored"))
}

/// Parses `ttl|KEEP`; `KEEP` is `None`.
fn deadline_request(arg: &RespValue) -> Reply<Option<DeadlineRequest>> {
    if arg.as_str().is_some_and(|s| s.eq_ignore_ascii_case("KEEP")) {
        return Ok(None);
    }

    let ttl = arg
        .as_integer()
        .ok_or_else(|| RespValue::error("ttl is not an integer or KEEP"))?;
    DeadlineRequest::from_ttl(ttl)
        .map(Some)
        .ok_or_else(|| error_reply(ExpireBinError::InvalidTtl(ttl)))
}

fn outcome_flags(outcomes: &[BinOutcome]) -> RespValue {
    RespValue::Array(
        outcomes
            .iter()
            .map(|o| RespValue::Integer(i64::from(o.is_applied())))
            .collect(),
    )
}
