//! Connection commands (PING, ECHO)

use super::{Command, CommandContext, CommandFlags, KeySpec};
use crate::protocol::RespValue;
use bytes::Bytes;

/// PING command
///
/// Syntax: PING [message]
pub struct PingCommand;

impl Command for PingCommand {
    fn execute(&self, _ctx: &mut CommandContext<'_>, args: &[Bytes]) -> RespValue {
        match args.first() {
            Some(message) => RespValue::bulk_string(message.clone()),
            None => RespValue::simple_string("PONG"),
        }
    }

    fn name(&self) -> &'static str {
        "PING"
    }

    fn max_args(&self) -> Option<usize> {
        Some(1)
    }

    fn key_spec(&self) -> KeySpec {
        KeySpec::NONE
    }

    fn flags(&self) -> CommandFlags {
        CommandFlags::FAST
    }
}

/// ECHO command
///
/// Syntax: ECHO message
pub struct EchoCommand;

impl Command for EchoCommand {
    fn execute(&self, _ctx: &mut CommandContext<'_>, args: &[Bytes]) -> RespValue {
        RespValue::bulk_string(args[0].clone())
    }

    fn name(&self) -> &'static str {
        "ECHO"
    }

    fn min_args(&self) -> usize {
        1
    }

    fn max_args(&self) -> Option<usize> {
        Some(1)
    }

    fn key_spec(&self) -> KeySpec {
        KeySpec::NONE
    }

    fn flags(&self) -> CommandFlags {
        CommandFlags::FAST
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_ping() {
        let mut store = MemoryStore::new();
        let mut ctx = CommandContext::new(&mut store, 0);

        assert_eq!(PingCommand.execute(&mut ctx, &[]), RespValue::simple_string("PONG"));
        assert_eq!(
            PingCommand.execute(&mut ctx, &[Bytes::from("hi")]),
            RespValue::bulk_string("hi")
        );
    }
}
