//! Command registry
//!
//! Built once at startup and shared by reference; nothing mutates it after
//! `CommandRegistry::new` returns.

use super::metadata::{CommandFlags, KeySpec, ReplyMerge};
use super::{admin, counter, key, list, string, ttl, Command};
use crate::error::CommandError;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Commands handled by the service rather than by a shard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Multi,
    Exec,
    Discard,
    Quit,
    Select,
}

/// Who runs a command
#[derive(Clone)]
pub enum CommandHandler {
    Shard(Arc<dyn Command>),
    Control(ControlCommand),
}

/// Everything the service needs to know about a command before running it
#[derive(Clone)]
pub struct CommandDescriptor {
    pub name: &'static str,

    /// Minimum number of arguments, excluding the command name
    pub min_args: usize,

    /// Maximum number of arguments, excluding the command name
    pub max_args: Option<usize>,

    pub key_spec: KeySpec,
    pub flags: CommandFlags,
    pub merge: ReplyMerge,
    pub handler: CommandHandler,
}

impl CommandDescriptor {
    fn from_command(command: Arc<dyn Command>) -> Self {
        CommandDescriptor {
            name: command.name(),
            min_args: command.min_args(),
            max_args: command.max_args(),
            key_spec: command.key_spec(),
            flags: command.flags(),
            merge: command.reply_merge(),
            handler: CommandHandler::Shard(command),
        }
    }

    fn control(
        name: &'static str,
        min_args: usize,
        max_args: Option<usize>,
        flags: CommandFlags,
        control: ControlCommand,
    ) -> Self {
        CommandDescriptor {
            name,
            min_args,
            max_args,
            key_spec: KeySpec::NONE,
            flags: flags | CommandFlags::CONTROL,
            merge: ReplyMerge::Single,
            handler: CommandHandler::Control(control),
        }
    }

    pub fn control_kind(&self) -> Option<ControlCommand> {
        match self.handler {
            CommandHandler::Control(c) => Some(c),
            CommandHandler::Shard(_) => None,
        }
    }

    pub fn is_write(&self) -> bool {
        self.flags.is_write()
    }

    /// Check the argument count; `args` includes the command name
    pub fn validate_arity(&self, args: &[Bytes]) -> Result<(), CommandError> {
        let argc = args.len().saturating_sub(1);
        let too_many = self.max_args.map(|max| argc > max).unwrap_or(false);

        if argc < self.min_args || too_many {
            return Err(CommandError::WrongArity(self.name.to_lowercase()));
        }
        Ok(())
    }

    /// Keys touched by a call, in argument order, without duplicates
    pub fn keys_touched(&self, args: &[Bytes]) -> Result<Vec<Bytes>, CommandError> {
        let mut keys: Vec<Bytes> = Vec::new();
        for pos in self.key_spec.key_positions(args)? {
            if !keys.contains(&args[pos]) {
                keys.push(args[pos].clone());
            }
        }
        Ok(keys)
    }
}

impl fmt::Debug for CommandDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDescriptor")
            .field("name", &self.name)
            .field("min_args", &self.min_args)
            .field("max_args", &self.max_args)
            .field("key_spec", &self.key_spec)
            .field("flags", &self.flags)
            .finish()
    }
}

/// Registry of all available commands
pub struct CommandRegistry {
    commands: HashMap<String, Arc<CommandDescriptor>>,
}

impl CommandRegistry {
    /// Create a new command registry and register all commands
    pub fn new() -> Self {
        let mut registry = CommandRegistry {
            commands: HashMap::new(),
        };

        // Transaction and connection control
        registry.insert(CommandDescriptor::control(
            "MULTI", 0, Some(0), CommandFlags::FAST, ControlCommand::Multi,
        ));
        registry.insert(CommandDescriptor::control(
            "EXEC", 0, Some(0), CommandFlags::EMPTY, ControlCommand::Exec,
        ));
        registry.insert(CommandDescriptor::control(
            "DISCARD", 0, Some(0), CommandFlags::FAST, ControlCommand::Discard,
        ));
        registry.insert(CommandDescriptor::control(
            "QUIT", 0, Some(0), CommandFlags::FAST, ControlCommand::Quit,
        ));
        registry.insert(CommandDescriptor::control(
            "SELECT", 1, Some(1), CommandFlags::FAST | CommandFlags::NO_MULTI, ControlCommand::Select,
        ));

        // Connection commands
        registry.register(Arc::new(admin::PingCommand));
        registry.register(Arc::new(admin::EchoCommand));

        // String commands
        registry.register(Arc::new(string::SetCommand));
        registry.register(Arc::new(string::GetCommand));
        registry.register(Arc::new(string::AppendCommand));
        registry.register(Arc::new(string::PrependCommand));
        registry.register(Arc::new(string::StrLenCommand));
        registry.register(Arc::new(string::MSetCommand));
        registry.register(Arc::new(string::MGetCommand));

        // Key commands
        registry.register(Arc::new(key::DelCommand));
        registry.register(Arc::new(key::ExistsCommand));
        registry.register(Arc::new(key::TypeCommand));

        // Counter commands
        registry.register(Arc::new(counter::IncrCommand));
        registry.register(Arc::new(counter::IncrByCommand));
        registry.register(Arc::new(counter::DecrCommand));
        registry.register(Arc::new(counter::DecrByCommand));

        // Expiry commands
        registry.register(Arc::new(ttl::ExpireCommand));
        registry.register(Arc::new(ttl::PExpireCommand));
        registry.register(Arc::new(ttl::TtlCommand));
        registry.register(Arc::new(ttl::PTtlCommand));
        registry.register(Arc::new(ttl::PersistCommand));

        // List commands
        registry.register(Arc::new(list::LPushCommand));
        registry.register(Arc::new(list::RPushCommand));
        registry.register(Arc::new(list::LLenCommand));
        registry.register(Arc::new(list::LRangeCommand));

        registry
    }

    fn register(&mut self, command: Arc<dyn Command>) {
        self.insert(CommandDescriptor::from_command(command));
    }

    fn insert(&mut self, descriptor: CommandDescriptor) {
        let name = descriptor.name.to_uppercase();
        self.commands.insert(name, Arc::new(descriptor));
    }

    /// Get a command by name (case-insensitive)
    pub fn lookup(&self, name: &[u8]) -> Option<Arc<CommandDescriptor>> {
        let name = std::str::from_utf8(name).ok()?;
        self.commands.get(&name.to_ascii_uppercase()).cloned()
    }

    /// Look up and validate a full command line (name first)
    pub fn resolve(&self, args: &[Bytes]) -> Result<Arc<CommandDescriptor>, CommandError> {
        let name = args
            .first()
            .ok_or_else(|| CommandError::Other("empty command".to_string()))?;

        let descriptor = self.lookup(name).ok_or_else(|| {
            CommandError::UnknownCommand(String::from_utf8_lossy(name).into_owned())
        })?;

        descriptor.validate_arity(args)?;
        Ok(descriptor)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(parts: &[&str]) -> Vec<Bytes> {
        parts.iter().map(|p| Bytes::from(p.to_string())).collect()
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let registry = CommandRegistry::new();
        assert_eq!(registry.lookup(b"get").map(|d| d.name), Some("GET"));
        assert_eq!(registry.lookup(b"MuLtI").map(|d| d.name), Some("MULTI"));
        assert!(registry.lookup(b"NOPE").is_none());
    }

    #[test]
    fn test_resolve_unknown_command() {
        let registry = CommandRegistry::new();
        let err = registry.resolve(&args(&["frobnicate", "x"])).unwrap_err();
        assert_eq!(err.to_string(), "ERR unknown command 'frobnicate'");
    }

    #[test]
    fn test_resolve_wrong_arity() {
        let registry = CommandRegistry::new();
        let err = registry.resolve(&args(&["GET"])).unwrap_err();
        assert_eq!(err.to_string(), "ERR wrong number of arguments for 'get' command");

        assert!(registry.resolve(&args(&["GET", "a", "b"])).is_err());
        assert!(registry.resolve(&args(&["EXEC", "now"])).is_err());
    }

    #[test]
    fn test_keys_touched() {
        let registry = CommandRegistry::new();

        let mset = registry.lookup(b"MSET").unwrap();
        let keys = mset.keys_touched(&args(&["MSET", "a", "1", "b", "2", "a", "3"])).unwrap();
        assert_eq!(keys, vec![Bytes::from("a"), Bytes::from("b")]);

        let ping = registry.lookup(b"PING").unwrap();
        assert!(ping.keys_touched(&args(&["PING"])).unwrap().is_empty());
    }

    #[test]
    fn test_control_commands_are_flagged() {
        let registry = CommandRegistry::new();
        for name in ["MULTI", "EXEC", "DISCARD", "QUIT", "SELECT"] {
            let descriptor = registry.lookup(name.as_bytes()).unwrap();
            assert!(descriptor.flags.contains(CommandFlags::CONTROL), "{}", name);
            assert!(descriptor.control_kind().is_some());
        }
        assert!(registry.lookup(b"SET").unwrap().is_write());
        assert!(!registry.lookup(b"GET").unwrap().is_write());
    }
}
