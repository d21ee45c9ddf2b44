//! Service façade
//!
//! Entry point for every client command. The service validates a command
//! against the registry, works out which shards it touches and then either
//! runs it directly on its single shard or hands it to the transaction
//! coordinator. MULTI/EXEC bookkeeping lives here too.

mod connection_context;
mod memcache;
mod stats;


pub use connection_context::{ConnectionContext, ReplySink};
pub use stats::{varz_json, Varz, VarzValue};

use crate::commands::{CommandDescriptor, CommandFlags, CommandRegistry, ControlCommand};
use crate::config::{Config, InitOpts};
use crate::error::{CommandError, ShardError, TxError};
use crate::protocol::{McCommand, RespValue};
use crate::server::Acceptor;
use crate::shard::{DbIndex, EngineShardSet};
use crate::transaction::{CommandPlan, Transaction, TransactionCoordinator};
use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use memcache::McRequest;
use stats::ServiceStats;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const SHUTTING_DOWN: &str = "ERR server is shutting down";
const INTERNAL_ERROR: &str = "ERR internal error";
const TX_ABORTED: &str = "ERR transaction aborted";

/// Printable form of a command name for logs
fn display_name(name: &[u8]) -> String {
    match std::str::from_utf8(name) {
        Ok(s) => s.to_string(),
        Err(_) => format!("(b64) {}", general_purpose::STANDARD.encode(name)),
    }
}

/// Keeps the in-flight count raised while a command runs
struct InFlight<'a> {
    service: &'a Service,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.service.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.service.idle.notify_waiters();
        }
    }
}

pub struct Service {
    registry: Arc<CommandRegistry>,
    shard_set: EngineShardSet,
    stats: ServiceStats,
    shutting_down: AtomicBool,
    in_flight: AtomicUsize,
    idle: Notify,
    acceptor_shutdown: Option<CancellationToken>,
}

impl Service {
    /// Build the service; shards are not running until `init`
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        config.validate()?;

        let registry = Arc::new(CommandRegistry::new());
        info!("Registered {} commands", registry.len());

        Ok(Service {
            registry,
            shard_set: EngineShardSet::new(config.num_shards, config.num_databases),
            stats: ServiceStats::default(),
            shutting_down: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
            acceptor_shutdown: None,
        })
    }

    /// Start the shard workers. The acceptor, if any, is stopped by `shutdown`.
    pub fn init(&mut self, acceptor: Option<&Acceptor>, opts: InitOpts) -> anyhow::Result<()> {
        self.shard_set.init(&opts)?;
        self.acceptor_shutdown = acceptor.map(|acceptor| acceptor.shutdown_token());
        info!(
            "Service initialized with {} shards (time updates: {})",
            self.shard_set.size(),
            !opts.disable_time_update
        );
        Ok(())
    }

    /// Stop taking commands, let running ones finish, then stop the acceptor and the shards
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Service shutting down");

        loop {
            let idle = self.idle.notified();
            let running = self.in_flight.load(Ordering::SeqCst);
            if running == 0 {
                break;
            }
            debug!("Waiting for {} in-flight command(s)", running);
            idle.await;
        }

        if let Some(token) = &self.acceptor_shutdown {
            token.cancel();
        }
        self.shard_set.shutdown().await;
        info!("Service stopped");
    }

    pub fn shard_count(&self) -> u32 {
        self.shard_set.size() as u32
    }

    pub fn shard_set(&self) -> &EngineShardSet {
        &self.shard_set
    }

    /// Whether a transaction currently holds `key` of database `db`
    pub async fn is_locked(&self, db: DbIndex, key: impl Into<Bytes>) -> bool {
        match self.shard_set.is_locked(db, key.into()).await {
            Ok(locked) => locked,
            Err(e) => {
                error!("is_locked: {}", e);
                false
            }
        }
    }

    fn enter(&self) -> Option<InFlight<'_>> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = InFlight { service: self };
        if self.shutting_down.load(Ordering::SeqCst) {
            return None;
        }
        Some(guard)
    }

    /// Execute one RESP command and write its reply into `cntx`.
    ///
    /// `args` holds the command name followed by its arguments. Nothing is
    /// replied once the connection has been closed with QUIT.
    pub async fn dispatch_command<S: ReplySink>(&self, args: Vec<Bytes>, cntx: &mut ConnectionContext<S>) {
        if cntx.is_closing() {
            return;
        }

        let _in_flight = match self.enter() {
            Some(guard) => guard,
            None => {
                self.stats.rejected_shutdown.inc();
                cntx.reply(RespValue::error(SHUTTING_DOWN));
                return;
            }
        };

        self.stats.commands.inc();
        let reply = self.route(args, cntx).await;
        if reply.is_error() {
            self.stats.errors.inc();
        }
        cntx.reply(reply);
    }

    /// Execute one memcache command and write its translated reply into `cntx`
    pub async fn dispatch_mc<S: ReplySink>(
        &self,
        cmd: &McCommand,
        value: Option<Bytes>,
        cntx: &mut ConnectionContext<S>,
    ) {
        if cntx.is_closing() {
            return;
        }

        let _in_flight = match self.enter() {
            Some(guard) => guard,
            None => {
                self.stats.rejected_shutdown.inc();
                cntx.reply(RespValue::error(format!("SERVER_ERROR {}", SHUTTING_DOWN)));
                return;
            }
        };

        self.stats.mc_commands.inc();
        let now_ms = crate::shard::unix_time_ms();
        let reply = match memcache::translate(cmd, value.as_ref(), now_ms) {
            Ok(McRequest::Command(args)) => {
                debug!("memcache {:?} -> {}", cmd.cmd_type, display_name(&args[0]));
                let reply = self.route(args, cntx).await;
                memcache::translate_reply(cmd, reply)
            }
            Ok(McRequest::Quit) => {
                cntx.take_transaction();
                cntx.mark_closing();
                return;
            }
            Ok(McRequest::Version) => RespValue::simple_string(memcache::VERSION),
            Err(reply) => reply,
        };

        if reply.is_error() {
            self.stats.errors.inc();
        }
        if !cmd.no_reply {
            cntx.reply(reply);
        }
    }

    /// Produce the reply for one command
    async fn route<S: ReplySink>(&self, args: Vec<Bytes>, cntx: &mut ConnectionContext<S>) -> RespValue {
        let descriptor = match self.registry.resolve(&args) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                if let CommandError::UnknownCommand(_) = e {
                    self.stats.unknown_commands.inc();
                    warn!("Unknown command {}", args.first().map(|n| display_name(n)).unwrap_or_default());
                }
                self.drop_queued(cntx);
                return e.into();
            }
        };

        if let Some(control) = descriptor.control_kind() {
            return self.run_control(control, &descriptor, &args, cntx).await;
        }

        if cntx.in_multi() {
            if let Err(e) = descriptor.key_spec.key_positions(&args) {
                self.drop_queued(cntx);
                return e.into();
            }
        }
        if let Some(tx) = cntx.transaction_mut() {
            debug!("Queued {} ({} in transaction)", descriptor.name, tx.len() + 1);
            tx.queue(descriptor, args);
            return RespValue::simple_string("QUEUED");
        }

        self.run_command(descriptor, args, cntx).await
    }

    async fn run_control<S: ReplySink>(
        &self,
        control: ControlCommand,
        descriptor: &CommandDescriptor,
        args: &[Bytes],
        cntx: &mut ConnectionContext<S>,
    ) -> RespValue {
        if cntx.in_multi() && descriptor.flags.contains(CommandFlags::NO_MULTI) {
            self.drop_queued(cntx);
            return RespValue::error(format!(
                "ERR {} is not allowed inside a transaction",
                descriptor.name
            ));
        }

        match control {
            ControlCommand::Multi => {
                if cntx.in_multi() {
                    return RespValue::error("ERR MULTI calls can not be nested");
                }
                self.stats.multi.inc();
                cntx.begin_transaction();
                RespValue::ok()
            }
            ControlCommand::Exec => match cntx.take_transaction() {
                Some(tx) => self.exec(tx, cntx).await,
                None => RespValue::error("ERR EXEC without MULTI"),
            },
            ControlCommand::Discard => match cntx.take_transaction() {
                Some(tx) => {
                    self.stats.discard.inc();
                    debug!("Discarded transaction of {} command(s)", tx.len());
                    RespValue::ok()
                }
                None => RespValue::error("ERR DISCARD without MULTI"),
            },
            ControlCommand::Quit => {
                cntx.take_transaction();
                cntx.mark_closing();
                RespValue::ok()
            }
            ControlCommand::Select => {
                let index = crate::commands::parse_i64(&args[1]);
                match index {
                    Ok(db) if db >= 0 && (db as usize) < self.shard_set.num_databases() => {
                        cntx.set_db_index(db as DbIndex);
                        RespValue::ok()
                    }
                    Ok(_) => RespValue::error("ERR DB index is out of range"),
                    Err(e) => e.into(),
                }
            }
        }
    }

    /// A command rejected while queueing ends the transaction
    fn drop_queued<S: ReplySink>(&self, cntx: &mut ConnectionContext<S>) {
        if let Some(tx) = cntx.take_transaction() {
            self.stats.tx_queue_errors.inc();
            debug!("Dropped transaction of {} command(s) after a queueing error", tx.len());
        }
    }

    async fn exec<S: ReplySink>(&self, mut tx: Transaction, cntx: &mut ConnectionContext<S>) -> RespValue {
        self.stats.exec.inc();

        if tx.is_empty() {
            return RespValue::array(Vec::new());
        }

        let db = cntx.db_index();
        let mut plans = Vec::with_capacity(tx.len());
        for queued in tx.commands() {
            match CommandPlan::new(queued.descriptor.clone(), &queued.args, db, &self.shard_set) {
                Ok(plan) => plans.push(plan),
                Err(e) => {
                    // Keys were checked while queueing
                    error!("EXEC: planning {} failed: {}", queued.descriptor.name, e);
                    self.stats.internal_errors.inc();
                    return RespValue::error(INTERNAL_ERROR);
                }
            }
        }

        let cancel = cntx.cancellation_token().clone();
        let coordinator = TransactionCoordinator::new(&self.shard_set, db, &cancel);
        match coordinator.execute(&mut tx, plans).await {
            Ok(replies) => RespValue::array(replies),
            Err(e) => self.tx_error(e),
        }
    }

    /// Run a command outside MULTI
    async fn run_command<S: ReplySink>(
        &self,
        descriptor: Arc<CommandDescriptor>,
        args: Vec<Bytes>,
        cntx: &mut ConnectionContext<S>,
    ) -> RespValue {
        let db = cntx.db_index();
        let plan = match CommandPlan::new(descriptor, &args, db, &self.shard_set) {
            Ok(plan) => plan,
            Err(e) => return e.into(),
        };

        if plan.is_single_shard() {
            let slice = &plan.slices[0];
            let descriptor = plan.descriptor.clone();
            let call = slice.args.clone();
            let keys = slice.keys.clone();

            let fast = self
                .shard_set
                .dispatch(slice.shard, move |engine| {
                    engine.try_execute_unlocked(db, &descriptor, &call, &keys)
                })
                .await;

            match fast {
                Ok(Some(reply)) => {
                    self.stats.fast_path.inc();
                    return reply;
                }
                Ok(None) => {
                    self.stats.fast_path_fallback.inc();
                    debug!("{}: keys locked, taking the transaction path", plan.descriptor.name);
                }
                Err(e) => return self.shard_error(e),
            }
        }

        self.stats.implicit_tx.inc();
        let mut tx = Transaction::implicit(plan.descriptor.clone(), args);
        let cancel = cntx.cancellation_token().clone();
        let coordinator = TransactionCoordinator::new(&self.shard_set, db, &cancel);

        match coordinator.execute(&mut tx, vec![plan]).await {
            Ok(mut replies) => replies.pop().unwrap_or(RespValue::Null),
            Err(e) => self.tx_error(e),
        }
    }

    fn tx_error(&self, e: TxError) -> RespValue {
        match e {
            TxError::Aborted(txid) => {
                debug!("tx {} aborted", txid);
                self.stats.tx_aborted.inc();
                RespValue::error(TX_ABORTED)
            }
            internal => {
                error!("Transaction failed: {}", internal);
                self.stats.internal_errors.inc();
                RespValue::error(INTERNAL_ERROR)
            }
        }
    }

    fn shard_error(&self, e: ShardError) -> RespValue {
        error!("Shard failure: {}", e);
        self.stats.internal_errors.inc();
        RespValue::error(INTERNAL_ERROR)
    }

    /// Snapshot of service and shard counters
    pub async fn varz_stats(&self) -> Varz {
        let mut varz = Varz::new();
        varz.push(("version".to_string(), VarzValue::from(env!("CARGO_PKG_VERSION"))));
        varz.push(("num_shards".to_string(), self.shard_set.size().into()));
        varz.push((
            "num_databases".to_string(),
            self.shard_set.num_databases().into(),
        ));
        varz.push((
            "in_flight".to_string(),
            self.in_flight.load(Ordering::SeqCst).into(),
        ));

        self.stats.snapshot(&mut varz);

        match self.shard_set.stats().await {
            Ok(shards) => stats::shard_varz(&shards, &mut varz),
            Err(e) => {
                warn!("varz: shard stats unavailable: {}", e);
                varz.push(("shards".to_string(), VarzValue::from("unavailable")));
            }
        }
        varz
    }
}
