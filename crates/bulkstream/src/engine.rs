//! The assembled engine.

use std::sync::Arc;

use bulkstream_audit::{AuditBackend, AuditWriterComputation, LogEntry, MemoryAuditBackend};
use bulkstream_bulk::automation::{ACTION_NAME, AutomationBulkAction};
use bulkstream_bulk::{
    BulkAction, BulkActionFactory, BulkService, BulkTopology, Collaborators, CommandStore, DONE_STREAM,
    MapOperationRegistry, MemoryCommandStore, MemoryRepository, MemoryScrollProvider, MemoryStatusStore,
    OperationRegistry, ScrollProvider, SessionFactory, SetPropertyOperation, StatusStore, action_stream,
};
use bulkstream_computation::{
    Clock, FlushPolicy, LogOffset, MemoryLog, ProcessorError, Settings, StreamProcessor, SystemClock, Topology,
};
use bulkstream_config::BulkstreamConfig;
use bulkstream_types::{CodecError, Command, CommandBuilder, CommandId, CommandStatus};

use crate::error::Result;

/// Wires collaborators, topology and processor from a [`BulkstreamConfig`].
///
/// Every collaborator defaults to its in-memory implementation. The
/// `automation` action is always served; more actions can be added with
/// [`action`](Self::action).
pub struct BulkstreamBuilder<C: Clock + Clone> {
    config: BulkstreamConfig,
    clock: C,
    log: MemoryLog,
    registry: Arc<dyn OperationRegistry>,
    sessions: Arc<dyn SessionFactory>,
    scroll: Arc<dyn ScrollProvider>,
    commands: Arc<dyn CommandStore>,
    statuses: Arc<dyn StatusStore>,
    audit: Arc<dyn AuditBackend>,
    actions: Vec<(String, BulkActionFactory)>,
}

impl BulkstreamBuilder<SystemClock> {
    fn new(config: BulkstreamConfig) -> Self {
        Self {
            config,
            clock: SystemClock,
            log: MemoryLog::new(),
            registry: Arc::new(MapOperationRegistry::new().register(SetPropertyOperation::ID, SetPropertyOperation)),
            sessions: Arc::new(MemoryRepository::new("default")),
            scroll: Arc::new(MemoryScrollProvider::new()),
            commands: Arc::new(MemoryCommandStore::new()),
            statuses: Arc::new(MemoryStatusStore::new()),
            audit: Arc::new(MemoryAuditBackend::new()),
            actions: Vec::new(),
        }
    }
}

impl<C: Clock + Clone> BulkstreamBuilder<C> {
    pub fn clock<T: Clock + Clone>(self, clock: T) -> BulkstreamBuilder<T> {
        BulkstreamBuilder {
            config: self.config,
            clock,
            log: self.log,
            registry: self.registry,
            sessions: self.sessions,
            scroll: self.scroll,
            commands: self.commands,
            statuses: self.statuses,
            audit: self.audit,
            actions: self.actions,
        }
    }

    /// Resumes from the committed positions of `log`.
    pub fn log(mut self, log: MemoryLog) -> Self {
        self.log = log;
        self
    }

    pub fn registry(mut self, registry: Arc<dyn OperationRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn sessions(mut self, sessions: Arc<dyn SessionFactory>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn scroll(mut self, scroll: Arc<dyn ScrollProvider>) -> Self {
        self.scroll = scroll;
        self
    }

    pub fn commands(mut self, commands: Arc<dyn CommandStore>) -> Self {
        self.commands = commands;
        self
    }

    pub fn statuses(mut self, statuses: Arc<dyn StatusStore>) -> Self {
        self.statuses = statuses;
        self
    }

    pub fn audit_backend(mut self, audit: Arc<dyn AuditBackend>) -> Self {
        self.audit = audit;
        self
    }

    /// Serves `name` with actions built by `factory`.
    pub fn action<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn BulkAction> + Send + Sync + 'static,
    {
        self.actions.push((name.into(), Arc::new(factory)));
        self
    }

    fn settings(&self, actions: &[String]) -> Settings {
        let config = &self.config;
        let mut settings = Settings::new(config.processor.concurrency, config.processor.partitions);
        for action in actions {
            settings = settings
                .set_concurrency(action.clone(), config.concurrency_for(action))
                .set_partitions(action_stream(action), config.partitions_for(action));
        }
        settings.set_concurrency(AuditWriterComputation::NAME, config.audit.concurrency)
    }

    fn topology(&self) -> Result<Topology> {
        let collaborators = Collaborators {
            commands: Arc::clone(&self.commands),
            statuses: Arc::clone(&self.statuses),
            sessions: Arc::clone(&self.sessions),
            scroll: Arc::clone(&self.scroll),
        };
        let registry = Arc::clone(&self.registry);
        let mut bulk = BulkTopology::new(collaborators)
            .action(ACTION_NAME, move || Box::new(AutomationBulkAction::new(Arc::clone(&registry))));
        for (name, factory) in &self.actions {
            let factory = Arc::clone(factory);
            bulk = bulk.action(name.clone(), move || factory());
        }

        let mut builder = bulk.register(Topology::builder());
        let audit = &self.config.audit;
        if audit.enabled {
            let backend = Arc::clone(&self.audit);
            let policy = FlushPolicy::new(audit.batch_size, audit.batch_threshold_ms);
            builder = builder.add_computation(
                move || Box::new(AuditWriterComputation::new(Arc::clone(&backend), policy)),
                &[format!("i1:{}", audit.stream)],
            );
        }
        Ok(builder.build()?)
    }

    /// Validates the configuration, builds the topology and starts the
    /// processor.
    pub fn build(self) -> Result<Bulkstream<C>> {
        self.config.validate()?;
        let topology = self.topology()?;

        let mut actions: Vec<String> = self.actions.iter().map(|(name, _)| name.clone()).collect();
        actions.push(ACTION_NAME.to_string());
        let settings = self.settings(&actions);

        let mut processor = StreamProcessor::new(topology, settings, self.log, self.clock.clone())?;
        processor.start()?;
        tracing::info!(
            computations = processor.topology().computations().len(),
            actions = ?actions,
            audit = self.config.audit.enabled,
            "bulkstream started"
        );

        Ok(Bulkstream {
            service: BulkService::new(Arc::clone(&self.commands), Arc::clone(&self.statuses), self.clock),
            config: self.config,
            processor,
        })
    }
}

/// A running bulk engine.
pub struct Bulkstream<C: Clock + Clone = SystemClock> {
    config: BulkstreamConfig,
    service: BulkService<C>,
    processor: StreamProcessor<C>,
}

impl Bulkstream<SystemClock> {
    pub fn builder(config: BulkstreamConfig) -> BulkstreamBuilder<SystemClock> {
        BulkstreamBuilder::new(config)
    }
}

impl<C: Clock + Clone> Bulkstream<C> {
    /// A command builder carrying the configured sizes for `action`.
    pub fn command(&self, action: &str, query: impl Into<String>) -> CommandBuilder {
        Command::builder(action, query)
            .bucket_size(self.config.bucket_size_for(action))
            .batch_size(self.config.batch_size_for(action))
    }

    pub fn submit(&mut self, command: Command) -> Result<CommandId> {
        Ok(self.service.submit(&mut self.processor, command)?)
    }

    /// Appends `entry` to the audit stream.
    pub fn audit(&mut self, entry: &LogEntry) -> Result<LogOffset> {
        let record = entry.to_record()?;
        Ok(self.processor.append(&self.config.audit.stream, record)?)
    }

    pub fn run_once(&mut self) -> Result<usize> {
        Ok(self.processor.run_once()?)
    }

    pub fn run_until_idle(&mut self) -> Result<usize> {
        Ok(self.processor.run_until_idle()?)
    }

    pub fn status(&self, id: &CommandId) -> Result<Option<CommandStatus>> {
        Ok(self.service.status(id)?)
    }

    /// Final statuses emitted so far, in completion order per partition.
    pub fn completed(&self) -> Result<Vec<CommandStatus>> {
        let records = self
            .processor
            .log()
            .records(DONE_STREAM)
            .map_err(ProcessorError::from)?;
        records
            .into_iter()
            .map(|record| CommandStatus::decode(record.data()))
            .collect::<std::result::Result<_, CodecError>>()
            .map_err(Into::into)
    }

    pub fn config(&self) -> &BulkstreamConfig {
        &self.config
    }

    pub fn processor(&self) -> &StreamProcessor<C> {
        &self.processor
    }

    /// Graceful stop. The returned log resumes a new engine through
    /// [`BulkstreamBuilder::log`].
    pub fn shutdown(self) -> MemoryLog {
        tracing::info!("bulkstream stopping");
        self.processor.shutdown()
    }
}
