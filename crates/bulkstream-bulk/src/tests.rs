//! Unit tests for bulkstream-bulk
//!
//! End-to-end tests run the standard bulk topology on a `StreamProcessor`
//! with in-memory collaborators; property tests drive `BulkComputation`
//! directly through a `ComputationContext`.

use std::sync::{Arc, Mutex};

use bulkstream_computation::{
    Computation, ComputationContext, ManualClock, MemoryLog, Settings, StreamProcessor,
};
use bulkstream_types::{
    Bucket, Command, CommandBuilder, CommandId, CommandState, CommandStatus, Record, StatusDelta,
    StreamName, Watermark,
};
use proptest::prelude::*;
use serde_json::{Value, json};

use crate::*;

// ============================================================================
// Test Helpers
// ============================================================================

type Calls = Arc<Mutex<Vec<Vec<String>>>>;

const SINGLE: &str = "Test.Single";
const AGGREGATE: &str = "Test.Aggregate";

fn is_failing(doc: &Document) -> bool {
    doc.property("fail") == Some(&Value::Bool(true))
}

/// Records every invocation and fails when an input document has `fail`.
fn recording(shape: InputShape, calls: &Calls) -> FnOperation {
    let calls = Arc::clone(calls);
    FnOperation::new(shape, move |_session, input, _params| {
        calls.lock().unwrap().push(input.ids());
        let failing: Vec<String> = match &input {
            OperationInput::Document(doc) => vec![doc.clone()],
            OperationInput::Documents(docs) => docs.clone(),
        }
        .iter()
        .filter(|d| is_failing(d))
        .map(|d| d.id().to_string())
        .collect();
        if failing.is_empty() {
            Ok(())
        } else {
            Err(OperationError::new(format!("failed on {}", failing.join(","))))
        }
    })
}

fn registry(calls: &Calls) -> Arc<dyn OperationRegistry> {
    Arc::new(
        MapOperationRegistry::new()
            .register(SINGLE, recording(InputShape::Single, calls))
            .register(AGGREGATE, recording(InputShape::Aggregate, calls))
            .register(SetPropertyOperation::ID, SetPropertyOperation),
    )
}

/// Session factory whose sessions fail the save after `saves_left` saves.
#[derive(Clone)]
struct FlakySessions {
    repo: MemoryRepository,
    saves_left: Arc<Mutex<Option<u32>>>,
}

struct FlakySession {
    inner: Box<dyn Session>,
    saves_left: Arc<Mutex<Option<u32>>>,
}

impl SessionFactory for FlakySessions {
    fn open(&self, repository: &str, principal: &str) -> Result<Box<dyn Session>, SessionError> {
        Ok(Box::new(FlakySession {
            inner: self.repo.open(repository, principal)?,
            saves_left: Arc::clone(&self.saves_left),
        }))
    }
}

impl Session for FlakySession {
    fn load(&mut self, ids: &[String]) -> Vec<Result<Document, SessionError>> {
        self.inner.load(ids)
    }

    fn update(&mut self, document: Document) -> Result<(), SessionError> {
        self.inner.update(document)
    }

    fn save(&mut self) -> Result<(), SessionError> {
        let mut left = self.saves_left.lock().unwrap();
        match *left {
            Some(0) => {
                *left = None;
                Err(SessionError::Failed("disk full".to_string()))
            }
            Some(n) => {
                *left = Some(n - 1);
                self.inner.save()
            }
            None => self.inner.save(),
        }
    }
}

struct Harness {
    repo: MemoryRepository,
    scroll: MemoryScrollProvider,
    collaborators: Collaborators,
    registry: Arc<dyn OperationRegistry>,
    calls: Calls,
    service: BulkService<ManualClock>,
    processor: StreamProcessor<ManualClock>,
}

impl Harness {
    fn new() -> Self {
        Self::with_sessions(|repo| Arc::new(repo.clone()))
    }

    fn with_sessions(sessions: impl FnOnce(&MemoryRepository) -> Arc<dyn SessionFactory>) -> Self {
        let repo = MemoryRepository::new("default");
        let scroll = MemoryScrollProvider::new();
        let commands = Arc::new(MemoryCommandStore::new());
        let statuses = Arc::new(MemoryStatusStore::new());
        let collaborators = Collaborators {
            commands: commands.clone(),
            statuses: statuses.clone(),
            sessions: sessions(&repo),
            scroll: Arc::new(scroll.clone()),
        };
        let calls = Calls::default();
        let registry = registry(&calls);
        let clock = ManualClock::new(1_000);
        let service = BulkService::new(commands, statuses.clone(), clock.clone());
        let processor = Self::processor(&collaborators, &registry, MemoryLog::new(), clock);

        Self {
            repo,
            scroll,
            collaborators,
            registry,
            calls,
            service,
            processor,
        }
    }

    fn processor(
        collaborators: &Collaborators,
        registry: &Arc<dyn OperationRegistry>,
        log: MemoryLog,
        clock: ManualClock,
    ) -> StreamProcessor<ManualClock> {
        let registry = Arc::clone(registry);
        let topology = BulkTopology::new(collaborators.clone())
            .action(automation::ACTION_NAME, move || {
                Box::new(AutomationBulkAction::new(Arc::clone(&registry)))
            })
            .build()
            .expect("bulk topology");
        let mut processor =
            StreamProcessor::new(topology, Settings::new(1, 2), log, clock).expect("processor");
        processor.start().expect("start");
        processor
    }

    /// Simulates a crash and restarts from the committed positions.
    fn crash_and_restart(self) -> Self {
        let clock = self.processor.clock().clone();
        let log = self.processor.crash();
        let processor = Self::processor(&self.collaborators, &self.registry, log, clock);
        Self { processor, ..self }
    }

    fn docs(&self, ids: &[&str], failing: &[&str]) {
        for id in ids {
            let mut doc = Document::new(*id);
            if failing.contains(id) {
                doc.set_property("fail", true);
            }
            self.repo.insert(doc);
        }
    }

    fn submit(&mut self, command: Command) -> CommandId {
        self.service.submit(&mut self.processor, command).expect("submit")
    }

    fn run(&mut self, command: Command) -> CommandStatus {
        let id = self.submit(command);
        self.processor.run_until_idle().expect("run");
        self.status(&id)
    }

    fn status(&self, id: &CommandId) -> CommandStatus {
        self.service.status(id).unwrap().expect("status exists")
    }

    fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    fn done(&self) -> Vec<CommandStatus> {
        self.processor
            .log()
            .records(DONE_STREAM)
            .unwrap()
            .into_iter()
            .map(|r| CommandStatus::decode(r.data()).unwrap())
            .collect()
    }
}

fn automation(operation_id: &str, query: &str) -> CommandBuilder {
    Command::builder(automation::ACTION_NAME, query).param(automation::OPERATION_ID, operation_id)
}

fn strings(ids: &[&str]) -> Vec<String> {
    ids.iter().map(ToString::to_string).collect()
}

// ============================================================================
// Fail-fast vs accumulate
// ============================================================================

#[test]
fn accumulates_isolated_errors() {
    let mut h = Harness::new();
    h.docs(&["a", "b", "c"], &["b"]);
    h.scroll.insert("abc", ["a", "b", "c"]);

    let status = h.run(automation(SINGLE, "abc").build().unwrap());

    assert_eq!(status.state, CommandState::Completed);
    assert_eq!((status.processed, status.errors, status.skipped), (2, 1, 0));
    assert_eq!(status.total, Some(3));
    assert_eq!(status.failed_ids, vec!["b"]);
    assert_eq!(status.error_message.as_deref(), Some("failed on b"));
    assert_eq!(h.calls(), vec![strings(&["a"]), strings(&["b"]), strings(&["c"])]);
}

#[test]
fn fail_on_error_aborts_on_first_failure() {
    let mut h = Harness::new();
    h.docs(&["a", "b", "c"], &["b"]);
    h.scroll.insert("abc", ["a", "b", "c"]);

    let status = h.run(automation(SINGLE, "abc").fail_on_error(true).build().unwrap());

    assert_eq!(status.state, CommandState::Failed);
    assert_eq!(status.processed, 1);
    assert_eq!(status.failed_ids, vec!["b"]);
    assert_eq!(status.error_message.as_deref(), Some("failed on b"));
    assert!(status.completed_at_ms.is_some());
    // c is never attempted
    assert_eq!(h.calls(), vec![strings(&["a"]), strings(&["b"])]);
}

#[test]
fn fail_on_error_ignores_later_buckets() {
    let mut h = Harness::new();
    h.docs(&["a", "b", "c", "d"], &["b"]);
    h.scroll.insert("abcd", ["a", "b", "c", "d"]);

    let command = automation(SINGLE, "abcd")
        .bucket_size(1)
        .fail_on_error(true)
        .build()
        .unwrap();
    let status = h.run(command);

    assert_eq!(status.state, CommandState::Failed);
    assert_eq!(status.processed, 1);
    assert_eq!(h.calls(), vec![strings(&["a"]), strings(&["b"])]);
    assert_eq!(h.done().len(), 1);
}

// ============================================================================
// Input shapes
// ============================================================================

#[test]
fn aggregate_operation_is_invoked_once_per_batch() {
    let mut h = Harness::new();
    h.docs(&["a", "b", "c"], &[]);
    h.scroll.insert("abc", ["a", "b", "c"]);

    let status = h.run(automation(AGGREGATE, "abc").build().unwrap());

    assert_eq!(status.state, CommandState::Completed);
    assert_eq!(status.processed, 3);
    assert_eq!(h.calls(), vec![strings(&["a", "b", "c"])]);
}

#[test]
fn single_operation_is_invoked_per_record_in_order() {
    let mut h = Harness::new();
    h.docs(&["c", "a", "b"], &[]);
    h.scroll.insert("cab", ["c", "a", "b"]);

    let status = h.run(automation(SINGLE, "cab").build().unwrap());

    assert_eq!(status.processed, 3);
    assert_eq!(h.calls(), vec![strings(&["c"]), strings(&["a"]), strings(&["b"])]);
}

#[test]
fn aggregate_failure_counts_the_whole_batch() {
    let mut h = Harness::new();
    h.docs(&["a", "b", "c", "d"], &["c"]);
    h.scroll.insert("abcd", ["a", "b", "c", "d"]);

    let command = automation(AGGREGATE, "abcd").batch_size(2).build().unwrap();
    let status = h.run(command);

    assert_eq!(status.state, CommandState::Completed);
    assert_eq!((status.processed, status.errors), (2, 2));
    assert_eq!(status.failed_ids, vec!["c", "d"]);
    assert_eq!(h.calls(), vec![strings(&["a", "b"]), strings(&["c", "d"])]);
}

#[test]
fn aggregate_failure_with_fail_on_error_aborts_the_command() {
    let mut h = Harness::new();
    h.docs(&["a", "b", "c", "d", "e", "f"], &["c"]);
    h.scroll.insert("abcdef", ["a", "b", "c", "d", "e", "f"]);

    let command = automation(AGGREGATE, "abcdef")
        .bucket_size(4)
        .batch_size(2)
        .fail_on_error(true)
        .build()
        .unwrap();
    let status = h.run(command);

    assert_eq!(status.state, CommandState::Failed);
    assert_eq!(status.processed, 2);
    assert_eq!(status.failed_ids, vec!["c", "d"]);
    assert_eq!(status.error_message.as_deref(), Some("failed on c"));
    // the second bucket (e, f) is never invoked
    assert_eq!(h.calls(), vec![strings(&["a", "b"]), strings(&["c", "d"])]);
    assert_eq!(h.done().len(), 1);
}

#[test]
fn unloadable_ids_count_as_errors() {
    let mut h = Harness::new();
    h.docs(&["a", "c"], &[]);
    h.scroll.insert("abc", ["a", "ghost", "c"]);

    let status = h.run(automation(SINGLE, "abc").build().unwrap());

    assert_eq!((status.processed, status.errors), (2, 1));
    assert_eq!(status.failed_ids, vec!["ghost"]);
    assert_eq!(status.error_message.as_deref(), Some("document ghost not found"));
}

// ============================================================================
// Configuration errors
// ============================================================================

#[test]
fn unknown_action_skips_every_bucket() {
    let mut h = Harness::new();
    h.docs(&["a", "b", "c"], &[]);
    h.scroll.insert("abc", ["a", "b", "c"]);

    let command = Command::builder("doesNotExist", "abc").bucket_size(2).batch_size(1).build().unwrap();
    let status = h.run(command);

    assert_eq!(status.state, CommandState::Completed);
    assert_eq!((status.processed, status.errors, status.skipped), (0, 0, 3));
    assert_eq!(status.error_message.as_deref(), Some("no bulk action named doesNotExist"));
    assert!(h.calls().is_empty());
}

#[test]
fn unknown_operation_skips_buckets_without_failing() {
    let mut h = Harness::new();
    h.docs(&["a", "b", "c"], &[]);
    h.scroll.insert("abc", ["a", "b", "c"]);

    let command = automation("doesNotExist", "abc")
        .bucket_size(1)
        .fail_on_error(true)
        .build()
        .unwrap();
    let status = h.run(command);

    assert_eq!(status.state, CommandState::Completed);
    assert_eq!((status.processed, status.skipped), (0, 3));
    assert_eq!(status.error_message.as_deref(), Some("operation doesNotExist not found"));
}

#[test]
fn unknown_repository_skips_buckets() {
    let mut h = Harness::new();
    h.scroll.insert("abc", ["a", "b", "c"]);

    let command = automation(SINGLE, "abc").repository("elsewhere").build().unwrap();
    let status = h.run(command);

    assert_eq!(status.state, CommandState::Completed);
    assert_eq!(status.skipped, 3);
    assert_eq!(h.repo.open_sessions(), 0);
}

// ============================================================================
// Status lifecycle
// ============================================================================

#[test]
fn submitted_command_is_scheduled_then_completed_once() {
    let mut h = Harness::new();
    h.docs(&["a", "b"], &[]);
    h.scroll.insert("ab", ["a", "b"]);

    let id = h.submit(automation(SINGLE, "ab").build().unwrap());
    let status = h.status(&id);
    assert_eq!(status.state, CommandState::Scheduled);
    assert_eq!(status.submitted_at_ms, 1_000);
    assert_eq!(h.service.command(&id).unwrap().unwrap().submitted_at_ms(), 1_000);

    h.processor.run_until_idle().unwrap();

    let done = h.done();
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].command_id, id);
    assert_eq!(done[0].state, CommandState::Completed);
    assert_eq!(h.status(&id), done[0]);
    assert_eq!(h.repo.open_sessions(), 0);
}

#[test]
fn resubmitting_a_command_is_rejected() {
    let mut h = Harness::new();
    let command = automation(SINGLE, "ab").id("cmd-1").build().unwrap();
    h.submit(command.clone());
    assert!(matches!(
        h.service.submit(&mut h.processor, command),
        Err(ServiceError::AlreadySubmitted(id)) if id.as_str() == "cmd-1"
    ));
}

#[test]
fn empty_scroll_completes_immediately() {
    let mut h = Harness::new();
    h.scroll.insert("nothing", Vec::<String>::new());

    let status = h.run(automation(SINGLE, "nothing").build().unwrap());

    assert_eq!(status.state, CommandState::Completed);
    assert_eq!(status.total, Some(0));
}

#[test]
fn scroll_failure_fails_the_command() {
    let mut h = Harness::new();

    let status = h.run(automation(SINGLE, "not a query").build().unwrap());

    assert_eq!(status.state, CommandState::Failed);
    assert_eq!(status.error_message.as_deref(), Some("invalid query \"not a query\""));
}

#[test]
fn query_limit_caps_the_total() {
    let mut h = Harness::new();
    h.docs(&["a", "b", "c"], &[]);
    h.scroll.insert("abc", ["a", "b", "c"]);

    let status = h.run(automation(SINGLE, "abc").query_limit(2).build().unwrap());

    assert_eq!(status.total, Some(2));
    assert_eq!(status.processed, 2);
}

// ============================================================================
// Redelivery
// ============================================================================

#[test]
fn redelivered_bucket_reaches_the_same_final_state() {
    let saves_left = Arc::new(Mutex::new(Some(1)));
    let flaky = Arc::clone(&saves_left);
    let mut h = Harness::with_sessions(move |repo| {
        Arc::new(FlakySessions {
            repo: repo.clone(),
            saves_left: flaky,
        })
    });
    let ids = ["a", "b", "c", "d", "e", "f"];
    h.docs(&ids, &[]);
    h.scroll.insert("all", ids);
    let command = automation(SetPropertyOperation::ID, "all")
        .batch_size(2)
        .param(
            automation::OPERATION_PARAMETERS,
            json!({"property": "dc:title", "value": "archived"}),
        )
        .build()
        .unwrap();

    let id = h.submit(command);
    assert!(h.processor.run_until_idle().is_err());
    // First batch applied, but the bucket was never checkpointed.
    assert_eq!(h.repo.get("a").unwrap().property("dc:title"), Some(&json!("archived")));
    assert_eq!(h.repo.get("c").unwrap().property("dc:title"), None);
    assert_eq!(*saves_left.lock().unwrap(), None);

    let mut h = h.crash_and_restart();
    h.processor.run_until_idle().unwrap();

    let status = h.status(&id);
    assert_eq!(status.state, CommandState::Completed);
    assert_eq!((status.processed, status.errors), (6, 0));
    for doc in ids {
        assert_eq!(h.repo.get(doc).unwrap().property("dc:title"), Some(&json!("archived")));
    }
    assert_eq!(h.done().len(), 1);
}

// ============================================================================
// BulkComputation driven directly
// ============================================================================

struct Direct {
    repo: MemoryRepository,
    commands: Arc<MemoryCommandStore>,
    statuses: Arc<MemoryStatusStore>,
    collaborators: Collaborators,
    registry: Arc<dyn OperationRegistry>,
}

impl Direct {
    fn new() -> Self {
        let repo = MemoryRepository::new("default");
        let commands = Arc::new(MemoryCommandStore::new());
        let statuses = Arc::new(MemoryStatusStore::new());
        let collaborators = Collaborators {
            commands: commands.clone(),
            statuses: statuses.clone(),
            sessions: Arc::new(repo.clone()),
            scroll: Arc::new(MemoryScrollProvider::new()),
        };
        Self {
            repo,
            commands,
            statuses,
            collaborators,
            registry: registry(&Calls::default()),
        }
    }

    fn computation(&self) -> BulkComputation<AutomationBulkAction> {
        BulkComputation::new(
            automation::ACTION_NAME,
            AutomationBulkAction::new(Arc::clone(&self.registry)),
            self.collaborators.clone(),
        )
    }

    fn command(&self, builder: CommandBuilder) -> Command {
        let command = builder.build().unwrap();
        self.commands.put(command.clone()).unwrap();
        command
    }
}

/// Delivers a bucket and returns the delta it produced, if any.
fn deliver(computation: &mut BulkComputation<AutomationBulkAction>, bucket: &Bucket) -> Option<StatusDelta> {
    let mut ctx = ComputationContext::new(vec![StreamName::new(STATUS_STREAM)], 0);
    let record = Record::new(
        bucket.command_id().as_str().to_string(),
        bucket.encode().unwrap(),
        Watermark::LOW,
    );
    computation.process_record(&mut ctx, "i1", record).unwrap();
    assert!(ctx.checkpoint_requested());
    ctx.produced(STATUS_STREAM)
        .first()
        .map(|r| StatusDelta::decode(r.data()).unwrap())
}

#[test]
fn bucket_cycle_follows_outcome() {
    let direct = Direct::new();
    direct.repo.insert(Document::new("a"));
    let good = direct.command(automation(SINGLE, "q").id("good"));
    let bad = direct.command(automation("doesNotExist", "q").id("bad"));
    let mut computation = direct.computation();
    assert_eq!(computation.cycle(), &BucketCycle::Idle);

    deliver(&mut computation, &Bucket::new(good.id().clone(), 0, strings(&["a"])));
    assert_eq!(
        computation.cycle(),
        &BucketCycle::Done {
            command_id: good.id().clone(),
            bucket_key: "good:0000000000".to_string(),
        }
    );

    let delta = deliver(&mut computation, &Bucket::new(bad.id().clone(), 0, strings(&["a"]))).unwrap();
    assert!(computation.cycle().is_aborted());
    assert_eq!(computation.cycle().bucket_key(), Some("bad:0000000000"));
    assert_eq!((delta.skipped, delta.fatal), (1, false));
    assert!(!computation.is_aborted(bad.id()));
}

#[test]
fn bucket_of_unknown_command_is_acknowledged() {
    let direct = Direct::new();
    let mut computation = direct.computation();
    let delta = deliver(&mut computation, &Bucket::new(CommandId::new("ghost"), 0, strings(&["a"])));
    assert_eq!(delta, None);
    assert_eq!(computation.cycle(), &BucketCycle::Idle);
}

#[test]
fn fatal_delta_keeps_successes_before_the_failure() {
    let direct = Direct::new();
    for (id, fail) in [("a", false), ("b", false), ("c", true), ("d", false)] {
        direct.repo.insert(Document::new(id).with_property("fail", fail));
    }
    let command = direct.command(automation(SINGLE, "q").batch_size(1).fail_on_error(true));
    let mut computation = direct.computation();

    let delta = deliver(
        &mut computation,
        &Bucket::new(command.id().clone(), 0, strings(&["a", "b", "c", "d"])),
    )
    .unwrap();

    assert!(delta.fatal);
    assert_eq!((delta.processed, delta.errors), (2, 1));
    assert_eq!(delta.failed_ids, vec!["c"]);
    assert!(computation.is_aborted(command.id()));

    let later = deliver(&mut computation, &Bucket::new(command.id().clone(), 1, strings(&["d"])));
    assert_eq!(later, None);
}

#[test]
fn aborted_command_is_forgotten_once_its_status_is_terminal() {
    let direct = Direct::new();
    direct.repo.insert(Document::new("a").with_property("fail", true));
    direct.repo.insert(Document::new("b"));
    let command = direct.command(automation(SINGLE, "q").fail_on_error(true));
    let mut computation = direct.computation();

    let delta = deliver(&mut computation, &Bucket::new(command.id().clone(), 0, strings(&["a"]))).unwrap();
    assert!(delta.fatal);
    assert!(computation.is_aborted(command.id()));

    let mut status = CommandStatus::scheduled(&command);
    status.apply(&delta, 2_000);
    assert_eq!(status.state, CommandState::Failed);
    direct.statuses.put(status).unwrap();

    let later = deliver(&mut computation, &Bucket::new(command.id().clone(), 1, strings(&["b"])));
    assert_eq!(later, None);
    assert!(!computation.is_aborted(command.id()));
}

fn doc_id(i: usize) -> String {
    format!("doc-{i:02}")
}

const PROP_IDS: usize = 24;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn deltas_merge_to_the_single_bucket_result(
        failing in proptest::collection::btree_set(0..PROP_IDS, 0..PROP_IDS),
        sizes in proptest::collection::vec(1usize..8, PROP_IDS),
        order in Just((0..PROP_IDS).collect::<Vec<usize>>()).prop_shuffle(),
    ) {
        let direct = Direct::new();
        for i in 0..PROP_IDS {
            direct.repo.insert(Document::new(doc_id(i)).with_property("fail", failing.contains(&i)));
        }
        let command = direct.command(automation(SINGLE, "q").batch_size(3));
        let ids: Vec<String> = (0..PROP_IDS).map(doc_id).collect();

        let mut buckets = Vec::new();
        let mut start = 0;
        for size in sizes {
            if start >= ids.len() {
                break;
            }
            let end = (start + size).min(ids.len());
            buckets.push(Bucket::new(command.id().clone(), buckets.len() as u64, ids[start..end].to_vec()));
            start = end;
        }
        let mut indexed: Vec<(usize, Bucket)> = buckets.into_iter().enumerate().collect();
        indexed.sort_by_key(|(i, _)| order[*i]);

        let mut merged = StatusDelta::empty(command.id().clone());
        let mut computation = direct.computation();
        for (_, bucket) in &indexed {
            merged += &deliver(&mut computation, bucket).unwrap();
        }

        let whole = deliver(
            &mut direct.computation(),
            &Bucket::new(command.id().clone(), 0, ids.clone()),
        )
        .unwrap();

        prop_assert_eq!(merged.processed, whole.processed);
        prop_assert_eq!(merged.errors, whole.errors);
        prop_assert_eq!(merged.failed_ids, whole.failed_ids);
        prop_assert_eq!(merged.processed + merged.errors, PROP_IDS as u64);
        prop_assert_eq!(merged.errors, failing.len() as u64);
    }
}
