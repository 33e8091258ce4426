//! Recording fakes for the session, clock and audit seams.

use crate::audit::{AuditRecord, AuditSink};
use crate::config::TarpitConfig;
use crate::engine::FilterServices;
use crate::error::{AuditError, SessionError};
use crate::loader::{NumberListSet, NumberTable, NumberEntry};
use crate::session::{CallSession, Sleeper};
use crate::stats::StatsAggregator;
use crate::store::NumberListStore;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Ordered log shared by a session and a sleeper, so tests can assert the
/// interleaving of waits and actions.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

pub struct FakeSession {
    caller: Option<String>,
    events: EventLog,
    fail_on: Option<&'static str>,
}

impl FakeSession {
    pub fn new(caller: Option<&str>, events: &EventLog) -> Self {
        Self {
            caller: caller.map(str::to_string),
            events: events.clone(),
            fail_on: None,
        }
    }

    /// Make the named action (`progress`, `answer` or `close`) fail.
    pub fn failing(mut self, action: &'static str) -> Self {
        self.fail_on = Some(action);
        self
    }

    fn act(&self, action: &'static str) -> Result<(), SessionError> {
        self.events.push(action);
        if self.fail_on == Some(action) {
            Err(SessionError::Signaling(format!("{action} rejected")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CallSession for FakeSession {
    fn caller_id(&self) -> Option<&str> {
        self.caller.as_deref()
    }

    async fn progress(&self) -> Result<(), SessionError> {
        self.act("progress")
    }

    async fn answer(&self) -> Result<(), SessionError> {
        self.act("answer")
    }

    async fn close(&self) -> Result<(), SessionError> {
        self.act("close")
    }
}

/// Records each requested delay and returns at once.
pub struct FakeSleeper {
    events: EventLog,
}

impl FakeSleeper {
    pub fn new(events: &EventLog) -> Self {
        Self {
            events: events.clone(),
        }
    }
}

#[async_trait]
impl Sleeper for FakeSleeper {
    async fn sleep(&self, duration: Duration) {
        self.events.push(format!("sleep {duration:?}"));
    }
}

/// Records the first delay, then never wakes. Used to hold a call inside the
/// tarpit.
pub struct StallingSleeper {
    events: EventLog,
}

impl StallingSleeper {
    pub fn new(events: &EventLog) -> Self {
        Self {
            events: events.clone(),
        }
    }
}

#[async_trait]
impl Sleeper for StallingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.events.push(format!("sleep {duration:?}"));
        std::future::pending::<()>().await;
    }
}

#[derive(Default)]
pub struct MemoryAudit {
    records: Mutex<Vec<AuditRecord>>,
    pub reopened: AtomicUsize,
    pub closed: AtomicBool,
}

impl MemoryAudit {
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl AuditSink for MemoryAudit {
    fn record(&self, record: &AuditRecord) {
        self.records.lock().unwrap().push(record.clone());
    }

    fn reopen(&self) -> Result<(), AuditError> {
        self.reopened.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// A single in-memory table named `source`.
pub fn table(source: &str, numbers: &[&str]) -> NumberListSet {
    let mut table = NumberTable::new(source);
    for (index, number) in numbers.iter().enumerate() {
        table.entries.insert(
            number.to_string(),
            NumberEntry {
                line: index + 1,
                comment: String::new(),
            },
        );
    }
    NumberListSet::new(vec![table])
}

pub fn tarpit(pre_answer: u64, answer: u64, hangup: u64) -> TarpitConfig {
    TarpitConfig {
        pre_answer_delay: Duration::from_millis(pre_answer),
        answer_delay: Duration::from_millis(answer),
        hangup_delay: Duration::from_millis(hangup),
    }
}

pub fn services(
    block: NumberListSet,
    allow: NumberListSet,
    audit: Arc<MemoryAudit>,
    sleeper: Arc<dyn Sleeper>,
) -> Arc<FilterServices> {
    let stats = Arc::new(StatsAggregator::new());
    Arc::new(FilterServices {
        store: Arc::new(NumberListStore::with_lists(block, allow, stats)),
        audit,
        sleeper,
        country_code: "44".to_string(),
        tarpit: tarpit(100, 100, 1000),
    })
}
