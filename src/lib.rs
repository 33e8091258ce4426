pub mod audit;
pub mod config;
pub mod console;
pub mod engine;
pub mod error;
pub mod loader;
pub mod normalize;
pub mod server;
pub mod session;
pub mod stats;
pub mod store;
#[cfg(feature = "watch")]
pub mod watch;

#[cfg(test)]
mod testing;

pub use audit::{AuditRecord, AuditSink, CsvAuditSink};
pub use config::Config;
pub use engine::{CallDispositionEngine, CallOutcome, FilterServices, TarpitResult, TarpitStep};
pub use server::Server;
pub use session::{CallSession, Sleeper};
pub use store::{NumberListStore, Verdict};
