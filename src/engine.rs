//! Per-call decision and the blocked-call tarpit.
//!
//! Each inbound call gets its own [`CallDispositionEngine`]. The engine walks
//! an explicit state machine, one transition per [`advance`] call:
//!
//! ```text
//! Received -> Normalized -> Classified -> Allowed ----------------> Terminal
//!                                      \-> Tarpit(PreAnswerWait)
//!                                          -> Tarpit(Ringing) -> ... -> Terminal
//! ```
//!
//! Blocked callers are rung, answered and hung up with a delay before each
//! action. Every session action is attempted at most once and a failed
//! action ends the sequence.
//!
//! [`advance`]: CallDispositionEngine::advance

use crate::audit::{AuditRecord, AuditSink};
use crate::config::TarpitConfig;
use crate::normalize::normalize;
use crate::session::{CallSession, Sleeper};
use crate::store::{NumberListStore, Verdict};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Everything a call needs, built once and shared by every call task.
pub struct FilterServices {
    pub store: Arc<NumberListStore>,
    pub audit: Arc<dyn AuditSink>,
    pub sleeper: Arc<dyn Sleeper>,
    pub country_code: String,
    pub tarpit: TarpitConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TarpitStep {
    PreAnswerWait,
    Ringing,
    AnswerWait,
    Answering,
    HangupWait,
    HangingUp,
}

impl TarpitStep {
    pub const FIRST: TarpitStep = TarpitStep::PreAnswerWait;

    pub fn next(self) -> Option<TarpitStep> {
        match self {
            TarpitStep::PreAnswerWait => Some(TarpitStep::Ringing),
            TarpitStep::Ringing => Some(TarpitStep::AnswerWait),
            TarpitStep::AnswerWait => Some(TarpitStep::Answering),
            TarpitStep::Answering => Some(TarpitStep::HangupWait),
            TarpitStep::HangupWait => Some(TarpitStep::HangingUp),
            TarpitStep::HangingUp => None,
        }
    }
}

impl fmt::Display for TarpitStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TarpitStep::PreAnswerWait => "pre-answer wait",
            TarpitStep::Ringing => "ringing",
            TarpitStep::AnswerWait => "answer wait",
            TarpitStep::Answering => "answering",
            TarpitStep::HangupWait => "hangup wait",
            TarpitStep::HangingUp => "hanging up",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum TarpitResult {
    Completed,
    Aborted { step: TarpitStep, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CallOutcome {
    /// No caller id was presented.
    Skipped,
    Allowed { whitelisted: bool },
    Blocked { tarpit: TarpitResult },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallState {
    Received,
    Normalized { original: String, number: String },
    Classified { number: String, verdict: Verdict },
    Allowed { whitelisted: bool },
    Tarpit(TarpitStep),
    Terminal(CallOutcome),
}

pub struct CallDispositionEngine<'a, S: CallSession + ?Sized> {
    services: Arc<FilterServices>,
    session: &'a S,
    state: CallState,
    tid: String,
    ocid: String,
    cid: String,
}

impl<'a, S: CallSession + ?Sized> CallDispositionEngine<'a, S> {
    pub fn new(services: Arc<FilterServices>, session: &'a S) -> Self {
        let mut tid = Uuid::new_v4().simple().to_string();
        tid.truncate(8);
        Self {
            services,
            session,
            state: CallState::Received,
            tid,
            ocid: String::new(),
            cid: String::new(),
        }
    }

    pub fn state(&self) -> &CallState {
        &self.state
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, CallState::Terminal(_))
    }

    /// Drive the call to its end.
    pub async fn run(mut self) -> CallOutcome {
        loop {
            if let CallState::Terminal(outcome) = &self.state {
                return outcome.clone();
            }
            self.advance().await;
        }
    }

    /// Perform exactly one transition. Does nothing once terminal.
    pub async fn advance(&mut self) {
        let next = match &self.state {
            CallState::Received => self.receive(),
            CallState::Normalized { number, .. } => {
                let verdict = self.services.store.lookup(number);
                CallState::Classified {
                    number: number.clone(),
                    verdict,
                }
            }
            CallState::Classified { number, verdict } => self.classify(number, verdict),
            CallState::Allowed { whitelisted } => CallState::Terminal(CallOutcome::Allowed {
                whitelisted: *whitelisted,
            }),
            CallState::Tarpit(step) => self.tarpit_step(*step).await,
            CallState::Terminal(_) => return,
        };
        if let CallState::Normalized { original, number } = &next {
            self.ocid = original.clone();
            self.cid = number.clone();
        }
        self.state = next;
    }

    fn receive(&self) -> CallState {
        let original = match self.session.caller_id().map(str::trim) {
            Some(raw) if !raw.is_empty() => raw.to_string(),
            _ => {
                log::info!("[TID={}] Call without caller id, skipping", self.tid);
                return CallState::Terminal(CallOutcome::Skipped);
            }
        };

        let number = normalize(&original, &self.services.country_code);
        log::debug!(
            "[TID={}] [OCID={}] [CID={}] Incoming call",
            self.tid,
            original,
            number
        );
        CallState::Normalized { original, number }
    }

    fn classify(&self, number: &str, verdict: &Verdict) -> CallState {
        match verdict {
            Verdict::Blocked(matched) => {
                log::info!(
                    "{} Blocked call, matched {}:{} ({})",
                    self.prefix(),
                    matched.source,
                    matched.line,
                    matched.comment
                );
                self.services
                    .audit
                    .record(&AuditRecord::blocked(number, matched));
                CallState::Tarpit(TarpitStep::FIRST)
            }
            Verdict::Whitelisted(matched) => {
                log::info!(
                    "{} Whitelisted call, matched {}:{}",
                    self.prefix(),
                    matched.source,
                    matched.line
                );
                self.services.audit.record(&AuditRecord::allowed(number));
                CallState::Allowed { whitelisted: true }
            }
            Verdict::NotListed => {
                log::info!("{} Allowed call", self.prefix());
                self.services.audit.record(&AuditRecord::allowed(number));
                CallState::Allowed { whitelisted: false }
            }
        }
    }

    async fn tarpit_step(&self, step: TarpitStep) -> CallState {
        let tarpit = self.services.tarpit;
        let result = match step {
            TarpitStep::PreAnswerWait => {
                self.wait(tarpit.pre_answer_delay).await;
                Ok(())
            }
            TarpitStep::Ringing => self.session.progress().await,
            TarpitStep::AnswerWait => {
                self.wait(tarpit.answer_delay).await;
                Ok(())
            }
            TarpitStep::Answering => self.session.answer().await,
            TarpitStep::HangupWait => {
                self.wait(tarpit.hangup_delay).await;
                Ok(())
            }
            TarpitStep::HangingUp => self.session.close().await,
        };

        match result {
            Ok(()) => {
                log::debug!("{} Tarpit: {} done", self.prefix(), step);
                match step.next() {
                    Some(next) => CallState::Tarpit(next),
                    None => {
                        log::info!("{} Tarpit completed", self.prefix());
                        CallState::Terminal(CallOutcome::Blocked {
                            tarpit: TarpitResult::Completed,
                        })
                    }
                }
            }
            Err(e) => {
                log::warn!("{} Tarpit aborted while {}: {}", self.prefix(), step, e);
                CallState::Terminal(CallOutcome::Blocked {
                    tarpit: TarpitResult::Aborted {
                        step,
                        reason: e.to_string(),
                    },
                })
            }
        }
    }

    async fn wait(&self, duration: Duration) {
        if !duration.is_zero() {
            self.services.sleeper.sleep(duration).await;
        }
    }

    fn prefix(&self) -> String {
        format!("[TID={}] [OCID={}] [CID={}]", self.tid, self.ocid, self.cid)
    }
}

/// Handle one call from start to finish.
pub async fn handle_call<S: CallSession + ?Sized>(
    services: Arc<FilterServices>,
    session: &S,
) -> CallOutcome {
    CallDispositionEngine::new(services, session).run().await
}
