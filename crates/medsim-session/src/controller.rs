//! Async driver around [`Session`].
//!
//! The controller owns the single writer discipline: every mutation takes
//! the session lock briefly, and the lock is never held while the content
//! provider is being awaited. While a call is in flight an [`InFlight`]
//! guard owns its ticket, so a handler future that is dropped mid-call still
//! releases the loading flag and rolls back its pre-call mutations.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use medsim_session::{ContentProvider, Difficulty, ScenarioId, ScorePolicy, SessionController};
//!
//! # async fn example(provider: Arc<dyn ContentProvider>) -> medsim_session::Result<()> {
//! let controller = SessionController::new(provider, ScorePolicy::Clamp, 100);
//! let mut events = controller.subscribe();
//!
//! // Provider failures land in the snapshot, not in the `Err` branch
//! let snapshot = controller
//!     .start_case(ScenarioId::Upa, Difficulty::Beginner)
//!     .await?;
//! if let Some(error) = snapshot.error {
//!     println!("Try again: {error}");
//! }
//!
//! while let Ok(event) = events.try_recv() {
//!     println!("{}", event.event_name());
//! }
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tracing::debug;

use crate::error::Result;
use crate::events::{EventBroadcaster, SessionEvent};
use crate::model::{ActionType, Difficulty, ScenarioId, ScorePolicy, Skill};
use crate::progression::ProgressionState;
use crate::provider::ContentProvider;
use crate::session::{
    CompletedCase, Completion, OperationKind, RequestTicket, Session, SessionSnapshot,
};

/// Shared handle to one session, its provider and its event stream.
///
/// Cloning is cheap; all clones drive the same session.
#[derive(Clone)]
pub struct SessionController {
    session: Arc<Mutex<Session>>,
    provider: Arc<dyn ContentProvider>,
    events: EventBroadcaster,
}

impl fmt::Debug for SessionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionController")
            .field("session", &self.session)
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

impl SessionController {
    /// Creates a controller for a fresh session.
    #[must_use]
    pub fn new(provider: Arc<dyn ContentProvider>, score_policy: ScorePolicy, capacity: usize) -> Self {
        Self {
            session: Arc::new(Mutex::new(Session::with_score_policy(score_policy))),
            provider,
            events: EventBroadcaster::new(capacity),
        }
    }

    /// Subscribes to session events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.lock().snapshot()
    }

    /// Current progression.
    #[must_use]
    pub fn progression(&self) -> ProgressionState {
        self.lock().progression().clone()
    }

    // ------------------------------------------------------------------------
    // Provider-backed operations
    // ------------------------------------------------------------------------

    /// Generates a case and enters it.
    ///
    /// Provider failures are reported through the snapshot's `error`.
    ///
    /// # Errors
    ///
    /// Returns a precondition error if the session cannot start a case now.
    pub async fn start_case(
        &self,
        scenario: ScenarioId,
        difficulty: Difficulty,
    ) -> Result<SessionSnapshot> {
        let (ticket, request) = self.lock().begin_start_case(scenario, difficulty)?;
        let call = self.in_flight(ticket);
        let result = self
            .provider
            .generate_case(request.scenario, request.difficulty)
            .await;
        let settled = call.complete(|session| session.complete_start_case(ticket, request, result));
        Ok(self.publish(ticket, settled))
    }

    /// Submits a history, exam or lab request and waits for its reply.
    ///
    /// # Errors
    ///
    /// Returns a precondition error if the action is not allowed now.
    pub async fn submit_action(&self, kind: ActionType, query: &str) -> Result<SessionSnapshot> {
        let (ticket, request) = self.lock().begin_submit_action(kind, query)?;
        let call = self.in_flight(ticket);
        let result = self
            .provider
            .interaction_response(&request.case, &request.history, &request.action)
            .await;
        let settled = call.complete(|session| session.complete_submit_action(ticket, result));
        Ok(self.publish(ticket, settled))
    }

    /// Closes the case with hypotheses and conduct and waits for the score.
    ///
    /// # Errors
    ///
    /// Returns a precondition error outside a case or while busy.
    pub async fn finish_case(&self, hypotheses: &str, conduct: &str) -> Result<SessionSnapshot> {
        let (ticket, request) = self.lock().begin_finish_case(hypotheses, conduct)?;
        let call = self.in_flight(ticket);
        let result = self
            .provider
            .generate_feedback(&request.case, &request.transcript)
            .await;
        let settled = call.complete(|session| session.complete_finish_case(ticket, result));
        Ok(self.publish(ticket, settled))
    }

    /// Starts training `skill` with a first challenge.
    ///
    /// # Errors
    ///
    /// Returns a precondition error outside the menu or while busy.
    pub async fn start_skill_training(&self, skill: Skill) -> Result<SessionSnapshot> {
        let (ticket, request) = self.lock().begin_start_skill(skill)?;
        self.run_challenge(ticket, request.skill).await
    }

    /// Replaces the active challenge with a new one.
    ///
    /// # Errors
    ///
    /// Returns a precondition error outside skill training or while busy.
    pub async fn next_challenge(&self) -> Result<SessionSnapshot> {
        let (ticket, request) = self.lock().begin_next_challenge()?;
        self.run_challenge(ticket, request.skill).await
    }

    async fn run_challenge(&self, ticket: RequestTicket, skill: Skill) -> Result<SessionSnapshot> {
        let call = self.in_flight(ticket);
        let result = self.provider.generate_skill_challenge(skill).await;
        let settled = call.complete(|session| session.complete_challenge(ticket, result));
        Ok(self.publish(ticket, settled))
    }

    /// Judges an answer to the active challenge.
    ///
    /// # Errors
    ///
    /// Returns a precondition error without an active challenge or while
    /// busy.
    pub async fn evaluate_skill_attempt(&self, answer: &str) -> Result<SessionSnapshot> {
        let (ticket, request) = self.lock().begin_evaluate_skill(answer)?;
        let call = self.in_flight(ticket);
        let result = self
            .provider
            .evaluate_skill_attempt(&request.challenge, &request.answer)
            .await;
        let settled = call.complete(|session| session.complete_evaluate_skill(ticket, result));
        Ok(self.publish(ticket, settled))
    }

    // ------------------------------------------------------------------------
    // Local operations
    // ------------------------------------------------------------------------

    /// Returns to the menu. Always succeeds.
    pub fn reset_to_menu(&self) -> SessionSnapshot {
        self.mutate(Session::reset_to_menu)
    }

    /// Shows the history overlay.
    pub fn show_history(&self) -> SessionSnapshot {
        self.mutate(Session::show_history)
    }

    /// Hides the history overlay.
    pub fn hide_history(&self) -> SessionSnapshot {
        self.mutate(Session::hide_history)
    }

    /// Replaces the action input buffer.
    pub fn set_draft(&self, text: &str) -> SessionSnapshot {
        self.mutate(|session| session.set_draft(text))
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mutate(&self, f: impl FnOnce(&mut Session)) -> SessionSnapshot {
        let snapshot = {
            let mut session = self.lock();
            f(&mut session);
            session.snapshot()
        };
        self.events.send(SessionEvent::state_changed(snapshot.clone()));
        snapshot
    }

    fn in_flight(&self, ticket: RequestTicket) -> InFlight<'_> {
        self.events
            .send(SessionEvent::loading_started(ticket.operation()));
        InFlight {
            session: &self.session,
            ticket,
            settled: false,
        }
    }

    fn publish(&self, ticket: RequestTicket, settled: Settled) -> SessionSnapshot {
        let Settled {
            completion,
            snapshot,
            completed,
        } = settled;

        if completion == Completion::Failed {
            self.events.send(SessionEvent::error(ticket.operation()));
        }
        if let Some(case) = completed {
            self.events.send(SessionEvent::case_completed(case));
        }
        self.events
            .send(SessionEvent::state_changed(snapshot.clone()));
        snapshot
    }
}

/// What a settled call left behind, read under the lock that applied it.
struct Settled {
    completion: Completion,
    snapshot: SessionSnapshot,
    completed: Option<CompletedCase>,
}

/// Owns a ticket while its provider call is awaited.
struct InFlight<'a> {
    session: &'a Mutex<Session>,
    ticket: RequestTicket,
    settled: bool,
}

impl InFlight<'_> {
    fn complete(mut self, f: impl FnOnce(&mut Session) -> Completion) -> Settled {
        let settled = {
            let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
            let completion = f(&mut session);
            let completed = (completion == Completion::Applied
                && self.ticket.operation() == OperationKind::Feedback)
                .then(|| session.completed_case().cloned())
                .flatten();
            Settled {
                completion,
                snapshot: session.snapshot(),
                completed,
            }
        };
        self.settled = true;
        settled
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.settled {
            debug!(
                request_id = self.ticket.id(),
                epoch = self.ticket.epoch(),
                "Provider call dropped before completing"
            );
            self.session
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .abandon(self.ticket);
        }
    }
}
