use parking_lot::Mutex;
use tokio::sync::watch;

use crate::navigation::StepDecision;
use crate::session::{AnswerValue, Locale, PersistedQuiz, Session};
use crate::state_machine::{Phase, SessionStateMachine};

/// A published change: the projection right after mutation `revision`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub revision: u64,
    pub projection: PersistedQuiz,
}

/// Shared state container around [`SessionStateMachine`].
///
/// Mutations apply synchronously; every mutation that changes state is then
/// published on a watch channel. Subscribers (the persistence writer) see the
/// latest snapshot, never a partial one.
pub struct QuizStore {
    machine: Mutex<SessionStateMachine>,
    changes: watch::Sender<Snapshot>,
}

impl QuizStore {
    pub fn new(machine: SessionStateMachine) -> Self {
        let (changes, _) = watch::channel(Snapshot {
            revision: 0,
            projection: machine.projection(),
        });
        Self {
            machine: Mutex::new(machine),
            changes,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.changes.subscribe()
    }

    pub fn revision(&self) -> u64 {
        self.changes.borrow().revision
    }

    pub fn read<R>(&self, f: impl FnOnce(&SessionStateMachine) -> R) -> R {
        let machine = self.machine.lock();
        f(&*machine)
    }

    pub fn session(&self) -> Option<Session> {
        self.read(|m| m.session().cloned())
    }

    pub fn phase(&self) -> Phase {
        self.read(SessionStateMachine::phase)
    }

    pub fn current_step(&self) -> usize {
        self.read(SessionStateMachine::current_step)
    }

    pub fn guard(&self, requested: usize) -> StepDecision {
        self.read(|m| m.guard(requested))
    }

    fn mutate(&self, f: impl FnOnce(&mut SessionStateMachine) -> bool) -> bool {
        let mut machine = self.machine.lock();
        let changed = f(&mut *machine);
        if changed {
            let projection = machine.projection();
            self.changes.send_modify(|snapshot| {
                snapshot.revision += 1;
                snapshot.projection = projection;
            });
        }
        changed
    }

    pub fn init_session(&self, locale: Locale) -> bool {
        self.mutate(|m| m.init_session(locale))
    }

    pub fn set_locale(&self, locale: Locale) -> bool {
        self.mutate(|m| m.set_locale(locale))
    }

    pub fn set_answer(&self, question_id: &str, value: impl Into<AnswerValue>) -> bool {
        let value = value.into();
        self.mutate(|m| m.set_answer(question_id, value))
    }

    pub fn next_step(&self) -> bool {
        self.mutate(SessionStateMachine::next_step)
    }

    pub fn previous_step(&self) -> bool {
        self.mutate(SessionStateMachine::previous_step)
    }

    pub fn set_step(&self, step: usize) -> bool {
        self.mutate(|m| m.set_step(step))
    }

    pub fn set_email(&self, email: &str) -> bool {
        self.mutate(|m| m.set_email(email))
    }

    pub fn complete_quiz(&self) -> bool {
        self.mutate(SessionStateMachine::complete_quiz)
    }

    pub fn retake_quiz(&self) -> bool {
        self.mutate(SessionStateMachine::retake_quiz)
    }

    pub fn hydrate(&self, projection: PersistedQuiz) -> bool {
        self.mutate(|m| m.hydrate(projection))
    }
}
