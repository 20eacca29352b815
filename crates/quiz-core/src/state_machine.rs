//! In-memory quiz progression.
//!
//! `Uninitialized -> Active -> Completed`. Completion is a flag on the active
//! session (`completedAt`), so a completed session still accepts edits.
//!
//! Every mutator returns `true` when it changed state; callers use that to
//! decide whether anything needs publishing.

use std::sync::Arc;

use crate::clock::Clock;
use crate::navigation::{guard_step, StepDecision};
use crate::session::{Answer, AnswerValue, Locale, PersistedQuiz, Session};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuizState {
    Uninitialized,
    Active {
        session: Session,
        current_step: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Active,
    Completed,
}

pub struct SessionStateMachine {
    state: QuizState,
    clock: Arc<dyn Clock>,
    default_locale: Locale,
}

impl SessionStateMachine {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: QuizState::Uninitialized,
            clock,
            default_locale: Locale::default(),
        }
    }

    pub fn with_default_locale(mut self, locale: Locale) -> Self {
        self.default_locale = locale;
        self
    }

    pub fn state(&self) -> &QuizState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        match &self.state {
            QuizState::Uninitialized => Phase::Uninitialized,
            QuizState::Active { session, .. } if session.completed_at.is_some() => {
                Phase::Completed
            }
            QuizState::Active { .. } => Phase::Active,
        }
    }

    pub fn session(&self) -> Option<&Session> {
        match &self.state {
            QuizState::Active { session, .. } => Some(session),
            QuizState::Uninitialized => None,
        }
    }

    pub fn current_step(&self) -> usize {
        match &self.state {
            QuizState::Active { current_step, .. } => *current_step,
            QuizState::Uninitialized => 0,
        }
    }

    pub fn answered(&self) -> usize {
        self.session().map_or(0, |s| s.answers.len())
    }

    /// Where a request to display step `requested` should land.
    pub fn guard(&self, requested: usize) -> StepDecision {
        guard_step(requested, self.answered())
    }

    pub fn projection(&self) -> PersistedQuiz {
        match &self.state {
            QuizState::Uninitialized => PersistedQuiz::default(),
            QuizState::Active {
                session,
                current_step,
            } => PersistedQuiz {
                session: Some(session.clone()),
                current_step: *current_step,
            },
        }
    }

    /// Resume when a session with the same locale is already active.
    pub fn init_session(&mut self, locale: Locale) -> bool {
        if let Some(session) = self.session() {
            if session.locale == locale {
                return false;
            }
        }
        self.start_fresh(locale);
        true
    }

    pub fn set_locale(&mut self, locale: Locale) -> bool {
        match &mut self.state {
            QuizState::Active { session, .. } if session.locale != locale => {
                session.locale = locale;
                true
            }
            _ => false,
        }
    }

    pub fn set_answer(&mut self, question_id: &str, value: impl Into<AnswerValue>) -> bool {
        let now = self.clock.now_ms();
        let QuizState::Active { session, .. } = &mut self.state else {
            return false;
        };
        session.upsert_answer(Answer {
            question_id: question_id.to_string(),
            value: value.into(),
            timestamp: now,
        });
        true
    }

    pub fn next_step(&mut self) -> bool {
        let next = self.current_step().saturating_add(1);
        self.move_to(next)
    }

    pub fn previous_step(&mut self) -> bool {
        match self.current_step() {
            0 => false,
            step => self.move_to(step - 1),
        }
    }

    pub fn set_step(&mut self, step: usize) -> bool {
        self.move_to(step)
    }

    fn move_to(&mut self, step: usize) -> bool {
        let QuizState::Active {
            session,
            current_step,
        } = &mut self.state
        else {
            return false;
        };
        if *current_step == step && session.current_step == step {
            return false;
        }
        *current_step = step;
        session.current_step = step;
        true
    }

    pub fn set_email(&mut self, email: &str) -> bool {
        let QuizState::Active { session, .. } = &mut self.state else {
            return false;
        };
        session.email = Some(email.trim().to_string());
        true
    }

    pub fn complete_quiz(&mut self) -> bool {
        let now = self.clock.now_ms();
        let QuizState::Active { session, .. } = &mut self.state else {
            return false;
        };
        session.completed_at = Some(now);
        true
    }

    /// Fresh session in the default locale, whatever the previous one was.
    pub fn retake_quiz(&mut self) -> bool {
        if matches!(self.state, QuizState::Uninitialized) {
            return false;
        }
        self.start_fresh(self.default_locale);
        true
    }

    /// Restore a persisted projection. An empty projection leaves the
    /// machine uninitialized.
    pub fn hydrate(&mut self, projection: PersistedQuiz) -> bool {
        match projection.session {
            Some(session) => {
                self.state = QuizState::Active {
                    session,
                    current_step: projection.current_step,
                };
                true
            }
            None => false,
        }
    }

    fn start_fresh(&mut self, locale: Locale) {
        self.state = QuizState::Active {
            session: Session::new(locale, self.clock.now_ms()),
            current_step: 0,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn machine() -> (Arc<ManualClock>, SessionStateMachine) {
        let clock = Arc::new(ManualClock::new(1_000));
        let machine = SessionStateMachine::new(clock.clone());
        (clock, machine)
    }

    #[test]
    fn mutations_before_init_are_ignored() {
        let (_, mut m) = machine();
        assert!(!m.set_answer("q1", "a"));
        assert!(!m.next_step());
        assert!(!m.set_locale(Locale::Fr));
        assert!(!m.set_email("a@b.c"));
        assert!(!m.complete_quiz());
        assert!(!m.retake_quiz());
        assert_eq!(m.phase(), Phase::Uninitialized);
        assert_eq!(m.projection(), PersistedQuiz::default());
    }

    #[test]
    fn init_same_locale_resumes() {
        let (_, mut m) = machine();
        assert!(m.init_session(Locale::En));
        m.set_answer("q1", "a");
        m.next_step();
        let before = m.session().unwrap().clone();

        assert!(!m.init_session(Locale::En));
        assert_eq!(m.session().unwrap(), &before);
        assert_eq!(m.current_step(), 1);
    }

    #[test]
    fn next_step_saturates_at_max_index() {
        let (_, mut m) = machine();
        m.init_session(Locale::En);
        assert!(m.set_step(usize::MAX));
        assert!(!m.next_step());
        assert_eq!(m.current_step(), usize::MAX);
    }

    #[test]
    fn init_other_locale_starts_over() {
        let (_, mut m) = machine();
        m.init_session(Locale::En);
        m.set_answer("q1", "a");
        let old_id = m.session().unwrap().session_id;
        assert!(m.init_session(Locale::De));
        let session = m.session().unwrap();
        assert_ne!(session.session_id, old_id);
        assert!(session.answers.is_empty());
        assert_eq!(session.locale, Locale::De);
    }

    #[test]
    fn set_locale_keeps_progress() {
        let (_, mut m) = machine();
        m.init_session(Locale::En);
        m.set_answer("q1", "a");
        m.next_step();
        assert!(m.set_locale(Locale::Es));
        assert!(!m.set_locale(Locale::Es));
        assert_eq!(m.current_step(), 1);
        assert_eq!(m.answered(), 1);
        assert_eq!(m.session().unwrap().locale, Locale::Es);
    }

    #[test]
    fn answers_upsert_with_timestamps() {
        let (clock, mut m) = machine();
        m.init_session(Locale::En);
        m.set_answer("q1", "a");
        clock.advance(5);
        m.set_answer("q2", vec!["x", "y"]);
        clock.advance(5);
        m.set_answer("q1", "b");

        let answers = &m.session().unwrap().answers;
        assert_eq!(answers.len(), 2);
        assert_eq!(answers[0].question_id, "q1");
        assert_eq!(answers[0].value, AnswerValue::from("b"));
        assert_eq!(answers[0].timestamp, 1_010);
        assert_eq!(answers[1].value, AnswerValue::from(vec!["x", "y"]));
    }

    #[test]
    fn step_moves_are_mirrored_into_session() {
        let (_, mut m) = machine();
        m.init_session(Locale::En);
        assert!(!m.previous_step());
        m.next_step();
        m.next_step();
        assert_eq!(m.current_step(), 2);
        assert!(m.previous_step());
        assert_eq!(m.current_step(), 1);
        assert!(m.set_step(4));
        assert!(!m.set_step(4));
        assert_eq!(m.session().unwrap().current_step, 4);
        assert_eq!(m.projection().current_step, 4);
    }

    #[test]
    fn completion_keeps_session_editable() {
        let (_, mut m) = machine();
        m.init_session(Locale::En);
        m.set_email(" user@example.com ");
        assert!(m.complete_quiz());
        assert_eq!(m.phase(), Phase::Completed);
        assert_eq!(m.session().unwrap().email.as_deref(), Some("user@example.com"));
        assert_eq!(m.session().unwrap().completed_at, Some(1_000));
        assert!(m.set_answer("q9", "late"));
    }

    #[test]
    fn retake_resets_to_default_locale() {
        let (_, mut m) = machine();
        m.init_session(Locale::Fr);
        m.set_answer("q1", "a");
        m.next_step();
        let old_id = m.session().unwrap().session_id;

        assert!(m.retake_quiz());
        let session = m.session().unwrap();
        assert!(session.answers.is_empty());
        assert_eq!(m.current_step(), 0);
        assert_ne!(session.session_id, old_id);
        assert_eq!(session.locale, Locale::En);
        assert_eq!(m.phase(), Phase::Active);
    }

    #[test]
    fn guard_uses_answer_count() {
        let (_, mut m) = machine();
        m.init_session(Locale::En);
        m.set_answer("q1", "a");
        m.set_answer("q2", "b");
        m.set_step(7);
        assert_eq!(m.guard(4), StepDecision::Redirect(2));
        assert_eq!(m.guard(2), StepDecision::Render(2));
        assert_eq!(m.guard(0), StepDecision::Render(0));
    }

    #[test]
    fn hydrate_restores_active_state() {
        let (_, mut m) = machine();
        let mut session = Session::new(Locale::De, 5);
        session.current_step = 1;
        let projection = PersistedQuiz {
            session: Some(session.clone()),
            current_step: 1,
        };
        assert!(m.hydrate(projection.clone()));
        assert_eq!(m.phase(), Phase::Active);
        assert_eq!(m.projection(), projection);
        assert!(!m.hydrate(PersistedQuiz::default()));
        assert_eq!(m.session(), Some(&session));
    }
}
