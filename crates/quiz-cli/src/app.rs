use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use quiz_core::backend::{FileBackend, MemoryBackend};
use quiz_core::clock::SystemClock;
use quiz_core::crypto::CryptoKeyManager;
use quiz_core::navigation::{
    can_continue, locale_for_option, parse_step_param, selected_ids, toggle_selection,
    visible_options, StepDecision,
};
use quiz_core::paths::store_dir;
use quiz_core::quiz::{Question, Quiz};
use quiz_core::report::{generate_csv, report_file_name};
use quiz_core::session::{AnswerValue, Session};
use quiz_core::settings::load_settings;
use quiz_core::state_machine::{Phase, SessionStateMachine};
use quiz_core::{KeepSettings, PersistenceAdapter, QuizStore, SecureStore};

use crate::repl::{Command, HELP};

pub const DEMO_QUIZ: &str = include_str!("../assets/demo-quiz.json");

/// Storage wiring for one process: durable entries on disk, the session key
/// in process memory only.
pub struct Keep {
    pub settings: KeepSettings,
    pub store: Arc<SecureStore>,
    pub adapter: Arc<PersistenceAdapter>,
}

impl Keep {
    pub fn open(config: Option<&Path>, data_dir: Option<PathBuf>) -> Result<Self> {
        let settings = load_settings(config)?;
        let data_dir = match data_dir {
            Some(dir) => dir,
            None => settings.resolve_data_dir()?,
        };
        let durable = FileBackend::open(store_dir(&data_dir))?.with_quota(settings.quota_bytes);
        let keys = CryptoKeyManager::new(Arc::new(MemoryBackend::new()), settings.key_slot.clone());
        let store = Arc::new(
            SecureStore::new(Arc::new(durable), keys, Arc::new(SystemClock))
                .with_namespace(settings.namespace.clone())
                .with_quota(settings.quota_bytes),
        );
        let adapter = Arc::new(
            PersistenceAdapter::new(store.clone())
                .with_session_key(settings.session_key.clone())
                .with_ttl(settings.session_ttl_ms),
        );
        info!(data_dir = %data_dir.display(), namespace = %settings.namespace, "storage ready");
        Ok(Self {
            settings,
            store,
            adapter,
        })
    }

    pub fn quiz_store(&self) -> QuizStore {
        QuizStore::new(
            SessionStateMachine::new(Arc::new(SystemClock))
                .with_default_locale(self.settings.default_locale),
        )
    }
}

#[derive(Debug)]
pub enum Outcome {
    Print(String),
    Quit,
}

/// Executes REPL commands against the quiz state and renders the result.
pub struct Driver {
    quiz: Quiz,
    store: QuizStore,
}

impl Driver {
    pub fn new(quiz: Quiz, store: QuizStore) -> Self {
        Self { quiz, store }
    }

    pub fn store(&self) -> &QuizStore {
        &self.store
    }

    pub fn execute(&self, command: Command) -> Result<Outcome> {
        let text = match command {
            Command::Init(locale) => {
                let fresh = self.store.init_session(locale);
                let session = self.active()?;
                let verb = if fresh { "started" } else { "resumed" };
                format!("{verb} session {} ({locale})\n{}", session.session_id, self.render())
            }
            Command::Locale(locale) => {
                self.active()?;
                self.store.set_locale(locale);
                self.render()
            }
            Command::Answer {
                question_id,
                values,
            } => self.answer(&question_id, values)?,
            Command::Next => {
                self.active()?;
                let step = self.store.current_step();
                if step >= self.quiz.len() {
                    bail!("no further questions; use `email` and `complete`");
                }
                if let StepDecision::Redirect(_) = self.store.guard(step + 1) {
                    bail!("answer step {} before moving on", step + 1);
                }
                self.store.next_step();
                self.render()
            }
            Command::Back => {
                self.active()?;
                self.store.previous_step();
                self.render()
            }
            Command::Goto(raw) => {
                self.active()?;
                let requested = parse_step_param(&raw, self.quiz.len())
                    .ok_or_else(|| anyhow!("step must be between 1 and {}", self.quiz.len()))?;
                match self.store.guard(requested) {
                    StepDecision::Render(step) => {
                        self.store.set_step(step);
                        self.render()
                    }
                    StepDecision::Redirect(step) => {
                        self.store.set_step(step);
                        format!("step {} is not reachable yet\n{}", requested + 1, self.render())
                    }
                }
            }
            Command::Email(address) => {
                self.active()?;
                if !address.contains('@') || address.contains(char::is_whitespace) {
                    bail!("{address:?} is not an email address");
                }
                self.store.set_email(&address);
                format!("email set to {address}")
            }
            Command::Complete => {
                let session = self.active()?;
                if session.answers.len() < self.quiz.len() {
                    bail!(
                        "{} of {} questions answered",
                        session.answers.len(),
                        self.quiz.len()
                    );
                }
                if self.quiz.config.require_email && session.email.is_none() {
                    bail!("an email is required; use `email <address>`");
                }
                self.store.complete_quiz();
                format!("quiz completed; `export` writes {}", report_file_name(&session))
            }
            Command::Retake => {
                if !self.quiz.config.allow_retake {
                    bail!("retakes are disabled for this quiz");
                }
                self.store.retake_quiz();
                self.render()
            }
            Command::Show => self.render(),
            Command::Export(target) => {
                let session = self.active()?;
                let csv = generate_csv(&self.quiz, &session);
                match target {
                    None => csv,
                    Some(path) => {
                        std::fs::write(&path, csv)?;
                        format!("wrote {}", path.display())
                    }
                }
            }
            Command::Help => HELP.to_string(),
            Command::Quit => return Ok(Outcome::Quit),
        };
        Ok(Outcome::Print(text))
    }

    fn active(&self) -> Result<Session> {
        self.store
            .session()
            .ok_or_else(|| anyhow!("no session; start one with `init <locale>`"))
    }

    fn answer(&self, question_id: &str, values: Vec<String>) -> Result<String> {
        let session = self.active()?;
        let index = self
            .quiz
            .questions
            .iter()
            .position(|q| q.id == question_id)
            .ok_or_else(|| anyhow!("unknown question {question_id:?}"))?;
        // answers fill the quiz in order; later questions wait their turn
        let frontier = self
            .quiz
            .questions
            .iter()
            .position(|q| session.answer_for(&q.id).is_none())
            .unwrap_or(self.quiz.len());
        if index > frontier {
            bail!("answer step {} before {question_id}", frontier + 1);
        }
        let question = &self.quiz.questions[index];
        let visible = visible_options(question, &session);
        if let Some(missing) = values
            .iter()
            .find(|v| !visible.iter().any(|opt| opt.id == **v))
        {
            bail!("{missing:?} is not an option of {question_id}");
        }

        let value = if question.kind.is_multi() {
            let distinct: BTreeSet<&str> = values.iter().map(String::as_str).collect();
            let selection = values
                .iter()
                .fold(Vec::new(), |acc, id| toggle_selection(question, &acc, id));
            if selection.len() < distinct.len() {
                bail!(
                    "choose at most {} options",
                    question.max_selections.unwrap_or(selection.len())
                );
            }
            if !can_continue(question, &selection) {
                bail!(
                    "choose at least {} options",
                    question.min_selections.unwrap_or(1)
                );
            }
            AnswerValue::Multiple(selection)
        } else {
            let [single] = values.as_slice() else {
                bail!("{question_id} takes exactly one option");
            };
            if let Some(locale) = locale_for_option(question_id, single) {
                self.store.set_locale(locale);
            }
            AnswerValue::Single(single.clone())
        };

        self.store.set_answer(question_id, value);
        Ok(format!("recorded {question_id}\n{}", self.render()))
    }

    /// The step the guard lets us show, never a stored index taken on trust.
    pub fn render(&self) -> String {
        let Some(session) = self.store.session() else {
            return "no session; start one with `init <locale>`".to_string();
        };
        let step = self.store.guard(self.store.current_step()).step();
        let locale = session.locale;

        let mut lines = vec![format!(
            "{} [{}] session {} started {}",
            self.quiz.title.get(locale),
            locale,
            session.session_id,
            started(&session)
        )];
        match self.quiz.question_at(step) {
            Some(question) => self.render_question(&mut lines, question, &session, step),
            None => {
                lines.push(format!("all {} questions answered", self.quiz.len()));
                lines.push(format!(
                    "email: {}",
                    session.email.as_deref().unwrap_or("(not set)")
                ));
            }
        }
        let phase = match self.store.phase() {
            Phase::Uninitialized => "uninitialized",
            Phase::Active => "active",
            Phase::Completed => "completed",
        };
        lines.push(format!("phase: {phase}"));
        lines.join("\n")
    }

    fn render_question(
        &self,
        lines: &mut Vec<String>,
        question: &Question,
        session: &Session,
        step: usize,
    ) {
        let locale = session.locale;
        lines.push(format!(
            "[{}/{}] {} ({})",
            step + 1,
            self.quiz.len(),
            question.text.get(locale),
            question.id
        ));
        if let Some(subtitle) = &question.subtitle {
            lines.push(format!("  {}", subtitle.get(locale)));
        }
        if question.kind.is_multi() {
            lines.push(format!(
                "  choose {} to {}",
                question.min_selections.unwrap_or(1),
                question.max_selections.unwrap_or(question.options.len())
            ));
        }
        let selected = selected_ids(question, session);
        for option in visible_options(question, session) {
            let mark = if selected.contains(&option.id) { "x" } else { " " };
            let emoji = option.emoji.as_deref().map(|e| format!("{e} ")).unwrap_or_default();
            lines.push(format!(
                "  [{mark}] {:<18} {emoji}{}",
                option.id,
                option.text.get(locale)
            ));
        }
    }
}

fn started(session: &Session) -> String {
    DateTime::<Utc>::from_timestamp_millis(session.started_at)
        .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| session.started_at.to_string())
}

pub fn demo_quiz() -> Result<Quiz> {
    Ok(quiz_core::quiz::load_quiz_json(DEMO_QUIZ)?)
}
