//! Step authorization and render-time question logic.
//!
//! The number of recorded answers is the only measure of reachable
//! progress: step `s` (0-based) may be shown only while `s <= answered`.
//! Any stored or requested step index is advisory.

use crate::quiz::{Question, QuestionKind, QuestionOption};
use crate::session::{AnswerValue, Locale, Session};

pub const LANGUAGE_QUESTION_ID: &str = "q1-language";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepDecision {
    Render(usize),
    /// Jump-ahead refused; show the first unanswered step instead.
    Redirect(usize),
}

impl StepDecision {
    pub fn step(&self) -> usize {
        match self {
            StepDecision::Render(step) | StepDecision::Redirect(step) => *step,
        }
    }
}

pub fn guard_step(requested: usize, answered: usize) -> StepDecision {
    if requested > answered {
        StepDecision::Redirect(answered)
    } else {
        StepDecision::Render(requested)
    }
}

/// Parse a 1-based step from a route segment into a 0-based index.
/// `None` for anything outside `1..=question_count`.
pub fn parse_step_param(raw: &str, question_count: usize) -> Option<usize> {
    let step: usize = raw.trim().parse().ok()?;
    (1..=question_count).contains(&step).then(|| step - 1)
}

/// Options of `question` visible given the answers so far. Evaluated on
/// every call; never cache the result across answer changes.
pub fn visible_options<'q>(question: &'q Question, session: &Session) -> Vec<&'q QuestionOption> {
    let allowed = question.conditional.as_ref().and_then(|cond| {
        let prior = session.answer_for(&cond.depends_on)?;
        cond.mapping.get(prior.value.as_single()?)
    });
    match allowed {
        Some(ids) => question
            .options
            .iter()
            .filter(|opt| ids.iter().any(|id| *id == opt.id))
            .collect(),
        None => question.options.iter().collect(),
    }
}

/// Selection after toggling `option_id`. Bubble questions refuse to grow
/// past `max_selections`; the current selection is returned unchanged.
pub fn toggle_selection(question: &Question, current: &[String], option_id: &str) -> Vec<String> {
    if current.iter().any(|id| id == option_id) {
        return current
            .iter()
            .filter(|id| *id != option_id)
            .cloned()
            .collect();
    }
    if question.kind == QuestionKind::Bubble {
        if let Some(max) = question.max_selections {
            if current.len() >= max {
                return current.to_vec();
            }
        }
    }
    let mut next = current.to_vec();
    next.push(option_id.to_string());
    next
}

/// Whether `selected` is enough to move past `question`.
pub fn can_continue(question: &Question, selected: &[String]) -> bool {
    if question.kind.is_multi() {
        selected.len() >= question.min_selections.unwrap_or(1)
    } else {
        !selected.is_empty()
    }
}

/// Ids currently selected for `question` in `session`.
pub fn selected_ids(question: &Question, session: &Session) -> Vec<String> {
    session
        .answer_for(&question.id)
        .map(|a| match &a.value {
            AnswerValue::Single(id) => vec![id.clone()],
            AnswerValue::Multiple(ids) => ids.clone(),
        })
        .unwrap_or_default()
}

/// Locale chosen by picking `option_id` on the language question.
pub fn locale_for_option(question_id: &str, option_id: &str) -> Option<Locale> {
    if question_id != LANGUAGE_QUESTION_ID {
        return None;
    }
    match option_id {
        "lang-en" => Some(Locale::En),
        "lang-fr" => Some(Locale::Fr),
        "lang-de" => Some(Locale::De),
        "lang-es" => Some(Locale::Es),
        _ => None,
    }
}
