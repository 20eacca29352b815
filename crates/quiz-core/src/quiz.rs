//! Read-only quiz content.
//!
//! Content arrives as JSON in the authoring format (one `translations`
//! block per locale, options either bare labels or `{id, label, emoji}`)
//! and is normalized into [`Quiz`]. Nothing here is ever persisted.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::QuizError;
use crate::session::Locale;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Localized {
    pub en: String,
    pub fr: String,
    pub de: String,
    pub es: String,
}

impl Localized {
    pub fn uniform(text: &str) -> Self {
        Self {
            en: text.to_string(),
            fr: text.to_string(),
            de: text.to_string(),
            es: text.to_string(),
        }
    }

    pub fn get(&self, locale: Locale) -> &str {
        match locale {
            Locale::En => &self.en,
            Locale::Fr => &self.fr,
            Locale::De => &self.de,
            Locale::Es => &self.es,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuestionKind {
    SingleSelect,
    SingleSelectImage,
    MultipleSelect,
    Bubble,
}

impl QuestionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionKind::SingleSelect => "single-select",
            QuestionKind::SingleSelectImage => "single-select-image",
            QuestionKind::MultipleSelect => "multiple-select",
            QuestionKind::Bubble => "bubble",
        }
    }

    pub fn is_multi(&self) -> bool {
        matches!(self, QuestionKind::MultipleSelect | QuestionKind::Bubble)
    }

    fn from_raw(raw: &str) -> Self {
        match raw {
            "multiple-select" => QuestionKind::MultipleSelect,
            "bubble" => QuestionKind::Bubble,
            "single-select-image" => QuestionKind::SingleSelectImage,
            _ => QuestionKind::SingleSelect,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub id: String,
    pub text: Localized,
    pub emoji: Option<String>,
}

/// Narrows a question's options by the answer given to another question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conditional {
    pub depends_on: String,
    pub mapping: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub kind: QuestionKind,
    pub text: Localized,
    pub subtitle: Option<Localized>,
    pub title_highlight: Option<Localized>,
    pub required: bool,
    pub options: Vec<QuestionOption>,
    pub min_selections: Option<usize>,
    pub max_selections: Option<usize>,
    pub conditional: Option<Conditional>,
}

impl Question {
    pub fn option(&self, id: &str) -> Option<&QuestionOption> {
        self.options.iter().find(|o| o.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QuizConfig {
    pub allow_retake: bool,
    pub show_progress_bar: bool,
    pub require_email: bool,
}

impl Default for QuizConfig {
    fn default() -> Self {
        Self {
            allow_retake: true,
            show_progress_bar: true,
            require_email: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quiz {
    pub id: String,
    pub title: Localized,
    pub questions: Vec<Question>,
    pub config: QuizConfig,
}

impl Quiz {
    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    pub fn question(&self, id: &str) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == id)
    }

    pub fn question_at(&self, step: usize) -> Option<&Question> {
        self.questions.get(step)
    }
}

#[derive(Deserialize)]
struct RawQuiz {
    #[serde(default)]
    meta: RawMeta,
    #[serde(default)]
    config: QuizConfig,
    questions: Vec<RawQuestion>,
}

#[derive(Deserialize, Default)]
struct RawMeta {
    id: Option<String>,
    title: Option<Localized>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawQuestion {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    is_required: bool,
    min_selections: Option<usize>,
    max_selections: Option<usize>,
    conditional: Option<Conditional>,
    translations: RawTranslations,
}

#[derive(Deserialize)]
struct RawTranslations {
    en: RawTranslation,
    fr: RawTranslation,
    de: RawTranslation,
    es: RawTranslation,
}

impl RawTranslations {
    fn get(&self, locale: Locale) -> &RawTranslation {
        match locale {
            Locale::En => &self.en,
            Locale::Fr => &self.fr,
            Locale::De => &self.de,
            Locale::Es => &self.es,
        }
    }

    fn localized(&self, field: impl Fn(&RawTranslation) -> Option<&str>) -> Option<Localized> {
        field(&self.en)?;
        let pick = |t: &RawTranslation| field(t).unwrap_or_default().to_string();
        Some(Localized {
            en: pick(&self.en),
            fr: pick(&self.fr),
            de: pick(&self.de),
            es: pick(&self.es),
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTranslation {
    title: String,
    subtitle: Option<String>,
    title_highlight: Option<String>,
    #[serde(default)]
    options: Vec<RawOption>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawOption {
    Label(String),
    Detailed {
        id: String,
        label: String,
        emoji: Option<String>,
    },
}

impl RawOption {
    fn label(&self) -> &str {
        match self {
            RawOption::Label(label) => label,
            RawOption::Detailed { label, .. } => label,
        }
    }
}

pub fn load_quiz_json(json: &str) -> Result<Quiz, QuizError> {
    let raw: RawQuiz = serde_json::from_str(json)?;
    if raw.questions.is_empty() {
        return Err(QuizError::Empty);
    }
    let questions = raw
        .questions
        .into_iter()
        .map(normalize_question)
        .collect::<Result<Vec<_>, _>>()?;
    let id = raw.meta.id.unwrap_or_else(|| "quiz".to_string());
    let title = raw.meta.title.unwrap_or_else(|| Localized::uniform(&id));
    Ok(Quiz {
        id,
        title,
        questions,
        config: raw.config,
    })
}

fn normalize_question(raw: RawQuestion) -> Result<Question, QuizError> {
    let kind = QuestionKind::from_raw(&raw.kind);
    let t = &raw.translations;
    let expected = t.en.options.len();
    for locale in Locale::ALL {
        let found = t.get(locale).options.len();
        if found != expected {
            return Err(QuizError::OptionCountMismatch {
                question: raw.id.clone(),
                locale: locale.as_str(),
                expected,
                found,
            });
        }
    }

    let options: Vec<QuestionOption> = (0..expected)
        .map(|idx| {
            let en = &t.en.options[idx];
            let (id, emoji) = match en {
                RawOption::Detailed { id, emoji, .. } => (id.clone(), emoji.clone()),
                RawOption::Label(_) => (format!("{}-opt{}", raw.id, idx + 1), None),
            };
            QuestionOption {
                id,
                text: Localized {
                    en: en.label().to_string(),
                    fr: t.fr.options[idx].label().to_string(),
                    de: t.de.options[idx].label().to_string(),
                    es: t.es.options[idx].label().to_string(),
                },
                emoji,
            }
        })
        .collect();

    let (min_selections, max_selections) = if kind.is_multi() {
        (
            Some(raw.min_selections.filter(|n| *n > 0).unwrap_or(1)),
            Some(raw.max_selections.filter(|n| *n > 0).unwrap_or(options.len())),
        )
    } else {
        (None, None)
    };

    Ok(Question {
        text: Localized {
            en: t.en.title.clone(),
            fr: t.fr.title.clone(),
            de: t.de.title.clone(),
            es: t.es.title.clone(),
        },
        subtitle: t.localized(|tr| tr.subtitle.as_deref()),
        title_highlight: t.localized(|tr| tr.title_highlight.as_deref()),
        conditional: if kind == QuestionKind::Bubble {
            raw.conditional
        } else {
            None
        },
        id: raw.id,
        kind,
        required: raw.is_required,
        options,
        min_selections,
        max_selections,
    })
}
