use std::path::PathBuf;
use thiserror::Error;

use quiz_core::error::ParseLocaleError;
use quiz_core::session::Locale;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Init(Locale),
    Locale(Locale),
    Answer {
        question_id: String,
        values: Vec<String>,
    },
    Next,
    Back,
    /// 1-based, as typed.
    Goto(String),
    Email(String),
    Complete,
    Retake,
    Show,
    Export(Option<PathBuf>),
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReplError {
    #[error("unknown command {0:?} (try `help`)")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error(transparent)]
    Locale(#[from] ParseLocaleError),
}

pub const HELP: &str = "\
commands:
  init <locale>              start or resume a session (en, fr, de, es)
  locale <locale>            switch language, keeping progress
  answer <qid> <id>[,<id>]   record an answer
  next | back                move one step
  goto <n>                   jump to step n (1-based)
  email <address>            set the report email
  complete                   finish the quiz
  retake                     discard the session and start over
  show                       print the current step
  export [file]              write the CSV report (stdout if no file)
  quit";

/// Parse one input line. Blank lines and `#` comments yield `None`.
pub fn parse(line: &str) -> Result<Option<Command>, ReplError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };

    let command = match verb.to_ascii_lowercase().as_str() {
        "init" => Command::Init(required(rest, "init <locale>")?.parse()?),
        "locale" | "lang" => Command::Locale(required(rest, "locale <locale>")?.parse()?),
        "answer" | "a" => {
            let (question_id, values) = required(rest, "answer <qid> <id>[,<id>]")?
                .split_once(char::is_whitespace)
                .ok_or(ReplError::Usage("answer <qid> <id>[,<id>]"))?;
            let values: Vec<String> = values
                .split(',')
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .collect();
            if values.is_empty() {
                return Err(ReplError::Usage("answer <qid> <id>[,<id>]"));
            }
            Command::Answer {
                question_id: question_id.to_string(),
                values,
            }
        }
        "next" | "n" => Command::Next,
        "back" | "b" => Command::Back,
        "goto" | "g" => Command::Goto(required(rest, "goto <n>")?.to_string()),
        "email" => Command::Email(required(rest, "email <address>")?.to_string()),
        "complete" => Command::Complete,
        "retake" => Command::Retake,
        "show" | "s" => Command::Show,
        "export" => Command::Export((!rest.is_empty()).then(|| PathBuf::from(rest))),
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => return Err(ReplError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}

fn required<'a>(rest: &'a str, usage: &'static str) -> Result<&'a str, ReplError> {
    if rest.is_empty() {
        Err(ReplError::Usage(usage))
    } else {
        Ok(rest)
    }
}
