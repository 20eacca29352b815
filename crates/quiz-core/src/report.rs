//! CSV export of a session's answers, labelled in the session's locale.

use crate::quiz::Quiz;
use crate::session::Session;

const HEADER: &str = "order,title,type,answer";

fn quoted(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

fn quoted_if_needed(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        quoted(field)
    } else {
        field.to_string()
    }
}

/// One row per answer whose question still exists, numbered by the answer's
/// position in the session, then an email row if one was given.
pub fn generate_csv(quiz: &Quiz, session: &Session) -> String {
    let locale = session.locale;
    let mut rows = vec![HEADER.to_string()];

    for (index, answer) in session.answers.iter().enumerate() {
        let Some(question) = quiz.question(&answer.question_id) else {
            continue;
        };
        let labels: Vec<&str> = answer
            .value
            .selected()
            .into_iter()
            .map(|id| question.option(id).map_or(id, |opt| opt.text.get(locale)))
            .collect();
        rows.push(format!(
            "{},{},{},{}",
            index + 1,
            quoted(question.text.get(locale)),
            question.kind.as_str(),
            quoted(&labels.join(", ")),
        ));
    }

    if let Some(email) = session.email.as_deref().filter(|e| !e.is_empty()) {
        rows.push(format!("{},Email,email,{}", rows.len(), quoted_if_needed(email)));
    }

    rows.join("\n")
}

pub fn report_file_name(session: &Session) -> String {
    format!("quiz-keep-{}.csv", session.session_id)
}
