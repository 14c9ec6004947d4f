//! Miranda advisement workflow glue: the script text, localization via
//! the translation service, and fire-and-forget logging of completed
//! advisements.

use std::sync::Arc;

use lark_schema::MirandaLog;
use lark_store::PersistenceSink;
use lark_translate::Translator;

pub const MIRANDA_LINES: [&str; 4] = [
    "You have the right to remain silent...",
    "Anything you say can and will be used against you in a court of law...",
    "You have the right to an attorney...",
    "If you cannot afford an attorney, one will be provided for you...",
];

pub const SUPPORTED_LANGUAGES: [&str; 6] = [
    "english",
    "spanish",
    "french",
    "vietnamese",
    "mandarin",
    "arabic",
];

/// Script lines in the requested language. English passes through; other
/// languages go line-by-line through the translator, which already falls
/// back to the English text on failure.
pub async fn localized_script(translator: &dyn Translator, language: &str) -> Vec<String> {
    if language.eq_ignore_ascii_case("english") {
        return MIRANDA_LINES.iter().map(|line| line.to_string()).collect();
    }
    let mut lines = Vec::with_capacity(MIRANDA_LINES.len());
    for line in MIRANDA_LINES {
        lines.push(translator.translate(line, language).await);
    }
    lines
}

/// Hand a completed advisement to the persistence sink without blocking
/// the caller. A failed save is logged, nothing more.
pub fn record_log(sink: Arc<dyn PersistenceSink>, log: MirandaLog) {
    tokio::spawn(async move {
        let record = match serde_json::to_value(&log) {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(error = %err, "could not serialize miranda log");
                return;
            }
        };
        if let Err(err) = sink.save(record).await {
            tracing::warn!(error = %err, case_number = %log.case_number, "failed to persist miranda log");
        }
    });
}
