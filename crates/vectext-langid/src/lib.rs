//! Pure language resolution for classifier labels.
//!
//! Maps the language code left after stripping a classifier's label prefix
//! to display metadata from a bundled static table. This stage reads
//! already-materialized host strings only; it never touches the engine
//! boundary.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Display metadata for one language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Language {
    /// ISO 639-3 code.
    pub alpha3: String,
    /// ISO 639-1 code, where one exists.
    pub alpha2: Option<String>,
    /// Reference name in English.
    #[serde(rename = "refName")]
    pub name: String,
}

static LANGUAGES: Lazy<HashMap<String, Language>> = Lazy::new(|| {
    serde_json::from_str(include_str!("../data/languages.json"))
        .expect("bundled language table is valid JSON")
});

/// Looks up display metadata for a bare language code.
///
/// Codes are keyed the way classifier labels spell them, which mixes ISO
/// 639-1 and 639-3 forms.
#[must_use]
pub fn resolve(code: &str) -> Option<&'static Language> {
    LANGUAGES.get(code)
}

/// Strips `prefix` from a predicted label and resolves the remaining code.
///
/// Returns `None` when the label does not carry the prefix or the code is
/// not in the table.
#[must_use]
pub fn resolve_label(label: &str, prefix: &str) -> Option<&'static Language> {
    resolve(label.strip_prefix(prefix)?)
}
