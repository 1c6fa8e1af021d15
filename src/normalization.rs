use serde::{Deserialize, Deserializer};

/// Normalizes free text by stripping surrounding whitespace and
/// composing it into Unicode Normalization Form C.
///
/// ```
/// use homebase::normalization::normalize_text;
/// assert_eq!(normalize_text(" Casa Verde\n"), "Casa Verde");
/// ```
pub fn normalize_text(text: impl AsRef<str>) -> String {
    use unicode_normalization::UnicodeNormalization;

    text.as_ref().trim().nfc().to_string()
}

/// Folds text for case-insensitive matching: trims it, composes it into
/// NFC and lowercases it. Accents are kept, so `ñ` and `n` differ.
///
/// ```
/// use homebase::normalization::fold;
/// assert_eq!(fold(" Dasmariñas "), "dasmariñas");
/// ```
pub fn fold(text: impl AsRef<str>) -> String {
    normalize_text(text).to_lowercase()
}

/// Returns the normalized text, or `None` if nothing is left after
/// trimming.
pub fn non_blank(text: Option<&str>) -> Option<String> {
    text.map(normalize_text).filter(|s| !s.is_empty())
}

/// Deserializes a `String` after running it through `normalize_text`.
pub fn deserialize<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    Ok(normalize_text(s))
}

/// Deserializes an optional `String` after running it through
/// `normalize_text`, mapping blank strings to `None`.
pub fn deserialize_option<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let o: Option<String> = Deserialize::deserialize(deserializer)?;
    Ok(non_blank(o.as_deref()))
}
