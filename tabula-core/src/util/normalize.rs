use serde_json::Value;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

use crate::domain::Record;

/// Folds a field name: NFD, drop combining marks, lowercase, ASCII alphanumerics only.
pub fn normalize_key(s: &str) -> String {
    s.nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .filter(char::is_ascii_alphanumeric)
        .collect()
}

/// Folds free text for searching: like [`normalize_key`] but keeps spaces and
/// punctuation, trimmed.
pub fn fold_text(s: &str) -> String {
    s.nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .collect::<String>()
        .trim()
        .to_string()
}

/// Accent- and case-insensitive containment. An empty needle matches anything.
pub fn includes_folded(hay: &str, needle: &str) -> bool {
    let needle = fold_text(needle);
    needle.is_empty() || fold_text(hay).contains(&needle)
}

/// Resolves the actual key on `row` for a logical `label`.
///
/// An exact folded match wins, first in key order. Otherwise the first key
/// containing the folded label is taken, which can hit an unrelated column.
pub fn find_key<'r>(row: &'r Record, label: &str) -> Option<&'r str> {
    let target = normalize_key(label);
    if target.is_empty() {
        return None;
    }
    let folded: Vec<(String, &str)> = row
        .keys()
        .map(|k| (normalize_key(k), k.as_str()))
        .collect();

    if let Some((_, real)) = folded.iter().find(|(nk, _)| *nk == target) {
        return Some(*real);
    }
    folded
        .iter()
        .find(|(nk, _)| nk.contains(&target))
        .map(|(_, real)| *real)
}

pub fn get_field<'r>(row: &'r Record, label: &str) -> Option<&'r Value> {
    find_key(row, label).and_then(|k| row.get(k))
}

/// Text view of a field: strings as-is, numbers and booleans rendered.
pub fn get_text(row: &Record, label: &str) -> Option<String> {
    match get_field(row, label)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
