//! `// key: value` headers at the top of a character file.

use crate::agent::AgentMetadata;

/// Parses one `// key: value` line. Keys are made of ASCII letters, digits and `_`.
fn header_line(line: &str) -> Option<(&str, &str)> {
    let rest = line.strip_prefix("// ")?;
    let (key, value) = rest.split_once(": ")?;
    if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    Some((key, value.trim_end_matches('\r')))
}

/// Splits a character file into its headers and its body.
///
/// Headers are read until the first line that is not one; blank lines between the headers and
/// the body are dropped.
pub(crate) fn split_character(text: &str) -> (AgentMetadata, &str) {
    let mut metadata = AgentMetadata::default();
    let mut rest = text;
    while !rest.is_empty() {
        let (line, after) = rest.split_once('\n').unwrap_or((rest, ""));
        let Some((key, value)) = header_line(line) else {
            break;
        };
        metadata.insert(key, value);
        rest = after;
    }

    while !rest.is_empty() {
        let (line, after) = match rest.split_once('\n') {
            Some(split) => split,
            None => break,
        };
        if !line.trim().is_empty() {
            break;
        }
        rest = after;
    }
    (metadata, rest)
}
