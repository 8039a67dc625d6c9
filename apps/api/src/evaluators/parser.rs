//! Parser for evaluator list output.
//!
//! The evaluators are instructed to answer with a bracketed list of quoted
//! ids (`['a.txt', 'b.txt']`). Models drift, so the grammar is enforced here
//! with a closed failure mode: anything that does not contain a well-formed
//! list parses to `None`, never a panic, and the caller downgrades that to
//! an empty list plus a diagnostic.

/// Extracts the ordered id list from evaluator output. Tolerates markdown
/// code fences and prose around the bracketed list; the list itself must be
/// well-formed. Returns `None` on malformed input, `Some(vec![])` for `[]`.
pub fn parse_id_list(text: &str) -> Option<Vec<String>> {
    let text = strip_code_fences(text.trim());
    let start = text.find('[')?;
    let rest = &text[start + 1..];
    let end = rest.find(']')?;
    parse_items(&rest[..end])
}

fn parse_items(inner: &str) -> Option<Vec<String>> {
    let mut out = Vec::new();
    let mut rest = inner.trim();
    while !rest.is_empty() {
        let quote = rest.chars().next()?;
        if quote != '\'' && quote != '"' {
            return None;
        }
        let body_len = rest[1..].find(quote)?;
        out.push(rest[1..1 + body_len].to_string());
        rest = rest[2 + body_len..].trim_start();
        if rest.is_empty() {
            break;
        }
        // Items are comma-separated; a trailing comma is tolerated.
        rest = rest.strip_prefix(',')?.trim_start();
    }
    Some(out)
}

/// Strips ```…``` fences the model may wrap its answer in.
fn strip_code_fences(text: &str) -> &str {
    let Some(stripped) = text.strip_prefix("```") else {
        return text;
    };
    // Drop an optional language tag on the fence line.
    let stripped = match stripped.find('\n') {
        Some(idx) => &stripped[idx + 1..],
        None => stripped,
    };
    stripped
        .trim_end()
        .strip_suffix("```")
        .map(str::trim)
        .unwrap_or(text)
}
