/// Strips the fenced code blocks that models like to wrap output in.
///
/// Handles an optional language tag on the opening fence and tolerates a
/// missing opening or closing fence. Nested fences are peeled until none
/// remain, so running this twice gives the same result as running it once.
///
/// The result is always trimmed, including leading indentation and trailing
/// blank lines inside the fence.
pub fn strip_code_fences(raw: &str) -> String {
    let mut body = raw.trim();
    loop {
        let next = strip_one_layer(body);
        if next.len() == body.len() {
            return body.to_string();
        }
        body = next;
    }
}

fn strip_one_layer(text: &str) -> &str {
    let mut body = text;

    if let Some(rest) = body.strip_prefix("```") {
        // Drop the language tag (```json, ```JSON, ```javascript ...) up to the first newline.
        body = match rest.split_once('\n') {
            Some((tag, inner)) if is_language_tag(tag) => inner,
            Some(_) => rest,
            None if is_language_tag(rest) => "",
            None => rest,
        };
        body = body.trim_start();
    }

    if let Some(rest) = body.strip_suffix("```") {
        body = rest.trim_end();
    }

    body.trim()
}

fn is_language_tag(tag: &str) -> bool {
    let tag = tag.trim();
    tag.is_empty()
        || tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '+' | '.'))
}
