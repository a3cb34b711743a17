use crate::version::Schema;

/// Indents every non-blank line by `levels` units of the schema's indent.
/// Blank lines stay empty.
pub fn indent(code: &str, levels: usize, schema: Schema) -> String {
    if code.is_empty() || levels == 0 {
        return code.to_string();
    }
    let prefix = schema.indent_unit().repeat(levels);
    code.split('\n')
        .map(|line| {
            if line.trim().is_empty() {
                String::new()
            } else {
                format!("{prefix}{line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Quotes `text` the way dialogue strings are written in script source.
///
/// ```
/// assert_eq!(rpycdec::encode_say_string("a  \"b\""), r#""a \ \"b\"""#);
/// ```
pub fn encode_say_string(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    let mut previous = None;
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '"' => out.push_str("\\\""),
            ' ' if previous == Some(' ') => out.push_str("\\ "),
            other => out.push(other),
        }
        previous = Some(ch);
    }
    out.push('"');
    out
}

/// Appends `suffix` to the first line, before its block colon if it has one.
pub(crate) fn append_first_line(code: &str, suffix: &str) -> String {
    let (first, rest) = match code.split_once('\n') {
        Some((first, rest)) => (first, Some(rest)),
        None => (code, None),
    };
    let first = match first.strip_suffix(':') {
        Some(head) => format!("{head}{suffix}:"),
        None => format!("{first}{suffix}"),
    };
    match rest {
        Some(rest) => format!("{first}\n{rest}"),
        None => first,
    }
}

/// `key value` pairs, space separated on one line or one per line. A pair
/// without a value renders as the bare key.
pub(crate) fn properties(pairs: &[(String, Option<String>)], newline: bool) -> String {
    let parts: Vec<String> = pairs
        .iter()
        .map(|(key, value)| match value {
            Some(value) if !value.is_empty() => format!("{key} {value}"),
            _ => key.clone(),
        })
        .collect();
    parts.join(if newline { "\n" } else { " " })
}
