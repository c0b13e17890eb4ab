//! Line-oriented `key=value` format used by properties namespaces and by the
//! local cache files.

use apollo_core::Properties;

/// Parses properties text: `#`/`!` comments, `=`, `:` or whitespace
/// separators, backslash line continuations and escapes including `\uXXXX`.
pub fn parse(content: &str, ordered: bool) -> Properties {
    let mut properties = Properties::with_order(ordered);

    for line in logical_lines(content) {
        let (key, value) = split_key_value(&line);
        properties.insert(unescape(key), unescape(value));
    }

    properties
}

/// Renders a snapshot back to properties text, one entry per line.
pub fn render(properties: &Properties) -> String {
    let mut out = String::new();
    for (key, value) in properties.iter() {
        escape_into(&mut out, key, true);
        out.push('=');
        escape_into(&mut out, value, false);
        out.push('\n');
    }
    out
}

fn logical_lines(content: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current: Option<String> = None;

    for raw in content.lines() {
        let continuing = current.is_some();
        let line = raw.trim_start();

        if !continuing && (line.is_empty() || line.starts_with('#') || line.starts_with('!')) {
            continue;
        }

        let (body, continues) = strip_continuation(line);
        let buffer = current.get_or_insert_with(String::new);
        buffer.push_str(body);

        if !continues {
            if let Some(done) = current.take() {
                lines.push(done);
            }
        }
    }

    if let Some(rest) = current {
        lines.push(rest);
    }
    lines
}

/// A line continues when it ends with an odd number of backslashes.
fn strip_continuation(line: &str) -> (&str, bool) {
    let trailing = line.chars().rev().take_while(|c| *c == '\\').count();
    if trailing % 2 == 1 {
        (&line[..line.len() - 1], true)
    } else {
        (line, false)
    }
}

fn split_key_value(line: &str) -> (&str, &str) {
    let mut escaped = false;
    let mut key_end = line.len();

    for (idx, c) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '=' | ':' | ' ' | '\t' | '\x0c' => {
                key_end = idx;
                break;
            }
            _ => {}
        }
    }

    let key = &line[..key_end];
    let mut rest = line[key_end..].trim_start_matches(is_separator_space);
    if let Some(stripped) = rest.strip_prefix(|c: char| c == '=' || c == ':') {
        rest = stripped.trim_start_matches(is_separator_space);
    }
    (key, rest)
}

fn is_separator_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\x0c')
}

fn unescape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('f') => out.push('\x0c'),
            Some('u') => {
                let hex: String = chars.clone().take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(decoded) if hex.len() == 4 => {
                        out.push(decoded);
                        for _ in 0..4 {
                            chars.next();
                        }
                    }
                    _ => out.push('u'),
                }
            }
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

fn escape_into(out: &mut String, input: &str, is_key: bool) {
    for (idx, c) in input.chars().enumerate() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\x0c' => out.push_str("\\f"),
            ' ' if is_key || idx == 0 => out.push_str("\\ "),
            '=' | ':' if is_key => {
                out.push('\\');
                out.push(c);
            }
            '#' | '!' if idx == 0 => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
}
