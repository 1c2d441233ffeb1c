use regex::Regex;
use std::sync::LazyLock;
use url::Url;

/// Marker written in place of redacted engine passwords
pub const HIDDEN_MARKER: &str = "'[HIDDEN]'";

static ENGINE_CONSTRUCTOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(postgresql|mysql|mongodb)\s*\(").expect("valid engine regex")
});

static URL_CREDENTIALS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([a-z][a-z0-9+.-]*://[^:/@\s]+):([^@\s]+)@").expect("valid url regex")
});

static PASSWORD_PARAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"password=([^\s&]+)").expect("valid password regex"));

/// Sanitize a connection URL by removing the password
pub fn sanitize_connection_url(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => {
            let mut sanitized = parsed.clone();
            if parsed.password().is_some() {
                let _ = sanitized.set_password(Some("[REDACTED]"));
            }
            // URL-decode the marker to keep it readable in logs
            sanitized
                .to_string()
                .replace("%5BREDACTED%5D", "[REDACTED]")
        }
        Err(_) => sanitize_text_for_logging(url),
    }
}

/// Redact credentials embedded in free text (URLs with user:password@, password= params)
pub fn sanitize_text_for_logging(text: &str) -> String {
    let sanitized = URL_CREDENTIALS.replace_all(text, "$1:[REDACTED]@");
    PASSWORD_PARAM
        .replace_all(&sanitized, "password=[REDACTED]")
        .to_string()
}

/// Replace the password argument of federation engine constructors in DDL text
///
/// `PostgreSQL(...)`, `MySQL(...)` and `MongoDB(...)` (engines and table
/// functions) carry the password as the 5th argument in their table form and
/// as the 4th argument in the 4-argument database form. Arguments are split
/// on top-level commas, ignoring commas inside single-quoted strings.
pub fn redact_engine_credentials(ddl: &str) -> String {
    let mut output = String::with_capacity(ddl.len());
    let mut cursor = 0;

    while let Some(found) = ENGINE_CONSTRUCTOR.find_at(ddl, cursor) {
        let args_start = found.end();
        let Some(args_end) = find_closing_paren(ddl, args_start) else {
            break;
        };

        output.push_str(&ddl[cursor..args_start]);
        output.push_str(&redact_arguments(&ddl[args_start..args_end]));
        cursor = args_end;
    }

    output.push_str(&ddl[cursor..]);
    output
}

fn redact_arguments(args: &str) -> String {
    let parts = split_top_level(args);
    let target = match parts.len() {
        n if n >= 5 => 4,
        4 => 3,
        _ => return args.to_string(),
    };

    parts
        .iter()
        .enumerate()
        .map(|(idx, part)| {
            if idx != target {
                return part.to_string();
            }
            let leading = &part[..part.len() - part.trim_start().len()];
            let trailing = &part[part.trim_end().len()..];
            format!("{leading}{HIDDEN_MARKER}{trailing}")
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Split on commas outside quotes and nested parentheses
fn split_top_level(args: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut in_quote = false;
    let mut escaped = false;
    let mut start = 0;

    for (idx, ch) in args.char_indices() {
        if in_quote {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '\'' => in_quote = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '\'' => in_quote = true,
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&args[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(&args[start..]);
    parts
}

/// Byte offset of the parenthesis closing the group that starts at `from`
fn find_closing_paren(text: &str, from: usize) -> Option<usize> {
    let mut depth = 1usize;
    let mut in_quote = false;
    let mut escaped = false;

    for (offset, ch) in text[from..].char_indices() {
        if in_quote {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '\'' => in_quote = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '\'' => in_quote = true,
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(from + offset);
                }
            }
            _ => {}
        }
    }
    None
}
