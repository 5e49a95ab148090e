/// One statement of a SQL script, with the whitespace and comments that precede it.
///
/// Concatenating the `text` of every statement returned by [`split_statements`]
/// reproduces the input script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub text: String,
}

impl Statement {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// The statement with leading whitespace and comments removed.
    pub fn head(&self) -> &str {
        skip_trivia(&self.text)
    }

    /// psql backslash commands such as `\connect` or `\restrict`.
    pub fn is_meta_command(&self) -> bool {
        self.head().starts_with('\\')
    }

    /// True when the chunk holds only whitespace and comments.
    pub fn is_trivia(&self) -> bool {
        self.head().is_empty()
    }
}

fn skip_trivia(mut s: &str) -> &str {
    loop {
        let trimmed = s.trim_start();
        if let Some(rest) = trimmed.strip_prefix("--") {
            s = rest.find('\n').map_or("", |i| &rest[i + 1..]);
        } else if trimmed.starts_with("/*") {
            s = &trimmed[block_comment_end(trimmed.as_bytes(), 0)..];
        } else {
            return trimmed;
        }
    }
}

/// Splits a script on top-level semicolons.
///
/// Semicolons inside string literals, quoted identifiers, dollar-quoted bodies and
/// comments do not end a statement. A backslash at the start of a statement begins a
/// psql meta-command, which runs to the end of its line.
pub fn split_statements(script: &str) -> Vec<Statement> {
    let bytes = script.as_bytes();
    let mut statements = Vec::new();
    let mut start = 0;
    let mut seen_code = false;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\\' if !seen_code => {
                let end = script[i..].find('\n').map_or(bytes.len(), |n| i + n + 1);
                statements.push(Statement::new(&script[start..end]));
                start = end;
                i = end;
                continue;
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                i = script[i..].find('\n').map_or(bytes.len(), |n| i + n + 1);
                continue;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = block_comment_end(bytes, i);
                continue;
            }
            b'\'' => {
                let escapes = i > 0
                    && matches!(bytes[i - 1], b'e' | b'E')
                    && (i < 2 || !is_ident_byte(bytes[i - 2]));
                i = quoted_end(bytes, i, b'\'', escapes);
                seen_code = true;
                continue;
            }
            b'"' => {
                i = quoted_end(bytes, i, b'"', false);
                seen_code = true;
                continue;
            }
            b'$' if i == 0 || !is_ident_byte(bytes[i - 1]) => {
                if let Some(tag_len) = dollar_tag_len(&bytes[i..]) {
                    let tag = &script[i..i + tag_len];
                    i = script[i + tag_len..]
                        .find(tag)
                        .map_or(bytes.len(), |n| i + tag_len + n + tag_len);
                    seen_code = true;
                    continue;
                }
                seen_code = true;
            }
            b';' => {
                statements.push(Statement::new(&script[start..=i]));
                start = i + 1;
                seen_code = false;
            }
            b if !b.is_ascii_whitespace() => seen_code = true,
            _ => {}
        }
        i += 1;
    }

    if start < bytes.len() && !script[start..].trim().is_empty() {
        statements.push(Statement::new(&script[start..]));
    }

    statements
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
}

/// Index just past the comment opened at `open`. Postgres block comments nest.
fn block_comment_end(bytes: &[u8], open: usize) -> usize {
    let mut depth = 0;
    let mut i = open;
    while i + 1 < bytes.len() {
        if bytes[i] == b'/' && bytes[i + 1] == b'*' {
            depth += 1;
            i += 2;
        } else if bytes[i] == b'*' && bytes[i + 1] == b'/' {
            depth -= 1;
            i += 2;
            if depth == 0 {
                return i;
            }
        } else {
            i += 1;
        }
    }
    bytes.len()
}

/// Index just past the closing quote of the literal opened at `open`.
/// A doubled quote character is an escaped quote.
fn quoted_end(bytes: &[u8], open: usize, quote: u8, backslash_escapes: bool) -> usize {
    let mut i = open + 1;
    while i < bytes.len() {
        if backslash_escapes && bytes[i] == b'\\' {
            i += 2;
            continue;
        }
        if bytes[i] == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

/// Length of a `$tag$` opener at the start of `bytes`, if there is one.
fn dollar_tag_len(bytes: &[u8]) -> Option<usize> {
    let mut i = 1;
    if bytes.get(i).is_some_and(|b| b.is_ascii_digit()) {
        return None;
    }
    while let Some(&b) = bytes.get(i) {
        if b == b'$' {
            return Some(i + 1);
        }
        if !is_ident_byte(b) {
            return None;
        }
        i += 1;
    }
    None
}
