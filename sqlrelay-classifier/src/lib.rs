//! Pure, stateless classification of SQL statements into a routing-relevant
//! tag bitmask, lexed just far enough to identify the leading keyword.

use bitflags::bitflags;

bitflags! {
    /// Routing-relevant properties of a statement. `UNKNOWN` is the empty
    /// mask; every other bit is disjoint and a statement may set several.
    pub struct QueryTag: u32 {
        const UNKNOWN       = 0;
        const LOCAL_READ    = 1 << 0;
        const READ          = 1 << 1;
        const WRITE         = 1 << 2;
        const SESSION_WRITE = 1 << 3;
        const GLOBAL_WRITE  = 1 << 4;
        const BEGIN_TRX     = 1 << 5;
        const ROLLBACK      = 1 << 6;
        const COMMIT        = 1 << 7;
    }
}

/// Administrative `SELECT @@...` expressions answerable without touching a
/// backend. Not exhaustive of every MySQL session variable, just the ones
/// commonly probed by clients and drivers on connect.
const LOCAL_READ_VARIABLES: &[&str] = &[
    "@@version_comment",
    "@@version",
    "@@session.autocommit",
    "@@autocommit",
];

/// Classifies `sql`. `client_capabilities` is currently unused by the
/// decision table itself (no supported rule depends on a capability bit)
/// but is part of the contract so a future capability-gated rule can be
/// added without changing every call site.
pub fn classify(sql: &str, _client_capabilities: u32) -> QueryTag {
    let rest = skip_insignificant(sql);
    let (leading, after_leading) = match take_word(rest) {
        Some(pair) => pair,
        None => return QueryTag::UNKNOWN,
    };
    let leading_upper = leading.to_ascii_uppercase();

    match leading_upper.as_str() {
        "SELECT" => classify_select(after_leading),
        "SHOW" | "DESCRIBE" | "DESC" | "EXPLAIN" => QueryTag::READ,
        "INSERT" | "UPDATE" | "DELETE" | "REPLACE" | "LOAD" | "CREATE" | "ALTER" | "DROP"
        | "TRUNCATE" | "RENAME" | "GRANT" | "REVOKE" => QueryTag::WRITE,
        "SET" => classify_set(after_leading),
        "USE" => QueryTag::SESSION_WRITE,
        "BEGIN" => QueryTag::BEGIN_TRX,
        "START" => {
            if starts_with_word(after_leading, "TRANSACTION") {
                QueryTag::BEGIN_TRX
            } else {
                QueryTag::UNKNOWN
            }
        }
        "COMMIT" => QueryTag::COMMIT,
        "ROLLBACK" => QueryTag::ROLLBACK,
        _ => QueryTag::UNKNOWN,
    }
}

fn classify_select(rest: &str) -> QueryTag {
    let rest = skip_insignificant(rest);
    if contains_word_outside_literals(rest, "INTO")
        && contains_phrase_outside_literals(rest, &["OUTFILE"])
    {
        return QueryTag::WRITE;
    }
    if contains_phrase_outside_literals(rest, &["FOR", "UPDATE"])
        || contains_phrase_outside_literals(rest, &["LOCK", "IN", "SHARE", "MODE"])
    {
        return QueryTag::WRITE;
    }
    for var in LOCAL_READ_VARIABLES {
        if rest.to_ascii_lowercase().contains(var) {
            return QueryTag::LOCAL_READ;
        }
    }
    QueryTag::READ
}

fn classify_set(rest: &str) -> QueryTag {
    let rest = skip_insignificant(rest);
    let upper = rest.to_ascii_uppercase();
    if starts_with_word(rest, "GLOBAL") || upper.trim_start().starts_with("@@GLOBAL.") {
        QueryTag::GLOBAL_WRITE
    } else {
        QueryTag::SESSION_WRITE
    }
}

/// Advances past leading whitespace and `/* ... */` comments (including
/// nested ones), repeatedly, so `"  /* a /* b */ c */ BEGIN"` reaches
/// `BEGIN`.
fn skip_insignificant(mut s: &str) -> &str {
    loop {
        let trimmed = s.trim_start();
        if trimmed.starts_with("/*") {
            let mut depth = 0usize;
            let bytes = trimmed.as_bytes();
            let mut i = 0;
            while i < bytes.len() {
                if trimmed[i..].starts_with("/*") {
                    depth += 1;
                    i += 2;
                } else if trimmed[i..].starts_with("*/") {
                    depth -= 1;
                    i += 2;
                    if depth == 0 {
                        break;
                    }
                } else {
                    i += 1;
                }
            }
            s = &trimmed[i.min(trimmed.len())..];
            continue;
        }
        if trimmed.starts_with("--") {
            let end = trimmed.find('\n').unwrap_or(trimmed.len());
            s = &trimmed[end..];
            continue;
        }
        return trimmed;
    }
}

/// Splits off the first run of identifier characters, returning it and the
/// remainder of the string (not yet whitespace-skipped).
fn take_word(s: &str) -> Option<(&str, &str)> {
    let end = s
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '@'))
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    if end == 0 {
        None
    } else {
        Some((&s[..end], &s[end..]))
    }
}

fn starts_with_word(s: &str, word: &str) -> bool {
    let s = skip_insignificant(s);
    match take_word(s) {
        Some((w, _)) => w.eq_ignore_ascii_case(word),
        None => false,
    }
}

/// True if `word` appears as a standalone keyword somewhere in `s`, skipping
/// over quoted/backtick/string literals so embedded text never matches.
fn contains_word_outside_literals(s: &str, word: &str) -> bool {
    for token in tokenize_outside_literals(s) {
        if token.eq_ignore_ascii_case(word) {
            return true;
        }
    }
    false
}

/// True if the exact sequence of keywords in `phrase` appears consecutively
/// among the non-literal tokens of `s`.
fn contains_phrase_outside_literals(s: &str, phrase: &[&str]) -> bool {
    let tokens: Vec<String> = tokenize_outside_literals(s)
        .into_iter()
        .map(|t| t.to_ascii_uppercase())
        .collect();
    if phrase.is_empty() || tokens.len() < phrase.len() {
        return false;
    }
    tokens
        .windows(phrase.len())
        .any(|window| window.iter().zip(phrase).all(|(a, b)| a == b))
}

/// Lexes `s` into identifier/keyword tokens, dropping whitespace, comments,
/// and the contents of `'...'`, `"..."`, `` `...` `` literals entirely so
/// keywords embedded in a literal never get classified as SQL syntax.
fn tokenize_outside_literals(s: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if s[i..].starts_with("/*") {
            let rest = skip_insignificant(&s[i..]);
            i += s[i..].len() - rest.len();
            continue;
        }
        if c == '\'' || c == '"' || c == '`' {
            i += 1;
            while i < bytes.len() && bytes[i] as char != c {
                i += if bytes[i] as char == '\\' { 2 } else { 1 };
            }
            i += 1;
            continue;
        }
        if c.is_ascii_alphanumeric() || c == '_' || c == '@' {
            let start = i;
            while i < bytes.len() {
                let ch = bytes[i] as char;
                if ch.is_ascii_alphanumeric() || ch == '_' || ch == '@' || ch == '.' {
                    i += 1;
                } else {
                    break;
                }
            }
            tokens.push(&s[start..i]);
            continue;
        }
        i += 1;
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_is_read() {
        assert_eq!(classify("SELECT 1", 0), QueryTag::READ);
    }

    #[test]
    fn select_for_update_is_write() {
        assert_eq!(classify("SELECT * FROM t FOR UPDATE", 0), QueryTag::WRITE);
    }

    #[test]
    fn nested_comment_before_begin() {
        assert!(classify("  /* c */ BEGIN", 0).contains(QueryTag::BEGIN_TRX));
    }

    #[test]
    fn set_global_is_global_write() {
        assert_eq!(
            classify("SET @@global.max_connections=1", 0),
            QueryTag::GLOBAL_WRITE
        );
    }

    #[test]
    fn use_is_session_write() {
        assert_eq!(classify("USE db", 0), QueryTag::SESSION_WRITE);
    }

    #[test]
    fn garbage_is_unknown() {
        assert_eq!(classify("garbage ::", 0), QueryTag::UNKNOWN);
        assert!(classify("garbage ::", 0).is_empty());
    }

    #[test]
    fn start_transaction_is_begin_trx() {
        assert_eq!(classify("START TRANSACTION", 0), QueryTag::BEGIN_TRX);
    }

    #[test]
    fn commit_and_rollback() {
        assert_eq!(classify("COMMIT", 0), QueryTag::COMMIT);
        assert_eq!(classify("ROLLBACK", 0), QueryTag::ROLLBACK);
    }

    #[test]
    fn set_session_variable_is_session_write() {
        assert_eq!(classify("SET autocommit=0", 0), QueryTag::SESSION_WRITE);
    }

    #[test]
    fn show_describe_explain_are_read() {
        assert_eq!(classify("SHOW TABLES", 0), QueryTag::READ);
        assert_eq!(classify("DESCRIBE t", 0), QueryTag::READ);
        assert_eq!(classify("EXPLAIN SELECT 1", 0), QueryTag::READ);
    }

    #[test]
    fn local_read_admin_probe() {
        assert_eq!(classify("SELECT @@version_comment", 0), QueryTag::LOCAL_READ);
    }

    #[test]
    fn keyword_inside_string_literal_is_not_misclassified() {
        // The literal contains the word "UPDATE" but this is a plain SELECT.
        assert_eq!(
            classify("SELECT 'please UPDATE later' AS msg", 0),
            QueryTag::READ
        );
    }

    #[test]
    fn mixed_case_and_whitespace_tolerated() {
        assert_eq!(classify("  \n\tsElEcT 1", 0), QueryTag::READ);
    }

    #[test]
    fn lock_in_share_mode_is_write() {
        assert_eq!(
            classify("SELECT * FROM t LOCK IN SHARE MODE", 0),
            QueryTag::WRITE
        );
    }
}
