mod or_log;
pub use or_log::*;

/// Current wall-clock time as a unix timestamp
pub fn now() -> i64
{
    chrono::Utc::now().timestamp()
}

/// Longest nickname or channel name accepted as an identifier
pub const MAX_IDENTIFIER_LEN: usize = 128;

/// Whether `name` is usable as a nickname: non-empty, not too long, and free
/// of whitespace, control characters and the characters patterns use
pub fn is_valid_identifier(name: &str) -> bool
{
    !name.is_empty()
        && name.len() <= MAX_IDENTIFIER_LEN
        && !name.chars().any(|c| c.is_whitespace() || c.is_control() || matches!(c, '*' | '?' | ',' | '@' | '!'))
}

/// Cut `s` to at most `max` bytes, on a character boundary
pub fn truncate(mut s: String, max: usize) -> String
{
    if s.len() > max
    {
        let mut end = max;
        while !s.is_char_boundary(end)
        {
            end -= 1;
        }
        s.truncate(end);
    }
    s
}
