//! Shell-style argument splitting for user-supplied flags and hook commands.

use crate::runtime::types::RuntimeError;

/// Split a shell-style string into words. Blank input yields no words;
/// unbalanced quotes or a trailing escape are rejected.
pub fn split_args(raw: &str) -> Result<Vec<String>, RuntimeError> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    shlex::split(raw).ok_or_else(|| RuntimeError::InvalidArguments(raw.to_owned()))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn splits_quoted_words() {
        let words = split_args(r#"-f "bestaudio[ext=m4a]" --output '%(title)s.%(ext)s'"#).unwrap();
        assert_eq!(words, ["-f", "bestaudio[ext=m4a]", "--output", "%(title)s.%(ext)s"]);
    }

    #[test]
    fn blank_is_empty() {
        assert!(split_args("").unwrap().is_empty());
        assert!(split_args("   ").unwrap().is_empty());
    }

    #[test]
    fn unbalanced_quote_is_rejected() {
        let err = split_args("--title 'unterminated").unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidArguments(_)));
        assert!(err.is_bad_request());
    }
}
