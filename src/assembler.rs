//! Turns a validated line into the ordered list of arguments for one command.
//!
//! Words are separated by single spaces. A word starting with `"` opens a
//! quoted argument which swallows following words until one ends with an
//! unescaped `"`; the words are joined back with a single space.

use crate::lexer::split_words;
use thiserror::Error;

/// Unbalanced quoting. The interpreter treats these as fatal in single-shot mode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FatalParseError {
    #[error("missing opening double quote before '{token}'")]
    MissingOpeningQuote { token: String },
    #[error("missing closing double quote")]
    MissingClosingQuote,
}

/// True when `word` ends with a `"` that is not preceded by a backslash.
fn ends_with_unescaped_quote(word: &str) -> bool {
    match word.strip_suffix('"') {
        Some(rest) => !rest.ends_with('\\'),
        None => false,
    }
}

fn unescape_quotes(piece: &str) -> String {
    piece.replace("\\\"", "\"")
}

#[derive(Default)]
struct Assembler {
    args: Vec<String>,
    quoted: Option<Vec<String>>,
}

impl Assembler {
    fn push_arg(&mut self, arg: String) {
        if !arg.is_empty() {
            self.args.push(arg);
        }
    }

    fn open_quote(&mut self, after_quote: &str) -> Result<(), FatalParseError> {
        // Up to two backslashes right after the opening quote become
        // standalone arguments ahead of the quoted text.
        let mut rest = after_quote;
        for _ in 0..2 {
            match rest.strip_prefix('\\') {
                Some(tail) if tail != "\"" => {
                    self.args.push("\\".to_string());
                    rest = tail;
                }
                _ => break,
            }
        }
        self.quoted = Some(Vec::new());
        self.quoted_word(rest)
    }

    fn quoted_word(&mut self, word: &str) -> Result<(), FatalParseError> {
        let Some(pieces) = self.quoted.as_mut() else {
            return Ok(());
        };
        if ends_with_unescaped_quote(word) {
            pieces.push(unescape_quotes(&word[..word.len() - 1]));
            let joined = pieces
                .iter()
                .filter(|piece| !piece.is_empty())
                .cloned()
                .collect::<Vec<_>>()
                .join(" ");
            self.quoted = None;
            self.push_arg(joined);
        } else {
            pieces.push(unescape_quotes(word));
        }
        Ok(())
    }

    fn word(&mut self, word: &str) -> Result<(), FatalParseError> {
        if self.quoted.is_some() {
            return self.quoted_word(word);
        }
        if let Some(after_quote) = word.strip_prefix('"') {
            return self.open_quote(after_quote);
        }
        if ends_with_unescaped_quote(word) {
            return Err(FatalParseError::MissingOpeningQuote {
                token: word.to_string(),
            });
        }
        self.push_arg(word.to_string());
        Ok(())
    }

    fn finish(self) -> Result<Vec<String>, FatalParseError> {
        if self.quoted.is_some() {
            return Err(FatalParseError::MissingClosingQuote);
        }
        Ok(self.args)
    }
}

/// Assembles the argument list of `line`.
///
/// The returned vector is owned by the caller and lives for one command
/// execution. No element is empty.
pub fn assemble(line: &str) -> Result<Vec<String>, FatalParseError> {
    let mut assembler = Assembler::default();
    for word in split_words(line) {
        assembler.word(word)?;
    }
    let args = assembler.finish()?;
    log::debug!("assembled arguments {args:?}");
    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(line: &str) -> Vec<String> {
        assemble(line).unwrap()
    }

    #[test]
    fn plain_words() {
        assert_eq!(args("ls | wc -l"), vec!["ls", "|", "wc", "-l"]);
    }

    #[test]
    fn runs_of_spaces_collapse() {
        assert_eq!(args("  echo   hi  "), vec!["echo", "hi"]);
    }

    #[test]
    fn quoted_operator_is_a_bare_word() {
        assert_eq!(args("echo \" > \" x"), vec!["echo", ">", "x"]);
    }

    #[test]
    fn single_quoted_word() {
        assert_eq!(args("echo \"hi\""), vec!["echo", "hi"]);
    }

    #[test]
    fn quoted_words_form_one_argument() {
        assert_eq!(
            args("echo \"hello big world\" done"),
            vec!["echo", "hello big world", "done"]
        );
    }

    #[test]
    fn escaped_quote_inside_quotes() {
        assert_eq!(
            args(r#"echo "say \"hi\" now""#),
            vec!["echo", r#"say "hi" now"#]
        );
    }

    #[test]
    fn leading_backslash_becomes_own_argument() {
        assert_eq!(args(r#"echo "\abc""#), vec!["echo", "\\", "abc"]);
        assert_eq!(args(r#"echo "\\abc""#), vec!["echo", "\\", "\\", "abc"]);
    }

    #[test]
    fn empty_quotes_emit_nothing() {
        assert_eq!(args("echo \"\""), vec!["echo"]);
    }

    #[test]
    fn unbalanced_opening_quote_is_fatal() {
        assert_eq!(
            assemble("echo \"hello world"),
            Err(FatalParseError::MissingClosingQuote)
        );
        assert_eq!(assemble("\"x"), Err(FatalParseError::MissingClosingQuote));
    }

    #[test]
    fn stray_closing_quote_is_fatal() {
        assert_eq!(
            assemble("echo hello\""),
            Err(FatalParseError::MissingOpeningQuote {
                token: "hello\"".to_string()
            })
        );
    }

    #[test]
    fn escaped_trailing_quote_is_literal() {
        assert_eq!(args(r#"echo hi\""#), vec!["echo", r#"hi\""#]);
    }

    #[test]
    fn balanced_quotes_strip_only_quotes() {
        for content in ["a", "a b", "one two three", "x-y z_w"] {
            let line = format!("cmd \"{content}\"");
            assert_eq!(args(&line), vec!["cmd".to_string(), content.to_string()]);
        }
    }
}
