//! Lexical validation of a raw command line.
//!
//! The line is split on single spaces into [`Token`]s. Operators are only
//! recognized as whole tokens; everything else is a word that must stay clear
//! of the [`DENYLIST`] so that filenames and arguments remain unambiguous.

use std::fmt;
use thiserror::Error;

/// Characters that may not appear inside a word token.
pub const DENYLIST: &[char] = &[
    '#', '%', '&', '{', '}', '<', '>', '?', '/', '$', '!', '\'', '@', '+', '`', '|', '=', '*',
    '\\', ':',
];

/// Pipe and redirection operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// `|`
    Pipe,
    /// `<`
    RedirectIn,
    /// `>`
    RedirectOut,
    /// `>>`
    Append,
}

impl Operator {
    /// Recognizes an operator only when it is the entire token.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "|" => Some(Operator::Pipe),
            "<" => Some(Operator::RedirectIn),
            ">" => Some(Operator::RedirectOut),
            ">>" => Some(Operator::Append),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Pipe => "|",
            Operator::RedirectIn => "<",
            Operator::RedirectOut => ">",
            Operator::Append => ">>",
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Operator::Pipe => "pipeline operator",
            Operator::RedirectIn => "input redirection operator",
            Operator::RedirectOut => "output redirection operator",
            Operator::Append => "append output redirection operator",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}'", self.describe(), self.as_str())
    }
}

/// A whitespace-delimited slice of the input line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token<'a> {
    Word(&'a str),
    Operator(Operator),
}

/// Reasons a line is rejected before any argument is assembled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("nothing was entered")]
    EmptyInput,
    #[error("input is longer than {limit} characters")]
    InputTooLong { limit: usize },
    #[error("{operator} cannot appear as the first token")]
    MisplacedOperator { operator: Operator },
    #[error("{operator} must be followed by a valid filename")]
    MissingOperand { operator: Operator },
    #[error("operator glued to an argument in '{token}'")]
    MalformedOperator { token: String },
    #[error("'{token}' contains the disallowed character '{character}'")]
    DisallowedCharacter { token: String, character: char },
}

/// Splits `line` on spaces, skipping the empty pieces produced by runs of spaces.
///
/// Tabs are not delimiters.
pub fn split_words(line: &str) -> impl Iterator<Item = &str> {
    line.split(' ').filter(|word| !word.is_empty())
}

/// Classifies each space-delimited piece of `line`.
pub fn tokens(line: &str) -> impl Iterator<Item = Token<'_>> {
    split_words(line).map(|word| match Operator::from_token(word) {
        Some(op) => Token::Operator(op),
        None => Token::Word(word),
    })
}

fn disallowed_character(word: &str) -> Option<char> {
    word.chars().find(|c| DENYLIST.contains(c))
}

fn contains_operator_character(word: &str) -> bool {
    word.contains(['|', '<', '>'])
}

/// Checks that `line` is a well-formed command line.
///
/// Operators must not lead the line and must be followed by a token that
/// passes the denylist; the token after an operator is consumed by that check.
/// Running this twice on the same input always gives the same answer.
pub fn validate(line: &str) -> Result<(), ValidationError> {
    if line.trim().is_empty() {
        return Err(ValidationError::EmptyInput);
    }

    let mut stream = tokens(line);
    let mut seen_any = false;

    while let Some(token) = stream.next() {
        match token {
            Token::Operator(operator) => {
                if !seen_any {
                    return Err(ValidationError::MisplacedOperator { operator });
                }
                let operand_ok = match stream.next() {
                    Some(Token::Word(word)) => disallowed_character(word).is_none(),
                    Some(Token::Operator(_)) | None => false,
                };
                if !operand_ok {
                    return Err(ValidationError::MissingOperand { operator });
                }
            }
            Token::Word(word) if contains_operator_character(word) => {
                return Err(ValidationError::MalformedOperator {
                    token: word.to_string(),
                });
            }
            Token::Word(word) => {
                if let Some(character) = disallowed_character(word) {
                    return Err(ValidationError::DisallowedCharacter {
                        token: word.to_string(),
                        character,
                    });
                }
            }
        }
        seen_any = true;
    }

    log::debug!("validated line {line:?}");
    Ok(())
}
