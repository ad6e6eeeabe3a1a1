//! Command line tokenizer
//!
//! Splits one line of input into a command name and its arguments.
//! Whitespace separates tokens; text between a pair of double quotes is a
//! single token with the quotes removed.

use thiserror::Error;

/// Command parsing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Command cannot be empty.")]
    Empty,
}

pub type CommandResult<T> = Result<T, CommandError>;

/// A parsed command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    name: String,
    args: Vec<String>,
}

impl Command {
    /// Parse a raw command line
    pub fn parse(line: &str) -> CommandResult<Self> {
        let mut tokens = tokenize(line).into_iter();
        let name = tokens.next().ok_or(CommandError::Empty)?;
        Ok(Self {
            name,
            args: tokens.collect(),
        })
    }

    /// Command name as typed
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Case-insensitive name comparison
    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    /// Ordered arguments
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut rest = line.trim_start();

    while !rest.is_empty() {
        let quoted = rest
            .strip_prefix('"')
            .and_then(|body| body.find('"').map(|end| (body, end)));

        let consumed = match quoted {
            Some((body, end)) => {
                tokens.push(body[..end].to_string());
                end + 2
            }
            // A lone quote does not open a quoted token.
            None => {
                let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
                tokens.push(rest[..end].to_string());
                end
            }
        };
        rest = rest[consumed..].trim_start();
    }

    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_tokens() {
        let cmd = Command::parse("  cd   docs ").unwrap();
        assert_eq!(cmd.name(), "cd");
        assert_eq!(cmd.args(), ["docs"]);
    }

    #[test]
    fn test_quoted_argument_is_one_token() {
        let cmd = Command::parse("cp \"my file.txt\" other.txt").unwrap();
        assert_eq!(cmd.name(), "cp");
        assert_eq!(cmd.args(), ["my file.txt", "other.txt"]);
    }

    #[test]
    fn test_quoted_whitespace_preserved() {
        let cmd = Command::parse("rm \"  spaced\tout  \"").unwrap();
        assert_eq!(cmd.args(), ["  spaced\tout  "]);
    }

    #[test]
    fn test_empty_quotes_yield_empty_token() {
        let cmd = Command::parse("cd \"\"").unwrap();
        assert_eq!(cmd.args(), [""]);
    }

    #[test]
    fn test_unbalanced_quote() {
        let cmd = Command::parse("rm \"half open").unwrap();
        assert_eq!(cmd.args(), ["\"half", "open"]);
    }

    #[test]
    fn test_empty_line() {
        assert_eq!(Command::parse(""), Err(CommandError::Empty));
        assert_eq!(Command::parse(" \t "), Err(CommandError::Empty));
    }

    #[test]
    fn test_case_insensitive_name() {
        let cmd = Command::parse("LS").unwrap();
        assert!(cmd.is("ls"));
        assert_eq!(cmd.name(), "LS");
    }
}
