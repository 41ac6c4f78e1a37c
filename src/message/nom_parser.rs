//! Nom-based raw line splitter.
//!
//! Splits a raw server line into its tag section, source, command and
//! parameters without copying. Tag values are left escaped; decoding them
//! is the job of [`super::tags`].

use nom::{
    branch::alt,
    bytes::complete::{take_till, take_till1, take_while1},
    character::complete::{char, space0, space1},
    combinator::{opt, rest},
    error::{context, VerboseError, VerboseErrorKind},
    sequence::{preceded, terminated},
    IResult,
};

use crate::error::MessageParseError;

type ParseResult<I, O> = IResult<I, O, VerboseError<I>>;

/// `@tags ` up to the first space.
fn tags(input: &str) -> ParseResult<&str, &str> {
    context(
        "parsing IRCv3 message tags",
        terminated(preceded(char('@'), take_till(|c| c == ' ')), space1),
    )(input)
}

/// `:source ` up to the first space.
fn source(input: &str) -> ParseResult<&str, &str> {
    context(
        "parsing message source",
        terminated(preceded(char(':'), take_till1(|c| c == ' ')), space0),
    )(input)
}

fn command(input: &str) -> ParseResult<&str, &str> {
    context(
        "parsing IRC command",
        take_while1(|c: char| c.is_ascii_alphanumeric()),
    )(input)
}

/// One parameter: either `:trailing` (rest of line) or a middle word.
fn param(input: &str) -> ParseResult<&str, &str> {
    preceded(
        space1,
        alt((preceded(char(':'), rest), take_till1(|c| c == ' '))),
    )(input)
}

/// A line split into borrowed parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLine<'a> {
    /// Raw tag section without the leading `@`.
    pub tags: Option<&'a str>,
    /// Raw source without the leading `:`.
    pub source: Option<&'a str>,
    /// Command name or three-digit numeric.
    pub command: &'a str,
    /// Parameters; the trailing parameter is last and may contain spaces.
    pub params: Vec<&'a str>,
}

impl<'a> ParsedLine<'a> {
    /// Split `input`, ignoring a trailing CR/LF.
    pub fn parse(input: &'a str) -> Result<Self, MessageParseError> {
        let line = input.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Err(MessageParseError::EmptyMessage);
        }
        match split_line(line) {
            Ok((_, parsed)) => Ok(parsed),
            Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
                let mut position = line.len();
                let mut ctx = "parsing line";
                for (at, kind) in &e.errors {
                    position = line.len() - at.len();
                    if let VerboseErrorKind::Context(c) = kind {
                        ctx = c;
                    }
                }
                Err(MessageParseError::ParseContext {
                    position,
                    context: ctx.to_owned(),
                })
            }
            Err(nom::Err::Incomplete(_)) => Err(MessageParseError::InvalidCommand),
        }
    }
}

fn split_line(input: &str) -> ParseResult<&str, ParsedLine<'_>> {
    let (input, tags) = opt(tags)(input)?;
    let (input, source) = opt(source)(input)?;
    let (mut input, command) = command(input)?;

    let mut params = Vec::new();
    loop {
        // Tolerate trailing whitespace after the last middle parameter.
        if input.trim_end().is_empty() && !input.starts_with(" :") {
            break;
        }
        let (next, p) = param(input)?;
        params.push(p);
        input = next;
        if input.is_empty() {
            break;
        }
    }

    Ok((
        input,
        ParsedLine {
            tags,
            source,
            command,
            params,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_command() {
        let line = ParsedLine::parse("PING").unwrap();
        assert_eq!(line.command, "PING");
        assert!(line.tags.is_none());
        assert!(line.source.is_none());
        assert!(line.params.is_empty());
    }

    #[test]
    fn test_parse_with_tags_and_source() {
        let line =
            ParsedLine::parse("@msgid=abc;time=2023-01-01T00:00:00.000Z :nick!u@h PRIVMSG #ch :hi there")
                .unwrap();
        assert_eq!(line.tags, Some("msgid=abc;time=2023-01-01T00:00:00.000Z"));
        assert_eq!(line.source, Some("nick!u@h"));
        assert_eq!(line.command, "PRIVMSG");
        assert_eq!(line.params, vec!["#ch", "hi there"]);
    }

    #[test]
    fn test_parse_cap_multiline_marker() {
        let line = ParsedLine::parse(":srv CAP * LS * :sasl multi-prefix\r\n").unwrap();
        assert_eq!(line.params, vec!["*", "LS", "*", "sasl multi-prefix"]);
    }

    #[test]
    fn test_parse_empty_trailing() {
        let line = ParsedLine::parse("PRIVMSG #channel :").unwrap();
        assert_eq!(line.params, vec!["#channel", ""]);
    }

    #[test]
    fn test_parse_trailing_space() {
        let line = ParsedLine::parse(":srv 001 me ").unwrap();
        assert_eq!(line.params, vec!["me"]);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(ParsedLine::parse(""), Err(MessageParseError::EmptyMessage));
        assert!(matches!(
            ParsedLine::parse(":only-a-source"),
            Err(MessageParseError::ParseContext { .. })
        ));
    }
}
