//! Recursive-descent parser for the matcher expression grammar (spec §6):
//!
//! ```text
//! matchers   = [ "{" ] matcher { "," matcher } [ "," ] [ "}" ]
//! matcher    = name op value
//! name       = quoted | unquoted
//! value      = quoted | unquoted
//! op         = "=" | "!=" | "=~" | "!~"
//! unquoted   = [A-Za-z_:][A-Za-z0-9_:]*
//! quoted     = double-quoted UTF-8 with backslash escapes (\n \t \r \\ \" \uXXXX)
//! ```
//!
//! Errors report 1-based column ranges: `START:END: text: reason`.

use super::{Matcher, Matchers, Op};
use crate::error::{MatcherError, MatcherResult};

struct Parser<'a> {
    chars: Vec<char>,
    pos: usize,
    src: &'a str,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Parser { chars: src.chars().collect(), pos: 0, src }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn err(&self, start: usize, end: usize, reason: &str) -> MatcherError {
        let text: String = self.chars[start.min(self.chars.len())..end.min(self.chars.len())]
            .iter()
            .collect();
        MatcherError::ParseError {
            start: start + 1,
            end: end.max(start) + 1,
            text,
            reason: reason.to_string(),
        }
    }

    fn is_name_start(c: char) -> bool {
        c.is_ascii_alphabetic() || c == '_' || c == ':'
    }

    fn is_name_cont(c: char) -> bool {
        c.is_ascii_alphanumeric() || c == '_' || c == ':'
    }

    /// Parses a `name` or `value` token (quoted or unquoted). `allow_leading_colon`
    /// distinguishes the name grammar (colon is a legal first character, used for
    /// recording-rule-style meta labels) from the value grammar, where a bare
    /// leading colon is rejected so that a stray `:` right after an operator is
    /// diagnosed at the operator rather than silently accepted as a value.
    fn parse_token(&mut self, allow_leading_colon: bool) -> MatcherResult<String> {
        match self.peek() {
            Some('"') => self.parse_quoted(),
            Some(c) if Self::is_name_start(c) && (allow_leading_colon || c != ':') => {
                let start = self.pos;
                while matches!(self.peek(), Some(c) if Self::is_name_cont(c)) {
                    self.pos += 1;
                }
                Ok(self.chars[start..self.pos].iter().collect())
            }
            _ => Err(self.err(self.pos, self.pos + 1, "expected name or value")),
        }
    }

    fn parse_quoted(&mut self) -> MatcherResult<String> {
        let start = self.pos;
        self.advance(); // opening quote
        let mut out = String::new();
        loop {
            match self.advance() {
                None => return Err(self.err(start, self.pos, "unterminated quoted string")),
                Some('"') => break,
                Some('\\') => match self.advance() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some('\\') => out.push('\\'),
                    Some('"') => out.push('"'),
                    Some('u') => {
                        let hex: String = (0..4).filter_map(|_| self.advance()).collect();
                        let code = u32::from_str_radix(&hex, 16)
                            .map_err(|_| self.err(start, self.pos, "invalid \\u escape"))?;
                        let c = char::from_u32(code)
                            .ok_or_else(|| self.err(start, self.pos, "invalid \\u escape"))?;
                        out.push(c);
                    }
                    Some(other) => return Err(self.err(start, self.pos, &format!("invalid escape \\{other}"))),
                    None => return Err(self.err(start, self.pos, "unterminated escape")),
                },
                Some(c) => out.push(c),
            }
        }
        Ok(out)
    }

    fn parse_op(&mut self) -> MatcherResult<Op> {
        let start = self.pos;
        let op = match (self.peek(), self.peek_at(1)) {
            (Some('='), Some('~')) => {
                self.pos += 2;
                Op::MatchRegex
            }
            (Some('!'), Some('=')) => {
                self.pos += 2;
                Op::NotEqual
            }
            (Some('!'), Some('~')) => {
                self.pos += 2;
                Op::NotMatchRegex
            }
            (Some('='), _) => {
                self.pos += 1;
                Op::Equal
            }
            _ => return Err(self.err(start, start + 1, "invalid operator")),
        };
        Ok(op)
    }

    fn parse_matcher(&mut self) -> MatcherResult<Matcher> {
        self.skip_ws();
        let name = self.parse_token(true)?;
        self.skip_ws();
        let op = self.parse_op()?;
        self.skip_ws();
        let value_start = self.pos;
        let value = self.parse_token(false).map_err(|_| {
            // A malformed value token immediately after the operator reads, to a
            // human, as "the operator didn't make sense" (spec §8 scenario 2:
            // `foo=:` is reported as an invalid operator, not an invalid value).
            self.err(value_start, value_start + 1, "invalid operator")
        })?;
        Matcher::new(name, op, value).map_err(|e| match e {
            MatcherError::InvalidRegex(val, reason) => self.err(value_start, self.pos, &format!("invalid regex {val:?}: {reason}")),
            other => other,
        })
    }

    fn parse_matchers(&mut self) -> MatcherResult<Matchers> {
        self.skip_ws();
        let brace_col = self.pos;
        let has_brace = self.peek() == Some('{');
        if has_brace {
            self.advance();
        }

        let mut matchers = Vec::new();
        loop {
            self.skip_ws();
            if self.peek().is_none() || self.peek() == Some('}') {
                break;
            }
            matchers.push(self.parse_matcher()?);
            self.skip_ws();
            if self.peek() == Some(',') {
                self.advance();
                continue;
            }
            break;
        }

        self.skip_ws();
        if has_brace {
            if self.peek() != Some('}') {
                return Err(self.err(brace_col, brace_col + 1, "expected close brace"));
            }
            self.advance();
        }

        self.skip_ws();
        if self.pos != self.chars.len() {
            return Err(self.err(self.pos, self.pos + 1, "unexpected trailing input"));
        }

        Ok(Matchers(matchers))
    }

    #[allow(dead_code)]
    fn source(&self) -> &str {
        self.src
    }
}

/// Parses a matcher expression per the §6 grammar.
pub fn parse_matchers(s: &str) -> MatcherResult<Matchers> {
    Parser::new(s).parse_matchers()
}
