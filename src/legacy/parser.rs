//! Legacy ACL Rule Parser
//!
//! Parses free-text rule strings such as
//! `{ group staff } , NOT ( ip 10.0.0.0/8 AND date > 01.01.2015 )`
//! into a [`Condition`] tree. `{ }` group like `( )`, commas act as `OR`,
//! keywords are case-insensitive and precedence is NOT > AND > OR.

use super::condition::{Condition, LEGACY_DATE_FORMAT};
use crate::error::{AclError, Result};

use chrono::NaiveDate;
use std::net::Ipv4Addr;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Open,
    Close,
    Comma,
    Word { text: String, quoted: bool },
}

impl Token {
    fn is_keyword(&self, keyword: &str) -> bool {
        match self {
            Token::Word { text, quoted: false } => text.eq_ignore_ascii_case(keyword),
            _ => false,
        }
    }
}

/// Parser for legacy rule strings
#[derive(Debug, Default, Clone, Copy)]
pub struct LegacyAclParser;

impl LegacyAclParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse one rule string. Blank input is the legacy default `TRUE`.
    pub fn parse(&self, input: &str) -> Result<Condition> {
        let tokens = tokenize(input)?;
        if tokens.is_empty() {
            return Ok(Condition::True);
        }

        let mut parser = TokenParser {
            input,
            tokens,
            pos: 0,
        };
        let condition = parser.parse_or()?;

        if let Some(token) = parser.peek() {
            return Err(AclError::parse(
                input,
                format!("unexpected {} after complete expression", describe(token)),
            ));
        }

        Ok(condition)
    }
}

/// Parse with the default parser
pub fn parse(input: &str) -> Result<Condition> {
    LegacyAclParser::new().parse(input)
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' | '{' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' | '}' => {
                chars.next();
                tokens.push(Token::Close);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '"' => {
                chars.next();
                let mut text = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '"' {
                        closed = true;
                        break;
                    }
                    text.push(c);
                }
                if !closed {
                    return Err(AclError::parse(input, "unterminated string literal"));
                }
                tokens.push(Token::Word { text, quoted: true });
            }
            _ => {
                let mut text = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || "(){},\"".contains(c) {
                        break;
                    }
                    text.push(c);
                    chars.next();
                }
                tokens.push(Token::Word {
                    text,
                    quoted: false,
                });
            }
        }
    }

    Ok(tokens)
}

fn describe(token: &Token) -> String {
    match token {
        Token::Open => "opening bracket".to_string(),
        Token::Close => "closing bracket".to_string(),
        Token::Comma => "comma".to_string(),
        Token::Word { text, .. } => format!("\"{}\"", text),
    }
}

struct TokenParser<'a> {
    input: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> TokenParser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn error(&self, message: impl Into<String>) -> AclError {
        AclError::parse(self.input, message)
    }

    fn at_or(&self) -> bool {
        matches!(self.peek(), Some(t) if *t == Token::Comma || t.is_keyword("or"))
    }

    fn at_and(&self) -> bool {
        matches!(self.peek(), Some(t) if t.is_keyword("and"))
    }

    fn parse_or(&mut self) -> Result<Condition> {
        let mut left = self.parse_and()?;
        while self.at_or() {
            self.advance();
            let right = self.parse_and()?;
            left = Condition::or(left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Condition> {
        let mut left = self.parse_not()?;
        while self.at_and() {
            self.advance();
            let right = self.parse_not()?;
            left = Condition::and(left, right);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Condition> {
        if matches!(self.peek(), Some(t) if t.is_keyword("not")) {
            self.advance();
            let inner = self.parse_not()?;
            return Ok(Condition::not(inner));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Condition> {
        match self.peek() {
            Some(Token::Open) => {
                self.advance();
                let inner = self.parse_or()?;
                match self.advance() {
                    Some(Token::Close) => Ok(inner),
                    Some(other) => Err(self.error(format!(
                        "expected closing bracket, found {}",
                        describe(&other)
                    ))),
                    None => Err(self.error("missing closing bracket")),
                }
            }
            Some(Token::Word { .. }) => self.parse_leaf(),
            Some(other) => {
                let found = describe(other);
                Err(self.error(format!("expected condition, found {}", found)))
            }
            None => Err(self.error("expected condition, found end of input")),
        }
    }

    fn parse_leaf(&mut self) -> Result<Condition> {
        let mut words = Vec::new();
        while let Some(token) = self.peek() {
            if token.is_keyword("and") || token.is_keyword("or") {
                break;
            }
            match token {
                Token::Word { text, .. } => {
                    words.push(text.clone());
                    self.advance();
                }
                _ => break,
            }
        }

        if words.is_empty() {
            return Err(self.error("expected condition"));
        }

        parse_simple_condition(self.input, &words)
    }
}

fn parse_simple_condition(input: &str, words: &[String]) -> Result<Condition> {
    let keyword = words[0].to_ascii_lowercase();
    let argument = words[1..].join(" ");
    let syntax_error = || AclError::parse(input, format!("syntax error: {}", words.join(" ")));

    match keyword.as_str() {
        "true" if argument.is_empty() => Ok(Condition::True),
        "false" if argument.is_empty() => Ok(Condition::False),
        "group" if !argument.is_empty() => Ok(Condition::Group(argument)),
        "user" if !argument.is_empty() => Ok(Condition::User(argument)),
        "iplist" if !argument.is_empty() => Ok(Condition::IpList(argument)),
        "ip" if !argument.is_empty() => parse_ip(input, &argument),
        "date" if !argument.is_empty() => parse_date_clause(input, &argument),
        _ => Err(syntax_error()),
    }
}

fn parse_ip(input: &str, argument: &str) -> Result<Condition> {
    let (addr, prefix) = match argument.split_once('/') {
        Some((addr, prefix)) => (addr.trim(), Some(prefix.trim())),
        None => (argument.trim(), None),
    };

    let addr: Ipv4Addr = addr
        .parse()
        .map_err(|_| AclError::parse(input, format!("invalid IPv4 address: {}", addr)))?;

    let prefix_len = match prefix {
        Some(prefix) => prefix
            .parse::<u8>()
            .ok()
            .filter(|len| *len <= 32)
            .ok_or_else(|| AclError::parse(input, format!("invalid prefix length: {}", prefix)))?,
        None => 32,
    };

    Ok(Condition::Ip { addr, prefix_len })
}

fn parse_date_clause(input: &str, argument: &str) -> Result<Condition> {
    let (op, rest) = ["<=", ">=", "<", ">"]
        .iter()
        .find_map(|op| argument.strip_prefix(op).map(|rest| (*op, rest.trim())))
        .ok_or_else(|| AclError::parse(input, format!("invalid date comparison: {}", argument)))?;

    let date = NaiveDate::parse_from_str(rest, LEGACY_DATE_FORMAT)
        .map_err(|e| AclError::parse(input, format!("invalid date {}: {}", rest, e)))?;

    Ok(match op {
        "<" => Condition::DateBefore { date, inclusive: false },
        "<=" => Condition::DateBefore { date, inclusive: true },
        ">" => Condition::DateAfter { date, inclusive: false },
        _ => Condition::DateAfter { date, inclusive: true },
    })
}
