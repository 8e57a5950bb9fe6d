//! Annotation filter using kubernetes label selector syntax, e.g.
//! `kubernetes.io/ingress.class=contour,team in (a,b),!skip-dns`.
//!
//! The filter is parsed once into a [`kube::core::Selector`] whose expressions are ANDed when matching.

use kube::core::{
    Expression,
    Selector,
};
use std::{
    collections::BTreeSet,
    fmt,
};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("expected {expected} but found {found}")]
    Unexpected { expected: &'static str, found: String },

    #[error("for 'in', 'notin' operators, values set can't be empty")]
    EmptyValueSet,

    #[error("invalid key {key:?}: {reason}")]
    InvalidKey { key: String, reason: &'static str },

    #[error("invalid value {value:?}: {reason}")]
    InvalidValue { value: String, reason: &'static str },
}

/// Parses an annotation filter. Blank input yields the selector matching everything.
pub fn parse(input: &str) -> Result<Selector, FilterError> {
    Parser::new(input).parse()
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Token {
    Identifier(String),
    Bang,
    Equals,
    DoubleEquals,
    NotEquals,
    In,
    NotIn,
    OpenParen,
    CloseParen,
    Comma,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Identifier(ident) => write!(f, "{ident:?}"),
            Token::Bang => f.write_str("'!'"),
            Token::Equals => f.write_str("'='"),
            Token::DoubleEquals => f.write_str("'=='"),
            Token::NotEquals => f.write_str("'!='"),
            Token::In => f.write_str("'in'"),
            Token::NotIn => f.write_str("'notin'"),
            Token::OpenParen => f.write_str("'('"),
            Token::CloseParen => f.write_str("')'"),
            Token::Comma => f.write_str("','"),
        }
    }
}

fn is_special(c: char) -> bool {
    matches!(c, '!' | '=' | '(' | ')' | ',')
}

fn tokenize(input: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        let token = match c {
            c if c.is_whitespace() => continue,
            '!' if chars.peek() == Some(&'=') => {
                chars.next();
                Token::NotEquals
            }
            '!' => Token::Bang,
            '=' if chars.peek() == Some(&'=') => {
                chars.next();
                Token::DoubleEquals
            }
            '=' => Token::Equals,
            '(' => Token::OpenParen,
            ')' => Token::CloseParen,
            ',' => Token::Comma,
            c => {
                let mut ident = String::from(c);
                while let Some(&next) = chars.peek() {
                    if next.is_whitespace() || is_special(next) {
                        break;
                    }
                    ident.push(next);
                    chars.next();
                }
                match ident.as_str() {
                    "in" => Token::In,
                    "notin" => Token::NotIn,
                    _ => Token::Identifier(ident),
                }
            }
        };
        tokens.push(token);
    }

    tokens
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(input: &str) -> Self {
        Self {
            tokens: tokenize(input),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn unexpected(expected: &'static str, found: Option<Token>) -> FilterError {
        FilterError::Unexpected {
            expected,
            found: found.map_or_else(|| "end of input".to_string(), |token| token.to_string()),
        }
    }

    fn parse(mut self) -> Result<Selector, FilterError> {
        let mut selector = Selector::default();

        if self.peek().is_none() {
            return Ok(selector);
        }

        loop {
            selector.extend(self.expression()?);
            match self.next() {
                None => break,
                Some(Token::Comma) => continue,
                found => return Err(Self::unexpected("','", found)),
            }
        }

        Ok(selector)
    }

    fn expression(&mut self) -> Result<Expression, FilterError> {
        if self.peek() == Some(&Token::Bang) {
            self.next();
            let key = self.key()?;
            return Ok(Expression::DoesNotExist(key));
        }

        let key = self.key()?;

        match self.peek() {
            None | Some(Token::Comma) => Ok(Expression::Exists(key)),
            Some(Token::Equals | Token::DoubleEquals) => {
                self.next();
                Ok(Expression::Equal(key, self.value()?))
            }
            Some(Token::NotEquals) => {
                self.next();
                Ok(Expression::NotEqual(key, self.value()?))
            }
            Some(Token::In) => {
                self.next();
                Ok(Expression::In(key, self.value_set()?))
            }
            Some(Token::NotIn) => {
                self.next();
                Ok(Expression::NotIn(key, self.value_set()?))
            }
            _ => Err(Self::unexpected("an operator", self.next())),
        }
    }

    fn key(&mut self) -> Result<String, FilterError> {
        match self.next() {
            Some(Token::Identifier(key)) => {
                validate_key(&key)?;
                Ok(key)
            }
            found => Err(Self::unexpected("a key", found)),
        }
    }

    /// A single value after `=`, `==` or `!=`. `key=` selects the empty value.
    fn value(&mut self) -> Result<String, FilterError> {
        match self.peek() {
            None | Some(Token::Comma) => Ok(String::new()),
            Some(Token::Identifier(_)) => {
                let Some(Token::Identifier(value)) = self.next() else {
                    unreachable!("peeked identifier");
                };
                validate_value(&value)?;
                Ok(value)
            }
            _ => Err(Self::unexpected("a value", self.next())),
        }
    }

    fn value_set(&mut self) -> Result<BTreeSet<String>, FilterError> {
        match self.next() {
            Some(Token::OpenParen) => {}
            found => return Err(Self::unexpected("'('", found)),
        }

        let mut values = BTreeSet::new();
        if self.peek() == Some(&Token::CloseParen) {
            self.next();
            return Err(FilterError::EmptyValueSet);
        }

        loop {
            match self.next() {
                Some(Token::Identifier(value)) => {
                    validate_value(&value)?;
                    values.insert(value);
                    match self.next() {
                        Some(Token::Comma) => continue,
                        Some(Token::CloseParen) => break,
                        found => return Err(Self::unexpected("',' or ')'", found)),
                    }
                }
                // `(a,)` contains the empty value
                Some(Token::Comma) => {
                    values.insert(String::new());
                }
                Some(Token::CloseParen) => {
                    values.insert(String::new());
                    break;
                }
                found => return Err(Self::unexpected("a value", found)),
            }
        }

        Ok(values)
    }
}

const NAME_MAX_LEN: usize = 63;
const PREFIX_MAX_LEN: usize = 253;

/// `[prefix/]name` where prefix is a DNS subdomain.
fn validate_key(key: &str) -> Result<(), FilterError> {
    let invalid = |reason| FilterError::InvalidKey {
        key: key.to_string(),
        reason,
    };

    let name = match key.split_once('/') {
        Some((prefix, name)) => {
            if prefix.is_empty() || prefix.len() > PREFIX_MAX_LEN {
                return Err(invalid("prefix must be a non-empty DNS subdomain of at most 253 characters"));
            }
            if !prefix.split('.').all(is_dns_label) {
                return Err(invalid("prefix must be a lowercase DNS subdomain"));
            }
            name
        }
        None => key,
    };

    if name.is_empty() || name.len() > NAME_MAX_LEN || !is_qualified_name(name) {
        return Err(invalid(
            "name must be at most 63 alphanumeric characters, '-', '_' or '.', starting and ending with an alphanumeric character",
        ));
    }

    Ok(())
}

fn validate_value(value: &str) -> Result<(), FilterError> {
    if value.is_empty() {
        return Ok(());
    }
    if value.len() > NAME_MAX_LEN || !is_qualified_name(value) {
        return Err(FilterError::InvalidValue {
            value: value.to_string(),
            reason: "must be at most 63 alphanumeric characters, '-', '_' or '.', starting and ending with an alphanumeric character",
        });
    }
    Ok(())
}

fn is_qualified_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    let (Some(first), Some(last)) = (bytes.first(), bytes.last()) else {
        return false;
    };
    first.is_ascii_alphanumeric()
        && last.is_ascii_alphanumeric()
        && bytes
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
}

fn is_dns_label(label: &str) -> bool {
    let bytes = label.as_bytes();
    let (Some(first), Some(last)) = (bytes.first(), bytes.last()) else {
        return false;
    };
    label.len() <= NAME_MAX_LEN
        && (first.is_ascii_lowercase() || first.is_ascii_digit())
        && (last.is_ascii_lowercase() || last.is_ascii_digit())
        && bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::SelectorExt as _;
    use std::collections::BTreeMap;

    fn annotations<const N: usize>(pairs: [(&str, &str); N]) -> BTreeMap<String, String> {
        pairs.into_iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn set<const N: usize>(values: [&str; N]) -> BTreeSet<String> {
        values.into_iter().map(str::to_string).collect()
    }

    fn expressions(input: &str) -> Vec<Expression> {
        parse(input).unwrap().into_iter().collect()
    }

    #[test]
    fn empty_selector_matches_everything() {
        let selector = parse("").unwrap();
        assert!(selector.selects_all());
        assert!(selector.matches(&BTreeMap::new()));
        assert!(parse("   ").unwrap().selects_all());
    }

    #[test]
    fn parses_every_operator() {
        let selector =
            parse("kubernetes.io/ingress.class=contour, tier==web, env!=dev, team in (a, b), zone notin (x), managed, !skip")
                .unwrap();

        assert_eq!(
            selector.clone().into_iter().collect::<Vec<_>>(),
            vec![
                Expression::Equal("kubernetes.io/ingress.class".into(), "contour".into()),
                Expression::Equal("tier".into(), "web".into()),
                Expression::NotEqual("env".into(), "dev".into()),
                Expression::In("team".into(), set(["a", "b"])),
                Expression::NotIn("zone".into(), set(["x"])),
                Expression::Exists("managed".into()),
                Expression::DoesNotExist("skip".into()),
            ]
        );
        assert_eq!(
            selector.to_string(),
            "kubernetes.io/ingress.class=contour,tier=web,env!=dev,team in (a,b),zone notin (x),managed,!skip"
        );
    }

    #[test]
    fn equality_matching() {
        let selector = parse("kubernetes.io/ingress.class=contour").unwrap();
        assert!(selector.matches(&annotations([("kubernetes.io/ingress.class", "contour")])));
        assert!(!selector.matches(&annotations([("kubernetes.io/ingress.class", "nginx")])));
        assert!(!selector.matches(&BTreeMap::new()));
    }

    #[test]
    fn negative_operators_match_absent_keys() {
        let not_equals = parse("env!=dev").unwrap();
        assert!(not_equals.matches(&BTreeMap::new()));
        assert!(not_equals.matches(&annotations([("env", "prod")])));
        assert!(!not_equals.matches(&annotations([("env", "dev")])));

        let not_in = parse("env notin (dev,qa)").unwrap();
        assert!(not_in.matches(&BTreeMap::new()));
        assert!(!not_in.matches(&annotations([("env", "qa")])));
    }

    #[test]
    fn set_and_existence_matching() {
        let selector = parse("team in (a,b),!skip,managed").unwrap();
        assert!(selector.matches(&annotations([("team", "a"), ("managed", "")])));
        assert!(!selector.matches(&annotations([("team", "c"), ("managed", "yes")])));
        assert!(!selector.matches(&annotations([("team", "a"), ("managed", "yes"), ("skip", "true")])));
        assert!(!selector.matches(&annotations([("team", "b")])));
    }

    #[test]
    fn empty_values() {
        assert_eq!(expressions("key="), vec![Expression::Equal("key".into(), String::new())]);
        assert_eq!(expressions("key in (a,)"), vec![Expression::In("key".into(), set(["a", ""]))]);
    }

    #[test]
    fn rejects_malformed_selectors() {
        assert_eq!(parse("key in ()"), Err(FilterError::EmptyValueSet));
        assert!(matches!(parse("key in a"), Err(FilterError::Unexpected { expected: "'('", .. })));
        assert!(matches!(parse("=value"), Err(FilterError::Unexpected { .. })));
        assert!(matches!(parse("a b"), Err(FilterError::Unexpected { .. })));
        assert!(matches!(parse("a,,b"), Err(FilterError::Unexpected { .. })));
        assert!(matches!(parse("a=b=c"), Err(FilterError::Unexpected { .. })));
        assert!(matches!(parse("key in (a"), Err(FilterError::Unexpected { .. })));
    }

    #[test]
    fn rejects_invalid_keys_and_values() {
        assert!(matches!(parse("-bad=x"), Err(FilterError::InvalidKey { .. })));
        assert!(matches!(parse("Upper.IO/key=x"), Err(FilterError::InvalidKey { .. })));
        assert!(matches!(parse("/key=x"), Err(FilterError::InvalidKey { .. })));
        assert!(matches!(parse("key=bad value!"), Err(FilterError::Unexpected { .. })));
        assert!(matches!(parse("key=-x"), Err(FilterError::InvalidValue { .. })));
        let long = "a".repeat(64);
        assert!(matches!(parse(&format!("key={long}")), Err(FilterError::InvalidValue { .. })));
    }
}
