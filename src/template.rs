//! FQDN templates, a small subset of Go's `text/template` as used by external-dns configurations, e.g.
//! `{{.Name}}.{{.Namespace}}.example.com` or `{{ .Name | trimPrefix "web-" }}.example.com`.
//!
//! Templates are executed against the JSON form of the resource. Field names match case-insensitively and fields
//! of `metadata` are promoted to the top level, so `.Name`, `.Namespace`, `.Annotations`, `.Spec.VirtualHost.Fqdn`
//! and `.Status.CurrentStatus` all resolve like they would against the Go type.
//!
//! Supported: text, `{{ pipeline }}` with `{{-`/`-}}` trimming, `{{/* comments */}}`, the operands `.`, `.Field.Chain`
//! and string literals, `|` pipelines and the functions `trimPrefix`, `trimSuffix`, `toLower`, `replace` and `index`.

use crate::resources::HTTPProxy;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("template: {0}")]
    Parse(String),

    #[error("template: {0}")]
    Exec(String),
}

type Result<T, E = TemplateError> = std::result::Result<T, E>;

/// A parsed FQDN template.
#[derive(Clone, Debug)]
pub struct FqdnTemplate {
    source: String,
    nodes: Vec<Node>,
}

#[derive(Clone, Debug, PartialEq)]
enum Node {
    Text(String),
    Action(Vec<Command>),
}

/// One stage of a pipeline. The value piped in from the previous stage is passed as the last argument.
#[derive(Clone, Debug, PartialEq)]
struct Command {
    function: Option<Function>,
    args: Vec<Operand>,
}

#[derive(Clone, Debug, PartialEq)]
enum Operand {
    Dot,
    Field(Vec<String>),
    Str(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Function {
    TrimPrefix,
    TrimSuffix,
    ToLower,
    Replace,
    Index,
}

impl Function {
    fn lookup(name: &str) -> Option<Self> {
        Some(match name {
            "trimPrefix" => Function::TrimPrefix,
            "trimSuffix" => Function::TrimSuffix,
            "toLower" => Function::ToLower,
            "replace" => Function::Replace,
            "index" => Function::Index,
            _ => return None,
        })
    }

    fn name(self) -> &'static str {
        match self {
            Function::TrimPrefix => "trimPrefix",
            Function::TrimSuffix => "trimSuffix",
            Function::ToLower => "toLower",
            Function::Replace => "replace",
            Function::Index => "index",
        }
    }

    fn call(self, args: Vec<Value>) -> Result<Value> {
        let arity = |expected: usize| {
            if args.len() == expected {
                Ok(())
            } else {
                Err(TemplateError::Exec(format!(
                    "wrong number of args for {}: want {expected} got {}",
                    self.name(),
                    args.len()
                )))
            }
        };

        match self {
            Function::TrimPrefix => {
                arity(2)?;
                let s = self.string_arg(&args[0])?;
                let prefix = self.string_arg(&args[1])?;
                Ok(Value::String(s.strip_prefix(prefix).unwrap_or(s).to_string()))
            }
            Function::TrimSuffix => {
                arity(2)?;
                let s = self.string_arg(&args[0])?;
                let suffix = self.string_arg(&args[1])?;
                Ok(Value::String(s.strip_suffix(suffix).unwrap_or(s).to_string()))
            }
            Function::ToLower => {
                arity(1)?;
                Ok(Value::String(self.string_arg(&args[0])?.to_lowercase()))
            }
            Function::Replace => {
                arity(3)?;
                let old = self.string_arg(&args[0])?;
                let new = self.string_arg(&args[1])?;
                let target = self.string_arg(&args[2])?;
                Ok(Value::String(target.replace(old, new)))
            }
            Function::Index => {
                let Some((collection, keys)) = args.split_first() else {
                    return Err(TemplateError::Exec("wrong number of args for index: want at least 1 got 0".into()));
                };
                keys.iter().try_fold(collection.clone(), |current, key| {
                    let key = self.string_arg(key)?;
                    match current {
                        Value::Null => Ok(Value::Null),
                        Value::Object(mut map) => Ok(map.remove(key).unwrap_or(Value::Null)),
                        other => Err(TemplateError::Exec(format!(
                            "error calling index: can't index item of type {}",
                            kind(&other)
                        ))),
                    }
                })
            }
        }
    }

    /// Missing fields evaluate to null, which reads as the empty string like an unset Go string field.
    fn string_arg<'a>(&self, value: &'a Value) -> Result<&'a str> {
        match value {
            Value::String(s) => Ok(s),
            Value::Null => Ok(""),
            other => Err(TemplateError::Exec(format!(
                "error calling {}: expected string argument, got {}",
                self.name(),
                kind(other)
            ))),
        }
    }
}

impl FqdnTemplate {
    pub fn parse(source: &str) -> Result<Self> {
        Ok(Self {
            source: source.to_string(),
            nodes: parse_nodes(source)?,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn render(&self, data: &Value) -> Result<String> {
        let mut out = String::new();
        for node in &self.nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Action(pipeline) => write_value(&mut out, &eval_pipeline(pipeline, data)?),
            }
        }
        Ok(out)
    }

    /// Renders against `proxy` and splits the output into hostnames.
    pub fn hostnames(&self, proxy: &HTTPProxy) -> Result<Vec<String>> {
        let data = serde_json::to_value(proxy).map_err(|err| TemplateError::Exec(err.to_string()))?;
        Ok(split_hostnames(&self.render(&data)?))
    }
}

impl fmt::Display for FqdnTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// `"a.com., b.com"` -> `["a.com", "b.com"]`. Only a single trailing dot is removed.
pub fn split_hostnames(rendered: &str) -> Vec<String> {
    let compact: String = rendered.chars().filter(|c| !c.is_whitespace()).collect();
    compact
        .split(',')
        .map(|hostname| hostname.strip_suffix('.').unwrap_or(hostname))
        .filter(|hostname| !hostname.is_empty())
        .map(str::to_string)
        .collect()
}

// -=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-
// parsing

fn parse_nodes(source: &str) -> Result<Vec<Node>> {
    let mut nodes = Vec::new();
    let mut rest = source;
    let mut trim_leading = false;

    loop {
        let Some(open) = rest.find("{{") else {
            push_text(&mut nodes, rest, trim_leading, false);
            break;
        };

        let mut inner = &rest[open + 2..];
        let trim_trailing = has_left_trim_marker(inner);
        if trim_trailing {
            inner = &inner[1..];
        }
        push_text(&mut nodes, &rest[..open], trim_leading, trim_trailing);

        let (content, trim_next, remainder) = split_action(inner)?;
        trim_leading = trim_next;
        rest = remainder;

        let content = content.trim();
        if content.starts_with("/*") {
            continue;
        }

        nodes.push(Node::Action(parse_pipeline(content)?));
    }

    Ok(nodes)
}

fn push_text(nodes: &mut Vec<Node>, text: &str, trim_start: bool, trim_end: bool) {
    let text = if trim_start { text.trim_start() } else { text };
    let text = if trim_end { text.trim_end() } else { text };
    if !text.is_empty() {
        nodes.push(Node::Text(text.to_string()));
    }
}

fn has_left_trim_marker(inner: &str) -> bool {
    let mut chars = inner.chars();
    chars.next() == Some('-') && chars.next().map_or(false, char::is_whitespace)
}

/// Splits off the action body. Returns the body, whether a right trim marker was present and the text after `}}`.
fn split_action(inner: &str) -> Result<(&str, bool, &str)> {
    let close = if inner.trim_start().starts_with("/*") {
        let end = inner
            .find("*/")
            .ok_or_else(|| TemplateError::Parse("unclosed comment".into()))?;
        let after = end + 2;
        let close = inner[after..]
            .find("}}")
            .map(|pos| pos + after)
            .ok_or_else(|| TemplateError::Parse("unclosed action".into()))?;
        if !inner[after..close].trim().trim_end_matches('-').trim().is_empty() {
            return Err(TemplateError::Parse("comment ends before closing delimiter".into()));
        }
        close
    } else {
        find_close(inner)?
    };

    let body = &inner[..close];
    let remainder = &inner[close + 2..];

    match body.strip_suffix('-') {
        Some(stripped) if stripped.ends_with(char::is_whitespace) => Ok((stripped, true, remainder)),
        _ => Ok((body, false, remainder)),
    }
}

fn find_close(inner: &str) -> Result<usize> {
    let mut chars = inner.char_indices().peekable();
    while let Some((pos, c)) = chars.next() {
        match c {
            '"' => loop {
                match chars.next() {
                    Some((_, '\\')) => {
                        chars.next();
                    }
                    Some((_, '"')) => break,
                    Some(_) => {}
                    None => return Err(TemplateError::Parse("unterminated quoted string".into())),
                }
            },
            '`' => loop {
                match chars.next() {
                    Some((_, '`')) => break,
                    Some(_) => {}
                    None => return Err(TemplateError::Parse("unterminated raw quoted string".into())),
                }
            },
            '}' if matches!(chars.peek(), Some((_, '}'))) => return Ok(pos),
            _ => {}
        }
    }
    Err(TemplateError::Parse("unclosed action".into()))
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Dot,
    Field(Vec<String>),
    Str(String),
    Ident(String),
    Pipe,
}

const UNSUPPORTED_KEYWORDS: &[&str] = &[
    "if", "else", "end", "range", "with", "define", "template", "block", "break", "continue", "nil", "true", "false",
];

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn tokenize(action: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = action.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {}
            '|' => tokens.push(Token::Pipe),
            '.' => {
                let mut path = Vec::new();
                loop {
                    let mut segment = String::new();
                    while let Some(&next) = chars.peek() {
                        if !is_ident_char(next) {
                            break;
                        }
                        segment.push(next);
                        chars.next();
                    }
                    if segment.is_empty() {
                        if !path.is_empty() {
                            return Err(TemplateError::Parse(format!("bad field in {action:?}")));
                        }
                        break;
                    }
                    path.push(segment);
                    if chars.peek() != Some(&'.') {
                        break;
                    }
                    chars.next();
                }
                tokens.push(if path.is_empty() { Token::Dot } else { Token::Field(path) });
            }
            '"' => {
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some('n') => s.push('\n'),
                            Some('t') => s.push('\t'),
                            Some('\\') => s.push('\\'),
                            Some('"') => s.push('"'),
                            other => {
                                return Err(TemplateError::Parse(format!("invalid escape sequence \\{other:?}")));
                            }
                        },
                        Some(c) => s.push(c),
                        None => return Err(TemplateError::Parse("unterminated quoted string".into())),
                    }
                }
                tokens.push(Token::Str(s));
            }
            '`' => {
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('`') => break,
                        Some(c) => s.push(c),
                        None => return Err(TemplateError::Parse("unterminated raw quoted string".into())),
                    }
                }
                tokens.push(Token::Str(s));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut ident = String::from(c);
                while let Some(&next) = chars.peek() {
                    if !is_ident_char(next) {
                        break;
                    }
                    ident.push(next);
                    chars.next();
                }
                if UNSUPPORTED_KEYWORDS.contains(&ident.as_str()) {
                    return Err(TemplateError::Parse(format!("unsupported keyword {ident:?}")));
                }
                tokens.push(Token::Ident(ident));
            }
            c => return Err(TemplateError::Parse(format!("unexpected {c:?} in action {action:?}"))),
        }
    }

    Ok(tokens)
}

fn parse_pipeline(action: &str) -> Result<Vec<Command>> {
    let tokens = tokenize(action)?;
    if tokens.is_empty() {
        return Err(TemplateError::Parse("missing value for command".into()));
    }

    let mut commands = Vec::new();
    for (stage, part) in tokens.split(|token| *token == Token::Pipe).enumerate() {
        let Some((first, rest)) = part.split_first() else {
            return Err(TemplateError::Parse(format!("missing command in pipeline {action:?}")));
        };

        let command = match first {
            Token::Ident(name) => {
                let function = Function::lookup(name)
                    .ok_or_else(|| TemplateError::Parse(format!("function {name:?} not defined")))?;
                Command {
                    function: Some(function),
                    args: rest.iter().map(operand).collect::<Result<_>>()?,
                }
            }
            token => {
                if !rest.is_empty() || stage > 0 {
                    return Err(TemplateError::Parse(format!(
                        "can't give argument to non-function in {action:?}"
                    )));
                }
                Command {
                    function: None,
                    args: vec![operand(token)?],
                }
            }
        };
        commands.push(command);
    }

    Ok(commands)
}

fn operand(token: &Token) -> Result<Operand> {
    match token {
        Token::Dot => Ok(Operand::Dot),
        Token::Field(path) => Ok(Operand::Field(path.clone())),
        Token::Str(s) => Ok(Operand::Str(s.clone())),
        Token::Ident(name) => Err(TemplateError::Parse(format!(
            "function {name:?} can only be called at the start of a command"
        ))),
        Token::Pipe => Err(TemplateError::Parse("unexpected '|'".into())),
    }
}

// -=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-
// execution

fn eval_pipeline(pipeline: &[Command], data: &Value) -> Result<Value> {
    let mut piped = None;
    for command in pipeline {
        piped = Some(eval_command(command, data, piped.take())?);
    }
    Ok(piped.unwrap_or(Value::Null))
}

fn eval_command(command: &Command, data: &Value, piped: Option<Value>) -> Result<Value> {
    match command.function {
        None => match command.args.as_slice() {
            [arg] => eval_operand(arg, data),
            _ => Err(TemplateError::Exec("can't give argument to non-function".into())),
        },
        Some(function) => {
            let mut args = command
                .args
                .iter()
                .map(|arg| eval_operand(arg, data))
                .collect::<Result<Vec<_>>>()?;
            args.extend(piped);
            function.call(args)
        }
    }
}

fn eval_operand(operand: &Operand, data: &Value) -> Result<Value> {
    match operand {
        Operand::Dot => Ok(data.clone()),
        Operand::Str(s) => Ok(Value::String(s.clone())),
        Operand::Field(path) => path
            .iter()
            .try_fold(data.clone(), |current, name| field(&current, name)),
    }
}

fn field(value: &Value, name: &str) -> Result<Value> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::Object(map) => {
            if name == "ObjectMeta" {
                if let Some(meta) = map.get("metadata") {
                    return Ok(meta.clone());
                }
            }
            let lookup = |map: &serde_json::Map<String, Value>| {
                map.get(name)
                    .or_else(|| {
                        map.iter()
                            .find(|(key, _)| key.eq_ignore_ascii_case(name))
                            .map(|(_, value)| value)
                    })
                    .cloned()
            };
            let promoted = || match map.get("metadata") {
                Some(Value::Object(meta)) => lookup(meta),
                _ => None,
            };
            Ok(lookup(map).or_else(promoted).unwrap_or(Value::Null))
        }
        other => Err(TemplateError::Exec(format!(
            "can't evaluate field {name} in type {}",
            kind(other)
        ))),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "nil",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "slice",
        Value::Object(_) => "map",
    }
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => {}
        Value::String(s) => out.push_str(s),
        other => out.push_str(&other.to_string()),
    }
}
