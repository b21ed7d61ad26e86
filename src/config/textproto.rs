//! A small recursive-descent parser for shac's project config format.
//!
//! Spec §6 fixes the config file as "a text-proto at the workspace root".
//! There is exactly one message shape (spec §3's `Config`), so this parser
//! targets that shape directly rather than pulling in a general protobuf
//! text-format/reflection crate — the grammar handled is the subset of
//! text-proto needed for scalar fields, repeated scalar fields, and
//! repeated nested messages (`vars { key: "..." value { ... } }`-style
//! blocks), which is all `Config` uses.
//!
//! Grammar (informal):
//!
//! ```text
//! document   := field*
//! field      := ident (':' scalar | message)
//! message    := '{' field* '}'
//! scalar     := string | bool | number
//! ```
//!
//! Unknown top-level fields and duplicate keys within a repeated-map field
//! (`vars`, `aliases`) are rejected, per spec §4.J.

use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Default)]
pub struct VarEntry {
    pub description: String,
    pub default: Option<String>,
}

#[derive(Debug, Default)]
pub struct PassthroughEnvEntry {
    pub name: String,
    pub is_path: bool,
    pub writable: bool,
}

#[derive(Debug, Default)]
pub struct Document {
    pub min_shac_version: Option<(u32, u32, u32)>,
    pub allow_network: bool,
    pub writable_root: bool,
    pub ignore: Vec<String>,
    pub vars: BTreeMap<String, VarEntry>,
    pub passthrough_env: Vec<PassthroughEnvEntry>,
    pub aliases: BTreeMap<String, String>,
}

const TOP_LEVEL_FIELDS: &[&str] = &[
    "min_shac_version",
    "allow_network",
    "writable_root",
    "ignore",
    "vars",
    "passthrough_env",
    "aliases",
];

pub fn parse(text: &str) -> Result<Document, String> {
    let tokens = tokenize(text)?;
    let mut parser = Parser { tokens: &tokens, pos: 0 };
    let mut doc = Document::default();
    let mut seen_scalar_keys: HashSet<String> = HashSet::new();

    while !parser.at_end() {
        let key = parser.expect_ident()?;
        if !TOP_LEVEL_FIELDS.contains(&key.as_str()) {
            return Err(format!("unknown field {key:?}"));
        }
        match key.as_str() {
            "min_shac_version" => {
                if !seen_scalar_keys.insert(key.clone()) {
                    return Err(format!("duplicate key {key:?}"));
                }
                parser.expect_colon()?;
                let raw = parser.expect_string()?;
                doc.min_shac_version = Some(parse_version(&raw)?);
            }
            "allow_network" => {
                if !seen_scalar_keys.insert(key.clone()) {
                    return Err(format!("duplicate key {key:?}"));
                }
                parser.expect_colon()?;
                doc.allow_network = parser.expect_bool()?;
            }
            "writable_root" => {
                if !seen_scalar_keys.insert(key.clone()) {
                    return Err(format!("duplicate key {key:?}"));
                }
                parser.expect_colon()?;
                doc.writable_root = parser.expect_bool()?;
            }
            "ignore" => {
                parser.expect_colon()?;
                doc.ignore.push(parser.expect_string()?);
            }
            "vars" => {
                let msg = parser.expect_message()?;
                let (name, entry) = parse_var_message(&msg)?;
                if doc.vars.insert(name.clone(), entry).is_some() {
                    return Err(format!("duplicate key {name:?} in vars"));
                }
            }
            "passthrough_env" => {
                let msg = parser.expect_message()?;
                doc.passthrough_env.push(parse_passthrough_message(&msg)?);
            }
            "aliases" => {
                let msg = parser.expect_message()?;
                let (name, uri) = parse_alias_message(&msg)?;
                if doc.aliases.insert(name.clone(), uri).is_some() {
                    return Err(format!("duplicate key {name:?} in aliases"));
                }
            }
            _ => unreachable!(),
        }
    }

    Ok(doc)
}

fn parse_version(raw: &str) -> Result<(u32, u32, u32), String> {
    let mut parts = raw.split('.');
    let major = parts.next().ok_or("empty min_shac_version")?;
    let minor = parts.next().unwrap_or("0");
    let patch = parts.next().unwrap_or("0");
    Ok((
        major.parse().map_err(|_| "bad min_shac_version major".to_string())?,
        minor.parse().map_err(|_| "bad min_shac_version minor".to_string())?,
        patch.parse().map_err(|_| "bad min_shac_version patch".to_string())?,
    ))
}

fn parse_var_message(fields: &[(String, FieldValue)]) -> Result<(String, VarEntry), String> {
    let mut key = None;
    let mut entry = VarEntry::default();
    for (name, value) in fields {
        match (name.as_str(), value) {
            ("key", FieldValue::Str(s)) => key = Some(s.clone()),
            ("description", FieldValue::Str(s)) => entry.description = s.clone(),
            ("default", FieldValue::Str(s)) => entry.default = Some(s.clone()),
            _ => return Err(format!("unknown field {name:?} in vars entry")),
        }
    }
    Ok((key.ok_or("vars entry missing key")?, entry))
}

fn parse_passthrough_message(fields: &[(String, FieldValue)]) -> Result<PassthroughEnvEntry, String> {
    let mut entry = PassthroughEnvEntry::default();
    for (name, value) in fields {
        match (name.as_str(), value) {
            ("name", FieldValue::Str(s)) => entry.name = s.clone(),
            ("is_path", FieldValue::Bool(b)) => entry.is_path = *b,
            ("writable", FieldValue::Bool(b)) => entry.writable = *b,
            _ => return Err(format!("unknown field {name:?} in passthrough_env entry")),
        }
    }
    Ok(entry)
}

fn parse_alias_message(fields: &[(String, FieldValue)]) -> Result<(String, String), String> {
    let mut key = None;
    let mut uri = None;
    for (name, value) in fields {
        match (name.as_str(), value) {
            ("key", FieldValue::Str(s)) => key = Some(s.clone()),
            ("value", FieldValue::Str(s)) => uri = Some(s.clone()),
            _ => return Err(format!("unknown field {name:?} in aliases entry")),
        }
    }
    Ok((key.ok_or("aliases entry missing key")?, uri.ok_or("aliases entry missing value")?))
}

#[derive(Debug, Clone)]
enum FieldValue {
    Str(String),
    Bool(bool),
}

#[derive(Debug, Clone)]
enum Token {
    Ident(String),
    Str(String),
    Bool(bool),
    Colon,
    BraceOpen,
    BraceClose,
}

fn tokenize(text: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = text.char_indices().peekable();
    while let Some(&(i, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c == '#' {
            while let Some(&(_, c)) = chars.peek() {
                if c == '\n' {
                    break;
                }
                chars.next();
            }
            continue;
        }
        match c {
            ':' => {
                chars.next();
                tokens.push(Token::Colon);
            }
            '{' => {
                chars.next();
                tokens.push(Token::BraceOpen);
            }
            '}' => {
                chars.next();
                tokens.push(Token::BraceClose);
            }
            '"' => {
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some((_, '"')) => break,
                        Some((_, '\\')) => {
                            if let Some((_, escaped)) = chars.next() {
                                s.push(match escaped {
                                    'n' => '\n',
                                    't' => '\t',
                                    other => other,
                                });
                            }
                        }
                        Some((_, c)) => s.push(c),
                        None => return Err("unterminated string literal".to_string()),
                    }
                }
                tokens.push(Token::Str(s));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                let mut end = i + c.len_utf8();
                chars.next();
                while let Some(&(j, c)) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' {
                        end = j + c.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let word = &text[start..end];
                match word {
                    "true" => tokens.push(Token::Bool(true)),
                    "false" => tokens.push(Token::Bool(false)),
                    _ => tokens.push(Token::Ident(word.to_string())),
                }
            }
            other => return Err(format!("unexpected character {other:?}")),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&Token> {
        let tok = self.tokens.get(self.pos);
        self.pos += 1;
        tok
    }

    fn expect_ident(&mut self) -> Result<String, String> {
        match self.advance() {
            Some(Token::Ident(s)) => Ok(s.clone()),
            other => Err(format!("expected field name, got {other:?}")),
        }
    }

    fn expect_colon(&mut self) -> Result<(), String> {
        match self.advance() {
            Some(Token::Colon) => Ok(()),
            other => Err(format!("expected ':', got {other:?}")),
        }
    }

    fn expect_string(&mut self) -> Result<String, String> {
        match self.advance() {
            Some(Token::Str(s)) => Ok(s.clone()),
            other => Err(format!("expected string literal, got {other:?}")),
        }
    }

    fn expect_bool(&mut self) -> Result<bool, String> {
        match self.advance() {
            Some(Token::Bool(b)) => Ok(*b),
            other => Err(format!("expected bool literal, got {other:?}")),
        }
    }

    /// Parse `{ field* }`, optionally preceded by a ':' (both `vars { .. }`
    /// and `vars: { .. }` are accepted).
    fn expect_message(&mut self) -> Result<Vec<(String, FieldValue)>, String> {
        if matches!(self.peek(), Some(Token::Colon)) {
            self.advance();
        }
        match self.advance() {
            Some(Token::BraceOpen) => {}
            other => return Err(format!("expected '{{', got {other:?}")),
        }
        let mut fields = Vec::new();
        loop {
            match self.peek() {
                Some(Token::BraceClose) => {
                    self.advance();
                    break;
                }
                Some(Token::Ident(_)) => {
                    let name = self.expect_ident()?;
                    self.expect_colon()?;
                    let value = match self.advance() {
                        Some(Token::Str(s)) => FieldValue::Str(s.clone()),
                        Some(Token::Bool(b)) => FieldValue::Bool(*b),
                        other => return Err(format!("expected scalar value, got {other:?}")),
                    };
                    fields.push((name, value));
                }
                other => return Err(format!("unexpected token in message body: {other:?}")),
            }
        }
        Ok(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scalars_and_repeated() {
        let text = r#"
            min_shac_version: "1.2.3"
            allow_network: true
            writable_root: false
            ignore: "target/**"
            ignore: "*.lock"
        "#;
        let doc = parse(text).unwrap();
        assert_eq!(doc.min_shac_version, Some((1, 2, 3)));
        assert!(doc.allow_network);
        assert!(!doc.writable_root);
        assert_eq!(doc.ignore, vec!["target/**", "*.lock"]);
    }

    #[test]
    fn parses_vars_and_aliases_messages() {
        let text = r#"
            vars { key: "strict" description: "enable strict mode" default: "false" }
            aliases { key: "rules" value: "https://example.com/rules" }
            passthrough_env { name: "PATH" is_path: true writable: false }
        "#;
        let doc = parse(text).unwrap();
        assert_eq!(doc.vars["strict"].description, "enable strict mode");
        assert_eq!(doc.vars["strict"].default.as_deref(), Some("false"));
        assert_eq!(doc.aliases["rules"], "https://example.com/rules");
        assert_eq!(doc.passthrough_env[0].name, "PATH");
        assert!(doc.passthrough_env[0].is_path);
    }

    #[test]
    fn rejects_unknown_top_level_field() {
        assert!(parse("bogus: true\n").is_err());
    }

    #[test]
    fn rejects_duplicate_scalar_key() {
        let text = "allow_network: true\nallow_network: false\n";
        assert!(parse(text).is_err());
    }

    #[test]
    fn rejects_duplicate_vars_key() {
        let text = r#"
            vars { key: "x" description: "a" }
            vars { key: "x" description: "b" }
        "#;
        assert!(parse(text).is_err());
    }
}
