//! Commands and Command Classes
//!
//! A [`Command`] is an opaque shell string plus the [`CommandClass`] used as the
//! strategy cache key. Callers should supply the class explicitly; when they
//! don't, it is derived by normalizing the text so that invocations differing
//! only in literals (database names, quoted strings, numbers) share a class,
//! while different statements passed to the same client stay apart.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length of a derived command class
pub const MAX_CLASS_LEN: usize = 64;

/// Keywords whose following word names an object rather than an operation
const OBJECT_KEYWORDS: &[&str] = &[
    "database", "role", "user", "table", "schema", "owner", "to", "from", "on", "exists",
    "-d", "-u", "--dbname", "--username", "-o", "--owner",
];

/// Client programs whose positional arguments are database, role or file names
const OBJECT_TOOLS: &[&str] = &[
    "psql", "createdb", "dropdb", "createuser", "dropuser", "pg_dump", "pg_restore",
    "vacuumdb", "reindexdb", "clusterdb",
];

/// Operators after which the next word is a program again
const CONTROL_OPERATORS: &[&str] = &["|", "||", "&&", ";", "&"];

/// Operators whose next word is a file name
const REDIRECTS: &[&str] = &[">", ">>", "<", "2>", "2>>", "&>"];

/// Cache key grouping structurally similar commands
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommandClass(String);

impl CommandClass {
    /// Use a caller-supplied identifier as-is
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive a class from command text
    ///
    /// Literals become `?`: numbers, the word following an object keyword
    /// (e.g. `DATABASE shop`), positional arguments of the client tools
    /// (`createdb shop`), redirect targets, and single-word quoted values.
    /// A quoted run containing whitespace is an embedded statement and is
    /// normalized word by word, so `psql -c "DROP DATABASE shop"` and
    /// `psql -c "SELECT 1"` stay apart. The result is lower-cased,
    /// whitespace-collapsed and truncated to [`MAX_CLASS_LEN`].
    pub fn derive(text: &str) -> Self {
        let mut tokens: Vec<String> = Vec::new();
        let mut masker = ObjectMasker::default();
        let mut at_program = true;
        let mut tool_args = false;
        let mut redirect_target = false;

        for raw in tokenize(text) {
            match raw {
                Token::Quoted(inner) if inner.split_whitespace().nth(1).is_some() => {
                    let mut statement = ObjectMasker::default();
                    for token in tokenize(inner) {
                        tokens.push(match token {
                            Token::Quoted(_) => statement.literal(),
                            Token::Word(word) => statement.word(&word.to_lowercase()),
                        });
                    }
                    at_program = false;
                    redirect_target = false;
                }
                Token::Quoted(_) => {
                    tokens.push(masker.literal());
                    at_program = false;
                    redirect_target = false;
                }
                Token::Word(word) => {
                    let lower = word.to_lowercase();

                    if CONTROL_OPERATORS.contains(&lower.as_str()) {
                        tokens.push(lower);
                        masker = ObjectMasker::default();
                        at_program = true;
                        tool_args = false;
                        continue;
                    }
                    if REDIRECTS.contains(&lower.as_str()) {
                        tokens.push(lower);
                        redirect_target = true;
                        continue;
                    }
                    if redirect_target {
                        redirect_target = false;
                        tokens.push(masker.literal());
                        continue;
                    }
                    if at_program {
                        at_program = false;
                        let base = lower.rsplit('/').next().unwrap_or(&lower);
                        tool_args = OBJECT_TOOLS.contains(&base);
                        tokens.push(masker.word(&lower));
                        continue;
                    }
                    if tool_args && !lower.starts_with('-') {
                        tokens.push(masker.literal());
                        continue;
                    }
                    tokens.push(masker.word(&lower));
                }
            }
        }

        let mut class = tokens.join(" ");
        if class.len() > MAX_CLASS_LEN {
            let mut cut = MAX_CLASS_LEN;
            while !class.is_char_boundary(cut) {
                cut -= 1;
            }
            class.truncate(cut);
        }
        Self(class)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommandClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Masks numbers and the object named after a keyword
#[derive(Default)]
struct ObjectMasker {
    mask_next: bool,
}

impl ObjectMasker {
    fn word(&mut self, lower: &str) -> String {
        let trimmed = lower.trim_end_matches([';', ',']);
        let is_keyword = OBJECT_KEYWORDS.contains(&trimmed);
        let is_noise = is_sql_noise(trimmed);

        if is_number(trimmed) || (self.mask_next && !is_keyword && !is_noise) {
            return self.literal();
        }
        if !is_noise {
            self.mask_next = is_keyword;
        }
        trimmed.to_string()
    }

    fn literal(&mut self) -> String {
        self.mask_next = false;
        "?".to_string()
    }
}

fn is_number(word: &str) -> bool {
    word.chars().any(|c| c.is_ascii_digit()) && word.chars().all(|c| c.is_ascii_digit() || c == '.')
}

// "IF NOT EXISTS" and friends sit between a keyword and the object name
fn is_sql_noise(word: &str) -> bool {
    matches!(word, "if" | "not")
}

enum Token<'a> {
    Word(&'a str),
    Quoted(&'a str),
}

/// Split on whitespace, treating single- or double-quoted runs as one token
fn tokenize(text: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        if c.is_ascii_whitespace() {
            i += 1;
        } else if c == b'\'' || c == b'"' {
            let quote = c;
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i] != quote {
                i += 1;
            }
            tokens.push(Token::Quoted(&text[start..i]));
            // skip closing quote; an unterminated quote swallows the rest
            i = (i + 1).min(bytes.len());
        } else {
            let start = i;
            while i < bytes.len()
                && !bytes[i].is_ascii_whitespace()
                && bytes[i] != b'\''
                && bytes[i] != b'"'
            {
                i += 1;
            }
            tokens.push(Token::Word(&text[start..i]));
        }
    }

    tokens
}

/// A command to run, with its cache class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    text: String,
    class: CommandClass,
}

impl Command {
    /// Create a command whose class is derived from its text
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let class = CommandClass::derive(&text);
        Self { text, class }
    }

    /// Create a command with an explicit class
    pub fn with_class(text: impl Into<String>, class: CommandClass) -> Self {
        Self {
            text: text.into(),
            class,
        }
    }

    /// The shell text to execute
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn class(&self) -> &CommandClass {
        &self.class
    }

    /// Same class, new text. Used by strategy transforms.
    pub fn rewrite(&self, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            class: self.class.clone(),
        }
    }

    /// First whitespace-separated word, if any
    pub fn program(&self) -> Option<&str> {
        self.text.split_whitespace().next()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
