//! Access-Control File Parsing
//!
//! Reads `pg_hba.conf`-style rule files. Only rules that name the service
//! account explicitly count; `all`, `+group` and `@file` user columns are
//! global rules and are ignored.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::ops::Range;

/// Authentication method column of a rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMethod {
    Peer,
    Ident,
    Trust,
    Md5,
    ScramSha256,
    Password,
    Reject,
    Other(String),
}

impl AuthMethod {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "peer" => Self::Peer,
            "ident" => Self::Ident,
            "trust" => Self::Trust,
            "md5" => Self::Md5,
            "scram-sha-256" => Self::ScramSha256,
            "password" => Self::Password,
            "reject" => Self::Reject,
            other => Self::Other(other.to_string()),
        }
    }

    /// Which elevation mode this method grants, if any
    pub fn mode(&self) -> Option<AuthMode> {
        match self {
            Self::Peer | Self::Ident => Some(AuthMode::Implicit),
            Self::Trust => Some(AuthMode::Trusted),
            Self::Md5 | Self::ScramSha256 | Self::Password => Some(AuthMode::Password),
            Self::Reject | Self::Other(_) => None,
        }
    }
}

/// Elevation modes a service can accept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// OS identity is enough (peer/ident)
    Implicit,
    /// No credential at all (trust)
    Trusted,
    /// Credential required (md5/scram/password)
    Password,
}

impl AuthMode {
    /// Method keyword written when switching a rule to this mode
    pub fn method_keyword(&self) -> &'static str {
        match self {
            Self::Implicit => "peer",
            Self::Trusted => "trust",
            Self::Password => "scram-sha-256",
        }
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Implicit => "implicit",
            Self::Trusted => "trusted",
            Self::Password => "password",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for AuthMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "implicit" | "peer" => Ok(Self::Implicit),
            "trusted" | "trust" => Ok(Self::Trusted),
            "password" => Ok(Self::Password),
            _ => Err(format!("Invalid auth mode: {}", s)),
        }
    }
}

/// One active rule line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HbaRule {
    /// Zero-based line index in the file
    pub line: usize,
    pub conn_type: String,
    pub databases: Vec<String>,
    pub users: Vec<String>,
    pub address: Option<String>,
    pub method: AuthMethod,
    /// `name=value` options after the method (`map=`, `clientcert=`, ...)
    pub options: Vec<String>,
    /// Byte range of the method token within its line
    method_span: Range<usize>,
    /// End of the last option, or of the method when there are none
    options_end: usize,
}

impl HbaRule {
    /// Whether the user column names `account` itself
    pub fn names_account(&self, account: &str) -> bool {
        self.users.iter().any(|u| u == account)
    }

    pub fn is_local(&self) -> bool {
        self.conn_type == "local"
    }
}

/// A parsed access-control file, keeping the raw lines for minimal edits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HbaFile {
    lines: Vec<String>,
    rules: Vec<HbaRule>,
}

impl HbaFile {
    pub fn parse(content: &str) -> Self {
        let lines: Vec<String> = content.lines().map(|l| l.to_string()).collect();
        let rules = lines
            .iter()
            .enumerate()
            .filter_map(|(i, line)| parse_rule(i, line))
            .collect();
        Self { lines, rules }
    }

    pub fn rules(&self) -> &[HbaRule] {
        &self.rules
    }

    /// Rules scoped to `account`, in file order
    pub fn rules_for<'a>(&'a self, account: &'a str) -> impl Iterator<Item = &'a HbaRule> + 'a {
        self.rules.iter().filter(move |r| r.names_account(account))
    }

    /// Whether any rule scoped to `account` grants `mode`
    pub fn grants(&self, account: &str, mode: AuthMode) -> bool {
        self.rules_for(account)
            .any(|r| r.method.mode() == Some(mode))
    }

    /// Content with the first local rule for `account` switched to `mode`,
    /// or a new local rule inserted ahead of every other rule
    pub fn with_local_mode(&self, account: &str, mode: AuthMode) -> (String, RuleChange) {
        let keyword = mode.method_keyword();
        let mut lines = self.lines.clone();

        let change = match self.rules_for(account).find(|r| r.is_local()) {
            Some(rule) => {
                let old = lines[rule.line].clone();
                // options belong to the old method; keep them only if it stays
                let same_method = old[rule.method_span.clone()].eq_ignore_ascii_case(keyword);
                let end = if same_method {
                    rule.method_span.end
                } else {
                    rule.options_end
                };
                let mut new = String::with_capacity(old.len());
                new.push_str(&old[..rule.method_span.start]);
                new.push_str(keyword);
                new.push_str(&old[end..]);
                lines[rule.line] = new.clone();
                RuleChange::Replace {
                    line: rule.line,
                    old,
                    new,
                }
            }
            None => {
                let new = format!("local   all             {:<16}                        {}", account, keyword);
                let at = self.rules.first().map(|r| r.line).unwrap_or(lines.len());
                lines.insert(at, new.clone());
                RuleChange::Insert { line: at, new }
            }
        };

        let mut content = lines.join("\n");
        content.push('\n');
        (content, change)
    }
}

/// The single-line edit made to an access-control file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleChange {
    Replace { line: usize, old: String, new: String },
    Insert { line: usize, new: String },
}

impl fmt::Display for RuleChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Replace { line, old, new } => {
                write!(f, "line {}:\n- {}\n+ {}", line + 1, old, new)
            }
            Self::Insert { line, new } => write!(f, "line {}:\n+ {}", line + 1, new),
        }
    }
}

/// Tokens of a line with their byte ranges, stopping at a comment
fn tokens(line: &str) -> Vec<(Range<usize>, &str)> {
    let mut out = Vec::new();
    let mut start: Option<usize> = None;
    let mut in_quotes = false;

    for (i, c) in line.char_indices() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                if start.is_none() {
                    start = Some(i);
                }
            }
            '#' if !in_quotes => {
                if let Some(s) = start.take() {
                    out.push((s..i, &line[s..i]));
                }
                return out;
            }
            c if c.is_whitespace() && !in_quotes => {
                if let Some(s) = start.take() {
                    out.push((s..i, &line[s..i]));
                }
            }
            _ => {
                if start.is_none() {
                    start = Some(i);
                }
            }
        }
    }
    if let Some(s) = start {
        out.push((s..line.len(), &line[s..]));
    }
    out
}

fn split_list(column: &str) -> Vec<String> {
    column
        .split(',')
        .map(|s| s.trim_matches('"').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_rule(index: usize, line: &str) -> Option<HbaRule> {
    let toks = tokens(line);
    let (_, conn_type) = toks.first()?;
    let conn_type = conn_type.to_lowercase();

    let (address, method_idx) = match conn_type.as_str() {
        "local" => (None, 3),
        "host" | "hostssl" | "hostnossl" | "hostgssenc" | "hostnogssenc" => {
            let (_, addr) = toks.get(3)?;
            // a bare IP address is followed by a separate netmask column
            let has_mask = !addr.contains('/') && addr.parse::<IpAddr>().is_ok();
            (Some(addr.to_string()), if has_mask { 5 } else { 4 })
        }
        // include directives and anything unrecognised
        _ => return None,
    };

    let (_, databases) = toks.get(1)?;
    let (_, users) = toks.get(2)?;
    let (span, method) = toks.get(method_idx)?;
    let options = &toks[method_idx + 1..];
    let options_end = options.last().map(|(r, _)| r.end).unwrap_or(span.end);

    Some(HbaRule {
        line: index,
        conn_type,
        databases: split_list(databases),
        users: split_list(users),
        address,
        method: AuthMethod::parse(method),
        options: options.iter().map(|(_, o)| o.to_string()).collect(),
        method_span: span.clone(),
        options_end,
    })
}
