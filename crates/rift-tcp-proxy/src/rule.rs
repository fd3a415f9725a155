//! Fault injection rules.
//!
//! A [`Rule`] is the user-facing policy as it appears in plan files, the HTTP
//! API and the control protocol. When a rule enters a [`Plan`](crate::plan::Plan)
//! it is armed: the command marker is compiled once and a hit counter is
//! attached, giving an [`ArmedRule`].

use aho_corasick::AhoCorasick;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Reply substituted for a chunk when `return_empty` fires (RESP nil bulk string).
pub const NIL_REPLY: &[u8] = b"$-1\r\n";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Rule {
    pub name: String,
    /// Delay in milliseconds applied before forwarding a matched chunk.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub delay: u64,
    #[serde(default, skip_serializing_if = "is_false")]
    pub drop: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub return_empty: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_err: Option<String>,
    /// Probability (0-100) of applying the rule once matched. 0 means always.
    #[serde(default, skip_serializing_if = "is_zero_i32")]
    pub percentage: i32,
    /// Client address prefix filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_addr: Option<String>,
    /// Command filter, matched against the marshaled command marker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

fn is_zero_i32(v: &i32) -> bool {
    *v == 0
}

fn is_false(v: &bool) -> bool {
    !*v
}

impl Rule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Client address filter, treating an empty string as no filter.
    pub fn client_addr_filter(&self) -> Option<&str> {
        self.client_addr.as_deref().filter(|s| !s.is_empty())
    }

    /// Command filter, treating an empty string as no filter.
    pub fn command_filter(&self) -> Option<&str> {
        self.command.as_deref().filter(|s| !s.is_empty())
    }

    /// Error reply substituted for a chunk when `return_err` fires.
    pub fn error_reply(&self) -> Option<Vec<u8>> {
        self.return_err
            .as_deref()
            .map(|msg| format!("-ERR {msg}\r\n").into_bytes())
    }
}

/// Wire marker searched for in client chunks for a command filter.
///
/// Arguments of a RESP array are framed by CRLF on both sides, so wrapping
/// the upper-cased command keeps `GET` from matching inside `GETSET`.
pub fn marshal_command(command: &str) -> Vec<u8> {
    format!("\r\n{}\r\n", command.to_uppercase()).into_bytes()
}

/// A rule owned by a plan: the user rule, its compiled command marker and
/// a hit counter.
#[derive(Debug)]
pub struct ArmedRule {
    rule: Rule,
    marshaled_command: Option<Vec<u8>>,
    matcher: Option<AhoCorasick>,
    hits: AtomicU64,
}

impl ArmedRule {
    /// Arm a rule, compiling its command marker.
    pub(crate) fn arm(rule: Rule) -> Result<Self, aho_corasick::BuildError> {
        let marshaled_command = rule.command_filter().map(marshal_command);
        let matcher = match &marshaled_command {
            Some(pattern) => Some(AhoCorasick::new([pattern])?),
            None => None,
        };
        Ok(Self {
            rule,
            marshaled_command,
            matcher,
            hits: AtomicU64::new(0),
        })
    }

    pub fn rule(&self) -> &Rule {
        &self.rule
    }

    pub fn name(&self) -> &str {
        &self.rule.name
    }

    pub fn marshaled_command(&self) -> Option<&[u8]> {
        self.marshaled_command.as_deref()
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub(crate) fn record_hit(&self) -> u64 {
        self.hits.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Candidate test of the selection scan.
    ///
    /// The client address filter excludes clients whose address starts with
    /// the configured prefix; every other client is a candidate.
    pub(crate) fn is_candidate(&self, client_addr: &str, chunk: &[u8]) -> bool {
        if let Some(prefix) = self.rule.client_addr_filter() {
            if client_addr.starts_with(prefix) {
                return false;
            }
        }
        match &self.matcher {
            Some(matcher) => matcher.is_match(chunk),
            None => true,
        }
    }

    pub fn snapshot(&self) -> RuleSnapshot {
        RuleSnapshot {
            rule: self.rule.clone(),
            hits: self.hits(),
        }
    }
}

/// Point-in-time copy of a rule and its hit count.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RuleSnapshot {
    #[serde(flatten)]
    pub rule: Rule,
    pub hits: u64,
}

/// Quote a rendered value when it would not survive a whitespace split.
fn render_value(value: &str) -> Cow<'_, str> {
    let plain = !value.is_empty()
        && !value
            .chars()
            .any(|c| c.is_whitespace() || c == '"' || c == '\\');
    if plain {
        return Cow::Borrowed(value);
    }
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        match c {
            '"' | '\\' => {
                quoted.push('\\');
                quoted.push(c);
            }
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\t' => quoted.push_str("\\t"),
            _ => quoted.push(c),
        }
    }
    quoted.push('"');
    Cow::Owned(quoted)
}

/// Single-line rendering used by the control protocol:
/// `name hits=N` followed by every non-default field as `key=value`.
/// Values containing whitespace, quotes or backslashes are double-quoted
/// with those characters escaped.
impl fmt::Display for RuleSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = &self.rule;
        write!(f, "{} hits={}", r.name, self.hits)?;
        if r.delay > 0 {
            write!(f, " delay={}", r.delay)?;
        }
        if r.drop {
            write!(f, " drop=true")?;
        }
        if r.return_empty {
            write!(f, " return_empty=true")?;
        }
        if let Some(msg) = r.return_err.as_deref().filter(|s| !s.is_empty()) {
            write!(f, " return_err={}", render_value(msg))?;
        }
        if let Some(addr) = r.client_addr_filter() {
            write!(f, " client_addr={}", render_value(addr))?;
        }
        if r.percentage > 0 {
            write!(f, " percentage={}", r.percentage)?;
        }
        if let Some(cmd) = r.command_filter() {
            write!(f, " command={}", render_value(cmd))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resp(args: &[&str]) -> Vec<u8> {
        let mut out = format!("*{}\r\n", args.len());
        for arg in args {
            out.push_str(&format!("${}\r\n{}\r\n", arg.len(), arg));
        }
        out.into_bytes()
    }

    #[test]
    fn test_marshal_command_uppercases_and_frames() {
        assert_eq!(marshal_command("get"), b"\r\nGET\r\n".to_vec());
        assert_eq!(marshal_command("HSET"), b"\r\nHSET\r\n".to_vec());
    }

    #[test]
    fn test_armed_rule_precomputes_marker() {
        let armed = ArmedRule::arm(Rule {
            command: Some("get".to_string()),
            ..Rule::new("r")
        })
        .unwrap();
        assert_eq!(armed.marshaled_command(), Some(&b"\r\nGET\r\n"[..]));

        let no_cmd = ArmedRule::arm(Rule::new("r")).unwrap();
        assert!(no_cmd.marshaled_command().is_none());
    }

    #[test]
    fn test_empty_command_is_no_filter() {
        let armed = ArmedRule::arm(Rule {
            command: Some(String::new()),
            ..Rule::new("r")
        })
        .unwrap();
        assert!(armed.marshaled_command().is_none());
        assert!(armed.is_candidate("127.0.0.1:1", b"anything"));
    }

    #[test]
    fn test_command_filter_matches_only_whole_argument() {
        let armed = ArmedRule::arm(Rule {
            command: Some("GET".to_string()),
            ..Rule::new("r")
        })
        .unwrap();
        assert!(armed.is_candidate("c", &resp(&["GET", "foo"])));
        assert!(!armed.is_candidate("c", &resp(&["GETSET", "foo", "bar"])));
        assert!(!armed.is_candidate("c", &resp(&["KEYS", "*"])));
    }

    #[test]
    fn test_client_addr_prefix_excludes_matching_clients() {
        let armed = ArmedRule::arm(Rule {
            client_addr: Some("10.0.0.1".to_string()),
            ..Rule::new("r")
        })
        .unwrap();
        assert!(!armed.is_candidate("10.0.0.1:5000", b"x"));
        assert!(armed.is_candidate("10.0.0.2:5000", b"x"));
    }

    #[test]
    fn test_error_reply_format() {
        let rule = Rule {
            return_err: Some("boom".to_string()),
            ..Rule::new("r")
        };
        assert_eq!(rule.error_reply().unwrap(), b"-ERR boom\r\n".to_vec());
        assert!(Rule::new("r").error_reply().is_none());
    }

    #[test]
    fn test_display_omits_defaults() {
        let snapshot = RuleSnapshot {
            rule: Rule::new("quiet"),
            hits: 0,
        };
        assert_eq!(snapshot.to_string(), "quiet hits=0");
    }

    #[test]
    fn test_display_renders_set_fields_in_order() {
        let snapshot = RuleSnapshot {
            rule: Rule {
                name: "loud".to_string(),
                delay: 50,
                drop: true,
                return_empty: true,
                return_err: Some("nope".to_string()),
                percentage: 20,
                client_addr: Some("10.0.0.".to_string()),
                command: Some("GET".to_string()),
            },
            hits: 7,
        };
        assert_eq!(
            snapshot.to_string(),
            "loud hits=7 delay=50 drop=true return_empty=true return_err=nope \
             client_addr=10.0.0. percentage=20 command=GET"
        );
    }

    #[test]
    fn test_display_quotes_values_with_spaces() {
        let snapshot = RuleSnapshot {
            rule: Rule {
                return_err: Some("READONLY replica".to_string()),
                command: Some("CLIENT LIST".to_string()),
                ..Rule::new("ro")
            },
            hits: 0,
        };
        assert_eq!(
            snapshot.to_string(),
            r#"ro hits=0 return_err="READONLY replica" command="CLIENT LIST""#
        );
    }

    #[test]
    fn test_render_value_escapes() {
        assert_eq!(render_value("plain"), "plain");
        assert_eq!(render_value(r#"say "hi""#), r#""say \"hi\"""#);
        assert_eq!(render_value(r"C:\tmp"), r#""C:\\tmp""#);
        assert_eq!(render_value("a\tb"), r#""a\tb""#);
    }

    #[test]
    fn test_rule_json_defaults() {
        let rule: Rule = serde_json::from_str(r#"{"name": "d"}"#).unwrap();
        assert_eq!(rule, Rule::new("d"));

        let rule: Rule = serde_json::from_str(
            r#"{"name": "e", "delay": 10, "return_err": "bad", "client_addr": "1.2.3.4"}"#,
        )
        .unwrap();
        assert_eq!(rule.delay, 10);
        assert_eq!(rule.return_err.as_deref(), Some("bad"));
        assert_eq!(rule.client_addr.as_deref(), Some("1.2.3.4"));
    }

    #[test]
    fn test_snapshot_serializes_hits_beside_rule_fields() {
        let snapshot = RuleSnapshot {
            rule: Rule {
                delay: 5,
                ..Rule::new("s")
            },
            hits: 3,
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json, serde_json::json!({"name": "s", "delay": 5, "hits": 3}));
    }

    #[test]
    fn test_record_hit_counts() {
        let armed = ArmedRule::arm(Rule::new("h")).unwrap();
        assert_eq!(armed.record_hit(), 1);
        assert_eq!(armed.record_hit(), 2);
        assert_eq!(armed.hits(), 2);
        assert_eq!(armed.snapshot().hits, 2);
    }
}
