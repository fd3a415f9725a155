//! Control command dispatch.

use super::resp::Reply;
use crate::plan::{Plan, PlanError};
use crate::rule::Rule;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("wrong number of arguments for '{0}' command")]
    WrongArity(String),
    #[error("rule argument '{0}' must be in key=value form")]
    MissingValue(String),
    #[error("parse {key} error: '{value}' is not a number")]
    NotANumber { key: String, value: String },
    #[error("{0} must not be empty")]
    EmptyValue(String),
    #[error("unknown rule argument '{0}'")]
    UnknownKey(String),
    #[error(transparent)]
    Plan(#[from] PlanError),
}

fn parse_bool(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1"
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ControlError> {
    value.parse().map_err(|_| ControlError::NotANumber {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn non_empty(key: &str, value: &str) -> Result<String, ControlError> {
    if value.is_empty() {
        return Err(ControlError::EmptyValue(key.to_string()));
    }
    Ok(value.to_string())
}

/// Apply one `key=value` token to `rule`.
///
/// Keys are case-insensitive. Range checks and duplicate names are left to
/// [`Plan::add_rule`].
pub fn parse_rule_arg(rule: &mut Rule, token: &str) -> Result<(), ControlError> {
    let (key, value) = token
        .split_once('=')
        .ok_or_else(|| ControlError::MissingValue(token.to_string()))?;

    match key.to_ascii_lowercase().as_str() {
        "delay" => rule.delay = parse_number("delay", value)?,
        "percentage" => rule.percentage = parse_number("percentage", value)?,
        "drop" => rule.drop = parse_bool(value),
        "return_empty" => rule.return_empty = parse_bool(value),
        "return_err" => rule.return_err = Some(non_empty("return_err", value)?),
        "client_addr" => rule.client_addr = Some(non_empty("client_addr", value)?),
        "command" => rule.command = Some(non_empty("command", value)?),
        _ => return Err(ControlError::UnknownKey(key.to_string())),
    }
    Ok(())
}

fn rule_add(plan: &Plan, name: &str, tokens: &[String]) -> Result<Reply, ControlError> {
    let mut rule = Rule::new(name);
    for token in tokens {
        parse_rule_arg(&mut rule, token)?;
    }
    plan.add_rule(rule)?;
    info!(rule = %name, "Rule created via control protocol");
    Ok(Reply::ok())
}

fn rule_del(plan: &Plan, name: &str) -> Result<Reply, ControlError> {
    plan.delete_rule(name)?;
    info!(rule = %name, "Rule deleted via control protocol");
    Ok(Reply::ok())
}

fn execute(plan: &Plan, args: &[String]) -> Result<Reply, ControlError> {
    let Some((cmd, rest)) = args.split_first() else {
        return Err(ControlError::UnknownCommand(String::new()));
    };
    let name = || {
        rest.first()
            .map(String::as_str)
            .ok_or_else(|| ControlError::WrongArity(cmd.to_ascii_lowercase()))
    };

    match cmd.to_ascii_lowercase().as_str() {
        "ruleadd" => rule_add(plan, name()?, &rest[1..]),
        "ruledel" => rule_del(plan, name()?),
        "ruleget" => Ok(Reply::Bulk(plan.get_rule(name()?)?.to_string())),
        "rulelist" => Ok(Reply::Array(
            plan.list_rules()
                .iter()
                .map(|r| Reply::Bulk(r.to_string()))
                .collect(),
        )),
        "rulecounters" => Ok(Reply::Array(
            plan.list_rules()
                .iter()
                .map(|r| Reply::Bulk(format!("{} hits={}", r.rule.name, r.hits)))
                .collect(),
        )),
        _ => Err(ControlError::UnknownCommand(cmd.clone())),
    }
}

/// Run one command against the plan and build its reply.
pub fn dispatch(plan: &Plan, args: &[String]) -> Reply {
    execute(plan, args).unwrap_or_else(Reply::err)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(plan: &Plan, line: &str) -> Reply {
        let args: Vec<String> = line.split_whitespace().map(str::to_string).collect();
        dispatch(plan, &args)
    }

    fn bulk(s: &str) -> Reply {
        Reply::Bulk(s.to_string())
    }

    #[test]
    fn test_parse_rule_arg_sets_fields() {
        let mut rule = Rule::new("r");
        for token in [
            "DELAY=150",
            "drop=1",
            "Return_Empty=TRUE",
            "return_err=oops",
            "client_addr=10.0.0.",
            "percentage=30",
            "command=get",
        ] {
            parse_rule_arg(&mut rule, token).unwrap();
        }
        assert_eq!(
            rule,
            Rule {
                name: "r".to_string(),
                delay: 150,
                drop: true,
                return_empty: true,
                return_err: Some("oops".to_string()),
                percentage: 30,
                client_addr: Some("10.0.0.".to_string()),
                command: Some("get".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_rule_arg_bool_other_values_are_false() {
        let mut rule = Rule::new("r");
        parse_rule_arg(&mut rule, "drop=true").unwrap();
        parse_rule_arg(&mut rule, "drop=yes").unwrap();
        assert!(!rule.drop);
    }

    #[test]
    fn test_parse_rule_arg_value_may_contain_equals() {
        let mut rule = Rule::new("r");
        parse_rule_arg(&mut rule, "return_err=a=b").unwrap();
        assert_eq!(rule.return_err.as_deref(), Some("a=b"));
    }

    #[test]
    fn test_parse_rule_arg_rejects_malformed_tokens() {
        let mut rule = Rule::new("r");
        assert_eq!(
            parse_rule_arg(&mut rule, "delay"),
            Err(ControlError::MissingValue("delay".to_string()))
        );
        assert!(matches!(
            parse_rule_arg(&mut rule, "delay=soon"),
            Err(ControlError::NotANumber { .. })
        ));
        assert!(matches!(
            parse_rule_arg(&mut rule, "delay=-5"),
            Err(ControlError::NotANumber { .. })
        ));
        assert!(matches!(
            parse_rule_arg(&mut rule, "percentage=half"),
            Err(ControlError::NotANumber { .. })
        ));
        for key in ["client_addr", "return_err", "command"] {
            assert_eq!(
                parse_rule_arg(&mut rule, &format!("{key}=")),
                Err(ControlError::EmptyValue(key.to_string()))
            );
        }
        assert_eq!(
            parse_rule_arg(&mut rule, "colour=blue"),
            Err(ControlError::UnknownKey("colour".to_string()))
        );
        assert_eq!(rule, Rule::new("r"));
    }

    #[test]
    fn test_ruleadd_and_list() {
        let plan = Plan::new();
        assert_eq!(run(&plan, "RULEADD slow delay=200 command=GET"), Reply::ok());
        assert_eq!(run(&plan, "ruleadd dropper drop=true"), Reply::ok());
        assert_eq!(
            run(&plan, "RULELIST"),
            Reply::Array(vec![
                bulk("slow hits=0 delay=200 command=GET"),
                bulk("dropper hits=0 drop=true"),
            ])
        );
    }

    #[test]
    fn test_ruleadd_validation_is_reported() {
        let plan = Plan::new();
        assert!(matches!(
            run(&plan, "RULEADD bad percentage=101"),
            Reply::Error(msg) if msg.starts_with("ERR percentage in rule 'bad'")
        ));
        assert!(matches!(
            run(&plan, "RULEADD bad delay=x"),
            Reply::Error(msg) if msg.starts_with("ERR parse delay error")
        ));
        assert_eq!(run(&plan, "RULEADD dup"), Reply::ok());
        assert_eq!(
            run(&plan, "RULEADD dup delay=1"),
            Reply::err("rule 'dup' already exists")
        );
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn test_ruleget_and_ruledel() {
        let plan = Plan::new();
        run(&plan, "RULEADD r1 return_err=boom percentage=50");
        assert_eq!(
            run(&plan, "RULEGET r1"),
            bulk("r1 hits=0 return_err=boom percentage=50")
        );
        assert_eq!(run(&plan, "RULEDEL r1"), Reply::ok());
        assert_eq!(run(&plan, "RULEDEL r1"), Reply::err("no matching rule found"));
        assert_eq!(run(&plan, "RULEGET r1"), Reply::err("no matching rule found"));
    }

    #[test]
    fn test_rulecounters_reports_hits() {
        let plan = Plan::new();
        run(&plan, "RULEADD counted delay=1");
        run(&plan, "RULEADD other command=SET");
        plan.select_rule("127.0.0.1:9", b"*1\r\n$4\r\nPING\r\n");
        assert_eq!(
            run(&plan, "RULECOUNTERS"),
            Reply::Array(vec![bulk("counted hits=1"), bulk("other hits=0")])
        );
    }

    #[test]
    fn test_arity_and_unknown_command() {
        let plan = Plan::new();
        for cmd in ["RULEADD", "RULEDEL", "ruleget"] {
            assert_eq!(
                run(&plan, cmd),
                Reply::err(format!(
                    "wrong number of arguments for '{}' command",
                    cmd.to_ascii_lowercase()
                ))
            );
        }
        assert_eq!(run(&plan, "FLUSHALL"), Reply::err("unknown command 'FLUSHALL'"));
    }
}
