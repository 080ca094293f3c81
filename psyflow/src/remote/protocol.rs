// Copyright (c) 2024 Marc Pabst
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The line protocol spoken by remote clients, independent of sockets.

use std::str::FromStr;

use crate::controller::{
    ConstantController, Controller, DelegateHandle, EvalFrequency, StringController, StringKind, TemporalVariable,
    TemporalVariables,
};
use crate::errors::PsyflowError;
use crate::parameters::{ParameterValue, TypeTag};

pub const HELP_TEXT: &str = r#"    TCP commands (sent over network socket):

    close -- close the connection
    exit -- close the connection
    quit -- quit the server program
    help -- print this message
    <name> -- show the value of the controller of <name>
    <name>=const(<args>) -- assign a new constant controller to <name>
    <name>=eval_str(<args>) -- assign a new formula controller to <name>
    <name>=exec_str(<args>) -- assign a new statement controller to <name>

    TCP commands are always on a single line.  (Newlines in string
    literals can be specified by using "\n" without the quotes.)

    The assignment commands share common behavior:

    <name> -- name given to create_remote_controller
    <args> -- during_go [, between_go [, eval_frequency [, temporal_variables [, return_type ]]]]
"#;

const RESERVED_NAMES: &[&str] = &["quit", "close", "exit", "help"];

/// Longest command line accepted, in bytes, without its terminator.
pub const MAX_LINE_LEN: usize = 4096;

/// Reply to a command line longer than [`MAX_LINE_LEN`].
pub fn line_too_long() -> String {
    format!("Error: Command line too long (more than {} bytes)\n", MAX_LINE_LEN)
}

/// Text sent to a client right after it connected.
pub fn greeting() -> String {
    format!(
        "Hello. This is psyflow version {}.\n{}\nBegin sending commands now.\n",
        env!("CARGO_PKG_VERSION"),
        HELP_TEXT
    )
}

/// Line announcing that `name` can be controlled.
pub fn controllable_line(name: &str) -> String {
    format!("\"{}\" controllable with this connection.\n", name)
}

/// What the connection should do after a line was handled.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Nothing to send back.
    Silent,
    /// Send this text (newline terminated) back.
    Reply(String),
    /// Drop the connection.
    Close,
    /// Quit the presentation.
    Quit,
}

/// Protocol state of one remote connection: the names it controls.
#[derive(Debug, Default)]
pub struct CommandSession {
    names: Vec<(String, DelegateHandle)>,
}

impl CommandSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the delegate behind `handle` controllable as `name`.
    pub fn register(&mut self, name: &str, handle: DelegateHandle) -> Result<(), PsyflowError> {
        if name.is_empty() {
            return Err(PsyflowError::ProtocolError("must specify a name".to_string()));
        }
        if name.chars().any(|c| c.is_whitespace() || c == '=') {
            return Err(PsyflowError::ProtocolError(format!(
                "name \"{}\" cannot contain spaces or '='",
                name
            )));
        }
        if RESERVED_NAMES.contains(&name) {
            return Err(PsyflowError::ProtocolError(format!(
                "name \"{}\" conflicts with reserved word",
                name
            )));
        }
        if self.handle(name).is_some() {
            return Err(PsyflowError::ProtocolError(format!("name \"{}\" already in use", name)));
        }
        self.names.push((name.to_string(), handle));
        Ok(())
    }

    /// Registered names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(|(name, _)| name.as_str())
    }

    pub fn handle(&self, name: &str) -> Option<&DelegateHandle> {
        self.names.iter().find(|(n, _)| n == name).map(|(_, h)| h)
    }

    /// Handles one line, without its line terminator.
    pub fn handle_line(&mut self, line: &str) -> Outcome {
        if line.len() > MAX_LINE_LEN {
            log::info!("rejected command line of {} bytes", line.len());
            return Outcome::Reply(line_too_long());
        }
        let line = line.trim();
        match line {
            "" => return Outcome::Silent,
            "quit" => return Outcome::Quit,
            "close" | "exit" => return Outcome::Close,
            "help" => return Outcome::Reply(format!("{}\n", HELP_TEXT)),
            _ => {}
        }

        if let Some(handle) = self.handle(line) {
            return Outcome::Reply(format!("{}\n", handle.describe()));
        }

        if let Some((name, command)) = line.split_once('=') {
            let (name, command) = (name.trim(), command.trim());
            if let Some(handle) = self.handle(name) {
                return match assign(handle, name, command) {
                    Ok(()) => Outcome::Silent,
                    Err(reply) => Outcome::Reply(reply),
                };
            }
        }

        log::info!("invalid command line: \"{}\"", line);
        Outcome::Reply(format!("Error: Invalid command line \"{}\"\n", line))
    }
}

// Stages a new delegate. On failure returns the error line for the client.
fn assign(handle: &DelegateHandle, name: &str, command: &str) -> Result<(), String> {
    let Some((kind, args)) = split_call(command) else {
        log::info!("invalid assignment command for {}: {}", name, command);
        return Err(format!("Error: Invalid assignment command for {}: {}\n", name, command));
    };
    let result = build_controller(kind, args).and_then(|controller| {
        log::debug!("\"{}\" = {}", name, controller.describe());
        handle.set_new_controller(controller)
    });
    result.map_err(|e| {
        log::info!("{} parsing {} for {}: {}", e.kind(), kind, name, e);
        format!("Error {} parsing {} for {}: {}\n", e.kind(), kind, name, e)
    })
}

// "kind(args)" -> (kind, args)
fn split_call(command: &str) -> Option<(&str, &str)> {
    let open = command.find('(')?;
    let kind = command[..open].trim();
    if !matches!(kind, "const" | "eval_str" | "exec_str") {
        return None;
    }
    let args = command[open + 1..].trim_end().strip_suffix(')')?;
    Some((kind, args.trim()))
}

fn build_controller(kind: &str, args: &str) -> Result<Box<dyn Controller>, PsyflowError> {
    let args = five_args(args)?;
    let eval_frequency = match &args[2] {
        Arg::None => EvalFrequency::every_frame(),
        arg => EvalFrequency::from_str(arg.name("eval_frequency")?)?,
    };
    let temporal_variables = match &args[3] {
        Arg::None => TemporalVariables::only(TemporalVariable::TimeSecSinceGo),
        arg => TemporalVariables::from_str(arg.name("temporal_variables")?)?,
    };
    let return_type = match &args[4] {
        Arg::None => None,
        arg => Some(TypeTag::from_str(arg.name("return_type")?)?),
    };

    if kind == "const" {
        let during_go = args[0].value()?;
        let between_go = match &args[1] {
            Arg::None => during_go.clone(),
            arg => arg.value()?,
        };
        let mut controller = ConstantController::with_values(during_go, between_go)?
            .with_eval_frequency(eval_frequency)
            .with_temporal_variables(temporal_variables);
        if let Some(return_type) = return_type {
            controller = controller.with_return_type(return_type)?;
        }
        return Ok(Box::new(controller));
    }

    let string_kind = if kind == "eval_str" {
        StringKind::Formula
    } else {
        StringKind::Statement
    };
    let during_go = args[0].string("during_go")?;
    let mut builder = match string_kind {
        StringKind::Formula => StringController::formula(during_go),
        StringKind::Statement => StringController::statements(during_go),
    }
    .eval_frequency(eval_frequency)
    .temporal_variables(temporal_variables);
    if !matches!(args[1], Arg::None) {
        builder = builder.between_go(args[1].string("between_go")?);
    }
    if let Some(return_type) = return_type {
        builder = builder.return_type(return_type);
    }
    let controller = builder.build()?;
    controller.safety_check()?;
    Ok(Box::new(controller))
}

/// One parsed argument of an assignment command.
#[derive(Debug, Clone, PartialEq)]
enum Arg {
    None,
    Value(ParameterValue),
    // flag expressions and type names
    Name(String),
}

impl Arg {
    fn value(&self) -> Result<ParameterValue, PsyflowError> {
        match self {
            Arg::Value(value) => Ok(value.clone()),
            Arg::None => Err(PsyflowError::ProtocolError("missing value".to_string())),
            Arg::Name(name) => Err(PsyflowError::ProtocolError(format!("\"{}\" is not a value", name))),
        }
    }

    fn string(&self, what: &str) -> Result<&str, PsyflowError> {
        match self {
            Arg::Value(ParameterValue::String(s)) => Ok(s),
            _ => Err(PsyflowError::ProtocolError(format!("{} must be a string", what))),
        }
    }

    fn name(&self, what: &str) -> Result<&str, PsyflowError> {
        match self {
            Arg::Name(name) => Ok(name),
            _ => Err(PsyflowError::ProtocolError(format!("{} must be a name", what))),
        }
    }
}

// during_go [, between_go [, eval_frequency [, temporal_variables [, return_type]]]]
fn five_args(args: &str) -> Result<[Arg; 5], PsyflowError> {
    let parts = split_top_level(args)?;
    if parts.len() > 5 {
        return Err(PsyflowError::ProtocolError("Too many arguments!".to_string()));
    }
    let mut parsed = [Arg::None, Arg::None, Arg::None, Arg::None, Arg::None];
    for (slot, part) in parsed.iter_mut().zip(parts) {
        *slot = parse_arg(part)?;
    }
    if parsed[0] == Arg::None {
        return Err(PsyflowError::ProtocolError("First argument must be set.".to_string()));
    }
    Ok(parsed)
}

// splits at commas outside of quotes and brackets; a trailing comma is allowed
fn split_top_level(s: &str) -> Result<Vec<&str>, PsyflowError> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '(' | '[' => depth += 1,
            ')' | ']' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| PsyflowError::ProtocolError(format!("unbalanced '{}'", c)))?;
            }
            ',' if depth == 0 => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if quote.is_some() {
        return Err(PsyflowError::ProtocolError("unterminated string".to_string()));
    }
    if depth != 0 {
        return Err(PsyflowError::ProtocolError("unbalanced brackets".to_string()));
    }
    let last = &s[start..];
    if !last.trim().is_empty() {
        parts.push(last);
    }
    Ok(parts)
}

fn parse_arg(raw: &str) -> Result<Arg, PsyflowError> {
    let s = raw.trim();
    match s {
        "" => return Err(PsyflowError::ProtocolError("empty argument".to_string())),
        "None" => return Ok(Arg::None),
        "True" => return Ok(Arg::Value(ParameterValue::Bool(true))),
        "False" => return Ok(Arg::Value(ParameterValue::Bool(false))),
        _ => {}
    }
    if let Some(text) = unquote(s) {
        return Ok(Arg::Value(ParameterValue::String(text)));
    }
    if let Some(inner) = s
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .or_else(|| s.strip_prefix('[').and_then(|s| s.strip_suffix(']')))
    {
        let items = if inner.trim().is_empty() {
            Vec::new()
        } else {
            split_top_level(inner)?
        };
        let numbers = items
            .iter()
            .map(|item| {
                item.trim()
                    .parse::<f64>()
                    .map_err(|_| PsyflowError::ProtocolError(format!("\"{}\" is not a number", item.trim())))
            })
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Arg::Value(ParameterValue::Sequence(numbers)));
    }
    if let Ok(i) = s.parse::<i64>() {
        return Ok(Arg::Value(ParameterValue::Integer(i)));
    }
    if s.starts_with(|c: char| c.is_ascii_digit() || c == '-' || c == '+' || c == '.') {
        if let Ok(x) = s.parse::<f64>() {
            return Ok(Arg::Value(ParameterValue::Real(x)));
        }
    }
    if s.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '|' | ' ' | '(' | ')' | ','))
    {
        return Ok(Arg::Name(s.to_string()));
    }
    Err(PsyflowError::ProtocolError(format!("cannot parse argument \"{}\"", s)))
}

// "..." or '...' with backslash escapes; "\n" becomes a newline
fn unquote(s: &str) -> Option<String> {
    let quote = s.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let inner = s.strip_prefix(quote)?.strip_suffix(quote)?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(c @ ('\\' | '"' | '\'')) => out.push(c),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{EncapsulatedController, Phase, TimeBasis};

    fn session() -> (CommandSession, EncapsulatedController) {
        let initial = ConstantController::with_values(1.0, 0.0).unwrap();
        let controller = EncapsulatedController::new(initial);
        let mut session = CommandSession::new();
        session.register("foo", controller.handle()).unwrap();
        (session, controller)
    }

    fn reply(outcome: Outcome) -> String {
        match outcome {
            Outcome::Reply(text) => text,
            other => panic!("expected a reply, got {:?}", other),
        }
    }

    #[test]
    fn assigned_constants_are_reported_back() {
        let (mut session, _controller) = session();
        assert_eq!(session.handle_line("foo=const(1.0,0.0,EVERY_FRAME)"), Outcome::Silent);
        assert_eq!(
            reply(session.handle_line("foo")),
            "const(1.0, 0.0, EVERY_FRAME, TIME_SEC_SINCE_GO, float)\n"
        );
    }

    #[test]
    fn const_without_between_value_reuses_the_go_value() {
        let (mut session, mut controller) = session();
        assert_eq!(session.handle_line("foo = const(2.5)"), Outcome::Silent);
        controller.commit();
        let basis = TimeBasis::time_independent(Phase::BetweenGo);
        assert_eq!(controller.evaluate(&basis).unwrap(), ParameterValue::Real(2.5));
    }

    #[test]
    fn formulas_without_between_string_skip_between_go() {
        let (mut session, _controller) = session();
        assert_eq!(session.handle_line(r#"foo=eval_str("t*360.0")"#), Outcome::Silent);
        assert_eq!(
            reply(session.handle_line("foo")),
            "eval_str(\"t*360.0\", None, EVERY_FRAME | NOT_BETWEEN_GO, TIME_SEC_SINCE_GO, float)\n"
        );
    }

    #[test]
    fn statements_must_assign_x() {
        let (mut session, _controller) = session();
        let answer = reply(session.handle_line(r#"foo=exec_str("y=t*360.0")"#));
        assert!(answer.starts_with("Error "), "{}", answer);
        assert!(answer.contains("parsing exec_str for foo"), "{}", answer);
        assert_eq!(
            session.handle_line(r#"foo=exec_str("y=t\nx=y*2.0", "x=0.0", None, TIME_SEC_SINCE_GO)"#),
            Outcome::Silent
        );
    }

    #[test]
    fn type_mismatches_keep_the_old_delegate() {
        let (mut session, _controller) = session();
        let answer = reply(session.handle_line(r#"foo=const("red")"#));
        assert!(answer.starts_with("Error TypeMismatchError parsing const for foo"), "{}", answer);
        assert_eq!(
            reply(session.handle_line("foo")),
            "const(1.0, 0.0, EVERY_FRAME, TIME_INDEPENDENT, float)\n"
        );
    }

    #[test]
    fn failing_safety_checks_are_reported() {
        let (mut session, _controller) = session();
        let answer = reply(session.handle_line(r#"foo=eval_str("1.0/(t-t)")"#));
        assert!(answer.contains("EvaluationError"), "{}", answer);
        assert!(!session.handle("foo").unwrap().has_pending());
    }

    #[test]
    fn argument_errors() {
        let (mut session, _controller) = session();
        for line in [
            "foo=const()",
            "foo=const(None, 1.0)",
            "foo=const(1.0, 1.0, EVERY_FRAME, TIME_INDEPENDENT, float, 7)",
            "foo=const(1.0, 0.0, SOMETIMES)",
            "foo=const(1.0, 0.0, ONCE|TRANSITIONS)",
        ] {
            let answer = reply(session.handle_line(line));
            assert!(answer.starts_with("Error "), "{} -> {}", line, answer);
        }
        assert!(reply(session.handle_line("foo=rand(1)")).starts_with("Error: Invalid assignment command for foo"));
    }

    #[test]
    fn control_commands() {
        let (mut session, _controller) = session();
        assert_eq!(session.handle_line("quit"), Outcome::Quit);
        assert_eq!(session.handle_line("close"), Outcome::Close);
        assert_eq!(session.handle_line("exit"), Outcome::Close);
        assert!(reply(session.handle_line("help")).contains("<name>=const(<args>)"));
        assert_eq!(
            reply(session.handle_line("bar=const(1.0)")),
            "Error: Invalid command line \"bar=const(1.0)\"\n"
        );
    }

    #[test]
    fn overlong_lines_are_rejected_unparsed() {
        let (mut session, _controller) = session();
        let line = format!(
            "foo=eval_str(\"{}1.0{}\")",
            "(".repeat(200_000),
            ")".repeat(200_000)
        );
        assert_eq!(reply(session.handle_line(&line)), line_too_long());
        assert!(!session.handle("foo").unwrap().has_pending());

        let line = format!("foo=const(1.0){}", " ".repeat(MAX_LINE_LEN));
        assert_eq!(reply(session.handle_line(&line)), line_too_long());
    }

    #[test]
    fn deeply_nested_formulas_are_answered_with_errors() {
        let (mut session, _controller) = session();
        for formula in [
            format!("{}1.0{}", "(".repeat(1000), ")".repeat(1000)),
            format!("{}1.0", "-".repeat(2000)),
            vec!["t"; 1500].join("+"),
        ] {
            let line = format!("foo=eval_str(\"{}\")", formula);
            assert!(line.len() <= MAX_LINE_LEN);
            let answer = reply(session.handle_line(&line));
            assert!(answer.starts_with("Error EvaluationError parsing eval_str for foo"), "{}", answer);
        }
        assert!(!session.handle("foo").unwrap().has_pending());
    }

    #[test]
    fn names_are_checked() {
        let (mut session, controller) = session();
        for name in ["", "a b", "quit", "foo", "a=b"] {
            assert!(session.register(name, controller.handle()).is_err(), "{:?}", name);
        }
        assert!(session.register("bar", controller.handle()).is_ok());
        assert_eq!(session.names().collect::<Vec<_>>(), vec!["foo", "bar"]);
    }

    #[test]
    fn parses_arguments() {
        assert_eq!(parse_arg(" 3 ").unwrap(), Arg::Value(ParameterValue::Integer(3)));
        assert_eq!(parse_arg("-0.5").unwrap(), Arg::Value(ParameterValue::Real(-0.5)));
        assert_eq!(
            parse_arg("(1, 2.5)").unwrap(),
            Arg::Value(ParameterValue::Sequence(vec![1.0, 2.5]))
        );
        assert_eq!(
            parse_arg(r#""a\nb""#).unwrap(),
            Arg::Value(ParameterValue::String("a\nb".to_string()))
        );
        assert_eq!(
            parse_arg("EVERY_FRAME | NOT_BETWEEN_GO").unwrap(),
            Arg::Name("EVERY_FRAME | NOT_BETWEEN_GO".to_string())
        );
        assert_eq!(split_top_level(r#""a,b", (1,2), 3,"#).unwrap().len(), 3);
        assert!(five_args("1,,2").is_err());
        assert!(split_top_level("\"open").is_err());
    }
}
