//! Markup Engine
//!
//! A small template language implementing [`TemplateEngine`]:
//!
//! ```text
//! # Consulting Agreement            optional title, first line only
//! [[Name]]                          Text variable
//! [[Start: Date]]                   variable with a declared kind
//! {{Has Deposit => ... [[Deposit: Number]] ...}}
//!                                   YesNo conditional; the body (and the
//!                                   variables in it) is reached only when
//!                                   the condition is answered yes/true
//! ```
//!
//! Every reached variable is reported as required. A name keeps the first kind
//! declared for it; declaring a different kind elsewhere is a compile error.

use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

use chrono::DateTime;
use form_types::{
    Agreement, ExecutionContext, ExecutionResult, Identity, ParameterMap, TypedValue,
    VariableDescriptor, VariableKind,
};
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{anychar, char, multispace0},
    combinator::{map, not, opt, recognize, verify},
    multi::{many0, many1},
    sequence::{delimited, pair, preceded, tuple},
    IResult,
};
use regex::Regex;
use serde_json::json;

use super::{CompiledTemplate, ExecutionOutcome, PreviewOptions, TemplateEngine};
use crate::error::{FormError, FormResult};

const DEFAULT_TITLE: &str = "Agreement";

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").unwrap());

// ============================================================================
// AST
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Text(String),
    Variable {
        name: String,
        kind: Option<VariableKind>,
        /// Bytes of source left when the marker started
        tail: usize,
    },
    Conditional {
        name: String,
        body: Vec<Segment>,
        tail: usize,
    },
}

#[derive(Debug, Clone)]
struct MarkupTemplate {
    title: String,
    segments: Vec<Segment>,
    kinds: BTreeMap<String, VariableKind>,
}

impl MarkupTemplate {
    fn kind_of(&self, name: &str) -> VariableKind {
        self.kinds.get(name).cloned().unwrap_or_default()
    }
}

// ============================================================================
// PARSER
// ============================================================================

fn variable_name(input: &str) -> IResult<&str, &str> {
    verify(
        map(
            take_while1(|c: char| c.is_alphanumeric() || matches!(c, ' ' | '_' | '-' | '\'')),
            str::trim,
        ),
        |name: &str| !name.is_empty(),
    )(input)
}

fn kind_annotation(input: &str) -> IResult<&str, VariableKind> {
    preceded(
        pair(char(':'), multispace0),
        map(take_while1(|c: char| c.is_alphanumeric()), VariableKind::parse),
    )(input)
}

fn variable(input: &str) -> IResult<&str, Segment> {
    let tail = input.len();
    map(
        delimited(
            tag("[["),
            pair(variable_name, opt(kind_annotation)),
            preceded(multispace0, tag("]]")),
        ),
        move |(name, kind)| Segment::Variable {
            name: name.to_string(),
            kind,
            tail,
        },
    )(input)
}

fn conditional(input: &str) -> IResult<&str, Segment> {
    let tail = input.len();
    map(
        tuple((
            tag("{{"),
            variable_name,
            preceded(multispace0, tag("=>")),
            segments,
            tag("}}"),
        )),
        move |(_, name, _, body, _)| Segment::Conditional {
            name: name.to_string(),
            body,
            tail,
        },
    )(input)
}

fn text(input: &str) -> IResult<&str, Segment> {
    map(
        recognize(many1(preceded(
            not(alt((tag("[["), tag("{{"), tag("}}")))),
            anychar,
        ))),
        |s: &str| Segment::Text(s.to_string()),
    )(input)
}

fn segment(input: &str) -> IResult<&str, Segment> {
    alt((variable, conditional, text))(input)
}

fn segments(input: &str) -> IResult<&str, Vec<Segment>> {
    many0(segment)(input)
}

fn split_title(source: &str) -> (String, &str) {
    match source.strip_prefix("# ") {
        Some(rest) => {
            let (line, body) = rest.split_once('\n').unwrap_or((rest, ""));
            (line.trim().to_string(), body)
        }
        None => (DEFAULT_TITLE.to_string(), source),
    }
}

fn parse_template(source: &str) -> FormResult<MarkupTemplate> {
    let (title, body) = split_title(source);

    let (rest, segments) = segments(body).map_err(|e| FormError::Compile {
        reason: e.to_string(),
        offset: 0,
    })?;

    if !rest.is_empty() {
        let reason = if rest.starts_with("[[") {
            "malformed variable"
        } else if rest.starts_with("{{") {
            "malformed or unterminated conditional block"
        } else {
            "unmatched '}}'"
        };
        return Err(FormError::Compile {
            reason: reason.to_string(),
            offset: source.len() - rest.len(),
        });
    }

    let mut kinds = BTreeMap::new();
    collect_kinds(&segments, &mut kinds, source)?;

    Ok(MarkupTemplate {
        title,
        segments,
        kinds,
    })
}

fn collect_kinds(
    segments: &[Segment],
    kinds: &mut BTreeMap<String, VariableKind>,
    source: &str,
) -> FormResult<()> {
    for segment in segments {
        match segment {
            Segment::Text(_) | Segment::Variable { kind: None, .. } => {}
            Segment::Variable {
                name,
                kind: Some(kind),
                tail,
            } => declare(kinds, name, kind.clone(), source.len() - tail)?,
            Segment::Conditional { name, body, tail } => {
                declare(kinds, name, VariableKind::YesNo, source.len() - tail)?;
                collect_kinds(body, kinds, source)?;
            }
        }
    }
    Ok(())
}

fn declare(
    kinds: &mut BTreeMap<String, VariableKind>,
    name: &str,
    kind: VariableKind,
    offset: usize,
) -> FormResult<()> {
    match kinds.get(name) {
        Some(existing) if *existing != kind => Err(FormError::Compile {
            reason: format!("variable '{name}' declared as {existing} and {kind}"),
            offset,
        }),
        Some(_) => Ok(()),
        None => {
            kinds.insert(name.to_string(), kind);
            Ok(())
        }
    }
}

// ============================================================================
// VALUES
// ============================================================================

fn check_email(email: &str) -> Result<(), String> {
    if EMAIL_RE.is_match(email.trim()) {
        Ok(())
    } else {
        Err(format!("'{email}' is not a valid email address"))
    }
}

fn parse_timestamp(raw: &str) -> Result<i64, String> {
    let millis: i64 = raw
        .trim()
        .parse()
        .map_err(|_| format!("'{raw}' is not a timestamp"))?;
    DateTime::from_timestamp_millis(millis)
        .map(|_| millis)
        .ok_or_else(|| format!("timestamp {millis} is out of range"))
}

fn decode(kind: &VariableKind, raw: &str) -> Result<TypedValue, String> {
    match kind {
        VariableKind::Text => Ok(TypedValue::Text(raw.to_string())),
        VariableKind::Other(_) => Ok(TypedValue::Other(raw.to_string())),
        VariableKind::Number => raw
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(TypedValue::Number)
            .ok_or_else(|| format!("'{raw}' is not a number")),
        VariableKind::YesNo => match raw.trim().to_ascii_lowercase().as_str() {
            "yes" | "true" => Ok(TypedValue::YesNo(true)),
            "no" | "false" => Ok(TypedValue::YesNo(false)),
            _ => Err(format!("'{raw}' is not yes or no")),
        },
        VariableKind::Date => parse_timestamp(raw).map(TypedValue::Date),
        VariableKind::DateTime => parse_timestamp(raw).map(TypedValue::DateTime),
        VariableKind::Identity => {
            let identity: Identity = serde_json::from_str(raw)
                .map_err(|_| format!("'{raw}' is not an identity value"))?;
            check_email(&identity.email)?;
            Ok(TypedValue::Identity(identity))
        }
    }
}

fn display(value: &TypedValue) -> String {
    match value {
        TypedValue::Text(s) | TypedValue::Other(s) => s.clone(),
        TypedValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
        TypedValue::Number(n) => n.to_string(),
        TypedValue::YesNo(true) => "Yes".to_string(),
        TypedValue::YesNo(false) => "No".to_string(),
        TypedValue::Date(ms) => DateTime::from_timestamp_millis(*ms)
            .map(|d| d.format("%B %-d, %Y").to_string())
            .unwrap_or_default(),
        TypedValue::DateTime(ms) => DateTime::from_timestamp_millis(*ms)
            .map(|d| d.format("%B %-d, %Y %-I:%M %p UTC").to_string())
            .unwrap_or_default(),
        TypedValue::Identity(identity) => identity.email.clone(),
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

// ============================================================================
// EXECUTION
// ============================================================================

struct Execution<'a> {
    template: &'a MarkupTemplate,
    parameters: &'a ParameterMap,
    reached: Vec<VariableDescriptor>,
    seen: HashSet<String>,
    text: String,
    errors: Vec<String>,
}

impl<'a> Execution<'a> {
    fn new(template: &'a MarkupTemplate, parameters: &'a ParameterMap) -> Self {
        Self {
            template,
            parameters,
            reached: Vec::new(),
            seen: HashSet::new(),
            text: String::new(),
            errors: Vec::new(),
        }
    }

    fn reach(&mut self, name: &str) -> VariableKind {
        let kind = self.template.kind_of(name);
        if self.seen.insert(name.to_string()) {
            self.reached
                .push(VariableDescriptor::new(name, kind.clone()).required());
        }
        kind
    }

    fn walk(&mut self, segments: &'a [Segment]) {
        for segment in segments {
            match segment {
                Segment::Text(text) => self.text.push_str(text),
                Segment::Variable { name, .. } => {
                    let kind = self.reach(name);
                    let parameters = self.parameters;
                    match parameters.get(name).map(|raw| decode(&kind, raw)) {
                        Some(Ok(value)) => self.text.push_str(&display(&value)),
                        Some(Err(reason)) => {
                            self.errors.push(format!("{name}: {reason}"));
                            self.text.push_str(&format!("[[{name}]]"));
                        }
                        None => self.text.push_str(&format!("[[{name}]]")),
                    }
                }
                Segment::Conditional { name, body, .. } => {
                    let kind = self.reach(name);
                    let parameters = self.parameters;
                    match parameters.get(name).map(|raw| decode(&kind, raw)) {
                        Some(Ok(TypedValue::YesNo(true))) => self.walk(body),
                        Some(Ok(_)) | None => {}
                        Some(Err(reason)) => self.errors.push(format!("{name}: {reason}")),
                    }
                }
            }
        }
    }

    fn finish(self) -> ExecutionOutcome {
        let error_message = if self.errors.is_empty() {
            None
        } else {
            Some(self.errors.join("; "))
        };
        ExecutionOutcome {
            execution_result: ExecutionResult::new(json!({
                "title": self.template.title,
                "text": self.text,
                "variables": self.reached,
            })),
            error_message,
        }
    }
}

// ============================================================================
// ENGINE
// ============================================================================

/// In-tree engine for the markup language described in the module docs.
#[derive(Debug, Clone, Default)]
pub struct MarkupEngine;

impl MarkupEngine {
    pub fn new() -> Self {
        Self
    }
}

impl TemplateEngine for MarkupEngine {
    fn compile_template(&self, source: &str) -> FormResult<CompiledTemplate> {
        parse_template(source).map(CompiledTemplate::new)
    }

    fn execute(
        &self,
        compiled: &CompiledTemplate,
        _context: &ExecutionContext,
        parameters: &ParameterMap,
    ) -> ExecutionOutcome {
        let Some(template) = compiled.downcast_ref::<MarkupTemplate>() else {
            return ExecutionOutcome {
                execution_result: ExecutionResult::new(json!({})),
                error_message: Some("template was not compiled by the markup engine".into()),
            };
        };

        let mut execution = Execution::new(template, parameters);
        execution.walk(&template.segments);
        execution.finish()
    }

    fn executed_variables(
        &self,
        result: &ExecutionResult,
        _context: &ExecutionContext,
    ) -> Vec<VariableDescriptor> {
        result
            .payload()
            .get("variables")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    fn validity(&self, descriptor: &VariableDescriptor, raw: &str) -> FormResult<TypedValue> {
        decode(&descriptor.kind, raw).map_err(|reason| FormError::field(&descriptor.name, reason))
    }

    fn identity_email(&self, value: &TypedValue) -> FormResult<String> {
        match value {
            TypedValue::Identity(identity) => Ok(identity.email.clone()),
            other => Err(FormError::Lookup {
                reason: format!("{other:?} is not an identity"),
            }),
        }
    }

    fn create_identity_internal_value(&self, user_id: &str, email: &str) -> FormResult<String> {
        check_email(email).map_err(|reason| FormError::field("identity", reason))?;
        let identity = Identity {
            user_id: user_id.to_string(),
            email: email.trim().to_string(),
        };
        serde_json::to_string(&identity).map_err(|e| FormError::field("identity", e.to_string()))
    }

    fn agreements(&self, result: &ExecutionResult) -> Vec<Agreement> {
        let payload = result.payload();
        let Some(text) = payload.get("text").and_then(|t| t.as_str()) else {
            return Vec::new();
        };
        let title = payload
            .get("title")
            .and_then(|t| t.as_str())
            .unwrap_or(DEFAULT_TITLE);

        vec![Agreement {
            title: title.to_string(),
            payload: json!({ "text": text }),
        }]
    }

    fn render_for_preview(
        &self,
        agreement: &Agreement,
        options: &PreviewOptions,
    ) -> FormResult<String> {
        let text = agreement
            .payload
            .get("text")
            .and_then(|t| t.as_str())
            .ok_or_else(|| FormError::Preview {
                reason: format!("agreement '{}' has no text", agreement.title),
            })?;

        let mut html = String::new();
        if !options.hide_title {
            html.push_str(&format!("<h1>{}</h1>\n", escape_html(&agreement.title)));
        }
        for paragraph in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
            let lines: Vec<String> = paragraph.lines().map(escape_html).collect();
            html.push_str(&format!("<p>{}</p>\n", lines.join("<br />")));
        }
        Ok(html)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn run(source: &str, params: &ParameterMap) -> ExecutionOutcome {
        let engine = MarkupEngine::new();
        let compiled = engine.compile_template(source).expect("compile");
        engine.execute(&compiled, &ExecutionContext::default(), params)
    }

    fn names(engine: &MarkupEngine, outcome: &ExecutionOutcome) -> Vec<String> {
        engine
            .executed_variables(&outcome.execution_result, &ExecutionContext::default())
            .into_iter()
            .map(|v| v.name)
            .collect()
    }

    #[test]
    fn test_parse_variables_and_kinds() {
        let template = parse_template("Hi [[Name]], from [[Start: Date]].").unwrap();
        assert_eq!(template.title, DEFAULT_TITLE);
        assert_eq!(template.segments.len(), 5);
        assert_eq!(template.kind_of("Start"), VariableKind::Date);
        assert_eq!(template.kind_of("Name"), VariableKind::Text);
    }

    #[test]
    fn test_title_line() {
        let template = parse_template("# Consulting Agreement\nBody").unwrap();
        assert_eq!(template.title, "Consulting Agreement");
        assert_eq!(template.segments, vec![Segment::Text("Body".into())]);
    }

    #[test]
    fn test_unclosed_variable_reports_offset() {
        let err = parse_template("Hello [[Name").unwrap_err();
        match err {
            FormError::Compile { reason, offset } => {
                assert_eq!(reason, "malformed variable");
                assert_eq!(offset, 6);
            }
            other => panic!("Expected Compile, got {:?}", other),
        }
    }

    #[test]
    fn test_stray_close_is_rejected() {
        let err = parse_template("Text }} more").unwrap_err();
        assert!(matches!(err, FormError::Compile { offset: 5, .. }));
    }

    #[test]
    fn test_unterminated_conditional_is_rejected() {
        let err = parse_template("{{Agree => [[Name]]").unwrap_err();
        assert!(matches!(err, FormError::Compile { offset: 0, .. }));
    }

    #[test]
    fn test_conflicting_kinds_are_rejected() {
        let err = parse_template("[[Start: Date]] and [[Start: Number]]").unwrap_err();
        match err {
            FormError::Compile { reason, offset } => {
                assert!(reason.contains("declared as Date and Number"));
                assert_eq!(offset, 20);
            }
            other => panic!("Expected Compile, got {:?}", other),
        }
    }

    #[test]
    fn test_conflict_offset_points_at_marker_not_prose() {
        let source = "# Terms\nStarting on [[Start: Date]], {{Start => yes}}";
        let err = parse_template(source).unwrap_err();
        match err {
            FormError::Compile { offset, .. } => {
                assert_eq!(&source[offset..offset + 2], "{{");
                assert_eq!(offset, source.find("{{").unwrap());
            }
            other => panic!("Expected Compile, got {:?}", other),
        }
    }

    #[test]
    fn test_substitution() {
        let params: ParameterMap = [("Name", "Ada")].into_iter().collect();
        let outcome = run("Hello [[Name]]!", &params);
        assert!(outcome.error_message.is_none());
        assert_eq!(outcome.execution_result.payload()["text"], "Hello Ada!");
    }

    #[test]
    fn test_missing_value_keeps_placeholder() {
        let outcome = run("Hello [[Name]]!", &ParameterMap::new());
        assert!(outcome.error_message.is_none());
        assert_eq!(outcome.execution_result.payload()["text"], "Hello [[Name]]!");
    }

    #[test]
    fn test_conditional_reaches_body_only_when_yes() {
        let engine = MarkupEngine::new();
        let source = "{{A => Then [[B]]}}";

        let outcome = run(source, &ParameterMap::new());
        assert_eq!(names(&engine, &outcome), vec!["A"]);

        let params: ParameterMap = [("A", "no")].into_iter().collect();
        assert_eq!(names(&engine, &run(source, &params)), vec!["A"]);

        let params: ParameterMap = [("A", "yes")].into_iter().collect();
        let outcome = run(source, &params);
        assert_eq!(names(&engine, &outcome), vec!["A", "B"]);
        assert_eq!(outcome.execution_result.payload()["text"], " Then [[B]]");
    }

    #[test]
    fn test_variables_reported_once_and_required() {
        let engine = MarkupEngine::new();
        let outcome = run("[[Name]] and [[Name]]", &ParameterMap::new());
        let variables =
            engine.executed_variables(&outcome.execution_result, &ExecutionContext::default());
        assert_eq!(variables.len(), 1);
        assert!(variables[0].is_required);
    }

    #[test]
    fn test_invalid_value_reports_error_message() {
        let params: ParameterMap = [("Fee", "lots")].into_iter().collect();
        let outcome = run("Fee: [[Fee: Number]]", &params);
        let message = outcome.error_message.expect("error message");
        assert!(message.contains("Fee"));
        assert_eq!(outcome.execution_result.payload()["text"], "Fee: [[Fee]]");
    }

    #[test]
    fn test_date_display() {
        let params: ParameterMap = [("Start", "0")].into_iter().collect();
        let outcome = run("[[Start: Date]]", &params);
        assert_eq!(outcome.execution_result.payload()["text"], "January 1, 1970");
    }

    #[test]
    fn test_identity_round_trip() {
        let engine = MarkupEngine::new();
        let canonical = engine
            .create_identity_internal_value("", "ada@example.com")
            .unwrap();
        let descriptor = VariableDescriptor::new("Client", VariableKind::Identity);
        let value = engine.validity(&descriptor, &canonical).unwrap();
        assert_eq!(engine.identity_email(&value).unwrap(), "ada@example.com");
    }

    #[test]
    fn test_identity_rejects_bad_email() {
        let engine = MarkupEngine::new();
        assert!(matches!(
            engine.create_identity_internal_value("", "ada@"),
            Err(FormError::FieldValidation { .. })
        ));
        assert!(matches!(
            engine.identity_email(&TypedValue::Text("ada".into())),
            Err(FormError::Lookup { .. })
        ));
    }

    #[test]
    fn test_preview_escapes_and_splits_paragraphs() {
        let engine = MarkupEngine::new();
        let params: ParameterMap = [("Name", "<Ada>")].into_iter().collect();
        let outcome = run("# Deal\nFirst [[Name]]\nline two\n\nSecond", &params);
        let agreements = engine.agreements(&outcome.execution_result);
        assert_eq!(agreements.len(), 1);

        let html = engine
            .render_for_preview(&agreements[0], &PreviewOptions::default())
            .unwrap();
        assert_eq!(
            html,
            "<h1>Deal</h1>\n<p>First &lt;Ada&gt;<br />line two</p>\n<p>Second</p>\n"
        );

        let html = engine
            .render_for_preview(&agreements[0], &PreviewOptions { hide_title: true })
            .unwrap();
        assert!(!html.contains("<h1>"));
    }
}
