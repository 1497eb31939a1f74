//! Structural validation of action payloads.
//!
//! Validators are pure: they read an [`Action`] and return a report. Errors
//! block execution, warnings and info are advisory and travel with the result.

pub mod security;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::action::{Action, ActionType, ResourceType};

pub use security::{
    ScanLanguage, SecurityCategory, SecurityFinding, SecurityReport, SecurityScanner, Severity,
};

pub const TAG_TYPES: &[&str] = &["AtomicTag", "Folder", "UdtInstance", "UdtType"];
pub const TAG_DATA_TYPES: &[&str] = &[
    "Int1", "Int2", "Int4", "Int8", "Float4", "Float8", "Boolean", "String", "DateTime", "Text",
    "DataSet", "Document",
];
pub const TAG_VALUE_SOURCES: &[&str] = &["memory", "opc", "expr", "query", "derived", "reference"];
pub const QUERY_TYPES: &[&str] = &["Query", "UpdateQuery", "Scalar"];
pub const SQL_PARAMETER_TYPES: &[&str] = &[
    "Int1", "Int2", "Int4", "Int8", "Float4", "Float8", "Boolean", "String", "DateTime",
];
pub const GATEWAY_CONFIG_SECTIONS: &[&str] = &[
    "general",
    "security",
    "redundancy",
    "alarming",
    "historian",
    "database",
    "network",
    "logging",
    "modules",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueCode {
    Required,
    InvalidType,
    InvalidEnum,
    InvalidRange,
    InvalidPath,
    InvalidName,
    UnbalancedDelimiter,
    MixedIndentation,
    UndeclaredParameter,
    UnusedParameter,
    UnknownSection,
    EmptyPayload,
    DefaultApplied,
}

impl IssueCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Required => "REQUIRED",
            Self::InvalidType => "INVALID_TYPE",
            Self::InvalidEnum => "INVALID_ENUM",
            Self::InvalidRange => "INVALID_RANGE",
            Self::InvalidPath => "INVALID_PATH",
            Self::InvalidName => "INVALID_NAME",
            Self::UnbalancedDelimiter => "UNBALANCED_DELIMITER",
            Self::MixedIndentation => "MIXED_INDENTATION",
            Self::UndeclaredParameter => "UNDECLARED_PARAMETER",
            Self::UnusedParameter => "UNUSED_PARAMETER",
            Self::UnknownSection => "UNKNOWN_SECTION",
            Self::EmptyPayload => "EMPTY_PAYLOAD",
            Self::DefaultApplied => "DEFAULT_APPLIED",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
    pub code: IssueCode,
}

impl ValidationIssue {
    pub fn new(field: impl Into<String>, code: IssueCode, message: impl Into<String>) -> Self {
        Self { field: field.into(), message: message.into(), code }
    }

    pub fn render(&self) -> String {
        format!("{}: {}", self.field, self.message)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    pub info: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, field: impl Into<String>, code: IssueCode, message: impl Into<String>) {
        self.errors.push(ValidationIssue::new(field, code, message));
    }

    fn warn(&mut self, field: impl Into<String>, code: IssueCode, message: impl Into<String>) {
        self.warnings.push(ValidationIssue::new(field, code, message));
    }

    fn note(&mut self, field: impl Into<String>, code: IssueCode, message: impl Into<String>) {
        self.info.push(ValidationIssue::new(field, code, message));
    }
}

/// Runs the structural rules for the action's resource type.
pub fn validate(action: &Action) -> ValidationReport {
    let mut report = ValidationReport::default();
    match action.resource_type() {
        ResourceType::Tag => validate_tag(action, &mut report),
        ResourceType::Project => validate_project(action, &mut report),
        ResourceType::View => validate_view(action, &mut report),
        ResourceType::Script => validate_script(action, &mut report),
        ResourceType::NamedQuery => validate_named_query(action, &mut report),
        ResourceType::GatewayConfig => validate_gateway_config(action, &mut report),
    }
    if action.action_type() == ActionType::Update
        && action.payload().is_empty()
        && action.resource_type() != ResourceType::GatewayConfig
    {
        report.error("payload", IssueCode::EmptyPayload, "an update needs at least one field");
    }
    report
}

fn validate_tag(action: &Action, report: &mut ValidationReport) {
    let path = action.resource_path();
    if !path.is_empty() {
        validate_tag_path(path, report);
    }

    let payload = action.payload();
    if action.action_type() == ActionType::Create {
        match payload.get("tagType") {
            None => report.error("tagType", IssueCode::Required, "tagType is required"),
            Some(_) => check_enum(payload, "tagType", TAG_TYPES, report),
        }
        if payload.get("tagType").and_then(Value::as_str) == Some("AtomicTag")
            && !payload.contains_key("dataType")
        {
            report.warn("dataType", IssueCode::DefaultApplied, "dataType not set; Int4 is assumed");
        }
    } else {
        check_enum(payload, "tagType", TAG_TYPES, report);
    }
    check_enum(payload, "dataType", TAG_DATA_TYPES, report);
    check_enum(payload, "valueSource", TAG_VALUE_SOURCES, report);

    match payload.get("valueSource").and_then(Value::as_str) {
        Some("opc") => {
            if !has_text(payload, "opcItemPath") {
                report.error("opcItemPath", IssueCode::Required, "OPC tags need an opcItemPath");
            }
            if !has_text(payload, "opcServer") {
                report.warn("opcServer", IssueCode::DefaultApplied, "opcServer not set");
            }
        }
        Some("expr") => {
            if !has_text(payload, "expression") {
                report.error("expression", IssueCode::Required, "expression tags need an expression");
            }
        }
        _ => {}
    }
    if let Some(expression) = payload.get("expression").and_then(Value::as_str) {
        if let Err(problem) = check_delimiters(expression, CommentStyle::None) {
            report.error("expression", IssueCode::UnbalancedDelimiter, problem);
        }
    }

    let low = numeric_field(payload, "engLow", report);
    let high = numeric_field(payload, "engHigh", report);
    if let (Some(low), Some(high)) = (low, high) {
        if low >= high {
            report.error(
                "engLow",
                IssueCode::InvalidRange,
                format!("engLow ({low}) must be lower than engHigh ({high})"),
            );
        }
    }
}

fn validate_tag_path(path: &str, report: &mut ValidationReport) {
    let remainder = if let Some(rest) = path.strip_prefix('[') {
        let Some((provider, rest)) = rest.split_once(']') else {
            report.error("resourcePath", IssueCode::InvalidPath, "provider bracket is not closed");
            return;
        };
        if provider.trim().is_empty()
            || !provider.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | ' '))
        {
            report.error(
                "resourcePath",
                IssueCode::InvalidPath,
                format!("invalid tag provider `{provider}`"),
            );
        }
        rest
    } else {
        report.note("resourcePath", IssueCode::DefaultApplied, "provider `default` is assumed");
        path
    };

    if remainder.starts_with('/') || remainder.ends_with('/') {
        report.error(
            "resourcePath",
            IssueCode::InvalidPath,
            "tag path segments must not be empty",
        );
    }
    if remainder.contains(['[', ']']) {
        report.error("resourcePath", IssueCode::InvalidPath, "unexpected bracket in tag path");
    }
}

fn validate_project(action: &Action, report: &mut ValidationReport) {
    let path = action.resource_path();
    if !path.is_empty() && !is_project_name(path) {
        report.error(
            "resourcePath",
            IssueCode::InvalidName,
            "project names may contain letters, digits, `_` and `-` only",
        );
    }

    let payload = action.payload();
    if let Some(name) = payload.get("name") {
        match name.as_str() {
            Some(name) if is_project_name(name) => {}
            Some(_) => report.error(
                "name",
                IssueCode::InvalidName,
                "project names may contain letters, digits, `_` and `-` only",
            ),
            None => report.error("name", IssueCode::InvalidType, "name must be a string"),
        }
    }
    if payload.get("enabled").is_some_and(|enabled| !enabled.is_boolean()) {
        report.error("enabled", IssueCode::InvalidType, "enabled must be a boolean");
    }
    if let Some(parent) = payload.get("parent").and_then(Value::as_str) {
        if parent == path {
            report.error("parent", IssueCode::InvalidName, "a project cannot inherit from itself");
        }
    }
}

fn validate_view(action: &Action, report: &mut ValidationReport) {
    let payload = action.payload();
    if action.action_type() == ActionType::Create {
        match payload.get("root") {
            Some(Value::Object(root)) => {
                if !has_text(root, "type") {
                    report.error("root.type", IssueCode::Required, "root component type is required");
                }
            }
            Some(_) => report.error("root", IssueCode::InvalidType, "root must be an object"),
            None => report.error("root", IssueCode::Required, "views need a root component"),
        }
    }
    if let Some(root) = payload.get("root").and_then(Value::as_object) {
        if root.get("children").is_some_and(|children| !children.is_array()) {
            report.error("root.children", IssueCode::InvalidType, "children must be an array");
        }
    }
}

fn validate_script(action: &Action, report: &mut ValidationReport) {
    let path = action.resource_path();
    if !path.is_empty() && !path.split(['/', '.']).all(is_identifier) {
        report.error(
            "resourcePath",
            IssueCode::InvalidPath,
            "script paths are identifiers separated by `/` or `.`",
        );
    }

    let payload = action.payload();
    match payload.get("code") {
        Some(Value::String(code)) => {
            if code.trim().is_empty() && action.action_type() == ActionType::Create {
                report.error("code", IssueCode::Required, "script code must not be empty");
            }
            if let Err(problem) = check_delimiters(code, CommentStyle::Hash) {
                report.error("code", IssueCode::UnbalancedDelimiter, problem);
            }
            if has_mixed_indentation(code) {
                report.warn("code", IssueCode::MixedIndentation, "code mixes tabs and spaces");
            }
        }
        Some(_) => report.error("code", IssueCode::InvalidType, "code must be a string"),
        None if action.action_type() == ActionType::Create => {
            report.error("code", IssueCode::Required, "code is required")
        }
        None => {}
    }
}

fn validate_named_query(action: &Action, report: &mut ValidationReport) {
    let payload = action.payload();
    check_enum(payload, "queryType", QUERY_TYPES, report);
    if action.action_type() == ActionType::Create && !payload.contains_key("queryType") {
        report.note("queryType", IssueCode::DefaultApplied, "queryType defaults to Query");
    }

    let query = payload.get("query").and_then(Value::as_str);
    if action.action_type() == ActionType::Create && query.map_or(true, |q| q.trim().is_empty()) {
        report.error("query", IssueCode::Required, "query text is required");
    }
    if let Some(query) = query {
        if let Err(problem) = check_delimiters(query, CommentStyle::Sql) {
            report.error("query", IssueCode::UnbalancedDelimiter, problem);
        }
    }

    let mut declared = BTreeSet::new();
    match payload.get("parameters") {
        None => {}
        Some(Value::Array(parameters)) => {
            for (index, parameter) in parameters.iter().enumerate() {
                let field = format!("parameters[{index}]");
                let Some(parameter) = parameter.as_object() else {
                    report.error(field, IssueCode::InvalidType, "parameter must be an object");
                    continue;
                };
                match parameter.get("name").and_then(Value::as_str) {
                    Some(name) if is_identifier(name) => {
                        declared.insert(name.to_string());
                    }
                    _ => report.error(
                        format!("{field}.name"),
                        IssueCode::Required,
                        "parameter name must be an identifier",
                    ),
                }
                match parameter.get("sqlType").and_then(Value::as_str) {
                    Some(sql_type) if SQL_PARAMETER_TYPES.contains(&sql_type) => {}
                    Some(sql_type) => report.error(
                        format!("{field}.sqlType"),
                        IssueCode::InvalidEnum,
                        format!("unsupported sqlType `{sql_type}`"),
                    ),
                    None => report.error(
                        format!("{field}.sqlType"),
                        IssueCode::Required,
                        "parameter sqlType is required",
                    ),
                }
            }
        }
        Some(_) => report.error("parameters", IssueCode::InvalidType, "parameters must be an array"),
    }

    if let Some(query) = query {
        let referenced = parameter_references(query);
        for name in referenced.difference(&declared) {
            report.warn(
                "query",
                IssueCode::UndeclaredParameter,
                format!("parameter `:{name}` is referenced but not declared"),
            );
        }
        for name in declared.difference(&referenced) {
            report.note(
                "parameters",
                IssueCode::UnusedParameter,
                format!("parameter `{name}` is declared but never referenced"),
            );
        }
    }
}

fn validate_gateway_config(action: &Action, report: &mut ValidationReport) {
    let path = action.resource_path();
    if !path.is_empty() && path != "gateway" && !GATEWAY_CONFIG_SECTIONS.contains(&path) {
        report.warn(
            "resourcePath",
            IssueCode::UnknownSection,
            format!("`{path}` is not a known configuration section"),
        );
    }
    if action.action_type() != ActionType::Update {
        return;
    }
    let payload = action.payload();
    if payload.is_empty() {
        report.error("payload", IssueCode::EmptyPayload, "configuration update is empty");
    }
    if path.is_empty() || path == "gateway" {
        for section in payload.keys() {
            if !GATEWAY_CONFIG_SECTIONS.contains(&section.as_str()) {
                report.warn(
                    section.clone(),
                    IssueCode::UnknownSection,
                    format!("`{section}` is not a known configuration section"),
                );
            }
        }
    }
}

fn check_enum(
    payload: &Map<String, Value>,
    field: &str,
    allowed: &[&str],
    report: &mut ValidationReport,
) {
    match payload.get(field) {
        None => {}
        Some(Value::String(value)) if allowed.contains(&value.as_str()) => {}
        Some(Value::String(value)) => report.error(
            field,
            IssueCode::InvalidEnum,
            format!("`{value}` is not one of {}", allowed.join(", ")),
        ),
        Some(_) => report.error(field, IssueCode::InvalidType, format!("{field} must be a string")),
    }
}

fn numeric_field(
    payload: &Map<String, Value>,
    field: &str,
    report: &mut ValidationReport,
) -> Option<f64> {
    let value = payload.get(field)?;
    let number = value.as_f64();
    if number.is_none() {
        report.error(field, IssueCode::InvalidType, format!("{field} must be a number"));
    }
    number
}

fn has_text(payload: &Map<String, Value>, field: &str) -> bool {
    payload.get(field).and_then(Value::as_str).is_some_and(|text| !text.trim().is_empty())
}

fn is_identifier(segment: &str) -> bool {
    let mut chars = segment.chars();
    chars.next().is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_project_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'))
}

fn has_mixed_indentation(code: &str) -> bool {
    let mut tabs = false;
    let mut spaces = false;
    for line in code.lines() {
        let indent: String = line.chars().take_while(|c| *c == ' ' || *c == '\t').collect();
        tabs |= indent.contains('\t');
        spaces |= indent.contains(' ');
    }
    tabs && spaces
}

/// `:name` placeholders outside string literals.
fn parameter_references(query: &str) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    let chars: Vec<char> = query.chars().collect();
    let mut in_string = false;
    let mut index = 0;
    while index < chars.len() {
        let c = chars[index];
        if c == '\'' {
            in_string = !in_string;
        } else if c == ':' && !in_string {
            // `::type` casts are not parameters.
            if chars.get(index + 1) == Some(&':') {
                index += 2;
                continue;
            }
            let name: String = chars[index + 1..]
                .iter()
                .take_while(|c| c.is_ascii_alphanumeric() || **c == '_')
                .collect();
            if is_identifier(&name) {
                index += name.len();
                names.insert(name);
            }
        }
        index += 1;
    }
    names
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommentStyle {
    None,
    /// `#` to end of line.
    Hash,
    /// `--` to end of line and `/* */` blocks.
    Sql,
}

/// Checks that `()`, `[]` and `{}` pair up, skipping string literals and
/// comments. Returns a description of the first problem found.
pub fn check_delimiters(text: &str, comments: CommentStyle) -> Result<(), String> {
    let chars: Vec<char> = text.chars().collect();
    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut line = 1;
    let mut index = 0;

    while index < chars.len() {
        let c = chars[index];
        let next = chars.get(index + 1).copied();
        match c {
            '\n' => line += 1,
            '#' if comments == CommentStyle::Hash => {
                while index < chars.len() && chars[index] != '\n' {
                    index += 1;
                }
                continue;
            }
            '-' if comments == CommentStyle::Sql && next == Some('-') => {
                while index < chars.len() && chars[index] != '\n' {
                    index += 1;
                }
                continue;
            }
            '/' if comments == CommentStyle::Sql && next == Some('*') => {
                index += 2;
                while index < chars.len()
                    && !(chars[index] == '*' && chars.get(index + 1) == Some(&'/'))
                {
                    if chars[index] == '\n' {
                        line += 1;
                    }
                    index += 1;
                }
                if index >= chars.len() {
                    return Err("unterminated block comment".to_string());
                }
                index += 2;
                continue;
            }
            '\'' | '"' => {
                let quote = c;
                let triple = next == Some(quote) && chars.get(index + 2) == Some(&quote);
                let start_line = line;
                index += if triple { 3 } else { 1 };
                loop {
                    let Some(&current) = chars.get(index) else {
                        return Err(format!("unterminated string starting on line {start_line}"));
                    };
                    if current == '\\' && comments != CommentStyle::Sql {
                        index += 2;
                        continue;
                    }
                    if current == '\n' {
                        line += 1;
                        if !triple && comments != CommentStyle::Sql {
                            return Err(format!(
                                "unterminated string starting on line {start_line}"
                            ));
                        }
                    }
                    if current == quote {
                        if !triple {
                            index += 1;
                            break;
                        }
                        if chars.get(index + 1) == Some(&quote)
                            && chars.get(index + 2) == Some(&quote)
                        {
                            index += 3;
                            break;
                        }
                    }
                    index += 1;
                }
                continue;
            }
            '(' | '[' | '{' => stack.push((c, line)),
            ')' | ']' | '}' => {
                let expected = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                match stack.pop() {
                    Some((open, _)) if open == expected => {}
                    Some((open, open_line)) => {
                        return Err(format!(
                            "`{c}` on line {line} does not close `{open}` from line {open_line}"
                        ));
                    }
                    None => return Err(format!("unmatched `{c}` on line {line}")),
                }
            }
            _ => {}
        }
        index += 1;
    }

    match stack.pop() {
        Some((open, open_line)) => Err(format!("`{open}` opened on line {open_line} is never closed")),
        None => Ok(()),
    }
}
