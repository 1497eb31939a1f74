//! Pattern tables for script and SQL content carried in action payloads.
//!
//! Forbidden matches block the action regardless of `force` or `dryRun`.
//! Risky matches only produce warnings.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanLanguage {
    Script,
    Sql,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Forbidden,
    Risky,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityCategory {
    CommandExecution,
    DynamicEvaluation,
    NetworkAccess,
    FileSystemAccess,
    CredentialAccess,
    Reflection,
    SchemaChange,
    PermissionGrant,
    TimeBasedInjection,
    StringConcatenation,
    UnparameterizedQuery,
    BlockingSleep,
    InfiniteLoop,
    UnboundedMutation,
}

impl SecurityCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CommandExecution => "command_execution",
            Self::DynamicEvaluation => "dynamic_evaluation",
            Self::NetworkAccess => "network_access",
            Self::FileSystemAccess => "file_system_access",
            Self::CredentialAccess => "credential_access",
            Self::Reflection => "reflection",
            Self::SchemaChange => "schema_change",
            Self::PermissionGrant => "permission_grant",
            Self::TimeBasedInjection => "time_based_injection",
            Self::StringConcatenation => "string_concatenation",
            Self::UnparameterizedQuery => "unparameterized_query",
            Self::BlockingSleep => "blocking_sleep",
            Self::InfiniteLoop => "infinite_loop",
            Self::UnboundedMutation => "unbounded_mutation",
        }
    }
}

struct PatternRule {
    regex: Regex,
    category: SecurityCategory,
    description: &'static str,
}

type RuleSpec = (&'static str, SecurityCategory, &'static str);

const SCRIPT_FORBIDDEN_SPECS: &[RuleSpec] = &[
    (
        r"\bos\.(system|popen\d?|exec[lv]p?e?|spawn[lv]p?e?)\s*\(",
        SecurityCategory::CommandExecution,
        "operating system command execution",
    ),
    (r"\bsubprocess\b", SecurityCategory::CommandExecution, "subprocess module usage"),
    (r"\bRuntime\.getRuntime\s*\(", SecurityCategory::CommandExecution, "java runtime exec"),
    (r"\bProcessBuilder\b", SecurityCategory::CommandExecution, "java process builder"),
    (r"\bcommands\.getoutput\s*\(", SecurityCategory::CommandExecution, "shell command output"),
    (r"(?:^|[^.\w])eval\s*\(", SecurityCategory::DynamicEvaluation, "dynamic eval call"),
    (r"(?:^|[^.\w])exec\s*\(", SecurityCategory::DynamicEvaluation, "dynamic exec call"),
    (r"(?:^|[^.\w])exec\s+['\x22]", SecurityCategory::DynamicEvaluation, "exec statement"),
    (r"(?:^|[^.\w])compile\s*\(", SecurityCategory::DynamicEvaluation, "runtime code compilation"),
    (r"\bexecfile\s*\(", SecurityCategory::DynamicEvaluation, "execfile call"),
    (r"__import__\s*\(", SecurityCategory::DynamicEvaluation, "dynamic import"),
    (r"\bimport\s+socket\b", SecurityCategory::NetworkAccess, "raw socket import"),
    (r"\bsocket\.socket\s*\(", SecurityCategory::NetworkAccess, "raw socket creation"),
    (r"\burllib2?\.(urlopen|request)\b", SecurityCategory::NetworkAccess, "direct url access"),
    (r"\bjava\.net\.(Socket|ServerSocket|URL)\b", SecurityCategory::NetworkAccess, "java networking"),
    (r"\bshutil\.(rmtree|move|copy\w*)\s*\(", SecurityCategory::FileSystemAccess, "bulk file operation"),
    (
        r"\bos\.(remove|unlink|rmdir|removedirs|rename|chmod|chown|makedirs)\s*\(",
        SecurityCategory::FileSystemAccess,
        "file system mutation",
    ),
    (
        r"\bjava\.io\.(File|FileWriter|FileOutputStream|FileInputStream|RandomAccessFile)\b",
        SecurityCategory::FileSystemAccess,
        "java file io",
    ),
    (
        r"\bsystem\.file\.(writeFile|readFileAsString|readFileAsBytes|openFile|saveFile)\s*\(",
        SecurityCategory::FileSystemAccess,
        "gateway file access",
    ),
    (r"(?:^|[^.\w])open\s*\(", SecurityCategory::FileSystemAccess, "direct file open"),
    (r"\bos\.environ\b", SecurityCategory::CredentialAccess, "environment variable access"),
    (r"\bos\.getenv\s*\(", SecurityCategory::CredentialAccess, "environment variable access"),
    (r"\bgetpass\b", SecurityCategory::CredentialAccess, "credential prompt"),
    (
        r"(?i)\b(password|passwd|secret|api_?key|token)\s*=\s*['\x22][^'\x22]+['\x22]",
        SecurityCategory::CredentialAccess,
        "hard-coded credential",
    ),
    (r"(?:^|[^.\w])(getattr|setattr|delattr)\s*\(", SecurityCategory::Reflection, "attribute reflection"),
    (
        r"__(globals|builtins|subclasses|class|bases|mro|code)__",
        SecurityCategory::Reflection,
        "interpreter internals access",
    ),
    (r"\bjava\.lang\.reflect\b", SecurityCategory::Reflection, "java reflection"),
    (r"\bClass\.forName\s*\(", SecurityCategory::Reflection, "dynamic class loading"),
];

const SCRIPT_RISKY_SPECS: &[RuleSpec] = &[
    (
        r"\bsystem\.db\.(runQuery|runUpdateQuery|runScalarQuery)\s*\(",
        SecurityCategory::UnparameterizedQuery,
        "direct query without parameters; prefer runPrepQuery or a named query",
    ),
    (r"\btime\.sleep\s*\(", SecurityCategory::BlockingSleep, "blocking sleep in gateway script"),
    (r"\bThread\.sleep\s*\(", SecurityCategory::BlockingSleep, "blocking sleep in gateway script"),
    (r"^\s*while\s+(True|1)\s*:", SecurityCategory::InfiniteLoop, "loop without exit condition"),
];

const SQL_FORBIDDEN_SPECS: &[RuleSpec] = &[
    (
        r"(?i)\b(DROP|TRUNCATE|ALTER)\s+(TABLE|DATABASE|SCHEMA|INDEX|VIEW|USER|LOGIN|PROCEDURE|FUNCTION|TRIGGER)\b",
        SecurityCategory::SchemaChange,
        "schema modification statement",
    ),
    (
        r"(?i)\bCREATE\s+(TABLE|DATABASE|SCHEMA|USER|LOGIN|ROLE|PROCEDURE|FUNCTION|TRIGGER)\b",
        SecurityCategory::SchemaChange,
        "schema creation statement",
    ),
    (r"(?i)\b(GRANT|REVOKE|DENY)\s+\w+", SecurityCategory::PermissionGrant, "permission change"),
    (r"(?i)\bWAITFOR\s+DELAY\b", SecurityCategory::TimeBasedInjection, "time delay injection marker"),
    (r"(?i)\b(PG_)?SLEEP\s*\(", SecurityCategory::TimeBasedInjection, "sleep injection marker"),
    (r"(?i)\bBENCHMARK\s*\(", SecurityCategory::TimeBasedInjection, "benchmark injection marker"),
    (r"(?i)\bLOAD_FILE\s*\(", SecurityCategory::FileSystemAccess, "server file read"),
    (r"(?i)\bINTO\s+(OUT|DUMP)FILE\b", SecurityCategory::FileSystemAccess, "server file write"),
    (r"(?i)\bBULK\s+INSERT\b", SecurityCategory::FileSystemAccess, "bulk file import"),
    (r"(?i)\bOPENROWSET\s*\(", SecurityCategory::FileSystemAccess, "ad hoc remote data access"),
    (r"(?i)\bCOPY\s+\w+\s+(FROM|TO)\s+PROGRAM\b", SecurityCategory::CommandExecution, "copy program"),
    (r"(?i)\bxp_cmdshell\b", SecurityCategory::CommandExecution, "shell execution procedure"),
    (
        r"'\s*(\+|\|\|)\s*[A-Za-z_]\w*",
        SecurityCategory::StringConcatenation,
        "string literal concatenated with an identifier",
    ),
    (
        r"[A-Za-z_]\w*\s*(\+|\|\|)\s*'",
        SecurityCategory::StringConcatenation,
        "identifier concatenated into a string literal",
    ),
];

const SQL_RISKY_SPECS: &[RuleSpec] = &[
    (
        r"(?i)^\s*DELETE\s+FROM\s+[\w.\x22\[\]]+\s*;?\s*$",
        SecurityCategory::UnboundedMutation,
        "delete without a WHERE clause",
    ),
    (
        r"(?i)^\s*UPDATE\s+[\w.\x22\[\]]+\s+SET\s+[^;]*$",
        SecurityCategory::UnboundedMutation,
        "update statement line without a WHERE clause",
    ),
];

fn compile(specs: &[RuleSpec]) -> Vec<PatternRule> {
    specs
        .iter()
        .filter_map(|&(pattern, category, description)| match Regex::new(pattern) {
            Ok(regex) => Some(PatternRule { regex, category, description }),
            Err(error) => {
                tracing::error!(
                    event_name = "security.pattern_invalid",
                    pattern,
                    error = %error,
                    "security pattern failed to compile"
                );
                None
            }
        })
        .collect()
}

static SCRIPT_FORBIDDEN: Lazy<Vec<PatternRule>> = Lazy::new(|| compile(SCRIPT_FORBIDDEN_SPECS));
static SCRIPT_RISKY: Lazy<Vec<PatternRule>> = Lazy::new(|| compile(SCRIPT_RISKY_SPECS));
static SQL_FORBIDDEN: Lazy<Vec<PatternRule>> = Lazy::new(|| compile(SQL_FORBIDDEN_SPECS));
static SQL_RISKY: Lazy<Vec<PatternRule>> = Lazy::new(|| compile(SQL_RISKY_SPECS));

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityFinding {
    pub field: String,
    pub language: ScanLanguage,
    pub category: SecurityCategory,
    pub severity: Severity,
    pub description: String,
    pub matched: String,
    pub line: usize,
}

impl SecurityFinding {
    pub fn summary(&self) -> String {
        format!(
            "{} at {} line {}: `{}`",
            self.description, self.field, self.line, self.matched
        )
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SecurityReport {
    pub findings: Vec<SecurityFinding>,
}

impl SecurityReport {
    pub fn is_blocked(&self) -> bool {
        self.findings.iter().any(|finding| finding.severity == Severity::Forbidden)
    }

    pub fn violations(&self) -> impl Iterator<Item = &SecurityFinding> {
        self.findings.iter().filter(|finding| finding.severity == Severity::Forbidden)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &SecurityFinding> {
        self.findings.iter().filter(|finding| finding.severity == Severity::Risky)
    }
}

/// Stateless scanner over the fixed pattern tables.
#[derive(Clone, Copy, Debug, Default)]
pub struct SecurityScanner;

impl SecurityScanner {
    pub fn scan_script(&self, field: &str, source: &str) -> Vec<SecurityFinding> {
        let mut findings =
            scan_lines(field, source, ScanLanguage::Script, Severity::Forbidden, &SCRIPT_FORBIDDEN);
        findings.extend(scan_lines(
            field,
            source,
            ScanLanguage::Script,
            Severity::Risky,
            &SCRIPT_RISKY,
        ));
        findings
    }

    pub fn scan_sql(&self, field: &str, query: &str) -> Vec<SecurityFinding> {
        let mut findings =
            scan_lines(field, query, ScanLanguage::Sql, Severity::Forbidden, &SQL_FORBIDDEN);
        if !has_where_clause(query) {
            findings.extend(scan_lines(field, query, ScanLanguage::Sql, Severity::Risky, &SQL_RISKY));
        }
        findings
    }

    /// Walks the whole payload. Strings under script-like keys are scanned as
    /// script and strings under query-like keys as SQL, at any depth.
    pub fn scan_payload(&self, payload: &Map<String, Value>) -> SecurityReport {
        let mut report = SecurityReport::default();
        for (key, value) in payload {
            self.walk(key, language_for_key(key), value, &mut report);
        }
        report
    }

    fn walk(
        &self,
        path: &str,
        language: Option<ScanLanguage>,
        value: &Value,
        report: &mut SecurityReport,
    ) {
        match value {
            Value::String(text) => match language {
                Some(ScanLanguage::Script) => report.findings.extend(self.scan_script(path, text)),
                Some(ScanLanguage::Sql) => report.findings.extend(self.scan_sql(path, text)),
                None => {}
            },
            Value::Array(items) => {
                for (index, item) in items.iter().enumerate() {
                    self.walk(&format!("{path}[{index}]"), language, item, report);
                }
            }
            Value::Object(map) => {
                for (key, nested) in map {
                    let nested_path = format!("{path}.{key}");
                    self.walk(&nested_path, language_for_key(key), nested, report);
                }
            }
            _ => {}
        }
    }
}

fn language_for_key(key: &str) -> Option<ScanLanguage> {
    let lowered = key.to_ascii_lowercase();
    if matches!(lowered.as_str(), "code" | "script" | "source")
        || lowered.ends_with("script")
        || (lowered.starts_with("on") && key.chars().nth(2).is_some_and(char::is_uppercase))
    {
        return Some(ScanLanguage::Script);
    }
    if matches!(lowered.as_str(), "query" | "sql") || lowered.ends_with("sql") {
        return Some(ScanLanguage::Sql);
    }
    None
}

fn has_where_clause(query: &str) -> bool {
    query.to_ascii_uppercase().split_whitespace().any(|word| word == "WHERE")
}

fn scan_lines(
    field: &str,
    text: &str,
    language: ScanLanguage,
    severity: Severity,
    rules: &[PatternRule],
) -> Vec<SecurityFinding> {
    let mut findings = Vec::new();
    for (index, line) in text.lines().enumerate() {
        for rule in rules {
            if let Some(found) = rule.regex.find(line) {
                findings.push(SecurityFinding {
                    field: field.to_string(),
                    language,
                    category: rule.category,
                    severity,
                    description: rule.description.to_string(),
                    matched: found.as_str().trim().to_string(),
                    line: index + 1,
                });
            }
        }
    }
    findings
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        SecurityCategory, SecurityScanner, Severity, SCRIPT_FORBIDDEN, SCRIPT_FORBIDDEN_SPECS,
        SCRIPT_RISKY, SCRIPT_RISKY_SPECS, SQL_FORBIDDEN, SQL_FORBIDDEN_SPECS, SQL_RISKY,
        SQL_RISKY_SPECS,
    };

    #[test]
    fn every_pattern_compiles() {
        assert_eq!(SCRIPT_FORBIDDEN.len(), SCRIPT_FORBIDDEN_SPECS.len());
        assert_eq!(SCRIPT_RISKY.len(), SCRIPT_RISKY_SPECS.len());
        assert_eq!(SQL_FORBIDDEN.len(), SQL_FORBIDDEN_SPECS.len());
        assert_eq!(SQL_RISKY.len(), SQL_RISKY_SPECS.len());
    }

    #[test]
    fn os_system_is_a_command_execution_violation() {
        let findings = SecurityScanner.scan_script("code", "import os\nos.system('rm -rf /')");
        let finding = findings
            .iter()
            .find(|finding| finding.category == SecurityCategory::CommandExecution)
            .unwrap();
        assert_eq!(finding.severity, Severity::Forbidden);
        assert_eq!(finding.line, 2);
        assert!(finding.matched.starts_with("os.system"));
    }

    #[test]
    fn method_calls_named_like_builtins_are_not_flagged() {
        let findings = SecurityScanner.scan_script(
            "code",
            "pattern = re.compile(r'\\d+')\nvalue = ast.literal_eval(text)\nlogger.info('ok')",
        );
        assert!(findings.is_empty(), "{findings:?}");
    }

    #[test]
    fn risky_script_shapes_only_warn() {
        let source = "while True:\n    time.sleep(5)\n    system.db.runQuery('SELECT 1')";
        let findings = SecurityScanner.scan_script("code", source);
        assert_eq!(findings.len(), 3);
        assert!(findings.iter().all(|finding| finding.severity == Severity::Risky));
    }

    #[test]
    fn sql_tables_block_ddl_grants_and_injection_markers() {
        for query in [
            "DROP TABLE users",
            "GRANT ALL ON plant TO public",
            "SELECT * FROM t WHERE id = 1; WAITFOR DELAY '0:0:5'",
            "SELECT LOAD_FILE('/etc/passwd')",
            "SELECT * FROM t WHERE name = '' + userName",
        ] {
            let findings = SecurityScanner.scan_sql("query", query);
            assert!(
                findings.iter().any(|finding| finding.severity == Severity::Forbidden),
                "{query}"
            );
        }
    }

    #[test]
    fn parameterized_select_is_clean() {
        let findings =
            SecurityScanner.scan_sql("query", "SELECT id, speed FROM line WHERE id = :lineId");
        assert!(findings.is_empty(), "{findings:?}");
    }

    #[test]
    fn unbounded_delete_is_risky() {
        let findings = SecurityScanner.scan_sql("query", "DELETE FROM downtime");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].category, SecurityCategory::UnboundedMutation);
        assert_eq!(findings[0].severity, Severity::Risky);
    }

    #[test]
    fn payload_walk_reaches_nested_script_and_query_keys() {
        let payload = json!({
            "name": "os.system('harmless text outside a script key')",
            "events": { "onChange": "subprocess.call(['ls'])" },
            "bindings": [{ "query": "DROP TABLE audit" }],
        });
        let report = SecurityScanner.scan_payload(payload.as_object().unwrap());

        assert!(report.is_blocked());
        let fields: Vec<_> = report.violations().map(|finding| finding.field.as_str()).collect();
        assert!(fields.contains(&"events.onChange"));
        assert!(fields.contains(&"bindings[0].query"));
        assert_eq!(report.violations().count(), 2);
    }
}
