//! Pattern libraries for log classification
//!
//! Tables are ordered: the first matching error pattern decides the
//! primary category of a line. All patterns are case-insensitive.

use lazy_static::lazy_static;
use regex::Regex;

/// A compiled, named log pattern
#[derive(Debug)]
pub struct Pattern {
    pub name: &'static str,
    pub regex: Regex,
    /// Category used for the `category:` tag (error patterns only)
    pub category: Option<&'static str>,
    /// Part of the critical subset
    pub critical: bool,
}

impl Pattern {
    pub fn is_match(&self, message: &str) -> bool {
        self.regex.is_match(message)
    }
}

type Source = (&'static str, &'static str, Option<&'static str>, bool);

const APPLICATION: Option<&str> = Some("application");
const HTTP: Option<&str> = Some("http");
const DATABASE: Option<&str> = Some("database");
const NETWORK: Option<&str> = Some("network");
const MEMORY: Option<&str> = Some("memory");
const FILESYSTEM: Option<&str> = Some("filesystem");
const AUTHENTICATION: Option<&str> = Some("authentication");
const SECURITY: Option<&str> = Some("security");
const CRITICAL: Option<&str> = Some("critical");

const ERROR_SOURCES: &[Source] = &[
    ("exception", r"exception|error|fatal|panic|crash|abort", APPLICATION, false),
    ("stack_trace", r"stack trace|traceback|at .+:\d+:\d+", None, false),
    ("null_pointer", r"null pointer|nullptr|undefined is not|cannot read property.*undefined", APPLICATION, false),
    ("type_error", r"type error|invalid type|unexpected type", APPLICATION, false),
    ("syntax_error", r"syntax error|parse error|invalid syntax", APPLICATION, false),
    ("reference_error", r"reference error|is not defined|undefined reference", APPLICATION, false),
    ("assertion_error", r"assertion.*failed|assert.*error", APPLICATION, false),
    ("http_400", r"\b400\b|bad request", HTTP, false),
    ("http_401", r"\b401\b|unauthorized", HTTP, false),
    ("http_403", r"\b403\b|forbidden|access denied", HTTP, false),
    ("http_404", r"\b404\b|not found", HTTP, false),
    ("http_500", r"\b500\b|internal server error", HTTP, false),
    ("http_502", r"\b502\b|bad gateway", HTTP, false),
    ("http_503", r"\b503\b|service unavailable", HTTP, false),
    ("http_504", r"\b504\b|gateway timeout", HTTP, false),
    ("database_connection", r"database.*(?:error|failed|refused)|db.*connection.*(?:error|failed)|cannot connect.*database", DATABASE, true),
    ("database_timeout", r"database.*timeout|db.*timeout|query.*timed out", DATABASE, false),
    ("database_deadlock", r"deadlock|lock wait timeout|lock.*error", DATABASE, false),
    ("database_constraint", r"constraint.*violation|foreign key.*constraint|unique.*constraint|integrity.*constraint", DATABASE, false),
    ("database_query", r"query.*error|sql.*error|invalid.*query|syntax error.*sql", DATABASE, false),
    ("network_timeout", r"network.*timeout|connection.*timeout|timed out|etimedout", NETWORK, false),
    ("network_refused", r"connection refused|econnrefused|target machine actively refused", NETWORK, false),
    ("network_reset", r"connection reset|econnreset|connection.*aborted", NETWORK, false),
    ("network_unreachable", r"network.*unreachable|host.*unreachable|no route to host|enetunreach", NETWORK, false),
    ("dns_error", r"dns.*error|dns.*failed|getaddrinfo.*failed|enotfound", NETWORK, false),
    ("out_of_memory", r"out of memory|\boom\b|memory.*exhausted|cannot allocate memory|heap.*overflow", MEMORY, true),
    ("memory_leak", r"memory leak|leak detected", MEMORY, false),
    ("stack_overflow", r"stack overflow|recursion.*limit|maximum call stack", MEMORY, false),
    ("file_not_found", r"file not found|enoent|no such file|cannot find.*file", FILESYSTEM, false),
    ("permission_denied", r"permission denied|eacces|access.*denied|forbidden", FILESYSTEM, false),
    ("disk_full", r"disk full|no space left|enospc|storage.*full", FILESYSTEM, true),
    ("file_read_error", r"failed to read|read.*error|cannot read.*file", FILESYSTEM, false),
    ("file_write_error", r"failed to write|write.*error|cannot write.*file", FILESYSTEM, false),
    ("auth_failed", r"authentication.*failed|auth.*error|login.*failed|invalid.*credentials", AUTHENTICATION, false),
    ("token_invalid", r"invalid token|token.*expired|token.*revoked|jwt.*invalid", AUTHENTICATION, false),
    ("session_expired", r"session.*expired|session.*invalid|session.*not found", AUTHENTICATION, false),
    ("unauthorized", r"unauthorized|not authorized|insufficient.*permissions", AUTHENTICATION, false),
    ("api_error", r"api.*error|api.*failed|api call.*failed", None, false),
    ("rate_limit_exceeded", r"rate limit.*exceeded|too many requests|quota.*exceeded", None, false),
    ("invalid_request", r"invalid request|malformed request|bad request", None, false),
    ("config_missing", r"config.*error|configuration.*missing|required.*config|missing.*environment", None, false),
    ("config_invalid", r"invalid.*config|config.*invalid|malformed.*config", None, false),
    ("ssl_error", r"ssl.*error|tls.*error|certificate.*error|handshake.*failed", SECURITY, false),
    ("certificate_invalid", r"certificate.*invalid|certificate.*expired|untrusted.*certificate", SECURITY, false),
    ("container_error", r"container.*error|docker.*error|container.*failed", None, false),
    ("image_not_found", r"image not found|pull.*failed|manifest.*not found", None, false),
    ("queue_error", r"queue.*error|enqueue.*failed|dequeue.*failed", None, false),
    ("message_error", r"message.*error|failed.*publish|failed.*consume", None, false),
    ("cache_error", r"cache.*error|redis.*error|memcached.*error", None, false),
    ("cache_connection_failed", r"cache.*connection.*failed|redis.*connection.*refused", None, false),
    ("validation_error", r"validation.*error|validation.*failed|invalid.*input", None, false),
    ("schema_error", r"schema.*error|schema.*validation|invalid.*schema", None, false),
    ("json_error", r"json.*error|invalid json|cannot parse json|unexpected token", None, false),
    ("xml_error", r"xml.*error|invalid xml|cannot parse xml", None, false),
    ("yaml_error", r"yaml.*error|invalid yaml|cannot parse yaml", None, false),
    ("timeout", r"timeout|timed out|deadline exceeded|operation.*timeout", None, false),
    ("race_condition", r"race condition|concurrent.*modification|lock.*error", None, false),
    ("stripe_error", r"stripe.*error|payment.*failed|charge.*failed", None, false),
    ("aws_error", r"aws.*error|s3.*error|ec2.*error|lambda.*error", None, false),
    ("gcp_error", r"gcp.*error|google.*cloud.*error", None, false),
    ("kafka_error", r"kafka.*error|producer.*error|consumer.*error|broker.*error", None, false),
    ("rabbitmq_error", r"rabbitmq.*error|amqp.*error", None, false),
    ("elasticsearch_error", r"elasticsearch.*error|es.*error|index.*error", None, false),
    ("transaction_failed", r"transaction.*failed|rollback|transaction.*error", None, false),
    ("operation_failed", r"operation.*failed|failed to.*process|processing.*error", None, false),
    ("security_error", r"security.*error|security.*violation|intrusion.*detected", SECURITY, true),
    ("injection_attempt", r"sql injection|xss.*attempt|injection.*detected", SECURITY, false),
    ("resource_exhausted", r"resource.*exhausted|no.*resources|limit.*reached", None, false),
    ("port_in_use", r"port.*in use|address.*in use|eaddrinuse", None, false),
    ("process_failed", r"process.*failed|process.*died|process.*crashed", None, false),
    ("worker_error", r"worker.*error|worker.*failed|worker.*crashed", None, false),
    ("data_corruption", r"data.*corrupt|corrupt.*data|invalid.*data", CRITICAL, true),
    ("serialization_error", r"serialization.*error|cannot.*serialize|marshal.*error", None, false),
    ("deserialization_error", r"deserialization.*error|cannot.*deserialize|unmarshal.*error", None, false),
    ("plugin_error", r"plugin.*error|plugin.*failed|module.*error", None, false),
    ("dependency_error", r"dependency.*error|missing.*dependency|cannot.*resolve", None, false),
    ("backup_failed", r"backup.*failed|backup.*error", None, false),
    ("restore_failed", r"restore.*failed|restore.*error", None, false),
    ("kernel_panic", r"kernel panic|system.*crash|critical.*system", CRITICAL, true),
    ("segmentation_fault", r"segmentation fault|segfault|sigsegv", CRITICAL, true),
];

const WARNING_SOURCES: &[(&str, &str)] = &[
    ("slow_query", r"slow query|query.*took.*\d+ms|execution time exceeded"),
    ("high_latency", r"high latency|latency.*exceeded|response.*slow"),
    ("slow_response", r"slow response|timeout warning|taking longer than expected"),
    ("high_memory", r"memory usage.*high|approaching memory limit|memory.*\d+%"),
    ("high_cpu", r"cpu usage.*high|high cpu load|cpu.*\d+%"),
    ("disk_space", r"disk space.*low|running out of disk|disk.*\d+%.*full"),
    ("high_load", r"high load average|load.*exceeded|system load"),
    ("connection_pool_low", r"connection pool.*low|few connections available|pool.*exhausted"),
    ("connection_retry", r"retrying connection|connection attempt|reconnecting"),
    ("connection_slow", r"slow connection|connection.*slow|network.*degraded"),
    ("deadlock_warning", r"deadlock detected|deadlock warning|lock timeout"),
    ("replication_lag", r"replication lag|replica.*behind|sync.*delayed"),
    ("query_timeout", r"query timeout|statement timeout|execution.*cancelled"),
    ("cache_miss", r"cache miss|cache.*not found|cache.*expired"),
    ("cache_eviction", r"cache eviction|cache.*full|evicting.*entries"),
    ("rate_limit_approaching", r"approaching rate limit|rate limit.*warning|\d+% of rate limit"),
    ("deprecation", r"deprecated|deprecation warning|will be removed"),
    ("api_version_old", r"old api version|api.*outdated|upgrade.*api"),
    ("auth_retry", r"authentication retry|auth.*attempt|login attempt"),
    ("token_expiring", r"token expiring|token.*expire soon|refresh.*token"),
    ("session_expiring", r"session expiring|session.*timeout|logout.*soon"),
    ("config_missing", r"config.*missing|configuration.*not found|default.*config"),
    ("config_deprecated", r"config.*deprecated|setting.*obsolete|parameter.*old"),
    ("file_not_found", r"file not found|missing file|cannot find file"),
    ("permission_issue", r"permission warning|access.*limited|insufficient.*permissions"),
    ("dns_warning", r"dns.*warning|dns.*slow|name resolution.*slow"),
    ("tls_warning", r"tls.*warning|ssl.*warning|certificate.*expiring"),
    ("queue_size", r"queue size.*large|queue.*growing|backlog.*increasing"),
    ("message_delay", r"message.*delayed|processing.*slow|consumer.*lagging"),
    ("service_unavailable", r"service temporarily unavailable|service.*degraded|partial outage"),
    ("health_check_warning", r"health check warning|unhealthy.*endpoint|service.*slow"),
    ("data_inconsistency", r"data inconsistency|data mismatch|validation warning"),
    ("data_loss", r"potential data loss|data.*not saved|incomplete.*data"),
    ("retry_attempt", r"retry attempt|retrying|attempt \d+ of \d+"),
    ("backoff", r"backing off|exponential backoff|retry.*delayed"),
    ("external_service_slow", r"external service.*slow|third.*party.*delayed|api.*unresponsive"),
    ("webhook_warning", r"webhook.*warning|callback.*delayed|notification.*failed"),
    ("thread_pool_warning", r"thread pool.*warning|threads.*exhausted|worker.*unavailable"),
    ("file_descriptors", r"file descriptor.*warning|too many.*open files|fd limit"),
    ("gc_warning", r"gc.*warning|garbage collection.*long|gc pause"),
    ("suspicious_activity", r"suspicious activity|unusual behavior|anomaly detected"),
    ("brute_force", r"brute.*force.*attempt|multiple.*failed.*login|repeated.*auth.*failure"),
    ("rollback_warning", r"rollback.*initiated|reverting.*deployment|version.*downgrade"),
    ("migration_warning", r"migration.*warning|schema.*change|data.*migration"),
    ("generic_warning", r"\bwarning\b|\bwarn\b"),
];

const INFO_SOURCES: &[(&str, &str)] = &[
    ("startup", r"starting|started|initializing|initialized|ready|listening on"),
    ("shutdown", r"stopping|stopped|shutting down|graceful shutdown|cleanup"),
    ("http_request", r"get|post|put|patch|delete|http request|incoming request"),
    ("http_success", r"\b2\d{2}\b|status.*200|success|ok\b"),
    ("db_connect", r"database connected|db.*connected|connection established"),
    ("db_query", r"executing query|query executed|sql:"),
    ("db_migration", r"migration.*complete|schema.*updated|migrated"),
    ("cache_hit", r"cache hit|cached|from cache"),
    ("cache_set", r"cache set|cached|storing in cache"),
    ("user_login", r"user.*logged in|login successful|authenticated"),
    ("user_logout", r"user.*logged out|logout|session.*ended"),
    ("file_read", r"reading file|file loaded|opened file"),
    ("file_write", r"writing file|file saved|created file"),
    ("config_loaded", r"config.*loaded|configuration.*loaded|settings.*loaded"),
    ("health_check", r"health check|health.*ok|ping.*success"),
    ("generic_info", r"\binfo\b|\binformation\b"),
];

fn compile(source: &str) -> Regex {
    Regex::new(&format!("(?i){}", source)).expect("built-in log pattern must compile")
}

lazy_static! {
    /// Error patterns, including the critical subset
    pub static ref ERROR_PATTERNS: Vec<Pattern> = ERROR_SOURCES
        .iter()
        .map(|&(name, source, category, critical)| Pattern {
            name,
            regex: compile(source),
            category,
            critical,
        })
        .collect();

    /// Warning patterns
    pub static ref WARNING_PATTERNS: Vec<Pattern> = WARNING_SOURCES
        .iter()
        .map(|&(name, source)| Pattern {
            name,
            regex: compile(source),
            category: None,
            critical: false,
        })
        .collect();

    /// Informational patterns
    pub static ref INFO_PATTERNS: Vec<Pattern> = INFO_SOURCES
        .iter()
        .map(|&(name, source)| Pattern {
            name,
            regex: compile(source),
            category: None,
            critical: false,
        })
        .collect();
}

pub fn matches_critical(message: &str) -> bool {
    ERROR_PATTERNS
        .iter()
        .any(|p| p.critical && p.is_match(message))
}

pub fn matches_error(message: &str) -> bool {
    ERROR_PATTERNS.iter().any(|p| p.is_match(message))
}

pub fn matches_warning(message: &str) -> bool {
    WARNING_PATTERNS.iter().any(|p| p.is_match(message))
}

pub fn matches_info(message: &str) -> bool {
    INFO_PATTERNS.iter().any(|p| p.is_match(message))
}

/// Error patterns matched by a message
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ErrorMatches {
    pub names: Vec<&'static str>,
    pub is_critical: bool,
    /// Category of the first matched pattern that has one
    pub category: Option<&'static str>,
}

pub fn matching_errors(message: &str) -> ErrorMatches {
    let mut matches = ErrorMatches::default();

    for pattern in ERROR_PATTERNS.iter().filter(|p| p.is_match(message)) {
        matches.names.push(pattern.name);
        matches.is_critical |= pattern.critical;
        if matches.category.is_none() {
            matches.category = pattern.category;
        }
    }

    matches
}

pub fn matching_warnings(message: &str) -> Vec<&'static str> {
    WARNING_PATTERNS
        .iter()
        .filter(|p| p.is_match(message))
        .map(|p| p.name)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_patterns_compile() {
        assert_eq!(ERROR_PATTERNS.len(), ERROR_SOURCES.len());
        assert_eq!(WARNING_PATTERNS.len(), WARNING_SOURCES.len());
        assert_eq!(INFO_PATTERNS.len(), INFO_SOURCES.len());
    }

    #[test]
    fn test_critical_subset() {
        let critical: Vec<&str> = ERROR_PATTERNS
            .iter()
            .filter(|p| p.critical)
            .map(|p| p.name)
            .collect();

        assert_eq!(
            critical,
            vec![
                "database_connection",
                "out_of_memory",
                "disk_full",
                "security_error",
                "data_corruption",
                "kernel_panic",
                "segmentation_fault",
            ]
        );
    }

    #[test]
    fn test_oom_requires_word_boundary() {
        assert!(matches_critical("Killed process 42 (java): OOM"));
        assert!(!matches_critical("meeting room booked"));
    }

    #[test]
    fn test_database_timeout_is_database_category() {
        let matches = matching_errors("database connection timeout");

        assert_eq!(matches.names.first(), Some(&"database_timeout"));
        assert!(matches.names.contains(&"network_timeout"));
        assert!(!matches.is_critical);
        assert_eq!(matches.category, Some("database"));
    }

    #[test]
    fn test_case_insensitive() {
        assert!(matches_error("ECONNREFUSED 10.0.0.1:5432"));
        assert!(matches_warning("WARN cache miss for key"));
        assert!(matches_info("Server listening on :8080"));
    }

    #[test]
    fn test_category_falls_through_uncategorised_matches() {
        // "timeout" alone has no category of its own
        let matches = matching_errors("deadline exceeded");
        assert_eq!(matches.names, vec!["timeout"]);
        assert_eq!(matches.category, None);
    }
}
