//! Extraction of failing tests and lint findings from raw tool output.
//!
//! Parsers are line-based and tolerant: unknown formats simply yield nothing,
//! and the raw log tail still reaches the agent through the context document.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

static PYTEST_SUMMARY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:FAILED|ERROR)\s+(\S+::\S+)").expect("valid regex"));
static PYTEST_VERBOSE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\S+::\S+)\s+(?:FAILED|ERROR)\b").expect("valid regex"));
static CARGO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^test\s+(\S+)\s+\.\.\.\s+FAILED").expect("valid regex"));
static GO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*--- FAIL:\s+(\S+)").expect("valid regex"));

static LINT_LOCATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\S+?:\d+:\d+:?\s+\S.*$").expect("valid regex"));
static LINT_HEADLINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:warning|error)(?:\[[A-Za-z0-9_]+\])?: \S.*$").expect("valid regex"));
static LINT_SUMMARY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:warnings? emitted|generated \d+ warnings?|could not compile|aborting due to)")
        .expect("valid regex")
});

static NO_TESTS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)(?:^no tests ran\b|collected 0 items|\bno test files\b|\bno tests to run\b)")
        .expect("valid regex")
});

/// Failing test identifiers in first-seen order, at most `limit`.
///
/// Recognizes pytest (`FAILED a.py::t`, `a.py::t FAILED`), cargo
/// (`test a::b ... FAILED`), and go (`--- FAIL: TestX`) output.
pub fn parse_failing_tests(output: &str, limit: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for line in output.lines() {
        if ids.len() >= limit {
            break;
        }
        let line = line.trim_end();
        let captured = [&*PYTEST_SUMMARY_RE, &*PYTEST_VERBOSE_RE, &*CARGO_RE, &*GO_RE]
            .iter()
            .find_map(|re| re.captures(line))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string());
        if let Some(id) = captured
            && seen.insert(id.clone())
        {
            ids.push(id);
        }
    }
    ids
}

/// Lint findings in output order, at most `limit`.
pub fn parse_lint_findings(output: &str, limit: usize) -> Vec<String> {
    output
        .lines()
        .map(str::trim_end)
        .filter(|line| LINT_LOCATION_RE.is_match(line) || LINT_HEADLINE_RE.is_match(line))
        .filter(|line| !LINT_SUMMARY_RE.is_match(line))
        .take(limit)
        .map(str::to_string)
        .collect()
}

/// True when the test runner reported that it found nothing to run.
pub fn reports_no_tests(output: &str) -> bool {
    NO_TESTS_RE.is_match(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pytest_summary_and_verbose_lines() {
        let output = "\
tests/test_a.py::test_one PASSED
tests/test_a.py::test_two FAILED                [ 50%]
=========================== short test summary info ============================
FAILED tests/test_a.py::test_two - assert 1 == 2
ERROR tests/test_b.py::test_setup - RuntimeError
";
        assert_eq!(
            parse_failing_tests(output, 10),
            vec!["tests/test_a.py::test_two", "tests/test_b.py::test_setup"]
        );
    }

    #[test]
    fn parses_cargo_and_go_failures() {
        let output = "\
test parser::tests::handles_empty ... ok
test parser::tests::handles_unicode ... FAILED
--- FAIL: TestRoundTrip (0.00s)
";
        assert_eq!(
            parse_failing_tests(output, 10),
            vec!["parser::tests::handles_unicode", "TestRoundTrip"]
        );
    }

    #[test]
    fn failing_tests_respect_limit() {
        let output = (0..20)
            .map(|n| format!("FAILED t.py::case_{n}"))
            .collect::<Vec<_>>()
            .join("\n");
        let ids = parse_failing_tests(&output, 5);
        assert_eq!(ids.len(), 5);
        assert_eq!(ids[0], "t.py::case_0");
        assert_eq!(ids[4], "t.py::case_4");
    }

    #[test]
    fn lint_findings_skip_summaries() {
        let output = "\
src/app.py:3:1: F401 `os` imported but unused
warning: unused variable: `x`
warning: `demo` (lib) generated 1 warning
Found 1 error.
";
        assert_eq!(
            parse_lint_findings(output, 10),
            vec![
                "src/app.py:3:1: F401 `os` imported but unused",
                "warning: unused variable: `x`",
            ]
        );
    }

    #[test]
    fn detects_empty_test_suites() {
        assert!(reports_no_tests("collected 0 items\n\nno tests ran in 0.01s"));
        assert!(reports_no_tests("?   \texample.com/demo\t[no test files]"));
        assert!(!reports_no_tests("running 0 tests\n\ntest result: ok"));
        assert!(!reports_no_tests("1 failed, 2 passed"));
    }
}
