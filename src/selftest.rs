//! Pass/fail bookkeeping for the self tests of `drmtest`
//!
//! Results are printed as they happen:
//!
//! ```text
//! create dma-buf
//!     dma-buf export  : OK
//!     dma-buf mmap    : FAILED (Permission denied)
//! test summary        : 1/2 passed
//! ```

use std::io::{self, Write};

const INDENT_WIDTH: usize = 4;
const NAME_WIDTH: usize = 16;

/// Counts and prints test results
#[derive(Debug)]
pub struct Reporter<W: Write = io::Stderr> {
    out: W,
    head_indent: usize,
    test_indent: usize,
    passed: u32,
    failed: u32,
}

impl Default for Reporter {
    fn default() -> Self {
        Reporter::new(io::stderr())
    }
}

impl<W: Write> Reporter<W> {
    /// Creates a reporter printing to `out`.
    pub fn new(out: W) -> Reporter<W> {
        Reporter::with_indent(out, 0, INDENT_WIDTH)
    }

    /// Creates a reporter with custom indentation of group heads and results.
    pub fn with_indent(out: W, head_indent: usize, test_indent: usize) -> Reporter<W> {
        Reporter {
            out,
            head_indent,
            test_indent,
            passed: 0,
            failed: 0,
        }
    }

    /// Starts a group of tests.
    pub fn head(&mut self, name: &str) {
        let _ = writeln!(self.out, "{:indent$}{}", "", name, indent = self.head_indent);
    }

    /// Prints a `name: value` line at result indentation, not counted as a test.
    pub fn value(&mut self, name: &str, value: &str) {
        let _ = writeln!(
            self.out,
            "{:indent$}{:<width$}: {}",
            "",
            name,
            value,
            indent = self.test_indent,
            width = NAME_WIDTH
        );
    }

    /// Prints a free form line.
    pub fn line(&mut self, text: std::fmt::Arguments<'_>) {
        let _ = writeln!(self.out, "{}", text);
    }

    /// Records and prints a single result.
    pub fn test(&mut self, name: &str, ok: bool, errmsg: Option<&dyn std::fmt::Display>) {
        let mut line = format!(
            "{:indent$}{:<width$}: {}",
            "",
            name,
            if ok { "OK" } else { "FAILED" },
            indent = self.test_indent,
            width = NAME_WIDTH
        );
        if let (false, Some(msg)) = (ok, errmsg) {
            line.push_str(&format!(" ({})", msg));
        }
        let _ = writeln!(self.out, "{}", line);

        if ok {
            self.passed += 1;
        } else {
            self.failed += 1;
        }
    }

    /// Records the outcome of an operation, printing the error on failure.
    pub fn test_result<T, E: std::fmt::Display>(&mut self, name: &str, result: Result<T, E>) -> Option<T> {
        match result {
            Ok(value) => {
                self.test(name, true, None);
                Some(value)
            }
            Err(err) => {
                self.test(name, false, Some(&err));
                None
            }
        }
    }

    /// Number of passed tests
    pub fn passed(&self) -> u32 {
        self.passed
    }

    /// Number of failed tests
    pub fn failed(&self) -> u32 {
        self.failed
    }

    /// Adds results counted elsewhere, e.g. in a child process.
    pub fn add(&mut self, passed: u32, failed: u32) {
        self.passed += passed;
        self.failed += failed;
    }

    /// Prints the summary line if any test ran and returns the exit code.
    pub fn summary(&mut self) -> i32 {
        let total = self.passed + self.failed;
        if total > 0 {
            let _ = writeln!(
                self.out,
                "{:<width$}: {}/{} passed",
                "test summary",
                self.passed,
                total,
                width = NAME_WIDTH + INDENT_WIDTH
            );
        }
        self.exit_code()
    }

    /// 1 if any test failed, 0 otherwise
    pub fn exit_code(&self) -> i32 {
        i32::from(self.failed > 0)
    }

    /// Exit status of a child process reporting its results, see [`decode_status`].
    pub fn status(&self) -> i32 {
        encode_status(self.passed, self.failed)
    }

    /// Returns the output sink.
    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Packs test counts into an exit status: `failed << 4 | passed`, four bits each.
pub fn encode_status(passed: u32, failed: u32) -> i32 {
    ((failed.min(15) << 4) | passed.min(15)) as i32
}

/// Unpacks `(passed, failed)` from an exit status.
pub fn decode_status(status: i32) -> (u32, u32) {
    let status = status as u32 & 0xff;
    (status & 0x0f, status >> 4)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(reporter: Reporter<Vec<u8>>) -> String {
        String::from_utf8(reporter.into_inner()).unwrap()
    }

    #[test]
    fn report_lines() {
        let mut reporter = Reporter::new(Vec::new());
        reporter.head("create dma-buf");
        reporter.test("dma-buf export", true, None);
        reporter.test("dma-buf mmap", false, Some(&"Permission denied"));
        reporter.test("check mmap", false, None);
        assert_eq!(reporter.summary(), 1);
        assert_eq!(
            output(reporter),
            "create dma-buf\n\
             \x20   dma-buf export  : OK\n\
             \x20   dma-buf mmap    : FAILED (Permission denied)\n\
             \x20   check mmap      : FAILED\n\
             test summary        : 1/3 passed\n"
        );
    }

    #[test]
    fn results() {
        let mut reporter = Reporter::new(Vec::new());
        assert_eq!(reporter.test_result("ok", Ok::<_, String>(5)), Some(5));
        assert_eq!(reporter.test_result::<(), _>("bad", Err("nope")), None);
        assert_eq!((reporter.passed(), reporter.failed()), (1, 1));
        assert!(output(reporter).ends_with("bad             : FAILED (nope)\n"));
    }

    #[test]
    fn custom_indent() {
        let mut reporter = Reporter::with_indent(Vec::new(), 3, 6);
        reporter.head("device capabilities");
        reporter.value("prime import", "yes");
        reporter.test("create buffer", true, None);
        reporter.line(format_args!("{}:", "/dev/dri/card0"));
        assert_eq!((reporter.passed(), reporter.failed()), (1, 0));
        assert_eq!(
            output(reporter),
            "   device capabilities\n\
             \x20     prime import    : yes\n\
             \x20     create buffer   : OK\n\
             /dev/dri/card0:\n"
        );
    }

    #[test]
    fn no_tests_no_summary() {
        let mut reporter = Reporter::new(Vec::new());
        assert_eq!(reporter.summary(), 0);
        assert_eq!(output(reporter), "");
    }

    #[test]
    fn fork_status() {
        assert_eq!(encode_status(2, 0), 0x02);
        assert_eq!(encode_status(1, 1), 0x11);
        assert_eq!(decode_status(0x11), (1, 1));
        assert_eq!(decode_status(encode_status(3, 2)), (3, 2));
        assert_eq!(encode_status(20, 20), 0xff);

        let mut parent = Reporter::new(Vec::new());
        parent.test("a", true, None);
        let (passed, failed) = decode_status(encode_status(2, 1));
        parent.add(passed, failed);
        assert_eq!((parent.passed(), parent.failed()), (3, 1));
        assert_eq!(parent.exit_code(), 1);
    }
}
