//! Deterministic classification of engine execution logs.

/// Markers that flag a failed execution even when the exit code is 0.
///
/// Matching is plain substring search over the combined log; the set is
/// engine-specific and overridable via `engine.error_markers`.
pub const DEFAULT_ERROR_MARKERS: &[&str] =
    &["Traceback", "[ERR]", "Error:", "RuntimeError", "Exception"];

/// Number of trailing log lines kept in failure excerpts.
pub const LOG_TAIL_LINES: usize = 40;

/// Result of classifying one execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Clean,
    Failed {
        /// Short human-readable cause (`engine exited with code 1`, ...).
        reason: String,
        /// Bounded tail of the combined log, for prompt feedback.
        excerpt: String,
    },
}

/// Pluggable log-to-outcome classifier.
///
/// Deterministic: the same exit code, timeout flag, and log always yield the
/// same classification.
#[derive(Debug, Clone)]
pub struct LogClassifier {
    markers: Vec<String>,
    tail_lines: usize,
}

impl LogClassifier {
    pub fn new(markers: Vec<String>) -> Self {
        Self {
            markers,
            tail_lines: LOG_TAIL_LINES,
        }
    }

    /// Classify one execution. Precedence: timeout, exit code, log markers.
    pub fn classify(&self, exit_code: Option<i32>, timed_out: bool, log: &str) -> Classification {
        if timed_out {
            return Classification::Failed {
                reason: "execution timed out".to_string(),
                excerpt: tail_lines(log, self.tail_lines),
            };
        }
        match exit_code {
            Some(0) => {}
            Some(code) => {
                return Classification::Failed {
                    reason: format!("engine exited with code {code}"),
                    excerpt: tail_lines(log, self.tail_lines),
                };
            }
            None => {
                return Classification::Failed {
                    reason: "engine terminated by signal".to_string(),
                    excerpt: tail_lines(log, self.tail_lines),
                };
            }
        }
        for marker in &self.markers {
            if log.contains(marker.as_str()) {
                return Classification::Failed {
                    reason: format!("detected error marker {marker:?} in engine log"),
                    excerpt: tail_lines(log, self.tail_lines),
                };
            }
        }
        Classification::Clean
    }
}

impl Default for LogClassifier {
    fn default() -> Self {
        Self::new(
            DEFAULT_ERROR_MARKERS
                .iter()
                .map(|marker| (*marker).to_string())
                .collect(),
        )
    }
}

/// Keep the last `limit` lines, noting how many were dropped.
pub fn tail_lines(log: &str, limit: usize) -> String {
    let lines: Vec<&str> = log.lines().collect();
    if lines.len() <= limit {
        return lines.join("\n");
    }
    let dropped = lines.len() - limit;
    let mut out = vec![format!("... truncated {dropped} earlier lines ...")];
    out.extend(lines[dropped..].iter().map(|line| (*line).to_string()));
    out.join("\n")
}
