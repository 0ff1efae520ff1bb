//! ResultTransformer: normalize and truncate the results file.
//!
//! The speed test writes a comma-delimited file with a header row and one
//! row per tested address. Before publishing, each address gets the test
//! port appended (so consumers get a dialable endpoint) and the file is
//! capped to a fixed number of data rows. Rows whose address is empty,
//! commented out with `#`, or already suffixed are left byte-identical, so
//! a repeated pass is a no-op.

use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Field delimiter of the results file.
const DELIMITER: char = ',';

/// Comment marker: rows whose address starts with this are skipped.
const COMMENT_MARKER: char = '#';

/// Errors from the transform step.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    /// The results file does not exist.
    #[error("results file not found at {path}")]
    MissingFile { path: PathBuf },

    /// Reading or rewriting the file failed.
    #[error("failed to rewrite {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Summary of one transform pass, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformOutcome {
    /// Lines in the rewritten file, header included.
    pub total_lines: usize,
    /// Data rows whose address field was suffixed this pass.
    pub suffixed: usize,
    /// Data rows discarded by truncation.
    pub dropped: usize,
}

impl TransformOutcome {
    /// Whether the pass changed the file at all.
    pub fn modified(&self) -> bool {
        self.suffixed > 0 || self.dropped > 0
    }
}

/// Rewrites the results file in place.
#[derive(Debug, Clone)]
pub struct Transformer {
    max_data_rows: usize,
    port_suffix: String,
}

impl Transformer {
    /// Create a transformer keeping at most `max_data_rows` rows and
    /// appending `port_suffix` to address fields.
    pub fn new(max_data_rows: usize, port_suffix: impl Into<String>) -> Self {
        Self {
            max_data_rows,
            port_suffix: port_suffix.into(),
        }
    }

    /// Transform the file at `path`, rewriting it atomically.
    pub fn transform(&self, path: &Path) -> Result<TransformOutcome, TransformError> {
        if !path.exists() {
            return Err(TransformError::MissingFile {
                path: path.to_path_buf(),
            });
        }

        let contents = std::fs::read_to_string(path).map_err(|source| TransformError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let lines: Vec<&str> = contents.lines().collect();

        if lines.len() < 2 {
            debug!(path = %path.display(), "Results file has no data rows; nothing to do");
            return Ok(TransformOutcome {
                total_lines: lines.len(),
                suffixed: 0,
                dropped: 0,
            });
        }

        let mut rewritten: Vec<String> = Vec::with_capacity(lines.len());
        rewritten.push(lines[0].to_string());

        let mut suffixed = 0;
        for line in &lines[1..] {
            let (row, changed) = self.rewrite_row(line);
            if changed {
                suffixed += 1;
            }
            rewritten.push(row);
        }

        let max_lines = self.max_data_rows + 1;
        let dropped = rewritten.len().saturating_sub(max_lines);
        rewritten.truncate(max_lines);

        // Write to a sibling temp file and rename over the original, so a
        // crash mid-write cannot lose the file.
        let tmp_path = sibling_tmp_path(path);
        let mut data = rewritten.join("\n");
        data.push('\n');
        std::fs::write(&tmp_path, data).map_err(|source| TransformError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        std::fs::rename(&tmp_path, path).map_err(|source| TransformError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let outcome = TransformOutcome {
            total_lines: rewritten.len(),
            suffixed,
            dropped,
        };
        info!(
            path = %path.display(),
            total_lines = outcome.total_lines,
            suffixed = outcome.suffixed,
            dropped = outcome.dropped,
            "Results file rewritten"
        );
        Ok(outcome)
    }

    /// Rewrite one data row. Returns the new row text and whether the
    /// address field was suffixed.
    fn rewrite_row(&self, line: &str) -> (String, bool) {
        if self.port_suffix.is_empty() {
            return (line.to_string(), false);
        }

        let mut fields: Vec<&str> = line.split(DELIMITER).collect();
        let address = fields[0].trim();

        if address.is_empty()
            || address.starts_with(COMMENT_MARKER)
            || address.ends_with(&self.port_suffix)
        {
            return (line.to_string(), false);
        }

        let suffixed = format!("{}{}", address, self.port_suffix);
        fields[0] = &suffixed;
        (fields.join(","), true)
    }
}

fn sibling_tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "result.csv".into());
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_results(dir: &Path, rows: &[&str]) -> PathBuf {
        let path = dir.join("result.csv");
        let mut data = rows.join("\n");
        data.push('\n');
        std::fs::write(&path, data).unwrap();
        path
    }

    fn read_lines(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn missing_file_is_an_error() {
        let transformer = Transformer::new(20, ":8443");
        let err = transformer.transform(Path::new("/nonexistent/result.csv"));
        assert!(matches!(err, Err(TransformError::MissingFile { .. })));
    }

    #[test]
    fn header_only_file_is_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_results(dir.path(), &["IP,Sent,Received,Loss,Latency,Speed"]);

        let outcome = Transformer::new(20, ":8443").transform(&path).unwrap();
        assert_eq!(outcome.suffixed, 0);
        assert_eq!(outcome.dropped, 0);
        assert_eq!(read_lines(&path), vec!["IP,Sent,Received,Loss,Latency,Speed"]);
    }

    #[test]
    fn addresses_get_suffixed_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_results(
            dir.path(),
            &[
                "IP,Sent,Received",
                "104.16.1.1,4,4",
                "# 172.64.0.1,4,4",
                ",4,0",
            ],
        );

        let transformer = Transformer::new(20, ":8443");
        let outcome = transformer.transform(&path).unwrap();
        assert_eq!(outcome.suffixed, 1);

        let lines = read_lines(&path);
        assert_eq!(lines[0], "IP,Sent,Received");
        assert_eq!(lines[1], "104.16.1.1:8443,4,4");
        // Comment and empty-address rows stay byte-identical.
        assert_eq!(lines[2], "# 172.64.0.1,4,4");
        assert_eq!(lines[3], ",4,0");
    }

    #[test]
    fn second_pass_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_results(dir.path(), &["IP,Sent", "104.16.1.1,4"]);

        let transformer = Transformer::new(20, ":8443");
        transformer.transform(&path).unwrap();
        let after_first = read_lines(&path);

        let outcome = transformer.transform(&path).unwrap();
        assert_eq!(outcome.suffixed, 0);
        assert!(!outcome.modified());
        assert_eq!(read_lines(&path), after_first);
        assert_eq!(after_first[1], "104.16.1.1:8443,4");
    }

    #[test]
    fn short_file_keeps_all_rows() {
        let dir = tempfile::tempdir().unwrap();
        let rows: Vec<String> = std::iter::once("IP,Speed".to_string())
            .chain((0..5).map(|i| format!("10.0.0.{i},42")))
            .collect();
        let refs: Vec<&str> = rows.iter().map(String::as_str).collect();
        let path = write_results(dir.path(), &refs);

        let outcome = Transformer::new(20, ":8443").transform(&path).unwrap();
        assert_eq!(outcome.dropped, 0);
        assert_eq!(read_lines(&path).len(), 6);
    }

    #[test]
    fn long_file_truncates_preserving_order() {
        let dir = tempfile::tempdir().unwrap();
        let rows: Vec<String> = std::iter::once("IP,Speed".to_string())
            .chain((0..25).map(|i| format!("10.0.0.{i},42")))
            .collect();
        let refs: Vec<&str> = rows.iter().map(String::as_str).collect();
        let path = write_results(dir.path(), &refs);

        let outcome = Transformer::new(20, ":8443").transform(&path).unwrap();
        assert_eq!(outcome.dropped, 5);
        assert_eq!(outcome.total_lines, 21);

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 21);
        assert_eq!(lines[1], "10.0.0.0:8443,42");
        assert_eq!(lines[20], "10.0.0.19:8443,42");
    }

    #[test]
    fn no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_results(dir.path(), &["IP", "1.1.1.1"]);

        Transformer::new(20, ":8443").transform(&path).unwrap();
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
