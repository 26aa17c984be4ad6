//! Terminal output
//!
//! Commands print through one [`Output`]. In JSON mode a command writes a
//! single document to stdout with [`Output::json`]; status lines are
//! suppressed and diagnostics go to stderr as JSON objects.

/// Output format selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Human,
    Json,
}

impl OutputFormat {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }

    pub fn is_json(self) -> bool {
        matches!(self, OutputFormat::Json)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Output {
    format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn is_json(&self) -> bool {
        self.format.is_json()
    }

    pub fn success(&self, message: &str) {
        if !self.is_json() {
            println!("\u{2713} {}", message);
        }
    }

    pub fn info(&self, message: &str) {
        if !self.is_json() {
            println!("  {}", message);
        }
    }

    pub fn warn(&self, message: &str) {
        match self.format {
            OutputFormat::Human => eprintln!("\u{26a0} {}", message),
            OutputFormat::Json => eprintln!("{}", serde_json::json!({"warning": message})),
        }
    }

    pub fn error(&self, message: &str) {
        match self.format {
            OutputFormat::Human => eprintln!("\u{2717} {}", message),
            OutputFormat::Json => eprintln!("{}", serde_json::json!({"success": false, "error": message})),
        }
    }

    /// Prints `value` as the command's result document; no-op for humans
    pub fn json(&self, value: &serde_json::Value) {
        if self.is_json() {
            println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
        }
    }

    /// Prints rows with every column but the last padded to a common width
    pub fn table<R: AsRef<[String]>>(&self, rows: &[R]) {
        if self.is_json() {
            return;
        }
        for line in render_table(rows) {
            println!("  {}", line);
        }
    }
}

fn render_table<R: AsRef<[String]>>(rows: &[R]) -> Vec<String> {
    let mut widths: Vec<usize> = Vec::new();
    for row in rows {
        for (i, cell) in row.as_ref().iter().enumerate() {
            let len = cell.chars().count();
            match widths.get_mut(i) {
                Some(width) => *width = (*width).max(len),
                None => widths.push(len),
            }
        }
    }

    rows.iter()
        .map(|row| {
            let cells = row.as_ref();
            cells
                .iter()
                .enumerate()
                .map(|(i, cell)| {
                    if i + 1 == cells.len() {
                        cell.clone()
                    } else {
                        format!("{:<width$}", cell, width = widths[i])
                    }
                })
                .collect::<Vec<_>>()
                .join("  ")
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_flag() {
        assert_eq!(OutputFormat::from_json_flag(true), OutputFormat::Json);
        assert_eq!(OutputFormat::from_json_flag(false), OutputFormat::Human);
        assert!(Output::new(OutputFormat::Json).is_json());
        assert!(!Output::new(OutputFormat::Human).is_json());
    }

    #[test]
    fn test_table_pads_all_but_last_column() {
        let rows = vec![
            vec!["file".to_string(), "sha1:ab".to_string(), "/r/a.txt".to_string()],
            vec!["dir".to_string(), "-".to_string(), "/r/sub".to_string()],
        ];
        assert_eq!(
            render_table(&rows),
            vec!["file  sha1:ab  /r/a.txt".to_string(), "dir   -        /r/sub".to_string()]
        );
    }
}
