//! Result rendering and writers.
//!
//! Every result is written as one line to stdout and, optionally, to an
//! output file. Carried errors are logged and never written.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use uncover_sources::ReconResult;

use crate::config::{OutputKind, OutputSection};
use crate::error::{Result, UncoverError};

/// Column names of [`OutputFormat::Csv`].
pub const CSV_HEADER: &str = "timestamp,source,IP,port,host,url";

/// How a result becomes one line of output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputFormat {
    /// Replace `ip`, `port` and `host` in a template such as `ip:port`.
    ///
    /// When the result has no IP or no port and the template uses either,
    /// the host alone is printed.
    Template(String),
    /// One JSON object per line.
    Json,
    /// The provider's original payload.
    Raw,
    /// Comma-separated values; a header row precedes the first result.
    Csv,
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::Template("ip:port".to_owned())
    }
}

impl From<&OutputSection> for OutputFormat {
    fn from(section: &OutputSection) -> Self {
        match section.format {
            OutputKind::Template => Self::Template(section.fields.clone()),
            OutputKind::Json => Self::Json,
            OutputKind::Raw => Self::Raw,
            OutputKind::Csv => Self::Csv,
        }
    }
}

impl OutputFormat {
    /// Render one result, or `None` for a carried error.
    pub fn render(&self, result: &ReconResult) -> Option<String> {
        if result.is_error() {
            return None;
        }
        let line = match self {
            Self::Template(template) => render_template(template, result),
            Self::Json => result.to_json(),
            Self::Raw => result.raw_data(),
            Self::Csv => csv_row(result),
        };
        Some(line)
    }

    fn header(&self) -> Option<&'static str> {
        match self {
            Self::Csv => Some(CSV_HEADER),
            _ => None,
        }
    }
}

fn render_template(template: &str, result: &ReconResult) -> String {
    let uses_ip_or_port = template.contains("ip") || template.contains("port");
    if uses_ip_or_port && (result.ip.is_empty() || result.port == 0) {
        return result.host.clone();
    }

    let port = result.port.to_string();
    let mut out = String::with_capacity(template.len() + result.host.len());
    let mut rest = template;
    while let Some(c) = rest.chars().next() {
        let replaced = [("ip", result.ip.as_str()), ("host", result.host.as_str()), ("port", port.as_str())]
            .into_iter()
            .find(|(token, _)| rest.starts_with(token));
        match replaced {
            Some((token, value)) => {
                out.push_str(value);
                rest = &rest[token.len()..];
            }
            None => {
                out.push(c);
                rest = &rest[c.len_utf8()..];
            }
        }
    }
    out
}

fn csv_row(result: &ReconResult) -> String {
    [
        result.timestamp.to_string(),
        csv_field(&result.source),
        csv_field(&result.ip),
        result.port.to_string(),
        csv_field(&result.host),
        csv_field(&result.url),
    ]
    .join(",")
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_owned()
    }
}

/// Writes rendered results to stdout and an optional file.
pub struct OutputWriter {
    format: OutputFormat,
    sinks: Vec<Box<dyn Write + Send>>,
    written: usize,
}

impl std::fmt::Debug for OutputWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputWriter")
            .field("format", &self.format)
            .field("sinks", &self.sinks.len())
            .field("written", &self.written)
            .finish()
    }
}

impl OutputWriter {
    /// A writer to stdout, plus `file` when given.
    ///
    /// # Errors
    ///
    /// Returns an error if the output file cannot be created.
    pub fn new(format: OutputFormat, file: Option<&Path>) -> Result<Self> {
        let mut writer = Self::with_sink(format, io::stdout());
        if let Some(path) = file {
            writer.add_file(path)?;
        }
        Ok(writer)
    }

    /// A writer to `sink` only.
    pub fn with_sink(format: OutputFormat, sink: impl Write + Send + 'static) -> Self {
        Self {
            format,
            sinks: vec![Box::new(sink)],
            written: 0,
        }
    }

    /// Also write to a file, truncating it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn add_file(&mut self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)
            .map_err(|e| UncoverError::Output(format!("{}: {e}", path.display())))?;
        self.sinks.push(Box::new(BufWriter::new(file)));
        Ok(())
    }

    /// Results written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Write one result. Carried errors are logged instead.
    ///
    /// # Errors
    ///
    /// Returns an error if any sink fails.
    pub fn write(&mut self, result: &ReconResult) -> Result<()> {
        let Some(line) = self.format.render(result) else {
            if let Some(ref err) = result.error {
                tracing::warn!(source = %result.source, error = %err, "request failed");
            }
            return Ok(());
        };

        if self.written == 0 {
            if let Some(header) = self.format.header() {
                self.write_line(header)?;
            }
        }
        self.write_line(&line)?;
        self.written += 1;
        Ok(())
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        for sink in &mut self.sinks {
            writeln!(sink, "{line}").map_err(|e| UncoverError::Output(e.to_string()))?;
        }
        Ok(())
    }

    /// Flush every sink.
    ///
    /// # Errors
    ///
    /// Returns an error if any sink fails to flush.
    pub fn flush(&mut self) -> Result<()> {
        for sink in &mut self.sinks {
            sink.flush()
                .map_err(|e| UncoverError::Output(e.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use uncover_sources::SourceError;

    fn sample() -> ReconResult {
        ReconResult {
            timestamp: 1_700_000_000,
            ip: "93.184.216.34".into(),
            port: 443,
            host: "www.example.com".into(),
            url: "https://www.example.com:443".into(),
            raw: br#"{"ip_str":"93.184.216.34"}"#.to_vec(),
            ..ReconResult::new("shodan")
        }
    }

    #[test]
    fn template_replaces_fields() {
        let format = OutputFormat::Template("ip:port".into());
        assert_eq!(format.render(&sample()).unwrap(), "93.184.216.34:443");

        let format = OutputFormat::Template("host [ip]".into());
        assert_eq!(
            format.render(&sample()).unwrap(),
            "www.example.com [93.184.216.34]"
        );
    }

    #[test]
    fn template_falls_back_to_host() {
        let result = ReconResult {
            host: "mail.example.com".into(),
            ..ReconResult::new("rapiddns-spider")
        };
        let format = OutputFormat::Template("ip:port".into());
        assert_eq!(format.render(&result).unwrap(), "mail.example.com");

        let format = OutputFormat::Template("host".into());
        assert_eq!(format.render(&result).unwrap(), "mail.example.com");
    }

    #[test]
    fn carried_errors_are_not_rendered() {
        let failed = ReconResult::failure("shodan", SourceError::Http("refused".into()));
        assert!(OutputFormat::Json.render(&failed).is_none());
        assert!(OutputFormat::default().render(&failed).is_none());
    }

    #[test]
    fn json_and_raw_lines() {
        let json = OutputFormat::Json.render(&sample()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["host"], "www.example.com");
        assert_eq!(value["port"], 443);

        assert_eq!(
            OutputFormat::Raw.render(&sample()).unwrap(),
            r#"{"ip_str":"93.184.216.34"}"#
        );
    }

    #[test]
    fn csv_rows_quote_when_needed() {
        assert_eq!(
            OutputFormat::Csv.render(&sample()).unwrap(),
            "1700000000,shodan,93.184.216.34,443,www.example.com,https://www.example.com:443"
        );
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn section_selects_format() {
        let section = OutputSection {
            format: OutputKind::Template,
            fields: "host".into(),
        };
        assert_eq!(OutputFormat::from(&section), OutputFormat::Template("host".into()));
    }

    #[test]
    fn file_receives_header_once_and_skips_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("results.csv");

        let mut writer = OutputWriter::with_sink(OutputFormat::Csv, io::sink());
        writer.add_file(&path).unwrap();
        writer.write(&sample()).unwrap();
        writer
            .write(&ReconResult::failure("shodan", SourceError::Http("x".into())))
            .unwrap();
        writer.write(&sample()).unwrap();
        writer.flush().unwrap();
        assert_eq!(writer.written(), 2);

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], CSV_HEADER);
    }
}
