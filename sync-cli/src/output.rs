use anyhow::Result;
use clap::ValueEnum;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Yaml,
}

/// Result of a synchronization command.
#[derive(Debug, Serialize)]
pub struct CountReport<'a> {
    pub operation: &'a str,
    pub count: usize,
    pub message: String,
}

impl<'a> CountReport<'a> {
    pub fn new(operation: &'a str, noun: &str, count: usize) -> Self {
        Self {
            operation,
            count,
            message: format!("Synchronized {} {}", count, noun),
        }
    }
}

pub fn render<T: Serialize>(value: &T, format: OutputFormat) -> Result<String> {
    Ok(match format {
        OutputFormat::Json => serde_json::to_string_pretty(value)?,
        OutputFormat::Yaml => serde_yaml::to_string(value)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_report_formats() {
        let report = CountReport::new("reports", "reports", 2);

        let json: serde_json::Value =
            serde_json::from_str(&render(&report, OutputFormat::Json).unwrap()).unwrap();
        assert_eq!(json["count"], 2);
        assert_eq!(json["message"], "Synchronized 2 reports");

        let yaml = render(&report, OutputFormat::Yaml).unwrap();
        assert!(yaml.contains("operation: reports"));
        assert!(yaml.contains("count: 2"));
    }
}
