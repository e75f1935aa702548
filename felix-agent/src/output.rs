//! Report rendering for text vs JSON output.

use std::io::Write;

use colored::Colorize;
use felix_core::types::IpVersion;
use felix_iptables::CleanupReport;
use serde::Serialize;

use crate::cli::OutputFormat;

/// Writes reports to stdout in the selected format.
pub struct OutputWriter {
    format: OutputFormat,
}

impl OutputWriter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Render a payload to stdout.
    pub fn render<T: Render + Serialize>(&self, payload: &T) -> anyhow::Result<()> {
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        self.render_to(payload, &mut handle)
    }

    pub fn render_to<T: Render + Serialize>(
        &self,
        payload: &T,
        w: &mut dyn Write,
    ) -> anyhow::Result<()> {
        match self.format {
            OutputFormat::Text => payload.render_text(w)?,
            OutputFormat::Json => {
                serde_json::to_writer_pretty(&mut *w, payload)?;
                writeln!(w)?;
            }
        }
        Ok(())
    }
}

/// Human-readable text rendering.
pub trait Render {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()>;
}

/// Result of `calico-cleanup`.
#[derive(Debug, Clone, Serialize)]
pub struct CleanupSummary {
    pub tag: String,
    pub ip_versions: Vec<String>,
    pub chains_removed: usize,
    pub hooks_removed: usize,
}

impl From<&CleanupReport> for CleanupSummary {
    fn from(report: &CleanupReport) -> Self {
        Self {
            tag: report.tag.to_string(),
            ip_versions: report
                .ip_versions
                .iter()
                .map(|v| v.as_str().to_owned())
                .collect(),
            chains_removed: report.chains_removed,
            hooks_removed: report.hooks_removed,
        }
    }
}

impl Render for CleanupSummary {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        writeln!(w, "{}", "Cleanup".bold())?;
        writeln!(w, "  Tag:         {}", self.tag)?;
        writeln!(w, "  IP versions: {}", self.ip_versions.join(", "))?;
        if self.chains_removed == 0 && self.hooks_removed == 0 {
            writeln!(w, "  Result:      {}", "nothing to remove".green())?;
        } else {
            writeln!(w, "  Chains:      {} removed", self.chains_removed)?;
            writeln!(w, "  Hooks:       {} removed", self.hooks_removed)?;
            writeln!(w, "  Result:      {}", "CLEAN".green().bold())?;
        }
        Ok(())
    }
}

/// Result of `calico-iptables-plugin --validate`.
#[derive(Debug, Clone, Serialize)]
pub struct ValidateReport {
    pub generator: String,
    pub tag: String,
    pub rule_sets: Vec<RuleSetSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RuleSetSummary {
    pub ip_version: String,
    pub chains: usize,
    pub hooks: usize,
    pub rules: usize,
}

impl RuleSetSummary {
    pub fn new(ip_version: IpVersion, chains: usize, hooks: usize, rules: usize) -> Self {
        Self {
            ip_version: ip_version.as_str().to_owned(),
            chains,
            hooks,
            rules,
        }
    }
}

impl Render for ValidateReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        writeln!(w, "{}", "Policy Validation".bold())?;
        writeln!(w, "  Generator: {}", self.generator)?;
        writeln!(w, "  Tag:       {}", self.tag)?;
        for rs in &self.rule_sets {
            writeln!(
                w,
                "  {}: {} chains, {} hooks, {} rules",
                rs.ip_version, rs.chains, rs.hooks, rs.rules
            )?;
        }
        writeln!(w, "  Result:    {}", "VALID".green().bold())?;
        Ok(())
    }
}

/// Print a fatal error to stderr.
pub fn print_error(err: &dyn std::fmt::Display) {
    eprintln!("{} {}", "error:".red().bold(), err);
}
