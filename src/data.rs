// src/data.rs
use anyhow::{Context, Result};
use chrono::Local;
use csv::Writer;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::session::{Collectible, Phase};

/// One row of trials.csv: a single collectible in a single run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrialRecord {
    pub session_id: String,
    pub phase: String,
    pub mode: String,
    pub collectible_index: usize,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Seconds since the previous pickup (or the phase start).
    pub split_s: Option<f64>,
    pub elapsed_s: Option<f64>,
    pub pinches: u32,
    pub collected: bool,
}

impl TrialRecord {
    pub fn collected(
        session_id: &str,
        phase: Phase,
        collectible: &Collectible,
        split_s: f64,
        elapsed_s: f64,
        pinches: u32,
    ) -> Self {
        Self {
            split_s: Some(split_s),
            elapsed_s: Some(elapsed_s),
            pinches,
            collected: true,
            ..Self::missed(session_id, phase, collectible)
        }
    }

    pub fn missed(session_id: &str, phase: Phase, collectible: &Collectible) -> Self {
        Self {
            session_id: session_id.to_string(),
            phase: phase.label().to_string(),
            mode: phase.mode().as_str().to_string(),
            collectible_index: collectible.index,
            x: collectible.position.x,
            y: collectible.position.y,
            z: collectible.position.z,
            split_s: None,
            elapsed_s: None,
            pinches: 0,
            collected: false,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
struct ModeSummary {
    collected: usize,
    total: usize,
    total_time: f64,
    pinches: u32,
}

impl ModeSummary {
    fn mean_split(&self) -> f64 {
        if self.collected == 0 {
            0.0
        } else {
            self.total_time / self.collected as f64
        }
    }
}

pub struct SessionExporter {
    output_dir: PathBuf,
    session_name: String,
    records: Vec<TrialRecord>,
}

impl SessionExporter {
    pub fn new(output_dir: impl AsRef<Path>, session_name: Option<String>) -> Self {
        let session_name = session_name.unwrap_or_else(|| {
            format!("session_{}", Local::now().format("%Y%m%d_%H%M%S"))
        });

        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
            session_name,
            records: Vec::new(),
        }
    }

    pub fn session_name(&self) -> &str {
        &self.session_name
    }

    pub fn session_dir(&self) -> PathBuf {
        self.output_dir.join(&self.session_name)
    }

    pub fn add_records(&mut self, records: &[TrialRecord]) {
        self.records.extend_from_slice(records);
    }

    pub fn export_csv(&self) -> Result<PathBuf> {
        let csv_path = self.session_dir().join("trials.csv");
        if let Some(parent) = csv_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let file = File::create(&csv_path)
            .with_context(|| format!("Failed to create {}", csv_path.display()))?;
        let mut writer = Writer::from_writer(file);
        for record in &self.records {
            writer.serialize(record)?;
        }
        writer.flush()?;

        info!("Wrote {} trial records to {}", self.records.len(), csv_path.display());
        Ok(csv_path)
    }

    pub fn generate_report(&self) -> Result<PathBuf> {
        let report_path = self.session_dir().join("report.html");
        if let Some(parent) = report_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(&report_path, self.create_html_report())
            .with_context(|| format!("Failed to write {}", report_path.display()))?;
        Ok(report_path)
    }

    /// Study totals per mode. Tutorial and free play runs are not scored.
    fn study_summaries(&self) -> BTreeMap<String, ModeSummary> {
        let mut summaries: BTreeMap<String, ModeSummary> = BTreeMap::new();
        for record in self.records.iter().filter(|r| r.phase == "study") {
            let summary = summaries.entry(record.mode.clone()).or_default();
            summary.total += 1;
            if record.collected {
                summary.collected += 1;
                summary.total_time += record.split_s.unwrap_or(0.0);
                summary.pinches += record.pinches;
            }
        }
        summaries
    }

    fn create_html_report(&self) -> String {
        let session_id = self
            .records
            .first()
            .map(|r| r.session_id.as_str())
            .unwrap_or("-");

        let rows: String = self
            .study_summaries()
            .iter()
            .map(|(mode, s)| {
                format!(
                    r#"
        <tr><td>{}</td><td>{}/{}</td><td>{:.2} s</td><td>{:.2} s</td><td>{}</td></tr>"#,
                    mode,
                    s.collected,
                    s.total,
                    s.total_time,
                    s.mean_split(),
                    s.pinches
                )
            })
            .collect();

        format!(r#"
<!DOCTYPE html>
<html>
<head>
    <title>Roll-a-Ball Session Report - {}</title>
    <style>
        body {{ font-family: 'Segoe UI', Tahoma, Geneva, Verdana, sans-serif; margin: 40px; background: #f5f5f5; }}
        h1 {{ color: #333; }}
        .stats {{ background: white; padding: 20px; border-radius: 8px; box-shadow: 0 2px 4px rgba(0,0,0,0.1); }}
        th, td {{ padding: 6px 16px; text-align: left; }}
        th {{ color: #666; }}
        td {{ color: #4682EA; }}
    </style>
</head>
<body>
    <h1>Roll-a-Ball Session Report</h1>
    <div class="stats">
        <h2>Session: {}</h2>
        <p>Session ID: {}</p>
        <p>Trial records: {}</p>
        <table>
        <tr><th>Mode</th><th>Collected</th><th>Total time</th><th>Mean split</th><th>Pinches</th></tr>{}
        </table>
    </div>
</body>
</html>
"#,
            self.session_name,
            self.session_name,
            session_id,
            self.records.len(),
            rows
        )
    }
}
