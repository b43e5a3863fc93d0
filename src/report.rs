// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Results output: the per-node CSV file and the console blocks

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::driver::ModeReport;
use crate::error::Result;

/// Column names of the results file
pub const CSV_HEADER: [&str; 15] = [
    "node",
    "backend",
    "mode",
    "device_count",
    "trial_count",
    "duration_s",
    "avg_throughput",
    "stddev_throughput",
    "min_throughput",
    "max_throughput",
    "vram_total_MB",
    "vram_used_MB",
    "vram_used_pct",
    "heterogeneous_flag",
    "timestamp",
];

/// Append-only results file for one node
#[derive(Debug, Clone)]
pub struct ResultsCsv {
    path: PathBuf,
    node: String,
}

impl ResultsCsv {
    /// `<dir>/gpu_<node>.csv`
    pub fn path_for(dir: &Path, node: &str) -> PathBuf {
        dir.join(format!("gpu_{}.csv", node))
    }

    /// Open the results file, creating `dir` and the header as needed.
    ///
    /// An existing file whose first line is not the current header is moved
    /// to `<path>.bak.<YYYYmmddHHMMSS>` first.
    pub fn open(dir: &Path, node: &str) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = Self::path_for(dir, node);
        if let Some(backup) = ensure_header(&path)? {
            log::warn!(
                "results header changed, previous file moved to {}",
                backup.display()
            );
        }
        Ok(Self {
            path,
            node: node.to_string(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one row for `report`, stamped with the current local time
    pub fn append(&self, report: &ModeReport) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        writer.write_record(csv_row(&self.node, report, &timestamp()))?;
        writer.flush()?;
        Ok(())
    }
}

/// Make sure `path` starts with [`CSV_HEADER`], returning the backup path if
/// an old file had to be moved aside.
fn ensure_header(path: &Path) -> Result<Option<PathBuf>> {
    let mut backup = None;
    let has_content = fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false);
    if has_content {
        let mut first = String::new();
        BufReader::new(fs::File::open(path)?).read_line(&mut first)?;
        let first = first.trim_end_matches(['\n', '\r']);
        if first != CSV_HEADER.join(",") {
            let target = PathBuf::from(format!(
                "{}.bak.{}",
                path.display(),
                chrono::Local::now().format("%Y%m%d%H%M%S")
            ));
            fs::rename(path, &target)?;
            backup = Some(target);
        }
    }

    let empty = match fs::metadata(path) {
        Ok(meta) => meta.len() == 0,
        Err(_) => true,
    };
    if empty {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(CSV_HEADER)?;
        writer.flush()?;
    }
    Ok(backup)
}

/// ISO-8601 local time with second precision
fn timestamp() -> String {
    chrono::Local::now()
        .format("%Y-%m-%dT%H:%M:%S")
        .to_string()
}

fn fixed3(value: f64) -> String {
    format!("{:.3}", value)
}

/// Field values of one results row
pub fn csv_row(node: &str, report: &ModeReport, timestamp: &str) -> Vec<String> {
    let stats = report.stats;
    let (total, used, pct) = match report.vram {
        Some(v) => (fixed3(v.total_mb()), fixed3(v.used_mb()), fixed3(v.used_pct())),
        None => (String::new(), String::new(), String::new()),
    };
    vec![
        node.to_string(),
        report.backend.clone(),
        report.mode.to_string(),
        report.device_count.to_string(),
        report.trial_count().to_string(),
        fixed3(report.duration_secs),
        fixed3(stats.mean),
        fixed3(stats.stddev),
        fixed3(stats.min),
        fixed3(stats.max),
        total,
        used,
        pct,
        u8::from(report.heterogeneous).to_string(),
        timestamp.to_string(),
    ]
}

/// Parseable console block for one report
pub fn format_text_block(report: &ModeReport) -> String {
    format!(
        "BACKEND {}\nMODE {}\nTHREADS {}\nDURATION {:.3}\nSCORE {:.3}\nSTD {:.3}\nRUNS {}\n",
        report.backend,
        report.mode,
        report.device_count,
        report.duration_secs,
        report.stats.mean,
        report.stats.stddev,
        report.trial_count()
    )
}
