use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tapopt_algo::{ConvergenceTrace, FpaConfig, FpaOutcome, Incumbent};
use tapopt_core::{PfBounds, TapOptError, TapOptResult};
use tracing::info;
use uuid::Uuid;

pub const PF_TABLE_FILE: &str = "pf_optimal.csv";
pub const TRACE_FILE: &str = "convergence.csv";
pub const SUMMARY_FILE: &str = "summary.json";

/// One row of the PF table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PfRecord {
    pub pv_name: String,
    #[serde(rename = "pf_raw")]
    pub raw_pf: f64,
    #[serde(rename = "pf_sanitized")]
    pub sanitized_pf: f64,
    /// Sanitization moved the raw value onto the feasible domain.
    pub at_bound: bool,
}

/// Settings echoed into the summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunContext {
    pub model: String,
    pub engine: String,
    pub fpa: FpaConfig,
    pub bounds: PfBounds,
    pub regulators: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub timestamp: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<RunContext>,
    pub baseline_taps: u32,
    pub best_fitness: f64,
    /// Tap count of the incumbent; `None` when every candidate was penalised.
    pub best_taps: Option<u32>,
    pub improvement: Option<u32>,
    pub penalty: f64,
    pub evaluations: u64,
    pub iterations: usize,
    pub bounded_pvs: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportPaths {
    pub pf_table: PathBuf,
    pub trace: PathBuf,
    pub summary: PathBuf,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    run_id: String,
    timestamp: String,
    records: Vec<PfRecord>,
    trace: ConvergenceTrace,
    baseline_taps: u32,
    best_fitness: f64,
    penalty: f64,
    evaluations: u64,
    context: Option<RunContext>,
}

impl RunReport {
    /// Pair the incumbent's raw and sanitized PFs with the PV names, in order.
    pub fn new(
        pv_names: &[String],
        incumbent: &Incumbent,
        trace: ConvergenceTrace,
        baseline_taps: u32,
        penalty: f64,
    ) -> TapOptResult<Self> {
        if pv_names.len() != incumbent.position.len() || pv_names.len() != incumbent.raw.len() {
            return Err(TapOptError::Validation(format!(
                "{} PV names for a {}-element incumbent ({} raw values)",
                pv_names.len(),
                incumbent.position.len(),
                incumbent.raw.len()
            )));
        }
        let records = pv_names
            .iter()
            .zip(incumbent.raw.iter().zip(incumbent.position.iter()))
            .map(|(name, (&raw_pf, &sanitized_pf))| PfRecord {
                pv_name: name.clone(),
                raw_pf,
                sanitized_pf,
                at_bound: raw_pf != sanitized_pf,
            })
            .collect();
        let evaluations = trace.last().map_or(0, |point| point.evaluations);
        Ok(Self {
            run_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now().to_rfc3339(),
            records,
            trace,
            baseline_taps,
            best_fitness: incumbent.fitness,
            penalty,
            evaluations,
            context: None,
        })
    }

    pub fn from_outcome(pv_names: &[String], outcome: &FpaOutcome, penalty: f64) -> TapOptResult<Self> {
        let mut report = Self::new(
            pv_names,
            &outcome.incumbent,
            outcome.trace.clone(),
            outcome.baseline_taps,
            penalty,
        )?;
        report.evaluations = outcome.evaluations;
        Ok(report)
    }

    pub fn with_context(mut self, context: RunContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn records(&self) -> &[PfRecord] {
        &self.records
    }

    pub fn trace(&self) -> &ConvergenceTrace {
        &self.trace
    }

    /// PVs whose raw value lay outside the feasible domain.
    pub fn bounded_count(&self) -> usize {
        self.records.iter().filter(|record| record.at_bound).count()
    }

    pub fn best_taps(&self) -> Option<u32> {
        (self.best_fitness < self.penalty).then_some(self.best_fitness as u32)
    }

    pub fn summary(&self) -> RunSummary {
        let best_taps = self.best_taps();
        RunSummary {
            run_id: self.run_id.clone(),
            timestamp: self.timestamp.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            context: self.context.clone(),
            baseline_taps: self.baseline_taps,
            best_fitness: self.best_fitness,
            best_taps,
            improvement: best_taps.map(|taps| self.baseline_taps.saturating_sub(taps)),
            penalty: self.penalty,
            evaluations: self.evaluations,
            iterations: self.trace.last().map_or(0, |point| point.iteration),
            bounded_pvs: self.bounded_count(),
        }
    }

    /// CSV columns `pv_name,pf_raw,pf_sanitized,at_bound`.
    pub fn write_pf_table(&self, path: &Path) -> TapOptResult<()> {
        let mut writer = csv::Writer::from_path(path).map_err(io::Error::from)?;
        for record in &self.records {
            writer.serialize(record).map_err(io::Error::from)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// CSV columns `iteration,best_fitness,evaluations`.
    pub fn write_trace(&self, path: &Path) -> TapOptResult<()> {
        let mut writer = csv::Writer::from_path(path).map_err(io::Error::from)?;
        for point in self.trace.points() {
            writer.serialize(point).map_err(io::Error::from)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn write_summary(&self, path: &Path) -> TapOptResult<()> {
        let json = serde_json::to_string_pretty(&self.summary())?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Write all three artefacts into `dir`, creating it if needed.
    pub fn write_all(&self, dir: &Path) -> TapOptResult<ReportPaths> {
        fs::create_dir_all(dir)?;
        let paths = ReportPaths {
            pf_table: dir.join(PF_TABLE_FILE),
            trace: dir.join(TRACE_FILE),
            summary: dir.join(SUMMARY_FILE),
        };
        self.write_pf_table(&paths.pf_table)?;
        self.write_trace(&paths.trace)?;
        self.write_summary(&paths.summary)?;
        info!(run_id = %self.run_id, dir = %dir.display(), "run report written");
        Ok(paths)
    }
}

/// Read a PF table written by [`RunReport::write_pf_table`].
pub fn read_pf_table(path: &Path) -> TapOptResult<Vec<PfRecord>> {
    let mut reader = csv::Reader::from_path(path).map_err(|err| {
        TapOptError::Model(format!("opening PF table '{}': {err}", path.display()))
    })?;
    reader
        .deserialize()
        .collect::<Result<Vec<PfRecord>, _>>()
        .map_err(|err| TapOptError::Model(format!("parsing PF table '{}': {err}", path.display())))
}
