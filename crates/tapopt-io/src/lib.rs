//! # tapopt-io: run reports
//!
//! A finished search is written as three artefacts:
//!
//! | File | Content |
//! |------|---------|
//! | `pf_optimal.csv` | one row per PV: raw PF, sanitized PF, whether sanitization moved it |
//! | `convergence.csv` | incumbent fitness after every pass |
//! | `summary.json` | run id, timestamp, configuration, baseline, best fitness |
//!
//! Raw and sanitized PFs are reported separately: a row where they differ
//! means the search was pressing against the PF bounds.

pub mod report;

pub use report::{
    read_pf_table, PfRecord, ReportPaths, RunContext, RunReport, RunSummary, PF_TABLE_FILE,
    SUMMARY_FILE, TRACE_FILE,
};
