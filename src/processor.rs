//! Batch preprocessing driver.
//!
//! Orchestrates the three campaign-level operations over a validated
//! configuration document: raw-export conversion, sea-surface-line
//! detection, and valid-time-window extraction. Every instrument section is
//! validated and run independently; failures are collected into a single
//! report and never prevent the remaining instruments from running.

use std::collections::HashMap;

use tracing::{error, info};

use crate::app::services::converters::adcp::{self, AdcpInputs};
use crate::app::services::converters::ctd::{self, CtdInputs};
use crate::app::services::converters::td::{self, TdInputs};
use crate::app::services::converters::{ProfilerBrand, SondeBrand, brands_for};
use crate::app::services::schema_validator::{self, InstrumentKind};
use crate::app::services::segment_reducer::ExecutionContext;
use crate::app::services::ssl_detector::{self, SslTuning};
use crate::app::services::valid_window;
use crate::config::ConfigDocument;
use crate::constants::AVERAGE_GROUP;
use crate::error::{MooringError, Result};

/// Outcome of one section or station attempt.
#[derive(Debug, Clone)]
pub struct ReportEntry {
    pub section: String,
    pub outcome: std::result::Result<String, String>,
}

/// Aggregate outcome of a batch run.
///
/// Partial success across instruments is expected and is not itself a
/// failure; every failure path appends a message here and nothing is
/// silently swallowed.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    entries: Vec<ReportEntry>,
}

impl BatchReport {
    fn push_ok(&mut self, section: &str, message: impl Into<String>) {
        self.entries.push(ReportEntry {
            section: section.to_owned(),
            outcome: Ok(message.into()),
        });
    }

    fn push_err(&mut self, section: &str, message: impl Into<String>) {
        let message = message.into();
        error!(section, %message, "instrument section failed");
        self.entries.push(ReportEntry {
            section: section.to_owned(),
            outcome: Err(message),
        });
    }

    pub fn entries(&self) -> &[ReportEntry] {
        &self.entries
    }

    pub fn failure_count(&self) -> usize {
        self.entries.iter().filter(|e| e.outcome.is_err()).count()
    }

    pub fn is_clean(&self) -> bool {
        self.failure_count() == 0
    }

    /// Human-readable summary: completed sections listed plainly, failures
    /// numbered with their diagnostic content.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let mut index = 1;
        for entry in &self.entries {
            match &entry.outcome {
                Ok(message) => {
                    out.push_str(message);
                    out.push_str("\n\n");
                }
                Err(message) => {
                    out.push_str(&format!(
                        "Error message {index} ({}):\n{message}\n\n",
                        entry.section
                    ));
                    index += 1;
                }
            }
        }
        out
    }
}

/// Campaign-level preprocessing driver.
pub struct Preprocessor {
    doc: ConfigDocument,
    ctx: ExecutionContext,
}

impl Preprocessor {
    pub fn new(doc: ConfigDocument) -> Result<Self> {
        Ok(Self {
            doc,
            ctx: ExecutionContext::new()?,
        })
    }

    /// Inject a pre-built execution context (worker pool and dispatch
    /// thresholds).
    pub fn with_context(doc: ConfigDocument, ctx: ExecutionContext) -> Self {
        Self { doc, ctx }
    }

    /// Convert every configured instrument section to its output dataset.
    pub fn convert_sections(&self) -> BatchReport {
        let mut report = BatchReport::default();
        for section in self.doc.section_run() {
            match section.as_str() {
                "adcp" => self.run_adcp(&mut report),
                "ctd" => self.run_ctd(&mut report),
                "td" => self.run_td(&mut report),
                other => report.push_err(other, format!("unknown instrument section '{other}'")),
            }
        }
        report
    }

    fn sorted_keys<V>(map: &HashMap<String, V>) -> Vec<String> {
        let mut keys: Vec<String> = map.keys().cloned().collect();
        keys.sort();
        keys
    }

    fn run_adcp(&self, report: &mut BatchReport) {
        const SECTION: &str = "ADCP";
        if let Err(err) = schema_validator::validate_section(&self.doc, InstrumentKind::Adcp) {
            report.push_err(SECTION, err.to_string());
            return;
        }
        let stations = match self.adcp_stations() {
            Ok(stations) => stations,
            Err(err) => {
                report.push_err(SECTION, err.to_string());
                return;
            }
        };
        let mut failed = false;
        for (station, run) in stations {
            if let Err(err) = run {
                report.push_err(SECTION, format!("{station}: {err}"));
                failed = true;
            }
        }
        if !failed {
            report.push_ok(SECTION, "ADCP completed.");
        }
    }

    fn adcp_stations(&self) -> Result<Vec<(String, Result<()>)>> {
        let settings = self.doc.adcp_settings()?;
        let time = self.doc.time_options()?;
        let output = self.doc.output_options()?;
        let inputs = self.doc.adcp_inputs()?;
        let saves = self.doc.path_map(&["PreprocessData", "adcp"])?;
        let prefix = self.doc.prefix()?.to_owned();

        let mut outcomes = Vec::new();
        for station in Self::sorted_keys(&inputs) {
            let entry = &inputs[&station];
            let run = (|| -> Result<()> {
                let station_info = self.doc.station_info(&station)?;
                let save = saves.get(&station).ok_or_else(|| {
                    MooringError::configuration(format!(
                        "PreprocessData->adcp lacks an output path for {station}"
                    ))
                })?;
                let jump_threshold =
                    *settings.valid_dep_dif.get(&station).ok_or_else(|| {
                        MooringError::configuration(format!(
                            "Preprocess->adcpInfo->valid_dep_dif lacks {station}"
                        ))
                    })?;
                let resolved = AdcpInputs {
                    mat_path: self.doc.resolve(&entry.mat)?,
                    beam_prefix: format!("{prefix}{}", entry.beam),
                    detail_path: self.doc.resolve(&entry.file_details)?,
                    deploy_path: self.doc.resolve(&entry.deployment)?,
                    save_path: self.doc.resolve(save)?,
                };
                for brand in brands_for(&station_info.observe_instrument, "ADCP") {
                    match ProfilerBrand::from_tag(&brand) {
                        ProfilerBrand::Rdi => adcp::convert_station(
                            &self.ctx,
                            &resolved,
                            &station_info,
                            &settings,
                            jump_threshold,
                            &time,
                            &output,
                        )?,
                        ProfilerBrand::Unsupported(name) => {
                            return Err(MooringError::unsupported_brand(name));
                        }
                    }
                }
                Ok(())
            })();
            outcomes.push((station, run));
        }
        Ok(outcomes)
    }

    fn run_ctd(&self, report: &mut BatchReport) {
        const SECTION: &str = "CTD";
        if let Err(err) = schema_validator::validate_section(&self.doc, InstrumentKind::Ctd) {
            report.push_err(SECTION, err.to_string());
            return;
        }
        let run = (|| -> Result<Vec<(String, Result<()>)>> {
            let settings = self.doc.ctd_settings()?;
            let profiler_settings = self.doc.adcp_settings()?;
            let time = self.doc.time_options()?;
            let output = self.doc.output_options()?;
            let inputs = self.doc.path_map(&["OriginalData", "ctd"])?;
            let saves = self.doc.path_map(&["PreprocessData", "ctd"])?;
            let prefix = self.doc.prefix()?.to_owned();

            let mut outcomes = Vec::new();
            for station in Self::sorted_keys(&inputs) {
                let outcome = (|| -> Result<()> {
                    let station_info = self.doc.station_info(&station)?;
                    let save = saves.get(&station).ok_or_else(|| {
                        MooringError::configuration(format!(
                            "PreprocessData->ctd lacks an output path for {station}"
                        ))
                    })?;
                    let ref_rel = settings.ref_data.get(&station).ok_or_else(|| {
                        MooringError::configuration(format!(
                            "Preprocess->ctdInfo->ref_data lacks {station}"
                        ))
                    })?;
                    let resolved = CtdInputs {
                        export_prefix: format!("{prefix}{}", inputs[&station]),
                        save_path: self.doc.resolve(save)?,
                        ref_path: self.doc.resolve(ref_rel)?,
                    };
                    for brand in brands_for(&station_info.observe_instrument, "CTD") {
                        match SondeBrand::from_tag(&brand) {
                            SondeBrand::Rbr => ctd::convert_station(
                                &resolved,
                                &station_info,
                                &settings,
                                &profiler_settings,
                                &time,
                                &output,
                            )?,
                            SondeBrand::Unsupported(name) => {
                                return Err(MooringError::unsupported_brand(name));
                            }
                        }
                    }
                    Ok(())
                })();
                outcomes.push((station.clone(), outcome));
            }
            Ok(outcomes)
        })();

        match run {
            Ok(outcomes) => {
                let mut failed = false;
                for (station, outcome) in outcomes {
                    if let Err(err) = outcome {
                        report.push_err(SECTION, format!("{station}: {err}"));
                        failed = true;
                    }
                }
                if !failed {
                    report.push_ok(SECTION, "CTD completed.");
                }
            }
            Err(err) => report.push_err(SECTION, err.to_string()),
        }
    }

    fn run_td(&self, report: &mut BatchReport) {
        const SECTION: &str = "TD";
        if let Err(err) = schema_validator::validate_section(&self.doc, InstrumentKind::Td) {
            report.push_err(SECTION, err.to_string());
            return;
        }
        let run = (|| -> Result<Vec<(String, Result<()>)>> {
            let settings = self.doc.td_settings()?;
            let time = self.doc.time_options()?;
            let output = self.doc.output_options()?;
            let inputs = self.doc.path_map(&["OriginalData", "td"])?;
            let saves = self.doc.path_map(&["PreprocessData", "td"])?;
            let prefix = self.doc.prefix()?.to_owned();

            let mut outcomes = Vec::new();
            for station in Self::sorted_keys(&inputs) {
                let outcome = (|| -> Result<()> {
                    let station_info = self.doc.station_info(&station)?;
                    let save = saves.get(&station).ok_or_else(|| {
                        MooringError::configuration(format!(
                            "PreprocessData->td lacks an output path for {station}"
                        ))
                    })?;
                    let jump_threshold =
                        *settings.valid_dep_dif.get(&station).ok_or_else(|| {
                            MooringError::configuration(format!(
                                "Preprocess->tdInfo->valid_dep_dif lacks {station}"
                            ))
                        })?;
                    let resolved = TdInputs {
                        export_prefix: format!("{prefix}{}", inputs[&station]),
                        save_path: self.doc.resolve(save)?,
                    };
                    for brand in brands_for(&station_info.observe_instrument, "TD") {
                        match SondeBrand::from_tag(&brand) {
                            SondeBrand::Rbr => td::convert_station(
                                &self.ctx,
                                &resolved,
                                &station_info,
                                &settings,
                                jump_threshold,
                                &time,
                                &output,
                            )?,
                            SondeBrand::Unsupported(name) => {
                                return Err(MooringError::unsupported_brand(name));
                            }
                        }
                    }
                    Ok(())
                })();
                outcomes.push((station.clone(), outcome));
            }
            Ok(outcomes)
        })();

        match run {
            Ok(outcomes) => {
                let mut failed = false;
                for (station, outcome) in outcomes {
                    if let Err(err) = outcome {
                        report.push_err(SECTION, format!("{station}: {err}"));
                        failed = true;
                    }
                }
                if !failed {
                    report.push_ok(SECTION, "TD completed.");
                }
            }
            Err(err) => report.push_err(SECTION, err.to_string()),
        }
    }

    /// Run the sea-surface-line pass over every configured dataset.
    pub fn detect_surface_lines(&self) -> BatchReport {
        const SECTION: &str = "ADCP SSL";
        let mut report = BatchReport::default();
        if let Err(err) = schema_validator::validate_ssl(&self.doc) {
            report.push_err(SECTION, err.to_string());
            return report;
        }
        let run = (|| -> Result<Vec<(String, Result<()>)>> {
            let settings = self.doc.adcp_settings()?;
            let output = self.doc.output_options()?;
            let sources = self.doc.ssl_detect_paths()?;
            let saves = self.doc.ssl_save_paths()?;
            let debug_only = self.doc.debug_flag();
            // Conversion already removed the drift when correct0drift was
            // set; this pass corrects only what conversion left alone.
            let apply_drift = !settings.correct0drift;

            let mut outcomes = Vec::new();
            for station in Self::sorted_keys(&sources) {
                let outcome = (|| -> Result<()> {
                    let filter = settings.filter.get(&station).ok_or_else(|| {
                        MooringError::configuration(format!(
                            "Preprocess->adcpInfo->filter lacks {station}"
                        ))
                    })?;
                    let jump_threshold =
                        *settings.valid_dep_dif.get(&station).ok_or_else(|| {
                            MooringError::configuration(format!(
                                "Preprocess->adcpInfo->valid_dep_dif lacks {station}"
                            ))
                        })?;
                    let save = saves.get(&station).ok_or_else(|| {
                        MooringError::configuration(format!(
                            "Preprocess->adcpSavePath lacks {station}"
                        ))
                    })?;
                    ssl_detector::detect_surface_line(
                        &self.doc.resolve(&sources[&station])?,
                        &self.doc.resolve(save)?,
                        jump_threshold,
                        filter,
                        apply_drift,
                        debug_only,
                        &SslTuning::default(),
                        &output,
                    )
                })();
                outcomes.push((station.clone(), outcome));
            }
            Ok(outcomes)
        })();

        match run {
            Ok(outcomes) => {
                let mut failed = false;
                for (station, outcome) in outcomes {
                    if let Err(err) = outcome {
                        report.push_err(SECTION, format!("{station}: {err}"));
                        failed = true;
                    }
                }
                if !failed {
                    report.push_ok(SECTION, "ADCP SSL detection completed.");
                }
            }
            Err(err) => report.push_err(SECTION, err.to_string()),
        }
        report
    }

    /// Trim every configured dataset to its valid time window.
    pub fn extract_valid_windows(&self) -> BatchReport {
        let mut report = BatchReport::default();
        for section in self.doc.intercept_section_run() {
            let kind = match section.as_str() {
                "adcp" => InstrumentKind::Adcp,
                "td" => InstrumentKind::Td,
                other => {
                    report.push_err(other, format!("unknown intercept section '{other}'"));
                    continue;
                }
            };
            self.run_extract(kind, &mut report);
        }
        report
    }

    fn run_extract(&self, kind: InstrumentKind, report: &mut BatchReport) {
        let section = kind.section().to_uppercase();
        if let Err(err) = schema_validator::validate_intercept(&self.doc, kind) {
            report.push_err(&section, err.to_string());
            return;
        }
        let run = (|| -> Result<Vec<(String, Result<()>)>> {
            let output = self.doc.output_options()?;
            let thresholds = match kind {
                InstrumentKind::Adcp => self.doc.adcp_settings()?.valid_dep_dif,
                InstrumentKind::Td => self.doc.td_settings()?.valid_dep_dif,
                InstrumentKind::Ctd => Default::default(),
            };
            let sources = self.doc.path_map(&["PreprocessData", kind.section()])?;
            let saves = self
                .doc
                .path_map(&["Preprocess", "intercept", "save_path", kind.section()])?;

            let mut outcomes = Vec::new();
            for station in Self::sorted_keys(&saves) {
                let outcome = (|| -> Result<()> {
                    let source = sources.get(&station).ok_or_else(|| {
                        MooringError::configuration(format!(
                            "PreprocessData->{} lacks {station}",
                            kind.section()
                        ))
                    })?;
                    let jump_threshold = *thresholds.get(&station).ok_or_else(|| {
                        MooringError::configuration(format!(
                            "valid_dep_dif lacks {station} for the {} section",
                            kind.section()
                        ))
                    })?;
                    valid_window::extract_valid_window(
                        &self.doc.resolve(source)?,
                        &self.doc.resolve(&saves[&station])?,
                        AVERAGE_GROUP,
                        jump_threshold,
                        &output,
                    )?;
                    Ok(())
                })();
                outcomes.push((station.clone(), outcome));
            }
            Ok(outcomes)
        })();

        match run {
            Ok(outcomes) => {
                let mut failed = false;
                for (station, outcome) in outcomes {
                    if let Err(err) = outcome {
                        report.push_err(&section, format!("{station}: {err}"));
                        failed = true;
                    }
                }
                if !failed {
                    report.push_ok(&section, format!("{section} completed."));
                }
            }
            Err(err) => report.push_err(&section, err.to_string()),
        }
        info!(section = %section, "valid-time-window extraction attempted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn report_renders_successes_and_numbered_failures() {
        let mut report = BatchReport::default();
        report.push_ok("ADCP", "ADCP completed.");
        report.push_err("CTD", "The key bin_size is missing in the node Preprocess->ctdInfo");
        report.push_err("TD", "S1: Zero-drift boundary not found in depth series (10 samples scanned with threshold 0.2)");

        let rendered = report.render();
        assert!(rendered.starts_with("ADCP completed."));
        assert!(rendered.contains("Error message 1 (CTD):"));
        assert!(rendered.contains("Error message 2 (TD):"));
        assert_eq!(report.failure_count(), 2);
        assert!(!report.is_clean());
    }

    #[test]
    fn invalid_sections_are_collected_not_fatal() {
        // Document with a section list but no usable configuration: every
        // section must fail validation and land in the report.
        let doc = ConfigDocument::new(json!({
            "prefix": "/nonexistent/",
            "SectionRun": ["adcp", "td", "sonar"],
        }));
        let processor = Preprocessor::with_context(
            doc,
            ExecutionContext::with_workers(1).unwrap(),
        );
        let report = processor.convert_sections();
        assert_eq!(report.failure_count(), 3);
        let rendered = report.render();
        assert!(rendered.contains("node is missing"));
        assert!(rendered.contains("unknown instrument section 'sonar'"));
    }
}
