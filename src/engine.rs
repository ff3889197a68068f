use crate::{
    filter_runner::FilterRunner,
    mist,
    variant_set::VariantSet,
    vcf_filter::{Connector, FilterField, VcfFilter},
    vep::VepAnnotator,
};
use serde::{Deserialize, Serialize};
use std::{error::Error, fmt, path::Path, sync::Arc};

/// Severity of a user-visible status message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

/// The single status-line notification: timestamped, replacing the
/// previous one. There is no persistent error log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusMessage {
    pub severity: Severity,
    pub text: String,
    pub at_unix_ms: u128,
}

/// Lifecycle of one loaded file. Filtering and annotating are both
/// re-entrant once a file is loaded; `Saved` is left again as soon as
/// the set is mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReaderState {
    #[default]
    Unloaded,
    Loaded,
    Filtered,
    Annotated,
    Saved,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum ErrorCode {
    InvalidInput,
    NotFound,
    Io,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineError {
    pub code: ErrorCode,
    pub message: String,
}

impl EngineError {
    fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl Error for EngineError {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Operation {
    LoadFile {
        path: String,
    },
    AddFilter {
        column: String,
        key: Option<String>,
        connector: Connector,
        value: String,
    },
    ClearFilters,
    ApplyFilters,
    Annotate {
        endpoint: Option<String>,
    },
    SaveVcf {
        path: String,
        filtered_only: bool,
    },
    SaveTsv {
        path: String,
        empty_value: Option<String>,
        filtered_only: bool,
    },
    CombineMist {
        inputs: Vec<String>,
        output: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpResult {
    pub state: ReaderState,
    pub messages: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capabilities {
    pub protocol_version: String,
    pub supported_operations: Vec<String>,
    pub supported_export_formats: Vec<String>,
}

/// Snapshot of the loaded file for introspection commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSummary {
    pub state: ReaderState,
    pub title: Option<String>,
    pub variant_count: usize,
    pub filter_count: usize,
    pub passed_count: Option<usize>,
    pub samples: Vec<String>,
    pub last_message: Option<StatusMessage>,
}

/// Drives one file through load, filter, annotate and save. All mutation
/// of the variant set happens on the calling thread; the background filter
/// pass only ever reads a shared snapshot.
#[derive(Default)]
pub struct CoatEngine {
    set: Option<Arc<VariantSet>>,
    file_name: Option<String>,
    filters: Vec<VcfFilter>,
    passed: Option<Vec<usize>>,
    state: ReaderState,
    runner: FilterRunner,
    last_message: Option<StatusMessage>,
}

impl CoatEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    pub fn variant_set(&self) -> Option<&VariantSet> {
        self.set.as_deref()
    }

    pub fn filters(&self) -> &[VcfFilter] {
        &self.filters
    }

    pub fn passed_indices(&self) -> Option<&[usize]> {
        self.passed.as_deref()
    }

    pub fn last_message(&self) -> Option<&StatusMessage> {
        self.last_message.as_ref()
    }

    /// File name with the changed marker, as a window title would show it.
    pub fn title(&self) -> Option<String> {
        let name = self.file_name.as_ref()?;
        let changed = self.set.as_ref().map(|s| s.changed()).unwrap_or(false);
        Some(if changed {
            format!("{name}*")
        } else {
            name.clone()
        })
    }

    pub fn capabilities() -> Capabilities {
        Capabilities {
            protocol_version: "v1".to_string(),
            supported_operations: vec![
                "LoadFile".to_string(),
                "AddFilter".to_string(),
                "ClearFilters".to_string(),
                "ApplyFilters".to_string(),
                "Annotate".to_string(),
                "SaveVcf".to_string(),
                "SaveTsv".to_string(),
                "CombineMist".to_string(),
            ],
            supported_export_formats: vec!["Vcf".to_string(), "Tsv".to_string()],
        }
    }

    pub fn summary(&self) -> EngineSummary {
        EngineSummary {
            state: self.state,
            title: self.title(),
            variant_count: self.set.as_ref().map(|s| s.len()).unwrap_or(0),
            filter_count: self.filters.len(),
            passed_count: self.passed.as_ref().map(Vec::len),
            samples: self
                .set
                .as_ref()
                .map(|s| s.header().samples().to_vec())
                .unwrap_or_default(),
            last_message: self.last_message.clone(),
        }
    }

    pub fn apply(&mut self, op: Operation) -> Result<OpResult, EngineError> {
        match op {
            Operation::LoadFile { path } => self.load_file(&path),
            Operation::AddFilter {
                column,
                key,
                connector,
                value,
            } => self.add_filter(&column, key.as_deref(), connector, &value),
            Operation::ClearFilters => self.clear_filters(),
            Operation::ApplyFilters => self.apply_filters(),
            Operation::Annotate { endpoint } => self.annotate(endpoint.as_deref()),
            Operation::SaveVcf {
                path,
                filtered_only,
            } => self.save(&path, filtered_only, SaveFormat::Vcf, None),
            Operation::SaveTsv {
                path,
                empty_value,
                filtered_only,
            } => self.save(&path, filtered_only, SaveFormat::Tsv, empty_value),
            Operation::CombineMist { inputs, output } => self.combine_mist(&inputs, &output),
        }
    }

    fn load_file(&mut self, path: &str) -> Result<OpResult, EngineError> {
        self.runner.cancel_and_join();
        let set = VariantSet::from_vcf_file(path)
            .map_err(|e| EngineError::new(ErrorCode::Io, e.to_string()))?;
        let count = set.len();
        self.file_name = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string());
        self.set = Some(Arc::new(set));
        self.passed = None;
        self.state = ReaderState::Loaded;
        Ok(self.finish(
            Severity::Success,
            format!("Loaded {count} variants from '{path}'"),
            vec![],
        ))
    }

    fn add_filter(
        &mut self,
        column: &str,
        key: Option<&str>,
        connector: Connector,
        value: &str,
    ) -> Result<OpResult, EngineError> {
        let field = if column.eq_ignore_ascii_case("INFO") {
            let key = key.ok_or_else(|| {
                EngineError::new(ErrorCode::InvalidInput, "INFO filters need a key")
            })?;
            FilterField::Info(key.to_string())
        } else {
            FilterField::from_column(column).ok_or_else(|| {
                EngineError::new(
                    ErrorCode::InvalidInput,
                    format!("Unknown filter column '{column}'"),
                )
            })?
        };
        let filter = VcfFilter::new(field, connector, value);
        let message = format!("Added filter: {filter}");
        self.filters.push(filter);
        Ok(self.finish(Severity::Info, message, vec![]))
    }

    fn clear_filters(&mut self) -> Result<OpResult, EngineError> {
        self.filters.clear();
        self.passed = None;
        if self.state == ReaderState::Filtered {
            self.state = ReaderState::Loaded;
        }
        Ok(self.finish(Severity::Info, "Cleared all filters".to_string(), vec![]))
    }

    fn apply_filters(&mut self) -> Result<OpResult, EngineError> {
        let set = self.require_set()?.clone();
        let total = set.len();
        let rx = self.runner.restart(set, self.filters.clone());
        let outcome = rx
            .recv()
            .map_err(|_| EngineError::new(ErrorCode::Internal, "Filter pass produced no result"))?;
        if outcome.interrupted {
            return Ok(self.finish(
                Severity::Warning,
                "Filter pass was interrupted by a newer request".to_string(),
                vec![],
            ));
        }
        let passed = outcome.passed.len();
        self.passed = Some(outcome.passed);
        self.state = if self.filters.is_empty() {
            ReaderState::Loaded
        } else {
            ReaderState::Filtered
        };
        Ok(self.finish(
            Severity::Success,
            format!("{passed}/{total} variants pass the active filters"),
            vec![],
        ))
    }

    fn annotate(&mut self, endpoint: Option<&str>) -> Result<OpResult, EngineError> {
        self.runner.cancel_and_join();
        let set_arc = self
            .set
            .as_mut()
            .ok_or_else(|| EngineError::new(ErrorCode::NotFound, "No file loaded"))?;
        // The filter worker has been joined, so the only other possible
        // holder of this Arc is gone and make_mut will not clone.
        let set = Arc::make_mut(set_arc);
        let mut annotator = VepAnnotator::new();
        if let Some(endpoint) = endpoint {
            annotator = annotator.with_endpoint(endpoint);
        }
        let report = annotator
            .annotate(set, &mut |_| {})
            .map_err(|e| EngineError::new(ErrorCode::Internal, e))?;
        self.state = ReaderState::Annotated;
        let severity = if report.failed_chunks.is_empty() {
            Severity::Success
        } else {
            Severity::Warning
        };
        let message = format!(
            "{} of {} variants annotated in {} chunks",
            report.matched, report.total_variants, report.chunk_count
        );
        Ok(self.finish(severity, message, report.failed_chunks))
    }

    fn save(
        &mut self,
        path: &str,
        filtered_only: bool,
        format: SaveFormat,
        empty_value: Option<String>,
    ) -> Result<OpResult, EngineError> {
        let indices = if filtered_only {
            self.passed.clone()
        } else {
            None
        };
        let set_arc = self
            .set
            .as_mut()
            .ok_or_else(|| EngineError::new(ErrorCode::NotFound, "No file loaded"))?;
        let set = Arc::make_mut(set_arc);
        let result = match format {
            SaveFormat::Vcf => set.save_vcf(path, indices.as_deref()),
            SaveFormat::Tsv => set.save_tsv(
                path,
                indices.as_deref(),
                empty_value.as_deref().unwrap_or(crate::variant::EMPTY_VALUE),
            ),
        };
        result.map_err(|e| EngineError::new(ErrorCode::Io, e.to_string()))?;
        set.set_changed(false);
        self.state = ReaderState::Saved;
        let written = indices.as_ref().map(Vec::len).unwrap_or_else(|| set.len());
        Ok(self.finish(
            Severity::Success,
            format!("Wrote {written} variants to '{path}'"),
            vec![],
        ))
    }

    fn combine_mist(&mut self, inputs: &[String], output: &str) -> Result<OpResult, EngineError> {
        if inputs.is_empty() {
            return Err(EngineError::new(
                ErrorCode::InvalidInput,
                "Combine needs at least one MIST input",
            ));
        }
        let count = mist::combine_files(inputs, output)
            .map_err(|e| EngineError::new(ErrorCode::Io, e.to_string()))?;
        Ok(self.finish(
            Severity::Success,
            format!(
                "Combined {} MIST files into '{output}' ({count} rows)",
                inputs.len()
            ),
            vec![],
        ))
    }

    fn require_set(&self) -> Result<&Arc<VariantSet>, EngineError> {
        self.set
            .as_ref()
            .ok_or_else(|| EngineError::new(ErrorCode::NotFound, "No file loaded"))
    }

    fn finish(&mut self, severity: Severity, message: String, warnings: Vec<String>) -> OpResult {
        self.last_message = Some(StatusMessage {
            severity,
            text: message.clone(),
            at_unix_ms: now_unix_ms(),
        });
        OpResult {
            state: self.state,
            messages: vec![message],
            warnings,
        }
    }
}

enum SaveFormat {
    Vcf,
    Tsv,
}

fn now_unix_ms() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}
