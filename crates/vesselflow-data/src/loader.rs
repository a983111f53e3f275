//! Reads data files and resolves them into a resource library and exchange
//! configuration.
//!
//! Provides format detection (RON/JSON/TOML), file discovery, and
//! deserialization helpers, plus [`load_exchange_data`] which ties them
//! together for a data directory.

use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use vesselflow_core::config::ExchangeConfig;
use vesselflow_core::id::ResourceId;
use vesselflow_core::resource::{DisplayUnit, LibraryError, ResourceLibrary};

use crate::schema::ResourceData;

// ===========================================================================
// Errors
// ===========================================================================

/// Errors that can occur during data loading.
#[derive(Debug, thiserror::Error)]
pub enum DataLoadError {
    /// A required data file was not found in the given directory.
    #[error("required file '{file}' not found in {dir}")]
    MissingRequired { file: String, dir: PathBuf },

    /// The file has an extension we don't support.
    #[error("unsupported format for file: {file}")]
    UnsupportedFormat { file: PathBuf },

    /// Two files with the same base name but different formats exist.
    #[error("conflicting formats: {a} and {b}")]
    ConflictingFormats { a: PathBuf, b: PathBuf },

    /// A deserialization error occurred.
    #[error("parse error in {file}: {detail}")]
    Parse { file: PathBuf, detail: String },

    /// The resources parsed but do not form a valid library.
    #[error("invalid resource library in {file}: {source}")]
    Library {
        file: PathBuf,
        #[source]
        source: LibraryError,
    },

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ===========================================================================
// Format detection
// ===========================================================================

/// Supported data file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ron,
    Toml,
    Json,
}

/// Detect the format of a file based on its extension.
pub fn detect_format(path: &Path) -> Result<Format, DataLoadError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("ron") => Ok(Format::Ron),
        Some("toml") => Ok(Format::Toml),
        Some("json") => Ok(Format::Json),
        _ => Err(DataLoadError::UnsupportedFormat {
            file: path.to_path_buf(),
        }),
    }
}

// ===========================================================================
// File discovery
// ===========================================================================

/// Scan a directory for a data file with the given base name (without extension).
///
/// Looks for `{base_name}.ron`, `{base_name}.toml`, and `{base_name}.json`.
/// Returns `Ok(None)` if no file is found, or `Err(ConflictingFormats)` if
/// multiple formats exist for the same base name.
pub fn find_data_file(dir: &Path, base_name: &str) -> Result<Option<PathBuf>, DataLoadError> {
    let extensions = ["ron", "toml", "json"];
    let mut found: Option<PathBuf> = None;

    for ext in &extensions {
        let candidate = dir.join(format!("{base_name}.{ext}"));
        if candidate.exists() {
            if let Some(ref existing) = found {
                return Err(DataLoadError::ConflictingFormats {
                    a: existing.clone(),
                    b: candidate,
                });
            }
            found = Some(candidate);
        }
    }

    Ok(found)
}

/// Like [`find_data_file`], but returns an error if no file is found.
pub fn require_data_file(dir: &Path, base_name: &str) -> Result<PathBuf, DataLoadError> {
    find_data_file(dir, base_name)?.ok_or_else(|| DataLoadError::MissingRequired {
        file: base_name.to_string(),
        dir: dir.to_path_buf(),
    })
}

// ===========================================================================
// Deserialization
// ===========================================================================

fn parse_error(path: &Path, detail: impl ToString) -> DataLoadError {
    DataLoadError::Parse {
        file: path.to_path_buf(),
        detail: detail.to_string(),
    }
}

/// Read a file and deserialize it according to its format (detected from extension).
pub fn deserialize_file<T: DeserializeOwned>(path: &Path) -> Result<T, DataLoadError> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;

    match format {
        Format::Ron => ron::from_str(&content).map_err(|e| parse_error(path, e)),
        Format::Json => serde_json::from_str(&content).map_err(|e| parse_error(path, e)),
        Format::Toml => toml::from_str(&content).map_err(|e| parse_error(path, e)),
    }
}

/// Deserialize a list from a file. For TOML files, extracts the array at the
/// given `toml_key` from a top-level table. For RON and JSON, deserializes
/// directly as `Vec<T>`.
pub fn deserialize_list<T: DeserializeOwned>(path: &Path, toml_key: &str) -> Result<Vec<T>, DataLoadError> {
    if detect_format(path)? != Format::Toml {
        return deserialize_file(path);
    }
    let content = std::fs::read_to_string(path)?;
    let table: toml::Value = toml::from_str(&content).map_err(|e| parse_error(path, e))?;
    let array = table
        .get(toml_key)
        .ok_or_else(|| parse_error(path, format!("missing key '{toml_key}' in TOML file")))?
        .clone();
    array.try_into().map_err(|e: toml::de::Error| parse_error(path, e))
}

// ===========================================================================
// Loading pipeline
// ===========================================================================

/// Everything a vessel exchange needs from data files.
#[derive(Debug, Clone)]
pub struct ExchangeData {
    pub library: ResourceLibrary,
    pub config: ExchangeConfig,
}

/// Load `resources.*` (required) and `exchange.*` (optional) from `dir`.
///
/// A missing exchange file yields [`ExchangeConfig::default`]; fields left out
/// of it take their defaults too.
pub fn load_exchange_data(dir: &Path) -> Result<ExchangeData, DataLoadError> {
    let resources_path = require_data_file(dir, "resources")?;
    let resources: Vec<ResourceData> = deserialize_list(&resources_path, "resources")?;
    let library = build_library(resources).map_err(|source| DataLoadError::Library {
        file: resources_path.clone(),
        source,
    })?;

    let config = match find_data_file(dir, "exchange")? {
        Some(path) => deserialize_file(&path)?,
        None => ExchangeConfig::default(),
    };

    tracing::debug!(
        dir = %dir.display(),
        resources = library.len(),
        "loaded exchange data"
    );
    Ok(ExchangeData { library, config })
}

fn build_library(resources: Vec<ResourceData>) -> Result<ResourceLibrary, LibraryError> {
    let mut builder = ResourceLibrary::builder();
    for data in resources {
        let unit = data.unit.map(DisplayUnit::from).unwrap_or_default();
        match data.id {
            Some(id) => builder.register_with_id(ResourceId(id), &data.name, data.kind.into(), unit),
            None => builder.register(&data.name, data.kind.into(), unit),
        };
    }
    builder.build()
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use vesselflow_core::resource::ResourceKind;

    /// Create a temporary directory with a unique name for test isolation.
    fn make_test_dir(suffix: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("vesselflow_data_test_{suffix}_{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// Clean up a test directory.
    fn cleanup(dir: &Path) {
        let _ = fs::remove_dir_all(dir);
    }

    const RESOURCES_RON: &str = r#"[
        (name: "Megajoules", unit: Some((symbol: "W", scale: 1000000.0))),
        (name: "WasteHeat", kind: waste_heat, unit: Some((symbol: "W", scale: 1000000.0))),
        (name: "LqdHydrogen", id: Some(40)),
    ]"#;

    // -----------------------------------------------------------------------
    // detect_format
    // -----------------------------------------------------------------------

    #[test]
    fn detect_format_by_extension() {
        assert_eq!(detect_format(Path::new("resources.ron")).unwrap(), Format::Ron);
        assert_eq!(detect_format(Path::new("resources.toml")).unwrap(), Format::Toml);
        assert_eq!(detect_format(Path::new("resources.json")).unwrap(), Format::Json);
    }

    #[test]
    fn detect_format_unsupported() {
        assert!(matches!(
            detect_format(Path::new("resources.yaml")),
            Err(DataLoadError::UnsupportedFormat { .. })
        ));
        assert!(matches!(
            detect_format(Path::new("resources")),
            Err(DataLoadError::UnsupportedFormat { .. })
        ));
    }

    // -----------------------------------------------------------------------
    // find_data_file / require_data_file
    // -----------------------------------------------------------------------

    #[test]
    fn find_data_file_found_and_missing() {
        let dir = make_test_dir("find");
        assert_eq!(find_data_file(&dir, "resources").unwrap(), None);

        fs::write(dir.join("resources.json"), "[]").unwrap();
        assert_eq!(
            find_data_file(&dir, "resources").unwrap(),
            Some(dir.join("resources.json"))
        );

        cleanup(&dir);
    }

    #[test]
    fn find_data_file_conflict() {
        let dir = make_test_dir("conflict");
        fs::write(dir.join("resources.ron"), "[]").unwrap();
        fs::write(dir.join("resources.json"), "[]").unwrap();

        let result = find_data_file(&dir, "resources");
        assert!(matches!(result, Err(DataLoadError::ConflictingFormats { .. })));

        cleanup(&dir);
    }

    #[test]
    fn require_data_file_missing() {
        let dir = make_test_dir("require_missing");
        let err = require_data_file(&dir, "resources").unwrap_err();
        assert!(matches!(err, DataLoadError::MissingRequired { ref file, .. } if file == "resources"));
        assert!(err.to_string().contains("required file 'resources'"));
        cleanup(&dir);
    }

    // -----------------------------------------------------------------------
    // deserialize_list
    // -----------------------------------------------------------------------

    #[test]
    fn deserialize_list_toml_uses_key() {
        let dir = make_test_dir("list_toml");
        let path = dir.join("resources.toml");
        fs::write(
            &path,
            r#"
[[resources]]
name = "Megajoules"

[[resources]]
name = "WasteHeat"
kind = "waste_heat"
"#,
        )
        .unwrap();

        let list: Vec<ResourceData> = deserialize_list(&path, "resources").unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[1].name, "WasteHeat");

        let missing: Result<Vec<ResourceData>, _> = deserialize_list(&path, "other");
        assert!(matches!(missing, Err(DataLoadError::Parse { .. })));

        cleanup(&dir);
    }

    #[test]
    fn deserialize_file_parse_error() {
        let dir = make_test_dir("parse_error");
        let path = dir.join("exchange.json");
        fs::write(&path, "{ not json").unwrap();

        let result: Result<ExchangeConfig, _> = deserialize_file(&path);
        assert!(matches!(result, Err(DataLoadError::Parse { .. })));

        cleanup(&dir);
    }

    // -----------------------------------------------------------------------
    // load_exchange_data
    // -----------------------------------------------------------------------

    #[test]
    fn load_ron_resources_with_default_config() {
        let dir = make_test_dir("load_ron");
        fs::write(dir.join("resources.ron"), RESOURCES_RON).unwrap();

        let data = load_exchange_data(&dir).unwrap();
        assert_eq!(data.config, ExchangeConfig::default());
        assert_eq!(data.library.len(), 3);
        assert_eq!(data.library.id_of("Megajoules"), Some(ResourceId(0)));
        assert_eq!(data.library.id_of("WasteHeat"), Some(ResourceId(1)));
        assert_eq!(data.library.id_of("LqdHydrogen"), Some(ResourceId(40)));
        assert_eq!(data.library.kind(ResourceId(1)), Some(ResourceKind::WasteHeat));
        assert_eq!(data.library.waste_heat().map(|d| d.id()), Some(ResourceId(1)));
        assert_eq!(
            data.library.get(ResourceId(40)).map(|d| d.unit.clone()),
            Some(DisplayUnit::units())
        );

        cleanup(&dir);
    }

    #[test]
    fn load_exchange_config_from_toml() {
        let dir = make_test_dir("load_toml_config");
        fs::write(dir.join("resources.ron"), RESOURCES_RON).unwrap();
        fs::write(
            dir.join("exchange.toml"),
            "thermal_step_fraction = 0.05\nmax_passes = 32\n",
        )
        .unwrap();

        let data = load_exchange_data(&dir).unwrap();
        assert_eq!(data.config.thermal_step_fraction, 0.05);
        assert_eq!(data.config.max_passes, Some(32));
        assert_eq!(data.config.ratio_epsilon, ExchangeConfig::default().ratio_epsilon);

        cleanup(&dir);
    }

    #[test]
    fn load_requires_resources() {
        let dir = make_test_dir("load_missing");
        fs::write(dir.join("exchange.json"), "{}").unwrap();
        assert!(matches!(
            load_exchange_data(&dir),
            Err(DataLoadError::MissingRequired { .. })
        ));
        cleanup(&dir);
    }

    #[test]
    fn duplicate_resource_names_are_rejected() {
        let dir = make_test_dir("load_duplicate");
        fs::write(
            dir.join("resources.json"),
            r#"[{"name": "Megajoules"}, {"name": "Megajoules"}]"#,
        )
        .unwrap();
        let err = load_exchange_data(&dir).unwrap_err();
        assert!(matches!(
            err,
            DataLoadError::Library {
                source: LibraryError::DuplicateName(ref name),
                ..
            } if name == "Megajoules"
        ));
        cleanup(&dir);
    }

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: DataLoadError = io_err.into();
        assert!(matches!(err, DataLoadError::Io(_)));
    }
}
