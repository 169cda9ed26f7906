//! Reading reference datasets from disk.
//!
//! Datasets arrive from the download scripts in two shapes: CSV (one row
//! per record, header row required) and line-delimited JSON (one object per
//! line). A [`CatalogManifest`] lists the files and tells the loader which
//! columns hold the name and the identifier and which categories each file
//! feeds.
//!
//! Every failure here is fatal: a catalog built from half a file would
//! silently turn matches into misses.

use super::ReferenceRecord;
use crate::category::EntityCategory;
use crate::error::CatalogLoadError;
use crate::output::RESERVED_ATTRIBUTES;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// File format of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetFormat {
    /// Tabular, comma-separated, header row first.
    Csv,
    /// One JSON object per line.
    Jsonl,
}

impl DatasetFormat {
    /// Infer the format from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_lowercase().as_str() {
            "csv" => Some(DatasetFormat::Csv),
            "jsonl" | "ndjson" => Some(DatasetFormat::Jsonl),
            _ => None,
        }
    }
}

/// One dataset file and how to read it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatasetSpec {
    pub path: PathBuf,
    /// Defaults to the format implied by the file extension.
    #[serde(default)]
    pub format: Option<DatasetFormat>,
    /// Categories whose index receives this dataset's records.
    pub categories: Vec<EntityCategory>,
    /// Field holding the canonical name.
    pub name_field: String,
    /// Field holding the unique identifier.
    pub id_field: String,
    /// Fields copied into the record's attributes. `None` copies all of
    /// them except name and identifier.
    #[serde(default)]
    pub attributes: Option<Vec<String>>,
    /// A missing optional file is skipped instead of failing the load.
    #[serde(default)]
    pub optional: bool,
}

/// The list of datasets that make up a catalog.
///
/// Stored as JSON:
///
/// ```json
/// {
///   "datasets": [
///     { "path": "elver_per_name.jsonl", "categories": ["river"],
///       "name_field": "elvenavn", "id_field": "elvId" }
///   ]
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogManifest {
    pub datasets: Vec<DatasetSpec>,
}

impl CatalogManifest {
    /// Read a manifest; relative dataset paths resolve against its directory.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CatalogLoadError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CatalogLoadError::MissingFile {
                path: path.to_path_buf(),
            });
        }
        let text = std::fs::read_to_string(path).map_err(|e| CatalogLoadError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut manifest: CatalogManifest =
            serde_json::from_str(&text).map_err(|e| CatalogLoadError::InvalidManifest {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        for ds in &mut manifest.datasets {
            if ds.path.is_relative() {
                ds.path = base.join(&ds.path);
            }
        }
        manifest.validate(path)?;
        Ok(manifest)
    }

    /// The NVE file layout the download scripts produce in `data_dir`.
    ///
    /// Dams have no dataset of their own; they are matched against the
    /// lake register, where regulated lakes carry their dam data. Solar and
    /// wind plants share the facility index with hydropower and may be
    /// absent.
    pub fn nve_defaults(data_dir: impl AsRef<Path>) -> Self {
        let dir = data_dir.as_ref();
        Self {
            datasets: vec![
                DatasetSpec {
                    path: dir.join("elver_per_name.jsonl"),
                    format: Some(DatasetFormat::Jsonl),
                    categories: vec![EntityCategory::River],
                    name_field: "elvenavn".into(),
                    id_field: "elvId".into(),
                    attributes: None,
                    optional: false,
                },
                DatasetSpec {
                    path: dir.join("innsjoe_full.jsonl"),
                    format: Some(DatasetFormat::Jsonl),
                    categories: vec![EntityCategory::Lake, EntityCategory::Dam],
                    name_field: "navn".into(),
                    id_field: "vatnLnr".into(),
                    attributes: None,
                    optional: false,
                },
                DatasetSpec {
                    path: dir.join("vannkraftverk.jsonl"),
                    format: Some(DatasetFormat::Jsonl),
                    categories: vec![EntityCategory::Facility],
                    name_field: "vannkraftverkNavn".into(),
                    id_field: "vannkraftverkNr".into(),
                    attributes: None,
                    optional: false,
                },
                DatasetSpec {
                    path: dir.join("solkraftverk.jsonl"),
                    format: Some(DatasetFormat::Jsonl),
                    categories: vec![EntityCategory::Facility],
                    name_field: "anleggNavn".into(),
                    id_field: "anleggsNr".into(),
                    attributes: None,
                    optional: true,
                },
                DatasetSpec {
                    path: dir.join("vindkraftverk.jsonl"),
                    format: Some(DatasetFormat::Jsonl),
                    categories: vec![EntityCategory::Facility],
                    name_field: "anleggNavn".into(),
                    id_field: "anleggsNr".into(),
                    attributes: None,
                    optional: true,
                },
            ],
        }
    }

    fn validate(&self, manifest_path: &Path) -> Result<(), CatalogLoadError> {
        let invalid = |detail: String| CatalogLoadError::InvalidManifest {
            path: manifest_path.to_path_buf(),
            detail,
        };
        if self.datasets.is_empty() {
            return Err(invalid("no datasets listed".into()));
        }
        for ds in &self.datasets {
            if ds.categories.is_empty() {
                return Err(invalid(format!("dataset '{}' has no categories", ds.path.display())));
            }
            if ds.format.is_none() && DatasetFormat::from_path(&ds.path).is_none() {
                return Err(invalid(format!(
                    "cannot infer format of '{}'; set \"format\" to \"csv\" or \"jsonl\"",
                    ds.path.display()
                )));
            }
        }
        Ok(())
    }
}

/// Read every record of one dataset, tagged with the dataset's first
/// category. The catalog clones them into the other categories' indexes.
pub(crate) fn read_dataset(spec: &DatasetSpec) -> Result<Vec<ReferenceRecord>, CatalogLoadError> {
    let path = &spec.path;
    if !path.exists() {
        return Err(CatalogLoadError::MissingFile { path: path.clone() });
    }
    let format = spec
        .format
        .or_else(|| DatasetFormat::from_path(path))
        .ok_or_else(|| CatalogLoadError::InvalidManifest {
            path: path.clone(),
            detail: "unknown dataset format".into(),
        })?;
    let category = spec
        .categories
        .first()
        .copied()
        .ok_or_else(|| CatalogLoadError::InvalidManifest {
            path: path.clone(),
            detail: "dataset has no categories".into(),
        })?;

    let rows = match format {
        DatasetFormat::Csv => read_csv_rows(path)?,
        DatasetFormat::Jsonl => read_jsonl_rows(path)?,
    };

    let mut records = Vec::with_capacity(rows.len());
    let mut skipped = 0usize;
    for (line, fields) in rows {
        match build_record(spec, category, line, fields)? {
            Some(record) => records.push(record),
            None => skipped += 1,
        }
    }

    if skipped > 0 {
        debug!("{}: skipped {} rows without a name", path.display(), skipped);
    }
    info!("Loaded {} records from {}", records.len(), path.display());
    Ok(records)
}

type Row = (u64, BTreeMap<String, String>);

fn read_csv_rows(path: &Path) -> Result<Vec<Row>, CatalogLoadError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| csv_error(path, e))?;
    let headers = reader.headers().map_err(|e| csv_error(path, e))?.clone();

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|e| csv_error(path, e))?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let fields = headers
            .iter()
            .zip(record.iter())
            .filter(|(_, v)| !v.trim().is_empty())
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        rows.push((line, fields));
    }
    Ok(rows)
}

fn csv_error(path: &Path, e: csv::Error) -> CatalogLoadError {
    let line = e.position().map(|p| p.line()).unwrap_or(0);
    match e.into_kind() {
        csv::ErrorKind::Io(source) => CatalogLoadError::Read {
            path: path.to_path_buf(),
            source,
        },
        kind => CatalogLoadError::MalformedRow {
            path: path.to_path_buf(),
            line,
            detail: format!("{kind:?}"),
        },
    }
}

fn read_jsonl_rows(path: &Path) -> Result<Vec<Row>, CatalogLoadError> {
    let file = File::open(path).map_err(|e| CatalogLoadError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut rows = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line_no = idx as u64 + 1;
        let line = line.map_err(|e| CatalogLoadError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let value: serde_json::Value =
            serde_json::from_str(&line).map_err(|e| CatalogLoadError::MalformedRow {
                path: path.to_path_buf(),
                line: line_no,
                detail: e.to_string(),
            })?;
        let serde_json::Value::Object(map) = value else {
            return Err(CatalogLoadError::MalformedRow {
                path: path.to_path_buf(),
                line: line_no,
                detail: "expected a JSON object".into(),
            });
        };
        let fields = map
            .into_iter()
            .filter_map(|(k, v)| json_to_attribute(v).map(|v| (k, v)))
            .collect();
        rows.push((line_no, fields));
    }
    Ok(rows)
}

/// Flatten a JSON value into an attribute string. Nulls are dropped.
fn json_to_attribute(value: serde_json::Value) -> Option<String> {
    use serde_json::Value;
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items.into_iter().filter_map(json_to_attribute).collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join(", "))
            }
        }
        other @ Value::Object(_) => Some(other.to_string()),
    }
}

fn build_record(
    spec: &DatasetSpec,
    category: EntityCategory,
    line: u64,
    mut fields: BTreeMap<String, String>,
) -> Result<Option<ReferenceRecord>, CatalogLoadError> {
    let name = match fields.remove(&spec.name_field) {
        Some(n) if !n.trim().is_empty() => n.trim().to_string(),
        _ => return Ok(None),
    };
    let id = fields
        .remove(&spec.id_field)
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| CatalogLoadError::MissingField {
            path: spec.path.clone(),
            line,
            field: spec.id_field.clone(),
        })?;

    if let Some(ref keep) = spec.attributes {
        fields.retain(|k, _| keep.contains(k));
    }
    add_bbox_centre(&mut fields);

    let attributes = fields
        .into_iter()
        .map(|(k, v)| (attribute_key(&k), single_line(&v)))
        .collect();

    Ok(Some(ReferenceRecord {
        id,
        name,
        category,
        attributes,
    }))
}

/// Records that only carry a bounding box get its centre as a point.
fn add_bbox_centre(fields: &mut BTreeMap<String, String>) {
    if fields.contains_key("center_lat") {
        return;
    }
    let get = |k: &str| fields.get(k).and_then(|v| v.trim().parse::<f64>().ok());
    let (Some(ul_lat), Some(ul_lon), Some(lr_lat), Some(lr_lon)) =
        (get("ul_lat"), get("ul_lon"), get("lr_lat"), get("lr_lon"))
    else {
        return;
    };
    let in_range = |lat: f64, lon: f64| (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon);
    if !in_range(ul_lat, ul_lon) || !in_range(lr_lat, lr_lon) {
        return;
    }
    fields.insert("center_lat".into(), format!("{:.5}", (ul_lat + lr_lat) / 2.0));
    fields.insert("center_lon".into(), format!("{:.5}", (ul_lon + lr_lon) / 2.0));
}

/// Make a dataset field name usable as a tag attribute.
///
/// Characters outside `[A-Za-z0-9_:-]` become `_`; names that clash with
/// the resolver's own attributes get a `data_` prefix.
fn attribute_key(field: &str) -> String {
    let key: String = field
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == ':' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if RESERVED_ATTRIBUTES.contains(&key.as_str()) {
        format!("data_{key}")
    } else {
        key
    }
}

fn single_line(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    fn spec(path: PathBuf, name_field: &str, id_field: &str) -> DatasetSpec {
        DatasetSpec {
            path,
            format: None,
            categories: vec![EntityCategory::Lake],
            name_field: name_field.into(),
            id_field: id_field.into(),
            attributes: None,
            optional: false,
        }
    }

    #[test]
    fn reads_jsonl_and_flattens_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "innsjoe.jsonl",
            concat!(
                r#"{"navn": "Mjøsa", "vatnLnr": 3, "kommune": ["Ringsaker", "Hamar"], "areal_km2": 369.5, "magasinNr": null}"#,
                "\n\n",
                r#"{"navn": null, "vatnLnr": 4}"#,
                "\n",
            ),
        );
        let records = read_dataset(&spec(path, "navn", "vatnLnr")).unwrap();
        assert_eq!(records.len(), 1, "nameless row is skipped");
        let r = &records[0];
        assert_eq!(r.id, "3");
        assert_eq!(r.name, "Mjøsa");
        assert_eq!(r.attributes["kommune"], "Ringsaker, Hamar");
        assert_eq!(r.attributes["areal_km2"], "369.5");
        assert!(!r.attributes.contains_key("magasinNr"));
    }

    #[test]
    fn reads_csv_with_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "vindkraftverk.csv",
            "id,navn,kommune,status\n11,Smøla,Smøla,I drift\n12,Hitra,,I drift\n",
        );
        let mut s = spec(path, "navn", "id");
        s.categories = vec![EntityCategory::Facility];
        let records = read_dataset(&s).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].category, EntityCategory::Facility);
        assert_eq!(records[0].attributes["status"], "I drift");
        assert!(!records[1].attributes.contains_key("kommune"));
    }

    #[test]
    fn malformed_jsonl_line_is_fatal_with_line_number() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "elver.jsonl",
            "{\"elvenavn\": \"Otra\", \"elvId\": 1}\n{\"elvenavn\": \"Glomma\", \n",
        );
        let err = read_dataset(&spec(path, "elvenavn", "elvId")).unwrap_err();
        match err {
            CatalogLoadError::MalformedRow { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn non_object_line_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "elver.jsonl", "[1, 2, 3]\n");
        let err = read_dataset(&spec(path, "elvenavn", "elvId")).unwrap_err();
        assert!(matches!(err, CatalogLoadError::MalformedRow { line: 1, .. }));
    }

    #[test]
    fn missing_identifier_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "elver.jsonl", "{\"elvenavn\": \"Otra\"}\n");
        let err = read_dataset(&spec(path, "elvenavn", "elvId")).unwrap_err();
        assert!(matches!(
            err,
            CatalogLoadError::MissingField { line: 1, ref field, .. } if field == "elvId"
        ));
    }

    #[test]
    fn ragged_csv_row_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "d.csv", "id,navn\n1,Otra\n2,Glomma,extra\n");
        let err = read_dataset(&spec(path, "navn", "id")).unwrap_err();
        assert!(matches!(err, CatalogLoadError::MalformedRow { .. }), "got {err}");
    }

    #[test]
    fn missing_file_is_reported() {
        let err = read_dataset(&spec(PathBuf::from("/nonexistent/elver.jsonl"), "n", "i")).unwrap_err();
        assert!(matches!(err, CatalogLoadError::MissingFile { .. }));
    }

    #[test]
    fn bbox_centre_is_derived() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "elver.jsonl",
            r#"{"elvenavn": "Otra", "elvId": 7, "ul_lat": "59.0", "ul_lon": "7.0", "lr_lat": "58.0", "lr_lon": "8.0"}"#,
        );
        let records = read_dataset(&spec(path, "elvenavn", "elvId")).unwrap();
        assert_eq!(records[0].attributes["center_lat"], "58.50000");
        assert_eq!(records[0].attributes["center_lon"], "7.50000");
    }

    #[test]
    fn attribute_filter_and_key_sanitising() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "d.csv",
            "id,navn,maks ytelse,eier,score\n1,Luster,12.5,Statkraft,9\n",
        );
        let mut s = spec(path, "navn", "id");
        s.attributes = Some(vec!["maks ytelse".into(), "score".into()]);
        let records = read_dataset(&s).unwrap();
        let attrs = &records[0].attributes;
        assert_eq!(attrs["maks_ytelse"], "12.5");
        assert_eq!(attrs["data_score"], "9");
        assert!(!attrs.contains_key("eier"));
    }

    #[test]
    fn manifest_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = write_file(
            dir.path(),
            "catalog.json",
            r#"{"datasets": [{"path": "elver.jsonl", "categories": ["river"], "name_field": "elvenavn", "id_field": "elvId"}]}"#,
        );
        let m = CatalogManifest::from_path(&manifest).unwrap();
        assert_eq!(m.datasets[0].path, dir.path().join("elver.jsonl"));
    }

    #[test]
    fn nve_defaults_marks_solar_and_wind_optional() {
        let m = CatalogManifest::nve_defaults("data");
        let optional: Vec<_> = m
            .datasets
            .iter()
            .filter(|d| d.optional)
            .map(|d| d.path.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(optional, ["solkraftverk.jsonl", "vindkraftverk.jsonl"]);
        assert!(m.datasets.iter().filter(|d| d.optional).all(|d| d.categories == [EntityCategory::Facility]));
    }

    #[test]
    fn manifest_reads_optional_flag() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = write_file(
            dir.path(),
            "catalog.json",
            r#"{"datasets": [{"path": "vind.jsonl", "categories": ["facility"], "name_field": "anleggNavn", "id_field": "anleggsNr", "optional": true}]}"#,
        );
        let m = CatalogManifest::from_path(&manifest).unwrap();
        assert!(m.datasets[0].optional);
    }

    #[test]
    fn manifest_rejects_unknown_format() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = write_file(
            dir.path(),
            "catalog.json",
            r#"{"datasets": [{"path": "elver.xlsx", "categories": ["river"], "name_field": "n", "id_field": "i"}]}"#,
        );
        let err = CatalogManifest::from_path(&manifest).unwrap_err();
        assert!(matches!(err, CatalogLoadError::InvalidManifest { .. }));
    }
}
