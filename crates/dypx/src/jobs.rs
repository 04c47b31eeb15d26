//! Spreadsheet rows to pipeline jobs.
//!
//! Each input CSV row becomes one [`Job`]:
//! - columns whose name contains `search` form the PACS search directive,
//!   keyed by the part after the first `_` (`search_PatientID` → `PatientID`)
//! - columns whose name contains `status`, `folder` or `path` form the push
//!   block
//! - all columns form the raw row, echoed into the output CSV

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use dypx_pipeline::{OverrideMap, SearchContext};
use walkdir::WalkDir;

/// Column holding a row's outcome.
pub const STATUS_COLUMN: &str = "status";

/// One spreadsheet row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Job {
    pub search: SearchContext,
    pub push: Vec<(String, String)>,
    pub raw: Vec<(String, String)>,
}

impl Job {
    pub fn from_row(headers: &[String], values: &[String]) -> Self {
        let mut job = Job::default();
        for (column, value) in headers.iter().zip(values) {
            let lower = column.to_lowercase();
            if lower.contains("search") {
                job.search
                    .entry(search_key(column))
                    .or_insert_with(|| value.clone());
            }
            if ["status", "folder", "path"].iter().any(|k| lower.contains(k)) {
                job.push.push((column.clone(), value.clone()));
            }
            job.raw.push((column.clone(), value.clone()));
        }
        job
    }

    /// Push-block value of `column`, empty if absent.
    pub fn push_value(&self, column: &str) -> &str {
        self.push
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v.as_str())
            .unwrap_or("")
    }

    /// Rows with a recorded status were already processed.
    pub fn is_done(&self) -> bool {
        !self.push_value(STATUS_COLUMN).is_empty()
    }
}

/// Search directive key for a column name.
fn search_key(column: &str) -> String {
    let stem = column.split('.').next().unwrap_or(column);
    stem.split('_').nth(1).unwrap_or(stem).to_string()
}

/// A parsed input file.
#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    pub headers: Vec<String>,
    pub jobs: Vec<Job>,
}

/// Parse CSV text; all-empty rows are dropped, missing cells read as empty.
pub fn parse_sheet<R: Read>(reader: R) -> Result<Sheet> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

    let mut jobs = Vec::new();
    for record in reader.records() {
        let record = record?;
        let values: Vec<String> = (0..headers.len())
            .map(|i| record.get(i).unwrap_or("").to_string())
            .collect();
        if values.iter().all(String::is_empty) {
            continue;
        }
        jobs.push(Job::from_row(&headers, &values));
    }
    Ok(Sheet { headers, jobs })
}

pub fn read_sheet(path: &Path) -> Result<Sheet> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    parse_sheet(file).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Write each job's raw row plus its status.
pub fn write_results(path: &Path, headers: &[String], rows: &[(Job, String)]) -> Result<()> {
    let mut columns = headers.to_vec();
    if !columns.iter().any(|c| c == STATUS_COLUMN) {
        columns.push(STATUS_COLUMN.to_string());
    }

    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    writer.write_record(&columns)?;
    for (job, status) in rows {
        let record = columns.iter().map(|column| {
            if column == STATUS_COLUMN {
                status.as_str()
            } else {
                job.raw
                    .iter()
                    .find(|(c, _)| c == column)
                    .map(|(_, v)| v.as_str())
                    .unwrap_or("")
            }
        });
        writer.write_record(record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Files under `dir` whose relative path matches `pattern`, sorted.
pub fn find_inputs(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let pattern =
        glob::Pattern::new(pattern).with_context(|| format!("Invalid pattern '{pattern}'"))?;

    let mut inputs: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            let relative = e.path().strip_prefix(dir).unwrap_or(e.path());
            pattern.matches_path(relative)
        })
        .map(|e| e.into_path())
        .collect();
    inputs.sort();
    Ok(inputs)
}

/// Endpoints and credentials filled into the anonymization pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnonymizeSettings {
    pub pfdcm_url: String,
    pub pacs_name: String,
    pub cube_url: String,
    pub cube_user: Option<String>,
    pub cube_password: Option<String>,
    pub recipients: String,
    pub smtp_server: String,
}

/// Parameter overrides for the PACS query, retrieve and registration nodes.
pub fn anonymize_overrides(job: &Job, settings: &AnonymizeSettings) -> Result<OverrideMap> {
    let directive = serde_json::to_string(&job.search)?;

    let mut map = OverrideMap::new()
        .with("PACS-query", "PACSurl", settings.pfdcm_url.as_str())
        .with("PACS-query", "PACSname", settings.pacs_name.as_str())
        .with("PACS-query", "PACSdirective", directive)
        .with("PACS-retrieve", "PACSurl", settings.pfdcm_url.as_str())
        .with("PACS-retrieve", "PACSname", settings.pacs_name.as_str())
        .with("PACS-retrieve", "inputJSONfile", "search_results.json")
        .with("PACS-retrieve", "copyInputFile", true);

    let verify = "verify-registration";
    map.set(verify, "CUBEurl", settings.cube_url.as_str());
    if let Some(user) = &settings.cube_user {
        map.set(verify, "CUBEuser", user.as_str());
    }
    if let Some(password) = &settings.cube_password {
        map.set(verify, "CUBEpassword", password.as_str());
    }
    map.set(verify, "inputJSONfile", "search_results.json");
    map.set(verify, "folderName", job.push_value("Folder name"));
    map.set(verify, "neuroDicomLocation", job.push_value("Dicom path"));
    map.set(verify, "neuroAnonLocation", job.push_value("Dicom anonymized path"));
    map.set(verify, "neuroNiftiLocation", job.push_value("Nifti path"));
    map.set(verify, "PACSurl", settings.pfdcm_url.as_str());
    map.set(verify, "PACSname", settings.pacs_name.as_str());
    if !settings.recipients.is_empty() {
        map.set(verify, "recipients", settings.recipients.as_str());
    }
    if !settings.smtp_server.is_empty() {
        map.set(verify, "SMTPServer", settings.smtp_server.as_str());
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    const SHEET: &str = "\
search_PatientID,search_StudyDate.1,search_Modality,Folder name,Dicom path,Dicom anonymized path,Nifti path,status,notes
4780041,20240102,MR,study-a,/neuro/dicom,/neuro/anon,/neuro/nifti,,first
,,,,,,,,
4780042,20240103,CT,study-b,/neuro/dicom,/neuro/anon,/neuro/nifti,done
";

    #[test]
    fn test_parse_sheet_classifies_columns() {
        let sheet = parse_sheet(SHEET.as_bytes()).unwrap();
        assert_eq!(sheet.headers.len(), 9);
        assert_eq!(sheet.jobs.len(), 2);

        let job = &sheet.jobs[0];
        assert_eq!(job.search.get("PatientID").map(String::as_str), Some("4780041"));
        assert_eq!(job.search.get("StudyDate").map(String::as_str), Some("20240102"));
        assert_eq!(job.search.get("Modality").map(String::as_str), Some("MR"));
        assert_eq!(job.search.len(), 3);

        let push: Vec<&str> = job.push.iter().map(|(c, _)| c.as_str()).collect();
        assert_eq!(
            push,
            vec!["Folder name", "Dicom path", "Dicom anonymized path", "Nifti path", "status"]
        );
        assert_eq!(job.raw.len(), 9);
        assert!(!job.is_done());
    }

    #[test]
    fn test_short_rows_fill_empty_cells() {
        let sheet = parse_sheet(SHEET.as_bytes()).unwrap();
        let job = &sheet.jobs[1];
        assert_eq!(job.raw.len(), 9);
        assert_eq!(job.raw[8], ("notes".to_string(), String::new()));
        assert!(job.is_done());
    }

    #[test]
    fn test_search_key() {
        assert_eq!(search_key("search_PatientID"), "PatientID");
        assert_eq!(search_key("search_StudyDate.1"), "StudyDate");
        assert_eq!(search_key("search_Series_Description"), "Series");
        assert_eq!(search_key("search"), "search");
    }

    #[test]
    fn test_anonymize_overrides() {
        let sheet = parse_sheet(SHEET.as_bytes()).unwrap();
        let settings = AnonymizeSettings {
            pfdcm_url: "http://pfdcm:4005".into(),
            pacs_name: "ORTHANC".into(),
            cube_url: "http://cube:8000/api/v1/".into(),
            recipients: "a@b.c".into(),
            ..Default::default()
        };
        let map = anonymize_overrides(&sheet.jobs[0], &settings).unwrap();

        let query = map.get("PACS-query").unwrap();
        assert_eq!(query["PACSname"], json!("ORTHANC"));
        let directive: serde_json::Value =
            serde_json::from_str(query["PACSdirective"].as_str().unwrap()).unwrap();
        assert_eq!(directive["PatientID"], json!("4780041"));

        let retrieve = map.get("PACS-retrieve").unwrap();
        assert_eq!(retrieve["copyInputFile"], json!(true));

        let verify = map.get("verify-registration").unwrap();
        assert_eq!(verify["folderName"], json!("study-a"));
        assert_eq!(verify["neuroNiftiLocation"], json!("/neuro/nifti"));
        assert_eq!(verify["recipients"], json!("a@b.c"));
        assert!(!verify.contains_key("CUBEuser"));
        assert!(!verify.contains_key("SMTPServer"));
    }

    #[test]
    fn test_write_results_appends_status() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.csv");
        let headers = vec!["search_PatientID".to_string(), "notes".to_string()];
        let job = Job::from_row(&headers, &["123".to_string(), "x".to_string()]);

        write_results(&path, &headers, &[(job, "Pipeline running".to_string())]).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("search_PatientID,notes,status"));
        assert_eq!(lines.next(), Some("123,x,Pipeline running"));
    }

    #[test]
    fn test_write_results_reuses_status_column() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.csv");
        let sheet = parse_sheet(SHEET.as_bytes()).unwrap();
        let rows: Vec<(Job, String)> = sheet
            .jobs
            .iter()
            .map(|j| (j.clone(), "Failed".to_string()))
            .collect();

        write_results(&path, &sheet.headers, &rows).unwrap();
        let out = parse_sheet(fs::File::open(&path).unwrap()).unwrap();
        assert_eq!(out.headers, sheet.headers);
        assert_eq!(out.jobs[1].push_value("status"), "Failed");
    }

    #[test]
    fn test_find_inputs() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("a.csv"), "x\n").unwrap();
        fs::write(dir.path().join("nested/b.csv"), "x\n").unwrap();
        fs::write(dir.path().join("c.txt"), "x\n").unwrap();

        let inputs = find_inputs(dir.path(), "**/*csv").unwrap();
        let names: Vec<_> = inputs
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.csv", "b.csv"]);
    }
}
