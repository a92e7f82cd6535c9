//! Spot-check a packed blob by extracting known FHiCL keys from known
//! files. All problems are reported in the result map; this module never
//! returns an error and never panics on malformed input.

use std::collections::BTreeMap;

use regex::Regex;
use tracing::{debug, warn};

/// `{filename -> {parameter label -> fhicl key}}`
pub type ParameterSpec = BTreeMap<String, BTreeMap<String, String>>;

/// Parameters every production blob is expected to carry.
pub fn default_parameter_spec() -> ParameterSpec {
    let mut metadata = BTreeMap::new();
    metadata.insert("components".to_string(), "components".to_string());
    metadata.insert("configuration".to_string(), "config_name".to_string());
    metadata.insert(
        "projectversion".to_string(),
        "sbndaq_commit_or_version".to_string(),
    );
    let mut spec = BTreeMap::new();
    spec.insert("metadata.fcl".to_string(), metadata);
    spec
}

pub struct BlobValidator {
    parameter_spec: ParameterSpec,
}

impl Default for BlobValidator {
    fn default() -> Self {
        BlobValidator {
            parameter_spec: default_parameter_spec(),
        }
    }
}

impl BlobValidator {
    pub fn new(parameter_spec: ParameterSpec) -> BlobValidator {
        BlobValidator { parameter_spec }
    }

    /// Validate a blob. Returns the error count and a map from parameter
    /// label to either the extracted value or an error message.
    pub fn validate(&self, blob: &str, run_number: u32) -> (usize, BTreeMap<String, String>) {
        debug!("Validating blob for run {run_number}");
        let files = match crate::blob::unpack(blob) {
            Ok(files) => files,
            Err(e) => {
                warn!("Failed to unpack blob for run {run_number}: {e}");
                let mut results = BTreeMap::new();
                results.insert("error".to_string(), format!("Failed to unpack blob: {e}"));
                return (1, results);
            }
        };

        let mut results = BTreeMap::new();
        let mut total_errors = 0usize;
        for (file_name, file_spec) in &self.parameter_spec {
            let Some(content) = files.get(file_name) else {
                warn!("Required file '{file_name}' not found in blob for run {run_number}");
                for label in file_spec.keys() {
                    results.insert(
                        label.clone(),
                        format!("Error: file '{file_name}' not found"),
                    );
                }
                total_errors += file_spec.len();
                continue;
            };
            let (errors, file_results) = parse_parameters(content, file_spec);
            total_errors += errors;
            results.extend(file_results);
        }

        if total_errors == 0 {
            debug!("Blob validation passed for run {run_number}: {results:?}");
        } else {
            warn!("Blob validation found {total_errors} errors for run {run_number}: {results:?}");
        }
        (total_errors, results)
    }
}

/// Extract each parameter from a file's content. A key must match exactly
/// one `key: value` line; zero and multiple matches are both errors.
fn parse_parameters(
    content: &str,
    file_spec: &BTreeMap<String, String>,
) -> (usize, BTreeMap<String, String>) {
    let mut results = BTreeMap::new();
    let mut error_count = 0usize;
    for (label, fhicl_key) in file_spec {
        let pattern = format!(r"(?m)^{}:\s+(.+)$", regex::escape(fhicl_key));
        let re = match Regex::new(&pattern) {
            Ok(re) => re,
            Err(e) => {
                results.insert(label.clone(), format!("Error: bad pattern: {e}"));
                error_count += 1;
                continue;
            }
        };
        let matches: Vec<&str> = re
            .captures_iter(content)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect();
        match matches.as_slice() {
            [] => {
                results.insert(
                    label.clone(),
                    format!("Error: no matches for parameter '{fhicl_key}'"),
                );
                error_count += 1;
            }
            [value] => {
                results.insert(label.clone(), value.replace('"', "").trim().to_string());
            }
            _ => {
                results.insert(
                    label.clone(),
                    format!("Error: multiple matches for parameter '{fhicl_key}'"),
                );
                error_count += 1;
            }
        }
    }
    (error_count, results)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob_with(files: &[(&str, &str)]) -> String {
        let mut blob = String::from("Start of Record\nRun Number: 1\nPacked on Jan 01 00:00 UTC\n");
        for (name, content) in files {
            blob.push_str(&format!("\n#####\n{name}:\n#####\n{content}"));
        }
        blob.push_str("\nEnd of Record\nRun Number: 1\nPacked on Jan 01 00:00 UTC\n");
        blob
    }

    #[test]
    fn valid_blob_extracts_all_parameters() {
        let blob = blob_with(&[(
            "metadata.fcl",
            "components: [\"tpc01\"]\nconfig_name: \"standard\"\nsbndaq_commit_or_version: \"v1_10\"\n",
        )]);
        let validator = BlobValidator::default();
        let (errors, results) = validator.validate(&blob, 1);
        assert_eq!(errors, 0, "{results:?}");
        assert_eq!(results["configuration"], "standard");
        assert_eq!(results["components"], "[tpc01]");
        assert_eq!(results["projectversion"], "v1_10");
    }

    #[test]
    fn missing_file_reports_one_error_per_parameter() {
        // The parameters require metadata.fcl; the blob does not have it.
        let mut metadata = BTreeMap::new();
        metadata.insert("configuration".to_string(), "config_name".to_string());
        let mut spec = BTreeMap::new();
        spec.insert("metadata.fcl".to_string(), metadata);

        let blob = blob_with(&[("boot.fcl", "x: 1\n")]);
        let (errors, results) = BlobValidator::new(spec).validate(&blob, 8);
        assert_eq!(errors, 1);
        assert!(
            results["configuration"].contains("file 'metadata.fcl' not found"),
            "{results:?}"
        );
    }

    #[test]
    fn zero_and_multiple_matches_are_errors() {
        let blob = blob_with(&[(
            "metadata.fcl",
            "config_name: \"a\"\nconfig_name: \"b\"\n",
        )]);
        let mut metadata = BTreeMap::new();
        metadata.insert("configuration".to_string(), "config_name".to_string());
        metadata.insert("missing".to_string(), "not_there".to_string());
        let mut spec = BTreeMap::new();
        spec.insert("metadata.fcl".to_string(), metadata);

        let (errors, results) = BlobValidator::new(spec).validate(&blob, 2);
        assert_eq!(errors, 2, "{results:?}");
        assert!(results["configuration"].contains("multiple matches"));
        assert!(results["missing"].contains("no matches"));
    }

    #[test]
    fn garbage_blob_is_captured_not_thrown() {
        let (errors, results) = BlobValidator::default().validate("not a blob at all", 3);
        assert_eq!(errors, 1);
        assert!(results["error"].contains("Failed to unpack"), "{results:?}");
    }

    #[test]
    fn key_with_regex_metacharacters_is_escaped() {
        let blob = blob_with(&[("metadata.fcl", "a.b: value\n")]);
        let mut file_spec = BTreeMap::new();
        file_spec.insert("dotted".to_string(), "a.b".to_string());
        let mut spec = BTreeMap::new();
        spec.insert("metadata.fcl".to_string(), file_spec);

        let (errors, results) = BlobValidator::new(spec).validate(&blob, 4);
        assert_eq!(errors, 0, "{results:?}");
        assert_eq!(results["dotted"], "value");
    }
}
