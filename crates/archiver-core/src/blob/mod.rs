//! The archive blob format: a run record packed as one delimited UTF-8
//! text document.
//!
//! Layout: a `Start of Record` header, one `#####`-framed section per file,
//! and an `End of Record` footer. Converted FHiCL files are placed at the
//! end in a fixed order so human readers find them in the same place in
//! every blob.

pub mod validate;

use std::collections::BTreeMap;
use std::path::Path;

use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::error::{ArchiverError, Result};

/// Fixed ordering for the well-known files at the end of a blob.
const TAIL_FILE_ORDER: &[&str] = &[
    "boot.fcl",
    "known_boardreaders_list.fcl",
    "setup.fcl",
    "environment.fcl",
    "metadata.fcl",
    "settings.fcl",
    "ranks.fcl",
    "RunHistory.fcl",
    "RunHistory2.fcl",
];

/// Pack every file under `source_dir` into a single blob for `run_number`.
pub fn pack(run_number: u32, source_dir: &Path) -> Result<String> {
    debug!("Creating blob for run {run_number} from '{}'", source_dir.display());

    let mut files: Vec<String> = Vec::new();
    collect_files(source_dir, source_dir, &mut files)?;
    if files.is_empty() {
        return Err(ArchiverError::BlobCreation(format!(
            "no config files found in {} for run {run_number}",
            source_dir.display()
        )));
    }

    // Tail files keep their fixed order; everything else sorts by name,
    // case-insensitive. Tail membership is by exact (case-insensitive)
    // top-level name, so a colliding file under a subpath stays regular.
    let mut regular: Vec<String> = Vec::new();
    let mut tail: BTreeMap<usize, String> = BTreeMap::new();
    for name in files {
        match TAIL_FILE_ORDER
            .iter()
            .position(|t| t.eq_ignore_ascii_case(&name))
        {
            Some(idx) => {
                tail.insert(idx, name);
            }
            None => regular.push(name),
        }
    }
    regular.sort_by(|a, b| a.to_lowercase().cmp(&b.to_lowercase()));
    let ordered = regular.into_iter().chain(tail.into_values());

    // English month abbreviations regardless of the process locale.
    let timestamp = chrono::Utc::now().format("%b %d %H:%M").to_string() + " UTC";

    let mut blob = format!("Start of Record\nRun Number: {run_number}\nPacked on {timestamp}\n");
    for name in ordered {
        blob.push_str(&format!("\n#####\n{name}:\n#####\n"));
        blob.push_str(&read_file_permissive(&source_dir.join(&name), &name)?);
    }
    blob.push_str(&format!(
        "\nEnd of Record\nRun Number: {run_number}\nPacked on {timestamp}\n"
    ));
    Ok(blob)
}

/// Parse a blob back into its `(relative filename, content)` pairs.
/// Fails when no file delimiters are present.
pub fn unpack(blob: &str) -> Result<BTreeMap<String, String>> {
    static DELIM_RE: OnceLock<Regex> = OnceLock::new();
    static FOOTER_RE: OnceLock<Regex> = OnceLock::new();
    let delim_re = DELIM_RE.get_or_init(|| Regex::new(r"\n#####\n(.+?):\n#####\n").unwrap());
    let footer_re = FOOTER_RE.get_or_init(|| Regex::new(r"\nEnd of Record\n").unwrap());

    let matches: Vec<_> = delim_re.captures_iter(blob).collect();
    if matches.is_empty() {
        return Err(ArchiverError::BlobCreation(
            "no file markers found in blob".into(),
        ));
    }

    let mut files = BTreeMap::new();
    for (i, caps) in matches.iter().enumerate() {
        let whole = caps.get(0).expect("regex group 0");
        let filename = caps[1].to_string();
        let content_start = whole.end();
        let content_end = if let Some(next) = matches.get(i + 1) {
            next.get(0).expect("regex group 0").start()
        } else if let Some(footer) = footer_re.find_at(blob, content_start) {
            footer.start()
        } else {
            blob.len()
        };
        files.insert(filename, blob[content_start..content_end].to_string());
    }
    debug!("Extracted {} files from blob", files.len());
    Ok(files)
}

/// Unpack a blob into files under `output_dir` (created as needed).
pub fn unpack_to_dir(blob: &str, output_dir: &Path) -> Result<BTreeMap<String, String>> {
    let files = unpack(blob)?;
    std::fs::create_dir_all(output_dir)?;
    for (name, content) in &files {
        let dest = output_dir.join(name);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&dest, content)?;
    }
    Ok(files)
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_files(root, &path, out)?;
        } else {
            let rel = path
                .strip_prefix(root)
                .map_err(|e| ArchiverError::BlobCreation(e.to_string()))?;
            out.push(rel.to_string_lossy().into_owned());
        }
    }
    Ok(())
}

/// Read file content as text. The blob is defined to be UTF-8; files that
/// are not valid UTF-8 are reduced to their ASCII bytes.
fn read_file_permissive(path: &Path, name: &str) -> Result<String> {
    let bytes = std::fs::read(path)?;
    match String::from_utf8(bytes) {
        Ok(text) => Ok(text),
        Err(e) => {
            warn!("File '{name}' is not UTF-8, keeping ASCII bytes only");
            let bytes = e.into_bytes();
            Ok(bytes.iter().filter(|b| b.is_ascii()).map(|&b| b as char).collect())
        }
    }
}
