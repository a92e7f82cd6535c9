//! Pure text-to-FHiCL converters, one per recognized run-record file kind.
//!
//! Every converter is deterministic: identical input bytes yield identical
//! output bytes. Non-empty output always ends with a newline; comments are
//! stripped except in metadata where they pass through verbatim.

use regex::Regex;
use std::sync::OnceLock;

use super::util::{clean_non_ascii, format_fhicl_array, is_numeric, normalize_key, quote_value};

/// Look up the converter for a file kind from the closed registry.
pub fn converter_for(kind: &str) -> Option<fn(&str) -> String> {
    match kind {
        "metadata" => Some(fhiclize_metadata),
        "boot" => Some(fhiclize_boot),
        "settings" => Some(fhiclize_settings),
        "setup" => Some(fhiclize_setup),
        "environment" => Some(fhiclize_environment),
        "ranks" => Some(fhiclize_ranks),
        "known_boardreaders_list" => Some(fhiclize_known_boardreaders_list),
        _ => None,
    }
}

fn join_lines(lines: Vec<String>) -> String {
    if lines.is_empty() {
        String::new()
    } else {
        let mut out = lines.join("\n");
        out.push('\n');
        out
    }
}

/// `known_boardreaders_list`: whitespace-separated columns become a FHiCL
/// array keyed by the first column. Quoted tokens keep their quotes.
pub fn fhiclize_known_boardreaders_list(content: &str) -> String {
    let mut lines = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let parts = split_quoted_columns(line);
        if parts.len() < 2 {
            continue;
        }
        let key = &parts[0];
        let quoted: Vec<String> = parts[1..]
            .iter()
            .map(|v| {
                if v.starts_with('"') && v.ends_with('"') && v.len() >= 2 {
                    v.clone()
                } else {
                    format!("\"{v}\"")
                }
            })
            .collect();
        lines.push(format!("{key}: [{}]", quoted.join(", ")));
    }
    join_lines(lines)
}

/// Split a line on whitespace, keeping double-quoted tokens intact.
fn split_quoted_columns(line: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    for c in line.chars() {
        match c {
            '"' if !in_quote => {
                in_quote = true;
                current.push(c);
            }
            '"' if in_quote => {
                in_quote = false;
                current.push(c);
                parts.push(std::mem::take(&mut current));
            }
            c if c.is_whitespace() && !in_quote => {
                if !current.is_empty() {
                    parts.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

/// Derive the `RunHistory.fcl` summary from metadata text: run number,
/// config name and the component list.
pub fn generate_run_history(metadata_content: &str, run_number: Option<u32>) -> String {
    static CONFIG_RE: OnceLock<Regex> = OnceLock::new();
    static COMPONENT_RE: OnceLock<Regex> = OnceLock::new();
    let config_re = CONFIG_RE.get_or_init(|| Regex::new(r"^Config name:\s*(.+)").unwrap());
    let component_re =
        COMPONENT_RE.get_or_init(|| Regex::new(r"^Component #\d+:\s*(.+)").unwrap());

    let mut config_name = None;
    let mut components = Vec::new();
    for line in metadata_content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(caps) = config_re.captures(line) {
            config_name = Some(caps[1].trim().to_string());
        } else if let Some(caps) = component_re.captures(line) {
            components.push(caps[1].trim().to_string());
        }
    }

    let mut lines = Vec::new();
    if let Some(run) = run_number {
        lines.push(format!("run_number: {run}"));
        lines.push(String::new());
    }
    if let Some(name) = config_name {
        lines.push(format!("config_name: \"{name}\""));
        lines.push(String::new());
    }
    if !components.is_empty() {
        lines.push(format!("components: {}", format_fhicl_array(&components)));
        lines.push(String::new());
    }
    join_lines(lines)
}

/// Generate the stop-time overlay (`RunHistory2.fcl`) from metadata.
/// Returns `None` when no stop time is recorded; a run still in progress
/// has nothing to overlay.
pub fn generate_run_history2(metadata_content: &str) -> Option<String> {
    static START_RE: OnceLock<Regex> = OnceLock::new();
    static STOP_RE: OnceLock<Regex> = OnceLock::new();
    let start_re =
        START_RE.get_or_init(|| Regex::new(r"^DAQInterface start time:\s+(.*)").unwrap());
    let stop_re = STOP_RE.get_or_init(|| Regex::new(r"^DAQInterface stop time:\s+(.*)").unwrap());

    let mut lines = Vec::new();
    let mut saw_stop = false;
    for line in metadata_content.lines() {
        if let Some(caps) = stop_re.captures(line) {
            lines.push(format!("DAQInterface_stop_time: \"{}\"", &caps[1]));
            saw_stop = true;
        }
        if let Some(caps) = start_re.captures(line) {
            lines.push(format!("DAQInterface_start_time: \"{}\"", &caps[1]));
        }
    }
    if !saw_stop {
        return None;
    }
    let cleaned: Vec<String> = lines.iter().map(|l| clean_non_ascii(l)).collect();
    Some(join_lines(cleaned))
}

/// The logfile list sections a metadata file may contain. Each runs until a
/// blank line and collapses into a FHiCL array of the first column of each
/// entry.
const LOGFILE_SECTIONS: &[(&str, &str)] = &[
    ("process manager logfiles", "process_manager_logfiles"),
    ("boardreader logfiles", "boardreader_logfiles"),
    ("eventbuilder logfiles", "eventbuilder_logfiles"),
    ("routingmanager logfiles", "routingmanager_logfiles"),
    ("datalogger logfiles", "datalogger_logfiles"),
    ("dispatcher logfiles", "dispatcher_logfiles"),
];

pub fn fhiclize_metadata(content: &str) -> String {
    static SPECIAL_RE: OnceLock<Regex> = OnceLock::new();
    static COMPONENT_RE: OnceLock<Regex> = OnceLock::new();
    static SEP_RE: OnceLock<Regex> = OnceLock::new();
    let special_re = SPECIAL_RE.get_or_init(|| {
        Regex::new(r"^(Config name|DAQInterface start time|DAQInterface stop time|Total events)")
            .unwrap()
    });
    let component_re = COMPONENT_RE.get_or_init(|| Regex::new(r"^Component #\d+").unwrap());
    let sep_re = SEP_RE.get_or_init(|| Regex::new(r"[\s\-]+").unwrap());

    let mut lines: Vec<String> = Vec::new();
    let mut components: Vec<String> = Vec::new();
    let mut components_active = false;
    // (output key, collected first columns) while inside a logfile section.
    let mut logfile_section: Option<(&'static str, Vec<String>)> = None;

    let finalize_logfiles = |section: (&'static str, Vec<String>), lines: &mut Vec<String>| {
        lines.push(String::new());
        lines.push(format!("{}: {}", section.0, format_fhicl_array(&section.1)));
    };

    for line in content.lines() {
        let stripped = line.trim();
        if stripped.starts_with('#') {
            lines.push(line.to_string());
            continue;
        }
        if stripped.is_empty() {
            if let Some(section) = logfile_section.take() {
                finalize_logfiles(section, &mut lines);
            } else if components_active {
                lines.push(format!("components: {}", format_fhicl_array(&components)));
                components_active = false;
            }
            continue;
        }

        if let Some((_, entries)) = logfile_section.as_mut() {
            if let Some(first) = stripped.split_whitespace().next() {
                entries.push(first.to_string());
            }
            continue;
        }

        if components_active && !component_re.is_match(stripped) {
            lines.push(format!("components: {}", format_fhicl_array(&components)));
            components_active = false;
        }

        let Some(colon_pos) = stripped.find(':') else {
            continue;
        };
        let key = stripped[..colon_pos].trim();
        let value = stripped[colon_pos + 1..].trim();

        if special_re.is_match(key) {
            let key = key.to_lowercase().replace(' ', "_");
            lines.push(format!("{key}: {}", quote_value(value)));
        } else if component_re.is_match(key) {
            components.push(value.to_string());
            components_active = true;
        } else if key.contains("commit/version") {
            let key = sep_re
                .replace_all(key, "_")
                .replace("commit/version", "commit_or_version");
            let value = value.replace('"', " ");
            lines.push(format!("{key}: \"{value}\""));
        } else if key == "pmt logfile" {
            lines.push(format!("pmt_logfiles_wildcard: {}", quote_value(value)));
        } else if key == "process management method" {
            lines.push(format!("process_management_method: {}", quote_value(value)));
        } else if let Some(&(_, out_key)) = LOGFILE_SECTIONS.iter().find(|(name, _)| *name == key)
        {
            logfile_section = Some((out_key, Vec::new()));
        } else {
            let key = sep_re.replace_all(key, "_");
            lines.push(format!("{key}: {}", quote_value(value)));
        }
    }

    if let Some(section) = logfile_section.take() {
        finalize_logfiles(section, &mut lines);
    } else if components_active {
        lines.push(format!("components: {}", format_fhicl_array(&components)));
    }

    join_lines(lines)
}

#[derive(Clone, Default)]
struct BootProcess {
    name: Option<String>,
    label: Option<String>,
    host: Option<String>,
    port: Option<String>,
    subsystem: Option<String>,
}

#[derive(Clone, Default)]
struct BootSubsystem {
    id: Option<String>,
    source: Option<String>,
    destination: Option<String>,
}

const BOOT_PROCESS_NAMES: &[&str] = &[
    "BoardReader",
    "EventBuilder",
    "DataLogger",
    "Dispatcher",
    "RoutingManager",
];
const BOOT_PROCESS_TOKENS: &[&str] = &["host", "port", "label", "subsystem"];
const BOOT_SUBSYSTEM_TOKENS: &[&str] = &["id", "source", "destination"];

pub fn fhiclize_boot(content: &str) -> String {
    static WS_RE: OnceLock<Regex> = OnceLock::new();
    let ws_re = WS_RE.get_or_init(|| Regex::new(r"\s+").unwrap());

    let mut simple_kvs: Vec<String> = Vec::new();
    let mut processes: Vec<BootProcess> = Vec::new();
    let mut subsystems: Vec<BootSubsystem> = Vec::new();
    let mut current_process = BootProcess::default();
    let mut current_subsystem = BootSubsystem::default();

    let finalize_process = |current: &mut BootProcess, out: &mut Vec<BootProcess>| {
        if current.label.is_some() {
            out.push(std::mem::take(current));
        } else {
            *current = BootProcess::default();
        }
    };
    let finalize_subsystem = |current: &mut BootSubsystem, out: &mut Vec<BootSubsystem>| {
        if current.id.is_some() {
            out.push(std::mem::take(current));
        } else {
            *current = BootSubsystem::default();
        }
    };

    for line in content.lines() {
        let line = line.trim();
        if line.starts_with('#') {
            continue;
        }
        if line.is_empty() {
            finalize_process(&mut current_process, &mut processes);
            finalize_subsystem(&mut current_subsystem, &mut subsystems);
            continue;
        }
        let Some(colon_pos) = line.find(':') else {
            continue;
        };
        let key = line[..colon_pos].trim();
        let value = line[colon_pos + 1..].trim().to_string();
        let key_normalized = ws_re.replace_all(key, "_").into_owned();

        let mut matched = false;
        for token in BOOT_SUBSYSTEM_TOKENS {
            if key_normalized.contains(&format!("Subsystem_{token}")) {
                match *token {
                    "id" => current_subsystem.id = Some(value.clone()),
                    "source" => current_subsystem.source = Some(value.clone()),
                    _ => current_subsystem.destination = Some(value.clone()),
                }
                matched = true;
                break;
            }
        }
        if matched {
            continue;
        }

        'process: for process_name in BOOT_PROCESS_NAMES {
            for token in BOOT_PROCESS_TOKENS {
                if key_normalized.contains(&format!("{process_name}_{token}")) {
                    current_process.name = Some(process_name.to_string());
                    match *token {
                        "label" => current_process.label = Some(value.clone()),
                        "host" => current_process.host = Some(value.clone()),
                        "port" => current_process.port = Some(value.clone()),
                        _ => current_process.subsystem = Some(value.clone()),
                    }
                    matched = true;
                    break 'process;
                }
            }
        }
        if matched {
            continue;
        }

        let formatted = if is_numeric(&value) {
            value
        } else {
            quote_value(&value)
        };
        simple_kvs.push(format!("{key_normalized}: {formatted}"));
    }
    finalize_process(&mut current_process, &mut processes);
    finalize_subsystem(&mut current_subsystem, &mut subsystems);

    let mut out = simple_kvs;
    if !subsystems.is_empty() {
        out.push(String::new());
        out.push("subsystem_settings: [".to_string());
        let count = subsystems.len();
        for (idx, sub) in subsystems.into_iter().enumerate() {
            out.push("{".to_string());
            out.push(format!("id: \"{}\"", sub.id.unwrap_or_default()));
            if let Some(source) = sub.source {
                out.push(format!("source: \"{source}\""));
            }
            if let Some(destination) = sub.destination {
                out.push(format!("destination: \"{destination}\""));
            }
            out.push(if idx < count - 1 { "}," } else { "}" }.to_string());
        }
        out.push("]".to_string());
    }

    out.push(String::new());
    out.push("artdaq_process_settings: [".to_string());
    let count = processes.len();
    for (idx, proc) in processes.into_iter().enumerate() {
        out.push("{".to_string());
        out.push(format!(
            "name: \"{}\"",
            proc.name.as_deref().unwrap_or("not set")
        ));
        out.push(format!(
            "label: \"{}\"",
            proc.label.as_deref().unwrap_or("not set")
        ));
        out.push(format!(
            "host: \"{}\"",
            proc.host.as_deref().unwrap_or("not set")
        ));
        if let Some(port) = proc.port {
            out.push(format!("port: {port}"));
        }
        if let Some(subsystem) = proc.subsystem {
            out.push(format!("subsystem: \"{subsystem}\""));
        }
        out.push(if idx < count - 1 { "}," } else { "}" }.to_string());
    }
    out.push("]".to_string());

    join_lines(out)
}

pub fn fhiclize_settings(content: &str) -> String {
    let mut lines = Vec::new();
    for line in content.lines() {
        let stripped = line.trim();
        if stripped.is_empty() || stripped.starts_with('#') {
            continue;
        }
        let Some(colon_pos) = stripped.find(':') else {
            continue;
        };
        let key = normalize_key(stripped[..colon_pos].trim());
        let value = stripped[colon_pos + 1..].trim();

        if let Some(inner) = value.strip_prefix('[').and_then(|v| v.strip_suffix(']')) {
            let elements: Vec<String> = inner
                .split(',')
                .map(|e| e.trim())
                .filter(|e| !e.is_empty())
                .map(|e| {
                    let e = e
                        .strip_prefix('"')
                        .and_then(|s| s.strip_suffix('"'))
                        .or_else(|| e.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
                        .unwrap_or(e);
                    e.replace('-', "_")
                })
                .collect();
            lines.push(format!("{key}: [ {} ]", elements.join(", ")));
        } else if is_numeric(value) {
            lines.push(format!("{key}: {value}"));
        } else if value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("false") {
            lines.push(format!("{key}: {}", value.to_lowercase()));
        } else {
            lines.push(format!("{key}: {}", quote_value(value)));
        }
    }
    join_lines(lines)
}

/// The whole setup script collapses into a single quoted FHiCL string.
pub fn fhiclize_setup(content: &str) -> String {
    if content.is_empty() {
        return String::new();
    }
    let cleaned = clean_non_ascii(content)
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n");
    format!("setup_script: \"{cleaned}\"\n")
}

pub fn fhiclize_environment(content: &str) -> String {
    static EXPORT_RE: OnceLock<Regex> = OnceLock::new();
    let export_re = EXPORT_RE
        .get_or_init(|| Regex::new(r"^export\s+([A-Za-z_][A-Za-z0-9_]*)\s*=\s*(.*)$").unwrap());

    let mut lines = Vec::new();
    for line in content.lines() {
        let stripped = line.trim();
        if stripped.is_empty() || stripped.starts_with('#') {
            continue;
        }
        if let Some(caps) = export_re.captures(stripped) {
            let key = &caps[1];
            let value = caps[2].trim().trim_matches(|c| c == '\'' || c == '"');
            let value = clean_non_ascii(value).replace('"', "\\\"");
            lines.push(format!("{key}: \"{value}\""));
        }
    }
    join_lines(lines)
}

/// Ranks table: first non-comment line is the header; each data row with at
/// least five columns is keyed by its rank number (column five).
pub fn fhiclize_ranks(content: &str) -> String {
    let mut header: Option<Vec<String>> = None;
    let mut rows: Vec<Vec<String>> = Vec::new();
    for line in content.lines() {
        let stripped = line.trim();
        if stripped.is_empty() || stripped.starts_with('#') {
            continue;
        }
        let parts: Vec<String> = stripped.split_whitespace().map(str::to_string).collect();
        if parts.is_empty() {
            continue;
        }
        if header.is_none() {
            header = Some(parts);
        } else {
            rows.push(parts);
        }
    }
    let Some(header) = header else {
        return String::new();
    };

    let mut out = vec!["ranks: {".to_string()];
    let quoted: Vec<String> = header.iter().map(|h| format!("\"{h}\"")).collect();
    out.push(format!("  header: [{}]", quoted.join(", ")));
    for row in rows {
        if row.len() >= 5 {
            let rank_num = &row[4];
            let quoted: Vec<String> = row.iter().map(|v| format!("\"{v}\"")).collect();
            out.push(format!("  rank{rank_num}: [{}]", quoted.join(", ")));
        }
    }
    out.push("}".to_string());
    join_lines(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_covers_closed_set() {
        for kind in crate::config::CONVERTER_NAMES {
            assert!(converter_for(kind).is_some(), "missing converter: {kind}");
        }
        assert!(converter_for("RunHistory").is_none());
        assert!(converter_for("bogus").is_none());
    }

    #[test]
    fn known_boardreaders_seed_scenario() {
        let input = "tpc01 localhost -1\ntpc02 \"myexp-tpc02\" -1\n";
        let expected = "tpc01: [\"localhost\", \"-1\"]\ntpc02: [\"myexp-tpc02\", \"-1\"]\n";
        assert_eq!(fhiclize_known_boardreaders_list(input), expected);
    }

    #[test]
    fn known_boardreaders_skips_comments_and_short_lines() {
        let input = "# comment\n\nsingleton\ncrate01 host01 5205 1\n";
        assert_eq!(
            fhiclize_known_boardreaders_list(input),
            "crate01: [\"host01\", \"5205\", \"1\"]\n"
        );
    }

    #[test]
    fn converters_are_deterministic() {
        let inputs: &[(&str, &str)] = &[
            ("metadata", "Config name: test\nComponent #1: tpc01\n\n"),
            ("boot", "DAQ setup script: /daq/setup.sh\n"),
            ("settings", "max rate: 12.5\nflags: [a-b, c]\n"),
            ("setup", "export FOO=1\nsource /daq/env.sh\n"),
            ("environment", "export DAQ_AREA=/daq\n"),
            ("ranks", "host port label subsystem rank\nh1 5200 br01 1 0\n"),
            ("known_boardreaders_list", "tpc01 localhost -1\n"),
        ];
        for (kind, input) in inputs {
            let convert = converter_for(kind).unwrap();
            assert_eq!(convert(input), convert(input), "kind {kind}");
        }
    }

    #[test]
    fn metadata_special_keys_lowercase() {
        let input = "Config name: standard_v3\nDAQInterface start time: Sat Apr  5 10:00:01 2025\nTotal events: 120000\n";
        let out = fhiclize_metadata(input);
        assert!(out.contains("config_name: \"standard_v3\""), "{out}");
        assert!(
            out.contains("daqinterface_start_time: \"Sat Apr  5 10:00:01 2025\""),
            "{out}"
        );
        assert!(out.contains("total_events: 120000"), "{out}");
    }

    #[test]
    fn metadata_components_collapse_to_array() {
        let input = "Component #0: tpc01\nComponent #1: tpc02\n\nConfig name: x\n";
        let out = fhiclize_metadata(input);
        assert!(out.contains("components: [\"tpc01\", \"tpc02\"]"), "{out}");
    }

    #[test]
    fn metadata_logfile_section_terminated_by_blank_line() {
        let input = "boardreader logfiles:\nhost1:/log/br-01.log 1234\nhost2:/log/br-02.log 99\n\nConfig name: x\n";
        let out = fhiclize_metadata(input);
        assert!(
            out.contains(
                "boardreader_logfiles: [\"host1:/log/br-01.log\", \"host2:/log/br-02.log\"]"
            ),
            "{out}"
        );
        assert!(out.contains("config_name: \"x\""), "{out}");
    }

    #[test]
    fn metadata_logfile_section_closed_at_eof() {
        let input = "dispatcher logfiles:\nhost1:/log/dis.log\n";
        let out = fhiclize_metadata(input);
        assert!(
            out.contains("dispatcher_logfiles: [\"host1:/log/dis.log\"]"),
            "{out}"
        );
    }

    #[test]
    fn metadata_commit_version_keys() {
        let input = "sbndaq commit/version: v1_10_07 \"dirty\"\n";
        let out = fhiclize_metadata(input);
        assert!(
            out.contains("sbndaq_commit_or_version: \"v1_10_07  dirty \""),
            "{out}"
        );
    }

    #[test]
    fn metadata_preserves_comments() {
        let input = "# generated by DAQInterface\nConfig name: x\n";
        let out = fhiclize_metadata(input);
        assert!(out.starts_with("# generated by DAQInterface\n"), "{out}");
    }

    #[test]
    fn metadata_pmt_logfile_wildcard() {
        let out = fhiclize_metadata("pmt logfile: /log/pmt/pmt-*.log\n");
        assert!(
            out.contains("pmt_logfiles_wildcard: \"/log/pmt/pmt-*.log\""),
            "{out}"
        );
    }

    #[test]
    fn boot_collects_processes_and_subsystems() {
        let input = "\
DAQ setup script: /daq/setup.sh

Subsystem id: 1
Subsystem source: none

EventBuilder host: evb01
EventBuilder label: eb01
EventBuilder port: 5235
EventBuilder subsystem: 1

BoardReader host: tpc01
BoardReader label: br01
";
        let out = fhiclize_boot(input);
        assert!(out.contains("DAQ_setup_script: \"/daq/setup.sh\""), "{out}");
        assert!(out.contains("subsystem_settings: ["), "{out}");
        assert!(out.contains("id: \"1\""), "{out}");
        assert!(out.contains("source: \"none\""), "{out}");
        assert!(out.contains("artdaq_process_settings: ["), "{out}");
        assert!(out.contains("name: \"EventBuilder\""), "{out}");
        assert!(out.contains("label: \"eb01\""), "{out}");
        assert!(out.contains("port: 5235"), "{out}");
        // The trailing BoardReader block is closed at EOF.
        assert!(out.contains("name: \"BoardReader\""), "{out}");
        assert!(out.ends_with("]\n"), "{out}");
    }

    #[test]
    fn settings_arrays_numbers_and_booleans() {
        let input = "max rate: 12.5\nuse fake data: True\nflags: [\"a-b\", c]\nnote: free text\n";
        let out = fhiclize_settings(input);
        assert!(out.contains("max_rate: 12.5"), "{out}");
        assert!(out.contains("use_fake_data: true"), "{out}");
        assert!(out.contains("flags: [ a_b, c ]"), "{out}");
        assert!(out.contains("note: \"free text\""), "{out}");
    }

    #[test]
    fn setup_collapses_to_single_string() {
        let input = "export A=1\nsource \"/daq/env.sh\"\n";
        let out = fhiclize_setup(input);
        assert_eq!(
            out,
            "setup_script: \"export A=1\\nsource \\\"/daq/env.sh\\\"\\n\"\n"
        );
    }

    #[test]
    fn environment_parses_export_lines_only() {
        let input = "# env\nexport DAQ_AREA=/daq\nexport NAME='with quotes'\nPATH=/bin\n";
        let out = fhiclize_environment(input);
        assert_eq!(out, "DAQ_AREA: \"/daq\"\nNAME: \"with quotes\"\n");
    }

    #[test]
    fn ranks_table_keyed_by_rank_column() {
        let input = "host port label subsystem rank\ntpc01 5200 br01 1 0\nevb01 5235 eb01 1 1\n";
        let out = fhiclize_ranks(input);
        assert!(out.starts_with("ranks: {\n"), "{out}");
        assert!(
            out.contains("header: [\"host\", \"port\", \"label\", \"subsystem\", \"rank\"]"),
            "{out}"
        );
        assert!(
            out.contains("rank0: [\"tpc01\", \"5200\", \"br01\", \"1\", \"0\"]"),
            "{out}"
        );
        assert!(out.ends_with("}\n"), "{out}");
    }

    #[test]
    fn ranks_empty_input_is_empty() {
        assert_eq!(fhiclize_ranks("# nothing\n\n"), "");
    }

    #[test]
    fn run_history_includes_all_parts() {
        let metadata = "Config name: standard\nComponent #0: tpc01\nComponent #1: tpc02\n";
        let out = generate_run_history(metadata, Some(42));
        assert!(out.contains("run_number: 42"), "{out}");
        assert!(out.contains("config_name: \"standard\""), "{out}");
        assert!(out.contains("components: [\"tpc01\", \"tpc02\"]"), "{out}");
        assert!(out.ends_with('\n'), "{out}");
    }

    #[test]
    fn run_history_without_run_number() {
        let out = generate_run_history("Config name: x\n", None);
        assert!(!out.contains("run_number"), "{out}");
        assert!(out.contains("config_name: \"x\""), "{out}");
    }

    #[test]
    fn run_history2_requires_stop_time() {
        let only_start = "DAQInterface start time: Sat Apr  5 10:00:01 2025\n";
        assert!(generate_run_history2(only_start).is_none());

        let both = "DAQInterface start time: Sat Apr  5 10:00:01 2025\nDAQInterface stop time: Sat Apr  5 11:30:00 2025\n";
        let out = generate_run_history2(both).unwrap();
        assert!(
            out.contains("DAQInterface_start_time: \"Sat Apr  5 10:00:01 2025\""),
            "{out}"
        );
        assert!(
            out.contains("DAQInterface_stop_time: \"Sat Apr  5 11:30:00 2025\""),
            "{out}"
        );
    }

    #[test]
    fn run_history2_maps_non_ascii() {
        let input = "DAQInterface stop time: caf\u{e9}\n";
        let out = generate_run_history2(input).unwrap();
        assert!(out.contains("caf."), "{out}");
    }
}
