//! Process-level tests driving the built binary: exit codes, lock
//! contention, report and recovery modes.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::process::{Command, Output};
use std::sync::{Arc, Mutex};

use archiver_core::lock::FileLock;

fn archiver_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_run-record-archiver"))
}

// ---------------------------------------------------------------------------
// Minimal archive-store endpoint for modes that touch it
// ---------------------------------------------------------------------------

struct MockArchiveServer {
    port: u16,
    blobs: Arc<Mutex<BTreeMap<u32, String>>>,
}

impl MockArchiveServer {
    fn start() -> MockArchiveServer {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let blobs: Arc<Mutex<BTreeMap<u32, String>>> = Arc::new(Mutex::new(BTreeMap::new()));

        let state = Arc::clone(&blobs);
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let state = Arc::clone(&state);
                std::thread::spawn(move || handle_connection(stream, state));
            }
        });

        MockArchiveServer { port, blobs }
    }

    fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}/ucondb", self.port)
    }
}

fn handle_connection(mut stream: TcpStream, blobs: Arc<Mutex<BTreeMap<u32, String>>>) {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        match stream.read(&mut byte) {
            Ok(1) => head.push(byte[0]),
            _ => return,
        }
    }
    let head = String::from_utf8_lossy(&head).into_owned();
    let mut lines = head.lines();
    let Some(request_line) = lines.next() else { return };
    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(path)) = (parts.next(), parts.next()) else {
        return;
    };
    let content_length: usize = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(0);
    let mut body = vec![0u8; content_length];
    if content_length > 0 && stream.read_exact(&mut body).is_err() {
        return;
    }

    let (status, response_body) = if path == "/ucondb/app/version" {
        ("200 OK", "5.2".to_string())
    } else if path.starts_with("/ucondb/app/data/run_records/configuration/versions") {
        let keys: Vec<String> = blobs
            .lock()
            .unwrap()
            .keys()
            .map(|run| format!("{{\"key\": \"{run}\"}}"))
            .collect();
        ("200 OK", format!("[{}]", keys.join(", ")))
    } else if let Some(key) = path.strip_prefix("/ucondb/app/data/run_records/configuration/key=")
    {
        match (key.parse::<u32>(), method) {
            (Ok(run), "HEAD" | "GET") => match blobs.lock().unwrap().get(&run) {
                Some(blob) => ("200 OK", blob.clone()),
                None => ("404 Not Found", String::new()),
            },
            (Ok(run), "PUT") => {
                blobs
                    .lock()
                    .unwrap()
                    .insert(run, String::from_utf8_lossy(&body).into_owned());
                ("200 OK", format!("{run}.1"))
            }
            _ => ("400 Bad Request", String::new()),
        }
    } else {
        ("404 Not Found", String::new())
    };

    let _ = write!(
        stream,
        "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        response_body.len()
    );
    if method != "HEAD" {
        let _ = stream.write_all(response_body.as_bytes());
    }
}

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

struct Fixture {
    _tmp: tempfile::TempDir,
    root: PathBuf,
    config_path: PathBuf,
    server: MockArchiveServer,
}

impl Fixture {
    fn new() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().to_path_buf();
        let server = MockArchiveServer::start();

        std::fs::create_dir_all(root.join("run_records")).unwrap();
        std::fs::create_dir_all(root.join("fcl")).unwrap();
        std::fs::write(root.join("fcl/schema.fcl"), "layout: {}\n").unwrap();

        let yaml = format!(
            r#"
app:
  work_dir: {work}
  retry_delay_seconds: 0
  run_process_retries: 0
source_files:
  run_records_dir: {records}
configuration_store:
  uri: fsdb://{db}
  schema_dir: {schema}
archive_store:
  url: {url}
  folder_name: run_records
  object_name: configuration
  writer_user: archiver
  writer_password: pw
  timeout_seconds: 5
fhiclize_generate:
  - metadata
  - RunHistory
"#,
            work = root.join("work").display(),
            records = root.join("run_records").display(),
            db = root.join("confdb").display(),
            schema = root.join("fcl").display(),
            url = server.base_url(),
        );
        let config_path = root.join("config.yaml");
        std::fs::write(&config_path, yaml).unwrap();

        Fixture {
            _tmp: tmp,
            root,
            config_path,
            server,
        }
    }

    fn add_run(&self, run: u32) {
        let dir = self.root.join("run_records").join(run.to_string());
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("metadata.txt"),
            "Config name: standard\nComponent #0: tpc01\n",
        )
        .unwrap();
    }

    fn lock_file(&self) -> PathBuf {
        self.root.join("work/.archiver.lock")
    }

    fn run(&self, args: &[&str]) -> Output {
        Command::new(archiver_binary())
            .arg(&self.config_path)
            .args(args)
            .output()
            .unwrap()
    }
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn missing_config_file_exits_one() {
    let output = Command::new(archiver_binary())
        .arg("/nonexistent/config.yaml")
        .arg("--report-status")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("cannot read"), "{stderr}");
}

#[test]
fn conflicting_mode_flags_are_rejected_by_the_parser() {
    let output = Command::new(archiver_binary())
        .args(["config.yaml", "--import-only", "--migrate-only"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2), "clap usage error");
}

#[test]
fn lock_contention_exits_one_and_clears_after_release() {
    // While one process holds the lock a second fails fast with exit 1;
    // a later invocation acquires cleanly.
    let fixture = Fixture::new();
    std::fs::create_dir_all(fixture.root.join("work")).unwrap();
    let held = FileLock::acquire(&fixture.lock_file()).unwrap();

    let output = fixture.run(&["--recover-import-state"]);
    assert_eq!(output.status.code(), Some(1), "{}", stdout(&output));
    assert!(
        stdout(&output).contains("holds the lock"),
        "{}",
        stdout(&output)
    );

    drop(held);
    let output = fixture.run(&["--recover-import-state"]);
    assert_eq!(output.status.code(), Some(0), "{}", stdout(&output));
}

#[test]
fn import_only_populates_the_configuration_store() {
    let fixture = Fixture::new();
    for run in [100u32, 101, 102] {
        fixture.add_run(run);
    }

    let output = fixture.run(&["--import-only"]);
    assert_eq!(output.status.code(), Some(0), "{}", stdout(&output));

    for run in [100u32, 101, 102] {
        assert!(
            fixture.root.join(format!("confdb/{run}/standard")).is_dir(),
            "run {run} missing from store"
        );
    }
    let state = std::fs::read_to_string(fixture.root.join("work/importer_state.json")).unwrap();
    assert!(state.contains("\"last_contiguous_run\": 102"), "{state}");
    assert!(state.contains("\"last_attempted_run\": 102"), "{state}");
}

#[test]
fn full_pipeline_reaches_the_archive_store() {
    let fixture = Fixture::new();
    fixture.add_run(7);

    let output = fixture.run(&[]);
    assert_eq!(output.status.code(), Some(0), "{}", stdout(&output));

    let blobs = fixture.server.blobs.lock().unwrap();
    let blob = blobs.get(&7).expect("blob uploaded by pipeline");
    assert!(blob.starts_with("Start of Record\nRun Number: 7\n"), "{blob}");
    assert!(blob.contains("metadata.fcl"), "{blob}");
}

#[test]
fn report_status_summarizes_all_sources() {
    let fixture = Fixture::new();
    fixture.add_run(10);
    fixture.add_run(11);

    let output = fixture.run(&["--report-status", "--compare-state"]);
    assert_eq!(output.status.code(), Some(0), "{}", stdout(&output));
    let text = stdout(&output);
    assert!(text.contains("STATUS REPORT"), "{text}");
    assert!(text.contains("RECOMMENDATIONS"), "{text}");
    assert!(text.contains("Run IMPORTER"), "{text}");
    assert!(text.contains("STATE COMPARISON"), "{text}");
}

#[test]
fn recover_import_state_writes_state_files() {
    let fixture = Fixture::new();
    fixture.add_run(20);

    // Import first so the store has content to recover from.
    assert_eq!(fixture.run(&["--import-only"]).status.code(), Some(0));
    std::fs::remove_file(fixture.root.join("work/importer_state.json")).unwrap();

    let output = fixture.run(&["--recover-import-state"]);
    assert_eq!(output.status.code(), Some(0), "{}", stdout(&output));
    let state = std::fs::read_to_string(fixture.root.join("work/importer_state.json")).unwrap();
    assert!(state.contains("\"last_contiguous_run\": 20"), "{state}");
}

#[test]
fn retry_with_empty_failure_log_is_clean() {
    let fixture = Fixture::new();
    let output = fixture.run(&["--retry-failed-import"]);
    assert_eq!(output.status.code(), Some(0), "{}", stdout(&output));
}

#[test]
fn log_file_receives_output_when_configured() {
    let fixture = Fixture::new();
    let log_path = fixture.root.join("work/archiver.log");
    let yaml = std::fs::read_to_string(&fixture.config_path).unwrap();
    let yaml = yaml.replace(
        "  retry_delay_seconds: 0\n",
        &format!(
            "  retry_delay_seconds: 0\n  log_file: {}\n",
            log_path.display()
        ),
    );
    std::fs::write(&fixture.config_path, yaml).unwrap();

    let output = fixture.run(&["--recover-import-state"]);
    assert_eq!(output.status.code(), Some(0), "{}", stdout(&output));
    let logged = std::fs::read_to_string(&log_path).unwrap();
    assert!(logged.contains("Recovering import state"), "{logged}");
}
