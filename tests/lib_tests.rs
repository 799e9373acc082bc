use scorepipe::engine::{CommandTemplate, PathMapper, path_relative_to, verify_executable};
use scorepipe::{FailedJob, Job, JobRecord, JobStatus, PipelineError};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

// --- path_relative_to ---

#[test]
fn test_path_relative_under_base() {
    let base = PathBuf::from("/corpus/midi");
    let path = PathBuf::from("/corpus/midi/A/B/song.mid");
    assert_eq!(
        path_relative_to(&path, &base),
        Some(PathBuf::from("A/B/song.mid"))
    );
}

#[test]
fn test_path_relative_not_under_base() {
    let base = PathBuf::from("/corpus/midi");
    assert_eq!(path_relative_to(Path::new("/other/song.mid"), &base), None);
}

// --- PathMapper ---

#[test]
fn test_swap_extension_only_touches_matching_files() {
    let m = PathMapper::swap_extension(".mid", "abc");
    assert_eq!(m.map(Path::new("/c/song.v2.mid"), false), "song.v2.abc");
    assert_eq!(m.map(Path::new("/c/notes.txt"), false), "notes.txt");
    assert_eq!(m.map(Path::new("/c/folder.mid"), true), "folder.mid");
}

#[test]
fn test_custom_mapper_sees_directory_flag() {
    let m = PathMapper::custom(|src: &Path, is_dir: bool| {
        let mut name = src.file_name().unwrap_or_default().to_os_string();
        if is_dir {
            name.push("_flat");
        }
        name
    });
    assert_eq!(m.map(Path::new("/c/A"), true), OsString::from("A_flat"));
    assert_eq!(m.map(Path::new("/c/A/x.mid"), false), OsString::from("x.mid"));
}

// --- CommandTemplate ---

#[test]
fn test_template_renders_payload_in_order() {
    let t = CommandTemplate::parse("midi2abc -f {} -o {}").unwrap();
    assert_eq!(t.arity(), 2);
    let job = Job::new("/in/a.mid", "/out/a.abc");
    assert_eq!(
        t.render(&job.payload).unwrap(),
        "midi2abc -f /in/a.mid -o /out/a.abc"
    );
}

#[test]
fn test_empty_template_is_configuration_error() {
    let err = CommandTemplate::parse("   ").unwrap_err();
    assert!(matches!(err, PipelineError::Configuration { .. }));
}

// --- verify_executable ---

#[test]
fn test_verify_executable_resolves_under_software_dir() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("abcmidi")).unwrap();
    std::fs::write(dir.path().join("abcmidi/midi2abc"), b"").unwrap();

    let exe = verify_executable(dir.path(), Path::new("abcmidi/midi2abc")).unwrap();
    assert!(exe.is_absolute());
    let err = verify_executable(dir.path(), Path::new("abcmidi/abc2midi")).unwrap_err();
    assert!(err.to_string().contains("abc2midi"));
}

// --- records and manifest entries ---

#[test]
fn test_record_invocations() {
    let mut r = JobRecord::new(0);
    assert_eq!(r.invocations(), 0);
    r.status = JobStatus::Running;
    assert_eq!(r.invocations(), 1);
    r.attempt_count = 2;
    r.status = JobStatus::FailedTerminal;
    assert_eq!(r.invocations(), 3);
    assert!(r.status.is_terminal());
}

#[test]
fn test_failed_job_serializes_input_and_output() {
    let f = FailedJob {
        index: 4,
        input: PathBuf::from("/in/a.mid"),
        output: PathBuf::from("/out/a.abc"),
        payload: Vec::new(),
        attempts: 11,
        reason: "exit code 1".into(),
    };
    let v: serde_json::Value = serde_json::to_value(&f).unwrap();
    assert_eq!(v["input"], "/in/a.mid");
    assert_eq!(v["output"], "/out/a.abc");
    assert!(v.get("payload").is_none());
}
