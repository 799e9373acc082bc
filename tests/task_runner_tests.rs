use anyhow::{Result, bail};
use scorepipe::engine::read_manifest;
use scorepipe::pipeline::{CopyFile, Isolation, ResultMode, WorkerCommand};
use scorepipe::{EmptyDirPolicy, PathMapper, PipelineError, TaskOpts, run_tasks, work_fn};
use std::fs;
use std::path::Path;
use std::time::Duration;

fn corpus(root: &Path, names: &[&str]) {
    for name in names {
        let path = root.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, name.as_bytes()).unwrap();
    }
}

#[test]
fn test_results_keep_submission_order() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let (src, dst) = (dir.path().join("src"), dir.path().join("dst"));
    corpus(&src, &["a.mid", "b.mid", "c.mid"]);

    // The first unit finishes last.
    let work = work_fn("stem", |src: &Path, _dst: &Path| -> Result<String> {
        let stem = src.file_stem().unwrap().to_string_lossy().into_owned();
        if stem == "a" {
            std::thread::sleep(Duration::from_millis(100));
        }
        Ok(stem)
    });
    let opts = TaskOpts {
        workers: Some(3),
        ..TaskOpts::new(EmptyDirPolicy::Skip)
    };
    let report = run_tasks("order", &src, &dst, &work, &PathMapper::KeepName, &opts)?;
    assert_eq!(report.dispatched, 3);
    assert_eq!(report.into_outputs(), vec!["a", "b", "c"]);
    Ok(())
}

#[test]
fn test_failing_unit_does_not_abort_siblings() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let (src, dst) = (dir.path().join("src"), dir.path().join("dst"));
    let results = dir.path().join("results");
    corpus(&src, &["A/good.mid", "A/bad.mid", "B/good2.mid"]);

    let work = work_fn("picky", |src: &Path, dst: &Path| -> Result<u64> {
        if src.ends_with("bad.mid") {
            bail!("corrupt header");
        }
        Ok(fs::copy(src, dst)?)
    });
    let opts = TaskOpts {
        workers: Some(2),
        results_dir: Some(results.clone()),
        ..TaskOpts::new(EmptyDirPolicy::Skip)
    };
    let report = run_tasks("picky", &src, &dst, &work, &PathMapper::KeepName, &opts)?;

    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].reason.contains("corrupt header"));
    assert!(dst.join("A/good.mid").is_file());
    assert!(dst.join("B/good2.mid").is_file());
    assert!(!dst.join("A/bad.mid").exists());

    let manifest = read_manifest(&results.join("failed_jobs_picky.json"))?;
    assert_eq!(manifest.len(), 1);
    assert_eq!(manifest[0].input, src.join("A/bad.mid"));
    assert_eq!(manifest[0].output, dst.join("A/bad.mid"));
    Ok(())
}

#[test]
fn test_panicking_unit_is_recorded() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let (src, dst) = (dir.path().join("src"), dir.path().join("dst"));
    corpus(&src, &["x.mid", "y.mid"]);

    let work = work_fn("boom", |src: &Path, _dst: &Path| -> Result<()> {
        if src.ends_with("x.mid") {
            panic!("tokenizer blew up");
        }
        Ok(())
    });
    let report = run_tasks(
        "boom",
        &src,
        &dst,
        &work,
        &PathMapper::KeepName,
        &TaskOpts::new(EmptyDirPolicy::Skip),
    )?;
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].reason.contains("tokenizer blew up"));
    assert!(report.results[0].is_err());
    assert!(report.results[1].is_ok());
    Ok(())
}

#[test]
fn test_discard_mode_keeps_only_failures() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let (src, dst) = (dir.path().join("src"), dir.path().join("dst"));
    corpus(&src, &["one.mid", "two.mid", "three.mid"]);

    let opts = TaskOpts {
        results: ResultMode::Discard,
        ..TaskOpts::new(EmptyDirPolicy::Skip)
    };
    let mapper = PathMapper::swap_extension("mid", "bin");
    let report = run_tasks("copy", &src, &dst, &CopyFile, &mapper, &opts)?;
    assert!(report.results.is_empty());
    assert!(report.failures.is_empty());
    assert_eq!(fs::read(dst.join("two.bin"))?, b"two.mid");
    Ok(())
}

#[test]
fn test_rejected_empty_folder_creates_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let (src, dst) = (dir.path().join("src"), dir.path().join("dst"));
    corpus(&src, &["A/one.mid"]);
    fs::create_dir_all(src.join("hollow")).unwrap();

    let err = run_tasks(
        "strict",
        &src,
        &dst,
        &CopyFile,
        &PathMapper::KeepName,
        &TaskOpts::new(EmptyDirPolicy::Reject),
    )
    .unwrap_err();
    assert!(matches!(err, PipelineError::Configuration { .. }));
    assert!(!dst.exists());
}

#[test]
fn test_existing_destination_is_rejected_unless_allowed() {
    let dir = tempfile::tempdir().unwrap();
    let (src, dst) = (dir.path().join("src"), dir.path().join("dst"));
    corpus(&src, &["a.mid"]);
    fs::create_dir_all(&dst).unwrap();
    fs::write(dst.join("old.txt"), b"keep").unwrap();

    let opts = TaskOpts::new(EmptyDirPolicy::Skip);
    let err = run_tasks("clobber", &src, &dst, &CopyFile, &PathMapper::KeepName, &opts)
        .unwrap_err();
    assert!(matches!(err, PipelineError::Configuration { .. }));
    assert!(!dst.join("a.mid").exists());

    let opts = TaskOpts {
        allow_existing_destination: true,
        ..opts
    };
    let report = run_tasks("clobber", &src, &dst, &CopyFile, &PathMapper::KeepName, &opts)
        .unwrap();
    assert_eq!(report.succeeded(), 1);
    assert_eq!(fs::read(dst.join("old.txt")).unwrap(), b"keep");
}

#[cfg(unix)]
#[test]
fn test_unreadable_entry_lands_in_manifest() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let (src, dst) = (dir.path().join("src"), dir.path().join("dst"));
    let results = dir.path().join("results");
    corpus(&src, &["good.mid"]);
    std::os::unix::fs::symlink(dir.path().join("missing.mid"), src.join("dangling.mid"))?;

    let opts = TaskOpts {
        follow_links: true,
        results_dir: Some(results.clone()),
        ..TaskOpts::new(EmptyDirPolicy::Skip)
    };
    let report = run_tasks("links", &src, &dst, &CopyFile, &PathMapper::KeepName, &opts)?;
    assert_eq!(report.dispatched, 1);
    assert_eq!(report.succeeded(), 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].src, src.join("dangling.mid"));

    let manifest = read_manifest(&results.join("failed_jobs_links.json"))?;
    assert_eq!(manifest.len(), 1);
    assert_eq!(manifest[0].output, dst.join("dangling.mid"));
    Ok(())
}

fn worker_processes() -> Isolation {
    Isolation::Processes(WorkerCommand {
        program: env!("CARGO_BIN_EXE_scorepipe").into(),
        args: vec!["work".into()],
    })
}

#[test]
fn test_worker_processes_copy_files() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let (src, dst) = (dir.path().join("src"), dir.path().join("dst"));
    corpus(&src, &["A/one.mid", "two.mid"]);

    let opts = TaskOpts {
        workers: Some(2),
        isolation: worker_processes(),
        ..TaskOpts::new(EmptyDirPolicy::Skip)
    };
    let report = run_tasks("isolated", &src, &dst, &CopyFile, &PathMapper::KeepName, &opts)?;
    assert!(report.failures.is_empty());
    assert_eq!(report.into_outputs(), vec![9, 7]);
    assert_eq!(fs::read(dst.join("A/one.mid"))?, b"A/one.mid");
    Ok(())
}

#[test]
fn test_worker_process_failure_is_recorded() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let (src, dst) = (dir.path().join("src"), dir.path().join("dst"));
    corpus(&src, &["one.mid"]);

    // Workers only know the built-in work functions.
    let unknown = work_fn("tokenize", |_src: &Path, _dst: &Path| -> Result<u64> { Ok(0) });
    let opts = TaskOpts {
        isolation: worker_processes(),
        ..TaskOpts::new(EmptyDirPolicy::Skip)
    };
    let report = run_tasks("isolated", &src, &dst, &unknown, &PathMapper::KeepName, &opts)?;
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].reason.contains("tokenize"));
    assert_eq!(report.succeeded(), 0);
    Ok(())
}
