//! End-to-end analyser scenarios over seeded log trees.

use std::fs;
use std::path::Path;

use afd_alda::cli::Options;
use afd_alda::{Analyzer, FileHistory, Filters, OutputFormat};
use afd_catalog::{CatalogBuilder, JobEntry};
use afd_log::record::{AGE_OUTPUT, DUP_OUTPUT};
use afd_log::{
    InputRecord, LogCategory, LogWriter, OutputRecord, OutputType, ProductionRecord,
};

fn options(selectors: &str) -> Options {
    let cats = LogCategory::ALL
        .into_iter()
        .filter(|c| selectors.contains(c.selector()))
        .collect();
    Options {
        categories: cats,
        max_diff_time: 3600,
        max_search_time: None,
        max_log_files: 7,
        format: String::new(),
    }
}

fn seed_tree(work_dir: &Path) {
    fs::create_dir_all(work_dir.join("fifo_dir")).unwrap();
    fs::create_dir_all(work_dir.join("log")).unwrap();
}

fn input(time: u64, name: &str, size: u64, dir_id: u32, unique: u32) -> InputRecord {
    InputRecord {
        time,
        filename: name.to_string(),
        size,
        dir_id,
        unique_number: unique,
    }
}

fn output(
    send: u64,
    host: &str,
    name: &str,
    size: u64,
    job_id: u32,
    creation: u64,
    unique: u32,
) -> OutputRecord {
    OutputRecord {
        send_start_time: send,
        output_time: send + 2,
        host_alias: host.to_string(),
        protocol: "ftp".to_string(),
        local_filename: name.to_string(),
        remote_name: name.to_string(),
        size,
        job_id,
        creation_time: creation,
        unique_number: unique,
        output_type: OutputType::NormalDelivered.to_id(),
        ..Default::default()
    }
}

fn collect(analyzer: &mut Analyzer, start: u64, end: u64) -> Vec<FileHistory> {
    let mut out = Vec::new();
    analyzer
        .run_forward(start, end, &mut |h: &FileHistory| out.push(h.clone()))
        .unwrap();
    out
}

#[test]
fn test_basic_trace_pairs_input_and_output() {
    let dir = tempfile::tempdir().unwrap();
    seed_tree(dir.path());
    let log_dir = dir.path().join("log");

    CatalogBuilder::new()
        .add_dir(0x12ab, "/incoming/wmo")
        .add_job(JobEntry {
            job_id: 3,
            dir_id: 0x12ab,
            recipient: "ftp://user@ducsfax/pub".to_string(),
            ..Default::default()
        })
        .write(dir.path().join("fifo_dir"))
        .unwrap();

    let mut iw = LogWriter::<InputRecord>::open(&log_dir, 7).unwrap();
    iw.append(&input(0x5f3a2b01, "a.dat", 0x400, 0x12ab, 7)).unwrap();
    iw.flush().unwrap();
    let mut ow = LogWriter::<OutputRecord>::open(&log_dir, 7).unwrap();
    ow.append(&output(0x5f3a2b0a, "ducsfax", "a.dat", 0x400, 3, 0x5f3a2b01, 7))
        .unwrap();
    ow.flush().unwrap();

    let filters = Filters {
        filenames: vec!["a.dat".to_string()],
        ..Default::default()
    };
    let mut analyzer = Analyzer::open(dir.path(), &options("IO"), filters);
    let got = collect(&mut analyzer, 0, u64::MAX / 2);

    assert_eq!(got.len(), 1);
    let h = &got[0];
    assert_eq!(h.input.as_ref().unwrap().time, 0x5f3a2b01);
    assert_eq!(h.outputs.len(), 1);
    assert_eq!(h.outputs[0].output_time, 0x5f3a2b0a + 2);
    assert_eq!(h.size(), Some(0x400));
    assert_eq!(h.recipient.as_deref(), Some("ftp://user@ducsfax/pub"));

    let fmt = OutputFormat::compile("%IT %OT %IS %JR").unwrap();
    let line = fmt.render(h);
    assert!(line.contains("ftp://user@ducsfax/pub"));
    assert!(line.contains("1024"));
}

#[test]
fn test_age_limit_delete_is_synthesised() {
    let dir = tempfile::tempdir().unwrap();
    seed_tree(dir.path());
    let log_dir = dir.path().join("log");

    let mut ow = LogWriter::<OutputRecord>::open(&log_dir, 7).unwrap();
    let mut rec = output(1000, "h1", "stale.dat", 55, 9, 990, 4);
    rec.output_type = OutputType::AgeLimitDelete.to_id();
    ow.append(&rec).unwrap();
    ow.flush().unwrap();

    let mut analyzer = Analyzer::open(dir.path(), &options("OD"), Filters::default());
    let got = collect(&mut analyzer, 0, 2000);

    assert_eq!(got.len(), 1);
    let d = got[0].delete.as_ref().expect("delete synthesised");
    assert_eq!(d.deletion_type, AGE_OUTPUT);
    assert_eq!(d.add_reason, "");
    assert_eq!(d.filename, "stale.dat");
    assert_eq!(d.job_id, 9);
}

#[test]
fn test_real_delete_record_wins_over_synthesis() {
    let dir = tempfile::tempdir().unwrap();
    seed_tree(dir.path());
    let log_dir = dir.path().join("log");

    let mut ow = LogWriter::<OutputRecord>::open(&log_dir, 7).unwrap();
    let mut rec = output(1000, "h1", "dup.dat", 55, 9, 990, 4);
    rec.output_type = OutputType::DuplicateDelete.to_id();
    ow.append(&rec).unwrap();
    ow.flush().unwrap();

    let mut dw = LogWriter::<afd_log::DeleteRecord>::open(&log_dir, 7).unwrap();
    dw.append(&afd_log::DeleteRecord {
        delete_time: 1003,
        deletion_type: DUP_OUTPUT,
        filename: "dup.dat".to_string(),
        size: 55,
        job_id: 9,
        dir_id: 1,
        job_creation_time: 990,
        unique_number: 4,
        split_job_counter: 0,
        user_process: "sf_ftp".to_string(),
        add_reason: "same checksum".to_string(),
    })
    .unwrap();
    dw.flush().unwrap();

    let mut analyzer = Analyzer::open(dir.path(), &options("OD"), Filters::default());
    let got = collect(&mut analyzer, 0, 2000);

    assert_eq!(got.len(), 1);
    let d = got[0].delete.as_ref().unwrap();
    assert_eq!(d.user_process, "sf_ftp");
    assert_eq!(d.add_reason, "same checksum");
}

#[test]
fn test_fan_out_three_to_one_emits_one_combined_history() {
    let dir = tempfile::tempdir().unwrap();
    seed_tree(dir.path());
    let log_dir = dir.path().join("log");

    let mut pw = LogWriter::<ProductionRecord>::open(&log_dir, 7).unwrap();
    pw.append(&ProductionRecord {
        input_time: 500,
        output_time: 505,
        duration_ms: 800,
        original_filename: "bulletin".to_string(),
        new_filename: "bulletin.part".to_string(),
        original_size: 3000,
        new_size: 1000,
        ratio_1: 3,
        ratio_2: 1,
        job_id: 0x42,
        unique_number: 11,
        ..Default::default()
    })
    .unwrap();
    pw.flush().unwrap();

    let mut ow = LogWriter::<OutputRecord>::open(&log_dir, 7).unwrap();
    for n in 0..3 {
        let mut leg = output(510 + n, "h1", "bulletin.part", 1000, 0x42, 500, 11);
        leg.split_job_counter = n as u32;
        ow.append(&leg).unwrap();
    }
    ow.flush().unwrap();

    let mut analyzer = Analyzer::open(dir.path(), &options("PO"), Filters::default());
    let got = collect(&mut analyzer, 0, 2000);

    assert_eq!(got.len(), 1, "one combined line, no spurious output");
    assert_eq!(got[0].outputs.len(), 3);
    assert_eq!(got[0].production.len(), 1);
}

#[test]
fn test_forward_emission_is_time_monotonic() {
    let dir = tempfile::tempdir().unwrap();
    seed_tree(dir.path());
    let log_dir = dir.path().join("log");

    let mut iw = LogWriter::<InputRecord>::open(&log_dir, 3).unwrap();
    for t in [100u64, 150, 200, 250] {
        iw.append(&input(t, &format!("f{t}"), 1, 2, t as u32)).unwrap();
        if t == 150 {
            iw.rotate().unwrap();
        }
    }
    iw.flush().unwrap();

    let mut analyzer = Analyzer::open(dir.path(), &options("I"), Filters::default());
    let got = collect(&mut analyzer, 0, 1000);

    let times: Vec<u64> = got.iter().map(|h| h.primary_time()).collect();
    assert_eq!(times, vec![100, 150, 200, 250]);
}

#[test]
fn test_gotcha_rows_join_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    seed_tree(dir.path());
    let log_dir = dir.path().join("log");

    // Two inputs sharing a filename but with distinct unique numbers, and
    // only one matching output. The single output leg must attach to
    // exactly one history.
    let mut iw = LogWriter::<InputRecord>::open(&log_dir, 7).unwrap();
    iw.append(&input(100, "same.dat", 10, 1, 1)).unwrap();
    iw.append(&input(110, "same.dat", 10, 1, 2)).unwrap();
    iw.flush().unwrap();
    let mut ow = LogWriter::<OutputRecord>::open(&log_dir, 7).unwrap();
    ow.append(&output(120, "h1", "same.dat", 10, 5, 100, 1)).unwrap();
    ow.flush().unwrap();

    let mut analyzer = Analyzer::open(dir.path(), &options("IO"), Filters::default());
    let got = collect(&mut analyzer, 0, 1000);

    assert_eq!(got.len(), 2);
    let legs: usize = got.iter().map(|h| h.outputs.len()).sum();
    assert_eq!(legs, 1, "the output row joined exactly one history");
    assert_eq!(got[0].outputs.len(), 1);
    assert!(got[1].outputs.is_empty());
}

#[test]
fn test_backward_mode_reverses_emission() {
    let dir = tempfile::tempdir().unwrap();
    seed_tree(dir.path());
    let log_dir = dir.path().join("log");

    let mut iw = LogWriter::<InputRecord>::open(&log_dir, 7).unwrap();
    for t in [100u64, 200, 300] {
        iw.append(&input(t, "f", 1, 2, t as u32)).unwrap();
    }
    iw.flush().unwrap();

    let mut analyzer = Analyzer::open(dir.path(), &options("I"), Filters::default());
    let mut got = Vec::new();
    analyzer
        .run_backward(150, 1000, &mut |h: &FileHistory| got.push(h.primary_time()))
        .unwrap();
    assert_eq!(got, vec![300, 200]);
}

#[test]
fn test_search_budget_stops_gracefully() {
    let dir = tempfile::tempdir().unwrap();
    seed_tree(dir.path());
    let log_dir = dir.path().join("log");

    let mut iw = LogWriter::<InputRecord>::open(&log_dir, 7).unwrap();
    iw.append(&input(100, "f", 1, 2, 1)).unwrap();
    iw.flush().unwrap();

    let mut opts = options("I");
    opts.max_search_time = Some(0);
    let mut analyzer = Analyzer::open(dir.path(), &opts, Filters::default());
    let mut emitted = 0usize;
    let stats = analyzer
        .run_forward(0, 1000, &mut |_: &FileHistory| emitted += 1)
        .unwrap();
    assert!(stats.stopped_early);
    assert_eq!(emitted, 0);
}

#[test]
fn test_continuous_follow_skips_backlog_and_sees_new_records() {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    let dir = tempfile::tempdir().unwrap();
    seed_tree(dir.path());
    let log_dir = dir.path().join("log");

    let mut iw = LogWriter::<InputRecord>::open(&log_dir, 7).unwrap();
    iw.append(&input(50, "backlog", 1, 2, 1)).unwrap();
    iw.flush().unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let work = dir.path().to_path_buf();
    let follower = {
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut analyzer = Analyzer::open(&work, &options("I"), Filters::default());
            let mut got = Vec::new();
            analyzer
                .follow(&stop, &mut |h: &FileHistory| got.push(h.primary_time()))
                .unwrap();
            got
        })
    };

    // Give the follower time to seek past the backlog, then append.
    thread::sleep(Duration::from_millis(500));
    iw.append(&input(60, "fresh", 1, 2, 2)).unwrap();
    iw.flush().unwrap();
    thread::sleep(Duration::from_millis(2200));
    stop.store(true, Ordering::Relaxed);

    let got = follower.join().unwrap();
    assert_eq!(got, vec![60]);
}

#[test]
fn test_continuous_pass_to_follow_handoff_loses_nothing() {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    let dir = tempfile::tempdir().unwrap();
    seed_tree(dir.path());
    let log_dir = dir.path().join("log");

    let mut iw = LogWriter::<InputRecord>::open(&log_dir, 7).unwrap();
    iw.append(&input(100, "scanned", 1, 2, 1)).unwrap();
    iw.flush().unwrap();

    let mut analyzer = Analyzer::open(dir.path(), &options("I"), Filters::default());
    let mut scanned = Vec::new();
    analyzer
        .run_forward(0, 150, &mut |h: &FileHistory| scanned.push(h.primary_time()))
        .unwrap();
    assert_eq!(scanned, vec![100]);

    // Appended after the one-shot pass but before the follow attaches.
    iw.append(&input(200, "in-between", 1, 2, 2)).unwrap();
    iw.flush().unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let follower = {
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut got = Vec::new();
            analyzer
                .follow_after_scan(&stop, &mut |h: &FileHistory| got.push(h.primary_time()))
                .unwrap();
            got
        })
    };
    thread::sleep(Duration::from_millis(1500));
    stop.store(true, Ordering::Relaxed);

    let got = follower.join().unwrap();
    assert_eq!(got, vec![200], "record from the handoff gap must be emitted once");
}

#[test]
fn test_fsa_resolves_real_hostname_for_rendering() {
    let dir = tempfile::tempdir().unwrap();
    seed_tree(dir.path());
    let log_dir = dir.path().join("log");

    afd_area::create_area::<afd_status::FsaRecord, _, _>(
        dir.path().join("fifo_dir"),
        afd_area::paths::FSA_NAME,
        1,
        0,
        |records| {
            records[0] = afd_status::FsaRecord::from_config(&afd_status::HostConfigEntry {
                alias: "ducsfax".to_string(),
                real_hostname: ["ducsfax.example.org".to_string(), String::new()],
                ..Default::default()
            });
        },
    )
    .unwrap();

    let mut ow = LogWriter::<OutputRecord>::open(&log_dir, 7).unwrap();
    ow.append(&output(1000, "ducsfax", "a.dat", 10, 3, 990, 7)).unwrap();
    ow.flush().unwrap();

    let mut analyzer = Analyzer::open(dir.path(), &options("O"), Filters::default());
    let got = collect(&mut analyzer, 0, 2000);

    assert_eq!(got.len(), 1);
    assert_eq!(got[0].real_hostname.as_deref(), Some("ducsfax.example.org"));
    let fmt = OutputFormat::compile("%OH %Oh").unwrap();
    assert_eq!(fmt.render(&got[0]), "ducsfax ducsfax.example.org");
}

#[test]
fn test_remote_log_tree_merges_into_scan() {
    let dir = tempfile::tempdir().unwrap();
    seed_tree(dir.path());
    let log_dir = dir.path().join("log");
    let remote_dir = afd_area::paths::remote_log_dir(dir.path(), "afd-berlin");
    fs::create_dir_all(&remote_dir).unwrap();

    let mut local = LogWriter::<InputRecord>::open(&log_dir, 7).unwrap();
    local.append(&input(100, "local.dat", 1, 2, 1)).unwrap();
    local.append(&input(300, "local2.dat", 1, 2, 2)).unwrap();
    local.flush().unwrap();
    let mut remote = LogWriter::<InputRecord>::open(&remote_dir, 7).unwrap();
    remote.append(&input(200, "mirrored.dat", 1, 2, 3)).unwrap();
    remote.flush().unwrap();

    let mut analyzer = Analyzer::open(dir.path(), &options("I"), Filters::default());
    let got = collect(&mut analyzer, 0, 1000);

    let names: Vec<&str> = got.iter().map(|h| h.filename()).collect();
    assert_eq!(names, vec!["local.dat", "mirrored.dat", "local2.dat"]);
}

#[test]
fn test_old_form_output_primary_maps_dir_id() {
    let dir = tempfile::tempdir().unwrap();
    seed_tree(dir.path());
    let log_dir = dir.path().join("log");

    // Hand-written old-form line: no reason prefix, deleting output type,
    // id field carries the dir id.
    let line = format!(
        "000003e8|000003ea0|h1|ftp|old.dat|old.dat|37|12ab|000003de|5|0|0|{:x}|\n",
        OutputType::AgeLimitDelete.to_id()
    );
    let path = LogCategory::Output.rotation_path(&log_dir, 0);
    fs::write(&path, line).unwrap();

    let mut analyzer = Analyzer::open(dir.path(), &options("OD"), Filters::default());
    let got = collect(&mut analyzer, 0, 2000);

    assert_eq!(got.len(), 1);
    assert_eq!(got[0].outputs[0].dir_id, Some(0x12ab));
    assert_eq!(got[0].outputs[0].job_id, 0);
    let d = got[0].delete.as_ref().unwrap();
    assert_eq!(d.deletion_type, AGE_OUTPUT);
    assert_eq!(d.dir_id, 0x12ab);
}
