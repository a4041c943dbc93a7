use std::process::Command;

#[test]
fn report_is_written_at_process_exit() {
    let dir = tempfile::tempdir().unwrap();
    let trace = dir.path().join("trace.log");
    let status = Command::new(env!("CARGO_BIN_EXE_example"))
        .env("LEAK_TRACE_FILE", &trace)
        .env_remove("LEAK_TRACE_DUMP")
        .status()
        .unwrap();
    assert!(status.success());

    let contents = std::fs::read_to_string(&trace).unwrap();
    assert!(contents.starts_with("===== Runtime trace =====\n"));
    let report = contents
        .split("\n===== Analysis =====\n")
        .nth(1)
        .expect("analysis block at exit");
    let lines: Vec<_> = report.lines().collect();
    assert!(lines[0].starts_with("Total allocated size: "));
    assert!(lines[1].starts_with("Total deallocated size (at least): "));
    assert!(lines[2].starts_with("Total leaked size (at most): "));
    assert_eq!(lines[3], "Total leaked count: 2");
    let confirmed: Vec<_> = lines
        .iter()
        .filter(|line| line.starts_with("Confirmed leaked array: "))
        .collect();
    assert_eq!(confirmed.len(), 1);
    assert!(confirmed[0].starts_with("Confirmed leaked array: 64B in leak_some in "));
    let possible: Vec<_> = lines
        .iter()
        .filter(|line| line.starts_with("Possible leaked object: "))
        .collect();
    assert_eq!(possible.len(), 1);
    assert!(possible[0].contains("B in leak_some in "));
    assert_eq!(lines.len(), 6);
}

#[test]
fn dump_is_written_at_process_exit() {
    let dir = tempfile::tempdir().unwrap();
    let dump = dir.path().join("events.bin");
    let status = Command::new(env!("CARGO_BIN_EXE_example"))
        .env("LEAK_TRACE_FILE", dir.path().join("trace.log"))
        .env("LEAK_TRACE_DUMP", &dump)
        .status()
        .unwrap();
    assert!(status.success());
    assert!(std::fs::metadata(&dump).unwrap().len() > 0);
}
