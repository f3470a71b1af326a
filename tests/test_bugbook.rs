//! End-to-end tests of the `bugbook` binary.

mod common;
use common::*;

#[test]
fn version_prints() {
    bugbook!("--version").assert().success().stdout(is_match(r"^bugbook \d+\.\d+"));
}

#[test]
fn help_lists_commands() {
    bugbook!("help")
        .assert()
        .success()
        .stdout(is_match("store"))
        .stdout(is_match("diff"))
        .stdout(is_match("runs"))
        .stdout(is_match("summarize"));
}

#[test]
fn store_and_summarize() {
    let reports = TempDir::new().unwrap();
    let workdir = TempDir::new().unwrap();
    let datastore = workdir.path().join("datastore.bb");

    let finding = test_finding("src/a.c", "core.DivideZero", 12, "total / count");
    write_report(&reports, "a.json", &report_doc("clang-sa", "src/a.c", &[finding]));

    // Storing a batch with findings exits with code 2.
    bugbook!(
        "store",
        reports.path(),
        "--run",
        "nightly",
        "--datastore",
        &datastore,
        "--progress",
        "never"
    )
    .assert()
    .code(2)
    .stdout(is_match("new: 1"));

    bugbook!("summarize", "nightly", "--datastore", &datastore)
        .assert()
        .code(2)
        .stdout(is_match("core.DivideZero"));

    bugbook!("runs", "list", "--datastore", &datastore)
        .assert()
        .success()
        .stdout(is_match("nightly"));
}

#[test]
fn store_then_clean_reanalysis_exits_zero() {
    let reports = TempDir::new().unwrap();
    let clean = TempDir::new().unwrap();
    let workdir = TempDir::new().unwrap();
    let datastore = workdir.path().join("datastore.bb");

    let finding = test_finding("src/a.c", "core.DivideZero", 12, "total / count");
    write_report(&reports, "a.json", &report_doc("clang-sa", "src/a.c", &[finding]));
    write_report(&clean, "a.json", &report_doc("clang-sa", "src/a.c", &[]));

    bugbook!(
        "store", reports.path(), "--run", "nightly",
        "--datastore", &datastore, "--progress", "never"
    )
    .assert()
    .code(2);

    // The re-analysis has no findings left: everything resolves, exit code 0.
    bugbook!(
        "store", clean.path(), "--run", "nightly",
        "--datastore", &datastore, "--progress", "never"
    )
    .assert()
    .success()
    .stdout(is_match("resolved: 1"));
}

#[test]
fn diff_two_local_report_directories() {
    // Neither side is ever stored; the diff works on local batches alone.
    let base = TempDir::new().unwrap();
    let new = TempDir::new().unwrap();

    let old_finding = test_finding("src/a.c", "core.DivideZero", 12, "total / count");
    let kept = test_finding("src/a.c", "core.NullDereference", 30, "*p = 1;");
    let fresh = test_finding("src/a.c", "core.StackAddressEscape", 40, "return &local;");

    write_report(&base, "a.json", &report_doc("clang-sa", "src/a.c", &[old_finding, kept.clone()]));
    write_report(&new, "a.json", &report_doc("clang-sa", "src/a.c", &[kept, fresh]));

    bugbook!(
        "diff",
        "--basename", base.path(),
        "--newname", new.path(),
        "--new"
    )
    .assert()
    .code(2)
    .stdout(is_match("core.StackAddressEscape"))
    .stdout(is_match("1 findings"));

    bugbook!(
        "diff",
        "--basename", base.path(),
        "--newname", new.path(),
        "--resolved"
    )
    .assert()
    .code(2)
    .stdout(is_match("core.DivideZero"));

    bugbook!(
        "diff",
        "--basename", base.path(),
        "--newname", new.path(),
        "--unresolved"
    )
    .assert()
    .code(2)
    .stdout(is_match("core.NullDereference"));
}

#[test]
fn identical_batches_diff_empty() {
    let base = TempDir::new().unwrap();
    let new = TempDir::new().unwrap();

    let finding = test_finding("src/a.c", "core.DivideZero", 12, "total / count");
    write_report(&base, "a.json", &report_doc("clang-sa", "src/a.c", &[finding.clone()]));
    write_report(&new, "a.json", &report_doc("clang-sa", "src/a.c", &[finding]));

    bugbook!(
        "diff",
        "--basename", base.path(),
        "--newname", new.path(),
        "--new"
    )
    .assert()
    .success();
}

#[test]
fn diff_requires_a_mode() {
    bugbook!("diff", "--basename", "a", "--newname", "b").assert().failure();
}

#[test]
fn skip_list_excludes_files_from_store() {
    let reports = TempDir::new().unwrap();
    let workdir = TempDir::new().unwrap();
    let datastore = workdir.path().join("datastore.bb");

    let lib_finding = test_finding("/lib/vendor.c", "core.DivideZero", 5, "a / b");
    let src_finding = test_finding("/src/main.c", "core.DivideZero", 9, "c / d");
    write_report(&reports, "lib.json", &report_doc("clang-sa", "/lib/vendor.c", &[lib_finding]));
    write_report(&reports, "src.json", &report_doc("clang-sa", "/src/main.c", &[src_finding]));

    let skip = workdir.child("skipfile");
    skip.write_str("-/lib/*\n").unwrap();

    bugbook!(
        "store", reports.path(), "--run", "nightly",
        "--datastore", &datastore,
        "--skip", skip.path(),
        "--progress", "never"
    )
    .assert()
    .code(2)
    .stdout(is_match("new: 1"))
    .stdout(is_match("files skipped by skip list: 1"));
}

#[test]
fn malformed_skip_list_fails_the_operation() {
    let reports = TempDir::new().unwrap();
    let workdir = TempDir::new().unwrap();
    let datastore = workdir.path().join("datastore.bb");

    write_report(&reports, "a.json", &report_doc("clang-sa", "src/a.c", &[]));

    let skip = workdir.child("skipfile");
    skip.write_str("not a rule\n").unwrap();

    bugbook!(
        "store", reports.path(), "--run", "nightly",
        "--datastore", &datastore,
        "--skip", skip.path(),
        "--progress", "never"
    )
    .assert()
    .code(1)
    .stderr(is_match("malformed skip rule"));
}

#[test]
fn crashed_units_are_reported_but_not_fatal() {
    let reports = TempDir::new().unwrap();
    let workdir = TempDir::new().unwrap();
    let datastore = workdir.path().join("datastore.bb");

    let finding = test_finding("src/a.c", "core.DivideZero", 12, "total / count");
    write_report(&reports, "a.json", &report_doc("clang-sa", "src/a.c", &[finding]));
    write_report(
        &reports,
        "b.json",
        r#"{"analyzer": "clang-sa", "file_path": "src/b.c", "status": "crashed", "error": "segfault"}"#,
    );

    bugbook!(
        "store", reports.path(), "--run", "nightly",
        "--datastore", &datastore, "--progress", "never"
    )
    .assert()
    .code(2)
    .stdout(is_match("failed analysis units: 1"));
}

#[test]
fn servers_registry_round_trip() {
    let workdir = TempDir::new().unwrap();
    let datastore = workdir.path().join("datastore.bb");

    bugbook!(
        "servers", "register",
        "--workspace", "/tmp/ws",
        "--pid", "1",
        "--port", "8001",
        "--datastore", &datastore
    )
    .assert()
    .success();

    bugbook!("servers", "list", "--datastore", &datastore)
        .assert()
        .success()
        .stdout(is_match("/tmp/ws"));
}
