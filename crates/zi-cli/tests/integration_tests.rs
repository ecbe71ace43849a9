//! End-to-end tests that drive the `zi` binary against a temporary home.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

const NS: &str = "http://zero-install.sourceforge.net/2004/injector/interface";

fn zi(home: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_zi"))
        .args(args)
        .env("ZI_HOME", home)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to launch zi")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn implementation_tree(root: &Path) {
    fs::create_dir_all(root.join("bin")).unwrap();
    fs::write(root.join("bin/tool"), "#!/bin/sh\necho tool\n").unwrap();
    fs::write(root.join("README"), "readme").unwrap();
}

#[test]
fn help_lists_commands() {
    let home = tempfile::tempdir().unwrap();
    let output = zi(home.path(), &["--help"]);
    assert!(output.status.success());
    let text = stdout(&output);
    for command in ["run", "select", "add-app", "integrate", "sync", "store", "catalog"] {
        assert!(text.contains(command), "missing {command} in help");
    }
}

#[test]
fn digest_of_a_directory() {
    let home = tempfile::tempdir().unwrap();
    let tree = tempfile::tempdir().unwrap();
    implementation_tree(tree.path());
    let path = tree.path().to_str().unwrap();

    let output = zi(home.path(), &["digest", path, "--algorithm", "sha256new"]);
    assert!(output.status.success());
    let digest = stdout(&output).trim().to_string();
    assert!(digest.starts_with("sha256new_"), "{digest}");

    let all = stdout(&zi(home.path(), &["digest", path]));
    assert_eq!(all.lines().count(), 4);
    assert!(all.lines().any(|l| l == digest));

    let manifest = stdout(&zi(home.path(), &["digest", path, "--manifest"]));
    assert!(manifest.contains("README"));
}

#[test]
fn store_add_find_verify_and_remove() {
    let home = tempfile::tempdir().unwrap();
    let tree = tempfile::tempdir().unwrap();
    implementation_tree(tree.path());
    let path = tree.path().to_str().unwrap();
    let digest = stdout(&zi(home.path(), &["digest", path, "--algorithm", "sha256new"]))
        .trim()
        .to_string();

    assert!(zi(home.path(), &["store", "add", &digest, path]).status.success());

    let listed = stdout(&zi(home.path(), &["store", "list"]));
    assert_eq!(listed.trim(), digest);

    let found = stdout(&zi(home.path(), &["store", "find", &digest]));
    let stored = Path::new(found.trim());
    assert!(stored.join("bin/tool").exists());
    assert!(stored.join(".manifest").exists());

    assert!(zi(home.path(), &["store", "verify", &digest]).status.success());
    assert!(zi(home.path(), &["store", "audit"]).status.success());

    let manifest = stdout(&zi(home.path(), &["store", "manifest", &digest]));
    assert!(manifest.contains("README"));

    // Adding the same implementation again changes nothing
    let again = zi(home.path(), &["store", "add", &digest, path]);
    assert_eq!(again.status.code(), Some(1));

    assert!(zi(home.path(), &["store", "remove", &digest]).status.success());
    assert!(stdout(&zi(home.path(), &["store", "list"])).trim().is_empty());
    assert_eq!(zi(home.path(), &["store", "remove", &digest]).status.code(), Some(99));
}

#[test]
fn store_rejects_wrong_digest() {
    let home = tempfile::tempdir().unwrap();
    let tree = tempfile::tempdir().unwrap();
    implementation_tree(tree.path());

    let wrong = "sha256new_AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";
    let output = zi(home.path(), &["store", "add", wrong, tree.path().to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(27));
    assert!(stdout(&zi(home.path(), &["store", "list"])).trim().is_empty());
}

#[test]
fn invalid_digest_is_an_argument_error() {
    let home = tempfile::tempdir().unwrap();
    let output = zi(home.path(), &["store", "find", "not-a-digest"]);
    assert_eq!(output.status.code(), Some(99));
}

#[test]
fn empty_app_list() {
    let home = tempfile::tempdir().unwrap();
    let output = zi(home.path(), &["--offline", "list-apps"]);
    assert!(output.status.success());
}

#[test]
fn removing_an_unknown_app_fails() {
    let home = tempfile::tempdir().unwrap();
    let output = zi(home.path(), &["--offline", "remove-app", "http://example.com/missing.xml"]);
    assert_eq!(output.status.code(), Some(99));
}

fn local_feed(dir: &Path, script: &str) -> String {
    let script_path = dir.join("hello.sh");
    fs::write(&script_path, script).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&script_path, fs::Permissions::from_mode(0o755)).unwrap();
    }
    let feed = dir.join("hello.xml");
    fs::write(
        &feed,
        format!(
            r#"<interface xmlns="{NS}"><name>Hello</name><summary>greets</summary>
  <implementation id="." version="1.2" stability="stable">
    <command name="run" path="hello.sh"><arg>--greet</arg></command>
  </implementation>
</interface>"#
        ),
    )
    .unwrap();
    feed.to_str().unwrap().to_string()
}

#[test]
fn select_prints_selections_document() {
    let home = tempfile::tempdir().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let feed = local_feed(dir.path(), "#!/bin/sh\n");

    let output = zi(home.path(), &["--offline", "select", &feed, "--xml"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let xml = stdout(&output);
    assert!(xml.contains("<selections"));
    assert!(xml.contains(r#"version="1.2""#));
}

#[test]
fn version_conflicts_with_before() {
    let home = tempfile::tempdir().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let feed = local_feed(dir.path(), "#!/bin/sh\n");

    let output = zi(
        home.path(),
        &["--offline", "select", &feed, "--version", "1..", "--before", "2"],
    );
    assert_eq!(output.status.code(), Some(99));
}

#[test]
fn unsatisfiable_version_is_a_solver_error() {
    let home = tempfile::tempdir().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let feed = local_feed(dir.path(), "#!/bin/sh\n");

    let output = zi(home.path(), &["--offline", "select", &feed, "--version", "2.."]);
    assert_eq!(output.status.code(), Some(20));
}

#[cfg(unix)]
#[test]
fn run_passes_arguments_and_exit_code() {
    let home = tempfile::tempdir().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let feed = local_feed(dir.path(), "#!/bin/sh\necho \"$@\"\nexit 3\n");

    let output = zi(home.path(), &["--offline", "run", &feed, "world"]);
    assert_eq!(output.status.code(), Some(3));
    assert_eq!(stdout(&output).trim(), "--greet world");
}

const CATALOG: &str = r#"<catalog xmlns="http://0install.de/schema/injector/catalog">
  <interface xmlns="http://zero-install.sourceforge.net/2004/injector/interface" uri="http://example.com/firefox.xml">
    <name>Mozilla Firefox</name><summary>web browser</summary>
  </interface>
  <interface xmlns="http://zero-install.sourceforge.net/2004/injector/interface" uri="http://example.com/vlc.xml">
    <name>VLC</name><summary>media player</summary>
  </interface>
</catalog>"#;

#[test]
fn catalog_sources_refresh_and_search() {
    let home = tempfile::tempdir().unwrap();
    let mut server = mockito::Server::new();
    let _m = server
        .mock("GET", "/catalog.xml")
        .with_status(200)
        .with_body(CATALOG)
        .create();
    let url = format!("{}/catalog.xml", server.url());

    assert!(zi(home.path(), &["catalog", "add", &url]).status.success());
    assert_eq!(zi(home.path(), &["catalog", "add", &url]).status.code(), Some(1));
    assert!(
        zi(home.path(), &["catalog", "remove", "http://0install.de/catalog/"])
            .status
            .success()
    );
    let sources = stdout(&zi(home.path(), &["catalog", "list"]));
    assert_eq!(sources.trim(), url);

    assert!(zi(home.path(), &["catalog", "refresh"]).status.success());
    let found = stdout(&zi(home.path(), &["--offline", "catalog", "search", "firefox"]));
    assert!(found.contains("Mozilla Firefox"));
    assert!(!found.contains("VLC"));

    assert!(zi(home.path(), &["catalog", "reset"]).status.success());
    let sources = stdout(&zi(home.path(), &["catalog", "list"]));
    assert_eq!(sources.trim(), "http://0install.de/catalog/");
}
