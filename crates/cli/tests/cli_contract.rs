use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;

fn json_stdout(output: &[u8]) -> Value {
    serde_json::from_slice(output).expect("stdout should contain valid json")
}

#[test]
fn cache_id_emits_stable_json_contract() {
    let run = || {
        cargo_bin_cmd!("pdf-viewer-cli")
            .arg("cache-id")
            .arg("https://example.com/manual.pdf")
            .assert()
            .success()
            .get_output()
            .stdout
            .clone()
    };

    let value = json_stdout(&run());
    assert_eq!(value["remote"], Value::Bool(true));
    let identifier = value["identifier"].as_str().expect("identifier should be a string");
    assert!(identifier.starts_with("url_"));
    assert_eq!(identifier.len(), "url_".len() + 64);

    assert_eq!(json_stdout(&run()), value);
}

#[test]
fn cache_id_treats_plain_arguments_as_paths() {
    let output = cargo_bin_cmd!("pdf-viewer-cli")
        .arg("cache-id")
        .arg("docs/manual.pdf")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let value = json_stdout(&output);
    assert_eq!(value["remote"], Value::Bool(false));
    assert!(value["identifier"].as_str().unwrap().starts_with("file_"));
}

#[test]
fn validate_accepts_pdf_signature() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let file = temp.path().join("doc.pdf");
    fs::write(&file, b"%PDF-1.7\n%%EOF\n").unwrap();

    cargo_bin_cmd!("pdf-viewer-cli")
        .arg("validate")
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"valid\": true"));
}

#[test]
fn validate_rejects_non_pdf() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let file = temp.path().join("page.html");
    fs::write(&file, b"<html><body>not found</body></html>").unwrap();

    cargo_bin_cmd!("pdf-viewer-cli")
        .arg("validate")
        .arg(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("PDF signature not found"));
}

#[test]
fn validate_reports_missing_file() {
    cargo_bin_cmd!("pdf-viewer-cli")
        .arg("validate")
        .arg("does/not/exist.pdf")
        .assert()
        .failure()
        .stderr(predicate::str::contains("file does not exist"));
}

#[test]
fn prune_minimize_removes_other_documents() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    for name in ["url_old", "file_older"] {
        fs::create_dir_all(temp.path().join(name)).unwrap();
        fs::write(temp.path().join(name).join("0.png"), b"png").unwrap();
    }

    let output = cargo_bin_cmd!("pdf-viewer-cli")
        .arg("prune")
        .arg("https://example.com/current.pdf")
        .arg("--cache-root")
        .arg(temp.path())
        .arg("--strategy")
        .arg("minimize")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let value = json_stdout(&output);
    assert_eq!(value["strategy"], Value::String("minimize".to_owned()));
    assert_eq!(value["removed"].as_array().map(Vec::len), Some(2));
    assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 0);
}

#[test]
fn prune_rejects_unknown_strategy() {
    let temp = tempfile::tempdir().expect("temp dir should be created");

    cargo_bin_cmd!("pdf-viewer-cli")
        .arg("prune")
        .arg("https://example.com/current.pdf")
        .arg("--cache-root")
        .arg(temp.path())
        .arg("--strategy")
        .arg("sometimes")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown cache strategy"));
}

#[test]
fn download_rejects_malformed_header() {
    let temp = tempfile::tempdir().expect("temp dir should be created");

    cargo_bin_cmd!("pdf-viewer-cli")
        .arg("download")
        .arg("http://127.0.0.1:9/doc.pdf")
        .arg("--dir")
        .arg(temp.path())
        .arg("--header")
        .arg("no-separator")
        .assert()
        .failure()
        .stderr(predicate::str::contains("NAME:VALUE"));
}

#[test]
fn config_saves_loadable_file() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let saved = temp.path().join("cache.conf");
    let source = temp.path().join("source.conf");
    fs::write(&source, "max_cached_documents = 3\ncache_root = \"/tmp/pdf-pages\"\n").unwrap();

    let output = cargo_bin_cmd!("pdf-viewer-cli")
        .arg("--config")
        .arg(&source)
        .arg("config")
        .arg("--save")
        .arg(&saved)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let value = json_stdout(&output);
    assert_eq!(value["max_cached_documents"], Value::from(3));
    assert_eq!(value["cache_root"], Value::String("/tmp/pdf-pages".to_owned()));

    let reloaded = cargo_bin_cmd!("pdf-viewer-cli")
        .arg("config")
        .arg("--config")
        .arg(&saved)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let reloaded = json_stdout(&reloaded);
    assert_eq!(reloaded["max_cached_documents"], value["max_cached_documents"]);
    assert_eq!(reloaded["cache_root"], value["cache_root"]);
}

#[test]
fn prune_reads_cache_root_from_config_file() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let cache_root = temp.path().join("pages");
    fs::create_dir_all(cache_root.join("url_old")).unwrap();
    let conf = temp.path().join("cache.conf");
    fs::write(&conf, format!("cache_root = \"{}\"\n", cache_root.display())).unwrap();

    cargo_bin_cmd!("pdf-viewer-cli")
        .arg("prune")
        .arg("https://example.com/current.pdf")
        .arg("--strategy")
        .arg("minimize")
        .arg("--config")
        .arg(&conf)
        .assert()
        .success();

    assert_eq!(fs::read_dir(&cache_root).unwrap().count(), 0);
}

#[test]
fn config_reports_unreadable_file() {
    cargo_bin_cmd!("pdf-viewer-cli")
        .arg("--config")
        .arg("does/not/exist.conf")
        .arg("config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load configuration"));
}

#[cfg(not(feature = "pdfium"))]
#[test]
fn render_requires_pdfium() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let file = temp.path().join("doc.pdf");
    fs::write(&file, b"%PDF-1.7\n%%EOF\n").unwrap();

    cargo_bin_cmd!("pdf-viewer-cli")
        .arg("render")
        .arg(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("--features pdfium"));
}

#[test]
fn version_prints_package_version() {
    cargo_bin_cmd!("pdf-viewer-cli")
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}
