use std::fs;

use pretty_assertions::assert_eq;

#[test]
fn validate_accepts_a_good_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "[settings.menus]\ndepth = 4\n").unwrap();

    let output = test_bin::get_test_bin("hud-service")
        .args(["--validate", "--config"])
        .arg(&path)
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), "config ok: 5 indicators\n");
}

#[test]
fn validate_rejects_a_bad_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "[settings.menus]\nexport_base = \"not a path\"\n").unwrap();

    let output = test_bin::get_test_bin("hud-service")
        .args(["--validate", "--config"])
        .arg(&path)
        .output()
        .unwrap();
    assert!(!output.status.success());
}
