use std::process::Command;

#[test]
fn test_version_command_prints_name() {
    let output = Command::new(env!("CARGO_BIN_EXE_previewkit"))
        .arg("version")
        .output()
        .expect("Failed to run version command");

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).starts_with("previewkit "));
}
