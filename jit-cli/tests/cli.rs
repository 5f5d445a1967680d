//! End-to-end smoke tests driving the built binary over small JSON
//! fixtures, the way a user invokes it from a shell.

use std::fs;
use std::process::Command;

fn jit_cli() -> Command {
    Command::new(env!("CARGO_BIN_EXE_jit-cli"))
}

fn tmp_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("jit-cli-test-{}-{name}", std::process::id()))
}

#[test]
fn compiles_empty_method_to_binary() {
    let fixture = tmp_path("empty.json");
    fs::write(
        &fixture,
        r#"{"id": 0, "name": "empty", "locals": [], "params": [],
            "body": [{"id": 0, "opcode": "ret"}]}"#,
    )
    .unwrap();
    let out = tmp_path("empty.bin");

    let status = jit_cli()
        .arg(&fixture)
        .arg("--out")
        .arg(&out)
        .status()
        .unwrap();
    assert!(status.success());

    let bytes = fs::read(&out).unwrap();
    // Reserved header (16 bytes) + bootloader + call handler + the
    // 6-instruction empty method, all 4-byte words.
    assert!(bytes.len() > 16);
    assert_eq!(bytes.len() % 4, 0);

    fs::remove_file(&fixture).ok();
    fs::remove_file(&out).ok();
}

#[test]
fn compiles_add_fixture_and_emits_disassembly() {
    let fixture = tmp_path("add.json");
    fs::write(
        &fixture,
        r#"{
            "id": 0,
            "name": "add_two",
            "locals": [],
            "params": [{}, {}],
            "body": [
                {
                    "id": 2,
                    "opcode": "add",
                    "children": [
                        {"id": 0, "opcode": "ldarg", "operand": 0},
                        {"id": 1, "opcode": "ldarg", "operand": 1}
                    ]
                },
                {"id": 3, "opcode": "ret"}
            ]
        }"#,
    )
    .unwrap();
    let out = tmp_path("add.bin");
    let disasm = tmp_path("add.s");

    let status = jit_cli()
        .arg(&fixture)
        .arg("--out")
        .arg(&out)
        .arg("--disasm")
        .arg(&disasm)
        .status()
        .unwrap();
    assert!(status.success());

    let text = fs::read_to_string(&disasm).unwrap();
    assert!(text.contains("# Function entry"));
    assert!(text.contains("a     "));

    fs::remove_file(&fixture).ok();
    fs::remove_file(&out).ok();
    fs::remove_file(&disasm).ok();
}

#[test]
fn unknown_opcode_fails_with_nonzero_exit() {
    let fixture = tmp_path("bad.json");
    fs::write(
        &fixture,
        r#"{"id": 0, "name": "bad", "locals": [], "params": [],
            "body": [{"id": 0, "opcode": "ldtoken"}]}"#,
    )
    .unwrap();

    let status = jit_cli().arg(&fixture).status().unwrap();
    assert!(!status.success());

    fs::remove_file(&fixture).ok();
}
