use std::io::Write;
use std::process::{Command, Output, Stdio};
use tempfile::TempDir;

const PROMPT: &str = "TinyShell>$ ";

fn tinysh(dir: &TempDir, flags: &[&str], input: &str) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_tinysh"))
        .args(flags)
        .current_dir(dir.path())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(input.as_bytes())
        .unwrap();
    child.wait_with_output().unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8(output.stdout.clone()).unwrap()
}

fn stderr(output: &Output) -> String {
    String::from_utf8(output.stderr.clone()).unwrap()
}

#[test]
fn prints_prompt_and_runs_one_line() {
    let dir = tempfile::tempdir().unwrap();
    let output = tinysh(&dir, &[], "echo hi\necho never\n");
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(stdout(&output), format!("{PROMPT}hi\n"));
}

#[test]
fn unbalanced_quote_fails() {
    let dir = tempfile::tempdir().unwrap();

    let output = tinysh(&dir, &[], "echo \"open\n");
    assert_eq!(output.status.code(), Some(1));
    assert_eq!(stdout(&output), PROMPT);
    assert!(stderr(&output).starts_with("tinysh:"));

    let output = tinysh(&dir, &[], "echo hi\"\n");
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn validation_error_still_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let output = tinysh(&dir, &[], "| wc\n");
    assert_eq!(output.status.code(), Some(0));
    assert!(stderr(&output).contains("tinysh:"));
}

#[test]
fn exit_code_is_forwarded() {
    let dir = tempfile::tempdir().unwrap();
    let output = tinysh(&dir, &[], "exit 3\n");
    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn end_of_input_fails() {
    let dir = tempfile::tempdir().unwrap();
    let output = tinysh(&dir, &[], "");
    assert_eq!(output.status.code(), Some(1));
    assert_eq!(stdout(&output), PROMPT);
}

#[test]
fn builtin_output_ignores_redirection() {
    let dir = tempfile::tempdir().unwrap();
    let output = tinysh(&dir, &[], "ver > v\n");
    assert_eq!(output.status.code(), Some(0));
    assert!(stdout(&output).starts_with(&format!("{PROMPT}Tiny Shell v")));
    assert!(!dir.path().join("v").exists());
}

#[test]
fn interactive_mode_reads_until_exit() {
    let dir = tempfile::tempdir().unwrap();
    let output = tinysh(
        &dir,
        &["-i", "--prompt", "> "],
        "echo one > f\n\necho \"bad\nexit 4\necho never >> f\n",
    );
    assert_eq!(output.status.code(), Some(4));
    assert_eq!(std::fs::read_to_string(dir.path().join("f")).unwrap(), "one\n");
    assert_eq!(stdout(&output), "> > > > ");
}

#[test]
fn interactive_mode_stops_at_end_of_input() {
    let dir = tempfile::tempdir().unwrap();
    let output = tinysh(&dir, &["-i"], "echo a\n");
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(stdout(&output), format!("{PROMPT}a\n{PROMPT}"));
}
