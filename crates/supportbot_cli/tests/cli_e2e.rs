use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

fn bin() -> Command {
    let path = assert_cmd::cargo::cargo_bin!("supportbot");
    let mut cmd = Command::new(path);
    for var in [
        "SUPPORTBOT_MODEL_PATH",
        "SUPPORTBOT_TOKENIZER_PATH",
        "SUPPORTBOT_CORPUS",
        "SUPPORTBOT_THRESHOLD",
        "SUPPORTBOT_FALLBACK_TEXT",
        "SUPPORTBOT_BIND",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

fn write_temp(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn ask_answers_from_sample_corpus() {
    bin()
        .args(["ask", "--question", "How do I reset my password?"])
        .assert()
        .success()
        .stdout(predicate::str::contains("decision=Answer"))
        .stdout(predicate::str::contains("Forgot password"));
}

#[test]
fn ask_uses_corpus_file() {
    let corpus = write_temp(
        r#"{"question":"What are your opening hours?","answer":"We are open 9 to 5."}
{"question":"Do you ship abroad?","answer":"Yes, to 40 countries."}
"#,
    );

    bin()
        .arg("--corpus")
        .arg(corpus.path())
        .args(["ask", "--question", "Do you ship abroad?"])
        .assert()
        .success()
        .stdout(predicate::str::contains("answer=Yes, to 40 countries."));
}

#[test]
fn ask_with_unreachable_threshold_falls_back() {
    bin()
        .args(["--threshold", "1.5", "ask", "--question", "How long is the warranty?"])
        .assert()
        .success()
        .stdout(predicate::str::contains("decision=Fallback"))
        .stdout(predicate::str::contains("support@example.com"));
}

#[test]
fn fallback_text_comes_from_environment() {
    bin()
        .env("SUPPORTBOT_THRESHOLD", "1.5")
        .env("SUPPORTBOT_FALLBACK_TEXT", "Please call us instead.")
        .args(["ask", "--question", "How long is the warranty?"])
        .assert()
        .success()
        .stdout(predicate::str::contains("decision=Fallback"))
        .stdout(predicate::str::contains("answer=Please call us instead."));
}

#[test]
fn empty_corpus_aborts_startup() {
    let corpus = write_temp("\n");

    bin()
        .arg("--corpus")
        .arg(corpus.path())
        .args(["ask", "--question", "anything"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("knowledge base has no entries"));
}

#[test]
fn model_path_without_tokenizer_is_rejected() {
    bin()
        .args(["--model-path", "model.safetensors", "ask", "--question", "hi"])
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "--model-path and --tokenizer-path must both be provided",
        ));
}

#[test]
fn missing_model_files_abort_startup() {
    bin()
        .args([
            "--model-path",
            "/nonexistent/model.safetensors",
            "--tokenizer-path",
            "/nonexistent/tokenizer.json",
            "ask",
            "--question",
            "hi",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("embedding model unavailable"));
}

#[test]
fn chat_answers_until_quit() {
    bin()
        .arg("chat")
        .write_stdin("How long is the warranty?\nQUIT\nWhere can I track my order?\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Bot: All products carry a **12-month warranty**"))
        .stdout(predicate::str::contains("Bot: Bye!"))
        .stdout(predicate::str::contains("Your Account").not());
}

#[test]
fn chat_ends_on_end_of_input() {
    bin()
        .arg("chat")
        .write_stdin("I need a copy of my invoice.\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Download invoice"))
        .stdout(predicate::str::contains("Bot: Bye!"));
}

#[test]
fn eval_reports_pass_rate() {
    let cases = write_temp(
        r#"[
  {"case_id":"reset","question":"How do I reset my password?","expected_decision":"answer","expected_entry":0},
  {"case_id":"invoice","question":"I need a copy of my invoice.","expected_decision":"answer","expected_entry":4},
  {"case_id":"blank","question":"","expected_decision":"fallback"}
]"#,
    );

    bin()
        .arg("eval")
        .arg("--cases")
        .arg(cases.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("total=3 passed=3 failed=0 pass_rate=1.0000"))
        .stdout(predicate::str::contains("meets_threshold=true"))
        .stdout(predicate::str::contains("case=blank passed=true decision=Fallback"));
}
