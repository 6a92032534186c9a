use anyhow::Result;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use supportbot_core::Matcher;

#[derive(Debug, PartialEq, Eq)]
pub enum ReplStep {
    Reply(String),
    Failed(String),
    Quit,
}

pub fn is_quit(input: &str) -> bool {
    matches!(input.to_ascii_lowercase().as_str(), "quit" | "exit")
}

/// Handles one line of user input. Blank lines are answered like any other
/// question.
pub fn handle_line(matcher: &Matcher, line: &str) -> ReplStep {
    let input = line.trim();
    if is_quit(input) {
        return ReplStep::Quit;
    }
    match matcher.answer(input) {
        Ok(answer) => ReplStep::Reply(answer),
        Err(err) => ReplStep::Failed(err.to_string()),
    }
}

/// Reads questions until `quit`/`exit`, end of input or Ctrl-C.
pub fn run_repl(matcher: &Matcher) -> Result<()> {
    println!("\nSupportBot ready! Ask a question or type 'quit'\n");
    let mut rl = DefaultEditor::new()?;

    loop {
        let line = match rl.readline("You: ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => "quit".to_string(),
            Err(e) => return Err(e.into()),
        };

        let trimmed = line.trim();
        if !trimmed.is_empty() {
            rl.add_history_entry(trimmed).ok();
        }

        match handle_line(matcher, &line) {
            ReplStep::Reply(answer) => println!("Bot: {answer}\n"),
            ReplStep::Failed(reason) => eprintln!("Bot: something went wrong ({reason})\n"),
            ReplStep::Quit => {
                println!("Bot: Bye!");
                break;
            }
        }
    }

    Ok(())
}
