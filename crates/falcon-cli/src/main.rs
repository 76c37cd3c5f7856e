//! Falcon command-line runner and REPL.

use std::{
    env,
    io::{self, BufRead, Write},
    process::ExitCode,
};

use falcon::{ExecOptions, Executor, StdPrint};

const VERSION: &str = env!("CARGO_PKG_VERSION");

const USAGE: &str = "usage: falcon [options] [file]

options:
  -i, --repl          start an interactive session
      --verbose       trace execution to stderr
      --no-typecheck  skip the gradual type checker
      --version       print version and exit
  -h, --help          show this help";

fn main() -> ExitCode {
    let mut file: Option<String> = None;
    let mut repl = false;
    let mut options = ExecOptions::default();

    for arg in env::args().skip(1) {
        match arg.as_str() {
            "-i" | "--repl" => repl = true,
            "--verbose" => options.verbose = true,
            "--no-typecheck" => options.type_check = false,
            "--version" => {
                println!("{VERSION}");
                return ExitCode::SUCCESS;
            }
            "-h" | "--help" => {
                println!("{USAGE}");
                return ExitCode::SUCCESS;
            }
            other if other.starts_with('-') => {
                eprintln!("unknown option: {other}\n{USAGE}");
                return ExitCode::FAILURE;
            }
            other => {
                if file.is_some() {
                    eprintln!("only one script file may be given\n{USAGE}");
                    return ExitCode::FAILURE;
                }
                file = Some(other.to_owned());
            }
        }
    }

    let mut executor = match Executor::with_options(options) {
        Ok(executor) => executor,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    if !repl {
        if let Some(file) = file {
            let code = executor.run_file(&file, &mut StdPrint);
            return exit_from(code);
        }
    }
    run_repl(&mut executor)
}

fn run_repl(executor: &mut Executor) -> ExitCode {
    println!("Falcon {VERSION} (type 'exit' or Ctrl-D to leave)");
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("falcon> ");
        let _ = io::stdout().flush();
        let Some(Ok(line)) = lines.next() else {
            println!();
            return ExitCode::SUCCESS;
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed == "exit" || trimmed == "quit" {
            return ExitCode::SUCCESS;
        }
        // errors are already rendered; the session keeps going
        let _ = executor.run_source(&line, "<repl>", &mut StdPrint);
    }
}

fn exit_from(code: i32) -> ExitCode {
    match u8::try_from(code) {
        Ok(code) => ExitCode::from(code),
        Err(_) => ExitCode::FAILURE,
    }
}
