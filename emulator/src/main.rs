use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;

use losstest_emulator::session::{Session, SessionOptions};

fn main() -> io::Result<()> {
    let options = parse_options(env::args().skip(1)).unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("Usage: losstest-emulator [--nodes <n>] [--transcript <path>]");
        process::exit(2);
    });

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let stdout = io::stdout();
    let mut writer = stdout.lock();
    let mut session = Session::new(&options)?;
    let mut line = String::new();

    writeln!(
        writer,
        "LossTest emulator ready with {} nodes. Type `help` for commands or `exit` to quit.",
        options.nodes
    )?;

    loop {
        line.clear();
        write!(writer, "{:03}> ", session.selected_node())?;
        writer.flush()?;

        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            writeln!(writer)?;
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if should_terminate(trimmed) {
            writeln!(writer, "Session closed.")?;
            break;
        }

        let responses = session.handle_command(trimmed)?;
        for response in responses {
            writeln!(writer, "{response}")?;
        }
    }

    Ok(())
}

fn should_terminate(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

fn parse_options(mut args: impl Iterator<Item = String>) -> Result<SessionOptions, String> {
    let mut options = SessionOptions::default();
    while let Some(arg) = args.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) => (flag.to_string(), Some(value.to_string())),
            None => (arg, None),
        };
        let mut value = || {
            inline
                .clone()
                .or_else(|| args.next())
                .ok_or_else(|| format!("Expected value after {flag}"))
        };
        match flag.as_str() {
            "--nodes" => {
                let raw = value()?;
                options.nodes = raw
                    .parse()
                    .ok()
                    .filter(|nodes| *nodes > 0)
                    .ok_or_else(|| format!("Invalid node count: {raw}"))?;
            }
            "--transcript" => options.transcript = Some(PathBuf::from(value()?)),
            other => return Err(format!("Unknown argument: {other}")),
        }
    }
    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<SessionOptions, String> {
        parse_options(args.iter().map(|arg| (*arg).to_string()))
    }

    #[test]
    fn accepts_split_and_inline_values() {
        let options = parse(&["--nodes", "4", "--transcript=out/log.txt"]).expect("valid");
        assert_eq!(options.nodes, 4);
        assert_eq!(options.transcript, Some(PathBuf::from("out/log.txt")));
    }

    #[test]
    fn rejects_bad_arguments() {
        assert_eq!(
            parse(&["--nodes", "0"]).err().as_deref(),
            Some("Invalid node count: 0")
        );
        assert_eq!(
            parse(&["--nodes"]).err().as_deref(),
            Some("Expected value after --nodes")
        );
        assert!(parse(&["--profile"]).is_err());
    }
}
