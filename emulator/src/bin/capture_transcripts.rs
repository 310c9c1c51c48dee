use std::io;
use std::path::PathBuf;

use losstest_emulator::session::{Session, SessionOptions};

/// Directory the transcripts are written to.
const OUT_DIR: &str = "transcripts";

fn main() -> io::Result<()> {
    record("numcast", 3, record_numcast)?;
    record("round", 2, record_round)?;
    record("lossy-round", 2, record_lossy_round)?;
    Ok(())
}

fn record(
    name: &str,
    nodes: u8,
    script: fn(&mut Session) -> io::Result<()>,
) -> io::Result<()> {
    let path = PathBuf::from(OUT_DIR).join(format!("emulator-{name}.log"));
    let mut session = Session::new(&SessionOptions {
        nodes,
        transcript: Some(path),
    })?;
    script(&mut session)
}

fn run(session: &mut Session, lines: &[&str]) -> io::Result<()> {
    for line in lines {
        session.handle_command(line)?;
    }
    Ok(())
}

fn record_numcast(session: &mut Session) -> io::Result<()> {
    run(
        session,
        &[
            "help numcast",
            "numcast start",
            "numcast value=42",
            "node 2",
            "numcast start",
            "node 3",
            "numcast start",
            "numcast auto",
            "run 2s",
            "status",
            "node 1",
            "status",
            "numcast stop",
            "run 100ms",
        ],
    )
}

fn record_round(session: &mut Session) -> io::Result<()> {
    run(
        session,
        &[
            "scanner start",
            "node 2",
            "set count=0",
            "set interval=0",
            "sender start",
            "run 60s",
            "status",
            "node 1",
            "status",
        ],
    )
}

fn record_lossy_round(session: &mut Session) -> io::Result<()> {
    run(
        session,
        &[
            "loss 10",
            "scanner start",
            "node 2",
            "set count=0",
            "set legacy=0",
            "sender start",
            "run 60s",
            "status",
            "node 1",
            "status",
        ],
    )
}
