use std::{
    io::{self, BufRead, Write},
    thread,
};

use tokio::sync::mpsc;
use tracing::{debug, warn};

pub const USAGE: &str = "\
# Input support
name 20200101 20200102
or
name 2020/01/01 2020/01/02
or
name 2020-01-01 2020-01-02

# ex.) Output
name - 1520.4 - 0.19/1 avg per fill\t2020/01/01 09:15
";

pub fn print_usage<W: Write>(out: &mut W) -> io::Result<()> {
    writeln!(out, "{USAGE}")?;
    out.flush()
}

/// Reads lines from `reader` on a dedicated thread and queues them for the
/// dispatcher in arrival order. Blank lines are dropped. The thread exits on
/// EOF, on a read error, or once the receiving side is gone.
pub fn spawn_line_reader<R>(
    reader: R,
    tx: mpsc::Sender<String>,
) -> io::Result<thread::JoinHandle<()>>
where
    R: BufRead + Send + 'static,
{
    thread::Builder::new()
        .name("rankdbx-console".into())
        .spawn(move || {
            for line in reader.lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(err) => {
                        warn!("console input failed: {err}");
                        break;
                    }
                };
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                if tx.blocking_send(trimmed.to_string()).is_err() {
                    debug!("dispatcher queue closed, stopping console reader");
                    break;
                }
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn forwards_lines_in_order_and_skips_blanks() {
        let input = Cursor::new("alice 20200101\n\n   \nbob 2020/01/01 2020/01/02\r\n");
        let (tx, mut rx) = mpsc::channel(1);
        let handle = spawn_line_reader(input, tx).unwrap();

        assert_eq!(rx.blocking_recv().as_deref(), Some("alice 20200101"));
        assert_eq!(
            rx.blocking_recv().as_deref(),
            Some("bob 2020/01/01 2020/01/02")
        );
        assert_eq!(rx.blocking_recv(), None);
        handle.join().unwrap();
    }

    #[test]
    fn usage_lists_every_date_spelling() {
        let mut out = Vec::new();
        print_usage(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        for example in ["20200101", "2020/01/01", "2020-01-01"] {
            assert!(text.contains(example));
        }
    }
}
