//! Host side I/O for guest programs: where `print` writes and where `input`
//! reads from.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io::{self, BufRead, Write};
use std::rc::Rc;
use std::sync::mpsc as std_mpsc;
use std::thread;

use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

pub struct Console {
    output: RefCell<Box<dyn Write>>,
    input: LineReader,
}

impl Console {
    pub fn new(output: impl Write + 'static, input: LineReader) -> Self {
        Console {
            output: RefCell::new(Box::new(output)),
            input,
        }
    }

    /// Standard output and a line reader over standard input.
    pub fn stdio() -> Self {
        Console::new(io::stdout(), LineReader::stdin())
    }

    /// A console whose output is kept in memory, for embedding and tests.
    pub fn captured(input: LineReader) -> (Self, CapturedOutput) {
        let output = CapturedOutput::default();
        (Console::new(output.clone(), input), output)
    }

    pub fn print_line(&self, line: &str) {
        let mut output = self.output.borrow_mut();
        if let Err(err) = writeln!(output, "{}", line).and_then(|()| output.flush()) {
            warn!(%err, "failed to write console output");
        }
    }

    /// Suspends until the next input line arrives. `None` at end of input.
    pub async fn read_line(&self, prompt: &str) -> Option<String> {
        self.input.read_line(prompt).await
    }
}

/// Line input served from a dedicated thread, so blocking reads never stall
/// the single threaded event loop.
///
/// Each `read_line` sends a numbered prompt to the thread and awaits the
/// answer carrying the same number. Requests are serialized, so concurrent
/// readers never receive each other's lines. A reader dropped while waiting
/// (an interval cleared mid `input`) leaves its prompt on screen; the line
/// typed in answer to it is discarded.
pub struct LineReader {
    prompts: std_mpsc::Sender<(u64, String)>,
    lines: Mutex<mpsc::UnboundedReceiver<(u64, Option<String>)>>,
    next_request: Cell<u64>,
}

impl LineReader {
    /// Runs `read` on its own thread once per prompt. Returning `None` ends
    /// the input for good.
    pub fn spawn<F>(mut read: F) -> Self
    where
        F: FnMut(&str) -> Option<String> + Send + 'static,
    {
        let (prompt_tx, prompt_rx) = std_mpsc::channel::<(u64, String)>();
        let (line_tx, line_rx) = mpsc::unbounded_channel();

        let spawned = thread::Builder::new()
            .name("monkey-input".to_string())
            .spawn(move || {
                for (request, prompt) in prompt_rx {
                    let line = read(&prompt);
                    let finished = line.is_none();
                    if line_tx.send((request, line)).is_err() || finished {
                        break;
                    }
                }
                debug!("input thread finished");
            });
        // Without a thread every read reports end of input
        if let Err(err) = spawned {
            warn!(%err, "failed to start input thread");
        }

        LineReader {
            prompts: prompt_tx,
            lines: Mutex::new(line_rx),
            next_request: Cell::new(0),
        }
    }

    pub fn stdin() -> Self {
        LineReader::spawn(|prompt| {
            let mut stdout = io::stdout();
            let _ = write!(stdout, "{}", prompt).and_then(|()| stdout.flush());
            let mut line = String::new();
            match io::stdin().lock().read_line(&mut line) {
                Ok(0) => None,
                Ok(_) => Some(line.trim_end_matches(['\n', '\r']).to_string()),
                Err(err) => {
                    warn!(%err, "failed to read from stdin");
                    None
                }
            }
        })
    }

    /// Answers prompts from a fixed list of lines, then reports end of input.
    pub fn scripted<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut lines: VecDeque<String> = lines.into_iter().map(Into::into).collect();
        LineReader::spawn(move |_| lines.pop_front())
    }

    pub async fn read_line(&self, prompt: &str) -> Option<String> {
        let mut lines = self.lines.lock().await;
        let request = self.next_request.get();
        self.next_request.set(request + 1);
        self.prompts.send((request, prompt.to_string())).ok()?;
        loop {
            let (answered, line) = lines.recv().await?;
            if answered == request {
                return line;
            }
            debug!(answered, "discarding answer to an abandoned prompt");
        }
    }
}

/// Shared in-memory sink for console output.
#[derive(Clone, Default)]
pub struct CapturedOutput(Rc<RefCell<Vec<u8>>>);

impl CapturedOutput {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl Write for CapturedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("failed to build runtime")
            .block_on(future)
    }

    #[test]
    fn test_captured_output() {
        let (console, output) = Console::captured(LineReader::scripted(Vec::<String>::new()));
        console.print_line("hello");
        console.print_line("world");
        assert_eq!(output.contents(), "hello\nworld\n");
    }

    #[test]
    fn test_scripted_lines_then_eof() {
        let reader = LineReader::scripted(["first", "second"]);
        block_on(async {
            assert_eq!(reader.read_line("> ").await.as_deref(), Some("first"));
            assert_eq!(reader.read_line("> ").await.as_deref(), Some("second"));
            assert_eq!(reader.read_line("> ").await, None);
            assert_eq!(reader.read_line("> ").await, None);
        });
    }

    #[test]
    fn test_abandoned_prompt_answer_is_discarded() {
        let (release_tx, release_rx) = std_mpsc::channel::<()>();
        let reader = LineReader::spawn(move |prompt| {
            // Blocks like a user who has not typed yet
            release_rx.recv().ok()?;
            Some(format!("answer to {}", prompt))
        });
        block_on(async {
            let abandoned = tokio::time::timeout(
                std::time::Duration::from_millis(10),
                reader.read_line("first"),
            )
            .await;
            assert!(abandoned.is_err());

            release_tx.send(()).expect("input thread is running");
            release_tx.send(()).expect("input thread is running");
            assert_eq!(
                reader.read_line("second").await.as_deref(),
                Some("answer to second")
            );
        });
    }

    #[test]
    fn test_reader_sees_prompts() {
        let (seen_tx, seen_rx) = std_mpsc::channel();
        let reader = LineReader::spawn(move |prompt| {
            let _ = seen_tx.send(prompt.to_string());
            Some(prompt.to_uppercase())
        });
        block_on(async {
            assert_eq!(reader.read_line("abc").await.as_deref(), Some("ABC"));
        });
        assert_eq!(seen_rx.recv().ok().as_deref(), Some("abc"));
    }
}
