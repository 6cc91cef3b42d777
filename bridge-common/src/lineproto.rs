use std::io;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin, Stdout};
use tracing::warn;

/// One JSON object per line over stdin/stdout, the protocol CouchDB's
/// external process hooks speak.
pub struct LineProtocol {
    input: Lines<BufReader<Stdin>>,
    output: Stdout,
}

impl LineProtocol {
    pub fn new() -> Self {
        Self {
            input: BufReader::new(tokio::io::stdin()).lines(),
            output: tokio::io::stdout(),
        }
    }

    /// Next parsable object from stdin. Unparsable lines are logged and
    /// skipped; `None` means end of input.
    pub async fn next(&mut self) -> Option<Value> {
        loop {
            match self.input.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str(&line) {
                        Ok(value) => return Some(value),
                        Err(error) => warn!(%error, %line, "problem with input line"),
                    }
                }
                Ok(None) => return None,
                Err(error) => {
                    warn!(%error, "failed to read from stdin");
                    return None;
                }
            }
        }
    }

    /// Write one object as a single output line and flush it.
    pub async fn write(&mut self, value: &Value) -> io::Result<()> {
        let mut line = serde_json::to_string(value)?;
        line.push('\n');
        self.output.write_all(line.as_bytes()).await?;
        self.output.flush().await
    }
}

impl Default for LineProtocol {
    fn default() -> Self {
        Self::new()
    }
}
