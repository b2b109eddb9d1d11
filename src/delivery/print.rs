//! Dry-run sink printing batches as JSON.

use std::io::{self, Stdout, Write};

use crate::delivery::{Sink, SinkError};
use crate::measurement::Batch;

/// Writes each batch as one JSON array of sink records per line.
#[derive(Debug)]
pub struct PrintSink<W> {
    out: W,
}

impl PrintSink<Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send + 'static> PrintSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send + 'static> Sink for PrintSink<W> {
    fn name(&self) -> &str {
        "print"
    }

    fn write(&mut self, batch: &Batch) -> Result<(), SinkError> {
        serde_json::to_writer(&mut self.out, &batch.records())?;
        writeln!(self.out)?;
        self.out.flush()?;
        Ok(())
    }
}
