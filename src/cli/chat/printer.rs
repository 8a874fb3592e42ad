use std::io::{self, Write};

use rustyline::ExternalPrinter;

/// Transcript sink that hands each flushed bubble to the line editor, which
/// prints it above the prompt and redraws the line being typed.
pub struct PrinterSink<P> {
    printer: P,
    pending: Vec<u8>,
}

impl<P: ExternalPrinter> PrinterSink<P> {
    pub fn new(printer: P) -> Self {
        Self {
            printer,
            pending: Vec::new(),
        }
    }
}

impl<P: ExternalPrinter> Write for PrinterSink<P> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        self.printer
            .print(text)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
    }
}
