//! An emitter that writes one line per clue.

use std::io::{Stderr, Write};
use std::sync::Mutex;
use std::time::SystemTime;

use indicio::{Emitter, Value};

/// A TraceEmitter writes each clue as `timestamp file:line value` to its output.
pub struct TraceEmitter<W: Write + Send> {
    output: Mutex<W>,
}

impl TraceEmitter<Stderr> {
    pub fn stderr() -> Self {
        Self::new(std::io::stderr())
    }
}

impl<W: Write + Send> TraceEmitter<W> {
    pub fn new(output: W) -> Self {
        Self {
            output: Mutex::new(output),
        }
    }

    pub fn into_inner(self) -> W {
        self.output.into_inner().unwrap()
    }
}

impl<W: Write + Send> Emitter for TraceEmitter<W> {
    fn emit(&self, file: &'static str, line: u32, _level: u64, value: Value) {
        let timestamp = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|x| x.as_micros() as f64 / 1_000.0)
            .unwrap_or(0.0);
        // Tracing must never fail the crossing.
        let _ = writeln!(self.output.lock().unwrap(), "{timestamp:10.3} {file}:{line} {value}");
    }

    fn flush(&self) {
        let _ = self.output.lock().unwrap().flush();
    }
}
