use std::io;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing_subscriber::fmt::MakeWriter;

/// Collects everything a subscriber writes, for asserting on log output.
#[derive(Debug, Default, Clone)]
pub struct CapturingWriter {
    content: Arc<Mutex<String>>,
}

impl CapturingWriter {
    pub fn lines(&self) -> MutexGuard<'_, String> {
        self.content.lock()
    }
}

impl io::Write for CapturingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.content
            .lock()
            .push_str(std::str::from_utf8(buf).map_err(io::Error::other)?);

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturingWriter {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
