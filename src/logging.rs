//! Log writer that tees every formatted line into a broadcast channel so
//! the dashboard can follow the process log over SSE.

use tracing_subscriber::fmt::MakeWriter;

#[derive(Clone)]
pub(crate) struct LogRelayMakeWriter {
    pub sender: tokio::sync::broadcast::Sender<String>,
}

impl<'a> MakeWriter<'a> for LogRelayMakeWriter {
    type Writer = LogRelayWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogRelayWriter {
            sender: self.sender.clone(),
        }
    }
}

pub(crate) struct LogRelayWriter {
    sender: tokio::sync::broadcast::Sender<String>,
}

impl std::io::Write for LogRelayWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let line = String::from_utf8_lossy(buf).to_string();
        let _ = self.sender.send(line); // Ignored if no receivers
        std::io::stdout().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        std::io::stdout().flush()
    }
}
