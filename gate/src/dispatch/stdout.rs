use std::sync::Arc;

use tokio::io::{AsyncWriteExt, Stdout, stdout};
use tokio::sync::Mutex;

use crate::dispatch::base::Dispatcher;
use crate::error::{ErrorKind, GateResult};
use crate::gate_error;
use crate::types::TriggerMessage;

/// Dispatcher writing each trigger message to stdout as one line of JSON.
#[derive(Debug, Clone)]
pub struct StdoutDispatcher {
    stdout: Arc<Mutex<Stdout>>,
}

impl StdoutDispatcher {
    pub fn new() -> Self {
        Self {
            stdout: Arc::new(Mutex::new(stdout())),
        }
    }
}

impl Default for StdoutDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher for StdoutDispatcher {
    async fn dispatch(&self, message: &TriggerMessage) -> GateResult<()> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');

        let mut stdout = self.stdout.lock().await;
        let result = match stdout.write_all(&line).await {
            Ok(()) => stdout.flush().await,
            Err(err) => Err(err),
        };

        result.map_err(|err| {
            gate_error!(
                ErrorKind::DispatchFailed,
                "Trigger message could not be written to stdout",
                err.to_string(),
                source: err
            )
        })
    }
}
