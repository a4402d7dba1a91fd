use std::process;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Where a Ctrl-C landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    Turn,
    Idle,
}

/// Routes Ctrl-C to the turn in flight. With no turn running it means quit.
#[derive(Clone, Default)]
pub struct TurnInterrupts {
    current: Arc<Mutex<Option<CancellationToken>>>,
}

impl TurnInterrupts {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fresh token for the next turn; interrupts cancel it until `end_turn`.
    pub fn begin_turn(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.slot() = Some(token.clone());
        token
    }

    pub fn end_turn(&self) {
        self.slot().take();
    }

    pub fn interrupt(&self) -> Interrupted {
        match self.slot().as_ref() {
            Some(token) => {
                token.cancel();
                Interrupted::Turn
            }
            None => Interrupted::Idle,
        }
    }

    /// One listener for the whole process. An idle Ctrl-C exits with 130.
    pub fn listen(&self) -> JoinHandle<()> {
        let interrupts = self.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                match interrupts.interrupt() {
                    Interrupted::Turn => debug!("interrupt cancelled the current turn"),
                    Interrupted::Idle => {
                        eprintln!();
                        process::exit(130);
                    }
                }
            }
        })
    }
}
