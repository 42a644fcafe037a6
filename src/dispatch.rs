// FREQCTL DISPATCHER
// FAST PATH: COMMIT INLINE, UNDER THE DOMAIN LOCK (DRIVER GUARANTEES NO BLOCKING).
// SLOW PATH: WRITE next_freq UNDER THE LOCK, RING A ONE-SLOT DOORBELL, LET THE
// DOMAIN'S DEDICATED WORKER COMMIT OUTSIDE THE LOCK. LAST WRITE WINS.

use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Weak;
use std::thread::JoinHandle;

use tracing::{debug, warn};

use crate::domain::PolicyDomain;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DispatchMode {
    Fast,
    Slow,
}

impl DispatchMode {
    pub fn label(self) -> &'static str {
        match self {
            Self::Fast => "FAST",
            Self::Slow => "SLOW",
        }
    }
}

// WHO RUNS THE SLOW-PATH JOB
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum WorkerMode {
    // ONE DEDICATED THREAD PER DOMAIN
    #[default]
    Thread,
    // THE HOST CALLS PolicyDomain::run_worker_once() FROM ITS OWN CONTEXT
    Manual,
}

// NON-BLOCKING TRIGGER. SAFE TO RING WITH THE DOMAIN LOCK HELD.
pub(crate) struct Doorbell {
    tx: SyncSender<()>,
}

impl Doorbell {
    pub(crate) fn pair() -> (Self, Receiver<()>) {
        let (tx, rx) = mpsc::sync_channel(1);
        (Self { tx }, rx)
    }

    // FALSE ONLY IF THE WORKER IS GONE
    pub(crate) fn ring(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => true,
            Err(TrySendError::Disconnected(())) => false,
        }
    }
}

// WORKER LOOP. HOLDS ONLY A WEAK REFERENCE SO A DROPPED DOMAIN ENDS THE THREAD.
// BUFFERED RINGS ARE DRAINED BEFORE THE CLOSED DOORBELL IS SEEN, SO A JOB
// REQUESTED BEFORE SHUTDOWN IS STILL COMMITTED.
pub(crate) fn spawn_worker(
    id: usize,
    domain: Weak<PolicyDomain>,
    rx: Receiver<()>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name(format!("freqctl-pol{}", id))
        .spawn(move || {
            debug!(domain = id, "worker started");
            while rx.recv().is_ok() {
                let Some(d) = domain.upgrade() else {
                    break;
                };
                if d.run_worker_once().is_none() {
                    warn!(domain = id, "worker woken with no job in flight");
                }
            }
            debug!(domain = id, "worker exited");
        })
}
