use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[cfg(unix)]
use signal_hook::consts::signal::{SIGINT, SIGTERM};
#[cfg(unix)]
use signal_hook::flag;
#[cfg(unix)]
use signal_hook::low_level::unregister;
#[cfg(unix)]
use signal_hook::SigId;

pub const FORCED_EXIT_CODE: i32 = 130;

// The first SIGINT/SIGTERM requests a graceful stop; a second one while the stop is still
// pending terminates the process with `FORCED_EXIT_CODE`.
pub struct ShutdownHooks {
    triggered: Arc<AtomicBool>,
    #[cfg(unix)]
    sig_ids: Vec<SigId>,
}

impl ShutdownHooks {
    pub fn install() -> io::Result<Self> {
        let triggered = Arc::new(AtomicBool::new(false));

        #[cfg(unix)]
        {
            let mut sig_ids = Vec::with_capacity(4);
            for signal in [SIGINT, SIGTERM] {
                sig_ids.push(flag::register_conditional_shutdown(
                    signal,
                    FORCED_EXIT_CODE,
                    Arc::clone(&triggered),
                )?);
                sig_ids.push(flag::register(signal, Arc::clone(&triggered))?);
            }
            return Ok(Self { triggered, sig_ids });
        }

        #[cfg(not(unix))]
        {
            Ok(Self { triggered })
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }
}

impl Drop for ShutdownHooks {
    fn drop(&mut self) {
        #[cfg(unix)]
        for id in self.sig_ids.drain(..) {
            unregister(id);
        }
    }
}
