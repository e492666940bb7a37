use crate::error::{EngineError, Stage};
use serde::{Serialize, Deserialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;

/// Shared flag flipped by the caller to stop a running analysis at the
/// next checkpoint. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {

    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

}

/// Coarse progress notification emitted between (and inside long-running)
/// stages. Percentages are per run, monotone, and end at 100 when the run
/// completes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub stage : Stage,
    pub percent : u8
}

/// Observer handle threaded through the pipeline: carries the optional
/// cancellation token and the optional progress channel. Long loops call
/// `checkpoint` once per sweep; stages call `report` at their boundaries.
#[derive(Debug, Clone, Default)]
pub struct Monitor {
    pub cancel : Option<CancelToken>,
    pub progress : Option<Sender<ProgressEvent>>
}

impl Monitor {

    pub fn new(cancel : Option<CancelToken>, progress : Option<Sender<ProgressEvent>>) -> Self {
        Self { cancel, progress }
    }

    /// Monitor that never cancels and reports to no one.
    pub fn silent() -> Self {
        Self::default()
    }

    /// Returns `Cancelled` if the token was flipped; call sites propagate
    /// it with `?` and the pipeline boundary turns it into a clean
    /// `RunOutcome::Cancelled` rather than an error.
    pub fn checkpoint(&self) -> Result<(), EngineError> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(EngineError::Cancelled),
            _ => Ok(())
        }
    }

    /// Best-effort notification; a hung or dropped receiver never stalls
    /// the analysis.
    pub fn report(&self, stage : Stage, percent : u8) {
        if let Some(tx) = &self.progress {
            let _ = tx.send(ProgressEvent { stage, percent : percent.min(100) });
        }
    }

}

#[cfg(test)]
mod test {

    use super::*;
    use std::sync::mpsc::channel;

    #[test]
    fn silent_monitor_never_cancels() {
        let m = Monitor::silent();
        assert!(m.checkpoint().is_ok());
        m.report(Stage::Superimposition, 50);
    }

    #[test]
    fn cancelled_token_trips_checkpoint() {
        let token = CancelToken::new();
        let m = Monitor::new(Some(token.clone()), None);
        assert!(m.checkpoint().is_ok());
        token.cancel();
        assert!(matches!(m.checkpoint(), Err(EngineError::Cancelled)));
    }

    #[test]
    fn reports_are_clamped_and_delivered() {
        let (tx, rx) = channel();
        let m = Monitor::new(None, Some(tx));
        m.report(Stage::PrincipalComponents, 250);
        let event = rx.try_recv().unwrap();
        assert_eq!(event.percent, 100);
        assert_eq!(event.stage, Stage::PrincipalComponents);
    }

    #[test]
    fn dropped_receiver_is_harmless() {
        let (tx, rx) = channel();
        drop(rx);
        let m = Monitor::new(None, Some(tx));
        m.report(Stage::Regression, 10);
        assert!(m.checkpoint().is_ok());
    }

}
