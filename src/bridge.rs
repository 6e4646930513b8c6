use futures::future::LocalBoxFuture;

use crate::error_report::PageException;
use crate::request::{Request, Response};
use crate::{Error, Result};

/// One finished handler turn: the response to mount and the continuation that
/// resumes the interpreter on the next request.
pub struct HandlerTurn {
    pub response: Response,
    pub next: Continuation,
}

pub type HandlerResult = std::result::Result<HandlerTurn, PageException>;

/// The interpreter-supplied callback invoked with the next Request. Invoking
/// it consumes it; the turn it resolves to carries the rebound continuation.
pub type Continuation = Box<dyn FnOnce(Request) -> LocalBoxFuture<'static, HandlerResult>>;

/// Exactly one continuation is live at a time. The generation advances on
/// every bind, so a turn produced under a superseded binding can be told apart
/// from the current one.
pub(crate) struct BridgeState {
    continuation: Option<Continuation>,
    generation: u64,
}

impl BridgeState {
    pub(crate) fn new() -> Self {
        Self {
            continuation: None,
            generation: 0,
        }
    }

    pub(crate) fn is_bound(&self) -> bool {
        self.continuation.is_some()
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn bind(&mut self, continuation: Continuation) -> u64 {
        self.generation += 1;
        self.continuation = Some(continuation);
        self.generation
    }

    pub(crate) fn take(&mut self) -> Result<(Continuation, u64)> {
        let continuation = self.continuation.take().ok_or(Error::NoContinuation)?;
        Ok((continuation, self.generation))
    }
}
