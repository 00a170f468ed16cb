//! Per-operation context passed through every pipeline call.
//!
//! Carries the tracing span the operation runs in and the cancellation
//! token that long-running work checks at suspension points.

use tokio_util::sync::CancellationToken;
use tracing::Span;

/// Operation context.
#[derive(Debug, Clone)]
pub struct OpContext {
    span: Span,
    cancel: CancellationToken,
}

impl OpContext {
    /// Context with the given span and token.
    pub fn new(span: Span, cancel: CancellationToken) -> Self {
        Self { span, cancel }
    }

    /// Detached context for tests and one-shot tools.
    pub fn detached() -> Self {
        Self::new(Span::none(), CancellationToken::new())
    }

    /// Child context: nested span, child token.
    ///
    /// Cancelling the parent cancels the child, not the other way round.
    pub fn child(&self, span: Span) -> Self {
        Self {
            span,
            cancel: self.cancel.child_token(),
        }
    }

    /// The span operations should be instrumented with.
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// The cancellation token.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// True once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_follows_parent() {
        let parent = OpContext::detached();
        let child = parent.child(Span::none());
        assert!(!child.is_cancelled());

        parent.cancel_token().cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn test_child_does_not_cancel_parent() {
        let parent = OpContext::detached();
        let child = parent.child(Span::none());
        child.cancel_token().cancel();
        assert!(!parent.is_cancelled());
    }
}
