// Before-Operation Event Pipeline
//
// Handlers run in registration order against a staged record
// operation. Each may rewrite the operation's data or uid, or abort it.
// Nothing is committed until every handler has passed.

use tracing::{debug, warn};

use crate::operation::{OperationError, RecordOperation};

/// Event emitted before a record operation is committed.
#[derive(Debug)]
pub struct BeforeRecordOperationEvent<'a> {
    operation: &'a mut RecordOperation,
}

impl<'a> BeforeRecordOperationEvent<'a> {
    pub fn new(operation: &'a mut RecordOperation) -> Self {
        Self { operation }
    }

    pub fn operation(&self) -> &RecordOperation {
        &*self.operation
    }

    pub fn operation_mut(&mut self) -> &mut RecordOperation {
        &mut *self.operation
    }
}

/// Trait implemented by all before-operation handlers.
///
/// Handlers may only stage changes on the operation. Side effects on
/// other systems (the filesystem, remote metadata) are not rolled back
/// if a later handler aborts, so they must be safe to repeat.
pub trait BeforeRecordOperationEventHandler: Send + Sync {
    fn name(&self) -> &'static str;

    fn handle(&self, event: &mut BeforeRecordOperationEvent<'_>) -> Result<(), OperationError>;
}

/// Ordered chain of handlers.
#[derive(Default)]
pub struct EventPipeline {
    handlers: Vec<Box<dyn BeforeRecordOperationEventHandler>>,
}

impl EventPipeline {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Register a handler. Handlers run in registration order.
    pub fn register<H: BeforeRecordOperationEventHandler + 'static>(&mut self, handler: H) {
        self.handlers.push(Box::new(handler));
    }

    /// Run every handler against the operation.
    ///
    /// Stops at the first failure. The operation is consumed in that
    /// case, discarding whatever earlier handlers staged on it.
    pub fn dispatch(&self, mut operation: RecordOperation) -> Result<RecordOperation, HandlerFailure> {
        for handler in &self.handlers {
            let mut event = BeforeRecordOperationEvent::new(&mut operation);

            if let Err(source) = handler.handle(&mut event) {
                warn!(
                    handler = handler.name(),
                    table = operation.table(),
                    remote_id = operation.remote_id(),
                    error = %source,
                    "operation aborted"
                );
                return Err(HandlerFailure {
                    handler: handler.name(),
                    source,
                });
            }

            debug!(handler = handler.name(), remote_id = operation.remote_id(), "handler passed");
        }

        Ok(operation)
    }
}

/// Returned when a handler aborts an operation.
#[derive(Debug, thiserror::Error)]
#[error("handler `{handler}` aborted the operation: {source}")]
pub struct HandlerFailure {
    pub handler: &'static str,
    pub source: OperationError,
}
