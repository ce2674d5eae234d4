//! Pipeline lifecycle events.
//!
//! The engine emits [`PipelineEvent`]s through an [`EventDispatcher`], which
//! hands them to a [`PipelineEventHandler`] in order on a background task.

mod dispatcher;
mod handler;

pub use dispatcher::{EventDispatcher, EventSender};
pub use handler::{
    CollectingEventHandler, LoggingEventHandler, NoOpEventHandler, PipelineEvent,
    PipelineEventHandler,
};
