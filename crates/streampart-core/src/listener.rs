//! Consumer-facing event protocol.
//!
//! The decoder drives a [`MultipartListener`] synchronously from `feed` and
//! `close`. A well-formed stream produces zero or more part events (nested
//! parts bracketed by started/finished) followed by exactly one
//! [`on_all_parts_finished`](MultipartListener::on_all_parts_finished). A
//! failed stream produces exactly one [`on_error`](MultipartListener::on_error)
//! and nothing after it.
//!
//! For tests and simple pipelines, `Vec<MultipartEvent<S>>` and
//! `mpsc::Sender<MultipartEvent<S>>` implement the trait by recording each
//! callback as a [`MultipartEvent`].

use std::sync::mpsc::Sender;

use crate::error::{ErrorKind, ListenerError, MultipartError};
use crate::headers::Headers;

/// Receives decoding events for parts backed by streams of type `S`.
pub trait MultipartListener<S> {
    /// A file part is complete; its streams are now readable.
    fn on_part_ready(&mut self, streams: S, headers: Headers) -> Result<(), ListenerError>;

    /// A form field is complete and decoded to text.
    fn on_form_field_part_ready(
        &mut self,
        field_name: String,
        value: String,
        headers: Headers,
    ) -> Result<(), ListenerError>;

    /// A part whose body is itself multipart has begun.
    fn on_nested_part_started(&mut self, _headers: Headers) -> Result<(), ListenerError> {
        Ok(())
    }

    /// The innermost nested multipart body has ended.
    fn on_nested_part_finished(&mut self) -> Result<(), ListenerError> {
        Ok(())
    }

    /// The terminal boundary of the request body was reached.
    fn on_all_parts_finished(&mut self) -> Result<(), ListenerError>;

    /// Decoding failed; the session accepts no further input.
    fn on_error(&mut self, message: &str, cause: &MultipartError) -> Result<(), ListenerError>;
}

/// A listener callback captured as a value.
#[derive(Debug)]
pub enum MultipartEvent<S> {
    /// See [`MultipartListener::on_part_ready`].
    PartReady {
        streams: S,
        headers: Headers,
    },
    /// See [`MultipartListener::on_form_field_part_ready`].
    FormFieldPartReady {
        field_name: String,
        value: String,
        headers: Headers,
    },
    /// A nested multipart body began.
    NestedPartStarted {
        headers: Headers,
    },
    /// The innermost nested body ended.
    NestedPartFinished,
    /// The request body is complete.
    AllPartsFinished,
    /// Decoding failed. Carries the rendered message and the error's kind.
    Error {
        message: String,
        kind: ErrorKind,
    },
}

impl<S> MultipartEvent<S> {
    /// Short event name, handy in assertions and logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::PartReady { .. } => "part_ready",
            Self::FormFieldPartReady { .. } => "form_field_part_ready",
            Self::NestedPartStarted { .. } => "nested_part_started",
            Self::NestedPartFinished => "nested_part_finished",
            Self::AllPartsFinished => "all_parts_finished",
            Self::Error { .. } => "error",
        }
    }

    /// Returns true for [`MultipartEvent::Error`].
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

/// Anything that can accept recorded events.
trait EventSink<S> {
    fn push_event(&mut self, event: MultipartEvent<S>) -> Result<(), ListenerError>;
}

impl<S> EventSink<S> for Vec<MultipartEvent<S>> {
    fn push_event(&mut self, event: MultipartEvent<S>) -> Result<(), ListenerError> {
        self.push(event);
        Ok(())
    }
}

impl<S: Send + 'static> EventSink<S> for Sender<MultipartEvent<S>> {
    fn push_event(&mut self, event: MultipartEvent<S>) -> Result<(), ListenerError> {
        self.send(event)
            .map_err(|_| ListenerError::from("multipart event receiver disconnected"))
    }
}

macro_rules! impl_recording_listener {
    ($ty:ty, $($bound:tt)*) => {
        impl<S: $($bound)*> MultipartListener<S> for $ty {
            fn on_part_ready(&mut self, streams: S, headers: Headers) -> Result<(), ListenerError> {
                self.push_event(MultipartEvent::PartReady { streams, headers })
            }

            fn on_form_field_part_ready(
                &mut self,
                field_name: String,
                value: String,
                headers: Headers,
            ) -> Result<(), ListenerError> {
                self.push_event(MultipartEvent::FormFieldPartReady {
                    field_name,
                    value,
                    headers,
                })
            }

            fn on_nested_part_started(&mut self, headers: Headers) -> Result<(), ListenerError> {
                self.push_event(MultipartEvent::NestedPartStarted { headers })
            }

            fn on_nested_part_finished(&mut self) -> Result<(), ListenerError> {
                self.push_event(MultipartEvent::NestedPartFinished)
            }

            fn on_all_parts_finished(&mut self) -> Result<(), ListenerError> {
                self.push_event(MultipartEvent::AllPartsFinished)
            }

            fn on_error(
                &mut self,
                message: &str,
                cause: &MultipartError,
            ) -> Result<(), ListenerError> {
                self.push_event(MultipartEvent::Error {
                    message: message.to_string(),
                    kind: cause.kind(),
                })
            }
        }
    };
}

impl_recording_listener!(Vec<MultipartEvent<S>>, Sized);
impl_recording_listener!(Sender<MultipartEvent<S>>, Send + 'static);
