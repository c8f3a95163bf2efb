use std::collections::VecDeque;
use std::fmt::{Display, Formatter};

use error_stack::{AttachmentKind, FrameKind, Report};
use itertools::Itertools;
use valuable::Valuable;

/// Flattened view of an error report that can be logged as a structured field and
/// returned to API callers as a single line.
#[derive(Valuable, PartialEq, Debug, Default)]
pub struct LoggableError {
    pub msg: String,
    pub attachments: Vec<String>,
    pub cause: Option<Box<LoggableError>>,
}

impl Display for LoggableError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.msg)?;

        if !self.attachments.is_empty() {
            write!(f, " ({})", self.attachments.iter().join(", "))?;
        }

        match &self.cause {
            Some(cause) => write!(f, ": {cause}"),
            None => Ok(()),
        }
    }
}

impl<T> From<&Report<T>> for LoggableError {
    fn from(report: &Report<T>) -> Self {
        let mut errors = Vec::new();
        let mut frames = VecDeque::from_iter(report.frames());

        while !frames.is_empty() {
            let mut error = LoggableError::default();

            // attachments precede the context they belong to, most recent first
            while let Some(frame) = frames.pop_front() {
                match frame.kind() {
                    FrameKind::Context(context) => {
                        error.msg = context.to_string();
                        break;
                    }
                    FrameKind::Attachment(AttachmentKind::Printable(printable)) => {
                        error.attachments.push(printable.to_string())
                    }
                    FrameKind::Attachment(_) => {}
                }
            }

            error.attachments.reverse();
            errors.push(error);
        }

        chain_causes(errors)
    }
}

fn chain_causes(errors: Vec<LoggableError>) -> LoggableError {
    errors
        .into_iter()
        .rev()
        .reduce(|cause, mut error| {
            error.cause = Some(Box::new(cause));
            error
        })
        .unwrap_or_default()
}
