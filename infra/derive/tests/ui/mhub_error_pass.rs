use mhub_derive::mhub_error;
use std::borrow::Cow;

#[mhub_error]
pub enum SinkError {
    #[error("Sink closed{}: {message}", format_context(.context))]
    Closed { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    #[error("Sink full: {pending} pending")]
    Full { pending: usize },
}

fn main() {
    let err: Result<(), SinkError> = Err(SinkError::Full { pending: 3 });
    let _ = err.context("draining");
}
