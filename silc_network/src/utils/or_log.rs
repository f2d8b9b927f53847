use std::fmt::{Debug,Display};

/// Log, rather than propagate, the error from a fallible operation whose
/// failure the caller can't do anything about
pub trait OrLog
{
    fn or_log(&self, context: impl Display);
}

impl<T, E: Debug> OrLog for Result<T,E>
{
    fn or_log(&self, context: impl Display)
    {
        if let Err(e) = &self
        {
            tracing::error!("Error: {:?} ({})", e, context);
        }
    }
}
