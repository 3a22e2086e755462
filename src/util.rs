use std::fmt::Display;
use std::io;

#[allow(unused_imports)]
use log::{debug, error};

pub trait ResultExt {
    // Log an error if it occurs, prefixed with s, otherwise return nothing.
    fn or_log_error(&self, s: &str);
}

impl<T, E> ResultExt for Result<T, E>
where
    E: Display,
{
    fn or_log_error(&self, s: &str) {
        if let Err(e) = self {
            error!("{} - {}", s, e);
        }
    }
}

pub trait IoResultExt {
    fn ignore(self, kind: io::ErrorKind) -> Self;
}

impl IoResultExt for io::Result<()> {
    fn ignore(self, kind: io::ErrorKind) -> io::Result<()> {
        match self {
            Err(e) if e.kind() == kind => Ok(()),
            other => other,
        }
    }
}
