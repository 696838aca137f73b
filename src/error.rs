use std::fmt;

/// An error caused by the user (bad path, conflicting moves, missing
/// repository, ...). Printed with an `error: ` prefix and mapped to exit
/// code 2 in `main`, as opposed to I/O failures which exit with 3.
#[derive(Debug)]
pub struct UserError(pub String);

impl fmt::Display for UserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for UserError {}

/// Build an `anyhow::Error` wrapping a `UserError` from format arguments.
macro_rules! user_error {
    ($($arg:tt)*) => {
        ::anyhow::Error::new($crate::error::UserError(format!($($arg)*)))
    };
}

/// Return early with a `UserError`.
macro_rules! user_bail {
    ($($arg:tt)*) => {
        return Err($crate::error::user_error!($($arg)*))
    };
}

pub(crate) use {user_bail, user_error};
