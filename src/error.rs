use std::{error, fmt, result};

/// Short form to compose Error values.
///
/// Here are few possible ways:
///
/// ```ignore
/// use crate::Error;
/// err_at!(ReadOnly, msg: "insert on a built index")
/// ```
///
/// ```ignore
/// err_at!(IOError, fd.read(&mut buf))
/// ```
///
/// ```ignore
/// err_at!(IOError, fd.read(&mut buf), "reading block {}", block)
/// ```
#[macro_export]
macro_rules! err_at {
    ($v:ident, msg: $($arg:expr),+) => {{
        let prefix = format!("{}:{}", file!(), line!());
        Err(Error::$v(prefix, format!($($arg),+)))
    }};
    ($v:ident, $e:expr) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let prefix = format!("{}:{}", file!(), line!());
                Err(Error::$v(prefix, format!("{}", err)))
            }
        }
    }};
    ($v:ident, $e:expr, $($arg:expr),+) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let prefix = format!("{}:{}", file!(), line!());
                let msg = format!($($arg),+);
                Err(Error::$v(prefix, format!("{} {}", err, msg)))
            }
        }
    }};
}

/// Error variants that can be returned by this package's API.
///
/// Each variant carries a prefix, typically the `file:line` where the
/// error was detected, and a human readable message.
#[derive(Clone)]
pub enum Error {
    /// A key attribute was null during build, or a scan searched for null.
    NullKey(String, String),
    /// A key or INCLUDE attribute is not fixed-width, nor the permitted
    /// short-text budget.
    UnsupportedType(String, String),
    /// Caller attempted to mutate a built index.
    ReadOnly(String, String),
    /// An on-disk page violated a format invariant.
    CorruptPage(String, String),
    /// A single row would not fit on an empty leaf.
    RowTooLarge(String, String),
    /// Caller requested a scan mode that does not return index tuples.
    NonIndexOnly(String, String),
    /// Contract violating state, indicates a bug in the host integration.
    Internal(String, String),
    /// Unexpected state inside the engine itself.
    Fatal(String, String),
    /// Host raised its interrupt flag while a scan was in flight.
    Interrupted(String, String),
    InvalidFile(String, String),
    InvalidInput(String, String),
    IOError(String, String),
    FailCbor(String, String),
    FailConvert(String, String),
    IPCFail(String, String),
    ThreadFail(String, String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        use Error::*;

        match self {
            NullKey(p, m) => write!(f, "NullKey:{} {}", p, m),
            UnsupportedType(p, m) => write!(f, "UnsupportedType:{} {}", p, m),
            ReadOnly(p, m) => write!(f, "ReadOnly:{} {}", p, m),
            CorruptPage(p, m) => write!(f, "CorruptPage:{} {}", p, m),
            RowTooLarge(p, m) => write!(f, "RowTooLarge:{} {}", p, m),
            NonIndexOnly(p, m) => write!(f, "NonIndexOnly:{} {}", p, m),
            Internal(p, m) => write!(f, "Internal:{} {}", p, m),
            Fatal(p, m) => write!(f, "Fatal:{} {}", p, m),
            Interrupted(p, m) => write!(f, "Interrupted:{} {}", p, m),
            InvalidFile(p, m) => write!(f, "InvalidFile:{} {}", p, m),
            InvalidInput(p, m) => write!(f, "InvalidInput:{} {}", p, m),
            IOError(p, m) => write!(f, "IOError:{} {}", p, m),
            FailCbor(p, m) => write!(f, "FailCbor:{} {}", p, m),
            FailConvert(p, m) => write!(f, "FailConvert:{} {}", p, m),
            IPCFail(p, m) => write!(f, "IPCFail:{} {}", p, m),
            ThreadFail(p, m) => write!(f, "ThreadFail:{} {}", p, m),
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(f, "{}", self)
    }
}

impl error::Error for Error {}

/// Type alias for `Result` returns from this package's API.
pub type Result<T> = result::Result<T, Error>;
