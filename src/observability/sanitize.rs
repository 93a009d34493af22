//! Argument and result sanitization for log output.
//!
//! Fixed policy, not configurable per field:
//! - byte streams and raw payloads render as a placeholder
//! - strings longer than [`MAX_TEXT_CHARS`] are truncated with a marker
//! - numbers and booleans render verbatim
//! - everything else renders as its type name only

use std::fmt;

/// Maximum characters kept from a string value.
pub const MAX_TEXT_CHARS: usize = 100;

/// Appended to truncated strings.
pub const TRUNCATION_MARKER: &str = "...";

/// Rendering of any byte-stream value.
pub const STREAM_PLACEHOLDER: &str = "[ByteStream]";

/// A value reduced to something safe to put in a log line.
#[derive(Debug, Clone, PartialEq)]
pub enum LogValue {
    Stream,
    Text(String),
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
    Opaque(&'static str),
    Null,
}

impl LogValue {
    /// Text value, truncated on a char boundary.
    pub fn text(s: &str) -> Self {
        match s.char_indices().nth(MAX_TEXT_CHARS) {
            Some((cut, _)) => {
                let mut truncated = String::with_capacity(cut + TRUNCATION_MARKER.len());
                truncated.push_str(&s[..cut]);
                truncated.push_str(TRUNCATION_MARKER);
                LogValue::Text(truncated)
            }
            None => LogValue::Text(s.to_string()),
        }
    }

    /// Type-name-only rendering for `T`.
    pub fn opaque<T: ?Sized>() -> Self {
        LogValue::Opaque(short_type_name::<T>())
    }
}

impl fmt::Display for LogValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogValue::Stream => f.write_str(STREAM_PLACEHOLDER),
            LogValue::Text(s) => f.write_str(s),
            LogValue::Int(v) => write!(f, "{}", v),
            LogValue::UInt(v) => write!(f, "{}", v),
            LogValue::Float(v) => write!(f, "{}", v),
            LogValue::Bool(v) => write!(f, "{}", v),
            LogValue::Opaque(name) => write!(f, "[{}]", name),
            LogValue::Null => f.write_str("null"),
        }
    }
}

/// Values that can appear as instrumented arguments or results.
pub trait Loggable {
    fn log_value(&self) -> LogValue;

    /// Status code reported in the success event, if the value carries one.
    fn status_code(&self) -> Option<u16> {
        None
    }
}

/// Last path segment of a type name, without generic parameters.
pub fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// One instrumented argument.
pub type Arg<'a> = &'a (dyn Loggable + Sync);

/// Render an argument list as `[a, b, c]`.
pub fn render_args(args: &[Arg<'_>]) -> String {
    let rendered: Vec<String> = args.iter().map(|a| a.log_value().to_string()).collect();
    format!("[{}]", rendered.join(", "))
}

impl Loggable for str {
    fn log_value(&self) -> LogValue {
        LogValue::text(self)
    }
}

impl Loggable for String {
    fn log_value(&self) -> LogValue {
        LogValue::text(self)
    }
}

impl Loggable for bool {
    fn log_value(&self) -> LogValue {
        LogValue::Bool(*self)
    }
}

macro_rules! loggable_signed {
    ($($t:ty),*) => {
        $(impl Loggable for $t {
            fn log_value(&self) -> LogValue {
                LogValue::Int(*self as i64)
            }
        })*
    };
}

macro_rules! loggable_unsigned {
    ($($t:ty),*) => {
        $(impl Loggable for $t {
            fn log_value(&self) -> LogValue {
                LogValue::UInt(*self as u64)
            }
        })*
    };
}

loggable_signed!(i8, i16, i32, i64, isize);
loggable_unsigned!(u8, u16, u32, u64, usize);

impl Loggable for f32 {
    fn log_value(&self) -> LogValue {
        LogValue::Float(*self as f64)
    }
}

impl Loggable for f64 {
    fn log_value(&self) -> LogValue {
        LogValue::Float(*self)
    }
}

impl Loggable for LogValue {
    fn log_value(&self) -> LogValue {
        self.clone()
    }
}

impl Loggable for () {
    fn log_value(&self) -> LogValue {
        LogValue::Null
    }
}

impl Loggable for bytes::Bytes {
    fn log_value(&self) -> LogValue {
        LogValue::Stream
    }
}

impl<T: Loggable + ?Sized> Loggable for &T {
    fn log_value(&self) -> LogValue {
        (**self).log_value()
    }

    fn status_code(&self) -> Option<u16> {
        (**self).status_code()
    }
}

impl<T: Loggable> Loggable for Option<T> {
    fn log_value(&self) -> LogValue {
        match self {
            Some(v) => v.log_value(),
            None => LogValue::Null,
        }
    }

    fn status_code(&self) -> Option<u16> {
        self.as_ref().and_then(Loggable::status_code)
    }
}

impl<T> Loggable for Vec<T> {
    fn log_value(&self) -> LogValue {
        LogValue::opaque::<Vec<T>>()
    }
}
