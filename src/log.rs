use std::error::Error;
use std::fmt::{Arguments, Display};
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;

/// Trait used when visiting all the log-record's key-value pairs
///
/// Notes:
///
/// - All signed integer types are passed to `kv_i64`, and all
/// unsigned integer types to `kv_u64`.
///
/// - `kv_null` represents a key with presence but no value, for
/// example the `cancelled` key on the `Close` record of a cancelled
/// task.
///
/// - Anything that needs formatting, e.g. `Display` or `Debug`
/// types, is passed through to `kv_fmt` using `format_args!`, so
/// that the logger can format it directly into its output.
///
/// The visitor interface doesn't support terminating early with an
/// error.  If the visitor hits an error, it needs to store it itself
/// and ignore any further calls.
pub trait LogVisitor {
    fn kv_u64(&mut self, key: Option<&str>, val: u64);
    fn kv_i64(&mut self, key: Option<&str>, val: i64);
    fn kv_bool(&mut self, key: Option<&str>, val: bool);
    fn kv_null(&mut self, key: Option<&str>);
    fn kv_str(&mut self, key: Option<&str>, val: &str);
    fn kv_fmt(&mut self, key: Option<&str>, val: &Arguments<'_>);
}

/// Log record that is passed to a logger
pub struct LogRecord<'a> {
    /// Logging span identifier, or 0 for outside of a span
    pub id: LogID,
    /// Logging level
    pub level: LogLevel,
    /// Logging target, or ""
    pub target: &'a str,
    /// Freeform formatted text
    pub fmt: Arguments<'a>,
    /// Key-value pairs.  Call this function with your own
    /// [`LogVisitor`] and all the key-value pairs will be passed to
    /// that visitor in sequence.
    ///
    /// [`LogVisitor`]: trait.LogVisitor.html
    pub kvscan: &'a dyn Fn(&mut dyn LogVisitor),
}

/// Logging span identifier
///
/// A span is marked by a [`LogLevel::Open`] record, any number of
/// normal records, and then a [`LogLevel::Close`] record, all with
/// the same [`LogID`].  The scheduler opens one span per task.
///
/// IDs are allocated sequentially from one, with zero reserved for
/// "none".
///
/// [`LogID`]: type.LogID.html
/// [`LogLevel::Close`]: enum.LogLevel.html#variant.Close
/// [`LogLevel::Open`]: enum.LogLevel.html#variant.Open
pub type LogID = u64;

/// Levels for logging
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u32)]
#[non_exhaustive]
pub enum LogLevel {
    /// Tracing (very low priority or verbose logging)
    Trace = 0,

    /// Debugging (low priority logging)
    Debug = 1,

    /// Informational logging
    Info = 2,

    /// Warnings
    Warn = 3,

    /// Errors
    Error = 4,

    /// Span open.  For a task, this means it was spawned.  The text
    /// is the span tag.
    Open = 5,

    /// Span close.  For a task, this means it completed or was
    /// cancelled, in which case a `cancelled` presence key is added.
    Close = 6,

    /// Used to disable logging of severity-based levels.  Anything
    /// logged at this level is ignored.
    Off = 7,
}

impl LogLevel {
    /// Return the name of the [`LogLevel`] as a static string.
    ///
    /// [`LogLevel`]: enum.LogLevel.html
    pub fn name(self) -> &'static str {
        match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Open => "OPEN",
            Self::Close => "CLOSE",
            Self::Off => "OFF",
        }
    }

    /// Return a slice containing all defined logging levels
    pub fn all_levels() -> &'static [LogLevel] {
        &[
            Self::Trace,
            Self::Debug,
            Self::Info,
            Self::Warn,
            Self::Error,
            Self::Open,
            Self::Close,
            Self::Off,
        ]
    }
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.name().fmt(f)
    }
}

impl FromStr for LogLevel {
    type Err = LogLevelError;

    /// Case-insensitive match to the level names as returned by
    /// [`LogLevel::name`]
    ///
    /// [`LogLevel::name`]: enum.LogLevel.html#method.name
    fn from_str(s: &str) -> Result<LogLevel, LogLevelError> {
        let s = s.trim();
        LogLevel::all_levels()
            .iter()
            .copied()
            .find(|level| s.eq_ignore_ascii_case(level.name()))
            .ok_or(LogLevelError)
    }
}

/// Invalid [`LogLevel`] passed to [`LogLevel::from_str`]
///
/// [`LogLevel::from_str`]: enum.LogLevel.html#method.from_str
/// [`LogLevel`]: enum.LogLevel.html
#[derive(Debug, Eq, PartialEq)]
pub struct LogLevelError;
impl Error for LogLevelError {}
impl Display for LogLevelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        "invalid logging level".fmt(f)
    }
}

/// Filter for logging levels
///
/// A "copy" value which represents a set of enabled logging levels.
/// Filters can be combined using `|` and `|=`.  Converting from a
/// [`LogLevel`] with [`LogFilter::from`] also enables related levels.
///
/// [`LogFilter::from`]: struct.LogFilter.html#method.from
/// [`LogLevel`]: enum.LogLevel.html
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct LogFilter(u32);

impl LogFilter {
    /// Return a [`LogFilter`] with no levels enabled
    ///
    /// [`LogFilter`]: struct.LogFilter.html
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a [`LogFilter`] with all the listed levels enabled, as
    /// converted by [`LogFilter::from`].
    ///
    /// [`LogFilter::from`]: struct.LogFilter.html#method.from
    /// [`LogFilter`]: struct.LogFilter.html
    #[inline]
    pub fn all(levels: &[LogLevel]) -> Self {
        let mut rv = Self::new();
        for level in levels {
            rv |= Self::from(*level);
        }
        rv
    }

    /// Test whether the given [`LogLevel`] is enabled
    ///
    /// [`LogLevel`]: enum.LogLevel.html
    #[inline]
    pub fn allows(&self, level: LogLevel) -> bool {
        0 != (self.0 & (1 << (level as u32)))
    }

    /// Test whether the set of enabled levels is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl From<LogLevel> for LogFilter {
    /// Convert a [`LogLevel`] into a [`LogFilter`].  Where a severity
    /// level ([`LogLevel::Trace`] to [`LogLevel::Error`]) is passed,
    /// all higher severity levels are also enabled.  Where
    /// [`LogLevel::Open`] or [`LogLevel::Close`] is passed, the other
    /// is also enabled.  [`LogLevel::Off`] gives no levels enabled.
    ///
    /// [`LogFilter`]: struct.LogFilter.html
    /// [`LogLevel::Close`]: enum.LogLevel.html#variant.Close
    /// [`LogLevel::Error`]: enum.LogLevel.html#variant.Error
    /// [`LogLevel::Off`]: enum.LogLevel.html#variant.Off
    /// [`LogLevel::Open`]: enum.LogLevel.html#variant.Open
    /// [`LogLevel::Trace`]: enum.LogLevel.html#variant.Trace
    /// [`LogLevel`]: enum.LogLevel.html
    #[inline]
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace
            | LogLevel::Debug
            | LogLevel::Info
            | LogLevel::Warn
            | LogLevel::Error
            | LogLevel::Off => Self(0x1F & (0x1F << level as u32)),
            LogLevel::Open | LogLevel::Close => {
                Self((1 << LogLevel::Open as u32) | (1 << LogLevel::Close as u32))
            }
        }
    }
}

impl BitOr for LogFilter {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for LogFilter {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl Display for LogFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        "LogFilter(".fmt(f)?;
        let mut first = true;
        for level in LogLevel::all_levels() {
            if self.allows(*level) {
                if first {
                    first = false;
                } else {
                    ",".fmt(f)?;
                }
                level.name().fmt(f)?;
            }
        }
        ")".fmt(f)
    }
}

impl FromStr for LogFilter {
    type Err = LogLevelError;

    fn from_str(s: &str) -> Result<LogFilter, LogLevelError> {
        let mut rv = LogFilter::new();
        for level in s.split(',') {
            rv |= LogFilter::from(LogLevel::from_str(level)?);
        }
        Ok(rv)
    }
}
