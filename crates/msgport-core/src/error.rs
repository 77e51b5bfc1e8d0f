use std::fmt;
use std::io;

/// Subsystem an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Failures shared by every transport.
    Generic,
    /// TCP framing protocol failures.
    Tcp,
    /// IPC queue and liveness failures.
    Ipc,
    /// Pass-through operating system / transport errors.
    System,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Category::Generic => "message port",
            Category::Tcp => "message port tcp",
            Category::Ipc => "message port ipc",
            Category::System => "system",
        })
    }
}

/// Codes shared by every transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
#[repr(i32)]
pub enum GenericErrorCode {
    #[error("operation aborted")]
    OperationAborted = 1,
    #[error("port is not connected")]
    Disconnected,
    #[error("message exceeds the maximum size")]
    MessageTooLarge,
    #[error("connection closed by peer")]
    ConnectionClosed,
    #[error("a previous operation has not yet completed")]
    InProgress,
}

/// TCP framing protocol codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
#[repr(i32)]
pub enum TcpErrorCode {
    #[error("received message is not using the correct protocol or synchronization with the sender was lost")]
    ProtocolError = 1,
    #[error("received message uses a different protocol version than expected")]
    WrongProtocolVersion,
    #[error("socket initialization failed")]
    SocketInitializationFailed,
}

/// IPC queue and liveness codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
#[repr(i32)]
pub enum IpcErrorCode {
    #[error("communication failure")]
    CommunicationFailure = 1,
    #[error("message queue full")]
    MessageQueueFull,
    #[error("bad usage")]
    BadUsage,
    #[error("disconnected")]
    Disconnected,
    #[error("time out expired")]
    TimeOutExpired,
    #[error("message queue send call failed")]
    MessageQueueSendFailed,
    #[error("lost connection with peer")]
    LostConnection,
}

/// A code from one of the subsystem code spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Generic(GenericErrorCode),
    Tcp(TcpErrorCode),
    Ipc(IpcErrorCode),
    System {
        kind: io::ErrorKind,
        os_code: Option<i32>,
    },
}

impl ErrorCode {
    pub fn category(&self) -> Category {
        match self {
            ErrorCode::Generic(_) => Category::Generic,
            ErrorCode::Tcp(_) => Category::Tcp,
            ErrorCode::Ipc(_) => Category::Ipc,
            ErrorCode::System { .. } => Category::System,
        }
    }

    /// Numeric value within the category. System errors report the raw OS
    /// code, or `-1` when the error did not come from the OS.
    pub fn value(&self) -> i32 {
        match *self {
            ErrorCode::Generic(code) => code as i32,
            ErrorCode::Tcp(code) => code as i32,
            ErrorCode::Ipc(code) => code as i32,
            ErrorCode::System { os_code, .. } => os_code.unwrap_or(-1),
        }
    }

    fn describe(&self) -> String {
        match self {
            ErrorCode::Generic(code) => code.to_string(),
            ErrorCode::Tcp(code) => code.to_string(),
            ErrorCode::Ipc(code) => code.to_string(),
            ErrorCode::System { kind, .. } => kind.to_string(),
        }
    }
}

impl From<GenericErrorCode> for ErrorCode {
    fn from(code: GenericErrorCode) -> Self {
        ErrorCode::Generic(code)
    }
}

impl From<TcpErrorCode> for ErrorCode {
    fn from(code: TcpErrorCode) -> Self {
        ErrorCode::Tcp(code)
    }
}

impl From<IpcErrorCode> for ErrorCode {
    fn from(code: IpcErrorCode) -> Self {
        ErrorCode::Ipc(code)
    }
}

impl From<io::ErrorKind> for ErrorCode {
    fn from(kind: io::ErrorKind) -> Self {
        ErrorCode::System {
            kind,
            os_code: None,
        }
    }
}

/// Opaque message port error carrying `{category, code, message}`.
///
/// Cloneable so one failure can be delivered to every queued operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} ({} error {})", .code.category(), .code.value())]
pub struct Error {
    code: ErrorCode,
    message: String,
}

impl Error {
    pub fn new(code: impl Into<ErrorCode>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Wrap a transport error, prefixing `context` to its message.
    pub fn io(context: &str, err: io::Error) -> Self {
        Self {
            code: ErrorCode::System {
                kind: err.kind(),
                os_code: err.raw_os_error(),
            },
            message: format!("{context}: {err}"),
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn category(&self) -> Category {
        self.code.category()
    }

    pub fn value(&self) -> i32 {
        self.code.value()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether this error carries `code`.
    pub fn is(&self, code: impl Into<ErrorCode>) -> bool {
        self.code == code.into()
    }

    /// The `io::ErrorKind` of a pass-through system error.
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self.code {
            ErrorCode::System { kind, .. } => Some(kind),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        let message = err.to_string();
        Self {
            code: ErrorCode::System {
                kind: err.kind(),
                os_code: err.raw_os_error(),
            },
            message,
        }
    }
}

impl From<ErrorCode> for Error {
    fn from(code: ErrorCode) -> Self {
        Self {
            message: code.describe(),
            code,
        }
    }
}

impl From<GenericErrorCode> for Error {
    fn from(code: GenericErrorCode) -> Self {
        ErrorCode::from(code).into()
    }
}

impl From<TcpErrorCode> for Error {
    fn from(code: TcpErrorCode) -> Self {
        ErrorCode::from(code).into()
    }
}

impl From<IpcErrorCode> for Error {
    fn from(code: IpcErrorCode) -> Self {
        ErrorCode::from(code).into()
    }
}

pub type Result<T> = std::result::Result<T, Error>;
