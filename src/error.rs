//! 定义了库中所有可能的错误类型。
//! Defines all possible error types in the library.

use thiserror::Error;

/// The primary error type for the broker connection library.
/// 代理连接库的主要错误类型。
///
/// Every variant is `Clone` so that one failure can be delivered to every
/// caller waiting on the same connect attempt.
///
/// 所有变体都实现了 `Clone`，以便一次失败可以传递给等待同一连接尝试的所有调用者。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The connect attempt did not complete within `fail_after`.
    /// 连接尝试未在 `fail_after` 内完成。
    #[error("connection attempt timed out")]
    ConnectTimeout,

    /// The transport reported a failure.
    /// 传输层报告了失败。
    #[error("transport failure: {message}")]
    TransportFailure { message: String },

    /// The transport rejected a channel create call.
    /// 传输层拒绝了创建通道的调用。
    #[error("channel creation failed: {message}")]
    ChannelCreation { message: String },

    /// One or more queues failed to release during close.
    /// 关闭期间一个或多个队列释放失败。
    #[error("{failed} of {total} queues failed to release: {message}")]
    Drain {
        failed: usize,
        total: usize,
        message: String,
    },

    /// The transport failed to release during close.
    /// 关闭期间传输层释放失败。
    #[error("transport release failed: {message}")]
    TransportRelease { message: String },

    /// The connection is closing and no longer accepts new work.
    /// 连接正在关闭，不再接受新的工作。
    #[error("connection is closing")]
    Closing,

    /// The connection has been closed.
    /// 连接已关闭。
    #[error("connection is closed")]
    Closed,

    /// A required configuration property is not defined.
    /// 所需的配置属性未定义。
    #[error("configuration property \"{0}\" is not defined")]
    MissingConfig(String),

    /// A configuration property holds a value that cannot be used.
    /// 配置属性的值无法使用。
    #[error("configuration property \"{property}\" is invalid: {message}")]
    InvalidConfig { property: String, message: String },

    /// The connection actor has stopped and cannot answer.
    /// 连接 actor 已停止，无法响应。
    #[error("connection actor is gone")]
    ActorGone,
}

impl Error {
    /// Builds a `TransportFailure` from anything printable.
    /// 从任何可打印的值构建 `TransportFailure`。
    pub fn transport(message: impl std::fmt::Display) -> Self {
        Error::TransportFailure {
            message: message.to_string(),
        }
    }
}

/// A specialized `Result` type for this library.
/// 本库专用的 `Result` 类型。
pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        use std::io::ErrorKind;
        let kind = match &err {
            Error::ConnectTimeout => ErrorKind::TimedOut,
            Error::TransportFailure { .. } => ErrorKind::ConnectionRefused,
            Error::ChannelCreation { .. } => ErrorKind::Other,
            Error::Drain { .. } | Error::TransportRelease { .. } => ErrorKind::Other,
            Error::Closing | Error::Closed => ErrorKind::NotConnected,
            Error::MissingConfig(_) | Error::InvalidConfig { .. } => ErrorKind::InvalidInput,
            Error::ActorGone => ErrorKind::BrokenPipe,
        };
        std::io::Error::new(kind, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_cause() {
        let err = Error::transport("connection failed");
        assert!(err.to_string().contains("connection failed"));

        let err = Error::Drain {
            failed: 2,
            total: 5,
            message: "queue gone".into(),
        };
        assert_eq!(err.to_string(), "2 of 5 queues failed to release: queue gone");
    }

    #[test]
    fn test_io_error_conversion() {
        let io: std::io::Error = Error::ConnectTimeout.into();
        assert_eq!(io.kind(), std::io::ErrorKind::TimedOut);

        let io: std::io::Error = Error::Closed.into();
        assert_eq!(io.kind(), std::io::ErrorKind::NotConnected);
    }
}
