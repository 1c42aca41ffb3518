// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Exception 模块
//!
//! 该模块定义了服务器在一次连接的生命周期中可能出现的各类异常。
//!
//! ## 处理约定
//! - **解析错误**（`MalformedRequestLine`、`MalformedHeaderLine`、`RequestIsNotUtf8`）：转换为 500 错误页。
//! - **资源错误**（`ResourceNotFound`、`PathEscapesRoot`）：一律转换为 404 错误页，越界路径永远不会被读取。
//! - **内部错误**（`InternalDispatchFailure`、`Io`）：转换为 500 错误页，错误详情写入页面正文。
//! - **静默错误**（`ConnectionClosedEarly`、`RequestTooLarge`、`RequestTimeout`）：不发送任何响应，直接关闭连接。

use std::{fmt, io};

/// 服务器处理请求过程中发生的异常类型。
#[derive(Debug)]
pub enum Exception {
    /// 请求头无法按 UTF-8 解码。
    RequestIsNotUtf8,
    /// 请求行不是 `method SP target SP version` 的形式。
    MalformedRequestLine(String),
    /// 某个标头行中没有冒号。
    MalformedHeaderLine(String),
    /// 请求的资源在根目录下不存在。对应 `404 Not Found`。
    ResourceNotFound(String),
    /// 规范化后的路径落在根目录之外。与 `ResourceNotFound` 一样按 404 处理。
    PathEscapesRoot(String),
    /// 连接在交给工作线程的过程中或在处理过程中出现了内部故障。对应 `500`。
    InternalDispatchFailure(String),
    /// 对端在发送完整的请求头之前关闭了连接。
    ConnectionClosedEarly,
    /// 请求头超过了允许的最大字节数。
    RequestTooLarge(usize),
    /// 在允许的时间内没有收到完整的请求头，或没能写完应答。
    RequestTimeout,
    /// 底层 I/O 错误。
    Io(io::Error),
    /// 配置文件无法解析。
    Config(String),
}

use Exception::*;

impl Exception {
    /// 该异常是否应当以“直接关闭连接、不发送响应”的方式处理。
    pub fn is_silent(&self) -> bool {
        matches!(self, ConnectionClosedEarly | RequestTooLarge(_) | RequestTimeout)
    }

    /// 该异常是否映射为 404 页面。
    pub fn is_not_found(&self) -> bool {
        matches!(self, ResourceNotFound(_) | PathEscapesRoot(_))
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestIsNotUtf8 => write!(f, "Request bytes can't be parsed in UTF-8"),
            MalformedRequestLine(line) => write!(f, "Malformed request line: {:?}", line),
            MalformedHeaderLine(line) => write!(f, "Malformed header line: {:?}", line),
            ResourceNotFound(path) => write!(f, "Resource not found: {}", path),
            PathEscapesRoot(path) => write!(f, "Path escapes the server root: {}", path),
            InternalDispatchFailure(detail) => write!(f, "Internal dispatch failure: {}", detail),
            ConnectionClosedEarly => write!(f, "Connection closed before the request head was complete"),
            RequestTooLarge(limit) => write!(f, "Request head exceeds {} bytes", limit),
            RequestTimeout => write!(f, "Connection timed out"),
            Io(e) => write!(f, "I/O error: {}", e),
            Config(detail) => write!(f, "Invalid configuration: {}", detail),
        }
    }
}

impl std::error::Error for Exception {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Exception {
    fn from(e: io::Error) -> Self {
        Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silent_kinds() {
        assert!(ConnectionClosedEarly.is_silent());
        assert!(RequestTooLarge(10).is_silent());
        assert!(RequestTimeout.is_silent());
        assert!(!ResourceNotFound("/a".into()).is_silent());
        assert!(!InternalDispatchFailure("x".into()).is_silent());
    }

    #[test]
    fn test_not_found_kinds() {
        assert!(ResourceNotFound("/a".into()).is_not_found());
        assert!(PathEscapesRoot("/../etc".into()).is_not_found());
        assert!(!MalformedRequestLine("GET".into()).is_not_found());
    }

    #[test]
    fn test_display_carries_detail() {
        let e = InternalDispatchFailure("queue closed".to_string());
        assert!(e.to_string().contains("queue closed"));

        let e: Exception = io::Error::new(io::ErrorKind::PermissionDenied, "denied").into();
        assert!(e.to_string().contains("denied"));
    }
}
