// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 请求读取与解析模块
//!
//! 1. `read_head`：从连接中累积字节，直到出现空行（`CRLFCRLF`）或对端关闭连接。
//!    读取量和等待时间都有上限，超出时连接被静默关闭。
//! 2. `Request::try_from`：把完整的请求头拆解为方法、目标、协议版本和有序的标头列表。
//!
//! 服务器从不读取请求体，空行之后的字节会被忽略。

use std::io::{ErrorKind, Read};
use std::time::{Duration, Instant};

use crate::{exception::Exception, param::*};
use log::{debug, error};

/// 一次读取调用使用的缓冲区大小
const READ_CHUNK: usize = 4096;

/// 解析完成后的 HTTP 请求，构造之后不可变。
#[derive(Debug, Clone)]
pub struct Request {
    /// 请求方法，原样保留
    method: String,
    /// 请求目标（百分号编码的路径加可选的查询串）
    target: String,
    /// 协议版本，例如 `HTTP/1.1`
    version: String,
    /// 按出现顺序保存的标头，允许重复
    headers: Vec<(String, String)>,
}

impl Request {
    /// 从包含完整请求头的缓冲区构建 `Request`。
    ///
    /// # 逻辑步骤
    /// 1. 按 UTF-8 解码。
    /// 2. 以第一个空行为界截掉请求体。
    /// 3. 第一行必须恰好由两个空格分成 `method target version` 三段。
    /// 4. 其余每行按第一个冒号拆分为名称和值，两者都去掉首尾空白。
    pub fn try_from(buffer: &[u8], id: u128) -> Result<Self, Exception> {
        let request_string = match std::str::from_utf8(buffer) {
            Ok(string) => string,
            Err(_) => {
                error!("[ID{}]无法按UTF-8解码HTTP请求", id);
                return Err(Exception::RequestIsNotUtf8);
            }
        };

        let head = match request_string.split_once("\r\n\r\n") {
            Some((head, _body)) => head,
            None => request_string,
        };
        let mut lines = head.split(CRLF);

        // 解析请求行 (e.g., "GET /index.html HTTP/1.1")
        let request_line = lines.next().unwrap_or_default();
        let parts: Vec<&str> = request_line.split(' ').collect();
        if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
            error!("[ID{}]HTTP请求行格式不正确：{}", id, request_line);
            return Err(Exception::MalformedRequestLine(request_line.to_string()));
        }

        let mut headers = Vec::new();
        for line in lines {
            match line.split_once(':') {
                Some((name, value)) => {
                    headers.push((name.trim().to_string(), value.trim().to_string()));
                }
                None => {
                    error!("[ID{}]HTTP标头格式不正确：{}", id, line);
                    return Err(Exception::MalformedHeaderLine(line.to_string()));
                }
            }
        }

        Ok(Self {
            method: parts[0].to_string(),
            target: parts[1].to_string(),
            version: parts[2].to_string(),
            headers,
        })
    }
}

// --- Getter 访问器实现 ---

impl Request {
    pub fn method(&self) -> &str {
        &self.method
    }

    /// 请求目标（含查询参数，未解码）
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// 按名称查找第一个匹配的标头，名称比较不区分 ASCII 大小写
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// `Host` 标头，缺省时返回 `None`
    pub fn host(&self) -> Option<&str> {
        self.header("Host")
    }

    pub fn if_modified_since(&self) -> Option<&str> {
        self.header("If-Modified-Since")
    }

    pub fn if_none_match(&self) -> Option<&str> {
        self.header("If-None-Match")
    }

    pub fn cache_control(&self) -> Option<&str> {
        self.header("Cache-Control")
    }
}

/// 从 `reader` 读取请求头。
///
/// 返回的缓冲区一定包含 `CRLFCRLF`。`reader` 应当是设置了读超时的套接字：
/// 每次超时醒来都会检查总截止时间，因此单个连接的最长等待时间约为
/// `request_timeout` 加上一次读超时。
///
/// # 错误
/// * `ConnectionClosedEarly` - 对端在请求头结束之前关闭连接（包括一个字节都没发送的情况）。
/// * `RequestTooLarge` - 累积字节数超过 `max_bytes` 仍未看到结束标记。
/// * `RequestTimeout` - 超过 `request_timeout` 仍未看到结束标记。
pub fn read_head<R: Read>(
    reader: &mut R,
    max_bytes: usize,
    request_timeout: Duration,
    id: u128,
) -> Result<Vec<u8>, Exception> {
    let deadline = Instant::now() + request_timeout;
    let mut data: Vec<u8> = Vec::with_capacity(READ_CHUNK);
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        match reader.read(&mut chunk) {
            Ok(0) => {
                debug!("[ID{}]对端在请求头结束前关闭了连接（已收到{}字节）", id, data.len());
                return Err(Exception::ConnectionClosedEarly);
            }
            Ok(n) => {
                // 结束标记可能跨越两次读取，从上次末尾往前 3 字节开始查找
                let search_from = data.len().saturating_sub(HEADER_TERMINATOR.len() - 1);
                data.extend_from_slice(&chunk[..n]);
                if let Some(pos) = find_terminator(&data[search_from..]) {
                    let end = search_from + pos + HEADER_TERMINATOR.len();
                    if end > max_bytes {
                        return Err(Exception::RequestTooLarge(max_bytes));
                    }
                    debug!("[ID{}]请求头接收完毕，共{}字节", id, data.len());
                    return Ok(data);
                }
                if data.len() > max_bytes {
                    return Err(Exception::RequestTooLarge(max_bytes));
                }
            }
            Err(e)
                if e.kind() == ErrorKind::WouldBlock
                    || e.kind() == ErrorKind::TimedOut
                    || e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
        if Instant::now() >= deadline {
            return Err(Exception::RequestTimeout);
        }
    }
}

fn find_terminator(data: &[u8]) -> Option<usize> {
    data.windows(HEADER_TERMINATOR.len())
        .position(|w| w == HEADER_TERMINATOR)
}
