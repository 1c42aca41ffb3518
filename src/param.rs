// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 协议参数与常量模块
//!
//! - 服务器产生的 HTTP 状态码及其原因短语。
//! - 文件扩展名到 MIME 类型的映射表（即“内容类型猜测”这一外部协作者）。
//! - 日期格式、换行符等线路格式常量。

use std::{collections::HashMap, fmt, path::Path};

use lazy_static::lazy_static;

/// 服务器名称标识，用于 `Server` 响应头
pub const SERVER_NAME: &str = "simplehttp";

/// 响应使用的协议版本
pub const HTTP_VERSION: &str = "HTTP/1.1";

/// HTTP 协议规定的换行符
pub const CRLF: &str = "\r\n";

/// 请求头结束标记（空行）
pub const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// `Date`、`Last-Modified` 使用的 RFC 1123 日期格式
pub const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// `If-Modified-Since` 接受的日期格式
pub const IF_MODIFIED_SINCE_FORMAT: &str = "%A, %d %b %Y %H:%M:%S GMT";

/// 无法识别扩展名时使用的内容类型
pub const DEFAULT_MIME: &str = "application/octet-stream";

/// 服务器会产生的状态码。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpStatus {
    Ok,
    NotModified,
    NotFound,
    InternalServerError,
}

impl HttpStatus {
    pub fn code(&self) -> u16 {
        match self {
            HttpStatus::Ok => 200,
            HttpStatus::NotModified => 304,
            HttpStatus::NotFound => 404,
            HttpStatus::InternalServerError => 500,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            HttpStatus::Ok => "OK",
            HttpStatus::NotModified => "Not Modified",
            HttpStatus::NotFound => "Not Found",
            HttpStatus::InternalServerError => "Internal Server Error",
        }
    }
}

impl fmt::Display for HttpStatus {
    /// 状态行中跟在版本号之后的部分，例如 `404 Not Found`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code(), self.reason())
    }
}

lazy_static! {
    /// 文件后缀名到 MIME 类型的映射表。
    ///
    /// 为了让浏览器直接打开，`js`、`csv`、`vbs` 被有意映射为 `text/plain`。
    pub static ref MIME_TYPES: HashMap<&'static str, &'static str> = {
        let mut map = HashMap::new();
        map.insert("aac", "audio/aac");
        map.insert("avi", "video/x-msvideo");
        map.insert("avif", "image/avif");
        map.insert("bin", "application/octet-stream");
        map.insert("bmp", "image/bmp");
        map.insert("bz2", "application/x-bzip2");
        map.insert("css", "text/css");
        map.insert("csv", "text/plain");
        map.insert("deb", "application/x-deb");
        map.insert("djvu", "application/djvu");
        map.insert("doc", "application/msword");
        map.insert(
            "docx",
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        );
        map.insert("epub", "application/epub+zip");
        map.insert("exe", "application/x-msdownload");
        map.insert("gif", "image/gif");
        map.insert("gz", "application/gzip");
        map.insert("htm", "text/html");
        map.insert("html", "text/html");
        map.insert("ico", "image/x-icon");
        map.insert("iso", "application/x-iso9660-image");
        map.insert("jar", "application/java-archive");
        map.insert("jpeg", "image/jpeg");
        map.insert("jpg", "image/jpeg");
        map.insert("js", "text/plain");
        map.insert("json", "application/json");
        map.insert("md", "text/markdown");
        map.insert("mkv", "video/x-matroska");
        map.insert("mp3", "audio/mpeg");
        map.insert("mp4", "video/mp4");
        map.insert("mpeg", "video/mpeg");
        map.insert("odt", "application/vnd.oasis.opendocument.text");
        map.insert("ogg", "audio/ogg");
        map.insert("ogv", "video/ogg");
        map.insert("otf", "font/otf");
        map.insert("pdf", "application/pdf");
        map.insert("png", "image/png");
        map.insert("py", "text/x-python");
        map.insert("rar", "application/x-rar-compressed");
        map.insert("rs", "text/x-rust");
        map.insert("rtf", "application/rtf");
        map.insert("sh", "application/x-sh");
        map.insert("svg", "image/svg+xml");
        map.insert("tar", "application/x-tar");
        map.insert("tif", "image/tiff");
        map.insert("tiff", "image/tiff");
        map.insert("ttf", "font/ttf");
        map.insert("txt", "text/plain");
        map.insert("vbs", "text/plain");
        map.insert("wav", "audio/wav");
        map.insert("webm", "video/webm");
        map.insert("webp", "image/webp");
        map.insert("woff", "font/woff");
        map.insert("woff2", "font/woff2");
        map.insert("xls", "application/vnd.ms-excel");
        map.insert(
            "xlsx",
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        );
        map.insert("xml", "text/xml");
        map.insert("zip", "application/zip");
        map.insert("7z", "application/x-7z-compressed");
        map
    };
}

/// 根据扩展名猜测内容类型，扩展名大小写不敏感；没有扩展名或无法识别时返回 `DEFAULT_MIME`。
pub fn get_mime(path: &Path) -> &'static str {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(|e| MIME_TYPES.get(e.to_ascii_lowercase().as_str()).copied())
        .unwrap_or(DEFAULT_MIME)
}
