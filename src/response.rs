use crate::{
    exception::Exception,
    param::*,
    request::Request,
    resolver::{Resource, ResourceKind},
    server::Context,
    util::{encode_filename, encode_text, HtmlBuilder},
    validator::{etag, format_http_date, mtime_utc, validate, CacheValidationOutcome},
};

use bytes::Bytes;
use chrono::prelude::*;
use log::debug;

use std::{
    fs,
    io::{self, Write},
};

/// 手工组装的 HTTP 响应。
///
/// `Content-Length` 总是在写出时由最终的正文长度计算，不能单独设置。
#[derive(Debug, Clone)]
pub struct Response {
    version: String,
    status: HttpStatus,
    date: DateTime<Utc>,
    content_type: Option<String>,
    charset: Option<String>,
    headers: Vec<(String, String)>,
    content: Bytes,
    binary: bool,
    body_headers: bool,
}

impl Response {
    pub fn new(status: HttpStatus) -> Self {
        Self {
            version: HTTP_VERSION.to_string(),
            status,
            date: Utc::now(),
            content_type: Some("text/plain".to_string()),
            charset: None,
            headers: Vec::new(),
            content: Bytes::new(),
            binary: false,
            body_headers: true,
        }
    }

    /// 文本正文，按 `charset` 编码
    pub fn with_text(mut self, text: &str, content_type: &str, charset: &str) -> Self {
        self.content = encode_text(text, charset);
        self.content_type = Some(content_type.to_string());
        self.charset = Some(charset.to_string());
        self.binary = false;
        self
    }

    /// 原始字节正文
    pub fn with_binary(mut self, data: Bytes, content_type: &str, charset: Option<String>) -> Self {
        self.content = data;
        self.content_type = Some(content_type.to_string());
        self.charset = charset;
        self.binary = true;
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// 去掉正文及 `Content-Type`/`Content-Length`
    pub fn without_body(mut self) -> Self {
        self.content = Bytes::new();
        self.content_type = None;
        self.charset = None;
        self.body_headers = false;
        self
    }

    pub fn from_error(status: HttpStatus, message: &str, detail: &str, charset: &str) -> Self {
        let html = HtmlBuilder::from_error(status, message, detail, charset).build();
        Self::new(status).with_text(&html, "text/html", charset)
    }

    /// 404 页面，正文中包含请求的路径
    pub fn response_404(path: &str, charset: &str) -> Self {
        Self::from_error(HttpStatus::NotFound, "Page Not Found", path, charset)
    }

    /// 500 页面，正文中包含故障详情
    pub fn response_500(detail: &str, charset: &str) -> Self {
        Self::from_error(
            HttpStatus::InternalServerError,
            "Internal Server Error",
            detail,
            charset,
        )
    }

    /// 304：不带正文、`Content-Type` 与 `Content-Length`，但保留验证器
    pub fn not_modified(etag: &str, last_modified: &str) -> Self {
        Self::new(HttpStatus::NotModified)
            .without_body()
            .with_header("ETag", etag)
            .with_header("Last-Modified", last_modified)
    }

    /// 根据解析结果生成响应。
    ///
    /// 返回 `Err` 表示处理过程中出现了内部错误，由调用方转换为 500 页面。
    pub fn from_resource(
        resource: &Resource,
        request: &Request,
        context: &Context,
        id: u128,
    ) -> Result<Response, Exception> {
        let charset = context.config.default_charset();
        match resource.kind {
            ResourceKind::Root => {
                debug!("[ID{}]请求的路径是根目录", id);
                Self::from_dir(resource, context, id)
            }
            ResourceKind::Directory => {
                debug!("[ID{}]请求的路径是目录", id);
                Ok(Self::from_dir(resource, context, id)?.with_header("Cache-Control", "no-cache"))
            }
            ResourceKind::File => {
                debug!("[ID{}]请求的路径是文件", id);
                Self::from_file(resource, request, context, id)
            }
            ResourceKind::Missing => Ok(Self::response_404(&resource.display_path, charset)),
        }
    }

    fn from_dir(resource: &Resource, context: &Context, id: u128) -> Result<Response, Exception> {
        let charset = context.config.default_charset();
        let listing = context.resolver.listing(&resource.path)?;
        debug!("[ID{}]目录{}共{}项", id, resource.path.display(), listing.len());
        let html =
            HtmlBuilder::from_dir(&resource.display_path, &resource.path, &listing, charset).build();
        Ok(Self::new(HttpStatus::Ok).with_text(&html, "text/html", charset))
    }

    fn from_file(
        resource: &Resource,
        request: &Request,
        context: &Context,
        id: u128,
    ) -> Result<Response, Exception> {
        let path = &resource.path;
        let metadata = fs::metadata(path)?;
        let mtime = metadata.modified()?;
        let current_etag = etag(path, mtime);
        let last_modified = format_http_date(&mtime_utc(mtime));

        if validate(request, mtime, &current_etag, id) == CacheValidationOutcome::NotModified {
            debug!("[ID{}]客户端缓存仍然有效，返回304", id);
            return Ok(Self::not_modified(&current_etag, &last_modified));
        }

        let data = fs::read(path)?;
        debug!("[ID{}]读取文件{}，{} bytes", id, path.display(), data.len());

        let content_type = resource.content_type;
        let mut response = Self::new(HttpStatus::Ok);
        let charset = if context.policy.is_text(content_type) {
            let guess = context
                .detector
                .detect(&data)
                .unwrap_or_else(|| context.config.default_charset().to_string());
            debug!("[ID{}]探测到文本编码：{}", id, guess);
            Some(guess)
        } else {
            if !context.policy.is_browser_renderable(content_type) {
                // 让浏览器弹出保存对话框而不是直接显示
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                response = response
                    .with_header("Content-Description", "File Transfer")
                    .with_header("Content-Transfer-Encoding", "binary")
                    .with_header(
                        "Content-Disposition",
                        &format!("attachment;filename={}", encode_filename(&file_name)),
                    );
            }
            None
        };

        Ok(response
            .with_binary(Bytes::from(data), content_type, charset)
            .with_header("ETag", &current_etag)
            .with_header("Last-Modified", &last_modified)
            .with_header(
                "Cache-Control",
                &format!("max-age={}, must-revalidate", context.config.max_age()),
            ))
    }
}

impl Response {
    /// 完整的响应头列表（默认标头在前，附加标头在后）
    pub fn headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![
            ("Server".to_string(), SERVER_NAME.to_string()),
            ("Date".to_string(), format_http_date(&self.date)),
            ("Connection".to_string(), "close".to_string()),
        ];
        if self.body_headers {
            if let Some(content_type) = &self.content_type {
                let value = match &self.charset {
                    Some(charset) => format!("{}; charset={}", content_type, charset),
                    None => content_type.clone(),
                };
                headers.push(("Content-Type".to_string(), value));
            }
            headers.push(("Content-Length".to_string(), self.content.len().to_string()));
        }
        headers.extend(self.headers.iter().cloned());
        headers
    }

    /// 依次写出状态行、每个标头、空行和正文，每一部分都是一次单独的写操作。
    pub fn write_to<W: Write>(&self, writer: &mut W, id: u128) -> io::Result<()> {
        let status_line = format!("{} {}{}", self.version, self.status, CRLF);
        writer.write_all(status_line.as_bytes())?;
        for (name, value) in self.headers() {
            debug!("[ID{}]{}: {}", id, name, value);
            writer.write_all(format!("{}: {}{}", name, value, CRLF).as_bytes())?;
        }
        writer.write_all(CRLF.as_bytes())?;
        if !self.content.is_empty() {
            writer.write_all(&self.content)?;
        }
        writer.flush()
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(self.content.len() + 256);
        // 写入 Vec 不会失败
        let _ = self.write_to(&mut buffer, 0);
        buffer
    }
}

impl Response {
    pub fn status(&self) -> HttpStatus {
        self.status
    }

    pub fn status_code(&self) -> u16 {
        self.status.code()
    }

    pub fn information(&self) -> &str {
        self.status.reason()
    }

    pub fn content(&self) -> &Bytes {
        &self.content
    }

    pub fn is_binary(&self) -> bool {
        self.binary
    }

    /// 第一个匹配的标头值，名称不区分大小写
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers()
            .into_iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }
}
