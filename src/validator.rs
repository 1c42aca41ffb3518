//! 条件缓存校验：ETag、`If-Modified-Since`、`If-None-Match` 与 `Cache-Control` 的处理，
//! 以及决定文件“在浏览器中直接显示”还是“强制下载”的内容类型策略。

use std::{
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use log::{debug, warn};
use md5::{Digest, Md5};
use regex::Regex;

use crate::{
    exception::Exception,
    param::{HTTP_DATE_FORMAT, IF_MODIFIED_SINCE_FORMAT},
    request::Request,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheValidationOutcome {
    NotModified,
    Modified,
}

/// 根据文件的修改时间与绝对路径计算 ETag，结果为带双引号的 MD5 十六进制摘要。
///
/// 同一文件、同一修改时间总是得到相同的值。
pub fn etag(path: &Path, mtime: SystemTime) -> String {
    let stamp = match mtime.duration_since(UNIX_EPOCH) {
        Ok(d) => format!("{}.{:09}", d.as_secs(), d.subsec_nanos()),
        Err(e) => format!("-{}", e.duration().as_nanos()),
    };
    let mut hasher = Md5::new();
    hasher.update(stamp.as_bytes());
    hasher.update(path.to_string_lossy().as_bytes());
    format!("\"{:x}\"", hasher.finalize())
}

/// 截断到秒的 UTC 修改时间
pub fn mtime_utc(mtime: SystemTime) -> DateTime<Utc> {
    let secs = match mtime.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    };
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

pub fn format_http_date(date: &DateTime<Utc>) -> String {
    date.format(HTTP_DATE_FORMAT).to_string()
}

/// 解析 `If-Modified-Since`。优先使用 `%A, %d %b %Y %H:%M:%S GMT`，同时接受 RFC 1123/2822 写法。
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, IF_MODIFIED_SINCE_FORMAT) {
        return Some(Utc.from_utc_datetime(&naive));
    }
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// 参数值：纯数字被识别为整数，其余保留为字符串
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderParam {
    Number(u64),
    Text(String),
}

/// 把形如 `max-age=0, must-revalidate` 的标头值拆成 `(key, value)` 列表。
///
/// 没有 `=` 的项值为 `None`，键与值都会去掉首尾空白。
pub fn header_params(value: &str, delim: char) -> Vec<(String, Option<HeaderParam>)> {
    value
        .split(delim)
        .filter(|item| !item.trim().is_empty())
        .map(|item| {
            let (key, val) = match item.split_once('=') {
                Some((k, v)) => (k, Some(v.trim())),
                None => (item, None),
            };
            let val = val.filter(|v| !v.is_empty()).map(|v| {
                if v.chars().all(|c| c.is_ascii_digit()) {
                    v.parse()
                        .map(HeaderParam::Number)
                        .unwrap_or_else(|_| HeaderParam::Text(v.to_string()))
                } else {
                    HeaderParam::Text(v.trim_matches('"').to_string())
                }
            });
            (key.trim().to_string(), val)
        })
        .collect()
}

/// 查找某个参数的值，找不到时再查找 `param*` 形式（RFC 5987 扩展参数）
pub fn header_param(value: &str, param: &str, delim: char) -> Option<HeaderParam> {
    let params = header_params(value, delim);
    let lookup = |name: &str| {
        params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .and_then(|(_, v)| v.clone())
    };
    lookup(param).or_else(|| lookup(&format!("{}*", param)))
}

/// 判断客户端缓存的副本是否仍然有效。
///
/// 满足任一条件即视为未修改：
/// * `If-Modified-Since` 存在且文件修改时间（秒）不晚于该时间；
/// * `If-None-Match` 存在且等于当前 ETag。
pub fn validate(
    request: &Request,
    mtime: SystemTime,
    current_etag: &str,
    id: u128,
) -> CacheValidationOutcome {
    let mut modified = true;

    if let Some(since) = request.if_modified_since() {
        match parse_http_date(since) {
            Some(date) => {
                if mtime_utc(mtime) <= date {
                    modified = false;
                }
            }
            None => warn!("[ID{}]无法解析If-Modified-Since：{}，忽略该标头", id, since),
        }
    }

    if let Some(none_match) = request.if_none_match() {
        if none_match.trim() == current_etag {
            modified = false;
        }
    }

    if let Some(cache_control) = request.cache_control() {
        // max-age 仅作记录，服务端不据此判断新鲜度
        if let Some(max_age) = header_param(cache_control, "max-age", ',') {
            debug!("[ID{}]客户端Cache-Control max-age={:?}", id, max_age);
        }
    }

    match modified {
        true => CacheValidationOutcome::Modified,
        false => CacheValidationOutcome::NotModified,
    }
}

/// 按内容类型决定文本解码方式与浏览器呈现方式。
pub struct ContentPolicy {
    text_types: Option<Regex>,
    browser_types: Option<Regex>,
}

impl ContentPolicy {
    /// 由若干正则片段构建，每组片段以 `|` 连接并锚定在开头
    pub fn new(text_types: &[String], browser_types: &[String]) -> Result<Self, Exception> {
        Ok(Self {
            text_types: compile_patterns(text_types)?,
            browser_types: compile_patterns(browser_types)?,
        })
    }

    /// 需要探测字符集的文本类型
    pub fn is_text(&self, content_type: &str) -> bool {
        matches_any(&self.text_types, content_type)
    }

    /// 浏览器可以安全地直接显示的类型
    pub fn is_browser_renderable(&self, content_type: &str) -> bool {
        matches_any(&self.browser_types, content_type)
    }
}

// 空列表不匹配任何类型
fn compile_patterns(patterns: &[String]) -> Result<Option<Regex>, Exception> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let joined = format!("^(?:{})", patterns.join("|"));
    Regex::new(&joined)
        .map(Some)
        .map_err(|e| Exception::Config(e.to_string()))
}

fn matches_any(patterns: &Option<Regex>, content_type: &str) -> bool {
    patterns.as_ref().map_or(false, |re| re.is_match(content_type))
}
