use std::{
    borrow::Cow,
    fs,
    path::Path,
};

use bytes::Bytes;
use chardetng::EncodingDetector as Chardet;
use encoding_rs::{Encoding, UTF_8};
use lazy_static::lazy_static;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use regex::{Captures, Regex};

use crate::{cache::ListingEntry, param::HttpStatus};

/// 页面骨架，`$charset`、`$title`、`$body` 为占位符
pub const BASE_HTML: &str = r#"<!DOCTYPE html>
<html>
    <head>
        <meta charset="$charset">
        <title>$title</title>
        <style> a:hover {
            color: white;
            padding: 1px;
            background-color: gray;
            border-color: #ccc;
            border-width: 4px;
            border-style: outset;}
        </style>
    </head>
<body>
    $body
</body>
</html>
"#;

const ERROR_BODY: &str = r#"
    <h2>$title</h2>
    <p>Error code: $status_code</p>
    <p>Description: $message</p>
    <p>$traceback</p>
    "#;

pub const ERROR_TITLE: &str = "Oops! Something went wrong...";

/// 链接中需要转义的字符（保留 `/`）
const PATH_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// 文件名中需要转义的字符
const SEGMENT_SET: &AsciiSet = &PATH_SET.add(b'/');

/// 探测字符集时最多检查的字节数
const SNIFF_LIMIT: usize = 64 * 1024;

lazy_static! {
    static ref PLACEHOLDER: Regex = Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)").unwrap();
}

/// `$name` 形式的字符串模板。
///
/// 替换是“安全”的：没有提供值的占位符原样保留，不会报错；替换进去的值不会被再次展开。
pub struct Template<'a> {
    text: &'a str,
}

impl<'a> Template<'a> {
    pub fn new(text: &'a str) -> Self {
        Self { text }
    }

    pub fn safe_substitute(&self, values: &[(&str, &str)]) -> String {
        PLACEHOLDER
            .replace_all(self.text, |caps: &Captures| {
                let key = &caps[1];
                match values.iter().find(|(k, _)| *k == key) {
                    Some((_, v)) => v.to_string(),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }
}

/// 目录列表页与错误页的构建器。与传输格式无关，只负责产生 HTML 文本。
pub struct HtmlBuilder {
    title: String,
    charset: String,
    body: String,
}

impl HtmlBuilder {
    /// 错误页：标题、状态码、说明与一行详情（例如请求的路径或内部错误信息）。
    pub fn from_error(status: HttpStatus, message: &str, detail: &str, charset: &str) -> Self {
        let code = status.code().to_string();
        let title = escape_html(ERROR_TITLE);
        let message = escape_html(message);
        let detail = escape_html(detail);
        let body = Template::new(ERROR_BODY).safe_substitute(&[
            ("title", &title),
            ("status_code", &code),
            ("message", &message),
            ("traceback", &detail),
        ]);
        Self {
            title,
            charset: charset.to_string(),
            body,
        }
    }

    /// 目录列表页。
    ///
    /// * `display_path` - 已解码的请求路径，根目录为 `/`
    /// * `dir` - 目录在文件系统中的绝对路径，用于读取文件大小
    /// * `listing` - 目录缓存给出的有序条目
    ///
    /// 列表第一项总是指向上一级目录的 `../`。目录没有大小注释，文件注释为 `Size: N byte` 或 `Size: N kb`。
    pub fn from_dir(display_path: &str, dir: &Path, listing: &[ListingEntry], charset: &str) -> Self {
        let title = escape_html(display_path);
        let base = match display_path.ends_with('/') {
            true => display_path.to_string(),
            false => format!("{}/", display_path),
        };
        let base = utf8_percent_encode(&base, PATH_SET).to_string();

        let mut body = format!("<h1>Index of {} </h1>\n<hr>\n<ul>\n", title);
        body.push_str(&list_item("../", "", "../"));
        for entry in listing {
            let mut href = format!(
                "{}{}",
                base,
                utf8_percent_encode(&entry.file_name, SEGMENT_SET)
            );
            let size = if entry.is_dir {
                href.push('/');
                String::new()
            } else {
                // 文件可能在列表缓存之后被删除，此时不显示大小
                match fs::metadata(dir.join(&entry.file_name)) {
                    Ok(meta) => format!("Size: {}", format_size(meta.len())),
                    Err(_) => String::new(),
                }
            };
            body.push_str(&list_item(&href, &size, &escape_html(&entry.label)));
        }
        body.push_str("</ul>\n<hr>\n");

        Self {
            title,
            charset: charset.to_string(),
            body,
        }
    }

    pub fn build(&self) -> String {
        Template::new(BASE_HTML).safe_substitute(&[
            ("title", &self.title),
            ("charset", &self.charset),
            ("body", &self.body),
        ])
    }
}

fn list_item(href: &str, title: &str, label: &str) -> String {
    format!(
        "<li><a href=\"{}\" title=\"{}\">{}</a></li>\n",
        href, title, label
    )
}

/// 人类可读的文件大小：超过 1024 字节时四舍五入到 kb
pub fn format_size(size: u64) -> String {
    if size > 1024 {
        format!("{} kb", (size as f64 / 1024.0).round() as u64)
    } else {
        format!("{} byte", size)
    }
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// `Content-Disposition` 中使用的文件名编码
pub fn encode_filename(name: &str) -> String {
    utf8_percent_encode(name, SEGMENT_SET).to_string()
}

/// 按字符集名称编码文本。无法识别的名称按 UTF-8 处理。
pub fn encode_text(text: &str, charset: &str) -> Bytes {
    let encoding = Encoding::for_label(charset.trim().as_bytes()).unwrap_or(UTF_8);
    let (encoded, _, _) = encoding.encode(text);
    match encoded {
        Cow::Borrowed(b) => Bytes::copy_from_slice(b),
        Cow::Owned(v) => Bytes::from(v),
    }
}

/// 字符集探测：给出一段字节最可能使用的字符集名称。
#[cfg_attr(test, mockall::automock)]
pub trait EncodingDetector: Send + Sync {
    /// 无法判断时返回 `None`，调用方应使用默认字符集
    fn detect(&self, data: &[u8]) -> Option<String>;
}

/// 基于 BOM、UTF-8 校验与 chardetng 的探测器
pub struct ChardetDetector;

impl EncodingDetector for ChardetDetector {
    fn detect(&self, data: &[u8]) -> Option<String> {
        if data.is_empty() {
            return None;
        }
        if let Some((encoding, _)) = Encoding::for_bom(data) {
            return Some(encoding.name().to_ascii_lowercase());
        }
        let sample = &data[..data.len().min(SNIFF_LIMIT)];
        if is_utf8_prefix(sample, sample.len() < data.len()) {
            return Some("utf-8".to_string());
        }
        let mut detector = Chardet::new();
        detector.feed(sample, true);
        Some(detector.guess(None, true).name().to_ascii_lowercase())
    }
}

// 截断的样本末尾可能切断一个多字节字符
fn is_utf8_prefix(sample: &[u8], truncated: bool) -> bool {
    match std::str::from_utf8(sample) {
        Ok(_) => true,
        Err(e) => truncated && e.error_len().is_none(),
    }
}
