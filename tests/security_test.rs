// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 安全回归测试
//!
//! 模拟常见的攻击向量，验证服务端不会泄露根目录之外的内容，
//! 并且在畸形或恶意的请求之后仍能继续服务。

mod common;

use std::{
    fs::{self, File},
    io::{Read, Write},
    thread,
    time::{Duration, Instant},
};

use common::{RawResponse, TestServer};
use tempfile::TempDir;

const SECRET: &[u8] = b"top-secret-contents";

/// 根目录旁边放一个秘密文件，穿越成功就能读到它
fn sandbox() -> (TempDir, TempDir) {
    let outer = TempDir::new().unwrap();
    File::create(outer.path().join("secret.txt"))
        .unwrap()
        .write_all(SECRET)
        .unwrap();
    let root = TempDir::new_in(outer.path()).unwrap();
    File::create(root.path().join("index.txt"))
        .unwrap()
        .write_all(b"public")
        .unwrap();
    (outer, root)
}

fn status_of(raw: &[u8]) -> u16 {
    RawResponse::parse(raw).status
}

fn leaks_secret(raw: &[u8]) -> bool {
    raw.windows(SECRET.len()).any(|w| w == SECRET)
}

/// ## 攻击向量：路径遍历
#[test]
fn test_path_traversal() {
    let (_outer, root) = sandbox();
    let server = TestServer::start(root);
    let attacks = [
        "/../secret.txt",
        "/../../secret.txt",
        "/./../secret.txt",
        "/%2e%2e/secret.txt",
        "/%2E%2E%2Fsecret.txt",
        "/..%2fsecret.txt",
        "/index.txt/../../secret.txt",
    ];
    for target in attacks {
        let raw = server.send(format!("GET {} HTTP/1.1\r\nHost: x\r\n\r\n", target).as_bytes());
        assert_eq!(status_of(&raw), 404, "{}", target);
        assert!(!leaks_secret(&raw), "{}", target);
    }
    assert_eq!(server.get("/index.txt", "").status, 200);
}

/// ## 攻击向量：指向根目录之外的符号链接
#[cfg(unix)]
#[test]
fn test_symlink_escape() {
    let (outer, root) = sandbox();
    std::os::unix::fs::symlink(outer.path().join("secret.txt"), root.path().join("link.txt"))
        .unwrap();
    std::os::unix::fs::symlink(outer.path(), root.path().join("up")).unwrap();
    let server = TestServer::start(root);

    for target in ["/link.txt", "/up/secret.txt"] {
        let raw = server.send(format!("GET {} HTTP/1.1\r\n\r\n", target).as_bytes());
        assert_eq!(status_of(&raw), 404, "{}", target);
        assert!(!leaks_secret(&raw));
    }
}

/// ## 攻击向量：超大请求头
#[test]
fn test_oversized_header_closed_without_response() {
    let (_outer, root) = sandbox();
    let server = TestServer::start(root);
    let mut request = b"GET / HTTP/1.1\r\nX-Flood: ".to_vec();
    request.extend(std::iter::repeat(b'A').take(64 * 1024));
    request.extend_from_slice(b"\r\n\r\n");

    let mut stream = server.connect();
    // 服务端可能在我们写完之前就关闭连接
    let _ = stream.write_all(&request);
    let mut out = Vec::new();
    let _ = stream.read_to_end(&mut out);
    assert!(out.is_empty());

    assert_eq!(server.get("/", "").status, 200);
}

/// ## 攻击向量：注入
/// 请求目标中的 HTML 与 CRLF 不能原样出现在应答中。
#[test]
fn test_injection_is_escaped() {
    let (_outer, root) = sandbox();
    let server = TestServer::start(root);

    let response = server.get("/<script>alert(1)</script>", "");
    assert_eq!(response.status, 404);
    assert!(!response.text().contains("<script>"));
    assert!(response.text().contains("&lt;script&gt;"));

    let raw = server.send(b"GET /%0d%0aSet-Cookie:%20x=1 HTTP/1.1\r\n\r\n");
    let response = RawResponse::parse(&raw);
    assert_eq!(response.status, 404);
    assert!(response.header("Set-Cookie").is_none());

    let raw = server.send(b"GET /index.txt%00.html HTTP/1.1\r\n\r\n");
    assert_ne!(status_of(&raw), 200);
}

/// ## 协议健壮性
#[test]
fn test_malformed_requests() {
    let (_outer, root) = sandbox();
    let server = TestServer::start(root);
    let requests: [&[u8]; 5] = [
        b"\r\n\r\n",
        b"GET\r\n\r\n",
        b"GET / HTTP/1.1 extra\r\n\r\n",
        b"GET / HTTP/1.1\r\nNoColonHere\r\n\r\n",
        b"GET /\xff\xfe HTTP/1.1\r\n\r\n",
    ];
    for request in requests {
        let raw = server.send(request);
        assert_eq!(status_of(&raw), 500, "{:?}", String::from_utf8_lossy(request));
    }
    assert_eq!(server.get("/index.txt", "").status, 200);
}

/// ## 攻击向量：慢速连接（Slowloris）
/// 迟迟不发完请求头的连接会在整体超时后被关闭，且不占住全部工作线程。
#[test]
fn test_slowloris_is_cut_off() {
    let (_outer, root) = sandbox();
    let server = TestServer::start(root);

    let slow: Vec<_> = (0..4)
        .map(|_| {
            let mut stream = server.connect();
            stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
            stream.write_all(b"GET / HTTP/1.1\r\n").unwrap();
            stream
        })
        .collect();

    let start = Instant::now();
    let handles: Vec<_> = slow
        .into_iter()
        .map(|mut stream| {
            thread::spawn(move || {
                for _ in 0..10 {
                    if stream.write_all(b"X-a: b\r\n").is_err() {
                        break;
                    }
                    thread::sleep(Duration::from_millis(400));
                }
                let mut out = Vec::new();
                let _ = stream.read_to_end(&mut out);
                out
            })
        })
        .collect();
    for handle in handles {
        assert!(handle.join().unwrap().is_empty());
    }
    assert!(start.elapsed() < Duration::from_secs(8));
    assert_eq!(server.get("/", "").status, 200);
}

/// ## 无权读取的文件
/// 读取失败应答500，之后的请求不受影响。
#[cfg(unix)]
#[test]
fn test_unreadable_file_gives_500() {
    use std::os::unix::fs::PermissionsExt;

    let (_outer, root) = sandbox();
    let locked = root.path().join("locked.txt");
    fs::write(&locked, b"locked").unwrap();
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
    // 以 root 运行时权限位不起作用
    if fs::read(&locked).is_ok() {
        return;
    }
    let server = TestServer::start(root);

    let response = server.get("/locked.txt", "");
    assert_eq!(response.status, 500);
    assert_ne!(response.body, b"locked");
    assert_eq!(server.get("/index.txt", "").status, 200);

    fs::set_permissions(&locked, fs::Permissions::from_mode(0o644)).unwrap();
}

/// ## 目录列表不暴露根目录之外的条目
#[test]
fn test_listing_stays_inside_root() {
    let (outer, root) = sandbox();
    fs::create_dir(root.path().join("docs")).unwrap();
    let server = TestServer::start(root);
    let body = server.get("/", "").text();
    assert!(body.contains("DOCS/"));
    assert!(!body.contains("secret.txt"));
    drop(outer);
}
