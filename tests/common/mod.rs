//! 集成测试共用的测试服务端：临时根目录 + 随机端口 + 可控停机

#![allow(dead_code)]

use std::{
    io::{Read, Write},
    net::{SocketAddr, TcpStream},
    path::Path,
    thread::{self, JoinHandle},
    time::Duration,
};

use simplehttp::{Config, Exception, Server};
use tempfile::TempDir;
use tokio::sync::oneshot;

pub struct TestServer {
    pub addr: SocketAddr,
    pub root: TempDir,
    stop: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<Result<(), Exception>>>,
}

impl TestServer {
    pub fn start(root: TempDir) -> Self {
        let config = Config::new()
            .with_root(root.path().to_str().unwrap())
            .with_address("127.0.0.1", 0)
            .with_workers(4, 8)
            .with_limits(1024, 2000);
        Self::start_with(root, config)
    }

    pub fn start_with(root: TempDir, config: Config) -> Self {
        let server = Server::bind(config).unwrap();
        let addr = server.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel::<()>();
        let handle = thread::spawn(move || {
            server.run_until(async move {
                let _ = stopped.await;
            })
        });
        Self {
            addr,
            root,
            stop: Some(stop),
            handle: Some(handle),
        }
    }

    /// 发出停机信号但不等待服务端退出
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    pub fn connect(&self) -> TcpStream {
        let stream = TcpStream::connect(self.addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        stream
    }

    /// 发送原始请求并读到连接关闭为止
    pub fn send(&self, request: &[u8]) -> Vec<u8> {
        let mut stream = self.connect();
        stream.write_all(request).unwrap();
        let mut out = Vec::new();
        // 服务端拒绝过大的请求头时可能直接重置连接
        let _ = stream.read_to_end(&mut out);
        out
    }

    pub fn get(&self, target: &str, extra_headers: &str) -> RawResponse {
        let request = format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\n{}\r\n",
            target, self.addr, extra_headers
        );
        RawResponse::parse(&self.send(request.as_bytes()))
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[derive(Debug)]
pub struct RawResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn parse(raw: &[u8]) -> Self {
        let split = raw
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .expect("响应中缺少头部结束标记");
        let head = String::from_utf8_lossy(&raw[..split]).into_owned();
        let mut lines = head.split("\r\n");
        let status = lines
            .next()
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|code| code.parse().ok())
            .unwrap_or(0);
        let headers = lines
            .filter_map(|line| line.split_once(": "))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self {
            status,
            headers,
            body: raw[split + 4..].to_vec(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
