// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 服务端
//!
//! 监听循环运行在单线程 Tokio 运行时上，只负责就绪等待、接受连接与停机信号；
//! 已接受的连接被转换为阻塞式套接字，交给 [`WorkerPool`] 中的常驻线程处理。
//! 每个连接恰好处理一个请求，应答后即关闭。

use std::{
    any::Any,
    future::Future,
    io::{self, Read, Write},
    net::{Shutdown, SocketAddr, TcpStream},
    panic::{self, AssertUnwindSafe},
    path::Path,
    pin::Pin,
    sync::Arc,
    time::{Duration, Instant},
};

use log::{debug, error, info, warn};
use tokio::{
    net::{TcpListener, TcpSocket},
    runtime::{Builder, Runtime},
    signal,
};

use crate::{
    cache::DirectoryCache,
    config::Config,
    exception::Exception,
    param::HttpStatus,
    pool::{DispatchError, WorkerPool},
    request::{read_head, Request},
    resolver::Resolver,
    response::Response,
    util::{ChardetDetector, EncodingDetector},
    validator::ContentPolicy,
};

/// 所有工作线程共享的只读上下文
pub struct Context {
    pub config: Config,
    pub resolver: Resolver,
    pub policy: ContentPolicy,
    pub detector: Box<dyn EncodingDetector>,
}

impl Context {
    pub fn new(config: Config) -> Result<Self, Exception> {
        Self::with_detector(config, Box::new(ChardetDetector))
    }

    /// 使用指定的字符集探测器构建上下文。根目录必须存在。
    pub fn with_detector(
        config: Config,
        detector: Box<dyn EncodingDetector>,
    ) -> Result<Self, Exception> {
        let listings = Arc::new(DirectoryCache::new());
        let resolver = Resolver::new(Path::new(config.www_root()), listings).map_err(|e| {
            Exception::Config(format!("无法打开根目录{}：{}", config.www_root(), e))
        })?;
        let policy = ContentPolicy::new(config.text_types(), config.browser_types())?;
        Ok(Self {
            config,
            resolver,
            policy,
            detector,
        })
    }

    /// 目录内容变化时调用，丢弃该目录的缓存列表
    pub fn invalidate_listing(&self, dir: &Path) {
        self.resolver.listings().invalidate(dir);
    }
}

/// 一个已接受的客户端连接。记录是否已经向对端写出过字节，
/// 写出过之后就不能再补发错误应答。
///
/// 设置截止时间后，每次写操作的超时都不会越过它；过了截止时间的写操作直接失败。
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    id: u128,
    written: bool,
    write_timeout: Option<Duration>,
    deadline: Option<Instant>,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: SocketAddr, id: u128) -> Self {
        Self {
            stream,
            peer,
            id,
            written: false,
            write_timeout: None,
            deadline: None,
        }
    }

    pub fn id(&self) -> u128 {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn has_written(&self) -> bool {
        self.written
    }

    fn set_timeouts(&mut self, config: &Config) -> io::Result<()> {
        self.stream.set_read_timeout(Some(config.read_timeout()))?;
        self.stream.set_write_timeout(Some(config.write_timeout()))?;
        self.write_timeout = Some(config.write_timeout());
        Ok(())
    }

    pub fn set_deadline(&mut self, deadline: Instant) {
        self.deadline = Some(deadline);
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.map_or(false, |deadline| Instant::now() >= deadline)
    }

    /// 关闭写方向后释放套接字
    pub fn close(self) {
        if let Err(e) = self.stream.shutdown(Shutdown::Write) {
            debug!("[ID{}]关闭连接时出错：{}", self.id, e);
        }
        debug!("[ID{}]TCP连接已关闭", self.id);
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(deadline) = self.deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "connection deadline exceeded"));
            }
            let timeout = match self.write_timeout {
                Some(write_timeout) => write_timeout.min(remaining),
                None => remaining,
            };
            self.stream.set_write_timeout(Some(timeout))?;
        }
        let n = self.stream.write(buf)?;
        if n > 0 {
            self.written = true;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

/// # 连接处理器
///
/// 读取并解析请求头，解析资源，构建并写出应答。
/// 返回的错误由 [`serve_connection`] 统一转换为 500 页面或静默关闭。
pub fn handle_connection(conn: &mut Connection, context: &Context) -> Result<HttpStatus, Exception> {
    let id = conn.id();
    let config = &context.config;
    conn.set_timeouts(config)?;
    conn.set_deadline(Instant::now() + config.connection_timeout());

    let head_timeout = config.request_timeout().min(config.connection_timeout());
    let head = read_head(conn, config.max_header_bytes(), head_timeout, id)?;
    debug!("[ID{}]HTTP请求接收完毕，{}字节", id, head.len());

    let request = Request::try_from(&head, id)?;
    debug!("[ID{}]成功解析HTTP请求", id);
    if let Some(host) = request.host() {
        debug!("[ID{}]Host: {}", id, host);
    }

    let response = match context.resolver.resolve(request.target(), id) {
        Ok(resource) => Response::from_resource(&resource, &request, context, id)?,
        Err(e) if e.is_not_found() => {
            warn!("[ID{}]{}", id, e);
            Response::response_404(request.target(), config.default_charset())
        }
        Err(e) => return Err(e),
    };

    response.write_to(conn, id).map_err(|e| match conn.is_expired() {
        true => Exception::RequestTimeout,
        false => Exception::Io(e),
    })?;
    info!(
        "[ID{}]{} \"{} {} {}\" {}",
        id,
        conn.peer(),
        request.method(),
        request.target(),
        request.version(),
        response.status_code()
    );
    Ok(response.status())
}

/// 工作线程中单个连接的完整生命周期，永远不会向调用方传播错误或 panic。
pub fn serve_connection(mut conn: Connection, context: &Context) {
    let id = conn.id();
    let start = Instant::now();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| handle_connection(&mut conn, context)));

    let failure = match outcome {
        Ok(Ok(status)) => {
            debug!("[ID{}]{}，耗时{:?}", id, status, start.elapsed());
            None
        }
        Ok(Err(e)) if e.is_silent() => {
            debug!("[ID{}]连接被静默关闭：{}", id, e);
            None
        }
        Ok(Err(e)) => {
            error!("[ID{}]处理请求失败：{}", id, e);
            Some(e.to_string())
        }
        Err(payload) => {
            let detail = panic_detail(payload.as_ref());
            error!("[ID{}]处理请求时发生panic：{}", id, detail);
            Some(detail)
        }
    };

    if let Some(detail) = failure {
        if conn.has_written() {
            warn!("[ID{}]应答已部分写出，无法再发送500页面", id);
        } else {
            let response = Response::response_500(&detail, context.config.default_charset());
            if let Err(e) = response.write_to(&mut conn, id) {
                warn!("[ID{}]发送500页面失败：{}", id, e);
            }
        }
    }
    conn.close();
}

fn panic_detail(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub struct Server {
    runtime: Runtime,
    listener: TcpListener,
    context: Arc<Context>,
}

impl Server {
    /// 构建上下文并绑定监听端口，此时尚未开始接受连接。
    pub fn bind(config: Config) -> Result<Self, Exception> {
        let context = Arc::new(Context::new(config)?);
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let listener = runtime.block_on(bind_listener(&context.config))?;
        info!(
            "服务端在{}上监听Socket连接，根目录：{}",
            listener.local_addr()?,
            context.resolver.root().display()
        );
        Ok(Self {
            runtime,
            listener,
            context,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    /// 运行直到收到 Ctrl-C
    pub fn run(self) -> Result<(), Exception> {
        self.run_until(async {
            if let Err(e) = signal::ctrl_c().await {
                error!("无法监听停机信号：{}", e);
            }
        })
    }

    /// 运行直到 `shutdown` 完成，然后停止接受连接并等待所有工作线程退出。
    pub fn run_until<F>(self, shutdown: F) -> Result<(), Exception>
    where
        F: Future<Output = ()>,
    {
        let Server {
            runtime,
            listener,
            context,
        } = self;

        let pool = {
            let context = Arc::clone(&context);
            WorkerPool::new(
                context.config.worker_threads(),
                context.config.queue_capacity(),
                move |conn: Connection| serve_connection(conn, &context),
            )?
        };

        runtime.block_on(accept_loop(listener, &pool, &context, shutdown));

        info!("正在等待{}个工作线程退出...", pool.size());
        pool.shutdown();
        info!("服务端已停止");
        Ok(())
    }
}

async fn bind_listener(config: &Config) -> io::Result<TcpListener> {
    let address = tokio::net::lookup_host((config.host(), config.port()))
        .await?
        .next()
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("无法解析监听地址：{}", config.host()),
            )
        })?;
    let socket = match address {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.set_reuseaddr(true)?;
    socket.bind(address)?;
    socket.listen(config.backlog())
}

async fn accept_loop<F>(
    listener: TcpListener,
    pool: &WorkerPool<Connection>,
    context: &Context,
    shutdown: F,
) where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut id: u128 = 0;
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("监听循环接收到停机指令，正在退出...");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("[ID{}]TCP连接已建立：{}", id, peer);
                    let outcome = hand_off(stream, peer, id, pool, context, &mut shutdown).await;
                    id += 1;
                    if outcome == HandOff::ShutdownRequested {
                        info!("监听循环接收到停机指令，正在退出...");
                        break;
                    }
                }
                Err(e) => {
                    // 例如文件描述符耗尽，稍后重试
                    error!("接受连接失败：{}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum HandOff {
    Done,
    ShutdownRequested,
}

/// 等待队列出现空位的重试间隔
const DISPATCH_RETRY: Duration = Duration::from_millis(10);

/// 把连接交给线程池。
///
/// 队列满时不接受新连接，每隔 [`DISPATCH_RETRY`] 重试一次，期间仍然响应停机信号；
/// 停机时尚未交出的连接收到 500 页面后关闭。
async fn hand_off<F>(
    stream: tokio::net::TcpStream,
    peer: SocketAddr,
    id: u128,
    pool: &WorkerPool<Connection>,
    context: &Context,
    shutdown: &mut Pin<&mut F>,
) -> HandOff
where
    F: Future<Output = ()>,
{
    // 转换失败时套接字已被消耗，无法再写出任何内容
    let stream = match stream.into_std() {
        Ok(stream) => stream,
        Err(e) => {
            error!("[ID{}]无法转换连接：{}", id, e);
            return HandOff::Done;
        }
    };
    let mut conn = Connection::new(stream, peer, id);
    if let Err(e) = conn.stream.set_nonblocking(false) {
        reject(conn, &format!("无法切换为阻塞模式：{}", e), context);
        return HandOff::Done;
    }

    loop {
        match pool.try_dispatch(conn) {
            Ok(()) => return HandOff::Done,
            Err(DispatchError::Closed(closed)) => {
                reject(closed, "工作线程已全部退出", context);
                return HandOff::Done;
            }
            Err(DispatchError::Full(full)) => {
                conn = full;
                tokio::select! {
                    _ = shutdown.as_mut() => {
                        reject(conn, "服务端正在停止", context);
                        return HandOff::ShutdownRequested;
                    }
                    _ = tokio::time::sleep(DISPATCH_RETRY) => {}
                }
            }
        }
    }
}

/// 无法交给工作线程的连接：尽力写出 500 页面后关闭
fn reject(mut conn: Connection, reason: &str, context: &Context) {
    let id = conn.id();
    let detail = Exception::InternalDispatchFailure(reason.to_string());
    error!("[ID{}]{}", id, detail);
    let response = Response::response_500(&detail.to_string(), context.config.default_charset());
    if let Err(e) = response.write_to(&mut conn, id) {
        debug!("[ID{}]发送500页面失败：{}", id, e);
    }
    conn.close();
}
