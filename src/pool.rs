//! # 连接分发（工作线程池）
//!
//! 固定数量的常驻工作线程从一个有界 FIFO 队列中取任务。
//! - 队列满时 `dispatch` 阻塞，`try_dispatch` 交还任务由调用方稍后重试，形成隐式背压，而不是拒绝。
//! - 每个任务只会被一个工作线程取走，同时在处理中的任务不超过线程数。
//! - 处理函数中的 panic 被捕获，不会结束工作线程。
//! - 停机时为每个线程放入一个 `Shutdown` 哨兵，再逐个等待线程退出。

use std::{
    io,
    panic::{self, AssertUnwindSafe},
    sync::{
        mpsc::{self, Receiver, SyncSender, TrySendError},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
};

use log::{debug, error, info, warn};

enum Message<T> {
    Job(T),
    Shutdown,
}

/// `try_dispatch` 失败时原样交还任务
#[derive(Debug)]
pub enum DispatchError<T> {
    /// 队列已满
    Full(T),
    /// 所有工作线程都已退出
    Closed(T),
}

type Handler<T> = Arc<dyn Fn(T) + Send + Sync + 'static>;

struct Worker {
    id: usize,
    thread: Option<JoinHandle<()>>,
}

pub struct WorkerPool<T: Send + 'static> {
    workers: Vec<Worker>,
    sender: SyncSender<Message<T>>,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// 创建 `size` 个工作线程，队列最多容纳 `capacity` 个等待中的任务。
    pub fn new<F>(size: usize, capacity: usize, handler: F) -> io::Result<Self>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        assert!(size > 0, "线程池大小必须大于0");
        let (sender, receiver) = mpsc::sync_channel(capacity);
        let receiver = Arc::new(Mutex::new(receiver));
        let handler: Handler<T> = Arc::new(handler);

        let mut workers = Vec::with_capacity(size);
        for id in 0..size {
            let receiver = Arc::clone(&receiver);
            let handler = Arc::clone(&handler);
            let thread = thread::Builder::new()
                .name(format!("worker-{}", id))
                .spawn(move || worker_loop(id, receiver, handler))?;
            workers.push(Worker {
                id,
                thread: Some(thread),
            });
        }
        info!("工作线程池已启动：{}个线程，队列容量{}", size, capacity);
        Ok(Self { workers, sender })
    }

    /// 把任务放入队列，队列满时阻塞等待。
    ///
    /// 所有工作线程都已退出时返回原任务，由调用方决定如何善后。
    pub fn dispatch(&self, job: T) -> Result<(), T> {
        self.sender.send(Message::Job(job)).map_err(|e| match e.0 {
            Message::Job(job) => job,
            Message::Shutdown => unreachable!("dispatch只发送Job"),
        })
    }

    /// 不阻塞的 `dispatch`：队列满或线程已全部退出时立即返回原任务。
    pub fn try_dispatch(&self, job: T) -> Result<(), DispatchError<T>> {
        match self.sender.try_send(Message::Job(job)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(Message::Job(job))) => Err(DispatchError::Full(job)),
            Err(TrySendError::Disconnected(Message::Job(job))) => Err(DispatchError::Closed(job)),
            Err(_) => unreachable!("try_dispatch只发送Job"),
        }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// 为每个线程发送一个哨兵并等待全部线程退出。已在队列中的任务会先被处理完。
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        for _ in &self.workers {
            if self.sender.send(Message::Shutdown).is_err() {
                break;
            }
        }
        for worker in &mut self.workers {
            if let Some(thread) = worker.thread.take() {
                match thread.join() {
                    Ok(()) => debug!("worker-{}已退出", worker.id),
                    Err(_) => error!("worker-{}异常退出", worker.id),
                }
            }
        }
    }
}

impl<T: Send + 'static> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop<T>(id: usize, receiver: Arc<Mutex<Receiver<Message<T>>>>, handler: Handler<T>) {
    loop {
        // 锁只在取任务期间持有，处理任务时已释放
        let message = {
            let lock = match receiver.lock() {
                Ok(lock) => lock,
                Err(poisoned) => {
                    warn!("worker-{}：队列锁被污染，恢复并继续", id);
                    poisoned.into_inner()
                }
            };
            lock.recv()
        };
        match message {
            Ok(Message::Job(job)) => {
                if panic::catch_unwind(AssertUnwindSafe(|| handler(job))).is_err() {
                    error!("worker-{}：任务处理过程中发生panic，线程继续运行", id);
                }
            }
            Ok(Message::Shutdown) => {
                debug!("worker-{}收到停机哨兵", id);
                break;
            }
            Err(_) => {
                debug!("worker-{}：队列已关闭", id);
                break;
            }
        }
    }
}
