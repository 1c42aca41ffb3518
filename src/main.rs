// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 静态文件服务器
//!
//! 用法：`simplehttp [配置文件]`，默认读取 `config/development.toml`。
//! 按 Ctrl-C 停止：停止接受新连接，等待已排队的连接处理完毕后退出。

use std::{env, process};

use log::{error, info, LevelFilter};
use log4rs::{
    append::console::ConsoleAppender,
    config::{Appender, Root},
    encode::pattern::PatternEncoder,
};

use simplehttp::{Config, Server};

const DEFAULT_CONFIG: &str = "config/development.toml";
const LOG_CONFIG: &str = "config/log4rs.yaml";

fn main() {
    // 1. 初始化日志系统：优先使用外部 YAML，缺失时退回到控制台输出
    init_logging();

    // 2. 加载配置
    let path = env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let config = match Config::from_toml(&path) {
        Ok(config) => config,
        Err(e) => {
            error!("无法加载配置文件{}：{}", path, e);
            process::exit(1);
        }
    };
    info!("配置文件已载入：{}", path);
    info!(
        "工作线程数：{}，队列容量：{}",
        config.worker_threads(),
        config.queue_capacity()
    );

    // 3. 绑定端口并运行
    let server = match Server::bind(config) {
        Ok(server) => server,
        Err(e) => {
            error!("服务端启动失败：{}", e);
            process::exit(1);
        }
    };
    if let Err(e) = server.run() {
        error!("服务端异常退出：{}", e);
        process::exit(1);
    }
}

fn init_logging() {
    let err = match log4rs::init_file(LOG_CONFIG, Default::default()) {
        Ok(()) => return,
        Err(e) => e,
    };
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "{d(%Y-%m-%d %H:%M:%S)} {h({l})} {t} - {m}{n}",
        )))
        .build();
    let config = log4rs::Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(LevelFilter::Info));
    match config {
        Ok(config) => {
            if log4rs::init_config(config).is_ok() {
                info!("未能读取{}（{}），使用默认控制台日志", LOG_CONFIG, err);
            }
        }
        Err(e) => eprintln!("日志初始化失败：{}", e),
    }
}
