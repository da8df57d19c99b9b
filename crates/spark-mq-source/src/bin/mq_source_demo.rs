//! 演示程序：用脚本化消费者模拟客户端投递，观察攒批刷写、退避与停机排空。
//!
//! 用法：`mq_source_demo [config.toml]`。未提供配置文件时使用 `maxSize = 5`、`maxDelay = 200ms` 的演示配置。
//! 日志级别通过 `RUST_LOG` 控制，默认 `info`。
use std::env;
use std::fs;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use spark_mq_source::test_stubs::{RecordingSink, ScriptedConsumer};
use spark_mq_source::{BatchingSource, PollingDriver, RawMessage, SourceConfig};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(build_env_filter())
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "demo aborted");
            ExitCode::FAILURE
        }
    }
}

fn build_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn load_config() -> Result<SourceConfig, Box<dyn std::error::Error>> {
    match env::args().nth(1) {
        Some(path) => Ok(SourceConfig::from_toml_str(&fs::read_to_string(path)?)?),
        None => Ok(SourceConfig::new("demo-orders", "*")
            .with_extra("demo")
            .with_max_size(5)
            .with_max_delay(Duration::from_millis(200))
            .with_backoff(Duration::from_millis(100), Duration::from_millis(400))),
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let consumer = ScriptedConsumer::new();
    let sink = Arc::new(RecordingSink::new());

    let source = Arc::new(BatchingSource::configure(
        config,
        Box::new(consumer.clone()),
        sink.clone(),
    )?);
    source.start();
    let driver = PollingDriver::spawn(Arc::clone(&source))?;

    // 一次突发、一次下游故障、随后是低于条数阈值的零散消息。
    let burst: Vec<_> = (0..12).map(message).collect();
    consumer.deliver(&burst);
    thread::sleep(Duration::from_millis(50));

    sink.fail_next(1);
    let failing: Vec<_> = (12..17).map(message).collect();
    consumer.deliver(&failing);
    thread::sleep(Duration::from_millis(300));

    for seq in 17..20 {
        consumer.deliver(&[message(seq)]);
        thread::sleep(Duration::from_millis(30));
    }

    driver.shutdown();
    source.stop();

    info!(
        batches = ?sink.batch_sizes(),
        counters = %source.counters(),
        "demo finished"
    );
    Ok(())
}

fn message(seq: u32) -> RawMessage {
    RawMessage::new(format!("order-{seq}").into_bytes())
        .with_property("seq", seq.to_string())
        .with_msg_id(format!("msg-{seq:04}"))
}
