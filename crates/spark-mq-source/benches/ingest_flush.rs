use criterion::{BatchSize, Criterion, black_box};
use spark_mq_source::{
    BatchSink, ConsumeContext, DeliveryError, Envelope, EnvelopeBuffer, FlushPolicy,
    FlushScheduler, IdentityFields, IngestListener, MessageListener, MockClock, RawMessage,
    SourceCounter,
};
use std::{env, sync::Arc, thread, time::Duration};

/// 摄取与刷写的基准。
///
/// # 设计背景（Why）
/// - 监听器位于客户端投递线程上，追加路径的开销直接决定消费吞吐；
/// - 刷写路径需确认在突发积压下按块切分不会引入额外拷贝热点。
///
/// # 逻辑解析（How）
/// - `ingest_batch_of_32`：单线程经监听器追加 32 条消息；
/// - `append_contended_4_threads`：四个线程并发直接追加缓冲区；
/// - `flush_burst_of_1000`：预先追加 1000 条信封，以 `max_size = 100` 执行一次轮询。
struct DiscardSink;

impl BatchSink for DiscardSink {
    fn process_batch(&self, batch: Vec<Envelope>) -> Result<(), DeliveryError> {
        black_box(batch);
        Ok(())
    }
}

fn bench_ingest(c: &mut Criterion) {
    let messages: Vec<RawMessage> = (0..32)
        .map(|seq| RawMessage::new(vec![seq as u8; 256]).with_property("key", format!("k{seq}")))
        .collect();

    c.bench_function("ingest_batch_of_32", |b| {
        let buffer = Arc::new(EnvelopeBuffer::new());
        let listener = IngestListener::new(
            IdentityFields::new("bench", "*", None),
            Arc::clone(&buffer),
            Arc::new(SourceCounter::new("bench")),
        );
        b.iter(|| {
            let mut context = ConsumeContext::new();
            black_box(listener.consume(&messages, &mut context));
            if buffer.len() > 100_000 {
                black_box(buffer.swap());
            }
        });
    });

    c.bench_function("append_contended_4_threads", |b| {
        b.iter(|| {
            let buffer = Arc::new(EnvelopeBuffer::new());
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let buffer = Arc::clone(&buffer);
                    thread::spawn(move || {
                        for seq in 0..256u32 {
                            buffer.append(Envelope::new(seq.to_be_bytes().to_vec(), Default::default()));
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().expect("append thread");
            }
            black_box(buffer.swap())
        });
    });
}

fn bench_flush(c: &mut Criterion) {
    c.bench_function("flush_burst_of_1000", |b| {
        b.iter_batched(
            || {
                let buffer = Arc::new(EnvelopeBuffer::new());
                for seq in 0..1_000u32 {
                    buffer.append(Envelope::new(seq.to_be_bytes().to_vec(), Default::default()));
                }
                FlushScheduler::new(
                    FlushPolicy::new(100, Duration::from_secs(60)),
                    buffer,
                    Arc::new(DiscardSink),
                    Arc::new(SourceCounter::new("bench")),
                    Arc::new(MockClock::new()),
                )
            },
            |scheduler| black_box(scheduler.process()),
            BatchSize::SmallInput,
        );
    });
}

fn main() {
    let mut quick_mode = false;
    for arg in env::args().skip(1) {
        if arg == "--quick" {
            quick_mode = true;
        }
    }

    let mut criterion = Criterion::default();
    if quick_mode {
        criterion = criterion
            .sample_size(10)
            .warm_up_time(Duration::from_millis(100))
            .measurement_time(Duration::from_millis(250));
    }

    bench_ingest(&mut criterion);
    bench_flush(&mut criterion);
    criterion.final_summary();
}
