//! End-to-end transaction benchmarks against an in-process responder.

use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use irm_client::{Session, Worker, WorkerConfig, WorkerPool};
use irm_protocol::IrmHeader;
use std::sync::Arc;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::runtime::Runtime;

const POOL_REQUESTS: usize = 200;

fn declared(buf: &[u8]) -> usize {
    u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize
}

/// Answers every request frame with one 80 byte data segment.
async fn responder(mut stream: DuplexStream) {
    let mut reply = 88u32.to_be_bytes().to_vec();
    reply.extend_from_slice(&84u16.to_be_bytes());
    reply.extend_from_slice(&0u16.to_be_bytes());
    reply.extend_from_slice(&[b'R'; 80]);

    let mut buf = BytesMut::new();
    loop {
        while buf.len() < 4 || buf.len() < declared(&buf) {
            match stream.read_buf(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
        }
        let total = declared(&buf);
        let _ = buf.split_to(total);
        if stream.write_all(&reply).await.is_err() {
            return;
        }
    }
}

fn open_session() -> Session<DuplexStream> {
    let (client, server) = duplex(64 * 1024);
    tokio::spawn(responder(server));
    Session::new(client, "bench")
}

fn template() -> Arc<IrmHeader> {
    Arc::new(IrmHeader::new().with_client_id("BENCH").unwrap())
}

fn bench_transact_latency(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut worker = rt.block_on(async {
        Worker::new(0, template(), open_session(), WorkerConfig::default()).unwrap()
    });

    let mut group = c.benchmark_group("e2e_transact");
    group.throughput(Throughput::Elements(1));
    group.bench_function("single_session", |b| {
        b.iter(|| {
            black_box(rt.block_on(worker.transact("IVTNO DISPLAY LAST1")).unwrap())
        });
    });
    group.finish();
}

fn bench_pool_throughput(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("e2e_pool");
    group.throughput(Throughput::Elements(POOL_REQUESTS as u64));
    for sessions in [1usize, 4, 16] {
        group.bench_function(format!("sessions_{}", sessions), |b| {
            b.to_async(&rt).iter(|| async move {
                let opened = (1..=sessions).map(|n| (n, open_session())).collect();
                let mut pool =
                    WorkerPool::from_sessions(opened, template(), WorkerConfig::default(), 64)
                        .unwrap();
                let sender = pool.sender().unwrap();
                let feeder = tokio::spawn(async move {
                    for i in 0..POOL_REQUESTS {
                        sender.send(format!("IVTNO PING {}", i)).await.unwrap();
                    }
                });
                pool.close();
                for _ in 0..POOL_REQUESTS {
                    black_box(pool.next_response().await.unwrap());
                }
                feeder.await.unwrap();
                pool.join().await;
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_transact_latency, bench_pool_throughput);
criterion_main!(benches);
