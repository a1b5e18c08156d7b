use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use ua_nodestore::{Node, NodeHeader, NodeId, ObjectAttributes, Store};

fn object(id: NodeId) -> Node {
    Node::Object(
        NodeHeader::new("Obj").with_id(id),
        ObjectAttributes { event_notifier: 0 },
    )
}

fn criterion_benchmark(c: &mut Criterion) {
    let _ = env_logger::try_init();

    {
        let mut group = c.benchmark_group("insert");
        group.bench_function("distinct ids", |b| {
            let store = Store::new();
            let mut next = 0u32;
            b.iter_batched(
                || {
                    next += 1;
                    object(NodeId::numeric(3, next))
                },
                |node| store.insert(black_box(node), false).unwrap(),
                BatchSize::SmallInput,
            );
        });
        group.bench_function("auto id", |b| {
            let store = Store::new();
            b.iter_batched(
                || {
                    let mut header = NodeHeader::new("Obj");
                    header.node_id = None;
                    Node::Object(header, ObjectAttributes { event_notifier: 0 })
                },
                |node| store.insert(black_box(node), false).unwrap(),
                BatchSize::SmallInput,
            );
        });
    }

    {
        let mut group = c.benchmark_group("get");
        const N: u32 = 10_000;
        let store = Store::new();
        for i in 0..N {
            store
                .insert(object(NodeId::numeric(3, i)), false)
                .unwrap();
        }
        group.bench_function("present", |b| {
            let mut i = 0u32;
            b.iter(|| {
                i = (i + 1) % N;
                black_box(store.get(&NodeId::numeric(3, i)))
            });
        });
        group.bench_function("absent", |b| {
            b.iter(|| black_box(store.get(&NodeId::numeric(3, N + 1))));
        });
    }

    {
        let mut group = c.benchmark_group("remove");
        group.bench_function("present", |b| {
            let store = Store::new();
            let mut next = 0u32;
            b.iter_batched(
                || {
                    next += 1;
                    let id = NodeId::numeric(3, next);
                    store.insert(object(id.clone()), false).unwrap();
                    id
                },
                |id| store.remove(black_box(&id)).unwrap(),
                BatchSize::SmallInput,
            );
        });
    }

    {
        let mut group = c.benchmark_group("iterate");
        const N: u32 = 10_000;
        let store = Store::new();
        for i in 0..N {
            store
                .insert(object(NodeId::numeric(3, i)), false)
                .unwrap();
        }
        group.bench_function("snapshot all", |b| {
            b.iter(|| {
                for entry in store.iterate() {
                    black_box(entry.node_class());
                }
            });
        });
    }

    {
        use std::sync::Arc;
        use std::thread;

        let mut group = c.benchmark_group("concurrent get");
        const READERS: usize = 4;
        const N: u32 = 10_000;
        let store = Arc::new(Store::new());
        for i in 0..N {
            store
                .insert(object(NodeId::numeric(3, i)), false)
                .unwrap();
        }
        group.bench_function("readers contend on no locks", |b| {
            b.iter(|| {
                let handles: Vec<_> = (0..READERS)
                    .map(|r| {
                        let store = Arc::clone(&store);
                        thread::spawn(move || {
                            for i in 0..N {
                                black_box(store.get(&NodeId::numeric(3, (i + r as u32) % N)));
                            }
                        })
                    })
                    .collect();
                for h in handles {
                    h.join().unwrap();
                }
            });
        });
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
