use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use loam_core::{
    BindSource, DefaultValueProvider, Engine, ExecutionState, Group, GroupRef, GroupRegistry,
    Instruction, NullResolver, Op, Val,
};

fn s(x: &str) -> Arc<str> {
    Arc::from(x)
}

// Sums F(1)..F(n); for n = 44 the accumulator ends at F(46) - 1.
fn fib_group(n: i32) -> GroupRef {
    let ops = vec![
        Op::BindStack { identifier: s("acc"), source: BindSource::Value(Val::Int(0)) },
        Op::BindStack { identifier: s("a"), source: BindSource::Value(Val::Int(0)) },
        Op::BindStack { identifier: s("b"), source: BindSource::Value(Val::Int(1)) },
        Op::BindStack { identifier: s("i"), source: BindSource::Value(Val::Int(0)) },
        Op::BindStack { identifier: s("n"), source: BindSource::Value(Val::Int(n)) },
        Op::BindStack { identifier: s("t"), source: BindSource::Value(Val::Int(0)) },
        Op::LoopBegin,
        Op::LoadStack { identifier: s("i") },
        Op::LoadStack { identifier: s("n") },
        Op::Lt,
        Op::JumpIfNot { target: 33 },
        Op::LoadStack { identifier: s("acc") },
        Op::LoadStack { identifier: s("acc") },
        Op::LoadStack { identifier: s("b") },
        Op::Add,
        Op::Assign,
        Op::LoadStack { identifier: s("t") },
        Op::LoadStack { identifier: s("a") },
        Op::LoadStack { identifier: s("b") },
        Op::Add,
        Op::Assign,
        Op::LoadStack { identifier: s("a") },
        Op::LoadStack { identifier: s("b") },
        Op::Assign,
        Op::LoadStack { identifier: s("b") },
        Op::LoadStack { identifier: s("t") },
        Op::Assign,
        Op::LoadStack { identifier: s("i") },
        Op::LoadStack { identifier: s("i") },
        Op::PushValue { value: Val::Int(1) },
        Op::Add,
        Op::Assign,
        Op::LoopEnd { target: 6 },
        Op::LoadStack { identifier: s("acc") },
        Op::Halt,
    ];
    Group::new("fib", ops.into_iter().map(Instruction::new).collect())
}

fn bench_fib(c: &mut Criterion) {
    let provider = DefaultValueProvider;
    let resolver = NullResolver;
    let registry = GroupRegistry::new();
    let group = fib_group(44);

    c.bench_function("fib_sum_44", |b| {
        b.iter(|| {
            let mut state = ExecutionState::new(black_box(group.clone()));
            Engine::new(&provider, &resolver, &registry)
                .run(&mut state)
                .unwrap();
            state
        })
    });
}

criterion_group!(benches, bench_fib);
criterion_main!(benches);
