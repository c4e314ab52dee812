//! Translation throughput benchmarks
//!
//! Measures the bytecode-to-IR pass over synthetic bodies shaped like the
//! hot cases: straight-line arithmetic, branchy control flow, call-heavy
//! code and extracted loop bodies.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use quill_jit::bytecode::{ConstValue, FunctionBody, FunctionBodyBuilder, Opcode};
use quill_jit::func::{CompileConfig, RejitController, WorkItem};
use quill_jit::profile::ProfileSnapshot;

fn straight_line_body(len: usize) -> FunctionBody {
    let mut b = FunctionBodyBuilder::new("straight")
        .consts(vec![ConstValue::Int(1)])
        .params(2)
        .locals(1)
        .temps(2);
    let c0 = b.const_reg(0);
    let p0 = b.param_reg(0);
    let p1 = b.param_reg(1);
    let l0 = b.local_reg(0);
    let t0 = b.temp_reg(0);
    let t1 = b.temp_reg(1);
    for _ in 0..len {
        b.emit_bin(Opcode::Add, t0, p0, p1);
        b.emit_bin(Opcode::Mul, t1, t0, c0);
        b.emit_mov(l0, t1);
    }
    b.emit_ret(l0);
    b.build()
}

fn branchy_body(blocks: usize) -> FunctionBody {
    let mut b = FunctionBodyBuilder::new("branchy").params(1).locals(1).temps(1);
    let p0 = b.param_reg(0);
    let l0 = b.local_reg(0);
    let t0 = b.temp_reg(0);
    b.emit_mov(l0, p0);
    for _ in 0..blocks {
        let skip = b.emit_br_false(p0);
        b.emit_bin(Opcode::Add, t0, l0, p0);
        b.emit_mov(l0, t0);
        b.patch_here(skip);
    }
    b.emit_ret(l0);
    b.build()
}

fn call_heavy_body(calls: usize) -> FunctionBody {
    let mut b = FunctionBodyBuilder::new("calls").params(2).temps(1);
    let callee = b.param_reg(0);
    let arg = b.param_reg(1);
    let t0 = b.temp_reg(0);
    for _ in 0..calls {
        b.emit_start_call(1);
        b.emit_arg_out(0, arg);
        let site = b.site();
        b.emit_call(t0, callee, 1, site);
    }
    b.emit_ret(t0);
    b.build()
}

fn loop_heavy_body() -> (FunctionBody, u16) {
    let mut b = FunctionBodyBuilder::new("hot-loop")
        .consts(vec![ConstValue::Int(0)])
        .params(2)
        .locals(4)
        .temps(2);
    let c0 = b.const_reg(0);
    let p0 = b.param_reg(0);
    let p1 = b.param_reg(1);
    let locals: Vec<_> = (0u16..4).map(|i| b.local_reg(i)).collect();
    let t0 = b.temp_reg(0);
    for &l in &locals {
        b.emit_mov(l, c0);
    }
    let loop_num = b.begin_loop();
    let top = b.offset();
    for &l in &locals {
        b.emit_bin(Opcode::Add, t0, l, p1);
        b.emit_mov(l, t0);
    }
    let out = b.emit_br_false(p0);
    b.emit_br_to(top);
    b.end_loop();
    b.patch_here(out);
    b.emit_ret(locals[0]);
    (b.build(), loop_num)
}

fn bench_translate(c: &mut Criterion) {
    let mut group = c.benchmark_group("translate");

    let body = straight_line_body(200);
    let profile = ProfileSnapshot::warm(0, 0);
    group.bench_function("straight_line_600", |bench| {
        bench.iter(|| {
            let controller = RejitController::new(
                black_box(&body),
                &profile,
                WorkItem::Function,
                CompileConfig::default(),
            );
            controller.compile().unwrap()
        })
    });

    let body = branchy_body(100);
    let profile = ProfileSnapshot::warm(0, 0);
    group.bench_function("branchy_100", |bench| {
        bench.iter(|| {
            let controller = RejitController::new(
                black_box(&body),
                &profile,
                WorkItem::Function,
                CompileConfig::default(),
            );
            controller.compile().unwrap()
        })
    });

    let body = call_heavy_body(100);
    let profile = ProfileSnapshot::warm(100, 0);
    group.bench_function("call_heavy_100", |bench| {
        bench.iter(|| {
            let controller = RejitController::new(
                black_box(&body),
                &profile,
                WorkItem::Function,
                CompileConfig::default(),
            );
            controller.compile().unwrap()
        })
    });

    let (body, loop_num) = loop_heavy_body();
    let profile = ProfileSnapshot::warm(0, 1);
    group.bench_function("loop_body_unit", |bench| {
        bench.iter(|| {
            let controller = RejitController::new(
                black_box(&body),
                &profile,
                WorkItem::LoopBody { loop_num },
                CompileConfig::default(),
            );
            controller.compile().unwrap()
        })
    });

    group.finish();
}

criterion_group!(benches, bench_translate);
criterion_main!(benches);
