//! End-to-end pipeline tests through the public controller API

use quill_jit::bytecode::{ConstValue, FunctionBodyBuilder, Opcode};
use quill_jit::func::{
    CancelToken, CompileConfig, CompileError, FatalError, FuncRecord, Phase, PhaseExit,
    RejitController, WorkItem,
};
use quill_jit::ir::{InstrKind, OpCode};
use quill_jit::profile::{ProfileSnapshot, RejitReason};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Phase that demands a rejit until its optimization is disabled
struct RejitUntilDisabled {
    reason: RejitReason,
}

impl Phase for RejitUntilDisabled {
    fn name(&self) -> &'static str {
        "rejit-until-disabled"
    }

    fn run(&mut self, func: &mut FuncRecord<'_>) -> Result<(), PhaseExit> {
        if func.profile().disabled().is_disabled(self.reason) {
            Ok(())
        } else {
            Err(PhaseExit::Rejit(self.reason))
        }
    }
}

/// Phase that demands the same rejit unconditionally, even once disabled
struct RejitAlways {
    reason: RejitReason,
}

impl Phase for RejitAlways {
    fn name(&self) -> &'static str {
        "rejit-always"
    }

    fn run(&mut self, _func: &mut FuncRecord<'_>) -> Result<(), PhaseExit> {
        Err(PhaseExit::Rejit(self.reason))
    }
}

/// Phase that cancels its own attempt's token and keeps going
struct CancelSelf {
    token: CancelToken,
}

impl Phase for CancelSelf {
    fn name(&self) -> &'static str {
        "cancel-self"
    }

    fn run(&mut self, _func: &mut FuncRecord<'_>) -> Result<(), PhaseExit> {
        self.token.cancel();
        Ok(())
    }
}

fn if_else_body() -> quill_jit::bytecode::FunctionBody {
    // if (p0) l0 = c0 else l0 = c1; return l0
    let mut b = FunctionBodyBuilder::new("pick")
        .consts(vec![ConstValue::Int(1), ConstValue::Int(2)])
        .params(1)
        .locals(1)
        .temps(0);
    let c0 = b.const_reg(0);
    let c1 = b.const_reg(1);
    let p0 = b.param_reg(0);
    let l0 = b.local_reg(0);
    let to_else = b.emit_br_false(p0);
    b.emit_mov(l0, c0);
    let to_join = b.emit_br();
    b.patch_here(to_else);
    b.emit_mov(l0, c1);
    b.patch_here(to_join);
    b.emit_ret(l0);
    b.build()
}

#[test]
fn if_else_compiles_with_shared_join_label() {
    init_tracing();
    let body = if_else_body();
    let profile = ProfileSnapshot::warm(0, 0);

    let unit = RejitController::new(&body, &profile, WorkItem::Function, CompileConfig::default())
        .compile()
        .unwrap();

    // Two labels: else entry and the join both branches reach.
    let labels = unit
        .ir
        .iter()
        .filter(|i| matches!(i.kind, InstrKind::Label { .. }))
        .count();
    assert_eq!(labels, 2);
    let unresolved = unit
        .ir
        .iter()
        .filter(|i| matches!(i.kind, InstrKind::Branch { target: None }))
        .count();
    assert_eq!(unresolved, 0);
    assert!(unit.summary.is_leaf);
    assert_eq!(unit.name, "pick");
}

#[test]
fn loop_with_break_and_try_region() {
    init_tracing();
    // while (p0) { try { l0 = l0 + p0 } catch { break } } return l0
    let mut b = FunctionBodyBuilder::new("sum")
        .consts(vec![ConstValue::Int(0)])
        .params(1)
        .locals(1)
        .temps(0);
    let c0 = b.const_reg(0);
    let p0 = b.param_reg(0);
    let l0 = b.local_reg(0);
    b.emit_mov(l0, c0);
    b.begin_loop();
    let top = b.offset();
    let out = b.emit_br_false(p0);
    let handler = b.emit_try_begin();
    b.emit_bin(Opcode::Add, l0, l0, p0);
    b.emit_try_end();
    b.emit_br_to(top);
    b.end_loop();
    let after_loop = b.offset();
    b.patch(out, after_loop);
    b.patch(handler, after_loop);
    b.emit_ret(l0);
    let body = b.build();
    let profile = ProfileSnapshot::warm(0, 1);

    let unit = RejitController::new(&body, &profile, WorkItem::Function, CompileConfig::default())
        .compile()
        .unwrap();

    assert!(unit.summary.has_exception_regions);
    let loop_tops = unit.ir.iter().filter(|i| i.is_loop_top_label()).count();
    assert_eq!(loop_tops, 1);
    // The break edge and the handler edge converge on one label.
    let labels = unit
        .ir
        .iter()
        .filter(|i| matches!(i.kind, InstrKind::Label { .. }))
        .count();
    assert_eq!(labels, 2);
}

#[test]
fn loop_body_unit_compiles_standalone() {
    init_tracing();
    let mut b = FunctionBodyBuilder::new("hot")
        .consts(vec![ConstValue::Int(0)])
        .params(1)
        .locals(1)
        .temps(0);
    let c0 = b.const_reg(0);
    let p0 = b.param_reg(0);
    let l0 = b.local_reg(0);
    b.emit_mov(l0, c0);
    let loop_num = b.begin_loop();
    let top = b.offset();
    b.emit_bin(Opcode::Add, l0, l0, p0);
    let out = b.emit_br_false(p0);
    b.emit_br_to(top);
    b.end_loop();
    b.patch_here(out);
    b.emit_ret(l0);
    let body = b.build();
    let profile = ProfileSnapshot::warm(0, 1);

    let unit = RejitController::new(
        &body,
        &profile,
        WorkItem::LoopBody { loop_num },
        CompileConfig::default(),
    )
    .compile()
    .unwrap();

    // One return: the unit's own, carrying the interpreter resume offset.
    let rets = unit.ir.iter().filter(|i| i.opcode == OpCode::Ret).count();
    assert_eq!(rets, 1);
    let restores = unit
        .ir
        .iter()
        .filter(|i| i.opcode == OpCode::StFrameSlot)
        .count();
    assert_eq!(restores, 1);
}

#[test]
fn rejit_retries_are_bounded_by_the_reason_set() {
    init_tracing();
    let body = if_else_body();
    let profile = ProfileSnapshot::warm(0, 0);

    let mut phases: Vec<Box<dyn Phase>> = vec![
        Box::new(RejitUntilDisabled {
            reason: RejitReason::InlineApply,
        }),
        Box::new(RejitUntilDisabled {
            reason: RejitReason::SwitchOpt,
        }),
    ];
    let unit = RejitController::new(&body, &profile, WorkItem::Function, CompileConfig::default())
        .compile_with_phases(&mut phases)
        .unwrap();

    assert_eq!(unit.name, "pick");
    assert_eq!(profile.disabled().disabled_count(), 2);
    assert!(profile.disabled().is_disabled(RejitReason::InlineApply));
    assert!(profile.disabled().is_disabled(RejitReason::SwitchOpt));
}

#[test]
fn repeated_rejit_reason_is_fatal() {
    let body = if_else_body();
    let profile = ProfileSnapshot::warm(0, 0);

    let mut phases: Vec<Box<dyn Phase>> = vec![Box::new(RejitAlways {
        reason: RejitReason::TrackIntOverflow,
    })];
    let err = RejitController::new(&body, &profile, WorkItem::Function, CompileConfig::default())
        .compile_with_phases(&mut phases)
        .unwrap_err();

    assert_eq!(
        err,
        CompileError::Fatal(FatalError::RejitReasonRepeated(
            RejitReason::TrackIntOverflow
        ))
    );
}

#[test]
fn disabled_optimizations_stick_across_compiles() {
    let body = if_else_body();
    let profile = ProfileSnapshot::warm(0, 0);

    let mut phases: Vec<Box<dyn Phase>> = vec![Box::new(RejitUntilDisabled {
        reason: RejitReason::InlineApply,
    })];
    RejitController::new(&body, &profile, WorkItem::Function, CompileConfig::default())
        .compile_with_phases(&mut phases)
        .unwrap();
    assert_eq!(profile.disabled().disabled_count(), 1);

    // A later compile of the same function sees the flag already set and
    // never re-fires the rejit.
    let mut phases: Vec<Box<dyn Phase>> = vec![Box::new(RejitUntilDisabled {
        reason: RejitReason::InlineApply,
    })];
    RejitController::new(&body, &profile, WorkItem::Function, CompileConfig::default())
        .compile_with_phases(&mut phases)
        .unwrap();
    assert_eq!(profile.disabled().disabled_count(), 1);
}

#[test]
fn cancelled_background_compile_aborts() {
    let body = if_else_body();
    let profile = ProfileSnapshot::warm(0, 0);

    let token = CancelToken::new();
    token.cancel();
    let err = RejitController::new(
        &body,
        &profile,
        WorkItem::Function,
        CompileConfig {
            background: true,
            ..CompileConfig::default()
        },
    )
    .with_cancel(token)
    .compile()
    .unwrap_err();
    assert_eq!(err, CompileError::Aborted);
}

#[test]
fn cancellation_mid_pipeline_aborts_at_the_next_boundary() {
    let body = if_else_body();
    let profile = ProfileSnapshot::warm(0, 0);

    let token = CancelToken::new();
    let mut phases: Vec<Box<dyn Phase>> = vec![Box::new(CancelSelf {
        token: token.clone(),
    })];
    let err = RejitController::new(&body, &profile, WorkItem::Function, CompileConfig::default())
        .with_cancel(token)
        .compile_with_phases(&mut phases)
        .unwrap_err();
    assert_eq!(err, CompileError::Aborted);
}

#[test]
fn producer_bug_surfaces_as_fatal() {
    // A call whose declared argument count disagrees with its chain.
    let mut b = FunctionBodyBuilder::new("bad").params(1).temps(1);
    let p0 = b.param_reg(0);
    let t0 = b.temp_reg(0);
    b.emit_start_call(2);
    b.emit_arg_out(0, p0);
    let site = b.site();
    b.emit_call(t0, p0, 1, site);
    b.emit_ret(t0);
    let body = b.build();
    let profile = ProfileSnapshot::warm(1, 0);

    let err = RejitController::new(&body, &profile, WorkItem::Function, CompileConfig::default())
        .compile()
        .unwrap_err();
    assert!(matches!(
        err,
        CompileError::Fatal(FatalError::ArgCountMismatch { declared: 2, .. })
    ));
}

#[test]
fn dangling_argument_chain_surfaces_as_fatal() {
    // An opened chain the stream never consumes with a call.
    let mut b = FunctionBodyBuilder::new("open").params(1).temps(0);
    let p0 = b.param_reg(0);
    b.emit_start_call(1);
    b.emit_arg_out(0, p0);
    b.emit_ret(p0);
    let body = b.build();
    let profile = ProfileSnapshot::warm(0, 0);

    let err = RejitController::new(&body, &profile, WorkItem::Function, CompileConfig::default())
        .compile()
        .unwrap_err();
    assert_eq!(
        err,
        CompileError::Fatal(FatalError::UnterminatedArgChain { offset: 0 })
    );
}

#[test]
fn inlined_fragment_compiles_with_disjoint_symbol_ids() {
    let mut b = FunctionBodyBuilder::new("inlinee").params(2).temps(1);
    let p0 = b.param_reg(0);
    let p1 = b.param_reg(1);
    let t0 = b.temp_reg(0);
    b.emit_bin(Opcode::Add, t0, p0, p1);
    b.emit_ret(t0);
    let body = b.build();
    let profile = ProfileSnapshot::warm(0, 0);

    let floor = 64;
    let unit = RejitController::new(
        &body,
        &profile,
        WorkItem::InlinedCall {
            depth: 1,
            resume_offset: 40,
            result_reg: Some(t0),
            sym_id_floor: floor,
        },
        CompileConfig::default(),
    )
    .compile()
    .unwrap();

    // Named registers keep their register-index ids; everything minted
    // here lands at or above the floor handed down from the caller.
    for sym in unit.syms.iter() {
        let id = sym.id().0;
        assert!(id < body.reg_count() as u32 || id >= floor);
    }
    let add = unit
        .ir
        .iter()
        .find(|i| i.opcode == OpCode::Add)
        .expect("no add");
    assert!(add.dst_sym().unwrap().0 >= floor);
}

#[test]
fn generator_compiles_through_controller() {
    let mut b = FunctionBodyBuilder::new("gen").params(1).temps(0).generator();
    let p0 = b.param_reg(0);
    b.emit_yield(p0);
    b.emit_ret(p0);
    let body = b.build();
    let profile = ProfileSnapshot::warm(0, 0);

    let unit = RejitController::new(&body, &profile, WorkItem::Function, CompileConfig::default())
        .compile()
        .unwrap();
    let resumes = unit
        .ir
        .iter()
        .filter(|i| i.opcode == OpCode::LdResumePoint)
        .count();
    assert_eq!(resumes, 1);
}
