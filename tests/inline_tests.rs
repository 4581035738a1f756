//! Integration tests for forward and reverse compute-inline.

use tensched::analysis::verify;
use tensched::ir::{AccessMode, BufferRegion, Range};
use tensched::prelude::*;
use tensched::{forward_inline, reverse_inline};

fn v(name: &str) -> Expr {
    Expr::var(name)
}

fn block_2d(name: &str, out: &str, value: Expr) -> Stmt {
    grid(
        &[("i", 128), ("j", 128)],
        BlockBuilder::new(name)
            .spatial("vi", 128, v("i"))
            .spatial("vj", 128, v("j"))
            .store(out, vec![v("vi"), v("vj")], value)
            .into_stmt(),
    )
}

/// Like `block_2d`, storing at `indices`.
fn block_2d_at(name: &str, out: &str, indices: Vec<Expr>, value: Expr) -> Stmt {
    grid(
        &[("i", 128), ("j", 128)],
        BlockBuilder::new(name)
            .spatial("vi", 128, v("i"))
            .spatial("vj", 128, v("j"))
            .store(out, indices, value)
            .into_stmt(),
    )
}

fn ld(buffer: &str) -> Expr {
    Expr::load(buffer, vec![v("vi"), v("vj")])
}

/// B = A * 2; C = B + 1
fn elementwise() -> Function {
    FunctionBuilder::new("main")
        .param(Buffer::param("A", &[128, 128], DataType::Float32))
        .param(Buffer::param("C", &[128, 128], DataType::Float32))
        .alloc(Buffer::alloc("B", &[128, 128], DataType::Float32))
        .stmt(block_2d("B", "B", ld("A") * 2.0))
        .stmt(block_2d("C", "C", ld("B") + 1.0))
        .build()
}

fn assert_unchanged_on_error(func: &Function, block: &str, reverse: bool, kind: ScheduleErrorKind) {
    let mut sch = Schedule::new(func);
    let rv = sch.get_block(block).expect("block exists");
    let before = sch.func();
    let trace_len = sch.trace().len();
    let run = |sch: &mut Schedule| {
        if reverse {
            reverse_inline(sch, rv)
        } else {
            forward_inline(sch, rv)
        }
    };
    let first = run(&mut sch).expect_err("inline should fail");
    assert_eq!(first.kind, kind, "unexpected error: {}", first);
    assert_eq!(sch.func(), before);
    assert_eq!(sch.trace().len(), trace_len);
    let second = run(&mut sch).expect_err("inline should fail again");
    assert_eq!(first, second);
}

fn assert_replays(sch: &Schedule, func: &Function) {
    let mut replayed = Schedule::new(func);
    sch.trace()
        .simplified()
        .apply_to_schedule(&mut replayed)
        .expect("trace replays");
    assert_eq!(replayed.func(), sch.func());
}

#[test]
fn test_compute_inline_elementwise() {
    let func = elementwise();
    let mut sch = Schedule::new(&func);
    let b = sch.get_block("B").unwrap();
    forward_inline(&mut sch, b).expect("inline B");

    let err = sch.get_block("B").unwrap_err();
    assert_eq!(err.kind, ScheduleErrorKind::NotFound);
    assert!(!sch.contains(b));

    let result = sch.func();
    assert_eq!(result.block_names(), vec!["C", "root"]);
    assert!(result.root.alloc_buffers.is_empty());
    let c = sch.get_block("C").unwrap();
    let (_, _, value) = sch.state().block(c.handle()).unwrap().single_store().unwrap();
    assert_eq!(value.to_string(), "A[vi, vj] * 2.0 + 1.0");
    verify(sch.state()).expect("verified");
    assert_replays(&sch, &func);
}

#[test]
fn test_compute_inline_stale_handle() {
    let mut sch = Schedule::new(&elementwise());
    let b = sch.get_block("B").unwrap();
    forward_inline(&mut sch, b).unwrap();
    let err = forward_inline(&mut sch, b).unwrap_err();
    assert_eq!(err.kind, ScheduleErrorKind::StaleHandle);
    assert_eq!(err.category(), ErrorCategory::Identity);
}

#[test]
fn test_compute_inline_under_loop() {
    let func = FunctionBuilder::new("main")
        .param(Buffer::param("A", &[128, 128], DataType::Float32))
        .param(Buffer::param("C", &[128, 128], DataType::Float32))
        .alloc(Buffer::alloc("B", &[128, 128], DataType::Float32))
        .stmt(grid(
            &[("i", 128)],
            Stmt::seq(vec![
                grid(
                    &[("j", 128)],
                    BlockBuilder::new("B")
                        .spatial("vi", 128, v("i"))
                        .spatial("vj", 128, v("j"))
                        .store("B", vec![v("vi"), v("vj")], ld("A") * 2.0)
                        .into_stmt(),
                ),
                grid(
                    &[("j", 128)],
                    BlockBuilder::new("C")
                        .spatial("vi", 128, v("i"))
                        .spatial("vj", 128, v("j"))
                        .store("C", vec![v("vi"), v("vj")], ld("B") + 1.0)
                        .into_stmt(),
                ),
            ]),
        ))
        .build();
    let mut sch = Schedule::new(&func);
    let b = sch.get_block("B").unwrap();
    forward_inline(&mut sch, b).unwrap();
    let text = sch.func().to_string();
    assert_eq!(text.matches("for ").count(), 2, "{}", text);
    assert!(!text.contains("B["), "{}", text);
    assert_replays(&sch, &func);
}

#[test]
fn test_compute_inline_as_dce() {
    let func = FunctionBuilder::new("main")
        .param(Buffer::param("A", &[128, 128], DataType::Float32))
        .param(Buffer::param("C", &[128, 128], DataType::Float32))
        .alloc(Buffer::alloc("B", &[128, 128], DataType::Float32))
        .stmt(block_2d("B", "B", ld("A") * 2.0))
        .stmt(block_2d("C", "C", ld("A") + 1.0))
        .build();
    let mut sch = Schedule::new(&func);
    let b = sch.get_block("B").unwrap();
    forward_inline(&mut sch, b).unwrap();
    let expected = FunctionBuilder::new("main")
        .param(Buffer::param("A", &[128, 128], DataType::Float32))
        .param(Buffer::param("C", &[128, 128], DataType::Float32))
        .stmt(block_2d("C", "C", ld("A") + 1.0))
        .build();
    assert_eq!(sch.func(), expected);
}

#[test]
fn test_compute_inline_multi_consumer() {
    let func = FunctionBuilder::new("main")
        .param(Buffer::param("A", &[128, 128], DataType::Float32))
        .param(Buffer::param("C", &[128, 128], DataType::Float32))
        .param(Buffer::param("D", &[128, 128], DataType::Float32))
        .alloc(Buffer::alloc("B", &[128, 128], DataType::Float32))
        .stmt(block_2d("B", "B", ld("A") * 2.0))
        .stmt(block_2d("C", "C", ld("B") + 1.0))
        .stmt(block_2d("D", "D", ld("B") + ld("C")))
        .build();
    let mut sch = Schedule::new(&func);
    let b = sch.get_block("B").unwrap();
    forward_inline(&mut sch, b).unwrap();
    let text = sch.func().to_string();
    assert!(text.contains("C[vi, vj] = A[vi, vj] * 2.0 + 1.0"), "{}", text);
    assert!(text.contains("D[vi, vj] = A[vi, vj] * 2.0 + C[vi, vj]"), "{}", text);
    verify(sch.state()).unwrap();
    assert_replays(&sch, &func);
}

#[test]
fn test_compute_inline_offset_load() {
    let func = FunctionBuilder::new("main")
        .param(Buffer::param("A", &[17], DataType::Float32))
        .param(Buffer::param("C", &[16], DataType::Float32))
        .alloc(Buffer::alloc("B", &[17], DataType::Float32))
        .stmt(grid(
            &[("i", 17)],
            BlockBuilder::new("B")
                .spatial("vi", 17, v("i"))
                .store("B", vec![v("vi")], Expr::load("A", vec![v("vi")]) * 2.0)
                .into_stmt(),
        ))
        .stmt(grid(
            &[("i", 16)],
            BlockBuilder::new("C")
                .spatial("vi", 16, v("i"))
                .store("C", vec![v("vi")], Expr::load("B", vec![v("vi") + 1i64]))
                .into_stmt(),
        ))
        .build();
    let mut sch = Schedule::new(&func);
    let b = sch.get_block("B").unwrap();
    forward_inline(&mut sch, b).unwrap();
    let c = sch.get_block("C").unwrap();
    let node = sch.state().block(c.handle()).unwrap();
    assert_eq!(node.single_store().unwrap().2.to_string(), "A[vi + 1] * 2.0");
    assert_eq!(node.reads, vec![BufferRegion::point("A", &[v("vi") + 1i64])]);
    verify(sch.state()).unwrap();
}

#[test]
fn test_compute_inline_several_offset_loads() {
    let func = FunctionBuilder::new("main")
        .param(Buffer::param("A", &[18], DataType::Float32))
        .param(Buffer::param("C", &[16], DataType::Float32))
        .alloc(Buffer::alloc("B", &[18], DataType::Float32))
        .stmt(grid(
            &[("i", 18)],
            BlockBuilder::new("B")
                .spatial("vi", 18, v("i"))
                .store("B", vec![v("vi")], Expr::load("A", vec![v("vi")]) * 2.0)
                .into_stmt(),
        ))
        .stmt(grid(
            &[("i", 16)],
            BlockBuilder::new("C")
                .spatial("vi", 16, v("i"))
                .store(
                    "C",
                    vec![v("vi")],
                    Expr::load("B", vec![v("vi")])
                        + Expr::load("B", vec![v("vi") + 1i64])
                        + Expr::load("B", vec![v("vi") + 2i64]),
                )
                .into_stmt(),
        ))
        .build();
    let mut sch = Schedule::new(&func);
    let b = sch.get_block("B").unwrap();
    forward_inline(&mut sch, b).unwrap();
    let c = sch.get_block("C").unwrap();
    let node = sch.state().block(c.handle()).unwrap();
    assert_eq!(
        node.single_store().unwrap().2.to_string(),
        "A[vi] * 2.0 + A[vi + 1] * 2.0 + A[vi + 2] * 2.0"
    );
    assert_eq!(
        node.reads,
        vec![
            BufferRegion::point("A", &[v("vi")]),
            BufferRegion::point("A", &[v("vi") + 1i64]),
            BufferRegion::point("A", &[v("vi") + 2i64]),
        ]
    );
    assert!(sch.func().root.alloc_buffers.is_empty());
    verify(sch.state()).unwrap();
    assert_replays(&sch, &func);
}

/// B = A * 2; C[vi] = B[vi] + 1 where B[index] < 0.5
fn predicated_consumer(index: Expr) -> Function {
    FunctionBuilder::new("main")
        .param(Buffer::param("A", &[16], DataType::Float32))
        .param(Buffer::param("C", &[16], DataType::Float32))
        .alloc(Buffer::alloc("B", &[16], DataType::Float32))
        .stmt(grid(
            &[("i", 16)],
            BlockBuilder::new("B")
                .spatial("vi", 16, v("i"))
                .store("B", vec![v("vi")], Expr::load("A", vec![v("vi")]) * 2.0)
                .into_stmt(),
        ))
        .stmt(grid(
            &[("i", 16)],
            BlockBuilder::new("C")
                .spatial("vi", 16, v("i"))
                .predicate(Expr::load("B", vec![index]).lt(0.5))
                .store("C", vec![v("vi")], Expr::load("B", vec![v("vi")]) + 1.0)
                .into_stmt(),
        ))
        .build()
}

#[test]
fn test_inline_predicate_load() {
    // predicate indexed by the loop variable
    let func = predicated_consumer(v("i"));
    let mut sch = Schedule::new(&func);
    let b = sch.get_block("B").unwrap();
    forward_inline(&mut sch, b).unwrap();
    let c = sch.get_block("C").unwrap();
    let node = sch.state().block(c.handle()).unwrap();
    assert_eq!(node.predicate.as_ref().unwrap().to_string(), "A[i] * 2.0 < 0.5");
    assert_eq!(node.single_store().unwrap().2.to_string(), "A[vi] * 2.0 + 1.0");
    assert_eq!(
        node.reads,
        vec![BufferRegion::point("A", &[v("i")]), BufferRegion::point("A", &[v("vi")])]
    );
    assert!(sch.func().root.alloc_buffers.is_empty());
    verify(sch.state()).unwrap();
    assert_replays(&sch, &func);

    let func = predicated_consumer(v("vi"));
    let mut sch = Schedule::new(&func);
    let c = sch.get_block("C").unwrap();
    reverse_inline(&mut sch, c).unwrap();
    let b = sch.get_block("B").unwrap();
    let node = sch.state().block(b.handle()).unwrap();
    assert_eq!(node.predicate.as_ref().unwrap().to_string(), "A[vi] * 2.0 < 0.5");
    assert_eq!(node.single_store().unwrap().2.to_string(), "A[vi] * 2.0 + 1.0");
    assert!(sch.func().root.alloc_buffers.is_empty());
    verify(sch.state()).unwrap();
    assert_replays(&sch, &func);
}

#[test]
fn test_compute_inline_nested_consumer() {
    // the block reading B sits inside another block
    let func = FunctionBuilder::new("main")
        .param(Buffer::param("A", &[16], DataType::Float32))
        .param(Buffer::param("C", &[16], DataType::Float32))
        .alloc(Buffer::alloc("B", &[16], DataType::Float32))
        .stmt(grid(
            &[("i", 16)],
            BlockBuilder::new("B")
                .spatial("vi", 16, v("i"))
                .store("B", vec![v("vi")], Expr::load("A", vec![v("vi")]) * 2.0)
                .into_stmt(),
        ))
        .stmt(
            BlockBuilder::new("outer")
                .reads(vec![BufferRegion::full(&Buffer::alloc("B", &[16], DataType::Float32))])
                .writes(vec![BufferRegion::full(&Buffer::param("C", &[16], DataType::Float32))])
                .stmt(grid(
                    &[("i", 16)],
                    BlockBuilder::new("C")
                        .spatial("vi", 16, v("i"))
                        .store("C", vec![v("vi")], Expr::load("B", vec![v("vi")]) + 1.0)
                        .into_stmt(),
                ))
                .into_stmt(),
        )
        .build();
    let mut sch = Schedule::new(&func);
    let b = sch.get_block("B").unwrap();
    forward_inline(&mut sch, b).unwrap();

    let c = sch.get_block("C").unwrap();
    let node = sch.state().block(c.handle()).unwrap();
    assert_eq!(node.reads, vec![BufferRegion::point("A", &[v("vi")])]);
    assert_eq!(node.single_store().unwrap().2.to_string(), "A[vi] * 2.0 + 1.0");
    let outer = sch.get_block("outer").unwrap();
    let reads = &sch.state().block(outer.handle()).unwrap().reads;
    assert_eq!(reads, &vec![BufferRegion::full(&Buffer::param("A", &[16], DataType::Float32))]);
    assert!(sch.func().root.alloc_buffers.is_empty());
    verify(sch.state()).unwrap();
    assert_replays(&sch, &func);
}

/// B = A * 2; C = B + 1, next to a block copying X to Y through pointers.
fn with_unrelated_copy(consumer: Stmt) -> Function {
    FunctionBuilder::new("main")
        .param(Buffer::param("A", &[16], DataType::Float32))
        .param(Buffer::param("C", &[16], DataType::Float32))
        .param(Buffer::param("X", &[16], DataType::Float32))
        .param(Buffer::param("Y", &[16], DataType::Float32))
        .alloc(Buffer::alloc("B", &[16], DataType::Float32))
        .stmt(grid(
            &[("i", 16)],
            BlockBuilder::new("B")
                .spatial("vi", 16, v("i"))
                .store("B", vec![v("vi")], Expr::load("A", vec![v("vi")]) * 2.0)
                .into_stmt(),
        ))
        .stmt(consumer)
        .stmt(
            BlockBuilder::new("copy")
                .reads(vec![BufferRegion::full(&Buffer::param("X", &[16], DataType::Float32))])
                .writes(vec![BufferRegion::full(&Buffer::param("Y", &[16], DataType::Float32))])
                .evaluate(Expr::call(
                    "memcpy",
                    vec![Expr::access_ptr("Y", AccessMode::Write), Expr::access_ptr("X", AccessMode::Read)],
                ))
                .into_stmt(),
        )
        .build()
}

#[test]
fn test_inline_beside_unrelated_opaque_access() {
    let plain = grid(
        &[("i", 16)],
        BlockBuilder::new("C")
            .spatial("vi", 16, v("i"))
            .store("C", vec![v("vi")], Expr::load("B", vec![v("vi")]) + 1.0)
            .into_stmt(),
    );
    let func = with_unrelated_copy(plain);
    let mut sch = Schedule::new(&func);
    let b = sch.get_block("B").unwrap();
    forward_inline(&mut sch, b).expect("pointers to X and Y do not block inlining B");
    verify(sch.state()).unwrap();
    assert_replays(&sch, &func);

    let mut sch = Schedule::new(&func);
    let c = sch.get_block("C").unwrap();
    reverse_inline(&mut sch, c).expect("pointers to X and Y do not block folding C");
    assert_eq!(sch.func().block_names(), vec!["B", "copy", "root"]);
    verify(sch.state()).unwrap();
    assert_replays(&sch, &func);

    // the consumer itself takes a pointer to X
    let prefetching = grid(
        &[("i", 16)],
        BlockBuilder::new("C")
            .spatial("vi", 16, v("i"))
            .reads(vec![
                BufferRegion::point("B", &[v("vi")]),
                BufferRegion::full(&Buffer::param("X", &[16], DataType::Float32)),
            ])
            .writes(vec![BufferRegion::point("C", &[v("vi")])])
            .store("C", vec![v("vi")], Expr::load("B", vec![v("vi")]) + 1.0)
            .evaluate(Expr::call("prefetch", vec![Expr::access_ptr("X", AccessMode::Read)]))
            .into_stmt(),
    );
    let func = with_unrelated_copy(prefetching);
    let mut sch = Schedule::new(&func);
    let b = sch.get_block("B").unwrap();
    forward_inline(&mut sch, b).unwrap();
    let c = sch.get_block("C").unwrap();
    let node = sch.state().block(c.handle()).unwrap();
    assert_eq!(
        node.reads,
        vec![
            BufferRegion::point("A", &[v("vi")]),
            BufferRegion::full(&Buffer::param("X", &[16], DataType::Float32)),
        ]
    );
    assert!(sch.func().to_string().contains("X.access_ptr(\"r\")"));
    assert!(sch.func().root.alloc_buffers.is_empty());
    verify(sch.state()).unwrap();
    assert_replays(&sch, &func);
}

#[test]
fn test_compute_inline_fail_multi_writer() {
    // one block writing two buffers
    let func = FunctionBuilder::new("main")
        .param(Buffer::param("A", &[128, 128], DataType::Float32))
        .param(Buffer::param("C", &[128, 128], DataType::Float32))
        .alloc(Buffer::alloc("B", &[128, 128], DataType::Float32))
        .alloc(Buffer::alloc("E", &[128, 128], DataType::Float32))
        .stmt(grid(
            &[("i", 128), ("j", 128)],
            BlockBuilder::new("B")
                .spatial("vi", 128, v("i"))
                .spatial("vj", 128, v("j"))
                .store("B", vec![v("vi"), v("vj")], ld("A") * 2.0)
                .store("E", vec![v("vi"), v("vj")], ld("A") * 3.0)
                .into_stmt(),
        ))
        .stmt(block_2d("C", "C", ld("B") + ld("E")))
        .build();
    assert_unchanged_on_error(&func, "B", false, ScheduleErrorKind::MultiWriter);

    // two blocks writing one buffer
    let func = FunctionBuilder::new("main")
        .param(Buffer::param("A", &[128, 128], DataType::Float32))
        .param(Buffer::param("C", &[128, 128], DataType::Float32))
        .alloc(Buffer::alloc("B", &[128, 128], DataType::Float32))
        .stmt(block_2d("B0", "B", ld("A") * 2.0))
        .stmt(block_2d("B1", "B", ld("A") * 3.0))
        .stmt(block_2d("C", "C", ld("B") + 1.0))
        .build();
    assert_unchanged_on_error(&func, "B0", false, ScheduleErrorKind::MultiWriter);
}

#[test]
fn test_compute_inline_fail_output_block() {
    assert_unchanged_on_error(&elementwise(), "C", false, ScheduleErrorKind::OutputBlock);
}

#[test]
fn test_compute_inline_fail_reduction() {
    let func = FunctionBuilder::new("main")
        .param(Buffer::param("A", &[64, 64], DataType::Float32))
        .param(Buffer::param("D", &[64], DataType::Float32))
        .alloc(Buffer::alloc("B", &[64], DataType::Float32))
        .stmt(grid(
            &[("i", 64), ("k", 64)],
            BlockBuilder::new("B")
                .spatial("vi", 64, v("i"))
                .reduce("vk", 64, v("k"))
                .init(Stmt::store("B", vec![v("vi")], Expr::float(0.0)))
                .store(
                    "B",
                    vec![v("vi")],
                    Expr::load("B", vec![v("vi")]) + Expr::load("A", vec![v("vi"), v("vk")]),
                )
                .into_stmt(),
        ))
        .stmt(grid(
            &[("i", 64)],
            BlockBuilder::new("D")
                .spatial("vi", 64, v("i"))
                .store("D", vec![v("vi")], Expr::load("B", vec![v("vi")]) * 0.5)
                .into_stmt(),
        ))
        .build();
    assert_unchanged_on_error(&func, "B", false, ScheduleErrorKind::ReductionInline);
}

#[test]
fn test_compute_inline_fail_opaque_access() {
    let func = FunctionBuilder::new("main")
        .param(Buffer::param("A", &[128, 128], DataType::Float32))
        .param(Buffer::param("C", &[128, 128], DataType::Float32))
        .alloc(Buffer::alloc("B", &[128, 128], DataType::Float32))
        .stmt(block_2d("B", "B", ld("A") * 2.0))
        .stmt(
            BlockBuilder::new("opaque")
                .reads(vec![BufferRegion::full(&Buffer::alloc("B", &[128, 128], DataType::Float32))])
                .writes(vec![BufferRegion::full(&Buffer::param("C", &[128, 128], DataType::Float32))])
                .evaluate(Expr::call(
                    "memcpy",
                    vec![Expr::access_ptr("C", AccessMode::Write), Expr::access_ptr("B", AccessMode::Read)],
                ))
                .into_stmt(),
        )
        .build();
    assert_unchanged_on_error(&func, "B", false, ScheduleErrorKind::OpaqueAccess);
}

#[test]
fn test_compute_inline_fail_buffer_alias() {
    let func = FunctionBuilder::new("main")
        .param(Buffer::param("A", &[128, 128], DataType::Float32))
        .param(Buffer::param("C", &[128, 128], DataType::Float32))
        .alloc(Buffer::alloc("B", &[128, 128], DataType::Float32))
        .stmt(block_2d("B", "B", ld("A") * 2.0))
        .stmt(grid(
            &[("i", 128)],
            BlockBuilder::new("C")
                .spatial("vi", 128, v("i"))
                .match_buffer(
                    Buffer::alloc("Brow", &[128], DataType::Float32),
                    BufferRegion::new(
                        "B",
                        vec![Range::point(v("vi")), Range::from_extent(128)],
                    ),
                )
                .stmt(grid(
                    &[("j", 128)],
                    Stmt::store(
                        "C",
                        vec![v("vi"), v("j")],
                        Expr::load("Brow", vec![v("j")]) + 1.0,
                    ),
                ))
                .into_stmt(),
        ))
        .build();
    assert_unchanged_on_error(&func, "B", false, ScheduleErrorKind::BufferAlias);
}

#[test]
fn test_compute_inline_fail_predicate() {
    let func = FunctionBuilder::new("main")
        .param(Buffer::param("A", &[128, 128], DataType::Float32))
        .param(Buffer::param("C", &[128, 128], DataType::Float32))
        .alloc(Buffer::alloc("B", &[128, 128], DataType::Float32))
        .stmt(grid(
            &[("i", 128), ("j", 128)],
            BlockBuilder::new("B")
                .spatial("vi", 128, v("i"))
                .spatial("vj", 128, v("j"))
                .predicate(v("vi").lt(64i64))
                .store("B", vec![v("vi"), v("vj")], ld("A") * 2.0)
                .into_stmt(),
        ))
        .stmt(block_2d("C", "C", ld("B") + 1.0))
        .build();
    assert_unchanged_on_error(&func, "B", false, ScheduleErrorKind::ComplexBody);
}

#[test]
fn test_inline_root_fails() {
    assert_unchanged_on_error(&elementwise(), "root", false, ScheduleErrorKind::ComplexBody);
    assert_unchanged_on_error(&elementwise(), "root", true, ScheduleErrorKind::ComplexBody);
}

#[test]
fn test_reverse_compute_inline_elementwise() {
    let func = elementwise();
    let mut sch = Schedule::new(&func);
    let c = sch.get_block("C").unwrap();
    reverse_inline(&mut sch, c).expect("reverse inline C");
    assert_eq!(sch.get_block("C").unwrap_err().kind, ScheduleErrorKind::NotFound);

    let expected = FunctionBuilder::new("main")
        .param(Buffer::param("A", &[128, 128], DataType::Float32))
        .param(Buffer::param("C", &[128, 128], DataType::Float32))
        .stmt(block_2d("B", "C", ld("A") * 2.0 + 1.0))
        .build();
    assert_eq!(sch.func(), expected);
    assert_replays(&sch, &func);
}

#[test]
fn test_reverse_compute_inline_under_loop() {
    let func = FunctionBuilder::new("main")
        .param(Buffer::param("A", &[128, 128], DataType::Float32))
        .param(Buffer::param("C", &[128, 128], DataType::Float32))
        .alloc(Buffer::alloc("B", &[128, 128], DataType::Float32))
        .stmt(grid(
            &[("i", 128)],
            Stmt::seq(vec![
                grid(
                    &[("j", 128)],
                    BlockBuilder::new("B")
                        .spatial("vi", 128, v("i"))
                        .spatial("vj", 128, v("j"))
                        .store("B", vec![v("vi"), v("vj")], ld("A") * 2.0)
                        .into_stmt(),
                ),
                grid(
                    &[("j", 128)],
                    BlockBuilder::new("C")
                        .spatial("vi", 128, v("i"))
                        .spatial("vj", 128, v("j"))
                        .store("C", vec![v("vi"), v("vj")], ld("B") + 1.0)
                        .into_stmt(),
                ),
            ]),
        ))
        .build();
    let mut sch = Schedule::new(&func);
    let c = sch.get_block("C").unwrap();
    reverse_inline(&mut sch, c).unwrap();
    let text = sch.func().to_string();
    assert_eq!(text.matches("for ").count(), 2, "{}", text);
    assert!(text.contains("C[vi, vj] = A[vi, vj] * 2.0 + 1.0"), "{}", text);
    assert!(!text.contains("B["), "{}", text);
    assert!(sch.func().root.alloc_buffers.is_empty());
    verify(sch.state()).unwrap();
    assert_replays(&sch, &func);
}

/// B[vk] = A[vk] * 2 over 128 points, read by C as B[vi * 16 + vj].
fn flattened_consumer(index: Expr) -> Function {
    FunctionBuilder::new("main")
        .param(Buffer::param("A", &[128], DataType::Float32))
        .param(Buffer::param("C", &[8, 16], DataType::Float32))
        .alloc(Buffer::alloc("B", &[128], DataType::Float32))
        .stmt(grid(
            &[("k", 128)],
            BlockBuilder::new("B")
                .spatial("vk", 128, v("k"))
                .store("B", vec![v("vk")], Expr::load("A", vec![v("vk")]) * 2.0)
                .into_stmt(),
        ))
        .stmt(grid(
            &[("i", 8), ("j", 16)],
            BlockBuilder::new("C")
                .spatial("vi", 8, v("i"))
                .spatial("vj", 16, v("j"))
                .store("C", vec![v("vi"), v("vj")], Expr::load("B", vec![index]) + 1.0)
                .into_stmt(),
        ))
        .build()
}

#[test]
fn test_reverse_compute_inline_affine_bijection() {
    let func = flattened_consumer(v("vi") * 16i64 + v("vj"));
    let mut sch = Schedule::new(&func);
    let c = sch.get_block("C").unwrap();
    reverse_inline(&mut sch, c).expect("affine bijection accepted");

    let b = sch.get_block("B").unwrap();
    let node = sch.state().block(b.handle()).unwrap();
    let (buffer, indices, value) = node.single_store().unwrap();
    assert_eq!(buffer, "C");
    let indices: Vec<String> = indices.iter().map(|e| e.to_string()).collect();
    assert_eq!(indices, vec!["vk // 16", "vk % 16"]);
    assert_eq!(value.to_string(), "A[vk] * 2.0 + 1.0");
    assert!(sch.func().root.alloc_buffers.is_empty());
    verify(sch.state()).unwrap();
    assert_replays(&sch, &func);
}

#[test]
fn test_reverse_compute_inline_fail_non_injective() {
    // vi + vj maps (1, 0) and (0, 1) to the same element
    let func = flattened_consumer(v("vi") + v("vj"));
    assert_unchanged_on_error(&func, "C", true, ScheduleErrorKind::NonAffineAccess);
}

/// B = A * 2 over 128 x 128, read by a 4-d C through a flattened index.
fn affine_load() -> Function {
    let flat = ((v("vi") * 32i64 + v("vj")) * 8i64 + v("vk")) * 8i64 + v("vl");
    FunctionBuilder::new("main")
        .param(Buffer::param("A", &[128, 128], DataType::Float32))
        .param(Buffer::param("C", &[8, 32, 8, 8], DataType::Float32))
        .alloc(Buffer::alloc("B", &[128, 128], DataType::Float32))
        .stmt(block_2d("B", "B", ld("A") * 2.0))
        .stmt(grid(
            &[("i", 8), ("j", 32), ("k", 8), ("l", 8)],
            BlockBuilder::new("C")
                .spatial("vi", 8, v("i"))
                .spatial("vj", 32, v("j"))
                .spatial("vk", 8, v("k"))
                .spatial("vl", 8, v("l"))
                .store(
                    "C",
                    vec![v("vi"), v("vj"), v("vk"), v("vl")],
                    Expr::load("B", vec![flat.clone().floordiv(128i64), flat.floormod(128i64)]),
                )
                .into_stmt(),
        ))
        .build()
}

#[test]
fn test_reverse_compute_inline_affine_load() {
    let func = affine_load();
    let mut sch = Schedule::new(&func);
    let c = sch.get_block("C").unwrap();
    reverse_inline(&mut sch, c).expect("digits of one fused sum accepted");

    let b = sch.get_block("B").unwrap();
    let (buffer, indices, value) = sch.state().block(b.handle()).unwrap().single_store().unwrap();
    assert_eq!(buffer, "C");
    let indices: Vec<String> = indices.iter().map(|e| e.to_string()).collect();
    assert_eq!(
        indices,
        vec![
            "(vi * 128 + vj) // 2048",
            "(vi * 128 + vj) // 64 % 32",
            "(vi * 128 + vj) // 8 % 8",
            "(vi * 128 + vj) % 8",
        ]
    );
    assert_eq!(value.to_string(), "A[vi, vj] * 2.0");
    assert!(sch.func().root.alloc_buffers.is_empty());
    verify(sch.state()).unwrap();
    assert_replays(&sch, &func);
}

#[test]
fn test_compute_inline_affine_load() {
    let func = affine_load();
    let mut sch = Schedule::new(&func);
    let b = sch.get_block("B").unwrap();
    forward_inline(&mut sch, b).unwrap();
    let text = sch.func().to_string();
    assert!(text.contains("// 128, "), "{}", text);
    assert!(text.contains("% 128] * 2.0"), "{}", text);
    assert!(sch.func().root.alloc_buffers.is_empty());
    verify(sch.state()).unwrap();
    assert_replays(&sch, &func);
}

/// B = A * 2; C[vi, vj, vk] = B[vi * 16 + vj, vk] + 1; D[0, vi, vj, vk] = C[vi, vj, vk]
fn affine_chain() -> Function {
    FunctionBuilder::new("main")
        .param(Buffer::param("A", &[128, 128], DataType::Float32))
        .param(Buffer::param("D", &[1, 8, 16, 128], DataType::Float32))
        .alloc(Buffer::alloc("B", &[128, 128], DataType::Float32))
        .alloc(Buffer::alloc("C", &[8, 16, 128], DataType::Float32))
        .stmt(block_2d("B", "B", ld("A") * 2.0))
        .stmt(grid(
            &[("i", 8), ("j", 16), ("k", 128)],
            BlockBuilder::new("C")
                .spatial("vi", 8, v("i"))
                .spatial("vj", 16, v("j"))
                .spatial("vk", 128, v("k"))
                .store(
                    "C",
                    vec![v("vi"), v("vj"), v("vk")],
                    Expr::load("B", vec![v("vi") * 16i64 + v("vj"), v("vk")]) + 1.0,
                )
                .into_stmt(),
        ))
        .stmt(grid(
            &[("i", 1), ("j", 8), ("k", 16), ("l", 128)],
            BlockBuilder::new("D")
                .spatial("vi", 1, v("i"))
                .spatial("vj", 8, v("j"))
                .spatial("vk", 16, v("k"))
                .spatial("vl", 128, v("l"))
                .store(
                    "D",
                    vec![v("vi"), v("vj"), v("vk"), v("vl")],
                    Expr::load("C", vec![v("vj"), v("vk"), v("vl")]),
                )
                .into_stmt(),
        ))
        .build()
}

#[test]
fn test_reverse_compute_inline_affine_chain() {
    let func = affine_chain();
    let expected = FunctionBuilder::new("main")
        .param(Buffer::param("A", &[128, 128], DataType::Float32))
        .param(Buffer::param("D", &[1, 8, 16, 128], DataType::Float32))
        .stmt(grid(
            &[("i", 128), ("j", 128)],
            BlockBuilder::new("B")
                .spatial("vi", 128, v("i"))
                .spatial("vj", 128, v("j"))
                .store(
                    "D",
                    vec![Expr::int(0), v("vi").floordiv(16i64), v("vi").floormod(16i64), v("vj")],
                    ld("A") * 2.0 + 1.0,
                )
                .into_stmt(),
        ))
        .build();

    for order in [["C", "D"], ["D", "C"]] {
        let mut sch = Schedule::new(&func);
        for name in order {
            let rv = sch.get_block(name).unwrap();
            reverse_inline(&mut sch, rv).unwrap_or_else(|e| panic!("{:?}: {}", order, e));
        }
        assert_eq!(sch.func(), expected, "order {:?}", order);
        verify(sch.state()).unwrap();
        assert_replays(&sch, &func);
    }
}

#[test]
fn test_reverse_compute_inline_multi_affine_load() {
    let load = || Expr::load("B", vec![v("vi") * 16i64 + v("vj"), v("vk")]);
    let func = FunctionBuilder::new("main")
        .param(Buffer::param("A", &[128, 128], DataType::Float32))
        .param(Buffer::param("C", &[8, 16, 128], DataType::Float32))
        .alloc(Buffer::alloc("B", &[128, 128], DataType::Float32))
        .stmt(block_2d("B", "B", ld("A") * 2.0))
        .stmt(grid(
            &[("i", 8), ("j", 16), ("k", 128)],
            BlockBuilder::new("C")
                .spatial("vi", 8, v("i"))
                .spatial("vj", 16, v("j"))
                .spatial("vk", 128, v("k"))
                .store("C", vec![v("vi"), v("vj"), v("vk")], load() + load())
                .into_stmt(),
        ))
        .build();
    let mut sch = Schedule::new(&func);
    let c = sch.get_block("C").unwrap();
    reverse_inline(&mut sch, c).unwrap();

    let expected = FunctionBuilder::new("main")
        .param(Buffer::param("A", &[128, 128], DataType::Float32))
        .param(Buffer::param("C", &[8, 16, 128], DataType::Float32))
        .stmt(block_2d_at(
            "B",
            "C",
            vec![v("vi").floordiv(16i64), v("vi").floormod(16i64), v("vj")],
            ld("A") * 2.0 + ld("A") * 2.0,
        ))
        .build();
    assert_eq!(sch.func(), expected);
    assert_replays(&sch, &func);
}

#[test]
fn test_reverse_compute_inline_fail_non_affine_load() {
    let func = FunctionBuilder::new("main")
        .param(Buffer::param("A", &[128, 128], DataType::Float32))
        .param(Buffer::param("C", &[8, 16], DataType::Float32))
        .alloc(Buffer::alloc("B", &[128, 128], DataType::Float32))
        .stmt(block_2d("B", "B", ld("A") * 2.0))
        .stmt(grid(
            &[("i", 8), ("j", 16)],
            BlockBuilder::new("C")
                .spatial("vi", 8, v("i"))
                .spatial("vj", 16, v("j"))
                .store(
                    "C",
                    vec![v("vi"), v("vj")],
                    Expr::load("B", vec![v("vi") * 16i64 + v("vj"), v("vi") * 16i64 + v("vj")]),
                )
                .into_stmt(),
        ))
        .build();
    assert_unchanged_on_error(&func, "C", true, ScheduleErrorKind::NonAffineAccess);
}

#[test]
fn test_reverse_compute_inline_unit_dimension() {
    let func = FunctionBuilder::new("main")
        .param(Buffer::param("A", &[1, 64], DataType::Float32))
        .param(Buffer::param("C", &[64], DataType::Float32))
        .alloc(Buffer::alloc("B", &[1, 64], DataType::Float32))
        .stmt(grid(
            &[("u", 1), ("k", 64)],
            BlockBuilder::new("B")
                .spatial("vu", 1, v("u"))
                .spatial("vk", 64, v("k"))
                .store("B", vec![v("vu"), v("vk")], Expr::load("A", vec![v("vu"), v("vk")]) * 2.0)
                .into_stmt(),
        ))
        .stmt(grid(
            &[("i", 64)],
            BlockBuilder::new("C")
                .spatial("vi", 64, v("i"))
                .store("C", vec![v("vi")], Expr::load("B", vec![Expr::int(0), v("vi")]) + 1.0)
                .into_stmt(),
        ))
        .build();
    let mut sch = Schedule::new(&func);
    let c = sch.get_block("C").unwrap();
    reverse_inline(&mut sch, c).expect("unit dimension accepted");
    let b = sch.get_block("B").unwrap();
    let (_, indices, value) = sch.state().block(b.handle()).unwrap().single_store().unwrap();
    assert_eq!(indices, &[v("vk")]);
    assert_eq!(value.to_string(), "A[vu, vk] * 2.0 + 1.0");
}

#[test]
fn test_reverse_compute_inline_identical_loads() {
    let func = FunctionBuilder::new("main")
        .param(Buffer::param("A", &[128, 128], DataType::Float32))
        .param(Buffer::param("C", &[128, 128], DataType::Float32))
        .alloc(Buffer::alloc("B", &[128, 128], DataType::Float32))
        .stmt(block_2d("B", "B", ld("A") * 2.0))
        .stmt(block_2d("C", "C", ld("B") * ld("B")))
        .build();
    let mut sch = Schedule::new(&func);
    let c = sch.get_block("C").unwrap();
    reverse_inline(&mut sch, c).unwrap();
    let text = sch.func().to_string();
    assert!(text.contains("C[vi, vj] = A[vi, vj] * 2.0 * (A[vi, vj] * 2.0)"), "{}", text);
}

#[test]
fn test_reverse_compute_inline_fail_multiple_loads() {
    let func = FunctionBuilder::new("main")
        .param(Buffer::param("A", &[129, 128], DataType::Float32))
        .param(Buffer::param("C", &[128, 128], DataType::Float32))
        .alloc(Buffer::alloc("B", &[129, 128], DataType::Float32))
        .stmt(grid(
            &[("i", 129), ("j", 128)],
            BlockBuilder::new("B")
                .spatial("vi", 129, v("i"))
                .spatial("vj", 128, v("j"))
                .store("B", vec![v("vi"), v("vj")], ld("A") * 2.0)
                .into_stmt(),
        ))
        .stmt(block_2d(
            "C",
            "C",
            ld("B") + Expr::load("B", vec![v("vi") + 1i64, v("vj")]),
        ))
        .build();
    assert_unchanged_on_error(&func, "C", true, ScheduleErrorKind::MultipleLoad);
}

#[test]
fn test_reverse_compute_inline_fail_multi_reader() {
    let func = FunctionBuilder::new("main")
        .param(Buffer::param("A", &[128, 128], DataType::Float32))
        .param(Buffer::param("C", &[128, 128], DataType::Float32))
        .param(Buffer::param("D", &[128, 128], DataType::Float32))
        .alloc(Buffer::alloc("B", &[128, 128], DataType::Float32))
        .stmt(block_2d("B", "B", ld("A") * 2.0))
        .stmt(block_2d("C", "C", ld("B") + 1.0))
        .stmt(block_2d("D", "D", ld("B") + 2.0))
        .build();
    assert_unchanged_on_error(&func, "C", true, ScheduleErrorKind::MultiReader);
}

#[test]
fn test_reverse_compute_inline_fail_producers() {
    // two producers
    let func = FunctionBuilder::new("main")
        .param(Buffer::param("A", &[128, 128], DataType::Float32))
        .param(Buffer::param("C", &[128, 128], DataType::Float32))
        .alloc(Buffer::alloc("B", &[128, 128], DataType::Float32))
        .alloc(Buffer::alloc("E", &[128, 128], DataType::Float32))
        .stmt(block_2d("B", "B", ld("A") * 2.0))
        .stmt(block_2d("E", "E", ld("A") * 3.0))
        .stmt(block_2d("C", "C", ld("B") + ld("E")))
        .build();
    assert_unchanged_on_error(&func, "C", true, ScheduleErrorKind::NotSingleProducer);

    // no producer at all
    assert_unchanged_on_error(&elementwise(), "B", true, ScheduleErrorKind::NotSingleProducer);
}

#[test]
fn test_reverse_compute_inline_fail_output_producer() {
    let func = FunctionBuilder::new("main")
        .param(Buffer::param("A", &[128, 128], DataType::Float32))
        .param(Buffer::param("B", &[128, 128], DataType::Float32))
        .param(Buffer::param("C", &[128, 128], DataType::Float32))
        .stmt(block_2d("B", "B", ld("A") * 2.0))
        .stmt(block_2d("C", "C", ld("B") + 1.0))
        .build();
    assert_unchanged_on_error(&func, "C", true, ScheduleErrorKind::OutputBlock);
}

#[test]
fn test_inline_with_split_replays() {
    let func = elementwise();
    let mut sch = Schedule::new(&func);
    let c = sch.get_block("C").unwrap();
    let loops = sch.get_loops(c).unwrap();
    let split = sch.split(loops[1], &[None, Some(32)]).unwrap();
    sch.reorder(&[split[0], loops[0]]).unwrap();
    let b = sch.get_block("B").unwrap();
    forward_inline(&mut sch, b).unwrap();
    verify(sch.state()).unwrap();
    assert_replays(&sch, &func);

    let json = serde_json::to_string(&sch.func()).unwrap();
    assert_eq!(tensched::parse_function(&json).unwrap(), sch.func());
}
