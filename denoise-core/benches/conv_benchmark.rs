use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use denoise_core::{Conv, ConvDesc, PlanarTensor, PostOp, reorder};
use denoise_utils::{CpuEngine, EngineOptions};
use std::hint::black_box;

fn pattern(len: usize) -> Vec<f32> {
    (0..len).map(|i| ((i % 17) as f32 - 8.0) / 64.0).collect()
}

fn benchmark_fused_conv(c: &mut Criterion) {
    let engine = CpuEngine::new(&EngineOptions::default()).expect("engine");

    // (name, in_ch, out_ch, height, width, post_op)
    let layers = [
        ("enc_conv0", 16, 32, 64, 64, PostOp::None),
        ("enc_conv1_pool", 32, 32, 64, 64, PostOp::Pool),
        ("dec_conv_up", 64, 32, 32, 32, PostOp::Upsample),
        ("ragged_edges", 32, 32, 37, 45, PostOp::None),
    ];

    let mut group = c.benchmark_group("conv3x3");
    for (name, in_ch, out_ch, height, width, post_op) in layers {
        let desc = ConvDesc::new(in_ch, out_ch, height, width, post_op).expect("desc");
        let mut conv = Conv::new(engine.clone(), desc).expect("conv");

        let src = PlanarTensor::new(in_ch, height, width, pattern(in_ch * height * width))
            .expect("src");
        let src = reorder::chw_to_chw16c(&src).expect("reorder src");
        let weight = reorder::oihw_to_oihw16i16o(&pattern(out_ch * in_ch * 9), out_ch, in_ch)
            .expect("reorder weight");
        let bias = reorder::bias_from_f32(&pattern(out_ch)).expect("bias");
        let dst = denoise_core::Tensor::zeros(conv.dst_desc().clone()).expect("dst");

        conv.set_src(&src).expect("src");
        conv.set_weight(&weight).expect("weight");
        conv.set_bias(&bias).expect("bias");
        conv.set_dst(&dst).expect("dst");

        group.bench_with_input(BenchmarkId::new(name, post_op), &conv, |b, conv| {
            b.iter(|| {
                black_box(conv).submit().expect("submit");
                engine.wait().expect("wait");
            });
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_fused_conv);
criterion_main!(benches);
