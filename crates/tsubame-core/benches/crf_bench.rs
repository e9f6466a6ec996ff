use criterion::{Criterion, black_box, criterion_group, criterion_main};
use tsubame_core::{CrfModel, Lattice, ModelConfig, TokenSequence, ViterbiDecoder};

fn sentence(len: usize, features_per_token: usize, num_base_features: usize) -> TokenSequence {
    let features = (0..len)
        .map(|i| {
            (0..features_per_token)
                .map(|k| (i * 31 + k * 17) % num_base_features)
                .collect()
        })
        .collect();
    TokenSequence::new(Vec::new(), features)
}

fn bench_crf(c: &mut Criterion) {
    let model = CrfModel::new(ModelConfig::new(10_000, 14).with_seed(11)).unwrap();
    let input = sentence(40, 14, 10_000);
    let emissions = model.emissions(&input).unwrap();
    let decoder = ViterbiDecoder::new(model.tags().size());

    c.bench_function("emissions_40_tokens", |b| {
        b.iter(|| model.emissions(black_box(&input)).unwrap());
    });

    c.bench_function("viterbi_40_tokens", |b| {
        b.iter(|| {
            decoder
                .decode(black_box(&emissions), model.transitions())
                .unwrap()
        });
    });

    c.bench_function("forward_backward_40_tokens", |b| {
        b.iter(|| Lattice::compute(black_box(&emissions), model.transitions()).unwrap());
    });
}

criterion_group!(benches, bench_crf);
criterion_main!(benches);
